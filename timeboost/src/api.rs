use std::fmt::Display;
use std::io;
use std::time::Duration;

use axum::{
    Json, Router,
    body::Body,
    response::{IntoResponse, Response},
};
use http::{Request, StatusCode};
use timeboost_auction::BidError;
use timeboost_sequencer::GateError;
use timeboost_types::rpc::ErrorBody;
use timeboost_utils::types::prometheus::PrometheusMetrics;
use tokio::net::{TcpListener, ToSocketAddrs};
use tower::ServiceBuilder;
use tower_http::trace::TraceLayer;
use tower_http::{ServiceBuilderExt, request_id::MakeRequestUuid};
use tracing::{Level, Span, debug, error, span};

mod bids;
mod express;

pub use bids::BidApi;
pub use express::ExpressLaneApi;

pub async fn serve<A: ToSocketAddrs>(router: Router, addr: A) -> io::Result<()> {
    let listener = TcpListener::bind(addr).await?;
    axum::serve(listener, router).await
}

/// Add request ids and request tracing.
fn traced(router: Router) -> Router {
    router.layer(
        ServiceBuilder::new()
            .set_x_request_id(MakeRequestUuid)
            .layer(TraceLayer::new_for_http()
                .make_span_with(|r: &Request<Body>| {
                    span!(
                        Level::DEBUG,
                        "request",
                        method = %r.method(),
                        uri = %r.uri(),
                        id = %r.headers()
                            .get("x-request-id")
                            .and_then(|id| id.to_str().ok())
                            .unwrap_or("N/A")
                    )
                })
                .on_request(|_r: &Request<Body>, _s: &Span| {
                    debug!("request received")
                })
                .on_response(|r: &Response<Body>, d: Duration, _span: &Span| {
                    debug!(status = %r.status().as_u16(), duration = ?d, "response created")
                })
            )
    )
}

fn export_metrics(m: &PrometheusMetrics) -> Response {
    match m.export() {
        Ok(output) => (StatusCode::OK, output).into_response(),
        Err(err) => {
            error!(%err, "metrics export error");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                "failed to export metrics",
            )
                .into_response()
        }
    }
}

/// A rejected request.
#[derive(Debug)]
pub(crate) struct ApiError(StatusCode, ErrorBody);

impl ApiError {
    fn new<M: Display>(status: StatusCode, code: &str, msg: M) -> Self {
        Self(
            status,
            ErrorBody {
                code: code.to_string(),
                message: msg.to_string(),
            },
        )
    }

    fn not_found<M: Display>(msg: M) -> Self {
        Self::new(StatusCode::NOT_FOUND, "not-found", msg)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (self.0, Json(self.1)).into_response()
    }
}

impl From<BidError> for ApiError {
    fn from(e: BidError) -> Self {
        let status = if e.is_invalid_bid() {
            StatusCode::BAD_REQUEST
        } else {
            StatusCode::SERVICE_UNAVAILABLE
        };
        Self::new(status, e.code(), e)
    }
}

impl From<GateError> for ApiError {
    fn from(e: GateError) -> Self {
        let status = match e {
            GateError::Timeout => StatusCode::GATEWAY_TIMEOUT,
            GateError::Shutdown => StatusCode::SERVICE_UNAVAILABLE,
            GateError::BufferFull => StatusCode::TOO_MANY_REQUESTS,
            _ => StatusCode::BAD_REQUEST,
        };
        Self::new(status, e.code(), e)
    }
}
