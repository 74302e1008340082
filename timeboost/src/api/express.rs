use std::sync::Arc;
use std::time::Duration;

use axum::{
    Json, Router,
    extract::State,
    response::Response,
    routing::{get, post},
};
use bon::Builder;
use http::StatusCode;
use timeboost_sequencer::ExpressLaneGate;
use timeboost_types::rpc::{Ack, Inclusion, LaneStatus, SyncSubmission};
use timeboost_types::{Bytes, SignedSubmission, Timestamp};
use timeboost_utils::types::prometheus::PrometheusMetrics;
use tracing::trace;

use super::{ApiError, export_metrics, traced};

/// HTTP API of a sequencer's express lane.
#[derive(Debug, Clone, Builder)]
pub struct ExpressLaneApi {
    gate: ExpressLaneGate,
    metrics: Arc<PrometheusMetrics>,

    /// Upper bound of the wait of synchronous submissions.
    #[builder(default = Duration::from_secs(30))]
    max_sync_wait: Duration,
}

impl ExpressLaneApi {
    pub fn router(&self) -> Router {
        traced(
            Router::new()
                .route("/v1/express-lane/submit", post(Self::submit))
                .route("/v1/express-lane/submit-sync", post(Self::submit_sync))
                .route("/v1/submit/regular", post(Self::submit_regular))
                .route("/v1/round", get(Self::round))
                .route("/i/health", get(Self::health))
                .route("/i/metrics", get(Self::metrics))
                .with_state(self.clone()),
        )
    }

    async fn submit(this: State<Self>, env: Json<SignedSubmission>) -> Result<Json<Ack>, ApiError> {
        let (ack, _) = this.gate.admit(env.0)?;
        trace!(round = %ack.round, seqno = %ack.seqno, status = ?ack.status, "envelope acknowledged");
        Ok(Json(ack))
    }

    async fn submit_sync(
        this: State<Self>,
        body: Json<SyncSubmission>,
    ) -> Result<Json<Inclusion>, ApiError> {
        let Json(body) = body;
        let wait = Duration::from_millis(body.timeout_ms).min(this.max_sync_wait);
        Ok(Json(this.gate.admit_sync(body.envelope, wait).await?))
    }

    async fn submit_regular(this: State<Self>, tx: Json<Bytes>) -> Result<StatusCode, ApiError> {
        this.gate.submit_regular(tx.0)?;
        Ok(StatusCode::ACCEPTED)
    }

    async fn round(this: State<Self>) -> Json<LaneStatus> {
        Json(this.gate.status().into())
    }

    async fn health(this: State<Self>) -> StatusCode {
        let status = this.gate.status();
        let current = this.gate.timing().round_of(Timestamp::now());
        if current > status.round.next() {
            // Round transitions have stalled.
            StatusCode::INTERNAL_SERVER_ERROR
        } else {
            StatusCode::OK
        }
    }

    async fn metrics(this: State<Self>) -> Response {
        export_metrics(&this.metrics)
    }
}
