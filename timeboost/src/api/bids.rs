use std::sync::Arc;

use axum::{
    Json, Router,
    extract::{Path, State},
    response::Response,
    routing::{get, post},
};
use bon::Builder;
use http::StatusCode;
use timeboost_auction::{BidValidator, ResolutionStore};
use timeboost_contract::AuctionContract;
use timeboost_types::rpc::BidReceipt;
use timeboost_types::{Address, Round, RoundOutcome, SignedBid};
use timeboost_utils::types::prometheus::PrometheusMetrics;

use super::{ApiError, export_metrics, traced};

/// HTTP API of bid validation and auction outcomes.
///
/// Either part is optional, so a validator and an auctioneer may run in
/// separate processes.
#[derive(Builder)]
pub struct BidApi<C> {
    validator: Option<Arc<BidValidator<C>>>,
    store: Option<Arc<ResolutionStore>>,
    metrics: Arc<PrometheusMetrics>,
}

impl<C> Clone for BidApi<C> {
    fn clone(&self) -> Self {
        Self {
            validator: self.validator.clone(),
            store: self.store.clone(),
            metrics: self.metrics.clone(),
        }
    }
}

impl<C: AuctionContract> BidApi<C> {
    pub fn router(&self) -> Router {
        traced(
            Router::new()
                .route("/v1/bids", post(Self::submit_bid))
                .route("/v1/resolution/{round}", get(Self::resolution))
                .route("/v1/controller/{round}", get(Self::controller))
                .route("/i/health", get(Self::health))
                .route("/i/metrics", get(Self::metrics))
                .with_state(self.clone()),
        )
    }

    async fn submit_bid(
        this: State<Self>,
        bid: Json<SignedBid>,
    ) -> Result<Json<BidReceipt>, ApiError> {
        let Some(v) = &this.validator else {
            return Err(ApiError::not_found("no bid validator"));
        };
        Ok(Json(v.submit_bid(bid.0).await?))
    }

    async fn resolution(
        this: State<Self>,
        Path(round): Path<Round>,
    ) -> Result<Json<RoundOutcome>, ApiError> {
        let Some(s) = &this.store else {
            return Err(ApiError::not_found("no resolution store"));
        };
        s.get(round)
            .map(|rec| Json(rec.outcome))
            .ok_or_else(|| ApiError::not_found(format!("round {round} not resolved")))
    }

    async fn controller(
        this: State<Self>,
        Path(round): Path<Round>,
    ) -> Result<Json<Option<Address>>, ApiError> {
        let Some(s) = &this.store else {
            return Err(ApiError::not_found("no resolution store"));
        };
        if !s.contains(round) {
            return Err(ApiError::not_found(format!("round {round} not resolved")));
        }
        Ok(Json(s.controller(round)))
    }

    async fn health(_: State<Self>) -> StatusCode {
        StatusCode::OK
    }

    async fn metrics(this: State<Self>) -> Response {
        export_metrics(&this.metrics)
    }
}
