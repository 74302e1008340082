use std::cmp::min;
use std::sync::Arc;
use std::time::Duration;

use timeboost_contract::{AuctionContract, ContractError};
use timeboost_types::{AuctionResolution, RoundOutcome, Timestamp};
use timeboost_utils::Backoff;
use tokio::time::sleep;
use tracing::{debug, error, info, warn};

use crate::store::{ResolutionStore, RoundRecord, Status};

/// Terminal result of settling a round.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Settlement {
    /// The chain holds the local resolution.
    Committed,
    /// The chain holds a different resolution.
    Reconciled(AuctionResolution),
    /// The round had no bids.
    NothingToSettle,
    /// Settlement failed permanently or ran out of time.
    Abandoned(String),
}

/// Brings a round's resolution onto the chain.
///
/// Settlement is an idempotent "ensure committed" command: the chain is
/// queried whenever the outcome of a previous attempt is unknown, and a
/// resolution found on chain ends the process, whether or not it matches.
pub struct Settler<C> {
    contract: Arc<C>,
    store: Arc<ResolutionStore>,
    backoff: Backoff,
}

impl<C> Clone for Settler<C> {
    fn clone(&self) -> Self {
        Self {
            contract: self.contract.clone(),
            store: self.store.clone(),
            backoff: self.backoff,
        }
    }
}

impl<C: AuctionContract> Settler<C> {
    pub fn new(contract: Arc<C>, store: Arc<ResolutionStore>, backoff: Backoff) -> Self {
        Self {
            contract,
            store,
            backoff,
        }
    }

    /// Settle `rec` and persist the final status.
    ///
    /// Gives up at `deadline`. `recovering` starts with a chain query instead
    /// of a submission, for records whose earlier attempt may have landed.
    pub async fn settle(&self, rec: RoundRecord, deadline: Timestamp, recovering: bool) -> RoundRecord {
        let rec = match self.ensure_committed(&rec, deadline, recovering).await {
            Settlement::Committed => RoundRecord {
                status: Status::Committed,
                ..rec
            },
            Settlement::Reconciled(chain) => {
                let status = match rec.outcome {
                    RoundOutcome::Resolved(local) => Status::Reconciled { local },
                    RoundOutcome::Unresolved { .. } => Status::NoController,
                };
                RoundRecord {
                    outcome: RoundOutcome::Resolved(chain),
                    request: rec.request,
                    status,
                }
            }
            Settlement::NothingToSettle => RoundRecord {
                status: Status::NoController,
                ..rec
            },
            Settlement::Abandoned(reason) => RoundRecord {
                status: Status::Abandoned { reason },
                ..rec
            },
        };
        if let Err(err) = self.store.update(&rec).await {
            error!(round = %rec.round(), %err, "failed to persist settlement status");
        }
        rec
    }

    pub async fn ensure_committed(
        &self,
        rec: &RoundRecord,
        deadline: Timestamp,
        recovering: bool,
    ) -> Settlement {
        enum State {
            Query,
            Submit,
            Wait(Duration),
        }

        let (Some(local), Some(req)) = (rec.outcome.resolution().copied(), rec.request.as_ref())
        else {
            return Settlement::NothingToSettle;
        };

        let round = local.round;
        let mut delays = self.backoff.delay_iter();
        let mut state = if recovering { State::Query } else { State::Submit };

        loop {
            match state {
                State::Query => match self.contract.resolution(round).await {
                    Ok(Some(chain)) => return reconcile(local, chain),
                    Ok(None) => state = State::Submit,
                    Err(err) => {
                        warn!(%round, %err, "resolution query failed");
                        state = State::Wait(next_delay(&mut delays))
                    }
                },
                State::Submit => match self.contract.resolve(req).await {
                    Ok(()) => {
                        info!(
                            %round,
                            winner = %local.winner,
                            price  = %local.second_price,
                            "resolution committed"
                        );
                        return Settlement::Committed;
                    }
                    Err(ContractError::AlreadyResolved(_)) => {
                        debug!(%round, "round already resolved on chain");
                        state = State::Query
                    }
                    Err(err) if err.is_transient() => {
                        warn!(%round, %err, "resolution submission failed");
                        state = State::Wait(next_delay(&mut delays))
                    }
                    Err(err) => {
                        error!(%round, %err, "resolution rejected");
                        return Settlement::Abandoned(err.to_string());
                    }
                },
                State::Wait(d) => {
                    let now = Timestamp::now();
                    if now >= deadline {
                        warn!(%round, "settlement deadline passed");
                        return Settlement::Abandoned("deadline passed".to_string());
                    }
                    sleep(min(d, deadline.saturating_duration_since(now))).await;
                    // The previous attempt may have been applied.
                    state = State::Query
                }
            }
        }
    }
}

fn next_delay(delays: &mut impl Iterator<Item = Duration>) -> Duration {
    delays.next().unwrap_or(Duration::from_secs(1))
}

fn reconcile(local: AuctionResolution, chain: AuctionResolution) -> Settlement {
    if local == chain {
        Settlement::Committed
    } else {
        warn!(
            round = %local.round,
            local = %local.winner,
            chain = %chain.winner,
            "adopting conflicting on-chain resolution"
        );
        Settlement::Reconciled(chain)
    }
}
