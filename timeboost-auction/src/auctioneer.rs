use std::cmp::{max, min};
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use timeboost_contract::{AuctionContract, ContractError};
use timeboost_types::{Round, RoundOutcome, RoundTimingInfo, Timestamp, U256};
use tokio::select;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior, interval, sleep, sleep_until};
use tokio_util::task::TaskTracker;
use tracing::{debug, error, info, warn};

use crate::archive::{ArchiveError, BidArchive};
use crate::cache::{BidCache, Resolution};
use crate::config::AuctioneerConfig;
use crate::lease::{Lease, LeaseError};
use crate::metrics::AuctioneerMetrics;
use crate::queue::{BidConsumer, BidQueue, QueueError, QueuedBid};
use crate::settle::Settler;
use crate::store::{ResolutionStore, RoundRecord, Status, StoreError};

#[derive(Debug, thiserror::Error)]
#[non_exhaustive]
pub enum AuctioneerError {
    #[error("contract error: {0}")]
    Contract(#[from] ContractError),

    #[error("invalid configuration: {0}")]
    Timing(#[from] timeboost_types::InvalidTiming),

    #[error("queue error: {0}")]
    Queue(#[from] QueueError),

    #[error("store error: {0}")]
    Store(#[from] StoreError),

    #[error("lease error: {0}")]
    Lease(#[from] LeaseError),

    #[error("archive error: {0}")]
    Archive(#[from] ArchiveError),
}

/// Collects bids per round, resolves each round at its closing boundary and
/// settles the result on chain.
///
/// Replicas sharing a lease directory all collect bids, but only the lease
/// holder resolves and settles rounds.
pub struct AuctioneerServer {
    task: JoinHandle<()>,
    store: Arc<ResolutionStore>,
    settlements: TaskTracker,
    lease: Option<Lease>,
}

impl Drop for AuctioneerServer {
    fn drop(&mut self) {
        self.task.abort()
    }
}

struct Task<C> {
    config: AuctioneerConfig,
    timing: RoundTimingInfo,
    contract: Arc<C>,
    queue: BidQueue,
    consumer: BidConsumer,
    store: Arc<ResolutionStore>,
    settler: Settler<C>,
    settlements: TaskTracker,
    lease: Option<Lease>,
    /// Whether this replica resolves rounds.
    primary: bool,
    archive: Option<BidArchive>,
    /// Rounds still collecting bids.
    rounds: BTreeMap<Round, BidCache>,
    /// The next round to close.
    next: Round,
    reserve: U256,
    metrics: Arc<AuctioneerMetrics>,
}

impl AuctioneerServer {
    pub async fn new<C, M>(
        cfg: AuctioneerConfig,
        contract: Arc<C>,
        queue: BidQueue,
        store: Arc<ResolutionStore>,
        metrics: &M,
    ) -> Result<Self, AuctioneerError>
    where
        C: AuctionContract,
        M: ::metrics::Metrics,
    {
        let timing = contract.round_timing_info().await?;
        timing.validate_resolution_wait(cfg.resolution_wait)?;

        let metrics = Arc::new(AuctioneerMetrics::new(metrics));
        let settlements = TaskTracker::new();
        let settler = Settler::new(contract.clone(), store.clone(), cfg.backoff);

        let lease = match &cfg.lease_dir {
            Some(dir) => Some(Lease::open(dir, &cfg.instance, cfg.lease_ttl).await?),
            None => None,
        };
        let primary = match &lease {
            Some(l) => l.renew().await?,
            None => true,
        };
        metrics.primary.set(usize::from(primary));
        info!(instance = %cfg.instance, %primary, "auctioneer starting");

        let archive = match &cfg.archive_dir {
            Some(dir) => Some(BidArchive::open(dir).await?),
            None => None,
        };

        if primary {
            resume_settlements(&store, &timing, &settlements, &settler, &metrics);
        }

        let now = Timestamp::now();
        let mut next = timing.auction_round(now);
        // Rounds resolved before a restart are never resolved again.
        if let Some(last) = store.latest() {
            next = max(next, last.round().next())
        }

        let consumer = queue.consumer();
        let reserve = contract.reserve_price().await.unwrap_or_else(|err| {
            warn!(%err, "failed to read reserve price");
            U256::ZERO
        });

        let mut task = Task {
            config: cfg,
            timing,
            contract,
            queue,
            consumer,
            store: store.clone(),
            settler,
            settlements: settlements.clone(),
            lease: lease.clone(),
            primary,
            archive,
            rounds: BTreeMap::new(),
            next,
            reserve,
            metrics,
        };
        task.drop_stale_rounds().await?;

        Ok(Self {
            task: tokio::spawn(task.go()),
            store,
            settlements,
            lease,
        })
    }

    pub fn store(&self) -> &Arc<ResolutionStore> {
        &self.store
    }

    /// The outcome of a round, if it has been resolved.
    pub fn outcome(&self, r: Round) -> Option<RoundOutcome> {
        self.store.get(r).map(|rec| rec.outcome)
    }

    /// Stop collecting, give up the lease and wait for in-flight settlements.
    pub async fn shutdown(self) {
        self.task.abort();
        if let Some(l) = &self.lease {
            if let Err(err) = l.release().await {
                warn!(%err, "failed to release lease");
            }
        }
        self.settlements.close();
        self.settlements.wait().await
    }
}

impl<C: AuctionContract> Task<C> {
    async fn go(mut self) {
        let period = self
            .lease
            .as_ref()
            .map(|l| l.renew_interval())
            .unwrap_or(self.config.lease_ttl);
        let mut renew = interval(max(period, Duration::from_millis(10)));
        renew.set_missed_tick_behavior(MissedTickBehavior::Delay);
        loop {
            let close_at = self.resolve_time(self.next);
            select! {
                _ = sleep_until(close_at) => {
                    self.close_round().await;
                    self.next = self.next.next();
                }
                _ = self.consumer.wait(self.config.poll_interval) => {
                    if let Err(err) = self.collect().await {
                        warn!(%err, "failed to read bid queue")
                    }
                }
                _ = renew.tick(), if self.lease.is_some() => {
                    self.update_lease().await
                }
            }
        }
    }

    /// Renew our lease claim and act on a change of role.
    async fn update_lease(&mut self) {
        let Some(lease) = &self.lease else {
            return;
        };
        let held = match lease.renew().await {
            Ok(held) => held,
            Err(err) => {
                warn!(%err, "failed to renew lease");
                false
            }
        };
        if held == self.primary {
            return;
        }
        self.primary = held;
        self.metrics.primary.set(usize::from(held));
        if !held {
            info!(instance = %self.config.instance, "no longer primary auctioneer");
            return;
        }
        info!(instance = %self.config.instance, "became primary auctioneer");
        // Pick up what the previous primary resolved.
        if let Err(err) = self.store.reload().await {
            warn!(%err, "failed to reload resolution store");
        }
        resume_settlements(
            &self.store,
            &self.timing,
            &self.settlements,
            &self.settler,
            &self.metrics,
        );
    }

    /// The instant at which round `r` is resolved.
    fn resolve_time(&self, r: Round) -> Instant {
        let t = self.timing.auction_closing_time(r) + self.config.resolution_wait;
        Instant::now() + t.saturating_duration_since(Timestamp::now())
    }

    /// Remove queued bids of rounds that can no longer be auctioned.
    async fn drop_stale_rounds(&mut self) -> Result<(), QueueError> {
        for r in self.queue.rounds().await? {
            if r >= self.next {
                continue;
            }
            if !self.store.contains(r) {
                warn!(round = %r, "dropping bids of a round that was never resolved");
            }
            self.queue.ack(r).await?
        }
        Ok(())
    }

    async fn collect(&mut self) -> Result<(), QueueError> {
        let bids = self.consumer.poll().await?;
        self.add_bids(bids).await;
        Ok(())
    }

    async fn add_bids(&mut self, bids: Vec<QueuedBid>) {
        if bids.is_empty() {
            return;
        }
        if let Some(a) = &self.archive {
            if let Err(err) = a.append(&bids).await {
                warn!(%err, "failed to archive bids")
            }
        }
        for b in bids {
            let round = b.bid.round();
            if round < self.next {
                warn!(%round, bidder = %b.bid.bidder(), "bid for a closed round");
                continue;
            }
            let added = self.rounds.entry(round).or_default().add(b.bid);
            debug!(%round, ?added, "bid collected");
            self.metrics.bids.add(1);
        }
        self.metrics.open_rounds.set(self.rounds.len());
    }

    async fn close_round(&mut self) {
        let round = self.next;

        // Pick up bids accepted right before the boundary.
        let mut last = Vec::new();
        if let Err(err) = self.consumer.poll_round(round, &mut last).await {
            warn!(%round, %err, "failed to read last bids of round");
        }
        self.add_bids(last).await;

        self.update_lease().await;
        if !self.primary {
            debug!(%round, "not primary, leaving round to the lease holder");
            self.rounds.remove(&round);
            self.consumer.forget(round);
            self.metrics.open_rounds.set(self.rounds.len());
            if let Err(err) = self.store.reload().await {
                warn!(%err, "failed to reload resolution store");
            }
            return;
        }

        match self.contract.reserve_price().await {
            Ok(p) => self.reserve = p,
            Err(err) => warn!(%round, %err, "using last known reserve price"),
        }

        let cache = self.rounds.get(&round);
        let bids = cache.map_or(0, BidCache::len);
        let rec = RoundRecord::new(match cache {
            Some(c) => c.resolve(round, self.reserve),
            None => Resolution::Unresolved(round),
        });

        // The bids stay cached until the outcome is durable.
        let persisted = self.persist(&rec).await;
        self.rounds.remove(&round);
        self.metrics.open_rounds.set(self.rounds.len());
        if !persisted {
            return;
        }

        if let Err(err) = self.queue.ack(round).await {
            warn!(%round, %err, "failed to acknowledge bids");
        }
        self.consumer.forget(round);

        match &rec.outcome {
            RoundOutcome::Resolved(r) => {
                info!(
                    %round,
                    %bids,
                    winner     = %r.winner,
                    controller = %r.controller,
                    price      = %r.second_price,
                    "round resolved"
                );
                self.metrics.resolved.add(1);
                let deadline = self.timing.round_start(round.next());
                spawn_settlement(
                    &self.settlements,
                    &self.settler,
                    &self.metrics,
                    rec,
                    deadline,
                    false,
                );
            }
            RoundOutcome::Unresolved { .. } => {
                info!(%round, "no bids, round has no controller");
                self.metrics.unresolved.add(1);
            }
        }
    }

    /// Write the record of a round, retrying until the next round closes.
    async fn persist(&self, rec: &RoundRecord) -> bool {
        let round = rec.round();
        let deadline = self.timing.auction_closing_time(round.next());
        let mut delays = self.config.backoff.delay_iter();
        loop {
            let err = match self.store.insert(rec).await {
                Ok(()) => return true,
                Err(StoreError::Exists(_)) => {
                    warn!(%round, "round already has a record");
                    return false;
                }
                Err(err) => err,
            };
            let now = Timestamp::now();
            if now >= deadline {
                error!(%round, %err, "giving up on round, resolution could not be stored");
                return false;
            }
            let d = delays.next().unwrap_or(self.config.backoff.unit);
            warn!(%round, %err, "failed to store resolution, retrying");
            sleep(min(d, deadline.saturating_duration_since(now))).await
        }
    }
}

/// Resume settlements the store still has as pending.
fn resume_settlements<C: AuctionContract>(
    store: &ResolutionStore,
    timing: &RoundTimingInfo,
    tracker: &TaskTracker,
    settler: &Settler<C>,
    metrics: &Arc<AuctioneerMetrics>,
) {
    for rec in store.pending() {
        let deadline = timing.round_start(rec.round().next());
        info!(round = %rec.round(), "resuming settlement");
        spawn_settlement(tracker, settler, metrics, rec, deadline, true);
    }
}

fn spawn_settlement<C: AuctionContract>(
    tracker: &TaskTracker,
    settler: &Settler<C>,
    metrics: &Arc<AuctioneerMetrics>,
    rec: RoundRecord,
    deadline: Timestamp,
    recovering: bool,
) {
    let settler = settler.clone();
    let metrics = metrics.clone();
    metrics.settling.update(1);
    tracker.spawn(async move {
        let rec = settler.settle(rec, deadline, recovering).await;
        match rec.status {
            Status::Committed => metrics.committed.add(1),
            Status::Reconciled { .. } => metrics.reconciled.add(1),
            Status::Abandoned { .. } => metrics.abandoned.add(1),
            Status::Pending | Status::NoController => {}
        }
        metrics.settling.update(-1);
    });
}
