mod buffer;
mod config;
mod gate;
mod metrics;

use std::sync::Arc;

use timeboost_contract::{AuctionContract, ContractError};
use timeboost_types::{ChainId, RoundTimingInfo, Timestamp};
use tokio::select;
use tokio::sync::mpsc::{self, Receiver, Sender};
use tokio::task::{JoinHandle, spawn};
use tokio::time::{MissedTickBehavior, interval, sleep};
use tracing::{debug, error, info, warn};

pub use buffer::ReorderBuffer;
pub use config::{GateConfig, GateConfigBuilder};
pub use gate::{ControllerState, ExpressLaneGate, GateError, Output, Ticket};
pub use metrics::GateMetrics;

type Result<T> = std::result::Result<T, SequencerError>;

const OUTPUT_CAPACITY: usize = 1024;

/// The express lane part of a sequencer.
///
/// Runs the gate's round transitions, follows auction resolutions on chain
/// and emits released transactions in order.
pub struct Sequencer {
    gate: ExpressLaneGate,
    task: JoinHandle<Result<()>>,
    output: Receiver<Output>,
}

impl Drop for Sequencer {
    fn drop(&mut self) {
        self.task.abort()
    }
}

struct Task<C> {
    config: GateConfig,
    timing: RoundTimingInfo,
    gate: ExpressLaneGate,
    contract: Arc<C>,
    output: Sender<Output>,
}

impl Sequencer {
    pub async fn new<C, M>(cfg: GateConfig, contract: Arc<C>, metrics: &M) -> Result<Self>
    where
        C: AuctionContract,
        M: ::metrics::Metrics,
    {
        let chain = contract.chain_id().await?;
        if chain != cfg.chain {
            return Err(SequencerError::ChainMismatch {
                expected: cfg.chain,
                actual: chain,
            });
        }
        let timing = contract.round_timing_info().await?;
        let round = timing.round_of(Timestamp::now());
        let gate = ExpressLaneGate::new(cfg.clone(), timing, round, metrics);

        let (tx, rx) = mpsc::channel(OUTPUT_CAPACITY);

        let task = Task {
            config: cfg,
            timing,
            gate: gate.clone(),
            contract,
            output: tx,
        };

        info!(%round, auction = %task.config.auction, "express lane started");

        Ok(Self {
            gate,
            task: spawn(task.go()),
            output: rx,
        })
    }

    /// A handle to submit transactions through.
    pub fn gate(&self) -> &ExpressLaneGate {
        &self.gate
    }

    pub async fn next_output(&mut self) -> Result<Output> {
        select! {
            out = self.output.recv() => out.ok_or(SequencerError::ChannelClosed),
            res = &mut self.task => match res {
                Ok(Ok(())) => {
                    error!("unexpected task termination");
                    Err(SequencerError::TaskTerminated)
                }
                Ok(Err(err)) => {
                    error!(%err, "task error");
                    Err(err)
                }
                Err(err) => {
                    error!(%err, "task panic");
                    Err(SequencerError::TaskTerminated)
                }
            }
        }
    }
}

impl<C: AuctionContract> Task<C> {
    async fn go(self) -> Result<()> {
        let mut tick = interval(self.config.tick);
        tick.set_missed_tick_behavior(MissedTickBehavior::Skip);
        let mut poll = interval(self.config.poll_interval);
        poll.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            let active = self.gate.status().round;
            let boundary = self.timing.round_start(active.next());
            let until = boundary.saturating_duration_since(Timestamp::now());
            let wake = self
                .gate
                .next_deadline()
                .map(|d| d.saturating_duration_since(Timestamp::now()))
                .unwrap_or(self.config.poll_interval);

            select! {
                _ = sleep(until) => {
                    let now = Timestamp::now();
                    // Pick up a resolution of the new round before switching.
                    self.poll_resolutions().await;
                    self.gate.next_round(self.timing.round_of(now), now);
                }
                _ = poll.tick() => self.poll_resolutions().await,
                _ = tick.tick() => {}
                _ = sleep(wake) => {}
                _ = self.gate.notified() => {}
            }

            let now = Timestamp::now();
            self.gate.expire(now);
            for o in self.gate.drain(now) {
                debug!(round = %o.round, position = %o.position, boosted = %o.boosted, "release");
                self.output
                    .send(o)
                    .await
                    .map_err(|_| SequencerError::ChannelClosed)?
            }
        }
    }

    async fn poll_resolutions(&self) {
        let from = self.gate.status().round;
        match self.contract.resolutions_since(from).await {
            Ok(rs) => {
                let now = Timestamp::now();
                for r in rs {
                    self.gate.set_resolution(r, now);
                }
            }
            Err(err) => warn!(%err, "failed to fetch auction resolutions"),
        }
    }
}

#[derive(Debug, thiserror::Error)]
#[non_exhaustive]
pub enum SequencerError {
    #[error("contract error: {0}")]
    Contract(#[from] ContractError),

    #[error("auction contract is on chain {actual}, expected {expected}")]
    ChainMismatch { expected: ChainId, actual: ChainId },

    #[error("channel closed")]
    ChannelClosed,

    #[error("task terminated")]
    TaskTerminated,
}
