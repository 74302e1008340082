use std::collections::{BTreeMap, HashMap, VecDeque};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use timeboost_types::rpc::{Ack, AckStatus, Inclusion, LaneStatus};
use timeboost_types::{
    Address, AuctionResolution, Bytes, ChainId, Round, RoundTimingInfo, SeqNo, SignedSubmission,
    Timestamp,
};
use tokio::sync::{Notify, oneshot, watch};
use tracing::{debug, info, trace, warn};

use crate::buffer::ReorderBuffer;
use crate::config::GateConfig;
use crate::metrics::GateMetrics;

type Reply = oneshot::Sender<Result<Inclusion, GateError>>;

/// The express lane controller of the active round.
///
/// Every change increments the version.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ControllerState {
    pub version: u64,
    pub round: Round,
    pub controller: Option<Address>,
}

impl From<ControllerState> for LaneStatus {
    fn from(s: ControllerState) -> Self {
        Self {
            version: s.version,
            round: s.round,
            controller: s.controller,
        }
    }
}

/// A transaction released by the gate, in output order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Output {
    pub round: Round,
    pub position: u64,
    pub time: Timestamp,
    /// Ordered through the express lane?
    pub boosted: bool,
    /// Express lane sender and sequence number.
    pub origin: Option<(Address, SeqNo)>,
    pub transaction: Bytes,
}

/// Resolves once the submitted transaction has been released.
#[derive(Debug)]
pub struct Ticket(oneshot::Receiver<Result<Inclusion, GateError>>);

impl Ticket {
    pub async fn wait(self) -> Result<Inclusion, GateError> {
        self.0.await.unwrap_or(Err(GateError::Shutdown))
    }

    pub async fn wait_timeout(self, d: Duration) -> Result<Inclusion, GateError> {
        tokio::time::timeout(d, self.wait())
            .await
            .unwrap_or(Err(GateError::Timeout))
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[non_exhaustive]
pub enum GateError {
    #[error("inner transaction of {0} bytes exceeds the size limit")]
    OversizedData(usize),

    #[error("envelope for chain {0} does not match")]
    WrongChainId(ChainId),

    #[error("envelope for auction contract {0} does not match")]
    WrongAuctionContract(Address),

    #[error("invalid envelope signature")]
    InvalidSignature,

    #[error("round {got} is before the active round {active}")]
    StaleRound { got: Round, active: Round },

    #[error("round {got} is not accepted during active round {active}")]
    FutureRound { got: Round, active: Round },

    #[error("round {0} has no express lane controller")]
    NoController(Round),

    #[error("{0} is not the express lane controller")]
    NotController(Address),

    #[error("sequence number {got} is below the next expected {next}")]
    SequenceTooLow { got: SeqNo, next: SeqNo },

    #[error("sequence number {got} is too far ahead of {next}")]
    SequenceTooFar { got: SeqNo, next: SeqNo },

    #[error("sequence number {0} has already been submitted")]
    DuplicateSequence(SeqNo),

    #[error("express lane buffer is full")]
    BufferFull,

    #[error("sequence number {0} timed out waiting for its predecessors")]
    GapTimeout(SeqNo),

    #[error("round {0} ended before the envelope could be admitted")]
    RoundEnded(Round),

    #[error("timeout waiting for inclusion")]
    Timeout,

    #[error("sequencer shut down")]
    Shutdown,
}

impl GateError {
    pub fn code(&self) -> &'static str {
        match self {
            Self::OversizedData(_) => "oversized-data",
            Self::WrongChainId(_) => "wrong-chain-id",
            Self::WrongAuctionContract(_) => "wrong-auction-contract",
            Self::InvalidSignature => "invalid-signature",
            Self::StaleRound { .. } => "stale-round",
            Self::FutureRound { .. } => "future-round",
            Self::NoController(_) => "no-controller",
            Self::NotController(_) => "not-controller",
            Self::SequenceTooLow { .. } => "sequence-too-low",
            Self::SequenceTooFar { .. } => "sequence-too-far",
            Self::DuplicateSequence(_) => "duplicate-sequence-number",
            Self::BufferFull => "buffer-full",
            Self::GapTimeout(_) => "gap-timeout",
            Self::RoundEnded(_) => "round-ended",
            Self::Timeout => "timeout",
            Self::Shutdown => "shutdown",
        }
    }
}

/// Admission control of the express lane.
///
/// All state changes happen under a single lock. The controller state is
/// additionally published through a watch channel so that status reads
/// never contend with admission.
#[derive(Debug, Clone)]
pub struct ExpressLaneGate {
    inner: Arc<Mutex<Inner>>,
    state: watch::Receiver<ControllerState>,
    notify: Arc<Notify>,
}

#[derive(Debug)]
struct Inner {
    config: GateConfig,
    timing: RoundTimingInfo,
    state: ControllerState,
    publish: watch::Sender<ControllerState>,
    /// Next expected sequence number of the active round.
    next: SeqNo,
    /// Digests of the envelopes admitted in the active round.
    admitted: HashMap<SeqNo, [u8; 32]>,
    /// Envelopes of the active round ahead of `next`.
    buffer: ReorderBuffer<Pending>,
    /// Envelopes of rounds whose controller is not known yet.
    early: BTreeMap<Round, ReorderBuffer<Pending>>,
    resolutions: BTreeMap<Round, AuctionResolution>,
    priority: VecDeque<Released>,
    regular: VecDeque<Regular>,
    /// Has an ordinary transaction been released in the active round?
    regular_released: bool,
    position: u64,
    metrics: GateMetrics,
}

#[derive(Debug)]
struct Pending {
    envelope: SignedSubmission,
    sender: Address,
    digest: [u8; 32],
    replies: Vec<Reply>,
}

#[derive(Debug)]
struct Released {
    round: Round,
    seqno: SeqNo,
    sender: Address,
    transaction: Bytes,
    replies: Vec<Reply>,
}

#[derive(Debug)]
struct Regular {
    arrival: Timestamp,
    transaction: Bytes,
    reply: Reply,
}

impl ExpressLaneGate {
    /// Create a gate with `round` active and no controller.
    pub fn new<M>(cfg: GateConfig, timing: RoundTimingInfo, round: Round, metrics: &M) -> Self
    where
        M: ::metrics::Metrics,
    {
        let state = ControllerState {
            version: 0,
            round,
            controller: None,
        };
        let (tx, rx) = watch::channel(state);
        let metrics = GateMetrics::new(metrics);
        metrics.round.set(u64::from(round) as usize);
        let inner = Inner {
            buffer: ReorderBuffer::new(cfg.max_buffered),
            config: cfg,
            timing,
            state,
            publish: tx,
            next: SeqNo::zero(),
            admitted: HashMap::new(),
            early: BTreeMap::new(),
            resolutions: BTreeMap::new(),
            priority: VecDeque::new(),
            regular: VecDeque::new(),
            regular_released: false,
            position: 0,
            metrics,
        };
        Self {
            inner: Arc::new(Mutex::new(inner)),
            state: rx,
            notify: Arc::new(Notify::new()),
        }
    }

    pub fn status(&self) -> ControllerState {
        *self.state.borrow()
    }

    pub fn subscribe(&self) -> watch::Receiver<ControllerState> {
        self.state.clone()
    }

    pub fn timing(&self) -> RoundTimingInfo {
        self.inner.lock().timing
    }

    pub fn config(&self) -> GateConfig {
        self.inner.lock().config.clone()
    }

    /// The controller of round `r`, if its resolution is known.
    pub fn controller(&self, r: Round) -> Option<Address> {
        self.inner.lock().resolutions.get(&r).map(|res| res.controller)
    }

    pub fn admit(&self, env: SignedSubmission) -> Result<(Ack, Ticket), GateError> {
        self.admit_at(env, Timestamp::now())
    }

    /// Admit, buffer or reject an express lane envelope.
    pub fn admit_at(
        &self,
        env: SignedSubmission,
        now: Timestamp,
    ) -> Result<(Ack, Ticket), GateError> {
        let (tx, rx) = oneshot::channel();
        let result = {
            let mut inner = self.inner.lock();
            let result = inner.admit(env, tx, now);
            match &result {
                Ok(_) => inner.update_gauges(),
                Err(_) => inner.metrics.rejected.add(1),
            }
            result
        };
        let ack = result?;
        if ack.status == AckStatus::Admitted {
            self.notify.notify_one()
        }
        Ok((ack, Ticket(rx)))
    }

    /// Admit an envelope and wait up to `timeout` for its inclusion.
    pub async fn admit_sync(
        &self,
        env: SignedSubmission,
        timeout: Duration,
    ) -> Result<Inclusion, GateError> {
        let (_, ticket) = self.admit(env)?;
        ticket.wait_timeout(timeout).await
    }

    pub fn submit_regular(&self, tx: Bytes) -> Result<Ticket, GateError> {
        self.submit_regular_at(tx, Timestamp::now())
    }

    /// Queue an ordinary transaction.
    pub fn submit_regular_at(&self, tx: Bytes, now: Timestamp) -> Result<Ticket, GateError> {
        let (reply, rx) = oneshot::channel();
        {
            let mut inner = self.inner.lock();
            if tx.len() > inner.config.max_tx_size {
                return Err(GateError::OversizedData(tx.len()));
            }
            inner.regular.push_back(Regular {
                arrival: now,
                transaction: tx,
                reply,
            });
            inner.update_gauges();
        }
        self.notify.notify_one();
        Ok(Ticket(rx))
    }

    /// Make `round` the active round.
    pub fn next_round(&self, round: Round, now: Timestamp) {
        let mut inner = self.inner.lock();
        inner.next_round(round, now);
        inner.update_gauges();
        drop(inner);
        self.notify.notify_one()
    }

    /// Record an auction resolution.
    ///
    /// Returns true if the resolution was new.
    pub fn set_resolution(&self, res: AuctionResolution, now: Timestamp) -> bool {
        let mut inner = self.inner.lock();
        let new = inner.set_resolution(res, now);
        inner.update_gauges();
        drop(inner);
        if new {
            self.notify.notify_one()
        }
        new
    }

    /// Release everything ready for output at `now`.
    ///
    /// Express lane transactions come first. Ordinary transactions follow
    /// once they have waited for the advantage, or immediately if the round
    /// has no controller.
    pub fn drain(&self, now: Timestamp) -> Vec<Output> {
        let mut inner = self.inner.lock();
        let out = inner.drain(now);
        inner.update_gauges();
        out
    }

    /// Fail envelopes whose deadline has passed.
    pub fn expire(&self, now: Timestamp) {
        let mut inner = self.inner.lock();
        inner.expire(now);
        inner.update_gauges();
    }

    /// The earliest time at which buffered or queued items need attention.
    pub fn next_deadline(&self) -> Option<Timestamp> {
        self.inner.lock().next_deadline()
    }

    /// Wait until something has been admitted or queued.
    pub async fn notified(&self) {
        self.notify.notified().await
    }
}

impl Inner {
    fn admit(&mut self, env: SignedSubmission, reply: Reply, now: Timestamp) -> Result<Ack, GateError> {
        let size = env.transaction().len();
        if size > self.config.max_tx_size {
            return Err(GateError::OversizedData(size));
        }
        if env.chain_id() != self.config.chain {
            return Err(GateError::WrongChainId(env.chain_id()));
        }
        if env.auction() != self.config.auction {
            return Err(GateError::WrongAuctionContract(env.auction()));
        }
        let sender = env.sender().map_err(|_| GateError::InvalidSignature)?;

        let round = env.round();
        let active = self.state.round;
        if round < active {
            return Err(GateError::StaleRound { got: round, active });
        }

        let p = Pending {
            digest: env.digest(),
            envelope: env,
            sender,
            replies: vec![reply],
        };

        if round > active {
            return self.hold_early(p, now);
        }

        self.enqueue(p, now)
    }

    /// Buffer an envelope of the upcoming round.
    fn hold_early(&mut self, p: Pending, now: Timestamp) -> Result<Ack, GateError> {
        let round = p.envelope.round();
        let active = self.state.round;
        let start = self.timing.round_start(round);
        if round != active.next() || now + self.config.early_submission_grace < start {
            return Err(reject(p, GateError::FutureRound { got: round, active }));
        }
        if let Some(res) = self.resolutions.get(&round) {
            let sender = p.sender;
            if res.controller != sender {
                return Err(reject(p, GateError::NotController(sender)));
            }
        }
        let seqno = p.envelope.seqno();
        if SeqNo::zero().distance(seqno) > self.config.max_future_distance {
            return Err(reject(
                p,
                GateError::SequenceTooFar {
                    got: seqno,
                    next: SeqNo::zero(),
                },
            ));
        }
        let deadline = start + self.config.buffer_timeout;
        let cap = self.config.max_buffered;
        let buf = self
            .early
            .entry(round)
            .or_insert_with(|| ReorderBuffer::new(cap));
        hold(buf, p, deadline)
    }

    /// Apply the sequence number rules to an envelope of the active round.
    fn enqueue(&mut self, p: Pending, now: Timestamp) -> Result<Ack, GateError> {
        let round = p.envelope.round();
        let seqno = p.envelope.seqno();

        let Some(controller) = self.state.controller else {
            return Err(reject(p, GateError::NoController(round)));
        };
        let sender = p.sender;
        if sender != controller {
            return Err(reject(p, GateError::NotController(sender)));
        }

        if seqno < self.next {
            if self.admitted.get(&seqno) == Some(&p.digest) {
                trace!(%round, %seqno, "duplicate envelope");
                return Err(reject(p, GateError::DuplicateSequence(seqno)));
            }
            let next = self.next;
            return Err(reject(p, GateError::SequenceTooLow { got: seqno, next }));
        }

        if seqno == self.next {
            self.release(p);
            while let Some(p) = self.buffer.take(self.next) {
                self.release(p)
            }
            return Ok(Ack {
                round,
                seqno,
                status: AckStatus::Admitted,
            });
        }

        if self.next.distance(seqno) > self.config.max_future_distance {
            let next = self.next;
            return Err(reject(p, GateError::SequenceTooFar { got: seqno, next }));
        }

        let deadline = now + self.config.buffer_timeout;
        debug!(%round, %seqno, next = %self.next, "buffering envelope");
        hold(&mut self.buffer, p, deadline)
    }

    fn release(&mut self, p: Pending) {
        let seqno = p.envelope.seqno();
        self.admitted.insert(seqno, p.digest);
        self.priority.push_back(Released {
            round: p.envelope.round(),
            seqno,
            sender: p.sender,
            transaction: p.envelope.transaction().clone(),
            replies: p.replies,
        });
        self.next = self.next.next();
        self.metrics.admitted.add(1);
    }

    fn next_round(&mut self, round: Round, now: Timestamp) {
        let previous = self.state.round;
        if round <= previous {
            return;
        }

        for (_, p) in self.buffer.drain() {
            reject(p, GateError::RoundEnded(previous));
        }

        let current = self.early.split_off(&round);
        for (r, mut buf) in std::mem::replace(&mut self.early, current) {
            for (_, p) in buf.drain() {
                reject(p, GateError::RoundEnded(r));
            }
        }

        self.resolutions = self.resolutions.split_off(&round);

        let controller = self.resolutions.get(&round).map(|r| r.controller);
        self.next = SeqNo::zero();
        self.admitted.clear();
        self.regular_released = false;
        self.set_state(round, controller);

        if controller.is_some() {
            self.replay_early(now)
        } else {
            info!(%round, "no express lane controller")
        }
    }

    fn set_resolution(&mut self, res: AuctionResolution, now: Timestamp) -> bool {
        let active = self.state.round;
        if res.round < active {
            return false;
        }
        if let Some(known) = self.resolutions.get(&res.round) {
            if *known != res {
                warn!(round = %res.round, known = %known.controller, other = %res.controller, "conflicting resolution");
            }
            return false;
        }
        self.resolutions.insert(res.round, res);
        info!(
            round = %res.round,
            winner = %res.winner,
            controller = %res.controller,
            price = %res.second_price,
            "auction resolved"
        );

        if res.round != active {
            return true;
        }

        if self.regular_released {
            warn!(round = %active, "late resolution not applied; ordinary transactions released");
            return true;
        }

        self.set_state(active, Some(res.controller));
        self.replay_early(now);
        true
    }

    fn set_state(&mut self, round: Round, controller: Option<Address>) {
        self.state = ControllerState {
            version: self.state.version + 1,
            round,
            controller,
        };
        self.publish.send_replace(self.state);
        self.metrics.round.set(u64::from(round) as usize);
        self.metrics.version.set(self.state.version as usize);
        info!(%round, ?controller, version = %self.state.version, "express lane state");
    }

    /// Run envelopes buffered for the active round through admission.
    fn replay_early(&mut self, now: Timestamp) {
        let Some(mut buf) = self.early.remove(&self.state.round) else {
            return;
        };
        for (_, p) in buf.drain() {
            if let Err(err) = self.enqueue(p, now) {
                debug!(%err, "buffered envelope rejected");
                self.metrics.rejected.add(1)
            }
        }
    }

    fn drain(&mut self, now: Timestamp) -> Vec<Output> {
        let mut out = Vec::new();

        while let Some(r) = self.priority.pop_front() {
            let inclusion = self.inclusion(r.round, now, true);
            for reply in r.replies {
                let _ = reply.send(Ok(inclusion));
            }
            self.metrics.boosted_out.add(1);
            out.push(Output {
                round: inclusion.round,
                position: inclusion.position,
                time: now,
                boosted: true,
                origin: Some((r.sender, r.seqno)),
                transaction: r.transaction,
            })
        }

        let delay = if self.state.controller.is_some() {
            self.config.advantage
        } else {
            Duration::ZERO
        };

        while self
            .regular
            .front()
            .map(|r| r.arrival + delay <= now)
            .unwrap_or(false)
        {
            let Some(r) = self.regular.pop_front() else {
                break;
            };
            let inclusion = self.inclusion(self.state.round, now, false);
            let _ = r.reply.send(Ok(inclusion));
            self.regular_released = true;
            self.metrics.regular_out.add(1);
            out.push(Output {
                round: inclusion.round,
                position: inclusion.position,
                time: now,
                boosted: false,
                origin: None,
                transaction: r.transaction,
            })
        }

        out
    }

    fn inclusion(&mut self, round: Round, time: Timestamp, boosted: bool) -> Inclusion {
        let i = Inclusion {
            round,
            position: self.position,
            time,
            boosted,
        };
        self.position += 1;
        i
    }

    fn expire(&mut self, now: Timestamp) {
        for (s, p) in self.buffer.expire(now) {
            debug!(round = %self.state.round, seqno = %s, "gap timeout");
            self.metrics.gap_timeouts.add(1);
            reject(p, GateError::GapTimeout(s));
        }
        for (r, buf) in &mut self.early {
            for (_, p) in buf.expire(now) {
                reject(p, GateError::NoController(*r));
            }
        }
        self.early.retain(|_, b| !b.is_empty());
    }

    fn next_deadline(&self) -> Option<Timestamp> {
        let delay = if self.state.controller.is_some() {
            self.config.advantage
        } else {
            Duration::ZERO
        };
        self.early
            .values()
            .filter_map(ReorderBuffer::next_deadline)
            .chain(self.buffer.next_deadline())
            .chain(self.regular.front().map(|r| r.arrival + delay))
            .min()
    }

    fn update_gauges(&self) {
        let early: usize = self.early.values().map(ReorderBuffer::len).sum();
        self.metrics.buffered.set(self.buffer.len() + early);
        self.metrics.queued_regular.set(self.regular.len());
    }
}

/// Hold an envelope in `buf` until `deadline`.
fn hold(buf: &mut ReorderBuffer<Pending>, p: Pending, deadline: Timestamp) -> Result<Ack, GateError> {
    let round = p.envelope.round();
    let seqno = p.envelope.seqno();
    let ack = Ack {
        round,
        seqno,
        status: AckStatus::Buffered,
    };
    if buf.contains(seqno) {
        return Err(reject(p, GateError::DuplicateSequence(seqno)));
    }
    match buf.insert(seqno, deadline, p) {
        Ok(()) => Ok(ack),
        Err(p) => Err(reject(p, GateError::BufferFull)),
    }
}

/// Fail all waiters of `p` with `e`.
fn reject(p: Pending, e: GateError) -> GateError {
    for r in p.replies {
        let _ = r.send(Err(e.clone()));
    }
    e
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use timeboost_types::rpc::AckStatus;
    use timeboost_types::{
        Address, AuctionResolution, Bytes, ChainId, ExpressLaneSubmission, Round,
        RoundTimingInfo, SeqNo, SignedSubmission, Signer, Timestamp, U256,
    };

    use super::{ExpressLaneGate, GateError};
    use crate::config::GateConfig;

    const CHAIN: u64 = 42;

    struct Setup {
        gate: ExpressLaneGate,
        timing: RoundTimingInfo,
        auction: Address,
        controller: Signer,
    }

    fn setup() -> Setup {
        let timing = RoundTimingInfo::new(
            Timestamp::from_secs(0),
            Duration::from_secs(60),
            Duration::from_secs(15),
            Duration::from_secs(15),
        )
        .unwrap();
        let auction = Signer::random().address();
        let cfg = GateConfig::builder()
            .chain(ChainId::from(CHAIN))
            .auction(auction)
            .max_buffered(4)
            .max_future_distance(8)
            .build();
        let gate = ExpressLaneGate::new(cfg, timing, Round::from(1), &::metrics::NoMetrics);
        let controller = Signer::random();
        gate.set_resolution(resolution(1, controller.address()), at(61));
        Setup {
            gate,
            timing,
            auction,
            controller,
        }
    }

    fn at(secs: u64) -> Timestamp {
        Timestamp::from_secs(secs)
    }

    fn resolution(round: u64, controller: Address) -> AuctionResolution {
        AuctionResolution {
            round: Round::from(round),
            winner: controller,
            controller,
            first_price: U256::from(2),
            second_price: U256::from(1),
        }
    }

    fn envelope(s: &Setup, signer: &Signer, round: u64, seqno: u64, tx: &'static [u8]) -> SignedSubmission {
        ExpressLaneSubmission::new(
            ChainId::from(CHAIN),
            s.auction,
            Round::from(round),
            SeqNo::from(seqno),
            Bytes::from_static(tx),
        )
        .sign(signer)
        .unwrap()
    }

    #[test]
    fn admits_in_sequence() {
        let s = setup();
        let (ack, _) = s.gate.admit_at(envelope(&s, &s.controller, 1, 0, b"a"), at(61)).unwrap();
        assert_eq!(ack.status, AckStatus::Admitted);
        let (ack, _) = s.gate.admit_at(envelope(&s, &s.controller, 1, 1, b"b"), at(61)).unwrap();
        assert_eq!(ack.status, AckStatus::Admitted);
        let out = s.gate.drain(at(61));
        assert_eq!(out.len(), 2);
        assert!(out.iter().all(|o| o.boosted));
        assert_eq!(out[0].transaction, Bytes::from_static(b"a"));
        assert_eq!(out[1].transaction, Bytes::from_static(b"b"));
    }

    #[test]
    fn buffers_out_of_order() {
        let s = setup();
        let (ack, _) = s.gate.admit_at(envelope(&s, &s.controller, 1, 1, b"b"), at(61)).unwrap();
        assert_eq!(ack.status, AckStatus::Buffered);
        assert!(s.gate.drain(at(61)).is_empty());
        let (ack, _) = s.gate.admit_at(envelope(&s, &s.controller, 1, 0, b"a"), at(61)).unwrap();
        assert_eq!(ack.status, AckStatus::Admitted);
        let out: Vec<_> = s.gate.drain(at(61)).into_iter().map(|o| o.transaction).collect();
        assert_eq!(out, [Bytes::from_static(b"a"), Bytes::from_static(b"b")]);
    }

    #[test]
    fn rejects_low_and_duplicate_sequence_numbers() {
        let s = setup();
        let e0 = envelope(&s, &s.controller, 1, 0, b"a");
        let (ack, _) = s.gate.admit_at(e0.clone(), at(61)).unwrap();
        assert_eq!(ack.status, AckStatus::Admitted);
        assert_eq!(
            s.gate.admit_at(e0, at(61)).unwrap_err(),
            GateError::DuplicateSequence(SeqNo::zero())
        );
        let other = envelope(&s, &s.controller, 1, 0, b"x");
        assert!(matches!(
            s.gate.admit_at(other, at(61)),
            Err(GateError::SequenceTooLow { .. })
        ));

        // Buffered sequence numbers cannot be submitted twice either.
        let e5 = envelope(&s, &s.controller, 1, 5, b"f");
        let (ack, _) = s.gate.admit_at(e5.clone(), at(61)).unwrap();
        assert_eq!(ack.status, AckStatus::Buffered);
        assert_eq!(
            s.gate.admit_at(e5, at(61)).unwrap_err(),
            GateError::DuplicateSequence(SeqNo::from(5))
        );
        assert_eq!(
            s.gate.admit_at(envelope(&s, &s.controller, 1, 5, b"g"), at(61)).unwrap_err(),
            GateError::DuplicateSequence(SeqNo::from(5))
        );

        // No state change: 1 is still the next sequence number.
        let (ack, _) = s.gate.admit_at(envelope(&s, &s.controller, 1, 1, b"b"), at(61)).unwrap();
        assert_eq!(ack.status, AckStatus::Admitted);
        assert_eq!(s.gate.drain(at(61)).len(), 2);
    }

    #[test]
    fn rejects_malformed_envelopes() {
        let s = setup();
        let big = ExpressLaneSubmission::new(
            ChainId::from(CHAIN),
            s.auction,
            Round::from(1),
            SeqNo::zero(),
            Bytes::from(vec![0; s.gate.config().max_tx_size + 1]),
        )
        .sign(&s.controller)
        .unwrap();
        assert!(matches!(
            s.gate.admit_at(big, at(61)),
            Err(GateError::OversizedData(_))
        ));

        let chain = ExpressLaneSubmission::new(
            ChainId::from(CHAIN + 1),
            s.auction,
            Round::from(1),
            SeqNo::zero(),
            Bytes::from_static(b"a"),
        )
        .sign(&s.controller)
        .unwrap();
        assert_eq!(
            s.gate.admit_at(chain, at(61)).unwrap_err(),
            GateError::WrongChainId(ChainId::from(CHAIN + 1))
        );

        let other = Signer::random().address();
        let auction = ExpressLaneSubmission::new(
            ChainId::from(CHAIN),
            other,
            Round::from(1),
            SeqNo::zero(),
            Bytes::from_static(b"a"),
        )
        .sign(&s.controller)
        .unwrap();
        assert_eq!(
            s.gate.admit_at(auction, at(61)).unwrap_err(),
            GateError::WrongAuctionContract(other)
        );

        // Nothing was consumed.
        let (ack, _) = s.gate.admit_at(envelope(&s, &s.controller, 1, 0, b"a"), at(61)).unwrap();
        assert_eq!(ack.status, AckStatus::Admitted);
    }

    #[test]
    fn buffer_is_bounded() {
        let s = setup();
        for n in 1..=4 {
            let (ack, _) = s.gate.admit_at(envelope(&s, &s.controller, 1, n, b"x"), at(61)).unwrap();
            assert_eq!(ack.status, AckStatus::Buffered);
        }
        assert_eq!(
            s.gate.admit_at(envelope(&s, &s.controller, 1, 5, b"x"), at(61)).unwrap_err(),
            GateError::BufferFull
        );
        assert_eq!(s.gate.next_deadline(), Some(at(62)));
        let (ack, _) = s.gate.admit_at(envelope(&s, &s.controller, 1, 0, b"a"), at(61)).unwrap();
        assert_eq!(ack.status, AckStatus::Admitted);
        assert_eq!(s.gate.drain(at(61)).len(), 5);
        assert_eq!(s.gate.next_deadline(), None);
    }

    #[test]
    fn next_round_envelopes_only_within_grace() {
        let s = setup();
        let next = Signer::random();
        // Round 2 starts at 120s and the grace period is two seconds.
        assert_eq!(
            s.gate.admit_at(envelope(&s, &next, 2, 0, b"n"), at(117)).unwrap_err(),
            GateError::FutureRound {
                got: Round::from(2),
                active: Round::from(1)
            }
        );
        let (ack, _) = s.gate.admit_at(envelope(&s, &next, 2, 0, b"n"), at(118)).unwrap();
        assert_eq!(ack.status, AckStatus::Buffered);
    }

    #[test]
    fn rejects_non_controller_and_stale_rounds() {
        let s = setup();
        let intruder = Signer::random();
        assert_eq!(
            s.gate.admit_at(envelope(&s, &intruder, 1, 0, b"a"), at(61)).unwrap_err(),
            GateError::NotController(intruder.address())
        );
        assert!(matches!(
            s.gate.admit_at(envelope(&s, &s.controller, 0, 0, b"a"), at(61)),
            Err(GateError::StaleRound { .. })
        ));
        assert!(matches!(
            s.gate.admit_at(envelope(&s, &s.controller, 5, 0, b"a"), at(61)),
            Err(GateError::FutureRound { .. })
        ));
        assert!(s.gate.drain(at(61)).is_empty());
    }

    #[tokio::test]
    async fn gap_timeout_and_limits() {
        let s = setup();
        assert!(matches!(
            s.gate.admit_at(envelope(&s, &s.controller, 1, 20, b"a"), at(61)),
            Err(GateError::SequenceTooFar { .. })
        ));
        let (_, ticket) = s.gate.admit_at(envelope(&s, &s.controller, 1, 2, b"c"), at(61)).unwrap();
        s.gate.expire(at(62));
        assert_eq!(ticket.wait().await, Err(GateError::GapTimeout(SeqNo::from(2))));
        // The sequence was not advanced by the expired envelope.
        let (ack, _) = s.gate.admit_at(envelope(&s, &s.controller, 1, 0, b"a"), at(62)).unwrap();
        assert_eq!(ack.status, AckStatus::Admitted);
    }

    #[test]
    fn regular_transactions_wait_for_advantage() {
        let s = setup();
        let t = Timestamp::from_millis(61_000);
        s.gate.submit_regular_at(Bytes::from_static(b"r"), t).unwrap();
        s.gate.admit_at(envelope(&s, &s.controller, 1, 0, b"a"), t + Duration::from_millis(10)).unwrap();
        s.gate.admit_at(envelope(&s, &s.controller, 1, 1, b"b"), t + Duration::from_millis(20)).unwrap();
        let out = s.gate.drain(t + Duration::from_millis(30));
        assert_eq!(out.len(), 2);
        let out = s.gate.drain(t + Duration::from_millis(200));
        assert_eq!(out.len(), 1);
        assert!(!out[0].boosted);
        assert_eq!(out[0].position, 2);
    }

    #[tokio::test]
    async fn round_transition_is_atomic() {
        let s = setup();
        s.gate.admit_at(envelope(&s, &s.controller, 1, 3, b"d"), at(100)).unwrap();
        let next = Signer::random();

        // Early envelope for round 2 before its controller is known.
        let (ack, ticket) = s.gate.admit_at(envelope(&s, &next, 2, 0, b"n"), at(119)).unwrap();
        assert_eq!(ack.status, AckStatus::Buffered);

        s.gate.set_resolution(resolution(2, next.address()), at(119));
        let v = s.gate.status().version;
        s.gate.next_round(s.timing.round_of(at(120)), at(120));

        let st = s.gate.status();
        assert_eq!(st.round, Round::from(2));
        assert_eq!(st.controller, Some(next.address()));
        assert_eq!(st.version, v + 1);

        let out = s.gate.drain(at(120));
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].origin, Some((next.address(), SeqNo::zero())));
        assert!(ticket.wait().await.unwrap().boosted);

        // The old controller is locked out.
        assert!(matches!(
            s.gate.admit_at(envelope(&s, &s.controller, 2, 1, b"x"), at(120)),
            Err(GateError::NotController(_))
        ));
    }

    #[test]
    fn late_resolution_only_before_regular_release() {
        let s = setup();
        s.gate.next_round(Round::from(2), at(120));
        assert_eq!(s.gate.status().controller, None);
        let c = Signer::random();
        assert!(s.gate.set_resolution(resolution(2, c.address()), at(121)));
        assert_eq!(s.gate.status().controller, Some(c.address()));

        s.gate.next_round(Round::from(3), at(180));
        s.gate.submit_regular_at(Bytes::from_static(b"r"), at(180)).unwrap();
        assert_eq!(s.gate.drain(at(180)).len(), 1);
        assert!(s.gate.set_resolution(resolution(3, c.address()), at(181)));
        assert_eq!(s.gate.status().controller, None);
        assert_eq!(
            s.gate.admit_at(envelope(&s, &c, 3, 0, b"a"), at(181)).unwrap_err(),
            GateError::NoController(Round::from(3))
        );
    }
}
