use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use bon::Builder;
use timeboost_sequencer::ExpressLaneGate;
use timeboost_types::rpc::{Ack, Inclusion, LaneStatus, SyncSubmission};
use timeboost_types::{
    Address, Bytes, ChainId, ExpressLaneSubmission, Round, RoundTimingInfo, SeqNo,
    SignedSubmission, Signer, Timestamp,
};
use tokio::sync::Mutex;
use tracing::{debug, warn};

use crate::{ClientError, HttpClient};

/// Where express lane envelopes are sent to.
#[async_trait]
pub trait ExpressLaneTransport: Send + Sync {
    async fn submit(&self, env: SignedSubmission) -> Result<Ack, ClientError>;

    async fn submit_sync(
        &self,
        env: SignedSubmission,
        timeout: Duration,
    ) -> Result<Inclusion, ClientError>;
}

#[async_trait]
impl ExpressLaneTransport for HttpClient {
    async fn submit(&self, env: SignedSubmission) -> Result<Ack, ClientError> {
        self.post("v1/express-lane/submit", &env).await
    }

    async fn submit_sync(
        &self,
        env: SignedSubmission,
        timeout: Duration,
    ) -> Result<Inclusion, ClientError> {
        let body = SyncSubmission {
            envelope: env,
            timeout_ms: timeout.as_millis() as u64,
        };
        self.post_waiting("v1/express-lane/submit-sync", &body, timeout)
            .await
    }
}

impl HttpClient {
    pub async fn lane_status(&self) -> Result<LaneStatus, ClientError> {
        self.get("v1/round").await
    }
}

#[async_trait]
impl ExpressLaneTransport for ExpressLaneGate {
    async fn submit(&self, env: SignedSubmission) -> Result<Ack, ClientError> {
        let (ack, _) = self.admit(env)?;
        Ok(ack)
    }

    async fn submit_sync(
        &self,
        env: SignedSubmission,
        timeout: Duration,
    ) -> Result<Inclusion, ClientError> {
        Ok(self.admit_sync(env, timeout).await?)
    }
}

#[async_trait]
impl<T: ExpressLaneTransport + ?Sized> ExpressLaneTransport for Arc<T> {
    async fn submit(&self, env: SignedSubmission) -> Result<Ack, ClientError> {
        (**self).submit(env).await
    }

    async fn submit_sync(
        &self,
        env: SignedSubmission,
        timeout: Duration,
    ) -> Result<Inclusion, ClientError> {
        (**self).submit_sync(env, timeout).await
    }
}

#[derive(Debug, Clone, Builder)]
pub struct ExpressLaneClientConfig {
    pub(crate) chain: ChainId,
    pub(crate) auction: Address,
    pub(crate) timing: RoundTimingInfo,

    /// Default wait of synchronous submissions.
    #[builder(default = Duration::from_secs(5))]
    pub(crate) sync_timeout: Duration,
}

/// Sends transactions through the express lane of a round we control.
///
/// Sends are serialised. The sequence number advances once the sequencer
/// has taken an envelope. An envelope whose fate is unknown (timeout, lost
/// response) is kept and resent unchanged before the next transaction, so a
/// round never stalls on a sequence number the sequencer already consumed.
pub struct ExpressLaneClient<T> {
    config: ExpressLaneClientConfig,
    signer: Signer,
    transport: T,
    state: Mutex<LaneState>,
}

#[derive(Debug, Default)]
struct LaneState {
    round: Round,
    next: SeqNo,
    /// Sent with sequence number `next` but not known to be taken.
    pending: Option<SignedSubmission>,
}

impl LaneState {
    fn enter(&mut self, r: Round) {
        if self.round != r {
            debug!(round = %r, "new express lane round");
            self.round = r;
            self.next = SeqNo::zero();
            self.pending = None;
        }
    }
}

/// What a submission result says about the envelope's sequence number.
enum Outcome {
    /// The sequencer holds an envelope with this sequence number.
    Taken,
    /// The envelope may or may not have reached the sequencer.
    Unknown,
    /// The envelope was refused and its sequence number is still free.
    Refused,
}

fn outcome<A>(r: &Result<A, ClientError>) -> Outcome {
    match r {
        Ok(_) => Outcome::Taken,
        Err(ClientError::Timeout | ClientError::Http(_) | ClientError::Status(_)) => {
            Outcome::Unknown
        }
        Err(e) => match e.code() {
            Some("duplicate-sequence-number" | "sequence-too-low") => Outcome::Taken,
            Some("shutdown") => Outcome::Unknown,
            _ => Outcome::Refused,
        },
    }
}

impl<T: ExpressLaneTransport> ExpressLaneClient<T> {
    pub fn new(cfg: ExpressLaneClientConfig, signer: Signer, transport: T) -> Self {
        Self {
            config: cfg,
            signer,
            transport,
            state: Mutex::new(LaneState::default()),
        }
    }

    pub fn address(&self) -> Address {
        self.signer.address()
    }

    /// The round and sequence number the next envelope would carry.
    pub async fn position(&self) -> (Round, SeqNo) {
        let mut state = self.state.lock().await;
        state.enter(self.config.timing.round_of(Timestamp::now()));
        (state.round, state.next)
    }

    /// Resend an envelope whose submission ended without an answer.
    pub async fn flush(&self) -> Result<(), ClientError> {
        let mut state = self.state.lock().await;
        state.enter(self.config.timing.round_of(Timestamp::now()));
        self.resend_pending(&mut state).await
    }

    pub async fn send_transaction(&self, tx: Bytes) -> Result<Ack, ClientError> {
        let mut state = self.state.lock().await;
        state.enter(self.config.timing.round_of(Timestamp::now()));
        self.resend_pending(&mut state).await?;
        let env = self.envelope(&state, tx)?;
        let res = self.transport.submit(env.clone()).await;
        Self::record(&mut state, env, &res);
        res
    }

    /// Send and wait up to `timeout` (or the configured default) for inclusion.
    pub async fn send_transaction_sync(
        &self,
        tx: Bytes,
        timeout: Option<Duration>,
    ) -> Result<Inclusion, ClientError> {
        let timeout = timeout.unwrap_or(self.config.sync_timeout);
        let mut state = self.state.lock().await;
        state.enter(self.config.timing.round_of(Timestamp::now()));
        self.resend_pending(&mut state).await?;
        let env = self.envelope(&state, tx)?;
        let res = self.transport.submit_sync(env.clone(), timeout).await;
        Self::record(&mut state, env, &res);
        res
    }

    async fn resend_pending(&self, state: &mut LaneState) -> Result<(), ClientError> {
        let Some(env) = state.pending.take() else {
            return Ok(());
        };
        let res = self.transport.submit(env.clone()).await;
        Self::record(state, env, &res);
        match res {
            Err(err) if state.pending.is_some() => Err(err),
            _ => Ok(()),
        }
    }

    fn record<A>(state: &mut LaneState, env: SignedSubmission, res: &Result<A, ClientError>) {
        let seqno = env.seqno();
        match outcome(res) {
            Outcome::Taken => {
                state.next = seqno.next();
            }
            Outcome::Unknown => {
                warn!(round = %state.round, %seqno, "express lane submission outcome unknown");
                state.pending = Some(env)
            }
            Outcome::Refused => {
                if let Err(err) = res {
                    warn!(round = %state.round, %seqno, %err, "express lane submission refused");
                }
            }
        }
    }

    fn envelope(&self, state: &LaneState, tx: Bytes) -> Result<SignedSubmission, ClientError> {
        let env = ExpressLaneSubmission::new(
            self.config.chain,
            self.config.auction,
            state.round,
            state.next,
            tx,
        )
        .sign(&self.signer)?;
        Ok(env)
    }
}
