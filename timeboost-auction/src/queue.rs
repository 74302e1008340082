//! A durable, at-least-once bid queue shared by validators and the auctioneer.
//!
//! Bids are appended as JSON lines to one file per round. Consumers keep a
//! byte cursor per round file and only ever see complete lines. A round's
//! file is removed once the round has been resolved, so a restarted
//! consumer replays every bid of a round that has not been resolved yet.

use std::collections::HashMap;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use timeboost_types::{Round, SignedBid, Timestamp};
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tokio::sync::{Mutex, Notify};
use tokio::time::timeout;
use tracing::{debug, warn};

const PREFIX: &str = "round-";
const SUFFIX: &str = ".jsonl";

/// A validated bid as stored in the queue.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueuedBid {
    pub bid: SignedBid,
    pub received: Timestamp,
}

#[derive(Debug, thiserror::Error)]
#[non_exhaustive]
pub enum QueueError {
    #[error("queue i/o error on {0}: {1}")]
    Io(PathBuf, #[source] io::Error),

    #[error("failed to encode bid: {0}")]
    Encode(#[from] serde_json::Error),
}

#[derive(Debug, Clone)]
pub struct BidQueue {
    dir: PathBuf,
    notify: Arc<Notify>,
    append: Arc<Mutex<()>>,
}

impl BidQueue {
    pub async fn open<P: AsRef<Path>>(dir: P) -> Result<Self, QueueError> {
        let dir = dir.as_ref().to_path_buf();
        fs::create_dir_all(&dir)
            .await
            .map_err(|e| QueueError::Io(dir.clone(), e))?;
        Ok(Self {
            dir,
            notify: Arc::new(Notify::new()),
            append: Arc::new(Mutex::new(())),
        })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn path(&self, r: Round) -> PathBuf {
        self.dir.join(format!("{PREFIX}{r}{SUFFIX}"))
    }

    /// Durably append a bid to its round's file.
    pub async fn push(&self, b: &QueuedBid) -> Result<(), QueueError> {
        let mut line = serde_json::to_vec(b)?;
        line.push(b'\n');
        let path = self.path(b.bid.round());
        let _guard = self.append.lock().await;
        let mut f = fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .await
            .map_err(|e| QueueError::Io(path.clone(), e))?;
        f.write_all(&line)
            .await
            .map_err(|e| QueueError::Io(path.clone(), e))?;
        f.sync_data()
            .await
            .map_err(|e| QueueError::Io(path.clone(), e))?;
        self.notify.notify_waiters();
        Ok(())
    }

    /// Drop all bids of a round.
    pub async fn ack(&self, r: Round) -> Result<(), QueueError> {
        let path = self.path(r);
        match fs::remove_file(&path).await {
            Ok(()) => {
                debug!(round = %r, "bids acknowledged");
                Ok(())
            }
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(QueueError::Io(path, e)),
        }
    }

    /// Rounds with unacknowledged bids.
    pub async fn rounds(&self) -> Result<Vec<Round>, QueueError> {
        let mut entries = fs::read_dir(&self.dir)
            .await
            .map_err(|e| QueueError::Io(self.dir.clone(), e))?;
        let mut rounds = Vec::new();
        while let Some(e) = entries
            .next_entry()
            .await
            .map_err(|e| QueueError::Io(self.dir.clone(), e))?
        {
            let name = e.file_name();
            let Some(r) = name
                .to_str()
                .and_then(|n| n.strip_prefix(PREFIX))
                .and_then(|n| n.strip_suffix(SUFFIX))
                .and_then(|n| n.parse::<Round>().ok())
            else {
                continue;
            };
            rounds.push(r)
        }
        rounds.sort();
        Ok(rounds)
    }

    pub fn consumer(&self) -> BidConsumer {
        BidConsumer {
            queue: self.clone(),
            cursors: HashMap::new(),
        }
    }
}

/// Reads bids appended to a [`BidQueue`].
#[derive(Debug)]
pub struct BidConsumer {
    queue: BidQueue,
    cursors: HashMap<Round, usize>,
}

impl BidConsumer {
    /// Wait until a bid is pushed in this process or `max` has elapsed.
    ///
    /// Bids pushed by other processes are picked up when `max` elapses.
    pub async fn wait(&self, max: Duration) {
        let _ = timeout(max, self.queue.notify.notified()).await;
    }

    /// Read every complete bid appended since the last call.
    pub async fn poll(&mut self) -> Result<Vec<QueuedBid>, QueueError> {
        let mut bids = Vec::new();
        for r in self.queue.rounds().await? {
            self.poll_round(r, &mut bids).await?
        }
        Ok(bids)
    }

    /// Read the remaining bids of a single round.
    pub async fn poll_round(&mut self, r: Round, out: &mut Vec<QueuedBid>) -> Result<(), QueueError> {
        let path = self.queue.path(r);
        let data = match fs::read(&path).await {
            Ok(d) => d,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(()),
            Err(e) => return Err(QueueError::Io(path, e)),
        };
        let cursor = self.cursors.entry(r).or_default();
        let Some(pending) = data.get(*cursor..) else {
            return Ok(());
        };
        let Some(end) = pending.iter().rposition(|b| *b == b'\n') else {
            return Ok(());
        };
        for line in pending[..end].split(|b| *b == b'\n') {
            if line.is_empty() {
                continue;
            }
            match serde_json::from_slice::<QueuedBid>(line) {
                Ok(b) => out.push(b),
                Err(err) => warn!(round = %r, %err, "skipping malformed queue entry"),
            }
        }
        *cursor += end + 1;
        Ok(())
    }

    /// Forget the cursor of an acknowledged round.
    pub fn forget(&mut self, r: Round) {
        self.cursors.remove(&r);
    }
}
