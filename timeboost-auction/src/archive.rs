//! Append-only archive of consumed bids.
//!
//! Unlike the bid queue, archived rounds are never removed. Every replica
//! appends the bids it consumes, so the same bid may be written more than
//! once; reading a round yields each bid once.

use std::collections::{BTreeMap, HashSet};
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use timeboost_types::Round;
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;
use tracing::{trace, warn};

use crate::queue::QueuedBid;

const PREFIX: &str = "bids-";
const SUFFIX: &str = ".jsonl";

#[derive(Debug, thiserror::Error)]
#[non_exhaustive]
pub enum ArchiveError {
    #[error("archive i/o error on {0}: {1}")]
    Io(PathBuf, #[source] io::Error),

    #[error("failed to encode bid: {0}")]
    Encode(#[from] serde_json::Error),
}

#[derive(Debug, Clone)]
pub struct BidArchive {
    dir: PathBuf,
    append: Arc<Mutex<()>>,
}

impl BidArchive {
    pub async fn open<P: AsRef<Path>>(dir: P) -> Result<Self, ArchiveError> {
        let dir = dir.as_ref().to_path_buf();
        fs::create_dir_all(&dir)
            .await
            .map_err(|e| ArchiveError::Io(dir.clone(), e))?;
        Ok(Self {
            dir,
            append: Arc::new(Mutex::new(())),
        })
    }

    fn path(&self, r: Round) -> PathBuf {
        self.dir.join(format!("{PREFIX}{r}{SUFFIX}"))
    }

    pub async fn append(&self, bids: &[QueuedBid]) -> Result<(), ArchiveError> {
        let mut rounds: BTreeMap<Round, Vec<u8>> = BTreeMap::new();
        for b in bids {
            let lines = rounds.entry(b.bid.round()).or_default();
            serde_json::to_writer(&mut *lines, b)?;
            lines.push(b'\n');
        }
        let _guard = self.append.lock().await;
        for (r, lines) in rounds {
            let path = self.path(r);
            let mut f = fs::OpenOptions::new()
                .create(true)
                .append(true)
                .open(&path)
                .await
                .map_err(|e| ArchiveError::Io(path.clone(), e))?;
            f.write_all(&lines)
                .await
                .map_err(|e| ArchiveError::Io(path.clone(), e))?;
            trace!(round = %r, "bids archived");
        }
        Ok(())
    }

    /// All archived bids of a round in the order they were first archived.
    pub async fn bids(&self, r: Round) -> Result<Vec<QueuedBid>, ArchiveError> {
        let path = self.path(r);
        let data = match fs::read(&path).await {
            Ok(d) => d,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(ArchiveError::Io(path, e)),
        };
        let mut seen = HashSet::new();
        let mut bids = Vec::new();
        for line in data.split(|b| *b == b'\n') {
            if line.is_empty() || !seen.insert(line) {
                continue;
            }
            match serde_json::from_slice::<QueuedBid>(line) {
                Ok(b) => bids.push(b),
                Err(err) => warn!(round = %r, %err, "skipping malformed archive entry"),
            }
        }
        Ok(bids)
    }
}
