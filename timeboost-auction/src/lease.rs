//! Leader lease shared by auctioneer replicas.
//!
//! The lease is a small JSON document naming the holder and the time its
//! claim expires. The holder renews the claim well before expiry; any other
//! replica may take the lease over once it has expired.

use std::io;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use timeboost_types::Timestamp;
use tokio::fs;
use tracing::{trace, warn};

const FILE: &str = "leader.json";

#[derive(Debug, thiserror::Error)]
#[non_exhaustive]
pub enum LeaseError {
    #[error("lease i/o error on {0}: {1}")]
    Io(PathBuf, #[source] io::Error),

    #[error("failed to encode lease: {0}")]
    Encode(#[from] serde_json::Error),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Holder {
    pub id: String,
    pub expires: Timestamp,
}

#[derive(Debug, Clone)]
pub struct Lease {
    dir: PathBuf,
    id: String,
    ttl: Duration,
}

impl Lease {
    pub async fn open<P: AsRef<Path>>(dir: P, id: &str, ttl: Duration) -> Result<Self, LeaseError> {
        let dir = dir.as_ref().to_path_buf();
        fs::create_dir_all(&dir)
            .await
            .map_err(|e| LeaseError::Io(dir.clone(), e))?;
        Ok(Self {
            dir,
            id: id.to_string(),
            ttl,
        })
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    /// Interval at which the holder renews its claim.
    pub fn renew_interval(&self) -> Duration {
        self.ttl / 6
    }

    fn path(&self) -> PathBuf {
        self.dir.join(FILE)
    }

    /// The current holder, if any.
    pub async fn holder(&self) -> Result<Option<Holder>, LeaseError> {
        let path = self.path();
        let data = match fs::read(&path).await {
            Ok(d) => d,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(LeaseError::Io(path, e)),
        };
        match serde_json::from_slice(&data) {
            Ok(h) => Ok(Some(h)),
            Err(err) => {
                warn!(%err, "ignoring malformed lease");
                Ok(None)
            }
        }
    }

    /// Acquire the lease or renew our claim.
    ///
    /// Returns `true` if this replica holds the lease afterwards.
    pub async fn renew(&self) -> Result<bool, LeaseError> {
        let now = Timestamp::now();
        if let Some(h) = self.holder().await? {
            if h.id != self.id && h.expires > now {
                trace!(id = %self.id, holder = %h.id, "lease held by another replica");
                return Ok(false);
            }
        }
        let claim = Holder {
            id: self.id.clone(),
            expires: now + self.ttl,
        };
        let path = self.path();
        let tmp = self.dir.join(format!("{FILE}.{}.tmp", self.id));
        fs::write(&tmp, serde_json::to_vec(&claim)?)
            .await
            .map_err(|e| LeaseError::Io(tmp.clone(), e))?;
        fs::rename(&tmp, &path)
            .await
            .map_err(|e| LeaseError::Io(path.clone(), e))?;
        // A replica racing for an expired lease may have replaced our claim.
        Ok(self.holder().await?.is_some_and(|h| h.id == self.id))
    }

    /// Give the lease up if we hold it.
    pub async fn release(&self) -> Result<(), LeaseError> {
        if !self.holder().await?.is_some_and(|h| h.id == self.id) {
            return Ok(());
        }
        let path = self.path();
        match fs::remove_file(&path).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(LeaseError::Io(path, e)),
        }
    }
}
