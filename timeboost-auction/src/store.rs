//! Durable round → resolution records.

use std::collections::BTreeMap;
use std::io;
use std::path::{Path, PathBuf};

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use timeboost_contract::ResolutionRequest;
use timeboost_types::{Address, AuctionResolution, Round, RoundOutcome};
use tokio::fs;
use tracing::{debug, warn};

use crate::cache::Resolution;

const PREFIX: &str = "resolution-";
const SUFFIX: &str = ".json";

/// Settlement state of a round.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case", tag = "status")]
pub enum Status {
    /// Persisted, settlement not yet confirmed.
    Pending,
    /// Settled as computed locally.
    Committed,
    /// The chain holds a different resolution which has been adopted.
    Reconciled { local: AuctionResolution },
    /// No bids; there is nothing to settle.
    NoController,
    /// Settlement was given up; the chain has no resolution for the round.
    Abandoned { reason: String },
}

impl Status {
    pub fn is_pending(&self) -> bool {
        matches!(self, Self::Pending)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoundRecord {
    pub outcome: RoundOutcome,
    pub request: Option<ResolutionRequest>,
    pub status: Status,
}

impl RoundRecord {
    pub fn new(r: Resolution) -> Self {
        match r {
            Resolution::Resolved {
                resolution,
                request,
            } => Self {
                outcome: RoundOutcome::Resolved(resolution),
                request: Some(request),
                status: Status::Pending,
            },
            Resolution::Unresolved(round) => Self {
                outcome: RoundOutcome::Unresolved { round },
                request: None,
                status: Status::NoController,
            },
        }
    }

    pub fn round(&self) -> Round {
        self.outcome.round()
    }
}

#[derive(Debug, thiserror::Error)]
#[non_exhaustive]
pub enum StoreError {
    #[error("store i/o error on {0}: {1}")]
    Io(PathBuf, #[source] io::Error),

    #[error("invalid record {0}: {1}")]
    Json(PathBuf, #[source] serde_json::Error),

    #[error("round {0} already has a record")]
    Exists(Round),
}

/// File-backed store with one JSON document per round.
#[derive(Debug)]
pub struct ResolutionStore {
    dir: PathBuf,
    records: RwLock<BTreeMap<Round, RoundRecord>>,
}

impl ResolutionStore {
    /// Open the store and load all existing records.
    pub async fn open<P: AsRef<Path>>(dir: P) -> Result<Self, StoreError> {
        let dir = dir.as_ref().to_path_buf();
        fs::create_dir_all(&dir)
            .await
            .map_err(|e| StoreError::Io(dir.clone(), e))?;
        let records = read_records(&dir).await?;
        debug!(dir = %dir.display(), records = %records.len(), "resolution store opened");
        Ok(Self {
            dir,
            records: RwLock::new(records),
        })
    }

    /// Re-read all records, including those written by other processes.
    pub async fn reload(&self) -> Result<(), StoreError> {
        let records = read_records(&self.dir).await?;
        debug!(records = %records.len(), "resolution store reloaded");
        *self.records.write() = records;
        Ok(())
    }

    fn path(&self, r: Round) -> PathBuf {
        self.dir.join(format!("{PREFIX}{r}{SUFFIX}"))
    }

    async fn write(&self, rec: &RoundRecord) -> Result<(), StoreError> {
        let path = self.path(rec.round());
        let tmp = path.with_extension("tmp");
        let data = serde_json::to_vec_pretty(rec).map_err(|e| StoreError::Json(path.clone(), e))?;
        fs::write(&tmp, data)
            .await
            .map_err(|e| StoreError::Io(tmp.clone(), e))?;
        fs::rename(&tmp, &path)
            .await
            .map_err(|e| StoreError::Io(path.clone(), e))?;
        self.records.write().insert(rec.round(), rec.clone());
        Ok(())
    }

    /// Persist the first record of a round.
    ///
    /// A round is resolved once; an existing record is never replaced by
    /// `insert`.
    pub async fn insert(&self, rec: &RoundRecord) -> Result<(), StoreError> {
        if self.records.read().contains_key(&rec.round()) {
            return Err(StoreError::Exists(rec.round()));
        }
        self.write(rec).await
    }

    /// Record the settlement outcome of a round.
    pub async fn update(&self, rec: &RoundRecord) -> Result<(), StoreError> {
        if !self.records.read().contains_key(&rec.round()) {
            warn!(round = %rec.round(), "updating unknown round");
        }
        self.write(rec).await
    }

    pub fn get(&self, r: Round) -> Option<RoundRecord> {
        self.records.read().get(&r).cloned()
    }

    pub fn contains(&self, r: Round) -> bool {
        self.records.read().contains_key(&r)
    }

    /// The express-lane controller of a round, if it has one.
    pub fn controller(&self, r: Round) -> Option<Address> {
        self.records.read().get(&r).and_then(|rec| rec.outcome.controller())
    }

    /// Records whose settlement has not been confirmed.
    pub fn pending(&self) -> Vec<RoundRecord> {
        self.records
            .read()
            .values()
            .filter(|r| r.status.is_pending())
            .cloned()
            .collect()
    }

    /// The record of the most recent round.
    pub fn latest(&self) -> Option<RoundRecord> {
        self.records.read().last_key_value().map(|(_, r)| r.clone())
    }
}

async fn read_records(dir: &Path) -> Result<BTreeMap<Round, RoundRecord>, StoreError> {
    let mut records = BTreeMap::new();
    let mut entries = fs::read_dir(dir)
        .await
        .map_err(|e| StoreError::Io(dir.to_path_buf(), e))?;
    while let Some(e) = entries
        .next_entry()
        .await
        .map_err(|e| StoreError::Io(dir.to_path_buf(), e))?
    {
        let path = e.path();
        let is_record = path
            .file_name()
            .and_then(|n| n.to_str())
            .is_some_and(|n| n.starts_with(PREFIX) && n.ends_with(SUFFIX));
        if !is_record {
            continue;
        }
        let data = fs::read(&path)
            .await
            .map_err(|e| StoreError::Io(path.clone(), e))?;
        match serde_json::from_slice::<RoundRecord>(&data) {
            Ok(r) => {
                records.insert(r.round(), r);
            }
            Err(e) => return Err(StoreError::Json(path, e)),
        }
    }
    Ok(records)
}
