//! Branch status history.
//!
//! The notification policy needs the previous run's status per branch
//! ("notify on change"). The store is a small JSON file keyed by branch;
//! an in-memory fake lives in the `fakes` module.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use gantry_domain::{Result, RunStatus};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::path::PathBuf;

/// Contract for persisting the last run status per branch.
#[async_trait]
pub trait StatusStore: Send + Sync {
    async fn last_status(&self, branch: &str) -> Result<Option<RunStatus>>;
    async fn record_status(&self, branch: &str, status: RunStatus) -> Result<()>;
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct HistoryFile {
    branches: BTreeMap<String, BranchEntry>,
}

#[derive(Debug, Serialize, Deserialize)]
struct BranchEntry {
    status: RunStatus,
    recorded_at: DateTime<Utc>,
}

/// JSON-file-backed status store.
pub struct FsStatusStore {
    path: PathBuf,
}

impl FsStatusStore {
    pub fn new(path: PathBuf) -> Self {
        Self { path }
    }

    fn load(&self) -> Result<HistoryFile> {
        if !self.path.exists() {
            return Ok(HistoryFile::default());
        }
        let content = fs::read_to_string(&self.path)?;
        Ok(serde_json::from_str(&content)?)
    }

    fn save(&self, file: &HistoryFile) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)?;
        }
        let json = serde_json::to_string_pretty(file)?;
        fs::write(&self.path, json)?;
        Ok(())
    }
}

#[async_trait]
impl StatusStore for FsStatusStore {
    async fn last_status(&self, branch: &str) -> Result<Option<RunStatus>> {
        let file = self.load()?;
        Ok(file.branches.get(branch).map(|entry| entry.status))
    }

    async fn record_status(&self, branch: &str, status: RunStatus) -> Result<()> {
        let mut file = self.load()?;
        file.branches.insert(
            branch.to_string(),
            BranchEntry {
                status,
                recorded_at: Utc::now(),
            },
        );
        self.save(&file)
    }
}
