use super::{read_json, write_json_atomic};
use crate::error::Result;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};
use std::path::{Path, PathBuf};
use tracing::{debug, info};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProgressStatus {
    Done,
    Failed,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProgressEntry {
    pub company_key: String,
    pub status: ProgressStatus,
    pub timestamp: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

/// Resume checkpoint: company key → last outcome, rewritten after every company.
#[derive(Debug)]
pub struct ProgressStore {
    path: PathBuf,
    entries: BTreeMap<String, ProgressEntry>,
}

impl ProgressStore {
    /// Load the checkpoint at `path`; a missing file is an empty store.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let entries: BTreeMap<String, ProgressEntry> = read_json(&path)?.unwrap_or_default();
        debug!(path = %path.display(), entries = entries.len(), "opened progress store");
        Ok(Self { path, entries })
    }

    /// Forget every entry and persist the empty store.
    pub fn reset(&mut self) -> Result<()> {
        info!(path = %self.path.display(), "resetting progress for a clean run");
        self.entries.clear();
        self.persist()
    }

    pub fn is_done(&self, company_key: &str) -> bool {
        self.entries
            .get(company_key)
            .map(|e| e.status == ProgressStatus::Done)
            .unwrap_or(false)
    }

    pub fn done_keys(&self) -> HashSet<String> {
        self.entries
            .values()
            .filter(|e| e.status == ProgressStatus::Done)
            .map(|e| e.company_key.clone())
            .collect()
    }

    pub fn entry(&self, company_key: &str) -> Option<&ProgressEntry> {
        self.entries.get(company_key)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn mark_done(&mut self, company_key: &str) -> Result<()> {
        self.record(company_key, ProgressStatus::Done, None)
    }

    /// Done with a note, e.g. an operator dropped the company as a duplicate.
    pub fn mark_done_with_reason(&mut self, company_key: &str, reason: &str) -> Result<()> {
        self.record(company_key, ProgressStatus::Done, Some(reason.to_string()))
    }

    /// A failure never replaces an earlier `done` entry.
    pub fn mark_failed(&mut self, company_key: &str, reason: &str) -> Result<()> {
        if self.is_done(company_key) {
            return Ok(());
        }
        self.record(company_key, ProgressStatus::Failed, Some(reason.to_string()))
    }

    fn record(&mut self, company_key: &str, status: ProgressStatus, reason: Option<String>) -> Result<()> {
        let entry = ProgressEntry {
            company_key: company_key.to_string(),
            status,
            timestamp: Utc::now(),
            reason,
        };
        let previous = self.entries.insert(company_key.to_string(), entry);
        if let Err(err) = self.persist() {
            // Keep memory in line with what is on disk
            match previous {
                Some(prev) => self.entries.insert(company_key.to_string(), prev),
                None => self.entries.remove(company_key),
            };
            return Err(err);
        }
        Ok(())
    }

    fn persist(&self) -> Result<()> {
        write_json_atomic(&self.path, &self.entries)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::EnrichError;
    use tempfile::TempDir;

    #[test]
    fn entries_survive_reopen() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("progress.json");

        let mut store = ProgressStore::open(&path).unwrap();
        store.mark_done("acme").unwrap();
        store.mark_failed("globex", "all sources failed").unwrap();

        let reopened = ProgressStore::open(&path).unwrap();
        assert!(reopened.is_done("acme"));
        assert!(!reopened.is_done("globex"));
        assert_eq!(
            reopened.entry("globex").unwrap().reason.as_deref(),
            Some("all sources failed")
        );
        assert_eq!(reopened.done_keys().len(), 1);
    }

    #[test]
    fn marking_twice_keeps_one_entry() {
        let dir = TempDir::new().unwrap();
        let mut store = ProgressStore::open(dir.path().join("p.json")).unwrap();
        store.mark_failed("acme", "timeout").unwrap();
        store.mark_done("acme").unwrap();
        store.mark_done("acme").unwrap();
        store.mark_failed("acme", "late failure").unwrap();

        assert_eq!(store.len(), 1);
        assert!(store.is_done("acme"));
    }

    #[test]
    fn reset_clears_disk_state() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("p.json");
        let mut store = ProgressStore::open(&path).unwrap();
        store.mark_done("acme").unwrap();
        store.reset().unwrap();

        assert!(ProgressStore::open(&path).unwrap().is_empty());
    }

    #[test]
    fn unwritable_location_is_a_persistence_error() {
        let dir = TempDir::new().unwrap();
        // a regular file where the parent directory should be
        let blocker = dir.path().join("blocker");
        std::fs::write(&blocker, b"x").unwrap();
        let mut store = ProgressStore::open(blocker.join("p.json")).unwrap();

        let err = store.mark_done("acme").unwrap_err();
        assert!(matches!(err, EnrichError::Persistence(_)));
        assert!(!store.is_done("acme"));
    }
}
