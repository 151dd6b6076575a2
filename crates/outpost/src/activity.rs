// Copyright 2026 Outpost Contributors
// SPDX-License-Identifier: Apache-2.0

//! JSONL activity journal: one line per user-facing engine event.
//!
//! - Append-only, one JSON object per line
//! - Rotates once the file exceeds the size limit (10 MB by default)
//! - Rotated files are named `.1`, `.2`, and so on, keeping at most 3

use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast::error::RecvError;
use tokio::task::JoinHandle;

use crate::events::{EngineEvent, EventBus};
use crate::model::VillageId;

/// Size at which the journal rotates.
pub const DEFAULT_MAX_SIZE: u64 = 10 * 1024 * 1024;

const MAX_ROTATIONS: u32 = 3;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActivityEntry {
    pub timestamp: String,
    pub kind: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub village_id: Option<VillageId>,
    pub message: String,
}

impl ActivityEntry {
    /// Entry for `event`, if the event is user-facing.
    pub fn from_event(event: &EngineEvent) -> Option<Self> {
        Some(Self {
            timestamp: Utc::now().to_rfc3339(),
            kind: event.kind().to_string(),
            village_id: event.village_id(),
            message: event.describe()?,
        })
    }
}

pub struct ActivityJournal {
    file: File,
    path: PathBuf,
    current_size: u64,
    max_size: u64,
}

impl ActivityJournal {
    pub fn open(path: &Path) -> Result<Self> {
        Self::with_limit(path, DEFAULT_MAX_SIZE)
    }

    pub fn with_limit(path: &Path, max_size: u64) -> Result<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let file = open_append(path)?;
        let current_size = file.metadata().map(|m| m.len()).unwrap_or(0);
        Ok(Self {
            file,
            path: path.to_path_buf(),
            current_size,
            max_size,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Append `event` if it is user-facing. Returns whether a line was written.
    pub fn record(&mut self, event: &EngineEvent) -> Result<bool> {
        let Some(entry) = ActivityEntry::from_event(event) else {
            return Ok(false);
        };
        self.append(&entry)?;
        Ok(true)
    }

    pub fn append(&mut self, entry: &ActivityEntry) -> Result<()> {
        if self.current_size >= self.max_size {
            self.rotate()?;
        }
        let json = serde_json::to_string(entry)?;
        writeln!(self.file, "{json}").context("writing activity entry")?;
        self.current_size += json.len() as u64 + 1;
        Ok(())
    }

    /// Shift `.1` to `.2` and so on, then move the live file to `.1`.
    fn rotate(&mut self) -> Result<()> {
        self.file.flush()?;
        let oldest = rotation_path(&self.path, MAX_ROTATIONS);
        if oldest.exists() {
            let _ = std::fs::remove_file(&oldest);
        }
        for i in (1..MAX_ROTATIONS).rev() {
            let from = rotation_path(&self.path, i);
            if from.exists() {
                let _ = std::fs::rename(&from, rotation_path(&self.path, i + 1));
            }
        }
        let _ = std::fs::rename(&self.path, rotation_path(&self.path, 1));
        self.file = open_append(&self.path)?;
        self.current_size = 0;
        tracing::debug!(path = %self.path.display(), "activity journal rotated");
        Ok(())
    }
}

/// Record every event on `bus` until the bus closes.
pub fn spawn(bus: &EventBus, mut journal: ActivityJournal) -> JoinHandle<()> {
    let mut rx = bus.subscribe();
    tokio::spawn(async move {
        loop {
            match rx.recv().await {
                Ok(event) => {
                    if let Err(e) = journal.record(&event) {
                        tracing::warn!(error = %e, "activity journal write failed");
                    }
                }
                Err(RecvError::Lagged(skipped)) => {
                    tracing::warn!(skipped, "activity journal fell behind");
                }
                Err(RecvError::Closed) => break,
            }
        }
    })
}

/// The last `limit` entries of the live journal file.
pub fn read_recent(path: &Path, limit: usize) -> Result<Vec<ActivityEntry>> {
    let text = match std::fs::read_to_string(path) {
        Ok(t) => t,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(e) => return Err(e).with_context(|| format!("reading {}", path.display())),
    };
    let entries: Vec<ActivityEntry> = text
        .lines()
        .filter_map(|line| serde_json::from_str(line).ok())
        .collect();
    let skip = entries.len().saturating_sub(limit);
    Ok(entries.into_iter().skip(skip).collect())
}

fn open_append(path: &Path) -> Result<File> {
    OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .with_context(|| format!("failed to open activity journal: {}", path.display()))
}

/// `activity.jsonl.1`, `activity.jsonl.2`, ...
fn rotation_path(base: &Path, index: u32) -> PathBuf {
    let name = format!(
        "{}.{index}",
        base.file_name()
            .and_then(|n| n.to_str())
            .unwrap_or("activity.jsonl")
    );
    base.with_file_name(name)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::FailureKind;
    use tempfile::TempDir;

    fn failure(slot_id: u32) -> EngineEvent {
        EngineEvent::UpgradeFailed {
            village_id: 3,
            slot_id,
            kind: FailureKind::NotFound,
            message: "upgrade link not found".into(),
        }
    }

    #[test]
    fn test_only_user_facing_events_are_recorded() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("activity.jsonl");
        let mut j = ActivityJournal::open(&path).unwrap();
        assert!(j.record(&failure(5)).unwrap());
        assert!(!j
            .record(&EngineEvent::FetchProgress {
                completed: 1,
                total: 4,
                page: "dorf1".into(),
            })
            .unwrap());

        let entries = read_recent(&path, 10).unwrap();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].kind, "UpgradeFailed");
        assert_eq!(entries[0].village_id, Some(3));
        assert!(entries[0].message.contains("slot 5"));
    }

    #[test]
    fn test_rotation_keeps_bounded_history() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("activity.jsonl");
        let mut j = ActivityJournal::with_limit(&path, 64).unwrap();
        for slot in 0..20 {
            j.record(&failure(slot)).unwrap();
        }
        assert!(rotation_path(&path, 1).exists());
        assert!(rotation_path(&path, MAX_ROTATIONS).exists());
        assert!(!rotation_path(&path, MAX_ROTATIONS + 1).exists());
        let live = read_recent(&path, 100).unwrap();
        assert_eq!(live.len(), 1);
        assert!(live[0].message.contains("slot 19"));
    }

    #[tokio::test]
    async fn test_journal_follows_bus() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("activity.jsonl");
        let bus = EventBus::new(16);
        let handle = spawn(&bus, ActivityJournal::open(&path).unwrap());
        bus.emit(EngineEvent::LoginSucceeded);
        drop(bus);
        handle.await.unwrap();
        let entries = read_recent(&path, 5).unwrap();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].message, "login succeeded");
    }
}
