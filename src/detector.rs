use std::collections::{BTreeSet, HashSet};
use std::fs;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::extractor::OfferRecord;
use crate::utils::error::Result;

/// Canonical-key shape: city|department|housing_type|surface|rent. Bump this
/// whenever the key function changes so stale snapshots trigger an explicit
/// reset instead of a false "new item" storm.
pub const SNAPSHOT_SCHEMA: u32 = 2;

#[derive(Debug, Serialize, Deserialize)]
struct SnapshotFile {
    schema: u32,
    saved_at: DateTime<Utc>,
    keys: Vec<String>,
}

/// What the persisted snapshot said about the previous run.
#[derive(Debug)]
pub enum PreviousState {
    /// No snapshot on disk: first run, everything currently listed is new.
    FirstRun,
    /// Snapshot present but unparseable: reset to empty, never abort the run.
    Corrupt,
    /// Snapshot written under a different key shape (legacy free-text list or
    /// wrong schema tag): re-seed silently, suppressing this run's alerts.
    SchemaReset,
    Keys(HashSet<String>),
}

impl PreviousState {
    pub fn keys(&self) -> HashSet<String> {
        match self {
            PreviousState::Keys(keys) => keys.clone(),
            _ => HashSet::new(),
        }
    }

    /// True when alerting on this run's delta would only replay drift noise.
    pub fn suppress_notifications(&self) -> bool {
        matches!(self, PreviousState::SchemaReset)
    }
}

/// Result of one detection pass.
#[derive(Debug)]
pub struct DetectionOutcome {
    /// Current records unseen before, in extraction order.
    pub new_items: Vec<OfferRecord>,
    /// Full current key set: the snapshot tracks "currently listed", not a
    /// never-shrinking history, so disappear-then-reappear re-alerts.
    pub next_snapshot: BTreeSet<String>,
}

/// Records whose key is absent from `previous` are new; the next snapshot is
/// a full replace with the current key set.
pub fn diff(current: &[OfferRecord], previous: &HashSet<String>) -> DetectionOutcome {
    let mut new_items = Vec::new();
    let mut next_snapshot = BTreeSet::new();
    for record in current {
        let first_occurrence = next_snapshot.insert(record.canonical_key().to_string());
        if first_occurrence && !previous.contains(record.canonical_key()) {
            new_items.push(record.clone());
        }
    }
    DetectionOutcome {
        new_items,
        next_snapshot,
    }
}

/// Single-writer persistence for the seen-offers set. Read once at the start
/// of a run, fully replaced at the end.
pub struct SnapshotStore {
    path: PathBuf,
}

impl SnapshotStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn load(&self) -> PreviousState {
        let raw = match fs::read_to_string(&self.path) {
            Ok(raw) => raw,
            Err(_) => {
                info!("no snapshot at {}: seeding from scratch", self.path.display());
                return PreviousState::FirstRun;
            }
        };

        if let Ok(snapshot) = serde_json::from_str::<SnapshotFile>(&raw) {
            if snapshot.schema == SNAPSHOT_SCHEMA {
                return PreviousState::Keys(snapshot.keys.into_iter().collect());
            }
            warn!(
                "snapshot schema {} does not match current {}: resetting without alerting",
                snapshot.schema, SNAPSHOT_SCHEMA
            );
            return PreviousState::SchemaReset;
        }

        // The original tool persisted a bare JSON array of offer strings.
        if serde_json::from_str::<Vec<String>>(&raw).is_ok() {
            warn!(
                "legacy snapshot format at {}: resetting without alerting",
                self.path.display()
            );
            return PreviousState::SchemaReset;
        }

        warn!(
            "snapshot at {} is unparseable: treating as empty",
            self.path.display()
        );
        PreviousState::Corrupt
    }

    /// Atomic replace: write a sibling temp file, then rename over the target.
    pub fn store(&self, keys: &BTreeSet<String>) -> Result<()> {
        let snapshot = SnapshotFile {
            schema: SNAPSHOT_SCHEMA,
            saved_at: Utc::now(),
            keys: keys.iter().cloned().collect(),
        };
        let body = serde_json::to_string_pretty(&snapshot)?;
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)?;
            }
        }
        let tmp = self.path.with_extension("json.tmp");
        fs::write(&tmp, body)?;
        fs::rename(&tmp, &self.path)?;
        Ok(())
    }
}
