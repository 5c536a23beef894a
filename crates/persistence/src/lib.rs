#![deny(warnings)]

//! Persistence layer: save snapshots and the stores that hold them.
//!
//! The engine only sees the [`SnapshotStore`] contract. A snapshot is the
//! balance, the tap counter and the owned count per upgrade id; everything
//! else is derived again from the catalog on restore.

pub mod legacy;

use chrono::{DateTime, Utc};
use clicker_core::EconomyState;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs::{self, File};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use thiserror::Error;
use tracing::{debug, warn};

/// Current snapshot document version.
pub const SNAPSHOT_VERSION: u32 = 1;

/// Returns the default save location for local sessions.
pub fn default_save_path() -> &'static str {
    "./saves/tap_tycoon.json"
}

fn default_version() -> u32 {
    SNAPSHOT_VERSION
}

/// Errors raised while encoding or writing snapshots.
#[derive(Debug, Error)]
pub enum PersistError {
    #[error("io error: {0}")]
    Io(#[from] io::Error),
    #[error("encoding error: {0}")]
    Encode(#[from] serde_json::Error),
    /// Id cannot be represented in the target format.
    #[error("upgrade id {0:?} contains a delimiter of the save format")]
    InvalidId(String),
    #[error("malformed snapshot: {0}")]
    Malformed(String),
    /// The existing save could not be read or moved aside.
    #[error("refusing to overwrite unreadable save at {}", .0.display())]
    Guarded(PathBuf),
}

/// Persisted subset of the economy state.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PersistedSnapshot {
    #[serde(default = "default_version")]
    pub version: u32,
    pub balance: u64,
    #[serde(default)]
    pub total_taps: u64,
    #[serde(default)]
    pub owned_counts: BTreeMap<String, u32>,
    /// When the snapshot was taken; absent in saves from older versions.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub saved_at: Option<DateTime<Utc>>,
}

impl PersistedSnapshot {
    /// Snapshot of `state` taken at `saved_at`.
    pub fn capture(state: &EconomyState, saved_at: DateTime<Utc>) -> Self {
        Self {
            version: SNAPSHOT_VERSION,
            balance: state.balance(),
            total_taps: state.total_taps(),
            owned_counts: state.owned_counts(),
            saved_at: Some(saved_at),
        }
    }

    /// Rebuild the economy state. Unknown ids are ignored, missing ids start at 0.
    pub fn restore(&self) -> EconomyState {
        EconomyState::restore(self.balance, self.total_taps, &self.owned_counts)
    }

    pub fn to_json(&self) -> Result<String, PersistError> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    pub fn from_json(text: &str) -> Result<Self, PersistError> {
        Ok(serde_json::from_str(text)?)
    }

    /// Decode raw save bytes; invalid UTF-8 is reported like any other
    /// malformed document.
    pub fn from_slice(bytes: &[u8]) -> Result<Self, PersistError> {
        Ok(serde_json::from_slice(bytes)?)
    }
}

/// Load/save contract between a session and its storage.
///
/// `load` never fails: a missing or unreadable save means "start fresh".
/// A completed `save` must be visible to every later `load`.
pub trait SnapshotStore: Send + Sync {
    fn load(&self) -> Option<PersistedSnapshot>;
    fn save(&self, snapshot: &PersistedSnapshot) -> Result<(), PersistError>;
}

/// In-process store that keeps every saved snapshot in order.
#[derive(Debug, Default)]
pub struct MemoryStore {
    saved: Mutex<Vec<PersistedSnapshot>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store pre-seeded with an existing snapshot.
    pub fn with_snapshot(snapshot: PersistedSnapshot) -> Self {
        Self {
            saved: Mutex::new(vec![snapshot]),
        }
    }

    /// All snapshots saved so far, oldest first.
    pub fn history(&self) -> Vec<PersistedSnapshot> {
        self.saved
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

impl SnapshotStore for MemoryStore {
    fn load(&self) -> Option<PersistedSnapshot> {
        self.saved
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .last()
            .cloned()
    }

    fn save(&self, snapshot: &PersistedSnapshot) -> Result<(), PersistError> {
        self.saved
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(snapshot.clone());
        Ok(())
    }
}

/// Store backed by one JSON document on disk.
///
/// Saves go to `<path>.tmp` first and are renamed over `path`, so a crash
/// mid-write leaves the previous save intact. An unparseable save is moved
/// aside to `<path>.corrupt` instead of being overwritten; if it cannot be
/// moved, the store refuses to save over it.
#[derive(Clone, Debug)]
pub struct JsonFileStore {
    path: PathBuf,
    guard: Arc<AtomicBool>,
}

impl JsonFileStore {
    pub fn new<P: AsRef<Path>>(path: P) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
            guard: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn sibling(&self, suffix: &str) -> PathBuf {
        let mut os = self.path.as_os_str().to_owned();
        os.push(suffix);
        PathBuf::from(os)
    }

    /// Move the current save to `<path>.corrupt`. When that fails the file
    /// is left in place and saves are refused until a later load succeeds.
    fn quarantine(&self) {
        let target = self.sibling(".corrupt");
        match fs::rename(&self.path, &target) {
            Ok(()) => warn!(path = %target.display(), "moved unreadable save aside"),
            Err(e) => {
                warn!(error = %e, "could not move unreadable save aside, saving disabled");
                self.guard.store(true, Ordering::SeqCst);
            }
        }
    }
}

impl SnapshotStore for JsonFileStore {
    fn load(&self) -> Option<PersistedSnapshot> {
        let bytes = match fs::read(&self.path) {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                debug!(path = %self.path.display(), "no save found");
                self.guard.store(false, Ordering::SeqCst);
                return None;
            }
            Err(e) => {
                warn!(path = %self.path.display(), error = %e, "save unreadable, starting fresh");
                self.quarantine();
                return None;
            }
        };
        match PersistedSnapshot::from_slice(&bytes) {
            Ok(snapshot) => {
                self.guard.store(false, Ordering::SeqCst);
                Some(snapshot)
            }
            Err(e) => {
                warn!(path = %self.path.display(), error = %e, "save malformed, starting fresh");
                self.quarantine();
                None
            }
        }
    }

    fn save(&self, snapshot: &PersistedSnapshot) -> Result<(), PersistError> {
        if self.guard.load(Ordering::SeqCst) {
            return Err(PersistError::Guarded(self.path.clone()));
        }
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)?;
            }
        }
        let body = snapshot.to_json()?;
        let tmp = self.sibling(".tmp");
        {
            let mut file = File::create(&tmp)?;
            file.write_all(body.as_bytes())?;
            file.sync_all()?;
        }
        if let Err(e) = fs::rename(&tmp, &self.path) {
            let _ = fs::remove_file(&tmp);
            return Err(e.into());
        }
        Ok(())
    }
}
