//! Durable checkpoint of the last started event per source.
//!
//! The checkpoint file is a flat JSON object mapping source name to event id:
//!
//! ```json
//! { "mentions": "112233", "monitored_account": "112240" }
//! ```
//!
//! Every save rewrites the complete map through a temp file and a rename, so a
//! crash leaves either the previous or the new file on disk.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tracing::{debug, info};

use crate::event::{EventId, SourceKind};
use crate::utils::fs::{io_error, write_atomic};
use crate::{Error, Result};

/// Key the monitored-account checkpoint was stored under by earlier releases.
const LEGACY_MONITORED_KEY: &str = "bt_posts";

/// Source name to last started event id.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(transparent)]
pub struct Checkpoint(BTreeMap<String, EventId>);

impl Checkpoint {
    pub fn new() -> Self {
        Self::default()
    }

    /// Checkpointed id for `source`, if any.
    pub fn get(&self, source: SourceKind) -> Option<&EventId> {
        self.0.get(source.checkpoint_key()).or_else(|| match source {
            SourceKind::MonitoredAccount => self.0.get(LEGACY_MONITORED_KEY),
            SourceKind::Mentions => None,
        })
    }

    /// Set the id for `source`, replacing any legacy entry.
    pub fn set(&mut self, source: SourceKind, id: EventId) {
        if source == SourceKind::MonitoredAccount {
            self.0.remove(LEGACY_MONITORED_KEY);
        }
        self.0.insert(source.checkpoint_key().to_string(), id);
    }

    /// Raw access by source name.
    pub fn get_raw(&self, key: &str) -> Option<&EventId> {
        self.0.get(key)
    }

    pub fn insert_raw(&mut self, key: impl Into<String>, id: EventId) {
        self.0.insert(key.into(), id);
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }
}

impl<'de> Deserialize<'de> for Checkpoint {
    fn deserialize<D: serde::Deserializer<'de>>(
        deserializer: D,
    ) -> std::result::Result<Self, D::Error> {
        // First-run files written by earlier releases hold `null` for unseen sources.
        let raw = BTreeMap::<String, Option<EventId>>::deserialize(deserializer)?;
        Ok(Self(
            raw.into_iter()
                .filter_map(|(key, id)| id.map(|id| (key, id)))
                .collect(),
        ))
    }
}

/// Reads and writes the checkpoint file.
///
/// Writes are serialized through an async mutex so that concurrent savers
/// cannot interleave their temp-file writes and lose an update.
#[derive(Debug)]
pub struct CheckpointStore {
    path: PathBuf,
    write_lock: Mutex<()>,
}

impl CheckpointStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            write_lock: Mutex::new(()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Load the checkpoint.
    ///
    /// A missing file is a first run and yields an empty checkpoint. A file that
    /// exists but cannot be parsed is an error.
    pub async fn load(&self) -> Result<Checkpoint> {
        let json = match tokio::fs::read_to_string(&self.path).await {
            Ok(json) => json,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                info!(path = %self.path.display(), "No checkpoint file, starting fresh");
                return Ok(Checkpoint::new());
            }
            Err(e) => return Err(io_error("reading", &self.path, e)),
        };

        if json.trim().is_empty() {
            return Ok(Checkpoint::new());
        }

        let checkpoint: Checkpoint = serde_json::from_str(&json).map_err(|e| {
            Error::checkpoint(format!(
                "corrupt checkpoint file {}: {}",
                self.path.display(),
                e
            ))
        })?;

        debug!(
            path = %self.path.display(),
            sources = checkpoint.len(),
            "Loaded checkpoint"
        );
        Ok(checkpoint)
    }

    /// Atomically replace the checkpoint file with `checkpoint`.
    pub async fn save(&self, checkpoint: &Checkpoint) -> Result<()> {
        let json = serde_json::to_vec_pretty(checkpoint)?;

        let _guard = self.write_lock.lock().await;
        write_atomic(&self.path, &json).await?;

        debug!(path = %self.path.display(), "Checkpoint saved");
        Ok(())
    }
}
