//! Duplicate suppression across redeliveries and restarts.
//!
//! Two layers decide whether an event is new:
//!
//! - a bounded in-memory cache of recently seen ids (including the bot's own
//!   replies), rebuilt empty on every start;
//! - the durable [`Checkpoint`], which survives restarts. Any id at or below
//!   the checkpoint of its source is considered handled.
//!
//! Once the checkpoint moves past a cached id, the cache entry is dropped since
//! the checkpoint alone answers for it.

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::time::Instant;
use tracing::{debug, error, trace};

use crate::Result;
use crate::checkpoint::{Checkpoint, CheckpointStore};
use crate::event::{EventId, SourceKind, StreamEvent};

/// Bounds of the in-memory cache.
#[derive(Debug, Clone)]
pub struct DedupConfig {
    /// Maximum number of cached ids; the oldest entry is evicted first.
    pub capacity: usize,
    /// Cached ids older than this are forgotten.
    pub ttl: Duration,
}

impl Default for DedupConfig {
    fn default() -> Self {
        Self {
            capacity: 1024,
            ttl: Duration::from_secs(24 * 60 * 60),
        }
    }
}

#[derive(Debug, Clone, Copy)]
struct SeenEntry {
    /// `None` for ids that do not belong to a checkpointed source (own replies).
    source: Option<SourceKind>,
    seen_at: Instant,
}

/// Insertion-ordered, bounded set of ids.
#[derive(Debug, Default)]
struct SeenCache {
    entries: HashMap<EventId, SeenEntry>,
    order: VecDeque<EventId>,
}

impl SeenCache {
    fn contains(&self, id: &EventId, now: Instant, ttl: Duration) -> bool {
        self.entries
            .get(id)
            .is_some_and(|entry| now.saturating_duration_since(entry.seen_at) < ttl)
    }

    fn insert(&mut self, id: EventId, entry: SeenEntry, capacity: usize) {
        if self.entries.insert(id.clone(), entry).is_none() {
            self.order.push_back(id);
        }
        while self.entries.len() > capacity {
            let Some(oldest) = self.order.pop_front() else {
                break;
            };
            self.entries.remove(&oldest);
        }
    }

    /// Drop expired entries and entries covered by the checkpoint of `source`.
    fn prune(&mut self, now: Instant, ttl: Duration, covered: Option<(SourceKind, &EventId)>) {
        self.entries.retain(|id, entry| {
            let expired = now.saturating_duration_since(entry.seen_at) >= ttl;
            let checkpointed = covered
                .is_some_and(|(source, upto)| entry.source == Some(source) && id <= upto);
            !(expired || checkpointed)
        });
        let entries = &self.entries;
        self.order.retain(|id| entries.contains_key(id));
    }

    fn len(&self) -> usize {
        self.entries.len()
    }
}

/// Decides whether an event still needs processing and records progress.
#[derive(Debug)]
pub struct DuplicateGuard {
    config: DedupConfig,
    store: Arc<CheckpointStore>,
    checkpoint: Mutex<Checkpoint>,
    seen: Mutex<SeenCache>,
    /// Serializes read-modify-write cycles of the checkpoint.
    advance_lock: tokio::sync::Mutex<()>,
}

impl DuplicateGuard {
    pub fn new(config: DedupConfig, store: Arc<CheckpointStore>, checkpoint: Checkpoint) -> Self {
        Self {
            config,
            store,
            checkpoint: Mutex::new(checkpoint),
            seen: Mutex::new(SeenCache::default()),
            advance_lock: tokio::sync::Mutex::new(()),
        }
    }

    /// Build a guard from the checkpoint currently on disk.
    pub async fn load(config: DedupConfig, store: Arc<CheckpointStore>) -> Result<Self> {
        let checkpoint = store.load().await?;
        Ok(Self::new(config, store, checkpoint))
    }

    /// Whether `event` has neither been seen in this process nor checkpointed.
    pub fn should_process(&self, event: &StreamEvent) -> bool {
        let now = Instant::now();
        if self.seen.lock().contains(&event.id, now, self.config.ttl) {
            trace!(event_id = %event.id, "Event already seen");
            return false;
        }

        if let Some(upto) = self.checkpoint.lock().get(event.source) {
            if event.id <= *upto {
                trace!(
                    event_id = %event.id,
                    checkpoint = %upto,
                    source = %event.source,
                    "Event at or below checkpoint"
                );
                return false;
            }
        }
        true
    }

    /// Remember `id` for this process lifetime (bounded by capacity and TTL).
    ///
    /// Pass `None` as source for ids that are not part of a checkpointed
    /// source, such as the bot's own replies.
    pub fn mark_seen(&self, id: EventId, source: Option<SourceKind>) {
        let entry = SeenEntry {
            source,
            seen_at: Instant::now(),
        };
        self.seen.lock().insert(id, entry, self.config.capacity);
    }

    /// Move the checkpoint of `source` forward to `id` and persist it.
    ///
    /// The checkpoint never moves backwards; an older id is a no-op. When the
    /// write fails the in-memory checkpoint is left untouched and the error is
    /// returned so the caller can skip the event.
    pub async fn advance_checkpoint(&self, source: SourceKind, id: &EventId) -> Result<()> {
        let _guard = self.advance_lock.lock().await;

        let mut next = self.checkpoint.lock().clone();
        if next.get(source).is_some_and(|current| current >= id) {
            return Ok(());
        }
        next.set(source, id.clone());

        if let Err(e) = self.store.save(&next).await {
            error!(
                source = %source,
                event_id = %id,
                error = %e,
                "Failed to persist checkpoint"
            );
            return Err(e);
        }

        *self.checkpoint.lock() = next;
        self.seen
            .lock()
            .prune(Instant::now(), self.config.ttl, Some((source, id)));
        debug!(source = %source, event_id = %id, "Checkpoint advanced");
        Ok(())
    }

    /// Write the current checkpoint to disk.
    pub async fn flush(&self) -> Result<()> {
        let _guard = self.advance_lock.lock().await;
        let snapshot = self.checkpoint.lock().clone();
        self.store.save(&snapshot).await
    }

    /// Current checkpoint of `source`.
    pub fn checkpoint_for(&self, source: SourceKind) -> Option<EventId> {
        self.checkpoint.lock().get(source).cloned()
    }

    /// Snapshot of the whole checkpoint.
    pub fn checkpoint(&self) -> Checkpoint {
        self.checkpoint.lock().clone()
    }

    /// Drop expired cache entries.
    pub fn prune_expired(&self) {
        self.seen
            .lock()
            .prune(Instant::now(), self.config.ttl, None);
    }

    /// Number of cached ids.
    pub fn cached_len(&self) -> usize {
        self.seen.lock().len()
    }
}
