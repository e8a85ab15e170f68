//! Buffer registry
//!
//! Holds the decoded buffer of every clip that loaded successfully. Loads run
//! concurrently through a [`BufferLoader`]; one failed clip is recorded and
//! logged but never stops the others, so the engine keeps working with
//! whatever subset arrived.

use crate::audio::buffer::{ClipId, ClipSource, SampleBuffer};
use crate::error::Result;
use futures::future::{join_all, BoxFuture};
use serde::Serialize;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Turns a clip source into decoded audio
pub trait BufferLoader: Send + Sync {
    fn load<'a>(&'a self, source: &'a ClipSource) -> BoxFuture<'a, Result<SampleBuffer>>;
}

/// Outcome of one load for one clip
pub type LoadOutcome = (ClipId, Result<SampleBuffer>);

/// Summary of a preload request
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct LoadReport {
    pub loaded: Vec<ClipId>,
    pub failed: Vec<(ClipId, String)>,
}

/// Load every clip concurrently
///
/// Duplicate ids are loaded once (first source wins). Does not touch any
/// registry, so it can run on a separate task while the engine keeps ticking.
pub async fn load_clips(loader: &dyn BufferLoader, clips: &[ClipSource]) -> Vec<LoadOutcome> {
    let mut seen = HashSet::new();
    let unique: Vec<&ClipSource> = clips.iter().filter(|c| seen.insert(c.id.clone())).collect();

    debug!("Loading {} clips", unique.len());
    join_all(unique.into_iter().map(|source| async move {
        (source.id.clone(), loader.load(source).await)
    }))
    .await
}

/// Decoded buffers keyed by clip id
#[derive(Debug, Default)]
pub struct BufferRegistry {
    buffers: HashMap<ClipId, Arc<SampleBuffer>>,
    failed: HashMap<ClipId, String>,
    requested: HashSet<ClipId>,
    preload_started: bool,
}

impl BufferRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fetch and decode every clip, storing the successes
    pub async fn preload(&mut self, loader: &dyn BufferLoader, clips: &[ClipSource]) -> LoadReport {
        self.mark_requested(clips);
        let outcomes = load_clips(loader, clips).await;
        self.install(outcomes)
    }

    /// Record that `clips` have been requested but not yet settled
    pub fn mark_requested(&mut self, clips: &[ClipSource]) {
        self.preload_started = true;
        self.requested.extend(clips.iter().map(|c| c.id.clone()));
    }

    /// Store finished loads and settle their ids
    pub fn install(&mut self, outcomes: Vec<LoadOutcome>) -> LoadReport {
        let mut report = LoadReport::default();

        for (id, outcome) in outcomes {
            self.requested.insert(id.clone());
            match outcome {
                Ok(buffer) => {
                    debug!(
                        "Loaded clip '{}' ({:.3}s @ {}Hz)",
                        id,
                        buffer.duration_seconds(),
                        buffer.sample_rate()
                    );
                    self.failed.remove(&id);
                    self.buffers.insert(id.clone(), Arc::new(buffer));
                    report.loaded.push(id);
                }
                Err(e) => {
                    warn!("Failed to load clip '{}': {}", id, e);
                    self.buffers.remove(&id);
                    self.failed.insert(id.clone(), e.to_string());
                    report.failed.push((id, e.to_string()));
                }
            }
        }

        info!(
            "Preload settled: {} loaded, {} failed",
            report.loaded.len(),
            report.failed.len()
        );
        report
    }

    /// True once a preload was requested and every clip in it has settled,
    /// successfully or not
    pub fn is_ready(&self) -> bool {
        self.preload_started
            && self
                .requested
                .iter()
                .all(|id| self.buffers.contains_key(id) || self.failed.contains_key(id))
    }

    pub fn get(&self, id: &ClipId) -> Option<Arc<SampleBuffer>> {
        self.buffers.get(id).cloned()
    }

    /// Reason the clip failed to load, if it did
    pub fn failure(&self, id: &ClipId) -> Option<&str> {
        self.failed.get(id).map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.buffers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buffers.is_empty()
    }

    /// Drop every buffer (engine teardown)
    pub fn clear(&mut self) {
        self.buffers.clear();
        self.failed.clear();
        self.requested.clear();
        self.preload_started = false;
    }
}
