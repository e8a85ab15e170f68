//! Transition controller
//!
//! [`LoopEngine`] is the public face of one audio layer. It owns the buffer
//! registry and the loop scheduler, resolves clip ids to buffers, and turns
//! `play` / `switch_to` / `stop` into scheduler transitions.
//!
//! Every method runs on the caller's task and returns immediately; the
//! engine never sleeps. The owner must call [`LoopEngine::tick`] at least
//! once per [`EngineConfig::tick_interval`].

use crate::audio::buffer::{ClipId, ClipSource, SampleBuffer};
use crate::config::EngineConfig;
use crate::error::{Error, Result};
use crate::events::LoopEvent;
use crate::playback::graph::AudioGraph;
use crate::playback::registry::{load_clips, BufferLoader, BufferRegistry, LoadOutcome, LoadReport};
use crate::playback::scheduler::{EngineState, LoopPhase, LoopScheduler, LoopTiming};
use crate::playback::unit::UnitFactory;
use serde::Serialize;
use std::sync::Arc;
use tokio::sync::broadcast;
use tracing::{debug, info, warn};

/// Capacity of the event broadcast channel
pub const EVENT_CHANNEL_CAPACITY: usize = 256;

/// Snapshot of the engine for status queries
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EngineStatus {
    pub is_loaded: bool,
    pub is_playing: bool,
    pub current_clip_id: Option<ClipId>,
    /// Normalized position (0..1) in the current buffer
    pub phase: Option<f64>,
    pub state: &'static str,
    pub clock_seconds: f64,
    pub loaded_clips: usize,
}

/// Gapless loop engine for one audio layer
#[derive(Debug)]
pub struct LoopEngine {
    config: EngineConfig,
    graph: AudioGraph,
    registry: BufferRegistry,
    scheduler: LoopScheduler,
    events: broadcast::Sender<LoopEvent>,
}

impl LoopEngine {
    /// Create an engine on `graph`
    ///
    /// Fails if the configuration is invalid or the graph cannot supply a
    /// usable clock.
    pub fn new(config: EngineConfig, graph: AudioGraph) -> Result<Self> {
        config.validate()?;

        if graph.is_closed() {
            return Err(Error::UnsupportedEnvironment(
                "audio graph is already closed".to_string(),
            ));
        }
        if graph.sample_rate() == 0 || !graph.now().is_finite() {
            return Err(Error::UnsupportedEnvironment(format!(
                "audio graph has no usable clock (rate {}Hz, now {})",
                graph.sample_rate(),
                graph.now()
            )));
        }

        let (events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        let scheduler = LoopScheduler::new(
            UnitFactory::new(graph.clone()),
            config.curve(),
            LoopTiming::from(&config),
            events.clone(),
        );

        info!(
            "Loop engine ready: {:.3}s crossfade, loop last {:.3}s, {}Hz",
            config.crossfade_seconds,
            config.loop_last_seconds,
            graph.sample_rate()
        );

        Ok(Self {
            config,
            graph,
            registry: BufferRegistry::new(),
            scheduler,
            events,
        })
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn graph(&self) -> &AudioGraph {
        &self.graph
    }

    pub fn registry(&self) -> &BufferRegistry {
        &self.registry
    }

    pub fn state(&self) -> &EngineState {
        self.scheduler.state()
    }

    pub fn subscribe(&self) -> broadcast::Receiver<LoopEvent> {
        self.events.subscribe()
    }

    /// True once every requested clip has been attempted
    pub fn is_loaded(&self) -> bool {
        self.scheduler.state().is_loaded
    }

    pub fn is_playing(&self) -> bool {
        self.scheduler.state().is_playing
    }

    pub fn current_clip_id(&self) -> Option<&ClipId> {
        self.scheduler.state().current_clip_id.as_ref()
    }

    pub fn phase(&self) -> LoopPhase {
        self.scheduler.phase()
    }

    /// Normalized position of the current unit at the graph's now
    pub fn playback_phase(&self) -> Option<f64> {
        let state = self.scheduler.state();
        if !state.is_playing {
            return None;
        }
        state.current.as_ref().map(|unit| unit.phase_at(self.graph.now()))
    }

    /// Fetch and decode `clips` concurrently
    ///
    /// Individual failures are reported, logged and otherwise ignored.
    pub async fn preload(&mut self, loader: &dyn BufferLoader, clips: &[ClipSource]) -> LoadReport {
        self.begin_preload(clips);
        let outcomes = load_clips(loader, clips).await;
        self.install(outcomes)
    }

    /// Register a preload whose loads run elsewhere; see [`LoopEngine::install`]
    pub fn begin_preload(&mut self, clips: &[ClipSource]) {
        self.registry.mark_requested(clips);
        self.scheduler.set_loaded(self.registry.is_ready());
    }

    /// Store the outcomes of a preload started with [`LoopEngine::begin_preload`]
    pub fn install(&mut self, outcomes: Vec<LoadOutcome>) -> LoadReport {
        let report = self.registry.install(outcomes);
        self.scheduler.set_loaded(self.registry.is_ready());

        for (clip_id, reason) in &report.failed {
            let _ = self.events.send(LoopEvent::ClipLoadFailed {
                clip_id: clip_id.clone(),
                reason: reason.clone(),
            });
        }
        let _ = self.events.send(LoopEvent::Loaded {
            loaded: report.loaded.len(),
            failed: report.failed.len(),
        });
        report
    }

    fn buffer_for(&self, clip_id: &ClipId, action: &str) -> Option<Arc<SampleBuffer>> {
        let buffer = self.registry.get(clip_id);
        if buffer.is_none() {
            match self.registry.failure(clip_id) {
                Some(reason) => warn!("Cannot {} '{}': clip failed to load ({})", action, clip_id, reason),
                None => warn!("Cannot {} '{}': clip not loaded", action, clip_id),
            }
        }
        buffer
    }

    /// Start `clip_id` from the top, cutting off anything already sounding
    pub fn play(&mut self, clip_id: impl Into<ClipId>) {
        let clip_id = clip_id.into();
        let Some(buffer) = self.buffer_for(&clip_id, "play") else {
            return;
        };
        self.scheduler.start(clip_id, buffer);
    }

    /// Cross-fade to `clip_id` at the same normalized phase
    ///
    /// Starts the clip like [`LoopEngine::play`] when nothing is playing.
    pub fn switch_to(&mut self, clip_id: impl Into<ClipId>) {
        let clip_id = clip_id.into();
        let Some(buffer) = self.buffer_for(&clip_id, "switch to") else {
            return;
        };

        let state = self.scheduler.state();
        let current = match state.current.as_ref() {
            Some(current) if state.is_playing => current,
            _ => {
                self.scheduler.start(clip_id, buffer);
                return;
            }
        };
        if current.clip_id() == &clip_id {
            debug!("Already playing '{}', switch ignored", clip_id);
            return;
        }

        let phase = current.phase_at(self.graph.now());
        let start_offset = phase * buffer.duration_seconds();
        debug!(
            "Switch '{}' -> '{}' at phase {:.3} (offset {:.3}s)",
            current.clip_id(),
            clip_id,
            phase,
            start_offset
        );
        self.scheduler.crossfade_to(clip_id, buffer, start_offset);
    }

    /// Fade out and release everything; no-op when already stopped
    pub fn stop(&mut self) {
        self.scheduler.stop();
    }

    /// Drive the scheduler; call at least once per tick interval
    pub fn tick(&mut self) {
        self.scheduler.tick();
    }

    pub fn status(&self) -> EngineStatus {
        let state = self.scheduler.state();
        EngineStatus {
            is_loaded: state.is_loaded,
            is_playing: state.is_playing,
            current_clip_id: state.current_clip_id.clone(),
            phase: self.playback_phase(),
            state: match self.scheduler.phase() {
                LoopPhase::Idle => "idle",
                LoopPhase::Playing => "playing",
                LoopPhase::Crossfading { .. } => "crossfading",
                LoopPhase::Stopping { .. } => "stopping",
            },
            clock_seconds: self.graph.now(),
            loaded_clips: self.registry.len(),
        }
    }

    /// Stop, close the graph and drop every buffer
    pub fn teardown(mut self) {
        self.scheduler.stop();
        self.scheduler.teardown();
        self.registry.clear();
        info!("Loop engine shut down");
    }
}
