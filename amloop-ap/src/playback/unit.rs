//! Playback units and their factory
//!
//! A [`PlaybackUnit`] is one sounding instance of a clip buffer: a graph
//! voice plus the timing the scheduler needs to predict its loop boundary.
//! Units are created silent and unstarted so the caller can line several of
//! them up against one future clock instant.
//!
//! Every operation that touches the graph is best-effort and returns
//! `Result<(), SchedulingConflict>`. A conflict means the voice was already
//! stopped or released, which is harmless; callers discard it explicitly.

use crate::audio::buffer::{ClipId, SampleBuffer};
use crate::error::SchedulingConflict;
use crate::playback::graph::{AudioGraph, VoiceId};
use std::sync::Arc;
use tracing::trace;

/// One live, schedulable instance of a clip buffer
#[derive(Debug)]
pub struct PlaybackUnit {
    clip_id: ClipId,
    buffer: Arc<SampleBuffer>,
    voice: VoiceId,
    graph: AudioGraph,
    start_offset: f64,
    start_time: f64,
    end_time: f64,
}

impl PlaybackUnit {
    pub fn clip_id(&self) -> &ClipId {
        &self.clip_id
    }

    pub fn buffer(&self) -> &Arc<SampleBuffer> {
        &self.buffer
    }

    pub fn voice(&self) -> VoiceId {
        self.voice
    }

    /// Offset into the buffer (seconds) where playback begins
    pub fn start_offset(&self) -> f64 {
        self.start_offset
    }

    /// Clock time at which the unit starts (or was created, before `start_at`)
    pub fn start_time(&self) -> f64 {
        self.start_time
    }

    /// Clock time at which the current loop region ends
    pub fn end_time(&self) -> f64 {
        self.end_time
    }

    pub fn set_end_time(&mut self, end_time: f64) {
        self.end_time = end_time;
    }

    pub fn duration(&self) -> f64 {
        self.buffer.duration_seconds()
    }

    /// Buffer position in seconds at clock time `t`, wrapped to the buffer
    pub fn position_at(&self, t: f64) -> f64 {
        let duration = self.duration();
        if duration <= 0.0 {
            return 0.0;
        }
        (self.start_offset + (t - self.start_time).max(0.0)).rem_euclid(duration)
    }

    /// Normalized position (0..1) within the buffer at clock time `t`
    pub fn phase_at(&self, t: f64) -> f64 {
        let duration = self.duration();
        if duration <= 0.0 {
            return 0.0;
        }
        self.position_at(t) / duration
    }

    /// Schedule playback to begin at clock time `when`
    ///
    /// The loop end is re-derived from the actual start.
    pub fn start_at(&mut self, when: f64) -> Result<(), SchedulingConflict> {
        self.graph.start_voice(self.voice, when, self.start_offset)?;
        self.start_time = when;
        self.end_time = when + (self.duration() - self.start_offset);
        Ok(())
    }

    /// Scheduled gain at clock time `t`; `None` once released from the graph
    pub fn gain_at(&self, t: f64) -> Option<f32> {
        self.graph.gain_at(self.voice, t)
    }

    pub fn set_gain_at(&self, value: f32, at: f64) -> Result<(), SchedulingConflict> {
        self.graph.set_gain_at(self.voice, value, at)
    }

    /// Ramp linearly from the gain at `from` to `target` at `to`
    pub fn ramp_gain(&self, from: f64, to: f64, target: f32) -> Result<(), SchedulingConflict> {
        self.graph.ramp_gain(self.voice, from, to, target)
    }

    /// Follow a crossfade table over `start..start + duration`
    pub fn apply_curve(
        &self,
        values: Arc<[f32]>,
        start: f64,
        duration: f64,
    ) -> Result<(), SchedulingConflict> {
        self.graph.set_gain_curve(self.voice, values, start, duration)
    }

    /// When the gain automation scheduled so far finishes
    pub fn automation_end(&self) -> Option<f64> {
        self.graph.automation_end(self.voice)
    }

    /// Drop automation not yet applied at `at`, holding the gain reached there
    pub fn cancel_automation(&self, at: f64) -> Result<(), SchedulingConflict> {
        self.graph.cancel_gain(self.voice, at)
    }

    pub fn stop_at(&self, when: f64) -> Result<(), SchedulingConflict> {
        self.graph.stop_voice(self.voice, when)
    }

    /// Stop now and detach from the graph, consuming the unit
    pub fn release(self) -> Result<(), SchedulingConflict> {
        trace!("Releasing unit for '{}' ({:?})", self.clip_id, self.voice);
        // An already-stopped voice still needs disconnecting
        let _ = self.graph.stop_voice(self.voice, self.graph.now());
        self.graph.disconnect(self.voice)
    }
}

/// Creates units bound to the shared graph
#[derive(Debug, Clone)]
pub struct UnitFactory {
    graph: AudioGraph,
}

impl UnitFactory {
    pub fn new(graph: AudioGraph) -> Self {
        Self { graph }
    }

    pub fn graph(&self) -> &AudioGraph {
        &self.graph
    }

    /// Create a silent, unstarted unit reading `buffer` from `start_offset`
    ///
    /// `start_time` is taken from the clock now and `end_time` is
    /// `start_time + (duration - start_offset)`. The offset is clamped into
    /// the buffer.
    pub fn create(
        &self,
        clip_id: ClipId,
        buffer: Arc<SampleBuffer>,
        start_offset: f64,
    ) -> Result<PlaybackUnit, SchedulingConflict> {
        let duration = buffer.duration_seconds();
        let start_offset = if start_offset.is_finite() {
            start_offset.clamp(0.0, duration.max(0.0))
        } else {
            0.0
        };
        // An offset at the very end would produce a zero-length unit
        let start_offset = if start_offset >= duration { 0.0 } else { start_offset };

        let voice = self.graph.create_voice(Arc::clone(&buffer))?;
        let start_time = self.graph.now();

        Ok(PlaybackUnit {
            clip_id,
            buffer,
            voice,
            graph: self.graph.clone(),
            start_offset,
            start_time,
            end_time: start_time + (duration - start_offset),
        })
    }
}
