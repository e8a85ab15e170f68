//! Loop engine events
//!
//! Broadcast by the engine on every state transition. Subscribers that lag
//! or drop never affect playback; sends with no receivers are ignored.

use crate::audio::buffer::ClipId;
use serde::Serialize;

/// Engine state change notification
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum LoopEvent {
    /// A preload request settled
    Loaded { loaded: usize, failed: usize },

    /// One clip failed to fetch or decode
    ClipLoadFailed { clip_id: ClipId, reason: String },

    /// Playback started from silence (or took over another clip)
    Started { clip_id: ClipId },

    /// The next loop iteration's crossfade was scheduled
    LoopScheduled {
        clip_id: ClipId,
        crossfade_start: f64,
        loop_start_offset: f64,
        loop_duration: f64,
    },

    /// A loop crossfade finished and the new iteration became current
    LoopCompleted { clip_id: ClipId, started_at: f64 },

    /// Phase-preserving crossfade to another clip
    Switched {
        from: ClipId,
        to: ClipId,
        start_offset: f64,
    },

    /// Playback is fading out
    Stopped,
}
