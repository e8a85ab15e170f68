//! Seconds ↔ frames conversions
//!
//! The scheduler reasons in clock seconds (`f64`), the renderer in frames at
//! the output sample rate. These helpers are the only place the two meet, so
//! rounding is consistent everywhere.
//!
//! # Examples
//!
//! ```rust
//! use amloop_common::timing::*;
//!
//! assert_eq!(seconds_to_frames(1.0, 48_000), 48_000);
//! assert_eq!(frames_to_seconds(24_000, 48_000), 0.5);
//! ```

/// Working sample rate used when no output device dictates one
pub const DEFAULT_SAMPLE_RATE: u32 = 44_100;

/// One video frame at 60 Hz, the slowest acceptable tick period
pub const FRAME_INTERVAL_SECONDS: f64 = 1.0 / 60.0;

/// Convert seconds to a frame count (rounded to nearest, negative → 0)
pub fn seconds_to_frames(seconds: f64, sample_rate: u32) -> u64 {
    if seconds <= 0.0 {
        return 0;
    }
    (seconds * sample_rate as f64).round() as u64
}

/// Convert a frame count to seconds
pub fn frames_to_seconds(frames: u64, sample_rate: u32) -> f64 {
    frames as f64 / sample_rate as f64
}

/// Tick period recommended for a given crossfade length
///
/// Half the crossfade keeps the late-tick branch rare; never slower than a
/// video frame.
pub fn recommended_tick_seconds(crossfade_seconds: f64) -> f64 {
    (crossfade_seconds / 2.0).clamp(0.001, FRAME_INTERVAL_SECONDS)
}
