//! Decoded clip audio
//!
//! A [`SampleBuffer`] is immutable once built. The registry owns it behind an
//! `Arc` and every playback unit reading it shares that same allocation.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Number of interleaved channels stored in every buffer
pub const BUFFER_CHANNELS: usize = 2;

/// Name of a loopable clip
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ClipId(String);

impl ClipId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ClipId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for ClipId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl From<String> for ClipId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl From<&ClipId> for ClipId {
    fn from(id: &ClipId) -> Self {
        id.clone()
    }
}

/// One preload request: which clip, and where its audio lives
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClipSource {
    pub id: ClipId,
    pub url: String,
}

impl ClipSource {
    pub fn new(id: impl Into<ClipId>, url: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            url: url.into(),
        }
    }
}

/// Immutable decoded audio: interleaved stereo f32 frames
#[derive(Debug, Clone, PartialEq)]
pub struct SampleBuffer {
    samples: Vec<f32>,
    sample_rate: u32,
}

impl SampleBuffer {
    /// Wrap interleaved stereo samples
    ///
    /// A trailing half frame is dropped.
    pub fn new(mut samples: Vec<f32>, sample_rate: u32) -> Self {
        debug_assert!(sample_rate > 0, "sample rate must be positive");
        let whole = samples.len() - samples.len() % BUFFER_CHANNELS;
        samples.truncate(whole);
        Self {
            samples,
            sample_rate,
        }
    }

    /// Constant-valued stereo buffer, useful for tests and metering
    pub fn constant(value: f32, duration_seconds: f64, sample_rate: u32) -> Self {
        let frames = amloop_common::timing::seconds_to_frames(duration_seconds, sample_rate);
        Self::new(vec![value; frames as usize * BUFFER_CHANNELS], sample_rate)
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    pub fn frames(&self) -> usize {
        self.samples.len() / BUFFER_CHANNELS
    }

    pub fn samples(&self) -> &[f32] {
        &self.samples
    }

    pub fn duration_seconds(&self) -> f64 {
        self.frames() as f64 / self.sample_rate as f64
    }

    /// Stereo frame at fractional position, linearly interpolated
    ///
    /// Returns `None` once `position` is past the last frame.
    pub fn frame_at(&self, position: f64) -> Option<(f32, f32)> {
        if position < 0.0 {
            return None;
        }
        let idx = position.floor() as usize;
        let frames = self.frames();
        if idx >= frames {
            return None;
        }

        let left = self.samples[idx * BUFFER_CHANNELS];
        let right = self.samples[idx * BUFFER_CHANNELS + 1];
        if idx + 1 >= frames {
            return Some((left, right));
        }

        let frac = (position - idx as f64) as f32;
        let next_left = self.samples[(idx + 1) * BUFFER_CHANNELS];
        let next_right = self.samples[(idx + 1) * BUFFER_CHANNELS + 1];
        Some((
            left + (next_left - left) * frac,
            right + (next_right - right) * frac,
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_duration() {
        let buffer = SampleBuffer::new(vec![0.0; 88_200], 44_100);
        assert_eq!(buffer.frames(), 44_100);
        assert_eq!(buffer.duration_seconds(), 1.0);
    }

    #[test]
    fn test_odd_sample_count_truncated() {
        let buffer = SampleBuffer::new(vec![0.0; 5], 10);
        assert_eq!(buffer.frames(), 2);
        assert_eq!(buffer.samples().len(), 4);
    }

    #[test]
    fn test_frame_interpolation() {
        let buffer = SampleBuffer::new(vec![0.0, 1.0, 1.0, 0.0], 2);
        assert_eq!(buffer.frame_at(0.0), Some((0.0, 1.0)));
        assert_eq!(buffer.frame_at(0.5), Some((0.5, 0.5)));
        assert_eq!(buffer.frame_at(1.0), Some((1.0, 0.0)));
        assert_eq!(buffer.frame_at(2.0), None);
        assert_eq!(buffer.frame_at(-0.1), None);
    }

    #[test]
    fn test_constant_buffer() {
        let buffer = SampleBuffer::constant(0.5, 0.5, 1_000);
        assert_eq!(buffer.frames(), 500);
        assert!(buffer.samples().iter().all(|s| *s == 0.5));
    }

    #[test]
    fn test_clip_id_conversions() {
        let id: ClipId = "rain".into();
        assert_eq!(id.as_str(), "rain");
        assert_eq!(id.to_string(), "rain");
        assert_eq!(ClipId::from(String::from("rain")), id);
    }
}
