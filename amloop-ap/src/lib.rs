//! # amloop Audio Player Library (amloop-ap)
//!
//! Gapless ambient loop player with scheduled-ahead crossfades.
//!
//! **Purpose:** Keep a short clip looping with no audible seam, cross-fade to
//! another clip at the same musical phase, and stop with a smooth fade.
//!
//! **Architecture:** A single driver task owns the [`playback::LoopEngine`]
//! and feeds it ticks and commands. The engine schedules start, stop and gain
//! automation on an [`playback::AudioGraph`] ahead of time; the graph renders
//! sample-accurately, either to a cpal device or offline.

pub mod audio;
pub mod config;
pub mod error;
pub mod events;
pub mod playback;

pub use config::EngineConfig;
pub use error::{Error, Result, SchedulingConflict};
pub use events::LoopEvent;
pub use playback::{AudioGraph, LoopEngine};
