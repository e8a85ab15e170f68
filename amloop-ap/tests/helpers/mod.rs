//! Shared fixtures for amloop-ap integration tests
//!
//! - Engines on a hand-advanced clock
//! - An in-memory loader with injectable failures
//! - WAV file generation for decoder tests

#![allow(dead_code)]

pub mod audio_generator;

use amloop_ap::audio::{ClipSource, SampleBuffer};
use amloop_ap::playback::{AudioGraph, BufferLoader, Clock, LoopEngine, ManualClock};
use amloop_ap::{EngineConfig, Error, LoopEvent, Result};
use futures::future::BoxFuture;
use std::collections::HashMap;
use tokio::sync::broadcast;

/// Graph rate used by simulated engines
pub const TEST_RATE: u32 = 1_000;

/// Loader serving constant-valued buffers of fixed lengths
///
/// Clips not in the table fail to load.
#[derive(Debug, Default)]
pub struct MemoryLoader {
    durations: HashMap<String, f64>,
}

impl MemoryLoader {
    pub fn new(clips: &[(&str, f64)]) -> Self {
        Self {
            durations: clips.iter().map(|(url, d)| (url.to_string(), *d)).collect(),
        }
    }
}

impl BufferLoader for MemoryLoader {
    fn load<'a>(&'a self, source: &'a ClipSource) -> BoxFuture<'a, Result<SampleBuffer>> {
        Box::pin(async move {
            match self.durations.get(&source.url) {
                Some(duration) => Ok(SampleBuffer::constant(1.0, *duration, TEST_RATE)),
                None => Err(Error::Decode(format!("no such clip: {}", source.url))),
            }
        })
    }
}

/// Engine on a manual clock with `clips` preloaded (id == url)
pub async fn engine_with(config: EngineConfig, clips: &[(&str, f64)]) -> (LoopEngine, ManualClock) {
    let (graph, clock) = AudioGraph::manual(TEST_RATE);
    let mut engine = LoopEngine::new(config, graph).expect("engine");
    let sources: Vec<ClipSource> = clips.iter().map(|(id, _)| ClipSource::new(*id, *id)).collect();
    engine.preload(&MemoryLoader::new(clips), &sources).await;
    (engine, clock)
}

/// Advance the clock to each multiple of `step` up to `until`, ticking at
/// every step, and call `check` after each tick
pub fn run_ticks(
    engine: &mut LoopEngine,
    clock: &ManualClock,
    from: f64,
    until: f64,
    step: f64,
    mut check: impl FnMut(&LoopEngine, f64),
) {
    let steps = ((until - from) / step).round() as usize;
    for i in 0..=steps {
        let t = from + i as f64 * step;
        if t > clock.now() {
            clock.set(t);
        }
        engine.tick();
        check(engine, t);
    }
}

/// Drain every event currently queued
pub fn drain(events: &mut broadcast::Receiver<LoopEvent>) -> Vec<LoopEvent> {
    let mut out = Vec::new();
    while let Ok(event) = events.try_recv() {
        out.push(event);
    }
    out
}
