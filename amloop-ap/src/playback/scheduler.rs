//! Loop scheduler
//!
//! Keeps one clip sounding forever. On every tick it compares the predicted
//! end of the current loop region with the clock and, once the end is within
//! two crossfade lengths, schedules the next iteration's start and both gain
//! curves against the *predicted* boundary. Scheduling ahead of the boundary
//! is what makes the seam sample-accurate regardless of tick jitter.
//!
//! # State machine
//!
//! ```text
//! Idle ──play──▶ Playing ──tick──▶ Crossfading ──swap──▶ Playing
//!   ▲                │                   │
//!   └── released ── Stopping ◀── stop ───┘
//! ```
//!
//! Waiting is never blocking: the end of a crossfade and the end of a stop
//! fade are stored as clock deadlines and carried out by the first tick at
//! or after them.

use crate::audio::buffer::{ClipId, SampleBuffer};
use crate::config::EngineConfig;
use crate::events::LoopEvent;
use crate::playback::unit::{PlaybackUnit, UnitFactory};
use amloop_common::fade_curves::CrossfadeCurve;
use std::sync::Arc;
use tokio::sync::broadcast;
use tracing::{debug, info, warn};

/// Timing knobs, in seconds
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LoopTiming {
    pub crossfade: f64,
    pub switch_crossfade: f64,
    pub loop_last: f64,
    pub start_fade: f64,
    pub stop_fade: f64,
}

impl From<&EngineConfig> for LoopTiming {
    fn from(config: &EngineConfig) -> Self {
        Self {
            crossfade: config.crossfade_seconds,
            switch_crossfade: config.switch_crossfade_seconds(),
            loop_last: config.loop_last_seconds,
            start_fade: config.start_fade_seconds,
            stop_fade: config.stop_fade_seconds,
        }
    }
}

/// Where the scheduler is in its state machine
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum LoopPhase {
    Idle,
    Playing,
    /// Loop crossfade in flight; the successor becomes current at `swap_at`
    Crossfading { swap_at: f64 },
    /// Stop fade in flight; units are released at `release_at`
    Stopping { release_at: f64 },
}

/// A unit fading out, released once the clock reaches `release_at`
#[derive(Debug)]
struct Retiring {
    unit: PlaybackUnit,
    release_at: f64,
}

/// Mutable state of one independently controlled audio layer
///
/// `pending` is `Some` only between scheduling a loop crossfade and the
/// deferred swap that promotes it.
#[derive(Debug, Default)]
pub struct EngineState {
    pub is_loaded: bool,
    pub is_playing: bool,
    pub current_clip_id: Option<ClipId>,
    pub current: Option<PlaybackUnit>,
    pub pending: Option<PlaybackUnit>,
    pub scheduled_end_time: f64,
    pub scheduling_in_flight: bool,
    swap_at: Option<f64>,
    retiring: Vec<Retiring>,
}

impl EngineState {
    /// Units still attached to the graph because they are fading out
    pub fn retiring_count(&self) -> usize {
        self.retiring.len()
    }
}

/// Loop region of a buffer for the configured `loop_last` length
///
/// Returns `(loop_start_offset, loop_duration)`.
pub fn loop_region(duration: f64, loop_last: f64) -> (f64, f64) {
    let start = if loop_last > 0.0 {
        (duration - loop_last).max(0.0)
    } else {
        0.0
    };
    (start, duration - start)
}

/// The loop engine core
#[derive(Debug)]
pub struct LoopScheduler {
    state: EngineState,
    factory: UnitFactory,
    curve: CrossfadeCurve,
    timing: LoopTiming,
    events: broadcast::Sender<LoopEvent>,
}

impl LoopScheduler {
    pub fn new(
        factory: UnitFactory,
        curve: CrossfadeCurve,
        timing: LoopTiming,
        events: broadcast::Sender<LoopEvent>,
    ) -> Self {
        Self {
            state: EngineState::default(),
            factory,
            curve,
            timing,
            events,
        }
    }

    pub fn state(&self) -> &EngineState {
        &self.state
    }

    pub fn timing(&self) -> LoopTiming {
        self.timing
    }

    pub fn set_loaded(&mut self, loaded: bool) {
        self.state.is_loaded = loaded;
    }

    pub fn phase(&self) -> LoopPhase {
        if self.state.is_playing {
            return match self.state.swap_at {
                Some(swap_at) => LoopPhase::Crossfading { swap_at },
                None => LoopPhase::Playing,
            };
        }
        self.state
            .retiring
            .iter()
            .map(|r| r.release_at)
            .reduce(f64::max)
            .map_or(LoopPhase::Idle, |release_at| LoopPhase::Stopping { release_at })
    }

    fn now(&self) -> f64 {
        self.factory.graph().now()
    }

    fn emit(&self, event: LoopEvent) {
        // No receivers is OK
        let _ = self.events.send(event);
    }

    /// Start `clip_id` from the top, replacing anything audible without a fade
    pub fn start(&mut self, clip_id: ClipId, buffer: Arc<SampleBuffer>) {
        self.release_all();

        let now = self.now();
        let mut unit = match self.factory.create(clip_id.clone(), buffer, 0.0) {
            Ok(unit) => unit,
            Err(e) => {
                warn!("Cannot start '{}': {}", clip_id, e);
                return;
            }
        };

        // Short attack so the very first sample does not click
        let _ = unit.set_gain_at(0.0, now);
        let _ = unit.ramp_gain(now, now + self.timing.start_fade, 1.0);
        if let Err(e) = unit.start_at(now) {
            warn!("Cannot start '{}': {}", clip_id, e);
            let _ = unit.release();
            return;
        }

        self.state.scheduled_end_time = unit.end_time();
        self.state.current = Some(unit);
        self.state.current_clip_id = Some(clip_id.clone());
        self.state.is_playing = true;
        self.state.scheduling_in_flight = false;
        self.state.swap_at = None;

        info!(
            "Playing '{}' (loop end at {:.3}s)",
            clip_id, self.state.scheduled_end_time
        );
        self.emit(LoopEvent::Started { clip_id });
    }

    /// One scheduler tick: run due deferred actions, then look ahead for the
    /// loop boundary
    pub fn tick(&mut self) {
        let now = self.now();
        self.run_deferred(now);

        if !self.state.is_playing || self.state.scheduling_in_flight {
            return;
        }

        // Negative means the tick arrived after the boundary; still scheduled
        let time_until_end = self.state.scheduled_end_time - now;
        if time_until_end <= 2.0 * self.timing.crossfade {
            self.schedule_loop_crossfade(now, time_until_end);
        }
    }

    fn run_deferred(&mut self, now: f64) {
        if !self.state.retiring.is_empty() {
            let (due, keep): (Vec<_>, Vec<_>) = std::mem::take(&mut self.state.retiring)
                .into_iter()
                .partition(|r| r.release_at <= now);
            self.state.retiring = keep;
            for retired in due {
                let _ = retired.unit.release();
            }
        }

        if self.state.swap_at.is_some_and(|swap_at| now >= swap_at) {
            self.complete_crossfade();
        }
    }

    fn schedule_loop_crossfade(&mut self, now: f64, time_until_end: f64) {
        let Some(current) = self.state.current.as_ref() else {
            return;
        };
        let clip_id = current.clip_id().clone();
        let buffer = Arc::clone(current.buffer());

        let (loop_start_offset, loop_duration) =
            loop_region(buffer.duration_seconds(), self.timing.loop_last);
        // Two crossfades must fit in one iteration
        let mut crossfade = self.timing.crossfade.min(loop_duration / 2.0);

        let end = self.state.scheduled_end_time;
        let mut crossfade_start = end - crossfade;
        if crossfade_start < now {
            if end > now {
                // Boundary already inside the window; finish the crossfade by it
                debug!(
                    "Loop boundary {:.1}ms away, crossfade shortened",
                    time_until_end * 1000.0
                );
                crossfade = end - now;
            } else {
                warn!(
                    "Loop tick late ({:.1}ms to boundary), crossfade starts now",
                    time_until_end * 1000.0
                );
            }
            crossfade_start = now;
        }

        self.state.scheduling_in_flight = true;

        let mut next = match self.factory.create(clip_id.clone(), buffer, loop_start_offset) {
            Ok(unit) => unit,
            Err(e) => {
                // Graph is gone; leave the in-flight guard set so we stop retrying
                warn!("Cannot schedule next loop of '{}': {}", clip_id, e);
                return;
            }
        };
        let _ = next.start_at(crossfade_start);

        let settles_at = current.automation_end();
        let settled = settles_at.map_or(true, |t| t <= crossfade_start)
            && current
                .gain_at(crossfade_start)
                .is_some_and(|g| g >= 1.0 - f32::EPSILON);
        if settled {
            // Identical window for both curves keeps the summed gain at 1.0
            let _ = next.apply_curve(self.curve.shared_fade_in(), crossfade_start, crossfade);
            let _ = current.apply_curve(self.curve.shared_fade_out(), crossfade_start, crossfade);
        } else {
            // Current is still fading in (switch or start attack); both halves
            // follow the gain that fade is heading for
            let span = settles_at.map_or(crossfade, |t| (t - crossfade_start).max(crossfade));
            let fade_in = self.shaped_fade(current, false, crossfade_start, crossfade, span);
            let _ = next.apply_curve(fade_in, crossfade_start, span);
            self.fade_out_over(current, crossfade_start, crossfade);
        }
        next.set_end_time(crossfade_start + loop_duration);

        debug!(
            "Scheduled loop of '{}': crossfade {:.3}s..{:.3}s, offset {:.3}s, region {:.3}s",
            clip_id,
            crossfade_start,
            crossfade_start + crossfade,
            loop_start_offset,
            loop_duration
        );

        self.state.scheduled_end_time = next.end_time();
        self.state.pending = Some(next);
        self.state.swap_at = Some(crossfade_start + crossfade);

        self.emit(LoopEvent::LoopScheduled {
            clip_id,
            crossfade_start,
            loop_start_offset,
            loop_duration,
        });
    }

    /// Promote `pending` to `current` once its crossfade has finished
    fn complete_crossfade(&mut self) {
        self.state.swap_at = None;
        if let Some(next) = self.state.pending.take() {
            let clip_id = next.clip_id().clone();
            let started_at = next.start_time();
            if let Some(old) = self.state.current.replace(next) {
                let _ = old.release();
            }
            debug!("Loop iteration of '{}' is now current", clip_id);
            self.emit(LoopEvent::LoopCompleted {
                clip_id,
                started_at,
            });
        }
        self.state.scheduling_in_flight = false;
    }

    /// Cross-fade from the current unit to `clip_id` starting now
    ///
    /// A pending loop iteration that has not started yet is dropped outright.
    /// Everything already audible fades out from the gain it was scheduled to
    /// have, so a switch in the middle of another transition does not jump.
    pub fn crossfade_to(&mut self, clip_id: ClipId, buffer: Arc<SampleBuffer>, start_offset: f64) {
        let now = self.now();
        let crossfade = self.timing.switch_crossfade;

        let mut next = match self.factory.create(clip_id.clone(), buffer, start_offset) {
            Ok(unit) => unit,
            Err(e) => {
                warn!("Cannot switch to '{}': {}", clip_id, e);
                return;
            }
        };

        let mut outgoing = Vec::new();
        if let Some(pending) = self.state.pending.take() {
            if pending.start_time() <= now {
                outgoing.push(pending);
            } else {
                let _ = pending.release();
                // Its fade-in will never happen, so neither may current's fade-out
                if let Some(current) = self.state.current.as_ref() {
                    let _ = current.cancel_automation(now);
                }
            }
        }
        self.state.swap_at = None;

        let from = self.state.current.as_ref().map(|old| old.clip_id().clone());
        outgoing.extend(self.state.current.take());

        let fade_end = now + crossfade;
        // Units still finishing an earlier switch keep their own release time
        for retiring in &self.state.retiring {
            if retiring.release_at > now {
                self.fade_out_over(&retiring.unit, now, crossfade);
            }
        }
        for unit in outgoing {
            self.fade_out_over(&unit, now, crossfade);
            let _ = unit.stop_at(fade_end);
            self.state.retiring.push(Retiring {
                unit,
                release_at: fade_end,
            });
        }

        let _ = next.start_at(now);
        let _ = next.apply_curve(self.curve.shared_fade_in(), now, crossfade);
        let start_offset = next.start_offset();

        self.state.scheduled_end_time = next.end_time();
        self.state.current = Some(next);
        self.state.current_clip_id = Some(clip_id.clone());
        self.state.is_playing = true;
        self.state.scheduling_in_flight = false;

        info!(
            "Switched to '{}' at offset {:.3}s ({:.3}s crossfade)",
            clip_id, start_offset, crossfade
        );
        if let Some(from) = from {
            self.emit(LoopEvent::Switched {
                from,
                to: clip_id,
                start_offset,
            });
        }
    }

    /// Gain table for `unit` over `start..start + span`: the gain it is
    /// already scheduled to follow, times a fade spanning the first
    /// `duration` seconds (held at its final value afterwards)
    fn shaped_fade(
        &self,
        unit: &PlaybackUnit,
        fade_out: bool,
        start: f64,
        duration: f64,
        span: f64,
    ) -> Arc<[f32]> {
        let base = self.curve.len().max(2);
        let steps = if duration > 0.0 && span > duration {
            ((base - 1) as f64 * span / duration).ceil() as usize + 1
        } else {
            base
        };

        (0..steps)
            .map(|i| {
                let t = start + span * i as f64 / (steps - 1) as f64;
                let s = if duration > 0.0 {
                    ((t - start) / duration).min(1.0) as f32
                } else {
                    1.0
                };
                let fade = if fade_out {
                    self.curve.sample_fade_out(s)
                } else {
                    self.curve.sample_fade_in(s)
                };
                unit.gain_at(t).unwrap_or(0.0) * fade
            })
            .collect()
    }

    /// Replace `unit`'s automation from `start` with a fade to silence that
    /// begins at whatever gain it was scheduled to have
    fn fade_out_over(&self, unit: &PlaybackUnit, start: f64, duration: f64) {
        let table = self.shaped_fade(unit, true, start, duration, duration);
        let _ = unit.cancel_automation(start);
        let _ = unit.apply_curve(table, start, duration);
    }

    /// Fade every live unit to silence, then release them
    ///
    /// Calling with nothing playing is a no-op.
    pub fn stop(&mut self) {
        if self.state.current.is_none() && self.state.pending.is_none() {
            debug!("Stop requested with nothing playing");
            return;
        }

        let now = self.now();
        let release_at = now + self.timing.stop_fade;

        let live: Vec<PlaybackUnit> = self
            .state
            .current
            .take()
            .into_iter()
            .chain(self.state.pending.take())
            .collect();
        for unit in live {
            fade_to_silence(&unit, now, release_at);
            self.state.retiring.push(Retiring { unit, release_at });
        }
        for retiring in self.state.retiring.iter_mut() {
            if retiring.release_at > release_at {
                fade_to_silence(&retiring.unit, now, release_at);
                retiring.release_at = release_at;
            }
        }

        self.clear_playing();
        info!("Stopping ({:.3}s fade-out)", self.timing.stop_fade);
        self.emit(LoopEvent::Stopped);
    }

    /// Release every unit immediately, without fading
    pub fn release_all(&mut self) {
        let units = self
            .state
            .current
            .take()
            .into_iter()
            .chain(self.state.pending.take())
            .chain(self.state.retiring.drain(..).map(|r| r.unit));
        for unit in units {
            let _ = unit.release();
        }
        self.clear_playing();
    }

    /// Release everything and close the shared graph
    pub fn teardown(&mut self) {
        self.release_all();
        self.factory.graph().close();
        info!("Loop scheduler torn down");
    }

    fn clear_playing(&mut self) {
        self.state.is_playing = false;
        self.state.current_clip_id = None;
        self.state.scheduled_end_time = 0.0;
        self.state.scheduling_in_flight = false;
        self.state.swap_at = None;
    }
}

fn fade_to_silence(unit: &PlaybackUnit, now: f64, until: f64) {
    let _ = unit.cancel_automation(now);
    let _ = unit.ramp_gain(now, until, 0.0);
    let _ = unit.stop_at(until);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::playback::graph::{AudioGraph, ManualClock};

    fn scheduler(timing: LoopTiming) -> (LoopScheduler, ManualClock, AudioGraph) {
        let (graph, clock) = AudioGraph::manual(1_000);
        let (tx, _) = broadcast::channel(16);
        let scheduler = LoopScheduler::new(
            UnitFactory::new(graph.clone()),
            CrossfadeCurve::generate(64),
            timing,
            tx,
        );
        (scheduler, clock, graph)
    }

    fn timing() -> LoopTiming {
        LoopTiming::from(&EngineConfig::default())
    }

    fn clip(seconds: f64) -> Arc<SampleBuffer> {
        Arc::new(SampleBuffer::constant(1.0, seconds, 1_000))
    }

    #[test]
    fn test_loop_region() {
        assert_eq!(loop_region(1.0, 0.0), (0.0, 1.0));
        let (start, duration) = loop_region(1.0, 0.3);
        assert!((start - 0.7).abs() < 1e-9);
        assert!((duration - 0.3).abs() < 1e-9);
        assert_eq!(loop_region(1.0, 5.0), (0.0, 1.0));
    }

    #[test]
    fn test_phases() {
        let (mut scheduler, clock, _graph) = scheduler(timing());
        assert_eq!(scheduler.phase(), LoopPhase::Idle);

        scheduler.start("a".into(), clip(1.0));
        assert_eq!(scheduler.phase(), LoopPhase::Playing);

        clock.set(0.61);
        scheduler.tick();
        assert!(matches!(scheduler.phase(), LoopPhase::Crossfading { .. }));

        scheduler.stop();
        assert!(matches!(scheduler.phase(), LoopPhase::Stopping { .. }));

        clock.set(0.8);
        scheduler.tick();
        assert_eq!(scheduler.phase(), LoopPhase::Idle);
    }

    #[test]
    fn test_no_crossfade_before_window() {
        let (mut scheduler, clock, _graph) = scheduler(timing());
        scheduler.start("a".into(), clip(1.0));

        clock.set(0.55);
        scheduler.tick();
        assert!(scheduler.state().pending.is_none());
        assert!(!scheduler.state().scheduling_in_flight);
    }

    #[test]
    fn test_crossfade_scheduled_against_boundary() {
        let (mut scheduler, clock, _graph) = scheduler(timing());
        scheduler.start("a".into(), clip(1.0));

        clock.set(0.65);
        scheduler.tick();

        let state = scheduler.state();
        let pending = state.pending.as_ref().unwrap();
        assert!(state.scheduling_in_flight);
        assert!((pending.start_time() - 0.8).abs() < 1e-9);
        assert!((state.scheduled_end_time - 1.8).abs() < 1e-9);
    }

    #[test]
    fn test_late_tick_clamps_to_now() {
        let (mut scheduler, clock, _graph) = scheduler(timing());
        scheduler.start("a".into(), clip(1.0));

        clock.set(1.05);
        scheduler.tick();

        let pending = scheduler.state().pending.as_ref().unwrap();
        assert!((pending.start_time() - 1.05).abs() < 1e-9);
        assert!((scheduler.state().scheduled_end_time - 2.05).abs() < 1e-9);
    }

    #[test]
    fn test_swap_promotes_pending() {
        let (mut scheduler, clock, graph) = scheduler(timing());
        scheduler.start("a".into(), clip(1.0));
        let first_voice = scheduler.state().current.as_ref().unwrap().voice();

        clock.set(0.65);
        scheduler.tick();
        let next_voice = scheduler.state().pending.as_ref().unwrap().voice();

        clock.set(1.0);
        scheduler.tick();

        let state = scheduler.state();
        assert!(state.pending.is_none());
        assert!(!state.scheduling_in_flight);
        assert_eq!(state.current.as_ref().unwrap().voice(), next_voice);
        assert_eq!(graph.gain_at(first_voice, 1.0), None);
        assert_eq!(graph.voice_count(), 1);
    }

    #[test]
    fn test_short_loop_region_shrinks_crossfade() {
        let mut timing = timing();
        timing.loop_last = 0.3;
        let (mut scheduler, clock, _graph) = scheduler(timing);
        scheduler.start("a".into(), clip(1.0));

        clock.set(0.65);
        scheduler.tick();

        // 0.3s region only fits a 0.15s crossfade at each end
        let pending = scheduler.state().pending.as_ref().unwrap();
        assert!((pending.start_time() - 0.85).abs() < 1e-9);
        assert!((pending.start_offset() - 0.7).abs() < 1e-9);
        assert!((pending.end_time() - pending.start_time() - 0.3).abs() < 1e-9);
    }

    #[test]
    fn test_loop_crossfade_follows_unfinished_switch_fade() {
        let (mut scheduler, clock, graph) = scheduler(timing());
        scheduler.start("a".into(), clip(1.0));

        clock.set(0.7);
        scheduler.crossfade_to("b".into(), clip(1.0), 0.7);
        // b ends at 1.0, so its loop crossfade (0.8..1.0) overlaps the switch fade (0.7..0.9)
        scheduler.tick();
        assert!((scheduler.state().pending.as_ref().unwrap().start_time() - 0.8).abs() < 1e-9);

        for i in 0..=60 {
            let t = 0.7 + i as f64 * 0.005;
            let gain = graph.audible_gain_at(t);
            assert!((gain - 1.0).abs() < 1e-3, "summed gain {} at {:.3}s", gain, t);
        }
    }

    #[test]
    fn test_boundary_inside_window_shortens_crossfade() {
        let (mut scheduler, clock, _graph) = scheduler(timing());
        scheduler.start("a".into(), clip(1.0));

        clock.set(0.9);
        scheduler.tick();

        let pending = scheduler.state().pending.as_ref().unwrap();
        assert!((pending.start_time() - 0.9).abs() < 1e-9);
        // Crossfade ends on the boundary instead of running past the buffer
        match scheduler.phase() {
            LoopPhase::Crossfading { swap_at } => assert!((swap_at - 1.0).abs() < 1e-9),
            other => panic!("unexpected phase {:?}", other),
        }
    }

    #[test]
    fn test_stop_fades_then_releases() {
        let (mut scheduler, clock, graph) = scheduler(timing());
        scheduler.start("a".into(), clip(1.0));
        clock.set(0.3);
        scheduler.stop();

        assert!(!scheduler.state().is_playing);
        assert_eq!(scheduler.state().current_clip_id, None);
        assert_eq!(graph.voice_count(), 1);
        assert!((graph.audible_gain_at(0.35) - 0.5).abs() < 1e-6);

        clock.set(0.4);
        scheduler.tick();
        assert_eq!(graph.voice_count(), 0);
    }

    #[test]
    fn test_teardown_closes_graph() {
        let (mut scheduler, _clock, graph) = scheduler(timing());
        scheduler.start("a".into(), clip(1.0));
        scheduler.teardown();

        assert!(graph.is_closed());
        assert!(!scheduler.state().is_playing);

        // Scheduling after teardown is a logged no-op
        scheduler.start("a".into(), clip(1.0));
        assert!(!scheduler.state().is_playing);
    }
}
