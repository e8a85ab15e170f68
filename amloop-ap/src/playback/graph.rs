//! Shared audio clock and voice graph
//!
//! The graph is the playback-device abstraction the scheduler drives. It
//! offers a monotonic clock and a table of voices, each a buffer reader with
//! a sample-accurate start/stop and its own gain automation timeline.
//!
//! All scheduling is expressed in absolute clock seconds. The graph never
//! reorders or rejects future events; it simply evaluates them when it
//! renders, so a crossfade scheduled ahead of time lands on the exact frame
//! regardless of when the scheduling call was made.
//!
//! # Clocks
//!
//! - [`ManualClock`]: advanced explicitly (tests, offline rendering)
//! - [`FrameClock`]: advanced by the output callback, one frame at a time

use crate::audio::buffer::SampleBuffer;
use crate::error::SchedulingConflict;
use amloop_common::fade_curves::sample_table;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, TryLockError};
use tracing::{debug, trace};

/// Handle on one voice in the graph
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct VoiceId(u64);

/// Monotonic clock in seconds
pub trait Clock: Send + Sync {
    fn now(&self) -> f64;
}

/// Clock advanced by hand
///
/// Clones share the same time.
#[derive(Debug, Clone, Default)]
pub struct ManualClock {
    bits: Arc<AtomicU64>,
}

impl ManualClock {
    pub fn new() -> Self {
        Self::default()
    }

    /// Jump to absolute time `t` (must not go backwards)
    pub fn set(&self, t: f64) {
        debug_assert!(t >= self.now(), "clock must be monotonic");
        self.bits.store(t.to_bits(), Ordering::SeqCst);
    }

    pub fn advance(&self, seconds: f64) {
        self.set(self.now() + seconds);
    }
}

impl Clock for ManualClock {
    fn now(&self) -> f64 {
        f64::from_bits(self.bits.load(Ordering::SeqCst))
    }
}

/// Clock counting frames delivered to an output device
#[derive(Debug, Clone)]
pub struct FrameClock {
    frames: Arc<AtomicU64>,
    sample_rate: u32,
}

impl FrameClock {
    pub fn new(sample_rate: u32) -> Self {
        Self {
            frames: Arc::new(AtomicU64::new(0)),
            sample_rate,
        }
    }

    pub fn frames(&self) -> u64 {
        self.frames.load(Ordering::Acquire)
    }

    pub fn advance(&self, frames: u64) {
        self.frames.fetch_add(frames, Ordering::AcqRel);
    }
}

impl Clock for FrameClock {
    fn now(&self) -> f64 {
        amloop_common::timing::frames_to_seconds(self.frames(), self.sample_rate)
    }
}

#[derive(Debug, Clone)]
enum GainEvent {
    /// Jump to `value` at `at`
    Set { at: f64, value: f32 },
    /// Linear ramp from the previous event to `value`, arriving at `end`
    Ramp { end: f64, value: f32 },
    /// Follow `values` evenly spread over `start..start + duration`,
    /// holding from `cut` on
    Curve {
        start: f64,
        duration: f64,
        cut: f64,
        values: Arc<[f32]>,
    },
}

impl GainEvent {
    /// Ordering key within the timeline
    fn time(&self) -> f64 {
        match self {
            GainEvent::Set { at, .. } => *at,
            GainEvent::Ramp { end, .. } => *end,
            GainEvent::Curve { start, .. } => *start,
        }
    }

    /// Time at which the event stops influencing the gain
    fn end_time(&self) -> f64 {
        match self {
            GainEvent::Set { at, .. } => *at,
            GainEvent::Ramp { end, .. } => *end,
            GainEvent::Curve { cut, .. } => *cut,
        }
    }
}

/// Gain automation timeline for one voice
#[derive(Debug, Clone)]
pub struct GainEnvelope {
    initial: f32,
    events: Vec<GainEvent>,
}

impl GainEnvelope {
    pub fn new(initial: f32) -> Self {
        Self {
            initial,
            events: Vec::new(),
        }
    }

    pub fn set_value_at(&mut self, value: f32, at: f64) {
        self.insert(GainEvent::Set { at, value });
    }

    /// Ramp linearly from the preceding event's value, reaching `value` at `end`
    pub fn linear_ramp_to(&mut self, value: f32, end: f64) {
        self.insert(GainEvent::Ramp { end, value });
    }

    /// Follow a gain table over `start..start + duration`
    ///
    /// A non-positive duration degenerates to a jump to the table's last value.
    pub fn set_value_curve(&mut self, values: Arc<[f32]>, start: f64, duration: f64) {
        if duration <= 0.0 || values.is_empty() {
            let last = values.last().copied().unwrap_or(self.value_at(start));
            self.set_value_at(last, start);
            return;
        }
        self.insert(GainEvent::Curve {
            start,
            duration,
            cut: start + duration,
            values,
        });
    }

    /// Time the last scheduled event finishes, if any are scheduled
    pub fn automation_end(&self) -> Option<f64> {
        self.events.iter().map(GainEvent::end_time).reduce(f64::max)
    }

    /// Drop every event still active at or after `at`, holding the gain
    /// reached at `at`
    pub fn cancel_and_hold(&mut self, at: f64) {
        let held = self.value_at(at);
        self.events.retain_mut(|event| {
            if event.end_time() < at {
                return true;
            }
            // Still running at `at`: keep the part before it
            match event {
                GainEvent::Curve { start, cut, .. } if *start < at => {
                    *cut = at;
                    true
                }
                GainEvent::Ramp { end, value } => {
                    *end = at;
                    *value = held;
                    true
                }
                _ => false,
            }
        });
        self.set_value_at(held, at);
    }

    /// Gain at clock time `t`
    pub fn value_at(&self, t: f64) -> f32 {
        let mut value = self.initial;
        let mut anchor = f64::NEG_INFINITY;

        for event in &self.events {
            match event {
                GainEvent::Set { at, value: v } => {
                    if t < *at {
                        return value;
                    }
                    value = *v;
                    anchor = *at;
                }
                GainEvent::Ramp { end, value: target } => {
                    if t >= *end {
                        value = *target;
                        anchor = *end;
                        continue;
                    }
                    // No preceding event to ramp from: hold until the end
                    if !anchor.is_finite() || t <= anchor {
                        return value;
                    }
                    let frac = ((t - anchor) / (end - anchor)) as f32;
                    return value + (target - value) * frac;
                }
                GainEvent::Curve {
                    start,
                    duration,
                    cut,
                    values,
                } => {
                    if t < *start {
                        return value;
                    }
                    let at = t.min(*cut);
                    let sampled = sample_table(values, ((at - start) / duration) as f32);
                    if t < *cut {
                        return sampled;
                    }
                    value = sampled;
                    anchor = *cut;
                }
            }
        }

        value
    }

    fn insert(&mut self, event: GainEvent) {
        let key = event.time();
        let idx = self.events.partition_point(|e| e.time() <= key);
        self.events.insert(idx, event);
    }
}

#[derive(Debug, Clone, Copy)]
struct VoiceStart {
    when: f64,
    offset: f64,
}

#[derive(Debug)]
struct Voice {
    buffer: Arc<SampleBuffer>,
    start: Option<VoiceStart>,
    stop_at: Option<f64>,
    gain: GainEnvelope,
}

impl Voice {
    /// Buffer position in seconds at clock time `t`, if the voice is sounding
    fn position_at(&self, t: f64) -> Option<f64> {
        let start = self.start?;
        if t < start.when || self.stop_at.is_some_and(|stop| t >= stop) {
            return None;
        }
        let position = start.offset + (t - start.when);
        (position < self.buffer.duration_seconds()).then_some(position)
    }
}

/// Voices attached to the graph
///
/// Rendered by the output callback; mutated by the scheduler through
/// [`AudioGraph`].
#[derive(Debug, Default)]
pub struct VoiceTable {
    voices: HashMap<VoiceId, Voice>,
    next_id: u64,
    closed: bool,
}

impl VoiceTable {
    /// Render from a real-time thread without waiting for the scheduler
    ///
    /// Writes silence and returns false when the table is locked elsewhere.
    pub fn try_render_shared(
        table: &Mutex<VoiceTable>,
        out: &mut [f32],
        channels: usize,
        sample_rate: u32,
        start_time: f64,
    ) -> bool {
        let guard = match table.try_lock() {
            Ok(guard) => guard,
            Err(TryLockError::Poisoned(poisoned)) => poisoned.into_inner(),
            Err(TryLockError::WouldBlock) => {
                out.fill(0.0);
                return false;
            }
        };
        guard.render(out, channels, sample_rate, start_time);
        true
    }

    /// Mix every sounding voice into `out` (interleaved, `channels` wide)
    ///
    /// `start_time` is the clock time of the first frame in `out`.
    pub fn render(&self, out: &mut [f32], channels: usize, sample_rate: u32, start_time: f64) {
        out.fill(0.0);
        if channels == 0 || sample_rate == 0 {
            return;
        }

        let rate = sample_rate as f64;
        for voice in self.voices.values() {
            let buffer_rate = voice.buffer.sample_rate() as f64;
            for (i, frame) in out.chunks_mut(channels).enumerate() {
                let t = start_time + i as f64 / rate;
                let Some(position) = voice.position_at(t) else {
                    continue;
                };
                let Some((left, right)) = voice.buffer.frame_at(position * buffer_rate) else {
                    continue;
                };
                let gain = voice.gain.value_at(t);
                if channels == 1 {
                    frame[0] += 0.5 * (left + right) * gain;
                } else {
                    frame[0] += left * gain;
                    frame[1] += right * gain;
                }
            }
        }
    }
}

/// Shared audio clock plus voice table
///
/// Cheap to clone; clones address the same graph.
#[derive(Clone)]
pub struct AudioGraph {
    clock: Arc<dyn Clock>,
    voices: Arc<Mutex<VoiceTable>>,
    sample_rate: u32,
}

impl std::fmt::Debug for AudioGraph {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AudioGraph")
            .field("now", &self.now())
            .field("sample_rate", &self.sample_rate)
            .field("voices", &self.voice_count())
            .finish()
    }
}

impl AudioGraph {
    pub fn new(clock: Arc<dyn Clock>, sample_rate: u32) -> Self {
        Self {
            clock,
            voices: Arc::new(Mutex::new(VoiceTable::default())),
            sample_rate,
        }
    }

    /// Graph on a hand-advanced clock, for simulation and offline rendering
    pub fn manual(sample_rate: u32) -> (Self, ManualClock) {
        let clock = ManualClock::new();
        (Self::new(Arc::new(clock.clone()), sample_rate), clock)
    }

    pub fn now(&self) -> f64 {
        self.clock.now()
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    pub(crate) fn voice_table(&self) -> Arc<Mutex<VoiceTable>> {
        Arc::clone(&self.voices)
    }

    fn table(&self) -> MutexGuard<'_, VoiceTable> {
        // A panic elsewhere never leaves the table half-updated
        self.voices.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn with_voice<R>(
        &self,
        id: VoiceId,
        f: impl FnOnce(&mut Voice) -> Result<R, SchedulingConflict>,
    ) -> Result<R, SchedulingConflict> {
        let mut table = self.table();
        if table.closed {
            return Err(SchedulingConflict::GraphClosed);
        }
        let voice = table
            .voices
            .get_mut(&id)
            .ok_or(SchedulingConflict::Disconnected(id))?;
        f(voice)
    }

    /// Attach a silent, unstarted voice reading `buffer`
    pub fn create_voice(&self, buffer: Arc<SampleBuffer>) -> Result<VoiceId, SchedulingConflict> {
        let mut table = self.table();
        if table.closed {
            return Err(SchedulingConflict::GraphClosed);
        }
        let id = VoiceId(table.next_id);
        table.next_id += 1;
        table.voices.insert(
            id,
            Voice {
                buffer,
                start: None,
                stop_at: None,
                gain: GainEnvelope::new(0.0),
            },
        );
        trace!("Created voice {:?}", id);
        Ok(id)
    }

    /// Begin reading at `offset` seconds into the buffer at clock time `when`
    pub fn start_voice(&self, id: VoiceId, when: f64, offset: f64) -> Result<(), SchedulingConflict> {
        self.with_voice(id, |voice| {
            if voice.start.is_some() {
                return Err(SchedulingConflict::AlreadyStarted(id));
            }
            voice.start = Some(VoiceStart {
                when,
                offset: offset.max(0.0),
            });
            Ok(())
        })
    }

    /// Silence the voice from clock time `when`
    ///
    /// Moving an existing stop earlier is allowed; anything else conflicts.
    pub fn stop_voice(&self, id: VoiceId, when: f64) -> Result<(), SchedulingConflict> {
        self.with_voice(id, |voice| match voice.stop_at {
            Some(existing) if existing <= when => Err(SchedulingConflict::AlreadyStopped(id)),
            _ => {
                voice.stop_at = Some(when);
                Ok(())
            }
        })
    }

    pub fn set_gain_at(&self, id: VoiceId, value: f32, at: f64) -> Result<(), SchedulingConflict> {
        self.with_voice(id, |voice| {
            voice.gain.set_value_at(value, at);
            Ok(())
        })
    }

    /// Ramp linearly from whatever the gain is at `from` to `target` at `to`
    pub fn ramp_gain(
        &self,
        id: VoiceId,
        from: f64,
        to: f64,
        target: f32,
    ) -> Result<(), SchedulingConflict> {
        self.with_voice(id, |voice| {
            let current = voice.gain.value_at(from);
            voice.gain.set_value_at(current, from);
            if to > from {
                voice.gain.linear_ramp_to(target, to);
            } else {
                voice.gain.set_value_at(target, from);
            }
            Ok(())
        })
    }

    pub fn set_gain_curve(
        &self,
        id: VoiceId,
        values: Arc<[f32]>,
        start: f64,
        duration: f64,
    ) -> Result<(), SchedulingConflict> {
        self.with_voice(id, |voice| {
            voice.gain.set_value_curve(values, start, duration);
            Ok(())
        })
    }

    /// Cancel automation not yet applied at `at`, holding the current gain
    pub fn cancel_gain(&self, id: VoiceId, at: f64) -> Result<(), SchedulingConflict> {
        self.with_voice(id, |voice| {
            voice.gain.cancel_and_hold(at);
            Ok(())
        })
    }

    /// Detach the voice; its id becomes invalid
    pub fn disconnect(&self, id: VoiceId) -> Result<(), SchedulingConflict> {
        let mut table = self.table();
        if table.closed {
            return Err(SchedulingConflict::GraphClosed);
        }
        table
            .voices
            .remove(&id)
            .map(|_| trace!("Disconnected voice {:?}", id))
            .ok_or(SchedulingConflict::Disconnected(id))
    }

    /// When the voice's gain automation settles
    pub fn automation_end(&self, id: VoiceId) -> Option<f64> {
        self.table().voices.get(&id).and_then(|v| v.gain.automation_end())
    }

    /// Scheduled gain of a connected voice at clock time `t`
    pub fn gain_at(&self, id: VoiceId, t: f64) -> Option<f32> {
        self.table().voices.get(&id).map(|v| v.gain.value_at(t))
    }

    /// Whether the voice is producing samples at clock time `t`
    pub fn is_sounding(&self, id: VoiceId, t: f64) -> bool {
        self.table()
            .voices
            .get(&id)
            .is_some_and(|v| v.position_at(t).is_some())
    }

    /// Sum of the gains of every voice sounding at clock time `t`
    pub fn audible_gain_at(&self, t: f64) -> f32 {
        self.table()
            .voices
            .values()
            .filter(|v| v.position_at(t).is_some())
            .map(|v| v.gain.value_at(t))
            .sum()
    }

    /// Number of connected voices
    pub fn voice_count(&self) -> usize {
        self.table().voices.len()
    }

    /// Render `out` starting at clock time `start_time`
    pub fn render(&self, out: &mut [f32], channels: usize, start_time: f64) {
        self.table().render(out, channels, self.sample_rate, start_time);
    }

    /// Release the graph: every voice is dropped and further scheduling
    /// reports [`SchedulingConflict::GraphClosed`]
    pub fn close(&self) {
        let mut table = self.table();
        if !table.closed {
            debug!("Closing audio graph ({} voices)", table.voices.len());
            table.voices.clear();
            table.closed = true;
        }
    }

    pub fn is_closed(&self) -> bool {
        self.table().closed
    }
}
