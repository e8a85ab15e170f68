//! Clip switching integration tests

mod helpers;

use amloop_ap::{EngineConfig, LoopEvent};
use helpers::{drain, engine_with, run_ticks};

#[tokio::test]
async fn test_switch_preserves_phase() {
    let (mut engine, clock) = engine_with(EngineConfig::default(), &[("a", 2.0), ("b", 4.0)]).await;
    engine.play("a");

    run_ticks(&mut engine, &clock, 0.0, 1.0, 0.01, |_, _| {});
    engine.switch_to("b");

    let current = engine.state().current.as_ref().expect("current unit");
    assert_eq!(current.clip_id().as_str(), "b");
    assert!((current.start_offset() - 2.0).abs() < 1e-6);
    assert!((engine.state().scheduled_end_time - 3.0).abs() < 1e-6);
    assert!(!engine.state().scheduling_in_flight);
}

#[tokio::test]
async fn test_switch_crossfades_from_now() {
    let (mut engine, clock) = engine_with(EngineConfig::default(), &[("a", 2.0), ("b", 4.0)]).await;
    engine.play("a");
    run_ticks(&mut engine, &clock, 0.0, 1.0, 0.01, |_, _| {});
    engine.switch_to("b");

    let graph = engine.graph().clone();
    for at in [1.0, 1.05, 1.1, 1.15, 1.2, 1.3] {
        let gain = graph.audible_gain_at(at);
        assert!((gain - 1.0).abs() < 1e-3, "summed gain {} at {:.2}s", gain, at);
    }

    // Outgoing clip is released once its fade is over
    run_ticks(&mut engine, &clock, 1.0, 1.3, 0.01, |_, _| {});
    assert_eq!(graph.voice_count(), 1);
    assert_eq!(engine.state().retiring_count(), 0);
}

#[tokio::test]
async fn test_switch_cancels_pending_iteration() {
    let (mut engine, clock) = engine_with(EngineConfig::default(), &[("a", 2.0), ("b", 4.0)]).await;
    let mut events = engine.subscribe();
    engine.play("a");

    // Loop crossfade for a's boundary at 2.0 is scheduled but not audible yet
    run_ticks(&mut engine, &clock, 0.0, 1.7, 0.01, |_, _| {});
    assert!(engine.state().pending.is_some());
    assert!(engine.state().scheduling_in_flight);

    engine.switch_to("b");
    assert!(engine.state().pending.is_none());
    assert!(!engine.state().scheduling_in_flight);
    // a (fading out) and b
    assert_eq!(engine.graph().voice_count(), 2);

    let switched = drain(&mut events).into_iter().find_map(|e| match e {
        LoopEvent::Switched { from, to, .. } => Some((from, to)),
        _ => None,
    });
    let (from, to) = switched.expect("Switched event");
    assert_eq!(from.as_str(), "a");
    assert_eq!(to.as_str(), "b");

    // No stale swap promotes the cancelled iteration later
    run_ticks(&mut engine, &clock, 1.7, 2.5, 0.01, |engine, _| {
        assert_eq!(engine.current_clip_id().map(|c| c.as_str()), Some("b"));
    });
    assert_eq!(engine.graph().voice_count(), 1);
}

#[tokio::test]
async fn test_switch_loops_new_clip() {
    let (mut engine, clock) = engine_with(EngineConfig::default(), &[("a", 1.0), ("b", 1.0)]).await;
    let mut events = engine.subscribe();
    engine.play("a");
    run_ticks(&mut engine, &clock, 0.0, 0.5, 0.01, |_, _| {});
    engine.switch_to("b");

    // b started at offset 0.5 and must loop at 0.5s from now
    run_ticks(&mut engine, &clock, 0.5, 1.5, 0.005, |engine, t| {
        if t > 0.5 + engine.config().switch_crossfade_seconds() {
            let gain = engine.graph().audible_gain_at(t);
            assert!((gain - 1.0).abs() < 1e-3, "summed gain {} at {:.3}s", gain, t);
        }
    });

    let completed: Vec<_> = drain(&mut events)
        .into_iter()
        .filter_map(|e| match e {
            LoopEvent::LoopCompleted { clip_id, .. } => Some(clip_id),
            _ => None,
        })
        .collect();
    assert_eq!(completed.len(), 1);
    assert_eq!(completed[0].as_str(), "b");
}

#[tokio::test]
async fn test_switch_to_failed_clip_keeps_playing() {
    let (mut engine, _clock) = engine_with(EngineConfig::default(), &[("a", 1.0)]).await;
    engine.play("a");
    engine.switch_to("missing");

    assert!(engine.is_playing());
    assert_eq!(engine.current_clip_id().map(|c| c.as_str()), Some("a"));
    assert_eq!(engine.graph().voice_count(), 1);
}

/// Assert the summed gain is unity at each tick and half a step after it
fn assert_unity(engine: &amloop_ap::LoopEngine, t: f64, step: f64) {
    for at in [t, t + step / 2.0] {
        let gain = engine.graph().audible_gain_at(at);
        assert!((gain - 1.0).abs() < 1e-3, "summed gain {} at {:.4}s", gain, at);
    }
}

#[tokio::test]
async fn test_switch_late_in_phase_keeps_unity_gain() {
    let (mut engine, clock) = engine_with(EngineConfig::default(), &[("a", 1.0), ("b", 1.0)]).await;
    engine.play("a");
    run_ticks(&mut engine, &clock, 0.0, 0.7, 0.01, |_, _| {});

    // b starts at offset 0.7 with only 0.3s left, so its own loop crossfade
    // begins before the switch fade has finished
    engine.switch_to("b");
    run_ticks(&mut engine, &clock, 0.7, 1.4, 0.005, |engine, t| {
        assert_unity(engine, t, 0.005);
    });

    assert_eq!(engine.current_clip_id().map(|c| c.as_str()), Some("b"));
    assert_eq!(engine.state().retiring_count(), 0);
}

#[tokio::test]
async fn test_switch_during_audible_loop_crossfade() {
    let (mut engine, clock) = engine_with(EngineConfig::default(), &[("a", 1.0), ("b", 4.0)]).await;
    let mut events = engine.subscribe();
    engine.play("a");

    // a's loop crossfade runs 0.8..1.0; both iterations are sounding at 0.9
    run_ticks(&mut engine, &clock, 0.0, 0.9, 0.01, |_, _| {});
    let pending_start = engine.state().pending.as_ref().expect("pending").start_time();
    assert!(pending_start < 0.9);

    engine.switch_to("b");
    assert!(engine.state().pending.is_none());
    assert!(!engine.state().scheduling_in_flight);
    assert_eq!(engine.graph().voice_count(), 3);
    assert_unity(&engine, 0.9, 0.005);

    run_ticks(&mut engine, &clock, 0.9, 1.5, 0.005, |engine, t| {
        assert_unity(engine, t, 0.005);
    });

    // Both a units were released once the switch fade ended
    assert_eq!(engine.state().retiring_count(), 0);
    assert_eq!(engine.graph().voice_count(), 1);
    assert_eq!(engine.current_clip_id().map(|c| c.as_str()), Some("b"));

    let switched = drain(&mut events)
        .into_iter()
        .any(|e| matches!(e, LoopEvent::Switched { ref from, .. } if from.as_str() == "a"));
    assert!(switched);
}
