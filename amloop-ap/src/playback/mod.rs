//! Loop playback
//!
//! Layered leaves first: the [`graph`] supplies clock and voices, the
//! [`registry`] holds decoded buffers, [`unit`] wraps one voice per loop
//! iteration, the [`scheduler`] keeps the loop seamless and the
//! [`controller`] exposes play/switch/stop. The [`driver`] runs it all on a
//! tokio task.

pub mod controller;
pub mod driver;
pub mod graph;
pub mod registry;
pub mod scheduler;
pub mod unit;

pub use controller::{EngineStatus, LoopEngine};
pub use driver::{run_engine, spawn_engine, EngineCommand, EngineHandle};
pub use graph::{AudioGraph, Clock, FrameClock, ManualClock, VoiceId};
pub use registry::{BufferLoader, BufferRegistry, LoadReport};
pub use scheduler::{EngineState, LoopPhase};
