//! Engine driver task
//!
//! Owns the [`LoopEngine`] and multiplexes the tick timer, user commands and
//! finished preloads on one task, so the engine is only ever mutated from a
//! single place. Loads run on their own tasks and report back over a
//! channel; a slow decode never delays a tick.

use crate::audio::buffer::{ClipId, ClipSource};
use crate::error::{Error, Result};
use crate::playback::controller::{EngineStatus, LoopEngine};
use crate::playback::registry::{load_clips, BufferLoader, LoadOutcome};
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio::time::{interval, MissedTickBehavior};
use tracing::{debug, info};

/// Depth of the command queue
const COMMAND_QUEUE_DEPTH: usize = 32;

/// Request for the driver task
#[derive(Debug)]
pub enum EngineCommand {
    Preload(Vec<ClipSource>),
    Play(ClipId),
    SwitchTo(ClipId),
    Stop,
    Status(oneshot::Sender<EngineStatus>),
    Shutdown,
}

/// Cloneable sender side of a running driver
#[derive(Debug, Clone)]
pub struct EngineHandle {
    tx: mpsc::Sender<EngineCommand>,
}

impl EngineHandle {
    async fn send(&self, command: EngineCommand) -> Result<()> {
        self.tx
            .send(command)
            .await
            .map_err(|_| Error::Internal("engine driver has shut down".to_string()))
    }

    pub async fn preload(&self, clips: Vec<ClipSource>) -> Result<()> {
        self.send(EngineCommand::Preload(clips)).await
    }

    pub async fn play(&self, clip_id: impl Into<ClipId>) -> Result<()> {
        self.send(EngineCommand::Play(clip_id.into())).await
    }

    pub async fn switch_to(&self, clip_id: impl Into<ClipId>) -> Result<()> {
        self.send(EngineCommand::SwitchTo(clip_id.into())).await
    }

    pub async fn stop(&self) -> Result<()> {
        self.send(EngineCommand::Stop).await
    }

    pub async fn status(&self) -> Result<EngineStatus> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.send(EngineCommand::Status(reply_tx)).await?;
        reply_rx
            .await
            .map_err(|_| Error::Internal("engine driver dropped status request".to_string()))
    }

    pub async fn shutdown(&self) -> Result<()> {
        self.send(EngineCommand::Shutdown).await
    }
}

/// Spawn the driver on the current runtime
pub fn spawn_engine(engine: LoopEngine, loader: Arc<dyn BufferLoader>) -> (EngineHandle, JoinHandle<()>) {
    let (tx, rx) = mpsc::channel(COMMAND_QUEUE_DEPTH);
    let task = tokio::spawn(run_engine(engine, loader, rx));
    (EngineHandle { tx }, task)
}

/// Run the engine until `Shutdown` arrives or every handle is dropped
///
/// The engine is torn down on exit.
pub async fn run_engine(
    mut engine: LoopEngine,
    loader: Arc<dyn BufferLoader>,
    mut commands: mpsc::Receiver<EngineCommand>,
) {
    let period = engine.config().tick_interval();
    let mut ticker = interval(period);
    // A stalled runtime must not replay a burst of ticks
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

    let (loaded_tx, mut loaded_rx) = mpsc::unbounded_channel::<Vec<LoadOutcome>>();

    info!("Engine driver running (tick every {:?})", period);

    loop {
        tokio::select! {
            _ = ticker.tick() => engine.tick(),

            Some(outcomes) = loaded_rx.recv() => {
                engine.install(outcomes);
            }

            command = commands.recv() => match command {
                Some(EngineCommand::Preload(clips)) => {
                    debug!("Preloading {} clips", clips.len());
                    engine.begin_preload(&clips);
                    let loader = Arc::clone(&loader);
                    let loaded_tx = loaded_tx.clone();
                    tokio::spawn(async move {
                        let outcomes = load_clips(loader.as_ref(), &clips).await;
                        let _ = loaded_tx.send(outcomes);
                    });
                }
                Some(EngineCommand::Play(clip_id)) => engine.play(clip_id),
                Some(EngineCommand::SwitchTo(clip_id)) => engine.switch_to(clip_id),
                Some(EngineCommand::Stop) => engine.stop(),
                Some(EngineCommand::Status(reply)) => {
                    let _ = reply.send(engine.status());
                }
                Some(EngineCommand::Shutdown) | None => break,
            },
        }
    }

    engine.teardown();
    info!("Engine driver stopped");
}
