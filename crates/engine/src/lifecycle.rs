use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, RwLock};
use tokio::time::MissedTickBehavior;
use tracing::{info, warn};

use common::{EngineCommand, EngineState, PositionState};

use crate::controller::Controller;

/// Cloneable handle for steering a running engine.
#[derive(Clone)]
pub struct EngineHandle {
    command_tx: mpsc::Sender<EngineCommand>,
    state: Arc<RwLock<EngineState>>,
    position: Arc<RwLock<PositionState>>,
}

impl EngineHandle {
    pub async fn send(&self, cmd: EngineCommand) {
        let _ = self.command_tx.send(cmd).await;
    }

    pub async fn state(&self) -> EngineState {
        *self.state.read().await
    }

    /// Position as of the end of the last completed poll.
    pub async fn position(&self) -> PositionState {
        self.position.read().await.clone()
    }
}

/// The main engine: drives the controller on a fixed poll interval and
/// processes commands between polls.
pub struct Engine {
    controller: Controller,
    poll_interval: Duration,
    state: Arc<RwLock<EngineState>>,
    position: Arc<RwLock<PositionState>>,
    command_rx: mpsc::Receiver<EngineCommand>,
}

impl Engine {
    pub fn new(controller: Controller, poll_interval: Duration) -> (Self, EngineHandle) {
        let (command_tx, command_rx) = mpsc::channel(32);
        let state = Arc::new(RwLock::new(EngineState::Stopped));
        let position = Arc::new(RwLock::new(controller.state().clone()));

        let handle = EngineHandle {
            command_tx,
            state: state.clone(),
            position: position.clone(),
        };

        let engine = Engine {
            controller,
            poll_interval,
            state,
            position,
            command_rx,
        };

        (engine, handle)
    }

    /// Run until `Stop` arrives or every handle is dropped. A poll in
    /// progress always completes first. Call from `tokio::spawn`.
    pub async fn run(mut self) {
        info!(interval = ?self.poll_interval, "Engine running");
        *self.state.write().await = EngineState::Running;

        let mut ticker = tokio::time::interval(self.poll_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    if *self.state.read().await == EngineState::Paused {
                        continue;
                    }
                    self.controller.tick().await;
                    *self.position.write().await = self.controller.state().clone();
                }

                cmd = self.command_rx.recv() => match cmd {
                    Some(EngineCommand::Pause) => {
                        let current = *self.state.read().await;
                        if current == EngineState::Running {
                            info!("Engine paused, polling suspended");
                            *self.state.write().await = EngineState::Paused;
                        }
                    }

                    Some(EngineCommand::Resume) => {
                        let current = *self.state.read().await;
                        if current == EngineState::Paused {
                            info!("Engine resumed");
                            *self.state.write().await = EngineState::Running;
                        }
                    }

                    Some(EngineCommand::Stop) => {
                        info!(position = %self.controller.state(), "Engine stopping");
                        break;
                    }

                    None => {
                        warn!("Engine command channel closed, shutting down");
                        break;
                    }
                },
            }
        }

        *self.state.write().await = EngineState::Stopped;
    }
}
