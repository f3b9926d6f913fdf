//! Actor owning the piezo controller.
//!
//! The [`StageActor`] is the single owner of the [`PiezoController`] and runs
//! on its own Tokio task. It processes [`StageCommand`]s one at a time, so
//! monitor reads and user commands never interleave on the device. Callers
//! talk to it through a cloneable [`StageHandle`].
//!
//! # Example
//!
//! ```rust,ignore
//! let actor = StageActor::from_config(&config, Arc::new(backend));
//! let (handle, task) = actor.spawn();
//! handle.initialize(&CancelToken::never()).await?;
//! handle.set_closed_loop().await?;
//! let fit = handle.calibrate(&cancel).await?;
//! handle.shutdown().await?;
//! task.await?;
//! ```

use std::sync::Arc;

use piezo_core::cancel::CancelToken;
use piezo_core::capabilities::KinesisBackend;
use piezo_core::error::PiezoResult;
use piezo_core::units::{ControlMode, JogDirection};
use piezo_driver_thorlabs::{LinearFit, PiezoController};
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, info};

use crate::config::StageConfig;
use crate::messages::{StageCommand, StageError, StageResult};
use crate::monitor::MonitorSnapshot;

/// Capacity of the command channel.
pub const COMMAND_CAPACITY: usize = 32;

/// Owns the controller and the backend it was created from.
pub struct StageActor {
    controller: PiezoController,
    backend: Arc<dyn KinesisBackend>,
}

impl StageActor {
    /// Actor for an existing controller.
    pub fn new(controller: PiezoController, backend: Arc<dyn KinesisBackend>) -> Self {
        Self {
            controller,
            backend,
        }
    }

    /// Actor for the controller described by `config`.
    pub fn from_config(config: &StageConfig, backend: Arc<dyn KinesisBackend>) -> Self {
        let controller = PiezoController::new(
            config.controller.serial.clone(),
            config.controller.reader_serial.clone(),
        )
        .with_tuning(config.controller.tuning);
        Self::new(controller, backend)
    }

    /// Spawn the actor task.
    pub fn spawn(self) -> (StageHandle, JoinHandle<()>) {
        let (tx, rx) = mpsc::channel(COMMAND_CAPACITY);
        let task = tokio::spawn(self.run(rx));
        (StageHandle { tx }, task)
    }

    /// Process commands until shutdown or until every handle is dropped.
    pub async fn run(mut self, mut command_rx: mpsc::Receiver<StageCommand>) {
        info!(serial = %self.controller.serial(), "Stage actor started");

        while let Some(command) = command_rx.recv().await {
            debug!(command = command.name(), "Processing command");
            match command {
                StageCommand::Initialize { cancel, response } => {
                    let result = self
                        .controller
                        .initialize(self.backend.as_ref(), &cancel)
                        .await;
                    let _ = response.send(result);
                }

                StageCommand::Snapshot { response } => {
                    let snapshot = MonitorSnapshot::capture(&self.controller).await;
                    let _ = response.send(snapshot);
                }

                StageCommand::SetValue { value, response } => {
                    let _ = response.send(self.controller.set_value(value).await);
                }

                StageCommand::Jog {
                    direction,
                    response,
                } => {
                    let result = match direction {
                        JogDirection::Increase => self.controller.moveup().await,
                        JogDirection::Decrease => self.controller.movedown().await,
                    };
                    let _ = response.send(result);
                }

                StageCommand::MoveToHome { response } => {
                    let _ = response.send(self.controller.move_to_home().await);
                }

                StageCommand::SetControlMode { mode, response } => {
                    let _ = response.send(self.controller.set_control_mode(mode).await);
                }

                StageCommand::Calibrate { cancel, response } => {
                    let _ = response.send(self.controller.calibrate_pos(&cancel).await);
                }

                StageCommand::MoveToPos { position, response } => {
                    let _ = response.send(self.controller.move_to_pos(position).await);
                }

                StageCommand::StepPos {
                    direction,
                    response,
                } => {
                    let result = match direction {
                        JogDirection::Increase => self.controller.move_pos_up().await,
                        JogDirection::Decrease => self.controller.move_pos_down().await,
                    };
                    let _ = response.send(result);
                }

                StageCommand::MovePosToHome { response } => {
                    let _ = response.send(self.controller.move_pos_to_home().await);
                }

                StageCommand::SetZero { response } => {
                    let _ = response.send(self.controller.set_zero().await);
                }

                StageCommand::Shutdown { response } => {
                    let _ = response.send(());
                    break;
                }
            }
        }

        info!(serial = %self.controller.serial(), "Stage actor stopped");
    }
}

// =============================================================================
// StageHandle
// =============================================================================

/// Cloneable sender side of the actor.
#[derive(Debug, Clone)]
pub struct StageHandle {
    tx: mpsc::Sender<StageCommand>,
}

impl StageHandle {
    async fn request<T>(
        &self,
        (command, rx): (StageCommand, oneshot::Receiver<T>),
    ) -> StageResult<T> {
        self.tx
            .send(command)
            .await
            .map_err(|_| StageError::ActorStopped)?;
        rx.await.map_err(|_| StageError::ActorStopped)
    }

    async fn command<T>(
        &self,
        pair: (StageCommand, oneshot::Receiver<PiezoResult<T>>),
    ) -> StageResult<T> {
        Ok(self.request(pair).await??)
    }

    /// Whether the actor task is still receiving.
    pub fn is_running(&self) -> bool {
        !self.tx.is_closed()
    }

    /// Discover, connect and enable the controller and reader.
    pub async fn initialize(&self, cancel: &CancelToken) -> StageResult<()> {
        self.command(StageCommand::initialize(cancel.clone())).await
    }

    /// Capture a snapshot and wait for it.
    pub async fn snapshot(&self) -> StageResult<MonitorSnapshot> {
        self.request(StageCommand::snapshot()).await
    }

    /// Queue a snapshot request without waiting for the answer.
    pub async fn request_snapshot(&self) -> StageResult<oneshot::Receiver<MonitorSnapshot>> {
        let (command, rx) = StageCommand::snapshot();
        self.tx
            .send(command)
            .await
            .map_err(|_| StageError::ActorStopped)?;
        Ok(rx)
    }

    /// Percentage travel (closed loop) or output voltage (open loop).
    pub async fn set_value(&self, value: f64) -> StageResult<()> {
        self.command(StageCommand::set_value(value)).await
    }

    /// Jog up one step.
    pub async fn moveup(&self) -> StageResult<()> {
        self.command(StageCommand::jog(JogDirection::Increase)).await
    }

    /// Jog down one step.
    pub async fn movedown(&self) -> StageResult<()> {
        self.command(StageCommand::jog(JogDirection::Decrease)).await
    }

    /// Zero in the current mode.
    pub async fn move_to_home(&self) -> StageResult<()> {
        self.command(StageCommand::move_to_home()).await
    }

    /// Switch to `mode`.
    pub async fn set_control_mode(&self, mode: ControlMode) -> StageResult<()> {
        self.command(StageCommand::set_control_mode(mode)).await
    }

    /// Switch to closed loop.
    pub async fn set_closed_loop(&self) -> StageResult<()> {
        self.set_control_mode(ControlMode::ClosedLoop).await
    }

    /// Switch to open loop, discarding the calibration.
    pub async fn set_open_loop(&self) -> StageResult<()> {
        self.set_control_mode(ControlMode::OpenLoop).await
    }

    /// Run the two-point calibration.
    pub async fn calibrate(&self, cancel: &CancelToken) -> StageResult<LinearFit> {
        self.command(StageCommand::calibrate(cancel.clone())).await
    }

    /// Calibrated move to reader position `position`.
    pub async fn move_to_pos(&self, position: f64) -> StageResult<()> {
        self.command(StageCommand::move_to_pos(position)).await
    }

    /// Step one reader unit up. Returns whether a move was issued.
    pub async fn move_pos_up(&self) -> StageResult<bool> {
        self.command(StageCommand::step_pos(JogDirection::Increase))
            .await
    }

    /// Step one reader unit down. Returns whether a move was issued.
    pub async fn move_pos_down(&self) -> StageResult<bool> {
        self.command(StageCommand::step_pos(JogDirection::Decrease))
            .await
    }

    /// Calibrated move to reader position zero.
    pub async fn move_pos_to_home(&self) -> StageResult<()> {
        self.command(StageCommand::move_pos_to_home()).await
    }

    /// Start zeroing the reader.
    pub async fn set_zero(&self) -> StageResult<()> {
        self.command(StageCommand::set_zero()).await
    }

    /// Stop the actor.
    pub async fn shutdown(&self) -> StageResult<()> {
        self.request(StageCommand::shutdown()).await
    }
}
