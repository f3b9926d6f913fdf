//! Message types for the stage actor.
//!
//! Commands travel to the [`StageActor`](crate::actor::StageActor) over an
//! mpsc channel; each variant embeds a `oneshot::Sender` for its reply.
//!
//! ```text
//! CLI / Monitor                      Actor Task
//! -------------                      ----------
//! 1. Create command with oneshot
//! 2. Send via mpsc channel    ------>
//!                                    3. Receive command
//!                                    4. Drive the controller
//!                                    5. Send response
//! 6. Await oneshot receiver   <------
//! ```
//!
//! Every variant has a helper that builds the command and returns the
//! receiver:
//!
//! ```rust,ignore
//! let (cmd, rx) = StageCommand::set_value(12.5);
//! cmd_tx.send(cmd).await?;
//! rx.await??;
//! ```

use piezo_core::cancel::CancelToken;
use piezo_core::error::{PiezoError, PiezoResult};
use piezo_core::units::{ControlMode, JogDirection};
use piezo_driver_thorlabs::LinearFit;
use tokio::sync::oneshot;

use crate::monitor::MonitorSnapshot;

/// Errors seen by callers of the stage actor.
#[derive(Debug, thiserror::Error, PartialEq)]
pub enum StageError {
    /// The controller rejected or failed the operation.
    #[error(transparent)]
    Piezo(#[from] PiezoError),
    /// The actor task is gone; no command can be delivered.
    #[error("Stage actor is not running")]
    ActorStopped,
}

/// Result of a stage command as seen by a caller.
pub type StageResult<T> = Result<T, StageError>;

/// Commands processed sequentially by the stage actor.
#[derive(Debug)]
pub enum StageCommand {
    /// Discover, connect and enable the controller and its reader.
    Initialize {
        /// Checked at every settle step
        cancel: CancelToken,
        /// Initialization result
        response: oneshot::Sender<PiezoResult<()>>,
    },

    /// Capture a monitor snapshot. Never fails; read errors are carried in
    /// the snapshot.
    Snapshot {
        /// Snapshot of the controller and reader
        response: oneshot::Sender<MonitorSnapshot>,
    },

    /// Command percentage travel (closed loop) or output voltage (open loop).
    SetValue {
        /// Value in the unit of the current mode
        value: f64,
        /// Command result
        response: oneshot::Sender<PiezoResult<()>>,
    },

    /// Jog one configured step.
    Jog {
        /// Step direction
        direction: JogDirection,
        /// Command result
        response: oneshot::Sender<PiezoResult<()>>,
    },

    /// Command zero in the current mode.
    MoveToHome {
        /// Command result
        response: oneshot::Sender<PiezoResult<()>>,
    },

    /// Switch between open and closed loop.
    SetControlMode {
        /// Target mode
        mode: ControlMode,
        /// Command result
        response: oneshot::Sender<PiezoResult<()>>,
    },

    /// Run the two-point calibration.
    ///
    /// Holds the actor for the whole settle sequence; monitor requests queue
    /// behind it.
    Calibrate {
        /// Checked at every settle step
        cancel: CancelToken,
        /// Fit on success
        response: oneshot::Sender<PiezoResult<LinearFit>>,
    },

    /// Calibrated move to a reader position.
    MoveToPos {
        /// Target in reader units
        position: f64,
        /// Command result
        response: oneshot::Sender<PiezoResult<()>>,
    },

    /// Soft-bounded one-unit step in reader coordinates.
    StepPos {
        /// Step direction
        direction: JogDirection,
        /// Whether a move was issued
        response: oneshot::Sender<PiezoResult<bool>>,
    },

    /// Calibrated move to reader position zero.
    MovePosToHome {
        /// Command result
        response: oneshot::Sender<PiezoResult<()>>,
    },

    /// Start zeroing the reader.
    SetZero {
        /// Command result
        response: oneshot::Sender<PiezoResult<()>>,
    },

    /// Stop the actor after replying.
    Shutdown {
        /// Acknowledgement
        response: oneshot::Sender<()>,
    },
}

impl StageCommand {
    /// Helper to create an Initialize command
    pub fn initialize(cancel: CancelToken) -> (Self, oneshot::Receiver<PiezoResult<()>>) {
        let (tx, rx) = oneshot::channel();
        (
            Self::Initialize {
                cancel,
                response: tx,
            },
            rx,
        )
    }

    /// Helper to create a Snapshot command
    pub fn snapshot() -> (Self, oneshot::Receiver<MonitorSnapshot>) {
        let (tx, rx) = oneshot::channel();
        (Self::Snapshot { response: tx }, rx)
    }

    /// Helper to create a SetValue command
    pub fn set_value(value: f64) -> (Self, oneshot::Receiver<PiezoResult<()>>) {
        let (tx, rx) = oneshot::channel();
        (Self::SetValue { value, response: tx }, rx)
    }

    /// Helper to create a Jog command
    pub fn jog(direction: JogDirection) -> (Self, oneshot::Receiver<PiezoResult<()>>) {
        let (tx, rx) = oneshot::channel();
        (
            Self::Jog {
                direction,
                response: tx,
            },
            rx,
        )
    }

    /// Helper to create a MoveToHome command
    pub fn move_to_home() -> (Self, oneshot::Receiver<PiezoResult<()>>) {
        let (tx, rx) = oneshot::channel();
        (Self::MoveToHome { response: tx }, rx)
    }

    /// Helper to create a SetControlMode command
    pub fn set_control_mode(mode: ControlMode) -> (Self, oneshot::Receiver<PiezoResult<()>>) {
        let (tx, rx) = oneshot::channel();
        (Self::SetControlMode { mode, response: tx }, rx)
    }

    /// Helper to create a Calibrate command
    pub fn calibrate(cancel: CancelToken) -> (Self, oneshot::Receiver<PiezoResult<LinearFit>>) {
        let (tx, rx) = oneshot::channel();
        (
            Self::Calibrate {
                cancel,
                response: tx,
            },
            rx,
        )
    }

    /// Helper to create a MoveToPos command
    pub fn move_to_pos(position: f64) -> (Self, oneshot::Receiver<PiezoResult<()>>) {
        let (tx, rx) = oneshot::channel();
        (
            Self::MoveToPos {
                position,
                response: tx,
            },
            rx,
        )
    }

    /// Helper to create a StepPos command
    pub fn step_pos(direction: JogDirection) -> (Self, oneshot::Receiver<PiezoResult<bool>>) {
        let (tx, rx) = oneshot::channel();
        (
            Self::StepPos {
                direction,
                response: tx,
            },
            rx,
        )
    }

    /// Helper to create a MovePosToHome command
    pub fn move_pos_to_home() -> (Self, oneshot::Receiver<PiezoResult<()>>) {
        let (tx, rx) = oneshot::channel();
        (Self::MovePosToHome { response: tx }, rx)
    }

    /// Helper to create a SetZero command
    pub fn set_zero() -> (Self, oneshot::Receiver<PiezoResult<()>>) {
        let (tx, rx) = oneshot::channel();
        (Self::SetZero { response: tx }, rx)
    }

    /// Helper to create a Shutdown command
    pub fn shutdown() -> (Self, oneshot::Receiver<()>) {
        let (tx, rx) = oneshot::channel();
        (Self::Shutdown { response: tx }, rx)
    }

    /// Short name for logging.
    pub fn name(&self) -> &'static str {
        match self {
            Self::Initialize { .. } => "initialize",
            Self::Snapshot { .. } => "snapshot",
            Self::SetValue { .. } => "set_value",
            Self::Jog { .. } => "jog",
            Self::MoveToHome { .. } => "move_to_home",
            Self::SetControlMode { .. } => "set_control_mode",
            Self::Calibrate { .. } => "calibrate",
            Self::MoveToPos { .. } => "move_to_pos",
            Self::StepPos { .. } => "step_pos",
            Self::MovePosToHome { .. } => "move_pos_to_home",
            Self::SetZero { .. } => "set_zero",
            Self::Shutdown { .. } => "shutdown",
        }
    }
}
