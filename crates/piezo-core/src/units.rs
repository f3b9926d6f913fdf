//! Units, control modes and the numeric codes the driver uses for them.

use serde::{Deserialize, Serialize};

use crate::error::{PiezoError, PiezoResult};

// =============================================================================
// Control Mode
// =============================================================================

/// Position control mode of the piezo controller.
///
/// Closed loop servoes the stage on the strain gauge feedback and is commanded
/// in percentage of travel. Open loop drives the output voltage directly.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ControlMode {
    /// Output voltage drive, no feedback.
    OpenLoop,
    /// Feedback-servoed percentage travel.
    ClosedLoop,
}

impl ControlMode {
    /// Driver code for `SetPositionControlMode`.
    pub fn code(self) -> i32 {
        match self {
            ControlMode::OpenLoop => 1,
            ControlMode::ClosedLoop => 2,
        }
    }

    /// Parse a driver position control mode code.
    pub fn from_code(code: i32) -> Option<Self> {
        match code {
            1 => Some(ControlMode::OpenLoop),
            2 => Some(ControlMode::ClosedLoop),
            _ => None,
        }
    }

    /// Hub analogue input the controller must read in this mode.
    pub fn hub_input(self) -> HubAnalogueInput {
        match self {
            ControlMode::OpenLoop => HubAnalogueInput::AnalogueInput1,
            ControlMode::ClosedLoop => HubAnalogueInput::ExternalSma,
        }
    }

    /// Unit the controller value is expressed in while in this mode.
    pub fn value_unit(self) -> Unit {
        match self {
            ControlMode::OpenLoop => Unit::Volts,
            ControlMode::ClosedLoop => Unit::Percent,
        }
    }
}

impl std::fmt::Display for ControlMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ControlMode::OpenLoop => write!(f, "open-loop"),
            ControlMode::ClosedLoop => write!(f, "closed-loop"),
        }
    }
}

// =============================================================================
// Units
// =============================================================================

/// Unit of a reported value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Unit {
    /// Percentage of full travel (closed-loop controller value).
    Percent,
    /// Volts (open-loop controller value or reader voltage display).
    Volts,
    /// Micrometres (reader position display).
    Micrometers,
    /// Newtons (reader force display).
    Newtons,
}

impl Unit {
    /// Symbol rendered next to a value.
    pub fn symbol(self) -> &'static str {
        match self {
            Unit::Percent => "%",
            Unit::Volts => "V",
            Unit::Micrometers => "μm",
            Unit::Newtons => "N",
        }
    }

    /// Map a strain gauge display mode code to its unit.
    ///
    /// Codes 1, 2 and 3 are position, voltage and force. Anything else is
    /// reported as [`PiezoError::UnitsUnrecognized`].
    pub fn from_display_mode(code: i32) -> PiezoResult<Self> {
        match code {
            1 => Ok(Unit::Micrometers),
            2 => Ok(Unit::Volts),
            3 => Ok(Unit::Newtons),
            code => Err(PiezoError::UnitsUnrecognized { code }),
        }
    }
}

impl std::fmt::Display for Unit {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.symbol())
    }
}

// =============================================================================
// Driver Codes
// =============================================================================

/// Jog direction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JogDirection {
    /// Extend the stage (driver code 1).
    Increase,
    /// Retract the stage (driver code 2).
    Decrease,
}

impl JogDirection {
    /// Driver code for `Jog`.
    pub fn code(self) -> i32 {
        match self {
            JogDirection::Increase => 1,
            JogDirection::Decrease => 2,
        }
    }
}

/// Source the controller takes its output voltage demand from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VoltageSource {
    /// Software commands only (code 0).
    SoftwareOnly,
    /// External input signal (code 1).
    ExternalSignal,
    /// Software commands and the front panel potentiometer (code 2).
    SoftwareAndPotentiometer,
    /// All sources summed (code 3).
    All,
}

impl VoltageSource {
    /// Driver code for `SetVoltageSource`.
    pub fn code(self) -> i32 {
        match self {
            VoltageSource::SoftwareOnly => 0,
            VoltageSource::ExternalSignal => 1,
            VoltageSource::SoftwareAndPotentiometer => 2,
            VoltageSource::All => 3,
        }
    }
}

/// Hub analogue input the controller reads its feedback from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HubAnalogueInput {
    /// Hub analogue channel 1 (code 1).
    AnalogueInput1,
    /// Hub analogue channel 2 (code 2).
    AnalogueInput2,
    /// Rear-panel SMA input (code 3).
    ExternalSma,
}

impl HubAnalogueInput {
    /// Driver code for the hub mode setting.
    pub fn code(self) -> i32 {
        match self {
            HubAnalogueInput::AnalogueInput1 => 1,
            HubAnalogueInput::AnalogueInput2 => 2,
            HubAnalogueInput::ExternalSma => 3,
        }
    }
}
