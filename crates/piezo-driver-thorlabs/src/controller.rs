//! T-Cube piezo controller with optional strain gauge feedback.
//!
//! The controller value is mode dependent: in closed loop it is percentage
//! travel, in open loop the output voltage. The mode is re-queried from the
//! device on every call and never cached.
//!
//! With a [`StrainReader`] attached the controller can be calibrated
//! ([`PiezoController::calibrate_pos`]) and then positioned in reader units
//! ([`PiezoController::move_to_pos`]).
//!
//! # Example
//!
//! ```rust,ignore
//! let mut controller = PiezoController::new("81858318", Some("84858066".into()));
//! controller.initialize(&backend, &CancelToken::never()).await?;
//! controller.set_closed_loop().await?;
//! controller.calibrate_pos(&CancelToken::never()).await?;
//! controller.move_to_pos(5.0).await?;
//! ```

use serde::{Deserialize, Serialize};
use tracing::instrument;

use piezo_core::cancel::CancelToken;
use piezo_core::capabilities::{KinesisBackend, PiezoDriver, PiezoSettings};
use piezo_core::error::{PiezoError, PiezoResult};
use piezo_core::limits::{
    CALIBRATION_HIGH_PERCENT, CALIBRATION_LEAD_IN, CALIBRATION_LOW_PERCENT,
    CALIBRATION_PARK_POSITION, CALIBRATION_SAMPLE_GAP, CALIBRATION_SETTLE, MAX_OUTPUT_VOLTAGE,
    PERCENTAGE_STEP, POSITION_STEP, SOFT_TRAVEL_MAX, SOFT_TRAVEL_MIN, VOLTAGE_STEP,
};
use piezo_core::units::{ControlMode, JogDirection, Unit, VoltageSource};

use crate::calibration::{CalibrationModel, CalibrationPoint, LinearFit};
use crate::session::{discover_devices, DeviceSession, SessionStage, SessionTiming};
use crate::strain_reader::StrainReader;

// =============================================================================
// Tuning
// =============================================================================

/// Settings applied (never persisted) right after configuration.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PiezoTuning {
    /// Output voltage ceiling in volts.
    pub max_output_voltage: f64,
    /// Open-loop jog step in volts.
    pub voltage_step: f64,
    /// Closed-loop jog step in percent.
    pub percentage_step: f64,
}

impl Default for PiezoTuning {
    fn default() -> Self {
        Self {
            max_output_voltage: MAX_OUTPUT_VOLTAGE,
            voltage_step: VOLTAGE_STEP,
            percentage_step: PERCENTAGE_STEP,
        }
    }
}

impl PiezoTuning {
    fn apply_to(&self, settings: &mut PiezoSettings) {
        settings.max_output_voltage = self.max_output_voltage;
        settings.voltage_step = self.voltage_step;
        settings.percentage_step = self.percentage_step;
    }
}

/// Controller value with the unit and mode it was read in.
///
/// All three come from one mode query, so the unit always matches the value.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct ValueReading {
    /// Percentage travel or output voltage.
    pub value: f64,
    /// `%` in closed loop, `V` in open loop.
    pub unit: Unit,
    /// Mode the value was read in.
    pub mode: ControlMode,
}

// =============================================================================
// PiezoController
// =============================================================================

/// Piezo controller owning its session, optional reader and calibration.
pub struct PiezoController {
    session: DeviceSession,
    device: Option<Box<dyn PiezoDriver>>,
    settings: Option<PiezoSettings>,
    reader_serial: Option<String>,
    reader: Option<StrainReader>,
    calibration: CalibrationModel,
    tuning: PiezoTuning,
    timing: SessionTiming,
}

impl std::fmt::Debug for PiezoController {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PiezoController")
            .field("session", &self.session)
            .field("settings", &self.settings)
            .field("reader", &self.reader)
            .field("calibration", &self.calibration)
            .field("tuning", &self.tuning)
            .finish_non_exhaustive()
    }
}

impl PiezoController {
    /// Controller for `serial` with an optional reader, not yet initialized.
    pub fn new(serial: impl Into<String>, reader_serial: Option<String>) -> Self {
        let timing = SessionTiming::default();
        Self {
            session: DeviceSession::new("piezo", serial, timing),
            device: None,
            settings: None,
            reader_serial,
            reader: None,
            calibration: CalibrationModel::new(),
            tuning: PiezoTuning::default(),
            timing,
        }
    }

    /// Use `tuning` instead of the default 75 V / 1 V / 1 %.
    pub fn with_tuning(mut self, tuning: PiezoTuning) -> Self {
        self.tuning = tuning;
        self
    }

    /// Use `timing` for the controller and reader sessions.
    pub fn with_timing(mut self, timing: SessionTiming) -> Self {
        self.timing = timing;
        self.session = DeviceSession::new("piezo", self.session.serial().to_string(), timing);
        self
    }

    /// Serial of the controller.
    pub fn serial(&self) -> &str {
        self.session.serial()
    }

    /// Lifecycle stage of the controller.
    pub fn stage(&self) -> SessionStage {
        self.session.stage()
    }

    /// Whether commands may be issued.
    pub fn is_enabled(&self) -> bool {
        self.session.is_enabled() && self.device.is_some()
    }

    /// Serial of the configured reader, if any.
    pub fn reader_serial(&self) -> Option<&str> {
        self.reader_serial.as_deref()
    }

    /// Attached reader, once initialization got as far as creating it.
    pub fn reader(&self) -> Option<&StrainReader> {
        self.reader.as_ref()
    }

    /// Current calibration state.
    pub fn calibration(&self) -> &CalibrationModel {
        &self.calibration
    }

    /// Settings captured at initialization, as last written.
    pub fn settings(&self) -> Option<&PiezoSettings> {
        self.settings.as_ref()
    }

    // -------------------------------------------------------------------------
    // Initialization
    // -------------------------------------------------------------------------

    /// Discover, connect and enable the controller, apply tuning, then bring
    /// up the reader if one is configured.
    ///
    /// A reader failure does not fail the controller: it is logged, the
    /// reader is left in its failed state and reader-backed operations report
    /// `NotConnected`.
    #[instrument(skip_all, fields(serial = %self.session.serial()))]
    pub async fn initialize(
        &mut self,
        backend: &dyn KinesisBackend,
        cancel: &CancelToken,
    ) -> PiezoResult<()> {
        let serial = self.session.serial().to_string();

        let serials = match discover_devices(backend).await {
            Ok(serials) => serials,
            Err(err) => {
                self.session.fail(&err);
                return Err(err);
            }
        };
        if !serials.contains(&serial) {
            tracing::warn!(discovered = ?serials, "Controller serial not in device list");
        }

        let Some(device) = backend.create_piezo(&serial) else {
            let err = PiezoError::NullDevice {
                device: "piezo",
                serial,
            };
            self.session.fail(&err);
            return Err(err);
        };
        tracing::info!("Piezo controller created");

        self.session.connect_and_enable(device.as_ref(), cancel).await?;

        if let Err(err) = device.load_piezo_configuration(&serial).await {
            return Err(self.session.fail_with(err));
        }
        let mut settings = match device.settings().await {
            Ok(settings) => settings,
            Err(err) => return Err(self.session.fail_with(err)),
        };
        self.tuning.apply_to(&mut settings);
        if let Err(err) = device.apply_settings(&settings, false).await {
            return Err(self.session.fail_with(err));
        }
        tracing::info!(
            max_output_voltage = settings.max_output_voltage,
            voltage_step = settings.voltage_step,
            percentage_step = settings.percentage_step,
            "Tuning applied"
        );
        self.settings = Some(settings);
        self.device = Some(device);

        if let Some(reader_serial) = self.reader_serial.clone() {
            let mut reader = StrainReader::new(reader_serial, self.timing);
            let result = reader.initialize(backend, cancel).await;
            self.reader = Some(reader);
            match result {
                Ok(()) => {}
                Err(PiezoError::Cancelled) => return Err(PiezoError::Cancelled),
                Err(err) => tracing::error!(error = %err, "Strain reader unavailable"),
            }
        }
        Ok(())
    }

    fn device(&self) -> PiezoResult<&dyn PiezoDriver> {
        self.session.ensure_enabled()?;
        self.device
            .as_deref()
            .ok_or_else(|| self.session.not_connected())
    }

    fn reader_ref(&self) -> PiezoResult<&StrainReader> {
        self.session.ensure_enabled()?;
        self.reader.as_ref().ok_or(PiezoError::ReaderNotConfigured)
    }

    /// Reader that reached `Enabled`, checked before anything moves.
    fn enabled_reader(&self) -> PiezoResult<&StrainReader> {
        let reader = self.reader_ref()?;
        if !reader.is_enabled() {
            return Err(reader.session().not_connected());
        }
        Ok(reader)
    }

    /// Live reader position to step from.
    async fn step_origin(&self) -> PiezoResult<f64> {
        let reader = self.enabled_reader()?;
        let value = reader.get_position().await?;
        if !value.is_finite() {
            tracing::warn!(serial = %reader.serial(), value, "Non-finite reader position; not stepping");
            return Err(PiezoError::InvalidReading {
                serial: reader.serial().to_string(),
                value,
            });
        }
        Ok(value)
    }

    // -------------------------------------------------------------------------
    // Poll-safe reads
    // -------------------------------------------------------------------------

    /// Live closed-loop status.
    pub async fn is_closed_loop(&self) -> PiezoResult<bool> {
        Ok(self.device()?.is_closed_loop().await?)
    }

    /// Live control mode.
    pub async fn control_mode(&self) -> PiezoResult<ControlMode> {
        Ok(if self.is_closed_loop().await? {
            ControlMode::ClosedLoop
        } else {
            ControlMode::OpenLoop
        })
    }

    /// Percentage travel in closed loop, output voltage in open loop.
    pub async fn get_value(&self) -> PiezoResult<f64> {
        Ok(self.read_value().await?.value)
    }

    /// `%` in closed loop, `V` in open loop.
    pub async fn get_units(&self) -> PiezoResult<Unit> {
        Ok(self.control_mode().await?.value_unit())
    }

    /// Value, unit and mode from a single mode query.
    pub async fn read_value(&self) -> PiezoResult<ValueReading> {
        let device = self.device()?;
        let mode = self.control_mode().await?;
        let value = match mode {
            ControlMode::ClosedLoop => device.percentage_travel().await?,
            ControlMode::OpenLoop => device.output_voltage().await?,
        };
        Ok(ValueReading {
            value,
            unit: mode.value_unit(),
            mode,
        })
    }

    /// Reader position passthrough.
    pub async fn get_pos(&self) -> PiezoResult<f64> {
        self.reader_ref()?.get_position().await
    }

    /// Whether the reader is zeroing.
    pub async fn is_zeroing(&self) -> PiezoResult<bool> {
        self.reader_ref()?.is_zeroing().await
    }

    // -------------------------------------------------------------------------
    // Commands
    // -------------------------------------------------------------------------

    /// Query the mode for a command, dropping the calibration if the device
    /// left closed loop behind our back.
    async fn observe_mode(&mut self) -> PiezoResult<ControlMode> {
        let mode = self.control_mode().await?;
        if mode == ControlMode::OpenLoop && self.calibration.invalidate() {
            tracing::warn!(serial = %self.serial(), "Controller left closed loop; calibration discarded");
        }
        Ok(mode)
    }

    /// Command percentage travel (closed loop) or output voltage (open loop).
    pub async fn set_value(&mut self, value: f64) -> PiezoResult<()> {
        let mode = self.observe_mode().await?;
        let device = self.device()?;
        match mode {
            ControlMode::ClosedLoop => device.set_percentage_travel(value).await?,
            ControlMode::OpenLoop => device.set_output_voltage(value).await?,
        }
        tracing::debug!(value, ?mode, "Value commanded");
        Ok(())
    }

    /// Jog up one configured step.
    pub async fn moveup(&self) -> PiezoResult<()> {
        Ok(self.device()?.jog(JogDirection::Increase).await?)
    }

    /// Jog down one configured step.
    pub async fn movedown(&self) -> PiezoResult<()> {
        Ok(self.device()?.jog(JogDirection::Decrease).await?)
    }

    /// Command zero in the current mode.
    pub async fn move_to_home(&mut self) -> PiezoResult<()> {
        self.set_value(0.0).await
    }

    /// Switch to closed loop. Each step is skipped when already in place.
    pub async fn set_closed_loop(&mut self) -> PiezoResult<()> {
        self.switch_mode(ControlMode::ClosedLoop).await
    }

    /// Switch to open loop and discard the calibration.
    pub async fn set_open_loop(&mut self) -> PiezoResult<()> {
        self.session.ensure_enabled()?;
        if self.calibration.invalidate() {
            tracing::info!(serial = %self.serial(), "Calibration discarded for open loop");
        }
        self.switch_mode(ControlMode::OpenLoop).await
    }

    /// Set `mode` through `ControlMode` or back to open loop.
    pub async fn set_control_mode(&mut self, mode: ControlMode) -> PiezoResult<()> {
        match mode {
            ControlMode::ClosedLoop => self.set_closed_loop().await,
            ControlMode::OpenLoop => self.set_open_loop().await,
        }
    }

    #[instrument(skip(self), fields(serial = %self.session.serial()))]
    async fn switch_mode(&mut self, target: ControlMode) -> PiezoResult<()> {
        self.session.ensure_enabled()?;
        let Some(device) = self.device.as_deref() else {
            return Err(self.session.not_connected());
        };
        let Some(settings) = self.settings.as_mut() else {
            return Err(self.session.not_connected());
        };

        if device.voltage_source().await? != VoltageSource::SoftwareAndPotentiometer {
            device
                .set_voltage_source(VoltageSource::SoftwareAndPotentiometer)
                .await?;
            tracing::debug!("Voltage source set to software and potentiometer");
        }

        let hub = target.hub_input();
        if device.io_settings().await?.hub_analogue_input != hub {
            settings.hub_mode = hub;
            device.apply_settings(settings, false).await?;
            tracing::debug!(hub = ?hub, "Hub analogue input changed");
        }

        if device.position_control_mode().await? != target {
            device.set_position_control_mode(target).await?;
            tracing::info!(mode = %target, "Position control mode changed");
        }
        Ok(())
    }

    /// Calibrate reader units against percentage travel.
    ///
    /// Needs closed loop and an enabled reader; a dead reader is refused
    /// before the stage moves. Commands 10 % and 70 % in turn, samples
    /// the reader after each settle, fits the line and parks the stage at
    /// reader position 1. The previous calibration is dropped on entry, so a
    /// failed or cancelled run leaves the model unset.
    #[instrument(skip_all, fields(serial = %self.session.serial()))]
    pub async fn calibrate_pos(&mut self, cancel: &CancelToken) -> PiezoResult<LinearFit> {
        self.session.ensure_enabled()?;
        self.enabled_reader()?;
        self.calibration.invalidate();

        cancel.sleep(CALIBRATION_LEAD_IN).await?;
        if !self.is_closed_loop().await? {
            tracing::warn!("Calibration requires closed loop");
            return Err(PiezoError::WrongMode {
                expected: ControlMode::ClosedLoop,
            });
        }

        let low = self.sample_at(CALIBRATION_LOW_PERCENT, cancel).await?;
        cancel.sleep(CALIBRATION_SAMPLE_GAP).await?;
        let high = self.sample_at(CALIBRATION_HIGH_PERCENT, cancel).await?;
        cancel.sleep(CALIBRATION_SAMPLE_GAP).await?;

        let fit = match self.calibration.fit_points(low, high) {
            Ok(fit) => fit,
            Err(err) => {
                tracing::error!(error = %err, "Calibration failed");
                return Err(err);
            }
        };
        tracing::info!(slope = fit.slope, intercept = fit.intercept, "Calibration complete");

        self.move_to_pos(CALIBRATION_PARK_POSITION).await?;
        Ok(fit)
    }

    async fn sample_at(
        &self,
        percentage: f64,
        cancel: &CancelToken,
    ) -> PiezoResult<CalibrationPoint> {
        self.device()?.set_percentage_travel(percentage).await?;
        cancel.sleep(CALIBRATION_SETTLE).await?;
        let reader_position = self.reader_ref()?.get_position().await?;
        tracing::debug!(percentage, reader_position, "Calibration sample");
        Ok(CalibrationPoint {
            percentage,
            reader_position,
        })
    }

    /// Move to reader position `position` through the calibration.
    pub async fn move_to_pos(&mut self, position: f64) -> PiezoResult<()> {
        self.session.ensure_enabled()?;
        if !self.calibration.is_calibrated() {
            return Err(PiezoError::ModelNotCalibrated);
        }
        if self.observe_mode().await? != ControlMode::ClosedLoop {
            return Err(PiezoError::ModelNotCalibrated);
        }
        let percentage = self.calibration.percentage_for(position)?;
        self.device()?.set_percentage_travel(percentage).await?;
        tracing::debug!(position, percentage, "Calibrated move");
        Ok(())
    }

    /// Step one reader unit up unless the live reading is at or above the
    /// soft maximum. Returns whether a move was issued. A non-finite reading
    /// is [`PiezoError::InvalidReading`].
    pub async fn move_pos_up(&mut self) -> PiezoResult<bool> {
        let reading = self.step_origin().await?;
        if reading >= SOFT_TRAVEL_MAX {
            tracing::debug!(reading, "At soft maximum; not stepping up");
            return Ok(false);
        }
        self.move_to_pos(reading + POSITION_STEP).await?;
        Ok(true)
    }

    /// Step one reader unit down unless the live reading is at or below the
    /// soft minimum. Returns whether a move was issued.
    pub async fn move_pos_down(&mut self) -> PiezoResult<bool> {
        let reading = self.step_origin().await?;
        if reading <= SOFT_TRAVEL_MIN {
            tracing::debug!(reading, "At soft minimum; not stepping down");
            return Ok(false);
        }
        self.move_to_pos(reading - POSITION_STEP).await?;
        Ok(true)
    }

    /// Calibrated move to reader position zero.
    pub async fn move_pos_to_home(&mut self) -> PiezoResult<()> {
        self.move_to_pos(0.0).await
    }

    /// Zero the reader. Reader coordinates shift, so the calibration is dropped.
    pub async fn set_zero(&mut self) -> PiezoResult<()> {
        self.reader_ref()?.set_zero().await?;
        if self.calibration.invalidate() {
            tracing::info!(serial = %self.serial(), "Calibration discarded after zeroing");
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_tuning() {
        let tuning = PiezoTuning::default();
        assert_eq!(tuning.max_output_voltage, 75.0);
        assert_eq!(tuning.voltage_step, 1.0);
        assert_eq!(tuning.percentage_step, 1.0);
    }

    #[test]
    fn test_new_controller_is_disconnected() {
        let controller = PiezoController::new("81858318", None);
        assert_eq!(controller.stage(), SessionStage::Disconnected);
        assert!(!controller.is_enabled());
        assert!(controller.reader().is_none());
        assert!(!controller.calibration().is_calibrated());
    }

    #[tokio::test]
    async fn test_uninitialized_controller_refuses_everything() {
        let mut controller = PiezoController::new("81858318", Some("84858066".into()));
        let not_connected = |r: PiezoResult<()>| matches!(r, Err(PiezoError::NotConnected { .. }));

        assert!(matches!(controller.get_value().await, Err(PiezoError::NotConnected { .. })));
        assert!(not_connected(controller.set_value(3.0).await));
        assert!(not_connected(controller.moveup().await));
        assert!(not_connected(controller.set_closed_loop().await));
        assert!(not_connected(controller.set_open_loop().await));
        assert!(not_connected(controller.move_to_pos(1.0).await));
        assert!(matches!(
            controller.calibrate_pos(&CancelToken::never()).await,
            Err(PiezoError::NotConnected { .. })
        ));
    }
}
