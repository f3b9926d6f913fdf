//! Simulated T-Cube piezo controller.
//!
//! Closed loop positions the stage by percentage travel, open loop by output
//! voltage scaled against the configured voltage ceiling. Both drive the same
//! [`SimulatedAxis`](crate::mock_backend::SimulatedAxis) extension.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use piezo_core::capabilities::{DeviceInfo, IoSettings, KinesisDevice, PiezoDriver, PiezoSettings};
use piezo_core::error::{DriverError, DriverErrorKind, DriverResult};
use piezo_core::units::{ControlMode, HubAnalogueInput, JogDirection, VoltageSource};

use crate::journal::DriverCall;
use crate::mock_backend::{DeviceContext, SimulatedLifecycle, PIEZO_DRIVER};

/// Settings a controller powers up with before any tuning.
pub const FACTORY_SETTINGS: PiezoSettings = PiezoSettings {
    max_output_voltage: 150.0,
    voltage_step: 5.0,
    percentage_step: 5.0,
    hub_mode: HubAnalogueInput::AnalogueInput1,
};

#[derive(Debug)]
struct PiezoState {
    settings: PiezoSettings,
    persisted: Option<PiezoSettings>,
    voltage_source: VoltageSource,
    control_mode: ControlMode,
}

#[derive(Debug)]
struct PiezoInner {
    lifecycle: SimulatedLifecycle,
    state: Mutex<PiezoState>,
}

/// Simulated piezo controller. Clones share the same device.
#[derive(Debug, Clone)]
pub struct MockPiezo {
    inner: Arc<PiezoInner>,
}

impl MockPiezo {
    pub(crate) fn new(ctx: DeviceContext, settings_ready_on_connect: bool) -> Self {
        Self {
            inner: Arc::new(PiezoInner {
                lifecycle: SimulatedLifecycle::new(
                    ctx,
                    PIEZO_DRIVER,
                    "TPZ001",
                    settings_ready_on_connect,
                ),
                state: Mutex::new(PiezoState {
                    settings: FACTORY_SETTINGS,
                    persisted: None,
                    voltage_source: VoltageSource::SoftwareOnly,
                    control_mode: ControlMode::OpenLoop,
                }),
            }),
        }
    }

    /// Serial of this controller.
    pub fn serial(&self) -> &str {
        &self.inner.lifecycle.ctx.serial
    }

    /// Whether the output is enabled.
    pub fn is_enabled(&self) -> bool {
        self.inner.lifecycle.is_enabled()
    }

    /// Whether a connection is open.
    pub fn is_connected(&self) -> bool {
        self.inner.lifecycle.is_connected()
    }

    /// Whether the configuration was loaded.
    pub fn is_configured(&self) -> bool {
        self.inner.lifecycle.is_configured()
    }

    /// Polling interval requested by `start_polling`.
    pub fn polling_interval(&self) -> Option<Duration> {
        self.inner.lifecycle.polling_interval()
    }

    /// Settings currently applied on the device.
    pub fn applied_settings(&self) -> PiezoSettings {
        self.inner.state.lock().settings
    }

    /// Settings stored as startup defaults, if any write persisted them.
    pub fn persisted_settings(&self) -> Option<PiezoSettings> {
        self.inner.state.lock().persisted
    }

    /// Active position control mode.
    pub fn control_mode(&self) -> ControlMode {
        self.inner.state.lock().control_mode
    }

    /// Active voltage source.
    pub fn current_voltage_source(&self) -> VoltageSource {
        self.inner.state.lock().voltage_source
    }

    /// Change the control mode behind the controller's back, as the front
    /// panel would.
    pub fn force_control_mode(&self, mode: ControlMode) {
        self.inner.state.lock().control_mode = mode;
    }

    /// Put the device straight into `mode` with matching source and hub input.
    pub fn preset_mode(&self, mode: ControlMode) {
        let mut state = self.inner.state.lock();
        state.control_mode = mode;
        state.voltage_source = VoltageSource::SoftwareAndPotentiometer;
        state.settings.hub_mode = mode.hub_input();
    }

    fn ctx(&self) -> &DeviceContext {
        &self.inner.lifecycle.ctx
    }

    async fn call(&self, operation: &'static str) -> DriverResult<()> {
        self.ctx().call(PIEZO_DRIVER, operation).await
    }

    fn voltage_for(extension: f64, max_output_voltage: f64) -> f64 {
        extension / 100.0 * max_output_voltage
    }

    fn wrong_mode(&self, operation: &str, mode: ControlMode) -> DriverError {
        DriverError::new(
            PIEZO_DRIVER,
            DriverErrorKind::InvalidParameter,
            format!("{} is not available in {} mode", operation, mode),
        )
    }
}

#[async_trait]
impl KinesisDevice for MockPiezo {
    async fn connect(&self, serial: &str) -> DriverResult<()> {
        self.inner.lifecycle.connect(serial).await
    }

    async fn is_settings_initialized(&self) -> DriverResult<bool> {
        self.inner.lifecycle.is_settings_initialized().await
    }

    async fn wait_for_settings_initialized(&self, timeout: Duration) -> DriverResult<()> {
        self.inner
            .lifecycle
            .wait_for_settings_initialized(timeout)
            .await
    }

    async fn start_polling(&self, interval: Duration) -> DriverResult<()> {
        self.inner.lifecycle.start_polling(interval).await
    }

    async fn enable_device(&self) -> DriverResult<()> {
        self.inner.lifecycle.enable_device().await
    }

    async fn device_info(&self) -> DriverResult<DeviceInfo> {
        self.inner.lifecycle.device_info().await
    }
}

#[async_trait]
impl PiezoDriver for MockPiezo {
    async fn load_piezo_configuration(&self, serial: &str) -> DriverResult<()> {
        self.inner
            .lifecycle
            .load_configuration(serial, "load_piezo_configuration")
            .await
    }

    async fn settings(&self) -> DriverResult<PiezoSettings> {
        self.call("settings").await?;
        self.inner.lifecycle.require_connected()?;
        Ok(self.inner.state.lock().settings)
    }

    async fn apply_settings(&self, settings: &PiezoSettings, persist: bool) -> DriverResult<()> {
        self.ctx().record(DriverCall::ApplySettings {
            settings: *settings,
            persist,
        });
        self.call("apply_settings").await?;
        self.inner.lifecycle.require_connected()?;
        if settings.max_output_voltage <= 0.0 {
            return Err(DriverError::new(
                PIEZO_DRIVER,
                DriverErrorKind::InvalidParameter,
                "max output voltage must be positive",
            ));
        }
        let mut state = self.inner.state.lock();
        state.settings = *settings;
        if persist {
            state.persisted = Some(*settings);
        }
        Ok(())
    }

    async fn output_voltage(&self) -> DriverResult<f64> {
        self.call("output_voltage").await?;
        self.inner.lifecycle.require_connected()?;
        let max = self.inner.state.lock().settings.max_output_voltage;
        Ok(Self::voltage_for(self.ctx().axis.extension(), max))
    }

    async fn set_output_voltage(&self, volts: f64) -> DriverResult<()> {
        self.ctx().record(DriverCall::SetOutputVoltage(volts));
        self.call("set_output_voltage").await?;
        self.inner.lifecycle.require_enabled()?;
        let state = self.inner.state.lock();
        if state.control_mode != ControlMode::OpenLoop {
            return Err(self.wrong_mode("set_output_voltage", state.control_mode));
        }
        let max = state.settings.max_output_voltage;
        let volts = volts.clamp(0.0, max);
        self.ctx().axis.set_extension(volts / max * 100.0);
        Ok(())
    }

    async fn percentage_travel(&self) -> DriverResult<f64> {
        self.call("percentage_travel").await?;
        self.inner.lifecycle.require_connected()?;
        Ok(self.ctx().axis.extension())
    }

    async fn set_percentage_travel(&self, percent: f64) -> DriverResult<()> {
        self.ctx().record(DriverCall::SetPercentageTravel(percent));
        self.call("set_percentage_travel").await?;
        self.inner.lifecycle.require_enabled()?;
        let mode = self.inner.state.lock().control_mode;
        if mode != ControlMode::ClosedLoop {
            return Err(self.wrong_mode("set_percentage_travel", mode));
        }
        self.ctx().axis.set_extension(percent);
        Ok(())
    }

    async fn jog(&self, direction: JogDirection) -> DriverResult<()> {
        self.ctx().record(DriverCall::Jog(direction));
        self.call("jog").await?;
        self.inner.lifecycle.require_enabled()?;
        let state = self.inner.state.lock();
        let step = match state.control_mode {
            ControlMode::ClosedLoop => state.settings.percentage_step,
            ControlMode::OpenLoop => {
                state.settings.voltage_step / state.settings.max_output_voltage * 100.0
            }
        };
        let signed = match direction {
            JogDirection::Increase => step,
            JogDirection::Decrease => -step,
        };
        let axis = &self.ctx().axis;
        axis.set_extension(axis.extension() + signed);
        Ok(())
    }

    async fn voltage_source(&self) -> DriverResult<VoltageSource> {
        self.call("voltage_source").await?;
        self.inner.lifecycle.require_connected()?;
        Ok(self.inner.state.lock().voltage_source)
    }

    async fn set_voltage_source(&self, source: VoltageSource) -> DriverResult<()> {
        self.ctx().record(DriverCall::SetVoltageSource(source));
        self.call("set_voltage_source").await?;
        self.inner.lifecycle.require_connected()?;
        self.inner.state.lock().voltage_source = source;
        Ok(())
    }

    async fn io_settings(&self) -> DriverResult<IoSettings> {
        self.call("io_settings").await?;
        self.inner.lifecycle.require_connected()?;
        let settings = self.inner.state.lock().settings;
        Ok(IoSettings {
            hub_analogue_input: settings.hub_mode,
            voltage_limit: settings.max_output_voltage,
        })
    }

    async fn position_control_mode(&self) -> DriverResult<ControlMode> {
        self.call("position_control_mode").await?;
        self.inner.lifecycle.require_connected()?;
        Ok(self.inner.state.lock().control_mode)
    }

    async fn set_position_control_mode(&self, mode: ControlMode) -> DriverResult<()> {
        self.ctx().record(DriverCall::SetPositionControlMode(mode));
        self.call("set_position_control_mode").await?;
        self.inner.lifecycle.require_connected()?;
        self.inner.state.lock().control_mode = mode;
        Ok(())
    }

    async fn is_closed_loop(&self) -> DriverResult<bool> {
        self.call("is_closed_loop").await?;
        self.inner.lifecycle.require_connected()?;
        Ok(self.inner.state.lock().control_mode == ControlMode::ClosedLoop)
    }
}
