//! Simulated Kinesis driver backend.
//!
//! [`MockKinesis`] stands in for the vendor driver library: it enumerates a
//! configurable set of serials and hands out [`MockPiezo`] and
//! [`MockStrainGauge`] objects that share one [`SimulatedAxis`], so the reader
//! follows whatever the controller does to the stage.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use piezo_core::capabilities::{DeviceInfo, KinesisBackend, PiezoDriver, StrainGaugeDriver};
use piezo_core::error::{DriverError, DriverErrorKind, DriverResult};
use serde::{Deserialize, Serialize};
use tokio::time::sleep;

use crate::common::{ErrorConfig, MockMode, MockRng, TimingConfig};
use crate::journal::{CallJournal, DriverCall};
use crate::mock_piezo::MockPiezo;
use crate::mock_strain_gauge::MockStrainGauge;
use crate::response::ResponseCurve;

pub(crate) const BACKEND_DRIVER: &str = "kinesis";
pub(crate) const PIEZO_DRIVER: &str = "tcube_piezo";
pub(crate) const STRAIN_GAUGE_DRIVER: &str = "tcube_strain_gauge";

// =============================================================================
// Shared Physics
// =============================================================================

/// Physical extension of the stage, shared by controller and reader.
#[derive(Debug, Clone, Default)]
pub struct SimulatedAxis {
    extension: Arc<Mutex<f64>>,
}

impl SimulatedAxis {
    /// Current extension in percent of full travel.
    pub fn extension(&self) -> f64 {
        *self.extension.lock()
    }

    /// Move the stage, clamped to the 0-100 % mechanical range.
    pub fn set_extension(&self, percent: f64) {
        *self.extension.lock() = percent.clamp(0.0, 100.0);
    }
}

// =============================================================================
// Shared Device Plumbing
// =============================================================================

/// Call context shared by every simulated device.
#[derive(Debug, Clone)]
pub(crate) struct DeviceContext {
    pub serial: String,
    pub mode: MockMode,
    pub timing: TimingConfig,
    pub errors: ErrorConfig,
    pub journal: CallJournal,
    pub axis: SimulatedAxis,
}

impl DeviceContext {
    /// Apply communication latency and injected failures for `operation`.
    pub async fn call(&self, driver_type: &str, operation: &'static str) -> DriverResult<()> {
        if self.mode.is_timed() {
            sleep(self.timing.communication_delay()).await;
        }
        self.errors.check_operation(driver_type, operation)
    }

    pub fn record(&self, call: DriverCall) {
        self.journal.record(&self.serial, call);
    }
}

#[derive(Debug, Default)]
struct LifecycleState {
    connected: bool,
    settings_initialized: bool,
    polling: Option<Duration>,
    enabled: bool,
    configured: bool,
}

/// Connect/settings/polling/enable lifecycle common to both T-Cube devices.
#[derive(Debug)]
pub(crate) struct SimulatedLifecycle {
    pub ctx: DeviceContext,
    driver_type: &'static str,
    model: &'static str,
    settings_ready_on_connect: bool,
    state: Mutex<LifecycleState>,
}

impl SimulatedLifecycle {
    pub fn new(
        ctx: DeviceContext,
        driver_type: &'static str,
        model: &'static str,
        settings_ready_on_connect: bool,
    ) -> Self {
        Self {
            ctx,
            driver_type,
            model,
            settings_ready_on_connect,
            state: Mutex::new(LifecycleState::default()),
        }
    }

    pub fn driver_type(&self) -> &'static str {
        self.driver_type
    }

    pub async fn connect(&self, serial: &str) -> DriverResult<()> {
        self.ctx.record(DriverCall::Connect);
        self.ctx.call(self.driver_type, "connect").await?;
        if serial != self.ctx.serial {
            return Err(DriverError::new(
                self.driver_type,
                DriverErrorKind::Initialization,
                format!("device {} is not attached", serial),
            ));
        }
        let mut state = self.state.lock();
        state.connected = true;
        state.settings_initialized = self.settings_ready_on_connect;
        Ok(())
    }

    pub async fn is_settings_initialized(&self) -> DriverResult<bool> {
        self.ctx
            .call(self.driver_type, "is_settings_initialized")
            .await?;
        self.require_connected()?;
        Ok(self.state.lock().settings_initialized)
    }

    pub async fn wait_for_settings_initialized(&self, timeout: Duration) -> DriverResult<()> {
        self.ctx
            .record(DriverCall::WaitForSettingsInitialized { timeout });
        self.ctx
            .call(self.driver_type, "wait_for_settings_initialized")
            .await?;
        self.require_connected()?;
        if self.state.lock().settings_initialized {
            return Ok(());
        }
        if self.ctx.mode.is_timed() {
            let load = self.ctx.timing.settings_init();
            if load > timeout {
                sleep(timeout).await;
                return Err(DriverError::timeout(
                    self.driver_type,
                    format!("settings not initialized after {} ms", timeout.as_millis()),
                ));
            }
            sleep(load).await;
        }
        self.state.lock().settings_initialized = true;
        Ok(())
    }

    pub async fn start_polling(&self, interval: Duration) -> DriverResult<()> {
        self.ctx.record(DriverCall::StartPolling { interval });
        self.ctx.call(self.driver_type, "start_polling").await?;
        self.require_connected()?;
        self.state.lock().polling = Some(interval);
        Ok(())
    }

    pub async fn enable_device(&self) -> DriverResult<()> {
        self.ctx.record(DriverCall::EnableDevice);
        self.ctx.call(self.driver_type, "enable_device").await?;
        self.require_connected()?;
        self.state.lock().enabled = true;
        Ok(())
    }

    pub async fn device_info(&self) -> DriverResult<DeviceInfo> {
        self.ctx.call(self.driver_type, "device_info").await?;
        self.require_connected()?;
        Ok(DeviceInfo {
            serial_number: self.ctx.serial.clone(),
            name: self.model.to_string(),
        })
    }

    pub async fn load_configuration(
        &self,
        serial: &str,
        operation: &'static str,
    ) -> DriverResult<()> {
        self.ctx.record(DriverCall::LoadConfiguration);
        self.ctx.call(self.driver_type, operation).await?;
        self.require_connected()?;
        if serial != self.ctx.serial {
            return Err(DriverError::new(
                self.driver_type,
                DriverErrorKind::Configuration,
                format!("no configuration for serial {}", serial),
            ));
        }
        self.state.lock().configured = true;
        Ok(())
    }

    pub fn require_connected(&self) -> DriverResult<()> {
        if self.state.lock().connected {
            Ok(())
        } else {
            Err(DriverError::communication(
                self.driver_type,
                format!("device {} is not connected", self.ctx.serial),
            ))
        }
    }

    pub fn require_enabled(&self) -> DriverResult<()> {
        self.require_connected()?;
        if self.state.lock().enabled {
            Ok(())
        } else {
            Err(DriverError::new(
                self.driver_type,
                DriverErrorKind::Hardware,
                format!("device {} output is not enabled", self.ctx.serial),
            ))
        }
    }

    pub fn is_connected(&self) -> bool {
        self.state.lock().connected
    }

    pub fn is_enabled(&self) -> bool {
        self.state.lock().enabled
    }

    pub fn is_configured(&self) -> bool {
        self.state.lock().configured
    }

    pub fn polling_interval(&self) -> Option<Duration> {
        self.state.lock().polling
    }
}

// =============================================================================
// Simulation Configuration
// =============================================================================

fn default_piezos() -> Vec<String> {
    vec!["81858318".to_string()]
}

fn default_strain_gauges() -> Vec<String> {
    vec!["84858066".to_string()]
}

/// Simulated hardware described in configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SimulationConfig {
    /// Timing/failure mode of the simulated devices.
    pub mode: MockMode,
    /// Attached piezo controller serials.
    pub piezos: Vec<String>,
    /// Attached strain gauge reader serials.
    pub strain_gauges: Vec<String>,
    /// Serials that enumerate but yield a null device handle.
    pub null_devices: Vec<String>,
    /// Serials whose settings are not initialized right after connect.
    pub settings_pending: Vec<String>,
    /// Reader response to extension, `[[percent, position], ...]`.
    pub response_curve: ResponseCurve,
    /// Reader display mode code.
    pub display_mode: i32,
    /// Peak reading noise in reader units.
    pub noise: f64,
    /// Random failure rate per driver call in chaos mode.
    pub failure_rate: f64,
    /// RNG seed for noise and failures.
    pub seed: Option<u64>,
}

impl Default for SimulationConfig {
    fn default() -> Self {
        Self {
            mode: MockMode::Instant,
            piezos: default_piezos(),
            strain_gauges: default_strain_gauges(),
            null_devices: Vec::new(),
            settings_pending: Vec::new(),
            response_curve: ResponseCurve::default(),
            display_mode: 1,
            noise: 0.0,
            failure_rate: 0.0,
            seed: None,
        }
    }
}

// =============================================================================
// MockKinesis
// =============================================================================

#[derive(Debug)]
struct BackendInner {
    serials: Vec<String>,
    piezos: Vec<MockPiezo>,
    strain_gauges: Vec<MockStrainGauge>,
    null_devices: Vec<String>,
    enumeration_fails: bool,
    mode: MockMode,
    errors: ErrorConfig,
    journal: CallJournal,
    axis: SimulatedAxis,
    listed: Mutex<bool>,
}

/// Simulated Kinesis driver library.
///
/// # Example
///
/// ```rust,ignore
/// let backend = MockKinesis::builder()
///     .with_piezo("81858318")
///     .with_strain_gauge("84858066")
///     .response(ResponseCurve::new(vec![(10.0, 5.0), (70.0, 25.0)])?)
///     .build();
/// let journal = backend.journal();
/// ```
#[derive(Debug, Clone)]
pub struct MockKinesis {
    inner: Arc<BackendInner>,
}

impl MockKinesis {
    /// Builder with no attached devices.
    pub fn builder() -> MockKinesisBuilder {
        MockKinesisBuilder::new()
    }

    /// Backend for the devices described in `config`.
    pub fn from_config(config: &SimulationConfig) -> Self {
        let mut builder = MockKinesis::builder()
            .mode(config.mode)
            .response(config.response_curve.clone())
            .display_mode(config.display_mode)
            .noise(config.noise);
        if let Some(seed) = config.seed {
            builder = builder.seed(seed);
        }
        if config.mode == MockMode::Chaos && config.failure_rate > 0.0 {
            builder = builder.error_config(ErrorConfig::random_failures_seeded(
                config.failure_rate,
                config.seed,
            ));
        }
        for serial in &config.piezos {
            builder = builder.with_piezo(serial.as_str());
        }
        for serial in &config.strain_gauges {
            builder = builder.with_strain_gauge(serial.as_str());
        }
        for serial in &config.null_devices {
            builder = builder.with_null_device(serial.as_str());
        }
        for serial in &config.settings_pending {
            builder = builder.settings_pending(serial.as_str());
        }
        builder.build()
    }

    /// Journal of every lifecycle call and command.
    pub fn journal(&self) -> CallJournal {
        self.inner.journal.clone()
    }

    /// Shared stage extension.
    pub fn axis(&self) -> SimulatedAxis {
        self.inner.axis.clone()
    }

    /// Handle to the simulated controller with `serial`.
    pub fn piezo(&self, serial: &str) -> Option<MockPiezo> {
        self.inner
            .piezos
            .iter()
            .find(|p| p.serial() == serial)
            .cloned()
    }

    /// Handle to the simulated reader with `serial`.
    pub fn strain_gauge(&self, serial: &str) -> Option<MockStrainGauge> {
        self.inner
            .strain_gauges
            .iter()
            .find(|g| g.serial() == serial)
            .cloned()
    }

    /// Operating mode of the backend.
    pub fn mode(&self) -> MockMode {
        self.inner.mode
    }
}

#[async_trait]
impl KinesisBackend for MockKinesis {
    async fn build_device_list(&self) -> DriverResult<()> {
        self.inner.journal.record("", DriverCall::BuildDeviceList);
        if self.inner.mode.is_timed() {
            sleep(Duration::from_millis(50)).await;
        }
        self.inner
            .errors
            .check_operation(BACKEND_DRIVER, "build_device_list")?;
        if self.inner.enumeration_fails {
            return Err(DriverError::communication(
                BACKEND_DRIVER,
                "device enumeration failed",
            ));
        }
        *self.inner.listed.lock() = true;
        Ok(())
    }

    async fn device_list(&self) -> DriverResult<Vec<String>> {
        self.inner
            .errors
            .check_operation(BACKEND_DRIVER, "device_list")?;
        if *self.inner.listed.lock() {
            Ok(self.inner.serials.clone())
        } else {
            Ok(Vec::new())
        }
    }

    fn create_piezo(&self, serial: &str) -> Option<Box<dyn PiezoDriver>> {
        if self.inner.null_devices.iter().any(|s| s == serial) {
            return None;
        }
        self.piezo(serial)
            .map(|piezo| Box::new(piezo) as Box<dyn PiezoDriver>)
    }

    fn create_strain_gauge(&self, serial: &str) -> Option<Box<dyn StrainGaugeDriver>> {
        if self.inner.null_devices.iter().any(|s| s == serial) {
            return None;
        }
        self.strain_gauge(serial)
            .map(|gauge| Box::new(gauge) as Box<dyn StrainGaugeDriver>)
    }
}

// =============================================================================
// Builder
// =============================================================================

/// Builder for [`MockKinesis`].
#[derive(Debug)]
pub struct MockKinesisBuilder {
    serials: Vec<String>,
    piezos: Vec<String>,
    strain_gauges: Vec<String>,
    null_devices: Vec<String>,
    settings_pending: Vec<String>,
    enumeration_fails: bool,
    mode: MockMode,
    piezo_timing: TimingConfig,
    strain_gauge_timing: TimingConfig,
    errors: ErrorConfig,
    response: ResponseCurve,
    display_mode: i32,
    noise: f64,
    seed: Option<u64>,
}

impl MockKinesisBuilder {
    /// Empty builder: no devices, instant mode, no injected errors.
    pub fn new() -> Self {
        Self {
            serials: Vec::new(),
            piezos: Vec::new(),
            strain_gauges: Vec::new(),
            null_devices: Vec::new(),
            settings_pending: Vec::new(),
            enumeration_fails: false,
            mode: MockMode::Instant,
            piezo_timing: TimingConfig::default(),
            strain_gauge_timing: TimingConfig::default(),
            errors: ErrorConfig::none(),
            response: ResponseCurve::default(),
            display_mode: 1,
            noise: 0.0,
            seed: None,
        }
    }

    fn list(&mut self, serial: &str) {
        if !self.serials.iter().any(|s| s == serial) {
            self.serials.push(serial.to_string());
        }
    }

    /// Attach a piezo controller.
    pub fn with_piezo(mut self, serial: impl Into<String>) -> Self {
        let serial = serial.into();
        self.list(&serial);
        self.piezos.push(serial);
        self
    }

    /// Attach a strain gauge reader.
    pub fn with_strain_gauge(mut self, serial: impl Into<String>) -> Self {
        let serial = serial.into();
        self.list(&serial);
        self.strain_gauges.push(serial);
        self
    }

    /// Enumerate `serial` but return a null handle on construction.
    pub fn with_null_device(mut self, serial: impl Into<String>) -> Self {
        let serial = serial.into();
        self.list(&serial);
        self.null_devices.push(serial);
        self
    }

    /// `serial` reports uninitialized settings right after connect.
    pub fn settings_pending(mut self, serial: impl Into<String>) -> Self {
        self.settings_pending.push(serial.into());
        self
    }

    /// `build_device_list` fails.
    pub fn enumeration_fails(mut self) -> Self {
        self.enumeration_fails = true;
        self
    }

    /// Operating mode; timed modes pick the T-Cube timing presets.
    pub fn mode(mut self, mode: MockMode) -> Self {
        self.mode = mode;
        if mode.is_timed() {
            self.piezo_timing = TimingConfig::tcube_piezo();
            self.strain_gauge_timing = TimingConfig::tcube_strain_gauge();
        } else {
            self.piezo_timing = TimingConfig::default();
            self.strain_gauge_timing = TimingConfig::default();
        }
        self
    }

    /// Override timing for both devices.
    pub fn timing(mut self, timing: TimingConfig) -> Self {
        self.piezo_timing = timing;
        self.strain_gauge_timing = timing;
        self
    }

    /// Error injection shared by all devices and the backend.
    pub fn error_config(mut self, errors: ErrorConfig) -> Self {
        self.errors = errors;
        self
    }

    /// Reader response curve.
    pub fn response(mut self, response: ResponseCurve) -> Self {
        self.response = response;
        self
    }

    /// Reader display mode code.
    pub fn display_mode(mut self, code: i32) -> Self {
        self.display_mode = code;
        self
    }

    /// Peak reading noise.
    pub fn noise(mut self, amplitude: f64) -> Self {
        self.noise = amplitude;
        self
    }

    /// RNG seed for reading noise.
    pub fn seed(mut self, seed: u64) -> Self {
        self.seed = Some(seed);
        self
    }

    /// Build the backend and its devices.
    pub fn build(self) -> MockKinesis {
        let journal = CallJournal::new();
        let axis = SimulatedAxis::default();
        let rng = Arc::new(MockRng::new(self.seed));

        let context = |serial: &str, timing: TimingConfig| DeviceContext {
            serial: serial.to_string(),
            mode: self.mode,
            timing,
            errors: self.errors.clone(),
            journal: journal.clone(),
            axis: axis.clone(),
        };
        let pending = |serial: &str| self.settings_pending.iter().any(|s| s == serial);

        let piezos = self
            .piezos
            .iter()
            .map(|serial| MockPiezo::new(context(serial, self.piezo_timing), !pending(serial)))
            .collect();
        let strain_gauges = self
            .strain_gauges
            .iter()
            .map(|serial| {
                MockStrainGauge::new(
                    context(serial, self.strain_gauge_timing),
                    !pending(serial),
                    self.response.clone(),
                    self.display_mode,
                    self.noise,
                    rng.clone(),
                )
            })
            .collect();

        MockKinesis {
            inner: Arc::new(BackendInner {
                serials: self.serials.clone(),
                piezos,
                strain_gauges,
                null_devices: self.null_devices.clone(),
                enumeration_fails: self.enumeration_fails,
                mode: self.mode,
                errors: self.errors.clone(),
                journal,
                axis,
                listed: Mutex::new(false),
            }),
        }
    }
}

impl Default for MockKinesisBuilder {
    fn default() -> Self {
        Self::new()
    }
}
