//! Simulated T-Cube strain gauge reader.
//!
//! Reads the shared stage extension through a [`ResponseCurve`], minus the
//! offset captured by the last zeroing, plus optional seeded noise.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use piezo_core::capabilities::{DeviceInfo, KinesisDevice, StrainGaugeDriver};
use piezo_core::error::DriverResult;
use tokio::time::Instant;

use crate::common::MockRng;
use crate::journal::DriverCall;
use crate::mock_backend::{DeviceContext, SimulatedLifecycle, STRAIN_GAUGE_DRIVER};
use crate::response::ResponseCurve;

#[derive(Debug)]
struct GaugeState {
    display_mode: i32,
    zero_offset: f64,
    zeroing_until: Option<Instant>,
    led_brightness: Option<u8>,
}

#[derive(Debug)]
struct GaugeInner {
    lifecycle: SimulatedLifecycle,
    response: ResponseCurve,
    noise: f64,
    rng: Arc<MockRng>,
    state: Mutex<GaugeState>,
}

/// Simulated strain gauge reader. Clones share the same device.
#[derive(Debug, Clone)]
pub struct MockStrainGauge {
    inner: Arc<GaugeInner>,
}

impl MockStrainGauge {
    pub(crate) fn new(
        ctx: DeviceContext,
        settings_ready_on_connect: bool,
        response: ResponseCurve,
        display_mode: i32,
        noise: f64,
        rng: Arc<MockRng>,
    ) -> Self {
        Self {
            inner: Arc::new(GaugeInner {
                lifecycle: SimulatedLifecycle::new(
                    ctx,
                    STRAIN_GAUGE_DRIVER,
                    "TSG001",
                    settings_ready_on_connect,
                ),
                response,
                noise,
                rng,
                state: Mutex::new(GaugeState {
                    display_mode,
                    zero_offset: 0.0,
                    zeroing_until: None,
                    led_brightness: None,
                }),
            }),
        }
    }

    /// Serial of this reader.
    pub fn serial(&self) -> &str {
        &self.inner.lifecycle.ctx.serial
    }

    /// Whether the output is enabled.
    pub fn is_enabled(&self) -> bool {
        self.inner.lifecycle.is_enabled()
    }

    /// Whether the configuration was loaded.
    pub fn is_configured(&self) -> bool {
        self.inner.lifecycle.is_configured()
    }

    /// Polling interval requested by `start_polling`.
    pub fn polling_interval(&self) -> Option<Duration> {
        self.inner.lifecycle.polling_interval()
    }

    /// Last LED brightness written.
    pub fn led_brightness(&self) -> Option<u8> {
        self.inner.state.lock().led_brightness
    }

    /// Change the display mode as the front panel would.
    pub fn set_display_mode(&self, code: i32) {
        self.inner.state.lock().display_mode = code;
    }

    fn ctx(&self) -> &DeviceContext {
        &self.inner.lifecycle.ctx
    }

    async fn call(&self, operation: &'static str) -> DriverResult<()> {
        self.ctx().call(STRAIN_GAUGE_DRIVER, operation).await
    }

    fn raw_position(&self) -> f64 {
        self.inner.response.position_at(self.ctx().axis.extension())
    }
}

#[async_trait]
impl KinesisDevice for MockStrainGauge {
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
impl StrainGaugeDriver for MockStrainGauge {
    async fn load_strain_gauge_configuration(&self, serial: &str) -> DriverResult<()> {
        self.inner
            .lifecycle
            .load_configuration(serial, "load_strain_gauge_configuration")
            .await
    }

    async fn set_leds(&self, brightness: u8) -> DriverResult<()> {
        self.ctx().record(DriverCall::SetLeds(brightness));
        self.call("set_leds").await?;
        self.inner.lifecycle.require_connected()?;
        self.inner.state.lock().led_brightness = Some(brightness);
        Ok(())
    }

    async fn reading(&self) -> DriverResult<f64> {
        self.call("reading").await?;
        self.inner.lifecycle.require_connected()?;
        let offset = self.inner.state.lock().zero_offset;
        Ok(self.raw_position() - offset + self.inner.rng.noise(self.inner.noise))
    }

    async fn set_zero(&self) -> DriverResult<()> {
        self.ctx().record(DriverCall::SetZero);
        self.call("set_zero").await?;
        self.inner.lifecycle.require_connected()?;
        let raw = self.raw_position();
        let zeroing = self.ctx().timing.zeroing();
        let mut state = self.inner.state.lock();
        state.zero_offset = raw;
        state.zeroing_until = if self.ctx().mode.is_timed() && !zeroing.is_zero() {
            Some(Instant::now() + zeroing)
        } else {
            None
        };
        Ok(())
    }

    async fn is_zeroing(&self) -> DriverResult<bool> {
        self.call("is_zeroing").await?;
        self.inner.lifecycle.require_connected()?;
        Ok(self
            .inner
            .state
            .lock()
            .zeroing_until
            .is_some_and(|until| Instant::now() < until))
    }

    async fn display_mode(&self) -> DriverResult<i32> {
        self.call("display_mode").await?;
        self.inner.lifecycle.require_connected()?;
        Ok(self.inner.state.lock().display_mode)
    }
}
