//! T-Cube strain gauge position reader.

use tracing::instrument;

use piezo_core::cancel::CancelToken;
use piezo_core::capabilities::{KinesisBackend, StrainGaugeDriver};
use piezo_core::error::{PiezoError, PiezoResult};
use piezo_core::limits::READER_LED_BRIGHTNESS;
use piezo_core::units::Unit;

use crate::session::{discover_devices, DeviceSession, SessionStage, SessionTiming};

/// Strain gauge reader wrapping one [`DeviceSession`].
///
/// Every read is a live driver query; nothing is cached.
pub struct StrainReader {
    session: DeviceSession,
    device: Option<Box<dyn StrainGaugeDriver>>,
}

impl std::fmt::Debug for StrainReader {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StrainReader")
            .field("session", &self.session)
            .field("device", &self.device.as_ref().map(|_| "<dyn StrainGaugeDriver>"))
            .finish()
    }
}

impl StrainReader {
    /// Reader for `serial`, not yet connected.
    pub fn new(serial: impl Into<String>, timing: SessionTiming) -> Self {
        Self {
            session: DeviceSession::new("strain gauge", serial, timing),
            device: None,
        }
    }

    /// Discover devices, then initialize a reader for `serial`.
    ///
    /// For using a reader on its own; [`crate::PiezoController`] shares one
    /// discovery pass between itself and its reader instead.
    pub async fn open(
        backend: &dyn KinesisBackend,
        serial: impl Into<String>,
        timing: SessionTiming,
        cancel: &CancelToken,
    ) -> PiezoResult<Self> {
        let mut reader = Self::new(serial, timing);
        if let Err(err) = discover_devices(backend).await {
            reader.session.fail(&err);
            return Err(err);
        }
        reader.initialize(backend, cancel).await?;
        Ok(reader)
    }

    /// Construct the driver object, connect, enable and configure the reader.
    ///
    /// On failure the reader stays unusable and later calls report
    /// [`PiezoError::NotConnected`].
    #[instrument(skip_all, fields(serial = %self.session.serial()))]
    pub async fn initialize(
        &mut self,
        backend: &dyn KinesisBackend,
        cancel: &CancelToken,
    ) -> PiezoResult<()> {
        let serial = self.session.serial().to_string();
        let Some(device) = backend.create_strain_gauge(&serial) else {
            let err = PiezoError::NullDevice {
                device: "strain gauge",
                serial,
            };
            self.session.fail(&err);
            return Err(err);
        };
        tracing::info!("Strain reader created");

        self.session.connect_and_enable(device.as_ref(), cancel).await?;

        if let Err(err) = device.load_strain_gauge_configuration(&serial).await {
            return Err(self.session.fail_with(err));
        }
        if let Err(err) = device.set_leds(READER_LED_BRIGHTNESS).await {
            tracing::warn!(error = %err, "Setting reader LED brightness failed");
        }

        self.device = Some(device);
        Ok(())
    }

    fn device(&self) -> PiezoResult<&dyn StrainGaugeDriver> {
        self.session.ensure_enabled()?;
        self.device
            .as_deref()
            .ok_or_else(|| self.session.not_connected())
    }

    /// Serial of the reader.
    pub fn serial(&self) -> &str {
        self.session.serial()
    }

    /// Lifecycle stage of the reader.
    pub fn stage(&self) -> SessionStage {
        self.session.stage()
    }

    /// Whether the reader is ready.
    pub fn is_enabled(&self) -> bool {
        self.session.is_enabled() && self.device.is_some()
    }

    /// Underlying session.
    pub fn session(&self) -> &DeviceSession {
        &self.session
    }

    /// Live position reading in the current display units.
    pub async fn get_position(&self) -> PiezoResult<f64> {
        Ok(self.device()?.reading().await?)
    }

    /// Start zeroing. Returns before zeroing completes; see [`is_zeroing`](Self::is_zeroing).
    pub async fn set_zero(&self) -> PiezoResult<()> {
        self.device()?.set_zero().await?;
        tracing::info!(serial = %self.serial(), "Zeroing started");
        Ok(())
    }

    /// Whether zeroing is still in progress.
    pub async fn is_zeroing(&self) -> PiezoResult<bool> {
        Ok(self.device()?.is_zeroing().await?)
    }

    /// Unit of [`get_position`](Self::get_position) per the display mode.
    pub async fn get_units(&self) -> PiezoResult<Unit> {
        let code = self.device()?.display_mode().await?;
        Unit::from_display_mode(code)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use piezo_driver_mock::{DriverCall, ErrorConfig, ErrorScenario, MockKinesis};

    async fn open(backend: &MockKinesis) -> PiezoResult<StrainReader> {
        StrainReader::open(
            backend,
            "84858066",
            SessionTiming::default(),
            &CancelToken::never(),
        )
        .await
    }

    #[tokio::test(start_paused = true)]
    async fn test_open_configures_reader() {
        let backend = MockKinesis::builder().with_strain_gauge("84858066").build();
        let reader = open(&backend).await.unwrap();

        assert!(reader.is_enabled());
        let gauge = backend.strain_gauge("84858066").unwrap();
        assert!(gauge.is_configured());
        assert_eq!(gauge.led_brightness(), Some(120));
        assert_eq!(reader.get_units().await.unwrap(), Unit::Micrometers);
        assert_eq!(reader.get_position().await.unwrap(), 0.0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_display_modes_map_to_units() {
        let backend = MockKinesis::builder().with_strain_gauge("84858066").build();
        let reader = open(&backend).await.unwrap();
        let gauge = backend.strain_gauge("84858066").unwrap();

        for (code, unit) in [(1, Unit::Micrometers), (2, Unit::Volts), (3, Unit::Newtons)] {
            gauge.set_display_mode(code);
            assert_eq!(reader.get_units().await.unwrap(), unit);
        }
        gauge.set_display_mode(0);
        assert_eq!(
            reader.get_units().await,
            Err(PiezoError::UnitsUnrecognized { code: 0 })
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_null_device_leaves_reader_disconnected() {
        let backend = MockKinesis::builder().with_null_device("84858066").build();
        let err = open(&backend).await.unwrap_err();
        assert!(matches!(err, PiezoError::NullDevice { device: "strain gauge", .. }));
        assert_eq!(backend.journal().count(|c| *c == DriverCall::Connect), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_calls_after_failed_init_report_not_connected() {
        let backend = MockKinesis::builder()
            .with_strain_gauge("84858066")
            .error_config(ErrorConfig::scenario(ErrorScenario::Refuse {
                operation: "connect",
            }))
            .build();
        let mut reader = StrainReader::new("84858066", SessionTiming::default());
        assert!(reader
            .initialize(&backend, &CancelToken::never())
            .await
            .is_err());

        assert_eq!(reader.stage(), SessionStage::Failed);
        assert!(matches!(
            reader.get_position().await,
            Err(PiezoError::NotConnected { .. })
        ));
        assert!(matches!(
            reader.set_zero().await,
            Err(PiezoError::NotConnected { .. })
        ));
        assert_eq!(backend.journal().count(|c| *c == DriverCall::SetZero), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_led_failure_is_not_fatal() {
        let backend = MockKinesis::builder()
            .with_strain_gauge("84858066")
            .error_config(ErrorConfig::scenario(ErrorScenario::Refuse {
                operation: "set_leds",
            }))
            .build();
        let reader = open(&backend).await.unwrap();
        assert!(reader.is_enabled());
    }

    #[tokio::test(start_paused = true)]
    async fn test_zero_is_fire_and_forget() {
        let backend = MockKinesis::builder()
            .with_strain_gauge("84858066")
            .mode(piezo_driver_mock::MockMode::Realistic)
            .build();
        let reader = open(&backend).await.unwrap();
        backend.axis().set_extension(50.0);

        reader.set_zero().await.unwrap();
        assert!(reader.is_zeroing().await.unwrap());
        tokio::time::sleep(std::time::Duration::from_secs(3)).await;
        assert!(!reader.is_zeroing().await.unwrap());
        assert_eq!(reader.get_position().await.unwrap(), 0.0);
    }
}
