//! Connection lifecycle of one T-Cube device.
//!
//! A [`DeviceSession`] walks a device from `Disconnected` to `Enabled`:
//!
//! ```text
//! Connect -> [WaitForSettingsInitialized] -> StartPolling -> 500 ms
//!         -> EnableDevice -> 500 ms -> Enabled
//! ```
//!
//! The settings wait only runs when the device does not already report
//! initialized settings, and its failure is logged without aborting. Any other
//! failure moves the session to `Failed`, after which every operation of the
//! owning component reports `NotConnected`. There is no rollback and no retry.

use serde::Serialize;
use std::time::Duration;
use tracing::instrument;

use piezo_core::cancel::CancelToken;
use piezo_core::capabilities::{KinesisBackend, KinesisDevice};
use piezo_core::error::{DriverError, PiezoError, PiezoResult};
use piezo_core::limits::{ENABLE_SETTLE_DELAY, POLLING_INTERVAL, SETTINGS_INIT_TIMEOUT};

// =============================================================================
// Discovery
// =============================================================================

/// Enumerate attached devices.
///
/// Logs every serial found. Fails with [`PiezoError::DiscoveryFailed`] when
/// the enumeration call fails or finds nothing.
#[instrument(skip(backend))]
pub async fn discover_devices(backend: &dyn KinesisBackend) -> PiezoResult<Vec<String>> {
    if let Err(err) = backend.build_device_list().await {
        tracing::error!(error = %err, "Device enumeration failed");
        return Err(PiezoError::DiscoveryFailed {
            reason: err.to_string(),
        });
    }
    let serials = backend.device_list().await.map_err(|err| {
        tracing::error!(error = %err, "Reading device list failed");
        PiezoError::DiscoveryFailed {
            reason: err.to_string(),
        }
    })?;

    if serials.is_empty() {
        tracing::error!("No stages found");
        return Err(PiezoError::DiscoveryFailed {
            reason: "no devices found".to_string(),
        });
    }
    for serial in &serials {
        tracing::info!(%serial, "Found device");
    }
    tracing::info!(count = serials.len(), "Device discovery complete");
    Ok(serials)
}

// =============================================================================
// Session Stage
// =============================================================================

/// Where a device is in its connection lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionStage {
    /// Nothing attempted yet.
    #[default]
    Disconnected,
    /// Connect call in flight.
    Connecting,
    /// Waiting for device settings to load.
    SettingsInitializing,
    /// Status polling being started.
    Polling,
    /// Timed settle around enabling.
    Settling,
    /// Ready for commands.
    Enabled,
    /// A lifecycle step failed; the device is unusable.
    Failed,
}

impl SessionStage {
    /// Whether commands may be issued.
    pub fn is_enabled(self) -> bool {
        self == SessionStage::Enabled
    }

    /// Short lowercase label for display.
    pub fn label(self) -> &'static str {
        match self {
            SessionStage::Disconnected => "disconnected",
            SessionStage::Connecting => "connecting",
            SessionStage::SettingsInitializing => "initializing settings",
            SessionStage::Polling => "starting polling",
            SessionStage::Settling => "settling",
            SessionStage::Enabled => "enabled",
            SessionStage::Failed => "failed",
        }
    }
}

impl std::fmt::Display for SessionStage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.label())
    }
}

// =============================================================================
// Session Timing
// =============================================================================

/// Delays used while connecting.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SessionTiming {
    /// Bound on the settings-initialization wait.
    pub settings_init_timeout: Duration,
    /// Status polling interval.
    pub polling_interval: Duration,
    /// Settle after starting polling and after enabling.
    pub settle_delay: Duration,
}

impl Default for SessionTiming {
    fn default() -> Self {
        Self {
            settings_init_timeout: SETTINGS_INIT_TIMEOUT,
            polling_interval: POLLING_INTERVAL,
            settle_delay: ENABLE_SETTLE_DELAY,
        }
    }
}

// =============================================================================
// DeviceSession
// =============================================================================

/// Lifecycle state of one device, owned by the component wrapping it.
#[derive(Debug, Clone)]
pub struct DeviceSession {
    serial: String,
    kind: &'static str,
    stage: SessionStage,
    timing: SessionTiming,
    warnings: Vec<PiezoError>,
}

impl DeviceSession {
    /// New disconnected session for the device `serial`.
    ///
    /// `kind` names the device family in logs and errors.
    pub fn new(kind: &'static str, serial: impl Into<String>, timing: SessionTiming) -> Self {
        Self {
            serial: serial.into(),
            kind,
            stage: SessionStage::Disconnected,
            timing,
            warnings: Vec::new(),
        }
    }

    /// Serial this session addresses.
    pub fn serial(&self) -> &str {
        &self.serial
    }

    /// Device family name.
    pub fn kind(&self) -> &'static str {
        self.kind
    }

    /// Current lifecycle stage.
    pub fn stage(&self) -> SessionStage {
        self.stage
    }

    /// Whether the device reached `Enabled`.
    pub fn is_enabled(&self) -> bool {
        self.stage.is_enabled()
    }

    /// Non-fatal errors tolerated while connecting.
    pub fn warnings(&self) -> &[PiezoError] {
        &self.warnings
    }

    /// `Ok` if enabled, [`PiezoError::NotConnected`] otherwise.
    pub fn ensure_enabled(&self) -> PiezoResult<()> {
        if self.is_enabled() {
            Ok(())
        } else {
            Err(self.not_connected())
        }
    }

    /// The error reported for any call on a session that is not enabled.
    pub fn not_connected(&self) -> PiezoError {
        PiezoError::NotConnected {
            serial: self.serial.clone(),
        }
    }

    /// Move to `Failed`, logging the cause.
    pub fn fail(&mut self, cause: &PiezoError) {
        tracing::error!(serial = %self.serial, device = self.kind, error = %cause, "Device session failed");
        self.transition(SessionStage::Failed);
    }

    /// Mark failed and hand back a driver error converted for `?`.
    pub fn fail_with(&mut self, err: DriverError) -> PiezoError {
        let err = PiezoError::Driver(err);
        self.fail(&err);
        err
    }

    fn transition(&mut self, next: SessionStage) {
        tracing::debug!(serial = %self.serial, from = ?self.stage, to = ?next, "Session transition");
        self.stage = next;
    }

    async fn settle(&mut self, cancel: &CancelToken) -> PiezoResult<()> {
        if let Err(err) = cancel.sleep(self.timing.settle_delay).await {
            self.fail(&err);
            return Err(err);
        }
        Ok(())
    }

    /// Connect to the device and bring it to `Enabled`.
    ///
    /// Strictly ordered; each settle fully elapses before the next call. A
    /// connect failure reports [`PiezoError::ConnectFailed`] and nothing else
    /// runs. A failed settings wait is recorded in [`warnings`](Self::warnings)
    /// and the sequence continues.
    #[instrument(skip(self, device, cancel), fields(serial = %self.serial, device = self.kind))]
    pub async fn connect_and_enable<D>(&mut self, device: &D, cancel: &CancelToken) -> PiezoResult<()>
    where
        D: KinesisDevice + ?Sized,
    {
        cancel.check()?;
        self.transition(SessionStage::Connecting);
        if let Err(source) = device.connect(&self.serial).await {
            let err = PiezoError::ConnectFailed {
                serial: self.serial.clone(),
                source,
            };
            self.fail(&err);
            return Err(err);
        }
        tracing::info!("Connected");

        let initialized = match device.is_settings_initialized().await {
            Ok(initialized) => initialized,
            Err(err) => {
                tracing::warn!(error = %err, "Settings state query failed; waiting for initialization");
                false
            }
        };
        if !initialized {
            self.transition(SessionStage::SettingsInitializing);
            let timeout = self.timing.settings_init_timeout;
            if let Err(err) = device.wait_for_settings_initialized(timeout).await {
                let warning = PiezoError::SettingsInitTimeout {
                    serial: self.serial.clone(),
                    timeout_ms: u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX),
                };
                tracing::warn!(error = %err, "{}; continuing", warning);
                self.warnings.push(warning);
            }
        }

        self.transition(SessionStage::Polling);
        if let Err(err) = device.start_polling(self.timing.polling_interval).await {
            return Err(self.fail_with(err));
        }

        self.transition(SessionStage::Settling);
        self.settle(cancel).await?;

        if let Err(err) = device.enable_device().await {
            return Err(self.fail_with(err));
        }
        self.settle(cancel).await?;

        self.transition(SessionStage::Enabled);
        tracing::info!("Device is now enabled");

        match device.device_info().await {
            Ok(info) => {
                tracing::info!(serial_number = %info.serial_number, name = %info.name, "Device info")
            }
            Err(err) => tracing::warn!(error = %err, "Reading device info failed"),
        }
        Ok(())
    }
}
