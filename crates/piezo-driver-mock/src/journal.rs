//! Timestamped record of driver calls issued to the simulated devices.
//!
//! Only lifecycle calls and commands are journaled; reads are not, so a busy
//! monitor does not drown the sequence a test wants to inspect. Timestamps use
//! `tokio::time::Instant`, which follows the paused clock in tests.

use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use piezo_core::capabilities::PiezoSettings;
use piezo_core::units::{ControlMode, JogDirection, VoltageSource};
use tokio::time::Instant;

/// A driver call that changed device or driver state.
#[derive(Debug, Clone, PartialEq)]
pub enum DriverCall {
    /// Device list rebuilt.
    BuildDeviceList,
    /// Connection opened.
    Connect,
    /// Settings-initialization wait started.
    WaitForSettingsInitialized {
        /// Requested wait bound.
        timeout: Duration,
    },
    /// Status polling started.
    StartPolling {
        /// Requested polling interval.
        interval: Duration,
    },
    /// Output enabled.
    EnableDevice,
    /// Device configuration loaded.
    LoadConfiguration,
    /// Settings written.
    ApplySettings {
        /// Settings as written.
        settings: PiezoSettings,
        /// Whether they were persisted as startup defaults.
        persist: bool,
    },
    /// Output voltage commanded.
    SetOutputVoltage(f64),
    /// Percentage travel commanded.
    SetPercentageTravel(f64),
    /// Jog issued.
    Jog(JogDirection),
    /// Voltage source selected.
    SetVoltageSource(VoltageSource),
    /// Position control mode selected.
    SetPositionControlMode(ControlMode),
    /// LED brightness set.
    SetLeds(u8),
    /// Zeroing started.
    SetZero,
}

/// One journaled call.
#[derive(Debug, Clone, PartialEq)]
pub struct JournalEntry {
    /// When the call was issued.
    pub at: Instant,
    /// Serial of the addressed device, empty for backend calls.
    pub serial: String,
    /// The call.
    pub call: DriverCall,
}

/// Shared, append-only call journal.
#[derive(Debug, Clone, Default)]
pub struct CallJournal {
    entries: Arc<Mutex<Vec<JournalEntry>>>,
}

impl CallJournal {
    /// Empty journal.
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a call issued now.
    pub fn record(&self, serial: &str, call: DriverCall) {
        self.entries.lock().push(JournalEntry {
            at: Instant::now(),
            serial: serial.to_string(),
            call,
        });
    }

    /// Snapshot of all entries in issue order.
    pub fn entries(&self) -> Vec<JournalEntry> {
        self.entries.lock().clone()
    }

    /// Calls addressed to `serial`, in issue order.
    pub fn calls_for(&self, serial: &str) -> Vec<DriverCall> {
        self.entries
            .lock()
            .iter()
            .filter(|e| e.serial == serial)
            .map(|e| e.call.clone())
            .collect()
    }

    /// First entry for `serial` matching `pred`.
    pub fn find(&self, serial: &str, pred: impl Fn(&DriverCall) -> bool) -> Option<JournalEntry> {
        self.entries
            .lock()
            .iter()
            .find(|e| e.serial == serial && pred(&e.call))
            .cloned()
    }

    /// Number of entries matching `pred` across all devices.
    pub fn count(&self, pred: impl Fn(&DriverCall) -> bool) -> usize {
        self.entries.lock().iter().filter(|e| pred(&e.call)).count()
    }

    /// Percentage travel commands in issue order, across all devices.
    pub fn percentage_commands(&self) -> Vec<f64> {
        self.entries
            .lock()
            .iter()
            .filter_map(|e| match e.call {
                DriverCall::SetPercentageTravel(p) => Some(p),
                _ => None,
            })
            .collect()
    }

    /// Drop all entries.
    pub fn clear(&self) {
        self.entries.lock().clear();
    }

    /// Number of entries.
    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    /// Whether nothing was journaled.
    pub fn is_empty(&self) -> bool {
        self.entries.lock().is_empty()
    }
}
