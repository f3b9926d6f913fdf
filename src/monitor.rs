//! Periodic status monitor.
//!
//! [`PollMonitor`] asks the stage actor for a [`MonitorSnapshot`] on every
//! tick and hands it to a [`SnapshotSink`]. At most one snapshot request is
//! outstanding: while a long command such as calibration holds the actor,
//! each tick re-renders the last snapshot marked `busy` instead of queueing
//! more reads.

use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use piezo_core::cancel::CancelToken;
use piezo_core::error::PiezoError;
use piezo_core::units::Unit;
use piezo_driver_thorlabs::{PiezoController, SessionStage, ValueReading};
use serde::Serialize;
use tokio::sync::oneshot;
use tokio::time::{interval, timeout, MissedTickBehavior};

use crate::actor::StageHandle;
use crate::messages::{StageError, StageResult};

// =============================================================================
// Snapshot
// =============================================================================

/// Reader part of a snapshot.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ReaderSnapshot {
    /// Reader serial
    pub serial: String,
    /// Reader lifecycle stage
    pub stage: SessionStage,
    /// Position in `unit`, if it could be read
    pub position: Option<f64>,
    /// Display unit, if recognized
    pub unit: Option<Unit>,
    /// Whether zeroing is in progress
    pub zeroing: bool,
}

/// Everything the status display shows for one tick.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MonitorSnapshot {
    /// Controller serial
    pub serial: String,
    /// Controller lifecycle stage
    pub stage: SessionStage,
    /// Value, unit and mode from one mode query
    pub controller: Option<ValueReading>,
    /// Reader state, when a reader was set up
    pub reader: Option<ReaderSnapshot>,
    /// Whether a calibration is held
    pub calibrated: bool,
    /// Stale copy shown while the actor is busy
    pub busy: bool,
    /// First read error of this tick
    pub error: Option<String>,
}

impl MonitorSnapshot {
    /// Read the controller and reader. Reads have no side effects; failures
    /// are recorded in [`error`](Self::error) rather than returned.
    pub async fn capture(controller: &PiezoController) -> Self {
        let mut snapshot = Self {
            serial: controller.serial().to_string(),
            stage: controller.stage(),
            controller: None,
            reader: None,
            calibrated: controller.calibration().is_calibrated(),
            busy: false,
            error: None,
        };
        if !controller.is_enabled() {
            return snapshot;
        }

        match controller.read_value().await {
            Ok(reading) => snapshot.controller = Some(reading),
            Err(err) => snapshot.note(err),
        }

        if let Some(reader) = controller.reader() {
            let mut state = ReaderSnapshot {
                serial: reader.serial().to_string(),
                stage: reader.stage(),
                position: None,
                unit: None,
                zeroing: false,
            };
            if reader.is_enabled() {
                match reader.get_position().await {
                    Ok(position) => state.position = Some(position),
                    Err(err) => snapshot.note(err),
                }
                match reader.get_units().await {
                    Ok(unit) => state.unit = Some(unit),
                    Err(err) => snapshot.note(err),
                }
                match reader.is_zeroing().await {
                    Ok(zeroing) => state.zeroing = zeroing,
                    Err(err) => snapshot.note(err),
                }
            }
            snapshot.reader = Some(state);
        }
        snapshot
    }

    fn note(&mut self, err: PiezoError) {
        tracing::debug!(error = %err, "Monitor read failed");
        if self.error.is_none() {
            self.error = Some(err.to_string());
        }
    }

    /// Whether the controller accepts commands.
    pub fn is_connected(&self) -> bool {
        self.stage.is_enabled()
    }

    /// Copy marked as stale.
    pub fn as_busy(&self) -> Self {
        Self {
            busy: true,
            ..self.clone()
        }
    }
}

/// One-line status text.
///
/// A controller that is not enabled renders as disconnected with its stage,
/// never with a value.
pub fn format_snapshot(snapshot: &MonitorSnapshot) -> String {
    let mut line = format!("S/N {}", snapshot.serial);
    if !snapshot.is_connected() {
        line.push_str(&format!(": disconnected ({})", snapshot.stage));
        if let Some(error) = &snapshot.error {
            line.push_str(&format!(": {}", error));
        }
        return line;
    }

    match &snapshot.controller {
        Some(reading) => line.push_str(&format!(
            " [{}] {:.3} {}",
            reading.mode, reading.value, reading.unit
        )),
        None => line.push_str(" value unavailable"),
    }

    if let Some(reader) = &snapshot.reader {
        line.push_str(&format!(" | reader {}: ", reader.serial));
        match (reader.position, reader.unit) {
            _ if !reader.stage.is_enabled() => {
                line.push_str(&format!("disconnected ({})", reader.stage))
            }
            (Some(position), Some(unit)) => line.push_str(&format!("{:.3} {}", position, unit)),
            (Some(position), None) => line.push_str(&format!("{:.3} ?", position)),
            (None, _) => line.push_str("unavailable"),
        }
        if reader.zeroing {
            line.push_str(" zeroing");
        }
    }

    if snapshot.calibrated {
        line.push_str(" calibrated");
    }
    if snapshot.busy {
        line.push_str(" (busy)");
    }
    line
}

// =============================================================================
// Sinks
// =============================================================================

/// Receives rendered snapshots.
pub trait SnapshotSink {
    /// Show one snapshot.
    fn render(&mut self, snapshot: &MonitorSnapshot);
}

/// Writes snapshots to stdout, as status lines or JSON lines.
#[derive(Debug, Clone, Copy, Default)]
pub struct ConsoleSink {
    json: bool,
}

impl ConsoleSink {
    /// Status lines.
    pub fn text() -> Self {
        Self { json: false }
    }

    /// One JSON object per line.
    pub fn json() -> Self {
        Self { json: true }
    }
}

impl SnapshotSink for ConsoleSink {
    fn render(&mut self, snapshot: &MonitorSnapshot) {
        if !self.json {
            println!("{}", format_snapshot(snapshot));
            return;
        }
        match serde_json::to_string(snapshot) {
            Ok(json) => println!("{}", json),
            Err(err) => tracing::warn!(error = %err, "Snapshot serialization failed"),
        }
    }
}

/// Keeps every snapshot in memory.
#[derive(Debug, Clone, Default)]
pub struct MemorySink {
    snapshots: Arc<Mutex<Vec<MonitorSnapshot>>>,
}

impl MemorySink {
    /// Empty sink.
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshots rendered so far.
    pub fn snapshots(&self) -> Vec<MonitorSnapshot> {
        self.snapshots.lock().clone()
    }

    /// Most recent snapshot.
    pub fn last(&self) -> Option<MonitorSnapshot> {
        self.snapshots.lock().last().cloned()
    }
}

impl SnapshotSink for MemorySink {
    fn render(&mut self, snapshot: &MonitorSnapshot) {
        self.snapshots.lock().push(snapshot.clone());
    }
}

// =============================================================================
// PollMonitor
// =============================================================================

/// What a tick rendered.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TickOutcome {
    /// A new snapshot arrived.
    Fresh,
    /// The actor was busy; the last snapshot was re-rendered, if any.
    Busy,
}

/// Fixed-interval monitor over a stage actor.
#[derive(Debug)]
pub struct PollMonitor {
    handle: StageHandle,
    interval: Duration,
    pending: Option<oneshot::Receiver<MonitorSnapshot>>,
    last: Option<MonitorSnapshot>,
}

impl PollMonitor {
    /// Monitor ticking every `interval`.
    pub fn new(handle: StageHandle, interval: Duration) -> Self {
        Self {
            handle,
            interval,
            pending: None,
            last: None,
        }
    }

    /// Tick interval.
    pub fn interval(&self) -> Duration {
        self.interval
    }

    /// Whether a snapshot request is still unanswered.
    pub fn has_pending(&self) -> bool {
        self.pending.is_some()
    }

    /// Last fresh snapshot.
    pub fn last(&self) -> Option<&MonitorSnapshot> {
        self.last.as_ref()
    }

    /// Run one tick.
    ///
    /// Reuses the outstanding request if there is one, otherwise sends a new
    /// one, then waits up to one interval for the answer.
    pub async fn tick<S: SnapshotSink + ?Sized>(&mut self, sink: &mut S) -> StageResult<TickOutcome> {
        let mut rx = match self.pending.take() {
            Some(rx) => rx,
            None => self.handle.request_snapshot().await?,
        };

        match timeout(self.interval, &mut rx).await {
            Ok(Ok(snapshot)) => {
                sink.render(&snapshot);
                self.last = Some(snapshot);
                Ok(TickOutcome::Fresh)
            }
            Ok(Err(_)) => Err(StageError::ActorStopped),
            Err(_) => {
                self.pending = Some(rx);
                if let Some(last) = &self.last {
                    sink.render(&last.as_busy());
                }
                Ok(TickOutcome::Busy)
            }
        }
    }

    /// Tick until cancelled, or until `max_ticks` ticks have run. Returns the
    /// number of ticks.
    pub async fn run<S: SnapshotSink + ?Sized>(
        &mut self,
        sink: &mut S,
        cancel: &CancelToken,
        max_ticks: Option<u64>,
    ) -> StageResult<u64> {
        let mut ticker = interval(self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        let mut ticks = 0;
        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = ticker.tick() => {}
            }
            self.tick(sink).await?;
            ticks += 1;
            if max_ticks.is_some_and(|max| ticks >= max) {
                break;
            }
        }
        tracing::debug!(ticks, "Monitor stopped");
        Ok(ticks)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use piezo_core::units::ControlMode;

    fn connected() -> MonitorSnapshot {
        MonitorSnapshot {
            serial: "81858318".to_string(),
            stage: SessionStage::Enabled,
            controller: Some(ValueReading {
                value: 25.0,
                unit: Unit::Percent,
                mode: ControlMode::ClosedLoop,
            }),
            reader: Some(ReaderSnapshot {
                serial: "84858066".to_string(),
                stage: SessionStage::Enabled,
                position: Some(5.0),
                unit: Some(Unit::Micrometers),
                zeroing: false,
            }),
            calibrated: true,
            busy: false,
            error: None,
        }
    }

    #[test]
    fn test_format_connected() {
        assert_eq!(
            format_snapshot(&connected()),
            "S/N 81858318 [closed-loop] 25.000 % | reader 84858066: 5.000 μm calibrated"
        );
    }

    #[test]
    fn test_format_busy_and_zeroing() {
        let mut snapshot = connected().as_busy();
        snapshot.calibrated = false;
        if let Some(reader) = snapshot.reader.as_mut() {
            reader.zeroing = true;
        }
        let line = format_snapshot(&snapshot);
        assert!(line.ends_with("zeroing (busy)"), "{line}");
    }

    #[test]
    fn test_format_disconnected() {
        let snapshot = MonitorSnapshot {
            serial: "81858318".to_string(),
            stage: SessionStage::Failed,
            controller: None,
            reader: None,
            calibrated: false,
            busy: false,
            error: Some("Driver returned no piezo handle for serial 81858318".to_string()),
        };
        assert!(!snapshot.is_connected());
        assert_eq!(
            format_snapshot(&snapshot),
            "S/N 81858318: disconnected (failed): Driver returned no piezo handle for serial 81858318"
        );
    }

    #[test]
    fn test_format_failed_reader() {
        let mut snapshot = connected();
        snapshot.calibrated = false;
        snapshot.reader = Some(ReaderSnapshot {
            serial: "84858066".to_string(),
            stage: SessionStage::Failed,
            position: None,
            unit: None,
            zeroing: false,
        });
        assert!(format_snapshot(&snapshot).ends_with("| reader 84858066: disconnected (failed)"));
    }

    #[test]
    fn test_snapshot_json_shape() {
        let json = serde_json::to_value(connected()).unwrap();
        assert_eq!(json["stage"], "enabled");
        assert_eq!(json["controller"]["mode"], "closed_loop");
        assert_eq!(json["controller"]["unit"], "percent");
        assert_eq!(json["reader"]["position"], 5.0);
    }

    #[test]
    fn test_memory_sink_collects() {
        let mut sink = MemorySink::new();
        let view = sink.clone();
        sink.render(&connected());
        sink.render(&connected().as_busy());
        assert_eq!(view.snapshots().len(), 2);
        assert!(view.last().unwrap().busy);
    }
}
