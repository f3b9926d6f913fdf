//! Controller behaviour against the simulated Kinesis backend.
//!
//! All tests run on a paused clock, so multi-second settle sequences finish
//! instantly and their timing can be asserted exactly.

use std::time::Duration;

use piezo_core::cancel::{cancel_pair, CancelToken};
use piezo_core::capabilities::PiezoSettings;
use piezo_core::error::{DriverErrorKind, PiezoError};
use piezo_core::units::{ControlMode, HubAnalogueInput, Unit, VoltageSource};
use piezo_driver_mock::{DriverCall, ErrorConfig, ErrorScenario, MockKinesis, ResponseCurve};
use piezo_driver_thorlabs::{PiezoController, PiezoTuning, SessionStage};
use tokio::time::Instant;

const PIEZO: &str = "81858318";
const READER: &str = "84858066";

fn backend(curve: ResponseCurve) -> MockKinesis {
    MockKinesis::builder()
        .with_piezo(PIEZO)
        .with_strain_gauge(READER)
        .response(curve)
        .build()
}

fn reference_curve() -> ResponseCurve {
    ResponseCurve::new(vec![(10.0, 5.0), (70.0, 25.0)]).unwrap()
}

async fn initialized(backend: &MockKinesis, with_reader: bool) -> PiezoController {
    let reader = with_reader.then(|| READER.to_string());
    let mut controller = PiezoController::new(PIEZO, reader);
    controller
        .initialize(backend, &CancelToken::never())
        .await
        .unwrap();
    controller
}

async fn closed_loop(backend: &MockKinesis) -> PiezoController {
    let mut controller = initialized(backend, true).await;
    controller.set_closed_loop().await.unwrap();
    controller
}

// =============================================================================
// Initialization
// =============================================================================

#[tokio::test(start_paused = true)]
async fn test_no_devices_means_no_connect() {
    let backend = MockKinesis::builder().build();
    let mut controller = PiezoController::new(PIEZO, Some(READER.into()));
    let err = controller
        .initialize(&backend, &CancelToken::never())
        .await
        .unwrap_err();

    assert!(matches!(err, PiezoError::DiscoveryFailed { .. }));
    assert_eq!(backend.journal().count(|c| *c == DriverCall::Connect), 0);
    assert_eq!(controller.stage(), SessionStage::Failed);
    assert!(matches!(
        controller.get_value().await,
        Err(PiezoError::NotConnected { .. })
    ));
}

#[tokio::test(start_paused = true)]
async fn test_initialize_sequence_and_timing() {
    let backend = backend(ResponseCurve::default());
    let start = Instant::now();
    let controller = initialized(&backend, true).await;

    assert!(controller.is_enabled());
    // Controller and reader each spend two 500 ms settles.
    assert_eq!(start.elapsed(), Duration::from_secs(2));

    let tuned = PiezoSettings {
        max_output_voltage: 75.0,
        voltage_step: 1.0,
        percentage_step: 1.0,
        hub_mode: HubAnalogueInput::AnalogueInput1,
    };
    assert_eq!(
        backend.journal().calls_for(PIEZO),
        vec![
            DriverCall::Connect,
            DriverCall::StartPolling {
                interval: Duration::from_millis(250)
            },
            DriverCall::EnableDevice,
            DriverCall::LoadConfiguration,
            DriverCall::ApplySettings {
                settings: tuned,
                persist: false
            },
        ]
    );
    assert_eq!(
        backend.journal().calls_for(READER),
        vec![
            DriverCall::Connect,
            DriverCall::StartPolling {
                interval: Duration::from_millis(250)
            },
            DriverCall::EnableDevice,
            DriverCall::LoadConfiguration,
            DriverCall::SetLeds(120),
        ]
    );

    let journal = backend.journal();
    let polling = journal
        .find(PIEZO, |c| matches!(c, DriverCall::StartPolling { .. }))
        .unwrap();
    let enable = journal.find(PIEZO, |c| *c == DriverCall::EnableDevice).unwrap();
    let configure = journal
        .find(PIEZO, |c| *c == DriverCall::LoadConfiguration)
        .unwrap();
    assert_eq!(enable.at - polling.at, Duration::from_millis(500));
    assert_eq!(configure.at - enable.at, Duration::from_millis(500));
}

#[tokio::test(start_paused = true)]
async fn test_settings_wait_only_when_pending() {
    let backend = MockKinesis::builder()
        .with_piezo(PIEZO)
        .settings_pending(PIEZO)
        .build();
    initialized(&backend, false).await;

    let calls = backend.journal().calls_for(PIEZO);
    assert_eq!(calls[0], DriverCall::Connect);
    assert_eq!(
        calls[1],
        DriverCall::WaitForSettingsInitialized {
            timeout: Duration::from_millis(5000)
        }
    );
    assert!(matches!(calls[2], DriverCall::StartPolling { .. }));
}

#[tokio::test(start_paused = true)]
async fn test_tuning_is_never_persisted() {
    let backend = backend(ResponseCurve::default());
    let mut controller = PiezoController::new(PIEZO, None).with_tuning(PiezoTuning {
        max_output_voltage: 100.0,
        ..PiezoTuning::default()
    });
    controller
        .initialize(&backend, &CancelToken::never())
        .await
        .unwrap();

    let piezo = backend.piezo(PIEZO).unwrap();
    assert_eq!(piezo.applied_settings().max_output_voltage, 100.0);
    assert!(piezo.persisted_settings().is_none());
    assert_eq!(piezo.polling_interval(), Some(Duration::from_millis(250)));
}

#[tokio::test(start_paused = true)]
async fn test_null_piezo_handle() {
    let backend = MockKinesis::builder().with_null_device(PIEZO).build();
    let mut controller = PiezoController::new(PIEZO, None);
    let err = controller
        .initialize(&backend, &CancelToken::never())
        .await
        .unwrap_err();

    assert!(matches!(err, PiezoError::NullDevice { device: "piezo", .. }));
    assert_eq!(controller.stage(), SessionStage::Failed);
    assert!(matches!(
        controller.moveup().await,
        Err(PiezoError::NotConnected { .. })
    ));
}

#[tokio::test(start_paused = true)]
async fn test_failed_reader_does_not_fail_controller() {
    let backend = MockKinesis::builder()
        .with_piezo(PIEZO)
        .with_null_device(READER)
        .build();
    let controller = initialized(&backend, true).await;

    assert!(controller.is_enabled());
    let reader = controller.reader().unwrap();
    assert_eq!(reader.stage(), SessionStage::Failed);
    assert!(matches!(
        controller.get_pos().await,
        Err(PiezoError::NotConnected { .. })
    ));
}

#[tokio::test(start_paused = true)]
async fn test_failed_reader_refuses_calibration_before_moving() {
    let backend = MockKinesis::builder()
        .with_piezo(PIEZO)
        .with_null_device(READER)
        .build();
    let mut controller = initialized(&backend, true).await;
    controller.set_closed_loop().await.unwrap();
    let journal = backend.journal();
    journal.clear();

    let start = Instant::now();
    let err = controller
        .calibrate_pos(&CancelToken::never())
        .await
        .unwrap_err();
    assert!(matches!(err, PiezoError::NotConnected { ref serial } if serial == READER));
    assert_eq!(start.elapsed(), Duration::ZERO);

    assert!(matches!(
        controller.move_pos_up().await,
        Err(PiezoError::NotConnected { .. })
    ));
    assert!(matches!(
        controller.move_pos_down().await,
        Err(PiezoError::NotConnected { .. })
    ));
    assert!(journal.percentage_commands().is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_reader_operations_without_reader() {
    let backend = backend(ResponseCurve::default());
    let mut controller = initialized(&backend, false).await;

    assert_eq!(controller.get_pos().await, Err(PiezoError::ReaderNotConfigured));
    assert_eq!(controller.set_zero().await, Err(PiezoError::ReaderNotConfigured));
    controller.set_closed_loop().await.unwrap();
    assert_eq!(
        controller.calibrate_pos(&CancelToken::never()).await,
        Err(PiezoError::ReaderNotConfigured)
    );
}

// =============================================================================
// Mode switching
// =============================================================================

#[tokio::test(start_paused = true)]
async fn test_set_closed_loop_writes_each_step_once() {
    let backend = backend(ResponseCurve::default());
    let mut controller = initialized(&backend, true).await;
    let journal = backend.journal();
    journal.clear();

    controller.set_closed_loop().await.unwrap();
    let calls = journal.calls_for(PIEZO);
    assert_eq!(
        calls[0],
        DriverCall::SetVoltageSource(VoltageSource::SoftwareAndPotentiometer)
    );
    assert!(matches!(
        calls[1],
        DriverCall::ApplySettings { settings, persist: false }
            if settings.hub_mode == HubAnalogueInput::ExternalSma
    ));
    assert_eq!(
        calls[2],
        DriverCall::SetPositionControlMode(ControlMode::ClosedLoop)
    );
    assert_eq!(calls.len(), 3);

    journal.clear();
    controller.set_closed_loop().await.unwrap();
    assert!(journal.is_empty());
    assert!(controller.is_closed_loop().await.unwrap());
}

#[tokio::test(start_paused = true)]
async fn test_set_open_loop_when_already_open_writes_no_mode() {
    let backend = backend(ResponseCurve::default());
    let mut controller = initialized(&backend, true).await;
    backend.piezo(PIEZO).unwrap().preset_mode(ControlMode::OpenLoop);
    let journal = backend.journal();
    journal.clear();

    controller.set_open_loop().await.unwrap();
    assert_eq!(
        journal.count(|c| matches!(c, DriverCall::SetPositionControlMode(_))),
        0
    );
    assert!(journal.is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_round_trip_between_modes() {
    let backend = backend(ResponseCurve::default());
    let mut controller = closed_loop(&backend).await;
    controller.set_open_loop().await.unwrap();

    let piezo = backend.piezo(PIEZO).unwrap();
    assert_eq!(piezo.control_mode(), ControlMode::OpenLoop);
    assert_eq!(
        piezo.applied_settings().hub_mode,
        HubAnalogueInput::AnalogueInput1
    );
    assert_eq!(
        piezo.current_voltage_source(),
        VoltageSource::SoftwareAndPotentiometer
    );
    assert!(piezo.persisted_settings().is_none());
}

// =============================================================================
// Values and units
// =============================================================================

#[tokio::test(start_paused = true)]
async fn test_value_unit_pairing() {
    let backend = backend(ResponseCurve::default());
    let mut controller = initialized(&backend, true).await;

    controller.set_value(30.0).await.unwrap();
    let open = controller.read_value().await.unwrap();
    assert_eq!(open.mode, ControlMode::OpenLoop);
    assert_eq!(open.unit, Unit::Volts);
    assert!((open.value - 30.0).abs() < 1e-9);
    assert_eq!(controller.get_units().await.unwrap(), Unit::Volts);

    controller.set_closed_loop().await.unwrap();
    controller.set_value(25.0).await.unwrap();
    let closed = controller.read_value().await.unwrap();
    assert_eq!(closed.mode, ControlMode::ClosedLoop);
    assert_eq!(closed.unit, Unit::Percent);
    assert_eq!(closed.value, 25.0);
    assert_eq!(controller.get_value().await.unwrap(), 25.0);
    assert_eq!(controller.get_units().await.unwrap(), Unit::Percent);
}

#[tokio::test(start_paused = true)]
async fn test_jog_and_home() {
    let backend = backend(ResponseCurve::default());
    let mut controller = closed_loop(&backend).await;

    controller.moveup().await.unwrap();
    controller.moveup().await.unwrap();
    controller.movedown().await.unwrap();
    assert_eq!(controller.get_value().await.unwrap(), 1.0);

    controller.move_to_home().await.unwrap();
    assert_eq!(backend.journal().percentage_commands().last(), Some(&0.0));
    assert_eq!(controller.get_value().await.unwrap(), 0.0);
}

#[tokio::test(start_paused = true)]
async fn test_reader_position_and_units_passthrough() {
    let backend = backend(ResponseCurve::default());
    let mut controller = closed_loop(&backend).await;
    controller.set_value(50.0).await.unwrap();

    assert_eq!(controller.get_pos().await.unwrap(), 10.0);
    let reader = controller.reader().unwrap();
    assert_eq!(reader.get_units().await.unwrap(), Unit::Micrometers);
    assert!(!controller.is_zeroing().await.unwrap());
}

// =============================================================================
// Calibration
// =============================================================================

#[tokio::test(start_paused = true)]
async fn test_reference_calibration() {
    let backend = backend(reference_curve());
    let mut controller = closed_loop(&backend).await;
    let journal = backend.journal();
    journal.clear();

    let start = Instant::now();
    let fit = controller
        .calibrate_pos(&CancelToken::never())
        .await
        .unwrap();

    assert_eq!(fit.slope, 3.0);
    assert_eq!(fit.intercept, -5.0);
    assert_eq!(journal.percentage_commands(), vec![10.0, 70.0, -2.0]);
    assert_eq!(start.elapsed(), Duration::from_millis(9020));
    assert!(controller.calibration().is_calibrated());
}

#[tokio::test(start_paused = true)]
async fn test_calibration_settles_before_sampling() {
    let backend = backend(reference_curve());
    let mut controller = closed_loop(&backend).await;
    let journal = backend.journal();
    journal.clear();

    let start = Instant::now();
    controller
        .calibrate_pos(&CancelToken::never())
        .await
        .unwrap();

    let entries = journal.entries();
    let commands: Vec<_> = entries
        .iter()
        .filter(|e| matches!(e.call, DriverCall::SetPercentageTravel(_)))
        .map(|e| e.at - start)
        .collect();
    assert_eq!(
        commands,
        vec![
            Duration::from_millis(1000),
            Duration::from_millis(5010),
            Duration::from_millis(9020),
        ]
    );
}

#[tokio::test(start_paused = true)]
async fn test_degenerate_calibration_issues_no_derived_command() {
    let backend = backend(ResponseCurve::flat(12.0));
    let mut controller = closed_loop(&backend).await;
    let journal = backend.journal();
    journal.clear();

    let err = controller
        .calibrate_pos(&CancelToken::never())
        .await
        .unwrap_err();

    assert_eq!(err, PiezoError::CalibrationFailed { x1: 12.0, x2: 12.0 });
    assert_eq!(journal.percentage_commands(), vec![10.0, 70.0]);
    assert!(!controller.calibration().is_calibrated());
    assert_eq!(
        controller.move_to_pos(1.0).await,
        Err(PiezoError::ModelNotCalibrated)
    );
}

#[tokio::test(start_paused = true)]
async fn test_reader_fault_during_calibration() {
    let backend = MockKinesis::builder()
        .with_piezo(PIEZO)
        .with_strain_gauge(READER)
        .response(reference_curve())
        .error_config(ErrorConfig::scenario(ErrorScenario::FailAfterN {
            operation: "reading",
            count: 1,
        }))
        .build();
    let mut controller = closed_loop(&backend).await;
    let journal = backend.journal();
    journal.clear();

    let err = controller
        .calibrate_pos(&CancelToken::never())
        .await
        .unwrap_err();

    // First sample succeeds, the second read faults.
    assert!(matches!(err, PiezoError::Driver(ref e) if e.kind == DriverErrorKind::Hardware));
    assert!(!err.is_recoverable());
    assert_eq!(journal.percentage_commands(), vec![10.0, 70.0]);
    assert!(!controller.calibration().is_calibrated());
    assert!(controller.is_enabled());
}

#[tokio::test(start_paused = true)]
async fn test_calibration_requires_closed_loop() {
    let backend = backend(reference_curve());
    let mut controller = initialized(&backend, true).await;
    let journal = backend.journal();
    journal.clear();

    let err = controller
        .calibrate_pos(&CancelToken::never())
        .await
        .unwrap_err();
    assert_eq!(
        err,
        PiezoError::WrongMode {
            expected: ControlMode::ClosedLoop
        }
    );
    assert!(journal.percentage_commands().is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_cancelled_calibration_leaves_model_unset() {
    let backend = backend(reference_curve());
    let mut controller = closed_loop(&backend).await;
    controller
        .calibrate_pos(&CancelToken::never())
        .await
        .unwrap();

    let (handle, token) = cancel_pair();
    let canceller = tokio::spawn(async move {
        tokio::time::sleep(Duration::from_secs(3)).await;
        handle.cancel();
    });
    let err = controller.calibrate_pos(&token).await.unwrap_err();
    canceller.await.unwrap();

    assert_eq!(err, PiezoError::Cancelled);
    assert!(!controller.calibration().is_calibrated());
}

#[tokio::test(start_paused = true)]
async fn test_move_to_pos_uses_fit() {
    let backend = backend(reference_curve());
    let mut controller = closed_loop(&backend).await;
    controller
        .calibrate_pos(&CancelToken::never())
        .await
        .unwrap();

    controller.move_to_pos(15.0).await.unwrap();
    assert_eq!(backend.journal().percentage_commands().last(), Some(&40.0));
    assert_eq!(controller.get_pos().await.unwrap(), 15.0);

    controller.move_pos_to_home().await.unwrap();
    assert_eq!(backend.journal().percentage_commands().last(), Some(&-5.0));
}

#[tokio::test(start_paused = true)]
async fn test_move_to_pos_without_calibration() {
    let backend = backend(reference_curve());
    let mut controller = closed_loop(&backend).await;
    assert_eq!(
        controller.move_to_pos(1.0).await,
        Err(PiezoError::ModelNotCalibrated)
    );
    assert_eq!(
        controller.move_pos_to_home().await,
        Err(PiezoError::ModelNotCalibrated)
    );
}

#[tokio::test(start_paused = true)]
async fn test_open_loop_discards_calibration() {
    let backend = backend(reference_curve());
    let mut controller = closed_loop(&backend).await;
    controller
        .calibrate_pos(&CancelToken::never())
        .await
        .unwrap();

    controller.set_open_loop().await.unwrap();
    assert!(!controller.calibration().is_calibrated());

    controller.set_closed_loop().await.unwrap();
    assert_eq!(
        controller.move_to_pos(1.0).await,
        Err(PiezoError::ModelNotCalibrated)
    );
}

#[tokio::test(start_paused = true)]
async fn test_out_of_band_mode_change_makes_model_stale() {
    let backend = backend(reference_curve());
    let mut controller = closed_loop(&backend).await;
    controller
        .calibrate_pos(&CancelToken::never())
        .await
        .unwrap();
    let journal = backend.journal();
    journal.clear();

    backend
        .piezo(PIEZO)
        .unwrap()
        .force_control_mode(ControlMode::OpenLoop);

    assert_eq!(
        controller.move_to_pos(3.0).await,
        Err(PiezoError::ModelNotCalibrated)
    );
    assert!(!controller.calibration().is_calibrated());
    assert!(journal.percentage_commands().is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_zeroing_discards_calibration() {
    let backend = backend(reference_curve());
    let mut controller = closed_loop(&backend).await;
    controller
        .calibrate_pos(&CancelToken::never())
        .await
        .unwrap();

    controller.set_zero().await.unwrap();
    assert!(!controller.calibration().is_calibrated());
    assert_eq!(
        backend.journal().count(|c| *c == DriverCall::SetZero),
        1
    );
}

// =============================================================================
// Soft travel bounds
// =============================================================================

async fn calibrated_on_default_curve(backend: &MockKinesis) -> PiezoController {
    // Default curve: x = extension / 5, so the fit is slope 5, intercept 0.
    let mut controller = closed_loop(backend).await;
    let fit = controller
        .calibrate_pos(&CancelToken::never())
        .await
        .unwrap();
    assert_eq!(fit.slope, 5.0);
    assert_eq!(fit.intercept, 0.0);
    backend.journal().clear();
    controller
}

#[tokio::test(start_paused = true)]
async fn test_move_pos_up_stops_at_soft_max() {
    let backend = backend(ResponseCurve::default());
    let mut controller = calibrated_on_default_curve(&backend).await;

    backend.axis().set_extension(95.0);
    assert_eq!(controller.get_pos().await.unwrap(), 19.0);
    assert!(!controller.move_pos_up().await.unwrap());
    assert!(backend.journal().percentage_commands().is_empty());

    backend.axis().set_extension(90.0);
    assert!(controller.move_pos_up().await.unwrap());
    assert_eq!(backend.journal().percentage_commands(), vec![95.0]);
}

#[tokio::test(start_paused = true)]
async fn test_move_pos_down_stops_at_soft_min() {
    let backend = backend(ResponseCurve::default());
    let mut controller = calibrated_on_default_curve(&backend).await;

    backend.axis().set_extension(5.0);
    assert_eq!(controller.get_pos().await.unwrap(), 1.0);
    assert!(!controller.move_pos_down().await.unwrap());
    assert!(backend.journal().percentage_commands().is_empty());

    backend.axis().set_extension(10.0);
    assert!(controller.move_pos_down().await.unwrap());
    assert_eq!(backend.journal().percentage_commands(), vec![5.0]);
}

#[tokio::test(start_paused = true)]
async fn test_non_finite_reading_is_not_stepped() {
    let backend = backend(ResponseCurve::default());
    let mut controller = calibrated_on_default_curve(&backend).await;

    // A NaN extension propagates through the response curve to the reading.
    backend.axis().set_extension(f64::NAN);
    assert!(controller.get_pos().await.unwrap().is_nan());

    for result in [
        controller.move_pos_up().await,
        controller.move_pos_down().await,
    ] {
        assert!(matches!(
            result,
            Err(PiezoError::InvalidReading { ref serial, ref value }) if serial == READER && value.is_nan()
        ));
    }
    assert!(backend.journal().percentage_commands().is_empty());
    assert!(controller.calibration().is_calibrated());
}
