use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use parking_lot::Mutex;

use mic_relay_core::{
    AudioFrame, AudioLevels, AudioSource, BackpressurePolicy, CaptureWorklet, ErrorKind, FrameSink, LossReporter,
    MicrophoneSource, QuantumFeeder, RelayError, ResourceFailure, ScriptedMicrophone, SessionConfig, SessionController,
    SessionDelegate, SessionState, SessionSummary, SinkError, StreamFormat, ToneMicrophone, WavFileSink,
};

/// Records every frame sequence it receives. Optionally holds each `send`
/// until released, or starts failing after `fail_after` frames.
#[derive(Clone, Default)]
struct CollectingSink {
    received: Arc<Mutex<Vec<u64>>>,
    entered: Arc<AtomicUsize>,
    closed: Arc<AtomicBool>,
    hold: Option<Arc<AtomicBool>>,
    fail_after: Option<usize>,
}

impl CollectingSink {
    fn failing_after(limit: usize) -> Self {
        Self {
            fail_after: Some(limit),
            ..Default::default()
        }
    }

    /// Every `send` waits until the returned flag is set.
    fn held() -> (Self, Arc<AtomicBool>) {
        let gate = Arc::new(AtomicBool::new(false));
        (
            Self {
                hold: Some(Arc::clone(&gate)),
                ..Default::default()
            },
            gate,
        )
    }

    fn sequences(&self) -> Vec<u64> {
        self.received.lock().clone()
    }

    /// Calls to `send` so far, including one still held.
    fn entered(&self) -> usize {
        self.entered.load(Ordering::SeqCst)
    }
}

impl FrameSink for CollectingSink {
    fn send(&mut self, frame: &AudioFrame) -> Result<(), SinkError> {
        self.entered.fetch_add(1, Ordering::SeqCst);
        if let Some(ref gate) = self.hold {
            while !gate.load(Ordering::Acquire) {
                thread::sleep(Duration::from_millis(1));
            }
        }
        let mut received = self.received.lock();
        if self.fail_after.is_some_and(|limit| received.len() >= limit) {
            return Err(SinkError::Rejected("upstream refused frame".into()));
        }
        received.push(frame.sequence());
        Ok(())
    }

    fn close(&mut self) -> Result<(), SinkError> {
        self.closed.store(true, Ordering::SeqCst);
        Ok(())
    }
}

#[derive(Default)]
struct RecordingDelegate {
    states: Mutex<Vec<(SessionState, bool)>>,
    errors: Mutex<Vec<RelayError>>,
    levels: Mutex<Vec<AudioLevels>>,
    summaries: Mutex<Vec<SessionSummary>>,
}

impl RecordingDelegate {
    fn states(&self) -> Vec<SessionState> {
        self.states.lock().iter().map(|(state, _)| *state).collect()
    }
}

impl SessionDelegate for RecordingDelegate {
    fn on_state_changed(&self, state: SessionState, muted: bool) {
        self.states.lock().push((state, muted));
    }

    fn on_levels_updated(&self, levels: &AudioLevels) {
        self.levels.lock().push(*levels);
    }

    fn on_error(&self, error: &RelayError) {
        self.errors.lock().push(error.clone());
    }

    fn on_session_finished(&self, summary: &SessionSummary) {
        self.summaries.lock().push(summary.clone());
    }
}

/// Reports the device lost from inside the `Muted` callback, then lingers
/// there so the loss is handled while the callback is still running.
struct LossOnMuteDelegate {
    feeder: QuantumFeeder,
    states: Mutex<Vec<SessionState>>,
}

impl SessionDelegate for LossOnMuteDelegate {
    fn on_state_changed(&self, state: SessionState, _muted: bool) {
        self.states.lock().push(state);
        if state == SessionState::Muted {
            self.feeder.simulate_loss(ResourceFailure::DeviceLost("unplugged".into()));
            thread::sleep(Duration::from_millis(100));
        }
    }

    fn on_error(&self, _error: &RelayError) {}
}

/// Accepts the worklet and immediately lets go of it.
#[derive(Default)]
struct DroppingMicrophone {
    released: Arc<AtomicUsize>,
}

impl MicrophoneSource for DroppingMicrophone {
    fn acquire(&mut self, config: &SessionConfig) -> Result<StreamFormat, ResourceFailure> {
        Ok(StreamFormat {
            sample_rate: config.sample_rate_hint,
            quantum_frames: config.quantum_frames,
        })
    }

    fn attach(&mut self, worklet: CaptureWorklet, _loss: LossReporter) -> Result<(), ResourceFailure> {
        drop(worklet);
        Ok(())
    }

    fn release(&mut self) {
        self.released.fetch_add(1, Ordering::SeqCst);
    }

    fn device_info(&self) -> AudioSource {
        AudioSource {
            id: "dropping".into(),
            name: "Dropping Microphone".into(),
            is_default: false,
            transport_type: None,
        }
    }
}

const QUANTUM: [f32; 128] = [0.25; 128];

fn init_logger() {
    let _ = env_logger::builder().is_test(true).try_init();
}

fn wait_until(what: &str, condition: impl Fn() -> bool) {
    let deadline = Instant::now() + Duration::from_secs(5);
    while !condition() {
        assert!(Instant::now() < deadline, "timed out waiting for {}", what);
        thread::sleep(Duration::from_millis(2));
    }
}

fn scripted_session(
    sink: CollectingSink,
    config: SessionConfig,
) -> (
    SessionController<ScriptedMicrophone, CollectingSink>,
    QuantumFeeder,
    Arc<RecordingDelegate>,
) {
    let (mic, feeder) = ScriptedMicrophone::new();
    let mut controller = SessionController::new(mic, sink, config).unwrap();
    let delegate = Arc::new(RecordingDelegate::default());
    controller.set_delegate(delegate.clone());
    (controller, feeder, delegate)
}

fn feed(feeder: &QuantumFeeder, quanta: usize) {
    for _ in 0..quanta {
        assert!(feeder.feed(&QUANTUM));
    }
}

#[test]
fn mute_window_withholds_exactly_the_muted_quanta() {
    init_logger();
    let sink = CollectingSink::default();
    let (mut controller, feeder, delegate) = scripted_session(sink.clone(), SessionConfig::default());

    controller.start().unwrap();
    assert_eq!(controller.state(), SessionState::Connected);

    feed(&feeder, 5);
    wait_until("the first five frames", || sink.sequences().len() == 5);
    controller.mute().unwrap();
    assert!(controller.is_muted());
    feed(&feeder, 3);
    controller.unmute().unwrap();
    feed(&feeder, 2);

    let summary = controller.stop().unwrap();

    assert_eq!(sink.sequences(), vec![0, 1, 2, 3, 4, 8, 9]);
    assert!(sink.closed.load(Ordering::SeqCst));
    assert_eq!(controller.state(), SessionState::Disconnected);
    assert_eq!(feeder.acquire_count(), 1);
    assert_eq!(feeder.release_count(), 1);

    assert_eq!(summary.final_state, SessionState::Disconnected);
    assert_eq!(summary.diagnostics.frames_received, 10);
    assert_eq!(summary.diagnostics.frames_forwarded, 7);
    assert_eq!(summary.diagnostics.frames_gated, 3);
    assert_eq!(summary.diagnostics.frames_dropped, 0);
    assert!(summary.is_clean());

    assert_eq!(
        *delegate.states.lock(),
        vec![
            (SessionState::Connecting, false),
            (SessionState::Connected, false),
            (SessionState::Muted, true),
            (SessionState::Connected, false),
            (SessionState::Disconnected, false),
        ]
    );
    assert_eq!(delegate.summaries.lock().len(), 1);
    assert!(delegate.errors.lock().is_empty());
}

#[test]
fn mute_drops_frames_already_queued_for_the_sink() {
    init_logger();
    let (sink, release) = CollectingSink::held();
    let (mut controller, feeder, _delegate) = scripted_session(sink.clone(), SessionConfig::default());

    controller.start().unwrap();
    feed(&feeder, 5);
    // Frame 0 is inside the held `send`; frames 1..5 are queued behind it.
    wait_until("the sink to hold the first frame", || {
        sink.entered() == 1 && controller.diagnostics().frames_received == 5
    });
    controller.mute().unwrap();
    release.store(true, Ordering::Release);
    feed(&feeder, 2);

    let summary = controller.stop().unwrap();
    assert_eq!(sink.sequences(), vec![0]);
    assert_eq!(sink.entered(), 1);
    assert_eq!(summary.diagnostics.frames_received, 7);
    assert_eq!(summary.diagnostics.frames_forwarded, 1);
    assert_eq!(summary.diagnostics.frames_gated, 6);
}

#[test]
fn delegate_sees_racing_transitions_in_order() {
    init_logger();
    let (mic, feeder) = ScriptedMicrophone::new();
    let mut controller = SessionController::new(mic, CollectingSink::default(), SessionConfig::default()).unwrap();
    let delegate = Arc::new(LossOnMuteDelegate {
        feeder: feeder.clone(),
        states: Mutex::new(Vec::new()),
    });
    controller.set_delegate(delegate.clone());

    controller.start().unwrap();
    controller.mute().unwrap();
    wait_until("loss teardown", || controller.state() == SessionState::Disconnected);
    controller.stop();

    assert_eq!(
        *delegate.states.lock(),
        vec![
            SessionState::Connecting,
            SessionState::Connected,
            SessionState::Muted,
            SessionState::Disconnected,
        ]
    );
    assert_eq!(delegate.states.lock().last(), Some(&controller.state()));
    assert_eq!(feeder.release_count(), 1);
}

#[test]
fn worklet_dropped_during_attach_fails_start() {
    init_logger();
    let mic = DroppingMicrophone::default();
    let released = Arc::clone(&mic.released);
    let mut controller = SessionController::new(mic, CollectingSink::default(), SessionConfig::default()).unwrap();
    let delegate = Arc::new(RecordingDelegate::default());
    controller.set_delegate(delegate.clone());

    let err = controller.start().unwrap_err();
    assert_eq!(
        err,
        RelayError::ChannelClosed {
            state: SessionState::Connecting
        }
    );
    assert_eq!(controller.state(), SessionState::Disconnected);
    assert_eq!(controller.last_error(), Some(err.clone()));
    assert_eq!(released.load(Ordering::SeqCst), 1);

    controller.stop();
    assert_eq!(released.load(Ordering::SeqCst), 1);
    assert_eq!(delegate.states(), vec![SessionState::Connecting, SessionState::Disconnected]);
    assert_eq!(*delegate.errors.lock(), vec![err]);
}

#[test]
fn denied_microphone_disconnects_without_opening_channel() {
    init_logger();
    let (mic, feeder) = ScriptedMicrophone::new();
    let mic = mic.deny_with(ResourceFailure::PermissionDenied);
    let mut controller = SessionController::new(mic, CollectingSink::default(), SessionConfig::default()).unwrap();
    let delegate = Arc::new(RecordingDelegate::default());
    controller.set_delegate(delegate.clone());

    let err = controller.start().unwrap_err();
    assert_eq!(
        err,
        RelayError::ResourceUnavailable {
            state: SessionState::Connecting,
            reason: ResourceFailure::PermissionDenied,
        }
    );
    assert_eq!(controller.state(), SessionState::Disconnected);
    assert_eq!(controller.last_error(), Some(err.clone()));
    assert_eq!(delegate.states(), vec![SessionState::Connecting, SessionState::Disconnected]);
    assert_eq!(*delegate.errors.lock(), vec![err]);

    // Nothing was attached, held, or released.
    assert!(!feeder.is_attached());
    assert!(!feeder.feed(&QUANTUM));
    assert_eq!(feeder.release_count(), 0);
    assert!(controller.stream_format().is_none());
    // The sink never left the controller.
    assert!(controller.sink().is_some());
}

#[test]
fn failed_attach_releases_the_acquired_microphone() {
    init_logger();
    let (mic, feeder) = ScriptedMicrophone::new();
    let mic = mic.fail_attach_with(ResourceFailure::DeviceNotAvailable);
    let mut controller = SessionController::new(mic, CollectingSink::default(), SessionConfig::default()).unwrap();

    let err = controller.start().unwrap_err();
    assert_eq!(err.kind(), ErrorKind::ResourceUnavailable);
    assert_eq!(controller.state(), SessionState::Disconnected);
    assert_eq!(feeder.acquire_count(), 1);
    assert_eq!(feeder.release_count(), 1);

    let summary = controller.stop().unwrap();
    assert!(!summary.is_clean());
    assert_eq!(feeder.release_count(), 1);
}

#[test]
fn sink_failure_after_ten_frames_stops_forwarding() {
    init_logger();
    let sink = CollectingSink::failing_after(10);
    let (mut controller, feeder, delegate) = scripted_session(sink.clone(), SessionConfig::default());

    controller.start().unwrap();
    for _ in 0..15 {
        if !feeder.feed(&QUANTUM) {
            break;
        }
    }
    wait_until("sink failure teardown", || controller.state() == SessionState::Disconnected);

    match controller.last_error() {
        Some(RelayError::SinkFailure { state, source }) => {
            assert_eq!(state, SessionState::Connected);
            assert_eq!(source, SinkError::Rejected("upstream refused frame".into()));
        }
        other => panic!("expected sink failure, got {:?}", other),
    }

    // No more quanta get through once the session is down.
    assert!(!feeder.feed(&QUANTUM));

    let summary = controller.stop().unwrap();
    assert_eq!(sink.sequences(), (0..10).collect::<Vec<u64>>());
    assert_eq!(summary.diagnostics.frames_forwarded, 10);
    assert!(summary.error.is_some());
    assert_eq!(feeder.release_count(), 1);
    assert_eq!(delegate.states().last(), Some(&SessionState::Disconnected));
    assert_eq!(
        delegate.errors.lock().iter().filter(|e| e.kind() == ErrorKind::SinkFailure).count(),
        1
    );
}

#[test]
fn stop_from_idle_is_a_no_op() {
    init_logger();
    let (mut controller, feeder, delegate) = scripted_session(CollectingSink::default(), SessionConfig::default());

    assert!(controller.stop().is_none());
    assert_eq!(controller.state(), SessionState::Idle);
    assert!(delegate.states.lock().is_empty());
    assert_eq!(feeder.release_count(), 0);
}

#[test]
fn events_outside_the_table_are_rejected() {
    init_logger();
    let (mut controller, _feeder, _delegate) = scripted_session(CollectingSink::default(), SessionConfig::default());

    assert_eq!(controller.mute().unwrap_err().kind(), ErrorKind::InvalidTransition);
    assert_eq!(controller.unmute().unwrap_err().kind(), ErrorKind::InvalidTransition);

    controller.start().unwrap();
    assert_eq!(controller.start().unwrap_err().kind(), ErrorKind::InvalidTransition);
    assert_eq!(controller.unmute().unwrap_err().kind(), ErrorKind::InvalidTransition);
    controller.mute().unwrap();
    assert_eq!(controller.mute().unwrap_err().kind(), ErrorKind::InvalidTransition);

    controller.stop().unwrap();
    assert_eq!(controller.start().unwrap_err().kind(), ErrorKind::InvalidTransition);
    assert!(controller.stop().is_some());
}

#[test]
fn unmute_does_not_reacquire_the_microphone() {
    init_logger();
    let (mut controller, feeder, _delegate) = scripted_session(CollectingSink::default(), SessionConfig::default());

    controller.start().unwrap();
    for _ in 0..3 {
        controller.mute().unwrap();
        controller.unmute().unwrap();
    }
    assert_eq!(feeder.acquire_count(), 1);
    assert_eq!(feeder.release_count(), 0);
    assert!(feeder.is_attached());

    controller.stop();
    assert_eq!(feeder.release_count(), 1);
}

#[test]
fn device_loss_disconnects_and_releases_once() {
    init_logger();
    let (mut controller, feeder, delegate) = scripted_session(CollectingSink::default(), SessionConfig::default());

    controller.start().unwrap();
    feed(&feeder, 2);
    assert!(feeder.simulate_loss(ResourceFailure::DeviceLost("unplugged".into())));
    wait_until("loss teardown", || controller.state() == SessionState::Disconnected);

    assert_eq!(
        controller.last_error(),
        Some(RelayError::ResourceUnavailable {
            state: SessionState::Connected,
            reason: ResourceFailure::DeviceLost("unplugged".into()),
        })
    );
    controller.stop();
    controller.stop();
    assert_eq!(feeder.release_count(), 1);
    assert_eq!(delegate.summaries.lock().len(), 1);
}

#[test]
fn drop_newest_sheds_frames_when_sink_lags() {
    init_logger();
    let (sink, gate) = CollectingSink::held();
    let config = SessionConfig {
        sink_queue_capacity: 1,
        backpressure: BackpressurePolicy::DropNewest,
        ..Default::default()
    };
    let (mut controller, feeder, delegate) = scripted_session(sink.clone(), config);

    controller.start().unwrap();
    feed(&feeder, 10);
    // The held sink owns one frame and the queue one more; the rest must go.
    wait_until("relay to shed frames", || {
        let d = controller.diagnostics();
        d.frames_received == 10 && d.frames_dropped == 8
    });

    gate.store(true, Ordering::Release);
    let summary = controller.stop().unwrap();

    let diagnostics = summary.diagnostics;
    assert_eq!(diagnostics.frames_dropped, 8);
    assert_eq!(diagnostics.frames_forwarded, 2);
    assert_eq!(diagnostics.backpressure_timeouts, 0);

    let sequences = sink.sequences();
    assert_eq!(sequences.len() as u64, diagnostics.frames_forwarded);
    assert!(sequences.windows(2).all(|w| w[0] < w[1]));
    assert!(delegate.errors.lock().is_empty());
}

#[test]
fn blocking_backpressure_times_out_without_leaving_connected() {
    init_logger();
    let (sink, gate) = CollectingSink::held();
    let config = SessionConfig {
        sink_queue_capacity: 1,
        backpressure: BackpressurePolicy::Block { timeout_ms: 10 },
        ..Default::default()
    };
    let (mut controller, feeder, delegate) = scripted_session(sink, config);

    controller.start().unwrap();
    feed(&feeder, 4);
    wait_until("a backpressure timeout", || {
        let d = controller.diagnostics();
        d.frames_received == 4 && d.backpressure_timeouts >= 1 && !delegate.errors.lock().is_empty()
    });

    assert_eq!(controller.state(), SessionState::Connected);
    assert!(controller.last_error().is_none());
    assert!(delegate
        .errors
        .lock()
        .iter()
        .all(|e| matches!(e, RelayError::TimeoutExceeded { timeout_ms: 10, .. }) && e.is_recoverable()));

    gate.store(true, Ordering::Release);
    let summary = controller.stop().unwrap();
    assert_eq!(summary.diagnostics.frames_dropped, summary.diagnostics.backpressure_timeouts);
    assert_eq!(
        summary.diagnostics.frames_forwarded + summary.diagnostics.frames_dropped,
        4
    );
    assert!(summary.is_clean());
}

#[test]
fn stop_racing_in_flight_frames_releases_once() {
    init_logger();
    let sink = CollectingSink::default();
    let (mut controller, feeder, _delegate) = scripted_session(sink.clone(), SessionConfig::default());
    controller.start().unwrap();

    let producer = {
        let feeder = feeder.clone();
        thread::spawn(move || {
            let mut fed = 0;
            while fed < 10_000 && feeder.feed(&QUANTUM) {
                fed += 1;
            }
            fed
        })
    };
    thread::sleep(Duration::from_millis(5));
    let summary = controller.stop().unwrap();
    producer.join().unwrap();

    assert_eq!(feeder.release_count(), 1);
    assert_eq!(controller.state(), SessionState::Disconnected);

    let sequences = sink.sequences();
    assert_eq!(sequences.len() as u64, summary.diagnostics.frames_forwarded);
    assert!(sequences.windows(2).all(|w| w[0] < w[1]));
    assert!(!feeder.feed(&QUANTUM));
}

#[test]
fn levels_are_metered_and_reported() {
    init_logger();
    let config = SessionConfig {
        level_update_interval: 1,
        ..Default::default()
    };
    let (mut controller, feeder, delegate) = scripted_session(CollectingSink::default(), config);

    controller.start().unwrap();
    controller.mute().unwrap();
    feed(&feeder, 3);
    wait_until("level callbacks", || delegate.levels.lock().len() == 3);

    // Metering continues while muted.
    let levels = controller.current_levels();
    assert!((levels.rms - 0.25).abs() < 1e-4);
    assert!((levels.peak - 0.25).abs() < 1e-6);
    controller.stop();
}

#[test]
fn empty_quanta_produce_no_frames() {
    init_logger();
    let sink = CollectingSink::default();
    let (mut controller, feeder, _delegate) = scripted_session(sink.clone(), SessionConfig::default());

    controller.start().unwrap();
    assert!(feeder.feed_empty());
    assert!(feeder.feed(&[]));
    feed(&feeder, 1);
    let summary = controller.stop().unwrap();

    assert_eq!(sink.sequences(), vec![0]);
    assert_eq!(summary.diagnostics.frames_received, 1);
}

#[test]
fn invalid_config_is_rejected_up_front() {
    let (mic, _feeder) = ScriptedMicrophone::new();
    let config = SessionConfig {
        channel_capacity: 0,
        ..Default::default()
    };
    let result = SessionController::new(mic, CollectingSink::default(), config);
    assert!(matches!(result, Err(RelayError::ConfigurationFailed(_))));
}

#[test]
fn dropping_a_live_controller_releases_the_microphone() {
    init_logger();
    let (mut controller, feeder, delegate) = scripted_session(CollectingSink::default(), SessionConfig::default());
    controller.start().unwrap();
    feed(&feeder, 2);
    drop(controller);

    assert_eq!(feeder.release_count(), 1);
    assert_eq!(delegate.states().last(), Some(&SessionState::Disconnected));
}

#[test]
fn tone_source_records_to_wav() {
    init_logger();
    let path = std::env::temp_dir().join(format!("mic_relay_tone_{}.wav", uuid::Uuid::new_v4()));
    let sink = WavFileSink::create(&path, 48000, None).unwrap();
    let config = SessionConfig {
        quantum_frames: 480,
        ..Default::default()
    };
    let mut controller = SessionController::new(ToneMicrophone::new(440.0, 0.5), sink, config).unwrap();

    controller.start().unwrap();
    assert_eq!(controller.stream_format().map(|f| f.sample_rate), Some(48000));
    wait_until("tone frames", || controller.diagnostics().frames_forwarded >= 3);
    let summary = controller.stop().unwrap();

    let sink = controller.take_sink().unwrap();
    assert_eq!(sink.frames_written(), summary.diagnostics.frames_forwarded);
    assert_eq!(sink.samples_written(), sink.frames_written() * 480);
    assert!(sink.checksum().is_some());

    mic_relay_core::storage::metadata::attach_summary(&path, &summary).unwrap();
    let metadata = mic_relay_core::storage::metadata::read_metadata(&path).unwrap();
    assert_eq!(metadata.session.map(|s| s.session_id), Some(controller.session_id()));

    std::fs::remove_file(&path).ok();
    std::fs::remove_file(mic_relay_core::storage::metadata::metadata_path(&path)).ok();
}
