use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread;

use chrono::{DateTime, Utc};
use crossbeam_channel::bounded;
use parking_lot::Mutex;
use uuid::Uuid;

use crate::channel::frame_channel::{frame_channel, ChannelCloser, FrameChannel, FramePort, LossReporter};
use crate::models::audio_models::{AudioLevels, AudioSource, SessionDiagnostics, StreamFormat};
use crate::models::config::SessionConfig;
use crate::models::error::{RelayError, ResourceFailure};
use crate::models::session_summary::SessionSummary;
use crate::models::state::{transition, Effect, SessionEvent, SessionState, Transition};
use crate::traits::frame_sink::FrameSink;
use crate::traits::microphone::MicrophoneSource;
use crate::traits::session_delegate::SessionDelegate;
use crate::worklet::capture_worklet::{CaptureWorklet, WorkletHandle};

use super::gate::MuteGate;
use super::relay::{run_sink, Relay};

#[derive(Debug, Default)]
pub(crate) struct Counters {
    pub(crate) received: AtomicU64,
    pub(crate) forwarded: AtomicU64,
    pub(crate) gated: AtomicU64,
    pub(crate) dropped: AtomicU64,
    pub(crate) timeouts: AtomicU64,
}

/// State machine plus the handles its effects act on.
struct Inner {
    state: SessionState,
    last_error: Option<RelayError>,
    format: Option<StreamFormat>,
    worklet: Option<WorkletHandle>,
    closer: Option<ChannelCloser>,
}

/// One delegate callback waiting to be delivered.
enum Notice {
    State(SessionState),
    Error(RelayError),
    Levels(AudioLevels),
    Finished(SessionSummary),
}

/// Delegate callbacks in the order their causes happened.
///
/// Whichever thread finds the outbox idle drains it; others only enqueue.
#[derive(Default)]
struct Outbox {
    queue: VecDeque<Notice>,
    draining: bool,
}

/// Everything the caller, relay, and sink threads share.
pub(crate) struct Shared<M: MicrophoneSource> {
    inner: Mutex<Inner>,
    mic: Mutex<M>,
    mic_held: AtomicBool,
    pub(crate) gate: Mutex<MuteGate>,
    pub(crate) counters: Counters,
    pub(crate) levels: Mutex<AudioLevels>,
    delegate: Mutex<Option<Arc<dyn SessionDelegate>>>,
    outbox: Mutex<Outbox>,
}

impl<M: MicrophoneSource> Shared<M> {
    pub(crate) fn state(&self) -> SessionState {
        self.inner.lock().state
    }

    /// Apply `event`, run the effects that act on existing handles, then
    /// notify the delegate with no lock held.
    ///
    /// `make_error` receives the originating state and decides the error
    /// recorded with this transition, if any. Notices are queued while the
    /// transition is still locked, so the delegate sees states in the order
    /// they were taken even when threads race.
    fn dispatch<F>(&self, event: SessionEvent, make_error: F) -> Result<Transition, RelayError>
    where
        F: FnOnce(SessionState) -> Option<RelayError>,
    {
        let accepted = {
            let mut inner = self.inner.lock();
            let accepted = transition(inner.state, event)?;
            let error = make_error(accepted.from);
            inner.state = accepted.to;
            if let Some(ref e) = error {
                inner.last_error = Some(e.clone());
            }
            for effect in accepted.effects {
                self.run_effect(&mut inner, *effect);
            }

            let mut outbox = self.outbox.lock();
            outbox.queue.push_back(Notice::State(accepted.to));
            if let Some(e) = error {
                outbox.queue.push_back(Notice::Error(e));
            }
            accepted
        };

        log::info!("session {} -> {} on {}", accepted.from, accepted.to, event);
        self.flush_notices();
        Ok(accepted)
    }

    /// Drive the session to `Disconnected` because of a failure.
    ///
    /// A session that already left the live states ignores the event.
    pub(crate) fn fail<F>(&self, event: SessionEvent, make_error: F)
    where
        F: FnOnce(SessionState) -> RelayError,
    {
        if let Err(rejected) = self.dispatch(event, |state| Some(make_error(state))) {
            log::debug!("ignoring failure after teardown: {}", rejected);
        }
    }

    fn run_effect(&self, inner: &mut Inner, effect: Effect) {
        match effect {
            Effect::CloseGate => {
                if let Some(ref worklet) = inner.worklet {
                    self.gate.lock().close(worklet.next_sequence());
                }
            }
            Effect::OpenGate => {
                if let Some(ref worklet) = inner.worklet {
                    self.gate.lock().open(worklet.next_sequence());
                }
            }
            Effect::StopWorklet => {
                if let Some(ref worklet) = inner.worklet {
                    worklet.stop();
                }
            }
            Effect::CloseChannel => {
                if let Some(ref mut closer) = inner.closer {
                    if closer.close() {
                        log::debug!("frame channel closed");
                    }
                }
            }
            Effect::ReleaseResource => self.release_microphone(),
            // Performed step by step by `SessionController::start`.
            Effect::AcquireResource | Effect::OpenChannel | Effect::RegisterWorklet => {}
        }
    }

    fn release_microphone(&self) {
        if self.mic_held.swap(false, Ordering::AcqRel) {
            self.mic.lock().release();
            log::info!("microphone released");
        }
    }

    fn delegate(&self) -> Option<Arc<dyn SessionDelegate>> {
        self.delegate.lock().clone()
    }

    fn notify(&self, notice: Notice) {
        self.outbox.lock().queue.push_back(notice);
        self.flush_notices();
    }

    pub(crate) fn notify_error(&self, error: &RelayError) {
        self.notify(Notice::Error(error.clone()));
    }

    pub(crate) fn notify_levels(&self, levels: &AudioLevels) {
        self.notify(Notice::Levels(*levels));
    }

    /// Deliver queued notices unless another thread already is.
    ///
    /// A delegate that calls back into the controller only enqueues; the
    /// outer loop delivers its notices once the callback returns.
    fn flush_notices(&self) {
        {
            let mut outbox = self.outbox.lock();
            if outbox.draining {
                return;
            }
            outbox.draining = true;
        }

        loop {
            let next = {
                let mut outbox = self.outbox.lock();
                match outbox.queue.pop_front() {
                    Some(notice) => notice,
                    None => {
                        outbox.draining = false;
                        return;
                    }
                }
            };
            let Some(delegate) = self.delegate() else {
                continue;
            };
            match next {
                Notice::State(state) => delegate.on_state_changed(state, state.is_muted()),
                Notice::Error(ref error) => delegate.on_error(error),
                Notice::Levels(ref levels) => delegate.on_levels_updated(levels),
                Notice::Finished(ref summary) => delegate.on_session_finished(summary),
            }
        }
    }
}

/// Owns one microphone relay session.
///
/// Generic over the microphone backend and the downstream sink:
/// ```text
/// [MicrophoneSource] → [CaptureWorklet] → [FrameChannel] → relay thread ─┐
///                                                                        ├→ [sink queue] → sink thread → [FrameSink]
///                                          [MuteGate] ───────────────────┘
/// ```
///
/// A controller runs a single session. Once it reaches `Disconnected`, build
/// a new one to capture again.
pub struct SessionController<M: MicrophoneSource, K: FrameSink> {
    config: SessionConfig,
    shared: Arc<Shared<M>>,
    session_id: Uuid,
    started_at: Option<DateTime<Utc>>,
    sink: Option<K>,
    relay_handle: Option<thread::JoinHandle<()>>,
    sink_handle: Option<thread::JoinHandle<K>>,
    summary: Option<SessionSummary>,
}

impl<M: MicrophoneSource, K: FrameSink> SessionController<M, K> {
    pub fn new(mic: M, sink: K, config: SessionConfig) -> Result<Self, RelayError> {
        config.validate().map_err(RelayError::ConfigurationFailed)?;

        Ok(Self {
            config,
            shared: Arc::new(Shared {
                inner: Mutex::new(Inner {
                    state: SessionState::Idle,
                    last_error: None,
                    format: None,
                    worklet: None,
                    closer: None,
                }),
                mic: Mutex::new(mic),
                mic_held: AtomicBool::new(false),
                gate: Mutex::new(MuteGate::new()),
                counters: Counters::default(),
                levels: Mutex::new(AudioLevels::default()),
                delegate: Mutex::new(None),
                outbox: Mutex::new(Outbox::default()),
            }),
            session_id: Uuid::new_v4(),
            started_at: None,
            sink: Some(sink),
            relay_handle: None,
            sink_handle: None,
            summary: None,
        })
    }

    pub fn set_delegate(&mut self, delegate: Arc<dyn SessionDelegate>) {
        *self.shared.delegate.lock() = Some(delegate);
    }

    pub fn session_id(&self) -> Uuid {
        self.session_id
    }

    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    pub fn state(&self) -> SessionState {
        self.shared.state()
    }

    pub fn is_muted(&self) -> bool {
        self.state().is_muted()
    }

    /// The error that ended the session, if it did not end by `stop`.
    pub fn last_error(&self) -> Option<RelayError> {
        self.shared.inner.lock().last_error.clone()
    }

    /// Format the microphone agreed to, once acquired.
    pub fn stream_format(&self) -> Option<StreamFormat> {
        self.shared.inner.lock().format
    }

    pub fn current_levels(&self) -> AudioLevels {
        *self.shared.levels.lock()
    }

    pub fn device_info(&self) -> AudioSource {
        self.shared.mic.lock().device_info()
    }

    pub fn diagnostics(&self) -> SessionDiagnostics {
        let counters = &self.shared.counters;
        let overruns = self
            .shared
            .inner
            .lock()
            .worklet
            .as_ref()
            .map_or(0, WorkletHandle::overruns);
        SessionDiagnostics {
            frames_received: counters.received.load(Ordering::Relaxed),
            frames_forwarded: counters.forwarded.load(Ordering::Relaxed),
            frames_gated: counters.gated.load(Ordering::Relaxed),
            frames_dropped: counters.dropped.load(Ordering::Relaxed),
            worklet_overruns: overruns,
            backpressure_timeouts: counters.timeouts.load(Ordering::Relaxed),
        }
    }

    /// Start capture. Transitions: idle → connecting → connected.
    ///
    /// On failure the session ends in `Disconnected` with everything it
    /// acquired released, and the error is also kept as [`Self::last_error`].
    pub fn start(&mut self) -> Result<(), RelayError> {
        let accepted = self.shared.dispatch(SessionEvent::Start, |_| None)?;
        self.started_at = Some(Utc::now());
        log::info!("starting relay session {}", self.session_id);

        let mut endpoints: Option<(FramePort, LossReporter)> = None;
        let mut registered: Option<WorkletHandle> = None;
        for effect in accepted.effects {
            match effect {
                Effect::AcquireResource => {
                    let acquired = self.shared.mic.lock().acquire(&self.config);
                    match acquired {
                        Ok(format) => {
                            self.shared.mic_held.store(true, Ordering::Release);
                            self.shared.inner.lock().format = Some(format);
                            log::info!(
                                "microphone acquired: {} Hz, {} frames per quantum",
                                format.sample_rate,
                                format.quantum_frames
                            );
                        }
                        Err(reason) => return Err(self.abort(reason)),
                    }
                }
                Effect::OpenChannel => {
                    let channel = frame_channel(self.config.channel_capacity);
                    match self.spawn_workers(channel) {
                        Ok(ends) => endpoints = Some(ends),
                        Err(reason) => return Err(self.abort(reason)),
                    }
                }
                Effect::RegisterWorklet => {
                    let Some((port, loss)) = endpoints.take() else {
                        return Err(self.abort(ResourceFailure::RegistrationFailed(
                            "frame channel not open".into(),
                        )));
                    };
                    let (worklet, handle) = CaptureWorklet::new(port);
                    self.shared.inner.lock().worklet = Some(handle.clone());
                    let attached = self.shared.mic.lock().attach(worklet, loss);
                    if let Err(reason) = attached {
                        return Err(self.abort(reason));
                    }
                    if handle.is_dropped() {
                        return Err(self.worklet_lost());
                    }
                    registered = Some(handle);
                }
                other => {
                    let mut inner = self.shared.inner.lock();
                    self.shared.run_effect(&mut inner, *other);
                }
            }
        }

        if let Err(rejected) = self.shared.dispatch(SessionEvent::Registered, |_| None) {
            // A sink or device failure already tore the session down.
            return Err(self.last_error().unwrap_or(rejected));
        }
        // The relay leaves a disconnect seen while connecting to us.
        if registered.as_ref().is_some_and(WorkletHandle::is_dropped) {
            return Err(self.worklet_lost());
        }
        Ok(())
    }

    /// Gate forwarding without touching capture. Transitions: connected → muted.
    pub fn mute(&self) -> Result<(), RelayError> {
        self.shared.dispatch(SessionEvent::Mute, |_| None).map(|_| ())
    }

    /// Resume forwarding. Transitions: muted → connected.
    pub fn unmute(&self) -> Result<(), RelayError> {
        self.shared.dispatch(SessionEvent::Unmute, |_| None).map(|_| ())
    }

    /// Stop capture, release the microphone, and collect the session summary.
    ///
    /// Transitions: connecting/connected/muted → disconnected. Returns `None`
    /// for a session that never started. Calling it on a session that already
    /// disconnected (for instance after a sink failure) joins the workers and
    /// returns the summary.
    pub fn stop(&mut self) -> Option<SessionSummary> {
        if let Err(rejected) = self.shared.dispatch(SessionEvent::Stop, |_| None) {
            if !self.state().is_terminal() {
                log::debug!("ignoring stop: {}", rejected);
                return None;
            }
        }

        self.join_workers();

        if self.summary.is_none() {
            let summary = SessionSummary::new(
                self.session_id,
                self.started_at.unwrap_or_else(Utc::now),
                self.state(),
                self.diagnostics(),
                self.last_error().map(|e| e.to_string()),
            );
            self.shared.notify(Notice::Finished(summary.clone()));
            self.summary = Some(summary);
        }
        self.summary.clone()
    }

    /// The sink, once the session has stopped and the sink thread handed it back.
    pub fn sink(&self) -> Option<&K> {
        if self.sink_handle.is_some() {
            return None;
        }
        self.sink.as_ref()
    }

    pub fn take_sink(&mut self) -> Option<K> {
        if self.sink_handle.is_some() {
            return None;
        }
        self.sink.take()
    }

    fn abort(&self, reason: ResourceFailure) -> RelayError {
        log::error!("failed to start relay session: {}", reason);
        let mut reported = None;
        self.shared.fail(SessionEvent::ResourceFailed, |state| {
            let error = RelayError::ResourceUnavailable { state, reason };
            reported = Some(error.clone());
            error
        });
        reported
            .or_else(|| self.last_error())
            .unwrap_or(RelayError::ChannelClosed { state: self.state() })
    }

    /// The source let go of the worklet before the session was torn down.
    fn worklet_lost(&self) -> RelayError {
        log::error!("microphone source dropped its worklet while {}", self.state());
        self.shared
            .fail(SessionEvent::ResourceFailed, |state| RelayError::ChannelClosed { state });
        self.last_error()
            .unwrap_or(RelayError::ChannelClosed { state: self.state() })
    }

    /// Start the relay and sink threads behind a fresh channel and return the
    /// endpoints the worklet and the microphone need.
    fn spawn_workers(&mut self, channel: FrameChannel) -> Result<(FramePort, LossReporter), ResourceFailure> {
        let FrameChannel {
            port,
            loss,
            closer,
            inbox,
        } = channel;
        self.shared.inner.lock().closer = Some(closer);

        let sink = self
            .sink
            .take()
            .ok_or_else(|| ResourceFailure::RegistrationFailed("sink already consumed".into()))?;
        let (queue_tx, queue_rx) = bounded(self.config.sink_queue_capacity);

        let shared = Arc::clone(&self.shared);
        let sink_handle = thread::Builder::new()
            .name("mic-relay-sink".into())
            .spawn(move || run_sink(shared, queue_rx, sink))
            .map_err(|e| ResourceFailure::RegistrationFailed(format!("failed to spawn sink thread: {}", e)))?;
        self.sink_handle = Some(sink_handle);

        let relay = Relay {
            shared: Arc::clone(&self.shared),
            inbox,
            queue: queue_tx,
            policy: self.config.backpressure,
            level_update_interval: self.config.level_update_interval,
            _loss: loss.clone(),
        };
        let relay_handle = thread::Builder::new()
            .name("mic-relay-relay".into())
            .spawn(move || relay.run())
            .map_err(|e| ResourceFailure::RegistrationFailed(format!("failed to spawn relay thread: {}", e)))?;
        self.relay_handle = Some(relay_handle);

        Ok((port, loss))
    }

    fn join_workers(&mut self) {
        if let Some(handle) = self.relay_handle.take() {
            if handle.join().is_err() {
                log::error!("relay thread panicked");
            }
        }
        if let Some(handle) = self.sink_handle.take() {
            match handle.join() {
                Ok(sink) => self.sink = Some(sink),
                Err(_) => log::error!("sink thread panicked"),
            }
        }
    }
}

impl<M: MicrophoneSource, K: FrameSink> Drop for SessionController<M, K> {
    fn drop(&mut self) {
        if !self.state().is_idle() {
            self.stop();
        }
    }
}
