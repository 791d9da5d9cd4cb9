//! Controller-side worker threads.
//!
//! ```text
//! [FrameInbox] → relay thread ─(gate, levels, backpressure)→ [sink queue] → sink thread ─(gate)→ [FrameSink]
//! ```

use std::sync::atomic::Ordering;
use std::sync::Arc;

use crossbeam_channel::{select, Receiver, SendTimeoutError, Sender, TrySendError};

use crate::channel::frame_channel::{FrameInbox, LossReporter};
use crate::models::audio_models::AudioFrame;
use crate::models::config::BackpressurePolicy;
use crate::models::error::{RelayError, ResourceFailure};
use crate::models::state::SessionEvent;
use crate::processing::levels;
use crate::traits::frame_sink::FrameSink;
use crate::traits::microphone::MicrophoneSource;

use super::controller::Shared;

pub(crate) struct Relay<M: MicrophoneSource> {
    pub(crate) shared: Arc<Shared<M>>,
    pub(crate) inbox: FrameInbox,
    pub(crate) queue: Sender<AudioFrame>,
    pub(crate) policy: BackpressurePolicy,
    pub(crate) level_update_interval: u32,
    // Keeps the loss channel connected so `select!` never spins on it.
    pub(crate) _loss: LossReporter,
}

impl<M: MicrophoneSource> Relay<M> {
    pub(crate) fn run(self) {
        log::debug!("relay thread started");
        let mut since_levels = 0u32;

        loop {
            select! {
                recv(self.inbox.frames) -> msg => match msg {
                    Ok(frame) => self.relay(frame, &mut since_levels),
                    Err(_) => {
                        self.frames_disconnected();
                        break;
                    }
                },
                recv(self.inbox.lost) -> msg => {
                    if let Ok(reason) = msg {
                        self.input_lost(reason);
                    }
                },
                recv(self.inbox.shutdown) -> _ => {
                    let remaining: Vec<AudioFrame> = self.inbox.drain().collect();
                    for frame in remaining {
                        self.relay(frame, &mut since_levels);
                    }
                    break;
                },
            }
        }

        log::debug!("relay thread stopped");
    }

    fn relay(&self, frame: AudioFrame, since_levels: &mut u32) {
        let counters = &self.shared.counters;
        counters.received.fetch_add(1, Ordering::Relaxed);

        let measured = levels::measure(frame.samples());
        *self.shared.levels.lock() = measured;
        if self.level_update_interval > 0 {
            *since_levels += 1;
            if *since_levels >= self.level_update_interval {
                *since_levels = 0;
                self.shared.notify_levels(&measured);
            }
        }

        if self.shared.gate.lock().blocks(frame.sequence()) {
            counters.gated.fetch_add(1, Ordering::Relaxed);
            return;
        }

        match self.policy {
            BackpressurePolicy::DropNewest => match self.queue.try_send(frame) {
                Ok(()) | Err(TrySendError::Disconnected(_)) => {}
                Err(TrySendError::Full(_)) => {
                    counters.dropped.fetch_add(1, Ordering::Relaxed);
                }
            },
            BackpressurePolicy::Block { timeout_ms } => {
                let timeout = std::time::Duration::from_millis(timeout_ms);
                match self.queue.send_timeout(frame, timeout) {
                    Ok(()) | Err(SendTimeoutError::Disconnected(_)) => {}
                    Err(SendTimeoutError::Timeout(frame)) => {
                        counters.timeouts.fetch_add(1, Ordering::Relaxed);
                        counters.dropped.fetch_add(1, Ordering::Relaxed);
                        log::warn!(
                            "sink did not take frame {} within {} ms, dropping it",
                            frame.sequence(),
                            timeout_ms
                        );
                        let error = RelayError::TimeoutExceeded {
                            state: self.shared.state(),
                            timeout_ms,
                        };
                        self.shared.notify_error(&error);
                    }
                }
            }
        }
    }

    fn input_lost(&self, reason: ResourceFailure) {
        log::warn!("microphone reported loss: {}", reason);
        self.shared.fail(SessionEvent::ResourceFailed, |state| {
            RelayError::ResourceUnavailable { state, reason }
        });
    }

    /// Every `FramePort` is gone. Expected once the source drops the worklet
    /// after teardown; while live it means the source broke its contract,
    /// unless it reported the loss first.
    ///
    /// While connecting, `start` owns the outcome: it checks the worklet after
    /// `attach` and again once `Registered` is accepted.
    fn frames_disconnected(&self) {
        if let Ok(reason) = self.inbox.lost.try_recv() {
            self.input_lost(reason);
            return;
        }
        let state = self.shared.state();
        if !state.is_live() {
            return;
        }
        log::error!("frame channel disconnected while {}", state);
        self.shared.fail(SessionEvent::ResourceFailed, |state| RelayError::ChannelClosed { state });
        debug_assert!(false, "microphone source dropped its worklet while {}", state);
    }
}

/// Drain the sink queue into `sink` until the relay hangs up or the sink fails.
///
/// The relay gates frames by when they were produced; this loop also drops
/// whatever is still queued while the session is muted. A `send` already in
/// progress when the mute lands completes.
///
/// Returns the sink so the controller can hand it back to its owner.
pub(crate) fn run_sink<M, K>(shared: Arc<Shared<M>>, queue: Receiver<AudioFrame>, mut sink: K) -> K
where
    M: MicrophoneSource,
    K: FrameSink,
{
    log::debug!("sink thread started");

    for frame in queue.iter() {
        // Frames queued before a mute must not reach the sink once it lands.
        if shared.gate.lock().is_closed() {
            shared.counters.gated.fetch_add(1, Ordering::Relaxed);
            continue;
        }
        if let Err(e) = sink.send(&frame) {
            log::error!("sink rejected frame {}: {}", frame.sequence(), e);
            shared.fail(SessionEvent::SinkFailed, |state| RelayError::SinkFailure {
                state,
                source: e,
            });
            break;
        }
        shared.counters.forwarded.fetch_add(1, Ordering::Relaxed);
    }
    drop(queue);

    if let Err(e) = sink.close() {
        log::warn!("failed to close sink: {}", e);
    }

    log::debug!("sink thread stopped");
    sink
}
