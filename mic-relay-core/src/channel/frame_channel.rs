//! Bounded, ordered link from the capture worklet to the session controller.
//!
//! ```text
//! [FramePort] ──frames (bounded)──→ [FrameInbox] ← relay thread
//! [LossReporter] ──loss (1 slot)──→      ↑
//! [ChannelCloser] ──shutdown (drop)──────┘
//! ```

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use crossbeam_channel::{bounded, Receiver, Sender, TrySendError};

use crate::models::audio_models::AudioFrame;
use crate::models::error::ResourceFailure;

/// Why a frame could not be posted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PostError {
    /// The channel is at capacity; the frame was not enqueued.
    Full,
    /// The channel was closed; it no longer accepts frames.
    Closed,
}

/// Sending half held by the capture worklet.
///
/// `post` never blocks.
#[derive(Debug, Clone)]
pub struct FramePort {
    frames: Sender<AudioFrame>,
    closed: Arc<AtomicBool>,
}

impl FramePort {
    pub fn post(&self, frame: AudioFrame) -> Result<(), PostError> {
        if self.closed.load(Ordering::Acquire) {
            return Err(PostError::Closed);
        }
        self.frames.try_send(frame).map_err(|e| match e {
            TrySendError::Full(_) => PostError::Full,
            TrySendError::Disconnected(_) => PostError::Closed,
        })
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }
}

/// Lets a microphone source report that its device went away.
///
/// Only the first report is kept; later ones are redundant.
#[derive(Debug, Clone)]
pub struct LossReporter {
    lost: Sender<ResourceFailure>,
}

impl LossReporter {
    pub fn report(&self, reason: ResourceFailure) {
        let _ = self.lost.try_send(reason);
    }
}

/// Closes the channel. Idempotent.
#[derive(Debug)]
pub struct ChannelCloser {
    closed: Arc<AtomicBool>,
    shutdown: Option<Sender<()>>,
}

impl ChannelCloser {
    /// Reject further frames and wake the receiver.
    ///
    /// Returns `true` the first time it actually closes.
    pub fn close(&mut self) -> bool {
        let first = !self.closed.swap(true, Ordering::AcqRel);
        self.shutdown.take();
        first
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }
}

/// Receiving half, owned by the relay thread.
#[derive(Debug)]
pub struct FrameInbox {
    pub(crate) frames: Receiver<AudioFrame>,
    pub(crate) lost: Receiver<ResourceFailure>,
    pub(crate) shutdown: Receiver<()>,
}

impl FrameInbox {
    /// Frames still queued, in order, without waiting.
    pub fn drain(&self) -> impl Iterator<Item = AudioFrame> + '_ {
        self.frames.try_iter()
    }
}

/// Everything one session needs to wire a worklet to its controller.
#[derive(Debug)]
pub struct FrameChannel {
    pub port: FramePort,
    pub loss: LossReporter,
    pub closer: ChannelCloser,
    pub inbox: FrameInbox,
}

/// Open a channel holding at most `capacity` frames.
pub fn frame_channel(capacity: usize) -> FrameChannel {
    let (frames_tx, frames_rx) = bounded(capacity.max(1));
    let (lost_tx, lost_rx) = bounded(1);
    let (shutdown_tx, shutdown_rx) = bounded(0);
    let closed = Arc::new(AtomicBool::new(false));

    FrameChannel {
        port: FramePort {
            frames: frames_tx,
            closed: Arc::clone(&closed),
        },
        loss: LossReporter { lost: lost_tx },
        closer: ChannelCloser {
            closed,
            shutdown: Some(shutdown_tx),
        },
        inbox: FrameInbox {
            frames: frames_rx,
            lost: lost_rx,
            shutdown: shutdown_rx,
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn frame(seq: u64) -> AudioFrame {
        AudioFrame::new(seq, vec![seq as f32])
    }

    #[test]
    fn delivers_in_post_order() {
        let channel = frame_channel(8);
        for seq in 0..5 {
            channel.port.post(frame(seq)).unwrap();
        }
        let seqs: Vec<u64> = channel.inbox.drain().map(|f| f.sequence()).collect();
        assert_eq!(seqs, vec![0, 1, 2, 3, 4]);
    }

    #[test]
    fn full_channel_rejects_without_blocking() {
        let channel = frame_channel(2);
        channel.port.post(frame(0)).unwrap();
        channel.port.post(frame(1)).unwrap();
        assert_eq!(channel.port.post(frame(2)), Err(PostError::Full));
        assert_eq!(channel.inbox.drain().count(), 2);
    }

    #[test]
    fn closed_channel_rejects_frames() {
        let mut channel = frame_channel(4);
        channel.port.post(frame(0)).unwrap();

        assert!(channel.closer.close());
        assert!(!channel.closer.close());
        assert!(channel.port.is_closed());
        assert_eq!(channel.port.post(frame(1)), Err(PostError::Closed));

        // Frames queued before close are still readable.
        assert_eq!(channel.inbox.drain().count(), 1);
        assert!(channel.inbox.shutdown.recv().is_err());
    }

    #[test]
    fn only_first_loss_is_kept() {
        let channel = frame_channel(1);
        channel.loss.report(ResourceFailure::DeviceLost("unplugged".into()));
        channel.loss.report(ResourceFailure::DeviceNotAvailable);
        assert_eq!(
            channel.inbox.lost.try_recv(),
            Ok(ResourceFailure::DeviceLost("unplugged".into()))
        );
        assert!(channel.inbox.lost.try_recv().is_err());
    }
}
