use std::collections::VecDeque;

/// Controller-side mute gate, expressed in frame sequence numbers.
///
/// Muting records the worklet's next sequence number; unmuting records where
/// the muted span ends. The relay asks about frames in arrival order, which is
/// sequence order, so finished spans are pruned as frames pass them. A frame is
/// judged by when the worklet produced it, not by when the relay gets to it.
#[derive(Debug, Default)]
pub struct MuteGate {
    /// Finished spans `[from, until)`, oldest first.
    spans: VecDeque<(u64, u64)>,
    /// Start of the span still open, if muted right now.
    open_from: Option<u64>,
}

impl MuteGate {
    pub fn new() -> Self {
        Self::default()
    }

    /// Gate every frame with `sequence >= from` until [`MuteGate::open`].
    pub fn close(&mut self, from: u64) {
        if self.open_from.is_none() {
            self.open_from = Some(from);
        }
    }

    /// Stop gating frames with `sequence >= until`.
    pub fn open(&mut self, until: u64) {
        if let Some(from) = self.open_from.take() {
            if until > from {
                self.spans.push_back((from, until));
            }
        }
    }

    pub fn is_closed(&self) -> bool {
        self.open_from.is_some()
    }

    /// Whether the frame with `sequence` must be dropped.
    ///
    /// Sequences must be queried in non-decreasing order.
    pub fn blocks(&mut self, sequence: u64) -> bool {
        while let Some(&(_, until)) = self.spans.front() {
            if sequence >= until {
                self.spans.pop_front();
            } else {
                break;
            }
        }
        if let Some(&(from, _)) = self.spans.front() {
            if sequence >= from {
                return true;
            }
        }
        matches!(self.open_from, Some(from) if sequence >= from)
    }
}
