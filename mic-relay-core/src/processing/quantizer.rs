/// Regroups device buffers of arbitrary length into fixed-size mono quanta.
///
/// Hardware callbacks rarely deliver exactly one quantum. The assembler
/// downmixes interleaved input to mono and hands out a full quantum each time
/// one is complete. Storage is allocated once, so it is safe to drive from an
/// audio thread.
#[derive(Debug)]
pub struct QuantumAssembler {
    quantum: usize,
    pending: Vec<f32>,
}

impl QuantumAssembler {
    pub fn new(quantum: usize) -> Self {
        let quantum = quantum.max(1);
        Self {
            quantum,
            pending: Vec::with_capacity(quantum),
        }
    }

    pub fn quantum(&self) -> usize {
        self.quantum
    }

    /// Samples waiting for the current quantum to fill.
    pub fn pending(&self) -> usize {
        self.pending.len()
    }

    /// Feed interleaved samples with `channels` channels per frame, calling
    /// `emit` once per completed quantum. Trailing partial frames are ignored.
    pub fn push_interleaved<F>(&mut self, data: &[f32], channels: usize, mut emit: F)
    where
        F: FnMut(&[f32]),
    {
        let channels = channels.max(1);
        let scale = 1.0 / channels as f32;
        for frame in data.chunks_exact(channels) {
            let mono = if channels == 1 {
                frame[0]
            } else {
                frame.iter().sum::<f32>() * scale
            };
            self.pending.push(mono);
            if self.pending.len() == self.quantum {
                emit(&self.pending);
                self.pending.clear();
            }
        }
    }

    /// Drop any partial quantum.
    pub fn reset(&mut self) {
        self.pending.clear();
    }
}
