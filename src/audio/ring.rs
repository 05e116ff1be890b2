//! Pre-roll ring buffer
//!
//! Fixed pre-allocated circular buffer holding the most recent capture
//! audio while no recording is active. Never grows after construction.

use super::ms_to_samples;

/// Fixed-size ring buffer of f32 samples, overwriting oldest data when full
pub struct PrerollRing {
    buffer: Box<[f32]>,
    write_pos: usize,
    filled: usize,
}

impl PrerollRing {
    /// Create a ring sized for `duration_ms` of audio
    #[must_use]
    pub fn new(duration_ms: u64) -> Self {
        let capacity = ms_to_samples(duration_ms).max(1);
        Self {
            buffer: vec![0.0; capacity].into_boxed_slice(),
            write_pos: 0,
            filled: 0,
        }
    }

    /// Write samples, overwriting the oldest data when full
    pub fn write(&mut self, samples: &[f32]) {
        let capacity = self.buffer.len();
        for &s in samples {
            self.buffer[self.write_pos] = s;
            self.write_pos = (self.write_pos + 1) % capacity;
        }
        self.filled = (self.filled + samples.len()).min(capacity);
    }

    /// Copy out the buffered audio, oldest sample first
    #[must_use]
    pub fn snapshot(&self) -> Vec<f32> {
        let capacity = self.buffer.len();
        let mut out = Vec::with_capacity(self.filled);

        let start = if self.filled < capacity {
            0
        } else {
            self.write_pos
        };

        for i in 0..self.filled {
            out.push(self.buffer[(start + i) % capacity]);
        }
        out
    }

    /// Discard all buffered audio
    pub fn clear(&mut self) {
        self.write_pos = 0;
        self.filled = 0;
    }

    /// Total capacity in samples
    #[must_use]
    pub const fn capacity(&self) -> usize {
        self.buffer.len()
    }
}
