//! Sample-Accurate Timing
//!
//! Tracks the absolute sample position of the command stream and the waits
//! that produced it.

/// Monotonic sample counter advanced only by wait commands
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SampleClock {
    /// Current absolute sample position
    samples: u64,
    /// Number of wait commands applied
    waits: usize,
}

impl SampleClock {
    /// Create a clock at sample 0
    pub fn new() -> Self {
        SampleClock {
            samples: 0,
            waits: 0,
        }
    }

    /// Apply a wait of `n` samples
    pub fn advance(&mut self, n: u64) {
        self.samples += n;
        self.waits += 1;
    }

    /// Current absolute sample position
    pub fn samples(&self) -> u64 {
        self.samples
    }

    /// Number of waits applied so far
    pub fn waits(&self) -> usize {
        self.waits
    }

    /// Seconds at the given sample rate
    pub fn seconds(&self, sample_rate: u32) -> f64 {
        samples_to_seconds(self.samples, sample_rate)
    }

    /// Reset to sample 0
    pub fn reset(&mut self) {
        *self = Self::new();
    }
}

impl Default for SampleClock {
    fn default() -> Self {
        Self::new()
    }
}

/// Convert an absolute sample position to seconds.
pub fn samples_to_seconds(samples: u64, sample_rate: u32) -> f64 {
    samples as f64 / f64::from(sample_rate.max(1))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sample_clock() {
        let mut clock = SampleClock::new();
        assert_eq!(clock.samples(), 0);

        clock.advance(735);
        clock.advance(0);
        assert_eq!(clock.samples(), 735);
        assert_eq!(clock.waits(), 2);
        assert!((clock.seconds(44_100) - 735.0 / 44_100.0).abs() < 1e-12);

        clock.reset();
        assert_eq!(clock.samples(), 0);
    }
}
