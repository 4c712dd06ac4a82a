use std::time::Duration;

/// Stream time derived from the number of samples seen, not the wall clock.
/// Keeps endpointing deterministic regardless of callback jitter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct StreamInstant {
    pub micros: u64,
}

impl StreamInstant {
    pub fn since(&self, earlier: StreamInstant) -> Duration {
        Duration::from_micros(self.micros.saturating_sub(earlier.micros))
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct StreamClock {
    now: StreamInstant,
}

impl StreamClock {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn now(&self) -> StreamInstant {
        self.now
    }

    /// Moves time forward by `samples` at `sample_rate`.
    pub fn advance(&mut self, samples: usize, sample_rate: u32) -> StreamInstant {
        if sample_rate > 0 {
            self.now.micros += samples as u64 * 1_000_000 / sample_rate as u64;
        }
        self.now
    }
}
