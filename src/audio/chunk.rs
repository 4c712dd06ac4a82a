use std::sync::Arc;
use std::time::Duration;

/// Substituted for `20 * log10(0)` when a chunk is digital silence.
pub const DB_FLOOR: f32 = -100.0;

/// Added to the RMS on the telemetry path only.
const TELEMETRY_EPSILON: f32 = 1e-10;

/// A fixed-length run of mono signed 16-bit samples. Immutable once produced;
/// clones share the sample storage.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AudioChunk {
    samples: Arc<[i16]>,
    sample_rate: u32,
}

impl AudioChunk {
    pub fn new(samples: impl Into<Arc<[i16]>>, sample_rate: u32) -> Self {
        Self {
            samples: samples.into(),
            sample_rate,
        }
    }

    pub fn samples(&self) -> &[i16] {
        &self.samples
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    pub fn duration(&self) -> Duration {
        if self.sample_rate == 0 {
            return Duration::ZERO;
        }
        Duration::from_secs_f64(self.samples.len() as f64 / self.sample_rate as f64)
    }

    /// RMS amplitude over samples normalized to [-1, 1].
    pub fn rms(&self) -> f32 {
        if self.samples.is_empty() {
            return 0.0;
        }
        let sq_sum: f64 = self
            .samples
            .iter()
            .map(|&s| {
                let x = s as f64 / 32768.0;
                x * x
            })
            .sum();
        (sq_sum / self.samples.len() as f64).sqrt() as f32
    }

    /// Level used for thresholding.
    pub fn level(&self) -> AudioLevel {
        AudioLevel::from_rms(self.rms())
    }

    /// Level reported to telemetry. Never hits the floor substitution.
    pub fn telemetry_level(&self) -> AudioLevel {
        AudioLevel(20.0 * (self.rms() + TELEMETRY_EPSILON).log10())
    }
}

/// Chunk loudness in decibels relative to full scale.
#[derive(Debug, Clone, Copy, PartialEq, PartialOrd)]
pub struct AudioLevel(pub f32);

impl AudioLevel {
    pub fn from_rms(rms: f32) -> Self {
        if rms <= 0.0 {
            return AudioLevel(DB_FLOOR);
        }
        AudioLevel(20.0 * rms.log10())
    }

    pub fn db(&self) -> f32 {
        self.0
    }

    pub fn exceeds(&self, threshold_db: f32) -> bool {
        self.0 > threshold_db
    }
}
