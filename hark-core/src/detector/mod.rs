//! Wake-word detection: the per-cycle state machine and the service that
//! drives it.
//!
//! ## Lifecycle
//!
//! ```text
//! WakeWordDetectionState::new()
//!     └─► enter_state()   → engine loaded, extractor built, counters reset
//!         └─► run() ×N    → rewind 1 s, extract, invoke, hysteresis
//!             └─► exit_state()  → engine + extractor released
//! ```
//!
//! `run()` outside `enter_state()`/`exit_state()` is a no-op that reports no
//! detection; [`WakeWordDetectionState::is_ready`] tells the caller which
//! side of that line it is on.

mod service;
mod smoothing;
mod state;
mod task;

pub use service::WakeWordService;
pub use smoothing::{Hysteresis, LatencyAverage, LATENCY_SMOOTHING};
pub use state::{CycleOutcome, WakeWordDetectionState};
pub use task::run_detection_loop;

use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::buffering::DEFAULT_RING_CAPACITY;
use crate::error::{HarkError, Result};
use crate::inference::DEFAULT_ARENA_BYTES;
use crate::spectrogram::SpectrogramConfig;

/// Tuning for [`WakeWordDetectionState`] and [`WakeWordService`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
#[serde(default)]
pub struct DetectorConfig {
    pub spectrogram: SpectrogramConfig,
    /// Score at or above which a cycle counts as high.
    pub threshold: f32,
    /// Consecutive high cycles needed to confirm a detection.
    pub required_consecutive: u32,
    /// Pause between detection cycles.
    pub run_interval_ms: u64,
    /// Working memory granted to the inference engine, in bytes.
    pub arena_bytes: usize,
    /// Minimum sample ring size. Must hold one analysis window.
    pub ring_capacity: usize,
    /// Log the average latency every this many cycles.
    pub stats_log_interval: u32,
}

impl Default for DetectorConfig {
    fn default() -> Self {
        Self {
            spectrogram: SpectrogramConfig::default(),
            threshold: 0.95,
            required_consecutive: 2,
            run_interval_ms: 200,
            arena_bytes: DEFAULT_ARENA_BYTES,
            ring_capacity: DEFAULT_RING_CAPACITY,
            stats_log_interval: 100,
        }
    }
}

impl DetectorConfig {
    pub fn validate(&self) -> Result<()> {
        self.spectrogram.validate()?;

        if !(0.0..=1.0).contains(&self.threshold) {
            return Err(HarkError::InvalidDetectorConfig(format!(
                "threshold must be within 0..=1, got {}",
                self.threshold
            )));
        }
        if self.required_consecutive == 0 {
            return Err(HarkError::InvalidDetectorConfig(
                "required_consecutive must be at least 1".into(),
            ));
        }
        if self.run_interval_ms == 0 {
            return Err(HarkError::InvalidDetectorConfig(
                "run_interval_ms must be non-zero".into(),
            ));
        }
        if self.ring_capacity < self.spectrogram.audio_length {
            return Err(HarkError::InvalidDetectorConfig(format!(
                "ring_capacity {} cannot hold one {}-sample window",
                self.ring_capacity, self.spectrogram.audio_length
            )));
        }
        if self.stats_log_interval == 0 {
            return Err(HarkError::InvalidDetectorConfig(
                "stats_log_interval must be non-zero".into(),
            ));
        }
        Ok(())
    }

    pub fn run_interval(&self) -> Duration {
        Duration::from_millis(self.run_interval_ms)
    }
}

/// Counters updated by the detection task.
#[derive(Default)]
pub struct DetectionDiagnostics {
    pub cycles: AtomicUsize,
    pub detections: AtomicUsize,
    pub inference_errors: AtomicUsize,
    pub samples_lost: AtomicUsize,
    pub samples_padded: AtomicUsize,
    pub skipped_not_ready: AtomicUsize,
}

impl DetectionDiagnostics {
    pub fn reset(&self) {
        self.cycles.store(0, Ordering::Relaxed);
        self.detections.store(0, Ordering::Relaxed);
        self.inference_errors.store(0, Ordering::Relaxed);
        self.samples_lost.store(0, Ordering::Relaxed);
        self.samples_padded.store(0, Ordering::Relaxed);
        self.skipped_not_ready.store(0, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> DetectionSnapshot {
        DetectionSnapshot {
            cycles: self.cycles.load(Ordering::Relaxed),
            detections: self.detections.load(Ordering::Relaxed),
            inference_errors: self.inference_errors.load(Ordering::Relaxed),
            samples_lost: self.samples_lost.load(Ordering::Relaxed),
            samples_padded: self.samples_padded.load(Ordering::Relaxed),
            skipped_not_ready: self.skipped_not_ready.load(Ordering::Relaxed),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct DetectionSnapshot {
    pub cycles: usize,
    pub detections: usize,
    pub inference_errors: usize,
    pub samples_lost: usize,
    pub samples_padded: usize,
    pub skipped_not_ready: usize,
}
