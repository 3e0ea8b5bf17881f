use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Instant;

use tracing::{debug, error, info, warn};

use super::smoothing::{Hysteresis, LatencyAverage};
use super::{DetectionDiagnostics, DetectorConfig};
use crate::buffering::SampleRing;
use crate::error::{HarkError, Result};
use crate::inference::{ArenaBudget, EngineLoader, InferenceEngine};
use crate::spectrogram::{ExtractStats, SpectrogramExtractor};

/// Result of one detection cycle.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CycleOutcome {
    /// `None` when inference failed; the cycle then counts as low.
    pub score: Option<f32>,
    pub detected: bool,
    pub latency_ms: f32,
    pub average_latency_ms: f32,
    pub extract: ExtractStats,
}

/// Resources that only exist between `enter_state` and `exit_state`.
struct Session {
    engine: Box<dyn InferenceEngine>,
    extractor: SpectrogramExtractor,
}

/// Drives rewind → extract → infer → hysteresis over a shared sample ring.
///
/// Owned and mutated by a single detection task; nothing here is shared
/// except the ring handle and the diagnostics counters.
pub struct WakeWordDetectionState {
    ring: SampleRing,
    loader: Box<dyn EngineLoader>,
    config: DetectorConfig,
    session: Option<Session>,
    hysteresis: Hysteresis,
    latency: LatencyAverage,
    runs_since_report: u32,
    diagnostics: Arc<DetectionDiagnostics>,
}

impl WakeWordDetectionState {
    /// # Errors
    /// [`HarkError::InvalidDetectorConfig`] or
    /// [`HarkError::InvalidSpectrogram`] for a bad `config`.
    pub fn new(ring: SampleRing, loader: Box<dyn EngineLoader>, config: DetectorConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            hysteresis: Hysteresis::new(config.threshold, config.required_consecutive),
            ring,
            loader,
            config,
            session: None,
            latency: LatencyAverage::default(),
            runs_since_report: 0,
            diagnostics: Arc::new(DetectionDiagnostics::default()),
        })
    }

    /// Share counters with an outer owner (the service) instead of keeping
    /// a private set.
    pub fn with_diagnostics(mut self, diagnostics: Arc<DetectionDiagnostics>) -> Self {
        self.diagnostics = diagnostics;
        self
    }

    /// Load the engine, build the extractor and reset all counters.
    ///
    /// Calling it again while ready releases the current engine first.
    ///
    /// # Errors
    /// Any loader failure, or [`HarkError::InputShapeMismatch`] when the
    /// model input does not match the extractor's feature length. The state
    /// is left not ready.
    pub fn enter_state(&mut self) -> Result<()> {
        if self.session.is_some() {
            self.exit_state();
        }

        let name = self.loader.describe();
        match self.open_session() {
            Ok(session) => {
                info!(
                    engine = name.as_str(),
                    features = session.extractor.feature_len(),
                    "wake word detector ready"
                );
                self.session = Some(session);
                self.hysteresis.reset();
                self.latency.reset();
                self.runs_since_report = 0;
                Ok(())
            }
            Err(e) => {
                error!(engine = name.as_str(), "failed to enter detection state: {e}");
                Err(e)
            }
        }
    }

    fn open_session(&self) -> Result<Session> {
        let mut arena = ArenaBudget::new(self.config.arena_bytes);
        let engine = self.loader.load(&mut arena)?;
        debug!(used = arena.used(), capacity = arena.capacity(), "engine arena");

        let extractor = SpectrogramExtractor::new(self.config.spectrogram.clone())?;
        if engine.input_len() != extractor.feature_len() {
            return Err(HarkError::InputShapeMismatch {
                expected: engine.input_len(),
                actual: extractor.feature_len(),
            });
        }
        Ok(Session { engine, extractor })
    }

    /// `true` between a successful `enter_state` and `exit_state`.
    pub fn is_ready(&self) -> bool {
        self.session.is_some()
    }

    /// One detection cycle. Returns `true` only on the cycle that confirms
    /// a detection; `false` (without touching the ring) when not ready.
    pub fn run(&mut self) -> bool {
        self.cycle().is_some_and(|outcome| outcome.detected)
    }

    /// Like [`run`](Self::run) but reports the full outcome. `None` when not
    /// ready.
    pub fn cycle(&mut self) -> Option<CycleOutcome> {
        let Some(session) = self.session.as_mut() else {
            self.diagnostics.skipped_not_ready.fetch_add(1, Ordering::Relaxed);
            debug!("detection run skipped: not ready");
            return None;
        };

        let start = Instant::now();

        let mut reader = self.ring.reader();
        reader.rewind(self.config.spectrogram.audio_length);
        let extracted = session
            .extractor
            .extract(&mut reader, session.engine.input_mut());
        drop(reader);

        let (extract, score) = match extracted {
            Ok(stats) => match session.engine.invoke() {
                Ok(()) => (stats, Some(session.engine.output())),
                Err(e) => {
                    warn!("inference failed: {e}");
                    (stats, None)
                }
            },
            Err(e) => {
                warn!("feature extraction failed: {e}");
                (ExtractStats::default(), None)
            }
        };

        let latency_ms = start.elapsed().as_secs_f32() * 1_000.0;
        let average_latency_ms = self.latency.record(latency_ms);

        self.runs_since_report += 1;
        if self.runs_since_report >= self.config.stats_log_interval {
            self.runs_since_report = 0;
            info!("average detection time {average_latency_ms:.2} ms");
        }

        let detected = match score {
            Some(score) => self.hysteresis.observe(score),
            None => {
                self.hysteresis.reset();
                self.diagnostics.inference_errors.fetch_add(1, Ordering::Relaxed);
                false
            }
        };

        self.diagnostics.cycles.fetch_add(1, Ordering::Relaxed);
        self.diagnostics.samples_lost.fetch_add(extract.lost, Ordering::Relaxed);
        self.diagnostics.samples_padded.fetch_add(extract.padded, Ordering::Relaxed);
        if detected {
            self.diagnostics.detections.fetch_add(1, Ordering::Relaxed);
            info!(score = score.unwrap_or_default(), "wake word detected");
        }
        debug!(?score, latency_ms, lost = extract.lost, "detection cycle");

        Some(CycleOutcome {
            score,
            detected,
            latency_ms,
            average_latency_ms,
            extract,
        })
    }

    /// Release the engine and extractor. Safe to call more than once.
    pub fn exit_state(&mut self) {
        if self.session.take().is_some() {
            self.hysteresis.reset();
            info!(
                average_latency_ms = self.latency.average_ms(),
                "wake word detector released"
            );
        }
    }

    pub fn average_latency_ms(&self) -> f32 {
        self.latency.average_ms()
    }

    /// High cycles in the current unbroken run.
    pub fn consecutive_highs(&self) -> u32 {
        self.hysteresis.consecutive()
    }

    pub fn config(&self) -> &DetectorConfig {
        &self.config
    }

    pub fn diagnostics(&self) -> Arc<DetectionDiagnostics> {
        Arc::clone(&self.diagnostics)
    }
}

impl Drop for WakeWordDetectionState {
    fn drop(&mut self) {
        self.exit_state();
    }
}
