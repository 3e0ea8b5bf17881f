//! Spectrogram features for the wake-word classifier.
//!
//! The classifier was trained on exactly this preprocessing, so every
//! numeric choice below is part of the model contract:
//!
//! ```text
//!  16 000 samples (1 s @ 16 kHz)
//!      │  DC removal, scale by peak |deviation|      (whole window)
//!      ▼
//!  99 frames × 320 samples, hop 160
//!      │  Hann window, zero-pad to 512, FFT
//!      ▼
//!  257 power bins |X|²
//!      │  average groups of 6 (last group zero-padded)
//!      ▼
//!  43 bins → log10(x + 1e-6)
//!      ▼
//!  4 257 features, frame-major
//! ```

mod window;

use std::sync::Arc;

use rustfft::num_complex::Complex32;
use rustfft::{Fft, FftPlanner};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::buffering::{RingReader, Sample, SAMPLE_RATE};
use crate::error::{HarkError, Result};

pub use window::hann;

/// Samples per analysis window (one second).
pub const AUDIO_LENGTH: usize = SAMPLE_RATE as usize;
/// Samples per frame (20 ms).
pub const WINDOW_SIZE: usize = 320;
/// Hop between frames (10 ms).
pub const STEP_SIZE: usize = 160;
/// Power bins averaged into one feature bin.
pub const POOLING_SIZE: usize = 6;
/// Added before the logarithm; silence maps to `log10(1e-6) = -6`.
pub const LOG_EPSILON: f32 = 1e-6;

/// Framing parameters. Must agree with the model's input shape.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
#[serde(default)]
pub struct SpectrogramConfig {
    pub audio_length: usize,
    pub window_size: usize,
    pub step_size: usize,
    pub pooling_size: usize,
}

impl Default for SpectrogramConfig {
    fn default() -> Self {
        Self {
            audio_length: AUDIO_LENGTH,
            window_size: WINDOW_SIZE,
            step_size: STEP_SIZE,
            pooling_size: POOLING_SIZE,
        }
    }
}

impl SpectrogramConfig {
    pub fn validate(&self) -> Result<()> {
        if self.window_size < 2 {
            return Err(HarkError::InvalidSpectrogram(format!(
                "window_size must be at least 2, got {}",
                self.window_size
            )));
        }
        if self.step_size == 0 || self.step_size > self.window_size {
            return Err(HarkError::InvalidSpectrogram(format!(
                "step_size must be in 1..={}, got {}",
                self.window_size, self.step_size
            )));
        }
        if self.audio_length < self.window_size {
            return Err(HarkError::InvalidSpectrogram(format!(
                "audio_length {} is shorter than one window ({})",
                self.audio_length, self.window_size
            )));
        }
        if self.pooling_size == 0 {
            return Err(HarkError::InvalidSpectrogram(
                "pooling_size must be non-zero".into(),
            ));
        }
        Ok(())
    }

    /// `floor((audio_length - window_size) / step_size) + 1`
    pub fn frame_count(&self) -> usize {
        (self.audio_length - self.window_size) / self.step_size + 1
    }

    /// Transform length: `window_size` rounded up to a power of two.
    pub fn fft_size(&self) -> usize {
        self.window_size.next_power_of_two()
    }

    /// Non-redundant bins of the real transform.
    pub fn energy_bins(&self) -> usize {
        self.fft_size() / 2 + 1
    }

    pub fn pooled_bins(&self) -> usize {
        self.energy_bins().div_ceil(self.pooling_size)
    }

    /// Flattened output length, `frame_count × pooled_bins`.
    pub fn feature_len(&self) -> usize {
        self.frame_count() * self.pooled_bins()
    }
}

/// What one [`SpectrogramExtractor::extract`] call saw in the ring.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ExtractStats {
    /// Samples taken from the reader.
    pub copied: usize,
    /// Of those, samples zero-filled because the writer lapped the reader.
    pub lost: usize,
    /// Leading samples zero-filled because the ring held too little history.
    pub padded: usize,
}

/// Reusable extractor. All buffers are sized in [`new`](Self::new); calls to
/// `extract` do not allocate.
pub struct SpectrogramExtractor {
    config: SpectrogramConfig,
    fft: Arc<dyn Fft<f32>>,
    window: Vec<f32>,
    raw: Vec<Sample>,
    normalized: Vec<f32>,
    spectrum: Vec<Complex32>,
    scratch: Vec<Complex32>,
    energy: Vec<f32>,
}

impl SpectrogramExtractor {
    /// # Errors
    /// [`HarkError::InvalidSpectrogram`] for inconsistent framing parameters.
    pub fn new(config: SpectrogramConfig) -> Result<Self> {
        config.validate()?;

        let fft_size = config.fft_size();
        let fft = FftPlanner::<f32>::new().plan_fft_forward(fft_size);
        let scratch = vec![Complex32::ZERO; fft.get_inplace_scratch_len()];

        debug!(
            frames = config.frame_count(),
            bins = config.pooled_bins(),
            fft_size,
            "spectrogram extractor ready"
        );

        Ok(Self {
            window: hann(config.window_size),
            raw: vec![0; config.audio_length],
            normalized: vec![0.0; config.audio_length],
            spectrum: vec![Complex32::ZERO; fft_size],
            scratch,
            energy: vec![0.0; config.energy_bins()],
            fft,
            config,
        })
    }

    pub fn config(&self) -> &SpectrogramConfig {
        &self.config
    }

    pub fn feature_len(&self) -> usize {
        self.config.feature_len()
    }

    /// Read one analysis window from `reader` and write its features into
    /// `out`.
    ///
    /// The reader should already be rewound to the start of the window. If
    /// it yields fewer than `audio_length` samples, the missing older part
    /// is treated as silence so the newest audio stays at the end.
    ///
    /// # Errors
    /// [`HarkError::InvalidSpectrogram`] if `out.len() != feature_len()`.
    pub fn extract(&mut self, reader: &mut RingReader, out: &mut [f32]) -> Result<ExtractStats> {
        self.check_output(out)?;

        let len = self.raw.len();
        let outcome = reader.read_into(&mut self.raw);
        let padded = len - outcome.copied;
        if padded > 0 {
            self.raw.copy_within(..outcome.copied, padded);
            self.raw[..padded].fill(0);
        }

        self.compute(out);
        Ok(ExtractStats {
            copied: outcome.copied,
            lost: outcome.lost,
            padded,
        })
    }

    /// Features for an in-memory window of exactly `audio_length` samples.
    ///
    /// # Errors
    /// [`HarkError::InvalidSpectrogram`] on a wrong input or output length.
    pub fn extract_samples(&mut self, samples: &[Sample], out: &mut [f32]) -> Result<()> {
        if samples.len() != self.raw.len() {
            return Err(HarkError::InvalidSpectrogram(format!(
                "expected {} samples, got {}",
                self.raw.len(),
                samples.len()
            )));
        }
        self.check_output(out)?;

        self.raw.copy_from_slice(samples);
        self.compute(out);
        Ok(())
    }

    fn check_output(&self, out: &[f32]) -> Result<()> {
        let expected = self.feature_len();
        if out.len() != expected {
            return Err(HarkError::InvalidSpectrogram(format!(
                "output buffer holds {} values, features need {expected}",
                out.len()
            )));
        }
        Ok(())
    }

    fn compute(&mut self, out: &mut [f32]) {
        self.normalize();

        let SpectrogramConfig {
            window_size,
            step_size,
            pooling_size,
            ..
        } = self.config;
        let pooled_bins = self.config.pooled_bins();

        for (frame, features) in out.chunks_exact_mut(pooled_bins).enumerate() {
            let start = frame * step_size;
            let samples = &self.normalized[start..start + window_size];

            for (slot, (&s, &w)) in self.spectrum.iter_mut().zip(samples.iter().zip(&self.window)) {
                *slot = Complex32::new(s * w, 0.0);
            }
            self.spectrum[window_size..].fill(Complex32::ZERO);
            self.fft
                .process_with_scratch(&mut self.spectrum, &mut self.scratch);

            for (e, c) in self.energy.iter_mut().zip(&self.spectrum) {
                *e = c.norm_sqr();
            }

            for (feature, group) in features.iter_mut().zip(self.energy.chunks(pooling_size)) {
                let mean = group.iter().sum::<f32>() / pooling_size as f32;
                *feature = (mean + LOG_EPSILON).log10();
            }
        }
    }

    /// Remove the window's DC offset and scale by its peak deviation.
    fn normalize(&mut self) {
        let n = self.raw.len();
        let mean = (self.raw.iter().map(|&s| f64::from(s)).sum::<f64>() / n as f64) as f32;

        let mut peak = 0f32;
        for (dst, &s) in self.normalized.iter_mut().zip(&self.raw) {
            *dst = f32::from(s) - mean;
            peak = peak.max(dst.abs());
        }
        if peak < f32::EPSILON {
            peak = 1.0;
        }

        for v in &mut self.normalized {
            *v /= peak;
        }
    }
}

impl std::fmt::Debug for SpectrogramExtractor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SpectrogramExtractor")
            .field("config", &self.config)
            .field("fft_size", &self.spectrum.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::buffering::create_sample_ring;
    use approx::assert_abs_diff_eq;

    fn tone(freq_hz: f32, amplitude: f32) -> Vec<Sample> {
        (0..AUDIO_LENGTH)
            .map(|i| {
                let t = i as f32 / SAMPLE_RATE as f32;
                (amplitude * (2.0 * std::f32::consts::PI * freq_hz * t).sin()) as Sample
            })
            .collect()
    }

    fn features_of(samples: &[Sample]) -> Vec<f32> {
        let mut extractor = SpectrogramExtractor::new(SpectrogramConfig::default()).expect("extractor");
        let mut out = vec![0.0; extractor.feature_len()];
        extractor.extract_samples(samples, &mut out).expect("extract");
        out
    }

    #[test]
    fn default_geometry() {
        let config = SpectrogramConfig::default();
        assert_eq!(config.frame_count(), 99);
        assert_eq!(config.fft_size(), 512);
        assert_eq!(config.energy_bins(), 257);
        assert_eq!(config.pooled_bins(), 43);
        assert_eq!(config.feature_len(), 4257);
    }

    #[test]
    fn rejects_inconsistent_framing() {
        let bad = [
            SpectrogramConfig { step_size: 0, ..Default::default() },
            SpectrogramConfig { step_size: 400, ..Default::default() },
            SpectrogramConfig { audio_length: 100, ..Default::default() },
            SpectrogramConfig { pooling_size: 0, ..Default::default() },
            SpectrogramConfig { window_size: 1, ..Default::default() },
        ];
        for config in bad {
            assert!(
                matches!(SpectrogramExtractor::new(config.clone()), Err(HarkError::InvalidSpectrogram(_))),
                "{config:?} should be rejected"
            );
        }
    }

    #[test]
    fn repeated_extraction_is_bit_identical() {
        let samples = tone(440.0, 8_000.0);
        let mut extractor = SpectrogramExtractor::new(SpectrogramConfig::default()).expect("extractor");
        let mut first = vec![0.0; extractor.feature_len()];
        let mut second = vec![0.0; extractor.feature_len()];

        extractor.extract_samples(&samples, &mut first).expect("extract");
        extractor.extract_samples(&tone(3_000.0, 100.0), &mut second).expect("extract");
        extractor.extract_samples(&samples, &mut second).expect("extract");
        assert_eq!(first, second);
    }

    #[test]
    fn doubling_the_input_leaves_features_unchanged() {
        let quiet: Vec<Sample> = tone(700.0, 4_000.0)
            .into_iter()
            .enumerate()
            .map(|(i, s)| s.saturating_add((i % 7) as Sample * 10))
            .collect();
        let loud: Vec<Sample> = quiet.iter().map(|&s| s * 2).collect();
        assert_eq!(features_of(&quiet), features_of(&loud));
    }

    #[test]
    fn silence_maps_to_log_epsilon() {
        let features = features_of(&vec![0; AUDIO_LENGTH]);
        for &v in &features {
            assert_abs_diff_eq!(v, LOG_EPSILON.log10(), epsilon = 1e-5);
        }

        // A constant DC offset is removed before the transform.
        let features = features_of(&vec![1_234; AUDIO_LENGTH]);
        assert!(features.iter().all(|v| v.is_finite()));
        assert_abs_diff_eq!(features[0], -6.0, epsilon = 1e-5);
    }

    #[test]
    fn tone_energy_lands_in_expected_pooled_bin() {
        // 1 kHz is FFT bin 32 at 512 points, pooled bin 32 / 6 = 5.
        let features = features_of(&tone(1_000.0, 10_000.0));
        for frame in features.chunks_exact(43) {
            let (peak, _) = frame
                .iter()
                .enumerate()
                .fold((0, f32::MIN), |best, (i, &v)| if v > best.1 { (i, v) } else { best });
            assert_eq!(peak, 5);
        }
    }

    #[test]
    fn wrong_buffer_lengths_are_errors() {
        let mut extractor = SpectrogramExtractor::new(SpectrogramConfig::default()).expect("extractor");
        let mut out = vec![0.0; 10];
        assert!(extractor.extract_samples(&[0; AUDIO_LENGTH], &mut out).is_err());

        let mut out = vec![0.0; extractor.feature_len()];
        assert!(extractor.extract_samples(&[0; 100], &mut out).is_err());
    }

    #[test]
    fn short_history_is_front_padded() {
        let config = SpectrogramConfig {
            audio_length: 640,
            ..Default::default()
        };
        let (mut writer, ring) = create_sample_ring(1024);
        let recent: Vec<Sample> = (0..400).map(|i| ((i * 37) % 2000) as Sample - 1000).collect();
        writer.write(&recent);

        let mut reader = ring.reader();
        reader.rewind(640);
        let mut extractor = SpectrogramExtractor::new(config.clone()).expect("extractor");
        let mut from_ring = vec![0.0; config.feature_len()];
        let stats = extractor.extract(&mut reader, &mut from_ring).expect("extract");
        assert_eq!(stats, ExtractStats { copied: 400, lost: 0, padded: 240 });

        let mut padded = vec![0; 240];
        padded.extend_from_slice(&recent);
        let mut direct = vec![0.0; config.feature_len()];
        extractor.extract_samples(&padded, &mut direct).expect("extract");
        assert_eq!(from_ring, direct);
    }
}
