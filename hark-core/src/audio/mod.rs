//! Hardware audio boundary and the sampling task.
//!
//! A [`ChannelSource`] describes a capture device; opening it on the sampling
//! thread yields an [`AudioChannel`] that blocks until the next block of raw
//! words is ready. [`SampleProvider`] narrows those words to 16-bit PCM and
//! writes them into the sample ring.
//!
//! # Word format
//!
//! Channels deliver signed words right-aligned at `bits_per_sample` bits
//! (an I2S MEMS microphone clocked at 32 bits delivers full `i32` words).
//! Narrowing is a right shift by `sample_shift` followed by saturation, so
//! `sample_shift = bits_per_sample - 16` is unity gain and smaller shifts
//! add 6 dB per bit.
//!
//! # Threading
//!
//! `open` runs on the sampling thread because some backends (cpal on
//! Windows/macOS) bind their stream to the creating thread. The opened
//! channel therefore never needs to be `Send`.

mod provider;
pub mod resample;
pub mod wav;

#[cfg(feature = "audio-cpal")]
pub mod capture;

pub use provider::{ProviderDiagnostics, ProviderHandle, ProviderSnapshot, SampleProvider};

#[cfg(feature = "audio-cpal")]
pub use capture::CpalSource;
pub use wav::WavSource;

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::buffering::{Sample, SAMPLE_RATE};
use crate::error::{HarkError, Result};

/// Capture parameters handed to [`ChannelSource::open`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
#[serde(default)]
pub struct ChannelConfig {
    /// Frames per second. The detection chain expects [`SAMPLE_RATE`].
    pub sample_rate: u32,
    /// Width of one hardware word (16, 24 or 32).
    pub bits_per_sample: u32,
    /// Interleaved channel count. Only mono is supported.
    pub channels: u16,
    /// Number of hardware (DMA) blocks the driver may queue.
    pub dma_buf_count: usize,
    /// Frames per hardware block; also the sampler's read size.
    pub dma_buf_len: usize,
    /// Right shift applied when narrowing a word to 16 bits.
    pub sample_shift: u32,
}

impl Default for ChannelConfig {
    /// 32-bit I2S MEMS microphone at 16 kHz with +30 dB of digital gain.
    fn default() -> Self {
        Self {
            sample_rate: SAMPLE_RATE,
            bits_per_sample: 32,
            channels: 1,
            dma_buf_count: 4,
            dma_buf_len: 64,
            sample_shift: 11,
        }
    }
}

impl ChannelConfig {
    /// Mono config at `bits_per_sample` with no added gain.
    pub fn unity_gain(bits_per_sample: u32) -> Self {
        Self {
            bits_per_sample,
            sample_shift: bits_per_sample.saturating_sub(16),
            ..Self::default()
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.channels != 1 {
            return Err(HarkError::InvalidChannelConfig(format!(
                "only mono capture is supported, got {} channels",
                self.channels
            )));
        }
        if !matches!(self.bits_per_sample, 16 | 24 | 32) {
            return Err(HarkError::InvalidChannelConfig(format!(
                "bits_per_sample must be 16, 24 or 32, got {}",
                self.bits_per_sample
            )));
        }
        if self.sample_shift >= self.bits_per_sample {
            return Err(HarkError::InvalidChannelConfig(format!(
                "sample_shift {} must be below bits_per_sample {}",
                self.sample_shift, self.bits_per_sample
            )));
        }
        if !(8_000..=96_000).contains(&self.sample_rate) {
            return Err(HarkError::InvalidChannelConfig(format!(
                "sample_rate {} Hz out of range",
                self.sample_rate
            )));
        }
        if self.dma_buf_count == 0 || self.dma_buf_len == 0 {
            return Err(HarkError::InvalidChannelConfig(
                "dma_buf_count and dma_buf_len must be non-zero".into(),
            ));
        }
        Ok(())
    }

    /// Wall-clock length of one hardware block.
    pub fn block_duration(&self) -> Duration {
        Duration::from_micros(self.dma_buf_len as u64 * 1_000_000 / self.sample_rate as u64)
    }

    /// Frames the hardware can hold before it starts dropping.
    pub fn queue_depth(&self) -> usize {
        self.dma_buf_count * self.dma_buf_len
    }

    /// Largest magnitude a word of this width can carry.
    pub fn full_scale(&self) -> i64 {
        (1i64 << (self.bits_per_sample - 1)) - 1
    }
}

/// Something that can be opened into a live [`AudioChannel`].
pub trait ChannelSource: Send + 'static {
    /// Identity for logs (device name, file path, ...).
    fn describe(&self) -> String;

    /// Open the channel. Called once, on the sampling thread.
    ///
    /// # Errors
    /// Device, format or configuration failures. These are fatal to the
    /// provider and surface from [`SampleProvider::start`].
    fn open(self: Box<Self>, config: &ChannelConfig) -> Result<Box<dyn AudioChannel>>;
}

/// An opened capture channel.
pub trait AudioChannel {
    /// Block until the hardware has data, then fill `words` from the front.
    /// Returns the number of words written.
    ///
    /// # Errors
    /// [`HarkError::ChannelClosed`] ends the sampler. Anything else is
    /// treated as transient and the slot is skipped.
    fn read(&mut self, words: &mut [i32]) -> Result<usize>;
}

/// Narrow one hardware word to a ring sample.
#[inline]
pub fn narrow_word(word: i32, shift: u32) -> Sample {
    (word >> shift).clamp(Sample::MIN as i32, Sample::MAX as i32) as Sample
}

/// Narrow a block of words into `out` (which must be at least as long).
pub fn narrow_block(words: &[i32], shift: u32, out: &mut [Sample]) {
    for (dst, &word) in out.iter_mut().zip(words) {
        *dst = narrow_word(word, shift);
    }
}
