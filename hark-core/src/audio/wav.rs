//! WAV file replay as a capture channel.
//!
//! Lets the full chain run on a desktop or in CI without a microphone. The
//! file is decoded up front and re-emitted in hardware-sized blocks,
//! optionally paced at real time and looped.

use std::path::{Path, PathBuf};
use std::thread;

use hound::{SampleFormat, WavReader};
use tracing::info;

use super::{AudioChannel, ChannelConfig, ChannelSource};
use crate::error::{HarkError, Result};

/// A WAV file to replay.
#[derive(Debug, Clone)]
pub struct WavSource {
    path: PathBuf,
    looping: bool,
    paced: bool,
}

impl WavSource {
    /// Replays once, paced at real time.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            looping: false,
            paced: true,
        }
    }

    /// Restart from the beginning instead of closing at end of file.
    pub fn looping(mut self, looping: bool) -> Self {
        self.looping = looping;
        self
    }

    /// Sleep one block duration per read, like a real device.
    pub fn paced(mut self, paced: bool) -> Self {
        self.paced = paced;
        self
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl ChannelSource for WavSource {
    fn describe(&self) -> String {
        self.path.display().to_string()
    }

    fn open(self: Box<Self>, config: &ChannelConfig) -> Result<Box<dyn AudioChannel>> {
        let words = decode_words(&self.path, config)?;
        info!(
            path = ?self.path,
            frames = words.len(),
            looping = self.looping,
            paced = self.paced,
            "replaying WAV file"
        );

        Ok(Box::new(WavChannel {
            words,
            cursor: 0,
            looping: self.looping,
            paced: self.paced,
            config: config.clone(),
        }))
    }
}

struct WavChannel {
    words: Vec<i32>,
    cursor: usize,
    looping: bool,
    paced: bool,
    config: ChannelConfig,
}

impl AudioChannel for WavChannel {
    fn read(&mut self, words: &mut [i32]) -> Result<usize> {
        if self.cursor >= self.words.len() {
            if self.looping && !self.words.is_empty() {
                self.cursor = 0;
            } else {
                return Err(HarkError::ChannelClosed);
            }
        }

        let n = words.len().min(self.words.len() - self.cursor);
        words[..n].copy_from_slice(&self.words[self.cursor..self.cursor + n]);
        self.cursor += n;

        if self.paced {
            let nanos = n as u64 * 1_000_000_000 / self.config.sample_rate as u64;
            thread::sleep(std::time::Duration::from_nanos(nanos));
        }

        Ok(n)
    }
}

/// Decode a mono WAV file into words of `config.bits_per_sample` width.
fn decode_words(path: &Path, config: &ChannelConfig) -> Result<Vec<i32>> {
    if !path.exists() {
        return Err(HarkError::AudioDevice(format!(
            "WAV file not found: {}",
            path.display()
        )));
    }

    let reader = WavReader::open(path).map_err(|e| HarkError::AudioDevice(e.to_string()))?;
    let spec = reader.spec();

    if spec.channels != 1 {
        return Err(HarkError::InvalidChannelConfig(format!(
            "{} has {} channels; only mono is supported",
            path.display(),
            spec.channels
        )));
    }
    if spec.sample_rate != config.sample_rate {
        return Err(HarkError::InvalidChannelConfig(format!(
            "{} is {} Hz but the channel is configured for {} Hz",
            path.display(),
            spec.sample_rate,
            config.sample_rate
        )));
    }

    let target_bits = config.bits_per_sample;
    match spec.sample_format {
        SampleFormat::Int => {
            let source_bits = u32::from(spec.bits_per_sample);
            reader
                .into_samples::<i32>()
                .map(|s| {
                    s.map(|v| rescale_int(v, source_bits, target_bits))
                        .map_err(|e| HarkError::AudioStream(e.to_string()))
                })
                .collect()
        }
        SampleFormat::Float => {
            let full_scale = config.full_scale() as f64;
            reader
                .into_samples::<f32>()
                .map(|s| {
                    s.map(|v| (f64::from(v.clamp(-1.0, 1.0)) * full_scale).round() as i32)
                        .map_err(|e| HarkError::AudioStream(e.to_string()))
                })
                .collect()
        }
    }
}

fn rescale_int(value: i32, source_bits: u32, target_bits: u32) -> i32 {
    if target_bits >= source_bits {
        value << (target_bits - source_bits)
    } else {
        value >> (source_bits - target_bits)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use hound::{WavSpec, WavWriter};

    fn write_wav(path: &Path, sample_rate: u32, channels: u16, samples: &[i16]) {
        let spec = WavSpec {
            channels,
            sample_rate,
            bits_per_sample: 16,
            sample_format: SampleFormat::Int,
        };
        let mut writer = WavWriter::create(path, spec).expect("create wav");
        for &s in samples {
            writer.write_sample(s).expect("write sample");
        }
        writer.finalize().expect("finalize wav");
    }

    #[test]
    fn replays_16_bit_file_as_32_bit_words() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("tone.wav");
        write_wav(&path, 16_000, 1, &[1, -2, 3]);

        let source = Box::new(WavSource::new(&path).paced(false));
        let mut channel = source
            .open(&ChannelConfig::unity_gain(32))
            .expect("open wav");

        let mut words = [0i32; 8];
        let n = channel.read(&mut words).expect("read");
        assert_eq!(n, 3);
        assert_eq!(&words[..3], &[1 << 16, -2 << 16, 3 << 16]);
        assert!(matches!(channel.read(&mut words), Err(HarkError::ChannelClosed)));
    }

    #[test]
    fn looping_restarts_at_end_of_file() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("loop.wav");
        write_wav(&path, 16_000, 1, &[5, 6]);

        let source = Box::new(WavSource::new(&path).paced(false).looping(true));
        let mut channel = source
            .open(&ChannelConfig::unity_gain(16))
            .expect("open wav");

        let mut words = [0i32; 2];
        for _ in 0..3 {
            assert_eq!(channel.read(&mut words).expect("read"), 2);
            assert_eq!(words, [5, 6]);
        }
    }

    #[test]
    fn rejects_rate_mismatch_and_stereo() {
        let dir = tempfile::tempdir().expect("tempdir");
        let wrong_rate = dir.path().join("44k.wav");
        write_wav(&wrong_rate, 44_100, 1, &[0; 4]);
        let result = Box::new(WavSource::new(&wrong_rate)).open(&ChannelConfig::unity_gain(16));
        assert!(matches!(result, Err(HarkError::InvalidChannelConfig(_))));

        let stereo = dir.path().join("stereo.wav");
        write_wav(&stereo, 16_000, 2, &[0; 4]);
        let result = Box::new(WavSource::new(&stereo)).open(&ChannelConfig::unity_gain(16));
        assert!(matches!(result, Err(HarkError::InvalidChannelConfig(_))));
    }

    #[test]
    fn missing_file_is_a_device_error() {
        let result = Box::new(WavSource::new("/nonexistent/hark.wav"))
            .open(&ChannelConfig::default());
        assert!(matches!(result, Err(HarkError::AudioDevice(_))));
    }

    #[test]
    fn narrowing_rescale_between_widths() {
        assert_eq!(rescale_int(1, 16, 32), 1 << 16);
        assert_eq!(rescale_int(1 << 8, 24, 16), 1);
        assert_eq!(rescale_int(-7, 16, 16), -7);
    }
}
