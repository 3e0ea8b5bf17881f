//! Desktop microphone capture through cpal.
//!
//! ```text
//!  cpal callback (RT thread)          sampling thread
//!  ┌────────────────────────┐        ┌──────────────────────────────┐
//!  │ mix to mono f32        │  SPSC  │ pop → RateConverter → 16 kHz │
//!  │ producer.push_slice()  │ ─────► │ scale to i32 words           │
//!  └────────────────────────┘ ringbuf └──────────────────────────────┘
//! ```
//!
//! The callback must not allocate after warm-up, lock or do I/O; it only
//! mixes and pushes. Everything else happens in [`AudioChannel::read`] on
//! the sampling thread, which also owns the `!Send` stream.

use std::collections::VecDeque;
use std::thread;
use std::time::{Duration, Instant};

use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{Device, SampleFormat, SizedSample, Stream, StreamConfig};
use ringbuf::traits::{Consumer, Producer, Split};
use ringbuf::{HeapCons, HeapProd, HeapRb};
use tracing::{error, info, warn};

use super::resample::RateConverter;
use super::{AudioChannel, ChannelConfig, ChannelSource};
use crate::error::{HarkError, Result};

/// How often an empty read re-checks the callback queue.
const POLL_INTERVAL: Duration = Duration::from_millis(2);

/// A cpal input device, chosen by name or falling back to the default.
#[derive(Debug, Clone, Default)]
pub struct CpalSource {
    preferred_device: Option<String>,
}

impl CpalSource {
    pub fn new(preferred_device: Option<String>) -> Self {
        Self { preferred_device }
    }
}

impl ChannelSource for CpalSource {
    fn describe(&self) -> String {
        self.preferred_device
            .clone()
            .unwrap_or_else(|| "default input".into())
    }

    fn open(self: Box<Self>, config: &ChannelConfig) -> Result<Box<dyn AudioChannel>> {
        let device = select_device(self.preferred_device.as_deref())?;
        let supported = device
            .default_input_config()
            .map_err(|e| HarkError::AudioDevice(e.to_string()))?;

        let device_rate = supported.sample_rate().0;
        let channels = supported.channels();
        info!(
            device = device.name().unwrap_or_default().as_str(),
            device_rate,
            channels,
            format = ?supported.sample_format(),
            "opening input device"
        );

        // Room for the whole hardware queue at device rate, and never less
        // than a quarter second.
        let ratio = device_rate.div_ceil(config.sample_rate).max(1) as usize;
        let queue_len = (config.queue_depth() * ratio).max(device_rate as usize / 4);
        let (producer, consumer) = HeapRb::<f32>::new(queue_len).split();

        let stream_config = StreamConfig {
            channels,
            sample_rate: cpal::SampleRate(device_rate),
            buffer_size: cpal::BufferSize::Default,
        };

        let stream = match supported.sample_format() {
            SampleFormat::F32 => {
                build_stream::<f32>(&device, &stream_config, producer, |s| s)?
            }
            SampleFormat::I16 => {
                build_stream::<i16>(&device, &stream_config, producer, |s| {
                    f32::from(s) / 32_768.0
                })?
            }
            SampleFormat::I32 => {
                build_stream::<i32>(&device, &stream_config, producer, |s| {
                    s as f32 / 2_147_483_648.0
                })?
            }
            SampleFormat::U8 => {
                build_stream::<u8>(&device, &stream_config, producer, |s| {
                    (f32::from(s) - 128.0) / 128.0
                })?
            }
            other => {
                return Err(HarkError::AudioStream(format!(
                    "unsupported sample format: {other:?}"
                )))
            }
        };

        stream
            .play()
            .map_err(|e| HarkError::AudioStream(e.to_string()))?;

        let converter = RateConverter::new(device_rate, config.sample_rate, config.dma_buf_len * ratio)?;

        Ok(Box::new(CpalChannel {
            _stream: stream,
            consumer,
            converter,
            raw: vec![0.0; queue_len],
            pending: VecDeque::with_capacity(config.queue_depth() * 2),
            full_scale: config.full_scale() as f32,
            // A device that stays silent for a whole hardware queue is stalled.
            timeout: config.block_duration() * config.dma_buf_count as u32 * 4,
        }))
    }
}

fn select_device(preferred: Option<&str>) -> Result<Device> {
    let host = cpal::default_host();

    if let Some(name) = preferred {
        match host.input_devices() {
            Ok(mut devices) => {
                if let Some(device) =
                    devices.find(|d| d.name().map(|n| n == name).unwrap_or(false))
                {
                    return Ok(device);
                }
                warn!("preferred input device '{name}' not found, falling back");
            }
            Err(e) => warn!("failed to list input devices: {e}"),
        }
    }

    if let Some(device) = host.default_input_device() {
        return Ok(device);
    }

    let mut devices = host
        .input_devices()
        .map_err(|e| HarkError::AudioDevice(e.to_string()))?;
    let first = devices.next().ok_or(HarkError::NoDefaultInputDevice)?;
    warn!("no default input device, using first available input");
    Ok(first)
}

fn build_stream<T>(
    device: &Device,
    config: &StreamConfig,
    mut producer: HeapProd<f32>,
    to_f32: fn(T) -> f32,
) -> Result<Stream>
where
    T: SizedSample,
{
    let channels = usize::from(config.channels.max(1));
    let mut mono: Vec<f32> = Vec::new();

    device
        .build_input_stream(
            config,
            move |data: &[T], _info| {
                let frames = data.len() / channels;
                mono.resize(frames, 0.0);
                for (frame, out) in data.chunks_exact(channels).zip(mono.iter_mut()) {
                    let sum: f32 = frame.iter().map(|&s| to_f32(s)).sum();
                    *out = sum / channels as f32;
                }
                let pushed = producer.push_slice(&mono);
                if pushed < mono.len() {
                    warn!("capture queue full: dropped {} frames", mono.len() - pushed);
                }
            },
            |err| error!("audio stream error: {err}"),
            None,
        )
        .map_err(|e| HarkError::AudioStream(e.to_string()))
}

struct CpalChannel {
    _stream: Stream,
    consumer: HeapCons<f32>,
    converter: RateConverter,
    raw: Vec<f32>,
    /// Converted 16 kHz samples not yet handed out.
    pending: VecDeque<f32>,
    full_scale: f32,
    timeout: Duration,
}

impl AudioChannel for CpalChannel {
    fn read(&mut self, words: &mut [i32]) -> Result<usize> {
        let deadline = Instant::now() + self.timeout;
        let wanted = words.len();

        while self.pending.len() < wanted {
            let n = self.consumer.pop_slice(&mut self.raw);
            if n > 0 {
                self.converter.process_into(&self.raw[..n], &mut self.pending);
                continue;
            }
            if Instant::now() >= deadline {
                return Err(HarkError::ChannelTimeout(self.timeout));
            }
            thread::sleep(POLL_INTERVAL);
        }

        for (word, sample) in words.iter_mut().zip(self.pending.drain(..wanted)) {
            *word = (sample.clamp(-1.0, 1.0) * self.full_scale) as i32;
        }
        Ok(wanted)
    }
}
