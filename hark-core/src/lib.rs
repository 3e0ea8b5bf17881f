//! # hark-core
//!
//! Always-on wake-word detection for small devices.
//!
//! ## Architecture
//!
//! ```text
//! AudioChannel → SampleProvider ──write──► SampleRing (lock-free, overwrite)
//!   (sampler thread)                            │
//!                                   reader.rewind(1 s)   every 200 ms
//!                                               │
//!                                  SpectrogramExtractor → engine input
//!                                               │
//!                                     InferenceEngine::invoke
//!                                               │
//!                              Hysteresis (2 × score ≥ 0.95) → WakeEvent
//! ```
//!
//! The sampler never waits on the detector: the ring overwrites its oldest
//! samples, and a reader that was lapped gets zeros and a loss count instead
//! of torn data.

#![forbid(unsafe_code)]
#![warn(clippy::all)]

pub mod audio;
pub mod buffering;
pub mod detector;
pub mod error;
pub mod inference;
pub mod ipc;
pub mod spectrogram;

// Convenience re-exports for downstream crates
pub use audio::{ChannelConfig, ChannelSource, SampleProvider, WavSource};
pub use buffering::{create_sample_ring, RingReader, RingWriter, SampleRing};
pub use detector::{DetectorConfig, WakeWordDetectionState, WakeWordService};
pub use error::{HarkError, Result};
pub use inference::{ArenaBudget, DenseLoader, EngineLoader, InferenceEngine, StubLoader};
pub use ipc::events::{DetectorStatus, DetectorStatusEvent, WakeEvent};
pub use spectrogram::{SpectrogramConfig, SpectrogramExtractor};

#[cfg(feature = "audio-cpal")]
pub use audio::CpalSource;

#[cfg(feature = "onnx")]
pub use inference::OnnxLoader;
