//! Fixed-ratio rate conversion for capture devices that cannot run at
//! 16 kHz.
//!
//! Desktop devices usually capture at 44.1 or 48 kHz. The detection chain
//! only ever sees 16 kHz, so [`CpalSource`](super::CpalSource) runs every
//! callback block through a [`RateConverter`] on the sampling thread.
//! Equal rates skip rubato entirely.

use std::collections::VecDeque;

use rubato::{FastFixedIn, PolynomialDegree, Resampler};
use tracing::{info, warn};

use crate::error::{HarkError, Result};

/// Mono f32 converter between two fixed rates.
pub struct RateConverter {
    /// `None` in passthrough mode.
    resampler: Option<FastFixedIn<f32>>,
    /// Input not yet long enough for one rubato chunk.
    pending: Vec<f32>,
    chunk_size: usize,
    scratch: Vec<Vec<f32>>,
}

impl RateConverter {
    /// # Errors
    /// [`HarkError::AudioDevice`] if rubato rejects the ratio or chunk size.
    pub fn new(capture_rate: u32, target_rate: u32, chunk_size: usize) -> Result<Self> {
        if capture_rate == target_rate {
            return Ok(Self {
                resampler: None,
                pending: Vec::new(),
                chunk_size,
                scratch: Vec::new(),
            });
        }

        let resampler = FastFixedIn::<f32>::new(
            f64::from(target_rate) / f64::from(capture_rate),
            1.0,
            PolynomialDegree::Cubic,
            chunk_size,
            1,
        )
        .map_err(|e| HarkError::AudioDevice(format!("resampler init: {e}")))?;

        let scratch = vec![vec![0f32; resampler.output_frames_max()]; 1];
        info!(capture_rate, target_rate, chunk_size, "capture resampling enabled");

        Ok(Self {
            resampler: Some(resampler),
            pending: Vec::with_capacity(chunk_size * 2),
            chunk_size,
            scratch,
        })
    }

    /// Convert `input` and append whatever output is ready to `out`.
    /// Returns the number of samples appended. Partial chunks are held back
    /// until a later call completes them.
    pub fn process_into(&mut self, input: &[f32], out: &mut VecDeque<f32>) -> usize {
        let Some(resampler) = self.resampler.as_mut() else {
            out.extend(input.iter().copied());
            return input.len();
        };

        self.pending.extend_from_slice(input);
        let mut appended = 0;

        while self.pending.len() >= self.chunk_size {
            let chunk = &self.pending[..self.chunk_size];
            match resampler.process_into_buffer(&[chunk], &mut self.scratch, None) {
                Ok((_, produced)) => {
                    out.extend(self.scratch[0][..produced].iter().copied());
                    appended += produced;
                }
                Err(e) => warn!("resampler dropped a chunk: {e}"),
            }
            self.pending.drain(..self.chunk_size);
        }

        appended
    }

    pub fn is_passthrough(&self) -> bool {
        self.resampler.is_none()
    }
}
