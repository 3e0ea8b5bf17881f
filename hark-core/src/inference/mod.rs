//! Classifier boundary.
//!
//! The detector treats the model as a black box with three operations: a
//! writable input buffer of fixed length, `invoke`, and a scalar output.
//! Engines are built by an [`EngineLoader`] against an [`ArenaBudget`], the
//! working memory the host has provisioned for tensors. Loading is the only
//! place a model can be rejected; once loaded, an engine is trusted.

pub mod dense;
pub mod stub;

#[cfg(feature = "onnx")]
pub mod onnx;

pub use dense::{DenseEngine, DenseLoader, DenseModel, MODEL_SCHEMA_VERSION};
pub use stub::{StubEngine, StubLoader};

#[cfg(feature = "onnx")]
pub use onnx::{OnnxEngine, OnnxLoader};

use std::sync::Arc;

use tracing::debug;

use crate::error::{HarkError, Result};

/// Default working memory for tensors, in bytes.
pub const DEFAULT_ARENA_BYTES: usize = 25_000;

/// A loaded, validated classifier.
pub trait InferenceEngine: Send {
    /// Length of [`input_mut`](Self::input_mut), fixed for the engine's life.
    fn input_len(&self) -> usize;

    /// The input tensor. Filled in place before each [`invoke`](Self::invoke).
    fn input_mut(&mut self) -> &mut [f32];

    /// Run the model on the current input.
    ///
    /// # Errors
    /// Backend failures. The caller logs them and treats the cycle as a
    /// non-detection.
    fn invoke(&mut self) -> Result<()>;

    /// Detection score from the last successful `invoke`, in `0.0..=1.0`.
    fn output(&self) -> f32;
}

/// Builds an engine. Held by the detector so the engine can be rebuilt on
/// each `enter_state`.
pub trait EngineLoader: Send + Sync + 'static {
    /// Identity for logs.
    fn describe(&self) -> String;

    /// Load and validate the model, claiming its tensors from `arena`.
    ///
    /// # Errors
    /// Missing or malformed model files, [`HarkError::SchemaMismatch`], or
    /// [`HarkError::ArenaExhausted`].
    fn load(&self, arena: &mut ArenaBudget) -> Result<Box<dyn InferenceEngine>>;
}

impl<L: EngineLoader + ?Sized> EngineLoader for Arc<L> {
    fn describe(&self) -> String {
        (**self).describe()
    }

    fn load(&self, arena: &mut ArenaBudget) -> Result<Box<dyn InferenceEngine>> {
        (**self).load(arena)
    }
}

/// Fixed working-memory budget shared by every tensor an engine allocates.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArenaBudget {
    capacity: usize,
    used: usize,
}

impl ArenaBudget {
    pub fn new(capacity: usize) -> Self {
        Self { capacity, used: 0 }
    }

    /// Reserve `bytes` for `what`.
    ///
    /// # Errors
    /// [`HarkError::ArenaExhausted`] when the claim would exceed capacity;
    /// the budget is left unchanged.
    pub fn claim(&mut self, bytes: usize, what: &str) -> Result<()> {
        let required = self.used.saturating_add(bytes);
        if required > self.capacity {
            return Err(HarkError::ArenaExhausted {
                required,
                budget: self.capacity,
            });
        }
        self.used = required;
        debug!(what, bytes, used = self.used, capacity = self.capacity, "arena claim");
        Ok(())
    }

    /// Reserve room for `len` f32 values.
    pub fn claim_f32(&mut self, len: usize, what: &str) -> Result<()> {
        self.claim(len.saturating_mul(std::mem::size_of::<f32>()), what)
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn used(&self) -> usize {
        self.used
    }

    pub fn remaining(&self) -> usize {
        self.capacity - self.used
    }
}

impl Default for ArenaBudget {
    fn default() -> Self {
        Self::new(DEFAULT_ARENA_BYTES)
    }
}
