//! Fully-connected classifier loaded from a JSON model file.
//!
//! Small enough to run anywhere, and the format carries a schema version the
//! loader checks before touching anything else:
//!
//! ```json
//! {
//!   "schemaVersion": 1,
//!   "inputLen": 4257,
//!   "layers": [
//!     { "weights": [[...], ...], "bias": [...], "activation": "relu" },
//!     { "weights": [[...]],      "bias": [0.1], "activation": "sigmoid" }
//!   ]
//! }
//! ```
//!
//! `weights` is row-major, one row per output unit. The last layer must have
//! exactly one unit. Weights are treated as read-only model data; only the
//! input and per-layer activations are claimed from the arena.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::info;

use crate::error::{HarkError, Result};
use crate::inference::{ArenaBudget, EngineLoader, InferenceEngine};

/// The only model schema this build understands.
pub const MODEL_SCHEMA_VERSION: u32 = 1;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Activation {
    Linear,
    Relu,
    Sigmoid,
}

impl Activation {
    #[inline]
    fn apply(self, x: f32) -> f32 {
        match self {
            Self::Linear => x,
            Self::Relu => x.max(0.0),
            Self::Sigmoid => 1.0 / (1.0 + (-x).exp()),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DenseLayer {
    pub weights: Vec<Vec<f32>>,
    pub bias: Vec<f32>,
    pub activation: Activation,
}

impl DenseLayer {
    fn outputs(&self) -> usize {
        self.bias.len()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DenseModel {
    pub schema_version: u32,
    pub input_len: usize,
    pub layers: Vec<DenseLayer>,
}

impl DenseModel {
    /// Parse and validate a model document.
    ///
    /// # Errors
    /// [`HarkError::SchemaMismatch`] before any shape checks, then
    /// [`HarkError::InvalidModel`] for malformed JSON or inconsistent shapes.
    pub fn from_json_str(json: &str) -> Result<Self> {
        #[derive(Deserialize)]
        #[serde(rename_all = "camelCase")]
        struct Header {
            schema_version: u32,
        }

        let header: Header = serde_json::from_str(json)
            .map_err(|e| HarkError::InvalidModel(format!("model header: {e}")))?;
        if header.schema_version != MODEL_SCHEMA_VERSION {
            return Err(HarkError::SchemaMismatch {
                found: header.schema_version,
                expected: MODEL_SCHEMA_VERSION,
            });
        }

        let model: Self = serde_json::from_str(json)
            .map_err(|e| HarkError::InvalidModel(e.to_string()))?;
        model.validate()?;
        Ok(model)
    }

    pub fn from_file(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Err(HarkError::ModelNotFound {
                path: path.to_path_buf(),
            });
        }
        let json = std::fs::read_to_string(path)?;
        Self::from_json_str(&json)
    }

    pub fn validate(&self) -> Result<()> {
        if self.schema_version != MODEL_SCHEMA_VERSION {
            return Err(HarkError::SchemaMismatch {
                found: self.schema_version,
                expected: MODEL_SCHEMA_VERSION,
            });
        }
        if self.input_len == 0 {
            return Err(HarkError::InvalidModel("inputLen must be non-zero".into()));
        }
        let Some(last) = self.layers.last() else {
            return Err(HarkError::InvalidModel("model has no layers".into()));
        };

        let mut width = self.input_len;
        for (idx, layer) in self.layers.iter().enumerate() {
            if layer.weights.len() != layer.bias.len() || layer.bias.is_empty() {
                return Err(HarkError::InvalidModel(format!(
                    "layer {idx}: {} weight rows but {} biases",
                    layer.weights.len(),
                    layer.bias.len()
                )));
            }
            if let Some(row) = layer.weights.iter().position(|r| r.len() != width) {
                return Err(HarkError::InvalidModel(format!(
                    "layer {idx}: row {row} has {} weights, expected {width}",
                    layer.weights[row].len()
                )));
            }
            width = layer.outputs();
        }

        if last.outputs() != 1 {
            return Err(HarkError::InvalidModel(format!(
                "final layer must produce one score, produces {}",
                last.outputs()
            )));
        }
        Ok(())
    }
}

/// Executes a [`DenseModel`] with buffers sized at load time.
pub struct DenseEngine {
    model: DenseModel,
    input: Vec<f32>,
    activations: Vec<Vec<f32>>,
    score: f32,
}

impl DenseEngine {
    /// # Errors
    /// Validation failures from [`DenseModel::validate`] or
    /// [`HarkError::ArenaExhausted`].
    pub fn new(model: DenseModel, arena: &mut ArenaBudget) -> Result<Self> {
        model.validate()?;

        arena.claim_f32(model.input_len, "dense input")?;
        let mut activations = Vec::with_capacity(model.layers.len());
        for (idx, layer) in model.layers.iter().enumerate() {
            arena.claim_f32(layer.outputs(), &format!("dense layer {idx}"))?;
            activations.push(vec![0.0; layer.outputs()]);
        }

        Ok(Self {
            input: vec![0.0; model.input_len],
            activations,
            score: 0.0,
            model,
        })
    }
}

impl InferenceEngine for DenseEngine {
    fn input_len(&self) -> usize {
        self.input.len()
    }

    fn input_mut(&mut self) -> &mut [f32] {
        &mut self.input
    }

    fn invoke(&mut self) -> Result<()> {
        for (idx, layer) in self.model.layers.iter().enumerate() {
            let (done, rest) = self.activations.split_at_mut(idx);
            let src = match done.last() {
                Some(prev) => prev.as_slice(),
                None => self.input.as_slice(),
            };
            let dst = &mut rest[0];

            for ((out, row), &bias) in dst.iter_mut().zip(&layer.weights).zip(&layer.bias) {
                let sum: f32 = row.iter().zip(src).map(|(w, x)| w * x).sum();
                *out = layer.activation.apply(sum + bias);
            }
        }

        let score = self
            .activations
            .last()
            .and_then(|out| out.first())
            .copied()
            .unwrap_or(0.0);
        if !score.is_finite() {
            return Err(HarkError::Inference(format!("non-finite score {score}")));
        }
        self.score = score;
        Ok(())
    }

    fn output(&self) -> f32 {
        self.score
    }
}

/// Loads a [`DenseModel`] from disk on every `load`.
#[derive(Debug, Clone)]
pub struct DenseLoader {
    path: PathBuf,
}

impl DenseLoader {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

impl EngineLoader for DenseLoader {
    fn describe(&self) -> String {
        format!("dense({})", self.path.display())
    }

    fn load(&self, arena: &mut ArenaBudget) -> Result<Box<dyn InferenceEngine>> {
        let model = DenseModel::from_file(&self.path)?;
        info!(
            path = ?self.path,
            input_len = model.input_len,
            layers = model.layers.len(),
            "dense model loaded"
        );
        Ok(Box::new(DenseEngine::new(model, arena)?))
    }
}
