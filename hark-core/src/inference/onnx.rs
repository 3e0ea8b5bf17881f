//! ONNX Runtime backend via the `ort` crate.
//!
//! Expects a classifier with one float input shaped `[1, features]` (or any
//! shape whose non-batch dimensions multiply to `features`) and a first
//! output whose last element is the wake-word probability. Single-unit
//! sigmoid heads and two-class softmax heads both fit.

use std::path::{Path, PathBuf};

use ort::session::builder::{GraphOptimizationLevel, SessionBuilder};
use ort::session::Session;
use ort::value::TensorRef;
use tracing::{info, warn};

use crate::error::{HarkError, Result};
use crate::inference::{ArenaBudget, EngineLoader, InferenceEngine};

pub struct OnnxEngine {
    session: Session,
    input_name: String,
    input: Vec<f32>,
    score: f32,
}

impl OnnxEngine {
    /// Open `path` and check its input against `feature_len`.
    ///
    /// # Errors
    /// [`HarkError::ModelNotFound`], [`HarkError::OnnxSession`],
    /// [`HarkError::InputShapeMismatch`] or [`HarkError::ArenaExhausted`].
    pub fn open(path: &Path, feature_len: usize, arena: &mut ArenaBudget) -> Result<Self> {
        if !path.exists() {
            return Err(HarkError::ModelNotFound {
                path: path.to_path_buf(),
            });
        }

        let session = SessionBuilder::new()
            .map_err(|e| HarkError::OnnxSession(e.to_string()))?
            .with_intra_threads(1)
            .map_err(|e| HarkError::OnnxSession(e.to_string()))?
            .with_optimization_level(GraphOptimizationLevel::All)
            .map_err(|e| HarkError::OnnxSession(e.to_string()))?
            .commit_from_file(path)
            .map_err(|e| HarkError::OnnxSession(e.to_string()))?;

        let input = session
            .inputs()
            .first()
            .ok_or_else(|| HarkError::OnnxSession("model has no inputs".into()))?;
        let input_name = input.name().to_string();

        if let Some(shape) = input.dtype().tensor_shape() {
            // Leading dimension is the batch; dynamic dims (<= 0) tell us nothing.
            let dims: Vec<i64> = shape.iter().skip(1).copied().collect();
            if dims.iter().all(|&d| d > 0) {
                let declared = dims.iter().product::<i64>() as usize;
                if declared != feature_len {
                    return Err(HarkError::InputShapeMismatch {
                        expected: declared,
                        actual: feature_len,
                    });
                }
            } else {
                warn!(
                    input = input_name.as_str(),
                    ?dims,
                    "model input has dynamic dims; trusting feature length"
                );
            }
        }

        arena.claim_f32(feature_len, "onnx input")?;
        if session.outputs().is_empty() {
            return Err(HarkError::OnnxSession("model has no outputs".into()));
        }

        info!(
            path = ?path,
            input = input_name.as_str(),
            feature_len,
            "ONNX wake-word model loaded"
        );

        Ok(Self {
            session,
            input_name,
            input: vec![0.0; feature_len],
            score: 0.0,
        })
    }
}

impl InferenceEngine for OnnxEngine {
    fn input_len(&self) -> usize {
        self.input.len()
    }

    fn input_mut(&mut self) -> &mut [f32] {
        &mut self.input
    }

    fn invoke(&mut self) -> Result<()> {
        let value = input_tensor(&self.input)?;
        let outputs = self
            .session
            .run(ort::inputs![self.input_name.as_str() => value])
            .map_err(|e| HarkError::OnnxSession(e.to_string()))?;
        let (_, data) = outputs[0]
            .try_extract_tensor::<f32>()
            .map_err(|e| HarkError::OnnxSession(e.to_string()))?;

        self.score = data
            .last()
            .copied()
            .ok_or_else(|| HarkError::Inference("model produced an empty output".into()))?;
        Ok(())
    }

    fn output(&self) -> f32 {
        self.score
    }
}

/// Borrows `input` as a `[1, len]` tensor without copying it.
fn input_tensor(input: &[f32]) -> Result<TensorRef<'_, f32>> {
    TensorRef::from_array_view(([1_i64, input.len() as i64], input))
        .map_err(|e| HarkError::OnnxSession(e.to_string()))
}

/// Opens an ONNX model sized for `feature_len` features.
#[derive(Debug, Clone)]
pub struct OnnxLoader {
    path: PathBuf,
    feature_len: usize,
}

impl OnnxLoader {
    pub fn new(path: impl Into<PathBuf>, feature_len: usize) -> Self {
        Self {
            path: path.into(),
            feature_len,
        }
    }
}

impl EngineLoader for OnnxLoader {
    fn describe(&self) -> String {
        format!("onnx({})", self.path.display())
    }

    fn load(&self, arena: &mut ArenaBudget) -> Result<Box<dyn InferenceEngine>> {
        Ok(Box::new(OnnxEngine::open(&self.path, self.feature_len, arena)?))
    }
}
