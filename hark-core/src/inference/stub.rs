//! Constant-score engine for development and wiring tests.

use tracing::debug;

use crate::error::Result;
use crate::inference::{ArenaBudget, EngineLoader, InferenceEngine};

/// Returns the same score for every input.
pub struct StubEngine {
    input: Vec<f32>,
    score: f32,
    invocations: u64,
}

impl StubEngine {
    pub fn new(input_len: usize, score: f32) -> Self {
        Self {
            input: vec![0.0; input_len],
            score,
            invocations: 0,
        }
    }

    pub fn invocations(&self) -> u64 {
        self.invocations
    }
}

impl InferenceEngine for StubEngine {
    fn input_len(&self) -> usize {
        self.input.len()
    }

    fn input_mut(&mut self) -> &mut [f32] {
        &mut self.input
    }

    fn invoke(&mut self) -> Result<()> {
        self.invocations += 1;
        Ok(())
    }

    fn output(&self) -> f32 {
        self.score
    }
}

/// Loader for [`StubEngine`]. Still claims its input from the arena so a
/// misconfigured budget shows up without a real model.
#[derive(Debug, Clone)]
pub struct StubLoader {
    input_len: usize,
    score: f32,
}

impl StubLoader {
    pub fn new(input_len: usize, score: f32) -> Self {
        Self { input_len, score }
    }
}

impl EngineLoader for StubLoader {
    fn describe(&self) -> String {
        format!("stub(score={})", self.score)
    }

    fn load(&self, arena: &mut ArenaBudget) -> Result<Box<dyn InferenceEngine>> {
        arena.claim_f32(self.input_len, "stub input")?;
        debug!(input_len = self.input_len, score = self.score, "stub engine loaded");
        Ok(Box::new(StubEngine::new(self.input_len, self.score)))
    }
}
