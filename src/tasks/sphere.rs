//! Sphere objective: minimize `f(x) = Σ x_i²` with SGD
//!
//! The simplest possible stand-in for a training loop. The member state
//! is the current point and its momentum buffer; good learning-rate and
//! momentum settings reach the bowl's bottom in few steps, bad ones
//! oscillate or crawl, which gives the evolvers a real gradient to search.

use super::SgdParams;
use crate::error::Result;
use crate::fitness::{Evaluator, Trainer};
use crate::member::{Checkpoint, Split, LOSS_METRIC, SCORE_METRIC};
use crate::pool::WorkerContext;
use ndarray::Array1;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};

#[derive(Debug, Serialize, Deserialize)]
struct SphereState {
    position: Vec<f64>,
    buffer: Vec<f64>,
}

pub struct SphereTask {
    dim: usize,
}

impl SphereTask {
    pub fn new(dim: usize) -> Self {
        Self { dim }
    }

    fn objective(position: &Array1<f64>) -> f64 {
        position.iter().map(|x| x * x).sum()
    }

    /// Load the member's state blob, or start it at a deterministic
    /// per-member point in `[-5, 5]^dim`.
    fn load_state(&self, checkpoint: &Checkpoint) -> Result<SphereState> {
        match &checkpoint.state {
            Some(blob) => Ok(bincode::deserialize(blob)?),
            None => {
                let mut init = StdRng::seed_from_u64(checkpoint.id as u64);
                Ok(SphereState {
                    position: (0..self.dim).map(|_| init.gen_range(-5.0..5.0)).collect(),
                    buffer: vec![0.0; self.dim],
                })
            }
        }
    }

    fn store_state(&self, checkpoint: &mut Checkpoint, state: &SphereState) -> Result<()> {
        checkpoint.state = Some(bincode::serialize(state)?);
        Ok(())
    }
}

impl Trainer for SphereTask {
    fn train(
        &self,
        checkpoint: &mut Checkpoint,
        step_size: usize,
        _context: &mut WorkerContext,
    ) -> Result<()> {
        let state = self.load_state(checkpoint)?;
        let params = SgdParams::read(&checkpoint.hyperparameters)?;
        let mut position = Array1::from(state.position);
        let mut buffer = Array1::from(state.buffer);

        for _ in 0..step_size {
            let gradient = &position * 2.0;
            params.step(&mut position, &mut buffer, &gradient);
        }

        checkpoint.steps += step_size;
        checkpoint.record_metric(Split::Train, LOSS_METRIC, Self::objective(&position));
        self.store_state(
            checkpoint,
            &SphereState {
                position: position.to_vec(),
                buffer: buffer.to_vec(),
            },
        )
    }
}

impl Evaluator for SphereTask {
    fn evaluate(
        &self,
        checkpoint: &mut Checkpoint,
        split: Split,
        _context: &mut WorkerContext,
    ) -> Result<()> {
        let state = self.load_state(checkpoint)?;
        let position = Array1::from(state.position);
        let loss = Self::objective(&position);
        checkpoint.record_metric(split, LOSS_METRIC, loss);
        checkpoint.record_metric(split, SCORE_METRIC, 100.0 / (1.0 + loss));
        Ok(())
    }
}
