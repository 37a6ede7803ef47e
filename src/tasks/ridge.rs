//! Ridge objective: mini-batch linear regression on synthetic data
//!
//! A deterministic dataset generated once per process: features drawn
//! uniform in `[-1, 1]`, targets from a hidden weight vector plus noise,
//! split train/eval/test. Training is mini-batch SGD with the shared
//! optimizer search space; `weight_decay` is the ridge penalty that
//! actually matters here. Exercises `batch_size` and the epoch counter.

use super::SgdParams;
use crate::error::Result;
use crate::fitness::{Evaluator, Trainer};
use crate::member::{Checkpoint, Split, LOSS_METRIC, SCORE_METRIC};
use crate::pool::WorkerContext;
use ndarray::{s, Array1, Array2};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};

/// Seed of the hidden dataset; fixed so every worker sees the same data.
const DATA_SEED: u64 = 42;
const NOISE: f64 = 0.1;

#[derive(Debug, Serialize, Deserialize)]
struct RidgeState {
    weights: Vec<f64>,
    buffer: Vec<f64>,
}

pub struct RidgeTask {
    features: Array2<f64>,
    targets: Array1<f64>,
    batch_size: usize,
    train_rows: usize,
    eval_rows: usize,
}

impl RidgeTask {
    pub fn new(n_samples: usize, n_features: usize, batch_size: usize) -> Result<Self> {
        let train_rows = (n_samples * 8) / 10;
        if batch_size == 0 || batch_size > train_rows {
            return Err(crate::error::PbtError::Configuration(format!(
                "batch_size must be in [1, {train_rows}], got {batch_size}"
            )));
        }
        let mut rng = StdRng::seed_from_u64(DATA_SEED);
        let hidden: Array1<f64> =
            Array1::from((0..n_features).map(|_| rng.gen_range(-2.0..2.0)).collect::<Vec<_>>());
        let features = Array2::from_shape_fn((n_samples, n_features), |_| rng.gen_range(-1.0..1.0));
        let noise: Array1<f64> =
            Array1::from((0..n_samples).map(|_| rng.gen_range(-NOISE..NOISE)).collect::<Vec<_>>());
        let targets = features.dot(&hidden) + noise;

        // 80/10/10 split, contiguous since the rows are i.i.d.
        let eval_rows = n_samples / 10;
        Ok(Self {
            features,
            targets,
            batch_size,
            train_rows,
            eval_rows,
        })
    }

    fn n_features(&self) -> usize {
        self.features.ncols()
    }

    fn split_range(&self, split: Split) -> (usize, usize) {
        match split {
            Split::Train => (0, self.train_rows),
            Split::Eval => (self.train_rows, self.train_rows + self.eval_rows),
            Split::Test => (self.train_rows + self.eval_rows, self.features.nrows()),
        }
    }

    fn mse(&self, weights: &Array1<f64>, split: Split) -> f64 {
        let (start, end) = self.split_range(split);
        let features = self.features.slice(s![start..end, ..]);
        let targets = self.targets.slice(s![start..end]);
        let residual = &features.dot(weights) - &targets;
        residual.iter().map(|r| r * r).sum::<f64>() / residual.len() as f64
    }

    fn target_variance(&self, split: Split) -> f64 {
        let (start, end) = self.split_range(split);
        let targets = self.targets.slice(s![start..end]);
        let mean = targets.iter().sum::<f64>() / targets.len() as f64;
        targets.iter().map(|t| (t - mean) * (t - mean)).sum::<f64>() / targets.len() as f64
    }

    fn load_state(&self, checkpoint: &Checkpoint) -> Result<RidgeState> {
        match &checkpoint.state {
            Some(blob) => Ok(bincode::deserialize(blob)?),
            None => Ok(RidgeState {
                weights: vec![0.0; self.n_features()],
                buffer: vec![0.0; self.n_features()],
            }),
        }
    }
}

impl Trainer for RidgeTask {
    fn train(
        &self,
        checkpoint: &mut Checkpoint,
        step_size: usize,
        _context: &mut WorkerContext,
    ) -> Result<()> {
        let state = self.load_state(checkpoint)?;
        let params = SgdParams::read(&checkpoint.hyperparameters)?;
        let mut weights = Array1::from(state.weights);
        let mut buffer = Array1::from(state.buffer);

        let n_batches = self.train_rows / self.batch_size;
        let mut running_loss = 0.0;
        for step in 0..step_size {
            // deterministic batch schedule keyed off the step counter
            let batch = (checkpoint.steps + step) % n_batches;
            let start = batch * self.batch_size;
            let end = start + self.batch_size;
            let features = self.features.slice(s![start..end, ..]);
            let targets = self.targets.slice(s![start..end]);

            let residual = &features.dot(&weights) - &targets;
            running_loss += residual.iter().map(|r| r * r).sum::<f64>() / self.batch_size as f64;
            let gradient = &features.t().dot(&residual) * (2.0 / self.batch_size as f64);
            params.step(&mut weights, &mut buffer, &gradient);
        }

        checkpoint.steps += step_size;
        checkpoint.epochs = (checkpoint.steps * self.batch_size) / self.train_rows;
        checkpoint.record_metric(Split::Train, LOSS_METRIC, running_loss / step_size as f64);
        checkpoint.state = Some(bincode::serialize(&RidgeState {
            weights: weights.to_vec(),
            buffer: buffer.to_vec(),
        })?);
        Ok(())
    }
}

impl Evaluator for RidgeTask {
    fn evaluate(
        &self,
        checkpoint: &mut Checkpoint,
        split: Split,
        _context: &mut WorkerContext,
    ) -> Result<()> {
        let state = self.load_state(checkpoint)?;
        let weights = Array1::from(state.weights);
        let mse = self.mse(&weights, split);
        // R² rescaled to a 0..100 score
        let score = (100.0 * (1.0 - mse / self.target_variance(split))).clamp(0.0, 100.0);
        checkpoint.record_metric(split, LOSS_METRIC, mse);
        checkpoint.record_metric(split, SCORE_METRIC, score);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hyperparameter::{Hyperparameter, Hyperparameters, ParamGroup};
    use crate::member::Checkpoint;
    use crate::pool::Device;

    fn context() -> WorkerContext {
        WorkerContext {
            uid: 0,
            device: Device::Cpu,
            rng: StdRng::seed_from_u64(0),
        }
    }

    fn checkpoint() -> Checkpoint {
        let params = Hyperparameters::new(
            ParamGroup::new(),
            ParamGroup::new(),
            ParamGroup::new()
                .with("lr", Hyperparameter::continuous_with(1e-4, 0.5, 0.05).unwrap())
                .with(
                    "momentum",
                    Hyperparameter::continuous_with(0.1, 1.0, 0.3).unwrap(),
                )
                .with(
                    "weight_decay",
                    Hyperparameter::continuous_with(0.0, 1e-2, 1e-4).unwrap(),
                )
                .with(
                    "nesterov",
                    Hyperparameter::discrete_with(vec![false, true], true).unwrap(),
                ),
        )
        .unwrap();
        Checkpoint::new(1, params)
    }

    #[test]
    fn dataset_is_deterministic() {
        let a = RidgeTask::new(128, 8, 16).unwrap();
        let b = RidgeTask::new(128, 8, 16).unwrap();
        assert_eq!(a.features, b.features);
        assert_eq!(a.targets, b.targets);
    }

    #[test]
    fn training_reduces_eval_mse_and_counts_epochs() {
        let task = RidgeTask::new(128, 8, 16).unwrap();
        let mut c = checkpoint();
        let mut context = context();

        task.evaluate(&mut c, Split::Eval, &mut context).unwrap();
        let before = c.eval_loss().unwrap();

        task.train(&mut c, 64, &mut context).unwrap();
        task.evaluate(&mut c, Split::Eval, &mut context).unwrap();
        let after = c.eval_loss().unwrap();

        assert!(after < before, "mse should shrink: {before} -> {after}");
        assert_eq!(c.steps, 64);
        // 64 steps of batch 16 over 102 train rows is 10 full passes
        assert_eq!(c.epochs, (64 * 16) / 102);
        assert!(c.eval_score().unwrap() > 0.0);
    }

    #[test]
    fn splits_do_not_overlap() {
        let task = RidgeTask::new(100, 4, 10).unwrap();
        let (train_start, train_end) = task.split_range(Split::Train);
        let (eval_start, eval_end) = task.split_range(Split::Eval);
        let (test_start, test_end) = task.split_range(Split::Test);
        assert_eq!(train_start, 0);
        assert_eq!(train_end, eval_start);
        assert_eq!(eval_end, test_start);
        assert_eq!(test_end, 100);
    }

    #[test]
    fn rejects_oversized_batches() {
        assert!(RidgeTask::new(32, 4, 64).is_err());
        assert!(RidgeTask::new(32, 4, 0).is_err());
    }
}
