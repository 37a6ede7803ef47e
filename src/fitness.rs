//! Fitness evaluation: the train→evaluate cycle run on workers
//!
//! The control plane never touches gradients. It consumes a [`Trainer`]
//! that advances a member by a fixed number of steps and an [`Evaluator`]
//! that scores it on a split; both are pure with respect to everything
//! but the checkpoint they are handed. [`FitnessFunction`] stitches the
//! two together with the database's state blobs and is what the pool
//! executes per member per generation.

use crate::database::CheckpointDatabase;
use crate::error::{PbtError, Result};
use crate::member::{Checkpoint, Split};
use crate::monitoring::metrics;
use crate::pool::{TrialFn, WorkerContext};
use std::sync::Arc;
use std::time::Instant;

/// Advances a checkpoint by exactly `step_size` optimization steps,
/// updating its state blob, `steps`, `epochs` and `loss['train']`.
pub trait Trainer: Send + Sync {
    fn train(&self, checkpoint: &mut Checkpoint, step_size: usize, context: &mut WorkerContext)
        -> Result<()>;
}

/// Scores a checkpoint on a dataset split, writing `loss[split]`.
/// The same implementation serves as the evaluator (`Split::Eval`) and
/// the tester (`Split::Test`).
pub trait Evaluator: Send + Sync {
    fn evaluate(
        &self,
        checkpoint: &mut Checkpoint,
        split: Split,
        context: &mut WorkerContext,
    ) -> Result<()>;
}

/// One unit of pool work: which member, and how far to advance it.
pub struct FitnessJob {
    pub checkpoint: Checkpoint,
    pub step_size: usize,
}

/// The trainer/evaluator pair bound to the database that holds the
/// members' persisted state.
pub struct FitnessFunction {
    trainer: Arc<dyn Trainer>,
    evaluator: Arc<dyn Evaluator>,
    database: Arc<CheckpointDatabase>,
}

impl FitnessFunction {
    pub fn new(
        trainer: Arc<dyn Trainer>,
        evaluator: Arc<dyn Evaluator>,
        database: Arc<CheckpointDatabase>,
    ) -> Self {
        Self {
            trainer,
            evaluator,
            database,
        }
    }

    /// Load state (if not already in memory), train for `step_size` steps,
    /// evaluate on the eval split, return the updated checkpoint with its
    /// state still attached for persistence.
    ///
    /// A missing blob is silent only for a member that has never trained
    /// (`steps < step_size`); otherwise it is warned about and training
    /// continues from fresh state, so a corrupted member can be revived by
    /// the next exploit instead of sinking the generation.
    pub fn train_and_evaluate(
        &self,
        context: &mut WorkerContext,
        job: FitnessJob,
    ) -> Result<Checkpoint> {
        let FitnessJob {
            mut checkpoint,
            step_size,
        } = job;
        let started = Instant::now();

        if checkpoint.state.is_none() {
            match self.database.load_state(checkpoint.id, checkpoint.steps) {
                Ok(blob) => checkpoint.state = Some(blob),
                Err(PbtError::MissingState { id, step }) => {
                    if checkpoint.steps >= step_size {
                        tracing::warn!(
                            id,
                            step,
                            "training member with missing state files"
                        );
                    }
                }
                Err(error) => return Err(error),
            }
        }

        tracing::debug!(id = checkpoint.id, steps = checkpoint.steps, "training");
        self.trainer.train(&mut checkpoint, step_size, context)?;
        tracing::debug!(id = checkpoint.id, steps = checkpoint.steps, "evaluating");
        self.evaluator.evaluate(&mut checkpoint, Split::Eval, context)?;
        metrics::TRIAL_DURATION.observe(started.elapsed().as_secs_f64());
        Ok(checkpoint)
    }

    /// Package `train_and_evaluate` as a pool trial function.
    pub fn into_trial_fn(self: Arc<Self>) -> TrialFn<FitnessJob, Checkpoint> {
        Arc::new(move |context, job| self.train_and_evaluate(context, job))
    }
}
