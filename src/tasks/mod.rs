//! Built-in demo objectives
//!
//! Small optimization problems that exercise the full control plane
//! (state blobs, per-step training, split evaluation, every optimizer
//! hyperparameter) without dragging in a tensor framework. Real model
//! training plugs in through the same [`Trainer`]/[`Evaluator`] seams.

mod ridge;
mod sphere;

pub use ridge::RidgeTask;
pub use sphere::SphereTask;

use crate::error::{PbtError, Result};
use crate::fitness::{Evaluator, Trainer};
use crate::hyperparameter::{Hyperparameter, Hyperparameters, ParamGroup};
use std::str::FromStr;
use std::sync::Arc;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskKind {
    /// Quadratic bowl minimized by SGD with momentum.
    Sphere,
    /// Mini-batch linear regression on a deterministic synthetic dataset.
    Ridge,
}

impl FromStr for TaskKind {
    type Err = PbtError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_lowercase().as_str() {
            "sphere" => Ok(TaskKind::Sphere),
            "ridge" => Ok(TaskKind::Ridge),
            other => Err(PbtError::Configuration(format!(
                "unknown task '{other}', expected 'sphere' or 'ridge'"
            ))),
        }
    }
}

impl std::fmt::Display for TaskKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TaskKind::Sphere => write!(f, "sphere"),
            TaskKind::Ridge => write!(f, "ridge"),
        }
    }
}

/// The wired-up objective: one object serves as trainer, evaluator and
/// tester, plus the hyperparameter prototype the population searches over.
pub struct TaskSetup {
    pub trainer: Arc<dyn Trainer>,
    pub evaluator: Arc<dyn Evaluator>,
    pub prototype: Hyperparameters,
}

/// Build a task. `batch_size` only matters for objectives with a dataset.
pub fn build(kind: TaskKind, batch_size: usize) -> Result<TaskSetup> {
    match kind {
        TaskKind::Sphere => {
            let task = Arc::new(SphereTask::new(8));
            Ok(TaskSetup {
                trainer: task.clone(),
                evaluator: task,
                prototype: optimizer_prototype()?,
            })
        }
        TaskKind::Ridge => {
            let task = Arc::new(RidgeTask::new(512, 16, batch_size)?);
            Ok(TaskSetup {
                trainer: task.clone(),
                evaluator: task,
                prototype: optimizer_prototype()?,
            })
        }
    }
}

/// The SGD search space both demo tasks share.
fn optimizer_prototype() -> Result<Hyperparameters> {
    Hyperparameters::new(
        ParamGroup::new(),
        ParamGroup::new(),
        ParamGroup::new()
            .with("lr", Hyperparameter::continuous(1e-4, 0.5)?)
            .with("momentum", Hyperparameter::continuous(0.1, 1.0)?)
            .with("weight_decay", Hyperparameter::continuous(0.0, 1e-2)?)
            .with("nesterov", Hyperparameter::discrete(vec![false, true])?),
    )
}

/// Shared SGD hyperparameter read-out.
pub(crate) struct SgdParams {
    pub lr: f64,
    pub momentum: f64,
    pub weight_decay: f64,
    pub nesterov: bool,
}

impl SgdParams {
    pub fn read(hyperparameters: &Hyperparameters) -> Result<Self> {
        let number = |key: &str| -> Result<f64> {
            hyperparameters.get(key)?.value().as_f64().ok_or_else(|| {
                PbtError::Configuration(format!("hyperparameter '{key}' is not numeric"))
            })
        };
        Ok(Self {
            lr: number("optimizer/lr")?,
            momentum: number("optimizer/momentum")?,
            weight_decay: number("optimizer/weight_decay")?,
            nesterov: hyperparameters
                .get("optimizer/nesterov")?
                .value()
                .as_bool()
                .unwrap_or(false),
        })
    }

    /// One SGD update in the torch convention: weight decay folds into
    /// the gradient, the momentum buffer accumulates it, nesterov looks
    /// one step ahead.
    pub fn step(
        &self,
        weights: &mut ndarray::Array1<f64>,
        buffer: &mut ndarray::Array1<f64>,
        gradient: &ndarray::Array1<f64>,
    ) {
        let gradient = gradient + &(&*weights * self.weight_decay);
        *buffer = &*buffer * self.momentum + &gradient;
        let direction = if self.nesterov {
            &gradient + &(&*buffer * self.momentum)
        } else {
            buffer.clone()
        };
        *weights -= &(&direction * self.lr);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn task_names_parse() {
        assert_eq!("sphere".parse::<TaskKind>().unwrap(), TaskKind::Sphere);
        assert_eq!("RIDGE".parse::<TaskKind>().unwrap(), TaskKind::Ridge);
        assert!("mnist".parse::<TaskKind>().is_err());
    }

    #[test]
    fn prototype_has_the_sgd_search_space() {
        let prototype = optimizer_prototype().unwrap();
        let keys: Vec<String> = prototype.keys().collect();
        assert_eq!(
            keys,
            vec![
                "optimizer/lr",
                "optimizer/momentum",
                "optimizer/weight_decay",
                "optimizer/nesterov"
            ]
        );
    }
}
