//! Population members and their checkpoints
//!
//! A [`Checkpoint`] is the full per-member record the control plane moves
//! around: counters, the hyperparameter vector, the loss history and the
//! serialized model+optimizer state blob. The blob rides along in memory
//! between training and persistence; at rest it lives in the
//! [`CheckpointDatabase`](crate::database::CheckpointDatabase) next to the
//! metadata.

use crate::hyperparameter::Hyperparameters;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// Metric name every ranking decision reads; lower is better.
pub const LOSS_METRIC: &str = "loss";
/// Optional task-defined score (higher is better), used by the
/// `score_target` end criterion.
pub const SCORE_METRIC: &str = "score";

/// Dataset split a metric was measured on.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(rename_all = "lowercase")]
pub enum Split {
    Train,
    Eval,
    Test,
}

impl fmt::Display for Split {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Split::Train => write!(f, "train"),
            Split::Eval => write!(f, "eval"),
            Split::Test => write!(f, "test"),
        }
    }
}

pub type Metrics = BTreeMap<String, f64>;

/// Per-member record: identity, progress counters, hyperparameters, loss
/// history and the in-memory copy of the persisted state.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Checkpoint {
    /// Stable across the whole run.
    pub id: usize,
    /// Number of evolver cycles this member has seen.
    pub generation: usize,
    /// Optimization steps taken; monotonically non-decreasing.
    pub steps: usize,
    /// Full dataset passes, when the objective has a dataset.
    pub epochs: usize,
    /// Set when the member was exploited from a better member.
    pub parent_id: Option<usize>,
    pub hyperparameters: Hyperparameters,
    /// `split → metric → value`.
    pub loss: BTreeMap<Split, Metrics>,
    /// Serialized model+optimizer state. `None` when unloaded; the
    /// database blob is then the source of truth.
    #[serde(skip)]
    pub state: Option<Vec<u8>>,
}

impl Checkpoint {
    pub fn new(id: usize, hyperparameters: Hyperparameters) -> Self {
        Self {
            id,
            generation: 0,
            steps: 0,
            epochs: 0,
            parent_id: None,
            hyperparameters,
            loss: BTreeMap::new(),
            state: None,
        }
    }

    pub fn metric(&self, split: Split, name: &str) -> Option<f64> {
        self.loss.get(&split).and_then(|m| m.get(name)).copied()
    }

    pub fn record_metric(&mut self, split: Split, name: impl Into<String>, value: f64) {
        self.loss.entry(split).or_default().insert(name.into(), value);
    }

    /// Evaluation loss, the fitness every evolver ranks by.
    pub fn eval_loss(&self) -> Option<f64> {
        self.metric(Split::Eval, LOSS_METRIC)
    }

    pub fn train_loss(&self) -> Option<f64> {
        self.metric(Split::Train, LOSS_METRIC)
    }

    pub fn test_loss(&self) -> Option<f64> {
        self.metric(Split::Test, LOSS_METRIC)
    }

    /// Task-defined score on the evaluation split, higher is better.
    pub fn eval_score(&self) -> Option<f64> {
        self.metric(Split::Eval, SCORE_METRIC)
    }

    pub fn test_score(&self) -> Option<f64> {
        self.metric(Split::Test, SCORE_METRIC)
    }

    pub fn has_state(&self) -> bool {
        self.state.is_some()
    }

    /// Drop the in-memory state copy; the persisted blob remains.
    pub fn unload_state(&mut self) {
        self.state = None;
    }

    /// Take over another member's weights, optimizer state and
    /// hyperparameters, recording the lineage.
    pub fn exploit_from(&mut self, parent: &Checkpoint) {
        self.state = parent.state.clone();
        self.hyperparameters = parent.hyperparameters.clone();
        self.parent_id = Some(parent.id);
    }
}

impl fmt::Display for Checkpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "member {} (generation {}, step {}, epoch {})",
            self.id, self.generation, self.steps, self.epochs
        )
    }
}
