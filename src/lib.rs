// Core modules
pub mod config;
pub mod constraint;
pub mod error;
pub mod hyperparameter;
pub mod member;

// Persistence
pub mod database;

// Execution
pub mod controller;
pub mod fitness;
pub mod pool;

// Evolution strategies
pub mod evolve;

// Analysis & observability
pub mod analyze;
pub mod monitoring;

// Built-in demo objectives
pub mod tasks;

pub use analyze::Analyzer;
pub use config::{Config, EvolverConfig};
pub use constraint::{clip, reflect, translate, Constraint};
pub use controller::{Controller, ControllerState, EndCriteria, Termination};
pub use database::CheckpointDatabase;
pub use error::{PbtError, Result};
pub use evolve::{DifferentialEvolution, Evolver, ExploitAndExplore, ParticleSwarm, Population};
pub use fitness::{Evaluator, FitnessFunction, FitnessJob, Trainer};
pub use hyperparameter::{Hyperparameter, Hyperparameters, ParamGroup, ParamValue, SearchSpace};
pub use member::{Checkpoint, Split};
pub use pool::{Device, WorkerContext, WorkerPool};
