//! Configuration management
//!
//! TOML-file configuration with environment-variable overrides
//! (`PBT_<SECTION>_<KEY>`). The CLI maps its flags onto the same struct,
//! so a config file, the environment and the command line all feed one
//! validated [`Config`].

use crate::constraint::Constraint;
use crate::controller::EndCriteria;
use crate::error::{PbtError, Result};
use crate::evolve::{DifferentialEvolution, Evolver, ExploitAndExplore, ParticleSwarm};
use crate::pool::Device;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Complete run configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub controller: ControllerConfig,
    #[serde(default)]
    pub database: DatabaseConfig,
    #[serde(default)]
    pub pool: PoolConfig,
    #[serde(default)]
    pub evolver: EvolverConfig,
    #[serde(default)]
    pub task: TaskConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ControllerConfig {
    #[serde(default = "default_population_size")]
    pub population_size: usize,
    #[serde(default = "default_step_size")]
    pub step_size: usize,
    #[serde(default)]
    pub max_steps: Option<usize>,
    #[serde(default = "default_max_generations")]
    pub max_generations: Option<usize>,
    #[serde(default)]
    pub score_target: Option<f64>,
    #[serde(default)]
    pub seed: u64,
    /// Shuffle members before each fan-out to spread slow cases.
    #[serde(default = "default_true")]
    pub shuffle: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    #[serde(default = "default_database_path")]
    pub path: PathBuf,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PoolConfig {
    #[serde(default = "default_n_jobs")]
    pub n_jobs: usize,
    #[serde(default = "default_devices")]
    pub devices: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskConfig {
    #[serde(default = "default_task")]
    pub name: String,
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
}

/// Which evolver drives the run, with its parameters.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "algorithm", rename_all = "snake_case")]
pub enum EvolverConfig {
    ExploitExplore {
        #[serde(default = "default_exploit_factor")]
        exploit_factor: f64,
        #[serde(default = "default_explore_factors")]
        explore_factors: (f64, f64),
        #[serde(default)]
        random_walk: bool,
    },
    DifferentialEvolution {
        #[serde(default = "default_de_f")]
        f: f64,
        #[serde(default = "default_de_cr")]
        cr: f64,
        #[serde(default)]
        constraint: Constraint,
    },
    ParticleSwarm {
        #[serde(default = "default_pso_w")]
        w: f64,
        #[serde(default = "default_pso_c")]
        c1: f64,
        #[serde(default = "default_pso_c")]
        c2: f64,
    },
}

fn default_population_size() -> usize {
    5
}
fn default_step_size() -> usize {
    100
}
fn default_max_generations() -> Option<usize> {
    Some(20)
}
fn default_database_path() -> PathBuf {
    PathBuf::from("checkpoints")
}
fn default_n_jobs() -> usize {
    num_cpus::get().max(1)
}
fn default_devices() -> Vec<String> {
    vec!["cpu".to_string()]
}
fn default_task() -> String {
    "sphere".to_string()
}
fn default_batch_size() -> usize {
    32
}
fn default_exploit_factor() -> f64 {
    0.2
}
fn default_explore_factors() -> (f64, f64) {
    (0.8, 1.2)
}
fn default_de_f() -> f64 {
    0.2
}
fn default_de_cr() -> f64 {
    0.8
}
fn default_pso_w() -> f64 {
    0.7298
}
fn default_pso_c() -> f64 {
    1.49445
}
fn default_true() -> bool {
    true
}

impl Default for ControllerConfig {
    fn default() -> Self {
        Self {
            population_size: default_population_size(),
            step_size: default_step_size(),
            max_steps: None,
            max_generations: default_max_generations(),
            score_target: None,
            seed: 0,
            shuffle: default_true(),
        }
    }
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            path: default_database_path(),
        }
    }
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            n_jobs: default_n_jobs(),
            devices: default_devices(),
        }
    }
}

impl Default for TaskConfig {
    fn default() -> Self {
        Self {
            name: default_task(),
            batch_size: default_batch_size(),
        }
    }
}

impl Default for EvolverConfig {
    fn default() -> Self {
        EvolverConfig::ExploitExplore {
            exploit_factor: default_exploit_factor(),
            explore_factors: default_explore_factors(),
            random_walk: false,
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            controller: ControllerConfig::default(),
            database: DatabaseConfig::default(),
            pool: PoolConfig::default(),
            evolver: EvolverConfig::default(),
            task: TaskConfig::default(),
        }
    }
}

impl EvolverConfig {
    /// Parse a bare evolver name into its default-parameterized config.
    pub fn from_name(name: &str) -> Result<Self> {
        match name.to_lowercase().as_str() {
            "exploit_explore" | "pbt" => Ok(EvolverConfig::ExploitExplore {
                exploit_factor: default_exploit_factor(),
                explore_factors: default_explore_factors(),
                random_walk: false,
            }),
            "differential_evolution" | "de" => Ok(EvolverConfig::DifferentialEvolution {
                f: default_de_f(),
                cr: default_de_cr(),
                constraint: Constraint::Clip,
            }),
            "particle_swarm" | "pso" => Ok(EvolverConfig::ParticleSwarm {
                w: default_pso_w(),
                c1: default_pso_c(),
                c2: default_pso_c(),
            }),
            other => Err(PbtError::Configuration(format!(
                "unknown evolver '{other}'"
            ))),
        }
    }

    /// Instantiate the configured evolver.
    pub fn build(&self) -> Evolver {
        match self.clone() {
            EvolverConfig::ExploitExplore {
                exploit_factor,
                explore_factors,
                random_walk,
            } => Evolver::ExploitExplore(ExploitAndExplore {
                exploit_factor,
                explore_factors,
                random_walk,
            }),
            EvolverConfig::DifferentialEvolution { f, cr, constraint } => {
                Evolver::Differential(DifferentialEvolution { f, cr, constraint })
            }
            EvolverConfig::ParticleSwarm { w, c1, c2 } => {
                Evolver::ParticleSwarm(ParticleSwarm::new(w, c1, c2))
            }
        }
    }
}

impl Config {
    /// Load configuration from a TOML file.
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let contents = std::fs::read_to_string(path.as_ref())?;
        toml::from_str(&contents)
            .map_err(|e| PbtError::Configuration(format!("failed to parse config file: {e}")))
    }

    /// Load from a TOML file with environment overrides applied on top.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let mut config = Self::from_file(path)?;
        config.apply_env_overrides();
        Ok(config)
    }

    /// Environment variables take precedence over config file values.
    pub fn apply_env_overrides(&mut self) {
        if let Ok(size) = std::env::var("PBT_POPULATION_SIZE") {
            if let Ok(size) = size.parse() {
                self.controller.population_size = size;
            }
        }
        if let Ok(step) = std::env::var("PBT_STEP_SIZE") {
            if let Ok(step) = step.parse() {
                self.controller.step_size = step;
            }
        }
        if let Ok(seed) = std::env::var("PBT_SEED") {
            if let Ok(seed) = seed.parse() {
                self.controller.seed = seed;
            }
        }
        if let Ok(path) = std::env::var("PBT_DATABASE_PATH") {
            self.database.path = PathBuf::from(path);
        }
        if let Ok(jobs) = std::env::var("PBT_N_JOBS") {
            if let Ok(jobs) = jobs.parse() {
                self.pool.n_jobs = jobs;
            }
        }
        if let Ok(devices) = std::env::var("PBT_DEVICES") {
            self.pool.devices = devices.split(',').map(|d| d.trim().to_string()).collect();
        }
        if let Ok(task) = std::env::var("PBT_TASK") {
            self.task.name = task;
        }
    }

    /// Parsed device list.
    pub fn devices(&self) -> Result<Vec<Device>> {
        self.pool.devices.iter().map(|d| d.parse()).collect()
    }

    pub fn end_criteria(&self) -> EndCriteria {
        EndCriteria {
            max_steps: self.controller.max_steps,
            max_generations: self.controller.max_generations,
            score_target: self.controller.score_target,
        }
    }

    /// Reject impossible configurations before anything spins up.
    pub fn validate(&self) -> Result<()> {
        if self.controller.population_size == 0 {
            return Err(PbtError::Configuration(
                "population_size must be at least 1".into(),
            ));
        }
        if self.controller.step_size == 0 {
            return Err(PbtError::Configuration("step_size must be at least 1".into()));
        }
        self.end_criteria().validate()?;
        let devices = self.devices()?;
        if self.pool.n_jobs < devices.len() {
            return Err(PbtError::Configuration(format!(
                "n_jobs must cover every device, got {} jobs for {} devices",
                self.pool.n_jobs,
                devices.len()
            )));
        }
        match &self.evolver {
            EvolverConfig::ExploitExplore {
                exploit_factor,
                explore_factors,
                ..
            } => {
                if !(0.0 < *exploit_factor && *exploit_factor < 1.0) {
                    return Err(PbtError::Configuration(format!(
                        "exploit_factor must lie in (0, 1), got {exploit_factor}"
                    )));
                }
                if explore_factors.0 > explore_factors.1 {
                    return Err(PbtError::Configuration(format!(
                        "explore_factors must be ordered (low, high), got {explore_factors:?}"
                    )));
                }
            }
            EvolverConfig::DifferentialEvolution { f, cr, .. } => {
                if !(0.0..=2.0).contains(f) {
                    return Err(PbtError::Configuration(format!(
                        "F must lie in [0, 2], got {f}"
                    )));
                }
                if !(0.0..=1.0).contains(cr) {
                    return Err(PbtError::Configuration(format!(
                        "Cr must lie in [0, 1], got {cr}"
                    )));
                }
                if self.controller.population_size < 4 {
                    return Err(PbtError::Configuration(
                        "differential evolution needs a population of at least 4".into(),
                    ));
                }
            }
            EvolverConfig::ParticleSwarm { w, c1, c2 } => {
                if *w < 0.0 || *c1 < 0.0 || *c2 < 0.0 {
                    return Err(PbtError::Configuration(
                        "particle swarm coefficients must be non-negative".into(),
                    ));
                }
            }
        }
        Ok(())
    }
}
