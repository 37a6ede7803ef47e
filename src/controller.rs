//! Controller: the generation loop
//!
//! Drives the whole run: spawn the initial population, fan each
//! generation out over the worker pool, hand the scored snapshot to the
//! evolver, persist every updated checkpoint, check the end criteria.
//! Persistence happens strictly before the next dispatch, so every
//! result of generation `g` is on disk before any trial of `g+1` runs.
//!
//! Worker failures shrink the generation: a member whose trial was lost
//! keeps its previous checkpoint and rejoins the next dispatch. Only a
//! generation in which every worker failed aborts the run.

use crate::database::CheckpointDatabase;
use crate::error::{PbtError, Result};
use crate::evolve::{Evolver, Population};
use crate::fitness::{FitnessFunction, FitnessJob};
use crate::hyperparameter::Hyperparameters;
use crate::member::Checkpoint;
use crate::monitoring::metrics;
use crate::pool::WorkerPool;
use ordered_float::OrderedFloat;
use rand::rngs::StdRng;
use rand::SeedableRng;
use std::sync::Arc;

/// Where the controller is inside one generation cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ControllerState {
    Idle,
    Dispatched,
    Collecting,
    Evolving,
    Persisted,
    Terminated,
}

/// Why the run ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Termination {
    MaxSteps,
    MaxGenerations,
    ScoreTarget,
}

/// Any satisfied criterion terminates the run.
#[derive(Debug, Clone, Copy, Default)]
pub struct EndCriteria {
    pub max_steps: Option<usize>,
    pub max_generations: Option<usize>,
    /// Against the task-defined eval score, higher is better.
    pub score_target: Option<f64>,
}

impl EndCriteria {
    pub fn validate(&self) -> Result<()> {
        if self.max_steps.is_none() && self.max_generations.is_none() && self.score_target.is_none()
        {
            return Err(PbtError::Configuration(
                "at least one end criterion is required".into(),
            ));
        }
        Ok(())
    }
}

pub struct Controller {
    population: Population,
    evolver: Evolver,
    pool: WorkerPool<FitnessJob, Checkpoint>,
    fitness: Arc<FitnessFunction>,
    database: Arc<CheckpointDatabase>,
    step_size: usize,
    end_criteria: EndCriteria,
    shuffle: bool,
    state: ControllerState,
    generation: usize,
    rng: StdRng,
}

impl Controller {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        population_size: usize,
        prototype: Hyperparameters,
        mut evolver: Evolver,
        pool: WorkerPool<FitnessJob, Checkpoint>,
        fitness: Arc<FitnessFunction>,
        database: Arc<CheckpointDatabase>,
        step_size: usize,
        end_criteria: EndCriteria,
        shuffle: bool,
        seed: u64,
    ) -> Result<Self> {
        if population_size == 0 {
            return Err(PbtError::Configuration(
                "population_size must be at least 1".into(),
            ));
        }
        if step_size == 0 {
            return Err(PbtError::Configuration("step_size must be at least 1".into()));
        }
        end_criteria.validate()?;

        let mut rng = StdRng::seed_from_u64(seed);
        let population = evolver.initialize(population_size, &prototype, &mut rng);
        tracing::info!(
            population_size,
            evolver = evolver.name(),
            step_size,
            seed,
            "population initialized"
        );
        Ok(Self {
            population,
            evolver,
            pool,
            fitness,
            database,
            step_size,
            end_criteria,
            shuffle,
            state: ControllerState::Idle,
            generation: 0,
            rng,
        })
    }

    pub fn state(&self) -> ControllerState {
        self.state
    }

    pub fn generation(&self) -> usize {
        self.generation
    }

    pub fn population(&self) -> &Population {
        &self.population
    }

    /// The member with the lowest evaluation loss, if any are scored yet.
    pub fn best(&self) -> Option<&Checkpoint> {
        self.population
            .iter()
            .filter(|member| member.eval_loss().is_some())
            .min_by_key(|member| {
                (
                    OrderedFloat(member.eval_loss().unwrap_or(f64::INFINITY)),
                    member.id,
                )
            })
    }

    /// Run generations until an end criterion fires or a fatal error
    /// escapes. The pool is started and stopped inside.
    pub fn run(&mut self) -> Result<Termination> {
        self.pool.start();
        // record the freshly spawned population before any training, so
        // generation 0 trials have a step-0 entry to hang lineage off
        for member in &self.population {
            self.database.save_entry(member)?;
        }
        let outcome = self.run_inner();
        self.pool.stop();
        match &outcome {
            Ok(reason) => tracing::info!(?reason, generation = self.generation, "run ended"),
            Err(error) => tracing::error!(%error, generation = self.generation, "run aborted"),
        }
        outcome
    }

    fn run_inner(&mut self) -> Result<Termination> {
        loop {
            self.step_generation()?;
            if let Some(reason) = self.check_end_criteria() {
                self.state = ControllerState::Terminated;
                return Ok(reason);
            }
            self.state = ControllerState::Idle;
        }
    }

    /// One full cycle: dispatch, collect, evolve, persist, report.
    fn step_generation(&mut self) -> Result<()> {
        let span = tracing::info_span!("generation", number = self.generation);
        let _enter = span.enter();

        // dispatch + collect
        self.state = ControllerState::Dispatched;
        let jobs: Vec<FitnessJob> = self
            .population
            .drain(..)
            .map(|checkpoint| FitnessJob {
                checkpoint,
                step_size: self.step_size,
            })
            .collect();
        let expected = jobs.len();
        self.state = ControllerState::Collecting;
        let collected = Self::fan_out(&mut self.pool, &self.fitness, jobs, self.shuffle)?;
        if collected.len() < expected {
            tracing::warn!(
                error = %PbtError::WorkersFailed {
                    failed: expected - collected.len(),
                    total: expected,
                },
                "continuing with a shrunk generation"
            );
        }

        // evolve
        self.state = ControllerState::Evolving;
        let step_size = self.step_size;
        let shuffle = self.shuffle;
        let generation = self.generation;
        let Self {
            pool,
            fitness,
            evolver,
            rng,
            ..
        } = self;
        let mut evaluate = |candidates: Vec<Checkpoint>| -> Result<Vec<Checkpoint>> {
            let jobs = candidates
                .into_iter()
                .map(|checkpoint| FitnessJob {
                    checkpoint,
                    step_size,
                })
                .collect();
            Self::fan_out(pool, fitness, jobs, shuffle)
        };
        let mut next = evolver.on_generation(collected, &mut evaluate, generation, step_size, rng)?;

        // persist before anything of the next generation can run
        self.state = ControllerState::Persisted;
        for member in &mut next {
            member.generation += 1;
            self.database.save_entry(member)?;
            member.unload_state();
        }
        self.population = next;
        self.generation += 1;

        self.report_generation();
        Ok(())
    }

    /// Fan jobs out over the pool, collecting survivors. Failed trials are
    /// logged and skipped; a generation in which every worker failed is
    /// fatal.
    fn fan_out(
        pool: &mut WorkerPool<FitnessJob, Checkpoint>,
        fitness: &Arc<FitnessFunction>,
        jobs: Vec<FitnessJob>,
        shuffle: bool,
    ) -> Result<Vec<Checkpoint>> {
        let function = Arc::clone(fitness).into_trial_fn();
        let mut collected = Vec::with_capacity(jobs.len());
        for outcome in pool.imap(function, jobs, shuffle) {
            match outcome {
                Ok(checkpoint) => {
                    metrics::TRIALS_TOTAL.with_label_values(&["ok"]).inc();
                    collected.push(checkpoint);
                }
                Err(PbtError::AllWorkersFailed) => return Err(PbtError::AllWorkersFailed),
                Err(error) => {
                    metrics::TRIALS_TOTAL.with_label_values(&["failed"]).inc();
                    metrics::WORKER_FAILURES_TOTAL.inc();
                    tracing::warn!(%error, "trial lost");
                }
            }
        }
        if collected.is_empty() {
            return Err(PbtError::AllWorkersFailed);
        }
        Ok(collected)
    }

    fn check_end_criteria(&self) -> Option<Termination> {
        let best = self.best();
        if let Some(max_steps) = self.end_criteria.max_steps {
            if self.population.iter().any(|m| m.steps >= max_steps) {
                return Some(Termination::MaxSteps);
            }
        }
        if let (Some(target), Some(best)) = (self.end_criteria.score_target, best) {
            if best.eval_score().map(|score| score >= target).unwrap_or(false) {
                return Some(Termination::ScoreTarget);
            }
        }
        if let Some(max_generations) = self.end_criteria.max_generations {
            if self.generation >= max_generations {
                return Some(Termination::MaxGenerations);
            }
        }
        None
    }

    /// Telemetry for the generation that just persisted.
    fn report_generation(&self) {
        metrics::GENERATIONS_TOTAL.inc();
        metrics::POPULATION_SIZE.set(self.population.len() as f64);
        if let Some(best) = self.best() {
            if let Some(loss) = best.eval_loss() {
                metrics::BEST_EVAL_LOSS.set(loss);
            }
            if let Some(score) = best.eval_score() {
                metrics::BEST_EVAL_SCORE.set(score);
            }
            tracing::info!(
                generation = self.generation,
                best_member = best.id,
                best_loss = best.eval_loss(),
                best_score = best.eval_score(),
                steps = best.steps,
                "generation complete"
            );
        }
    }
}
