//! Evolvers: the strategies that turn one population into the next
//!
//! All three algorithms share a single contract: `initialize` builds the
//! starting population from a hyperparameter prototype, `on_generation`
//! takes the trained-and-evaluated population snapshot and proposes its
//! successor. Differential evolution additionally evaluates trial
//! candidates through the supplied fitness callback before committing.
//!
//! The controller holds exactly one [`Evolver`] variant for the run and
//! dispatches through it; the algorithms never reach around the contract.

pub mod differential;
pub mod exploit;
pub mod swarm;

pub use differential::DifferentialEvolution;
pub use exploit::ExploitAndExplore;
pub use swarm::ParticleSwarm;

use crate::error::Result;
use crate::hyperparameter::Hyperparameters;
use crate::member::Checkpoint;
use ordered_float::OrderedFloat;
use rand::rngs::StdRng;

pub type Population = Vec<Checkpoint>;

/// Fitness callback into the worker pool: train-and-evaluate each
/// candidate, results in completion order (callers rematch by id).
pub type EvaluateFn<'a> = dyn FnMut(Vec<Checkpoint>) -> Result<Vec<Checkpoint>> + 'a;

#[derive(Debug)]
pub enum Evolver {
    ExploitExplore(ExploitAndExplore),
    Differential(DifferentialEvolution),
    ParticleSwarm(ParticleSwarm),
}

impl Evolver {
    pub fn name(&self) -> &'static str {
        match self {
            Evolver::ExploitExplore(_) => "exploit_explore",
            Evolver::Differential(_) => "differential_evolution",
            Evolver::ParticleSwarm(_) => "particle_swarm",
        }
    }

    /// Build the initial population: one member per id with a uniformly
    /// drawn coordinate for every hyperparameter in the prototype.
    pub fn initialize(
        &mut self,
        population_size: usize,
        prototype: &Hyperparameters,
        rng: &mut StdRng,
    ) -> Population {
        let population: Population = (0..population_size)
            .map(|id| {
                let mut hyperparameters = prototype.clone();
                hyperparameters.sample_uniform(rng);
                Checkpoint::new(id, hyperparameters)
            })
            .collect();
        if let Evolver::ParticleSwarm(swarm) = self {
            swarm.initialize(&population);
        }
        population
    }

    /// Propose the next population from the current generation's snapshot.
    /// `step_size` is the number of steps each member just advanced by,
    /// which differential evolution needs to roll trials back to the
    /// pre-step checkpoint.
    pub fn on_generation(
        &mut self,
        population: Population,
        evaluate: &mut EvaluateFn<'_>,
        generation: usize,
        step_size: usize,
        rng: &mut StdRng,
    ) -> Result<Population> {
        tracing::debug!(generation, step_size, evolver = self.name(), "evolving");
        match self {
            Evolver::ExploitExplore(evolver) => evolver.on_generation(population, rng),
            Evolver::Differential(evolver) => {
                evolver.on_generation(population, evaluate, step_size, rng)
            }
            Evolver::ParticleSwarm(evolver) => evolver.on_generation(population, rng),
        }
    }
}

/// Sort ascending by evaluation loss (best first), ties stable by id.
/// Members missing an eval loss rank last.
pub(crate) fn rank_by_eval_loss(population: &mut Population) {
    population.sort_by_key(|member| {
        (
            OrderedFloat(member.eval_loss().unwrap_or(f64::INFINITY)),
            member.id,
        )
    });
}

/// Restore the canonical by-id order the controller expects.
pub(crate) fn sort_by_id(population: &mut Population) {
    population.sort_by_key(|member| member.id);
}
