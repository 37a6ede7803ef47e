//! Differential evolution, DE/rand/1/bin over normalized coordinates
//!
//! For every target, three distinct partners produce a mutant
//! `a + F·(b − c)`; binomial crossover with one forced component builds
//! the trial vector. Trials are trained and evaluated fresh through the
//! fitness callback, starting from the weights the target held before
//! this generation's step, and replace their target only when their
//! evaluation loss is at least as good.

use super::{sort_by_id, EvaluateFn, Population};
use crate::constraint::Constraint;
use crate::error::{PbtError, Result};
use crate::hyperparameter::{MAX_NORM, MIN_NORM};
use rand::rngs::StdRng;
use rand::Rng;
use std::collections::HashMap;

#[derive(Debug, Clone)]
pub struct DifferentialEvolution {
    /// Mutation scale `F` in `[0, 2]`.
    pub f: f64,
    /// Crossover rate `Cr` in `[0, 1]`.
    pub cr: f64,
    /// Boundary policy applied to mutant components.
    pub constraint: Constraint,
}

impl Default for DifferentialEvolution {
    fn default() -> Self {
        Self {
            f: 0.2,
            cr: 0.8,
            constraint: Constraint::Clip,
        }
    }
}

impl DifferentialEvolution {
    /// The DE/rand/1 mutant component: `a + F·(b − c)`, constrained back
    /// into the coordinate window.
    fn mutant(&self, a: f64, b: f64, c: f64) -> f64 {
        self.constraint.apply(a + self.f * (b - c), MIN_NORM, MAX_NORM)
    }

    /// Pick three distinct partner indices, all different from `target`.
    fn pick_partners(rng: &mut StdRng, n: usize, target: usize) -> [usize; 3] {
        let mut picked = [target; 3];
        for slot in 0..3 {
            loop {
                let candidate = rng.gen_range(0..n);
                if candidate != target && !picked[..slot].contains(&candidate) {
                    picked[slot] = candidate;
                    break;
                }
            }
        }
        picked
    }

    pub fn on_generation(
        &self,
        mut population: Population,
        evaluate: &mut EvaluateFn<'_>,
        step_size: usize,
        rng: &mut StdRng,
    ) -> Result<Population> {
        sort_by_id(&mut population);
        let n = population.len();
        if n < 4 {
            return Err(PbtError::Configuration(format!(
                "differential evolution needs a population of at least 4, got {n}"
            )));
        }

        let vectors: Vec<Vec<f64>> = population
            .iter()
            .map(|member| member.hyperparameters.vector())
            .collect();
        let dim = vectors[0].len();

        let mut trials = Vec::with_capacity(n);
        for i in 0..n {
            let [a, b, c] = Self::pick_partners(rng, n, i);
            let forced = rng.gen_range(0..dim);
            let mut u = vec![0.0; dim];
            for j in 0..dim {
                let mutant = self.mutant(vectors[a][j], vectors[b][j], vectors[c][j]);
                u[j] = if j == forced || rng.gen::<f64>() < self.cr {
                    mutant
                } else {
                    vectors[i][j]
                };
            }

            let target = &population[i];
            let mut trial = target.clone();
            trial.hyperparameters.set_vector(&u)?;
            // roll the trial back to the checkpoint the target held before
            // this generation's step: same step counter, state fetched from
            // the database, losses measured from scratch
            trial.steps = target.steps.saturating_sub(step_size);
            trial.state = None;
            trial.loss.clear();
            trials.push(trial);
        }

        let evaluated = evaluate(trials)?;
        let mut trials_by_id: HashMap<usize, _> =
            evaluated.into_iter().map(|c| (c.id, c)).collect();

        let next = population
            .into_iter()
            .map(|target| match trials_by_id.remove(&target.id) {
                Some(trial) => {
                    let trial_loss = trial.eval_loss().unwrap_or(f64::INFINITY);
                    let target_loss = target.eval_loss().unwrap_or(f64::INFINITY);
                    if trial_loss <= target_loss {
                        tracing::info!(
                            member = target.id,
                            trial_loss,
                            target_loss,
                            "trial accepted"
                        );
                        trial
                    } else {
                        target
                    }
                }
                // the trial was lost to a worker failure; keep the target
                None => target,
            })
            .collect();
        Ok(next)
    }
}
