//! Exploit-and-explore, the original PBT update rule
//!
//! Rank the population by evaluation loss; every member in the bottom
//! truncation fraction takes over the weights, optimizer state and
//! hyperparameters of a uniformly sampled top-fraction member, then
//! perturbs each hyperparameter's normalized coordinate. Members in the
//! middle band continue untouched.

use super::{rank_by_eval_loss, sort_by_id, Population};
use crate::error::Result;
use rand::rngs::StdRng;
use rand::Rng;

#[derive(Debug, Clone)]
pub struct ExploitAndExplore {
    /// Truncation ratio in `(0, 1)`: the size of both the donor band and
    /// the replaced band, as a fraction of the population.
    pub exploit_factor: f64,
    /// Multiplicative perturbation window applied after an exploit.
    pub explore_factors: (f64, f64),
    /// When set, perturb additively around the current coordinate instead
    /// of multiplicatively (the factor window recentred on zero).
    pub random_walk: bool,
}

impl Default for ExploitAndExplore {
    fn default() -> Self {
        Self {
            exploit_factor: 0.2,
            explore_factors: (0.8, 1.2),
            random_walk: false,
        }
    }
}

impl ExploitAndExplore {
    pub fn on_generation(
        &self,
        mut population: Population,
        rng: &mut StdRng,
    ) -> Result<Population> {
        let n = population.len();
        rank_by_eval_loss(&mut population);

        // donor band and replaced band must not overlap
        let cut = ((self.exploit_factor * n as f64).floor() as usize).min(n / 2);
        if cut == 0 {
            tracing::debug!(n, factor = self.exploit_factor, "population too small to exploit");
            sort_by_id(&mut population);
            return Ok(population);
        }

        let (low, high) = self.explore_factors;
        let (rest, laggards) = population.split_at_mut(n - cut);
        for member in laggards.iter_mut() {
            let donor = &rest[rng.gen_range(0..cut)];
            tracing::info!(
                member = member.id,
                donor = donor.id,
                donor_loss = donor.eval_loss(),
                member_loss = member.eval_loss(),
                "exploiting"
            );
            member.exploit_from(donor);

            for (_, hp) in member.hyperparameters.iter_mut() {
                let factor = rng.gen_range(low..=high);
                *hp = if self.random_walk {
                    &*hp + (factor - 1.0)
                } else {
                    &*hp * factor
                };
            }
        }

        sort_by_id(&mut population);
        Ok(population)
    }
}
