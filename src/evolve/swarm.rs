//! Particle swarm optimization over normalized coordinates
//!
//! Each member carries a velocity vector and a personal best; a global
//! best is recomputed every generation from the personal bests. The
//! update is the standard inertia-weight formulation, with fresh uniform
//! draws per component:
//!
//! `v ← w·v + c1·r1·(p − x) + c2·r2·(g − x)`, then `x ← constrain(x + v)`.

use super::{sort_by_id, Population};
use crate::error::Result;
use rand::rngs::StdRng;
use rand::Rng;
use std::collections::HashMap;

#[derive(Debug, Clone)]
struct PersonalBest {
    loss: f64,
    coordinates: Vec<f64>,
}

#[derive(Debug)]
pub struct ParticleSwarm {
    /// Inertia weight.
    pub w: f64,
    /// Cognitive acceleration (pull toward the personal best).
    pub c1: f64,
    /// Social acceleration (pull toward the global best).
    pub c2: f64,
    velocities: HashMap<usize, Vec<f64>>,
    personal_bests: HashMap<usize, PersonalBest>,
}

impl Default for ParticleSwarm {
    fn default() -> Self {
        Self::new(0.7298, 1.49445, 1.49445)
    }
}

impl ParticleSwarm {
    /// Constriction-style defaults are in [`Default`]; any non-negative
    /// coefficients are accepted here.
    pub fn new(w: f64, c1: f64, c2: f64) -> Self {
        Self {
            w,
            c1,
            c2,
            velocities: HashMap::new(),
            personal_bests: HashMap::new(),
        }
    }

    /// Zero every member's velocity; personal bests start empty and are
    /// filled in after the first scored generation.
    pub fn initialize(&mut self, population: &Population) {
        self.velocities.clear();
        self.personal_bests.clear();
        for member in population {
            self.velocities
                .insert(member.id, vec![0.0; member.hyperparameters.len()]);
        }
    }

    fn update_personal_bests(&mut self, population: &Population) {
        for member in population {
            let Some(loss) = member.eval_loss() else {
                continue;
            };
            let coordinates = member.hyperparameters.vector();
            match self.personal_bests.get_mut(&member.id) {
                Some(best) if best.loss <= loss => {}
                Some(best) => {
                    best.loss = loss;
                    best.coordinates = coordinates;
                }
                None => {
                    self.personal_bests
                        .insert(member.id, PersonalBest { loss, coordinates });
                }
            }
        }
    }

    /// The best personal best; ties go to the lowest id.
    fn global_best(&self) -> Option<Vec<f64>> {
        let mut ids: Vec<usize> = self.personal_bests.keys().copied().collect();
        ids.sort_unstable();
        ids.into_iter()
            .map(|id| &self.personal_bests[&id])
            .min_by(|a, b| a.loss.total_cmp(&b.loss))
            .map(|best| best.coordinates.clone())
    }

    pub fn on_generation(
        &mut self,
        mut population: Population,
        rng: &mut StdRng,
    ) -> Result<Population> {
        sort_by_id(&mut population);
        self.update_personal_bests(&population);
        let Some(global) = self.global_best() else {
            tracing::warn!("no scored member yet, swarm holds still");
            return Ok(population);
        };

        for member in &mut population {
            let x = member.hyperparameters.vector();
            let dim = x.len();
            let velocity = self
                .velocities
                .entry(member.id)
                .or_insert_with(|| vec![0.0; dim]);
            let personal = self
                .personal_bests
                .get(&member.id)
                .map(|best| best.coordinates.clone())
                .unwrap_or_else(|| x.clone());

            let mut next = vec![0.0; dim];
            for j in 0..dim {
                let r1: f64 = rng.gen();
                let r2: f64 = rng.gen();
                velocity[j] = self.w * velocity[j]
                    + self.c1 * r1 * (personal[j] - x[j])
                    + self.c2 * r2 * (global[j] - x[j]);
                next[j] = x[j] + velocity[j];
            }
            member.hyperparameters.set_vector(&next)?;
        }
        Ok(population)
    }
}
