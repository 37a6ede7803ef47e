//! Post-run analysis of the checkpoint database
//!
//! After the controller terminates: score the top members on the held-out
//! test split, write the result files under `<database>/results/` and
//! render the score-over-steps plot.

use crate::database::{CheckpointDatabase, RESULTS_DIR};
use crate::error::Result;
use crate::fitness::Evaluator;
use crate::member::{Checkpoint, Split};
use crate::pool::{Device, WorkerContext};
use ordered_float::OrderedFloat;
use plotters::prelude::*;
use rand::rngs::StdRng;
use rand::SeedableRng;
use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::Arc;

#[derive(Debug, Serialize)]
struct MemberStatistics {
    id: usize,
    generations: usize,
    best_eval_loss: Option<f64>,
    final_eval_loss: Option<f64>,
    final_steps: usize,
    exploited_from: Vec<usize>,
}

pub struct Analyzer {
    database: Arc<CheckpointDatabase>,
}

impl Analyzer {
    pub fn new(database: Arc<CheckpointDatabase>) -> Self {
        Self { database }
    }

    /// The latest checkpoint of every member, by id.
    fn latest_members(&self) -> Result<Vec<Checkpoint>> {
        self.database
            .member_ids()
            .into_iter()
            .map(|id| self.database.latest(id))
            .collect()
    }

    /// Score the `limit` best members (by eval loss) on the test split and
    /// persist the outcome. Returns the tested checkpoints, best first.
    pub fn test(
        &self,
        tester: &dyn Evaluator,
        device: Device,
        limit: usize,
    ) -> Result<Vec<Checkpoint>> {
        let mut members = self.latest_members()?;
        members.sort_by_key(|m| (OrderedFloat(m.eval_loss().unwrap_or(f64::INFINITY)), m.id));
        members.truncate(limit);

        let mut context = WorkerContext {
            uid: 0,
            device,
            rng: StdRng::seed_from_u64(0),
        };
        for member in &mut members {
            if member.state.is_none() {
                member.state = self.database.load_state(member.id, member.steps).ok();
            }
            tester.evaluate(member, Split::Test, &mut context)?;
            tracing::info!(
                id = member.id,
                test_loss = member.test_loss(),
                test_score = member.test_score(),
                "tested"
            );
            member.unload_state();
        }
        members.sort_by_key(|m| (OrderedFloat(m.test_loss().unwrap_or(f64::INFINITY)), m.id));

        self.database.create_folder(RESULTS_DIR)?;
        if let Some(best) = members.first() {
            self.database.create_file(
                format!("{RESULTS_DIR}/best_member.json"),
                &serde_json::to_vec_pretty(best)?,
            )?;
            let summary = format!(
                "{}\nmember {} performed best at epoch {} / step {} with a test score of {:.4}\n",
                chrono::Local::now().format("%Y-%m-%d %H:%M:%S"),
                best.id,
                best.epochs,
                best.steps,
                best.test_score().unwrap_or(f64::NAN)
            );
            self.database
                .create_file(format!("{RESULTS_DIR}/results.txt"), summary.as_bytes())?;
        }
        self.database.create_file(
            format!("{RESULTS_DIR}/top_members.json"),
            &serde_json::to_vec_pretty(&members)?,
        )?;
        Ok(members)
    }

    /// Per-member aggregates over the whole run, written as JSON.
    pub fn statistics(&self) -> Result<()> {
        let mut per_member: BTreeMap<usize, MemberStatistics> = BTreeMap::new();
        for entry in self.database.entries() {
            let checkpoint = entry?;
            let stats = per_member
                .entry(checkpoint.id)
                .or_insert_with(|| MemberStatistics {
                    id: checkpoint.id,
                    generations: 0,
                    best_eval_loss: None,
                    final_eval_loss: None,
                    final_steps: 0,
                    exploited_from: Vec::new(),
                });
            stats.generations = stats.generations.max(checkpoint.generation);
            if let Some(loss) = checkpoint.eval_loss() {
                stats.best_eval_loss = Some(match stats.best_eval_loss {
                    Some(best) => best.min(loss),
                    None => loss,
                });
                if checkpoint.steps >= stats.final_steps {
                    stats.final_eval_loss = Some(loss);
                }
            }
            stats.final_steps = stats.final_steps.max(checkpoint.steps);
            if let Some(parent) = checkpoint.parent_id {
                if stats.exploited_from.last() != Some(&parent) {
                    stats.exploited_from.push(parent);
                }
            }
        }
        let all: Vec<&MemberStatistics> = per_member.values().collect();
        self.database.create_folder(RESULTS_DIR)?;
        self.database.create_file(
            format!("{RESULTS_DIR}/statistics.json"),
            &serde_json::to_vec_pretty(&all)?,
        )?;
        Ok(())
    }

    /// Render eval loss over steps, one line per member, to
    /// `results/plots/eval_loss.png`.
    pub fn create_plot_files(&self) -> Result<()> {
        let mut series: BTreeMap<usize, Vec<(f64, f64)>> = BTreeMap::new();
        for entry in self.database.entries() {
            let checkpoint = entry?;
            if let Some(loss) = checkpoint.eval_loss() {
                series
                    .entry(checkpoint.id)
                    .or_default()
                    .push((checkpoint.steps as f64, loss));
            }
        }
        if series.is_empty() {
            tracing::warn!("no scored checkpoints, skipping plots");
            return Ok(());
        }
        for points in series.values_mut() {
            points.sort_by(|a, b| a.0.total_cmp(&b.0));
        }

        let max_step = series
            .values()
            .flat_map(|points| points.iter().map(|(step, _)| *step))
            .fold(1.0_f64, f64::max);
        let max_loss = series
            .values()
            .flat_map(|points| points.iter().map(|(_, loss)| *loss))
            .fold(f64::MIN, f64::max);

        let plot_dir = self.database.create_folder(format!("{RESULTS_DIR}/plots"))?;
        let path = plot_dir.join("eval_loss.png");
        let root = BitMapBackend::new(&path, (1024, 640)).into_drawing_area();
        root.fill(&WHITE)
            .map_err(|e| crate::error::PbtError::Plot(e.to_string()))?;

        // text-free rendering so the plot never depends on system fonts
        let mut chart = ChartBuilder::on(&root)
            .margin(16)
            .build_cartesian_2d(0.0..max_step * 1.05, 0.0..max_loss * 1.05)
            .map_err(|e| crate::error::PbtError::Plot(e.to_string()))?;
        chart
            .configure_mesh()
            .disable_x_axis()
            .disable_y_axis()
            .draw()
            .map_err(|e| crate::error::PbtError::Plot(e.to_string()))?;

        for (id, points) in &series {
            let color = Palette99::pick(*id).to_rgba();
            chart
                .draw_series(LineSeries::new(points.iter().copied(), &color))
                .map_err(|e| crate::error::PbtError::Plot(e.to_string()))?;
        }
        root.present()
            .map_err(|e| crate::error::PbtError::Plot(e.to_string()))?;
        tracing::info!(path = %path.display(), "plot written");
        Ok(())
    }
}
