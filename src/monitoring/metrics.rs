//! Prometheus metrics for the PBT control plane
//!
//! The controller updates these every generation; `export_metrics`
//! renders the default registry in the text exposition format for
//! whatever sink wants to scrape or archive it.

use lazy_static::lazy_static;
use prometheus::{
    register_counter, register_counter_vec, register_gauge, register_histogram, Counter,
    CounterVec, Gauge, Histogram, TextEncoder,
};

lazy_static! {
    /// Generations completed (dispatch → persist cycles).
    pub static ref GENERATIONS_TOTAL: Counter = register_counter!(
        "pbt_generations_total",
        "Completed evolver generations"
    )
    .unwrap();

    /// Trials run through the worker pool, by outcome.
    pub static ref TRIALS_TOTAL: CounterVec = register_counter_vec!(
        "pbt_trials_total",
        "Fitness trials by outcome",
        &["outcome"] // ok / failed
    )
    .unwrap();

    /// Worker failures observed by the pool (each one is respawned).
    pub static ref WORKER_FAILURES_TOTAL: Counter = register_counter!(
        "pbt_worker_failures_total",
        "Worker crashes caught and respawned"
    )
    .unwrap();

    /// Current population size (shrinks transiently on trial loss).
    pub static ref POPULATION_SIZE: Gauge = register_gauge!(
        "pbt_population_size",
        "Members in the live population"
    )
    .unwrap();

    /// Best evaluation loss across the population, lower is better.
    pub static ref BEST_EVAL_LOSS: Gauge = register_gauge!(
        "pbt_best_eval_loss",
        "Best member evaluation loss"
    )
    .unwrap();

    /// Best task-defined evaluation score, higher is better.
    pub static ref BEST_EVAL_SCORE: Gauge = register_gauge!(
        "pbt_best_eval_score",
        "Best member evaluation score"
    )
    .unwrap();

    /// Wall-clock duration of one train+evaluate trial.
    pub static ref TRIAL_DURATION: Histogram = register_histogram!(
        "pbt_trial_duration_seconds",
        "Train and evaluate duration per trial",
        vec![0.01, 0.05, 0.1, 0.5, 1.0, 5.0, 15.0, 60.0, 300.0]
    )
    .unwrap();
}

/// Render the default registry in the Prometheus text format.
pub fn export_metrics() -> String {
    let encoder = TextEncoder::new();
    let families = prometheus::gather();
    encoder.encode_to_string(&families).unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn metrics_register_and_export() {
        GENERATIONS_TOTAL.inc();
        TRIALS_TOTAL.with_label_values(&["ok"]).inc();
        BEST_EVAL_LOSS.set(0.25);
        let text = export_metrics();
        assert!(text.contains("pbt_generations_total"));
        assert!(text.contains("pbt_best_eval_loss"));
    }
}
