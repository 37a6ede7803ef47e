//! Full control-plane runs over the demo objectives.

use pbt::analyze::Analyzer;
use pbt::config::{Config, EvolverConfig};
use pbt::controller::{Controller, EndCriteria, Termination};
use pbt::database::CheckpointDatabase;
use pbt::fitness::FitnessFunction;
use pbt::pool::{Device, WorkerPool};
use pbt::tasks::{self, TaskKind};
use std::path::Path;
use std::sync::Arc;
use tempfile::tempdir;

fn run_once(
    root: &Path,
    evolver: EvolverConfig,
    task: TaskKind,
    population_size: usize,
    generations: usize,
) -> (Arc<CheckpointDatabase>, pbt::Population, Termination) {
    let setup = tasks::build(task, 16).unwrap();
    let database = Arc::new(CheckpointDatabase::open(root).unwrap());
    let fitness = Arc::new(FitnessFunction::new(
        setup.trainer,
        setup.evaluator,
        database.clone(),
    ));
    let pool = WorkerPool::new(&[Device::Cpu], 2, 0).unwrap();
    let mut controller = Controller::new(
        population_size,
        setup.prototype,
        evolver.build(),
        pool,
        fitness,
        database.clone(),
        10,
        EndCriteria {
            max_steps: None,
            max_generations: Some(generations),
            score_target: None,
        },
        true,
        0,
    )
    .unwrap();
    let reason = controller.run().unwrap();
    let population = controller.population().clone();
    (database, population, reason)
}

#[test]
fn exploit_explore_run_advances_every_member_in_lockstep() {
    let dir = tempdir().unwrap();
    let (database, population, reason) = run_once(
        dir.path(),
        EvolverConfig::from_name("pbt").unwrap(),
        TaskKind::Sphere,
        4,
        3,
    );
    assert_eq!(reason, Termination::MaxGenerations);
    assert_eq!(population.len(), 4);
    for member in &population {
        // three generations of ten steps each
        assert_eq!(member.steps, 30);
        assert_eq!(member.generation, 3);
        assert!(member.eval_loss().is_some());
        // persisted and unloaded
        assert!(!member.has_state());
        assert!(database.load_state(member.id, member.steps).is_ok());
    }
    // every generation of every member is on disk, plus the initial spawn
    assert_eq!(database.len(), 4 * 4);
}

#[test]
fn differential_evolution_run_completes_and_persists() {
    let dir = tempdir().unwrap();
    let (database, population, reason) = run_once(
        dir.path(),
        EvolverConfig::from_name("de").unwrap(),
        TaskKind::Sphere,
        5,
        2,
    );
    assert_eq!(reason, Termination::MaxGenerations);
    assert_eq!(population.len(), 5);
    for member in &population {
        assert_eq!(member.steps, 20);
        assert!(member.eval_loss().is_some());
        assert!(database.latest(member.id).is_ok());
    }
}

#[test]
fn particle_swarm_run_keeps_coordinates_in_range() {
    let dir = tempdir().unwrap();
    let (_database, population, _reason) = run_once(
        dir.path(),
        EvolverConfig::from_name("pso").unwrap(),
        TaskKind::Ridge,
        4,
        3,
    );
    for member in &population {
        for coordinate in member.hyperparameters.vector() {
            assert!((0.0..=1.0).contains(&coordinate));
        }
    }
}

#[test]
fn a_run_makes_progress_on_the_objective() {
    let dir = tempdir().unwrap();
    let (database, population, _reason) = run_once(
        dir.path(),
        EvolverConfig::from_name("pbt").unwrap(),
        TaskKind::Sphere,
        6,
        5,
    );
    let final_best = population
        .iter()
        .filter_map(|m| m.eval_loss())
        .fold(f64::INFINITY, f64::min);
    // first-generation losses, from the persisted record
    let first_best = database
        .entries()
        .filter_map(|entry| entry.ok())
        .filter(|c| c.generation == 1)
        .filter_map(|c| c.eval_loss())
        .fold(f64::INFINITY, f64::min);
    assert!(
        final_best <= first_best,
        "best loss regressed: {first_best} -> {final_best}"
    );
}

#[test]
fn score_target_terminates_early() {
    let dir = tempdir().unwrap();
    let setup = tasks::build(TaskKind::Sphere, 16).unwrap();
    let database = Arc::new(CheckpointDatabase::open(dir.path()).unwrap());
    let fitness = Arc::new(FitnessFunction::new(
        setup.trainer,
        setup.evaluator,
        database.clone(),
    ));
    let pool = WorkerPool::new(&[Device::Cpu], 2, 0).unwrap();
    let mut controller = Controller::new(
        4,
        setup.prototype,
        EvolverConfig::from_name("pbt").unwrap().build(),
        pool,
        fitness,
        database,
        10,
        EndCriteria {
            max_steps: None,
            max_generations: Some(100),
            // any positive sphere score satisfies this immediately
            score_target: Some(1e-6),
        },
        false,
        0,
    )
    .unwrap();
    assert_eq!(controller.run().unwrap(), Termination::ScoreTarget);
    assert_eq!(controller.generation(), 1);
}

#[test]
fn analyzer_writes_results_and_plots() {
    let dir = tempdir().unwrap();
    let setup = tasks::build(TaskKind::Sphere, 16).unwrap();
    let (database, _population, _reason) = run_once(
        dir.path(),
        EvolverConfig::from_name("pbt").unwrap(),
        TaskKind::Sphere,
        4,
        2,
    );
    let analyzer = Analyzer::new(database.clone());
    let tested = analyzer.test(setup.evaluator.as_ref(), Device::Cpu, 3).unwrap();
    assert!(!tested.is_empty());
    assert!(tested.len() <= 3);
    assert!(tested[0].test_loss().is_some());
    // best first
    for pair in tested.windows(2) {
        assert!(pair[0].test_loss().unwrap() <= pair[1].test_loss().unwrap());
    }
    analyzer.statistics().unwrap();
    analyzer.create_plot_files().unwrap();
    assert!(dir.path().join("results/best_member.json").is_file());
    assert!(dir.path().join("results/top_members.json").is_file());
    assert!(dir.path().join("results/statistics.json").is_file());
    assert!(dir.path().join("results/results.txt").is_file());
    assert!(dir.path().join("results/plots/eval_loss.png").is_file());
}

#[test]
fn rejected_configurations_never_start() {
    let mut config = Config::default();
    config.controller.population_size = 0;
    assert!(config.validate().is_err());

    let setup = tasks::build(TaskKind::Sphere, 16).unwrap();
    let dir = tempdir().unwrap();
    let database = Arc::new(CheckpointDatabase::open(dir.path()).unwrap());
    let fitness = Arc::new(FitnessFunction::new(
        setup.trainer,
        setup.evaluator,
        database.clone(),
    ));
    let pool = WorkerPool::new(&[Device::Cpu], 1, 0).unwrap();
    // no end criterion at all
    let result = Controller::new(
        2,
        setup.prototype,
        EvolverConfig::from_name("pbt").unwrap().build(),
        pool,
        fitness,
        database,
        10,
        EndCriteria::default(),
        false,
        0,
    );
    assert!(result.is_err());
}
