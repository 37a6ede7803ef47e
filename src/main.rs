use clap::Parser;
use pbt::analyze::Analyzer;
use pbt::config::{Config, EvolverConfig};
use pbt::controller::Controller;
use pbt::database::CheckpointDatabase;
use pbt::fitness::FitnessFunction;
use pbt::monitoring::{self, logging::LogConfig};
use pbt::pool::WorkerPool;
use pbt::tasks::{self, TaskKind};
use pbt::{PbtError, Result};
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

#[derive(Parser, Debug)]
#[command(name = "pbt")]
#[command(about = "Population Based Training for hyperparameter optimization")]
struct Args {
    /// Optional TOML configuration file; flags override it
    #[arg(long)]
    config: Option<PathBuf>,

    /// Number of members in the population
    #[arg(long, env = "PBT_POPULATION_SIZE")]
    population_size: Option<usize>,

    /// Mini-batch size for dataset-backed tasks
    #[arg(long, env = "PBT_BATCH_SIZE")]
    batch_size: Option<usize>,

    /// Objective to optimize (sphere, ridge)
    #[arg(long, env = "PBT_TASK")]
    task: Option<String>,

    /// Directory for the checkpoint database
    #[arg(long, env = "PBT_DATABASE_PATH")]
    database_path: Option<PathBuf>,

    /// Devices to pin workers to, comma-separated (cpu, cuda:N)
    #[arg(long, env = "PBT_DEVICES", value_delimiter = ',')]
    device: Option<Vec<String>>,

    /// Worker count; defaults to the CPU count
    #[arg(long, env = "PBT_N_JOBS")]
    n_jobs: Option<usize>,

    /// Evolver: exploit_explore|pbt, differential_evolution|de, particle_swarm|pso
    #[arg(long)]
    evolver: Option<String>,

    /// Steps each member trains per generation
    #[arg(long)]
    step_size: Option<usize>,

    /// End criterion: total steps per member
    #[arg(long)]
    max_steps: Option<usize>,

    /// End criterion: generations
    #[arg(long)]
    max_generations: Option<usize>,

    /// End criterion: best eval score to reach
    #[arg(long)]
    score_target: Option<f64>,

    /// Controller RNG seed
    #[arg(long, env = "PBT_SEED")]
    seed: Option<u64>,

    /// Debug-level logging
    #[arg(short, long)]
    verbose: bool,

    /// Dump Prometheus metrics into the results directory at the end
    #[arg(long)]
    logging: bool,
}

impl Args {
    /// Config file (or defaults), environment, then flags; last wins.
    fn into_config(self) -> Result<(Config, bool)> {
        let mut config = match &self.config {
            Some(path) => Config::load(path)?,
            None => {
                let mut config = Config::default();
                config.apply_env_overrides();
                config
            }
        };
        if let Some(size) = self.population_size {
            config.controller.population_size = size;
        }
        if let Some(batch_size) = self.batch_size {
            config.task.batch_size = batch_size;
        }
        if let Some(task) = self.task {
            config.task.name = task;
        }
        if let Some(path) = self.database_path {
            config.database.path = path;
        }
        if let Some(devices) = self.device {
            config.pool.devices = devices;
        }
        if let Some(n_jobs) = self.n_jobs {
            config.pool.n_jobs = n_jobs;
        }
        if let Some(evolver) = &self.evolver {
            config.evolver = EvolverConfig::from_name(evolver)?;
        }
        if let Some(step_size) = self.step_size {
            config.controller.step_size = step_size;
        }
        if let Some(max_steps) = self.max_steps {
            config.controller.max_steps = Some(max_steps);
        }
        if let Some(max_generations) = self.max_generations {
            config.controller.max_generations = Some(max_generations);
        }
        if let Some(score_target) = self.score_target {
            config.controller.score_target = Some(score_target);
        }
        if let Some(seed) = self.seed {
            config.controller.seed = seed;
        }
        Ok((config, self.logging))
    }
}

fn run(config: Config, dump_metrics: bool) -> Result<()> {
    config.validate()?;
    let task_kind: TaskKind = config.task.name.parse()?;
    let setup = tasks::build(task_kind, config.task.batch_size)?;
    let devices = config.devices()?;

    tracing::info!(
        task = %task_kind,
        population_size = config.controller.population_size,
        n_jobs = config.pool.n_jobs,
        database = %config.database.path.display(),
        "starting population based training"
    );

    let database = Arc::new(CheckpointDatabase::open(&config.database.path)?);
    let fitness = Arc::new(FitnessFunction::new(
        setup.trainer,
        setup.evaluator.clone(),
        database.clone(),
    ));
    let pool = WorkerPool::new(&devices, config.pool.n_jobs, config.controller.seed)?;
    let mut controller = Controller::new(
        config.controller.population_size,
        setup.prototype,
        config.evolver.build(),
        pool,
        fitness,
        database.clone(),
        config.controller.step_size,
        config.end_criteria(),
        config.controller.shuffle,
        config.controller.seed,
    )?;

    let reason = controller.run()?;
    tracing::info!(?reason, "training finished");

    // post-run analysis: test the top members, write results and plots
    let analyzer = Analyzer::new(database.clone());
    let tested = analyzer.test(setup.evaluator.as_ref(), devices[0], 10)?;
    analyzer.statistics()?;
    analyzer.create_plot_files()?;
    if dump_metrics {
        database.create_file(
            "results/metrics.prom",
            monitoring::export_metrics().as_bytes(),
        )?;
    }
    if let Some(best) = tested.first() {
        println!(
            "member {} performed best at epoch {} / step {} with a test score of {:.4}",
            best.id,
            best.epochs,
            best.steps,
            best.test_score().unwrap_or(f64::NAN)
        );
    }
    Ok(())
}

fn main() -> ExitCode {
    let args = Args::parse();
    let log_config = if args.verbose {
        LogConfig::verbose()
    } else {
        LogConfig::default()
    };
    if let Err(error) = monitoring::init_logging(log_config) {
        eprintln!("failed to initialize logging: {error}");
        return ExitCode::from(2);
    }

    let (config, dump_metrics) = match args.into_config() {
        Ok(parts) => parts,
        Err(error) => {
            tracing::error!(%error, "invalid configuration");
            return ExitCode::from(1);
        }
    };

    match run(config, dump_metrics) {
        Ok(()) => ExitCode::SUCCESS,
        Err(error @ PbtError::Configuration(_))
        | Err(error @ PbtError::InvalidSearchSpace(_)) => {
            tracing::error!(%error, "invalid configuration");
            ExitCode::from(1)
        }
        Err(error) => {
            tracing::error!(%error, "unrecoverable runtime failure");
            ExitCode::from(2)
        }
    }
}
