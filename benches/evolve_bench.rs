use criterion::{black_box, criterion_group, criterion_main, Criterion};
use pbt::hyperparameter::{Hyperparameter, Hyperparameters, ParamGroup};
use pbt::member::{Checkpoint, Split};
use pbt::{Evolver, ExploitAndExplore, ParticleSwarm, Population};
use rand::rngs::StdRng;
use rand::SeedableRng;

fn population(size: usize) -> Population {
    let prototype = Hyperparameters::new(
        ParamGroup::new(),
        ParamGroup::new()
            .with("dropout_1", Hyperparameter::continuous(0.0, 1.0).unwrap())
            .with("dropout_2", Hyperparameter::continuous(0.0, 1.0).unwrap()),
        ParamGroup::new()
            .with("lr", Hyperparameter::continuous(1e-6, 1e-2).unwrap())
            .with("momentum", Hyperparameter::continuous(0.1, 1.0).unwrap()),
    )
    .unwrap();
    let mut rng = StdRng::seed_from_u64(0);
    let mut evolver = Evolver::ExploitExplore(ExploitAndExplore::default());
    let mut members = evolver.initialize(size, &prototype, &mut rng);
    for (rank, member) in members.iter_mut().enumerate() {
        member.record_metric(Split::Eval, "loss", rank as f64 / size as f64);
    }
    members
}

fn evaluate_unchanged(candidates: Vec<Checkpoint>) -> pbt::Result<Vec<Checkpoint>> {
    Ok(candidates)
}

fn bench_exploit_explore(c: &mut Criterion) {
    let mut rng = StdRng::seed_from_u64(1);
    let evolver = ExploitAndExplore::default();
    c.bench_function("exploit_explore_40", |b| {
        b.iter(|| {
            let next = evolver
                .on_generation(black_box(population(40)), &mut rng)
                .unwrap();
            black_box(next)
        })
    });
}

fn bench_particle_swarm(c: &mut Criterion) {
    let mut rng = StdRng::seed_from_u64(2);
    let mut swarm = ParticleSwarm::default();
    let seed_population = population(40);
    swarm.initialize(&seed_population);
    c.bench_function("particle_swarm_40", |b| {
        b.iter(|| {
            let next = swarm
                .on_generation(black_box(population(40)), &mut rng)
                .unwrap();
            black_box(next)
        })
    });
}

fn bench_evolver_dispatch(c: &mut Criterion) {
    let mut rng = StdRng::seed_from_u64(3);
    let mut evolver = Evolver::ExploitExplore(ExploitAndExplore::default());
    c.bench_function("evolver_generation_40", |b| {
        b.iter(|| {
            let next = evolver
                .on_generation(
                    black_box(population(40)),
                    &mut evaluate_unchanged,
                    0,
                    100,
                    &mut rng,
                )
                .unwrap();
            black_box(next)
        })
    });
}

criterion_group!(
    benches,
    bench_exploit_explore,
    bench_particle_swarm,
    bench_evolver_dispatch
);
criterion_main!(benches);
