//! Worker pool fan-out, failure containment and respawn tests.

use pbt::pool::{Device, TrialFn, WorkerPool};
use pbt::PbtError;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

#[derive(Debug)]
struct Payload {
    id: usize,
}

fn echo() -> TrialFn<Payload, usize> {
    Arc::new(|_context, payload: Payload| Ok(payload.id))
}

#[test]
fn imap_yields_one_result_per_parameter() {
    let mut pool = WorkerPool::new(&[Device::Cpu], 3, 0).unwrap();
    pool.start();
    let payloads: Vec<Payload> = (0..10).map(|id| Payload { id }).collect();
    let results: Vec<usize> = pool
        .imap(echo(), payloads, false)
        .collect::<Result<_, _>>()
        .unwrap();
    // completion-ordered, so compare as sets of ids
    let mut sorted = results.clone();
    sorted.sort_unstable();
    assert_eq!(sorted, (0..10).collect::<Vec<_>>());
    pool.stop();
}

#[test]
fn shuffle_still_covers_every_parameter() {
    let mut pool = WorkerPool::new(&[Device::Cpu], 2, 7).unwrap();
    pool.start();
    let payloads: Vec<Payload> = (0..16).map(|id| Payload { id }).collect();
    let mut results: Vec<usize> = pool
        .imap(echo(), payloads, true)
        .collect::<Result<_, _>>()
        .unwrap();
    results.sort_unstable();
    assert_eq!(results, (0..16).collect::<Vec<_>>());
    pool.stop();
}

#[test]
fn a_crashed_worker_is_respawned_and_the_generation_proceeds() {
    let mut pool = WorkerPool::new(&[Device::Cpu], 3, 0).unwrap();
    pool.start();

    let crashes = Arc::new(AtomicUsize::new(0));
    let crashes_in_fn = crashes.clone();
    let function: TrialFn<Payload, usize> = Arc::new(move |_context, payload: Payload| {
        if payload.id == 4 && crashes_in_fn.fetch_add(1, Ordering::SeqCst) == 0 {
            panic!("simulated trial crash");
        }
        Ok(payload.id)
    });

    let payloads: Vec<Payload> = (0..9).map(|id| Payload { id }).collect();
    let mut ok = Vec::new();
    let mut failures = 0;
    for outcome in pool.imap(function, payloads, false) {
        match outcome {
            Ok(id) => ok.push(id),
            Err(PbtError::WorkerFailure { .. }) => failures += 1,
            Err(other) => panic!("unexpected error: {other}"),
        }
    }
    assert_eq!(failures, 1);
    ok.sort_unstable();
    assert_eq!(ok, vec![0, 1, 2, 3, 5, 6, 7, 8]);

    // the respawned worker serves the next fan-out in full
    let payloads: Vec<Payload> = (0..9).map(|id| Payload { id }).collect();
    let results: Vec<usize> = pool
        .imap(echo(), payloads, false)
        .collect::<Result<_, _>>()
        .unwrap();
    assert_eq!(results.len(), 9);
    pool.stop();
}

#[test]
fn error_results_also_kill_and_respawn_the_worker() {
    let mut pool = WorkerPool::new(&[Device::Cpu], 2, 0).unwrap();
    pool.start();
    let function: TrialFn<Payload, usize> = Arc::new(|_context, payload: Payload| {
        if payload.id == 1 {
            Err(PbtError::Configuration("bad trial".into()))
        } else {
            Ok(payload.id)
        }
    });
    let payloads: Vec<Payload> = (0..4).map(|id| Payload { id }).collect();
    let outcomes: Vec<_> = pool.imap(function, payloads, false).collect();
    assert_eq!(outcomes.len(), 4);
    assert_eq!(outcomes.iter().filter(|o| o.is_err()).count(), 1);
    pool.stop();
}

#[test]
fn all_workers_failing_is_terminal() {
    let mut pool = WorkerPool::new(&[Device::Cpu], 2, 0).unwrap();
    pool.start();
    let function: TrialFn<Payload, usize> =
        Arc::new(|_context, _payload: Payload| panic!("every trial dies"));
    let payloads: Vec<Payload> = (0..6).map(|id| Payload { id }).collect();
    let outcomes: Vec<_> = pool.imap(function, payloads, false).collect();
    assert!(outcomes
        .iter()
        .any(|o| matches!(o, Err(PbtError::AllWorkersFailed))));
    // fused after the terminal error
    assert!(outcomes.len() <= 6);
    pool.stop();
}

#[test]
fn apply_async_and_get() {
    let mut pool = WorkerPool::new(&[Device::Cpu], 2, 0).unwrap();
    pool.start();
    pool.apply_async(echo(), Payload { id: 42 });
    assert_eq!(pool.get().unwrap(), 42);
    pool.stop();
}

#[test]
fn get_without_submit_is_an_error() {
    let mut pool: WorkerPool<Payload, usize> = WorkerPool::new(&[Device::Cpu], 1, 0).unwrap();
    pool.start();
    assert!(matches!(pool.get(), Err(PbtError::Configuration(_))));
    pool.stop();
}

#[test]
fn lifecycle_is_idempotent() {
    let mut pool: WorkerPool<Payload, usize> = WorkerPool::new(&[Device::Cpu], 2, 0).unwrap();
    pool.start();
    pool.start(); // warns, no-op
    pool.stop();
    pool.stop(); // warns, no-op
}

#[test]
fn workers_see_their_device_and_uid() {
    let devices = [Device::Cpu, Device::Cuda(0)];
    let mut pool = WorkerPool::new(&devices, 4, 0).unwrap();
    pool.start();
    let function: TrialFn<Payload, (usize, String)> =
        Arc::new(|context, _payload: Payload| Ok((context.uid, context.device.to_string())));
    let payloads: Vec<Payload> = (0..8).map(|id| Payload { id }).collect();
    let results: Vec<(usize, String)> = pool
        .imap(function, payloads, false)
        .collect::<Result<_, _>>()
        .unwrap();
    for (uid, device) in results {
        // round-robin binding: even uids on cpu, odd on cuda:0
        let expected = if uid % 2 == 0 { "cpu" } else { "cuda:0" };
        assert_eq!(device, expected, "worker {uid}");
    }
    pool.stop();
}

#[test]
fn misconfigured_pools_are_rejected() {
    assert!(WorkerPool::<Payload, usize>::new(&[], 2, 0).is_err());
    assert!(WorkerPool::<Payload, usize>::new(&[Device::Cpu], 0, 0).is_err());
    assert!(WorkerPool::<Payload, usize>::new(&[Device::Cpu, Device::Cuda(0)], 1, 0).is_err());
}
