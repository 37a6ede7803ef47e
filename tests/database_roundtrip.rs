//! Checkpoint database persistence tests.

use pbt::database::CheckpointDatabase;
use pbt::hyperparameter::{Hyperparameter, Hyperparameters, ParamGroup};
use pbt::member::{Checkpoint, Split, LOSS_METRIC};
use pbt::PbtError;
use std::sync::Arc;
use tempfile::tempdir;

fn checkpoint(id: usize, steps: usize) -> Checkpoint {
    let params = Hyperparameters::new(
        ParamGroup::new(),
        ParamGroup::new().with("dropout", Hyperparameter::continuous(0.0, 1.0).unwrap()),
        ParamGroup::new().with("lr", Hyperparameter::continuous(1e-6, 1e-2).unwrap()),
    )
    .unwrap();
    let mut c = Checkpoint::new(id, params);
    c.steps = steps;
    c.generation = steps / 100;
    c.record_metric(Split::Eval, LOSS_METRIC, 0.5 / (1.0 + steps as f64));
    c.state = Some(format!("state-{id}-{steps}").into_bytes());
    c
}

#[test]
fn save_and_load_round_trip() {
    let dir = tempdir().unwrap();
    let db = CheckpointDatabase::open(dir.path()).unwrap();

    let original = checkpoint(0, 100);
    db.save_entry(&original).unwrap();

    let loaded = db.load_entry(0, 100).unwrap();
    assert_eq!(loaded.id, original.id);
    assert_eq!(loaded.steps, original.steps);
    assert_eq!(loaded.generation, original.generation);
    assert_eq!(loaded.eval_loss(), original.eval_loss());
    assert_eq!(loaded.hyperparameters, original.hyperparameters);
    // the state blob is stored separately
    assert!(loaded.state.is_none());
    assert_eq!(db.load_state(0, 100).unwrap(), b"state-0-100".to_vec());
}

#[test]
fn missing_entries_and_state_are_distinct_errors() {
    let dir = tempdir().unwrap();
    let db = CheckpointDatabase::open(dir.path()).unwrap();

    assert!(matches!(
        db.load_entry(7, 100),
        Err(PbtError::NotFound { id: 7, step: 100 })
    ));

    // entry without a state blob: metadata loads, state is missing
    let mut no_state = checkpoint(1, 100);
    no_state.state = None;
    db.save_entry(&no_state).unwrap();
    assert!(db.load_entry(1, 100).is_ok());
    assert!(matches!(
        db.load_state(1, 100),
        Err(PbtError::MissingState { id: 1, step: 100 })
    ));
}

#[test]
fn latest_picks_the_highest_step() {
    let dir = tempdir().unwrap();
    let db = CheckpointDatabase::open(dir.path()).unwrap();
    for steps in [0, 100, 300, 200] {
        db.save_entry(&checkpoint(2, steps)).unwrap();
    }
    assert_eq!(db.latest(2).unwrap().steps, 300);
    assert!(db.latest(99).is_err());
}

#[test]
fn entries_iterate_in_insertion_order() {
    let dir = tempdir().unwrap();
    let db = CheckpointDatabase::open(dir.path()).unwrap();
    db.save_entry(&checkpoint(1, 0)).unwrap();
    db.save_entry(&checkpoint(0, 0)).unwrap();
    db.save_entry(&checkpoint(1, 100)).unwrap();
    let keys: Vec<(usize, usize)> = db.keys();
    assert_eq!(keys, vec![(1, 0), (0, 0), (1, 100)]);
    let loaded: Vec<_> = db.entries().collect::<Result<_, _>>().unwrap();
    assert_eq!(loaded.len(), 3);
    assert_eq!(loaded[0].id, 1);
}

#[test]
fn reopening_rebuilds_the_index() {
    let dir = tempdir().unwrap();
    {
        let db = CheckpointDatabase::open(dir.path()).unwrap();
        db.save_entry(&checkpoint(0, 0)).unwrap();
        db.save_entry(&checkpoint(0, 100)).unwrap();
        db.save_entry(&checkpoint(3, 100)).unwrap();
    }
    let db = CheckpointDatabase::open(dir.path()).unwrap();
    assert_eq!(db.len(), 3);
    assert_eq!(db.member_ids(), vec![0, 3]);
    assert_eq!(db.latest(0).unwrap().steps, 100);
    assert_eq!(db.load_state(3, 100).unwrap(), b"state-3-100".to_vec());
}

#[test]
fn save_is_an_atomic_replace() {
    let dir = tempdir().unwrap();
    let db = CheckpointDatabase::open(dir.path()).unwrap();
    let mut c = checkpoint(0, 100);
    db.save_entry(&c).unwrap();
    c.record_metric(Split::Eval, LOSS_METRIC, 0.01);
    c.state = Some(b"updated".to_vec());
    db.save_entry(&c).unwrap();

    // still exactly one entry, with the new contents and no leftover temp files
    assert_eq!(db.len(), 1);
    assert_eq!(db.load_entry(0, 100).unwrap().eval_loss(), Some(0.01));
    assert_eq!(db.load_state(0, 100).unwrap(), b"updated".to_vec());
    let leftovers: Vec<_> = std::fs::read_dir(dir.path().join("0"))
        .unwrap()
        .filter_map(|e| e.ok())
        .filter(|e| e.path().extension().map(|x| x == "tmp").unwrap_or(false))
        .collect();
    assert!(leftovers.is_empty());
}

#[test]
fn injected_state_codec_is_used() {
    let dir = tempdir().unwrap();
    let db = CheckpointDatabase::with_state_codec(
        dir.path(),
        Arc::new(|path| {
            let raw = std::fs::read(path)?;
            Ok(raw.into_iter().map(|b| b ^ 0xAA).collect())
        }),
        Arc::new(|path, blob| {
            let encoded: Vec<u8> = blob.iter().map(|b| b ^ 0xAA).collect();
            std::fs::write(path, encoded)
        }),
    )
    .unwrap();
    db.save_entry(&checkpoint(0, 0)).unwrap();
    assert_eq!(db.load_state(0, 0).unwrap(), b"state-0-0".to_vec());
    // the raw bytes on disk are not the blob
    let raw = std::fs::read(dir.path().join("0").join("0.state")).unwrap();
    assert_ne!(raw, b"state-0-0".to_vec());
}

#[test]
fn concurrent_writers_do_not_corrupt_the_index() {
    let dir = tempdir().unwrap();
    let db = Arc::new(CheckpointDatabase::open(dir.path()).unwrap());
    let mut handles = Vec::new();
    for id in 0..8 {
        let db = db.clone();
        handles.push(std::thread::spawn(move || {
            for steps in [0usize, 100, 200] {
                db.save_entry(&checkpoint(id, steps)).unwrap();
            }
        }));
    }
    for handle in handles {
        handle.join().unwrap();
    }
    assert_eq!(db.len(), 24);
    for id in 0..8 {
        assert_eq!(db.latest(id).unwrap().steps, 200);
    }
}

#[test]
fn auxiliary_files_live_under_the_root() {
    let dir = tempdir().unwrap();
    let db = CheckpointDatabase::open(dir.path()).unwrap();
    db.create_folder("results/plots").unwrap();
    db.create_file("results/results.txt", b"summary\n").unwrap();
    assert!(dir.path().join("results/plots").is_dir());
    assert_eq!(db.read_file("results/results.txt").unwrap(), b"summary\n");
}
