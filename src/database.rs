//! Checkpoint database
//!
//! Durable, append-only store mapping `(member_id, step)` to a checkpoint
//! and its serialized state, with an in-memory index for lookups. On disk
//! every member owns a directory of `<step>.meta` / `<step>.state` pairs;
//! all writes go through a temp file, fsync and rename so a crash never
//! leaves a half-written entry behind.
//!
//! The index sits behind one reader-writer lock; file writes take a
//! per-`(id, step)` lock so distinct members never contend. State blobs
//! pass through reader/writer functions injected at construction, keeping
//! the store independent of whatever serializer produced them.

use crate::error::{PbtError, Result};
use crate::member::Checkpoint;
use dashmap::DashMap;
use parking_lot::{Mutex, RwLock};
use std::fs::{self, File};
use std::io::{self, Read, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;

pub type StateReader = Arc<dyn Fn(&Path) -> io::Result<Vec<u8>> + Send + Sync>;
pub type StateWriter = Arc<dyn Fn(&Path, &[u8]) -> io::Result<()> + Send + Sync>;

/// Directory for auxiliary run results (best member, statistics, plots).
pub const RESULTS_DIR: &str = "results";

#[derive(Default)]
struct Index {
    /// `id → sorted steps`; the inner map keeps `latest` cheap.
    by_member: std::collections::BTreeMap<usize, std::collections::BTreeSet<usize>>,
    /// Insertion order of `(id, step)` keys, for `entries`.
    order: Vec<(usize, usize)>,
}

impl Index {
    fn contains(&self, id: usize, step: usize) -> bool {
        self.by_member
            .get(&id)
            .map(|steps| steps.contains(&step))
            .unwrap_or(false)
    }

    fn insert(&mut self, id: usize, step: usize) {
        if self.by_member.entry(id).or_default().insert(step) {
            self.order.push((id, step));
        }
    }
}

pub struct CheckpointDatabase {
    root: PathBuf,
    index: RwLock<Index>,
    file_locks: DashMap<(usize, usize), Arc<Mutex<()>>>,
    read_state: StateReader,
    write_state: StateWriter,
}

impl CheckpointDatabase {
    /// Open (or create) a database rooted at `root`, with plain-file state
    /// I/O. Any entries already on disk are indexed in `(id, step)` order.
    pub fn open(root: impl Into<PathBuf>) -> Result<Self> {
        let read: StateReader = Arc::new(|path| fs::read(path));
        let write: StateWriter = Arc::new(|path, blob| fs::write(path, blob));
        Self::with_state_codec(root, read, write)
    }

    /// Open with injected state reader/writer functions.
    pub fn with_state_codec(
        root: impl Into<PathBuf>,
        read_state: StateReader,
        write_state: StateWriter,
    ) -> Result<Self> {
        let root = root.into();
        fs::create_dir_all(&root)?;
        let db = Self {
            root,
            index: RwLock::new(Index::default()),
            file_locks: DashMap::new(),
            read_state,
            write_state,
        };
        db.rebuild_index()?;
        Ok(db)
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn member_dir(&self, id: usize) -> PathBuf {
        self.root.join(id.to_string())
    }

    fn meta_path(&self, id: usize, step: usize) -> PathBuf {
        self.member_dir(id).join(format!("{step}.meta"))
    }

    fn state_path(&self, id: usize, step: usize) -> PathBuf {
        self.member_dir(id).join(format!("{step}.state"))
    }

    fn rebuild_index(&self) -> Result<()> {
        let mut found: Vec<(usize, usize)> = Vec::new();
        for entry in fs::read_dir(&self.root)? {
            let entry = entry?;
            if !entry.file_type()?.is_dir() {
                continue;
            }
            let Some(id) = entry.file_name().to_str().and_then(|n| n.parse::<usize>().ok())
            else {
                continue;
            };
            for file in fs::read_dir(entry.path())? {
                let file = file?;
                let name = file.file_name();
                let Some(step) = name
                    .to_str()
                    .and_then(|n| n.strip_suffix(".meta"))
                    .and_then(|n| n.parse::<usize>().ok())
                else {
                    continue;
                };
                found.push((id, step));
            }
        }
        found.sort_unstable();
        let mut index = self.index.write();
        for (id, step) in found {
            index.insert(id, step);
        }
        Ok(())
    }

    fn file_lock(&self, id: usize, step: usize) -> Arc<Mutex<()>> {
        self.file_locks
            .entry((id, step))
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }

    /// Write `contents` to `path` atomically: temp file, fsync, rename.
    fn write_atomic(path: &Path, write: impl FnOnce(&Path) -> io::Result<()>) -> Result<()> {
        let tmp = path.with_extension(match path.extension().and_then(|e| e.to_str()) {
            Some(ext) => format!("{ext}.tmp"),
            None => "tmp".to_string(),
        });
        write(&tmp)?;
        File::open(&tmp)?.sync_all()?;
        fs::rename(&tmp, path)?;
        Ok(())
    }

    /// Persist a checkpoint: metadata first, then the state blob, each an
    /// atomic replace. Existing entries for the same `(id, steps)` key are
    /// overwritten in place.
    pub fn save_entry(&self, checkpoint: &Checkpoint) -> Result<()> {
        let key = (checkpoint.id, checkpoint.steps);
        let lock = self.file_lock(key.0, key.1);
        let _guard = lock.lock();

        fs::create_dir_all(self.member_dir(checkpoint.id))?;

        let meta = serde_json::to_vec_pretty(checkpoint)?;
        let meta_path = self.meta_path(key.0, key.1);
        Self::write_atomic(&meta_path, |tmp| {
            let mut file = File::create(tmp)?;
            file.write_all(&meta)
        })?;

        if let Some(blob) = &checkpoint.state {
            let state_path = self.state_path(key.0, key.1);
            let write_state = self.write_state.clone();
            Self::write_atomic(&state_path, |tmp| write_state(tmp, blob))?;
        }

        self.index.write().insert(key.0, key.1);
        Ok(())
    }

    /// Load the checkpoint metadata for `(id, step)`. The state blob is
    /// not attached; fetch it with [`load_state`](Self::load_state) when
    /// needed.
    pub fn load_entry(&self, id: usize, step: usize) -> Result<Checkpoint> {
        if !self.index.read().contains(id, step) {
            return Err(PbtError::NotFound { id, step });
        }
        let bytes = fs::read(self.meta_path(id, step))
            .map_err(|_| PbtError::NotFound { id, step })?;
        let checkpoint = serde_json::from_slice(&bytes)?;
        Ok(checkpoint)
    }

    /// Read the serialized state for `(id, step)`. Absent or unreadable
    /// blobs surface as [`MissingState`](PbtError::MissingState).
    pub fn load_state(&self, id: usize, step: usize) -> Result<Vec<u8>> {
        let path = self.state_path(id, step);
        (self.read_state)(&path).map_err(|_| PbtError::MissingState { id, step })
    }

    /// The highest-step checkpoint recorded for `id`.
    pub fn latest(&self, id: usize) -> Result<Checkpoint> {
        let step = {
            let index = self.index.read();
            index
                .by_member
                .get(&id)
                .and_then(|steps| steps.iter().next_back().copied())
                .ok_or(PbtError::NotFound { id, step: 0 })?
        };
        self.load_entry(id, step)
    }

    /// All member ids with at least one entry.
    pub fn member_ids(&self) -> Vec<usize> {
        self.index.read().by_member.keys().copied().collect()
    }

    /// Every `(id, step)` key in insertion order.
    pub fn keys(&self) -> Vec<(usize, usize)> {
        self.index.read().order.clone()
    }

    /// Iterate all checkpoints in insertion order.
    pub fn entries(&self) -> impl Iterator<Item = Result<Checkpoint>> + '_ {
        self.keys()
            .into_iter()
            .map(move |(id, step)| self.load_entry(id, step))
    }

    pub fn len(&self) -> usize {
        self.index.read().order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Create (and return) a directory under the database root for
    /// auxiliary results.
    pub fn create_folder(&self, relative: impl AsRef<Path>) -> Result<PathBuf> {
        let path = self.root.join(relative.as_ref());
        fs::create_dir_all(&path)?;
        Ok(path)
    }

    /// Create a file under the database root, with its parent directories,
    /// and write `contents` into it.
    pub fn create_file(&self, relative: impl AsRef<Path>, contents: &[u8]) -> Result<PathBuf> {
        let path = self.root.join(relative.as_ref());
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        let mut file = File::create(&path)?;
        file.write_all(contents)?;
        Ok(path)
    }

    /// Read a file previously written under the database root.
    pub fn read_file(&self, relative: impl AsRef<Path>) -> Result<Vec<u8>> {
        let path = self.root.join(relative.as_ref());
        let mut bytes = Vec::new();
        File::open(path)?.read_to_end(&mut bytes)?;
        Ok(bytes)
    }
}

impl std::fmt::Debug for CheckpointDatabase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CheckpointDatabase")
            .field("root", &self.root)
            .field("entries", &self.len())
            .finish()
    }
}
