//! Worker pool
//!
//! Fans fitness jobs out over a fixed set of workers pinned round-robin
//! to devices. Submission cycles the worker list; results come back in
//! completion order through a channel created per call, so callers carry
//! identifiers inside their payloads instead of relying on position.
//!
//! Failure containment: a trial that errors or panics turns into a
//! [`FailMessage`], the worker exits, and the pool immediately respawns a
//! replacement with the same uid, device and receive queue. The
//! replacement picks up whatever the dead worker left queued, so `imap`
//! never hangs on a crash. The pool only gives up when every worker uid
//! has failed within a single fan-out.

mod worker;

pub use worker::{Device, FailMessage, TrialFn, WorkerContext};

use crate::error::{PbtError, Result};
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;
use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{mpsc, Arc};
use worker::{Message, Outcome, ReceiveQueue, Trial, Worker};

pub struct WorkerPool<P, R> {
    workers: Vec<Worker<P, R>>,
    end: Arc<AtomicBool>,
    cursor: usize,
    running: bool,
    rng: StdRng,
    async_return: Option<(mpsc::Sender<Outcome<R>>, mpsc::Receiver<Outcome<R>>)>,
}

impl<P, R> WorkerPool<P, R>
where
    P: Send + 'static,
    R: Send + 'static,
{
    /// Build a pool of `n_jobs` workers over `devices`, assigned
    /// round-robin (several workers may share a device). `seed` drives
    /// submission shuffling only; worker RNGs are seeded from their uids.
    pub fn new(devices: &[Device], n_jobs: usize, seed: u64) -> Result<Self> {
        if devices.is_empty() {
            return Err(PbtError::Configuration(
                "at least one device is required".into(),
            ));
        }
        if n_jobs == 0 {
            return Err(PbtError::Configuration("n_jobs must be at least 1".into()));
        }
        if n_jobs < devices.len() {
            return Err(PbtError::Configuration(format!(
                "n_jobs must cover every device, got {n_jobs} jobs for {} devices",
                devices.len()
            )));
        }
        let workers = (0..n_jobs)
            .map(|uid| Worker::new(uid, devices[uid % devices.len()], ReceiveQueue::new()))
            .collect();
        Ok(Self {
            workers,
            end: Arc::new(AtomicBool::new(false)),
            cursor: 0,
            running: false,
            rng: StdRng::seed_from_u64(seed),
            async_return: None,
        })
    }

    pub fn n_workers(&self) -> usize {
        self.workers.len()
    }

    /// Spawn all worker threads. Calling `start` on a running pool is a
    /// no-op with a warning.
    pub fn start(&mut self) {
        if self.running || self.workers.iter().any(|worker| worker.is_alive()) {
            tracing::warn!("worker pool is already running");
            return;
        }
        self.end.store(false, Ordering::Release);
        for worker in &mut self.workers {
            // drop anything a previous stop left behind
            worker.receive.clear();
            worker.spawn(self.end.clone());
        }
        self.running = true;
        tracing::info!(n_workers = self.workers.len(), "worker pool started");
    }

    /// Signal the end event and join every worker. In-flight trials run to
    /// completion and their results stay in their return channels.
    pub fn stop(&mut self) {
        if !self.running {
            tracing::warn!("worker pool is not running");
            return;
        }
        self.end.store(true, Ordering::Release);
        for worker in &self.workers {
            worker.receive.push(Message::Stop);
        }
        for worker in &mut self.workers {
            worker.join();
        }
        self.running = false;
        tracing::info!("worker pool stopped");
    }

    fn next_worker(&mut self) -> &Worker<P, R> {
        let worker = &self.workers[self.cursor % self.workers.len()];
        self.cursor += 1;
        worker
    }

    fn respawn(&mut self, uid: usize) {
        let worker = &mut self.workers[uid];
        worker.join();
        tracing::info!(uid, device = %worker.device, "respawning worker");
        worker.spawn(self.end.clone());
    }

    /// Submit one trial per parameter and iterate results lazily in
    /// completion order. Failed trials surface as `Err` items; the
    /// iterator therefore yields exactly `parameters.len()` items unless
    /// every worker fails, which fuses it after an
    /// [`AllWorkersFailed`](PbtError::AllWorkersFailed) item.
    pub fn imap(
        &mut self,
        function: TrialFn<P, R>,
        parameters: Vec<P>,
        shuffle: bool,
    ) -> Imap<'_, P, R> {
        if !self.running {
            tracing::warn!("imap called before start, starting the pool");
            self.start();
        }
        let mut parameters = parameters;
        if shuffle {
            parameters.shuffle(&mut self.rng);
        }
        let (tx, rx) = mpsc::channel();
        let n_sent = parameters.len();
        for payload in parameters {
            let trial = Trial {
                return_to: tx.clone(),
                function: function.clone(),
                payload,
            };
            self.next_worker().receive.push(Message::Trial(trial));
        }
        drop(tx);
        tracing::debug!(n_sent, "trials queued");
        Imap {
            pool: self,
            receiver: rx,
            n_sent,
            n_done: 0,
            n_failed: 0,
            failed_uids: HashSet::new(),
            fused: false,
        }
    }

    /// Submit a single job; pair with [`get`](Self::get).
    pub fn apply_async(&mut self, function: TrialFn<P, R>, payload: P) {
        if self.async_return.is_none() {
            self.async_return = Some(mpsc::channel());
        }
        let tx = self
            .async_return
            .as_ref()
            .map(|(tx, _)| tx.clone())
            .expect("async channel just created");
        let trial = Trial {
            return_to: tx,
            function,
            payload,
        };
        self.next_worker().receive.push(Message::Trial(trial));
    }

    /// Block for the next `apply_async` result.
    pub fn get(&mut self) -> Result<R> {
        let outcome = {
            let (_, rx) = self.async_return.as_ref().ok_or_else(|| {
                PbtError::Configuration(
                    "apply_async must be called at least once before get".into(),
                )
            })?;
            rx.recv().map_err(|_| PbtError::AllWorkersFailed)?
        };
        match outcome {
            Outcome::Done(result) => Ok(result),
            Outcome::Fail(message) => {
                let uid = message.sender_id;
                self.respawn(uid);
                Err(PbtError::WorkerFailure {
                    uid,
                    text: message.text,
                })
            }
        }
    }
}

impl<P, R> Drop for WorkerPool<P, R> {
    fn drop(&mut self) {
        if self.running {
            self.end.store(true, Ordering::Release);
            for worker in &self.workers {
                worker.receive.push(Message::Stop);
            }
            for worker in &mut self.workers {
                worker.join();
            }
        }
    }
}

/// Lazy, completion-ordered result stream for one `imap` fan-out.
pub struct Imap<'p, P, R> {
    pool: &'p mut WorkerPool<P, R>,
    receiver: mpsc::Receiver<Outcome<R>>,
    n_sent: usize,
    n_done: usize,
    n_failed: usize,
    failed_uids: HashSet<usize>,
    fused: bool,
}

impl<P, R> Imap<'_, P, R> {
    /// Trials lost to worker failures so far.
    pub fn failed(&self) -> usize {
        self.n_failed
    }

    /// Results delivered so far.
    pub fn yielded(&self) -> usize {
        self.n_done
    }
}

impl<P, R> Iterator for Imap<'_, P, R>
where
    P: Send + 'static,
    R: Send + 'static,
{
    type Item = Result<R>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.fused || self.n_done + self.n_failed >= self.n_sent {
            return None;
        }
        match self.receiver.recv() {
            Ok(Outcome::Done(result)) => {
                self.n_done += 1;
                Some(Ok(result))
            }
            Ok(Outcome::Fail(message)) => {
                let uid = message.sender_id;
                tracing::warn!(uid, text = %message.text, "fail message received");
                self.n_failed += 1;
                self.failed_uids.insert(uid);
                if self.failed_uids.len() == self.pool.workers.len() {
                    self.fused = true;
                    return Some(Err(PbtError::AllWorkersFailed));
                }
                self.pool.respawn(uid);
                Some(Err(PbtError::WorkerFailure {
                    uid,
                    text: message.text,
                }))
            }
            // Every sender is gone; nothing further can arrive.
            Err(_) => {
                self.fused = true;
                None
            }
        }
    }
}
