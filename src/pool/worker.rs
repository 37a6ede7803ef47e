//! Workers: the executing half of the pool
//!
//! A worker is a `uid + device + receive queue` triple running one OS
//! thread. The triple is the worker's stable identity: a respawned
//! replacement reuses all three, so device binding, RNG seeding and queue
//! indexing survive a crash. Trials are pulled off a shared lock-free
//! queue; results (or a [`FailMessage`] when the trial panics or errors)
//! go back through the mpsc channel each trial carries.

use crate::error::Result;
use crossbeam_queue::SegQueue;
use rand::rngs::StdRng;
use rand::SeedableRng;
use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::str::FromStr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{mpsc, Arc};
use std::thread::{self, JoinHandle};
use std::time::Duration;

/// Compute device a worker is pinned to for the whole run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Device {
    Cpu,
    Cuda(usize),
}

impl fmt::Display for Device {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Device::Cpu => write!(f, "cpu"),
            Device::Cuda(ordinal) => write!(f, "cuda:{ordinal}"),
        }
    }
}

impl FromStr for Device {
    type Err = crate::error::PbtError;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        let s = s.trim().to_lowercase();
        if s == "cpu" {
            return Ok(Device::Cpu);
        }
        if s == "cuda" {
            return Ok(Device::Cuda(0));
        }
        if let Some(ordinal) = s.strip_prefix("cuda:") {
            if let Ok(ordinal) = ordinal.parse() {
                return Ok(Device::Cuda(ordinal));
            }
        }
        Err(crate::error::PbtError::Configuration(format!(
            "unknown device '{s}', expected 'cpu', 'cuda' or 'cuda:N'"
        )))
    }
}

/// Sentinel a dying worker pushes onto the return channel.
#[derive(Debug, Clone)]
pub struct FailMessage {
    pub sender_id: usize,
    pub text: String,
}

/// Per-worker execution context handed to every trial: identity, device
/// binding and an RNG seeded from the worker uid.
pub struct WorkerContext {
    pub uid: usize,
    pub device: Device,
    pub rng: StdRng,
}

pub type TrialFn<P, R> = Arc<dyn Fn(&mut WorkerContext, P) -> Result<R> + Send + Sync>;

/// One unit of work: the function, its payload and the channel the
/// outcome goes back on.
pub struct Trial<P, R> {
    pub(crate) return_to: mpsc::Sender<Outcome<R>>,
    pub(crate) function: TrialFn<P, R>,
    pub(crate) payload: P,
}

pub(crate) enum Message<P, R> {
    Trial(Trial<P, R>),
    Stop,
}

#[derive(Debug)]
pub(crate) enum Outcome<R> {
    Done(R),
    Fail(FailMessage),
}

/// Lock-free receive queue shared between the pool and one worker. The
/// `Arc` is what makes respawn seamless: the replacement thread picks up
/// whatever the dead worker left queued.
pub(crate) struct ReceiveQueue<P, R> {
    inner: Arc<SegQueue<Message<P, R>>>,
}

impl<P, R> ReceiveQueue<P, R> {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(SegQueue::new()),
        }
    }

    pub fn push(&self, message: Message<P, R>) {
        self.inner.push(message);
    }

    fn pop(&self) -> Option<Message<P, R>> {
        self.inner.pop()
    }

    /// Discard everything still queued (stale stop flags, trials whose
    /// results nobody will collect).
    pub fn clear(&self) {
        while self.inner.pop().is_some() {}
    }
}

impl<P, R> Clone for ReceiveQueue<P, R> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

pub(crate) struct Worker<P, R> {
    pub uid: usize,
    pub device: Device,
    pub receive: ReceiveQueue<P, R>,
    handle: Option<JoinHandle<()>>,
}

impl<P, R> Worker<P, R>
where
    P: Send + 'static,
    R: Send + 'static,
{
    pub fn new(uid: usize, device: Device, receive: ReceiveQueue<P, R>) -> Self {
        Self {
            uid,
            device,
            receive,
            handle: None,
        }
    }

    /// Start the worker thread. The RNG seed is the uid, so a respawned
    /// worker draws the same stream its predecessor would have.
    pub fn spawn(&mut self, end: Arc<AtomicBool>) {
        let uid = self.uid;
        let device = self.device;
        let receive = self.receive.clone();
        let handle = thread::Builder::new()
            .name(format!("pbt-worker-{uid}"))
            .spawn(move || Self::run(uid, device, receive, end))
            .expect("failed to spawn worker thread");
        self.handle = Some(handle);
    }

    fn run(uid: usize, device: Device, receive: ReceiveQueue<P, R>, end: Arc<AtomicBool>) {
        let mut context = WorkerContext {
            uid,
            device,
            rng: StdRng::seed_from_u64(uid as u64),
        };
        tracing::debug!(uid, %device, "worker up");
        loop {
            if end.load(Ordering::Acquire) {
                break;
            }
            let message = match receive.pop() {
                Some(message) => message,
                None => {
                    thread::sleep(Duration::from_millis(1));
                    continue;
                }
            };
            let trial = match message {
                Message::Stop => break,
                Message::Trial(trial) => trial,
            };
            let outcome =
                panic::catch_unwind(AssertUnwindSafe(|| (trial.function)(&mut context, trial.payload)));
            match outcome {
                Ok(Ok(result)) => {
                    let _ = trial.return_to.send(Outcome::Done(result));
                }
                Ok(Err(error)) => {
                    tracing::error!(uid, %error, "trial failed, worker exiting");
                    let _ = trial.return_to.send(Outcome::Fail(FailMessage {
                        sender_id: uid,
                        text: error.to_string(),
                    }));
                    return;
                }
                Err(payload) => {
                    let text = panic_text(payload);
                    tracing::error!(uid, %text, "trial panicked, worker exiting");
                    let _ = trial.return_to.send(Outcome::Fail(FailMessage {
                        sender_id: uid,
                        text,
                    }));
                    return;
                }
            }
        }
        tracing::debug!(uid, "worker down");
    }

}

impl<P, R> Worker<P, R> {
    pub fn is_alive(&self) -> bool {
        self.handle
            .as_ref()
            .map(|handle| !handle.is_finished())
            .unwrap_or(false)
    }

    pub fn join(&mut self) {
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}

fn panic_text(payload: Box<dyn std::any::Any + Send>) -> String {
    if let Some(text) = payload.downcast_ref::<&str>() {
        (*text).to_string()
    } else if let Some(text) = payload.downcast_ref::<String>() {
        text.clone()
    } else {
        "worker panicked".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn device_parsing() {
        assert_eq!("cpu".parse::<Device>().unwrap(), Device::Cpu);
        assert_eq!("cuda".parse::<Device>().unwrap(), Device::Cuda(0));
        assert_eq!("cuda:2".parse::<Device>().unwrap(), Device::Cuda(2));
        assert_eq!("CUDA:1".parse::<Device>().unwrap(), Device::Cuda(1));
        assert!("tpu".parse::<Device>().is_err());
    }

    #[test]
    fn device_display_round_trip() {
        for device in [Device::Cpu, Device::Cuda(0), Device::Cuda(3)] {
            assert_eq!(device.to_string().parse::<Device>().unwrap(), device);
        }
    }
}
