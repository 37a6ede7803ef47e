use thiserror::Error;

pub type Result<T> = std::result::Result<T, PbtError>;

#[derive(Error, Debug)]
pub enum PbtError {
    #[error("configuration error: {0}")]
    Configuration(String),

    #[error("invalid search space: {0}")]
    InvalidSearchSpace(String),

    #[error("incompatible search spaces: {0}")]
    IncompatibleSpace(String),

    #[error("value must be a finite float, got {0}")]
    NonFinite(f64),

    #[error("missing state for member {id} at step {step}")]
    MissingState { id: usize, step: usize },

    #[error("no checkpoint found for member {id} at step {step}")]
    NotFound { id: usize, step: usize },

    #[error("worker {uid} failed: {text}")]
    WorkerFailure { uid: usize, text: String },

    #[error("{failed} of {total} workers failed during the generation")]
    WorkersFailed { failed: usize, total: usize },

    #[error("all workers failed")]
    AllWorkersFailed,

    #[error("plotting error: {0}")]
    Plot(String),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("state codec error: {0}")]
    StateCodec(#[from] bincode::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl PbtError {
    /// Fatal errors abort the run; everything else is contained by the
    /// component that observed it (a failed trial shrinks the generation,
    /// a missing state blob is revived by the next exploit).
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            PbtError::Configuration(_)
                | PbtError::InvalidSearchSpace(_)
                | PbtError::IncompatibleSpace(_)
                | PbtError::AllWorkersFailed
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fatal_classification() {
        assert!(PbtError::Configuration("bad".into()).is_fatal());
        assert!(PbtError::AllWorkersFailed.is_fatal());
        assert!(!PbtError::WorkerFailure { uid: 1, text: "oom".into() }.is_fatal());
        assert!(!PbtError::MissingState { id: 0, step: 100 }.is_fatal());
    }
}
