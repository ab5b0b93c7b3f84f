use rand::distributions::WeightedError;
use tch::TchError;
use thiserror::Error;

use crate::model::Architecture;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Error, Debug)]
pub enum Error {
    #[error("torch error: {0}")]
    Torch(#[from] TchError),

    #[error("a {height}x{width} observation is too small for the {architecture:?} trunk")]
    InputTooSmall {
        architecture: Architecture,
        height: usize,
        width: usize,
    },

    #[error("trajectory is empty")]
    EmptyTrajectory,

    #[error("action {action} is out of range for {num_actions} actions")]
    InvalidAction { action: usize, num_actions: usize },

    #[error("local parameter `{local}` does not match global parameter `{global}`")]
    ParameterMismatch { local: String, global: String },

    #[error("expected {expected} parameter tensors, got {got}")]
    ParameterCount { expected: usize, got: usize },

    #[error("invalid policy distribution: {0}")]
    Policy(#[from] WeightedError),

    #[error("missing setting `{0}`")]
    MissingSetting(&'static str),

    #[error("setting `{0}` must be greater than zero")]
    InvalidSetting(&'static str),

    #[error("failed to spawn worker thread: {0}")]
    Spawn(#[from] std::io::Error),

    #[error("worker {0} is no longer running")]
    WorkerDisconnected(usize),

    #[error("all workers stopped without reporting")]
    AllWorkersDisconnected,

    #[error("worker thread panicked")]
    WorkerPanicked,

    #[error("worker {worker} failed: {source}")]
    Worker {
        worker: usize,
        #[source]
        source: Box<Error>,
    },
}
