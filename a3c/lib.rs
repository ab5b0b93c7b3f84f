pub mod action;
pub mod config;
pub mod env;
pub mod error;
pub mod gradients;
pub mod loss;
pub mod model;
pub mod panic_hook;
pub mod runner;
pub mod schedule;
pub mod shared;
pub mod trainer;
pub mod trajectory;

pub use config::Config;
pub use error::{Error, Result};
pub use model::{ActorCritic, Architecture, ConvActorCritic, ObservationShape};
pub use runner::{ModelRunner, TrainStats};
pub use schedule::LearningRate;
pub use shared::{GlobalParameters, Optimizer};
pub use trainer::{Builder, A3C};
pub use trajectory::{RewardClip, Step, Trajectory};
