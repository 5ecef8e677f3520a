// Errors of the training and evaluation runs.
use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    // Rejected before any episode is simulated.
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    // The environment reported a state that was never enumerated.
    #[error("Unknown state {0}: not part of the enumerated state space")]
    UnknownState(String),

    #[error("Reward {reward} is outside of the allowed set {allowed:?}")]
    InvalidReward { reward: f64, allowed: Vec<f64> },

    #[error("Environment error: {0}")]
    Environment(String),

    #[error("Failed to render report: {0}")]
    Report(String),
}

pub type Result<T> = std::result::Result<T, Error>;
