use crate::agents::LearnerCapability;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum CoreError {
    #[error("algorithm `{algorithm}` cannot be paired with environment `{environment}`")]
    IncompatiblePairing {
        algorithm: String,
        environment: String,
    },
    #[error("unknown environment `{0}`")]
    UnknownEnvironment(String),
    #[error("unknown algorithm `{0}`")]
    UnknownAlgorithm(String),
    #[error("expected a state of dimension {expected}, got {actual}")]
    StateDimension { expected: usize, actual: usize },
    #[error("state {0:?} is outside the observation space")]
    StateOutOfSpace(Vec<f32>),
    #[error("expected a {expected} action")]
    ActionKind { expected: &'static str },
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),
    #[error("{0:?} is not supported by this agent")]
    Unsupported(LearnerCapability),
}
