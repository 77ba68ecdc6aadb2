pub mod agents;
pub mod buffers;
pub mod env;
pub mod error;
pub mod rng;

pub use agents::{Agent, Capabilities, LearnerCapability, ParamUpdate, UpdateOrder};
pub use env::{Action, Env, EnvironmentDescription, SnapShot, Space, State, Transition};
pub use error::CoreError;
