mod angle;
pub mod cartpole;
pub mod gridworld;
pub mod pendulum;

pub use cartpole::CartPole;
pub use gridworld::{Cell, GridAction, GridWorld, RewardConfig};
pub use pendulum::Pendulum;
