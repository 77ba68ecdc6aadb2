pub mod a3c;
pub mod batch;
pub mod continuous;
pub mod ddpg;
pub mod dqn;
pub mod ppo;
pub mod reinforce;
pub mod sac;
pub mod tabular;
pub mod td3;

pub use a3c::{A3C, A3CConfig};
pub use ddpg::{DDPG, DDPGConfig};
pub use dqn::{DQN, DQNConfig};
pub use ppo::{PPO, PPOConfig};
pub use reinforce::{Reinforce, ReinforceConfig};
pub use sac::{SAC, SACConfig};
pub use tabular::{TabularAgent, TabularConfig, TdTarget};
pub use td3::{TD3, TD3Config};
