pub mod episode_buffer;
pub mod replay_buffer;

pub use episode_buffer::{Advantages, EpisodeBuffer, Returns};
pub use replay_buffer::ReplayBuffer;
