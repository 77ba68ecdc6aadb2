use anyhow::Result;
use candle_core::{Device, Tensor};
use rlsim_candle_lm::tensors::{StateEncoder, column, indices, vector};
use rlsim_core::buffers::EpisodeBuffer;
use rlsim_core::{Action, Transition};

/// A mini-batch of transitions laid out as tensors.
pub struct TransitionBatch {
    pub states: Tensor,
    pub next_states: Tensor,
    /// Shape `(batch,)`.
    pub rewards: Tensor,
    /// `0.` for transitions that reached a terminal state, `1.` otherwise. Truncated
    /// transitions keep `1.`. Shape `(batch,)`.
    pub not_terminated: Tensor,
    actions: Vec<Action>,
    device: Device,
}

impl TransitionBatch {
    pub fn new(transitions: &[&Transition], encoder: &StateEncoder, device: &Device) -> Result<Self> {
        let states = encoder.batch(transitions.iter().map(|t| &t.state), device)?;
        let next_states = encoder.batch(transitions.iter().map(|t| &t.next_state), device)?;
        let rewards = vector(transitions.iter().map(|t| t.reward).collect(), device)?;
        let not_terminated = vector(
            transitions
                .iter()
                .map(|t| if t.terminated { 0. } else { 1. })
                .collect(),
            device,
        )?;
        Ok(Self {
            states,
            next_states,
            rewards,
            not_terminated,
            actions: transitions.iter().map(|t| t.action).collect(),
            device: device.clone(),
        })
    }

    /// u32 indices of shape `(batch,)`.
    pub fn discrete_actions(&self) -> Result<Tensor> {
        let actions = self
            .actions
            .iter()
            .map(|a| a.discrete())
            .collect::<Result<Vec<_>, _>>()?;
        indices(actions, &self.device)
    }

    /// Shape `(batch, 1)`.
    pub fn continuous_actions(&self) -> Result<Tensor> {
        let actions = self
            .actions
            .iter()
            .map(|a| a.continuous())
            .collect::<Result<Vec<_>, _>>()?;
        column(actions, &self.device)
    }

    /// `rewards + gamma * not_terminated * next_values`, detached from the graph.
    pub fn td_target(&self, next_values: &Tensor, gamma: f32) -> Result<Tensor> {
        let bootstrap = (next_values * &self.not_terminated)?.affine(gamma as f64, 0.)?;
        Ok((&self.rewards + bootstrap)?.detach())
    }
}

/// Encoded states of shape `(len, dim)` and u32 actions of shape `(len,)` of a finished episode.
pub fn episode_tensors(
    episode: &EpisodeBuffer,
    encoder: &StateEncoder,
    device: &Device,
) -> Result<(Tensor, Tensor)> {
    let states = encoder.batch(episode.states.iter(), device)?;
    let actions = episode
        .actions
        .iter()
        .map(|a| a.discrete())
        .collect::<Result<Vec<_>, _>>()?;
    Ok((states, indices(actions, device)?))
}
