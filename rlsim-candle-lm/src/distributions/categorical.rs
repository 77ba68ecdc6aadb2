use crate::thread_safe_sequential::{Activation, ThreadSafeSequential, build_sequential_with};
use anyhow::Result;
use candle_core::{D, Tensor};
use candle_nn::ops::{log_softmax, softmax};
use candle_nn::{Module, VarBuilder};
use rlsim_core::rng;

#[derive(Clone, Debug)]
pub struct CategoricalPolicy {
    action_size: usize,
    logits: ThreadSafeSequential,
}

impl CategoricalPolicy {
    pub fn build(
        input_dim: usize,
        action_size: usize,
        hidden: &[usize],
        activation: Activation,
        vb: &VarBuilder,
        prefix: &str,
    ) -> Result<Self> {
        let layers: Vec<usize> = hidden.iter().copied().chain([action_size]).collect();
        let logits = build_sequential_with(input_dim, &layers, activation, vb, prefix)?;
        Ok(Self {
            action_size,
            logits,
        })
    }

    pub fn action_size(&self) -> usize {
        self.action_size
    }

    /// Shape `(batch, action_size)`.
    pub fn probs(&self, states: &Tensor) -> Result<Tensor> {
        Ok(softmax(&self.logits.forward(states)?, D::Minus1)?)
    }

    /// Action probabilities of a single encoded state of shape `(1, dim)`.
    pub fn action_probs(&self, state: &Tensor) -> Result<Vec<f32>> {
        Ok(self.probs(state)?.squeeze(0)?.to_vec1()?)
    }

    pub fn sample(&self, state: &Tensor) -> Result<usize> {
        Ok(rng::weighted_index(&self.action_probs(state)?))
    }

    pub fn greedy(&self, state: &Tensor) -> Result<usize> {
        Ok(rlsim_core::agents::argmax_random_tie(
            &self.action_probs(state)?,
        ))
    }

    /// Log probability of `actions` (u32, shape `(batch,)`) under the current policy.
    pub fn log_probs(&self, states: &Tensor, actions: &Tensor) -> Result<Tensor> {
        let log_probs = log_softmax(&self.logits.forward(states)?, D::Minus1)?;
        Ok(log_probs.gather(&actions.unsqueeze(1)?, 1)?.squeeze(1)?)
    }

    /// Per state entropy, shape `(batch,)`.
    pub fn entropy(&self, states: &Tensor) -> Result<Tensor> {
        let logits = self.logits.forward(states)?;
        let log_probs = log_softmax(&logits, D::Minus1)?;
        let probs = softmax(&logits, D::Minus1)?;
        Ok((probs * log_probs)?.sum(1)?.neg()?)
    }
}
