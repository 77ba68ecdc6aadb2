use crate::env::{Action, State, Transition};
use crate::error::CoreError;
use anyhow::Result;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LearnerCapability {
    /// Per action values can be read for any state.
    ValueQuery,
    /// The agent reports the loss of its last update.
    LossQuery,
    /// Action probabilities can be read for any state.
    PolicyQuery,
}

impl LearnerCapability {
    fn bit(self) -> u8 {
        match self {
            Self::ValueQuery => 1,
            Self::LossQuery => 1 << 1,
            Self::PolicyQuery => 1 << 2,
        }
    }
}

/// The set of optional queries an agent answers. Captured once when the agent is built.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Capabilities(u8);

impl Capabilities {
    pub fn with(self, capability: LearnerCapability) -> Self {
        Self(self.0 | capability.bit())
    }

    pub fn contains(&self, capability: LearnerCapability) -> bool {
        self.0 & capability.bit() != 0
    }
}

impl FromIterator<LearnerCapability> for Capabilities {
    fn from_iter<T: IntoIterator<Item = LearnerCapability>>(iter: T) -> Self {
        iter.into_iter()
            .fold(Capabilities::default(), |caps, c| caps.with(c))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpdateOrder {
    /// The transition is learned from as soon as the environment stepped.
    Immediate,
    /// The transition is held back until the next action has been selected, so the update can
    /// bootstrap from the action the agent actually takes.
    DeferredOnPolicy,
}

/// Partial hyperparameter change. Fields left as `None` keep their current value.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ParamUpdate {
    pub learning_rate: Option<f64>,
    pub discount_factor: Option<f32>,
    pub epsilon: Option<f32>,
    pub clip_epsilon: Option<f32>,
}

impl ParamUpdate {
    pub fn is_empty(&self) -> bool {
        self == &Self::default()
    }
}

pub trait Agent {
    fn select_action(&mut self, state: &State, training: bool) -> Result<Action>;

    /// Learns from one transition. `next_action` is only provided to agents whose
    /// `update_order` is `DeferredOnPolicy`, and is `None` on the final transition of an episode.
    fn update(&mut self, transition: &Transition, next_action: Option<Action>) -> Result<()>;

    /// Drops everything learned so far.
    fn reset(&mut self) -> Result<()>;

    fn capabilities(&self) -> Capabilities;

    fn update_order(&self) -> UpdateOrder {
        UpdateOrder::Immediate
    }

    fn q_values(&self, _state: &State) -> Result<Vec<f32>> {
        Err(CoreError::Unsupported(LearnerCapability::ValueQuery).into())
    }

    fn policy_probabilities(&self, _state: &State, _temperature: f32) -> Result<Vec<f32>> {
        Err(CoreError::Unsupported(LearnerCapability::PolicyQuery).into())
    }

    fn loss(&self) -> Option<f32> {
        None
    }

    fn apply_params(&mut self, params: &ParamUpdate) -> Result<()>;
}

impl<A: Agent + ?Sized> Agent for Box<A> {
    fn select_action(&mut self, state: &State, training: bool) -> Result<Action> {
        (**self).select_action(state, training)
    }

    fn update(&mut self, transition: &Transition, next_action: Option<Action>) -> Result<()> {
        (**self).update(transition, next_action)
    }

    fn reset(&mut self) -> Result<()> {
        (**self).reset()
    }

    fn capabilities(&self) -> Capabilities {
        (**self).capabilities()
    }

    fn update_order(&self) -> UpdateOrder {
        (**self).update_order()
    }

    fn q_values(&self, state: &State) -> Result<Vec<f32>> {
        (**self).q_values(state)
    }

    fn policy_probabilities(&self, state: &State, temperature: f32) -> Result<Vec<f32>> {
        (**self).policy_probabilities(state, temperature)
    }

    fn loss(&self) -> Option<f32> {
        (**self).loss()
    }

    fn apply_params(&mut self, params: &ParamUpdate) -> Result<()> {
        (**self).apply_params(params)
    }
}

/// Temperature softmax, used to turn action values into a policy.
pub fn softmax(values: &[f32], temperature: f32) -> Vec<f32> {
    let temperature = temperature.max(1e-6);
    let max = values.iter().copied().fold(f32::NEG_INFINITY, f32::max);
    let exps: Vec<f32> = values
        .iter()
        .map(|v| ((v - max) / temperature).exp())
        .collect();
    let sum: f32 = exps.iter().sum();
    exps.into_iter().map(|e| e / sum).collect()
}

/// Index of a maximal value, ties broken uniformly at random.
pub fn argmax_random_tie(values: &[f32]) -> usize {
    let max = values.iter().copied().fold(f32::NEG_INFINITY, f32::max);
    let best: Vec<usize> = values
        .iter()
        .enumerate()
        .filter(|(_, v)| **v == max)
        .map(|(idx, _)| idx)
        .collect();
    match best.len() {
        0 => 0,
        1 => best[0],
        n => best[crate::rng::index(n)],
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn capabilities_collect_into_bitset() {
        let caps: Capabilities = [LearnerCapability::ValueQuery, LearnerCapability::LossQuery]
            .into_iter()
            .collect();
        assert!(caps.contains(LearnerCapability::ValueQuery));
        assert!(caps.contains(LearnerCapability::LossQuery));
        assert!(!caps.contains(LearnerCapability::PolicyQuery));
    }

    #[test]
    fn softmax_sharpens_with_low_temperature() {
        let warm = softmax(&[1., 2.], 1.);
        let cold = softmax(&[1., 2.], 0.1);
        assert!((warm.iter().sum::<f32>() - 1.).abs() < 1e-5);
        assert!(cold[1] > warm[1]);
    }

    #[test]
    fn argmax_breaks_ties_among_maxima_only() {
        crate::rng::seed(11);
        for _ in 0..50 {
            let idx = argmax_random_tie(&[0., 3., 1., 3.]);
            assert!(idx == 1 || idx == 3);
        }
    }
}
