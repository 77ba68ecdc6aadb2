use anyhow::Result;
use rlsim_core::agents::{argmax_random_tie, softmax};
use rlsim_core::{
    Action, Agent, Capabilities, CoreError, EnvironmentDescription, LearnerCapability,
    ParamUpdate, Space, State, Transition, UpdateOrder, rng,
};
use std::collections::HashMap;
use tracing::debug;

/// Which estimate of the next state's value the temporal difference target bootstraps from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TdTarget {
    /// `max_a Q(s', a)`
    QLearning,
    /// `Q(s', a')` for the action actually selected next.
    Sarsa,
    /// Expectation of `Q(s', .)` under the epsilon greedy policy.
    ExpectedSarsa,
}

#[derive(Debug, Clone, PartialEq)]
pub struct TabularConfig {
    pub learning_rate: f32,
    pub discount_factor: f32,
    pub epsilon: f32,
}

impl Default for TabularConfig {
    fn default() -> Self {
        Self {
            learning_rate: 0.1,
            discount_factor: 0.95,
            epsilon: 0.1,
        }
    }
}

pub struct TabularAgent {
    target: TdTarget,
    config: TabularConfig,
    observation_space: Space,
    state_dim: usize,
    num_actions: usize,
    table: HashMap<usize, Vec<f32>>,
    last_loss: Option<f32>,
}

impl TabularAgent {
    pub fn new(
        target: TdTarget,
        description: &EnvironmentDescription,
        config: TabularConfig,
    ) -> Result<Self> {
        if !description.observation_space.is_discrete() {
            return Err(CoreError::InvalidConfig(
                "tabular agents need a discrete observation space".to_string(),
            )
            .into());
        }
        Ok(Self {
            target,
            config,
            observation_space: description.observation_space.clone(),
            state_dim: description.state_dim,
            num_actions: description.action_size(),
            table: HashMap::new(),
            last_loss: None,
        })
    }

    pub fn q_learning(description: &EnvironmentDescription, config: TabularConfig) -> Result<Self> {
        Self::new(TdTarget::QLearning, description, config)
    }

    pub fn sarsa(description: &EnvironmentDescription, config: TabularConfig) -> Result<Self> {
        Self::new(TdTarget::Sarsa, description, config)
    }

    pub fn expected_sarsa(
        description: &EnvironmentDescription,
        config: TabularConfig,
    ) -> Result<Self> {
        Self::new(TdTarget::ExpectedSarsa, description, config)
    }

    pub fn config(&self) -> &TabularConfig {
        &self.config
    }

    /// Number of states visited so far.
    pub fn visited(&self) -> usize {
        self.table.len()
    }

    fn key(&self, state: &State) -> Result<usize> {
        state.check_len(self.state_dim)?;
        self.observation_space
            .index_of(state)
            .ok_or_else(|| CoreError::StateOutOfSpace(state.values().to_vec()).into())
    }

    fn values(&self, key: usize) -> Vec<f32> {
        self.table
            .get(&key)
            .cloned()
            .unwrap_or_else(|| vec![0.; self.num_actions])
    }

    fn expected_value(&self, values: &[f32]) -> f32 {
        let n = values.len() as f32;
        let max = values.iter().copied().fold(f32::NEG_INFINITY, f32::max);
        let best = values.iter().filter(|v| **v == max).count() as f32;
        values
            .iter()
            .map(|v| {
                let greedy = if *v == max {
                    (1. - self.config.epsilon) / best
                } else {
                    0.
                };
                (self.config.epsilon / n + greedy) * v
            })
            .sum()
    }

    fn bootstrap(&self, transition: &Transition, next_action: Option<Action>) -> Result<f32> {
        let next = self.values(self.key(&transition.next_state)?);
        if transition.terminated {
            return Ok(0.);
        }
        let value = match self.target {
            TdTarget::QLearning => next.iter().copied().fold(f32::NEG_INFINITY, f32::max),
            TdTarget::Sarsa => match next_action {
                Some(action) => next[action.discrete()?],
                // A truncated episode has no next action to follow.
                None => self.expected_value(&next),
            },
            TdTarget::ExpectedSarsa => self.expected_value(&next),
        };
        Ok(value)
    }
}

impl Agent for TabularAgent {
    fn select_action(&mut self, state: &State, training: bool) -> Result<Action> {
        state.check_len(self.state_dim)?;
        if training && rng::chance(self.config.epsilon) {
            return Ok(Action::Discrete(rng::index(self.num_actions)));
        }
        let values = self.values(self.key(state)?);
        Ok(Action::Discrete(argmax_random_tie(&values)))
    }

    fn update(&mut self, transition: &Transition, next_action: Option<Action>) -> Result<()> {
        let key = self.key(&transition.state)?;
        let action = transition.action.discrete()?;
        let next_value = self.bootstrap(transition, next_action)?;
        let target = transition.reward + self.config.discount_factor * next_value;
        let num_actions = self.num_actions;
        let row = self
            .table
            .entry(key)
            .or_insert_with(|| vec![0.; num_actions]);
        let current = row[action];
        row[action] = current + self.config.learning_rate * (target - current);
        self.last_loss = Some((target - current).abs());
        debug!(state = key, action, target, "tabular update");
        Ok(())
    }

    fn reset(&mut self) -> Result<()> {
        self.table.clear();
        self.last_loss = None;
        Ok(())
    }

    fn capabilities(&self) -> Capabilities {
        [
            LearnerCapability::ValueQuery,
            LearnerCapability::LossQuery,
            LearnerCapability::PolicyQuery,
        ]
        .into_iter()
        .collect()
    }

    fn update_order(&self) -> UpdateOrder {
        match self.target {
            TdTarget::Sarsa => UpdateOrder::DeferredOnPolicy,
            TdTarget::QLearning | TdTarget::ExpectedSarsa => UpdateOrder::Immediate,
        }
    }

    fn q_values(&self, state: &State) -> Result<Vec<f32>> {
        Ok(self.values(self.key(state)?))
    }

    fn policy_probabilities(&self, state: &State, temperature: f32) -> Result<Vec<f32>> {
        Ok(softmax(&self.q_values(state)?, temperature))
    }

    fn loss(&self) -> Option<f32> {
        self.last_loss
    }

    fn apply_params(&mut self, params: &ParamUpdate) -> Result<()> {
        if let Some(lr) = params.learning_rate {
            self.config.learning_rate = lr as f32;
        }
        if let Some(gamma) = params.discount_factor {
            self.config.discount_factor = gamma;
        }
        if let Some(epsilon) = params.epsilon {
            self.config.epsilon = epsilon;
        }
        Ok(())
    }
}
