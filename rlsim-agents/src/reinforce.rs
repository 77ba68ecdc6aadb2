use crate::batch::episode_tensors;
use anyhow::Result;
use candle_core::{DType, Device};
use candle_nn::{VarBuilder, VarMap};
use rlsim_candle_lm::distributions::CategoricalPolicy;
use rlsim_candle_lm::learning_module::{LearningModule, PolicyOnly};
use rlsim_candle_lm::tensors::{PolicyLoss, StateEncoder, vector};
use rlsim_candle_lm::{Activation, OptimizerWithMaxGrad};
use rlsim_core::buffers::{Advantages, EpisodeBuffer};
use rlsim_core::{
    Action, Agent, Capabilities, EnvironmentDescription, LearnerCapability, ParamUpdate, State,
    Transition,
};
use tracing::debug;

#[derive(Debug, Clone, PartialEq)]
pub struct ReinforceConfig {
    pub learning_rate: f64,
    pub discount_factor: f32,
    pub hidden: Vec<usize>,
}

impl Default for ReinforceConfig {
    fn default() -> Self {
        Self {
            learning_rate: 0.01,
            discount_factor: 0.99,
            hidden: vec![32, 32],
        }
    }
}

/// Monte Carlo policy gradient, one update per finished episode.
pub struct Reinforce {
    config: ReinforceConfig,
    encoder: StateEncoder,
    num_actions: usize,
    device: Device,
    policy: CategoricalPolicy,
    learning_module: PolicyOnly,
    episode: EpisodeBuffer,
    last_loss: Option<f32>,
}

impl Reinforce {
    pub fn new(
        description: &EnvironmentDescription,
        config: ReinforceConfig,
        device: Device,
    ) -> Result<Self> {
        let encoder = StateEncoder::Raw {
            dim: description.state_dim,
        };
        let num_actions = description.action_size();
        let (policy, learning_module) = Self::build(&config, &encoder, num_actions, &device)?;
        Ok(Self {
            config,
            encoder,
            num_actions,
            device,
            policy,
            learning_module,
            episode: EpisodeBuffer::default(),
            last_loss: None,
        })
    }

    fn build(
        config: &ReinforceConfig,
        encoder: &StateEncoder,
        num_actions: usize,
        device: &Device,
    ) -> Result<(CategoricalPolicy, PolicyOnly)> {
        let varmap = VarMap::new();
        let vb = VarBuilder::from_varmap(&varmap, DType::F32, device);
        let policy = CategoricalPolicy::build(
            encoder.dim(),
            num_actions,
            &config.hidden,
            Activation::Relu,
            &vb,
            "policy",
        )?;
        let optimizer = OptimizerWithMaxGrad::adamw(varmap, config.learning_rate, None)?;
        Ok((policy, PolicyOnly { optimizer }))
    }

    pub fn episode_len(&self) -> usize {
        self.episode.len()
    }

    fn train_episode(&mut self) -> Result<()> {
        if self.episode.is_empty() {
            return Ok(());
        }
        let returns = self.episode.discounted_returns(self.config.discount_factor);
        let mut advantages = Advantages::from_returns(&returns, None);
        advantages.normalize();
        let (states, actions) = episode_tensors(&self.episode, &self.encoder, &self.device)?;
        let advantages = vector(advantages.0, &self.device)?;
        let logp = self.policy.log_probs(&states, &actions)?;
        let policy_loss = PolicyLoss((logp * advantages)?.mean_all()?.neg()?);
        let loss = policy_loss.to_scalar::<f32>()?;
        self.learning_module.update(policy_loss)?;
        self.last_loss = Some(loss);
        debug!(loss, steps = self.episode.len(), "reinforce update");
        self.episode.clear();
        Ok(())
    }
}

impl Agent for Reinforce {
    fn select_action(&mut self, state: &State, training: bool) -> Result<Action> {
        let state = self.encoder.single(state, &self.device)?;
        let action = if training {
            self.policy.sample(&state)?
        } else {
            self.policy.greedy(&state)?
        };
        Ok(Action::Discrete(action))
    }

    fn update(&mut self, transition: &Transition, _next_action: Option<Action>) -> Result<()> {
        self.encoder.check_transition(transition)?;
        self.episode.push(
            transition.state.clone(),
            transition.action,
            transition.reward,
        );
        if transition.done {
            self.train_episode()?;
        }
        Ok(())
    }

    fn reset(&mut self) -> Result<()> {
        let (policy, learning_module) =
            Self::build(&self.config, &self.encoder, self.num_actions, &self.device)?;
        self.policy = policy;
        self.learning_module = learning_module;
        self.episode.clear();
        self.last_loss = None;
        Ok(())
    }

    fn capabilities(&self) -> Capabilities {
        [LearnerCapability::PolicyQuery, LearnerCapability::LossQuery]
            .into_iter()
            .collect()
    }

    fn policy_probabilities(&self, state: &State, _temperature: f32) -> Result<Vec<f32>> {
        self.policy
            .action_probs(&self.encoder.single(state, &self.device)?)
    }

    fn loss(&self) -> Option<f32> {
        self.last_loss
    }

    fn apply_params(&mut self, params: &ParamUpdate) -> Result<()> {
        if let Some(lr) = params.learning_rate {
            self.config.learning_rate = lr;
            self.learning_module.set_learning_rate(lr);
        }
        if let Some(gamma) = params.discount_factor {
            self.config.discount_factor = gamma;
        }
        Ok(())
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use rlsim_core::Space;

    fn description() -> EnvironmentDescription {
        EnvironmentDescription::new(Space::continuous_from_dims(vec![4]), Space::Discrete(2), 4)
    }

    fn transition(done: bool) -> Transition {
        Transition {
            state: State::new(vec![0.01, 0., -0.02, 0.]),
            action: Action::Discrete(1),
            reward: 1.,
            next_state: State::new(vec![0.01, 0.1, -0.02, -0.1]),
            terminated: done,
            done,
        }
    }

    #[test]
    fn learns_only_at_the_end_of_an_episode() -> Result<()> {
        let mut agent = Reinforce::new(&description(), ReinforceConfig::default(), Device::Cpu)?;
        for _ in 0..5 {
            agent.update(&transition(false), None)?;
        }
        assert_eq!(agent.loss(), None);
        assert_eq!(agent.episode_len(), 5);
        agent.update(&transition(true), None)?;
        assert!(agent.loss().is_some_and(f32::is_finite));
        assert_eq!(agent.episode_len(), 0);
        Ok(())
    }

    #[test]
    fn exposes_a_probability_distribution() -> Result<()> {
        let mut agent = Reinforce::new(&description(), ReinforceConfig::default(), Device::Cpu)?;
        let state = State::new(vec![0., 0., 0., 0.]);
        let probs = agent.policy_probabilities(&state, 1.)?;
        assert_eq!(probs.len(), 2);
        assert!((probs.iter().sum::<f32>() - 1.).abs() < 1e-5);
        assert!(matches!(
            agent.select_action(&state, true)?,
            Action::Discrete(0 | 1)
        ));
        Ok(())
    }
}
