use crate::batch::episode_tensors;
use anyhow::Result;
use candle_core::{DType, Device, Tensor};
use candle_nn::{Module, VarBuilder, VarMap, loss::mse};
use rlsim_candle_lm::distributions::CategoricalPolicy;
use rlsim_candle_lm::learning_module::{LearningModule, ParallelActorCritic, PolicyValuesLosses};
use rlsim_candle_lm::tensors::{Logp, PolicyLoss, StateEncoder, ValueLoss, ValuesPred, vector};
use rlsim_candle_lm::thread_safe_sequential::build_sequential_with;
use rlsim_candle_lm::{Activation, OptimizerWithMaxGrad, ThreadSafeSequential};
use rlsim_core::buffers::{Advantages, EpisodeBuffer};
use rlsim_core::{
    Action, Agent, Capabilities, EnvironmentDescription, LearnerCapability, ParamUpdate, State,
    Transition,
};
use std::ops::Deref;
use tracing::debug;

#[derive(Debug, Clone, PartialEq)]
pub struct PPOConfig {
    pub learning_rate: f64,
    pub discount_factor: f32,
    pub clip_epsilon: f32,
    /// Optimisation passes over each finished episode.
    pub epochs: usize,
    pub hidden: Vec<usize>,
    pub max_grad_norm: Option<f32>,
}

impl Default for PPOConfig {
    fn default() -> Self {
        Self {
            learning_rate: 3e-4,
            discount_factor: 0.99,
            clip_epsilon: 0.2,
            epochs: 4,
            hidden: vec![64, 64],
            max_grad_norm: Some(0.5),
        }
    }
}

struct PPOModel {
    policy: CategoricalPolicy,
    value_net: ThreadSafeSequential,
    learning_module: ParallelActorCritic,
}

impl PPOModel {
    fn build(config: &PPOConfig, input_dim: usize, num_actions: usize, device: &Device) -> Result<Self> {
        let varmap = VarMap::new();
        let vb = VarBuilder::from_varmap(&varmap, DType::F32, device);
        let policy = CategoricalPolicy::build(
            input_dim,
            num_actions,
            &config.hidden,
            Activation::Tanh,
            &vb,
            "policy",
        )?;
        let value_layers: Vec<usize> = config.hidden.iter().copied().chain([1]).collect();
        let value_net = build_sequential_with(input_dim, &value_layers, Activation::Tanh, &vb, "value")?;
        let optimizer =
            OptimizerWithMaxGrad::adamw(varmap, config.learning_rate, config.max_grad_norm)?;
        Ok(Self {
            policy,
            value_net,
            learning_module: ParallelActorCritic { optimizer },
        })
    }

    fn values(&self, states: &Tensor) -> Result<ValuesPred> {
        Ok(ValuesPred(self.value_net.forward(states)?.squeeze(1)?))
    }
}

/// Proximal policy optimisation with a learned value baseline, trained on whole episodes.
pub struct PPO {
    config: PPOConfig,
    encoder: StateEncoder,
    num_actions: usize,
    device: Device,
    model: PPOModel,
    episode: EpisodeBuffer,
    last_loss: Option<f32>,
}

impl PPO {
    pub fn new(description: &EnvironmentDescription, config: PPOConfig, device: Device) -> Result<Self> {
        let encoder = StateEncoder::Raw {
            dim: description.state_dim,
        };
        let num_actions = description.action_size();
        let model = PPOModel::build(&config, encoder.dim(), num_actions, &device)?;
        Ok(Self {
            config,
            encoder,
            num_actions,
            device,
            model,
            episode: EpisodeBuffer::default(),
            last_loss: None,
        })
    }

    pub fn clip_epsilon(&self) -> f32 {
        self.config.clip_epsilon
    }

    fn train_episode(&mut self) -> Result<()> {
        if self.episode.is_empty() {
            return Ok(());
        }
        let (states, actions) = episode_tensors(&self.episode, &self.encoder, &self.device)?;
        let returns = self.episode.discounted_returns(self.config.discount_factor);
        let baseline: Vec<f32> = self.model.values(&states)?.detach().to_vec1()?;
        let mut advantages = Advantages::from_returns(&returns, Some(&baseline));
        advantages.normalize();
        let advantages = vector(advantages.0, &self.device)?;
        let returns = vector(returns.0, &self.device)?;
        let logp_old = self.model.policy.log_probs(&states, &actions)?.detach();
        let clip = self.config.clip_epsilon;
        let mut loss = 0.;
        for _ in 0..self.config.epochs.max(1) {
            let logp = Logp(self.model.policy.log_probs(&states, &actions)?);
            let ratio = (logp.deref() - &logp_old)?.exp()?;
            let clip_adv = (ratio.clamp(1. - clip, 1. + clip)? * &advantages)?;
            let policy_loss = PolicyLoss(
                Tensor::minimum(&(&ratio * &advantages)?, &clip_adv)?
                    .neg()?
                    .mean_all()?,
            );
            let values_pred = self.model.values(&states)?;
            let value_loss = ValueLoss(mse(&values_pred, &returns)?);
            loss = policy_loss.to_scalar::<f32>()? + value_loss.to_scalar::<f32>()?;
            self.model.learning_module.update(PolicyValuesLosses {
                policy_loss,
                value_loss,
            })?;
        }
        self.last_loss = Some(loss);
        debug!(loss, steps = self.episode.len(), "ppo update");
        self.episode.clear();
        Ok(())
    }
}

impl Agent for PPO {
    fn select_action(&mut self, state: &State, training: bool) -> Result<Action> {
        let state = self.encoder.single(state, &self.device)?;
        let action = if training {
            self.model.policy.sample(&state)?
        } else {
            self.model.policy.greedy(&state)?
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
        self.model = PPOModel::build(&self.config, self.encoder.dim(), self.num_actions, &self.device)?;
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
        self.model
            .policy
            .action_probs(&self.encoder.single(state, &self.device)?)
    }

    fn loss(&self) -> Option<f32> {
        self.last_loss
    }

    fn apply_params(&mut self, params: &ParamUpdate) -> Result<()> {
        if let Some(lr) = params.learning_rate {
            self.config.learning_rate = lr;
            self.model.learning_module.set_learning_rate(lr);
        }
        if let Some(gamma) = params.discount_factor {
            self.config.discount_factor = gamma;
        }
        if let Some(clip) = params.clip_epsilon {
            self.config.clip_epsilon = clip;
        }
        Ok(())
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use rlsim_core::{Env, rng};
    use rlsim_gym::CartPole;

    #[test]
    fn full_episode_produces_a_finite_loss() -> Result<()> {
        rng::seed(8);
        let mut env = CartPole::new();
        let mut agent = PPO::new(&env.env_description(), PPOConfig::default(), Device::Cpu)?;
        let mut state = env.reset()?;
        loop {
            let action = agent.select_action(&state, true)?;
            let snapshot = env.step(&action)?;
            let transition = Transition::new(state, action, &snapshot);
            agent.update(&transition, None)?;
            if snapshot.done() {
                break;
            }
            state = snapshot.state;
        }
        assert!(agent.loss().is_some_and(f32::is_finite));
        Ok(())
    }

    #[test]
    fn clip_epsilon_is_configurable() -> Result<()> {
        let env = CartPole::new();
        let mut agent = PPO::new(&env.env_description(), PPOConfig::default(), Device::Cpu)?;
        agent.apply_params(&ParamUpdate {
            clip_epsilon: Some(0.3),
            ..Default::default()
        })?;
        assert_eq!(agent.clip_epsilon(), 0.3);
        Ok(())
    }
}
