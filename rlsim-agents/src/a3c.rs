use crate::batch::episode_tensors;
use anyhow::Result;
use candle_core::{DType, Device, Tensor};
use candle_nn::{Module, VarBuilder, VarMap, loss::mse};
use rlsim_candle_lm::distributions::CategoricalPolicy;
use rlsim_candle_lm::learning_module::{LearningModule, ParallelActorCritic, PolicyValuesLosses};
use rlsim_candle_lm::tensors::{PolicyLoss, StateEncoder, ValueLoss, vector};
use rlsim_candle_lm::{Activation, OptimizerWithMaxGrad, ThreadSafeSequential, build_sequential};
use rlsim_core::buffers::{Advantages, EpisodeBuffer};
use rlsim_core::{
    Action, Agent, Capabilities, EnvironmentDescription, LearnerCapability, ParamUpdate, State,
    Transition,
};
use tracing::debug;

#[derive(Debug, Clone, PartialEq)]
pub struct A3CConfig {
    pub learning_rate: f64,
    pub discount_factor: f32,
    pub entropy_coef: f32,
    pub hidden: Vec<usize>,
}

impl Default for A3CConfig {
    fn default() -> Self {
        Self {
            learning_rate: 1e-4,
            discount_factor: 0.99,
            entropy_coef: 0.01,
            hidden: vec![64, 64],
        }
    }
}

struct ActorCritic {
    actor: CategoricalPolicy,
    critic: ThreadSafeSequential,
    learning_module: ParallelActorCritic,
}

impl ActorCritic {
    fn build(config: &A3CConfig, input_dim: usize, num_actions: usize, device: &Device) -> Result<Self> {
        let varmap = VarMap::new();
        let vb = VarBuilder::from_varmap(&varmap, DType::F32, device);
        let actor = CategoricalPolicy::build(
            input_dim,
            num_actions,
            &config.hidden,
            Activation::Relu,
            &vb,
            "actor",
        )?;
        let critic_layers: Vec<usize> = config.hidden.iter().copied().chain([1]).collect();
        let critic = build_sequential(input_dim, &critic_layers, &vb, "critic")?;
        let optimizer = OptimizerWithMaxGrad::adamw(varmap, config.learning_rate, None)?;
        Ok(Self {
            actor,
            critic,
            learning_module: ParallelActorCritic { optimizer },
        })
    }

    fn values(&self, states: &Tensor) -> Result<Tensor> {
        Ok(self.critic.forward(states)?.squeeze(1)?)
    }
}

/// Single worker advantage actor-critic with an entropy bonus, updated once per episode.
pub struct A3C {
    config: A3CConfig,
    encoder: StateEncoder,
    num_actions: usize,
    device: Device,
    model: ActorCritic,
    episode: EpisodeBuffer,
    last_loss: Option<f32>,
}

impl A3C {
    pub fn new(description: &EnvironmentDescription, config: A3CConfig, device: Device) -> Result<Self> {
        let encoder = StateEncoder::Raw {
            dim: description.state_dim,
        };
        let num_actions = description.action_size();
        let model = ActorCritic::build(&config, encoder.dim(), num_actions, &device)?;
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

        let logp = self.model.actor.log_probs(&states, &actions)?;
        let entropy = self.model.actor.entropy(&states)?.mean_all()?;
        let policy_loss = (logp * advantages)?.mean_all()?.neg()?;
        let policy_loss = PolicyLoss(
            (policy_loss - entropy.affine(self.config.entropy_coef as f64, 0.)?)?,
        );
        let value_loss = ValueLoss(mse(&self.model.values(&states)?, &returns)?);
        let loss = policy_loss.to_scalar::<f32>()? + value_loss.to_scalar::<f32>()?;
        self.model.learning_module.update(PolicyValuesLosses {
            policy_loss,
            value_loss,
        })?;
        self.last_loss = Some(loss);
        debug!(loss, steps = self.episode.len(), "a3c update");
        self.episode.clear();
        Ok(())
    }
}

impl Agent for A3C {
    fn select_action(&mut self, state: &State, training: bool) -> Result<Action> {
        let state = self.encoder.single(state, &self.device)?;
        let action = if training {
            self.model.actor.sample(&state)?
        } else {
            self.model.actor.greedy(&state)?
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
        self.model =
            ActorCritic::build(&self.config, self.encoder.dim(), self.num_actions, &self.device)?;
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
            .actor
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
        Ok(())
    }
}
