use crate::batch::TransitionBatch;
use crate::continuous::{ActionBounds, TwinCritic, first_scalar};
use anyhow::Result;
use candle_core::{DType, Device};
use candle_nn::{VarBuilder, VarMap, loss::mse};
use rlsim_candle_lm::distributions::TanhGaussianPolicy;
use rlsim_candle_lm::tensors::{PolicyLoss, StateEncoder, ValueLoss};
use rlsim_candle_lm::{OptimizerWithMaxGrad, TargetNetwork};
use rlsim_core::buffers::ReplayBuffer;
use rlsim_core::{
    Action, Agent, Capabilities, EnvironmentDescription, LearnerCapability, ParamUpdate, State,
    Transition,
};
use tracing::debug;

#[derive(Debug, Clone, PartialEq)]
pub struct SACConfig {
    pub learning_rate: f64,
    pub discount_factor: f32,
    pub tau: f64,
    /// Entropy temperature.
    pub alpha: f32,
    pub buffer_capacity: usize,
    pub batch_size: usize,
    pub hidden: Vec<usize>,
}

impl Default for SACConfig {
    fn default() -> Self {
        Self {
            learning_rate: 3e-4,
            discount_factor: 0.99,
            tau: 0.005,
            alpha: 0.2,
            buffer_capacity: 10_000,
            batch_size: 64,
            hidden: vec![256, 256],
        }
    }
}

struct SACModel {
    critic_varmap: VarMap,
    actor: TanhGaussianPolicy,
    critic: TwinCritic,
    target_critic: TargetNetwork<TwinCritic>,
    actor_optimizer: OptimizerWithMaxGrad,
    critic_optimizer: OptimizerWithMaxGrad,
}

impl SACModel {
    fn build(config: &SACConfig, state_dim: usize, scale: f32, device: &Device) -> Result<Self> {
        let actor_varmap = VarMap::new();
        let critic_varmap = VarMap::new();
        let actor = TanhGaussianPolicy::build(
            state_dim,
            1,
            &config.hidden,
            scale,
            &VarBuilder::from_varmap(&actor_varmap, DType::F32, device),
            "actor",
        )?;
        let critic = TwinCritic::build(
            state_dim,
            &config.hidden,
            &VarBuilder::from_varmap(&critic_varmap, DType::F32, device),
        )?;
        let target_critic = TargetNetwork::build(&critic_varmap, device, |vb| {
            TwinCritic::build(state_dim, &config.hidden, vb)
        })?;
        let actor_optimizer = OptimizerWithMaxGrad::adamw(actor_varmap, config.learning_rate, None)?;
        let critic_optimizer =
            OptimizerWithMaxGrad::adamw(critic_varmap.clone(), config.learning_rate, None)?;
        Ok(Self {
            critic_varmap,
            actor,
            critic,
            target_critic,
            actor_optimizer,
            critic_optimizer,
        })
    }
}

/// Soft actor-critic with a fixed entropy temperature and twin critics.
pub struct SAC {
    config: SACConfig,
    encoder: StateEncoder,
    bounds: ActionBounds,
    device: Device,
    model: SACModel,
    buffer: ReplayBuffer<Transition>,
    last_loss: Option<f32>,
}

impl SAC {
    pub fn new(description: &EnvironmentDescription, config: SACConfig, device: Device) -> Result<Self> {
        let bounds = ActionBounds::from_description(description)?;
        let encoder = StateEncoder::Raw {
            dim: description.state_dim,
        };
        let model = SACModel::build(&config, encoder.dim(), bounds.scale(), &device)?;
        Ok(Self {
            buffer: ReplayBuffer::new(config.buffer_capacity),
            config,
            encoder,
            bounds,
            device,
            model,
            last_loss: None,
        })
    }

    pub fn buffer_len(&self) -> usize {
        self.buffer.len()
    }

    fn train(&mut self) -> Result<()> {
        let transitions = self.buffer.sample(self.config.batch_size);
        let batch = TransitionBatch::new(&transitions, &self.encoder, &self.device)?;
        let actions = batch.continuous_actions()?;
        let alpha = self.config.alpha as f64;

        let (next_actions, next_logp) = self.model.actor.rsample(&batch.next_states)?;
        let next_q = self
            .model
            .target_critic
            .net
            .min_q(&batch.next_states, &next_actions.detach())?;
        let soft_value = (next_q - next_logp.detach().affine(alpha, 0.)?)?;
        let targets = batch.td_target(&soft_value, self.config.discount_factor)?;
        let critic = &self.model.critic;
        let value_loss = ValueLoss(
            (mse(&critic.q1.q(&batch.states, &actions)?, &targets)?
                + mse(&critic.q2.q(&batch.states, &actions)?, &targets)?)?,
        );
        self.model.critic_optimizer.backward_step(&value_loss)?;

        let (policy_actions, logp) = self.model.actor.rsample(&batch.states)?;
        let q = self.model.critic.min_q(&batch.states, &policy_actions)?;
        let policy_loss = PolicyLoss((logp.affine(alpha, 0.)? - q)?.mean_all()?);
        self.model.actor_optimizer.backward_step(&policy_loss)?;

        self.model
            .target_critic
            .soft_update(&self.model.critic_varmap, self.config.tau)?;

        let loss = value_loss.to_scalar::<f32>()?;
        self.last_loss = Some(loss);
        debug!(loss, "sac update");
        Ok(())
    }
}

impl Agent for SAC {
    fn select_action(&mut self, state: &State, training: bool) -> Result<Action> {
        let state = self.encoder.single(state, &self.device)?;
        let action = if training {
            self.model.actor.rsample(&state)?.0
        } else {
            self.model.actor.deterministic(&state)?
        };
        Ok(Action::Continuous(self.bounds.clamp(first_scalar(&action)?)))
    }

    fn update(&mut self, transition: &Transition, _next_action: Option<Action>) -> Result<()> {
        self.encoder.check_transition(transition)?;
        self.buffer.push(transition.clone());
        if self.buffer.has_batch(self.config.batch_size) {
            self.train()?;
        }
        Ok(())
    }

    fn reset(&mut self) -> Result<()> {
        self.model = SACModel::build(
            &self.config,
            self.encoder.dim(),
            self.bounds.scale(),
            &self.device,
        )?;
        self.buffer.clear();
        self.last_loss = None;
        Ok(())
    }

    fn capabilities(&self) -> Capabilities {
        [LearnerCapability::ValueQuery, LearnerCapability::LossQuery]
            .into_iter()
            .collect()
    }

    fn q_values(&self, state: &State) -> Result<Vec<f32>> {
        let state = self.encoder.single(state, &self.device)?;
        let action = self.model.actor.deterministic(&state)?;
        Ok(self.model.critic.min_q(&state, &action)?.to_vec1()?)
    }

    fn loss(&self) -> Option<f32> {
        self.last_loss
    }

    fn apply_params(&mut self, params: &ParamUpdate) -> Result<()> {
        if let Some(lr) = params.learning_rate {
            self.config.learning_rate = lr;
            self.model.actor_optimizer.set_learning_rate(lr);
            self.model.critic_optimizer.set_learning_rate(lr);
        }
        if let Some(gamma) = params.discount_factor {
            self.config.discount_factor = gamma;
        }
        Ok(())
    }
}
