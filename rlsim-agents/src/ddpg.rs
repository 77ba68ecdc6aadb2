use crate::batch::TransitionBatch;
use crate::continuous::{ActionBounds, Critic, DeterministicActor, first_scalar};
use anyhow::Result;
use candle_core::{DType, Device};
use candle_nn::{VarBuilder, VarMap, loss::mse};
use rlsim_candle_lm::tensors::{PolicyLoss, StateEncoder, ValueLoss};
use rlsim_candle_lm::{OptimizerWithMaxGrad, TargetNetwork};
use rlsim_core::buffers::ReplayBuffer;
use rlsim_core::{
    Action, Agent, Capabilities, EnvironmentDescription, LearnerCapability, ParamUpdate, State,
    Transition, rng,
};
use tracing::debug;

#[derive(Debug, Clone, PartialEq)]
pub struct DDPGConfig {
    pub learning_rate: f64,
    pub discount_factor: f32,
    pub tau: f64,
    /// Standard deviation of the exploration noise, relative to the action scale.
    pub exploration_noise: f32,
    pub buffer_capacity: usize,
    pub batch_size: usize,
    pub hidden: Vec<usize>,
}

impl Default for DDPGConfig {
    fn default() -> Self {
        Self {
            learning_rate: 1e-3,
            discount_factor: 0.99,
            tau: 0.005,
            exploration_noise: 0.1,
            buffer_capacity: 10_000,
            batch_size: 64,
            hidden: vec![64, 64],
        }
    }
}

struct DDPGModel {
    actor_varmap: VarMap,
    critic_varmap: VarMap,
    actor: DeterministicActor,
    critic: Critic,
    target_actor: TargetNetwork<DeterministicActor>,
    target_critic: TargetNetwork<Critic>,
    actor_optimizer: OptimizerWithMaxGrad,
    critic_optimizer: OptimizerWithMaxGrad,
}

impl DDPGModel {
    fn build(config: &DDPGConfig, state_dim: usize, scale: f32, device: &Device) -> Result<Self> {
        let actor_varmap = VarMap::new();
        let critic_varmap = VarMap::new();
        let actor = DeterministicActor::build(
            state_dim,
            &config.hidden,
            scale,
            &VarBuilder::from_varmap(&actor_varmap, DType::F32, device),
        )?;
        let critic = Critic::build(
            state_dim,
            &config.hidden,
            &VarBuilder::from_varmap(&critic_varmap, DType::F32, device),
            "critic",
        )?;
        let target_actor = TargetNetwork::build(&actor_varmap, device, |vb| {
            DeterministicActor::build(state_dim, &config.hidden, scale, vb)
        })?;
        let target_critic = TargetNetwork::build(&critic_varmap, device, |vb| {
            Critic::build(state_dim, &config.hidden, vb, "critic")
        })?;
        let actor_optimizer =
            OptimizerWithMaxGrad::adamw(actor_varmap.clone(), config.learning_rate, None)?;
        let critic_optimizer =
            OptimizerWithMaxGrad::adamw(critic_varmap.clone(), config.learning_rate, None)?;
        Ok(Self {
            actor_varmap,
            critic_varmap,
            actor,
            critic,
            target_actor,
            target_critic,
            actor_optimizer,
            critic_optimizer,
        })
    }
}

/// Deep deterministic policy gradient for a scalar continuous action.
pub struct DDPG {
    config: DDPGConfig,
    encoder: StateEncoder,
    bounds: ActionBounds,
    device: Device,
    model: DDPGModel,
    buffer: ReplayBuffer<Transition>,
    last_loss: Option<f32>,
}

impl DDPG {
    pub fn new(description: &EnvironmentDescription, config: DDPGConfig, device: Device) -> Result<Self> {
        let bounds = ActionBounds::from_description(description)?;
        let encoder = StateEncoder::Raw {
            dim: description.state_dim,
        };
        let model = DDPGModel::build(&config, encoder.dim(), bounds.scale(), &device)?;
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

        let next_actions = self.model.target_actor.net.act(&batch.next_states)?;
        let next_q = self
            .model
            .target_critic
            .net
            .q(&batch.next_states, &next_actions)?;
        let targets = batch.td_target(&next_q, self.config.discount_factor)?;
        let value_loss = ValueLoss(mse(&self.model.critic.q(&batch.states, &actions)?, &targets)?);
        self.model.critic_optimizer.backward_step(&value_loss)?;

        let policy_actions = self.model.actor.act(&batch.states)?;
        let policy_loss = PolicyLoss(
            self.model
                .critic
                .q(&batch.states, &policy_actions)?
                .mean_all()?
                .neg()?,
        );
        self.model.actor_optimizer.backward_step(&policy_loss)?;

        self.model
            .target_actor
            .soft_update(&self.model.actor_varmap, self.config.tau)?;
        self.model
            .target_critic
            .soft_update(&self.model.critic_varmap, self.config.tau)?;

        let loss = value_loss.to_scalar::<f32>()?;
        self.last_loss = Some(loss);
        debug!(loss, "ddpg update");
        Ok(())
    }
}

impl Agent for DDPG {
    fn select_action(&mut self, state: &State, training: bool) -> Result<Action> {
        let state = self.encoder.single(state, &self.device)?;
        let mut action = first_scalar(&self.model.actor.act(&state)?)?;
        if training {
            action += rng::gaussian(self.config.exploration_noise * self.bounds.scale());
        }
        Ok(Action::Continuous(self.bounds.clamp(action)))
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
        self.model = DDPGModel::build(
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

    /// `[Q(s, mu(s))]`
    fn q_values(&self, state: &State) -> Result<Vec<f32>> {
        let state = self.encoder.single(state, &self.device)?;
        let action = self.model.actor.act(&state)?;
        Ok(self.model.critic.q(&state, &action)?.to_vec1()?)
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
