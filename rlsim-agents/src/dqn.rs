use crate::batch::TransitionBatch;
use anyhow::Result;
use candle_core::{DType, Device};
use candle_nn::{Module, VarBuilder, VarMap, loss::mse};
use rlsim_candle_lm::tensors::StateEncoder;
use rlsim_candle_lm::{OptimizerWithMaxGrad, TargetNetwork, ThreadSafeSequential, build_sequential};
use rlsim_core::agents::{argmax_random_tie, softmax};
use rlsim_core::buffers::ReplayBuffer;
use rlsim_core::{
    Action, Agent, Capabilities, EnvironmentDescription, LearnerCapability, ParamUpdate, State,
    Transition, rng,
};
use tracing::debug;

#[derive(Debug, Clone, PartialEq)]
pub struct DQNConfig {
    pub learning_rate: f64,
    pub discount_factor: f32,
    pub epsilon: f32,
    pub epsilon_decay: f32,
    pub epsilon_min: f32,
    pub buffer_capacity: usize,
    pub batch_size: usize,
    /// Training steps between two hard target syncs.
    pub target_sync_every: usize,
    pub hidden: Vec<usize>,
    pub max_grad_norm: Option<f32>,
}

impl Default for DQNConfig {
    fn default() -> Self {
        Self {
            learning_rate: 1e-3,
            discount_factor: 0.95,
            epsilon: 0.1,
            epsilon_decay: 0.995,
            epsilon_min: 0.01,
            buffer_capacity: 1000,
            batch_size: 32,
            target_sync_every: 10,
            hidden: vec![64, 64],
            max_grad_norm: None,
        }
    }
}

struct QNetworks {
    varmap: VarMap,
    q_net: ThreadSafeSequential,
    target: TargetNetwork<ThreadSafeSequential>,
    optimizer: OptimizerWithMaxGrad,
}

impl QNetworks {
    fn build(config: &DQNConfig, input_dim: usize, num_actions: usize, device: &Device) -> Result<Self> {
        let layers: Vec<usize> = config.hidden.iter().copied().chain([num_actions]).collect();
        let varmap = VarMap::new();
        let vb = VarBuilder::from_varmap(&varmap, DType::F32, device);
        let q_net = build_sequential(input_dim, &layers, &vb, "q")?;
        let target = TargetNetwork::build(&varmap, device, |vb| {
            build_sequential(input_dim, &layers, vb, "q")
        })?;
        let optimizer =
            OptimizerWithMaxGrad::adamw(varmap.clone(), config.learning_rate, config.max_grad_norm)?;
        Ok(Self {
            varmap,
            q_net,
            target,
            optimizer,
        })
    }
}

pub struct DQN {
    config: DQNConfig,
    encoder: StateEncoder,
    num_actions: usize,
    device: Device,
    networks: QNetworks,
    buffer: ReplayBuffer<Transition>,
    epsilon: f32,
    train_steps: usize,
    last_loss: Option<f32>,
}

impl DQN {
    pub fn new(description: &EnvironmentDescription, config: DQNConfig, device: Device) -> Result<Self> {
        let encoder = StateEncoder::for_space(&description.observation_space, description.state_dim);
        let num_actions = description.action_size();
        let networks = QNetworks::build(&config, encoder.dim(), num_actions, &device)?;
        Ok(Self {
            buffer: ReplayBuffer::new(config.buffer_capacity),
            epsilon: config.epsilon,
            config,
            encoder,
            num_actions,
            device,
            networks,
            train_steps: 0,
            last_loss: None,
        })
    }

    pub fn epsilon(&self) -> f32 {
        self.epsilon
    }

    pub fn buffer_len(&self) -> usize {
        self.buffer.len()
    }

    pub fn train_steps(&self) -> usize {
        self.train_steps
    }

    fn train(&mut self) -> Result<()> {
        let transitions = self.buffer.sample(self.config.batch_size);
        let batch = TransitionBatch::new(&transitions, &self.encoder, &self.device)?;
        let next_q = self
            .networks
            .target
            .net
            .forward(&batch.next_states)?
            .max(1)?;
        let targets = batch.td_target(&next_q, self.config.discount_factor)?;
        let q = self
            .networks
            .q_net
            .forward(&batch.states)?
            .gather(&batch.discrete_actions()?.unsqueeze(1)?, 1)?
            .squeeze(1)?;
        let loss = mse(&q, &targets)?;
        self.networks.optimizer.backward_step(&loss)?;
        let loss = loss.to_scalar::<f32>()?;
        self.last_loss = Some(loss);
        self.train_steps += 1;
        if self.train_steps % self.config.target_sync_every.max(1) == 0 {
            self.networks.target.hard_sync(&self.networks.varmap)?;
        }
        debug!(loss, train_steps = self.train_steps, "dqn update");
        Ok(())
    }
}

impl Agent for DQN {
    fn select_action(&mut self, state: &State, training: bool) -> Result<Action> {
        self.encoder.check(state)?;
        if training && rng::chance(self.epsilon) {
            return Ok(Action::Discrete(rng::index(self.num_actions)));
        }
        Ok(Action::Discrete(argmax_random_tie(&self.q_values(state)?)))
    }

    fn update(&mut self, transition: &Transition, _next_action: Option<Action>) -> Result<()> {
        self.encoder.check_transition(transition)?;
        self.buffer.push(transition.clone());
        if self.buffer.has_batch(self.config.batch_size) {
            self.train()?;
        }
        if self.epsilon > self.config.epsilon_min {
            self.epsilon = (self.epsilon * self.config.epsilon_decay).max(self.config.epsilon_min);
        }
        Ok(())
    }

    fn reset(&mut self) -> Result<()> {
        self.networks =
            QNetworks::build(&self.config, self.encoder.dim(), self.num_actions, &self.device)?;
        self.buffer.clear();
        self.epsilon = self.config.epsilon;
        self.train_steps = 0;
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

    fn q_values(&self, state: &State) -> Result<Vec<f32>> {
        let state = self.encoder.single(state, &self.device)?;
        Ok(self.networks.q_net.forward(&state)?.squeeze(0)?.to_vec1()?)
    }

    fn policy_probabilities(&self, state: &State, temperature: f32) -> Result<Vec<f32>> {
        Ok(softmax(&self.q_values(state)?, temperature))
    }

    fn loss(&self) -> Option<f32> {
        self.last_loss
    }

    fn apply_params(&mut self, params: &ParamUpdate) -> Result<()> {
        if let Some(lr) = params.learning_rate {
            self.config.learning_rate = lr;
            self.networks.optimizer.set_learning_rate(lr);
        }
        if let Some(gamma) = params.discount_factor {
            self.config.discount_factor = gamma;
        }
        if let Some(epsilon) = params.epsilon {
            self.config.epsilon = epsilon;
            self.epsilon = epsilon;
        }
        Ok(())
    }
}
