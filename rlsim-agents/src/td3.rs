use crate::batch::TransitionBatch;
use crate::continuous::{ActionBounds, DeterministicActor, TwinCritic, first_scalar, gaussian_noise};
use anyhow::Result;
use candle_core::{DType, Device, Tensor};
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
pub struct TD3Config {
    pub learning_rate: f64,
    pub discount_factor: f32,
    pub tau: f64,
    /// Standard deviation of the exploration noise, relative to the action scale.
    pub exploration_noise: f32,
    /// Standard deviation of the target policy smoothing noise.
    pub policy_noise: f32,
    pub noise_clip: f32,
    /// Critic updates per actor update.
    pub policy_delay: usize,
    pub buffer_capacity: usize,
    pub batch_size: usize,
    pub hidden: Vec<usize>,
}

impl Default for TD3Config {
    fn default() -> Self {
        Self {
            learning_rate: 1e-3,
            discount_factor: 0.99,
            tau: 0.005,
            exploration_noise: 0.1,
            policy_noise: 0.2,
            noise_clip: 0.5,
            policy_delay: 2,
            buffer_capacity: 10_000,
            batch_size: 64,
            hidden: vec![64, 64],
        }
    }
}

/// Target policy smoothing: gaussian noise clipped to `±noise_clip`, added to the target
/// actions, then clamped into the action range.
pub fn smooth_target_actions(
    target_actions: &Tensor,
    policy_noise: f32,
    noise_clip: f32,
    bounds: &ActionBounds,
) -> Result<Tensor> {
    let (rows, cols) = target_actions.dims2()?;
    let noise = gaussian_noise((rows, cols), policy_noise, target_actions.device())?
        .clamp(-noise_clip, noise_clip)?;
    Ok((target_actions + noise)?.clamp(bounds.low, bounds.high)?)
}

struct TD3Model {
    actor_varmap: VarMap,
    critic_varmap: VarMap,
    actor: DeterministicActor,
    critic: TwinCritic,
    target_actor: TargetNetwork<DeterministicActor>,
    target_critic: TargetNetwork<TwinCritic>,
    actor_optimizer: OptimizerWithMaxGrad,
    critic_optimizer: OptimizerWithMaxGrad,
}

impl TD3Model {
    fn build(config: &TD3Config, state_dim: usize, scale: f32, device: &Device) -> Result<Self> {
        let actor_varmap = VarMap::new();
        let critic_varmap = VarMap::new();
        let actor = DeterministicActor::build(
            state_dim,
            &config.hidden,
            scale,
            &VarBuilder::from_varmap(&actor_varmap, DType::F32, device),
        )?;
        let critic = TwinCritic::build(
            state_dim,
            &config.hidden,
            &VarBuilder::from_varmap(&critic_varmap, DType::F32, device),
        )?;
        let target_actor = TargetNetwork::build(&actor_varmap, device, |vb| {
            DeterministicActor::build(state_dim, &config.hidden, scale, vb)
        })?;
        let target_critic = TargetNetwork::build(&critic_varmap, device, |vb| {
            TwinCritic::build(state_dim, &config.hidden, vb)
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

/// Twin delayed DDPG: clipped double Q learning, delayed actor updates and target policy
/// smoothing.
pub struct TD3 {
    config: TD3Config,
    encoder: StateEncoder,
    bounds: ActionBounds,
    device: Device,
    model: TD3Model,
    buffer: ReplayBuffer<Transition>,
    critic_updates: usize,
    actor_updates: usize,
    last_loss: Option<f32>,
}

impl TD3 {
    pub fn new(description: &EnvironmentDescription, config: TD3Config, device: Device) -> Result<Self> {
        let bounds = ActionBounds::from_description(description)?;
        let encoder = StateEncoder::Raw {
            dim: description.state_dim,
        };
        let model = TD3Model::build(&config, encoder.dim(), bounds.scale(), &device)?;
        Ok(Self {
            buffer: ReplayBuffer::new(config.buffer_capacity),
            config,
            encoder,
            bounds,
            device,
            model,
            critic_updates: 0,
            actor_updates: 0,
            last_loss: None,
        })
    }

    pub fn critic_updates(&self) -> usize {
        self.critic_updates
    }

    pub fn actor_updates(&self) -> usize {
        self.actor_updates
    }

    fn train(&mut self) -> Result<()> {
        let transitions = self.buffer.sample(self.config.batch_size);
        let batch = TransitionBatch::new(&transitions, &self.encoder, &self.device)?;
        let actions = batch.continuous_actions()?;

        let target_actions = self.model.target_actor.net.act(&batch.next_states)?;
        let next_actions = smooth_target_actions(
            &target_actions,
            self.config.policy_noise,
            self.config.noise_clip,
            &self.bounds,
        )?;
        let next_q = self
            .model
            .target_critic
            .net
            .min_q(&batch.next_states, &next_actions)?;
        let targets = batch.td_target(&next_q, self.config.discount_factor)?;
        let critic = &self.model.critic;
        let value_loss = ValueLoss(
            (mse(&critic.q1.q(&batch.states, &actions)?, &targets)?
                + mse(&critic.q2.q(&batch.states, &actions)?, &targets)?)?,
        );
        self.model.critic_optimizer.backward_step(&value_loss)?;
        self.critic_updates += 1;

        if self.critic_updates % self.config.policy_delay.max(1) == 0 {
            let policy_actions = self.model.actor.act(&batch.states)?;
            let policy_loss = PolicyLoss(
                self.model
                    .critic
                    .q1
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
            self.actor_updates += 1;
        }

        let loss = value_loss.to_scalar::<f32>()?;
        self.last_loss = Some(loss);
        debug!(loss, critic_updates = self.critic_updates, "td3 update");
        Ok(())
    }
}

impl Agent for TD3 {
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
        self.model = TD3Model::build(
            &self.config,
            self.encoder.dim(),
            self.bounds.scale(),
            &self.device,
        )?;
        self.buffer.clear();
        self.critic_updates = 0;
        self.actor_updates = 0;
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
        let action = self.model.actor.act(&state)?;
        Ok(self.model.critic.q1.q(&state, &action)?.to_vec1()?)
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

#[cfg(test)]
mod test {
    use super::*;
    use rlsim_core::Space;

    #[test]
    fn actor_updates_are_delayed() -> Result<()> {
        rng::seed(13);
        let description = EnvironmentDescription::new(
            Space::bounded(vec![-1.; 3], vec![1.; 3]),
            Space::bounded(vec![-2.], vec![2.]),
            3,
        );
        let config = TD3Config {
            batch_size: 4,
            policy_delay: 2,
            hidden: vec![16, 16],
            ..Default::default()
        };
        let mut agent = TD3::new(&description, config, Device::Cpu)?;
        for i in 0..9 {
            let transition = Transition {
                state: State::new(vec![0., 1., i as f32 / 10.]),
                action: Action::Continuous(0.5),
                reward: -0.2,
                next_state: State::new(vec![0.1, 0.99, 0.]),
                terminated: false,
                done: false,
            };
            agent.update(&transition, None)?;
        }
        assert_eq!(agent.critic_updates(), 6);
        assert_eq!(agent.actor_updates(), 3);
        assert!(agent.loss().is_some_and(f32::is_finite));
        Ok(())
    }

    #[test]
    fn target_noise_is_clipped_before_the_action_range() -> Result<()> {
        rng::seed(17);
        let bounds = ActionBounds {
            low: -2.,
            high: 2.,
        };
        let centred = Tensor::zeros((256, 1), DType::F32, &Device::Cpu)?;
        let smoothed: Vec<f32> = smooth_target_actions(&centred, 5., 0.3, &bounds)?
            .flatten_all()?
            .to_vec1()?;
        assert!(smoothed.iter().all(|a| a.abs() <= 0.3));
        assert!(smoothed.iter().any(|a| *a == 0.3));
        assert!(smoothed.iter().any(|a| *a == -0.3));

        let near_edge = Tensor::full(1.9f32, (256, 1), &Device::Cpu)?;
        let smoothed: Vec<f32> = smooth_target_actions(&near_edge, 5., 0.3, &bounds)?
            .flatten_all()?
            .to_vec1()?;
        assert!(smoothed.iter().all(|a| (1.6 - 1e-6..=2.).contains(a)));
        assert!(smoothed.iter().any(|a| *a == 2.));
        Ok(())
    }
}
