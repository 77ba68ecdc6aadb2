use crate::kinds::AlgorithmKind;
use rlsim_agents::{
    A3CConfig, DDPGConfig, DQNConfig, PPOConfig, ReinforceConfig, SACConfig, TD3Config,
    TabularConfig,
};
use rlsim_core::ParamUpdate;
use rlsim_gym::RewardConfig;
use serde::{Deserialize, Serialize};

/// Every knob any of the agents reads. Each agent picks the fields it knows about.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Hyperparameters {
    pub learning_rate: f64,
    pub discount_factor: f32,
    pub epsilon: f32,
    pub epsilon_decay: f32,
    pub epsilon_min: f32,
    pub clip_epsilon: f32,
    pub ppo_epochs: usize,
    pub batch_size: usize,
    pub buffer_capacity: usize,
    pub target_sync_every: usize,
    pub tau: f64,
    pub exploration_noise: f32,
    pub policy_noise: f32,
    pub noise_clip: f32,
    pub policy_delay: usize,
    pub entropy_coef: f32,
    pub alpha: f32,
    pub hidden: Vec<usize>,
    pub max_grad_norm: Option<f32>,
}

impl Hyperparameters {
    pub fn for_algorithm(algorithm: AlgorithmKind) -> Self {
        let shared = Self::shared();
        match algorithm {
            AlgorithmKind::QLearning | AlgorithmKind::Sarsa | AlgorithmKind::ExpectedSarsa => {
                let c = TabularConfig::default();
                Self {
                    learning_rate: c.learning_rate as f64,
                    discount_factor: c.discount_factor,
                    epsilon: c.epsilon,
                    ..shared
                }
            }
            AlgorithmKind::DQN => shared,
            AlgorithmKind::Reinforce => {
                let c = ReinforceConfig::default();
                Self {
                    learning_rate: c.learning_rate,
                    discount_factor: c.discount_factor,
                    hidden: c.hidden,
                    ..shared
                }
            }
            AlgorithmKind::PPO => {
                let c = PPOConfig::default();
                Self {
                    learning_rate: c.learning_rate,
                    discount_factor: c.discount_factor,
                    hidden: c.hidden,
                    max_grad_norm: c.max_grad_norm,
                    ..shared
                }
            }
            AlgorithmKind::A3C => {
                let c = A3CConfig::default();
                Self {
                    learning_rate: c.learning_rate,
                    discount_factor: c.discount_factor,
                    hidden: c.hidden,
                    ..shared
                }
            }
            AlgorithmKind::SAC => {
                let c = SACConfig::default();
                Self {
                    learning_rate: c.learning_rate,
                    discount_factor: c.discount_factor,
                    batch_size: c.batch_size,
                    buffer_capacity: c.buffer_capacity,
                    hidden: c.hidden,
                    ..shared
                }
            }
            AlgorithmKind::DDPG => {
                let c = DDPGConfig::default();
                Self {
                    learning_rate: c.learning_rate,
                    discount_factor: c.discount_factor,
                    batch_size: c.batch_size,
                    buffer_capacity: c.buffer_capacity,
                    hidden: c.hidden,
                    ..shared
                }
            }
            AlgorithmKind::TD3 => {
                let c = TD3Config::default();
                Self {
                    learning_rate: c.learning_rate,
                    discount_factor: c.discount_factor,
                    batch_size: c.batch_size,
                    buffer_capacity: c.buffer_capacity,
                    hidden: c.hidden,
                    ..shared
                }
            }
        }
    }

    // DQN values for the replay knobs, the continuous agents' values for the rest.
    fn shared() -> Self {
        let dqn = DQNConfig::default();
        let ppo = PPOConfig::default();
        let td3 = TD3Config::default();
        let a3c = A3CConfig::default();
        let sac = SACConfig::default();
        Self {
            learning_rate: dqn.learning_rate,
            discount_factor: dqn.discount_factor,
            epsilon: dqn.epsilon,
            epsilon_decay: dqn.epsilon_decay,
            epsilon_min: dqn.epsilon_min,
            clip_epsilon: ppo.clip_epsilon,
            ppo_epochs: ppo.epochs,
            batch_size: dqn.batch_size,
            buffer_capacity: dqn.buffer_capacity,
            target_sync_every: dqn.target_sync_every,
            tau: td3.tau,
            exploration_noise: td3.exploration_noise,
            policy_noise: td3.policy_noise,
            noise_clip: td3.noise_clip,
            policy_delay: td3.policy_delay,
            entropy_coef: a3c.entropy_coef,
            alpha: sac.alpha,
            hidden: dqn.hidden,
            max_grad_norm: dqn.max_grad_norm,
        }
    }

    /// Writes the fields of a partial update into this set.
    pub fn merge(&mut self, params: &ParamUpdate) {
        if let Some(lr) = params.learning_rate {
            self.learning_rate = lr;
        }
        if let Some(gamma) = params.discount_factor {
            self.discount_factor = gamma;
        }
        if let Some(epsilon) = params.epsilon {
            self.epsilon = epsilon;
        }
        if let Some(clip) = params.clip_epsilon {
            self.clip_epsilon = clip;
        }
    }

    pub fn tabular(&self) -> TabularConfig {
        TabularConfig {
            learning_rate: self.learning_rate as f32,
            discount_factor: self.discount_factor,
            epsilon: self.epsilon,
        }
    }

    pub fn dqn(&self) -> DQNConfig {
        DQNConfig {
            learning_rate: self.learning_rate,
            discount_factor: self.discount_factor,
            epsilon: self.epsilon,
            epsilon_decay: self.epsilon_decay,
            epsilon_min: self.epsilon_min,
            buffer_capacity: self.buffer_capacity,
            batch_size: self.batch_size,
            target_sync_every: self.target_sync_every,
            hidden: self.hidden.clone(),
            max_grad_norm: self.max_grad_norm,
        }
    }

    pub fn reinforce(&self) -> ReinforceConfig {
        ReinforceConfig {
            learning_rate: self.learning_rate,
            discount_factor: self.discount_factor,
            hidden: self.hidden.clone(),
        }
    }

    pub fn ppo(&self) -> PPOConfig {
        PPOConfig {
            learning_rate: self.learning_rate,
            discount_factor: self.discount_factor,
            clip_epsilon: self.clip_epsilon,
            epochs: self.ppo_epochs,
            hidden: self.hidden.clone(),
            max_grad_norm: self.max_grad_norm,
        }
    }

    pub fn a3c(&self) -> A3CConfig {
        A3CConfig {
            learning_rate: self.learning_rate,
            discount_factor: self.discount_factor,
            entropy_coef: self.entropy_coef,
            hidden: self.hidden.clone(),
        }
    }

    pub fn ddpg(&self) -> DDPGConfig {
        DDPGConfig {
            learning_rate: self.learning_rate,
            discount_factor: self.discount_factor,
            tau: self.tau,
            exploration_noise: self.exploration_noise,
            buffer_capacity: self.buffer_capacity,
            batch_size: self.batch_size,
            hidden: self.hidden.clone(),
        }
    }

    pub fn td3(&self) -> TD3Config {
        TD3Config {
            learning_rate: self.learning_rate,
            discount_factor: self.discount_factor,
            tau: self.tau,
            exploration_noise: self.exploration_noise,
            policy_noise: self.policy_noise,
            noise_clip: self.noise_clip,
            policy_delay: self.policy_delay,
            buffer_capacity: self.buffer_capacity,
            batch_size: self.batch_size,
            hidden: self.hidden.clone(),
        }
    }

    pub fn sac(&self) -> SACConfig {
        SACConfig {
            learning_rate: self.learning_rate,
            discount_factor: self.discount_factor,
            tau: self.tau,
            alpha: self.alpha,
            buffer_capacity: self.buffer_capacity,
            batch_size: self.batch_size,
            hidden: self.hidden.clone(),
        }
    }
}

/// Slider bounds of one tunable parameter.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct ParamRange {
    pub min: f64,
    pub max: f64,
    pub step: f64,
    pub default: f64,
}

impl ParamRange {
    const fn new(min: f64, max: f64, step: f64, default: f64) -> Self {
        Self {
            min,
            max,
            step,
            default,
        }
    }

    pub fn clamp(&self, value: f64) -> f64 {
        value.clamp(self.min, self.max)
    }
}

/// The parameters an algorithm exposes for tuning while it trains.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct ParamRanges {
    pub learning_rate: ParamRange,
    pub discount_factor: ParamRange,
    pub epsilon: Option<ParamRange>,
    pub clip_epsilon: Option<ParamRange>,
}

impl ParamRanges {
    pub fn for_algorithm(algorithm: AlgorithmKind) -> Self {
        let defaults = Hyperparameters::for_algorithm(algorithm);
        let learning_rate = match algorithm {
            AlgorithmKind::QLearning | AlgorithmKind::Sarsa | AlgorithmKind::ExpectedSarsa => {
                ParamRange::new(0.01, 1.0, 0.01, 0.1)
            }
            AlgorithmKind::Reinforce => ParamRange::new(0.001, 0.1, 0.001, 0.01),
            AlgorithmKind::DQN | AlgorithmKind::DDPG | AlgorithmKind::TD3 => {
                ParamRange::new(0.0001, 0.01, 0.0001, 0.001)
            }
            AlgorithmKind::PPO | AlgorithmKind::SAC => {
                ParamRange::new(0.0001, 0.001, 0.0001, 0.0003)
            }
            AlgorithmKind::A3C => ParamRange::new(0.00001, 0.001, 0.00001, 0.0001),
        };
        let discount_factor = ParamRange::new(0.1, 0.99, 0.01, defaults.discount_factor as f64);
        let epsilon = (algorithm.is_tabular() || algorithm == AlgorithmKind::DQN)
            .then(|| ParamRange::new(0.01, 1.0, 0.01, defaults.epsilon as f64));
        let clip_epsilon = (algorithm == AlgorithmKind::PPO)
            .then(|| ParamRange::new(0.1, 0.5, 0.01, defaults.clip_epsilon as f64));
        Self {
            learning_rate,
            discount_factor,
            epsilon,
            clip_epsilon,
        }
    }

    /// Clamps every field into range and drops the ones this algorithm does not expose.
    pub fn clamp(&self, params: &ParamUpdate) -> ParamUpdate {
        let clamp_f32 = |range: &ParamRange, v: f32| range.clamp(v as f64) as f32;
        ParamUpdate {
            learning_rate: params.learning_rate.map(|lr| self.learning_rate.clamp(lr)),
            discount_factor: params
                .discount_factor
                .map(|gamma| clamp_f32(&self.discount_factor, gamma)),
            epsilon: self
                .epsilon
                .as_ref()
                .and_then(|range| params.epsilon.map(|e| clamp_f32(range, e))),
            clip_epsilon: self
                .clip_epsilon
                .as_ref()
                .and_then(|range| params.clip_epsilon.map(|c| clamp_f32(range, c))),
        }
    }
}

/// Partial configuration change queued on the training loop.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ConfigUpdate {
    #[serde(flatten)]
    pub params: ParamUpdate,
    /// Only meaningful for the grid world.
    pub rewards: Option<RewardConfig>,
}

impl ConfigUpdate {
    pub fn is_empty(&self) -> bool {
        self.params.is_empty() && self.rewards.is_none()
    }
}
