use crate::config::Hyperparameters;
use crate::kinds::{AlgorithmKind, EnvKind, check_pairing};
use anyhow::Result;
use candle_core::Device;
use rlsim_agents::{A3C, DDPG, DQN, PPO, Reinforce, SAC, TD3, TabularAgent, TdTarget};
use rlsim_core::{Action, Agent, Env, EnvironmentDescription, SnapShot, State};
use rlsim_gym::{CartPole, GridWorld, Pendulum, RewardConfig};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum GridLayout {
    /// 6x6 with six obstacles.
    #[default]
    Standard,
    /// 10x10 maze.
    Large,
}

/// The active environment. A closed enum so the loop can reach environment specific views
/// (the grid layout, reward shaping) without downcasting.
#[derive(Debug, Clone)]
pub enum EnvInstance {
    GridWorld(GridWorld),
    CartPole(CartPole),
    Pendulum(Pendulum),
}

impl EnvInstance {
    pub fn kind(&self) -> EnvKind {
        match self {
            Self::GridWorld(_) => EnvKind::GridWorld,
            Self::CartPole(_) => EnvKind::CartPole,
            Self::Pendulum(_) => EnvKind::Pendulum,
        }
    }

    pub fn as_grid(&self) -> Option<&GridWorld> {
        match self {
            Self::GridWorld(grid) => Some(grid),
            _ => None,
        }
    }

    pub fn as_grid_mut(&mut self) -> Option<&mut GridWorld> {
        match self {
            Self::GridWorld(grid) => Some(grid),
            _ => None,
        }
    }

    fn inner(&self) -> &dyn Env {
        match self {
            Self::GridWorld(env) => env,
            Self::CartPole(env) => env,
            Self::Pendulum(env) => env,
        }
    }

    fn inner_mut(&mut self) -> &mut dyn Env {
        match self {
            Self::GridWorld(env) => env,
            Self::CartPole(env) => env,
            Self::Pendulum(env) => env,
        }
    }
}

impl Env for EnvInstance {
    fn reset(&mut self) -> Result<State> {
        self.inner_mut().reset()
    }

    fn step(&mut self, action: &Action) -> Result<SnapShot> {
        self.inner_mut().step(action)
    }

    fn state(&self) -> State {
        self.inner().state()
    }

    fn env_description(&self) -> EnvironmentDescription {
        self.inner().env_description()
    }

    fn action_name(&self, action: &Action) -> String {
        self.inner().action_name(action)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct EnvBuilder {
    pub kind: EnvKind,
    pub grid_layout: GridLayout,
    pub rewards: RewardConfig,
}

impl EnvBuilder {
    pub fn new(kind: EnvKind) -> Self {
        Self {
            kind,
            grid_layout: GridLayout::default(),
            rewards: RewardConfig::default(),
        }
    }

    /// Builds the environment and resets it, so its state is drawn from the reset distribution.
    pub fn build(&self) -> Result<EnvInstance> {
        let mut env = match self.kind {
            EnvKind::GridWorld => {
                let grid = match self.grid_layout {
                    GridLayout::Standard => GridWorld::default(),
                    GridLayout::Large => GridWorld::large(),
                };
                EnvInstance::GridWorld(grid.with_rewards(self.rewards))
            }
            EnvKind::CartPole => EnvInstance::CartPole(CartPole::new()),
            EnvKind::Pendulum => EnvInstance::Pendulum(Pendulum::new()),
        };
        env.reset()?;
        Ok(env)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct AgentBuilder {
    pub algorithm: AlgorithmKind,
    pub hyperparameters: Hyperparameters,
}

impl AgentBuilder {
    pub fn new(algorithm: AlgorithmKind) -> Self {
        Self {
            algorithm,
            hyperparameters: Hyperparameters::for_algorithm(algorithm),
        }
    }

    /// Builds the agent for `env`. Pairings outside the compatibility table are refused before any
    /// network is allocated.
    pub fn build(
        &self,
        device: &Device,
        env: EnvKind,
        env_description: &EnvironmentDescription,
    ) -> Result<Box<dyn Agent>> {
        check_pairing(env, self.algorithm)?;
        let params = &self.hyperparameters;
        let device = device.clone();
        let agent: Box<dyn Agent> = match self.algorithm {
            AlgorithmKind::QLearning => Box::new(TabularAgent::new(
                TdTarget::QLearning,
                env_description,
                params.tabular(),
            )?),
            AlgorithmKind::Sarsa => Box::new(TabularAgent::new(
                TdTarget::Sarsa,
                env_description,
                params.tabular(),
            )?),
            AlgorithmKind::ExpectedSarsa => Box::new(TabularAgent::new(
                TdTarget::ExpectedSarsa,
                env_description,
                params.tabular(),
            )?),
            AlgorithmKind::DQN => Box::new(DQN::new(env_description, params.dqn(), device)?),
            AlgorithmKind::Reinforce => {
                Box::new(Reinforce::new(env_description, params.reinforce(), device)?)
            }
            AlgorithmKind::PPO => Box::new(PPO::new(env_description, params.ppo(), device)?),
            AlgorithmKind::A3C => Box::new(A3C::new(env_description, params.a3c(), device)?),
            AlgorithmKind::SAC => Box::new(SAC::new(env_description, params.sac(), device)?),
            AlgorithmKind::DDPG => Box::new(DDPG::new(env_description, params.ddpg(), device)?),
            AlgorithmKind::TD3 => Box::new(TD3::new(env_description, params.td3(), device)?),
        };
        Ok(agent)
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use rlsim_core::{LearnerCapability, UpdateOrder};

    #[test]
    fn every_compatible_pair_builds() -> Result<()> {
        let device = Device::Cpu;
        for kind in EnvKind::ALL {
            let env = EnvBuilder::new(kind).build()?;
            let description = env.env_description();
            for algorithm in kind.compatible_algorithms() {
                let agent = AgentBuilder::new(*algorithm).build(&device, kind, &description)?;
                assert!(agent.capabilities().contains(LearnerCapability::LossQuery));
            }
        }
        Ok(())
    }

    #[test]
    fn only_sarsa_defers_its_update() -> Result<()> {
        let env = EnvBuilder::new(EnvKind::GridWorld).build()?;
        let description = env.env_description();
        for algorithm in EnvKind::GridWorld.compatible_algorithms() {
            let agent =
                AgentBuilder::new(*algorithm).build(&Device::Cpu, EnvKind::GridWorld, &description)?;
            let expected = if *algorithm == AlgorithmKind::Sarsa {
                UpdateOrder::DeferredOnPolicy
            } else {
                UpdateOrder::Immediate
            };
            assert_eq!(agent.update_order(), expected);
        }
        Ok(())
    }

    #[test]
    fn incompatible_pair_is_refused() -> Result<()> {
        let env = EnvBuilder::new(EnvKind::Pendulum).build()?;
        let built = AgentBuilder::new(AlgorithmKind::QLearning).build(
            &Device::Cpu,
            EnvKind::Pendulum,
            &env.env_description(),
        );
        assert!(built.is_err());
        Ok(())
    }

    #[test]
    fn large_layout_is_ten_by_ten() -> Result<()> {
        let env = EnvBuilder {
            grid_layout: GridLayout::Large,
            ..EnvBuilder::new(EnvKind::GridWorld)
        }
        .build()?;
        assert_eq!(env.num_states(), 100);
        assert_eq!(env.kind(), EnvKind::GridWorld);
        Ok(())
    }
}
