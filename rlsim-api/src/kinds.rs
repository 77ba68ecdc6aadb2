use rlsim_core::CoreError;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EnvKind {
    GridWorld,
    CartPole,
    Pendulum,
}

impl EnvKind {
    pub const ALL: [EnvKind; 3] = [Self::GridWorld, Self::CartPole, Self::Pendulum];

    pub fn name(&self) -> &'static str {
        match self {
            Self::GridWorld => "gridworld",
            Self::CartPole => "cartpole",
            Self::Pendulum => "pendulum",
        }
    }

    /// Algorithms that can be trained on this environment, the first one being the default.
    pub fn compatible_algorithms(&self) -> &'static [AlgorithmKind] {
        use AlgorithmKind::*;
        match self {
            Self::GridWorld => &[QLearning, DQN, Sarsa, ExpectedSarsa],
            Self::CartPole => &[Reinforce, PPO, A3C],
            Self::Pendulum => &[SAC, DDPG, TD3],
        }
    }

    pub fn default_algorithm(&self) -> AlgorithmKind {
        self.compatible_algorithms()[0]
    }

    pub fn supports(&self, algorithm: AlgorithmKind) -> bool {
        self.compatible_algorithms().contains(&algorithm)
    }
}

impl fmt::Display for EnvKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for EnvKind {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|kind| kind.name().eq_ignore_ascii_case(s))
            .ok_or_else(|| CoreError::UnknownEnvironment(s.to_owned()))
    }
}

#[allow(clippy::upper_case_acronyms)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum AlgorithmKind {
    #[serde(rename = "qlearning")]
    QLearning,
    #[serde(rename = "dqn")]
    DQN,
    #[serde(rename = "sarsa")]
    Sarsa,
    #[serde(rename = "expected-sarsa")]
    ExpectedSarsa,
    #[serde(rename = "reinforce")]
    Reinforce,
    #[serde(rename = "ppo")]
    PPO,
    #[serde(rename = "a3c")]
    A3C,
    #[serde(rename = "sac")]
    SAC,
    #[serde(rename = "ddpg")]
    DDPG,
    #[serde(rename = "td3")]
    TD3,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum Paradigm {
    ValueBasedOffPolicy,
    ValueBasedOnPolicy,
    PolicyBased,
    ActorCriticOnPolicy,
    ActorCriticOffPolicy,
}

impl fmt::Display for Paradigm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::ValueBasedOffPolicy => "Value-Based (Off-Policy)",
            Self::ValueBasedOnPolicy => "Value-Based (On-Policy)",
            Self::PolicyBased => "Policy-Based",
            Self::ActorCriticOnPolicy => "Actor-Critic (On-Policy)",
            Self::ActorCriticOffPolicy => "Actor-Critic (Off-Policy)",
        };
        f.write_str(name)
    }
}

/// Static description of an algorithm, shown next to the training view.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct AlgorithmInfo {
    pub display_name: &'static str,
    pub paradigm: Paradigm,
    pub learns: &'static str,
}

impl AlgorithmKind {
    pub const ALL: [AlgorithmKind; 10] = [
        Self::QLearning,
        Self::DQN,
        Self::Sarsa,
        Self::ExpectedSarsa,
        Self::Reinforce,
        Self::PPO,
        Self::A3C,
        Self::SAC,
        Self::DDPG,
        Self::TD3,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            Self::QLearning => "qlearning",
            Self::DQN => "dqn",
            Self::Sarsa => "sarsa",
            Self::ExpectedSarsa => "expected-sarsa",
            Self::Reinforce => "reinforce",
            Self::PPO => "ppo",
            Self::A3C => "a3c",
            Self::SAC => "sac",
            Self::DDPG => "ddpg",
            Self::TD3 => "td3",
        }
    }

    /// The environment the algorithm is moved to when paired with an incompatible one.
    pub fn home_env(&self) -> EnvKind {
        match self {
            Self::QLearning | Self::DQN | Self::Sarsa | Self::ExpectedSarsa => EnvKind::GridWorld,
            Self::Reinforce | Self::PPO | Self::A3C => EnvKind::CartPole,
            Self::SAC | Self::DDPG | Self::TD3 => EnvKind::Pendulum,
        }
    }

    pub fn is_tabular(&self) -> bool {
        matches!(self, Self::QLearning | Self::Sarsa | Self::ExpectedSarsa)
    }

    pub fn info(&self) -> AlgorithmInfo {
        const Q_VALUES: &str = "Q-values (Q(s,a))";
        const POLICY: &str = "Policy probabilities (π(a|s))";
        const POLICY_AND_V: &str = "Both policy (π) and value (V)";
        const POLICY_AND_Q: &str = "Both policy (π) and Q-values (Q)";
        let (display_name, paradigm, learns) = match self {
            Self::QLearning => ("Q-Learning", Paradigm::ValueBasedOffPolicy, Q_VALUES),
            Self::DQN => ("DQN", Paradigm::ValueBasedOffPolicy, Q_VALUES),
            Self::Sarsa => ("SARSA", Paradigm::ValueBasedOnPolicy, Q_VALUES),
            Self::ExpectedSarsa => ("Expected SARSA", Paradigm::ValueBasedOnPolicy, Q_VALUES),
            Self::Reinforce => ("REINFORCE", Paradigm::PolicyBased, POLICY),
            Self::PPO => ("PPO", Paradigm::PolicyBased, POLICY),
            Self::A3C => ("A3C", Paradigm::ActorCriticOnPolicy, POLICY_AND_V),
            Self::SAC => ("SAC", Paradigm::ActorCriticOffPolicy, POLICY_AND_Q),
            Self::DDPG => ("DDPG", Paradigm::ActorCriticOffPolicy, POLICY_AND_Q),
            Self::TD3 => ("TD3", Paradigm::ActorCriticOffPolicy, POLICY_AND_Q),
        };
        AlgorithmInfo {
            display_name,
            paradigm,
            learns,
        }
    }
}

impl fmt::Display for AlgorithmKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for AlgorithmKind {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|kind| kind.name().eq_ignore_ascii_case(s))
            .ok_or_else(|| CoreError::UnknownAlgorithm(s.to_owned()))
    }
}

/// Rejects pairings absent from the compatibility table.
pub fn check_pairing(env: EnvKind, algorithm: AlgorithmKind) -> Result<(), CoreError> {
    if env.supports(algorithm) {
        Ok(())
    } else {
        Err(CoreError::IncompatiblePairing {
            algorithm: algorithm.to_string(),
            environment: env.to_string(),
        })
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn every_algorithm_has_exactly_one_home() {
        for algorithm in AlgorithmKind::ALL {
            let homes: Vec<EnvKind> = EnvKind::ALL
                .into_iter()
                .filter(|env| env.supports(algorithm))
                .collect();
            assert_eq!(homes, vec![algorithm.home_env()]);
        }
    }

    #[test]
    fn names_round_trip_through_from_str() {
        for algorithm in AlgorithmKind::ALL {
            assert_eq!(algorithm.name().parse::<AlgorithmKind>().ok(), Some(algorithm));
        }
        assert_eq!("CartPole".parse::<EnvKind>().ok(), Some(EnvKind::CartPole));
        assert!(matches!(
            "mountaincar".parse::<EnvKind>(),
            Err(CoreError::UnknownEnvironment(_))
        ));
    }

    #[test]
    fn incompatible_pairing_is_rejected() {
        assert!(check_pairing(EnvKind::GridWorld, AlgorithmKind::Sarsa).is_ok());
        assert!(matches!(
            check_pairing(EnvKind::Pendulum, AlgorithmKind::QLearning),
            Err(CoreError::IncompatiblePairing { .. })
        ));
    }

    #[test]
    fn metadata_matches_paradigm_table() {
        let info = AlgorithmKind::ExpectedSarsa.info();
        assert_eq!(info.display_name, "Expected SARSA");
        assert_eq!(info.paradigm.to_string(), "Value-Based (On-Policy)");
        assert_eq!(AlgorithmKind::TD3.info().paradigm, Paradigm::ActorCriticOffPolicy);
    }
}
