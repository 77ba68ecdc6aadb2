use crate::env::{Action, State};
use derive_more::Deref;

/// Trajectory of the running episode, consumed by policy gradient agents once it ends.
#[derive(Debug, Clone, Default)]
pub struct EpisodeBuffer {
    pub states: Vec<State>,
    pub actions: Vec<Action>,
    pub rewards: Vec<f32>,
}

impl EpisodeBuffer {
    pub fn push(&mut self, state: State, action: Action, reward: f32) {
        self.states.push(state);
        self.actions.push(action);
        self.rewards.push(reward);
    }

    pub fn len(&self) -> usize {
        self.rewards.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rewards.is_empty()
    }

    pub fn clear(&mut self) {
        self.states.clear();
        self.actions.clear();
        self.rewards.clear();
    }

    /// Backward cumulative sum `G_t = r_t + gamma * G_{t+1}`.
    pub fn discounted_returns(&self, gamma: f32) -> Returns {
        let mut returns = vec![0.; self.rewards.len()];
        let mut running = 0.;
        for (idx, reward) in self.rewards.iter().enumerate().rev() {
            running = reward + gamma * running;
            returns[idx] = running;
        }
        Returns(returns)
    }
}

#[derive(Deref, Debug, Clone, PartialEq)]
pub struct Returns(pub Vec<f32>);

#[derive(Deref, Debug, Clone, PartialEq)]
pub struct Advantages(pub Vec<f32>);

impl Advantages {
    pub fn from_returns(returns: &Returns, baseline: Option<&[f32]>) -> Self {
        match baseline {
            Some(values) => Self(
                returns
                    .iter()
                    .zip(values.iter())
                    .map(|(ret, value)| ret - value)
                    .collect(),
            ),
            None => Self(returns.0.clone()),
        }
    }

    /// Zero mean, unit variance. The standard deviation is offset by 1e-8 so a constant
    /// sequence maps to zeros instead of NaN.
    pub fn normalize(&mut self) {
        if self.0.is_empty() {
            return;
        }
        let len = self.0.len() as f32;
        let mean = self.0.iter().sum::<f32>() / len;
        let variance = self.0.iter().map(|x| (*x - mean).powi(2)).sum::<f32>() / len;
        let std = variance.sqrt() + 1e-8;
        for x in self.0.iter_mut() {
            *x = (*x - mean) / std;
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;

    fn buffer_with(rewards: &[f32]) -> EpisodeBuffer {
        let mut buffer = EpisodeBuffer::default();
        for r in rewards {
            buffer.push(State::new(vec![0.]), Action::Discrete(0), *r);
        }
        buffer
    }

    #[test]
    fn returns_are_backward_cumulative_sums() {
        let returns = buffer_with(&[1., 1., 1.]).discounted_returns(0.5);
        assert_eq!(returns.0, vec![1.75, 1.5, 1.]);
    }

    #[test]
    fn normalized_advantages_have_zero_mean_unit_variance() {
        let returns = buffer_with(&[1., 2., 3., 4.]).discounted_returns(1.);
        let mut advantages = Advantages::from_returns(&returns, None);
        advantages.normalize();
        let mean = advantages.iter().sum::<f32>() / 4.;
        let var = advantages.iter().map(|a| (a - mean).powi(2)).sum::<f32>() / 4.;
        assert!(mean.abs() < 1e-5);
        assert!((var - 1.).abs() < 1e-3);
    }

    #[test]
    fn constant_advantages_normalize_to_zero() {
        let mut advantages = Advantages(vec![2., 2., 2.]);
        advantages.normalize();
        assert!(advantages.iter().all(|a| a.abs() < 1e-3 && a.is_finite()));
    }

    #[test]
    fn baseline_is_subtracted() {
        let returns = Returns(vec![3., 2.]);
        let advantages = Advantages::from_returns(&returns, Some(&[1., 1.]));
        assert_eq!(advantages.0, vec![2., 1.]);
    }
}
