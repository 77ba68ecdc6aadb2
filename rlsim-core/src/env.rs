use crate::error::CoreError;
use anyhow::Result;
use derive_more::Deref;

#[derive(Debug, Clone, PartialEq)]
pub enum Space {
    Discrete(usize),
    /// A discrete space whose elements are the cells of a `rows x cols` grid. States living in
    /// this space are `[row, col]` pairs.
    Grid { rows: usize, cols: usize },
    Continuous {
        min: Option<Vec<f32>>,
        max: Option<Vec<f32>>,
        size: usize,
    },
}

impl Space {
    pub fn continuous_from_dims(dims: Vec<usize>) -> Self {
        Self::Continuous {
            min: None,
            max: None,
            size: dims.iter().product(),
        }
    }

    pub fn bounded(min: Vec<f32>, max: Vec<f32>) -> Self {
        let size = min.len();
        Self::Continuous {
            min: Some(min),
            max: Some(max),
            size,
        }
    }

    pub fn size(&self) -> usize {
        match &self {
            Self::Discrete(size) => *size,
            Self::Grid { rows, cols } => rows * cols,
            Self::Continuous { size, .. } => *size,
        }
    }

    pub fn is_discrete(&self) -> bool {
        !matches!(self, Self::Continuous { .. })
    }

    /// The flat index of a state in a discrete space. Continuous spaces have no index.
    pub fn index_of(&self, state: &State) -> Option<usize> {
        match self {
            Self::Discrete(size) => {
                let idx = *state.first()?;
                (idx >= 0. && (idx as usize) < *size).then_some(idx as usize)
            }
            Self::Grid { rows, cols } => {
                let (row, col) = (*state.first()?, *state.get(1)?);
                if row < 0. || col < 0. || row as usize >= *rows || col as usize >= *cols {
                    return None;
                }
                Some(row as usize * cols + col as usize)
            }
            Self::Continuous { .. } => None,
        }
    }

    /// Bounds of the first dimension, used for scalar continuous actions.
    pub fn scalar_bounds(&self) -> Option<(f32, f32)> {
        match self {
            Self::Continuous {
                min: Some(min),
                max: Some(max),
                ..
            } => Some((*min.first()?, *max.first()?)),
            _ => None,
        }
    }
}

#[derive(Debug, Clone)]
pub struct EnvironmentDescription {
    pub observation_space: Space,
    pub action_space: Space,
    /// Length of the state vector handed out by the environment.
    pub state_dim: usize,
}

impl EnvironmentDescription {
    pub fn new(observation_space: Space, action_space: Space, state_dim: usize) -> Self {
        Self {
            observation_space,
            action_space,
            state_dim,
        }
    }

    pub fn action_size(&self) -> usize {
        self.action_space.size()
    }

    pub fn observation_size(&self) -> usize {
        self.observation_space.size()
    }

    pub fn check_state(&self, state: &State) -> Result<(), CoreError> {
        state.check_len(self.state_dim)
    }
}

/// Immutable snapshot of an environment's state vector.
#[derive(Debug, Clone, PartialEq, Deref)]
pub struct State(Vec<f32>);

impl State {
    pub fn new(values: Vec<f32>) -> Self {
        Self(values)
    }

    pub fn values(&self) -> &[f32] {
        &self.0
    }

    pub fn into_inner(self) -> Vec<f32> {
        self.0
    }

    pub fn check_len(&self, expected: usize) -> Result<(), CoreError> {
        if self.len() != expected {
            return Err(CoreError::StateDimension {
                expected,
                actual: self.len(),
            });
        }
        Ok(())
    }
}

impl From<Vec<f32>> for State {
    fn from(values: Vec<f32>) -> Self {
        Self(values)
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Action {
    Discrete(usize),
    Continuous(f32),
}

impl Action {
    pub fn discrete(&self) -> Result<usize, CoreError> {
        match self {
            Self::Discrete(idx) => Ok(*idx),
            Self::Continuous(_) => Err(CoreError::ActionKind {
                expected: "discrete",
            }),
        }
    }

    pub fn continuous(&self) -> Result<f32, CoreError> {
        match self {
            Self::Continuous(value) => Ok(*value),
            Self::Discrete(_) => Err(CoreError::ActionKind {
                expected: "continuous",
            }),
        }
    }

    pub fn as_f32(&self) -> f32 {
        match self {
            Self::Discrete(idx) => *idx as f32,
            Self::Continuous(value) => *value,
        }
    }
}

pub struct SnapShot {
    pub state: State,
    pub reward: f32,
    pub terminated: bool,
    pub truncated: bool,
}

impl SnapShot {
    pub fn done(&self) -> bool {
        self.terminated || self.truncated
    }
}

/// The atomic unit every agent learns from.
///
/// `done` marks the end of the episode. Only `terminated` cuts the bootstrap from `next_state`:
/// a time limit ends the episode without making the next state terminal.
#[derive(Debug, Clone, PartialEq)]
pub struct Transition {
    pub state: State,
    pub action: Action,
    pub reward: f32,
    pub next_state: State,
    pub terminated: bool,
    pub done: bool,
}

impl Transition {
    pub fn new(state: State, action: Action, snapshot: &SnapShot) -> Self {
        Self {
            state,
            action,
            reward: snapshot.reward,
            next_state: snapshot.state.clone(),
            terminated: snapshot.terminated,
            done: snapshot.done(),
        }
    }
}

pub trait Env {
    fn reset(&mut self) -> Result<State>;
    fn step(&mut self, action: &Action) -> Result<SnapShot>;
    fn state(&self) -> State;
    fn env_description(&self) -> EnvironmentDescription;

    fn num_actions(&self) -> usize {
        self.env_description().action_size()
    }

    fn num_states(&self) -> usize {
        self.env_description().observation_size()
    }

    fn action_name(&self, action: &Action) -> String {
        match action {
            Action::Discrete(idx) => format!("action {idx}"),
            Action::Continuous(value) => format!("{value:.2}"),
        }
    }
}

#[cfg(test)]
mod test {
    use super::{Action, EnvironmentDescription, SnapShot, Space, State, Transition};
    use crate::error::CoreError;

    #[test]
    fn grid_index_is_row_major() {
        let space = Space::Grid { rows: 6, cols: 6 };
        assert_eq!(space.index_of(&State::new(vec![2., 3.])), Some(15));
        assert_eq!(space.index_of(&State::new(vec![6., 0.])), None);
        assert_eq!(space.size(), 36);
    }

    #[test]
    fn continuous_space_has_no_index() {
        let space = Space::bounded(vec![-2.], vec![2.]);
        assert_eq!(space.index_of(&State::new(vec![0.5])), None);
        assert_eq!(space.scalar_bounds(), Some((-2., 2.)));
    }

    #[test]
    fn truncation_ends_the_episode_without_terminating() {
        let snapshot = SnapShot {
            state: State::new(vec![1., 0., 0.]),
            reward: -0.5,
            terminated: false,
            truncated: true,
        };
        let transition =
            Transition::new(State::new(vec![0., 1., 0.]), Action::Continuous(0.), &snapshot);
        assert!(transition.done);
        assert!(!transition.terminated);
    }

    #[test]
    fn wrong_sized_states_are_rejected() {
        let desc =
            EnvironmentDescription::new(Space::Grid { rows: 4, cols: 4 }, Space::Discrete(4), 2);
        assert!(desc.check_state(&State::new(vec![1., 2.])).is_ok());
        assert!(matches!(
            desc.check_state(&State::new(vec![0., 0., 7., 7.])),
            Err(CoreError::StateDimension {
                expected: 2,
                actual: 4
            })
        ));
    }
}
