use anyhow::Result;
use candle_core::{Device, Tensor};
use derive_more::Deref;
use rlsim_core::{CoreError, Space, State, Transition};

#[derive(Debug, Deref)]
pub struct PolicyLoss(pub Tensor);

#[derive(Debug, Deref)]
pub struct ValueLoss(pub Tensor);

#[derive(Debug, Deref)]
pub struct Logp(pub Tensor);

#[derive(Debug, Deref)]
pub struct ValuesPred(pub Tensor);

/// How raw environment states are fed to a network.
#[derive(Debug, Clone)]
pub enum StateEncoder {
    Raw { dim: usize },
    /// One hot over the flat index of a discrete space.
    OneHot { space: Space, state_dim: usize },
}

impl StateEncoder {
    pub fn for_space(space: &Space, state_dim: usize) -> Self {
        if space.is_discrete() {
            Self::OneHot {
                space: space.clone(),
                state_dim,
            }
        } else {
            Self::Raw { dim: state_dim }
        }
    }

    pub fn dim(&self) -> usize {
        match self {
            Self::Raw { dim } => *dim,
            Self::OneHot { space, .. } => space.size(),
        }
    }

    /// Rejects states whose length differs from the environment's state vector.
    pub fn check(&self, state: &State) -> Result<(), CoreError> {
        match self {
            Self::Raw { dim } => state.check_len(*dim),
            Self::OneHot { state_dim, .. } => state.check_len(*state_dim),
        }
    }

    pub fn check_transition(&self, transition: &Transition) -> Result<(), CoreError> {
        self.check(&transition.state)?;
        self.check(&transition.next_state)
    }

    pub fn encode(&self, state: &State) -> Result<Vec<f32>> {
        self.check(state)?;
        match self {
            Self::Raw { .. } => Ok(state.values().to_vec()),
            Self::OneHot { space, .. } => {
                let idx = space
                    .index_of(state)
                    .ok_or_else(|| CoreError::StateOutOfSpace(state.values().to_vec()))?;
                Ok(one_hot(idx, space.size()))
            }
        }
    }

    /// Shape `(states.len(), dim)`.
    pub fn batch<'a>(
        &self,
        states: impl IntoIterator<Item = &'a State>,
        device: &Device,
    ) -> Result<Tensor> {
        let mut data = vec![];
        let mut rows = 0;
        for state in states {
            data.extend(self.encode(state)?);
            rows += 1;
        }
        Ok(Tensor::from_vec(data, (rows, self.dim()), device)?)
    }

    pub fn single(&self, state: &State, device: &Device) -> Result<Tensor> {
        self.batch(std::iter::once(state), device)
    }
}

pub fn one_hot(idx: usize, size: usize) -> Vec<f32> {
    let mut mask = vec![0.; size];
    if let Some(slot) = mask.get_mut(idx) {
        *slot = 1.;
    }
    mask
}

/// Shape `(values.len(),)`.
pub fn vector(values: Vec<f32>, device: &Device) -> Result<Tensor> {
    let len = values.len();
    Ok(Tensor::from_vec(values, len, device)?)
}

/// Shape `(values.len(), 1)`.
pub fn column(values: Vec<f32>, device: &Device) -> Result<Tensor> {
    let len = values.len();
    Ok(Tensor::from_vec(values, (len, 1), device)?)
}

pub fn indices(values: impl IntoIterator<Item = usize>, device: &Device) -> Result<Tensor> {
    let values: Vec<u32> = values.into_iter().map(|v| v as u32).collect();
    let len = values.len();
    Ok(Tensor::from_vec(values, len, device)?)
}
