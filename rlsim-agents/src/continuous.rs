use anyhow::Result;
use candle_core::{Device, Tensor};
use candle_nn::{Module, VarBuilder};
use rlsim_candle_lm::{ThreadSafeSequential, build_sequential};
use rlsim_core::{CoreError, EnvironmentDescription, rng};

/// Scalar action bounds of a continuous control environment.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ActionBounds {
    pub low: f32,
    pub high: f32,
}

impl ActionBounds {
    pub fn from_description(description: &EnvironmentDescription) -> Result<Self> {
        let (low, high) = description.action_space.scalar_bounds().ok_or_else(|| {
            CoreError::InvalidConfig("a bounded continuous action space is required".to_string())
        })?;
        Ok(Self { low, high })
    }

    /// Half width of a symmetric action range.
    pub fn scale(&self) -> f32 {
        (self.high - self.low) / 2.
    }

    pub fn clamp(&self, action: f32) -> f32 {
        action.clamp(self.low, self.high)
    }
}

/// Deterministic policy `max_action * tanh(net(s))`.
#[derive(Debug, Clone)]
pub struct DeterministicActor {
    net: ThreadSafeSequential,
    scale: f32,
}

impl DeterministicActor {
    pub fn build(
        input_dim: usize,
        hidden: &[usize],
        scale: f32,
        vb: &VarBuilder,
    ) -> candle_core::Result<Self> {
        let layers: Vec<usize> = hidden.iter().copied().chain([1]).collect();
        let net = build_sequential(input_dim, &layers, vb, "actor")?;
        Ok(Self { net, scale })
    }

    /// Shape `(batch, 1)`.
    pub fn act(&self, states: &Tensor) -> Result<Tensor> {
        Ok(self.net.forward(states)?.tanh()?.affine(self.scale as f64, 0.)?)
    }
}

/// State-action value network `Q(s, a)` over the concatenated state and action.
#[derive(Debug, Clone)]
pub struct Critic {
    net: ThreadSafeSequential,
}

impl Critic {
    pub fn build(
        state_dim: usize,
        hidden: &[usize],
        vb: &VarBuilder,
        prefix: &str,
    ) -> candle_core::Result<Self> {
        let layers: Vec<usize> = hidden.iter().copied().chain([1]).collect();
        let net = build_sequential(state_dim + 1, &layers, vb, prefix)?;
        Ok(Self { net })
    }

    /// Shape `(batch,)`.
    pub fn q(&self, states: &Tensor, actions: &Tensor) -> Result<Tensor> {
        let inputs = Tensor::cat(&[states, actions], 1)?;
        Ok(self.net.forward(&inputs)?.squeeze(1)?)
    }
}

/// Twin critics sharing one parameter store.
#[derive(Debug, Clone)]
pub struct TwinCritic {
    pub q1: Critic,
    pub q2: Critic,
}

impl TwinCritic {
    pub fn build(state_dim: usize, hidden: &[usize], vb: &VarBuilder) -> candle_core::Result<Self> {
        Ok(Self {
            q1: Critic::build(state_dim, hidden, vb, "q1_")?,
            q2: Critic::build(state_dim, hidden, vb, "q2_")?,
        })
    }

    pub fn min_q(&self, states: &Tensor, actions: &Tensor) -> Result<Tensor> {
        Ok(Tensor::minimum(
            &self.q1.q(states, actions)?,
            &self.q2.q(states, actions)?,
        )?)
    }
}

/// Gaussian noise tensor of the given shape, drawn from the shared generator.
pub fn gaussian_noise(shape: (usize, usize), std: f32, device: &Device) -> Result<Tensor> {
    let noise: Vec<f32> = (0..shape.0 * shape.1).map(|_| rng::gaussian(std)).collect();
    Ok(Tensor::from_vec(noise, shape, device)?)
}

/// First element of a `(1, 1)` or `(1,)` tensor.
pub fn first_scalar(t: &Tensor) -> Result<f32> {
    let values: Vec<f32> = t.flatten_all()?.to_vec1()?;
    values
        .first()
        .copied()
        .ok_or_else(|| anyhow::anyhow!("empty network output"))
}
