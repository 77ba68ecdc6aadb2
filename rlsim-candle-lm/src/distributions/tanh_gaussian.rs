use crate::thread_safe_sequential::{ThreadSafeSequential, build_sequential};
use anyhow::Result;
use candle_core::Tensor;
use candle_nn::{Module, VarBuilder};
use rlsim_core::rng;

pub const LOG_STD_MIN: f32 = -20.;
pub const LOG_STD_MAX: f32 = 2.;

/// Gaussian policy squashed through `tanh` and scaled to `[-action_scale, action_scale]`.
/// The network outputs the mean and log standard deviation side by side.
#[derive(Clone, Debug)]
pub struct TanhGaussianPolicy {
    net: ThreadSafeSequential,
    action_dim: usize,
    action_scale: f32,
}

impl TanhGaussianPolicy {
    pub fn build(
        input_dim: usize,
        action_dim: usize,
        hidden: &[usize],
        action_scale: f32,
        vb: &VarBuilder,
        prefix: &str,
    ) -> Result<Self> {
        let layers: Vec<usize> = hidden.iter().copied().chain([2 * action_dim]).collect();
        let net = build_sequential(input_dim, &layers, vb, prefix)?;
        Ok(Self {
            net,
            action_dim,
            action_scale,
        })
    }

    /// Mean and clamped log standard deviation, each of shape `(batch, action_dim)`.
    pub fn mean_log_std(&self, states: &Tensor) -> Result<(Tensor, Tensor)> {
        let out = self.net.forward(states)?;
        let mean = out.narrow(1, 0, self.action_dim)?;
        let log_std = out
            .narrow(1, self.action_dim, self.action_dim)?
            .clamp(LOG_STD_MIN, LOG_STD_MAX)?;
        Ok((mean, log_std))
    }

    /// Reparameterised sample. Returns the scaled action and its log probability, of shapes
    /// `(batch, action_dim)` and `(batch,)`.
    pub fn rsample(&self, states: &Tensor) -> Result<(Tensor, Tensor)> {
        let (mean, log_std) = self.mean_log_std(states)?;
        let noise: Vec<f32> = (0..mean.elem_count()).map(|_| rng::gaussian(1.)).collect();
        let eps = Tensor::from_vec(noise, mean.shape(), mean.device())?;
        let pre_tanh = (&mean + (log_std.exp()? * &eps)?)?;
        let squashed = pre_tanh.tanh()?;
        let logp = squashed_log_prob(&eps, &log_std, &squashed, self.action_scale)?;
        let action = squashed.affine(self.action_scale as f64, 0.)?;
        Ok((action, logp))
    }

    /// The squashed mean, used when acting without exploration.
    pub fn deterministic(&self, states: &Tensor) -> Result<Tensor> {
        let (mean, _) = self.mean_log_std(states)?;
        Ok(mean.tanh()?.affine(self.action_scale as f64, 0.)?)
    }
}

/// Log density of `action_scale * tanh(mean + std * eps)`, summed over the action dimension.
/// `squashed` is the tanh output before scaling. Shape `(batch,)`.
pub fn squashed_log_prob(
    eps: &Tensor,
    log_std: &Tensor,
    squashed: &Tensor,
    action_scale: f32,
) -> Result<Tensor> {
    let action_dim = squashed.dim(1)?;
    let half_log_2pi = 0.5 * (2. * std::f64::consts::PI).ln();
    let gaussian_logp = (eps.sqr()?.affine(-0.5, -half_log_2pi)? - log_std)?;
    let jacobian = squashed.sqr()?.affine(-1., 1. + 1e-6)?.log()?;
    let scale_correction = (action_dim as f64) * (action_scale as f64).ln();
    Ok((gaussian_logp - jacobian)?
        .sum(1)?
        .affine(1., -scale_correction)?)
}

#[cfg(test)]
mod test {
    use super::*;
    use candle_core::{DType, Device};
    use candle_nn::VarMap;

    #[test]
    fn samples_stay_within_the_action_scale() -> Result<()> {
        rng::seed(4);
        let varmap = VarMap::new();
        let vb = VarBuilder::from_varmap(&varmap, DType::F32, &Device::Cpu);
        let policy = TanhGaussianPolicy::build(3, 1, &[16], 2., &vb, "actor")?;
        let states = Tensor::randn(0f32, 1., (32, 3), &Device::Cpu)?;
        let (actions, logp) = policy.rsample(&states)?;
        assert_eq!(actions.dims(), &[32, 1]);
        assert_eq!(logp.dims(), &[32]);
        let actions: Vec<f32> = actions.flatten_all()?.to_vec1()?;
        assert!(actions.iter().all(|a| a.abs() <= 2.));
        let logp: Vec<f32> = logp.to_vec1()?;
        assert!(logp.iter().all(|l| l.is_finite()));
        Ok(())
    }

    #[test]
    fn log_prob_includes_the_tanh_and_scale_corrections() -> Result<()> {
        let device = Device::Cpu;
        let zeros = Tensor::zeros((1, 1), DType::F32, &device)?;
        // Standard normal at its mean, no squashing slope, scale 2.
        let logp = squashed_log_prob(&zeros, &zeros, &zeros, 2.)?.to_vec1::<f32>()?;
        assert!((logp[0] - -1.612_087).abs() < 1e-4);

        // std 0.5 and eps 1 put the pre-tanh sample at 0.5.
        let eps = Tensor::ones((1, 1), DType::F32, &device)?;
        let log_std = Tensor::full(0.5f32.ln(), (1, 1), &device)?;
        let squashed = Tensor::full(0.5f32.tanh(), (1, 1), &device)?;
        let logp = squashed_log_prob(&eps, &log_std, &squashed, 1.)?.to_vec1::<f32>()?;
        assert!((logp[0] - -0.485_564).abs() < 1e-4);
        Ok(())
    }
}
