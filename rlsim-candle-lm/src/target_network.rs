use anyhow::{Result, anyhow};
use candle_core::{DType, Device};
use candle_nn::{VarBuilder, VarMap};

/// A frozen copy of an online network. The copy lives in its own `VarMap` whose variable names
/// mirror the online one, so parameters can be matched up by name.
pub struct TargetNetwork<M> {
    pub net: M,
    varmap: VarMap,
}

impl<M> TargetNetwork<M> {
    /// Builds the target with the same builder used for the online network and copies the online
    /// parameters into it.
    pub fn build(
        online: &VarMap,
        device: &Device,
        build: impl FnOnce(&VarBuilder) -> candle_core::Result<M>,
    ) -> Result<Self> {
        let varmap = VarMap::new();
        let vb = VarBuilder::from_varmap(&varmap, DType::F32, device);
        let net = build(&vb)?;
        let target = Self { net, varmap };
        target.hard_sync(online)?;
        Ok(target)
    }

    pub fn hard_sync(&self, online: &VarMap) -> Result<()> {
        blend(online, &self.varmap, 1.)
    }

    /// `target <- tau * online + (1 - tau) * target`
    pub fn soft_update(&self, online: &VarMap, tau: f64) -> Result<()> {
        blend(online, &self.varmap, tau)
    }

    pub fn varmap(&self) -> &VarMap {
        &self.varmap
    }
}

fn blend(online: &VarMap, target: &VarMap, tau: f64) -> Result<()> {
    let online = online
        .data()
        .lock()
        .map_err(|_| anyhow!("online parameters are poisoned"))?;
    let target = target
        .data()
        .lock()
        .map_err(|_| anyhow!("target parameters are poisoned"))?;
    for (name, var) in target.iter() {
        let src = online
            .get(name)
            .ok_or_else(|| anyhow!("online network has no parameter `{name}`"))?;
        if tau >= 1. {
            var.set(&src.as_tensor().detach())?;
        } else {
            let blended = ((src.as_tensor() * tau)? + (var.as_tensor() * (1. - tau))?)?;
            var.set(&blended.detach())?;
        }
    }
    Ok(())
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::thread_safe_sequential::build_sequential;
    use candle_core::Tensor;
    use candle_nn::Module;

    fn params(varmap: &VarMap, name: &str) -> Vec<f32> {
        let data = varmap.data().lock().unwrap();
        data.get(name)
            .unwrap()
            .as_tensor()
            .flatten_all()
            .unwrap()
            .to_vec1()
            .unwrap()
    }

    #[test]
    fn hard_sync_copies_parameters() -> Result<()> {
        let device = Device::Cpu;
        let online = VarMap::new();
        let vb = VarBuilder::from_varmap(&online, DType::F32, &device);
        let net = build_sequential(3, &[4, 1], &vb, "q")?;
        let target = TargetNetwork::build(&online, &device, |vb| {
            build_sequential(3, &[4, 1], vb, "q")
        })?;
        let xs = Tensor::ones((2, 3), DType::F32, &device)?;
        let diff = (net.forward(&xs)? - target.net.forward(&xs)?)?
            .abs()?
            .sum_all()?
            .to_scalar::<f32>()?;
        assert!(diff < 1e-6);
        Ok(())
    }

    #[test]
    fn soft_update_moves_a_fraction_towards_online() -> Result<()> {
        let device = Device::Cpu;
        let online = VarMap::new();
        let vb = VarBuilder::from_varmap(&online, DType::F32, &device);
        let _net = build_sequential(2, &[1], &vb, "q")?;
        let target =
            TargetNetwork::build(&online, &device, |vb| build_sequential(2, &[1], vb, "q"))?;
        let before = params(target.varmap(), "q0.weight");
        {
            let data = online.data().lock().unwrap();
            let w = data.get("q0.weight").unwrap();
            w.set(&(w.as_tensor() + 1.)?)?;
        }
        target.soft_update(&online, 0.25)?;
        let after = params(target.varmap(), "q0.weight");
        for (b, a) in before.iter().zip(after.iter()) {
            assert!((a - b - 0.25).abs() < 1e-5);
        }
        Ok(())
    }
}
