use candle_core::{Result, Tensor};
use candle_nn::{Linear, Module, VarBuilder, linear};
use either::Either;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Activation {
    Relu,
    Tanh,
}

#[derive(Debug, Clone)]
pub struct LinearLayer {
    layer: Linear,
}

impl LinearLayer {
    pub fn new(in_dim: usize, out_dim: usize, vb: &VarBuilder, prefix: &str) -> Result<Self> {
        let layer = linear(in_dim, out_dim, vb.pp(prefix))?;
        Ok(Self { layer })
    }
}

impl Module for LinearLayer {
    fn forward(&self, xs: &Tensor) -> Result<Tensor> {
        self.layer.forward(xs)
    }
}

#[derive(Debug, Clone)]
pub struct ActivationLayer(pub Activation);

impl Module for ActivationLayer {
    fn forward(&self, xs: &Tensor) -> Result<Tensor> {
        match self.0 {
            Activation::Relu => xs.relu(),
            Activation::Tanh => xs.tanh(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct ThreadSafeLayer(pub Either<LinearLayer, ActivationLayer>);

impl ThreadSafeLayer {
    pub fn linear(linear: LinearLayer) -> Self {
        Self(Either::Left(linear))
    }

    pub fn activation(activation: ActivationLayer) -> Self {
        Self(Either::Right(activation))
    }
}

impl Module for ThreadSafeLayer {
    fn forward(&self, xs: &Tensor) -> Result<Tensor> {
        match &self.0 {
            Either::Left(linear) => linear.forward(xs),
            Either::Right(activation) => activation.forward(xs),
        }
    }
}

#[derive(Default, Debug, Clone)]
pub struct ThreadSafeSequential {
    layers: Vec<ThreadSafeLayer>,
}

impl Module for ThreadSafeSequential {
    fn forward(&self, xs: &Tensor) -> Result<Tensor> {
        let mut xs = xs.clone();
        for layer in self.layers.iter() {
            xs = layer.forward(&xs)?
        }
        Ok(xs)
    }
}

impl ThreadSafeSequential {
    pub fn add_layer(mut self, layer: ThreadSafeLayer) -> Self {
        self.layers.push(layer);
        self
    }

    pub fn len(&self) -> usize {
        self.layers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.layers.is_empty()
    }
}

/// Relu network. `layers` lists every layer's output size, the last one being the output layer,
/// which is left linear.
pub fn build_sequential(
    input_dim: usize,
    layers: &[usize],
    vb: &VarBuilder,
    prefix: &str,
) -> Result<ThreadSafeSequential> {
    build_sequential_with(input_dim, layers, Activation::Relu, vb, prefix)
}

pub fn build_sequential_with(
    input_dim: usize,
    layers: &[usize],
    activation: Activation,
    vb: &VarBuilder,
    prefix: &str,
) -> Result<ThreadSafeSequential> {
    let mut last_dim = input_dim;
    let mut nn = ThreadSafeSequential::default();
    let num_layers = layers.len();
    for (layer_idx, layer_size) in layers.iter().enumerate() {
        let layer_pp = format!("{prefix}{layer_idx}");
        let lin_layer = LinearLayer::new(last_dim, *layer_size, vb, &layer_pp)?;
        nn = nn.add_layer(ThreadSafeLayer::linear(lin_layer));
        if layer_idx != num_layers - 1 {
            nn = nn.add_layer(ThreadSafeLayer::activation(ActivationLayer(activation)));
        }
        last_dim = *layer_size;
    }
    Ok(nn)
}

#[cfg(test)]
mod test {
    use super::*;
    use candle_core::{DType, Device};
    use candle_nn::VarMap;

    #[test]
    fn hidden_layers_are_followed_by_activations() -> anyhow::Result<()> {
        let varmap = VarMap::new();
        let vb = VarBuilder::from_varmap(&varmap, DType::F32, &Device::Cpu);
        let net = build_sequential_with(4, &[8, 8, 2], Activation::Tanh, &vb, "net")?;
        assert_eq!(net.len(), 5);
        let out = net.forward(&Tensor::zeros((3, 4), DType::F32, &Device::Cpu)?)?;
        assert_eq!(out.dims(), &[3, 2]);
        assert_eq!(varmap.all_vars().len(), 6);
        Ok(())
    }
}
