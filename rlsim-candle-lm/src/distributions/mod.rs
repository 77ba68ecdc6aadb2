pub mod categorical;
pub mod tanh_gaussian;

pub use categorical::CategoricalPolicy;
pub use tanh_gaussian::TanhGaussianPolicy;
