pub mod distributions;
pub mod learning_module;
pub mod optimizer;
pub mod target_network;
pub mod tensors;
pub mod thread_safe_sequential;

pub use optimizer::OptimizerWithMaxGrad;
pub use target_network::TargetNetwork;
pub use thread_safe_sequential::{Activation, ThreadSafeSequential, build_sequential};
