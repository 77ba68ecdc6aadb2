// pairing tables, configuration, builders and the training loop
pub mod builders;
pub mod config;
pub mod kinds;
pub mod trainer;

pub use builders::{AgentBuilder, EnvBuilder, EnvInstance, GridLayout};
pub use config::{ConfigUpdate, Hyperparameters, ParamRange, ParamRanges};
pub use kinds::{AlgorithmInfo, AlgorithmKind, EnvKind, Paradigm};
pub use trainer::{
    CellSnapshot, EnvView, GridSnapshot, LearnedView, LoopState, MIN_SPEED, StepReport, Trainer,
    TrainingStats, tick_delay,
};
