use crate::optimizer::OptimizerWithMaxGrad;
use crate::tensors::{PolicyLoss, ValueLoss};
use anyhow::Result;

pub trait LearningModule {
    type Losses;

    fn update(&mut self, losses: Self::Losses) -> Result<()>;

    fn learning_rate(&self) -> f64;

    fn set_learning_rate(&mut self, learning_rate: f64);
}

pub struct PolicyValuesLosses {
    pub policy_loss: PolicyLoss,
    pub value_loss: ValueLoss,
}

/// The policy and the value function share one optimizer and are trained on the sum of their
/// losses.
#[derive(Debug)]
pub struct ParallelActorCritic {
    pub optimizer: OptimizerWithMaxGrad,
}

impl LearningModule for ParallelActorCritic {
    type Losses = PolicyValuesLosses;

    fn update(&mut self, losses: Self::Losses) -> Result<()> {
        let loss = losses.policy_loss.add(&losses.value_loss)?;
        self.optimizer.backward_step(&loss)?;
        Ok(())
    }

    fn learning_rate(&self) -> f64 {
        self.optimizer.learning_rate()
    }

    fn set_learning_rate(&mut self, learning_rate: f64) {
        self.optimizer.set_learning_rate(learning_rate)
    }
}

/// Policy only learner, as used by REINFORCE.
#[derive(Debug)]
pub struct PolicyOnly {
    pub optimizer: OptimizerWithMaxGrad,
}

impl LearningModule for PolicyOnly {
    type Losses = PolicyLoss;

    fn update(&mut self, losses: Self::Losses) -> Result<()> {
        self.optimizer.backward_step(&losses)?;
        Ok(())
    }

    fn learning_rate(&self) -> f64 {
        self.optimizer.learning_rate()
    }

    fn set_learning_rate(&mut self, learning_rate: f64) {
        self.optimizer.set_learning_rate(learning_rate)
    }
}
