use anyhow::Result;
use rlsim_core::{
    Action, Agent, Capabilities, CoreError, LearnerCapability, ParamUpdate, State, Transition,
    UpdateOrder,
};

/// Always goes left and answers none of the optional queries.
#[derive(Default)]
struct Stubborn {
    updates: usize,
}

impl Agent for Stubborn {
    fn select_action(&mut self, _state: &State, _training: bool) -> Result<Action> {
        Ok(Action::Discrete(0))
    }

    fn update(&mut self, _transition: &Transition, _next_action: Option<Action>) -> Result<()> {
        self.updates += 1;
        Ok(())
    }

    fn reset(&mut self) -> Result<()> {
        self.updates = 0;
        Ok(())
    }

    fn capabilities(&self) -> Capabilities {
        Capabilities::default()
    }

    fn apply_params(&mut self, _params: &ParamUpdate) -> Result<()> {
        Ok(())
    }
}

#[test]
fn optional_queries_default_to_unsupported() -> Result<()> {
    let agent = Stubborn::default();
    let state = State::new(vec![0., 0.]);
    let err = agent.q_values(&state).unwrap_err();
    assert!(matches!(
        err.downcast_ref::<CoreError>(),
        Some(CoreError::Unsupported(LearnerCapability::ValueQuery))
    ));
    assert!(agent.policy_probabilities(&state, 1.).is_err());
    assert_eq!(agent.loss(), None);
    assert_eq!(agent.update_order(), UpdateOrder::Immediate);
    Ok(())
}

#[test]
fn boxed_agents_forward_every_call() -> Result<()> {
    let mut agent: Box<dyn Agent> = Box::new(Stubborn::default());
    let state = State::new(vec![1., 2.]);
    let action = agent.select_action(&state, true)?;
    let transition = Transition {
        state: state.clone(),
        action,
        reward: -0.1,
        next_state: state,
        terminated: false,
        done: false,
    };
    agent.update(&transition, None)?;
    agent.reset()?;
    assert_eq!(action, Action::Discrete(0));
    assert!(!agent.capabilities().contains(LearnerCapability::LossQuery));
    Ok(())
}

#[test]
fn param_update_is_empty_only_without_fields() {
    let empty = ParamUpdate::default();
    assert!(empty.is_empty());
    let lr_only = ParamUpdate {
        learning_rate: Some(0.5),
        ..Default::default()
    };
    assert!(!lr_only.is_empty());
}
