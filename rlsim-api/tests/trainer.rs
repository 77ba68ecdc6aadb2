use anyhow::{Result, anyhow};
use candle_core::Device;
use rlsim_api::{
    AgentBuilder, AlgorithmKind, ConfigUpdate, EnvBuilder, EnvKind, LearnedView, LoopState,
    Trainer, TrainingStats,
};
use rlsim_core::{
    Action, Agent, Capabilities, CoreError, Env, LearnerCapability, ParamUpdate, State,
    Transition, UpdateOrder, rng,
};
use rlsim_gym::RewardConfig;
use std::cell::RefCell;
use std::ops::ControlFlow;
use std::rc::Rc;

#[derive(Default)]
struct Log {
    selected: Vec<Action>,
    updates: Vec<(Transition, Option<Action>)>,
}

/// Acts at random and records what the loop hands it.
struct RecordingAgent {
    log: Rc<RefCell<Log>>,
    order: UpdateOrder,
}

impl Agent for RecordingAgent {
    fn select_action(&mut self, _state: &State, _training: bool) -> Result<Action> {
        let action = Action::Discrete(rng::index(4));
        self.log.borrow_mut().selected.push(action);
        Ok(action)
    }

    fn update(&mut self, transition: &Transition, next_action: Option<Action>) -> Result<()> {
        self.log
            .borrow_mut()
            .updates
            .push((transition.clone(), next_action));
        Ok(())
    }

    fn reset(&mut self) -> Result<()> {
        Ok(())
    }

    fn capabilities(&self) -> Capabilities {
        Capabilities::default()
    }

    fn update_order(&self) -> UpdateOrder {
        self.order
    }

    fn apply_params(&mut self, _params: &ParamUpdate) -> Result<()> {
        Ok(())
    }
}

/// Claims to answer value queries but every query fails.
struct BrokenValues;

impl Agent for BrokenValues {
    fn select_action(&mut self, _state: &State, _training: bool) -> Result<Action> {
        Ok(Action::Discrete(rng::index(4)))
    }

    fn update(&mut self, _transition: &Transition, _next_action: Option<Action>) -> Result<()> {
        Ok(())
    }

    fn reset(&mut self) -> Result<()> {
        Ok(())
    }

    fn capabilities(&self) -> Capabilities {
        [LearnerCapability::ValueQuery].into_iter().collect()
    }

    fn q_values(&self, _state: &State) -> Result<Vec<f32>> {
        Err(anyhow!("value head shape mismatch"))
    }

    fn apply_params(&mut self, _params: &ParamUpdate) -> Result<()> {
        Ok(())
    }
}

fn recording_trainer(order: UpdateOrder) -> Result<(Trainer, Rc<RefCell<Log>>)> {
    let log = Rc::new(RefCell::new(Log::default()));
    let agent = RecordingAgent {
        log: log.clone(),
        order,
    };
    let trainer = Trainer::with_agent(
        EnvBuilder::new(EnvKind::GridWorld),
        AgentBuilder::new(AlgorithmKind::Sarsa),
        Box::new(agent),
        Device::Cpu,
    )?;
    Ok((trainer, log))
}

#[test]
fn deferred_updates_bootstrap_from_the_next_selected_action() -> Result<()> {
    rng::seed(21);
    let (mut trainer, log) = recording_trainer(UpdateOrder::DeferredOnPolicy)?;
    trainer.run_episodes(2)?;
    let log = log.borrow();
    assert_eq!(log.updates.len(), log.selected.len());
    for (idx, (transition, next_action)) in log.updates.iter().enumerate() {
        assert_eq!(transition.action, log.selected[idx]);
        if transition.done {
            assert_eq!(*next_action, None);
        } else {
            assert_eq!(*next_action, Some(log.selected[idx + 1]));
        }
    }
    assert_eq!(log.updates.iter().filter(|(t, _)| t.done).count(), 2);
    Ok(())
}

#[test]
fn immediate_updates_never_see_a_next_action() -> Result<()> {
    rng::seed(22);
    let (mut trainer, log) = recording_trainer(UpdateOrder::Immediate)?;
    trainer.run(50, None, |_| ControlFlow::Continue(()))?;
    let log = log.borrow();
    assert_eq!(log.updates.len(), 50);
    assert!(log.updates.iter().all(|(_, next)| next.is_none()));
    Ok(())
}

#[test]
fn incompatible_selection_switches_the_other_side() -> Result<()> {
    let mut trainer = Trainer::new(EnvKind::GridWorld, AlgorithmKind::DQN)?;
    trainer.select_algorithm(AlgorithmKind::TD3)?;
    assert_eq!(trainer.env_kind(), EnvKind::Pendulum);
    assert_eq!(trainer.algorithm(), AlgorithmKind::TD3);

    trainer.select_environment(EnvKind::CartPole)?;
    assert_eq!(trainer.algorithm(), AlgorithmKind::Reinforce);

    trainer.select_algorithm(AlgorithmKind::A3C)?;
    assert_eq!(trainer.env_kind(), EnvKind::CartPole);
    Ok(())
}

#[test]
fn swapping_stops_training_and_clears_progress() -> Result<()> {
    rng::seed(5);
    let mut trainer = Trainer::new(EnvKind::GridWorld, AlgorithmKind::QLearning)?;
    trainer.run_episodes(1)?;
    trainer.start();
    trainer.select_algorithm(AlgorithmKind::ExpectedSarsa)?;
    assert_eq!(trainer.loop_state(), LoopState::Idle);
    assert_eq!(trainer.stats(), &TrainingStats::default());
    assert!(trainer.episode_rewards().is_empty());
    Ok(())
}

#[test]
fn queued_config_is_clamped_and_applied_before_the_next_tick() -> Result<()> {
    rng::seed(8);
    let mut trainer = Trainer::new(EnvKind::GridWorld, AlgorithmKind::QLearning)?;
    trainer.queue_config(ConfigUpdate {
        params: ParamUpdate {
            learning_rate: Some(5.),
            clip_epsilon: Some(0.3),
            ..Default::default()
        },
        rewards: Some(RewardConfig {
            step_penalty: -0.5,
            ..Default::default()
        }),
    });
    assert!(trainer.has_pending_config());
    assert!((trainer.hyperparameters().learning_rate - 0.1).abs() < 1e-6);

    // Every move out of the start cell is an ordinary step.
    let report = trainer.tick()?;
    assert!(!trainer.has_pending_config());
    assert_eq!(trainer.hyperparameters().learning_rate, 1.0);
    assert_eq!(trainer.hyperparameters().clip_epsilon, 0.2);
    assert_eq!(report.reward, -0.5);
    Ok(())
}

#[test]
fn episodes_roll_into_the_history_and_average() -> Result<()> {
    rng::seed(3);
    let mut trainer = Trainer::new(EnvKind::GridWorld, AlgorithmKind::QLearning)?;
    trainer.run_episodes(4)?;
    let stats = trainer.stats().clone();
    let history = trainer.episode_rewards();
    assert_eq!(stats.episode, 4);
    assert_eq!(stats.step, 0);
    assert_eq!(history.len(), 4);
    let mean = history.iter().sum::<f32>() / 4.;
    assert!((stats.average_reward - mean).abs() < 1e-4);
    assert!((stats.total_reward - history.iter().sum::<f32>()).abs() < 1e-3);
    assert!(stats.last_loss.is_some());
    Ok(())
}

#[test]
fn history_keeps_only_the_latest_hundred_episodes() -> Result<()> {
    rng::seed(4);
    let mut trainer = Trainer::new(EnvKind::GridWorld, AlgorithmKind::QLearning)?;
    trainer.run_episodes(105)?;
    assert_eq!(trainer.stats().episode, 105);
    assert_eq!(trainer.episode_rewards().len(), 100);
    Ok(())
}

#[test]
fn reports_carry_q_values_for_value_learners() -> Result<()> {
    rng::seed(6);
    let mut trainer = Trainer::new(EnvKind::GridWorld, AlgorithmKind::Sarsa)?;
    let report = trainer.tick()?;
    match report.learned {
        LearnedView::Values(values) => assert_eq!(values.len(), 4),
        other => panic!("expected action values, got {other:?}"),
    }
    assert_eq!(report.stats.step, 1);
    Ok(())
}

#[test]
fn reset_forgets_everything_learned() -> Result<()> {
    rng::seed(9);
    let mut trainer = Trainer::new(EnvKind::GridWorld, AlgorithmKind::QLearning)?;
    trainer.run_episodes(3)?;
    trainer.reset()?;
    assert_eq!(trainer.stats(), &TrainingStats::default());
    let grid = trainer.env().as_grid().unwrap();
    for cell in grid.cells() {
        let state = rlsim_gym::GridWorld::cell_state(&cell);
        let values = trainer.agent().q_values(&state)?;
        assert!(values.iter().all(|v| *v == 0.));
    }
    assert_eq!(trainer.env().state(), State::new(vec![0., 0.]));
    Ok(())
}

#[test]
fn evaluation_leaves_training_progress_alone() -> Result<()> {
    rng::seed(10);
    let mut trainer = Trainer::new(EnvKind::CartPole, AlgorithmKind::Reinforce)?;
    trainer.run_episodes(1)?;
    let before = trainer.stats().clone();
    let returns = trainer.evaluate(3)?;
    assert_eq!(returns.len(), 3);
    assert!(returns.iter().all(|r| *r >= 0. && *r <= 500.));
    assert_eq!(trainer.stats(), &before);
    assert!(
        trainer
            .agent()
            .capabilities()
            .contains(LearnerCapability::PolicyQuery)
    );
    Ok(())
}

#[test]
fn callback_break_stops_the_loop() -> Result<()> {
    rng::seed(11);
    let mut trainer = Trainer::new(EnvKind::Pendulum, AlgorithmKind::DDPG)?;
    let ticks = trainer.run(1_000, None, |report| {
        if report.stats.step >= 5 {
            ControlFlow::Break(())
        } else {
            ControlFlow::Continue(())
        }
    })?;
    assert_eq!(ticks, 5);
    assert_eq!(trainer.loop_state(), LoopState::Idle);
    Ok(())
}

#[test]
fn total_steps_keep_counting_across_episodes() -> Result<()> {
    rng::seed(12);
    let (mut trainer, log) = recording_trainer(UpdateOrder::Immediate)?;
    let mut totals = vec![];
    let mut episode_lengths = vec![];
    let mut running = 0;
    let ticks = trainer.run(usize::MAX, None, |report| {
        totals.push(report.stats.total_steps);
        running += 1;
        if report.done {
            episode_lengths.push(running);
            running = 0;
        }
        if report.stats.episode >= 3 {
            ControlFlow::Break(())
        } else {
            ControlFlow::Continue(())
        }
    })?;
    assert_eq!(episode_lengths.len(), 3);
    assert_eq!(totals, (1..=ticks).collect::<Vec<_>>());
    let stats = trainer.stats();
    assert_eq!(stats.step, 0);
    assert_eq!(stats.total_steps, episode_lengths.iter().sum::<usize>());
    assert_eq!(stats.total_steps, log.borrow().updates.len());

    trainer.reset()?;
    assert_eq!(trainer.stats().total_steps, 0);
    Ok(())
}

#[test]
fn failed_queries_leave_the_view_unavailable() -> Result<()> {
    rng::seed(13);
    let mut trainer = Trainer::with_agent(
        EnvBuilder::new(EnvKind::GridWorld),
        AgentBuilder::new(AlgorithmKind::QLearning),
        Box::new(BrokenValues),
        Device::Cpu,
    )?;
    let report = trainer.tick()?;
    assert_eq!(report.learned, LearnedView::Unavailable);
    assert_eq!(report.stats.total_steps, 1);
    Ok(())
}

#[test]
fn trained_agents_reject_states_of_another_environment() -> Result<()> {
    rng::seed(14);
    let mut trainer = Trainer::new(EnvKind::GridWorld, AlgorithmKind::QLearning)?;
    trainer.run(10, None, |_| ControlFlow::Continue(()))?;
    let cartpole_state = State::new(vec![0., 0., 7., 7.]);
    let err = trainer.agent().q_values(&cartpole_state).unwrap_err();
    assert!(matches!(
        err.downcast_ref::<CoreError>(),
        Some(CoreError::StateDimension {
            expected: 2,
            actual: 4
        })
    ));
    Ok(())
}
