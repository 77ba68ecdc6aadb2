use crate::builders::{AgentBuilder, EnvBuilder, EnvInstance};
use crate::config::{ConfigUpdate, Hyperparameters, ParamRanges};
use crate::kinds::{AlgorithmKind, EnvKind, check_pairing};
use anyhow::Result;
use candle_core::Device;
use rlsim_core::buffers::ReplayBuffer;
use rlsim_core::{Action, Agent, Env, LearnerCapability, State, Transition, UpdateOrder};
use rlsim_gym::{Cell, GridWorld};
use serde::Serialize;
use std::ops::ControlFlow;
use std::time::Duration;
use tracing::{info, warn};

/// Number of finished episodes the rolling average is taken over.
pub const HISTORY_CAPACITY: usize = 100;
/// Greedy evaluation episodes are cut after this many steps, since a grid world policy may
/// never reach the goal.
pub const EVALUATION_STEP_LIMIT: usize = 1_000;

/// Slowest speed multiplier a view can ask for.
pub const MIN_SPEED: f32 = 0.1;

/// Delay between two ticks for a given speed multiplier.
pub fn tick_delay(speed: f32) -> Duration {
    let micros = (100_000. / speed.max(MIN_SPEED)).max(10_000.);
    Duration::from_micros(micros as u64)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoopState {
    Idle,
    Training,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct TrainingStats {
    /// Finished episodes.
    pub episode: usize,
    /// Steps taken in the running episode.
    pub step: usize,
    /// Steps taken across every episode since the last reset.
    pub total_steps: usize,
    pub episode_reward: f32,
    pub total_reward: f32,
    pub average_reward: f32,
    pub last_loss: Option<f32>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum EnvView {
    Grid(Cell),
    Continuous(Vec<f32>),
}

/// What the agent currently believes about the observed state.
#[derive(Debug, Clone, PartialEq)]
pub enum LearnedView {
    Values(Vec<f32>),
    Policy(Vec<f32>),
    Unavailable,
}

/// Everything a view needs to redraw after one step.
#[derive(Debug, Clone, PartialEq)]
pub struct StepReport {
    pub env: EnvView,
    pub action: Action,
    pub action_name: String,
    pub reward: f32,
    pub done: bool,
    /// Return of the episode this step finished, if any.
    pub episode_return: Option<f32>,
    pub learned: LearnedView,
    pub stats: TrainingStats,
}

#[derive(Debug, Clone, PartialEq)]
pub struct CellSnapshot {
    pub cell: Cell,
    pub obstacle: bool,
    pub goal: bool,
    pub values: Option<Vec<f32>>,
    pub policy: Option<Vec<f32>>,
}

/// Per cell values and policy of the whole grid, row major. Obstacles are not queried.
#[derive(Debug, Clone, PartialEq)]
pub struct GridSnapshot {
    pub rows: usize,
    pub cols: usize,
    pub position: Cell,
    pub cells: Vec<CellSnapshot>,
}

impl GridSnapshot {
    pub fn cell(&self, cell: &Cell) -> Option<&CellSnapshot> {
        self.cells.get(cell.row * self.cols + cell.col)
    }
}

/// Drives one environment and one agent in lockstep.
pub struct Trainer {
    device: Device,
    env_builder: EnvBuilder,
    agent_builder: AgentBuilder,
    env: EnvInstance,
    agent: Box<dyn Agent>,
    loop_state: LoopState,
    current: State,
    // SARSA style agents learn from the previous transition once the next action is known.
    deferred: Option<Transition>,
    pending: Option<ConfigUpdate>,
    stats: TrainingStats,
    history: ReplayBuffer<f32>,
}

impl Trainer {
    pub fn new(env: EnvKind, algorithm: AlgorithmKind) -> Result<Self> {
        Self::from_builders(EnvBuilder::new(env), AgentBuilder::new(algorithm), Device::Cpu)
    }

    pub fn from_builders(
        env_builder: EnvBuilder,
        agent_builder: AgentBuilder,
        device: Device,
    ) -> Result<Self> {
        let env = env_builder.build()?;
        let agent = agent_builder.build(&device, env_builder.kind, &env.env_description())?;
        Ok(Self::assemble(env_builder, agent_builder, env, agent, device))
    }

    /// Uses an already built agent. `agent_builder` still names the pairing and is used when the
    /// agent has to be rebuilt after a swap.
    pub fn with_agent(
        env_builder: EnvBuilder,
        agent_builder: AgentBuilder,
        agent: Box<dyn Agent>,
        device: Device,
    ) -> Result<Self> {
        check_pairing(env_builder.kind, agent_builder.algorithm)?;
        let env = env_builder.build()?;
        Ok(Self::assemble(env_builder, agent_builder, env, agent, device))
    }

    fn assemble(
        env_builder: EnvBuilder,
        agent_builder: AgentBuilder,
        env: EnvInstance,
        agent: Box<dyn Agent>,
        device: Device,
    ) -> Self {
        info!(
            env = %env_builder.kind,
            algorithm = %agent_builder.algorithm,
            "trainer ready"
        );
        Self {
            device,
            env_builder,
            agent_builder,
            current: env.state(),
            env,
            agent,
            loop_state: LoopState::Idle,
            deferred: None,
            pending: None,
            stats: TrainingStats::default(),
            history: ReplayBuffer::new(HISTORY_CAPACITY),
        }
    }

    pub fn env_kind(&self) -> EnvKind {
        self.env_builder.kind
    }

    pub fn algorithm(&self) -> AlgorithmKind {
        self.agent_builder.algorithm
    }

    pub fn hyperparameters(&self) -> &Hyperparameters {
        &self.agent_builder.hyperparameters
    }

    pub fn param_ranges(&self) -> ParamRanges {
        ParamRanges::for_algorithm(self.algorithm())
    }

    pub fn env(&self) -> &EnvInstance {
        &self.env
    }

    pub fn agent(&self) -> &dyn Agent {
        self.agent.as_ref()
    }

    pub fn loop_state(&self) -> LoopState {
        self.loop_state
    }

    pub fn is_training(&self) -> bool {
        self.loop_state == LoopState::Training
    }

    pub fn stats(&self) -> &TrainingStats {
        &self.stats
    }

    /// Returns of the most recent episodes, oldest first.
    pub fn episode_rewards(&self) -> Vec<f32> {
        self.history.iter().copied().collect()
    }

    pub fn start(&mut self) {
        if self.loop_state == LoopState::Idle {
            info!(algorithm = %self.algorithm(), "training started");
            self.loop_state = LoopState::Training;
        }
    }

    /// Halts scheduling. Learned state is kept.
    pub fn stop(&mut self) {
        if self.loop_state == LoopState::Training {
            info!(episode = self.stats.episode, "training stopped");
            self.loop_state = LoopState::Idle;
        }
    }

    /// Clears learned state, the environment position and every counter.
    pub fn reset(&mut self) -> Result<()> {
        self.stop();
        self.apply_pending()?;
        self.agent.reset()?;
        self.current = self.env.reset()?;
        self.clear_progress();
        info!("trainer reset");
        Ok(())
    }

    /// Swaps the environment. When the current algorithm cannot run on it, the environment's
    /// first compatible algorithm replaces it.
    pub fn select_environment(&mut self, env: EnvKind) -> Result<()> {
        let algorithm = if env.supports(self.algorithm()) {
            self.algorithm()
        } else {
            env.default_algorithm()
        };
        self.swap(env, algorithm)
    }

    /// Swaps the algorithm, moving to its home environment when the current one is incompatible.
    pub fn select_algorithm(&mut self, algorithm: AlgorithmKind) -> Result<()> {
        let env = if self.env_kind().supports(algorithm) {
            self.env_kind()
        } else {
            algorithm.home_env()
        };
        self.swap(env, algorithm)
    }

    fn swap(&mut self, env: EnvKind, algorithm: AlgorithmKind) -> Result<()> {
        self.stop();
        let env_builder = EnvBuilder {
            kind: env,
            ..self.env_builder.clone()
        };
        let agent_builder = AgentBuilder::new(algorithm);
        let new_env = env_builder.build()?;
        let agent = agent_builder.build(&self.device, env, &new_env.env_description())?;
        info!(
            from_env = %self.env_kind(),
            from_algorithm = %self.algorithm(),
            env = %env,
            algorithm = %algorithm,
            "pairing swapped"
        );
        self.current = new_env.state();
        self.env = new_env;
        self.agent = agent;
        self.env_builder = env_builder;
        self.agent_builder = agent_builder;
        self.pending = None;
        self.clear_progress();
        Ok(())
    }

    /// Queues a configuration change. It is applied before the next tick, never mid step.
    /// Later updates override the fields of earlier ones still pending.
    pub fn queue_config(&mut self, update: ConfigUpdate) {
        let pending = self.pending.get_or_insert_with(ConfigUpdate::default);
        let params = &update.params;
        if params.learning_rate.is_some() {
            pending.params.learning_rate = params.learning_rate;
        }
        if params.discount_factor.is_some() {
            pending.params.discount_factor = params.discount_factor;
        }
        if params.epsilon.is_some() {
            pending.params.epsilon = params.epsilon;
        }
        if params.clip_epsilon.is_some() {
            pending.params.clip_epsilon = params.clip_epsilon;
        }
        if update.rewards.is_some() {
            pending.rewards = update.rewards;
        }
    }

    pub fn has_pending_config(&self) -> bool {
        self.pending.is_some()
    }

    fn apply_pending(&mut self) -> Result<()> {
        let Some(update) = self.pending.take() else {
            return Ok(());
        };
        let params = self.param_ranges().clamp(&update.params);
        if !params.is_empty() {
            self.agent
                .apply_params(&params)
                .inspect_err(|err| warn!(%err, "configuration rejected by the agent"))?;
            self.agent_builder.hyperparameters.merge(&params);
            info!(?params, "configuration applied");
        }
        if let Some(rewards) = update.rewards {
            match self.env.as_grid_mut() {
                Some(grid) => {
                    grid.set_rewards(rewards);
                    self.env_builder.rewards = rewards;
                    info!(?rewards, "reward shaping applied");
                }
                None => warn!(env = %self.env_kind(), "reward shaping only applies to the grid world"),
            }
        }
        Ok(())
    }

    /// Runs one step of the loop: select, step, learn, and roll over the episode when it ended.
    pub fn tick(&mut self) -> Result<StepReport> {
        self.apply_pending()?;
        let state = self.current.clone();
        self.check_state(&state)?;
        let action = self.agent.select_action(&state, true)?;
        if let Some(previous) = self.deferred.take() {
            self.learn(&previous, Some(action))?;
        }
        let snapshot = self.env.step(&action)?;
        self.check_state(&snapshot.state)?;
        let transition = Transition::new(state, action, &snapshot);
        match self.agent.update_order() {
            UpdateOrder::DeferredOnPolicy if !transition.done => {
                self.deferred = Some(transition);
            }
            _ => self.learn(&transition, None)?,
        }

        self.stats.step += 1;
        self.stats.total_steps += 1;
        self.stats.episode_reward += snapshot.reward;
        self.stats.total_reward += snapshot.reward;
        let env = self.env_view(&snapshot.state);
        let learned = self.learned_view(&snapshot.state);
        let action_name = self.env.action_name(&action);
        let episode_return = if snapshot.done() {
            Some(self.finish_episode()?)
        } else {
            self.current = snapshot.state;
            None
        };
        Ok(StepReport {
            env,
            action,
            action_name,
            reward: snapshot.reward,
            done: episode_return.is_some(),
            episode_return,
            learned,
            stats: self.stats.clone(),
        })
    }

    /// Ticks while training, until the callback breaks or `budget` ticks have run. Sleeps
    /// `delay` between ticks when one is given. Returns the number of ticks taken.
    pub fn run<F>(&mut self, budget: usize, delay: Option<Duration>, mut on_step: F) -> Result<usize>
    where
        F: FnMut(&StepReport) -> ControlFlow<()>,
    {
        self.start();
        let mut ticks = 0;
        while self.is_training() && ticks < budget {
            let report = self.tick()?;
            ticks += 1;
            if on_step(&report).is_break() {
                self.stop();
            } else if let Some(delay) = delay {
                std::thread::sleep(delay);
            }
        }
        self.stop();
        Ok(ticks)
    }

    /// Trains until `episodes` more episodes have finished.
    pub fn run_episodes(&mut self, episodes: usize) -> Result<usize> {
        let target = self.stats.episode + episodes;
        self.run(usize::MAX, None, |report| {
            if report.stats.episode >= target {
                ControlFlow::Break(())
            } else {
                ControlFlow::Continue(())
            }
        })
    }

    /// Plays `episodes` greedy episodes on a fresh environment of the same kind and returns their
    /// returns. Learned state and loop counters are left alone.
    pub fn evaluate(&mut self, episodes: usize) -> Result<Vec<f32>> {
        let mut env = self.env_builder.build()?;
        let mut returns = Vec::with_capacity(episodes);
        for _ in 0..episodes {
            let mut state = env.reset()?;
            let mut total = 0.;
            for _ in 0..EVALUATION_STEP_LIMIT {
                let action = self.agent.select_action(&state, false)?;
                let snapshot = env.step(&action)?;
                total += snapshot.reward;
                if snapshot.done() {
                    break;
                }
                state = snapshot.state;
            }
            returns.push(total);
        }
        info!(episodes, ?returns, "evaluation finished");
        Ok(returns)
    }

    /// Value and policy maps of every grid cell. `None` outside the grid world.
    pub fn grid_snapshot(&self, temperature: f32) -> Result<Option<GridSnapshot>> {
        let Some(grid) = self.env.as_grid() else {
            return Ok(None);
        };
        let caps = self.agent.capabilities();
        let mut cells = Vec::with_capacity(grid.rows() * grid.cols());
        for cell in grid.cells() {
            let obstacle = grid.is_obstacle(&cell);
            let state = GridWorld::cell_state(&cell);
            let values = if !obstacle && caps.contains(LearnerCapability::ValueQuery) {
                Some(self.agent.q_values(&state)?)
            } else {
                None
            };
            let policy = if !obstacle && caps.contains(LearnerCapability::PolicyQuery) {
                Some(self.agent.policy_probabilities(&state, temperature)?)
            } else {
                None
            };
            cells.push(CellSnapshot {
                cell,
                obstacle,
                goal: cell == grid.goal(),
                values,
                policy,
            });
        }
        Ok(Some(GridSnapshot {
            rows: grid.rows(),
            cols: grid.cols(),
            position: grid.position(),
            cells,
        }))
    }

    fn learn(&mut self, transition: &Transition, next_action: Option<Action>) -> Result<()> {
        self.agent
            .update(transition, next_action)
            .inspect_err(|err| warn!(%err, "update rejected"))?;
        if let Some(loss) = self.agent.loss() {
            self.stats.last_loss = Some(loss);
        }
        Ok(())
    }

    fn finish_episode(&mut self) -> Result<f32> {
        let episode_return = self.stats.episode_reward;
        self.history.push(episode_return);
        self.stats.episode += 1;
        self.stats.average_reward = self.average_reward();
        info!(
            episode = self.stats.episode,
            steps = self.stats.step,
            reward = episode_return,
            average = self.stats.average_reward,
            "episode finished"
        );
        self.stats.step = 0;
        self.stats.episode_reward = 0.;
        self.deferred = None;
        self.current = self.env.reset()?;
        self.check_state(&self.current)?;
        Ok(episode_return)
    }

    fn check_state(&self, state: &State) -> Result<()> {
        self.env
            .env_description()
            .check_state(state)
            .inspect_err(|err| warn!(%err, env = %self.env_kind(), "malformed state"))?;
        Ok(())
    }

    fn average_reward(&self) -> f32 {
        if self.history.is_empty() {
            0.
        } else {
            self.history.iter().sum::<f32>() / self.history.len() as f32
        }
    }

    fn clear_progress(&mut self) {
        self.deferred = None;
        self.stats = TrainingStats::default();
        self.history.clear();
    }

    fn env_view(&self, state: &State) -> EnvView {
        match self.env.as_grid() {
            Some(grid) => EnvView::Grid(grid.position()),
            None => EnvView::Continuous(state.values().to_vec()),
        }
    }

    fn learned_view(&self, state: &State) -> LearnedView {
        let caps = self.agent.capabilities();
        let view = if caps.contains(LearnerCapability::ValueQuery) {
            self.agent.q_values(state).map(LearnedView::Values)
        } else if caps.contains(LearnerCapability::PolicyQuery) {
            self.agent.policy_probabilities(state, 1.).map(LearnedView::Policy)
        } else {
            Ok(LearnedView::Unavailable)
        };
        view.unwrap_or_else(|err| {
            warn!(%err, algorithm = %self.algorithm(), "learned view unavailable");
            LearnedView::Unavailable
        })
    }
}
