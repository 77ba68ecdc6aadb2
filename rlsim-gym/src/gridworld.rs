use anyhow::Result;
use rlsim_core::{Action, CoreError, Env, EnvironmentDescription, SnapShot, Space, State};
use serde::{Deserialize, Serialize};

/// Reward shaping of the grid world. All values are signed rewards.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RewardConfig {
    pub goal_reward: f32,
    pub obstacle_penalty: f32,
    pub step_penalty: f32,
    /// Added to every step once the episode ran for more than `time_penalty_threshold` steps.
    pub time_penalty: f32,
    pub time_penalty_threshold: usize,
}

impl Default for RewardConfig {
    fn default() -> Self {
        Self {
            goal_reward: 10.,
            obstacle_penalty: -1.,
            step_penalty: -0.1,
            time_penalty: 0.,
            time_penalty_threshold: 50,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Cell {
    pub row: usize,
    pub col: usize,
}

impl Cell {
    pub const fn new(row: usize, col: usize) -> Self {
        Self { row, col }
    }

    pub fn manhattan(&self, other: &Cell) -> usize {
        self.row.abs_diff(other.row) + self.col.abs_diff(other.col)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GridAction {
    Up,
    Down,
    Left,
    Right,
}

impl GridAction {
    pub const ALL: [GridAction; 4] = [Self::Up, Self::Down, Self::Left, Self::Right];

    pub fn name(&self) -> &'static str {
        match self {
            Self::Up => "Up",
            Self::Down => "Down",
            Self::Left => "Left",
            Self::Right => "Right",
        }
    }
}

impl TryFrom<usize> for GridAction {
    type Error = CoreError;

    fn try_from(value: usize) -> Result<Self, Self::Error> {
        Self::ALL
            .get(value)
            .copied()
            .ok_or(CoreError::ActionKind {
                expected: "grid action in 0..4",
            })
    }
}

#[derive(Debug, Clone)]
pub struct GridWorld {
    rows: usize,
    cols: usize,
    start: Cell,
    goal: Cell,
    obstacles: Vec<Cell>,
    position: Cell,
    rewards: RewardConfig,
    steps: usize,
}

impl Default for GridWorld {
    fn default() -> Self {
        let obstacles = [(1, 1), (1, 2), (2, 1), (3, 3), (3, 4), (4, 3)];
        Self::new(
            6,
            6,
            Cell::new(0, 0),
            Cell::new(5, 5),
            obstacles.map(|(r, c)| Cell::new(r, c)).to_vec(),
        )
    }
}

impl GridWorld {
    pub fn new(rows: usize, cols: usize, start: Cell, goal: Cell, obstacles: Vec<Cell>) -> Self {
        Self {
            rows,
            cols,
            start,
            goal,
            obstacles,
            position: start,
            rewards: RewardConfig::default(),
            steps: 0,
        }
    }

    /// The 10x10 layout.
    pub fn large() -> Self {
        let obstacles = [
            (2, 2),
            (2, 3),
            (3, 2),
            (5, 5),
            (5, 6),
            (6, 5),
            (7, 7),
            (7, 8),
        ];
        Self::new(
            10,
            10,
            Cell::new(0, 0),
            Cell::new(9, 9),
            obstacles.map(|(r, c)| Cell::new(r, c)).to_vec(),
        )
    }

    /// Square grid without obstacles, goal in the far corner.
    pub fn open(size: usize) -> Self {
        let last = size.saturating_sub(1);
        Self::new(size, size, Cell::new(0, 0), Cell::new(last, last), vec![])
    }

    pub fn with_rewards(mut self, rewards: RewardConfig) -> Self {
        self.rewards = rewards;
        self
    }

    pub fn set_rewards(&mut self, rewards: RewardConfig) {
        self.rewards = rewards;
    }

    pub fn rewards(&self) -> &RewardConfig {
        &self.rewards
    }

    pub fn rows(&self) -> usize {
        self.rows
    }

    pub fn cols(&self) -> usize {
        self.cols
    }

    pub fn position(&self) -> Cell {
        self.position
    }

    pub fn goal(&self) -> Cell {
        self.goal
    }

    pub fn obstacles(&self) -> &[Cell] {
        &self.obstacles
    }

    pub fn steps(&self) -> usize {
        self.steps
    }

    pub fn is_obstacle(&self, cell: &Cell) -> bool {
        self.obstacles.contains(cell)
    }

    pub fn cell_state(cell: &Cell) -> State {
        State::new(vec![cell.row as f32, cell.col as f32])
    }

    /// Every cell in row major order.
    pub fn cells(&self) -> impl Iterator<Item = Cell> + '_ {
        (0..self.rows).flat_map(move |row| (0..self.cols).map(move |col| Cell::new(row, col)))
    }

    fn moved(&self, action: GridAction) -> Cell {
        let Cell { row, col } = self.position;
        match action {
            GridAction::Up => Cell::new(row.saturating_sub(1), col),
            GridAction::Down => Cell::new((row + 1).min(self.rows - 1), col),
            GridAction::Left => Cell::new(row, col.saturating_sub(1)),
            GridAction::Right => Cell::new(row, (col + 1).min(self.cols - 1)),
        }
    }

    fn time_penalty(&self) -> f32 {
        if self.steps > self.rewards.time_penalty_threshold {
            self.rewards.time_penalty
        } else {
            0.
        }
    }
}

impl Env for GridWorld {
    fn reset(&mut self) -> Result<State> {
        self.position = self.start;
        self.steps = 0;
        Ok(self.state())
    }

    fn step(&mut self, action: &Action) -> Result<SnapShot> {
        let action = GridAction::try_from(action.discrete()?)?;
        self.steps += 1;
        let next = self.moved(action);
        let (reward, terminated) = if self.is_obstacle(&next) {
            (self.rewards.obstacle_penalty, false)
        } else {
            self.position = next;
            if next == self.goal {
                (self.rewards.goal_reward, true)
            } else {
                (self.rewards.step_penalty, false)
            }
        };
        Ok(SnapShot {
            state: self.state(),
            reward: reward + self.time_penalty(),
            terminated,
            truncated: false,
        })
    }

    fn state(&self) -> State {
        Self::cell_state(&self.position)
    }

    fn env_description(&self) -> EnvironmentDescription {
        EnvironmentDescription::new(
            Space::Grid {
                rows: self.rows,
                cols: self.cols,
            },
            Space::Discrete(4),
            2,
        )
    }

    fn action_name(&self, action: &Action) -> String {
        action
            .discrete()
            .ok()
            .and_then(|idx| GridAction::try_from(idx).ok())
            .map_or("Unknown", |a| a.name())
            .to_string()
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn moves_are_clamped_to_the_grid() -> Result<()> {
        let mut env = GridWorld::open(3);
        env.reset()?;
        let snapshot = env.step(&Action::Discrete(0))?;
        assert_eq!(snapshot.state.values(), &[0., 0.]);
        let snapshot = env.step(&Action::Discrete(2))?;
        assert_eq!(snapshot.state.values(), &[0., 0.]);
        assert_eq!(snapshot.reward, -0.1);
        Ok(())
    }

    #[test]
    fn obstacles_block_without_ending_the_episode() -> Result<()> {
        let mut env = GridWorld::default();
        env.reset()?;
        env.step(&Action::Discrete(3))?;
        let snapshot = env.step(&Action::Discrete(1))?;
        assert_eq!(env.position(), Cell::new(0, 1));
        assert_eq!(snapshot.reward, -1.);
        assert!(!snapshot.done());
        Ok(())
    }

    #[test]
    fn reaching_the_goal_terminates() -> Result<()> {
        let mut env = GridWorld::open(2);
        env.reset()?;
        assert!(!env.step(&Action::Discrete(1))?.done());
        let snapshot = env.step(&Action::Discrete(3))?;
        assert!(snapshot.terminated);
        assert_eq!(snapshot.reward, 10.);
        Ok(())
    }

    #[test]
    fn time_penalty_applies_past_threshold() -> Result<()> {
        let rewards = RewardConfig {
            time_penalty: -0.5,
            time_penalty_threshold: 2,
            ..Default::default()
        };
        let mut env = GridWorld::open(4).with_rewards(rewards);
        env.reset()?;
        let first = env.step(&Action::Discrete(0))?.reward;
        env.step(&Action::Discrete(0))?;
        let third = env.step(&Action::Discrete(0))?.reward;
        assert_eq!(first, -0.1);
        assert!((third - (-0.6)).abs() < 1e-6);
        Ok(())
    }

    #[test]
    fn continuous_actions_are_rejected() {
        let mut env = GridWorld::default();
        assert!(env.step(&Action::Continuous(0.3)).is_err());
        assert!(env.step(&Action::Discrete(4)).is_err());
    }
}
