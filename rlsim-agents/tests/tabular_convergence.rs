use anyhow::Result;
use rlsim_agents::{TabularAgent, TabularConfig};
use rlsim_core::{Action, Agent, Env, Transition, UpdateOrder, rng};
use rlsim_gym::{Cell, GridAction, GridWorld};

/// A copy of `env` starting from a random free cell, so every state keeps being visited.
fn exploring_start(env: &GridWorld) -> GridWorld {
    let free: Vec<Cell> = env
        .cells()
        .filter(|c| *c != env.goal() && !env.is_obstacle(c))
        .collect();
    let start = free[rng::index(free.len())];
    GridWorld::new(env.rows(), env.cols(), start, env.goal(), env.obstacles().to_vec())
        .with_rewards(*env.rewards())
}

fn train(agent: &mut impl Agent, env: &GridWorld, episodes: usize) -> Result<()> {
    for _ in 0..episodes {
        let mut episode_env = exploring_start(env);
        let mut state = episode_env.reset()?;
        let mut action = agent.select_action(&state, true)?;
        for _ in 0..200 {
            let snapshot = episode_env.step(&action)?;
            let transition = Transition::new(state, action, &snapshot);
            if snapshot.done() {
                agent.update(&transition, None)?;
                break;
            }
            let next_action = agent.select_action(&snapshot.state, true)?;
            match agent.update_order() {
                UpdateOrder::DeferredOnPolicy => agent.update(&transition, Some(next_action))?,
                UpdateOrder::Immediate => agent.update(&transition, None)?,
            }
            state = snapshot.state;
            action = next_action;
        }
    }
    Ok(())
}

fn neighbour(env: &GridWorld, cell: Cell, action: GridAction) -> Cell {
    match action {
        GridAction::Up => Cell::new(cell.row.saturating_sub(1), cell.col),
        GridAction::Down => Cell::new((cell.row + 1).min(env.rows() - 1), cell.col),
        GridAction::Left => Cell::new(cell.row, cell.col.saturating_sub(1)),
        GridAction::Right => Cell::new(cell.row, (cell.col + 1).min(env.cols() - 1)),
    }
}

fn assert_greedy_policy_approaches_goal(agent: &impl Agent, env: &GridWorld) -> Result<()> {
    let goal = env.goal();
    for cell in env.cells().filter(|c| *c != goal) {
        let values = agent.q_values(&GridWorld::cell_state(&cell))?;
        let (best, _) = values
            .iter()
            .enumerate()
            .fold((0, f32::NEG_INFINITY), |acc, (idx, v)| {
                if *v > acc.1 { (idx, *v) } else { acc }
            });
        let next = neighbour(env, cell, GridAction::try_from(best)?);
        assert!(
            next.manhattan(&goal) < cell.manhattan(&goal),
            "cell {cell:?} prefers {best} with values {values:?}"
        );
    }
    Ok(())
}

#[test]
fn q_learning_converges_on_an_open_grid() -> Result<()> {
    rng::seed(1234);
    let env = GridWorld::open(4);
    let config = TabularConfig {
        learning_rate: 0.5,
        discount_factor: 0.9,
        epsilon: 0.3,
    };
    let mut agent = TabularAgent::q_learning(&env.env_description(), config)?;
    train(&mut agent, &env, 3000)?;
    assert_greedy_policy_approaches_goal(&agent, &env)?;
    Ok(())
}

#[test]
fn expected_sarsa_converges_on_an_open_grid() -> Result<()> {
    rng::seed(99);
    let env = GridWorld::open(4);
    let config = TabularConfig {
        learning_rate: 0.5,
        discount_factor: 0.9,
        epsilon: 0.2,
    };
    let mut agent = TabularAgent::expected_sarsa(&env.env_description(), config)?;
    train(&mut agent, &env, 3000)?;
    assert_greedy_policy_approaches_goal(&agent, &env)?;
    Ok(())
}

#[test]
fn sarsa_receives_the_action_it_goes_on_to_take() -> Result<()> {
    rng::seed(5);
    let mut env = GridWorld::open(3);
    let mut agent = TabularAgent::sarsa(&env.env_description(), TabularConfig::default())?;
    train(&mut agent, &env, 50)?;
    assert!(agent.loss().is_some());
    let state = env.reset()?;
    let action = agent.select_action(&state, false)?;
    assert!(matches!(action, Action::Discrete(0..4)));
    Ok(())
}
