use anyhow::{Context, Result};
use candle_core::Device;
use clap::Parser;
use rlsim_api::{
    AgentBuilder, AlgorithmKind, ConfigUpdate, EnvBuilder, EnvKind, GridLayout, GridSnapshot,
    Trainer, tick_delay,
};
use rlsim_core::rng;
use std::ops::ControlFlow;
use std::path::PathBuf;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "rlsim", about = "Train a reinforcement learning agent on a toy environment")]
struct Args {
    /// gridworld, cartpole or pendulum
    #[arg(long, default_value = "gridworld")]
    env: EnvKind,

    /// Defaults to the environment's first compatible algorithm. An incompatible choice moves
    /// training to the algorithm's own environment.
    #[arg(long)]
    algorithm: Option<AlgorithmKind>,

    #[arg(long, default_value_t = 100)]
    episodes: usize,

    /// Stop after this many steps even when the episodes are not done.
    #[arg(long)]
    max_ticks: Option<usize>,

    #[arg(long)]
    seed: Option<u64>,

    /// JSON file with a partial configuration (learning_rate, discount_factor, epsilon,
    /// clip_epsilon, rewards).
    #[arg(long)]
    config: Option<PathBuf>,

    #[arg(long)]
    learning_rate: Option<f64>,

    #[arg(long)]
    discount_factor: Option<f32>,

    #[arg(long)]
    epsilon: Option<f32>,

    #[arg(long)]
    clip_epsilon: Option<f32>,

    /// Use the 10x10 grid world.
    #[arg(long)]
    large_grid: bool,

    /// Pace ticks like the interactive view does. Without it training runs flat out.
    #[arg(long)]
    speed: Option<f32>,

    /// Greedy episodes played after training.
    #[arg(long, default_value_t = 5)]
    eval_episodes: usize,
}

impl Args {
    fn config_update(&self) -> Result<ConfigUpdate> {
        let mut update = match &self.config {
            Some(path) => {
                let raw = std::fs::read_to_string(path)
                    .with_context(|| format!("reading {}", path.display()))?;
                serde_json::from_str::<ConfigUpdate>(&raw)
                    .with_context(|| format!("parsing {}", path.display()))?
            }
            None => ConfigUpdate::default(),
        };
        let params = &mut update.params;
        params.learning_rate = self.learning_rate.or(params.learning_rate);
        params.discount_factor = self.discount_factor.or(params.discount_factor);
        params.epsilon = self.epsilon.or(params.epsilon);
        params.clip_epsilon = self.clip_epsilon.or(params.clip_epsilon);
        Ok(update)
    }
}

fn init_tracing() -> Result<()> {
    let filter = EnvFilter::try_from_default_env().or_else(|_| EnvFilter::try_new("info"))?;
    tracing_subscriber::fmt().with_env_filter(filter).init();
    Ok(())
}

fn build_trainer(args: &Args) -> Result<Trainer> {
    let mut env_builder = EnvBuilder::new(args.env);
    if args.large_grid {
        env_builder.grid_layout = GridLayout::Large;
    }
    let algorithm = args.algorithm.unwrap_or(args.env.default_algorithm());
    if !args.env.supports(algorithm) {
        warn!(
            env = %args.env,
            algorithm = %algorithm,
            home = %algorithm.home_env(),
            "algorithm does not run on this environment, switching"
        );
        env_builder.kind = algorithm.home_env();
    }
    Trainer::from_builders(env_builder, AgentBuilder::new(algorithm), Device::Cpu)
}

fn policy_map(snapshot: &GridSnapshot) -> String {
    const ARROWS: [char; 4] = ['^', 'v', '<', '>'];
    let mut out = String::new();
    for (idx, cell) in snapshot.cells.iter().enumerate() {
        let glyph = if cell.obstacle {
            '#'
        } else if cell.goal {
            'G'
        } else {
            cell.policy
                .as_deref()
                .and_then(|probs| {
                    probs
                        .iter()
                        .enumerate()
                        .max_by(|a, b| a.1.total_cmp(b.1))
                        .map(|(action, _)| ARROWS[action % ARROWS.len()])
                })
                .unwrap_or('.')
        };
        out.push(glyph);
        out.push(if (idx + 1) % snapshot.cols == 0 { '\n' } else { ' ' });
    }
    out
}

fn main() -> Result<()> {
    init_tracing()?;
    let args = Args::parse();
    if let Some(seed) = args.seed {
        rng::seed(seed);
    }
    let mut trainer = build_trainer(&args)?;
    let info = trainer.algorithm().info();
    info!(
        algorithm = info.display_name,
        paradigm = %info.paradigm,
        learns = info.learns,
        env = %trainer.env_kind(),
        "starting"
    );

    let update = args.config_update()?;
    if !update.is_empty() {
        trainer.queue_config(update);
    }

    let target = args.episodes;
    let budget = args.max_ticks.unwrap_or(usize::MAX);
    let delay = args.speed.map(tick_delay);
    let ticks = trainer.run(budget, delay, |report| {
        if report.stats.episode >= target {
            ControlFlow::Break(())
        } else {
            ControlFlow::Continue(())
        }
    })?;
    info!(ticks, "training finished");
    println!("{}", serde_json::to_string_pretty(trainer.stats())?);

    if let Some(snapshot) = trainer.grid_snapshot(1.)? {
        print!("{}", policy_map(&snapshot));
    }

    if args.eval_episodes > 0 {
        let returns = trainer.evaluate(args.eval_episodes)?;
        let mean = returns.iter().sum::<f32>() / returns.len() as f32;
        println!("greedy returns {returns:?} (mean {mean:.2})");
    }
    Ok(())
}
