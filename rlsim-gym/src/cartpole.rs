use crate::angle::wrap_angle;
use anyhow::Result;
use rlsim_core::{Action, Env, EnvironmentDescription, SnapShot, Space, State, rng};
use std::f32::consts::PI;

const GRAVITY: f32 = 9.8;
const MASS_CART: f32 = 1.0;
const MASS_POLE: f32 = 0.1;
const TOTAL_MASS: f32 = MASS_CART + MASS_POLE;
const HALF_LENGTH: f32 = 0.5;
const POLE_MASS_LENGTH: f32 = MASS_POLE * HALF_LENGTH;
const FORCE_MAG: f32 = 10.0;
const TAU: f32 = 0.02;
const X_THRESHOLD: f32 = 2.4;
const THETA_THRESHOLD: f32 = 12. * PI / 180.;
pub const MAX_EPISODE_STEPS: usize = 500;

/// Classic cart-pole with Euler integration. The state is `[x, x_dot, theta, theta_dot]`.
#[derive(Debug, Clone, Default)]
pub struct CartPole {
    x: f32,
    x_dot: f32,
    theta: f32,
    theta_dot: f32,
    steps: usize,
}

impl CartPole {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_state(&mut self, x: f32, x_dot: f32, theta: f32, theta_dot: f32) {
        self.x = x;
        self.x_dot = x_dot;
        self.theta = theta;
        self.theta_dot = theta_dot;
        self.steps = 0;
    }

    pub fn steps(&self) -> usize {
        self.steps
    }

    fn failed(&self) -> bool {
        self.x.abs() > X_THRESHOLD || self.theta.abs() > THETA_THRESHOLD
    }
}

impl Env for CartPole {
    fn reset(&mut self) -> Result<State> {
        self.x = rng::uniform(-0.1, 0.1);
        self.x_dot = rng::uniform(-0.1, 0.1);
        self.theta = rng::uniform(-0.2, 0.2);
        self.theta_dot = rng::uniform(-0.1, 0.1);
        self.steps = 0;
        Ok(self.state())
    }

    fn step(&mut self, action: &Action) -> Result<SnapShot> {
        let force = if action.discrete()? == 1 {
            FORCE_MAG
        } else {
            -FORCE_MAG
        };
        self.steps += 1;
        let (sin_theta, cos_theta) = self.theta.sin_cos();
        let temp =
            (force + POLE_MASS_LENGTH * self.theta_dot * self.theta_dot * sin_theta) / TOTAL_MASS;
        let theta_acc = (GRAVITY * sin_theta - cos_theta * temp)
            / (HALF_LENGTH * (4. / 3. - MASS_POLE * cos_theta * cos_theta / TOTAL_MASS));
        let x_acc = temp - POLE_MASS_LENGTH * theta_acc * cos_theta / TOTAL_MASS;

        self.x += TAU * self.x_dot;
        self.x_dot += TAU * x_acc;
        self.theta = wrap_angle(self.theta + TAU * self.theta_dot);
        self.theta_dot += TAU * theta_acc;

        let terminated = self.failed();
        Ok(SnapShot {
            state: self.state(),
            reward: if terminated { 0. } else { 1. },
            terminated,
            truncated: !terminated && self.steps >= MAX_EPISODE_STEPS,
        })
    }

    fn state(&self) -> State {
        State::new(vec![self.x, self.x_dot, self.theta, self.theta_dot])
    }

    fn env_description(&self) -> EnvironmentDescription {
        EnvironmentDescription::new(
            Space::bounded(
                vec![-4.8, f32::NEG_INFINITY, -PI, f32::NEG_INFINITY],
                vec![4.8, f32::INFINITY, PI, f32::INFINITY],
            ),
            Space::Discrete(2),
            4,
        )
    }

    fn action_name(&self, action: &Action) -> String {
        match action.discrete() {
            Ok(0) => "Left".to_string(),
            Ok(1) => "Right".to_string(),
            _ => "Unknown".to_string(),
        }
    }
}
