use crate::angle::wrap_angle;
use anyhow::Result;
use rlsim_core::{Action, Env, EnvironmentDescription, SnapShot, Space, State, rng};
use std::f32::consts::PI;

pub const MAX_SPEED: f32 = 8.;
pub const MAX_TORQUE: f32 = 2.;
const DT: f32 = 0.05;
const G: f32 = 10.;
const M: f32 = 1.;
const L: f32 = 1.;
pub const MAX_EPISODE_STEPS: usize = 200;

/// Torque controlled pendulum. The angle is measured from the upright position and the
/// observation is `[sin theta, cos theta, theta_dot / MAX_SPEED]`.
#[derive(Debug, Clone, Default)]
pub struct Pendulum {
    theta: f32,
    theta_dot: f32,
    steps: usize,
}

impl Pendulum {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_state(&mut self, theta: f32, theta_dot: f32) {
        self.theta = theta;
        self.theta_dot = theta_dot;
        self.steps = 0;
    }

    pub fn angle(&self) -> f32 {
        self.theta
    }

    pub fn angular_velocity(&self) -> f32 {
        self.theta_dot
    }

    pub fn cost(theta: f32, theta_dot: f32, torque: f32) -> f32 {
        (theta / PI).powi(2)
            + 0.1 * (theta_dot / MAX_SPEED).powi(2)
            + 0.001 * (torque / MAX_TORQUE).powi(2)
    }
}

impl Env for Pendulum {
    fn reset(&mut self) -> Result<State> {
        self.theta = rng::uniform(-PI, PI);
        self.theta_dot = rng::uniform(-1., 1.);
        self.steps = 0;
        Ok(self.state())
    }

    fn step(&mut self, action: &Action) -> Result<SnapShot> {
        let torque = action.continuous()?.clamp(-MAX_TORQUE, MAX_TORQUE);
        self.steps += 1;
        let theta_acc = 3. * G / (2. * L) * self.theta.sin() + 3. / (M * L * L) * torque;
        let theta_dot = (self.theta_dot + theta_acc * DT).clamp(-MAX_SPEED, MAX_SPEED);
        self.theta = wrap_angle(self.theta + theta_dot * DT);
        self.theta_dot = theta_dot;
        Ok(SnapShot {
            state: self.state(),
            reward: -Self::cost(self.theta, self.theta_dot, torque),
            terminated: false,
            truncated: self.steps >= MAX_EPISODE_STEPS,
        })
    }

    fn state(&self) -> State {
        State::new(vec![
            self.theta.sin(),
            self.theta.cos(),
            self.theta_dot / MAX_SPEED,
        ])
    }

    fn env_description(&self) -> EnvironmentDescription {
        EnvironmentDescription::new(
            Space::bounded(vec![-1., -1., -1.], vec![1., 1., 1.]),
            Space::bounded(vec![-MAX_TORQUE], vec![MAX_TORQUE]),
            3,
        )
    }

    fn action_name(&self, action: &Action) -> String {
        format!("torque {:.2}", action.as_f32())
    }
}
