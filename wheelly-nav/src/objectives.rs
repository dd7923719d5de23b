//! Reward functions over the robot status.

use serde::Deserialize;
use wheelly_io::status::MAX_PPS;
use wheelly_io::RobotStatus;

/// Reward function selected by the environment configuration.
pub trait Objective: Send {
    /// Reward of reaching the given status.
    fn reward(&self, status: &RobotStatus) -> f32;
}

/// Declarative objective specification.
#[derive(Clone, Debug, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum ObjectiveSpec {
    /// Rewards standing still with the sensor ahead.
    NoMove,
    /// Rewards forward progress, penalizes blocked contacts.
    #[serde(rename_all = "camelCase")]
    Explore {
        #[serde(default = "default_blocked_penalty")]
        blocked_penalty: f32,
    },
}

fn default_blocked_penalty() -> f32 {
    -1.0
}

impl ObjectiveSpec {
    pub fn build(&self) -> Box<dyn Objective> {
        match self {
            ObjectiveSpec::NoMove => Box::new(NoMove),
            ObjectiveSpec::Explore { blocked_penalty } => Box::new(Explore {
                blocked_penalty: *blocked_penalty,
            }),
        }
    }
}

/// Reward 1 when halted with the sensor ahead, 0 otherwise.
pub struct NoMove;

impl Objective for NoMove {
    fn reward(&self, status: &RobotStatus) -> f32 {
        if status.sensor_direction() == 0
            && status.left_pps() == 0.0
            && status.right_pps() == 0.0
        {
            1.0
        } else {
            0.0
        }
    }
}

/// Reward proportional to forward speed, penalty on blocked contacts.
pub struct Explore {
    blocked_penalty: f32,
}

impl Objective for Explore {
    fn reward(&self, status: &RobotStatus) -> f32 {
        if !status.can_move_forward() || !status.can_move_backward() {
            return self.blocked_penalty;
        }
        (status.left_pps() + status.right_pps()) / (2.0 * MAX_PPS)
    }
}
