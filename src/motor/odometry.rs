// Odometry, frame transform and joint state messages
//
// Nothing is integrated here: every message is rebuilt from the latest pose
// and velocity the board reported.

use tracing::warn;

use crate::config::{DEFAULT_FRAME_BASE_LINK, DEFAULT_FRAME_JOINT, DEFAULT_FRAME_ODOM};
use crate::messages::{JointState, Odometry, Quaternion, TransformStamped, Twist};
use crate::protocol::Side;
use crate::protocol::payload::{Coordinate, MotorMeasure, Velocity};
use crate::store::{ParamStore, ParamStoreExt};

use super::kinematics::effort;

pub const KEY_FRAME_ODOM: &str = "tf/odom";
pub const KEY_FRAME_BASE_LINK: &str = "tf/base_link";
pub const KEY_FRAME_JOINT: &str = "tf/joint";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FrameNames {
    pub odom: String,
    pub base_link: String,
    pub joint: String,
}

impl Default for FrameNames {
    fn default() -> Self {
        Self {
            odom: DEFAULT_FRAME_ODOM.to_string(),
            base_link: DEFAULT_FRAME_BASE_LINK.to_string(),
            joint: DEFAULT_FRAME_JOINT.to_string(),
        }
    }
}

impl FrameNames {
    /// Frame names from the store, defaults where unset or malformed
    pub fn load(store: &dyn ParamStore) -> Self {
        let defaults = Self::default();
        let read = |key: &str, default: String| {
            if !store.has(key) {
                return default;
            }
            store.get_string(key).unwrap_or_else(|e| {
                warn!("Using frame name {:?}: {}", default, e);
                default
            })
        };
        Self {
            odom: read(KEY_FRAME_ODOM, defaults.odom),
            base_link: read(KEY_FRAME_BASE_LINK, defaults.base_link),
            joint: read(KEY_FRAME_JOINT, defaults.joint),
        }
    }

    pub fn joint_name(&self, side: Side) -> String {
        format!("{}_{}", self.joint, side)
    }
}

/// odom -> base_link transform for the pose
pub fn transform(pose: &Coordinate, frames: &FrameNames, stamp: f64) -> TransformStamped {
    TransformStamped {
        stamp,
        parent: frames.odom.clone(),
        child: frames.base_link.clone(),
        translation: [f64::from(pose.x), f64::from(pose.y), 0.0],
        rotation: Quaternion::from_yaw(f64::from(pose.theta)),
    }
}

pub fn odometry(
    pose: &Coordinate,
    velocity: &Velocity,
    frames: &FrameNames,
    stamp: f64,
) -> Odometry {
    Odometry {
        stamp,
        frame_id: frames.odom.clone(),
        child_frame_id: frames.base_link.clone(),
        position: [f64::from(pose.x), f64::from(pose.y), 0.0],
        orientation: Quaternion::from_yaw(f64::from(pose.theta)),
        twist: Twist::from(*velocity),
    }
}

/// Joint state from the motor measurements and integrated positions
pub fn joint_state(
    frames: &FrameNames,
    motors: &[MotorMeasure; 2],
    positions: [f64; 2],
    back_emf: [f64; 2],
    stamp: f64,
) -> JointState {
    JointState {
        stamp,
        name: Side::BOTH.iter().map(|&s| frames.joint_name(s)).collect(),
        position: positions.to_vec(),
        velocity: motors.iter().map(|m| f64::from(m.measure)).collect(),
        effort: motors
            .iter()
            .zip(back_emf)
            .map(|(m, k)| effort(k, f64::from(m.current)))
            .collect(),
    }
}
