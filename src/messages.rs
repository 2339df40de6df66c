// Message types exchanged on the bus

use std::time::{SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};

use crate::protocol::ControlState;
use crate::protocol::payload::{Coordinate, MotorMeasure, Velocity};

// Commands from teleop/planners -> bridge

/// Velocity command, linear in m/s and angular in rad/s
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct VelocityCommand {
    pub linear: f32,
    pub angular: f32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct EnableCommand {
    pub enable: bool,
}

impl EnableCommand {
    /// Actuator state requested by this command
    pub fn state(&self) -> ControlState {
        if self.enable {
            ControlState::Velocity
        } else {
            ControlState::Disabled
        }
    }
}

/// Pose reset; the same shape is accepted on `cmd_pose` and `cmd_odom`
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct PoseCommand {
    pub x: f32,
    pub y: f32,
    pub theta: f32,
}

// Telemetry from bridge -> consumers

#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Pose {
    pub x: f32,
    pub y: f32,
    pub theta: f32,
    pub space: f32,
}

impl From<Coordinate> for Pose {
    fn from(c: Coordinate) -> Self {
        Self {
            x: c.x,
            y: c.y,
            theta: c.theta,
            space: c.space,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct EnableState {
    pub state: ControlState,
}

#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Twist {
    pub linear: f32,
    pub angular: f32,
}

impl From<Velocity> for Twist {
    fn from(v: Velocity) -> Self {
        Self {
            linear: v.v,
            angular: v.w,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct MotorState {
    pub reference: f32,
    pub measure: f32,
    pub current: f32,
    pub control: i16,
}

impl From<MotorMeasure> for MotorState {
    fn from(m: MotorMeasure) -> Self {
        Self {
            reference: m.reference,
            measure: m.measure,
            current: m.current,
            control: m.control,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Quaternion {
    pub x: f64,
    pub y: f64,
    pub z: f64,
    pub w: f64,
}

impl Quaternion {
    /// Rotation about the z axis only
    pub fn from_yaw(yaw: f64) -> Self {
        let half = yaw * 0.5;
        Self {
            x: 0.0,
            y: 0.0,
            z: half.sin(),
            w: half.cos(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TransformStamped {
    pub stamp: f64,
    pub parent: String,
    pub child: String,
    pub translation: [f64; 3],
    pub rotation: Quaternion,
}

/// Pose plus measured velocity, in the odometry frame
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Odometry {
    pub stamp: f64,
    pub frame_id: String,
    pub child_frame_id: String,
    pub position: [f64; 3],
    pub orientation: Quaternion,
    pub twist: Twist,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct JointState {
    pub stamp: f64,
    pub name: Vec<String>,
    pub position: Vec<f64>,
    pub velocity: Vec<f64>,
    pub effort: Vec<f64>,
}

/// Board process timing, in milliseconds
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct ProcessReport {
    pub idle: f64,
    pub parse_packet: f64,
    pub name: Vec<String>,
    pub process: Vec<f64>,
}

/// Anything the bridge publishes
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Telemetry {
    Pose(Pose),
    Enable(EnableState),
    Motor(MotorState),
    Twist(Twist),
    Odometry(Odometry),
    JointState(JointState),
    Process(ProcessReport),
    Transform(TransformStamped),
}

/// Seconds since the Unix epoch
pub fn now_stamp() -> f64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs_f64())
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_velocity_command_json() {
        let cmd: VelocityCommand = serde_json::from_str(r#"{"linear":0.2,"angular":-0.5}"#).unwrap();
        assert_eq!(cmd.linear, 0.2);
        assert_eq!(cmd.angular, -0.5);
    }

    #[test]
    fn test_enable_command_state() {
        assert_eq!(EnableCommand { enable: true }.state(), ControlState::Velocity);
        assert_eq!(EnableCommand { enable: false }.state(), ControlState::Disabled);
    }

    #[test]
    fn test_quaternion_from_yaw() {
        let q = Quaternion::from_yaw(std::f64::consts::PI);
        assert!(q.x == 0.0 && q.y == 0.0);
        assert!((q.z - 1.0).abs() < 1e-12);
        assert!(q.w.abs() < 1e-12);
    }

    #[test]
    fn test_telemetry_is_untagged() {
        let json = serde_json::to_value(Telemetry::Twist(Twist {
            linear: 1.0,
            angular: 0.0,
        }))
        .unwrap();
        assert_eq!(json["linear"], 1.0);
    }
}
