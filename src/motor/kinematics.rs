// Unicycle (differential-drive) kinematics
// Converts body velocities (v, w) to per-wheel setpoints, and integrates
// measured wheel velocities into joint positions.

use std::f64::consts::TAU;

use crate::config::KEY_ODO_STEP;
use crate::error::ConfigError;
use crate::protocol::Side;
use crate::protocol::payload::UnicycleParameter;
use crate::store::{ParamStore, ParamStoreExt};

/// Board setpoints are wheel speeds in mrad/s
const SETPOINT_SCALE: f64 = 1000.0;

pub const KEY_WHEELBASE: &str = "structure/wheelbase";
pub const KEY_RADIUS_LEFT: &str = "structure/radius/left";
pub const KEY_RADIUS_RIGHT: &str = "structure/radius/right";

/// Geometry of the drive
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct KinematicParameters {
    pub wheelbase: f64,    // meters
    pub radius_left: f64,  // meters
    pub radius_right: f64, // meters
    pub odometry_step_min: f64,
}

impl KinematicParameters {
    /// Read the geometry from the store. Radii must be strictly positive.
    pub fn load(store: &dyn ParamStore) -> Result<Self, ConfigError> {
        let params = Self {
            wheelbase: store.get_f64(KEY_WHEELBASE)?,
            radius_left: store.get_f64(KEY_RADIUS_LEFT)?,
            radius_right: store.get_f64(KEY_RADIUS_RIGHT)?,
            odometry_step_min: store.get_f64_or(KEY_ODO_STEP, 0.0)?,
        };
        for (key, radius) in [
            (KEY_RADIUS_LEFT, params.radius_left),
            (KEY_RADIUS_RIGHT, params.radius_right),
        ] {
            if radius <= 0.0 || !radius.is_finite() {
                return Err(ConfigError::Invalid {
                    key: key.to_string(),
                    reason: format!("wheel radius must be positive, got {radius}"),
                });
            }
        }
        Ok(params)
    }

    pub fn save(&self, store: &dyn ParamStore) -> Result<(), ConfigError> {
        store.set(KEY_WHEELBASE, self.wheelbase.into())?;
        store.set(KEY_RADIUS_LEFT, self.radius_left.into())?;
        store.set(KEY_RADIUS_RIGHT, self.radius_right.into())?;
        store.set(KEY_ODO_STEP, self.odometry_step_min.into())
    }
}

impl From<&KinematicParameters> for UnicycleParameter {
    fn from(p: &KinematicParameters) -> Self {
        Self {
            wheelbase: p.wheelbase as f32,
            radius_l: p.radius_left as f32,
            radius_r: p.radius_right as f32,
            sp_min: p.odometry_step_min as f32,
        }
    }
}

impl From<&UnicycleParameter> for KinematicParameters {
    fn from(p: &UnicycleParameter) -> Self {
        Self {
            wheelbase: f64::from(p.wheelbase),
            radius_left: f64::from(p.radius_l),
            radius_right: f64::from(p.radius_r),
            odometry_step_min: f64::from(p.sp_min),
        }
    }
}

/// Raw wheel setpoints for the two motors
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct WheelSetpoints {
    pub left: i16,
    pub right: i16,
}

impl WheelSetpoints {
    pub fn zero() -> Self {
        Self::default()
    }

    pub fn get(&self, side: Side) -> i16 {
        match side {
            Side::Left => self.left,
            Side::Right => self.right,
        }
    }
}

/// Convert a wheel speed in rad/s to a board setpoint
fn to_setpoint(radps: f64) -> i16 {
    let speed_int = (radps * SETPOINT_SCALE).round() as i64;

    // Clamp to signed 16-bit range
    speed_int.clamp(-0x8000, 0x7FFF) as i16
}

/// Convert body velocities to wheel setpoints
///
/// # Arguments
/// * `v` - Linear velocity in m/s (positive = forward)
/// * `w` - Angular velocity in rad/s (positive = counter-clockwise)
///
/// Out-of-range results saturate to the i16 bounds.
pub fn wheel_setpoints(params: &KinematicParameters, v: f64, w: f64) -> WheelSetpoints {
    let half_track = 0.5 * params.wheelbase * w;
    WheelSetpoints {
        left: to_setpoint((v - half_track) / params.radius_left),
        right: to_setpoint((v + half_track) / params.radius_right),
    }
}

/// Running wheel angle per joint, wrapped into [0, 2π)
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct JointIntegrator {
    position: [f64; 2],
}

impl JointIntegrator {
    /// Add `velocity * dt` to each joint and return the wrapped positions
    pub fn advance(&mut self, velocity: [f64; 2], dt: f64) -> [f64; 2] {
        for (position, velocity) in self.position.iter_mut().zip(velocity) {
            *position = (*position + velocity * dt).rem_euclid(TAU);
        }
        self.position
    }

    pub fn reset(&mut self) {
        self.position = [0.0; 2];
    }

    pub fn positions(&self) -> [f64; 2] {
        self.position
    }
}

/// Joint effort from the motor current
pub fn effort(back_emf: f64, current: f64) -> f64 {
    back_emf * current
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;
    use proptest::prelude::*;
    use serde_json::json;

    fn params() -> KinematicParameters {
        KinematicParameters {
            wheelbase: 0.5,
            radius_left: 0.1,
            radius_right: 0.1,
            odometry_step_min: 0.0,
        }
    }

    #[test]
    fn test_zero_velocity() {
        assert_eq!(wheel_setpoints(&params(), 0.0, 0.0), WheelSetpoints::zero());
    }

    #[test]
    fn test_forward_motion() {
        let wheels = wheel_setpoints(&params(), 0.2, 0.0);
        assert_eq!(wheels.left, 2000);
        assert_eq!(wheels.right, 2000);
    }

    #[test]
    fn test_rotation_only() {
        // Pure rotation spins the wheels in opposite directions
        let wheels = wheel_setpoints(&params(), 0.0, 1.0);
        assert_eq!(wheels.left, -2500);
        assert_eq!(wheels.right, 2500);
    }

    #[test]
    fn test_rounds_to_nearest() {
        let p = KinematicParameters {
            radius_left: 0.5,
            ..params()
        };
        // 1000 * 2^-10 / 0.5 = 1.953125
        let wheels = wheel_setpoints(&p, 0.000_976_562_5, 0.0);
        assert_eq!(wheels.left, 2, "Setpoints round, they do not truncate");
    }

    #[test]
    fn test_setpoint_limits() {
        let wheels = wheel_setpoints(&params(), 1000.0, 0.0);
        assert_eq!(wheels.left, 0x7FFF);
        let wheels = wheel_setpoints(&params(), -1000.0, 0.0);
        assert_eq!(wheels.right, -0x8000);
    }

    #[test]
    fn test_load_rejects_zero_radius() {
        let store = MemoryStore::new();
        store.set(KEY_WHEELBASE, json!(0.5)).unwrap();
        store.set(KEY_RADIUS_LEFT, json!(0.0)).unwrap();
        store.set(KEY_RADIUS_RIGHT, json!(0.1)).unwrap();
        assert!(matches!(
            KinematicParameters::load(&store),
            Err(ConfigError::Invalid { .. })
        ));
    }

    #[test]
    fn test_joint_positions_wrap() {
        let mut joints = JointIntegrator::default();
        let positions = joints.advance([TAU + 1.0, -1.0], 1.0);
        assert!((positions[0] - 1.0).abs() < 1e-9, "got {}", positions[0]);
        assert!((positions[1] - (TAU - 1.0)).abs() < 1e-9, "got {}", positions[1]);
        joints.reset();
        assert_eq!(joints.positions(), [0.0, 0.0]);
    }

    proptest! {
        #[test]
        fn prop_setpoints_saturate(v in -200.0f64..200.0, w in -500.0f64..500.0) {
            let p = params();
            let wheels = wheel_setpoints(&p, v, w);
            let raw_left = ((v - 0.5 * p.wheelbase * w) / p.radius_left * SETPOINT_SCALE).round();
            let expected = raw_left.clamp(-32768.0, 32767.0) as i16;
            prop_assert_eq!(wheels.left, expected);
            if (-32768.0..=32767.0).contains(&raw_left) {
                prop_assert_eq!(f64::from(wheels.left), raw_left);
            }
        }
    }
}
