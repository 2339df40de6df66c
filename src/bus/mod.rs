// Telemetry bus and coordinate-frame broadcaster
//
// The bridge publishes telemetry only through these traits and asks the bus
// whether anything is listening before polling the board for it.

pub mod zenoh_bus;

use std::sync::{Mutex, PoisonError};
use std::time::{Duration, Instant};

use crate::messages::{Telemetry, TransformStamped};
use crate::protocol::Side;

pub use zenoh_bus::ZenohBus;

/// Outbound telemetry topics
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Topic {
    Pose,
    Enable,
    MotorLeft,
    MotorRight,
    Velocity,
    Odom,
    JointStates,
    Process,
    Tf,
}

impl Topic {
    pub const ALL: [Topic; 9] = [
        Topic::Pose,
        Topic::Enable,
        Topic::MotorLeft,
        Topic::MotorRight,
        Topic::Velocity,
        Topic::Odom,
        Topic::JointStates,
        Topic::Process,
        Topic::Tf,
    ];

    /// Key expression relative to the bridge prefix
    pub fn key(self) -> &'static str {
        match self {
            Topic::Pose => "pose",
            Topic::Enable => "enable",
            Topic::MotorLeft => "motor/left",
            Topic::MotorRight => "motor/right",
            Topic::Velocity => "velocity",
            Topic::Odom => "odom",
            Topic::JointStates => "joint_states",
            Topic::Process => "process",
            Topic::Tf => "tf",
        }
    }

    pub fn motor(side: Side) -> Topic {
        match side {
            Side::Left => Topic::MotorLeft,
            Side::Right => Topic::MotorRight,
        }
    }
}

/// Publish/subscribe surface the bridge reports to
pub trait TelemetryBus: Send + Sync {
    /// Whether anything consumes `topic` right now
    fn has_subscribers(&self, topic: Topic) -> bool;

    /// Whether a velocity command source is currently live
    fn command_source_active(&self) -> bool;

    fn publish(&self, topic: Topic, message: &Telemetry);
}

pub trait FrameBroadcaster: Send + Sync {
    fn send_transform(&self, transform: &TransformStamped);
}

/// Liveness of the velocity command source
///
/// The source counts as active while its last sample is younger than the
/// timeout.
#[derive(Debug)]
pub struct CommandClock {
    last: Mutex<Option<Instant>>,
    timeout: Duration,
}

impl CommandClock {
    pub fn new(timeout: Duration) -> Self {
        Self {
            last: Mutex::new(None),
            timeout,
        }
    }

    pub fn touch(&self) {
        *self.last.lock().unwrap_or_else(PoisonError::into_inner) = Some(Instant::now());
    }

    pub fn is_live(&self) -> bool {
        self.last
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .is_some_and(|last| last.elapsed() < self.timeout)
    }
}
