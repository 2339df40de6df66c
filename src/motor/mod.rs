// Motion model for the differential-drive base
//
// Provides:
// - Unicycle kinematics (body velocity -> wheel setpoints)
// - Joint position integration from measured wheel speeds
// - Odometry, transform and joint-state messages from the relayed pose

pub mod kinematics;
pub mod odometry;

pub use kinematics::{JointIntegrator, KinematicParameters, WheelSetpoints, wheel_setpoints};
pub use odometry::FrameNames;
