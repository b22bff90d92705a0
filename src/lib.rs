// Swerve base runtime: drive kernel + zenoh teleop loop
//
// The drive kernel (src/drive) turns joystick-scale commands into wheel
// module commands and fuses gyro heading with wheel travel into a pose
// estimate. The runtime (src/runtime) calls it at a fixed rate.

pub mod config;
pub mod drive;
pub mod messages;
pub mod runtime;
