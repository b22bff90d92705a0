// Drive kernel for the four-module swerve base
//
// Provides:
// - Chassis-to-module kinematics with proportional desaturation
// - Polar slew-rate command shaping (bounded lateral acceleration)
// - Wheel + gyro dead-reckoning odometry
// - Live gain tuning pushed to the module servos
// - The drivetrain facade tying it together behind actuator/gyro traits

pub mod kinematics;
pub mod module;
pub mod odometry;
pub mod servo;
pub mod shaper;
pub mod subsystem;
pub mod tuning;

pub use kinematics::{desaturate, ChassisSpeeds, ModulePosition, ModuleState, SwerveKinematics};
pub use module::{DriveError, Gyro, SimGyro, SimModule, SwerveModule};
pub use odometry::{Pose, SwerveOdometry};
pub use servo::{DynamixelModule, ServoBus, ServoError};
pub use shaper::{CommandShaper, Shaped};
pub use subsystem::Drivetrain;
pub use tuning::{DriveGains, GainTuner, SteerGains};
