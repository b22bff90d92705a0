// Message types exchanged over zenoh

use serde::{Deserialize, Serialize};

fn default_true() -> bool {
    true
}

// Command from teleop/scripts -> runtime, joystick scale ([-1, 1] axes)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DriveCommand {
    pub x: f64,
    pub y: f64,
    pub rot: f64,
    #[serde(default = "default_true")]
    pub field_relative: bool,
    #[serde(default = "default_true")]
    pub rate_limit: bool,
}

// Live gain edits from an operator tool -> runtime.
// Unset fields read back as the runtime's currently cached value.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct TuningValues {
    pub steer_p: Option<f64>,
    pub steer_i: Option<f64>,
    pub steer_d: Option<f64>,
    pub drive_p: Option<f64>,
    pub drive_i: Option<f64>,
    pub drive_d: Option<f64>,
    pub drive_ff: Option<f64>,
}

// Odometry output published each tick
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct PoseMessage {
    pub x: f64,
    pub y: f64,
    pub heading_deg: f64,
}

// Per-tick mirror of one module plus the gyro, fire-and-forget
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct DriveTelemetry {
    pub module_angle: f64,
    pub module_velocity: f64,
    pub module_position: f64,
    pub gyro_angle: f64,
}

/// Health status published by runtime
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "snake_case")]
pub enum RuntimeHealth {
    Ok,
    CmdStale,
    InputFault,
}
