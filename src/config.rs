// Loop rate, topics, chassis geometry, speed limits, default gains
use std::time::Duration;

// Runtime loop frequency
pub const LOOP_HZ: u64 = 50;

// Command timeout for watchdog
pub const CMD_TIMEOUT: Duration = Duration::from_millis(250);

// Zenoh topics
pub const TOPIC_CMD_DRIVE: &str = "swerve/cmd/drive"; // joystick-scale commands
pub const TOPIC_CMD_TUNING: &str = "swerve/cmd/tuning"; // live gain edits
pub const TOPIC_RT_POSE: &str = "swerve/rt/pose"; // odometry output
pub const TOPIC_RT_TELEMETRY: &str = "swerve/rt/telemetry"; // per-tick mirror
pub const TOPIC_HEALTH: &str = "swerve/state/health"; // health status

// Chassis geometry (meters): distance between front/rear axles and
// between left/right wheels. Module order everywhere is FL, FR, RL, RR.
pub const WHEEL_BASE: f64 = 0.675;
pub const TRACK_WIDTH: f64 = 0.675;

// Physical limits
pub const MAX_SPEED_MPS: f64 = 4.8;
pub const MAX_ANGULAR_SPEED_RADPS: f64 = 2.0 * std::f64::consts::PI;

// Command shaping rates
pub const DIRECTION_SLEW_RATE: f64 = 1.2; // rad/s at full magnitude
pub const MAGNITUDE_SLEW_RATE: f64 = 1.8; // stick fraction per second
pub const ROTATIONAL_SLEW_RATE: f64 = 2.0; // stick fraction per second

// Gyro mounting: true if yaw increases clockwise
pub const GYRO_REVERSED: bool = false;

// Default closed-loop gains pushed to the module servos at startup
pub const STEER_P: f64 = 1.0;
pub const STEER_I: f64 = 0.0;
pub const STEER_D: f64 = 0.0;
pub const DRIVE_P: f64 = 0.04;
pub const DRIVE_I: f64 = 0.0;
pub const DRIVE_D: f64 = 0.0;
pub const DRIVE_FF: f64 = 0.21;

// Servo bus configuration
pub const SERVO_PORT: &str = "/dev/ttyUSB0";

// Servo IDs per module, (steer, drive), in FL, FR, RL, RR order
pub const MODULE_SERVO_IDS: [(u8, u8); 4] = [(1, 2), (3, 4), (5, 6), (7, 8)];

// Steering zero offset per module (radians), FL, FR, RL, RR
pub const MODULE_ANGULAR_OFFSETS: [f64; 4] = [
    -std::f64::consts::FRAC_PI_2,
    0.0,
    std::f64::consts::PI,
    std::f64::consts::FRAC_PI_2,
];

// Wheel radius (meters) for converting drive servo ticks to travel
pub const WHEEL_RADIUS: f64 = 0.0381;

// Enable hardware servo control (set to false for simulation/testing)
pub const SERVOS_ENABLED: bool = false;
