// Collaborator boundary for the drive kernel
//
// The kernel only ever talks to a module through `SwerveModule` and to
// the heading sensor through `Gyro`; any actuator with closed-loop
// steering/drive control and gain registers can sit behind the trait.
// `SimModule`/`SimGyro` are deterministic stand-ins for tests and for
// running the loop without hardware.

use super::kinematics::{ModulePosition, ModuleState};
use super::servo::ServoError;
use super::tuning::{DriveGains, SteerGains};

/// Error from an actuator or sensor collaborator
#[derive(Debug, thiserror::Error)]
pub enum DriveError {
    #[error("servo bus error: {0}")]
    Servo(#[from] ServoError),
}

/// One independently steered and driven wheel unit.
///
/// The module tracks its commanded state with its own local controllers
/// and may internally remap the steering target to avoid rotations over
/// 90 degrees; that optimization is opaque to the kernel.
pub trait SwerveModule {
    /// Cumulative wheel travel and current steering angle
    fn position(&mut self) -> Result<ModulePosition, DriveError>;

    /// Current wheel speed and steering angle
    fn state(&mut self) -> Result<ModuleState, DriveError>;

    fn set_desired_state(&mut self, state: ModuleState) -> Result<(), DriveError>;

    /// Zero the cumulative travel reading
    fn reset_position(&mut self) -> Result<(), DriveError>;

    fn set_steer_gains(&mut self, gains: SteerGains) -> Result<(), DriveError>;

    fn set_drive_gains(&mut self, gains: DriveGains) -> Result<(), DriveError>;

    /// Step simulated physics by `dt` seconds; no-op on real hardware
    fn simulate(&mut self, _dt: f64) {}
}

/// Yaw sensor. Readings are degrees, CCW-positive unless the robot is
/// configured reversed.
pub trait Gyro {
    fn yaw_degrees(&mut self) -> f64;

    fn set_yaw(&mut self, degrees: f64);

    /// Reset the accumulated (continuous, unwrapped) angle
    fn set_accumulated_angle(&mut self, degrees: f64);

    /// Raw rate output, degrees per second
    fn rate_degps(&mut self) -> f64;

    /// Integrate a simulated turn rate; no-op on real hardware
    fn simulate(&mut self, _rate_degps: f64, _dt: f64) {}
}

/// Simulated module: steering snaps to the commanded angle each advance,
/// travel integrates the commanded speed.
#[derive(Debug, Default)]
pub struct SimModule {
    desired: ModuleState,
    angle: f64,
    distance: f64,
    pub steer_gain_writes: u32,
    pub drive_gain_writes: u32,
    pub last_steer_gains: Option<SteerGains>,
    pub last_drive_gains: Option<DriveGains>,
}

impl SimModule {
    pub fn new() -> Self {
        Self::default()
    }

    /// Step the simulated physics by `dt` seconds
    pub fn advance(&mut self, dt: f64) {
        self.angle = self.desired.angle;
        self.distance += self.desired.speed * dt;
    }

    /// Most recently commanded state, for assertions
    pub fn desired(&self) -> ModuleState {
        self.desired
    }
}

impl SwerveModule for SimModule {
    fn position(&mut self) -> Result<ModulePosition, DriveError> {
        Ok(ModulePosition {
            distance: self.distance,
            angle: self.angle,
        })
    }

    fn state(&mut self) -> Result<ModuleState, DriveError> {
        Ok(ModuleState {
            speed: self.desired.speed,
            angle: self.angle,
        })
    }

    fn set_desired_state(&mut self, state: ModuleState) -> Result<(), DriveError> {
        self.desired = state;
        Ok(())
    }

    fn reset_position(&mut self) -> Result<(), DriveError> {
        self.distance = 0.0;
        Ok(())
    }

    fn set_steer_gains(&mut self, gains: SteerGains) -> Result<(), DriveError> {
        self.steer_gain_writes += 1;
        self.last_steer_gains = Some(gains);
        Ok(())
    }

    fn set_drive_gains(&mut self, gains: DriveGains) -> Result<(), DriveError> {
        self.drive_gain_writes += 1;
        self.last_drive_gains = Some(gains);
        Ok(())
    }

    fn simulate(&mut self, dt: f64) {
        self.advance(dt);
    }
}

/// Simulated gyro: heading integrates whatever angular rate the harness
/// feeds it. Yaw is continuous (unwrapped), like the real sensor.
#[derive(Debug, Default)]
pub struct SimGyro {
    yaw_deg: f64,
    accumulated_deg: f64,
    rate_degps: f64,
}

impl SimGyro {
    pub fn new() -> Self {
        Self::default()
    }

    /// Integrate an angular rate (degrees per second) over `dt`
    pub fn advance(&mut self, rate_degps: f64, dt: f64) {
        self.rate_degps = rate_degps;
        self.yaw_deg += rate_degps * dt;
        self.accumulated_deg += rate_degps * dt;
    }
}

impl Gyro for SimGyro {
    fn yaw_degrees(&mut self) -> f64 {
        self.yaw_deg
    }

    fn set_yaw(&mut self, degrees: f64) {
        self.yaw_deg = degrees;
    }

    fn set_accumulated_angle(&mut self, degrees: f64) {
        self.accumulated_deg = degrees;
    }

    fn rate_degps(&mut self) -> f64 {
        self.rate_degps
    }

    fn simulate(&mut self, rate_degps: f64, dt: f64) {
        self.advance(rate_degps, dt);
    }
}
