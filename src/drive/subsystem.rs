// Drivetrain facade: owns the four modules and the gyro, wires the
// shaper, kinematics, odometry and gain tuner together. One instance,
// one control thread; the runtime calls `drive` and `periodic` at a
// fixed rate with dt passed in explicitly.

use tracing::info;

use super::kinematics::{desaturate, ChassisSpeeds, ModulePosition, ModuleState, SwerveKinematics};
use super::module::{DriveError, Gyro, SwerveModule};
use super::odometry::{Pose, SwerveOdometry};
use super::shaper::{wrap_angle, CommandShaper, Shaped};
use super::tuning::GainTuner;
use crate::config::{
    GYRO_REVERSED, MAX_ANGULAR_SPEED_RADPS, MAX_SPEED_MPS, TRACK_WIDTH, WHEEL_BASE,
};
use crate::messages::{DriveTelemetry, TuningValues};

pub struct Drivetrain<M: SwerveModule, G: Gyro> {
    modules: [M; 4], // FL, FR, RL, RR
    gyro: G,
    kinematics: SwerveKinematics,
    shaper: CommandShaper,
    odometry: SwerveOdometry,
    tuner: GainTuner,
}

impl<M: SwerveModule, G: Gyro> Drivetrain<M, G> {
    pub fn new(mut modules: [M; 4], mut gyro: G) -> Result<Self, DriveError> {
        let heading = gyro.yaw_degrees().to_radians();
        let mut positions = [ModulePosition::default(); 4];
        for (slot, module) in positions.iter_mut().zip(modules.iter_mut()) {
            *slot = module.position()?;
        }

        Ok(Self {
            modules,
            gyro,
            kinematics: SwerveKinematics::new(WHEEL_BASE, TRACK_WIDTH),
            shaper: CommandShaper::new(),
            odometry: SwerveOdometry::new(heading, positions, Pose::default()),
            tuner: GainTuner::new(),
        })
    }

    fn heading_rad(&mut self) -> f64 {
        self.gyro.yaw_degrees().to_radians()
    }

    fn module_positions(&mut self) -> Result<[ModulePosition; 4], DriveError> {
        let mut out = [ModulePosition::default(); 4];
        for (slot, module) in out.iter_mut().zip(self.modules.iter_mut()) {
            *slot = module.position()?;
        }
        Ok(out)
    }

    /// Drive from joystick-scale input. `x`, `y`, `rot` are in [-1, 1];
    /// `dt` is the time since the previous call in seconds. The shaped
    /// command is scaled to physical units, optionally rotated from the
    /// field frame, solved into module states and desaturated before it
    /// reaches the actuators. Returns the shaped joystick-scale command
    /// that was actually delivered.
    pub fn drive(
        &mut self,
        x: f64,
        y: f64,
        rot: f64,
        field_relative: bool,
        rate_limit: bool,
        dt: f64,
    ) -> Result<Shaped, DriveError> {
        let shaped = self.shaper.shape(x, y, rot, rate_limit, dt);

        let vx = shaped.x * MAX_SPEED_MPS;
        let vy = shaped.y * MAX_SPEED_MPS;
        let omega = shaped.rot * MAX_ANGULAR_SPEED_RADPS;

        let speeds = if field_relative {
            let heading = self.heading_rad();
            ChassisSpeeds::from_field_relative(vx, vy, omega, heading)
        } else {
            ChassisSpeeds::new(vx, vy, omega)
        };

        let mut states = self.kinematics.to_module_states(speeds);
        desaturate(&mut states, MAX_SPEED_MPS);
        for (module, state) in self.modules.iter_mut().zip(states) {
            module.set_desired_state(state)?;
        }
        Ok(shaped)
    }

    /// Command explicit module states, FL, FR, RL, RR. Desaturated first.
    pub fn set_module_states(&mut self, mut states: [ModuleState; 4]) -> Result<(), DriveError> {
        desaturate(&mut states, MAX_SPEED_MPS);
        for (module, state) in self.modules.iter_mut().zip(states) {
            module.set_desired_state(state)?;
        }
        Ok(())
    }

    /// Lock the wheels in an X to resist being pushed
    pub fn set_x_stance(&mut self) -> Result<(), DriveError> {
        for (module, state) in self.modules.iter_mut().zip(SwerveKinematics::x_stance()) {
            module.set_desired_state(state)?;
        }
        Ok(())
    }

    /// Zero the cumulative travel of all four modules and re-baseline
    /// odometry so the zeroing doesn't read as travel
    pub fn reset_encoders(&mut self) -> Result<(), DriveError> {
        for module in self.modules.iter_mut() {
            module.reset_position()?;
        }
        let heading = self.heading_rad();
        let positions = self.module_positions()?;
        let pose = self.odometry.pose();
        self.odometry.reset(heading, &positions, pose);
        Ok(())
    }

    /// Zero the gyro heading
    pub fn zero_heading(&mut self) {
        info!("zeroing heading");
        self.gyro.set_yaw(0.0);
        self.gyro.set_accumulated_angle(0.0);
    }

    /// Robot heading in degrees, wrapped to (-180, 180]
    pub fn heading_degrees(&mut self) -> f64 {
        wrap_angle(self.gyro.yaw_degrees().to_radians()).to_degrees()
    }

    /// Turn rate in degrees per second, sign per the gyro mounting
    pub fn turn_rate_degps(&mut self) -> f64 {
        self.gyro.rate_degps() * if GYRO_REVERSED { -1.0 } else { 1.0 }
    }

    /// Current pose estimate; pure read
    pub fn pose(&self) -> Pose {
        self.odometry.pose()
    }

    /// Reset odometry to `pose`, keeping the current wheel positions and
    /// gyro heading as the new baseline
    pub fn reset_odometry(&mut self, pose: Pose) -> Result<(), DriveError> {
        let heading = self.heading_rad();
        let positions = self.module_positions()?;
        self.odometry.reset(heading, &positions, pose);
        Ok(())
    }

    /// Push the cached default gains to every module, e.g. at startup
    pub fn apply_default_gains(&mut self) -> Result<(), DriveError> {
        self.tuner.apply_all(&mut self.modules)
    }

    /// Per-tick housekeeping: poll the tuning surface for gain edits and
    /// advance odometry from the gyro and module feedback
    pub fn periodic(&mut self, observed: &TuningValues) -> Result<Pose, DriveError> {
        self.tuner.poll(observed, &mut self.modules)?;
        let heading = self.heading_rad();
        let positions = self.module_positions()?;
        Ok(self.odometry.update(heading, &positions))
    }

    /// Front-left module plus gyro mirror, published once per tick
    pub fn telemetry(&mut self) -> Result<DriveTelemetry, DriveError> {
        let state = self.modules[0].state()?;
        let position = self.modules[0].position()?;
        let gyro_angle = self.gyro.yaw_degrees();
        Ok(DriveTelemetry {
            module_angle: state.angle,
            module_velocity: state.speed,
            module_position: position.distance,
            gyro_angle,
        })
    }

    /// True if the last drive tick clamped a non-finite input
    pub fn input_fault(&self) -> bool {
        self.shaper.input_fault()
    }

    pub fn modules_mut(&mut self) -> &mut [M; 4] {
        &mut self.modules
    }

    pub fn gyro_mut(&mut self) -> &mut G {
        &mut self.gyro
    }
}
