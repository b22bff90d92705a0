// 50 Hz control loop with a command watchdog
//
// If teleop crashes and stops publishing, the watchdog swaps in a zero
// command with rate limiting forced on, so the shaper ramps the base to
// a stop instead of cutting the wheels dead.

use std::cell::RefCell;
use std::rc::Rc;
use std::time::{Duration, Instant};

use tokio::time::interval;
use tracing::{debug, info, warn};
use zenoh::Session;

use crate::config::{
    CMD_TIMEOUT, LOOP_HZ, MAX_ANGULAR_SPEED_RADPS, MODULE_ANGULAR_OFFSETS, MODULE_SERVO_IDS,
    SERVOS_ENABLED, SERVO_PORT, TOPIC_CMD_DRIVE, TOPIC_CMD_TUNING, TOPIC_HEALTH, TOPIC_RT_POSE,
    TOPIC_RT_TELEMETRY,
};
use crate::drive::{
    Drivetrain, DynamixelModule, Gyro, ServoBus, SimGyro, SimModule, SwerveModule,
};
use crate::messages::{DriveCommand, PoseMessage, RuntimeHealth, TuningValues};

const STOP_COMMAND: DriveCommand = DriveCommand {
    x: 0.0,
    y: 0.0,
    rot: 0.0,
    field_relative: false,
    rate_limit: true,
};

pub struct Runtime {
    latest_cmd: Option<DriveCommand>,
    cmd_received_at: Instant,
    tuning: TuningValues,
    health: RuntimeHealth,
}

impl Runtime {
    pub fn new() -> Self {
        Self {
            latest_cmd: None,
            cmd_received_at: Instant::now(),
            tuning: TuningValues::default(),
            health: RuntimeHealth::CmdStale, // Start stale until first cmd
        }
    }

    fn on_command(&mut self, cmd: DriveCommand) {
        debug!("received command: {cmd:?}");
        self.latest_cmd = Some(cmd);
        self.cmd_received_at = Instant::now();
    }

    fn on_tuning(&mut self, values: TuningValues) {
        info!("received tuning values: {values:?}");
        self.tuning = values;
    }

    /// Pick the command to execute this tick, applying the watchdog
    fn effective_command(&mut self) -> DriveCommand {
        let cmd_age = self.cmd_received_at.elapsed();

        if cmd_age > CMD_TIMEOUT {
            if self.health != RuntimeHealth::CmdStale {
                warn!("command stale ({cmd_age:?} old), ramping to a stop");
            }
            self.health = RuntimeHealth::CmdStale;
            STOP_COMMAND
        } else if let Some(cmd) = self.latest_cmd.clone() {
            self.health = RuntimeHealth::Ok;
            cmd
        } else {
            // No command ever received
            self.health = RuntimeHealth::CmdStale;
            STOP_COMMAND
        }
    }
}

impl Default for Runtime {
    fn default() -> Self {
        Self::new()
    }
}

pub async fn run() -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    info!("Opening Zenoh session...");
    let session = zenoh::open(zenoh::Config::default()).await?;

    if SERVOS_ENABLED {
        info!("Opening servo bus on {SERVO_PORT}");
        let bus = Rc::new(RefCell::new(ServoBus::open(SERVO_PORT)?));
        let mut modules = MODULE_SERVO_IDS
            .iter()
            .zip(MODULE_ANGULAR_OFFSETS)
            .map(|(&(steer_id, drive_id), offset)| {
                DynamixelModule::new(Rc::clone(&bus), steer_id, drive_id, offset)
            })
            .collect::<Vec<_>>();
        for module in &mut modules {
            module.initialize()?;
        }
        let modules: [DynamixelModule; 4] = modules
            .try_into()
            .unwrap_or_else(|_| unreachable!("exactly four modules configured"));

        // No hardware gyro on the bus yet; heading integrates the
        // commanded turn rate until an IMU driver lands
        warn!("no hardware gyro configured, heading is dead-reckoned from commands");
        let mut drivetrain = Drivetrain::new(modules, SimGyro::new())?;
        drivetrain.apply_default_gains()?;
        run_loop(&session, drivetrain).await
    } else {
        info!("Servos disabled, running simulated base");
        let modules = [
            SimModule::new(),
            SimModule::new(),
            SimModule::new(),
            SimModule::new(),
        ];
        let drivetrain = Drivetrain::new(modules, SimGyro::new())?;
        run_loop(&session, drivetrain).await
    }
}

async fn run_loop<M: SwerveModule, G: Gyro>(
    session: &Session,
    mut drivetrain: Drivetrain<M, G>,
) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    info!("Setting up publishers and subscribers...");
    let sub_cmd = session.declare_subscriber(TOPIC_CMD_DRIVE).await?;
    let sub_tuning = session.declare_subscriber(TOPIC_CMD_TUNING).await?;
    let pub_pose = session.declare_publisher(TOPIC_RT_POSE).await?;
    let pub_telemetry = session.declare_publisher(TOPIC_RT_TELEMETRY).await?;
    let pub_health = session.declare_publisher(TOPIC_HEALTH).await?;

    let mut runtime = Runtime::new();
    let mut tick = interval(Duration::from_millis(1000 / LOOP_HZ));
    let mut last_tick = Instant::now();

    info!(
        "Runtime started: {}Hz loop, {}ms watchdog timeout",
        LOOP_HZ,
        CMD_TIMEOUT.as_millis()
    );
    info!("Subscribed to: {TOPIC_CMD_DRIVE}, {TOPIC_CMD_TUNING}");
    info!("Publishing to: {TOPIC_RT_POSE}, {TOPIC_RT_TELEMETRY}, {TOPIC_HEALTH}");

    loop {
        tick.tick().await;
        let now = Instant::now();
        let dt = now.duration_since(last_tick).as_secs_f64();
        last_tick = now;

        // 1. Drain all pending messages (non-blocking), keep latest
        while let Ok(Some(sample)) = sub_cmd.try_recv() {
            let payload = sample.payload().to_bytes();
            match serde_json::from_slice::<DriveCommand>(&payload) {
                Ok(cmd) => runtime.on_command(cmd),
                Err(e) => warn!("Failed to parse drive command: {e}"),
            }
        }
        while let Ok(Some(sample)) = sub_tuning.try_recv() {
            let payload = sample.payload().to_bytes();
            match serde_json::from_slice::<TuningValues>(&payload) {
                Ok(values) => runtime.on_tuning(values),
                Err(e) => warn!("Failed to parse tuning values: {e}"),
            }
        }

        // 2. Execute this tick's command (includes watchdog logic)
        let cmd = runtime.effective_command();
        let shaped =
            drivetrain.drive(cmd.x, cmd.y, cmd.rot, cmd.field_relative, cmd.rate_limit, dt)?;
        if drivetrain.input_fault() {
            runtime.health = RuntimeHealth::InputFault;
        }

        // 3. Step simulated hardware (no-op on real servos). The gyro
        // integrates the shaped rotation so sim heading matches what the
        // wheels were actually asked for.
        for module in drivetrain.modules_mut().iter_mut() {
            module.simulate(dt);
        }
        let sim_rate = shaped.rot * MAX_ANGULAR_SPEED_RADPS.to_degrees();
        drivetrain.gyro_mut().simulate(sim_rate, dt);

        // 4. Gain tuning + odometry
        let pose = drivetrain.periodic(&runtime.tuning)?;
        let telemetry = drivetrain.telemetry()?;

        // 5. Publish pose, telemetry, health
        let pose_json = serde_json::to_string(&PoseMessage {
            x: pose.x,
            y: pose.y,
            heading_deg: pose.heading.to_degrees(),
        })?;
        pub_pose.put(pose_json).await?;
        pub_telemetry.put(serde_json::to_string(&telemetry)?).await?;
        pub_health.put(serde_json::to_string(&runtime.health)?).await?;
    }
}
