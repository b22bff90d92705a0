// Servo diagnostic: READ-ONLY checkout of the module servo chain
//
// This tool does not write anything to the servos - it's completely safe
// to run with the robot on the ground.
//
// Usage: cargo run --example servo_diagnostic -- --port /dev/ttyUSB0

use clap::Parser;

use swerve_runtime::config::{MODULE_SERVO_IDS, SERVO_PORT};
use swerve_runtime::drive::servo::{Register, ServoBus, DEFAULT_BAUDRATE};

const MODULE_NAMES: [&str; 4] = ["FrontLeft", "FrontRight", "RearLeft", "RearRight"];

#[derive(Parser, Debug)]
#[command(about = "Read-only servo bus checkout for the swerve base")]
struct Args {
    /// Serial port of the servo chain
    #[arg(long, default_value = SERVO_PORT)]
    port: String,

    /// Bus baudrate
    #[arg(long, default_value_t = DEFAULT_BAUDRATE)]
    baud: u32,
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("debug".parse().unwrap()),
        )
        .init();

    let args = Args::parse();

    println!("Swerve servo diagnostic (READ-ONLY)");
    println!("Serial port: {} @ {} baud", args.port, args.baud);
    println!("Expected servo IDs (steer, drive): {MODULE_SERVO_IDS:?}");
    println!();

    println!("Step 1: Opening serial port...");
    let mut bus = match ServoBus::open_with_baudrate(&args.port, args.baud) {
        Ok(bus) => {
            println!("  ok: serial port opened");
            bus
        }
        Err(e) => {
            println!("  FAILED to open serial port: {e}");
            println!();
            println!("Troubleshooting:");
            println!("  - Check the port path is correct");
            println!("  - Verify the USB cable is connected");
            println!("  - Check you have permission on the device node");
            return Err(e.into());
        }
    };
    println!();

    println!("Step 2: Pinging servos...");
    let mut all_found = true;
    for (name, &(steer_id, drive_id)) in MODULE_NAMES.iter().zip(&MODULE_SERVO_IDS) {
        for (axis, id) in [("steer", steer_id), ("drive", drive_id)] {
            print!("  {name} {axis} (ID {id}): ");
            match bus.ping(id) {
                Ok(true) => println!("RESPONDING"),
                Ok(false) => {
                    println!("NO RESPONSE");
                    all_found = false;
                }
                Err(e) => {
                    println!("ERROR: {e}");
                    all_found = false;
                }
            }
        }
    }
    println!();

    if !all_found {
        println!("WARNING: not all servos responded");
        println!("  - Check servo power supply");
        println!("  - Verify the configured IDs match the hardware");
        println!("  - Check chain wiring");
        println!();
    }

    println!("Step 3: Reading servo registers...");
    println!();
    for (name, &(steer_id, drive_id)) in MODULE_NAMES.iter().zip(&MODULE_SERVO_IDS) {
        for (axis, id) in [("steer", steer_id), ("drive", drive_id)] {
            println!("  === {name} {axis} (ID {id}) ===");

            match bus.read_register(id, Register::OperatingMode) {
                Ok(mode) => {
                    let mode_str = match mode {
                        1 => "Velocity",
                        3 => "Position",
                        _ => "Unknown",
                    };
                    println!("    Operating Mode: {mode} ({mode_str})");
                }
                Err(e) => println!("    Operating Mode: ERROR - {e}"),
            }

            match bus.read_register(id, Register::TorqueEnable) {
                Ok(val) => println!("    Torque Enable: {val}"),
                Err(e) => println!("    Torque Enable: ERROR - {e}"),
            }

            match bus.read_i32(id, Register::PresentPosition) {
                Ok(pos) => println!("    Present Position: {pos} ticks"),
                Err(e) => println!("    Present Position: ERROR - {e}"),
            }

            match bus.read_i32(id, Register::PresentVelocity) {
                Ok(vel) => println!("    Present Velocity: {vel}"),
                Err(e) => println!("    Present Velocity: ERROR - {e}"),
            }
            println!();
        }
    }

    println!("Diagnostic complete.");
    Ok(())
}
