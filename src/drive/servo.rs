// Smart-servo serial bus (Dynamixel Protocol 2.0 framing)
//
// Packet format: [0xFF, 0xFF, 0xFD, 0x00, ID, LEN_L, LEN_H, INST,
// PARAMS..., CRC_L, CRC_H]. Parameter bytes matching the header pattern
// are byte-stuffed; the CRC is CRC-16/IBM over everything before it.
//
// Each swerve module pairs two of these servos: one in position mode for
// steering, one in velocity mode for the wheel. Both run their control
// loops on-board, with P/I/D and feedforward gains in writable registers.

use std::cell::RefCell;
use std::f64::consts::{FRAC_PI_2, PI, TAU};
use std::io::{Read, Write};
use std::rc::Rc;
use std::time::Duration;

use serialport::SerialPort;
use tracing::{debug, info};

use super::kinematics::{ModulePosition, ModuleState};
use super::module::{DriveError, SwerveModule};
use super::shaper::{angle_difference, wrap_angle};
use super::tuning::{DriveGains, SteerGains};
use crate::config::WHEEL_RADIUS;

/// Default serial configuration
pub const DEFAULT_BAUDRATE: u32 = 1_000_000;
pub const DEFAULT_TIMEOUT_MS: u64 = 50;

/// Packet header bytes
const HEADER: [u8; 4] = [0xFF, 0xFF, 0xFD, 0x00];

/// Instruction set
#[repr(u8)]
#[derive(Debug, Clone, Copy)]
pub enum Instruction {
    Ping = 0x01,
    Read = 0x02,
    Write = 0x03,
}

/// Control table entries used by the drive
#[derive(Debug, Clone, Copy)]
pub enum Register {
    OperatingMode,
    TorqueEnable,
    VelocityIGain,
    VelocityPGain,
    PositionDGain,
    PositionIGain,
    PositionPGain,
    FeedforwardGain,
    GoalVelocity,
    GoalPosition,
    PresentVelocity,
    PresentPosition,
}

impl Register {
    pub fn address(self) -> u16 {
        match self {
            Register::OperatingMode => 11,
            Register::TorqueEnable => 64,
            Register::VelocityIGain => 76,
            Register::VelocityPGain => 78,
            Register::PositionDGain => 80,
            Register::PositionIGain => 82,
            Register::PositionPGain => 84,
            Register::FeedforwardGain => 88,
            Register::GoalVelocity => 104,
            Register::GoalPosition => 116,
            Register::PresentVelocity => 128,
            Register::PresentPosition => 132,
        }
    }

    /// Entry size in bytes (1, 2 or 4)
    pub fn size(self) -> usize {
        match self {
            Register::OperatingMode | Register::TorqueEnable => 1,
            Register::VelocityIGain
            | Register::VelocityPGain
            | Register::PositionDGain
            | Register::PositionIGain
            | Register::PositionPGain
            | Register::FeedforwardGain => 2,
            Register::GoalVelocity
            | Register::GoalPosition
            | Register::PresentVelocity
            | Register::PresentPosition => 4,
        }
    }
}

/// Operating modes
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum OperatingMode {
    Velocity = 1,
    Position = 3,
}

/// Error types for servo communication
#[derive(Debug, thiserror::Error)]
pub enum ServoError {
    #[error("serial port error: {0}")]
    Serial(#[from] serialport::Error),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("invalid response from servo {id}: {reason}")]
    InvalidResponse { id: u8, reason: String },

    #[error("crc mismatch in response from servo {id}")]
    Crc { id: u8 },

    #[error("servo {id} reported hardware error status 0x{status:02X}")]
    ServoFault { id: u8, status: u8 },

    #[error("timeout waiting for response from servo {id}")]
    Timeout { id: u8 },
}

pub type Result<T> = std::result::Result<T, ServoError>;

/// CRC-16/IBM (poly 0x8005, init 0, no reflection)
fn crc16(data: &[u8]) -> u16 {
    let mut crc: u16 = 0;
    for &byte in data {
        crc ^= (byte as u16) << 8;
        for _ in 0..8 {
            crc = if crc & 0x8000 != 0 {
                (crc << 1) ^ 0x8005
            } else {
                crc << 1
            };
        }
    }
    crc
}

/// Insert a 0xFD after any 0xFF 0xFF 0xFD run in the parameter block so
/// a payload can never alias the packet header
fn stuff(params: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(params.len());
    let mut ff_run = 0u8;
    for &b in params {
        out.push(b);
        if ff_run >= 2 && b == 0xFD {
            out.push(0xFD);
            ff_run = 0;
        } else if b == 0xFF {
            ff_run += 1;
        } else {
            ff_run = 0;
        }
    }
    out
}

/// Inverse of `stuff`: drop the duplicated 0xFD after 0xFF 0xFF 0xFD
fn unstuff(data: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(data.len());
    let mut ff_run = 0u8;
    let mut i = 0;
    while i < data.len() {
        let b = data[i];
        out.push(b);
        i += 1;
        if ff_run >= 2 && b == 0xFD {
            i += 1; // skip the stuffed duplicate
            ff_run = 0;
        } else if b == 0xFF {
            ff_run += 1;
        } else {
            ff_run = 0;
        }
    }
    out
}

/// Servo bus: serial transport shared by all servos on one chain
pub struct ServoBus {
    port: Box<dyn SerialPort>,
}

impl ServoBus {
    pub fn open(port_name: &str) -> Result<Self> {
        Self::open_with_baudrate(port_name, DEFAULT_BAUDRATE)
    }

    pub fn open_with_baudrate(port_name: &str, baudrate: u32) -> Result<Self> {
        let port = serialport::new(port_name, baudrate)
            .timeout(Duration::from_millis(DEFAULT_TIMEOUT_MS))
            .open()?;

        Ok(Self { port })
    }

    /// Build a complete instruction packet
    fn build_packet(id: u8, instruction: Instruction, params: &[u8]) -> Vec<u8> {
        let stuffed = stuff(params);
        let length = (stuffed.len() + 3) as u16; // instruction + crc

        let mut packet = Vec::with_capacity(10 + stuffed.len());
        packet.extend_from_slice(&HEADER);
        packet.push(id);
        packet.extend_from_slice(&length.to_le_bytes());
        packet.push(instruction as u8);
        packet.extend_from_slice(&stuffed);

        let crc = crc16(&packet);
        packet.extend_from_slice(&crc.to_le_bytes());
        packet
    }

    fn send_packet(&mut self, packet: &[u8]) -> Result<()> {
        self.port.write_all(packet)?;
        self.port.flush()?;
        Ok(())
    }

    /// Read a status packet and return its parameter bytes
    fn read_response(&mut self, expected_id: u8) -> Result<Vec<u8>> {
        let mut head = [0u8; 7];
        self.port.read_exact(&mut head).map_err(|e| {
            if e.kind() == std::io::ErrorKind::TimedOut {
                ServoError::Timeout { id: expected_id }
            } else {
                ServoError::Io(e)
            }
        })?;

        if head[..4] != HEADER {
            return Err(ServoError::InvalidResponse {
                id: expected_id,
                reason: format!("bad header: {:02X?}", &head[..4]),
            });
        }

        let id = head[4];
        let length = u16::from_le_bytes([head[5], head[6]]) as usize;
        if id != expected_id {
            return Err(ServoError::InvalidResponse {
                id: expected_id,
                reason: format!("id mismatch: expected {expected_id}, got {id}"),
            });
        }
        if length < 4 {
            return Err(ServoError::InvalidResponse {
                id,
                reason: format!("length {length} too short for a status packet"),
            });
        }

        // instruction + error + params + crc
        let mut rest = vec![0u8; length];
        self.port.read_exact(&mut rest)?;

        let mut crc_data = head.to_vec();
        crc_data.extend_from_slice(&rest[..length - 2]);
        let expected_crc = crc16(&crc_data);
        let received_crc = u16::from_le_bytes([rest[length - 2], rest[length - 1]]);
        if expected_crc != received_crc {
            return Err(ServoError::Crc { id });
        }

        if rest[0] != 0x55 {
            return Err(ServoError::InvalidResponse {
                id,
                reason: format!("not a status packet: instruction 0x{:02X}", rest[0]),
            });
        }
        let status = rest[1];
        if status != 0 {
            return Err(ServoError::ServoFault { id, status });
        }

        Ok(unstuff(&rest[2..length - 2]))
    }

    /// Ping a servo to check if it's on the bus
    pub fn ping(&mut self, id: u8) -> Result<bool> {
        let packet = Self::build_packet(id, Instruction::Ping, &[]);
        self.send_packet(&packet)?;

        match self.read_response(id) {
            Ok(_) => Ok(true),
            Err(ServoError::Timeout { .. }) => Ok(false),
            Err(e) => Err(e),
        }
    }

    /// Read a control table entry, zero-extended to u32
    pub fn read_register(&mut self, id: u8, register: Register) -> Result<u32> {
        let addr = register.address().to_le_bytes();
        let size = (register.size() as u16).to_le_bytes();
        let params = [addr[0], addr[1], size[0], size[1]];
        let packet = Self::build_packet(id, Instruction::Read, &params);
        self.send_packet(&packet)?;

        let response = self.read_response(id)?;
        if response.len() != register.size() {
            return Err(ServoError::InvalidResponse {
                id,
                reason: format!(
                    "expected {} data bytes, got {}",
                    register.size(),
                    response.len()
                ),
            });
        }
        let mut value = 0u32;
        for (i, &b) in response.iter().enumerate() {
            value |= (b as u32) << (8 * i);
        }
        Ok(value)
    }

    /// Read a 4-byte register as a signed value
    pub fn read_i32(&mut self, id: u8, register: Register) -> Result<i32> {
        Ok(self.read_register(id, register)? as i32)
    }

    /// Write a control table entry (low `size` bytes of `value`)
    pub fn write_register(&mut self, id: u8, register: Register, value: u32) -> Result<()> {
        let addr = register.address().to_le_bytes();
        let mut params = vec![addr[0], addr[1]];
        params.extend_from_slice(&value.to_le_bytes()[..register.size()]);
        let packet = Self::build_packet(id, Instruction::Write, &params);
        debug!("write servo {id}: reg={register:?}, value={value}");
        self.send_packet(&packet)?;

        let _ = self.read_response(id)?;
        Ok(())
    }

    pub fn write_i32(&mut self, id: u8, register: Register, value: i32) -> Result<()> {
        self.write_register(id, register, value as u32)
    }

    // === High-level convenience methods ===

    pub fn enable_torque(&mut self, id: u8) -> Result<()> {
        self.write_register(id, Register::TorqueEnable, 1)
    }

    pub fn disable_torque(&mut self, id: u8) -> Result<()> {
        self.write_register(id, Register::TorqueEnable, 0)
    }

    /// Set operating mode (torque must be disabled first)
    pub fn set_operating_mode(&mut self, id: u8, mode: OperatingMode) -> Result<()> {
        self.write_register(id, Register::OperatingMode, mode as u32)
    }
}

// Steering servo: 4096 ticks per revolution in position mode
const TICKS_PER_REV: f64 = 4096.0;
const RAD_PER_TICK: f64 = TAU / TICKS_PER_REV;

// Drive servo travel per position tick (meters)
const METERS_PER_TICK: f64 = TAU * WHEEL_RADIUS / TICKS_PER_REV;

// Velocity register unit, rpm per tick
const VELOCITY_UNIT_RPM: f64 = 0.229;

// Fixed-point scales of the gain registers
const POS_P_SCALE: f64 = 128.0;
const POS_I_SCALE: f64 = 65536.0;
const POS_D_SCALE: f64 = 16.0;
const VEL_P_SCALE: f64 = 128.0;
const VEL_I_SCALE: f64 = 65536.0;
const FF_SCALE: f64 = 4.0;

// Gain registers hold 14 usable bits
const GAIN_RAW_MAX: f64 = 16383.0;

fn gain_raw(value: f64, scale: f64) -> u32 {
    (value * scale).round().clamp(0.0, GAIN_RAW_MAX) as u32
}

fn mps_to_velocity_raw(speed: f64) -> i32 {
    let rpm = speed / (TAU * WHEEL_RADIUS) * 60.0;
    (rpm / VELOCITY_UNIT_RPM).round() as i32
}

fn velocity_raw_to_mps(raw: i32) -> f64 {
    raw as f64 * VELOCITY_UNIT_RPM / 60.0 * TAU * WHEEL_RADIUS
}

/// One hardware swerve module: a steering servo in position mode and a
/// drive servo in velocity mode on a shared bus.
///
/// The bus is shared across the four modules of the base; the drive loop
/// is single-threaded, so `Rc<RefCell<_>>` is enough.
pub struct DynamixelModule {
    bus: Rc<RefCell<ServoBus>>,
    steer_id: u8,
    drive_id: u8,
    // Steering zero relative to the chassis forward axis
    angular_offset: f64,
    // Software zero for cumulative travel; the hardware counter is never
    // reset
    distance_offset: f64,
}

impl DynamixelModule {
    pub fn new(
        bus: Rc<RefCell<ServoBus>>,
        steer_id: u8,
        drive_id: u8,
        angular_offset: f64,
    ) -> Self {
        Self {
            bus,
            steer_id,
            drive_id,
            angular_offset,
            distance_offset: 0.0,
        }
    }

    /// Put both servos in their control modes with torque on. Must be
    /// called before commanding states.
    pub fn initialize(&mut self) -> Result<()> {
        info!(
            "initializing module servos steer={} drive={}",
            self.steer_id, self.drive_id
        );
        let mut bus = self.bus.borrow_mut();

        for &id in &[self.steer_id, self.drive_id] {
            if !bus.ping(id)? {
                return Err(ServoError::Timeout { id });
            }
            bus.disable_torque(id)?;
        }
        bus.set_operating_mode(self.steer_id, OperatingMode::Position)?;
        bus.set_operating_mode(self.drive_id, OperatingMode::Velocity)?;
        for &id in &[self.steer_id, self.drive_id] {
            bus.enable_torque(id)?;
        }
        Ok(())
    }

    fn steer_angle(&mut self) -> Result<f64> {
        let ticks = self.bus.borrow_mut().read_i32(self.steer_id, Register::PresentPosition)?;
        Ok(wrap_angle(ticks as f64 * RAD_PER_TICK - self.angular_offset))
    }

    fn raw_distance(&mut self) -> Result<f64> {
        let ticks = self.bus.borrow_mut().read_i32(self.drive_id, Register::PresentPosition)?;
        Ok(ticks as f64 * METERS_PER_TICK)
    }

    fn angle_to_goal_ticks(&self, angle: f64) -> u32 {
        let turns = (angle + self.angular_offset).rem_euclid(TAU) / TAU;
        (turns * TICKS_PER_REV).round() as u32 % TICKS_PER_REV as u32
    }
}

impl SwerveModule for DynamixelModule {
    fn position(&mut self) -> std::result::Result<ModulePosition, DriveError> {
        Ok(ModulePosition {
            distance: self.raw_distance()? - self.distance_offset,
            angle: self.steer_angle()?,
        })
    }

    fn state(&mut self) -> std::result::Result<ModuleState, DriveError> {
        let raw = self.bus.borrow_mut().read_i32(self.drive_id, Register::PresentVelocity)?;
        Ok(ModuleState {
            speed: velocity_raw_to_mps(raw),
            angle: self.steer_angle()?,
        })
    }

    fn set_desired_state(&mut self, state: ModuleState) -> std::result::Result<(), DriveError> {
        // Never rotate the steering more than 90 degrees: flip the wheel
        // direction instead and run the drive servo backwards
        let current = self.steer_angle()?;
        let (angle, speed) = if angle_difference(state.angle, current) > FRAC_PI_2 {
            (wrap_angle(state.angle + PI), -state.speed)
        } else {
            (state.angle, state.speed)
        };

        let goal_ticks = self.angle_to_goal_ticks(angle);
        let mut bus = self.bus.borrow_mut();
        bus.write_register(self.steer_id, Register::GoalPosition, goal_ticks)?;
        bus.write_i32(self.drive_id, Register::GoalVelocity, mps_to_velocity_raw(speed))?;
        Ok(())
    }

    fn reset_position(&mut self) -> std::result::Result<(), DriveError> {
        self.distance_offset = self.raw_distance()?;
        Ok(())
    }

    fn set_steer_gains(&mut self, gains: SteerGains) -> std::result::Result<(), DriveError> {
        let mut bus = self.bus.borrow_mut();
        bus.write_register(self.steer_id, Register::PositionPGain, gain_raw(gains.p, POS_P_SCALE))?;
        bus.write_register(self.steer_id, Register::PositionIGain, gain_raw(gains.i, POS_I_SCALE))?;
        bus.write_register(self.steer_id, Register::PositionDGain, gain_raw(gains.d, POS_D_SCALE))?;
        Ok(())
    }

    fn set_drive_gains(&mut self, gains: DriveGains) -> std::result::Result<(), DriveError> {
        let mut bus = self.bus.borrow_mut();
        bus.write_register(self.drive_id, Register::VelocityPGain, gain_raw(gains.p, VEL_P_SCALE))?;
        bus.write_register(self.drive_id, Register::VelocityIGain, gain_raw(gains.i, VEL_I_SCALE))?;
        // The velocity loop has no D register on this servo; gains.d is
        // kept in the cache for tools but cannot be pushed to firmware
        bus.write_register(self.drive_id, Register::FeedforwardGain, gain_raw(gains.ff, FF_SCALE))?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ping_packet_matches_reference() {
        // Reference packet from the protocol documentation: ping ID 1
        let packet = ServoBus::build_packet(1, Instruction::Ping, &[]);
        assert_eq!(
            packet,
            [0xFF, 0xFF, 0xFD, 0x00, 0x01, 0x03, 0x00, 0x01, 0x19, 0x4E]
        );
    }

    #[test]
    fn test_crc16_empty_and_known() {
        assert_eq!(crc16(&[]), 0);
        // CRC of the ping header, cross-checked by the packet test above
        let data = [0xFF, 0xFF, 0xFD, 0x00, 0x01, 0x03, 0x00, 0x01];
        assert_eq!(crc16(&data), 0x4E19);
    }

    #[test]
    fn test_stuffing_round_trip() {
        let raw = vec![0x12, 0xFF, 0xFF, 0xFD, 0x00, 0xFF, 0xFF, 0xFD, 0xFF];
        let stuffed = stuff(&raw);
        // Both header-aliasing runs got a 0xFD inserted
        assert_eq!(stuffed.len(), raw.len() + 2);
        assert_eq!(unstuff(&stuffed), raw);

        let clean = vec![0x01, 0x02, 0xFF, 0x03];
        assert_eq!(stuff(&clean), clean);
    }

    #[test]
    fn test_write_packet_layout() {
        // Write 2-byte value 0x0200 to a gain register of servo 1
        let packet = ServoBus::build_packet(1, Instruction::Write, &[84, 0, 0x00, 0x02]);
        assert_eq!(&packet[..4], &HEADER);
        assert_eq!(packet[4], 1); // id
        // length = params (4) + instruction + crc
        assert_eq!(u16::from_le_bytes([packet[5], packet[6]]), 7);
        assert_eq!(packet[7], 0x03); // WRITE
        assert_eq!(&packet[8..12], &[84, 0, 0x00, 0x02]);
        assert_eq!(packet.len(), 14);
    }

    #[test]
    fn test_velocity_conversion_round_trip() {
        let raw = mps_to_velocity_raw(1.0);
        assert!(raw > 0);
        let back = velocity_raw_to_mps(raw);
        assert!((back - 1.0).abs() < 0.01, "round trip gave {back}");
        assert_eq!(mps_to_velocity_raw(0.0), 0);
        assert_eq!(mps_to_velocity_raw(-1.0), -raw);
    }

    #[test]
    fn test_gain_raw_scaling_and_clamp() {
        assert_eq!(gain_raw(1.0, POS_P_SCALE), 128);
        assert_eq!(gain_raw(0.04, VEL_P_SCALE), 5);
        assert_eq!(gain_raw(-1.0, POS_P_SCALE), 0);
        assert_eq!(gain_raw(1e9, POS_P_SCALE), 16383);
    }
}
