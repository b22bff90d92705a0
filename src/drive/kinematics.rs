// Swerve drive kinematics for a four-module base
// Converts chassis-frame velocities (vx, vy, omega) into per-module
// wheel speed and steering angle.
//
// Frame convention: x forward, y left, angles CCW-positive from +x.
// Module order everywhere: front-left, front-right, rear-left, rear-right.

use std::f64::consts::FRAC_PI_4;

/// Chassis-frame velocity command
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct ChassisSpeeds {
    pub vx: f64,    // m/s, forward
    pub vy: f64,    // m/s, left
    pub omega: f64, // rad/s, counter-clockwise
}

impl ChassisSpeeds {
    pub fn new(vx: f64, vy: f64, omega: f64) -> Self {
        Self { vx, vy, omega }
    }

    /// Rotate a field-frame command into the chassis frame given the
    /// current heading (radians, CCW from the field +x axis).
    pub fn from_field_relative(vx: f64, vy: f64, omega: f64, heading: f64) -> Self {
        let (sin_h, cos_h) = heading.sin_cos();
        Self {
            vx: vx * cos_h + vy * sin_h,
            vy: -vx * sin_h + vy * cos_h,
            omega,
        }
    }
}

/// Commanded state for one module: wheel linear speed and steering angle
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct ModuleState {
    pub speed: f64, // m/s
    pub angle: f64, // radians
}

impl ModuleState {
    pub fn new(speed: f64, angle: f64) -> Self {
        Self { speed, angle }
    }
}

/// Feedback from one module: cumulative wheel travel and steering angle.
/// Distance is signed and not monotonic (the wheel can reverse).
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct ModulePosition {
    pub distance: f64, // meters
    pub angle: f64,    // radians
}

/// Closed-form rigid-body map between chassis motion and the four modules
#[derive(Debug, Clone, Copy)]
pub struct SwerveKinematics {
    // (x, y) offset of each module from the robot center, FL, FR, RL, RR
    offsets: [(f64, f64); 4],
}

impl SwerveKinematics {
    pub fn new(wheel_base: f64, track_width: f64) -> Self {
        let hx = wheel_base / 2.0;
        let hy = track_width / 2.0;
        Self {
            offsets: [(hx, hy), (hx, -hy), (-hx, hy), (-hx, -hy)],
        }
    }

    /// Compute the four module states that realize the requested chassis
    /// motion. Each wheel's velocity is the body translational velocity
    /// plus omega cross the module's offset vector.
    pub fn to_module_states(&self, speeds: ChassisSpeeds) -> [ModuleState; 4] {
        self.offsets.map(|(x, y)| {
            let wx = speeds.vx - speeds.omega * y;
            let wy = speeds.vy + speeds.omega * x;
            ModuleState {
                speed: wx.hypot(wy),
                angle: wy.atan2(wx),
            }
        })
    }

    /// X-lock stance: zero speed, wheels at {+45, -45, -45, +45} degrees.
    /// Resists being pushed; independent of any prior state.
    pub fn x_stance() -> [ModuleState; 4] {
        [
            ModuleState::new(0.0, FRAC_PI_4),
            ModuleState::new(0.0, -FRAC_PI_4),
            ModuleState::new(0.0, -FRAC_PI_4),
            ModuleState::new(0.0, FRAC_PI_4),
        ]
    }
}

/// Scale all four speeds down by the same factor if any exceeds
/// `max_speed`, preserving the speed ratios between wheels so the chassis
/// keeps its intended direction instead of skidding. Silent clamp, never
/// an error.
pub fn desaturate(states: &mut [ModuleState; 4], max_speed: f64) {
    let top = states
        .iter()
        .map(|s| s.speed.abs())
        .fold(0.0f64, f64::max);
    if top > max_speed {
        let scale = max_speed / top;
        for s in states.iter_mut() {
            s.speed *= scale;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::f64::consts::{FRAC_PI_2, PI};

    const EPS: f64 = 1e-9;

    fn kinematics() -> SwerveKinematics {
        SwerveKinematics::new(0.675, 0.675)
    }

    #[test]
    fn test_pure_translation_is_symmetric() {
        // Straight-line translation: every wheel points the same way and
        // spins at the same speed, regardless of module position.
        let states = kinematics().to_module_states(ChassisSpeeds::new(1.0, 1.0, 0.0));
        for s in &states {
            assert!((s.speed - 2.0f64.sqrt()).abs() < EPS, "speed {}", s.speed);
            assert!((s.angle - FRAC_PI_4).abs() < EPS, "angle {}", s.angle);
        }
    }

    #[test]
    fn test_pure_rotation_is_tangential() {
        let k = kinematics();
        let states = k.to_module_states(ChassisSpeeds::new(0.0, 0.0, 1.0));
        let radius = (0.675f64 / 2.0).hypot(0.675 / 2.0);
        for s in &states {
            assert!((s.speed - radius).abs() < EPS, "speed {}", s.speed);
        }
        // Front-left wheel at (+,+) moves perpendicular to its offset
        let expected = (0.675f64 / 2.0).atan2(-0.675 / 2.0);
        assert!((states[0].angle - expected).abs() < EPS);
    }

    #[test]
    fn test_field_relative_rotation() {
        // Robot facing field +y: a field +x command becomes chassis -y
        let speeds = ChassisSpeeds::from_field_relative(1.0, 0.0, 0.0, FRAC_PI_2);
        assert!(speeds.vx.abs() < EPS);
        assert!((speeds.vy + 1.0).abs() < EPS);
    }

    #[test]
    fn test_desaturate_scales_proportionally() {
        let mut states = [
            ModuleState::new(6.0, 0.0),
            ModuleState::new(3.0, 0.0),
            ModuleState::new(1.5, 0.0),
            ModuleState::new(0.0, 0.0),
        ];
        desaturate(&mut states, 4.8);

        let top = states.iter().map(|s| s.speed.abs()).fold(0.0f64, f64::max);
        assert!(top <= 4.8 + EPS, "max speed {} exceeds limit", top);

        // Ratios between wheels are preserved
        assert!((states[0].speed / states[1].speed - 2.0).abs() < EPS);
        assert!((states[1].speed / states[2].speed - 2.0).abs() < EPS);
        assert_eq!(states[3].speed, 0.0);
    }

    #[test]
    fn test_desaturate_leaves_feasible_speeds_alone() {
        let mut states = [
            ModuleState::new(1.0, 0.0),
            ModuleState::new(2.0, PI),
            ModuleState::new(3.0, 0.5),
            ModuleState::new(4.0, -0.5),
        ];
        let before = states;
        desaturate(&mut states, 4.8);
        assert_eq!(states, before);
    }

    #[test]
    fn test_x_stance_angles() {
        let states = SwerveKinematics::x_stance();
        let expected = [FRAC_PI_4, -FRAC_PI_4, -FRAC_PI_4, FRAC_PI_4];
        for (s, want) in states.iter().zip(expected) {
            assert_eq!(s.speed, 0.0);
            assert!((s.angle - want).abs() < EPS);
        }
    }
}
