// Joystick command shaping for the swerve base
//
// Translation commands are rate-limited in polar form: the held direction
// and magnitude are slewed separately, with the allowed direction rate
// shrinking as magnitude grows. This bounds the lateral acceleration the
// chassis is asked for; a near-reversal sheds speed through zero instead
// of sweeping the wheels around at full tilt.

use std::f64::consts::{PI, TAU};
use tracing::warn;

use crate::config::{DIRECTION_SLEW_RATE, LOOP_HZ, MAGNITUDE_SLEW_RATE, ROTATIONAL_SLEW_RATE};

// Regime thresholds on the wrapped angle between requested and held
// direction (radians)
const LOW_DIFF: f64 = 0.45 * PI;
const HIGH_DIFF: f64 = 0.85 * PI;

// Direction rate used when held magnitude is zero; large enough that the
// first input snaps straight to its target direction
const SNAP_DIRECTION_RATE: f64 = 500.0;

// Below this magnitude a reversal flips through zero; avoids oscillating
// on floating-point noise around exact zero
const MAG_EPSILON: f64 = 1e-4;

/// Wrap an angle to (-pi, pi]
pub fn wrap_angle(angle: f64) -> f64 {
    let mut a = angle % TAU;
    if a > PI {
        a -= TAU;
    } else if a <= -PI {
        a += TAU;
    }
    a
}

/// Unsigned wrapped difference between two angles, in [0, pi]
pub fn angle_difference(a: f64, b: f64) -> f64 {
    wrap_angle(a - b).abs()
}

/// Step `current` towards `target` along the shorter arc, moving at most
/// `step` radians. Reaches `target` exactly once within range.
pub fn step_towards_circular(current: f64, target: f64, step: f64) -> f64 {
    let diff = wrap_angle(target - current);
    if diff.abs() <= step {
        wrap_angle(target)
    } else {
        wrap_angle(current + step.copysign(diff))
    }
}

/// Linear slew rate limiter with explicit dt
#[derive(Debug, Clone, Copy)]
pub struct SlewRateLimiter {
    rate: f64, // units per second
    value: f64,
}

impl SlewRateLimiter {
    pub fn new(rate: f64) -> Self {
        Self { rate, value: 0.0 }
    }

    pub fn calculate(&mut self, input: f64, dt: f64) -> f64 {
        let bound = self.rate * dt;
        self.value += (input - self.value).clamp(-bound, bound);
        self.value
    }
}

/// Shaped output for one tick, joystick scale
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Shaped {
    pub x: f64,
    pub y: f64,
    pub rot: f64,
    /// True when the raw input was non-finite and got clamped to zero
    pub degraded: bool,
}

/// Stateful polar rate limiter for translation plus a linear limiter for
/// rotation. Strictly sequential: one caller, one call per tick.
#[derive(Debug)]
pub struct CommandShaper {
    dir: f64, // held translation direction, (-pi, pi]
    mag: f64, // held translation magnitude, [0, 1]
    mag_limiter: SlewRateLimiter,
    rot_limiter: SlewRateLimiter,
    input_fault: bool,
}

impl CommandShaper {
    pub fn new() -> Self {
        Self {
            dir: 0.0,
            mag: 0.0,
            mag_limiter: SlewRateLimiter::new(MAGNITUDE_SLEW_RATE),
            rot_limiter: SlewRateLimiter::new(ROTATIONAL_SLEW_RATE),
            input_fault: false,
        }
    }

    /// Held translation direction (radians), for inspection
    pub fn direction(&self) -> f64 {
        self.dir
    }

    /// Held translation magnitude, for inspection
    pub fn magnitude(&self) -> f64 {
        self.mag
    }

    /// True if the most recent tick clamped a non-finite input
    pub fn input_fault(&self) -> bool {
        self.input_fault
    }

    /// Shape one tick of raw input. Inputs are joystick scale [-1, 1];
    /// `dt` is the elapsed time since the previous call in seconds. With
    /// `rate_limit` off the input passes through untouched.
    pub fn shape(&mut self, x: f64, y: f64, rot: f64, rate_limit: bool, dt: f64) -> Shaped {
        let (x, y, rot, dt) = if x.is_finite() && y.is_finite() && rot.is_finite() && dt.is_finite()
        {
            self.input_fault = false;
            (x, y, rot, dt)
        } else {
            // Never let a NaN reach the slew state; it would stick there
            // for every following tick. The zeroed command still runs
            // through the limiters below, so under persistent garbage the
            // chassis ramps down to a stop instead of holding its last
            // good speed.
            warn!("non-finite drive input ({x}, {y}, {rot}, dt={dt}), clamping to zero");
            self.input_fault = true;
            let dt = if dt.is_finite() && dt >= 0.0 {
                dt
            } else {
                1.0 / LOOP_HZ as f64
            };
            (0.0, 0.0, 0.0, dt)
        };

        if !rate_limit {
            return Shaped {
                x,
                y,
                rot,
                degraded: self.input_fault,
            };
        }

        let input_dir = y.atan2(x);
        let input_mag = x.hypot(y).min(1.0);

        // Direction rate limit is inversely proportional to the held
        // magnitude: slow motion may turn freely, fast motion must shed
        // speed to turn.
        let dir_rate = if self.mag != 0.0 {
            (DIRECTION_SLEW_RATE / self.mag).abs()
        } else {
            SNAP_DIRECTION_RATE
        };

        let diff = angle_difference(input_dir, self.dir);
        if diff < LOW_DIFF {
            self.dir = step_towards_circular(self.dir, input_dir, dir_rate * dt);
            self.mag = self.mag_limiter.calculate(input_mag, dt);
        } else if diff > HIGH_DIFF {
            if self.mag > MAG_EPSILON {
                // Near-reversal: hold direction, decelerate to zero first
                self.mag = self.mag_limiter.calculate(0.0, dt);
            } else {
                self.dir = wrap_angle(self.dir + PI);
                self.mag = self.mag_limiter.calculate(input_mag, dt);
            }
        } else {
            // Moderate turn: track direction while scrubbing speed off
            self.dir = step_towards_circular(self.dir, input_dir, dir_rate * dt);
            self.mag = self.mag_limiter.calculate(0.0, dt);
        }

        let (sin_d, cos_d) = self.dir.sin_cos();
        Shaped {
            x: self.mag * cos_d,
            y: self.mag * sin_d,
            rot: self.rot_limiter.calculate(rot, dt),
            degraded: self.input_fault,
        }
    }
}

impl Default for CommandShaper {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::f64::consts::FRAC_PI_2;

    const DT: f64 = 0.02;
    const EPS: f64 = 1e-9;

    #[test]
    fn test_wrap_angle_range() {
        assert!((wrap_angle(3.0 * PI) - PI).abs() < EPS);
        assert!((wrap_angle(-PI) - PI).abs() < EPS);
        assert!((wrap_angle(0.5) - 0.5).abs() < EPS);
        assert!((wrap_angle(TAU + 0.25) - 0.25).abs() < EPS);
    }

    #[test]
    fn test_step_towards_circular_takes_short_arc() {
        // From just below +pi to just above -pi is a short hop across
        // the wrap point, not a full sweep.
        let stepped = step_towards_circular(PI - 0.1, -PI + 0.1, 0.05);
        assert!((stepped - (PI - 0.05)).abs() < EPS);
        // Within range it lands exactly on target
        assert!((step_towards_circular(0.0, 0.3, 1.0) - 0.3).abs() < EPS);
    }

    #[test]
    fn test_passthrough_when_rate_limit_off() {
        let mut shaper = CommandShaper::new();
        let out = shaper.shape(0.3, -0.7, 0.9, false, DT);
        assert_eq!(out, Shaped { x: 0.3, y: -0.7, rot: 0.9, degraded: false });
    }

    #[test]
    fn test_first_input_snaps_direction() {
        // Held magnitude is zero, so the direction limit is effectively
        // unbounded and the first command sets the direction immediately.
        let mut shaper = CommandShaper::new();
        shaper.shape(0.0, 1.0, 0.0, true, DT);
        assert!((shaper.direction() - FRAC_PI_2).abs() < EPS);
    }

    #[test]
    fn test_magnitude_ramps_at_slew_rate() {
        let mut shaper = CommandShaper::new();
        let step = MAGNITUDE_SLEW_RATE * DT;
        for tick in 1..=10 {
            shaper.shape(1.0, 0.0, 0.0, true, DT);
            let expected = (tick as f64 * step).min(1.0);
            assert!(
                (shaper.magnitude() - expected).abs() < EPS,
                "tick {tick}: mag {} expected {expected}",
                shaper.magnitude()
            );
        }
    }

    #[test]
    fn test_reversal_decelerates_before_flipping() {
        let mut shaper = CommandShaper::new();
        // Ramp to full speed in direction 0
        for _ in 0..60 {
            shaper.shape(1.0, 0.0, 0.0, true, DT);
        }
        assert!((shaper.magnitude() - 1.0).abs() < EPS);

        // Command an exact reversal: magnitude must fall monotonically to
        // zero with the direction pinned at 0, then flip straight to pi.
        let mut prev_mag = shaper.magnitude();
        let mut flipped = false;
        for _ in 0..120 {
            let out = shaper.shape(-1.0, 0.0, 0.0, true, DT);
            if (shaper.direction() - PI).abs() < EPS {
                flipped = true;
            }
            if !flipped {
                assert!(shaper.direction().abs() < EPS, "direction moved mid-decel");
                assert!(
                    shaper.magnitude() <= prev_mag + EPS,
                    "magnitude increased during decel"
                );
                assert!(out.y.abs() < EPS, "lateral component during reversal");
            }
            prev_mag = shaper.magnitude();
        }
        assert!(flipped, "direction never flipped to pi");
        // After the flip the shaper accelerates along the new direction
        let out = shaper.shape(-1.0, 0.0, 0.0, true, DT);
        assert!(out.x < 0.0);
    }

    #[test]
    fn test_non_finite_input_ramps_to_stop_and_recovers() {
        let mut shaper = CommandShaper::new();
        // Ramp to full speed with an active rotation command
        for _ in 0..60 {
            shaper.shape(1.0, 0.0, 0.5, true, DT);
        }
        assert!((shaper.magnitude() - 1.0).abs() < EPS);

        // Persistent garbage must decelerate the chassis to zero, never
        // hold the last good command.
        let mut prev_mag = shaper.magnitude();
        let mut out = Shaped { x: 0.0, y: 0.0, rot: 0.0, degraded: false };
        for _ in 0..60 {
            out = shaper.shape(f64::NAN, 0.2, f64::INFINITY, true, DT);
            assert!(out.degraded);
            assert!(shaper.input_fault());
            assert!(
                shaper.magnitude() <= prev_mag + EPS,
                "magnitude increased on a degraded tick"
            );
            prev_mag = shaper.magnitude();
        }
        assert!(out.x.abs() < EPS && out.y.abs() < EPS && out.rot.abs() < EPS);
        assert!(shaper.magnitude().is_finite());
        assert!(shaper.direction().is_finite());

        // A clean tick clears the fault and the filter keeps working
        let out = shaper.shape(1.0, 0.0, 0.0, true, DT);
        assert!(!out.degraded);
        assert!(!shaper.input_fault());
        assert!(out.x > 0.0);
    }

    #[test]
    fn test_non_finite_dt_still_decays() {
        let mut shaper = CommandShaper::new();
        for _ in 0..60 {
            shaper.shape(1.0, 0.0, 0.0, true, DT);
        }
        let before = shaper.magnitude();
        // A garbage dt falls back to the nominal loop period so the
        // ramp-down still makes progress.
        let out = shaper.shape(1.0, 0.0, 0.0, true, f64::NAN);
        assert!(out.degraded);
        assert!(shaper.magnitude() < before);
    }
}
