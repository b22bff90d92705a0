// Dead-reckoning pose estimation from wheel travel plus gyro heading
//
// Wheel encoders report cumulative distance, so each tick works on the
// delta against the previous tick's retained positions. Heading is never
// integrated from the wheels: the gyro is the heading of record, read
// absolutely every update.

use super::kinematics::ModulePosition;
use super::shaper::wrap_angle;

/// World-frame pose estimate: meters and radians
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct Pose {
    pub x: f64,
    pub y: f64,
    pub heading: f64,
}

impl Pose {
    pub fn new(x: f64, y: f64, heading: f64) -> Self {
        Self { x, y, heading }
    }
}

/// Pose integrator over four swerve module positions
#[derive(Debug)]
pub struct SwerveOdometry {
    pose: Pose,
    // Baseline for per-tick travel deltas; must be overwritten on reset
    // or the next update applies a spurious jump
    prev_positions: [ModulePosition; 4],
    // Difference between the pose heading and the raw gyro heading, set
    // on reset so the pose can start at any orientation
    gyro_offset: f64,
}

impl SwerveOdometry {
    /// `heading` is the current raw gyro reading in radians.
    pub fn new(heading: f64, positions: [ModulePosition; 4], pose: Pose) -> Self {
        Self {
            pose,
            prev_positions: positions,
            gyro_offset: wrap_angle(pose.heading - heading),
        }
    }

    /// Current estimate; pure read.
    pub fn pose(&self) -> Pose {
        self.pose
    }

    /// Reinitialize to `pose` atomically: both the estimate and the wheel
    /// baseline are replaced, so the following update sees zero travel.
    pub fn reset(&mut self, heading: f64, positions: &[ModulePosition; 4], pose: Pose) {
        self.pose = pose;
        self.prev_positions = *positions;
        self.gyro_offset = wrap_angle(pose.heading - heading);
    }

    /// Advance the estimate by one tick. `heading` is the raw gyro
    /// reading in radians; `positions` the four modules' cumulative
    /// travel and current steering angle, FL, FR, RL, RR.
    pub fn update(&mut self, heading: f64, positions: &[ModulePosition; 4]) -> Pose {
        let new_heading = wrap_angle(heading + self.gyro_offset);

        // Chassis-frame displacement: each wheel's travel delta projected
        // along its steering angle, averaged over the four modules
        let mut dx = 0.0;
        let mut dy = 0.0;
        for (curr, prev) in positions.iter().zip(&self.prev_positions) {
            let delta = curr.distance - prev.distance;
            let (sin_a, cos_a) = curr.angle.sin_cos();
            dx += delta * cos_a;
            dy += delta * sin_a;
        }
        dx /= 4.0;
        dy /= 4.0;

        // Rotate into the world frame at the midpoint heading to split
        // the tick's rotation evenly across the displacement
        let mid = self.pose.heading + 0.5 * wrap_angle(new_heading - self.pose.heading);
        let (sin_m, cos_m) = mid.sin_cos();
        self.pose.x += dx * cos_m - dy * sin_m;
        self.pose.y += dx * sin_m + dy * cos_m;
        self.pose.heading = new_heading;

        self.prev_positions = *positions;
        self.pose
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::f64::consts::{FRAC_PI_2, FRAC_PI_4, PI};

    const EPS: f64 = 1e-12;

    fn positions(distance: f64, angle: f64) -> [ModulePosition; 4] {
        [ModulePosition { distance, angle }; 4]
    }

    fn assert_pose(pose: Pose, x: f64, y: f64, heading: f64) {
        assert!((pose.x - x).abs() < EPS, "x {} != {}", pose.x, x);
        assert!((pose.y - y).abs() < EPS, "y {} != {}", pose.y, y);
        assert!(
            (pose.heading - heading).abs() < EPS,
            "heading {} != {}",
            pose.heading,
            heading
        );
    }

    #[test]
    fn test_update_with_no_travel_is_idempotent() {
        let start = positions(2.5, 0.3);
        let mut odo = SwerveOdometry::new(0.1, start, Pose::new(1.0, -2.0, 0.1));
        let first = odo.update(0.1, &start);
        let second = odo.update(0.1, &start);
        assert_eq!(first, second);
        assert_pose(second, 1.0, -2.0, 0.1);
    }

    #[test]
    fn test_straight_line_forward() {
        let mut odo = SwerveOdometry::new(0.0, positions(0.0, 0.0), Pose::default());
        let pose = odo.update(0.0, &positions(1.0, 0.0));
        assert_pose(pose, 1.0, 0.0, 0.0);
    }

    #[test]
    fn test_lateral_travel() {
        // All wheels pointed +90 degrees: travel is straight left
        let mut odo = SwerveOdometry::new(0.0, positions(0.0, FRAC_PI_2), Pose::default());
        let pose = odo.update(0.0, &positions(0.5, FRAC_PI_2));
        assert_pose(pose, 0.0, 0.5, 0.0);
    }

    #[test]
    fn test_heading_comes_from_gyro() {
        // Spin in place: tangential wheel angles cancel in the average,
        // so position holds while heading tracks the gyro exactly
        let tangential = [
            ModulePosition { distance: 0.2, angle: 3.0 * FRAC_PI_4 },
            ModulePosition { distance: 0.2, angle: FRAC_PI_4 },
            ModulePosition { distance: 0.2, angle: -3.0 * FRAC_PI_4 },
            ModulePosition { distance: 0.2, angle: -FRAC_PI_4 },
        ];
        let zeroed = tangential.map(|p| ModulePosition { distance: 0.0, ..p });
        let mut odo = SwerveOdometry::new(0.0, zeroed, Pose::default());
        let pose = odo.update(0.4, &tangential);
        assert!(pose.x.abs() < EPS);
        assert!(pose.y.abs() < EPS);
        assert!((pose.heading - 0.4).abs() < EPS);
    }

    #[test]
    fn test_travel_rotates_with_heading() {
        // Wheels pointed straight ahead while the robot faces +90 in the
        // world: chassis-forward travel lands on the world +y axis
        let mut odo = SwerveOdometry::new(
            FRAC_PI_2,
            positions(0.0, 0.0),
            Pose::new(0.0, 0.0, FRAC_PI_2),
        );
        let pose = odo.update(FRAC_PI_2, &positions(1.0, 0.0));
        assert_pose(pose, 0.0, 1.0, FRAC_PI_2);
    }

    #[test]
    fn test_reset_has_no_phantom_delta() {
        let mut odo = SwerveOdometry::new(0.0, positions(0.0, 0.0), Pose::default());
        // Accumulate real travel first
        odo.update(0.0, &positions(3.0, 0.0));

        let target = Pose::new(5.0, -1.0, FRAC_PI_4);
        let at_reset = positions(3.0, 0.0);
        odo.reset(0.0, &at_reset, target);
        assert_eq!(odo.pose(), target);

        // The update after reset with unchanged positions must not move
        let pose = odo.update(0.0, &at_reset);
        assert_pose(pose, 5.0, -1.0, FRAC_PI_4);
    }

    #[test]
    fn test_reset_heading_offset_tracks_gyro_deltas() {
        // Reset the pose heading to pi while the gyro reads zero; a
        // quarter-turn on the gyro then advances the pose by the same
        // quarter-turn
        let start = positions(0.0, 0.0);
        let mut odo = SwerveOdometry::new(0.0, start, Pose::default());
        odo.reset(0.0, &start, Pose::new(0.0, 0.0, PI));
        let pose = odo.update(FRAC_PI_2, &start);
        assert!((wrap_angle(pose.heading - (PI + FRAC_PI_2))).abs() < EPS);
    }
}
