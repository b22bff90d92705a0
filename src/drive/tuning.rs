// Live gain tuning for the module servos
//
// An operator tool publishes gain values; every tick the tuner compares
// what it observes against the last-applied cache and pushes a whole
// gain set to all four modules only when something actually changed.
// Comparison is exact equality: tool values only move on explicit edits,
// so a tolerance band would just mask them.

use tracing::info;

use super::module::{DriveError, SwerveModule};
use crate::config;
use crate::messages::TuningValues;

/// Steering axis closed-loop gains
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SteerGains {
    pub p: f64,
    pub i: f64,
    pub d: f64,
}

/// Drive axis closed-loop gains plus feedforward
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DriveGains {
    pub p: f64,
    pub i: f64,
    pub d: f64,
    pub ff: f64,
}

/// Change detector over the two axis gain sets
#[derive(Debug)]
pub struct GainTuner {
    steer: SteerGains,
    drive: DriveGains,
}

impl GainTuner {
    pub fn new() -> Self {
        Self {
            steer: SteerGains {
                p: config::STEER_P,
                i: config::STEER_I,
                d: config::STEER_D,
            },
            drive: DriveGains {
                p: config::DRIVE_P,
                i: config::DRIVE_I,
                d: config::DRIVE_D,
                ff: config::DRIVE_FF,
            },
        }
    }

    pub fn steer(&self) -> SteerGains {
        self.steer
    }

    pub fn drive(&self) -> DriveGains {
        self.drive
    }

    /// Push the cached gains to all four modules unconditionally, e.g.
    /// once at startup so the servos match the kernel's defaults.
    pub fn apply_all<M: SwerveModule>(
        &self,
        modules: &mut [M; 4],
    ) -> Result<(), DriveError> {
        for module in modules.iter_mut() {
            module.set_steer_gains(self.steer)?;
            module.set_drive_gains(self.drive)?;
        }
        Ok(())
    }

    /// Compare the observed tuning values against the cache and push any
    /// changed axis group to all four modules. Unset fields read back as
    /// the cached value, so they never register as edits.
    pub fn poll<M: SwerveModule>(
        &mut self,
        observed: &TuningValues,
        modules: &mut [M; 4],
    ) -> Result<(), DriveError> {
        let steer = SteerGains {
            p: observed.steer_p.unwrap_or(self.steer.p),
            i: observed.steer_i.unwrap_or(self.steer.i),
            d: observed.steer_d.unwrap_or(self.steer.d),
        };
        if steer != self.steer {
            info!("steer gains changed: {steer:?}");
            self.steer = steer;
            for module in modules.iter_mut() {
                module.set_steer_gains(steer)?;
            }
        }

        let drive = DriveGains {
            p: observed.drive_p.unwrap_or(self.drive.p),
            i: observed.drive_i.unwrap_or(self.drive.i),
            d: observed.drive_d.unwrap_or(self.drive.d),
            ff: observed.drive_ff.unwrap_or(self.drive.ff),
        };
        if drive != self.drive {
            info!("drive gains changed: {drive:?}");
            self.drive = drive;
            for module in modules.iter_mut() {
                module.set_drive_gains(drive)?;
            }
        }

        Ok(())
    }
}

impl Default for GainTuner {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::drive::module::SimModule;

    fn sim_modules() -> [SimModule; 4] {
        [SimModule::new(), SimModule::new(), SimModule::new(), SimModule::new()]
    }

    #[test]
    fn test_unchanged_values_write_nothing() {
        let mut tuner = GainTuner::new();
        let mut modules = sim_modules();

        // Observed equals the cache (steer P re-set to its own value)
        let observed = TuningValues {
            steer_p: Some(config::STEER_P),
            ..Default::default()
        };
        for _ in 0..10 {
            tuner.poll(&observed, &mut modules).unwrap();
        }
        for m in &modules {
            assert_eq!(m.steer_gain_writes, 0);
            assert_eq!(m.drive_gain_writes, 0);
        }
    }

    #[test]
    fn test_single_edit_pushes_once_to_all_modules() {
        let mut tuner = GainTuner::new();
        let mut modules = sim_modules();

        let observed = TuningValues {
            steer_p: Some(2.5),
            ..Default::default()
        };
        // Same observation repeated: only the first tick is an edit
        for _ in 0..10 {
            tuner.poll(&observed, &mut modules).unwrap();
        }
        for m in &modules {
            assert_eq!(m.steer_gain_writes, 1);
            assert_eq!(m.drive_gain_writes, 0);
            let gains = m.last_steer_gains.unwrap();
            assert_eq!(gains.p, 2.5);
            assert_eq!(gains.i, config::STEER_I);
            assert_eq!(gains.d, config::STEER_D);
        }
        assert_eq!(tuner.steer().p, 2.5);
    }

    #[test]
    fn test_each_field_compares_against_its_own_cache() {
        // An I-only edit must be detected even when D is untouched
        let mut tuner = GainTuner::new();
        let mut modules = sim_modules();

        let observed = TuningValues {
            steer_i: Some(0.7),
            ..Default::default()
        };
        tuner.poll(&observed, &mut modules).unwrap();
        for m in &modules {
            assert_eq!(m.steer_gain_writes, 1);
            assert_eq!(m.last_steer_gains.unwrap().i, 0.7);
        }
    }

    #[test]
    fn test_drive_ff_edit_pushes_drive_set() {
        let mut tuner = GainTuner::new();
        let mut modules = sim_modules();

        let observed = TuningValues {
            drive_ff: Some(0.3),
            ..Default::default()
        };
        tuner.poll(&observed, &mut modules).unwrap();
        for m in &modules {
            assert_eq!(m.drive_gain_writes, 1);
            assert_eq!(m.steer_gain_writes, 0);
            assert_eq!(m.last_drive_gains.unwrap().ff, 0.3);
        }
    }

    #[test]
    fn test_apply_all_writes_both_axes() {
        let tuner = GainTuner::new();
        let mut modules = sim_modules();
        tuner.apply_all(&mut modules).unwrap();
        for m in &modules {
            assert_eq!(m.steer_gain_writes, 1);
            assert_eq!(m.drive_gain_writes, 1);
        }
    }
}
