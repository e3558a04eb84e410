use std::fs;
use std::path::{Path, PathBuf};

use tracing::debug;

use crate::error::ActuatorError;

/// Lowest duty ratio an actuator accepts, in percent.
pub const DUTY_MIN: f64 = 0.0;
/// Highest duty ratio an actuator accepts, in percent.
pub const DUTY_MAX: f64 = 100.0;

/// Sink for the control output.
pub trait Actuator {
    /// Commands a duty ratio in `[DUTY_MIN, DUTY_MAX]`.
    fn set_duty(&mut self, ratio: f64) -> Result<(), ActuatorError>;

    /// Drives the actuator to its known-safe output. Called once on shutdown.
    fn set_safe_state(&mut self) -> Result<(), ActuatorError>;
}

impl<A: Actuator + ?Sized> Actuator for Box<A> {
    fn set_duty(&mut self, ratio: f64) -> Result<(), ActuatorError> {
        (**self).set_duty(ratio)
    }

    fn set_safe_state(&mut self) -> Result<(), ActuatorError> {
        (**self).set_safe_state()
    }
}

/// Clamps a raw control signal into the actuator's duty range.
///
/// NaN maps to `DUTY_MIN` so a poisoned measurement never reaches hardware.
pub fn clamp_duty(raw: f64) -> f64 {
    if raw.is_nan() {
        DUTY_MIN
    } else {
        raw.clamp(DUTY_MIN, DUTY_MAX)
    }
}

/// hwmon PWM channel, e.g. `/sys/class/hwmon/hwmon2/pwm1`, taking 0..=255.
///
/// The safe state writes `safe_duty` and then hands the channel back to
/// whatever `pwmN_enable` mode it was in before [`SysfsPwmFan::open`].
#[derive(Debug, Clone)]
pub struct SysfsPwmFan {
    path: PathBuf,
    safe_duty: f64,
    previous_mode: Option<(PathBuf, String)>,
}

impl SysfsPwmFan {
    const RAW_MAX: f64 = 255.0;
    const MANUAL_MODE: &'static str = "1";

    /// Opens a PWM channel and switches it to manual control when the
    /// matching `pwmN_enable` file exists.
    pub fn open(path: impl Into<PathBuf>, safe_duty: f64) -> Result<Self, ActuatorError> {
        let path = path.into();
        let enable = enable_path(&path);
        let previous_mode = if enable.exists() {
            let mode = fs::read_to_string(&enable).map_err(|source| ActuatorError::Io {
                path: enable.clone(),
                source,
            })?;
            write_mode(&enable, Self::MANUAL_MODE)?;
            debug!(path = %enable.display(), previous = mode.trim(), "pwm switched to manual mode");
            Some((enable, mode.trim().to_string()))
        } else {
            None
        };
        Ok(Self {
            path,
            safe_duty: clamp_duty(safe_duty),
            previous_mode,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn write_raw(&self, duty: f64) -> Result<(), ActuatorError> {
        let raw = (duty / DUTY_MAX * Self::RAW_MAX).round() as u8;
        fs::write(&self.path, format!("{raw}\n")).map_err(|source| ActuatorError::Io {
            path: self.path.clone(),
            source,
        })
    }
}

impl Actuator for SysfsPwmFan {
    fn set_duty(&mut self, ratio: f64) -> Result<(), ActuatorError> {
        if !(DUTY_MIN..=DUTY_MAX).contains(&ratio) {
            return Err(ActuatorError::Rejected {
                duty: ratio,
                what: "outside 0..=100".to_string(),
            });
        }
        self.write_raw(ratio)
    }

    fn set_safe_state(&mut self) -> Result<(), ActuatorError> {
        self.write_raw(self.safe_duty)?;
        if let Some((enable, mode)) = &self.previous_mode {
            if mode != Self::MANUAL_MODE {
                write_mode(enable, mode)?;
                debug!(path = %enable.display(), mode = mode.as_str(), "pwm mode restored");
            }
        }
        Ok(())
    }
}

fn write_mode(enable: &Path, mode: &str) -> Result<(), ActuatorError> {
    fs::write(enable, format!("{mode}\n")).map_err(|source| ActuatorError::Io {
        path: enable.to_path_buf(),
        source,
    })
}

fn enable_path(pwm: &Path) -> PathBuf {
    let mut name = pwm
        .file_name()
        .map(|name| name.to_os_string())
        .unwrap_or_default();
    name.push("_enable");
    pwm.with_file_name(name)
}
