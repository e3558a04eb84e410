use std::fs;
use std::path::Path;
use std::time::Duration;

use serde::Deserialize;

use crate::actuator::{DUTY_MAX, DUTY_MIN};
use crate::error::ConfigError;
use crate::pid::{Action, PidGains};

/// Measurement substituted for a failed sensor read.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SensorFallback {
    /// Reuse the last good reading; the setpoint before any good reading.
    #[default]
    LastKnown,
    /// Report 0 °C.
    Zero,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ControllerConfig {
    /// Setpoint in degrees Celsius.
    pub target_temperature: f64,
    /// Seconds between samples.
    pub sample_rate: f64,
    pub kp: f64,
    pub ki: f64,
    pub kd: f64,
    pub action: Action,
    /// Emit a status line every this many ticks.
    pub log_every: u64,
    /// Consecutive failed duty writes before the loop gives up.
    pub max_actuator_failures: u32,
    pub sensor_fallback: SensorFallback,
    /// Duty written on shutdown, in percent.
    pub safe_duty: f64,
}

impl Default for ControllerConfig {
    fn default() -> Self {
        Self {
            target_temperature: 50.0,
            sample_rate: 1.0,
            kp: 10.0,
            ki: 1.0,
            kd: 0.5,
            action: Action::Direct,
            log_every: 10,
            max_actuator_failures: 5,
            sensor_fallback: SensorFallback::LastKnown,
            safe_duty: 0.0,
        }
    }
}

impl ControllerConfig {
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let contents = fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let config: ControllerConfig = toml::from_str(&contents)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if !self.target_temperature.is_finite() {
            return Err(ConfigError::Invalid {
                what: "target_temperature must be finite",
            });
        }
        if !(self.sample_rate.is_finite() && self.sample_rate > 0.0) {
            return Err(ConfigError::Invalid {
                what: "sample_rate must be a positive number of seconds",
            });
        }
        if ![self.kp, self.ki, self.kd].iter().all(|gain| gain.is_finite()) {
            return Err(ConfigError::Invalid {
                what: "gains must be finite",
            });
        }
        if self.log_every == 0 {
            return Err(ConfigError::Invalid {
                what: "log_every must be at least 1",
            });
        }
        if self.max_actuator_failures == 0 {
            return Err(ConfigError::Invalid {
                what: "max_actuator_failures must be at least 1",
            });
        }
        if !(DUTY_MIN..=DUTY_MAX).contains(&self.safe_duty) {
            return Err(ConfigError::Invalid {
                what: "safe_duty must be within 0..=100",
            });
        }
        Ok(())
    }

    pub fn gains(&self) -> PidGains {
        PidGains::new(self.kp, self.ki, self.kd)
    }

    pub fn sample_interval(&self) -> Duration {
        Duration::from_secs_f64(self.sample_rate)
    }
}
