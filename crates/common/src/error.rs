//! Error types for the sensor, actuator and control loop boundaries.

use std::path::PathBuf;

use thiserror::Error;

/// Result type for control loop operations.
pub type ControlResult<T> = Result<T, ControlError>;

/// A temperature reading that could not be produced.
///
/// Always recoverable: the control loop substitutes a fallback measurement.
#[derive(Debug, Error)]
pub enum SensorError {
    #[error("failed to read sensor {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("sensor {path} returned unparsable value {value:?}")]
    Parse { path: PathBuf, value: String },

    #[error("no temperature sensor available: {what}")]
    Unavailable { what: String },
}

/// A duty command the actuator did not accept.
#[derive(Debug, Error)]
pub enum ActuatorError {
    #[error("failed to write actuator {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("actuator rejected duty {duty}: {what}")]
    Rejected { duty: f64, what: String },
}

/// Fatal conditions that end the control loop.
#[derive(Debug, Error)]
pub enum ControlError {
    #[error("actuator failed {consecutive} consecutive writes: {source}")]
    ActuatorFailed {
        consecutive: u32,
        #[source]
        source: ActuatorError,
    },

    #[error("could not drive actuator to its safe state: {0}")]
    SafeState(#[source] ActuatorError),

    #[error("control loop already terminated")]
    Terminated,
}

/// Configuration that could not be loaded or does not make sense.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("invalid config: {what}")]
    Invalid { what: &'static str },
}
