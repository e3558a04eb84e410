//! Fan control core shared by the threaded and async runners.
//!
//! [`PidController`] is the control law, [`ControlLoop`] wires it to a
//! [`Sensor`], an [`Actuator`] and a [`Clock`] one tick at a time.

pub mod actuator;
pub mod clock;
pub mod config;
pub mod control;
pub mod diagnostics;
pub mod error;
pub mod metrics;
pub mod pid;
pub mod sensor;
pub mod sim;

pub use actuator::{clamp_duty, Actuator, SysfsPwmFan, DUTY_MAX, DUTY_MIN};
pub use clock::{Clock, ManualClock, MonotonicClock};
pub use config::{ControllerConfig, SensorFallback};
pub use control::ControlLoop;
pub use diagnostics::{DiagnosticsSnapshot, LoopDiagnostics};
pub use error::{ActuatorError, ConfigError, ControlError, ControlResult, SensorError};
pub use metrics::{TickRecord, TickRecorder};
pub use pid::{Action, OutputLimits, PidController, PidGains, PidTerms};
pub use sensor::{Sensor, ThermalZoneSensor};
pub use sim::{PlantParams, SimulatedPlant};
