//! Discrete PID control law tolerant of irregular sample intervals.
//!
//! The controller returns the raw, unclamped control signal. Keeping the
//! actuator range out of the output path lets the same law drive actuators
//! with different ranges; the range is only consulted for anti-windup.
//!
//! Two behaviours differ from a textbook minimal PID:
//!
//! - **Anti-windup.** After each accumulation the integral is clamped so that
//!   `ki * integral` stays inside the configured [`OutputLimits`]. Without
//!   this the accumulator keeps growing while the fan is already pinned at
//!   0% or 100%, and the loop overshoots badly once the error changes sign.
//! - **Non-positive intervals.** A sample whose timestamp is not strictly
//!   after the previous one (`dt <= 0`, or NaN) is a no-op: no state changes
//!   and the previous output is returned.
//!
//! The derivative is taken on the measurement rather than the error, so a
//! setpoint change never produces a derivative kick.

use serde::{Deserialize, Serialize};

/// Which way the process responds to the actuator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Action {
    /// Output rises while the measurement is below the setpoint.
    #[default]
    Direct,
    /// Output rises while the measurement is above the setpoint, as a
    /// cooling fan needs with positive gains.
    Reverse,
}

impl Action {
    fn sign(self) -> f64 {
        match self {
            Action::Direct => 1.0,
            Action::Reverse => -1.0,
        }
    }
}

/// Proportional, integral and derivative gains.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PidGains {
    pub kp: f64,
    pub ki: f64,
    pub kd: f64,
}

impl PidGains {
    pub fn new(kp: f64, ki: f64, kd: f64) -> Self {
        Self { kp, ki, kd }
    }
}

/// Contribution of each term to one evaluation.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct PidTerms {
    pub proportional: f64,
    pub integral: f64,
    pub derivative: f64,
}

impl PidTerms {
    pub fn sum(&self) -> f64 {
        self.proportional + self.integral + self.derivative
    }
}

/// Closed output range of the actuator the controller is driving.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct OutputLimits {
    pub min: f64,
    pub max: f64,
}

impl OutputLimits {
    pub const UNBOUNDED: OutputLimits = OutputLimits {
        min: f64::NEG_INFINITY,
        max: f64::INFINITY,
    };

    /// Duty ratio range in percent.
    pub const DUTY: OutputLimits = OutputLimits {
        min: 0.0,
        max: 100.0,
    };

    pub fn clamp(&self, value: f64) -> f64 {
        value.clamp(self.min, self.max)
    }
}

impl Default for OutputLimits {
    fn default() -> Self {
        OutputLimits::UNBOUNDED
    }
}

#[derive(Debug, Clone)]
pub struct PidController {
    gains: PidGains,
    setpoint: f64,
    action: Action,
    limits: OutputLimits,

    integral: f64,
    previous_measurement: f64,
    previous_time: f64,

    last_terms: PidTerms,
    last_output: f64,
}

impl PidController {
    /// Creates a controller seeded with the first measurement, so the first
    /// evaluation sees a zero derivative.
    pub fn new(
        gains: PidGains,
        setpoint: f64,
        initial_measurement: f64,
        initial_time: f64,
    ) -> Self {
        let mut pid = Self {
            gains,
            setpoint,
            action: Action::Direct,
            limits: OutputLimits::UNBOUNDED,
            integral: 0.0,
            previous_measurement: initial_measurement,
            previous_time: initial_time,
            last_terms: PidTerms::default(),
            last_output: 0.0,
        };
        pid.seed_output(initial_measurement);
        pid
    }

    /// Output range used to bound the integral accumulator.
    pub fn with_output_limits(mut self, limits: OutputLimits) -> Self {
        self.limits = limits;
        self.integral = self.clamp_integral(self.integral);
        self
    }

    pub fn with_action(mut self, action: Action) -> Self {
        self.action = action;
        self.seed_output(self.previous_measurement);
        self
    }

    /// Re-seeds the controller as if it had just been constructed.
    pub fn reset(&mut self, measurement: f64, time: f64) {
        self.integral = 0.0;
        self.previous_measurement = measurement;
        self.previous_time = time;
        self.seed_output(measurement);
    }

    /// Evaluates the control law at `time` for `measurement`.
    ///
    /// Returns the previous output untouched when `time` is not strictly
    /// after the last valid evaluation.
    pub fn evaluate(&mut self, time: f64, measurement: f64) -> f64 {
        self.try_evaluate(time, measurement)
            .unwrap_or(self.last_output)
    }

    /// Like [`evaluate`](Self::evaluate) but reports a skipped tick as `None`.
    pub fn try_evaluate(&mut self, time: f64, measurement: f64) -> Option<f64> {
        let dt = time - self.previous_time;
        if dt.is_nan() || dt <= 0.0 {
            return None;
        }

        let sign = self.action.sign();
        let error = sign * (self.setpoint - measurement);

        self.integral = self.clamp_integral(self.integral + error * dt);

        let terms = PidTerms {
            proportional: self.gains.kp * error,
            integral: self.gains.ki * self.integral,
            derivative: -sign * self.gains.kd * (measurement - self.previous_measurement) / dt,
        };

        self.previous_measurement = measurement;
        self.previous_time = time;
        self.last_terms = terms;
        self.last_output = terms.sum();

        Some(self.last_output)
    }

    pub fn gains(&self) -> PidGains {
        self.gains
    }

    pub fn setpoint(&self) -> f64 {
        self.setpoint
    }

    pub fn integral(&self) -> f64 {
        self.integral
    }

    pub fn previous_time(&self) -> f64 {
        self.previous_time
    }

    pub fn previous_measurement(&self) -> f64 {
        self.previous_measurement
    }

    pub fn last_output(&self) -> f64 {
        self.last_output
    }

    pub fn last_terms(&self) -> PidTerms {
        self.last_terms
    }

    // Proportional-only output for a freshly seeded controller.
    fn seed_output(&mut self, measurement: f64) {
        let error = self.action.sign() * (self.setpoint - measurement);
        self.last_terms = PidTerms {
            proportional: self.gains.kp * error,
            integral: self.gains.ki * self.integral,
            derivative: 0.0,
        };
        self.last_output = self.last_terms.sum();
    }

    // Keeps ki * integral inside the output limits. With ki == 0 the
    // accumulator has no effect on the output and is left alone.
    fn clamp_integral(&self, integral: f64) -> f64 {
        let ki = self.gains.ki;
        if ki == 0.0 {
            return integral;
        }
        let a = self.limits.min / ki;
        let b = self.limits.max / ki;
        integral.clamp(a.min(b), a.max(b))
    }
}
