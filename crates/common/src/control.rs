//! One sampling tick of the fan control loop, plus its shutdown path.
//!
//! [`ControlLoop`] owns the controller and its collaborators and knows how to
//! run a single `sample -> evaluate -> actuate` step. Waiting between ticks
//! and noticing shutdown requests is left to the runners in `threaded_impl`
//! and `async_impl`, which share this type.

use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, error, info, warn};

use crate::actuator::{clamp_duty, Actuator};
use crate::clock::Clock;
use crate::config::{ControllerConfig, SensorFallback};
use crate::diagnostics::{DiagnosticsSnapshot, LoopDiagnostics};
use crate::error::{ControlError, ControlResult};
use crate::metrics::{TickRecord, TickRecorder};
use crate::pid::{OutputLimits, PidController};
use crate::sensor::Sensor;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum LoopState {
    Running,
    Terminated,
}

pub struct ControlLoop<S: Sensor, A: Actuator, C: Clock> {
    sensor: S,
    actuator: A,
    clock: C,
    sample_interval: Duration,
    controller: PidController,

    fallback: SensorFallback,
    last_good: Option<f64>,
    log_every: u64,
    max_actuator_failures: u32,
    consecutive_actuator_failures: u32,

    tick: u64,
    state: LoopState,
    diagnostics: Arc<LoopDiagnostics>,
    recorder: Option<TickRecorder>,
}

impl<S: Sensor, A: Actuator, C: Clock> ControlLoop<S, A, C> {
    /// Builds the loop and seeds the controller with a first reading.
    ///
    /// `config` is expected to have passed [`ControllerConfig::validate`].
    pub fn new(config: &ControllerConfig, mut sensor: S, actuator: A, clock: C) -> Self {
        let initial_reading = match sensor.read_temperature() {
            Ok(value) if value.is_finite() => Some(value),
            Ok(value) => {
                warn!(value, "initial temperature is not finite, seeding from fallback");
                None
            }
            Err(err) => {
                warn!(error = %err, "initial temperature read failed, seeding from fallback");
                None
            }
        };

        let diagnostics = Arc::new(LoopDiagnostics::default());
        if initial_reading.is_none() {
            diagnostics.record_sensor_failure();
        }
        let initial = initial_reading.unwrap_or_else(|| {
            fallback_value(config.sensor_fallback, None, config.target_temperature)
        });

        let controller = PidController::new(
            config.gains(),
            config.target_temperature,
            initial,
            clock.now(),
        )
        .with_action(config.action)
        .with_output_limits(OutputLimits::DUTY);

        info!(
            setpoint = config.target_temperature,
            kp = config.kp,
            ki = config.ki,
            kd = config.kd,
            action = ?config.action,
            interval_s = config.sample_rate,
            initial,
            "control loop initialised"
        );

        Self {
            sensor,
            actuator,
            clock,
            sample_interval: config.sample_interval(),
            controller,
            fallback: config.sensor_fallback,
            last_good: initial_reading,
            log_every: config.log_every.max(1),
            max_actuator_failures: config.max_actuator_failures.max(1),
            consecutive_actuator_failures: 0,
            tick: 0,
            state: LoopState::Running,
            diagnostics,
            recorder: None,
        }
    }

    pub fn with_recorder(mut self, recorder: TickRecorder) -> Self {
        self.recorder = Some(recorder);
        self
    }

    pub fn diagnostics(&self) -> Arc<LoopDiagnostics> {
        Arc::clone(&self.diagnostics)
    }

    pub fn sample_interval(&self) -> Duration {
        self.sample_interval
    }

    pub fn controller(&self) -> &PidController {
        &self.controller
    }

    pub fn is_terminated(&self) -> bool {
        self.state == LoopState::Terminated
    }

    /// Runs one `sample -> evaluate -> clamp -> actuate` step.
    ///
    /// Sensor failures never fail the tick. A failed duty write is retried on
    /// the next tick until `max_actuator_failures` consecutive writes have
    /// failed, at which point [`ControlError::ActuatorFailed`] is returned and
    /// the caller is expected to [`shutdown`](Self::shutdown).
    pub fn tick(&mut self) -> ControlResult<TickRecord> {
        if self.is_terminated() {
            return Err(ControlError::Terminated);
        }

        let time = self.clock.now();
        let (measurement, sensor_ok) = self.sample();

        let raw_output = match self.controller.try_evaluate(time, measurement) {
            Some(output) => output,
            None => {
                self.diagnostics.record_skipped_interval();
                debug!(time, "non-positive sample interval, holding previous output");
                self.controller.last_output()
            }
        };
        let duty = clamp_duty(raw_output);

        let write = self.actuator.set_duty(duty);
        let actuator_ok = write.is_ok();

        let record = TickRecord {
            tick: self.tick,
            time,
            measurement,
            sensor_ok,
            setpoint: self.controller.setpoint(),
            raw_output,
            duty,
            actuator_ok,
        };
        if let Some(recorder) = &self.recorder {
            recorder.record(record.clone());
        }
        self.diagnostics.record_tick();

        if let Err(err) = write {
            self.diagnostics.record_actuator_failure();
            self.consecutive_actuator_failures += 1;
            if self.consecutive_actuator_failures >= self.max_actuator_failures {
                error!(
                    error = %err,
                    consecutive = self.consecutive_actuator_failures,
                    "actuator keeps failing, giving up"
                );
                return Err(ControlError::ActuatorFailed {
                    consecutive: self.consecutive_actuator_failures,
                    source: err,
                });
            }
            warn!(
                error = %err,
                consecutive = self.consecutive_actuator_failures,
                "actuator write failed, retrying next tick"
            );
        } else {
            self.consecutive_actuator_failures = 0;
        }

        if self.tick % self.log_every == 0 {
            info!(
                "Current: {:05.2} Target: {:05.2} Duty ratio: {:.2} (want {:.2})",
                measurement,
                self.controller.setpoint(),
                duty,
                raw_output
            );
        }

        self.tick += 1;
        Ok(record)
    }

    /// Drives the actuator to its safe state. Only the first call has any
    /// effect; later calls return `Ok(())` without touching the actuator.
    pub fn shutdown(&mut self) -> ControlResult<()> {
        if self.is_terminated() {
            return Ok(());
        }
        self.state = LoopState::Terminated;
        info!(ticks = self.tick, "shutting down, driving actuator to safe state");
        self.actuator
            .set_safe_state()
            .map_err(ControlError::SafeState)
    }

    /// Shuts down and folds the loop's outcome with the cleanup result.
    ///
    /// A fatal loop error takes precedence over a failed safe-state write,
    /// which is then only logged.
    pub fn finish(&mut self, outcome: ControlResult<()>) -> ControlResult<DiagnosticsSnapshot> {
        let cleanup = self.shutdown();
        match (outcome, cleanup) {
            (Err(err), Err(cleanup_err)) => {
                error!(error = %cleanup_err, "safe state failed after fatal error");
                Err(err)
            }
            (Err(err), Ok(())) => Err(err),
            (Ok(()), Err(cleanup_err)) => Err(cleanup_err),
            (Ok(()), Ok(())) => Ok(self.diagnostics.snapshot()),
        }
    }

    fn sample(&mut self) -> (f64, bool) {
        match self.sensor.read_temperature() {
            Ok(value) if value.is_finite() => {
                self.last_good = Some(value);
                (value, true)
            }
            Ok(value) => {
                self.diagnostics.record_sensor_failure();
                let fallback = self.fallback_measurement();
                warn!(value, fallback, "sensor returned a non-finite temperature, using fallback");
                (fallback, false)
            }
            Err(err) => {
                self.diagnostics.record_sensor_failure();
                let fallback = self.fallback_measurement();
                warn!(error = %err, fallback, "unable to get CPU temperature, using fallback");
                (fallback, false)
            }
        }
    }

    fn fallback_measurement(&self) -> f64 {
        fallback_value(self.fallback, self.last_good, self.controller.setpoint())
    }
}

fn fallback_value(policy: SensorFallback, last_good: Option<f64>, setpoint: f64) -> f64 {
    match policy {
        SensorFallback::LastKnown => last_good.unwrap_or(setpoint),
        SensorFallback::Zero => 0.0,
    }
}

impl<S: Sensor, A: Actuator, C: Clock> Drop for ControlLoop<S, A, C> {
    fn drop(&mut self) {
        if !self.is_terminated() {
            if let Err(err) = self.shutdown() {
                error!(error = %err, "safe state failed while dropping control loop");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::error::{ActuatorError, SensorError};
    use crate::pid::Action;
    use std::collections::VecDeque;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::Mutex;

    struct ScriptedSensor {
        script: VecDeque<Option<f64>>,
        last: f64,
    }

    impl ScriptedSensor {
        fn new(script: &[Option<f64>]) -> Self {
            Self {
                script: script.iter().copied().collect(),
                last: 50.0,
            }
        }
    }

    impl Sensor for ScriptedSensor {
        fn read_temperature(&mut self) -> Result<f64, SensorError> {
            match self.script.pop_front() {
                Some(Some(value)) => {
                    self.last = value;
                    Ok(value)
                }
                Some(None) => Err(SensorError::Unavailable {
                    what: "scripted failure".to_string(),
                }),
                None => Ok(self.last),
            }
        }
    }

    #[derive(Debug, Clone, Copy, PartialEq)]
    enum Call {
        Duty(f64),
        Safe,
    }

    #[derive(Clone, Default)]
    struct RecordingFan {
        calls: Arc<Mutex<Vec<Call>>>,
        failing: Arc<AtomicBool>,
    }

    impl RecordingFan {
        fn calls(&self) -> Vec<Call> {
            self.calls.lock().unwrap().clone()
        }

        fn safe_calls(&self) -> usize {
            self.calls().iter().filter(|call| **call == Call::Safe).count()
        }
    }

    impl Actuator for RecordingFan {
        fn set_duty(&mut self, ratio: f64) -> Result<(), ActuatorError> {
            if self.failing.load(Ordering::SeqCst) {
                return Err(ActuatorError::Rejected {
                    duty: ratio,
                    what: "scripted failure".to_string(),
                });
            }
            self.calls.lock().unwrap().push(Call::Duty(ratio));
            Ok(())
        }

        fn set_safe_state(&mut self) -> Result<(), ActuatorError> {
            self.calls.lock().unwrap().push(Call::Safe);
            Ok(())
        }
    }

    fn p_only(kp: f64) -> ControllerConfig {
        ControllerConfig {
            kp,
            ki: 0.0,
            kd: 0.0,
            ..Default::default()
        }
    }

    fn build(
        config: &ControllerConfig,
        script: &[Option<f64>],
    ) -> (ControlLoop<ScriptedSensor, RecordingFan, ManualClock>, RecordingFan, ManualClock) {
        let fan = RecordingFan::default();
        let clock = ManualClock::new(0.0);
        let control = ControlLoop::new(config, ScriptedSensor::new(script), fan.clone(), clock.clone());
        (control, fan, clock)
    }

    #[test]
    fn large_positive_output_is_clamped_to_full_duty() {
        let (mut control, fan, clock) = build(&p_only(10.0), &[Some(50.0), Some(35.0)]);
        clock.advance(1.0);

        let record = control.tick().unwrap();
        assert!((record.raw_output - 150.0).abs() < 1e-9);
        assert_eq!(record.duty, 100.0);
        assert_eq!(fan.calls(), vec![Call::Duty(100.0)]);
    }

    #[test]
    fn negative_output_is_clamped_to_zero() {
        let (mut control, fan, clock) = build(&p_only(10.0), &[Some(50.0), Some(53.0)]);
        clock.advance(1.0);

        let record = control.tick().unwrap();
        assert!((record.raw_output + 30.0).abs() < 1e-9);
        assert_eq!(fan.calls(), vec![Call::Duty(0.0)]);
    }

    #[test]
    fn reference_scenario_turns_fan_off() {
        let config = ControllerConfig::default();
        let (mut control, fan, clock) = build(&config, &[Some(50.0), Some(55.0)]);
        clock.advance(1.0);

        let record = control.tick().unwrap();
        assert!(record.raw_output < 0.0);
        assert_eq!(fan.calls(), vec![Call::Duty(0.0)]);
        // Anti-windup keeps the accumulator from going below what the
        // fan can act on.
        assert_eq!(control.controller().integral(), 0.0);
    }

    #[test]
    fn reverse_action_spins_fan_up_when_hot() {
        let config = ControllerConfig {
            action: Action::Reverse,
            ..Default::default()
        };
        let (mut control, _fan, clock) = build(&config, &[Some(50.0), Some(55.0)]);
        clock.advance(1.0);

        let record = control.tick().unwrap();
        assert!((record.raw_output - 57.5).abs() < 1e-9);
        assert!((record.duty - 57.5).abs() < 1e-9);
    }

    #[test]
    fn duty_never_leaves_actuator_range() {
        let script: Vec<Option<f64>> = [50.0, -400.0, 900.0, 20.0, 80.0, 50.0, 1e6, -1e6]
            .into_iter()
            .map(Some)
            .collect();
        let config = ControllerConfig {
            kp: 25.0,
            ki: 3.0,
            kd: 4.0,
            ..Default::default()
        };
        let (mut control, fan, clock) = build(&config, &script);
        for _ in 1..script.len() {
            clock.advance(0.5);
            control.tick().unwrap();
        }

        for call in fan.calls() {
            if let Call::Duty(duty) = call {
                assert!((0.0..=100.0).contains(&duty), "duty {duty} out of range");
            }
        }
    }

    #[test]
    fn failed_read_uses_last_known_value_and_keeps_running() {
        let (mut control, _fan, clock) = build(&p_only(1.0), &[Some(48.0), None, Some(47.0)]);

        clock.advance(1.0);
        let failed = control.tick().unwrap();
        assert!(!failed.sensor_ok);
        assert_eq!(failed.measurement, 48.0);

        clock.advance(1.0);
        let recovered = control.tick().unwrap();
        assert!(recovered.sensor_ok);
        assert_eq!(recovered.measurement, 47.0);

        let snapshot = control.diagnostics().snapshot();
        assert_eq!(snapshot.sensor_failures, 1);
        assert_eq!(snapshot.ticks, 2);
    }

    #[test]
    fn zero_fallback_reports_zero_degrees() {
        let config = ControllerConfig {
            sensor_fallback: SensorFallback::Zero,
            ..p_only(1.0)
        };
        let (mut control, _fan, clock) = build(&config, &[Some(48.0), None]);
        clock.advance(1.0);

        assert_eq!(control.tick().unwrap().measurement, 0.0);
    }

    #[test]
    fn non_finite_reading_is_treated_as_failure() {
        let (mut control, _fan, clock) = build(&p_only(1.0), &[Some(48.0), Some(f64::NAN)]);
        clock.advance(1.0);

        let record = control.tick().unwrap();
        assert!(!record.sensor_ok);
        assert_eq!(record.measurement, 48.0);
        assert!(record.raw_output.is_finite());
    }

    #[test]
    fn failed_initial_read_seeds_from_setpoint() {
        let (control, _fan, _clock) = build(&p_only(1.0), &[None]);
        assert_eq!(control.controller().previous_measurement(), 50.0);
        assert_eq!(control.diagnostics().snapshot().sensor_failures, 1);
    }

    #[test]
    fn stalled_clock_holds_previous_output() {
        let (mut control, fan, clock) = build(&p_only(2.0), &[Some(50.0), Some(40.0), Some(10.0)]);
        clock.advance(1.0);
        control.tick().unwrap();

        let held = control.tick().unwrap();
        assert!((held.raw_output - 20.0).abs() < 1e-9);
        assert_eq!(control.diagnostics().snapshot().skipped_intervals, 1);
        assert_eq!(fan.calls(), vec![Call::Duty(20.0), Call::Duty(20.0)]);
    }

    #[test]
    fn shutdown_runs_safe_state_exactly_once() {
        let (mut control, fan, clock) = build(&p_only(1.0), &[Some(45.0)]);
        clock.advance(1.0);
        control.tick().unwrap();

        control.shutdown().unwrap();
        control.shutdown().unwrap();
        assert!(matches!(control.tick(), Err(ControlError::Terminated)));
        drop(control);

        assert_eq!(fan.safe_calls(), 1);
        assert_eq!(fan.calls().last(), Some(&Call::Safe));
    }

    #[test]
    fn dropping_a_running_loop_engages_safe_state() {
        let (mut control, fan, clock) = build(&p_only(1.0), &[Some(45.0)]);
        clock.advance(1.0);
        control.tick().unwrap();
        drop(control);

        assert_eq!(fan.safe_calls(), 1);
    }

    #[test]
    fn single_actuator_failure_is_retried() {
        let (mut control, fan, clock) = build(&p_only(1.0), &[Some(45.0)]);

        fan.failing.store(true, Ordering::SeqCst);
        clock.advance(1.0);
        let record = control.tick().unwrap();
        assert!(!record.actuator_ok);

        fan.failing.store(false, Ordering::SeqCst);
        clock.advance(1.0);
        assert!(control.tick().unwrap().actuator_ok);
        assert_eq!(control.diagnostics().snapshot().actuator_failures, 1);
    }

    #[test]
    fn repeated_actuator_failures_escalate_and_still_attempt_safe_state() {
        let config = ControllerConfig {
            max_actuator_failures: 3,
            ..p_only(1.0)
        };
        let (mut control, fan, clock) = build(&config, &[Some(45.0)]);
        fan.failing.store(true, Ordering::SeqCst);

        let mut outcome = Ok(());
        for _ in 0..3 {
            clock.advance(1.0);
            if let Err(err) = control.tick() {
                outcome = Err(err);
                break;
            }
        }

        assert!(matches!(
            outcome,
            Err(ControlError::ActuatorFailed { consecutive: 3, .. })
        ));
        let result = control.finish(outcome);
        assert!(matches!(result, Err(ControlError::ActuatorFailed { .. })));
        assert_eq!(fan.calls(), vec![Call::Safe]);
    }

    #[test]
    fn recorder_sees_every_tick() {
        let recorder = TickRecorder::new();
        let (control, _fan, clock) = build(&p_only(1.0), &[Some(45.0)]);
        let mut control = control.with_recorder(recorder.clone());

        for _ in 0..4 {
            clock.advance(0.5);
            control.tick().unwrap();
        }
        let ticks: Vec<u64> = recorder.get_results().iter().map(|r| r.tick).collect();
        assert_eq!(ticks, vec![0, 1, 2, 3]);
    }
}
