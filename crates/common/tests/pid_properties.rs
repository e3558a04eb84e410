//! Property tests for the PID control law.

use common::{OutputLimits, PidController, PidGains};
use proptest::prelude::*;

fn gain() -> impl Strategy<Value = f64> {
    -50.0..50.0f64
}

fn temperature() -> impl Strategy<Value = f64> {
    -40.0..150.0f64
}

proptest! {
    #[test]
    fn valid_ticks_advance_previous_time(
        kp in gain(), ki in gain(), kd in gain(),
        setpoint in temperature(),
        measurements in prop::collection::vec(temperature(), 1..40),
        steps in prop::collection::vec(0.001..5.0f64, 40),
    ) {
        let mut pid = PidController::new(PidGains::new(kp, ki, kd), setpoint, measurements[0], 0.0);
        let mut time = 0.0;
        for (measurement, step) in measurements.iter().zip(&steps) {
            time += step;
            let before = pid.previous_time();
            let output = pid.evaluate(time, *measurement);
            prop_assert_eq!(pid.previous_time(), time);
            prop_assert!(pid.previous_time() >= before);
            prop_assert!(output.is_finite());
        }
    }

    #[test]
    fn non_positive_interval_leaves_state_alone(
        kp in gain(), ki in gain(), kd in gain(),
        setpoint in temperature(),
        first in temperature(),
        second in temperature(),
        back in 0.0..10.0f64,
    ) {
        let mut pid = PidController::new(PidGains::new(kp, ki, kd), setpoint, first, 0.0);
        let output = pid.evaluate(10.0, first);
        let integral = pid.integral();

        let held = pid.evaluate(10.0 - back, second);

        prop_assert_eq!(held, output);
        prop_assert_eq!(pid.integral(), integral);
        prop_assert_eq!(pid.previous_time(), 10.0);
    }

    #[test]
    fn proportional_only_is_exact(
        kp in gain(),
        setpoint in temperature(),
        initial in temperature(),
        measurement in temperature(),
        dt in 0.001..5.0f64,
    ) {
        let mut pid = PidController::new(PidGains::new(kp, 0.0, 0.0), setpoint, initial, 0.0);
        let output = pid.evaluate(dt, measurement);
        let expected = kp * (setpoint - measurement);
        prop_assert!((output - expected).abs() <= 1e-9 * expected.abs().max(1.0));
    }

    #[test]
    fn constant_error_integrates_linearly(
        ki in 0.01..10.0f64,
        error in -20.0..20.0f64,
        n in 1usize..200,
        dt in 0.01..2.0f64,
    ) {
        let setpoint = 50.0;
        let measurement = setpoint - error;
        let mut pid = PidController::new(PidGains::new(0.0, ki, 0.0), setpoint, measurement, 0.0);

        let mut output = 0.0;
        for k in 1..=n {
            output = pid.evaluate(k as f64 * dt, measurement);
        }

        let expected = n as f64 * error * dt;
        prop_assert!((pid.integral() - expected).abs() <= 1e-6 * expected.abs().max(1.0));
        prop_assert!((output - ki * pid.integral()).abs() <= 1e-9 * output.abs().max(1.0));
    }

    #[test]
    fn zero_error_settles_at_zero(
        kp in gain(), ki in gain(), kd in gain(),
        setpoint in temperature(),
        ticks in 1usize..100,
    ) {
        let mut pid = PidController::new(PidGains::new(kp, ki, kd), setpoint, setpoint, 0.0);
        for k in 1..=ticks {
            let output = pid.evaluate(k as f64, setpoint);
            prop_assert_eq!(output, 0.0);
        }
    }

    #[test]
    fn integral_contribution_respects_output_limits(
        ki in prop_oneof![-10.0..-0.01f64, 0.01..10.0f64],
        measurements in prop::collection::vec(temperature(), 1..100),
    ) {
        let limits = OutputLimits::DUTY;
        let mut pid = PidController::new(PidGains::new(0.0, ki, 0.0), 50.0, measurements[0], 0.0)
            .with_output_limits(limits);
        for (k, measurement) in measurements.iter().enumerate() {
            pid.evaluate((k + 1) as f64, *measurement);
            let contribution = pid.last_terms().integral;
            prop_assert!(contribution >= limits.min - 1e-9);
            prop_assert!(contribution <= limits.max + 1e-9);
        }
    }
}
