use std::time::Instant;

use tracing::{debug, info};

use common::{Actuator, Clock, ControlLoop, ControlResult, DiagnosticsSnapshot, Sensor};

use crate::shutdown::ShutdownSignal;

/// Runs the control loop on the calling thread until `shutdown` is
/// requested or the actuator fails for good.
///
/// Ticks are scheduled on a fixed cadence; a tick that overruns its slot
/// pushes the schedule back rather than firing a burst of catch-up ticks.
/// The actuator is driven to its safe state before this returns, whatever
/// the outcome.
pub fn run_control_thread<S, A, C>(
    mut control: ControlLoop<S, A, C>,
    shutdown: &ShutdownSignal,
) -> ControlResult<DiagnosticsSnapshot>
where
    S: Sensor,
    A: Actuator,
    C: Clock,
{
    let period = control.sample_interval();
    let mut next_tick = Instant::now();

    let outcome = loop {
        if shutdown.is_requested() {
            break Ok(());
        }

        if let Err(err) = control.tick() {
            break Err(err);
        }

        next_tick += period;
        let now = Instant::now();
        if next_tick < now {
            debug!(
                late_ms = (now - next_tick).as_secs_f64() * 1000.0,
                "tick overran the sample interval"
            );
            next_tick = now;
        }

        if shutdown.wait_until(next_tick) {
            break Ok(());
        }
    };

    if outcome.is_ok() {
        info!("shutdown signal received");
    }
    control.finish(outcome)
}
