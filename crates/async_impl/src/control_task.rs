use std::future::Future;

use tokio::time::{sleep_until, Instant};
use tracing::{debug, info};

use common::{Actuator, Clock, ControlLoop, ControlResult, DiagnosticsSnapshot, Sensor};

/// Runs the control loop as a Tokio task until `shutdown` completes or the
/// actuator fails for good.
///
/// `shutdown` is polled alongside the inter-tick sleep, so it takes effect
/// without waiting out the sample interval. Sensor and actuator calls are
/// short blocking sysfs accesses and run inline on the task. The actuator
/// is driven to its safe state before this returns, whatever the outcome.
pub async fn run_control_task<S, A, C, F>(
    mut control: ControlLoop<S, A, C>,
    shutdown: F,
) -> ControlResult<DiagnosticsSnapshot>
where
    S: Sensor,
    A: Actuator,
    C: Clock,
    F: Future<Output = ()>,
{
    let period = control.sample_interval();
    let mut next_tick = Instant::now();
    tokio::pin!(shutdown);

    let outcome = loop {
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

        tokio::select! {
            biased;
            _ = &mut shutdown => {
                info!("shutdown signal received");
                break Ok(());
            }
            _ = sleep_until(next_tick) => {}
        }
    };

    control.finish(outcome)
}
