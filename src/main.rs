mod cli;

use std::error::Error;
use std::io;
use std::sync::Arc;

use clap::Parser;
use tokio::signal;
use tokio::sync::watch;
use tracing::{error, info, Level};

use common::{
    Actuator, ControlLoop, ControlResult, ControllerConfig, DiagnosticsSnapshot, MonotonicClock,
    PlantParams, Sensor, SimulatedPlant, SysfsPwmFan, ThermalZoneSensor, TickRecorder,
};
use threaded_impl::{run_control_thread, ShutdownSignal};

use crate::cli::{Cli, Mode};

type BoxedSensor = Box<dyn Sensor + Send>;
type BoxedActuator = Box<dyn Actuator + Send>;

#[tokio::main]
async fn main() -> Result<(), Box<dyn Error>> {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    // Handlers go in before any hardware is touched so a signal during
    // start-up still ends in the safe state instead of the default action.
    let signals = SignalListener::install()?;
    let shutdown = Arc::new(ShutdownSignal::new());
    let (stop_tx, mut stop_rx) = watch::channel(false);
    let watcher = {
        let shutdown = Arc::clone(&shutdown);
        tokio::spawn(async move {
            signals.recv().await;
            info!("shutdown signal received");
            shutdown.request();
            let _ = stop_tx.send(true);
        })
    };

    let config = cli.controller_config()?;
    let clock = MonotonicClock::new();
    let (sensor, fan) = open_io(&cli, &config, clock)?;

    let recorder = cli.record.as_ref().map(|_| TickRecorder::new());
    let mut control = ControlLoop::new(&config, sensor, fan, clock);
    if let Some(recorder) = &recorder {
        control = control.with_recorder(recorder.clone());
    }

    info!(mode = ?cli.mode, simulate = cli.simulate, "starting fan controller");
    let result = match cli.mode {
        Mode::Async => {
            let stopped = async move {
                let _ = stop_rx.wait_for(|stop| *stop).await;
            };
            async_impl::run_control_task(control, stopped).await
        }
        Mode::Threaded => {
            let loop_signal = Arc::clone(&shutdown);
            tokio::task::spawn_blocking(move || run_control_thread(control, &loop_signal)).await?
        }
    };
    watcher.abort();

    let saved = match (&cli.record, &recorder) {
        (Some(path), Some(recorder)) => recorder.save_to_csv(path).map_err(Into::into),
        _ => Ok(()),
    };
    exit_status(result, saved)
}

/// Reports how the loop ended and whether the recording was written.
///
/// A fatal loop error wins over a failed CSV write; both are logged.
fn exit_status(
    result: ControlResult<DiagnosticsSnapshot>,
    saved: Result<(), Box<dyn Error>>,
) -> Result<(), Box<dyn Error>> {
    let outcome = match result {
        Ok(summary) => {
            info!(
                ticks = summary.ticks,
                sensor_failures = summary.sensor_failures,
                actuator_failures = summary.actuator_failures,
                skipped_intervals = summary.skipped_intervals,
                "fan controller stopped"
            );
            Ok(())
        }
        Err(err) => {
            error!(error = %err, "fan controller stopped on a fatal error");
            Err(err)
        }
    };

    if let Err(err) = &saved {
        error!(error = %err, "failed to save tick recording");
    }
    outcome?;
    saved
}

fn init_tracing(verbose: bool) {
    let level = if verbose { Level::DEBUG } else { Level::INFO };
    tracing_subscriber::fmt()
        .with_max_level(level)
        .with_target(false)
        .init();
}

fn open_io(
    cli: &Cli,
    config: &ControllerConfig,
    clock: MonotonicClock,
) -> Result<(BoxedSensor, BoxedActuator), Box<dyn Error>> {
    if cli.simulate {
        let plant = SimulatedPlant::new(PlantParams::default(), Arc::new(clock));
        return Ok((Box::new(plant.sensor()), Box::new(plant.fan())));
    }

    let sensor = match &cli.sensor {
        Some(path) => ThermalZoneSensor::new(path),
        None => ThermalZoneSensor::discover()?,
    };
    info!(path = %sensor.path().display(), "reading temperature");

    let pwm = cli
        .pwm
        .as_ref()
        .ok_or("--pwm is required unless --simulate is given")?;
    let fan = SysfsPwmFan::open(pwm, config.safe_duty)?;
    info!(path = %fan.path().display(), "driving fan");

    Ok((Box::new(sensor), Box::new(fan)))
}

/// SIGINT and SIGTERM streams, registered with the OS when built.
struct SignalListener {
    #[cfg(unix)]
    interrupt: signal::unix::Signal,
    #[cfg(unix)]
    terminate: signal::unix::Signal,
}

impl SignalListener {
    #[cfg(unix)]
    fn install() -> io::Result<Self> {
        use signal::unix::SignalKind;

        Ok(Self {
            interrupt: signal::unix::signal(SignalKind::interrupt())?,
            terminate: signal::unix::signal(SignalKind::terminate())?,
        })
    }

    #[cfg(not(unix))]
    fn install() -> io::Result<Self> {
        Ok(Self {})
    }

    /// Completes on the first SIGINT or SIGTERM.
    #[cfg(unix)]
    async fn recv(mut self) {
        tokio::select! {
            _ = self.interrupt.recv() => {}
            _ = self.terminate.recv() => {}
        }
    }

    #[cfg(not(unix))]
    async fn recv(self) {
        if let Err(err) = signal::ctrl_c().await {
            tracing::warn!(error = %err, "cannot listen for ctrl-c");
            std::future::pending::<()>().await;
        }
    }
}
