use std::env;
use std::sync::Arc;

use common::{
    ControlLoop, ControllerConfig, ManualClock, PidController, PlantParams, SimulatedPlant,
    TickRecord, TickRecorder,
};
use criterion::{black_box, Criterion};
use tracing::{warn, Level};

/// Half-width of the band around the setpoint that counts as settled, °C.
const SETTLE_BAND: f64 = 1.0;
const DEFAULT_DURATION_SECS: f64 = 600.0;

/// Closed-loop run against the simulated plant. The manual clock is stepped
/// by the sample interval, so no real time passes.
///
/// `sensor_failure_every` of 0 disables failure injection.
fn run_experiment(
    config: &ControllerConfig,
    params: PlantParams,
    duration_secs: f64,
    sensor_failure_every: u64,
) -> TickRecorder {
    let clock = ManualClock::new(0.0);
    let plant = SimulatedPlant::new(params, Arc::new(clock.clone()))
        .with_sensor_failures(sensor_failure_every);
    let recorder = TickRecorder::new();
    let mut control = ControlLoop::new(config, plant.sensor(), plant.fan(), clock.clone())
        .with_recorder(recorder.clone());

    let ticks = (duration_secs / config.sample_rate).ceil() as u64;
    for _ in 0..ticks {
        clock.advance(config.sample_rate);
        if let Err(err) = control.tick() {
            warn!(error = %err, "experiment aborted");
            break;
        }
    }
    if let Err(err) = control.shutdown() {
        warn!(error = %err, "safe state failed");
    }
    recorder
}

fn analyze_results(results: &[TickRecord], name: &str) {
    if results.is_empty() {
        println!("{}: No results to analyze", name);
        return;
    }

    let setpoint = results[0].setpoint;
    let start = results[0].measurement;
    let total = results.len();
    let sensor_failures = results.iter().filter(|r| !r.sensor_ok).count();
    let actuator_failures = results.iter().filter(|r| !r.actuator_ok).count();

    // Overshoot is measured past the setpoint in the direction of travel.
    let direction = if setpoint >= start { 1.0 } else { -1.0 };
    let overshoot = results
        .iter()
        .map(|r| direction * (r.measurement - setpoint))
        .fold(0.0, f64::max);

    let settled_at = results
        .iter()
        .rposition(|r| (r.measurement - setpoint).abs() > SETTLE_BAND)
        .map(|i| results.get(i + 1).map(|r| r.time))
        .unwrap_or(Some(results[0].time));

    let mean_duty = results.iter().map(|r| r.duty).sum::<f64>() / total as f64;
    let saturated = results.iter().filter(|r| r.duty != r.raw_output).count();
    let last = &results[total - 1];

    println!("\n=== {} Step Response ===", name);
    println!("Ticks: {}", total);
    println!("Setpoint: {:.2} °C, start: {:.2} °C", setpoint, start);
    println!("Final: {:.2} °C (error {:+.2})", last.measurement, setpoint - last.measurement);
    println!("Overshoot: {:.2} °C", overshoot);
    match settled_at {
        Some(t) => println!("Settled within ±{:.1} °C at {:.1} s", SETTLE_BAND, t),
        None => println!("Did not settle within ±{:.1} °C", SETTLE_BAND),
    }
    println!("Mean duty: {:.1}% ({} ticks saturated)", mean_duty, saturated);
    println!("Sensor failures: {}, actuator failures: {}", sensor_failures, actuator_failures);
}

/// Optional second positional argument, in simulated seconds.
fn parse_duration(args: &[String]) -> Result<f64, String> {
    let Some(arg) = args.get(2).filter(|arg| !arg.starts_with("--")) else {
        return Ok(DEFAULT_DURATION_SECS);
    };
    match arg.parse::<f64>() {
        Ok(duration) if duration.is_finite() && duration > 0.0 => Ok(duration),
        _ => Err(format!("Invalid duration {:?}: expected a positive number of seconds", arg)),
    }
}

fn benchmark_evaluate(c: &mut Criterion, config: &ControllerConfig) {
    let mut pid = PidController::new(config.gains(), config.target_temperature, 45.0, 0.0);
    let mut time = 0.0;
    c.bench_function("pid_evaluate", |b| {
        b.iter(|| {
            time += config.sample_rate;
            black_box(pid.evaluate(black_box(time), black_box(52.5)));
        });
    });
}

fn benchmark_tick(c: &mut Criterion, config: &ControllerConfig) {
    let clock = ManualClock::new(0.0);
    let plant = SimulatedPlant::new(PlantParams::default(), Arc::new(clock.clone()));
    let mut control = ControlLoop::new(config, plant.sensor(), plant.fan(), clock.clone());
    c.bench_function("control_tick", |b| {
        b.iter(|| {
            clock.advance(config.sample_rate);
            black_box(control.tick().ok());
        });
    });
}

fn main() {
    let args: Vec<String> = env::args().collect();

    if args.len() < 2 {
        eprintln!("Usage: benchmark_runner <config_file> [duration_secs] [--criterion]");
        eprintln!("Example: benchmark_runner configs/fan_default.toml 600");
        eprintln!("Example: benchmark_runner configs/fan_default.toml 600 --criterion");
        std::process::exit(1);
    }

    tracing_subscriber::fmt()
        .with_max_level(Level::WARN)
        .with_target(false)
        .init();

    let config_path = &args[1];
    let duration_secs = match parse_duration(&args) {
        Ok(duration) => duration,
        Err(err) => {
            eprintln!("{}", err);
            std::process::exit(1);
        }
    };
    let use_criterion = args.contains(&"--criterion".to_string());

    let config = match ControllerConfig::from_file(config_path) {
        Ok(config) => config,
        Err(err) => {
            eprintln!("Failed to load config {}: {}", config_path, err);
            std::process::exit(1);
        }
    };

    println!("========================================");
    println!("PID Fan Controller Step Response");
    println!("========================================");
    println!("Config: {}", config_path);
    println!("Gains: kp={} ki={} kd={}", config.kp, config.ki, config.kd);
    println!("Setpoint: {} °C, action: {:?}", config.target_temperature, config.action);
    println!("Duration: {} simulated seconds", duration_secs);
    println!("Sample interval: {} s", config.sample_rate);
    println!("========================================");

    let params = PlantParams::default();
    let clean = run_experiment(&config, params, duration_secs, 0);
    analyze_results(&clean.get_results(), "CLEAN SENSOR");
    match clean.save_to_csv("step_response.csv") {
        Ok(()) => println!("Results saved to step_response.csv"),
        Err(err) => eprintln!("Failed to save CSV: {}", err),
    }

    let flaky = run_experiment(&config, params, duration_secs, 7);
    analyze_results(&flaky.get_results(), "FLAKY SENSOR (every 7th read fails)");

    if use_criterion {
        println!("\nRunning Criterion benchmarks...");
        let mut criterion = Criterion::default()
            .sample_size(50)
            .measurement_time(std::time::Duration::from_secs(5));
        benchmark_evaluate(&mut criterion, &config);
        benchmark_tick(&mut criterion, &config);
        println!("Check the target/criterion directory for detailed HTML reports.");
    }

    println!("\n========================================");
    println!("Benchmark complete!");
    println!("========================================");
}
