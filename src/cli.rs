use std::path::PathBuf;

use clap::{Parser, ValueEnum};

use common::{Action, ConfigError, ControllerConfig};

#[derive(Parser, Debug)]
#[command(name = "pid-fan")]
#[command(about = "Holds CPU temperature at a target by driving a PWM fan with a PID loop", long_about = None)]
pub struct Cli {
    /// TOML file with controller settings; flags below override it
    #[arg(long)]
    pub config: Option<PathBuf>,

    /// Target temperature in degrees C
    #[arg(long, allow_negative_numbers = true)]
    pub target: Option<f64>,

    /// Delay, in seconds, between temperature readings
    #[arg(long)]
    pub rate: Option<f64>,

    /// Proportional gain
    #[arg(long, allow_negative_numbers = true)]
    pub kp: Option<f64>,

    /// Integral gain
    #[arg(long, allow_negative_numbers = true)]
    pub ki: Option<f64>,

    /// Derivative gain
    #[arg(long, allow_negative_numbers = true)]
    pub kd: Option<f64>,

    /// Raise the duty ratio while the temperature is above target
    #[arg(long)]
    pub reverse: bool,

    /// Print a status line every N samples
    #[arg(long)]
    pub log_every: Option<u64>,

    /// Which loop runner to use
    #[arg(long, value_enum, default_value_t = Mode::Async)]
    pub mode: Mode,

    /// Drive a simulated CPU and fan instead of hardware
    #[arg(long)]
    pub simulate: bool,

    /// Thermal zone temperature file; the CPU zone is discovered when omitted
    #[arg(long)]
    pub sensor: Option<PathBuf>,

    /// hwmon PWM file driving the fan, e.g. /sys/class/hwmon/hwmon2/pwm1
    #[arg(long, required_unless_present = "simulate")]
    pub pwm: Option<PathBuf>,

    /// Write every tick to this CSV file on exit
    #[arg(long)]
    pub record: Option<PathBuf>,

    /// Log at debug level
    #[arg(short, long)]
    pub verbose: bool,
}

#[derive(ValueEnum, Clone, Copy, Debug, PartialEq, Eq)]
pub enum Mode {
    /// Blocking loop on a dedicated thread
    Threaded,
    /// Tokio task
    Async,
}

impl Cli {
    /// Config file (or defaults) with command-line overrides applied.
    pub fn controller_config(&self) -> Result<ControllerConfig, ConfigError> {
        let mut config = match &self.config {
            Some(path) => ControllerConfig::from_file(path)?,
            None => ControllerConfig::default(),
        };

        if let Some(target) = self.target {
            config.target_temperature = target;
        }
        if let Some(rate) = self.rate {
            config.sample_rate = rate;
        }
        if let Some(kp) = self.kp {
            config.kp = kp;
        }
        if let Some(ki) = self.ki {
            config.ki = ki;
        }
        if let Some(kd) = self.kd {
            config.kd = kd;
        }
        if self.reverse {
            config.action = Action::Reverse;
        }
        if let Some(log_every) = self.log_every {
            config.log_every = log_every;
        }

        config.validate()?;
        Ok(config)
    }
}
