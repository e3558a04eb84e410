use std::fs;
use std::path::{Path, PathBuf};

use tracing::debug;

use crate::error::SensorError;

/// Source of the process variable, in degrees Celsius.
pub trait Sensor {
    fn read_temperature(&mut self) -> Result<f64, SensorError>;
}

impl<S: Sensor + ?Sized> Sensor for Box<S> {
    fn read_temperature(&mut self) -> Result<f64, SensorError> {
        (**self).read_temperature()
    }
}

const THERMAL_ROOT: &str = "/sys/class/thermal";

/// Zone types that identify the CPU package on common boards.
const CPU_ZONE_TYPES: [&str; 3] = ["cpu-thermal", "cpu_thermal", "x86_pkg_temp"];

/// Linux thermal zone reporting millidegrees Celsius, e.g.
/// `/sys/class/thermal/thermal_zone0/temp`.
#[derive(Debug, Clone)]
pub struct ThermalZoneSensor {
    path: PathBuf,
}

impl ThermalZoneSensor {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Finds the CPU thermal zone, falling back to `thermal_zone0`.
    pub fn discover() -> Result<Self, SensorError> {
        Self::discover_in(Path::new(THERMAL_ROOT))
    }

    pub fn discover_in(root: &Path) -> Result<Self, SensorError> {
        let entries = fs::read_dir(root).map_err(|source| SensorError::Io {
            path: root.to_path_buf(),
            source,
        })?;

        let mut zones: Vec<PathBuf> = entries
            .filter_map(Result::ok)
            .map(|entry| entry.path())
            .filter(|path| {
                path.file_name()
                    .and_then(|name| name.to_str())
                    .is_some_and(|name| name.starts_with("thermal_zone"))
            })
            .collect();
        zones.sort();

        for zone in &zones {
            let Ok(kind) = fs::read_to_string(zone.join("type")) else {
                continue;
            };
            if CPU_ZONE_TYPES.contains(&kind.trim()) {
                debug!(zone = %zone.display(), kind = kind.trim(), "found cpu thermal zone");
                return Ok(Self::new(zone.join("temp")));
            }
        }

        zones
            .first()
            .map(|zone| Self::new(zone.join("temp")))
            .ok_or_else(|| SensorError::Unavailable {
                what: format!("no thermal zones under {}", root.display()),
            })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Sensor for ThermalZoneSensor {
    fn read_temperature(&mut self) -> Result<f64, SensorError> {
        let raw = fs::read_to_string(&self.path).map_err(|source| SensorError::Io {
            path: self.path.clone(),
            source,
        })?;
        let millidegrees: f64 = raw.trim().parse().map_err(|_| SensorError::Parse {
            path: self.path.clone(),
            value: raw.trim().to_string(),
        })?;
        Ok(millidegrees / 1000.0)
    }
}
