use std::path::Path;
use std::sync::{Arc, Mutex};

use serde::Serialize;
use tracing::info;

/// One sampling tick as seen by the control loop.
#[derive(Debug, Serialize, Clone, PartialEq)]
pub struct TickRecord {
    pub tick: u64,
    /// Clock reading in seconds.
    pub time: f64,
    /// Measurement fed to the controller (the fallback when the read failed).
    pub measurement: f64,
    pub sensor_ok: bool,
    pub setpoint: f64,
    /// Unclamped controller output.
    pub raw_output: f64,
    /// Duty actually commanded.
    pub duty: f64,
    pub actuator_ok: bool,
}

/// Shared, append-only tick log.
/// Cloning is cheap and clones write to the same log.
#[derive(Clone, Default)]
pub struct TickRecorder {
    records: Arc<Mutex<Vec<TickRecord>>>,
}

impl TickRecorder {
    pub fn new() -> Self {
        Self {
            records: Arc::new(Mutex::new(Vec::with_capacity(4_096))),
        }
    }

    pub fn record(&self, record: TickRecord) {
        if let Ok(mut data) = self.records.lock() {
            data.push(record);
        }
    }

    pub fn get_results(&self) -> Vec<TickRecord> {
        self.records
            .lock()
            .map(|data| data.clone())
            .unwrap_or_default()
    }

    pub fn len(&self) -> usize {
        self.records.lock().map(|data| data.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn save_to_csv(&self, path: impl AsRef<Path>) -> Result<(), csv::Error> {
        let path = path.as_ref();
        let data = self.get_results();
        let mut wtr = csv::Writer::from_path(path)?;
        for record in &data {
            wtr.serialize(record)?;
        }
        wtr.flush()?;
        info!(records = data.len(), path = %path.display(), "saved tick log");
        Ok(())
    }
}
