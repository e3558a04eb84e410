use std::sync::atomic::{AtomicU64, Ordering};

/// Counters shared between the loop and whoever reports on it.
#[derive(Debug, Default)]
pub struct LoopDiagnostics {
    pub ticks: AtomicU64,
    pub sensor_failures: AtomicU64,
    pub actuator_failures: AtomicU64,
    pub skipped_intervals: AtomicU64,
}

/// Point-in-time copy of [`LoopDiagnostics`].
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct DiagnosticsSnapshot {
    pub ticks: u64,
    pub sensor_failures: u64,
    pub actuator_failures: u64,
    pub skipped_intervals: u64,
}

impl LoopDiagnostics {
    pub fn record_tick(&self) {
        self.ticks.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_sensor_failure(&self) {
        self.sensor_failures.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_actuator_failure(&self) {
        self.actuator_failures.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_skipped_interval(&self) {
        self.skipped_intervals.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> DiagnosticsSnapshot {
        DiagnosticsSnapshot {
            ticks: self.ticks.load(Ordering::Relaxed),
            sensor_failures: self.sensor_failures.load(Ordering::Relaxed),
            actuator_failures: self.actuator_failures.load(Ordering::Relaxed),
            skipped_intervals: self.skipped_intervals.load(Ordering::Relaxed),
        }
    }
}
