use std::sync::{Condvar, Mutex, MutexGuard, PoisonError};
use std::time::Instant;

use tracing::debug;

/// Cooperative shutdown flag that can wake a sleeping control thread.
///
/// Requesting shutdown only flips the flag and notifies waiters; the loop
/// thread performs the actual cleanup. Repeated requests are harmless.
#[derive(Debug, Default)]
pub struct ShutdownSignal {
    requested: Mutex<bool>,
    wake: Condvar,
}

impl ShutdownSignal {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn request(&self) {
        let mut requested = self.lock();
        if !*requested {
            *requested = true;
            debug!("shutdown requested");
        }
        self.wake.notify_all();
    }

    pub fn is_requested(&self) -> bool {
        *self.lock()
    }

    /// Sleeps until `deadline` unless shutdown is requested first.
    /// Returns `true` if shutdown was requested.
    pub fn wait_until(&self, deadline: Instant) -> bool {
        let mut requested = self.lock();
        while !*requested {
            let now = Instant::now();
            if now >= deadline {
                return false;
            }
            requested = self
                .wake
                .wait_timeout(requested, deadline - now)
                .map(|(guard, _)| guard)
                .unwrap_or_else(|poisoned| poisoned.into_inner().0);
        }
        true
    }

    fn lock(&self) -> MutexGuard<'_, bool> {
        self.requested.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
