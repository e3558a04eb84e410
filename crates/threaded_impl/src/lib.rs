//! Blocking control loop on a dedicated thread.

pub mod control_thread;
pub mod shutdown;

pub use control_thread::run_control_thread;
pub use shutdown::ShutdownSignal;
