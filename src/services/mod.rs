//! Background services

pub mod session_sweep;

pub use session_sweep::{SessionSweepConfig, SessionSweepHandle, SessionSweepService};
