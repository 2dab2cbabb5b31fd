pub mod fingerprint;
pub mod region_monitor;
pub mod state;

pub use region_monitor::{RegionMonitor, RunReport, StopReason};
