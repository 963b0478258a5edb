//! Connectivity monitoring for ebb.
//!
//! A single process-wide source of truth for online/offline state, used to
//! gate the sync engine. Raw platform signals are debounced so a flapping
//! link does not thrash consumers.

pub mod monitor;

pub use monitor::{ConnectivityReporter, MonitorConfig, NetworkMonitor};
