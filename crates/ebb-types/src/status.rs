use std::fmt;

use serde::{Deserialize, Serialize};

/// Queue lifecycle state of a mutation event.
///
/// `Pending → InFlight → Synced` on the happy path; `InFlight → Pending`
/// on transient failure (attempts incremented); `InFlight → Failed` on
/// permanent rejection or retry exhaustion. `Synced` events are purged
/// from the store, `Failed` events are retained until the user resolves
/// them.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EventStatus {
    Pending,
    InFlight,
    Synced,
    Failed,
}

impl EventStatus {
    /// Terminal states are never left once entered.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Synced | Self::Failed)
    }
}

impl fmt::Display for EventStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Pending => "pending",
            Self::InFlight => "in-flight",
            Self::Synced => "synced",
            Self::Failed => "failed",
        };
        write!(f, "{s}")
    }
}

/// Event counts by live status, as reported by a store.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct StoreCounts {
    pub pending: usize,
    pub in_flight: usize,
    pub failed: usize,
}

/// Process-wide, read-only sync snapshot for UI consumption.
///
/// Recomputed whenever the store or the network monitor changes.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncStatus {
    /// Current debounced connectivity.
    pub is_online: bool,
    /// Events waiting for delivery (pending + in-flight).
    pub pending_count: usize,
    /// Events permanently failed and awaiting user action.
    pub failed_count: usize,
    /// A drain pass is currently running.
    pub is_syncing: bool,
    /// The durable store reported an error; the queue may be incomplete.
    pub degraded: bool,
}
