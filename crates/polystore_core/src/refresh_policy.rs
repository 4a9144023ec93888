//! When a `Supervisor` re-runs a backend's schema refresh.

use std::time::Duration;

/// Scheduling mode for `Supervisor`'s background refresh loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RefreshPolicy {
    /// Never refresh automatically; only `Supervisor::refresh_now` triggers one.
    Manual,
    /// Refresh every `interval`, starting one `interval` after supervision begins.
    Interval(Duration),
}

impl RefreshPolicy {
    pub fn interval(&self) -> Option<Duration> {
        match self {
            RefreshPolicy::Manual => None,
            RefreshPolicy::Interval(d) => Some(*d),
        }
    }
}

impl Default for RefreshPolicy {
    fn default() -> Self {
        RefreshPolicy::Manual
    }
}
