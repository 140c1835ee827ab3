use std::time::Duration;

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// Failure detection and escalation thresholds.
///
/// A server is only marked faulty once both `notifications` (distinct
/// report timestamps) and `notification_clients` (distinct reporters)
/// are exceeded inside the `notification_interval` window.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, JsonSchema)]
#[serde(deny_unknown_fields)]
pub struct FailureTracking {
    /// Whether per-group detectors run at all.
    #[serde(default = "FailureTracking::enabled")]
    pub enabled: bool,

    /// Notifications required before escalation.
    #[serde(default = "FailureTracking::notifications")]
    pub notifications: u32,

    /// Distinct reporters required before escalation.
    #[serde(default = "FailureTracking::notification_clients")]
    pub notification_clients: u32,

    /// Sliding window, in seconds.
    #[serde(default = "FailureTracking::notification_interval")]
    pub notification_interval: u64,

    /// Ping period per group, in milliseconds.
    #[serde(default = "FailureTracking::detection_interval")]
    pub detection_interval: u64,

    /// Per-ping timeout, in milliseconds.
    #[serde(default = "FailureTracking::detection_timeout")]
    pub detection_timeout: u64,

    /// Error-log entries older than this are pruned, in seconds.
    #[serde(default = "FailureTracking::prune_time")]
    pub prune_time: u64,
}

impl FailureTracking {
    fn enabled() -> bool {
        true
    }

    fn notifications() -> u32 {
        3
    }

    fn notification_clients() -> u32 {
        1
    }

    fn notification_interval() -> u64 {
        60
    }

    fn detection_interval() -> u64 {
        6_000
    }

    fn detection_timeout() -> u64 {
        1_000
    }

    fn prune_time() -> u64 {
        3_600
    }

    pub fn detection_interval_duration(&self) -> Duration {
        Duration::from_millis(self.detection_interval)
    }

    pub fn detection_timeout_duration(&self) -> Duration {
        Duration::from_millis(self.detection_timeout)
    }

    pub fn notification_window(&self) -> Duration {
        Duration::from_secs(self.notification_interval)
    }

    pub fn prune_window(&self) -> Duration {
        Duration::from_secs(self.prune_time)
    }
}

impl Default for FailureTracking {
    fn default() -> Self {
        Self {
            enabled: Self::enabled(),
            notifications: Self::notifications(),
            notification_clients: Self::notification_clients(),
            notification_interval: Self::notification_interval(),
            detection_interval: Self::detection_interval(),
            detection_timeout: Self::detection_timeout(),
            prune_time: Self::prune_time(),
        }
    }
}
