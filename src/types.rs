use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// State of the reboot workflow
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "camelCase", tag = "state")]
pub enum RebootOperation {
    #[default]
    Idle,
    /// Grace period before any request reaches the router
    #[serde(rename_all = "camelCase")]
    Starting { countdown_remaining: u32 },
    /// Commit phase, no longer cancellable
    Rebooting,
    Failed { message: String },
}

impl RebootOperation {
    pub fn is_busy(&self) -> bool {
        matches!(self, Self::Starting { .. } | Self::Rebooting)
    }

    pub fn label(&self) -> &'static str {
        match self {
            Self::Idle => "Idle",
            Self::Starting { .. } => "Starting",
            Self::Rebooting => "Rebooting",
            Self::Failed { .. } => "Failed",
        }
    }
}

/// Upstream internet reachability
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "camelCase")]
pub enum ConnectivityStatus {
    #[default]
    Online,
    Offline,
}

impl ConnectivityStatus {
    pub fn from_online(online: bool) -> Self {
        if online { Self::Online } else { Self::Offline }
    }

    pub fn label(&self) -> &'static str {
        match self {
            Self::Online => "Online",
            Self::Offline => "Offline",
        }
    }
}

/// Snapshot published to observers of the orchestrator
#[derive(Debug, Clone, Serialize, PartialEq, Default)]
#[serde(rename_all = "camelCase")]
pub struct RebootStatus {
    pub internet_status: ConnectivityStatus,
    pub operation: RebootOperation,
    pub progress_fraction: f64,
    pub progress_started_at: Option<DateTime<Utc>>,
    pub starting_countdown: u32,
    pub last_update_time: Option<DateTime<Utc>>,
    pub last_reboot_time: Option<DateTime<Utc>>,
    pub last_success_time: Option<DateTime<Utc>>,
    pub last_error_message: Option<String>,
    pub estimated_duration_seconds: f64,
}

impl RebootStatus {
    /// Remaining seconds of the current estimate, while progress is running
    pub fn estimated_remaining_seconds(&self, now: DateTime<Utc>) -> Option<u64> {
        let started_at = self.progress_started_at?;
        if self.progress_fraction >= 0.999 {
            return None;
        }

        let elapsed = (now - started_at).num_milliseconds() as f64 / 1000.0;
        Some((self.estimated_duration_seconds - elapsed).max(0.0).ceil() as u64)
    }

    pub(crate) fn touch(&mut self) {
        self.last_update_time = Some(Utc::now());
    }

    pub(crate) fn reset_progress(&mut self) {
        self.progress_fraction = 0.0;
        self.progress_started_at = None;
    }
}
