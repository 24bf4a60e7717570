//! Learned reboot duration.
//!
//! Each confirmed reboot folds its measured duration into an exponential
//! moving average. The value only sizes the progress curve of the next
//! attempt.

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use log::{info, warn};
use serde::{Deserialize, Serialize};
use std::{
    fs,
    io::ErrorKind,
    path::{Path, PathBuf},
    time::Duration,
};

pub const DEFAULT_ESTIMATE_SECS: f64 = 107.0;
pub const MIN_ESTIMATE_SECS: f64 = 30.0;
pub const MAX_ESTIMATE_SECS: f64 = 240.0;
pub const SMOOTHING_FACTOR: f64 = 0.20;

#[derive(Deserialize, Serialize, Debug)]
#[serde(rename_all = "camelCase")]
struct PersistedEstimate {
    reboot_seconds: f64,
    updated_at: Option<DateTime<Utc>>,
}

pub fn clamp_estimate(seconds: f64) -> f64 {
    if seconds.is_nan() {
        return DEFAULT_ESTIMATE_SECS;
    }
    seconds.clamp(MIN_ESTIMATE_SECS, MAX_ESTIMATE_SECS)
}

/// `next = α·measured + (1−α)·previous`, both sides clamped
pub fn next_estimate(previous: f64, measured: f64) -> f64 {
    let measured = clamp_estimate(measured);
    let previous = clamp_estimate(previous);
    clamp_estimate(SMOOTHING_FACTOR * measured + (1.0 - SMOOTHING_FACTOR) * previous)
}

#[derive(Debug)]
pub struct DurationEstimator {
    path: Option<PathBuf>,
    seconds: f64,
}

impl Default for DurationEstimator {
    fn default() -> Self {
        Self {
            path: None,
            seconds: DEFAULT_ESTIMATE_SECS,
        }
    }
}

impl DurationEstimator {
    /// Load the persisted estimate, falling back to the default
    ///
    /// A missing, unreadable or non-positive value is not an error; the
    /// estimator simply starts over from the default.
    pub fn load(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let seconds = match Self::read(&path) {
            Ok(Some(seconds)) if seconds > 0.0 => clamp_estimate(seconds),
            Ok(_) => DEFAULT_ESTIMATE_SECS,
            Err(e) => {
                warn!("ignoring reboot estimate: {e:#}");
                DEFAULT_ESTIMATE_SECS
            }
        };

        Self {
            path: Some(path),
            seconds,
        }
    }

    pub fn seconds(&self) -> f64 {
        self.seconds
    }

    /// Fold a measured reboot duration into the estimate and persist it
    ///
    /// The in-memory value is updated even if persisting fails. The file is
    /// written synchronously; it is a few bytes and only once per confirmed
    /// reboot.
    pub fn record(&mut self, measured: Duration) -> Result<f64> {
        let previous = self.seconds;
        self.seconds = next_estimate(previous, measured.as_secs_f64());

        info!(
            "reboot estimate {previous:.1}s -> {:.1}s (measured {:.1}s)",
            self.seconds,
            measured.as_secs_f64()
        );

        if let Some(path) = &self.path {
            Self::write(path, self.seconds)?;
        }

        Ok(self.seconds)
    }

    fn read(path: &Path) -> Result<Option<f64>> {
        let contents = match fs::read_to_string(path) {
            Ok(contents) => contents,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e).context(format!("failed to read {path:?}")),
        };

        let persisted: PersistedEstimate = serde_json::from_str(&contents)
            .context(format!("failed to deserialize {path:?}"))?;

        Ok(Some(persisted.reboot_seconds))
    }

    fn write(path: &Path, seconds: f64) -> Result<()> {
        if let Some(dir) = path.parent() {
            fs::create_dir_all(dir).context(format!("failed to create {dir:?}"))?;
        }

        let persisted = PersistedEstimate {
            reboot_seconds: seconds,
            updated_at: Some(Utc::now()),
        };

        serde_json::to_writer_pretty(
            fs::File::create(path).context(format!("failed to open {path:?} for write"))?,
            &persisted,
        )
        .context(format!("failed to serialize reboot estimate: {path:?}"))
    }
}
