//! Time based progress estimate for a running reboot.
//!
//! The router reports nothing while it restarts, so progress is derived from
//! elapsed time against the learned duration estimate. The curve covers 95%
//! over the estimate and then creeps towards 99% until the hard ceiling.
//! Only a confirmed recovery moves it to 100%.

use super::estimate::clamp_estimate;
use std::time::Duration;
use tokio::{
    task::JoinHandle,
    time::{Instant, MissedTickBehavior},
};
use tokio_util::sync::CancellationToken;

pub const PROGRESS_CEILING: f64 = 0.99;
const LINEAR_SHARE: f64 = 0.95;

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct ProgressCurve {
    estimate_secs: f64,
    max_wait_secs: f64,
}

impl ProgressCurve {
    pub fn new(estimate_secs: f64, max_wait: Duration) -> Self {
        Self {
            estimate_secs: clamp_estimate(estimate_secs),
            max_wait_secs: max_wait.as_secs_f64(),
        }
    }

    pub fn fraction(&self, elapsed: Duration) -> f64 {
        let elapsed = elapsed.as_secs_f64();
        let total = self.estimate_secs;

        let fraction = if elapsed <= total {
            (elapsed / total).clamp(0.0, 1.0) * LINEAR_SHARE
        } else {
            let tail = (self.max_wait_secs - total).max(1.0);
            let ratio = ((elapsed - total) / tail).clamp(0.0, 1.0);
            LINEAR_SHARE + ratio * (PROGRESS_CEILING - LINEAR_SHARE)
        };

        fraction.clamp(0.0, PROGRESS_CEILING)
    }
}

/// Recompute the progress fraction every `tick` until `cancel` fires
pub fn spawn_progress_task<F>(
    cancel: CancellationToken,
    tick: Duration,
    started: Instant,
    curve: ProgressCurve,
    publish: F,
) -> JoinHandle<()>
where
    F: Fn(f64) + Send + 'static,
{
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(tick);
        interval.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = interval.tick() => publish(curve.fraction(started.elapsed())),
            }
        }
    })
}
