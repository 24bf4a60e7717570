//! Reboot workflow.
//!
//! `Idle/Failed -> Starting -> Rebooting -> Idle/Failed`. The grace period
//! can be cancelled by the user; once the first request reaches the router
//! the attempt runs to completion. All observable state lives in a single
//! watch channel and every task write re-checks the attempt's cancellation
//! token under the channel lock, so nothing from an abandoned attempt can
//! overwrite state after a reset.

use super::{
    connectivity::ConnectivityProbe,
    estimate::DurationEstimator,
    monitor::{MonitorTiming, RecoveryMonitor},
    notification::Notifier,
    progress::{PROGRESS_CEILING, ProgressCurve, spawn_progress_task},
    run_log::{AttemptLog, RunLog},
};
use crate::{
    config::RouterConfig,
    router_client::{RouterClient, RouterError},
    types::{ConnectivityStatus, RebootOperation, RebootStatus},
};
use chrono::{DateTime, Utc};
use log::{debug, error, info};
use std::{
    sync::{Arc, Mutex, MutexGuard, PoisonError},
    time::Duration,
};
use thiserror::Error;
use tokio::{sync::watch, task::JoinHandle, time::Instant};
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

const RECOVERED_TITLE: &str = "Internet is back";
const FAILED_TITLE: &str = "Router reboot failed";

#[derive(Debug, Error)]
pub enum RebootError {
    #[error(transparent)]
    Router(#[from] RouterError),
    #[error("timeout waiting for router/WAN to return")]
    MonitorTimeout,
    #[error("reboot cancelled")]
    Cancelled,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RebootTiming {
    pub grace_seconds: u32,
    pub progress_tick: Duration,
    pub success_reset_delay: Duration,
    pub monitor: MonitorTiming,
}

impl Default for RebootTiming {
    fn default() -> Self {
        Self {
            grace_seconds: 5,
            progress_tick: Duration::from_millis(250),
            success_reset_delay: Duration::from_secs(5),
            monitor: MonitorTiming::default(),
        }
    }
}

struct Workflow {
    cancel: CancellationToken,
    log: AttemptLog,
    handle: JoinHandle<()>,
}

struct Inner<Router, Wan> {
    router: Router,
    wan: Wan,
    settings: RouterConfig,
    timing: RebootTiming,
    estimator: Mutex<DurationEstimator>,
    notifier: Arc<dyn Notifier + Send + Sync>,
    run_log: RunLog,
    status: watch::Sender<RebootStatus>,
    workflow: Mutex<Option<Workflow>>,
}

pub struct RebootOrchestrator<Router, Wan> {
    inner: Arc<Inner<Router, Wan>>,
}

impl<Router, Wan> Clone for RebootOrchestrator<Router, Wan> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<Router, Wan> RebootOrchestrator<Router, Wan>
where
    Router: RouterClient + Send + Sync + 'static,
    Wan: ConnectivityProbe + Send + Sync + 'static,
{
    pub fn new(
        router: Router,
        wan: Wan,
        settings: RouterConfig,
        estimator: DurationEstimator,
        notifier: Arc<dyn Notifier + Send + Sync>,
        run_log: RunLog,
        timing: RebootTiming,
    ) -> Self {
        let status = RebootStatus {
            estimated_duration_seconds: estimator.seconds(),
            ..Default::default()
        };

        Self {
            inner: Arc::new(Inner {
                router,
                wan,
                settings,
                timing,
                estimator: Mutex::new(estimator),
                notifier,
                run_log,
                status: watch::Sender::new(status),
                workflow: Mutex::new(None),
            }),
        }
    }

    pub fn settings(&self) -> &RouterConfig {
        &self.inner.settings
    }

    pub fn subscribe(&self) -> watch::Receiver<RebootStatus> {
        self.inner.status.subscribe()
    }

    pub fn status(&self) -> RebootStatus {
        self.inner.status.borrow().clone()
    }

    pub fn set_internet_status(&self, internet: ConnectivityStatus) {
        self.inner.status.send_if_modified(|status| {
            if status.internet_status == internet {
                return false;
            }
            status.internet_status = internet;
            status.touch();
            true
        });
    }

    /// Start a reboot attempt unless one is already running
    ///
    /// Returns whether the request was accepted.
    pub fn request_reboot(&self, debug_mode: bool) -> bool {
        let mut workflow = self.inner.lock_workflow();
        let grace = self.inner.timing.grace_seconds;
        let estimate = self.inner.estimate_seconds();

        let accepted = self.inner.status.send_if_modified(|status| {
            if status.operation.is_busy() {
                return false;
            }
            status.operation = RebootOperation::Starting {
                countdown_remaining: grace,
            };
            status.starting_countdown = grace;
            status.last_error_message = None;
            status.estimated_duration_seconds = estimate;
            status.reset_progress();
            status.touch();
            true
        });

        if !accepted {
            debug!("reboot request ignored: attempt already running");
            return false;
        }

        if let Some(previous) = workflow.take() {
            previous.cancel.cancel();
        }

        let id = Uuid::new_v4().simple().to_string();
        let log = self.inner.run_log.attempt(&id[..8]);
        let cancel = CancellationToken::new();
        let handle = tokio::spawn(Arc::clone(&self.inner).run(
            cancel.clone(),
            log.clone(),
            debug_mode,
        ));

        *workflow = Some(Workflow {
            cancel,
            log,
            handle,
        });

        true
    }

    /// Cancel the attempt while it is still in its grace period
    ///
    /// Returns whether anything was cancelled. Once the router has been
    /// contacted the attempt can no longer be cancelled.
    pub fn cancel(&self) -> bool {
        let workflow = self.inner.lock_workflow();
        let Some(current) = workflow.as_ref() else {
            return false;
        };

        let cancelled = self.inner.status.send_if_modified(|status| {
            if !matches!(status.operation, RebootOperation::Starting { .. }) {
                return false;
            }
            current.cancel.cancel();
            reset_to_idle(status);
            true
        });

        if cancelled {
            current.log.write("CANCEL requested by user");
        } else {
            debug!("cancel ignored: no attempt in grace period");
        }

        cancelled
    }

    /// Abort any running attempt and return to idle
    pub async fn shutdown(&self) {
        let Some(workflow) = self.inner.lock_workflow().take() else {
            return;
        };

        workflow.cancel.cancel();

        let was_busy = self.inner.status.send_if_modified(|status| {
            if !status.operation.is_busy() {
                return false;
            }
            reset_to_idle(status);
            true
        });

        if was_busy {
            workflow.log.write("CANCELLED (shutdown)");
        }

        workflow.handle.abort();
        match workflow.handle.await {
            Err(e) if !e.is_cancelled() => error!("reboot workflow failed: {e}"),
            _ => {}
        }
    }

    /// Plain text summary for support requests
    pub fn diagnostics(&self) -> String {
        let status = self.status();
        let settings = &self.inner.settings;

        let mut lines = vec![
            format!("{} {}", env!("CARGO_PKG_NAME"), env!("CARGO_PKG_VERSION")),
            format!("router host: {}", settings.host),
            format!("router user: {}", settings.username),
            format!(
                "ask confirm before reboot: {}",
                settings.ask_confirm_before_reboot
            ),
            format!("notify on recovery: {}", settings.notify_on_recovery),
            format!("internet: {}", status.internet_status.label()),
            format!("operation: {}", status.operation.label()),
            format!("progress: {:.0}%", status.progress_fraction * 100.0),
            format!(
                "estimated duration: {:.1}s",
                status.estimated_duration_seconds
            ),
        ];

        if let Some(remaining) = status.estimated_remaining_seconds(Utc::now()) {
            lines.push(format!("estimated remaining: {remaining}s"));
        }

        lines.push(format!("last reboot: {}", format_time(status.last_reboot_time)));
        lines.push(format!(
            "last success: {}",
            format_time(status.last_success_time)
        ));
        lines.push(format!(
            "last error: {}",
            status.last_error_message.as_deref().unwrap_or("-")
        ));
        lines.push(format!(
            "run log: {}",
            self.inner
                .run_log
                .path()
                .map_or_else(|| "disabled".to_string(), |p| p.display().to_string())
        ));

        lines.join("\n")
    }
}

impl<Router, Wan> Inner<Router, Wan>
where
    Router: RouterClient + Send + Sync + 'static,
    Wan: ConnectivityProbe + Send + Sync + 'static,
{
    fn lock_workflow(&self) -> MutexGuard<'_, Option<Workflow>> {
        self.workflow.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn estimate_seconds(&self) -> f64 {
        self.estimator
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .seconds()
    }

    /// Apply `f` unless the attempt owning `cancel` has been abandoned
    fn update<F>(&self, cancel: &CancellationToken, f: F) -> bool
    where
        F: FnOnce(&mut RebootStatus),
    {
        self.status.send_if_modified(|status| {
            if cancel.is_cancelled() {
                return false;
            }
            f(status);
            status.touch();
            true
        })
    }

    fn publish_progress(&self, cancel: &CancellationToken, fraction: f64) {
        self.status.send_if_modified(|status| {
            let fraction = fraction.min(PROGRESS_CEILING);
            if cancel.is_cancelled()
                || status.operation != RebootOperation::Rebooting
                || fraction <= status.progress_fraction
            {
                return false;
            }
            status.progress_fraction = fraction;
            status.touch();
            true
        });
    }

    async fn run(self: Arc<Self>, cancel: CancellationToken, log: AttemptLog, debug_mode: bool) {
        log.write(&format!("START (debug={debug_mode})"));

        match self.attempt(&cancel, &log, debug_mode).await {
            Ok(()) => {}
            Err(RebootError::Cancelled) => {
                info!("reboot attempt {} cancelled", log.id());
                log.write("CANCELLED");
            }
            Err(e) => self.fail(&cancel, &log, e),
        }
    }

    async fn attempt(
        self: &Arc<Self>,
        cancel: &CancellationToken,
        log: &AttemptLog,
        debug_mode: bool,
    ) -> Result<(), RebootError> {
        self.grace_period(cancel).await?;

        let committed = self.update(cancel, |status| {
            status.operation = RebootOperation::Rebooting;
            status.starting_countdown = 0;
            status.reset_progress();
        });
        if !committed {
            return Err(RebootError::Cancelled);
        }

        let host = self.settings.host.as_str();

        log.write("GET / (login page)");
        let login_token = self.router.fetch_login_token(host).await?;
        log.write(&format!("loginKey={login_token}"));

        log.write("POST postlogin.cgi");
        self.router
            .login(
                host,
                &login_token,
                &self.settings.username,
                &self.settings.password,
            )
            .await?;

        log.write("GET authenticated pages (auth key)");
        let auth_token = self.router.fetch_authenticated_token(host).await?;
        log.write(&format!("authKey={auth_token}"));

        log.write("POST rebootinfo.cgi");
        self.router.reboot(host, &auth_token).await?;

        let submitted = Instant::now();
        let estimate = self.estimate_seconds();
        self.update(cancel, |status| {
            status.progress_fraction = 0.0;
            status.progress_started_at = Some(Utc::now());
            status.estimated_duration_seconds = estimate;
        });

        let progress_cancel = cancel.child_token();
        let progress = {
            let inner = Arc::clone(self);
            let token = progress_cancel.clone();
            spawn_progress_task(
                progress_cancel.clone(),
                self.timing.progress_tick,
                submitted,
                ProgressCurve::new(estimate, self.timing.monitor.budget),
                move |fraction| inner.publish_progress(&token, fraction),
            )
        };

        let monitor = RecoveryMonitor {
            router: &self.router,
            wan: &self.wan,
            host,
            timing: self.timing.monitor,
            log,
            debug_mode,
        };
        let outcome = monitor.run(cancel).await;

        progress_cancel.cancel();
        if let Err(e) = progress.await {
            error!("progress task failed: {e}");
        }

        outcome?;
        self.succeed(cancel, log, submitted.elapsed())
    }

    async fn grace_period(&self, cancel: &CancellationToken) -> Result<(), RebootError> {
        for remaining in (0..self.timing.grace_seconds).rev() {
            tokio::select! {
                _ = cancel.cancelled() => return Err(RebootError::Cancelled),
                _ = tokio::time::sleep(Duration::from_secs(1)) => {}
            }

            let ticked = self.update(cancel, |status| {
                status.operation = RebootOperation::Starting {
                    countdown_remaining: remaining,
                };
                status.starting_countdown = remaining;
            });
            if !ticked {
                return Err(RebootError::Cancelled);
            }
        }

        Ok(())
    }

    fn succeed(
        self: &Arc<Self>,
        cancel: &CancellationToken,
        log: &AttemptLog,
        measured: Duration,
    ) -> Result<(), RebootError> {
        let estimate = {
            let mut estimator = self.estimator.lock().unwrap_or_else(PoisonError::into_inner);
            match estimator.record(measured) {
                Ok(estimate) => estimate,
                Err(e) => {
                    error!("failed to persist reboot estimate: {e:#}");
                    estimator.seconds()
                }
            }
        };

        let now = Utc::now();
        let recovered = self.update(cancel, |status| {
            status.operation = RebootOperation::Idle;
            status.progress_fraction = 1.0;
            status.progress_started_at = None;
            status.last_reboot_time = Some(now);
            status.last_success_time = Some(now);
            status.last_error_message = None;
            status.estimated_duration_seconds = estimate;
        });
        if !recovered {
            return Err(RebootError::Cancelled);
        }

        log.write(&format!(
            "recovered after {:.1}s, next estimate {estimate:.1}s",
            measured.as_secs_f64()
        ));
        self.schedule_progress_reset();

        if self.settings.notify_on_recovery {
            self.notifier.notify(
                RECOVERED_TITLE,
                &format!(
                    "Router and WAN are back after {:.0}s.",
                    measured.as_secs_f64()
                ),
            );
        }

        Ok(())
    }

    fn fail(&self, cancel: &CancellationToken, log: &AttemptLog, e: RebootError) {
        let message = e.to_string();
        log.write(&format!("ERROR: {message}"));

        let failed = self.update(cancel, |status| {
            status.operation = RebootOperation::Failed {
                message: message.clone(),
            };
            status.starting_countdown = 0;
            status.last_error_message = Some(message.clone());
            status.reset_progress();
        });

        if failed {
            self.notifier.notify(FAILED_TITLE, &message);
        }
    }

    /// Drop the full progress bar again once nobody started a new attempt
    fn schedule_progress_reset(self: &Arc<Self>) {
        let inner = Arc::downgrade(self);
        let delay = self.timing.success_reset_delay;

        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            let Some(inner) = inner.upgrade() else {
                return;
            };
            inner.status.send_if_modified(|status| {
                if status.operation != RebootOperation::Idle || status.progress_fraction < 1.0 {
                    return false;
                }
                status.reset_progress();
                status.touch();
                true
            });
        });
    }
}

fn reset_to_idle(status: &mut RebootStatus) {
    status.operation = RebootOperation::Idle;
    status.starting_countdown = 0;
    status.last_error_message = None;
    status.reset_progress();
    status.touch();
}

fn format_time(time: Option<DateTime<Utc>>) -> String {
    time.map_or_else(|| "-".to_string(), |t| t.to_rfc3339())
}
