//! Recovery monitoring after the reboot command was accepted.
//!
//! The router and the WAN are probed in lock step. A reboot only counts as
//! confirmed once both were seen down and back up, with the WAN coming back
//! no earlier than the router.

use super::{reboot::RebootError, run_log::AttemptLog};
use crate::{router_client::RouterClient, services::connectivity::ConnectivityProbe};
use std::{fmt, future::Future, time::Duration};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct MonitorTiming {
    pub poll_interval: Duration,
    pub budget: Duration,
    pub router_probe_timeout: Duration,
}

impl Default for MonitorTiming {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_millis(1500),
            budget: Duration::from_secs(240),
            router_probe_timeout: Duration::from_millis(1200),
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Transition {
    RouterDown,
    RouterUp,
    WanDown,
    WanUp,
}

impl fmt::Display for Transition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::RouterDown => "ROUTER_DOWN",
            Self::RouterUp => "ROUTER_UP",
            Self::WanDown => "WAN_DOWN",
            Self::WanUp => "WAN_UP",
        })
    }
}

/// Milestones observed while monitoring; flags never go back to false
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct MonitorResult {
    pub router_went_down: bool,
    pub router_came_back: bool,
    pub wan_went_down: bool,
    pub wan_came_back: bool,
}

impl MonitorResult {
    /// Fold one probe pair into the result, returning newly set milestones
    pub fn observe(&mut self, router_ok: bool, wan_ok: bool) -> Vec<Transition> {
        let mut transitions = Vec::new();

        if !router_ok && !self.router_went_down {
            self.router_went_down = true;
            transitions.push(Transition::RouterDown);
        }
        if router_ok && self.router_went_down && !self.router_came_back {
            self.router_came_back = true;
            transitions.push(Transition::RouterUp);
        }
        if !wan_ok && !self.wan_went_down {
            self.wan_went_down = true;
            transitions.push(Transition::WanDown);
        }
        if wan_ok && self.wan_went_down && self.router_came_back && !self.wan_came_back {
            self.wan_came_back = true;
            transitions.push(Transition::WanUp);
        }

        transitions
    }

    pub fn is_confirmed(&self) -> bool {
        self.router_went_down && self.router_came_back && self.wan_went_down && self.wan_came_back
    }
}

pub struct RecoveryMonitor<'a, Router, Wan> {
    pub router: &'a Router,
    pub wan: &'a Wan,
    pub host: &'a str,
    pub timing: MonitorTiming,
    pub log: &'a AttemptLog,
    pub debug_mode: bool,
}

impl<Router, Wan> RecoveryMonitor<'_, Router, Wan>
where
    Router: RouterClient,
    Wan: ConnectivityProbe,
{
    /// Probe until recovery is confirmed, the budget runs out or `cancel` fires
    pub async fn run(&self, cancel: &CancellationToken) -> Result<MonitorResult, RebootError> {
        self.log.write("monitoring ping+wan");

        let deadline = Instant::now() + self.timing.budget;
        let mut result = MonitorResult::default();

        for i in 0u32.. {
            let router_ok = checked(
                cancel,
                self.router
                    .probe_reachable(self.host, self.timing.router_probe_timeout),
            )
            .await?;
            let wan_ok = checked(cancel, self.wan.is_online()).await?;

            if self.debug_mode {
                self.log
                    .write(&format!("probe i={i} router={router_ok} wan={wan_ok}"));
            }

            for transition in result.observe(router_ok, wan_ok) {
                self.log.write(&format!("{transition} at i={i}"));
            }

            if result.is_confirmed() {
                self.log.write("DONE (confirmed=true)");
                return Ok(result);
            }

            if Instant::now() + self.timing.poll_interval > deadline {
                break;
            }

            tokio::select! {
                _ = cancel.cancelled() => return Err(RebootError::Cancelled),
                _ = tokio::time::sleep(self.timing.poll_interval) => {}
            }
        }

        self.log.write("DONE (confirmed=false)");
        Err(RebootError::MonitorTimeout)
    }
}

async fn checked<F>(cancel: &CancellationToken, probe: F) -> Result<bool, RebootError>
where
    F: Future<Output = bool>,
{
    if cancel.is_cancelled() {
        return Err(RebootError::Cancelled);
    }

    tokio::select! {
        _ = cancel.cancelled() => Err(RebootError::Cancelled),
        ok = probe => Ok(ok),
    }
}
