//! Upstream internet reachability.
//!
//! A "generate 204" endpoint answers with an empty 204 when the internet is
//! reachable. Captive portals and intercepting proxies answer with anything
//! else, so only the exact status counts as online.

use crate::{http_client::probe_client, types::ConnectivityStatus};
use log::{debug, info};
#[cfg(any(test, feature = "mock"))]
use mockall::automock;
use reqwest::{Client, StatusCode};
use std::time::Duration;
use tokio::{task::JoinHandle, time::MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use trait_variant::make;

#[make(Send)]
#[cfg_attr(any(test, feature = "mock"), automock)]
pub trait ConnectivityProbe {
    async fn is_online(&self) -> bool;
}

pub struct HttpConnectivityProbe {
    client: Client,
    url: String,
    expected_status: StatusCode,
}

impl HttpConnectivityProbe {
    pub const DEFAULT_URL: &str = "https://clients3.google.com/generate_204";
    pub const DEFAULT_TIMEOUT: Duration = Duration::from_millis(2500);

    pub fn new(url: impl Into<String>, timeout: Duration) -> anyhow::Result<Self> {
        Ok(Self {
            client: probe_client(timeout)?,
            url: url.into(),
            expected_status: StatusCode::NO_CONTENT,
        })
    }
}

impl ConnectivityProbe for HttpConnectivityProbe {
    async fn is_online(&self) -> bool {
        match self.client.get(&self.url).send().await {
            Ok(res) => res.status() == self.expected_status,
            Err(e) => {
                debug!("connectivity probe failed: {e}");
                false
            }
        }
    }
}

/// Periodic connectivity check reporting only status changes
pub struct ConnectivityMonitor<Probe> {
    probe: Probe,
    interval: Duration,
    last: Option<ConnectivityStatus>,
}

impl<Probe> ConnectivityMonitor<Probe>
where
    Probe: ConnectivityProbe + Send + Sync + 'static,
{
    pub const DEFAULT_INTERVAL: Duration = Duration::from_secs(2);

    pub fn new(probe: Probe, interval: Duration) -> Self {
        Self {
            probe,
            interval,
            last: None,
        }
    }

    /// Record a probe result, returning the status if it differs from the last one
    pub fn record(&mut self, online: bool) -> Option<ConnectivityStatus> {
        let status = ConnectivityStatus::from_online(online);
        if self.last == Some(status) {
            return None;
        }

        self.last = Some(status);
        Some(status)
    }

    /// Probe once and report a change, if any
    pub async fn tick(&mut self) -> Option<ConnectivityStatus> {
        let online = self.probe.is_online().await;
        self.record(online)
    }

    /// Run the monitor until `cancel` fires
    ///
    /// The first probe happens immediately; `on_change` is called for the
    /// first result and afterwards only when the status flips.
    pub fn spawn<F>(mut self, cancel: CancellationToken, on_change: F) -> JoinHandle<()>
    where
        F: Fn(ConnectivityStatus) + Send + 'static,
    {
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(self.interval);
            interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

            loop {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = interval.tick() => {}
                }

                let change = tokio::select! {
                    _ = cancel.cancelled() => break,
                    change = self.tick() => change,
                };

                if let Some(status) = change {
                    info!("internet is {}", status.label().to_lowercase());
                    on_change(status);
                }
            }

            debug!("connectivity monitor stopped");
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{
        Arc, Mutex,
        atomic::{AtomicUsize, Ordering},
    };

    fn sequence_probe(results: Vec<bool>) -> MockConnectivityProbe {
        let calls = Arc::new(AtomicUsize::new(0));
        let mut probe = MockConnectivityProbe::new();
        probe.expect_is_online().returning(move || {
            let i = calls.fetch_add(1, Ordering::SeqCst);
            let online = results.get(i).copied().unwrap_or(*results.last().unwrap());
            Box::pin(async move { online })
        });
        probe
    }

    mod record {
        use super::*;

        #[test]
        fn first_result_is_reported() {
            let mut monitor =
                ConnectivityMonitor::new(MockConnectivityProbe::new(), Duration::from_secs(2));
            assert_eq!(monitor.record(true), Some(ConnectivityStatus::Online));
        }

        #[test]
        fn repeated_status_is_suppressed() {
            let mut monitor =
                ConnectivityMonitor::new(MockConnectivityProbe::new(), Duration::from_secs(2));
            assert_eq!(monitor.record(false), Some(ConnectivityStatus::Offline));
            assert_eq!(monitor.record(false), None);
            assert_eq!(monitor.record(false), None);
            assert_eq!(monitor.record(true), Some(ConnectivityStatus::Online));
            assert_eq!(monitor.record(true), None);
        }
    }

    mod spawn {
        use super::*;

        #[tokio::test(start_paused = true)]
        async fn emits_only_transitions() {
            let probe = sequence_probe(vec![true, true, false, false, true, true]);
            let monitor = ConnectivityMonitor::new(probe, Duration::from_secs(2));
            let seen = Arc::new(Mutex::new(Vec::new()));
            let cancel = CancellationToken::new();

            let sink = seen.clone();
            let handle = monitor.spawn(cancel.clone(), move |status| {
                sink.lock().unwrap().push(status)
            });

            tokio::time::sleep(Duration::from_secs(11)).await;
            cancel.cancel();
            handle.await.unwrap();

            assert_eq!(
                *seen.lock().unwrap(),
                vec![
                    ConnectivityStatus::Online,
                    ConnectivityStatus::Offline,
                    ConnectivityStatus::Online
                ]
            );
        }

        #[tokio::test(start_paused = true)]
        async fn stops_when_cancelled() {
            let probe = sequence_probe(vec![true]);
            let monitor = ConnectivityMonitor::new(probe, Duration::from_secs(2));
            let cancel = CancellationToken::new();

            let handle = monitor.spawn(cancel.clone(), |_| {});
            cancel.cancel();

            assert!(handle.await.is_ok());
        }
    }

    mod http_probe {
        use super::*;
        use tokio::{io::AsyncWriteExt, net::TcpListener};

        async fn serve_status(status_line: &'static str) -> String {
            let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
            let addr = listener.local_addr().unwrap();

            tokio::spawn(async move {
                loop {
                    let Ok((mut stream, _)) = listener.accept().await else {
                        return;
                    };
                    let mut buf = [0u8; 1024];
                    let _ = tokio::io::AsyncReadExt::read(&mut stream, &mut buf).await;
                    let response =
                        format!("HTTP/1.1 {status_line}\r\nContent-Length: 0\r\nConnection: close\r\n\r\n");
                    let _ = stream.write_all(response.as_bytes()).await;
                }
            });

            format!("http://{addr}/generate_204")
        }

        #[tokio::test]
        async fn online_only_on_204() {
            let url = serve_status("204 No Content").await;
            let probe = HttpConnectivityProbe::new(url, Duration::from_secs(2)).unwrap();
            assert!(probe.is_online().await);
        }

        #[tokio::test]
        async fn other_status_is_offline() {
            let url = serve_status("200 OK").await;
            let probe = HttpConnectivityProbe::new(url, Duration::from_secs(2)).unwrap();
            assert!(!probe.is_online().await);
        }

        #[tokio::test]
        async fn unreachable_is_offline() {
            let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
            let addr = listener.local_addr().unwrap();
            drop(listener);

            let probe =
                HttpConnectivityProbe::new(format!("http://{addr}/"), Duration::from_secs(1))
                    .unwrap();
            assert!(!probe.is_online().await);
        }
    }
}
