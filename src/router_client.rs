use crate::{
    http_client::{body_head, is_page_status, router_session_client},
    session_token,
};
use log::{debug, info, warn};
#[cfg(any(test, feature = "mock"))]
use mockall::automock;
use regex::Regex;
use reqwest::{Client, Response, Url};
use std::{
    sync::{Mutex, OnceLock},
    time::Duration,
};
use thiserror::Error;
use trait_variant::make;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum RouterError {
    #[error("invalid router host")]
    InvalidHost,
    #[error("failed to extract login session key")]
    LoginTokenNotFound,
    #[error("failed to extract authenticated session key")]
    AuthTokenNotFound,
    #[error("router request failed: {0}")]
    Transport(String),
    #[error("reboot rejected (got login page): {0}")]
    RebootRejected(String),
}

/// HTTP choreography against the router web UI
#[make(Send)]
#[cfg_attr(any(test, feature = "mock"), automock)]
pub trait RouterClient {
    /// Session key served with the unauthenticated login page
    async fn fetch_login_token(&self, host: &str) -> Result<String, RouterError>;
    /// Submit credentials; success here does not mean the login was accepted
    async fn login(
        &self,
        host: &str,
        token: &str,
        username: &str,
        password: &str,
    ) -> Result<(), RouterError>;
    /// Session key only visible once the cookie session is authenticated
    async fn fetch_authenticated_token(&self, host: &str) -> Result<String, RouterError>;
    async fn reboot(&self, host: &str, token: &str) -> Result<(), RouterError>;
    /// Whether the router answers HTTP at all
    async fn probe_reachable(&self, host: &str, timeout: Duration) -> bool;
}

pub struct RouterSessionClient {
    client: Client,
    authenticated_page: Mutex<Option<&'static str>>,
}

impl RouterSessionClient {
    const LOGIN_PAGE: &str = "/";
    const LOGIN_ENDPOINT: &str = "/postlogin.cgi";
    const REBOOT_ENDPOINT: &str = "/rebootinfo.cgi";
    const FALLBACK_TRIGGER: &str = "/reboot.cgi";

    /// Pages reachable after login that embed the authenticated session key
    pub const AUTHENTICATED_PAGES: [&str; 6] = [
        "/securite-pb1-motdepasse.html",
        "/securite.html",
        "/wifi.html",
        "/reseau.html",
        "/telephonie.html",
        "/config.html",
    ];

    const PAGE_TIMEOUT: Duration = Duration::from_secs(8);
    const LOGIN_TIMEOUT: Duration = Duration::from_secs(12);
    const REBOOT_TIMEOUT: Duration = Duration::from_secs(15);
    const TRIGGER_TIMEOUT: Duration = Duration::from_secs(5);

    pub fn new() -> anyhow::Result<Self> {
        Ok(Self {
            client: router_session_client()?,
            authenticated_page: Mutex::new(None),
        })
    }

    /// Page that yielded the authenticated key, used as Referer for the reboot
    fn referer_page(&self) -> &'static str {
        self.authenticated_page
            .lock()
            .ok()
            .and_then(|page| *page)
            .unwrap_or(Self::AUTHENTICATED_PAGES[0])
    }

    fn remember_authenticated_page(&self, page: &'static str) {
        if let Ok(mut current) = self.authenticated_page.lock() {
            *current = Some(page);
        }
    }

    async fn get_page(&self, url: &str, timeout: Duration) -> Result<Response, RouterError> {
        info!("GET {url}");

        self.client
            .get(url)
            .header("Accept", "text/html,*/*;q=0.8")
            .timeout(timeout)
            .send()
            .await
            .map_err(|e| RouterError::Transport(format!("GET {url}: {e}")))
    }

    async fn read_body(res: Response, context_msg: &str) -> Result<String, RouterError> {
        res.text()
            .await
            .map_err(|e| RouterError::Transport(format!("{context_msg}: failed to read body: {e}")))
    }

    /// Fire the trigger endpoints referenced by the reboot page
    ///
    /// Some firmware builds only restart once the page's own script hits
    /// `reboot.cgi`. Nothing here affects the outcome of the reboot call.
    async fn fire_triggers(&self, base: &str, referer: &str, token: &str, body: &str) {
        for url in trigger_urls(base, token, body) {
            debug!("trigger POST {url}");
            if let Err(e) = self
                .client
                .post(&url)
                .header("Origin", base)
                .header("Referer", referer)
                .form(&[("sessionKey", token)])
                .timeout(Self::TRIGGER_TIMEOUT)
                .send()
                .await
            {
                debug!("trigger POST {url} failed: {e}");
            }

            debug!("trigger GET {url}");
            if let Err(e) = self
                .client
                .get(&url)
                .header("Referer", referer)
                .timeout(Self::TRIGGER_TIMEOUT)
                .send()
                .await
            {
                debug!("trigger GET {url} failed: {e}");
            }
        }
    }
}

impl RouterClient for RouterSessionClient {
    async fn fetch_login_token(&self, host: &str) -> Result<String, RouterError> {
        let base = base_url(host)?;
        let url = format!("{base}{}", Self::LOGIN_PAGE);

        let res = self.get_page(&url, Self::PAGE_TIMEOUT).await?;
        let status = res.status();
        if !is_page_status(status) {
            return Err(RouterError::Transport(format!(
                "GET {url} failed with status {status}"
            )));
        }

        let html = Self::read_body(res, &format!("GET {url}")).await?;
        session_token::login_token(&html).ok_or(RouterError::LoginTokenNotFound)
    }

    async fn login(
        &self,
        host: &str,
        token: &str,
        username: &str,
        password: &str,
    ) -> Result<(), RouterError> {
        let base = base_url(host)?;
        let url = format!("{base}{}?sessionKey={token}", Self::LOGIN_ENDPOINT);
        info!("POST {base}{}", Self::LOGIN_ENDPOINT);

        let res = self
            .client
            .post(&url)
            .header("Origin", &base)
            .header("Referer", format!("{base}/"))
            .form(&[
                ("sessionKey", token),
                ("loginUsername", username),
                ("loginPassword", password),
            ])
            .timeout(Self::LOGIN_TIMEOUT)
            .send()
            .await
            .map_err(|e| RouterError::Transport(format!("POST {url}: {e}")))?;

        let status = res.status();
        if !is_page_status(status) {
            return Err(RouterError::Transport(format!(
                "POST {url} failed with status {status}"
            )));
        }

        Ok(())
    }

    async fn fetch_authenticated_token(&self, host: &str) -> Result<String, RouterError> {
        let base = base_url(host)?;

        for page in Self::AUTHENTICATED_PAGES {
            let url = format!("{base}{page}");

            let res = match self.get_page(&url, Self::PAGE_TIMEOUT).await {
                Ok(res) if is_page_status(res.status()) => res,
                Ok(res) => {
                    debug!("skipping {page}: status {}", res.status());
                    continue;
                }
                Err(e) => {
                    debug!("skipping {page}: {e}");
                    continue;
                }
            };

            let final_url = res.url().to_string();
            let html = match Self::read_body(res, &format!("GET {url}")).await {
                Ok(html) => html,
                Err(e) => {
                    debug!("skipping {page}: {e}");
                    continue;
                }
            };

            if let Some(token) = session_token::authenticated_token(&final_url, &html) {
                self.remember_authenticated_page(page);
                return Ok(token);
            }
        }

        Err(RouterError::AuthTokenNotFound)
    }

    async fn reboot(&self, host: &str, token: &str) -> Result<(), RouterError> {
        let base = base_url(host)?;
        let url = format!("{base}{}?sessionKey={token}", Self::REBOOT_ENDPOINT);
        let referer = format!("{base}{}", self.referer_page());
        info!("POST {base}{} (referer {referer})", Self::REBOOT_ENDPOINT);

        let res = self
            .client
            .post(&url)
            .header("Origin", &base)
            .header("Referer", &referer)
            .header(
                "Accept",
                "text/html,application/xhtml+xml,application/xml;q=0.9,*/*;q=0.8",
            )
            .form(&[("sessionKey", token)])
            .timeout(Self::REBOOT_TIMEOUT)
            .send()
            .await
            .map_err(|e| RouterError::Transport(format!("POST {url}: {e}")))?;

        let status = res.status();
        let body = Self::read_body(res, &format!("POST {url}")).await?;

        if is_login_page(&body) {
            return Err(RouterError::RebootRejected(format!(
                "head={}",
                body_head(&body)
            )));
        }

        if !status.is_success() {
            return Err(RouterError::Transport(format!(
                "POST {url} failed with status {status} and body: {}",
                body_head(&body)
            )));
        }

        self.fire_triggers(&base, &referer, token, &body).await;

        Ok(())
    }

    async fn probe_reachable(&self, host: &str, timeout: Duration) -> bool {
        let Ok(base) = base_url(host) else {
            warn!("cannot probe invalid host {host:?}");
            return false;
        };

        self.client
            .get(format!("{base}/"))
            .timeout(timeout)
            .send()
            .await
            .is_ok()
    }
}

/// Normalize a user supplied router host to `host[:port]`
pub fn normalize_host(host: &str) -> Result<String, RouterError> {
    let trimmed = host.trim();
    let without_scheme = trimmed
        .strip_prefix("http://")
        .or_else(|| trimmed.strip_prefix("https://"))
        .unwrap_or(trimmed)
        .trim_matches('/');

    if without_scheme.is_empty()
        || without_scheme.contains('/')
        || without_scheme.chars().any(char::is_whitespace)
    {
        return Err(RouterError::InvalidHost);
    }

    let url =
        Url::parse(&format!("http://{without_scheme}/")).map_err(|_| RouterError::InvalidHost)?;
    if url.host_str().is_none() || !url.username().is_empty() || url.query().is_some() {
        return Err(RouterError::InvalidHost);
    }

    Ok(without_scheme.to_string())
}

fn base_url(host: &str) -> Result<String, RouterError> {
    Ok(format!("http://{}", normalize_host(host)?))
}

/// The firmware answers unauthenticated requests with its login form and 200
fn is_login_page(body: &str) -> bool {
    let lower = body.to_lowercase();
    lower.contains("postlogin.cgi")
        || lower.contains("loginusername")
        || lower.contains("value=\"login\"")
}

/// Follow-up trigger URLs: fragments found in the page plus the fallback
fn trigger_urls(base: &str, token: &str, body: &str) -> Vec<String> {
    static RE: OnceLock<Regex> = OnceLock::new();
    let re = RE.get_or_init(|| {
        Regex::new(r"(?i)(?:https?://[^\s'\x22<>]+?)?[\w./-]*\breboot\.cgi(?:\?[^\s'\x22<>]*)?")
            .expect("invalid trigger pattern")
    });

    let mut urls: Vec<String> = Vec::new();
    let fragments = re
        .find_iter(body)
        .map(|m| m.as_str())
        .chain([RouterSessionClient::FALLBACK_TRIGGER]);

    for fragment in fragments {
        let absolute = if fragment.starts_with("http://") || fragment.starts_with("https://") {
            fragment.to_string()
        } else {
            format!("{base}/{}", fragment.trim_start_matches("./").trim_start_matches('/'))
        };

        let url = if absolute.to_lowercase().contains("sessionkey=") {
            absolute
        } else if absolute.contains('?') {
            format!("{absolute}&sessionKey={token}")
        } else {
            format!("{absolute}?sessionKey={token}")
        };

        if !urls.contains(&url) {
            urls.push(url);
        }
    }

    urls
}

#[cfg(test)]
mod tests {
    use super::*;

    mod normalize_host {
        use super::*;

        #[test]
        fn keeps_plain_address() {
            assert_eq!(normalize_host("192.168.1.1").unwrap(), "192.168.1.1");
        }

        #[test]
        fn strips_scheme_whitespace_and_slashes() {
            assert_eq!(
                normalize_host("  http://192.168.1.1/ ").unwrap(),
                "192.168.1.1"
            );
            assert_eq!(normalize_host("https://router.lan").unwrap(), "router.lan");
        }

        #[test]
        fn keeps_port() {
            assert_eq!(normalize_host("127.0.0.1:8080").unwrap(), "127.0.0.1:8080");
        }

        #[test]
        fn rejects_empty() {
            assert_eq!(normalize_host("   "), Err(RouterError::InvalidHost));
            assert_eq!(normalize_host("http://"), Err(RouterError::InvalidHost));
        }

        #[test]
        fn rejects_paths_and_spaces() {
            assert_eq!(
                normalize_host("192.168.1.1/admin"),
                Err(RouterError::InvalidHost)
            );
            assert_eq!(
                normalize_host("192.168 .1.1"),
                Err(RouterError::InvalidHost)
            );
        }

        #[test]
        fn rejects_credentials_and_queries() {
            assert_eq!(
                normalize_host("admin@192.168.1.1"),
                Err(RouterError::InvalidHost)
            );
            assert_eq!(
                normalize_host("192.168.1.1?x=1"),
                Err(RouterError::InvalidHost)
            );
        }
    }

    mod login_page {
        use super::*;

        #[test]
        fn detects_login_markers() {
            assert!(is_login_page(r#"<form action="/postlogin.cgi">"#));
            assert!(is_login_page(r#"<input name="loginUsername">"#));
            assert!(is_login_page(r#"<input type="submit" value="Login">"#));
        }

        #[test]
        fn accepts_reboot_page() {
            assert!(!is_login_page(
                "<html><body>The router is rebooting, please wait</body></html>"
            ));
        }
    }

    mod trigger_urls {
        use super::*;

        const BASE: &str = "http://192.168.1.1";

        #[test]
        fn fallback_only_without_fragments() {
            assert_eq!(
                trigger_urls(BASE, "42", "<html>rebooting</html>"),
                vec!["http://192.168.1.1/reboot.cgi?sessionKey=42"]
            );
        }

        #[test]
        fn ignores_rebootinfo_endpoint() {
            assert_eq!(
                trigger_urls(BASE, "42", r#"<form action="rebootinfo.cgi">"#),
                vec!["http://192.168.1.1/reboot.cgi?sessionKey=42"]
            );
        }

        #[test]
        fn resolves_relative_fragments_and_keeps_existing_key() {
            let body = r#"<script>location.href='/cgi/reboot.cgi?sessionKey=7';</script>"#;
            assert_eq!(
                trigger_urls(BASE, "42", body),
                vec![
                    "http://192.168.1.1/cgi/reboot.cgi?sessionKey=7",
                    "http://192.168.1.1/reboot.cgi?sessionKey=42",
                ]
            );
        }

        #[test]
        fn appends_key_to_existing_query() {
            let body = r#"<a href="reboot.cgi?action=now">"#;
            assert_eq!(
                trigger_urls(BASE, "42", body),
                vec![
                    "http://192.168.1.1/reboot.cgi?action=now&sessionKey=42",
                    "http://192.168.1.1/reboot.cgi?sessionKey=42",
                ]
            );
        }

        #[test]
        fn deduplicates() {
            let body = r#"reboot.cgi reboot.cgi /reboot.cgi"#;
            assert_eq!(
                trigger_urls(BASE, "42", body),
                vec!["http://192.168.1.1/reboot.cgi?sessionKey=42"]
            );
        }
    }

    mod errors {
        use super::*;

        #[test]
        fn rejected_message_mentions_rejection() {
            let msg = RouterError::RebootRejected("head=<html>".to_string()).to_string();
            assert!(msg.contains("rejected"));
        }
    }
}
