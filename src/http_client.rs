use anyhow::{Context, Result};
use reqwest::{Client, StatusCode, redirect::Policy};
use std::time::Duration;

const USER_AGENT: &str = concat!(env!("CARGO_PKG_NAME"), "/", env!("CARGO_PKG_VERSION"));
const MAX_REDIRECTS: usize = 10;

/// Create a cookie-bearing client for talking to the router web UI
///
/// Every client owns a fresh cookie jar, so a session never leaks between
/// two clients. Redirects are followed so the final URL can be inspected for
/// session tokens.
pub fn router_session_client() -> Result<Client> {
    Client::builder()
        .cookie_store(true)
        .user_agent(USER_AGENT)
        .redirect(Policy::limited(MAX_REDIRECTS))
        .build()
        .context("failed to create router HTTP client")
}

/// Create a stateless client for probing an external endpoint
///
/// # Arguments
/// * `timeout` - Upper bound for a whole request including the body
pub fn probe_client(timeout: Duration) -> Result<Client> {
    Client::builder()
        .user_agent(USER_AGENT)
        .timeout(timeout)
        .redirect(Policy::none())
        .build()
        .context("failed to create probe HTTP client")
}

/// Router pages answer with 2xx or a redirect when they are reachable
pub fn is_page_status(status: StatusCode) -> bool {
    status.is_success() || status.is_redirection()
}

/// Prefix of a response body for error messages
pub fn body_head(body: &str) -> String {
    const HEAD_CHARS: usize = 240;
    body.chars().take(HEAD_CHARS).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn page_status_accepts_success_and_redirects() {
        assert!(is_page_status(StatusCode::OK));
        assert!(is_page_status(StatusCode::NO_CONTENT));
        assert!(is_page_status(StatusCode::FOUND));
        assert!(!is_page_status(StatusCode::UNAUTHORIZED));
        assert!(!is_page_status(StatusCode::INTERNAL_SERVER_ERROR));
    }

    #[test]
    fn body_head_truncates_on_char_boundary() {
        let body = "é".repeat(300);
        let head = body_head(&body);
        assert_eq!(head.chars().count(), 240);
    }

    #[test]
    fn body_head_keeps_short_bodies() {
        assert_eq!(body_head("<html>"), "<html>");
    }

    #[test]
    fn clients_can_be_built() {
        assert!(router_session_client().is_ok());
        assert!(probe_client(Duration::from_millis(2500)).is_ok());
    }
}
