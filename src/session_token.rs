//! Session token extraction from router pages.
//!
//! The firmware never hands out its session key through a documented API. It
//! only shows up inside served HTML or in redirect URLs, so every privileged
//! request starts by scraping one of these locations.

use regex::Regex;
use std::sync::OnceLock;

/// Location a session token can be scraped from
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TokenRule {
    /// `var sessionkey = '123'` assigned in an inline script
    PageVariable,
    /// `?sessionKey=123` on the final URL after redirects
    UrlParameter,
    /// `<input type="hidden" name="sessionKey" value="123">`
    HiddenField,
}

impl TokenRule {
    /// Apply this rule to `text` and return the captured digits.
    pub fn extract(self, text: &str) -> Option<String> {
        match self {
            Self::PageVariable => first_capture(page_variable_regex(), text),
            Self::UrlParameter => first_capture(url_parameter_regex(), text),
            Self::HiddenField => hidden_field_regexes()
                .iter()
                .find_map(|re| first_capture(re, text)),
        }
    }
}

/// Token embedded in the login page (rule a only).
pub fn login_token(html: &str) -> Option<String> {
    TokenRule::PageVariable.extract(html)
}

/// Token found on an authenticated page.
///
/// Tries the page variable in the body, then the query parameter on the
/// final URL, then a hidden form field. Menus on some builds only carry the
/// key inside navigation links, so a query parameter anywhere in the body is
/// the last resort.
pub fn authenticated_token(final_url: &str, html: &str) -> Option<String> {
    TokenRule::PageVariable
        .extract(html)
        .or_else(|| TokenRule::UrlParameter.extract(final_url))
        .or_else(|| TokenRule::HiddenField.extract(html))
        .or_else(|| TokenRule::UrlParameter.extract(html))
}

fn first_capture(re: &Regex, text: &str) -> Option<String> {
    re.captures(text)
        .and_then(|caps| caps.get(1))
        .map(|m| m.as_str().to_string())
}

fn page_variable_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r#"(?i)\bsessionkey\s*=\s*['"]([0-9]+)['"]"#)
            .expect("invalid page variable pattern")
    })
}

fn url_parameter_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"(?i)[?&]sessionkey=([0-9]+)(?:[&#'\x22\s]|$)")
            .expect("invalid url parameter pattern")
    })
}

fn hidden_field_regexes() -> &'static [Regex; 2] {
    static RE: OnceLock<[Regex; 2]> = OnceLock::new();
    RE.get_or_init(|| {
        [
            Regex::new(r#"(?i)name\s*=\s*['"]sessionkey['"][^>]*?value\s*=\s*['"]?([0-9]+)['"\s/>]"#)
                .expect("invalid hidden field pattern"),
            Regex::new(r#"(?i)value\s*=\s*['"]?([0-9]+)['"\s/>][^>]*?name\s*=\s*['"]sessionkey['"]"#)
                .expect("invalid hidden field pattern"),
        ]
    })
}
