//! Endpoint URL validation
//!
//! Every configured endpoint is validated before use so that configuration
//! mistakes surface as local validation errors instead of transport failures.
//! URLs must:
//! - Parse as absolute URLs
//! - Use the scheme family of their transport (`ws`/`wss` or `http`/`https`)
//! - Have a host
//!
//! Cleartext schemes are accepted but logged when the host is not loopback.

use thiserror::Error;
use tracing::warn;
use url::Url;

/// Errors that can occur during URL validation
#[derive(Debug, Error)]
pub enum UrlValidationError {
    #[error("Invalid URL format: {0}")]
    InvalidFormat(#[from] url::ParseError),

    #[error("URL scheme must be one of {expected}, got: {actual}")]
    UnsupportedScheme {
        expected: &'static str,
        actual: String,
    },

    #[error("URL must have a host")]
    MissingHost,
}

/// Whether the URL points at this machine.
pub fn is_loopback_host(url: &Url) -> bool {
    match url.host() {
        Some(url::Host::Domain(domain)) => domain.eq_ignore_ascii_case("localhost"),
        Some(url::Host::Ipv4(ip)) => ip.is_loopback(),
        Some(url::Host::Ipv6(ip)) => ip.is_loopback(),
        None => false,
    }
}

fn validate_with_schemes(
    url: &str,
    secure: &'static str,
    insecure: &'static str,
    expected: &'static str,
) -> Result<Url, UrlValidationError> {
    let parsed = Url::parse(url.trim())?;

    let scheme = parsed.scheme();
    if scheme != secure && scheme != insecure {
        return Err(UrlValidationError::UnsupportedScheme {
            expected,
            actual: scheme.to_string(),
        });
    }

    if parsed.host_str().is_none_or(str::is_empty) {
        return Err(UrlValidationError::MissingHost);
    }

    if scheme == insecure && !is_loopback_host(&parsed) {
        warn!(url = %parsed, "Endpoint uses an unencrypted scheme");
    }

    Ok(parsed)
}

/// Validates a WebSocket endpoint (`ws://` or `wss://`).
///
/// # Examples
/// ```
/// use character_channel::utils::url_validation::validate_ws_url;
///
/// assert!(validate_ws_url("wss://chat.example.com/ws").is_ok());
/// assert!(validate_ws_url("https://chat.example.com/ws").is_err());
/// ```
pub fn validate_ws_url(url: &str) -> Result<Url, UrlValidationError> {
    validate_with_schemes(url, "wss", "ws", "ws, wss")
}

/// Validates an HTTP endpoint (`http://` or `https://`).
pub fn validate_http_url(url: &str) -> Result<Url, UrlValidationError> {
    validate_with_schemes(url, "https", "http", "http, https")
}

/// Join an API base URL and a path, tolerating a missing or doubled `/`.
pub fn join_endpoint(base: &str, path: &str) -> Result<Url, UrlValidationError> {
    let base = validate_http_url(base)?;
    let mut joined = base.as_str().trim_end_matches('/').to_string();
    joined.push('/');
    joined.push_str(path.trim_start_matches('/'));
    Ok(Url::parse(&joined)?)
}
