//! HTTP adapter for the platform gateway.
//!
//! Two surfaces live here: [`HttpDispatchGateway`] implements the synchronous
//! dispatch API (trip creation, cancellation, health probe), and
//! [`HttpChannelConnector`] implements the push channel as a long-lived
//! line-delimited event stream with frame posts in the other direction.
//! Everything above this crate talks traits; nothing above it sees reqwest.

use std::time::Duration;

mod channel;
mod dispatch;

pub use channel::HttpChannelConnector;
pub use dispatch::HttpDispatchGateway;

pub const ENV_RIDELINK_GATEWAY_URL: &str = "RIDELINK_GATEWAY_URL";

const DEFAULT_GATEWAY_BASE_URL: &str = "http://127.0.0.1:8350";
const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GatewayConfig {
    pub base_url: String,
    /// Applies to request/response calls only; the event stream is
    /// long-lived and runs without a deadline.
    pub request_timeout: Duration,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            base_url: std::env::var(ENV_RIDELINK_GATEWAY_URL)
                .ok()
                .map(|value| value.trim().to_owned())
                .filter(|value| !value.is_empty())
                .unwrap_or_else(|| DEFAULT_GATEWAY_BASE_URL.to_owned()),
            request_timeout: DEFAULT_REQUEST_TIMEOUT,
        }
    }
}

impl GatewayConfig {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            ..Self::default()
        }
    }

    /// Base URL without a trailing slash, ready for path concatenation.
    pub(crate) fn trimmed_base_url(&self) -> &str {
        self.base_url.trim_end_matches('/')
    }
}

/// Collapses a response body into one short printable line for error text.
pub(crate) fn sanitize_error_body(body: &str) -> String {
    let mut sanitized = body
        .chars()
        .map(|ch| if ch.is_control() { ' ' } else { ch })
        .collect::<String>();
    sanitized = sanitized.split_whitespace().collect::<Vec<_>>().join(" ");
    const MAX_LEN: usize = 240;
    if sanitized.len() > MAX_LEN {
        // Gateway bodies are not guaranteed ASCII; cut on a char boundary.
        let mut cut = MAX_LEN;
        while !sanitized.is_char_boundary(cut) {
            cut -= 1;
        }
        sanitized.truncate(cut);
        sanitized.push_str("...");
    }
    sanitized
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn trimmed_base_url_drops_trailing_slashes() {
        let config = GatewayConfig::new("https://gateway.example.test/");
        assert_eq!(config.trimmed_base_url(), "https://gateway.example.test");

        let config = GatewayConfig::new("https://gateway.example.test");
        assert_eq!(config.trimmed_base_url(), "https://gateway.example.test");
    }

    #[test]
    fn sanitize_error_body_flattens_and_truncates() {
        assert_eq!(
            sanitize_error_body("line one\nline\ttwo   three"),
            "line one line two three"
        );

        let long = "x".repeat(500);
        let sanitized = sanitize_error_body(&long);
        assert!(sanitized.len() <= 243);
        assert!(sanitized.ends_with("..."));
    }

    #[test]
    fn sanitize_error_body_truncates_multibyte_text_on_a_char_boundary() {
        // 241 bytes: one ASCII char then 80 three-byte characters, so the
        // truncation index lands inside a character.
        let body = format!("a{}", "€".repeat(80));
        let sanitized = sanitize_error_body(&body);

        assert_eq!(sanitized, format!("a{}...", "€".repeat(79)));
    }
}
