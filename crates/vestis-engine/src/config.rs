use std::env;
use std::time::Duration;

pub const DEFAULT_BACKEND_ORIGIN: &str = "http://127.0.0.1:8000";
const DEFAULT_REQUEST_TIMEOUT_S: f64 = 120.0;
const DEFAULT_IMAGE_TIMEOUT_S: f64 = 20.0;

/// Where the search backend lives and how long to wait on it.
#[derive(Debug, Clone, PartialEq)]
pub struct GatewayConfig {
    pub origin: String,
    pub request_timeout: Duration,
    pub image_timeout: Duration,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            origin: DEFAULT_BACKEND_ORIGIN.to_string(),
            request_timeout: Duration::from_secs_f64(DEFAULT_REQUEST_TIMEOUT_S),
            image_timeout: Duration::from_secs_f64(DEFAULT_IMAGE_TIMEOUT_S),
        }
    }
}

impl GatewayConfig {
    /// Reads `VESTIS_BACKEND_ORIGIN` (or the proxy-style `BACKEND_URL`),
    /// `VESTIS_REQUEST_TIMEOUT_S` and `VESTIS_IMAGE_TIMEOUT_S`.
    pub fn from_env() -> Self {
        Self::from_lookup(non_empty_env)
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let defaults = Self::default();
        let origin = lookup("VESTIS_BACKEND_ORIGIN")
            .or_else(|| lookup("BACKEND_URL"))
            .and_then(|raw| normalize_origin(&raw))
            .unwrap_or(defaults.origin);
        Self {
            origin,
            request_timeout: lookup("VESTIS_REQUEST_TIMEOUT_S")
                .and_then(|raw| parse_timeout(&raw))
                .unwrap_or(defaults.request_timeout),
            image_timeout: lookup("VESTIS_IMAGE_TIMEOUT_S")
                .and_then(|raw| parse_timeout(&raw))
                .unwrap_or(defaults.image_timeout),
        }
    }

    /// Overrides the origin when `raw` normalizes to something usable.
    pub fn with_origin(mut self, raw: Option<&str>) -> Self {
        if let Some(origin) = raw.and_then(normalize_origin) {
            self.origin = origin;
        }
        self
    }

    pub fn with_request_timeout_s(mut self, seconds: Option<f64>) -> Self {
        if let Some(seconds) = seconds.filter(|value| value.is_finite() && *value > 0.0) {
            self.request_timeout = Duration::from_secs_f64(seconds);
        }
        self
    }
}

/// Trims whitespace and trailing slashes. A full `/api/chat` endpoint (the
/// shape `BACKEND_URL` uses for the web proxy) is reduced to its origin.
pub fn normalize_origin(raw: &str) -> Option<String> {
    let trimmed = raw.trim().trim_end_matches('/');
    let origin = trimmed
        .strip_suffix("/api/chat")
        .unwrap_or(trimmed)
        .trim_end_matches('/');
    if origin.is_empty() {
        return None;
    }
    Some(origin.to_string())
}

fn parse_timeout(raw: &str) -> Option<Duration> {
    let seconds: f64 = raw.trim().parse().ok()?;
    if !seconds.is_finite() || seconds <= 0.0 {
        return None;
    }
    Some(Duration::from_secs_f64(seconds))
}

pub(crate) fn non_empty_env(key: &str) -> Option<String> {
    env::var(key)
        .ok()
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
}
