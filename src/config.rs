//! # Configuration
//!
//! Settings for connecting to a `did:plc` directory.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use url::Url;

use crate::{Error, Result};

/// Default public directory.
pub const DEFAULT_BASE_URL: &str = "https://plc.directory";

/// Default per-request timeout, in milliseconds.
pub const DEFAULT_TIMEOUT_MS: u64 = 30_000;

/// Environment variable overriding [`ClientConfig::base_url`].
pub const ENV_BASE_URL: &str = "PLC_DIRECTORY_URL";

/// Environment variable overriding [`ClientConfig::timeout_ms`], in seconds.
pub const ENV_TIMEOUT_SECS: &str = "PLC_TIMEOUT_SECS";

/// Environment variable overriding [`ClientConfig::verify_tls`].
pub const ENV_VERIFY_TLS: &str = "PLC_VERIFY_TLS";

/// Log client configuration.
#[derive(Clone, Debug, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ClientConfig {
    /// Directory base URL, without a trailing path.
    pub base_url: String,

    /// Per-request timeout, in milliseconds. Requests fail rather than hang
    /// once it elapses.
    pub timeout_ms: u64,

    /// Verify the directory's TLS certificate.
    pub verify_tls: bool,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_BASE_URL.to_string(),
            timeout_ms: DEFAULT_TIMEOUT_MS,
            verify_tls: true,
        }
    }
}

impl ClientConfig {
    /// Defaults overlaid with any `PLC_*` environment variables.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Validation`] if a variable is set to an unparsable
    /// value or the resulting configuration is invalid.
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let mut config = Self::default();
        if let Some(base_url) = lookup(ENV_BASE_URL) {
            config.base_url = base_url;
        }
        if let Some(timeout) = lookup(ENV_TIMEOUT_SECS) {
            let secs: u64 = timeout.trim().parse().map_err(|e| {
                Error::Validation(format!("{ENV_TIMEOUT_SECS} must be a number of seconds: {e}"))
            })?;
            config = config.with_timeout(Duration::from_secs(secs));
        }
        if let Some(verify) = lookup(ENV_VERIFY_TLS) {
            config.verify_tls = match verify.trim().to_ascii_lowercase().as_str() {
                "1" | "true" | "yes" | "on" => true,
                "0" | "false" | "no" | "off" => false,
                other => {
                    crate::tracerr!(
                        Error::Validation,
                        "{ENV_VERIFY_TLS} must be a boolean, got {other}"
                    );
                }
            };
        }
        config.validate()?;
        Ok(config)
    }

    /// Set the directory base URL.
    #[must_use]
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }

    /// Set the per-request timeout. Sub-millisecond precision is rounded up,
    /// so a non-zero timeout stays non-zero.
    #[must_use]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        let millis = timeout.as_nanos().div_ceil(1_000_000);
        self.timeout_ms = u64::try_from(millis).unwrap_or(u64::MAX);
        self
    }

    /// Enable or disable TLS certificate verification.
    #[must_use]
    pub const fn with_verify_tls(mut self, verify_tls: bool) -> Self {
        self.verify_tls = verify_tls;
        self
    }

    /// Per-request timeout.
    #[must_use]
    pub const fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }

    /// Check the configuration is usable.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Validation`] if the base URL does not parse or is not
    /// http(s), or the timeout is zero.
    pub fn validate(&self) -> Result<Url> {
        let url = Url::parse(&self.base_url)?;
        if !matches!(url.scheme(), "http" | "https") {
            crate::tracerr!(Error::Validation, "base URL must be http(s): {}", self.base_url);
        }
        if url.query().is_some() || url.fragment().is_some() {
            crate::tracerr!(Error::Validation, "base URL cannot carry a query or fragment");
        }
        if self.timeout_ms == 0 {
            crate::tracerr!(Error::Validation, "timeout must be greater than zero");
        }
        Ok(url)
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;

    fn lookup(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let vars: HashMap<String, String> =
            vars.iter().map(|(k, v)| ((*k).to_string(), (*v).to_string())).collect();
        move |name| vars.get(name).cloned()
    }

    #[test]
    fn defaults() {
        let config = ClientConfig::default();
        assert_eq!(config.base_url, "https://plc.directory");
        assert_eq!(config.timeout(), Duration::from_secs(30));
        assert!(config.verify_tls);
        config.validate().expect("defaults should be valid");

        let parsed: ClientConfig =
            serde_json::from_str(r#"{"timeoutMs": 5000}"#).expect("should parse");
        assert_eq!(parsed, ClientConfig::default().with_timeout(Duration::from_secs(5)));
    }

    #[test]
    fn env_overlay() {
        let config = ClientConfig::from_lookup(lookup(&[
            (ENV_BASE_URL, "http://localhost:2582"),
            (ENV_TIMEOUT_SECS, "5"),
            (ENV_VERIFY_TLS, "false"),
        ]))
        .expect("should load");
        assert_eq!(config.base_url, "http://localhost:2582");
        assert_eq!(config.timeout(), Duration::from_secs(5));
        assert!(!config.verify_tls);

        let config = ClientConfig::from_lookup(lookup(&[])).expect("should load");
        assert_eq!(config, ClientConfig::default());
    }

    #[test]
    fn sub_second_timeout() {
        let config = ClientConfig::default().with_timeout(Duration::from_millis(500));
        assert_eq!(config.timeout_ms, 500);
        assert_eq!(config.timeout(), Duration::from_millis(500));
        config.validate().expect("half a second should be valid");

        // rounded up rather than truncated to zero
        let config = ClientConfig::default().with_timeout(Duration::from_micros(10));
        assert_eq!(config.timeout(), Duration::from_millis(1));
        config.validate().expect("should be valid");

        let config = ClientConfig::default().with_timeout(Duration::ZERO);
        assert!(config.validate().is_err());
    }

    #[test]
    fn invalid() {
        assert!(ClientConfig::from_lookup(lookup(&[(ENV_TIMEOUT_SECS, "soon")])).is_err());
        assert!(ClientConfig::from_lookup(lookup(&[(ENV_VERIFY_TLS, "maybe")])).is_err());
        assert!(ClientConfig::from_lookup(lookup(&[(ENV_TIMEOUT_SECS, "0")])).is_err());
        assert!(ClientConfig::default().with_base_url("ftp://plc.example.com").validate().is_err());
        assert!(ClientConfig::default().with_base_url("not a url").validate().is_err());
    }
}
