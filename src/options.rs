use std::collections::BTreeMap;
use std::time::Duration;

use serde::Deserialize;

use crate::{response::DEFAULT_RESPONSE_ERR_LIMIT, TlsOptions};

/// Environment variable holding the base URL.
pub const ENV_BASE_URL: &str = "RESILIENT_HTTP_BASE_URL";
/// Fallback base URL variable shared with other services.
pub const ENV_BASE_URL_GLOBAL: &str = "API_GATEWAY_ADDRESS";
pub const ENV_INSECURE_SKIP_VERIFY: &str = "RESILIENT_HTTP_INSECURE_SKIP_VERIFY";
pub const ENV_TIMEOUT_MS: &str = "RESILIENT_HTTP_TIMEOUT_MS";
pub const ENV_RETRY_DISABLE: &str = "RESILIENT_HTTP_RETRY_DISABLE";

/// Configures addressing, timeouts and retry behavior.
#[derive(Clone, Debug, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct ClientOptions {
    /// Base URL relative request paths are resolved against.
    pub base_url: Option<String>,
    /// Headers added to every request that does not already set them.
    pub headers: BTreeMap<String, String>,
    /// Overall call timeout in milliseconds, covering all attempts and backoff.
    pub timeout_ms: Option<u64>,
    /// Timeout of a single attempt in milliseconds.
    pub attempt_timeout_ms: Option<u64>,
    /// Maximum number of retries after the initial attempt.
    pub max_retries: usize,
    /// Lower bound of the retry backoff in milliseconds.
    pub retry_wait_min_ms: u64,
    /// Upper bound of the retry backoff in milliseconds.
    pub retry_wait_max_ms: u64,
    pub disable_retry: bool,
    /// Log a warning with the body excerpt on every retry.
    pub retry_log: bool,
    /// Ceiling for diagnostic body excerpts in bytes.
    pub response_error_limit: usize,
    pub disable_base_url_check: bool,
    /// Ignore `RESILIENT_HTTP_*` environment overrides.
    pub disable_env_values: bool,
    pub insecure_skip_verify: bool,
    /// Proxy URL for all schemes.
    pub proxy: Option<String>,
    /// Speak HTTP/2 without negotiation.
    pub http2: bool,
    /// Maximum idle connections kept per host.
    pub max_idle_connections: usize,
    pub tls: Option<TlsOptions>,
}

impl Default for ClientOptions {
    fn default() -> Self {
        Self {
            base_url: None,
            headers: BTreeMap::new(),
            timeout_ms: None,
            attempt_timeout_ms: None,
            max_retries: 4,
            retry_wait_min_ms: 1_000,
            retry_wait_max_ms: 30_000,
            disable_retry: false,
            retry_log: true,
            response_error_limit: DEFAULT_RESPONSE_ERR_LIMIT,
            disable_base_url_check: false,
            disable_env_values: false,
            insecure_skip_verify: false,
            proxy: None,
            http2: false,
            max_idle_connections: 100,
            tls: None,
        }
    }
}

impl ClientOptions {
    /// Options with the base URL check, retries and environment overrides off.
    pub fn plain() -> Self {
        Self {
            disable_base_url_check: true,
            disable_retry: true,
            disable_env_values: true,
            ..Self::default()
        }
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = Some(base_url.into());
        self
    }

    pub fn timeout(&self) -> Option<Duration> {
        self.timeout_ms.filter(|ms| *ms > 0).map(Duration::from_millis)
    }

    pub fn attempt_timeout(&self) -> Option<Duration> {
        self.attempt_timeout_ms
            .filter(|ms| *ms > 0)
            .map(Duration::from_millis)
    }

    pub fn retry_wait_min(&self) -> Duration {
        Duration::from_millis(self.retry_wait_min_ms)
    }

    pub fn retry_wait_max(&self) -> Duration {
        Duration::from_millis(self.retry_wait_max_ms)
    }

    /// Applies `RESILIENT_HTTP_*` overrides from the process environment.
    pub fn apply_env(&mut self) {
        self.apply_env_with(|key| std::env::var(key).ok());
    }

    /// Applies overrides read through `lookup`. Does nothing when
    /// `disable_env_values` is set.
    pub fn apply_env_with(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if self.disable_env_values {
            return;
        }
        let lookup = |key: &str| lookup(key).filter(|value| !value.trim().is_empty());

        if self.base_url.is_none() {
            self.base_url = lookup(ENV_BASE_URL).or_else(|| lookup(ENV_BASE_URL_GLOBAL));
        }
        if lookup(ENV_INSECURE_SKIP_VERIFY).is_some_and(|value| parse_bool(&value)) {
            self.insecure_skip_verify = true;
        }
        if let Some(ms) = lookup(ENV_TIMEOUT_MS).and_then(|value| value.trim().parse::<u64>().ok()) {
            if ms > 0 {
                self.timeout_ms = Some(ms);
            }
        }
        if lookup(ENV_RETRY_DISABLE).is_some_and(|value| parse_bool(&value)) {
            self.disable_retry = true;
        }
    }
}

fn parse_bool(value: &str) -> bool {
    matches!(
        value.trim().to_ascii_lowercase().as_str(),
        "1" | "t" | "true" | "yes" | "on"
    )
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;
    use std::time::Duration;

    use super::{ClientOptions, ENV_BASE_URL, ENV_BASE_URL_GLOBAL, ENV_RETRY_DISABLE, ENV_TIMEOUT_MS};

    fn env(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| ((*k).to_owned(), (*v).to_owned()))
            .collect();
        move |key: &str| map.get(key).cloned()
    }

    #[test]
    fn defaults_match_documented_values() {
        let options = ClientOptions::default();
        assert_eq!(options.max_retries, 4);
        assert_eq!(options.retry_wait_min(), Duration::from_secs(1));
        assert_eq!(options.retry_wait_max(), Duration::from_secs(30));
        assert_eq!(options.response_error_limit, 1 << 20);
        assert!(options.retry_log);
        assert_eq!(options.timeout(), None);
    }

    #[test]
    fn env_fills_missing_base_url_with_fallback() {
        let mut options = ClientOptions::default();
        options.apply_env_with(env(&[(ENV_BASE_URL_GLOBAL, "http://gateway.local")]));
        assert_eq!(options.base_url.as_deref(), Some("http://gateway.local"));

        let mut options = ClientOptions::default();
        options.apply_env_with(env(&[
            (ENV_BASE_URL, "http://own.local"),
            (ENV_BASE_URL_GLOBAL, "http://gateway.local"),
        ]));
        assert_eq!(options.base_url.as_deref(), Some("http://own.local"));
    }

    #[test]
    fn env_never_replaces_configured_base_url() {
        let mut options = ClientOptions::default().with_base_url("http://configured.local");
        options.apply_env_with(env(&[(ENV_BASE_URL, "http://own.local")]));
        assert_eq!(options.base_url.as_deref(), Some("http://configured.local"));
    }

    #[test]
    fn env_overrides_timeout_and_retry() {
        let mut options = ClientOptions::default();
        options.apply_env_with(env(&[(ENV_TIMEOUT_MS, "2500"), (ENV_RETRY_DISABLE, "true")]));
        assert_eq!(options.timeout(), Some(Duration::from_millis(2_500)));
        assert!(options.disable_retry);
    }

    #[test]
    fn plain_options_ignore_env() {
        let mut options = ClientOptions::plain();
        options.apply_env_with(env(&[(ENV_BASE_URL, "http://own.local"), (ENV_RETRY_DISABLE, "false")]));
        assert_eq!(options.base_url, None);
        assert!(options.disable_retry);
        assert!(options.disable_base_url_check);
    }

    #[test]
    fn deserializes_partial_json() {
        let options: ClientOptions = serde_json::from_str(
            r#"{"base_url":"http://api.local","max_retries":2,"headers":{"x-info":"default"}}"#,
        )
        .expect("options must parse");
        assert_eq!(options.max_retries, 2);
        assert_eq!(options.retry_wait_max_ms, 30_000);
        assert_eq!(options.headers.get("x-info").map(String::as_str), Some("default"));
    }
}
