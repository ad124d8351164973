//! Configuration for the Moesif middleware.
//!
//! This module provides the `MoesifConfig` builder. Options can be set in
//! code or loaded from `MOESIF_`-prefixed environment variables.

use crate::error::Result;
use crate::hooks::{MoesifHooks, NoopHooks};
use serde::Deserialize;
use std::sync::Arc;
use std::time::Duration;

/// Default collector endpoint.
pub const DEFAULT_BASE_URI: &str = "https://api.moesif.net/v1";

/// Configuration for [`MoesifMiddleware`](crate::MoesifMiddleware).
///
/// ```ignore
/// use moesif_middleware::MoesifConfig;
/// use std::time::Duration;
///
/// let config = MoesifConfig::new("my-application-id")
///     .log_body(false)
///     .batch_size(50)
///     .event_batch_timeout(Duration::from_secs(1))
///     .hooks(MyHooks);
/// ```
#[derive(Clone)]
pub struct MoesifConfig {
    /// Collector credential. Required.
    pub(crate) application_id: String,

    /// Raise hook and sampling diagnostics to `warn`/`info`. Default: false.
    pub(crate) debug: bool,

    /// Include request and response bodies in events. Default: true.
    pub(crate) log_body: bool,

    /// Version tag copied onto every event.
    pub(crate) api_version: Option<String>,

    /// Maximum events per delivery call. Default: 100.
    pub(crate) batch_size: usize,

    /// Number of delivery workers. Default: 2.
    pub(crate) event_worker_count: usize,

    /// Capacity of the event queue. Default: 1,000,000.
    pub(crate) event_queue_size: usize,

    /// Longest time a partial batch waits before it is sent. Default: 2s.
    pub(crate) event_batch_timeout: Duration,

    /// Skip the `X-Moesif-Transaction-Id` header. Default: false.
    pub(crate) disabled_transaction_id: bool,

    /// Accept events from [`capture_outgoing`](crate::MoesifMiddleware::capture_outgoing).
    pub(crate) capture_outgoing_requests: bool,

    /// Comma-separated header names searched for a user id. Default: "authorization".
    pub(crate) authorization_header_name: String,

    /// Token claim holding the user id. Default: "sub".
    pub(crate) authorization_user_id_field: String,

    /// Collector endpoint.
    pub(crate) base_uri: String,

    /// Minimum time between ETag-triggered refreshes. Default: 5 minutes.
    pub(crate) config_refresh_interval: Duration,

    /// Periodic refresh cadence, `None` to disable. Default: 60s.
    pub(crate) config_poll_interval: Option<Duration>,

    pub(crate) hooks: Arc<dyn MoesifHooks>,
}

impl MoesifConfig {
    /// Create a configuration with default values.
    ///
    /// The application id is validated when the middleware is built.
    pub fn new(application_id: impl Into<String>) -> Self {
        Self {
            application_id: application_id.into(),
            debug: false,
            log_body: true,
            api_version: None,
            batch_size: 100,
            event_worker_count: 2,
            event_queue_size: 1_000_000,
            event_batch_timeout: Duration::from_secs(2),
            disabled_transaction_id: false,
            capture_outgoing_requests: false,
            authorization_header_name: "authorization".to_string(),
            authorization_user_id_field: "sub".to_string(),
            base_uri: DEFAULT_BASE_URI.to_string(),
            config_refresh_interval: Duration::from_secs(5 * 60),
            config_poll_interval: Some(Duration::from_secs(60)),
            hooks: Arc::new(NoopHooks),
        }
    }

    /// Load configuration from the environment.
    ///
    /// Reads a `.env` file when present, then `MOESIF_`-prefixed variables
    /// (`MOESIF_APPLICATION_ID`, `MOESIF_LOG_BODY`, `MOESIF_BATCH_SIZE`, ...).
    /// Unset variables keep their defaults.
    pub fn from_env() -> Result<Self> {
        let _ = dotenvy::dotenv();
        Self::from_vars(std::env::vars())
    }

    /// Load configuration from an explicit set of variables.
    ///
    /// Names carry the `MOESIF_` prefix, as with [`from_env`](Self::from_env).
    pub fn from_vars<I>(vars: I) -> Result<Self>
    where
        I: IntoIterator<Item = (String, String)>,
    {
        let env: EnvSettings = envy::prefixed("MOESIF_").from_iter(vars)?;
        Ok(env.apply(Self::new(String::new())))
    }

    /// Set the application id.
    pub fn application_id(mut self, id: impl Into<String>) -> Self {
        self.application_id = id.into();
        self
    }

    /// Enable verbose diagnostics.
    pub fn debug(mut self, enabled: bool) -> Self {
        self.debug = enabled;
        self
    }

    /// Enable or disable body capture.
    pub fn log_body(mut self, enabled: bool) -> Self {
        self.log_body = enabled;
        self
    }

    /// Tag every event with an API version.
    pub fn api_version(mut self, version: impl Into<String>) -> Self {
        self.api_version = Some(version.into());
        self
    }

    /// Set the maximum batch size (at least 1).
    pub fn batch_size(mut self, size: usize) -> Self {
        self.batch_size = size.max(1);
        self
    }

    /// Set the number of delivery workers (at least 1).
    pub fn event_worker_count(mut self, count: usize) -> Self {
        self.event_worker_count = count.max(1);
        self
    }

    /// Set the event queue capacity (at least 1).
    pub fn event_queue_size(mut self, size: usize) -> Self {
        self.event_queue_size = size.max(1);
        self
    }

    /// Set how long a partial batch may wait.
    pub fn event_batch_timeout(mut self, timeout: Duration) -> Self {
        self.event_batch_timeout = timeout;
        self
    }

    /// Disable the transaction id header.
    pub fn disabled_transaction_id(mut self, disabled: bool) -> Self {
        self.disabled_transaction_id = disabled;
        self
    }

    /// Accept outgoing call captures.
    pub fn capture_outgoing_requests(mut self, enabled: bool) -> Self {
        self.capture_outgoing_requests = enabled;
        self
    }

    /// Headers searched for a user id when no hook resolves one.
    pub fn authorization_header_name(mut self, names: impl Into<String>) -> Self {
        self.authorization_header_name = names.into();
        self
    }

    /// Claim read from authorization tokens.
    pub fn authorization_user_id_field(mut self, field: impl Into<String>) -> Self {
        self.authorization_user_id_field = field.into();
        self
    }

    /// Point the middleware at another collector.
    pub fn base_uri(mut self, uri: impl Into<String>) -> Self {
        self.base_uri = uri.into().trim_end_matches('/').to_string();
        self
    }

    /// Minimum time between ETag-triggered config refreshes.
    pub fn config_refresh_interval(mut self, interval: Duration) -> Self {
        self.config_refresh_interval = interval;
        self
    }

    /// Periodic config refresh cadence. `None` disables polling.
    pub fn config_poll_interval(mut self, interval: Option<Duration>) -> Self {
        self.config_poll_interval = interval;
        self
    }

    /// Bind identity and masking hooks.
    pub fn hooks(mut self, hooks: impl MoesifHooks) -> Self {
        self.hooks = Arc::new(hooks);
        self
    }

    /// Bind hooks that are already shared.
    pub fn shared_hooks(mut self, hooks: Arc<dyn MoesifHooks>) -> Self {
        self.hooks = hooks;
        self
    }

    /// Whether the transaction id header is injected.
    pub fn transaction_id_enabled(&self) -> bool {
        !self.disabled_transaction_id
    }
}

impl std::fmt::Debug for MoesifConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MoesifConfig")
            .field("application_id", &mask(&self.application_id))
            .field("debug", &self.debug)
            .field("log_body", &self.log_body)
            .field("api_version", &self.api_version)
            .field("batch_size", &self.batch_size)
            .field("event_worker_count", &self.event_worker_count)
            .field("event_queue_size", &self.event_queue_size)
            .field("event_batch_timeout", &self.event_batch_timeout)
            .field("disabled_transaction_id", &self.disabled_transaction_id)
            .field("capture_outgoing_requests", &self.capture_outgoing_requests)
            .field("authorization_header_name", &self.authorization_header_name)
            .field("authorization_user_id_field", &self.authorization_user_id_field)
            .field("base_uri", &self.base_uri)
            .field("config_refresh_interval", &self.config_refresh_interval)
            .field("config_poll_interval", &self.config_poll_interval)
            .field("hooks", &"<hooks>")
            .finish()
    }
}

fn mask(secret: &str) -> String {
    let n = secret.chars().count();
    if n <= 8 {
        return "*".repeat(n);
    }
    let head: String = secret.chars().take(4).collect();
    format!("{}{}", head, "*".repeat(n - 4))
}

/// Environment variables understood by [`MoesifConfig::from_env`].
#[derive(Debug, Default, Deserialize)]
struct EnvSettings {
    application_id: Option<String>,
    debug: Option<bool>,
    log_body: Option<bool>,
    api_version: Option<String>,
    batch_size: Option<usize>,
    event_worker_count: Option<usize>,
    event_queue_size: Option<usize>,
    /// Seconds
    event_batch_timeout: Option<u64>,
    disabled_transaction_id: Option<bool>,
    capture_outgoing_requests: Option<bool>,
    authorization_header_name: Option<String>,
    authorization_user_id_field: Option<String>,
    base_uri: Option<String>,
}

impl EnvSettings {
    fn apply(self, mut config: MoesifConfig) -> MoesifConfig {
        if let Some(v) = self.application_id {
            config = config.application_id(v);
        }
        if let Some(v) = self.debug {
            config = config.debug(v);
        }
        if let Some(v) = self.log_body {
            config = config.log_body(v);
        }
        if let Some(v) = self.api_version {
            config = config.api_version(v);
        }
        if let Some(v) = self.batch_size {
            config = config.batch_size(v);
        }
        if let Some(v) = self.event_worker_count {
            config = config.event_worker_count(v);
        }
        if let Some(v) = self.event_queue_size {
            config = config.event_queue_size(v);
        }
        if let Some(v) = self.event_batch_timeout {
            config = config.event_batch_timeout(Duration::from_secs(v));
        }
        if let Some(v) = self.disabled_transaction_id {
            config = config.disabled_transaction_id(v);
        }
        if let Some(v) = self.capture_outgoing_requests {
            config = config.capture_outgoing_requests(v);
        }
        if let Some(v) = self.authorization_header_name {
            config = config.authorization_header_name(v);
        }
        if let Some(v) = self.authorization_user_id_field {
            config = config.authorization_user_id_field(v);
        }
        if let Some(v) = self.base_uri {
            config = config.base_uri(v);
        }
        config
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;

    fn vars(pairs: &[(&str, &str)]) -> Vec<(String, String)> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn defaults() {
        let config = MoesifConfig::new("app");
        assert!(config.log_body);
        assert!(!config.debug);
        assert_eq!(config.batch_size, 100);
        assert_eq!(config.event_worker_count, 2);
        assert_eq!(config.event_queue_size, 1_000_000);
        assert_eq!(config.event_batch_timeout, Duration::from_secs(2));
        assert_eq!(config.authorization_header_name, "authorization");
        assert_eq!(config.authorization_user_id_field, "sub");
        assert_eq!(config.base_uri, DEFAULT_BASE_URI);
        assert_eq!(config.config_refresh_interval, Duration::from_secs(300));
        assert!(config.transaction_id_enabled());
    }

    #[test]
    fn numeric_options_are_clamped() {
        let config = MoesifConfig::new("app")
            .batch_size(0)
            .event_worker_count(0)
            .event_queue_size(0);
        assert_eq!(config.batch_size, 1);
        assert_eq!(config.event_worker_count, 1);
        assert_eq!(config.event_queue_size, 1);
    }

    #[test]
    fn base_uri_trailing_slash_is_trimmed() {
        let config = MoesifConfig::new("app").base_uri("http://localhost:9000/v1/");
        assert_eq!(config.base_uri, "http://localhost:9000/v1");
    }

    #[test]
    fn loads_prefixed_variables() {
        let config = MoesifConfig::from_vars(vars(&[
            ("MOESIF_APPLICATION_ID", "from-env"),
            ("MOESIF_LOG_BODY", "false"),
            ("MOESIF_BATCH_SIZE", "25"),
            ("MOESIF_EVENT_BATCH_TIMEOUT", "7"),
            ("MOESIF_AUTHORIZATION_HEADER_NAME", "x-api-key, authorization"),
            ("UNRELATED", "ignored"),
        ]))
        .unwrap();

        assert_eq!(config.application_id, "from-env");
        assert!(!config.log_body);
        assert_eq!(config.batch_size, 25);
        assert_eq!(config.event_batch_timeout, Duration::from_secs(7));
        assert_eq!(config.authorization_header_name, "x-api-key, authorization");
        assert_eq!(config.event_worker_count, 2);
    }

    #[test]
    fn invalid_variable_is_a_config_error() {
        let err = MoesifConfig::from_vars(vars(&[("MOESIF_BATCH_SIZE", "lots")])).unwrap_err();
        assert!(matches!(err, crate::MoesifError::Config(_)));
    }

    #[test]
    #[serial]
    fn from_env_reads_process_environment() {
        std::env::set_var("MOESIF_APPLICATION_ID", "process-env-id");
        std::env::set_var("MOESIF_CAPTURE_OUTGOING_REQUESTS", "true");
        let config = MoesifConfig::from_env();
        std::env::remove_var("MOESIF_APPLICATION_ID");
        std::env::remove_var("MOESIF_CAPTURE_OUTGOING_REQUESTS");

        let config = config.unwrap();
        assert_eq!(config.application_id, "process-env-id");
        assert!(config.capture_outgoing_requests);
    }

    #[test]
    fn debug_output_masks_the_application_id() {
        let rendered = format!("{:?}", MoesifConfig::new("abcdefghijkl"));
        assert!(rendered.contains("abcd********"));
        assert!(!rendered.contains("abcdefghijkl"));
    }
}
