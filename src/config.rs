//! Process configuration: connection, retry and call-flow settings

use serde::Deserialize;
use std::fmt;
use std::time::Duration;
use tracing::info;
use url::Url;

use crate::{
    client::{Credentials, RetryPolicy},
    constants::{
        ARI_PATH_PREFIX, DEFAULT_APP_NAME, DEFAULT_BASE_URL, DEFAULT_DIGIT_TIMEOUT,
        DEFAULT_LOG_BACKUP_COUNT, DEFAULT_LOG_LEVEL, DEFAULT_MAX_RETRIES, DEFAULT_RECONNECT_DELAY,
        DEFAULT_RECORDING_MAX_DURATION, DEFAULT_REQUEST_TIMEOUT, DEFAULT_RETRY_DELAY,
        MAX_EVENT_QUEUE_SIZE,
    },
    error::{AriError, AriResult},
    logging::{normalize_level, LogRotation},
};

/// Everything the client needs to reach the control plane and run calls.
///
/// Values are validated once with [`validate`](Self::validate) at startup and
/// trusted afterwards.
#[derive(Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct AriConfig {
    /// `http://` or `https://` root of the ARI server, without `/ari`.
    pub base_url: String,
    pub username: String,
    pub password: String,
    /// Stasis application name.
    pub app: String,
    /// Total attempts per command.
    pub max_retries: u32,
    pub retry_delay_ms: u64,
    pub reconnect_delay_ms: u64,
    pub request_timeout_ms: u64,
    pub digit_timeout_ms: u64,
    pub recording_max_secs: u64,
    pub event_queue_size: usize,
    /// Fallback log level when `RUST_LOG` is unset.
    pub log_level: String,
    /// Log to this file instead of stdout.
    pub log_file: Option<String>,
    pub log_rotation: LogRotation,
    /// Rolled-over log files to keep.
    pub log_max_files: usize,
}

impl Default for AriConfig {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_BASE_URL.to_string(),
            username: String::new(),
            password: String::new(),
            app: DEFAULT_APP_NAME.to_string(),
            max_retries: DEFAULT_MAX_RETRIES,
            retry_delay_ms: DEFAULT_RETRY_DELAY.as_millis() as u64,
            reconnect_delay_ms: DEFAULT_RECONNECT_DELAY.as_millis() as u64,
            request_timeout_ms: DEFAULT_REQUEST_TIMEOUT.as_millis() as u64,
            digit_timeout_ms: DEFAULT_DIGIT_TIMEOUT.as_millis() as u64,
            recording_max_secs: DEFAULT_RECORDING_MAX_DURATION.as_secs(),
            event_queue_size: MAX_EVENT_QUEUE_SIZE,
            log_level: DEFAULT_LOG_LEVEL.to_string(),
            log_file: None,
            log_rotation: LogRotation::Daily,
            log_max_files: DEFAULT_LOG_BACKUP_COUNT,
        }
    }
}

impl fmt::Debug for AriConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AriConfig")
            .field("base_url", &self.base_url)
            .field("username", &self.username)
            .field("password", &"[REDACTED]")
            .field("app", &self.app)
            .field("max_retries", &self.max_retries)
            .field("retry_delay_ms", &self.retry_delay_ms)
            .field("reconnect_delay_ms", &self.reconnect_delay_ms)
            .field("request_timeout_ms", &self.request_timeout_ms)
            .field("digit_timeout_ms", &self.digit_timeout_ms)
            .field("recording_max_secs", &self.recording_max_secs)
            .field("event_queue_size", &self.event_queue_size)
            .field("log_level", &self.log_level)
            .field("log_file", &self.log_file)
            .field("log_rotation", &self.log_rotation)
            .field("log_max_files", &self.log_max_files)
            .finish()
    }
}

fn parse_var<T: std::str::FromStr>(name: &str, raw: &str) -> AriResult<T>
where
    T::Err: fmt::Display,
{
    raw.trim()
        .parse()
        .map_err(|e| AriError::config(format!("{}={:?}: {}", name, raw, e)))
}

impl AriConfig {
    /// Defaults overridden by `ARI_*` / `IVR_*` environment variables.
    pub fn from_env() -> AriResult<Self> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Same as [`from_env`](Self::from_env) with an arbitrary variable source.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> AriResult<Self> {
        let mut config = Self::default();

        if let Some(v) = lookup("ARI_BASE_URL") {
            config.base_url = v;
        }
        if let Some(v) = lookup("ARI_USER") {
            config.username = v;
        }
        if let Some(v) = lookup("ARI_PASSWORD") {
            config.password = v;
        }
        if let Some(v) = lookup("ARI_APP") {
            config.app = v;
        }
        if let Some(v) = lookup("ARI_MAX_RETRIES") {
            config.max_retries = parse_var("ARI_MAX_RETRIES", &v)?;
        }
        // Whole seconds; `ARI_RETRY_DELAY_MS` wins when both are set.
        if let Some(v) = lookup("ARI_RETRY_DELAY") {
            let secs: u64 = parse_var("ARI_RETRY_DELAY", &v)?;
            config.retry_delay_ms = secs.saturating_mul(1000);
        }
        if let Some(v) = lookup("ARI_RETRY_DELAY_MS") {
            config.retry_delay_ms = parse_var("ARI_RETRY_DELAY_MS", &v)?;
        }
        if let Some(v) = lookup("ARI_RECONNECT_DELAY_MS") {
            config.reconnect_delay_ms = parse_var("ARI_RECONNECT_DELAY_MS", &v)?;
        }
        if let Some(v) = lookup("ARI_REQUEST_TIMEOUT_MS") {
            config.request_timeout_ms = parse_var("ARI_REQUEST_TIMEOUT_MS", &v)?;
        }
        if let Some(v) = lookup("IVR_DIGIT_TIMEOUT_MS") {
            config.digit_timeout_ms = parse_var("IVR_DIGIT_TIMEOUT_MS", &v)?;
        }
        if let Some(v) = lookup("IVR_RECORDING_MAX_SECS") {
            config.recording_max_secs = parse_var("IVR_RECORDING_MAX_SECS", &v)?;
        }
        if let Some(v) = lookup("ARI_EVENT_QUEUE_SIZE") {
            config.event_queue_size = parse_var("ARI_EVENT_QUEUE_SIZE", &v)?;
        }
        if let Some(v) = lookup("LOG_LEVEL") {
            config.log_level = v;
        }
        if let Some(v) = lookup("LOG_FILE") {
            let v = v
                .trim()
                .to_string();
            config.log_file = (!v.is_empty()).then_some(v);
        }
        if let Some(v) = lookup("LOG_ROTATION") {
            config.log_rotation = parse_var("LOG_ROTATION", &v)?;
        }
        if let Some(v) = lookup("LOG_BACKUP_COUNT") {
            config.log_max_files = parse_var("LOG_BACKUP_COUNT", &v)?;
        }

        Ok(config)
    }

    /// Reject configurations the client cannot run with.
    pub fn validate(&self) -> AriResult<()> {
        let url = Url::parse(&self.base_url)?;
        if !matches!(url.scheme(), "http" | "https") {
            return Err(AriError::config(format!(
                "base_url must be http or https, got {}",
                url.scheme()
            )));
        }
        if url
            .host_str()
            .is_none()
        {
            return Err(AriError::config("base_url has no host"));
        }
        if self
            .username
            .is_empty()
            || self
                .password
                .is_empty()
        {
            return Err(AriError::config("ARI username and password are required"));
        }
        if self
            .app
            .is_empty()
        {
            return Err(AriError::config("application name must not be empty"));
        }
        if self.max_retries == 0 {
            return Err(AriError::config("max_retries must be at least 1"));
        }
        for (name, value) in [
            ("retry_delay_ms", self.retry_delay_ms),
            ("reconnect_delay_ms", self.reconnect_delay_ms),
            ("request_timeout_ms", self.request_timeout_ms),
            ("digit_timeout_ms", self.digit_timeout_ms),
            ("recording_max_secs", self.recording_max_secs),
        ] {
            if value == 0 {
                return Err(AriError::config(format!("{} must be greater than zero", name)));
            }
        }
        if self.event_queue_size == 0 {
            return Err(AriError::config("event_queue_size must be greater than zero"));
        }
        normalize_level(&self.log_level)?;
        if self
            .log_file
            .is_some()
            && self.log_max_files == 0
        {
            return Err(AriError::config("log_max_files must be at least 1 when logging to a file"));
        }
        Ok(())
    }

    /// Log the effective settings, credentials redacted.
    pub fn log_summary(&self) {
        info!(
            base_url = %self.base_url,
            app = %self.app,
            user = %self.username,
            max_retries = self.max_retries,
            retry_delay_ms = self.retry_delay_ms,
            reconnect_delay_ms = self.reconnect_delay_ms,
            log_level = %self.log_level,
            log_file = ?self.log_file,
            "ARI configuration loaded"
        );
    }

    pub fn credentials(&self) -> Credentials {
        Credentials::new(&self.username, &self.password)
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy::new(self.max_retries, Duration::from_millis(self.retry_delay_ms))
    }

    pub fn reconnect_delay(&self) -> Duration {
        Duration::from_millis(self.reconnect_delay_ms)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }

    pub fn digit_timeout(&self) -> Duration {
        Duration::from_millis(self.digit_timeout_ms)
    }

    pub fn recording_max_duration(&self) -> Duration {
        Duration::from_secs(self.recording_max_secs)
    }

    /// WebSocket URL of the event stream, subscribed to all events for `app`.
    pub fn events_url(&self) -> AriResult<Url> {
        let mut url = Url::parse(&self.base_url)?;
        let scheme = match url.scheme() {
            "https" => "wss",
            _ => "ws",
        };
        url.set_scheme(scheme)
            .map_err(|_| AriError::config(format!("cannot derive {} URL from base_url", scheme)))?;

        let path = format!(
            "{}{}/events",
            url.path()
                .trim_end_matches('/'),
            ARI_PATH_PREFIX
        );
        url.set_path(&path);
        url.query_pairs_mut()
            .clear()
            .append_pair("app", &self.app)
            .append_pair("subscribeAll", "true");
        Ok(url)
    }
}
