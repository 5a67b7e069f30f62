//! Log output: `tracing-subscriber` formatting to stdout or a rotating file

use serde::{Deserialize, Deserializer};
use std::fmt;
use std::path::{Path, PathBuf};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_appender::rolling::{RollingFileAppender, Rotation};
use tracing_subscriber::EnvFilter;

use crate::{
    config::AriConfig,
    error::{AriError, AriResult},
};

/// Error returned when parsing an unknown rotation period.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParseLogRotationError(pub String);

impl fmt::Display for ParseLogRotationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "unknown log rotation: {}", self.0)
    }
}

impl std::error::Error for ParseLogRotationError {}

define_wire_enum! {
    error_type: ParseLogRotationError,
    /// How often the log file is rolled over (`LOG_ROTATION`).
    pub enum LogRotation {
        Never => "never",
        Minutely => "minutely",
        Hourly => "hourly",
        Daily => "daily",
    }
}

impl LogRotation {
    fn to_appender(self) -> Rotation {
        match self {
            LogRotation::Never => Rotation::NEVER,
            LogRotation::Minutely => Rotation::MINUTELY,
            LogRotation::Hourly => Rotation::HOURLY,
            LogRotation::Daily => Rotation::DAILY,
        }
    }
}

impl<'de> Deserialize<'de> for LogRotation {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        raw.parse()
            .map_err(serde::de::Error::custom)
    }
}

/// Map a level name onto a `tracing` directive level.
///
/// Accepts the `tracing` names plus `WARNING` and `CRITICAL`, in any case.
pub(crate) fn normalize_level(raw: &str) -> AriResult<&'static str> {
    let level = match raw
        .trim()
        .to_ascii_lowercase()
        .as_str()
    {
        "trace" => "trace",
        "debug" => "debug",
        "info" => "info",
        "warn" | "warning" => "warn",
        "error" | "critical" => "error",
        "off" => "off",
        _ => return Err(AriError::config(format!("unknown log level {:?}", raw))),
    };
    Ok(level)
}

/// Where and how verbosely to log.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogSettings {
    /// Fallback level when `RUST_LOG` is unset.
    pub level: String,
    /// Log to this file instead of stdout.
    pub file: Option<PathBuf>,
    pub rotation: LogRotation,
    /// Rolled-over files kept next to the active one.
    pub max_files: usize,
}

impl From<&AriConfig> for LogSettings {
    fn from(config: &AriConfig) -> Self {
        Self {
            level: config
                .log_level
                .clone(),
            file: config
                .log_file
                .as_ref()
                .map(PathBuf::from),
            rotation: config.log_rotation,
            max_files: config.log_max_files,
        }
    }
}

impl LogSettings {
    /// `EnvFilter` directives applied when `RUST_LOG` is unset.
    pub fn directives(&self) -> AriResult<String> {
        let level = normalize_level(&self.level)?;
        Ok(format!("ari_ivr_tokio={},ari_ivr={}", level, level))
    }

    fn env_filter(&self) -> AriResult<EnvFilter> {
        if let Ok(filter) = EnvFilter::try_from_default_env() {
            return Ok(filter);
        }
        EnvFilter::try_new(self.directives()?)
            .map_err(|e| AriError::config(format!("bad log filter: {}", e)))
    }

    /// Rolling appender for [`file`](Self::file), or `None` for stdout.
    pub fn file_appender(&self) -> AriResult<Option<RollingFileAppender>> {
        let Some(path) = &self.file else {
            return Ok(None);
        };
        let (dir, name) = split_log_path(path)?;
        RollingFileAppender::builder()
            .rotation(
                self.rotation
                    .to_appender(),
            )
            .filename_prefix(name)
            .max_log_files(self.max_files.max(1))
            .build(dir)
            .map(Some)
            .map_err(|e| AriError::config(format!("cannot open log file {}: {}", path.display(), e)))
    }

    /// Install the global subscriber.
    ///
    /// When logging to a file, the returned guard flushes the background
    /// writer on drop and must be held for the life of the process.
    pub fn init(&self) -> AriResult<Option<WorkerGuard>> {
        let filter = self.env_filter()?;
        match self.file_appender()? {
            None => {
                tracing_subscriber::fmt()
                    .with_env_filter(filter)
                    .try_init()
                    .map_err(|e| AriError::config(e.to_string()))?;
                Ok(None)
            }
            Some(appender) => {
                let (writer, guard) = tracing_appender::non_blocking(appender);
                tracing_subscriber::fmt()
                    .with_env_filter(filter)
                    .with_writer(writer)
                    .with_ansi(false)
                    .try_init()
                    .map_err(|e| AriError::config(e.to_string()))?;
                Ok(Some(guard))
            }
        }
    }
}

fn split_log_path(path: &Path) -> AriResult<(PathBuf, String)> {
    let name = path
        .file_name()
        .and_then(|n| n.to_str())
        .ok_or_else(|| AriError::config(format!("log file {} has no file name", path.display())))?;
    let dir = match path.parent() {
        Some(p) if !p
            .as_os_str()
            .is_empty() =>
        {
            p.to_path_buf()
        }
        _ => PathBuf::from("."),
    };
    Ok((dir, name.to_string()))
}
