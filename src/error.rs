// src/error.rs
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Startup-only configuration failures. Any of these refuses to start the process.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid timezone identifier `{0}`")]
    InvalidTimezone(String),

    #[error("invalid trigger time `{0}` (expected HH:MM, 00:00..23:59)")]
    InvalidTriggerTime(String),

    #[error("missing required configuration value `{0}`")]
    Missing(&'static str),

    #[error("invalid value for `{key}`: {reason}")]
    InvalidValue { key: &'static str, reason: String },

    #[error("reading config file {path}: {source}")]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("parsing config file {path}: {source}")]
    Parse {
        path: String,
        #[source]
        source: toml::de::Error,
    },
}

/// Classification of a failed or skipped stage, stored on `StageResult`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StageErrorKind {
    /// The collaborator did not answer within its bounded timeout.
    Timeout,
    /// The collaborator returned an error.
    Failed,
    /// Search returned no usable candidates.
    NoResults,
    /// Every candidate article failed to crawl (or was too short).
    AllCrawlsFailed,
    /// The run was cancelled before this stage finished.
    Cancelled,
    /// The keyword task panicked.
    Panicked,
}

impl StageErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            StageErrorKind::Timeout => "timeout",
            StageErrorKind::Failed => "failed",
            StageErrorKind::NoResults => "no_results",
            StageErrorKind::AllCrawlsFailed => "all_crawls_failed",
            StageErrorKind::Cancelled => "cancelled",
            StageErrorKind::Panicked => "panicked",
        }
    }
}

impl std::fmt::Display for StageErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}
