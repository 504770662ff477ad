// src/lib.rs
// Public library surface for the binary and integration tests.

pub mod app;
pub mod cli;
pub mod config;
pub mod error;
pub mod keywords;
pub mod notify;
pub mod pipeline;
pub mod providers;
pub mod schedule;

// ---- Re-exports for stable public API ----
pub use crate::config::{AppConfig, ValidatedConfig};
pub use crate::error::{ConfigError, StageErrorKind};
pub use crate::keywords::{Keyword, KeywordResolver, KeywordSnapshot, SnapshotSource};
pub use crate::pipeline::{OverallStatus, PipelineOrchestrator, RunReport};
pub use crate::schedule::anchor::{TimeAnchor, TriggerSpec};
pub use crate::schedule::{MissedTriggerPolicy, Scheduler};
