// src/keywords/types.rs
use anyhow::Result;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Category used when the source row has none.
pub const DEFAULT_CATEGORY: &str = "GENERAL";

/// One validated search keyword. `priority` 1 is the highest.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Keyword {
    pub text: String,
    pub category: String,
    pub priority: u32,
    pub active: bool,
}

impl Keyword {
    pub fn new(text: impl Into<String>, category: impl Into<String>, priority: u32) -> Self {
        Self {
            text: text.into(),
            category: category.into(),
            priority: priority.max(1),
            active: true,
        }
    }
}

/// Which tier of the fallback chain produced a snapshot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SnapshotSource {
    Live,
    Cache,
    Default,
}

impl SnapshotSource {
    pub fn as_str(&self) -> &'static str {
        match self {
            SnapshotSource::Live => "LIVE",
            SnapshotSource::Cache => "CACHE",
            SnapshotSource::Default => "DEFAULT",
        }
    }
}

impl std::fmt::Display for SnapshotSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Immutable, ordered keyword list plus provenance. A new resolution builds a new snapshot.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct KeywordSnapshot {
    keywords: Vec<Keyword>,
    resolved_at: DateTime<Utc>,
    source: SnapshotSource,
}

impl KeywordSnapshot {
    /// `keywords` must already be deduplicated and priority-ordered.
    pub fn new(keywords: Vec<Keyword>, resolved_at: DateTime<Utc>, source: SnapshotSource) -> Self {
        Self {
            keywords,
            resolved_at,
            source,
        }
    }

    pub fn keywords(&self) -> &[Keyword] {
        &self.keywords
    }

    pub fn resolved_at(&self) -> DateTime<Utc> {
        self.resolved_at
    }

    pub fn source(&self) -> SnapshotSource {
        self.source
    }

    pub fn len(&self) -> usize {
        self.keywords.len()
    }

    pub fn is_empty(&self) -> bool {
        self.keywords.is_empty()
    }

    /// Same keywords and timestamp, different provenance tag.
    pub fn with_source(self, source: SnapshotSource) -> Self {
        Self { source, ..self }
    }
}

/// A row as read from the tabular source, before any coercion.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RawKeywordRow {
    pub keyword: String,
    pub category: Option<String>,
    pub priority: Option<String>,
    pub active: Option<String>,
}

impl RawKeywordRow {
    pub fn new(keyword: &str, category: &str, priority: &str, active: &str) -> Self {
        Self {
            keyword: keyword.to_string(),
            category: Some(category.to_string()),
            priority: Some(priority.to_string()),
            active: Some(active.to_string()),
        }
    }
}

/// Remote tabular keyword store.
///
/// An `Err` means the source could not be read (transport, auth, malformed table). A readable
/// table whose rows are all inactive is `Ok` with those rows.
#[async_trait::async_trait]
pub trait KeywordSourceBackend: Send + Sync {
    async fn fetch_rows(&self) -> Result<Vec<RawKeywordRow>>;
    fn name(&self) -> &'static str;
}
