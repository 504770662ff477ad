// src/pipeline/types.rs
use anyhow::Result;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::StageErrorKind;
use crate::keywords::{Keyword, KeywordSnapshot};

// ------------------------------------------------------------
// Collaborator seams
// ------------------------------------------------------------

/// A candidate article returned by search.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArticleRef {
    pub url: String,
    pub title: String,
    pub published_at: Option<DateTime<Utc>>,
    pub source: Option<String>,
}

/// An article whose body was fetched and cleaned.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CrawledArticle {
    pub article: ArticleRef,
    pub text: String,
}

#[async_trait::async_trait]
pub trait NewsSearchClient: Send + Sync {
    /// Candidate articles for one keyword, newest first when the backend knows the order.
    async fn search(&self, keyword: &str, category: Option<&str>) -> Result<Vec<ArticleRef>>;
    fn name(&self) -> &'static str;
}

#[async_trait::async_trait]
pub trait ArticleCrawler: Send + Sync {
    /// Full article text for `url`.
    async fn crawl(&self, url: &str) -> Result<String>;
    fn name(&self) -> &'static str;
}

#[async_trait::async_trait]
pub trait Summarizer: Send + Sync {
    async fn summarize(&self, keyword: &Keyword, articles: &[CrawledArticle]) -> Result<String>;
    fn name(&self) -> &'static str;
}

#[async_trait::async_trait]
pub trait ReportPublisher: Send + Sync {
    /// Persist the report; returns a reference (URL, path, page id).
    async fn publish(&self, report: &RunReport) -> Result<String>;
    fn name(&self) -> &'static str;
}

// ------------------------------------------------------------
// Run report
// ------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Stage {
    Search,
    Crawl,
    Summarize,
}

impl Stage {
    pub const ALL: [Stage; 3] = [Stage::Search, Stage::Crawl, Stage::Summarize];

    pub fn as_str(&self) -> &'static str {
        match self {
            Stage::Search => "SEARCH",
            Stage::Crawl => "CRAWL",
            Stage::Summarize => "SUMMARIZE",
        }
    }
}

impl std::fmt::Display for Stage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum StageStatus {
    Ok,
    Skipped,
    Failed,
}

/// What a successful stage produced.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Artifact {
    Candidates { articles: Vec<ArticleRef> },
    Crawled { articles: Vec<ArticleRef>, dropped: usize },
    Summary { text: String },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StageResult {
    pub keyword: Keyword,
    pub stage: Stage,
    pub status: StageStatus,
    pub error_kind: Option<StageErrorKind>,
    pub error: Option<String>,
    pub artifact: Option<Artifact>,
}

impl StageResult {
    pub fn ok(keyword: &Keyword, stage: Stage, artifact: Artifact) -> Self {
        Self {
            keyword: keyword.clone(),
            stage,
            status: StageStatus::Ok,
            error_kind: None,
            error: None,
            artifact: Some(artifact),
        }
    }

    pub fn failed(keyword: &Keyword, stage: Stage, kind: StageErrorKind, error: String) -> Self {
        Self {
            keyword: keyword.clone(),
            stage,
            status: StageStatus::Failed,
            error_kind: Some(kind),
            error: Some(error),
            artifact: None,
        }
    }

    pub fn skipped(keyword: &Keyword, stage: Stage) -> Self {
        Self {
            keyword: keyword.clone(),
            stage,
            status: StageStatus::Skipped,
            error_kind: None,
            error: None,
            artifact: None,
        }
    }
}

/// The three stage results of one keyword, in SEARCH, CRAWL, SUMMARIZE order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct KeywordOutcome {
    pub keyword: Keyword,
    pub stages: Vec<StageResult>,
}

impl KeywordOutcome {
    pub fn stage(&self, stage: Stage) -> Option<&StageResult> {
        self.stages.iter().find(|r| r.stage == stage)
    }

    /// Reached SUMMARIZE:OK.
    pub fn succeeded(&self) -> bool {
        self.stage(Stage::Summarize)
            .is_some_and(|r| r.status == StageStatus::Ok)
    }

    pub fn summary(&self) -> Option<&str> {
        match self.stage(Stage::Summarize)?.artifact.as_ref()? {
            Artifact::Summary { text } => Some(text.as_str()),
            _ => None,
        }
    }

    /// Articles that made it into the summary input.
    pub fn crawled_articles(&self) -> &[ArticleRef] {
        match self.stage(Stage::Crawl).and_then(|r| r.artifact.as_ref()) {
            Some(Artifact::Crawled { articles, .. }) => articles.as_slice(),
            _ => &[],
        }
    }

    /// Every stage marked SKIPPED with the given reason, for a keyword that never ran.
    pub fn aborted(keyword: &Keyword, kind: StageErrorKind, error: &str) -> Self {
        let stages = Stage::ALL
            .iter()
            .map(|s| {
                let mut r = StageResult::skipped(keyword, *s);
                r.error_kind = Some(kind);
                r.error = Some(error.to_string());
                r
            })
            .collect();
        Self {
            keyword: keyword.clone(),
            stages,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OverallStatus {
    Success,
    Partial,
    Failed,
}

impl OverallStatus {
    /// SUCCESS when every keyword summarized (vacuously for an empty list), FAILED when none
    /// did, PARTIAL otherwise.
    pub fn from_outcomes(outcomes: &[KeywordOutcome]) -> Self {
        let ok = outcomes.iter().filter(|o| o.succeeded()).count();
        if ok == outcomes.len() {
            OverallStatus::Success
        } else if ok == 0 {
            OverallStatus::Failed
        } else {
            OverallStatus::Partial
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            OverallStatus::Success => "SUCCESS",
            OverallStatus::Partial => "PARTIAL",
            OverallStatus::Failed => "FAILED",
        }
    }
}

impl std::fmt::Display for OverallStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Result of a publish or notify attempt.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum Delivery {
    NotAttempted,
    Delivered { reference: Option<String> },
    Failed { error: String },
}

/// Aggregate of one pipeline invocation. Never reused across runs.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunReport {
    pub triggered_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
    pub keyword_snapshot: KeywordSnapshot,
    /// One entry per snapshot keyword, in snapshot (priority) order.
    pub keywords: Vec<KeywordOutcome>,
    pub overall_status: OverallStatus,
    /// Set when the run was interrupted and published with partial progress.
    #[serde(default)]
    pub cancelled: bool,
    pub publish: Delivery,
    pub notify: Delivery,
}

impl RunReport {
    /// All stage results, keyword priority order first, then stage order.
    pub fn stage_results(&self) -> impl Iterator<Item = &StageResult> {
        self.keywords.iter().flat_map(|o| o.stages.iter())
    }

    pub fn failed_stage_count(&self) -> usize {
        self.stage_results()
            .filter(|r| r.status == StageStatus::Failed)
            .count()
    }

    pub fn succeeded_keywords(&self) -> usize {
        self.keywords.iter().filter(|o| o.succeeded()).count()
    }

    pub fn publish_reference(&self) -> Option<&str> {
        match &self.publish {
            Delivery::Delivered { reference } => reference.as_deref(),
            _ => None,
        }
    }
}
