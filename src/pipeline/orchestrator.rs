// src/pipeline/orchestrator.rs
//! Drives SEARCH → CRAWL → SUMMARIZE per keyword, then publish and notify.
//!
//! Keywords run concurrently up to `concurrency`; each keyword's stages run in sequence and
//! each stage only starts if the previous one succeeded. Results land in a slot indexed by the
//! keyword's position in the snapshot, so the report keeps priority order regardless of
//! completion order.

use std::collections::HashSet;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use chrono::{DateTime, Utc};
use futures::stream::{self, StreamExt};
use futures::FutureExt;
use metrics::{counter, describe_counter, describe_gauge, gauge};
use once_cell::sync::OnceCell;
use tokio::sync::watch;

use super::report::notification_message;
use super::types::{
    ArticleCrawler, ArticleRef, Artifact, CrawledArticle, Delivery, KeywordOutcome,
    NewsSearchClient, OverallStatus, ReportPublisher, RunReport, Stage, StageResult, Summarizer,
};
use crate::error::StageErrorKind;
use crate::keywords::{Keyword, KeywordSnapshot};
use crate::notify::Notifier;

/// Bounded wait for each collaborator call.
#[derive(Debug, Clone, Copy)]
pub struct StageTimeouts {
    pub search: Duration,
    pub crawl: Duration,
    pub summarize: Duration,
    pub publish: Duration,
    pub notify: Duration,
}

impl Default for StageTimeouts {
    fn default() -> Self {
        Self {
            search: Duration::from_secs(20),
            crawl: Duration::from_secs(30),
            summarize: Duration::from_secs(60),
            publish: Duration::from_secs(30),
            notify: Duration::from_secs(15),
        }
    }
}

#[derive(Debug, Clone)]
pub struct PipelineSettings {
    pub concurrency: usize,
    pub max_articles_per_keyword: usize,
    /// Drop candidates published longer ago than this. `None` keeps everything.
    pub search_window: Option<chrono::Duration>,
    pub min_article_chars: usize,
    pub max_article_chars: usize,
    pub timeouts: StageTimeouts,
    /// Publish and notify what finished when a run is cancelled, instead of discarding it.
    pub publish_partial_on_cancel: bool,
}

impl Default for PipelineSettings {
    fn default() -> Self {
        Self {
            concurrency: 3,
            max_articles_per_keyword: 10,
            search_window: Some(chrono::Duration::hours(24)),
            min_article_chars: 100,
            max_article_chars: 10_000,
            timeouts: StageTimeouts::default(),
            publish_partial_on_cancel: false,
        }
    }
}

/// The external collaborators one orchestrator talks to.
#[derive(Clone)]
pub struct Collaborators {
    pub search: Arc<dyn NewsSearchClient>,
    pub crawler: Arc<dyn ArticleCrawler>,
    pub summarizer: Arc<dyn Summarizer>,
    pub publisher: Arc<dyn ReportPublisher>,
    pub notifier: Arc<dyn Notifier>,
}

/// Returned when a run was cancelled and partial publishing is off.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("run cancelled after {completed} of {total} keywords; report discarded")]
pub struct RunCancelled {
    pub completed: usize,
    pub total: usize,
}

fn ensure_metrics_described() {
    static ONCE: OnceCell<()> = OnceCell::new();
    ONCE.get_or_init(|| {
        describe_counter!("pipeline_runs_total", "Pipeline runs by overall status.");
        describe_counter!(
            "pipeline_stage_failures_total",
            "Failed per-keyword stages, by stage."
        );
        describe_gauge!(
            "pipeline_last_run_keywords",
            "Keyword count of the most recent run."
        );
    });
}

pub struct PipelineOrchestrator {
    collab: Collaborators,
    settings: PipelineSettings,
}

impl PipelineOrchestrator {
    pub fn new(collab: Collaborators, settings: PipelineSettings) -> Self {
        Self { collab, settings }
    }

    pub fn settings(&self) -> &PipelineSettings {
        &self.settings
    }

    /// Run to completion with no cancellation source.
    pub async fn run(&self, snapshot: KeywordSnapshot) -> RunReport {
        let triggered_at = Utc::now();
        let (slots, _) = self.run_stages(&snapshot, None).await;
        self.finish(snapshot, slots, false, triggered_at).await
    }

    /// Run until done or until `cancel` turns `true`.
    ///
    /// On cancellation the in-flight keyword tasks are dropped, which cancels their pending
    /// collaborator calls. The partial report is discarded unless
    /// `publish_partial_on_cancel` is set.
    pub async fn run_cancellable(
        &self,
        snapshot: KeywordSnapshot,
        triggered_at: DateTime<Utc>,
        cancel: watch::Receiver<bool>,
    ) -> Result<RunReport, RunCancelled> {
        let (slots, cancelled) = self.run_stages(&snapshot, Some(cancel)).await;
        if cancelled {
            let completed = slots.iter().filter(|s| s.is_some()).count();
            let total = slots.len();
            tracing::warn!(completed, total, "pipeline run cancelled");
            if !self.settings.publish_partial_on_cancel {
                return Err(RunCancelled { completed, total });
            }
        }
        Ok(self.finish(snapshot, slots, cancelled, triggered_at).await)
    }

    /// Fan keywords out over the worker stream. Returns one slot per snapshot keyword and
    /// whether the run was cancelled before every slot filled.
    async fn run_stages(
        &self,
        snapshot: &KeywordSnapshot,
        mut cancel: Option<watch::Receiver<bool>>,
    ) -> (Vec<Option<KeywordOutcome>>, bool) {
        ensure_metrics_described();
        let total = snapshot.len();
        tracing::info!(
            keywords = total,
            source = %snapshot.source(),
            concurrency = self.settings.concurrency,
            "pipeline run starting"
        );

        let mut slots: Vec<Option<KeywordOutcome>> = vec![None; total];
        let mut tasks = stream::iter(snapshot.keywords().iter().cloned().enumerate())
            .map(|(idx, kw)| async move { (idx, self.process_keyword_guarded(kw).await) })
            .buffer_unordered(self.settings.concurrency.max(1));

        loop {
            tokio::select! {
                biased;
                _ = wait_cancelled(cancel.as_mut()) => return (slots, true),
                next = tasks.next() => match next {
                    Some((idx, outcome)) => slots[idx] = Some(outcome),
                    None => return (slots, false),
                }
            }
        }
    }

    /// Assemble the report, then publish and notify. Unfilled slots become CANCELLED.
    async fn finish(
        &self,
        snapshot: KeywordSnapshot,
        slots: Vec<Option<KeywordOutcome>>,
        cancelled: bool,
        triggered_at: DateTime<Utc>,
    ) -> RunReport {
        let total = slots.len();
        let outcomes: Vec<KeywordOutcome> = slots
            .into_iter()
            .zip(snapshot.keywords())
            .map(|(slot, kw)| {
                slot.unwrap_or_else(|| {
                    KeywordOutcome::aborted(kw, StageErrorKind::Cancelled, "run cancelled")
                })
            })
            .collect();

        let overall_status = OverallStatus::from_outcomes(&outcomes);
        let mut report = RunReport {
            triggered_at,
            finished_at: Some(Utc::now()),
            keyword_snapshot: snapshot,
            keywords: outcomes,
            overall_status,
            cancelled,
            publish: Delivery::NotAttempted,
            notify: Delivery::NotAttempted,
        };

        counter!("pipeline_runs_total", "status" => overall_status.as_str()).increment(1);
        gauge!("pipeline_last_run_keywords").set(total as f64);
        tracing::info!(
            status = %overall_status,
            succeeded = report.succeeded_keywords(),
            failed_stages = report.failed_stage_count(),
            "pipeline stages finished"
        );

        let published = with_timeout(
            self.settings.timeouts.publish,
            self.collab.publisher.publish(&report),
        )
        .await;
        report.publish = match published {
            Ok(reference) => {
                tracing::info!(publisher = self.collab.publisher.name(), %reference, "report published");
                Delivery::Delivered {
                    reference: Some(reference),
                }
            }
            Err((_, e)) => {
                tracing::error!(publisher = self.collab.publisher.name(), "publish failed: {e}");
                Delivery::Failed { error: e }
            }
        };

        let message = notification_message(&report);
        let notified = with_timeout(
            self.settings.timeouts.notify,
            self.collab.notifier.send(&message),
        )
        .await;
        report.notify = match notified {
            Ok(()) => Delivery::Delivered { reference: None },
            Err((_, e)) => {
                tracing::error!(notifier = self.collab.notifier.name(), "notify failed: {e}");
                Delivery::Failed { error: e }
            }
        };

        report
    }

    /// Runs one keyword's stages. A panic is charged to the stage that was in progress: it is
    /// recorded FAILED with `Panicked` and the later stages SKIPPED, like any other failure.
    async fn process_keyword_guarded(&self, keyword: Keyword) -> KeywordOutcome {
        let done = Mutex::new(Vec::with_capacity(Stage::ALL.len()));
        let result = AssertUnwindSafe(self.process_keyword(&keyword, &done))
            .catch_unwind()
            .await;
        let stages = done.into_inner().unwrap_or_else(PoisonError::into_inner);

        match result {
            Ok(Ok(())) => KeywordOutcome { keyword, stages },
            Ok(Err(failed)) => self.fail_at(keyword, stages, failed),
            Err(_) => match Stage::ALL.get(stages.len()) {
                Some(&stage) => {
                    tracing::error!(keyword = %keyword.text, %stage, "stage panicked");
                    let failed = StageResult::failed(
                        &keyword,
                        stage,
                        StageErrorKind::Panicked,
                        format!("{stage} panicked"),
                    );
                    self.fail_at(keyword, stages, failed)
                }
                None => KeywordOutcome { keyword, stages },
            },
        }
    }

    /// Completed stages are pushed to `done` as they finish; the first failing stage is
    /// returned as the error.
    async fn process_keyword(
        &self,
        keyword: &Keyword,
        done: &Mutex<Vec<StageResult>>,
    ) -> Result<(), StageResult> {
        let push = |r: StageResult| done.lock().unwrap_or_else(PoisonError::into_inner).push(r);

        // SEARCH
        let candidates = self.search_stage(keyword).await?;
        push(StageResult::ok(
            keyword,
            Stage::Search,
            Artifact::Candidates {
                articles: candidates.clone(),
            },
        ));

        // CRAWL
        let (crawled, dropped) = self.crawl_stage(keyword, &candidates).await?;
        push(StageResult::ok(
            keyword,
            Stage::Crawl,
            Artifact::Crawled {
                articles: crawled.iter().map(|c| c.article.clone()).collect(),
                dropped,
            },
        ));

        // SUMMARIZE
        let text = self.summarize_stage(keyword, &crawled).await?;
        tracing::info!(keyword = %keyword.text, articles = crawled.len(), "keyword summarized");
        push(StageResult::ok(
            keyword,
            Stage::Summarize,
            Artifact::Summary { text },
        ));
        Ok(())
    }

    /// Record the failed stage and mark the remaining ones SKIPPED.
    fn fail_at(
        &self,
        keyword: Keyword,
        mut stages: Vec<StageResult>,
        failed: StageResult,
    ) -> KeywordOutcome {
        tracing::warn!(
            keyword = %keyword.text,
            category = %keyword.category,
            stage = %failed.stage,
            error_kind = failed.error_kind.map(|k| k.as_str()).unwrap_or("unknown"),
            error = failed.error.as_deref().unwrap_or(""),
            "stage failed"
        );
        counter!("pipeline_stage_failures_total", "stage" => failed.stage.as_str()).increment(1);
        let failed_stage = failed.stage;
        stages.push(failed);
        for stage in Stage::ALL.iter().skip_while(|s| **s != failed_stage).skip(1) {
            stages.push(StageResult::skipped(&keyword, *stage));
        }
        KeywordOutcome { keyword, stages }
    }

    async fn search_stage(&self, keyword: &Keyword) -> Result<Vec<ArticleRef>, StageResult> {
        let found = with_timeout(
            self.settings.timeouts.search,
            self.collab
                .search
                .search(&keyword.text, Some(keyword.category.as_str())),
        )
        .await
        .map_err(|(kind, e)| StageResult::failed(keyword, Stage::Search, kind, e))?;

        let raw = found.len();
        let kept = select_candidates(found, Utc::now(), &self.settings);
        tracing::debug!(keyword = %keyword.text, raw, kept = kept.len(), "search done");
        if kept.is_empty() {
            return Err(StageResult::failed(
                keyword,
                Stage::Search,
                StageErrorKind::NoResults,
                format!("no usable articles ({raw} returned)"),
            ));
        }
        Ok(kept)
    }

    /// Crawls one candidate at a time; failures and too-short bodies are dropped and counted.
    async fn crawl_stage(
        &self,
        keyword: &Keyword,
        candidates: &[ArticleRef],
    ) -> Result<(Vec<CrawledArticle>, usize), StageResult> {
        let mut crawled = Vec::with_capacity(candidates.len());
        let mut dropped = 0usize;
        let mut last_error = String::new();

        for article in candidates {
            match with_timeout(
                self.settings.timeouts.crawl,
                self.collab.crawler.crawl(&article.url),
            )
            .await
            {
                Ok(text) => match fit_length(&text, &self.settings) {
                    Some(text) => crawled.push(CrawledArticle {
                        article: article.clone(),
                        text,
                    }),
                    None => {
                        dropped += 1;
                        last_error = format!("{} too short", article.url);
                    }
                },
                Err((_, e)) => {
                    tracing::debug!(keyword = %keyword.text, url = %article.url, "crawl failed: {e}");
                    dropped += 1;
                    last_error = e;
                }
            }
        }

        if crawled.is_empty() {
            return Err(StageResult::failed(
                keyword,
                Stage::Crawl,
                StageErrorKind::AllCrawlsFailed,
                format!("all {dropped} crawls failed; last: {last_error}"),
            ));
        }
        Ok((crawled, dropped))
    }

    async fn summarize_stage(
        &self,
        keyword: &Keyword,
        crawled: &[CrawledArticle],
    ) -> Result<String, StageResult> {
        let text = with_timeout(
            self.settings.timeouts.summarize,
            self.collab.summarizer.summarize(keyword, crawled),
        )
        .await
        .map_err(|(kind, e)| StageResult::failed(keyword, Stage::Summarize, kind, e))?;

        let text = text.trim().to_string();
        if text.is_empty() {
            return Err(StageResult::failed(
                keyword,
                Stage::Summarize,
                StageErrorKind::Failed,
                "summarizer returned an empty summary".into(),
            ));
        }
        Ok(text)
    }
}

/// Recency window, URL dedup and per-keyword cap, in that order.
pub fn select_candidates(
    found: Vec<ArticleRef>,
    now: DateTime<Utc>,
    settings: &PipelineSettings,
) -> Vec<ArticleRef> {
    let mut seen = HashSet::new();
    found
        .into_iter()
        .filter(|a| !a.url.trim().is_empty())
        .filter(|a| match (settings.search_window, a.published_at) {
            (Some(window), Some(published)) => now.signed_duration_since(published) <= window,
            _ => true,
        })
        .filter(|a| seen.insert(a.url.clone()))
        .take(settings.max_articles_per_keyword)
        .collect()
}

/// `None` when the body is too short; otherwise the body truncated to the maximum length.
fn fit_length(text: &str, settings: &PipelineSettings) -> Option<String> {
    let text = text.trim();
    let chars = text.chars().count();
    if chars < settings.min_article_chars {
        return None;
    }
    if chars > settings.max_article_chars {
        return Some(text.chars().take(settings.max_article_chars).collect());
    }
    Some(text.to_string())
}

/// Await `fut` for at most `limit`, flattening timeout and error into (kind, message).
async fn with_timeout<T, F>(limit: Duration, fut: F) -> Result<T, (StageErrorKind, String)>
where
    F: Future<Output = anyhow::Result<T>>,
{
    match tokio::time::timeout(limit, fut).await {
        Ok(Ok(v)) => Ok(v),
        Ok(Err(e)) => Err((StageErrorKind::Failed, format!("{e:#}"))),
        Err(_) => Err((StageErrorKind::Timeout, format!("timed out after {limit:?}"))),
    }
}

/// Resolves once the flag is `true`. Without a receiver, or once the sender is dropped,
/// cancellation can no longer happen and the future stays pending.
async fn wait_cancelled(rx: Option<&mut watch::Receiver<bool>>) {
    let Some(rx) = rx else {
        return std::future::pending::<()>().await;
    };
    loop {
        if *rx.borrow_and_update() {
            return;
        }
        if rx.changed().await.is_err() {
            std::future::pending::<()>().await;
        }
    }
}
