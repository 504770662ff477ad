// src/app.rs
//! Builds the production object graph from a validated config.

use anyhow::{Context, Result};
use std::sync::Arc;
use std::time::Duration;

use crate::config::ValidatedConfig;
use crate::keywords::sheet::HttpSheetBackend;
use crate::keywords::{KeywordCache, KeywordResolver, KeywordSourceBackend};
use crate::notify::{Notifier, NotifierMux, SlackNotifier, TelegramNotifier};
use crate::pipeline::{Collaborators, PipelineOrchestrator};
use crate::providers::{FilePublisher, GoogleNewsSearch, HttpArticleCrawler, OpenAiSummarizer};
use crate::schedule::anchor::TimeAnchor;
use crate::schedule::state::StateStore;
use crate::schedule::{DigestJob, Scheduler};

pub fn keyword_backend(cfg: &ValidatedConfig) -> Result<Option<Arc<dyn KeywordSourceBackend>>> {
    let k = &cfg.config.keywords;
    match &k.source_url {
        Some(url) => {
            let backend =
                HttpSheetBackend::new(url.clone(), Duration::from_secs(k.fetch_timeout_secs))?;
            Ok(Some(Arc::new(backend)))
        }
        None => Ok(None),
    }
}

pub async fn keyword_resolver(cfg: &ValidatedConfig) -> Result<KeywordResolver> {
    let k = &cfg.config.keywords;
    let cache = match &k.cache_path {
        Some(path) => KeywordCache::with_disk(path.clone()).await,
        None => KeywordCache::new(),
    };
    if k.source_url.is_none() {
        tracing::warn!("no keyword source configured; runs will use cached or default keywords");
    }
    Ok(KeywordResolver::new(
        keyword_backend(cfg)?,
        Arc::new(cache),
        Duration::from_secs(k.fetch_timeout_secs),
        Duration::from_secs(k.max_cache_age_secs),
    ))
}

pub fn notifier(cfg: &ValidatedConfig) -> NotifierMux {
    let n = &cfg.config.notify;
    let timeout = cfg.config.pipeline.notify_timeout_secs;
    let mut mux = NotifierMux::default();
    if let Some(tg) = &n.telegram {
        mux.push(Arc::new(
            TelegramNotifier::new(&tg.bot_token, tg.chat_id.clone()).with_timeout(timeout),
        ));
    }
    if let Some(slack) = &n.slack {
        mux.push(Arc::new(
            SlackNotifier::new(slack.webhook_url.clone()).with_timeout(timeout),
        ));
    }
    if mux.is_empty() {
        tracing::info!("no notification channel configured; summaries go to the log only");
    }
    mux
}

pub fn orchestrator(cfg: &ValidatedConfig) -> Result<PipelineOrchestrator> {
    let settings = cfg.pipeline_settings();
    let p = &cfg.config.pipeline;
    let s = &cfg.config.summarizer;

    let search = GoogleNewsSearch::new(Duration::from_secs(p.search_timeout_secs))?
        .with_window_hours((p.search_window_hours > 0).then_some(p.search_window_hours));
    let crawler = HttpArticleCrawler::new(Duration::from_secs(p.crawl_timeout_secs))?;

    let api_key = cfg.require_summarizer_key().context("summarizer")?;
    let mut summarizer = OpenAiSummarizer::new(
        api_key,
        Some(s.model.as_str()),
        Duration::from_secs(p.summarize_timeout_secs),
    )?;
    if let Some(endpoint) = &s.endpoint {
        summarizer = summarizer.with_endpoint(endpoint.clone());
    }

    let notifier: Arc<dyn Notifier> = Arc::new(notifier(cfg));
    let collab = Collaborators {
        search: Arc::new(search),
        crawler: Arc::new(crawler),
        summarizer: Arc::new(summarizer),
        publisher: Arc::new(FilePublisher::new(cfg.config.publisher.output_dir.clone())),
        notifier,
    };
    Ok(PipelineOrchestrator::new(collab, settings))
}

pub fn state_store(cfg: &ValidatedConfig) -> StateStore {
    StateStore::new(cfg.config.schedule.state_path.clone())
}

pub fn time_anchor(cfg: &ValidatedConfig) -> Result<TimeAnchor> {
    Ok(TimeAnchor::new(cfg.trigger.clone())?)
}

pub async fn scheduler(cfg: &ValidatedConfig) -> Result<Scheduler> {
    let resolver = Arc::new(keyword_resolver(cfg).await?);
    let orchestrator = Arc::new(orchestrator(cfg)?);
    Ok(Scheduler::new(
        time_anchor(cfg)?,
        Arc::new(DigestJob::new(resolver, orchestrator)),
        state_store(cfg),
        cfg.config.schedule.missed_trigger,
        cfg.check_interval(),
    ))
}
