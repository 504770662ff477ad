// src/config/mod.rs
//! Process configuration: TOML file, then environment overrides, then validation.
//!
//! Lookup order for the file:
//! 1) $DIGEST_CONFIG_PATH (must exist)
//! 2) config/digest.toml
//! 3) built-in defaults

use serde::{Deserialize, Serialize};
use std::env;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::error::ConfigError;
use crate::pipeline::{PipelineSettings, StageTimeouts};
use crate::schedule::anchor::TriggerSpec;
use crate::schedule::MissedTriggerPolicy;

pub const ENV_CONFIG_PATH: &str = "DIGEST_CONFIG_PATH";
const DEFAULT_CONFIG_PATH: &str = "config/digest.toml";

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub schedule: ScheduleConfig,
    pub keywords: KeywordsConfig,
    pub pipeline: PipelineConfig,
    pub summarizer: SummarizerConfig,
    pub publisher: PublisherConfig,
    pub notify: NotifyConfig,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ScheduleConfig {
    pub timezone: String,
    /// Local wall-clock time, `HH:MM`.
    pub time: String,
    pub check_interval_secs: u64,
    pub missed_trigger: MissedTriggerPolicy,
    pub state_path: Option<PathBuf>,
}

impl Default for ScheduleConfig {
    fn default() -> Self {
        Self {
            timezone: "Asia/Seoul".into(),
            time: "07:30".into(),
            check_interval_secs: 5,
            missed_trigger: MissedTriggerPolicy::Skip,
            state_path: Some(PathBuf::from("state/scheduler.json")),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct KeywordsConfig {
    /// Sheet export URL (CSV or Sheets values JSON). Absent means the source is unavailable.
    pub source_url: Option<String>,
    pub fetch_timeout_secs: u64,
    pub cache_path: Option<PathBuf>,
    pub max_cache_age_secs: u64,
}

impl Default for KeywordsConfig {
    fn default() -> Self {
        Self {
            source_url: None,
            fetch_timeout_secs: 10,
            cache_path: Some(PathBuf::from("state/keywords.json")),
            max_cache_age_secs: 86_400,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    pub concurrency: usize,
    pub max_articles_per_keyword: usize,
    /// 0 disables the recency window.
    pub search_window_hours: u32,
    pub min_article_chars: usize,
    pub max_article_chars: usize,
    pub search_timeout_secs: u64,
    pub crawl_timeout_secs: u64,
    pub summarize_timeout_secs: u64,
    pub publish_timeout_secs: u64,
    pub notify_timeout_secs: u64,
    pub publish_partial_on_cancel: bool,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            concurrency: 3,
            max_articles_per_keyword: 10,
            search_window_hours: 24,
            min_article_chars: 100,
            max_article_chars: 10_000,
            search_timeout_secs: 20,
            crawl_timeout_secs: 30,
            summarize_timeout_secs: 60,
            publish_timeout_secs: 30,
            notify_timeout_secs: 15,
            publish_partial_on_cancel: false,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SummarizerConfig {
    pub model: String,
    pub endpoint: Option<String>,
    /// "ENV" means: read from OPENAI_API_KEY
    pub api_key: Option<String>,
}

impl Default for SummarizerConfig {
    fn default() -> Self {
        Self {
            model: crate::providers::openai::DEFAULT_MODEL.into(),
            endpoint: None,
            api_key: Some("ENV".into()),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PublisherConfig {
    pub output_dir: PathBuf,
}

impl Default for PublisherConfig {
    fn default() -> Self {
        Self {
            output_dir: PathBuf::from("reports"),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct NotifyConfig {
    pub telegram: Option<TelegramConfig>,
    pub slack: Option<SlackConfig>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TelegramConfig {
    pub bot_token: String,
    pub chat_id: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SlackConfig {
    pub webhook_url: String,
}

impl AppConfig {
    pub fn load_from(path: &Path) -> Result<Self, ConfigError> {
        let data = fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.display().to_string(),
            source,
        })?;
        toml::from_str(&data).map_err(|source| ConfigError::Parse {
            path: path.display().to_string(),
            source,
        })
    }

    /// File lookup per the module docs; no overrides applied.
    pub fn load_default() -> Result<Self, ConfigError> {
        if let Some(p) = env_nonempty(ENV_CONFIG_PATH) {
            return Self::load_from(Path::new(&p));
        }
        let p = PathBuf::from(DEFAULT_CONFIG_PATH);
        if p.exists() {
            return Self::load_from(&p);
        }
        Ok(Self::default())
    }

    /// File, env overrides and validation in one go.
    pub fn load() -> Result<ValidatedConfig, ConfigError> {
        let mut cfg = Self::load_default()?;
        cfg.apply_env_overrides()?;
        cfg.validate()
    }

    /// Environment wins over the file. Empty variables are ignored.
    pub fn apply_env_overrides(&mut self) -> Result<(), ConfigError> {
        if let Some(v) = env_nonempty("DIGEST_TIMEZONE") {
            self.schedule.timezone = v;
        }
        if let Some(v) = env_nonempty("DIGEST_SCHEDULE_TIME") {
            self.schedule.time = v;
        }
        if let Some(v) = env_nonempty("DIGEST_KEYWORD_SOURCE_URL") {
            self.keywords.source_url = Some(v);
        }
        if let Some(v) = env_nonempty("DIGEST_MISSED_TRIGGER_POLICY") {
            self.schedule.missed_trigger =
                v.parse()
                    .map_err(|reason| ConfigError::InvalidValue {
                        key: "DIGEST_MISSED_TRIGGER_POLICY",
                        reason,
                    })?;
        }
        if let Some(v) = env_nonempty("DIGEST_CONCURRENCY") {
            self.pipeline.concurrency =
                v.trim()
                    .parse()
                    .map_err(|e| ConfigError::InvalidValue {
                        key: "DIGEST_CONCURRENCY",
                        reason: format!("{v:?}: {e}"),
                    })?;
        }

        // "ENV" placeholder or absent key both fall back to OPENAI_API_KEY.
        let wants_env = self
            .summarizer
            .api_key
            .as_deref()
            .map(|k| k.trim().eq_ignore_ascii_case("env") || k.trim().is_empty())
            .unwrap_or(true);
        if wants_env {
            self.summarizer.api_key = env_nonempty("OPENAI_API_KEY");
        }

        let token = env_nonempty("TELEGRAM_BOT_TOKEN");
        let chat = env_nonempty("TELEGRAM_CHAT_ID");
        if token.is_some() || chat.is_some() {
            let tg = self.notify.telegram.get_or_insert_with(TelegramConfig::default);
            if let Some(t) = token {
                tg.bot_token = t;
            }
            if let Some(c) = chat {
                tg.chat_id = c;
            }
        }
        if let Some(url) = env_nonempty("SLACK_WEBHOOK_URL") {
            self.notify.slack = Some(SlackConfig { webhook_url: url });
        }
        Ok(())
    }

    pub fn validate(self) -> Result<ValidatedConfig, ConfigError> {
        let trigger = TriggerSpec::parse(&self.schedule.time, &self.schedule.timezone)?;

        if !(1..=59).contains(&self.schedule.check_interval_secs) {
            return Err(invalid(
                "schedule.check_interval_secs",
                format!("{} is outside 1..=59", self.schedule.check_interval_secs),
            ));
        }
        if self.keywords.fetch_timeout_secs == 0 {
            return Err(invalid("keywords.fetch_timeout_secs", "must be positive"));
        }
        if let Some(url) = &self.keywords.source_url {
            if !(url.starts_with("http://") || url.starts_with("https://")) {
                return Err(invalid(
                    "keywords.source_url",
                    format!("{url:?} is not an http(s) URL"),
                ));
            }
        }
        let p = &self.pipeline;
        if p.concurrency == 0 {
            return Err(invalid("pipeline.concurrency", "must be at least 1"));
        }
        if p.max_articles_per_keyword == 0 {
            return Err(invalid("pipeline.max_articles_per_keyword", "must be at least 1"));
        }
        if p.max_article_chars == 0 || p.min_article_chars > p.max_article_chars {
            return Err(invalid(
                "pipeline.max_article_chars",
                format!(
                    "need 0 < min_article_chars ({}) <= max_article_chars ({})",
                    p.min_article_chars, p.max_article_chars
                ),
            ));
        }
        for (key, secs) in [
            ("pipeline.search_timeout_secs", p.search_timeout_secs),
            ("pipeline.crawl_timeout_secs", p.crawl_timeout_secs),
            ("pipeline.summarize_timeout_secs", p.summarize_timeout_secs),
            ("pipeline.publish_timeout_secs", p.publish_timeout_secs),
            ("pipeline.notify_timeout_secs", p.notify_timeout_secs),
        ] {
            if secs == 0 {
                return Err(invalid(key, "must be positive"));
            }
        }
        if let Some(tg) = &self.notify.telegram {
            if tg.bot_token.trim().is_empty() {
                return Err(ConfigError::Missing("notify.telegram.bot_token"));
            }
            if tg.chat_id.trim().is_empty() {
                return Err(ConfigError::Missing("notify.telegram.chat_id"));
            }
        }

        Ok(ValidatedConfig {
            config: self,
            trigger,
        })
    }
}

/// Configuration that passed validation, with the trigger already parsed.
#[derive(Debug, Clone)]
pub struct ValidatedConfig {
    pub config: AppConfig,
    pub trigger: TriggerSpec,
}

impl ValidatedConfig {
    pub fn check_interval(&self) -> Duration {
        Duration::from_secs(self.config.schedule.check_interval_secs)
    }

    /// Only the commands that summarize need the key.
    pub fn require_summarizer_key(&self) -> Result<&str, ConfigError> {
        self.config
            .summarizer
            .api_key
            .as_deref()
            .filter(|k| !k.trim().is_empty())
            .ok_or(ConfigError::Missing("summarizer.api_key (OPENAI_API_KEY)"))
    }

    pub fn pipeline_settings(&self) -> PipelineSettings {
        let p = &self.config.pipeline;
        PipelineSettings {
            concurrency: p.concurrency,
            max_articles_per_keyword: p.max_articles_per_keyword,
            search_window: (p.search_window_hours > 0)
                .then(|| chrono::Duration::hours(i64::from(p.search_window_hours))),
            min_article_chars: p.min_article_chars,
            max_article_chars: p.max_article_chars,
            timeouts: StageTimeouts {
                search: Duration::from_secs(p.search_timeout_secs),
                crawl: Duration::from_secs(p.crawl_timeout_secs),
                summarize: Duration::from_secs(p.summarize_timeout_secs),
                publish: Duration::from_secs(p.publish_timeout_secs),
                notify: Duration::from_secs(p.notify_timeout_secs),
            },
            publish_partial_on_cancel: p.publish_partial_on_cancel,
        }
    }
}

fn invalid(key: &'static str, reason: impl Into<String>) -> ConfigError {
    ConfigError::InvalidValue {
        key,
        reason: reason.into(),
    }
}

fn env_nonempty(key: &str) -> Option<String> {
    env::var(key).ok().filter(|v| !v.trim().is_empty())
}
