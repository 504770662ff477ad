// src/keywords/resolver.rs
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use metrics::counter;

use super::cache::KeywordCache;
use super::defaults::default_keywords;
use super::types::{
    Keyword, KeywordSnapshot, KeywordSourceBackend, RawKeywordRow, SnapshotSource,
    DEFAULT_CATEGORY,
};

/// Resolves the keyword list for a run: live source, then cache, then the built-in list.
///
/// `resolve` never fails; the tier that served the result is recorded on the snapshot.
pub struct KeywordResolver {
    backend: Option<Arc<dyn KeywordSourceBackend>>,
    cache: Arc<KeywordCache>,
    fetch_timeout: Duration,
    max_cache_age: chrono::Duration,
    defaults: Vec<Keyword>,
}

impl KeywordResolver {
    /// `backend = None` means no source is configured; every resolution falls back.
    pub fn new(
        backend: Option<Arc<dyn KeywordSourceBackend>>,
        cache: Arc<KeywordCache>,
        fetch_timeout: Duration,
        max_cache_age: Duration,
    ) -> Self {
        Self {
            backend,
            cache,
            fetch_timeout,
            max_cache_age: chrono::Duration::from_std(max_cache_age)
                .unwrap_or(chrono::Duration::MAX),
            defaults: default_keywords(),
        }
    }

    /// Replace the built-in fallback list. An empty list is ignored.
    pub fn with_defaults(mut self, defaults: Vec<Keyword>) -> Self {
        if !defaults.is_empty() {
            self.defaults = defaults;
        }
        self
    }

    pub fn cache(&self) -> &Arc<KeywordCache> {
        &self.cache
    }

    pub async fn resolve(&self) -> KeywordSnapshot {
        self.resolve_at(Utc::now()).await
    }

    /// Same as `resolve`, with the clock supplied by the caller.
    pub async fn resolve_at(&self, now: DateTime<Utc>) -> KeywordSnapshot {
        match self.fetch_live().await {
            Ok(rows) => {
                let total = rows.len();
                let keywords = normalize_rows(rows);
                tracing::info!(
                    rows = total,
                    active = keywords.len(),
                    "keywords resolved from live source"
                );
                let snapshot = KeywordSnapshot::new(keywords, now, SnapshotSource::Live);
                self.cache.put(snapshot.clone()).await;
                counter!("keyword_resolutions_total", "source" => "live").increment(1);
                snapshot
            }
            Err(e) => {
                tracing::warn!("keyword source unavailable: {e:#}");
                self.fallback(now)
            }
        }
    }

    async fn fetch_live(&self) -> anyhow::Result<Vec<RawKeywordRow>> {
        let backend = self
            .backend
            .as_ref()
            .ok_or_else(|| anyhow::anyhow!("no keyword source configured"))?;
        match tokio::time::timeout(self.fetch_timeout, backend.fetch_rows()).await {
            Ok(res) => res,
            Err(_) => Err(anyhow::anyhow!(
                "{} timed out after {:?}",
                backend.name(),
                self.fetch_timeout
            )),
        }
    }

    fn fallback(&self, now: DateTime<Utc>) -> KeywordSnapshot {
        if let Some(cached) = self.cache.get() {
            let age = now.signed_duration_since(cached.resolved_at());
            if age <= self.max_cache_age {
                tracing::warn!(
                    keywords = cached.len(),
                    age_secs = age.num_seconds(),
                    "using cached keywords"
                );
                counter!("keyword_resolutions_total", "source" => "cache").increment(1);
                return cached.with_source(SnapshotSource::Cache);
            }
            tracing::warn!(
                age_secs = age.num_seconds(),
                max_age_secs = self.max_cache_age.num_seconds(),
                "cached keywords too old, ignoring"
            );
        }
        tracing::warn!(keywords = self.defaults.len(), "using built-in default keywords");
        counter!("keyword_resolutions_total", "source" => "default").increment(1);
        KeywordSnapshot::new(self.defaults.clone(), now, SnapshotSource::Default)
    }
}

/// Validate, filter, deduplicate and order raw rows.
///
/// - empty `keyword` text: row rejected;
/// - `active`: absent/blank means active, recognised yes-values mean active, anything else
///   (including unrecognised text) means inactive;
/// - `priority`: positive integer, otherwise the lowest tier in use (largest valid value);
/// - duplicates by (text, category) keep the smallest priority, at the first row's position;
/// - result sorted by priority, stable on row order.
pub fn normalize_rows(rows: Vec<RawKeywordRow>) -> Vec<Keyword> {
    struct Parsed {
        text: String,
        category: String,
        priority: Option<u32>,
    }

    let parsed: Vec<Parsed> = rows
        .into_iter()
        .filter_map(|row| {
            let text = row.keyword.trim().to_string();
            if text.is_empty() || !coerce_active(row.active.as_deref()) {
                return None;
            }
            let category = row
                .category
                .as_deref()
                .map(str::trim)
                .filter(|c| !c.is_empty())
                .unwrap_or(DEFAULT_CATEGORY)
                .to_string();
            Some(Parsed {
                text,
                category,
                priority: coerce_priority(row.priority.as_deref()),
            })
        })
        .collect();

    let lowest_tier = parsed.iter().filter_map(|p| p.priority).max().unwrap_or(1);

    let mut out: Vec<Keyword> = Vec::with_capacity(parsed.len());
    let mut seen: HashMap<(String, String), usize> = HashMap::new();
    for p in parsed {
        let priority = p.priority.unwrap_or(lowest_tier);
        match seen.get(&(p.text.clone(), p.category.clone())) {
            Some(&idx) => {
                let existing = &mut out[idx];
                existing.priority = existing.priority.min(priority);
            }
            None => {
                seen.insert((p.text.clone(), p.category.clone()), out.len());
                out.push(Keyword {
                    text: p.text,
                    category: p.category,
                    priority,
                    active: true,
                });
            }
        }
    }

    out.sort_by_key(|k| k.priority);
    out
}

fn coerce_active(v: Option<&str>) -> bool {
    let Some(raw) = v.map(str::trim) else {
        return true;
    };
    if raw.is_empty() {
        return true;
    }
    matches!(
        raw.to_uppercase().as_str(),
        "TRUE" | "T" | "1" | "YES" | "Y" | "ON" | "참" | "활성"
    )
}

fn coerce_priority(v: Option<&str>) -> Option<u32> {
    let raw = v?.trim();
    if let Ok(n) = raw.parse::<u32>() {
        return (n >= 1).then_some(n);
    }
    // Spreadsheets sometimes export whole numbers as "2.0".
    let f: f64 = raw.parse().ok()?;
    (f.fract() == 0.0 && f >= 1.0 && f <= u32::MAX as f64).then_some(f as u32)
}
