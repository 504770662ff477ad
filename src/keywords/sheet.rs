// src/keywords/sheet.rs
//! Tabular keyword source: a spreadsheet exposed either as the Sheets `values` JSON document
//! or as a published CSV export.
//!
//! Columns are `keyword, category, priority, active`. A header row is optional: when the first
//! row names a `keyword` column, columns are mapped by header name and extra columns are
//! ignored; otherwise columns are taken by position.

use std::time::Duration;

use anyhow::{anyhow, bail, Context, Result};
use async_trait::async_trait;
use serde::Deserialize;

use super::types::{KeywordSourceBackend, RawKeywordRow};

#[derive(Debug, Deserialize)]
struct ValuesDoc {
    #[serde(default)]
    values: Vec<Vec<serde_json::Value>>,
}

/// Decode a response body into a grid of cells.
pub fn parse_table(body: &str) -> Result<Vec<Vec<String>>> {
    let trimmed = body.trim_start_matches('\u{feff}').trim();
    if trimmed.is_empty() {
        bail!("keyword source returned an empty body");
    }
    if trimmed.starts_with('{') {
        let doc: ValuesDoc = serde_json::from_str(trimmed).context("parsing sheet values json")?;
        return Ok(doc
            .values
            .into_iter()
            .map(|row| row.into_iter().map(cell_to_string).collect())
            .collect());
    }
    if trimmed.starts_with('<') {
        // Sign-in pages and error pages come back as HTML with a 200.
        bail!("keyword source returned HTML instead of a table");
    }
    parse_csv(trimmed)
}

fn cell_to_string(v: serde_json::Value) -> String {
    match v {
        serde_json::Value::String(s) => s,
        serde_json::Value::Null => String::new(),
        other => other.to_string(),
    }
}

/// CSV export into a grid. Rows may have differing lengths; the header is not interpreted here.
pub fn parse_csv(text: &str) -> Result<Vec<Vec<String>>> {
    let mut reader = csv::ReaderBuilder::new()
        .has_headers(false)
        .flexible(true)
        .from_reader(text.as_bytes());
    reader
        .records()
        .enumerate()
        .map(|(i, record)| {
            let record = record.with_context(|| format!("csv record {}", i + 1))?;
            Ok(record.iter().map(str::to_string).collect())
        })
        .collect()
}

#[derive(Debug, Clone, Copy)]
struct ColumnMap {
    keyword: usize,
    category: Option<usize>,
    priority: Option<usize>,
    active: Option<usize>,
}

impl ColumnMap {
    const POSITIONAL: ColumnMap = ColumnMap {
        keyword: 0,
        category: Some(1),
        priority: Some(2),
        active: Some(3),
    };

    fn from_header(header: &[String]) -> Option<ColumnMap> {
        let find = |name: &str| {
            header
                .iter()
                .position(|h| h.trim().eq_ignore_ascii_case(name))
        };
        Some(ColumnMap {
            keyword: find("keyword")?,
            category: find("category"),
            priority: find("priority"),
            active: find("active"),
        })
    }
}

/// Turn a grid into loosely-typed rows. Fails only when there is no table at all.
pub fn rows_from_table(table: Vec<Vec<String>>) -> Result<Vec<RawKeywordRow>> {
    let mut iter = table.into_iter().filter(|r| r.iter().any(|c| !c.trim().is_empty()));
    let first = iter
        .next()
        .ok_or_else(|| anyhow!("keyword source has no rows"))?;

    let (map, pending) = match ColumnMap::from_header(&first) {
        Some(map) => (map, None),
        None => (ColumnMap::POSITIONAL, Some(first)),
    };

    let cell = |row: &[String], idx: Option<usize>| idx.and_then(|i| row.get(i)).cloned();
    Ok(pending
        .into_iter()
        .chain(iter)
        .map(|row| RawKeywordRow {
            keyword: row.get(map.keyword).cloned().unwrap_or_default(),
            category: cell(&row, map.category),
            priority: cell(&row, map.priority),
            active: cell(&row, map.active),
        })
        .collect())
}

/// Reads the keyword table over HTTP.
pub struct HttpSheetBackend {
    url: String,
    client: reqwest::Client,
}

impl HttpSheetBackend {
    pub fn new(url: impl Into<String>, timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder()
            .user_agent(concat!("daily-news-digest/", env!("CARGO_PKG_VERSION")))
            .connect_timeout(Duration::from_secs(5))
            .timeout(timeout)
            .build()
            .context("building keyword source http client")?;
        Ok(Self {
            url: url.into(),
            client,
        })
    }
}

#[async_trait]
impl KeywordSourceBackend for HttpSheetBackend {
    async fn fetch_rows(&self) -> Result<Vec<RawKeywordRow>> {
        let body = self
            .client
            .get(&self.url)
            .send()
            .await
            .context("keyword source get")?
            .error_for_status()
            .context("keyword source non-2xx")?
            .text()
            .await
            .context("keyword source body")?;
        rows_from_table(parse_table(&body)?)
    }

    fn name(&self) -> &'static str {
        "http-sheet"
    }
}
