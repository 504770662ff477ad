// src/providers/google_news.rs
use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use metrics::counter;
use quick_xml::de::from_str;
use serde::Deserialize;
use std::time::Duration;
use time::{format_description::well_known::Rfc2822, OffsetDateTime};

use crate::pipeline::{ArticleRef, NewsSearchClient};

pub const DEFAULT_ENDPOINT: &str = "https://news.google.com/rss/search";

#[derive(Debug, Deserialize)]
struct Rss {
    channel: Channel,
}
#[derive(Debug, Deserialize)]
struct Channel {
    #[serde(rename = "item", default)]
    item: Vec<Item>,
}
#[derive(Debug, Deserialize)]
struct Item {
    title: Option<String>,
    link: Option<String>,
    #[serde(rename = "pubDate")]
    pub_date: Option<String>,
    source: Option<ItemSource>,
}
#[derive(Debug, Deserialize)]
struct ItemSource {
    #[serde(rename = "$text")]
    name: Option<String>,
}

fn parse_rfc2822(ts: &str) -> Option<DateTime<Utc>> {
    let odt = OffsetDateTime::parse(ts.trim(), &Rfc2822).ok()?;
    DateTime::<Utc>::from_timestamp(odt.unix_timestamp(), 0)
}

/// Parse a Google News RSS document into candidates, feed order preserved.
///
/// Google appends " - Publisher" to every title; that suffix is removed when it matches the
/// item's `<source>`.
pub fn parse_feed(xml: &str) -> Result<Vec<ArticleRef>> {
    let xml_clean = scrub_html_entities_for_xml(xml);
    let rss: Rss = from_str(&xml_clean).context("parsing google news rss xml")?;

    let mut out = Vec::with_capacity(rss.channel.item.len());
    for it in rss.channel.item {
        let Some(url) = it.link.map(|l| l.trim().to_string()).filter(|l| !l.is_empty()) else {
            continue;
        };
        let source = it
            .source
            .and_then(|s| s.name)
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty());
        let mut title = html_escape::decode_html_entities(it.title.as_deref().unwrap_or_default())
            .trim()
            .to_string();
        if let Some(src) = &source {
            if let Some(stripped) = title.strip_suffix(&format!(" - {src}")) {
                title = stripped.trim_end().to_string();
            }
        }
        out.push(ArticleRef {
            url,
            title,
            published_at: it.pub_date.as_deref().and_then(parse_rfc2822),
            source,
        });
    }
    Ok(out)
}

/// Keyword search over the Google News RSS endpoint.
pub struct GoogleNewsSearch {
    endpoint: String,
    language: String,
    region: String,
    /// Appended to the query as Google's `when:` operator, e.g. `1d`.
    recency: Option<String>,
    client: reqwest::Client,
}

impl GoogleNewsSearch {
    pub fn new(timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder()
            .user_agent(concat!("daily-news-digest/", env!("CARGO_PKG_VERSION")))
            .timeout(timeout)
            .build()
            .context("building google news http client")?;
        Ok(Self {
            endpoint: DEFAULT_ENDPOINT.to_string(),
            language: "ko".into(),
            region: "KR".into(),
            recency: Some("1d".into()),
            client,
        })
    }

    pub fn with_endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.endpoint = endpoint.into();
        self
    }

    pub fn with_locale(mut self, language: &str, region: &str) -> Self {
        self.language = language.to_string();
        self.region = region.to_string();
        self
    }

    /// Recency operator derived from the search window in hours (`None` disables it).
    pub fn with_window_hours(mut self, hours: Option<u32>) -> Self {
        self.recency = hours.map(|h| {
            if h % 24 == 0 {
                format!("{}d", h / 24)
            } else {
                format!("{h}h")
            }
        });
        self
    }

    fn query(&self, keyword: &str) -> String {
        match &self.recency {
            Some(when) => format!("\"{keyword}\" when:{when}"),
            None => format!("\"{keyword}\""),
        }
    }
}

#[async_trait]
impl NewsSearchClient for GoogleNewsSearch {
    async fn search(&self, keyword: &str, _category: Option<&str>) -> Result<Vec<ArticleRef>> {
        let ceid = format!("{}:{}", self.region, self.language);
        let rsp = self
            .client
            .get(&self.endpoint)
            .query(&[
                ("q", self.query(keyword).as_str()),
                ("hl", self.language.as_str()),
                ("gl", self.region.as_str()),
                ("ceid", ceid.as_str()),
            ])
            .send()
            .await
            .map_err(|e| {
                counter!("search_provider_errors_total").increment(1);
                e
            })
            .context("google news get()")?
            .error_for_status()
            .context("google news non-2xx")?;
        let body = rsp.text().await.context("google news .text()")?;
        parse_feed(&body)
    }

    fn name(&self) -> &'static str {
        "google-news"
    }
}

fn scrub_html_entities_for_xml(s: &str) -> String {
    s.replace("&nbsp;", " ")
        .replace("&ndash;", "-")
        .replace("&mdash;", "-")
        .replace("&ldquo;", "\"")
        .replace("&rdquo;", "\"")
        .replace("&lsquo;", "'")
        .replace("&rsquo;", "'")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rfc2822_dates_parse_to_utc() {
        let dt = parse_rfc2822("Sun, 01 Jun 2025 21:05:00 GMT").unwrap();
        assert_eq!(dt.to_rfc3339(), "2025-06-01T21:05:00+00:00");
        assert!(parse_rfc2822("yesterday").is_none());
    }

    #[test]
    fn query_carries_recency_operator() {
        let s = GoogleNewsSearch::new(Duration::from_secs(1)).unwrap();
        assert_eq!(s.query("LLM"), "\"LLM\" when:1d");
        let s = s.with_window_hours(Some(6));
        assert_eq!(s.query("LLM"), "\"LLM\" when:6h");
        let s = s.with_window_hours(None);
        assert_eq!(s.query("LLM"), "\"LLM\"");
    }

    #[test]
    fn empty_channel_is_not_an_error() {
        let xml = r#"<rss version="2.0"><channel><title>x</title></channel></rss>"#;
        assert!(parse_feed(xml).unwrap().is_empty());
    }
}
