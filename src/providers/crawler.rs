// src/providers/crawler.rs
use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use once_cell::sync::Lazy;
use regex::Regex;
use scraper::{ElementRef, Html, Selector};
use std::time::Duration;

use crate::pipeline::ArticleCrawler;

/// Tried in order; generic article containers first, then the news sites' own classes.
const CONTENT_SELECTORS: &[&str] = &[
    "article",
    ".article-content",
    ".news-content",
    ".post-content",
    ".entry-content",
    "#content",
    ".article-body",
    ".news-body",
    ".article_view",
    ".view_con",
    ".news_text",
    ".article_txt",
    ".news_detail_text",
    ".content",
    ".main-content",
    ".article",
    ".post",
];

/// Subtrees dropped before collecting text. `header` is handled separately so an article's
/// own headline survives.
const BOILERPLATE: &str = "script, style, noscript, template, nav, footer, aside, form, \
    iframe, svg, figure, .advertisement, .ad, .ads, .social-share, .related-articles, \
    .comment, .navigation, .breadcrumb, .tag, .share, .print";

/// A container with at least this much text is taken as the article.
const MIN_SCOPE_CHARS: usize = 200;

const BLOCK_TAGS: &[&str] = &[
    "p", "div", "br", "h1", "h2", "h3", "h4", "h5", "h6", "li", "ul", "ol", "section",
    "article", "header", "main", "blockquote", "pre", "table", "tr", "dd", "dt", "figcaption",
];

static RE_SPACES: Lazy<Regex> = Lazy::new(|| Regex::new(r" {2,}").unwrap());

fn is_boilerplate(el: ElementRef<'_>, boilerplate: &Selector) -> bool {
    if boilerplate.matches(&el) {
        return true;
    }
    el.value().name() == "header"
        && !el
            .ancestors()
            .filter_map(ElementRef::wrap)
            .any(|a| a.value().name() == "article")
}

/// Text of `el`'s subtree with boilerplate pruned; block elements start and end a line.
fn collect_text(el: ElementRef<'_>, boilerplate: &Selector, out: &mut String) {
    for child in el.children() {
        if let Some(child_el) = ElementRef::wrap(child) {
            if is_boilerplate(child_el, boilerplate) {
                continue;
            }
            let block = BLOCK_TAGS.contains(&child_el.value().name());
            if block {
                out.push('\n');
            }
            collect_text(child_el, boilerplate, out);
            if block {
                out.push('\n');
            }
        } else if let Some(text) = child.value().as_text() {
            out.extend(text.chars().map(|c| if c.is_whitespace() { ' ' } else { c }));
        }
    }
}

fn element_text(el: ElementRef<'_>, boilerplate: &Selector) -> String {
    let mut raw = String::new();
    collect_text(el, boilerplate, &mut raw);
    raw.replace(['\u{200B}', '\u{FEFF}'], "")
        .lines()
        .map(|line| RE_SPACES.replace_all(line, " ").trim().to_string())
        .filter(|line| !line.is_empty())
        .collect::<Vec<_>>()
        .join("\n")
}

/// Reduce an HTML page to its readable text, one paragraph per line.
///
/// The first content container holding enough text wins; otherwise the longest of the
/// containers and `<body>` is used.
pub fn html_to_text(html: &str) -> String {
    let doc = Html::parse_document(html);
    let boilerplate = Selector::parse(BOILERPLATE).unwrap();

    let mut best = String::new();
    let scopes = CONTENT_SELECTORS.iter().chain(std::iter::once(&"body"));
    for sel in scopes {
        let sel = Selector::parse(sel).unwrap();
        let Some(el) = doc.select(&sel).next() else {
            continue;
        };
        let text = element_text(el, &boilerplate);
        if text.chars().count() >= MIN_SCOPE_CHARS {
            return text;
        }
        if text.chars().count() > best.chars().count() {
            best = text;
        }
    }
    if best.is_empty() {
        best = element_text(doc.root_element(), &boilerplate);
    }
    best
}

/// Fetches article pages over HTTP and extracts their text.
pub struct HttpArticleCrawler {
    client: reqwest::Client,
}

impl HttpArticleCrawler {
    pub fn new(timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder()
            .user_agent(concat!("daily-news-digest/", env!("CARGO_PKG_VERSION")))
            .timeout(timeout)
            .build()
            .context("building crawler http client")?;
        Ok(Self { client })
    }
}

#[async_trait]
impl ArticleCrawler for HttpArticleCrawler {
    async fn crawl(&self, url: &str) -> Result<String> {
        let rsp = self
            .client
            .get(url)
            .send()
            .await
            .with_context(|| format!("crawl get {url}"))?
            .error_for_status()
            .with_context(|| format!("crawl non-2xx {url}"))?;

        let is_html = rsp
            .headers()
            .get(reqwest::header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .map(|ct| ct.contains("html") || ct.starts_with("text/"))
            .unwrap_or(true);
        if !is_html {
            bail!("{url} is not an html page");
        }

        let body = rsp.text().await.context("crawl .text()")?;
        let text = html_to_text(&body);
        tracing::debug!(url, chars = text.chars().count(), "crawled");
        Ok(text)
    }

    fn name(&self) -> &'static str {
        "http"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn article_element_wins_over_page_chrome() {
        let html = r#"<html><head><style>p{}</style></head><body>
            <nav>Home | News</nav>
            <article><h1>Title</h1><p>First&nbsp;paragraph &amp; more.</p>
            <script>track()</script><p>Second   paragraph.</p></article>
            <footer>(c) site</footer></body></html>"#;
        assert_eq!(
            html_to_text(html),
            "Title\nFirst paragraph & more.\nSecond paragraph."
        );
    }

    #[test]
    fn falls_back_to_body() {
        let html = "<body><!-- ad --><div>Only<br>text</div></body>";
        assert_eq!(html_to_text(html), "Only\ntext");
    }

    #[test]
    fn nested_article_keeps_the_rest_of_the_story() {
        let html = "<body><article><p>Lead paragraph.</p>\
            <article><p>Related teaser</p></article>\
            <p>Main story continues here.</p></article></body>";
        assert_eq!(
            html_to_text(html),
            "Lead paragraph.\nRelated teaser\nMain story continues here."
        );
    }

    #[test]
    fn markup_inside_attributes_does_not_leak() {
        let html = r#"<article><p>See <a title="a > b" href="/x">this link</a> now.</p></article>"#;
        assert_eq!(html_to_text(html), "See this link now.");
    }

    #[test]
    fn article_headline_survives_but_page_header_does_not() {
        let html = "<body><header>Site menu</header>\
            <article><header><h1>Headline</h1></header><p>Body.</p></article></body>";
        assert_eq!(html_to_text(html), "Headline\nBody.");
    }

    #[test]
    fn long_site_container_beats_body() {
        let para = "Sentence of article text. ".repeat(12);
        let html = format!(
            "<body><div class=\"promo\">Subscribe now</div>\
             <div class=\"view_con\"><p>{para}</p><div class=\"share\">Share</div></div></body>"
        );
        assert_eq!(html_to_text(&html), para.trim());
    }
}
