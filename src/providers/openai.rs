// src/providers/openai.rs
//! Summarizer over an OpenAI-compatible chat completions endpoint.

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::keywords::Keyword;
use crate::pipeline::{CrawledArticle, Summarizer};

pub const DEFAULT_ENDPOINT: &str = "https://api.openai.com/v1/chat/completions";
pub const DEFAULT_MODEL: &str = "gpt-4o-mini";

/// Per-article body budget inside the prompt, in characters.
const ARTICLE_PROMPT_CHARS: usize = 1_000;

const SYSTEM_PROMPT: &str = "You are a news editor writing a daily digest. \
Summarize the articles for the given keyword in Korean, 3-5 bullet points, \
factual and neutral, no speculation. Output only the bullet points.";

pub struct OpenAiSummarizer {
    http: reqwest::Client,
    endpoint: String,
    api_key: String,
    model: String,
    temperature: f32,
    max_tokens: u32,
}

impl OpenAiSummarizer {
    pub fn new(api_key: impl Into<String>, model: Option<&str>, timeout: Duration) -> Result<Self> {
        let http = reqwest::Client::builder()
            .user_agent(concat!("daily-news-digest/", env!("CARGO_PKG_VERSION")))
            .connect_timeout(Duration::from_secs(4))
            .timeout(timeout)
            .build()
            .context("building openai http client")?;
        Ok(Self {
            http,
            endpoint: DEFAULT_ENDPOINT.to_string(),
            api_key: api_key.into(),
            model: model.unwrap_or(DEFAULT_MODEL).to_string(),
            temperature: 0.3,
            max_tokens: 800,
        })
    }

    pub fn with_endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.endpoint = endpoint.into();
        self
    }
}

/// User message: keyword header followed by numbered articles, each body clipped.
pub fn build_prompt(keyword: &Keyword, articles: &[CrawledArticle]) -> String {
    let mut prompt = format!(
        "Keyword: {} (category {})\n\n",
        keyword.text, keyword.category
    );
    for (i, a) in articles.iter().enumerate() {
        let body: String = a.text.chars().take(ARTICLE_PROMPT_CHARS).collect();
        prompt.push_str(&format!("[{}] {}\n", i + 1, a.article.title));
        if let Some(src) = &a.article.source {
            prompt.push_str(&format!("Source: {src}\n"));
        }
        prompt.push_str(&body);
        prompt.push_str("\n\n");
    }
    prompt
}

#[derive(Serialize)]
struct Msg<'a> {
    role: &'a str,
    content: &'a str,
}
#[derive(Serialize)]
struct Req<'a> {
    model: &'a str,
    messages: Vec<Msg<'a>>,
    temperature: f32,
    max_tokens: u32,
}
#[derive(Deserialize)]
struct Resp {
    choices: Vec<Choice>,
}
#[derive(Deserialize)]
struct Choice {
    message: ChoiceMsg,
}
#[derive(Deserialize)]
struct ChoiceMsg {
    content: Option<String>,
}

#[async_trait]
impl Summarizer for OpenAiSummarizer {
    async fn summarize(&self, keyword: &Keyword, articles: &[CrawledArticle]) -> Result<String> {
        if self.api_key.is_empty() {
            bail!("OPENAI_API_KEY is not set");
        }
        let user = build_prompt(keyword, articles);
        let req = Req {
            model: &self.model,
            messages: vec![
                Msg {
                    role: "system",
                    content: SYSTEM_PROMPT,
                },
                Msg {
                    role: "user",
                    content: &user,
                },
            ],
            temperature: self.temperature,
            max_tokens: self.max_tokens,
        };

        let resp = self
            .http
            .post(&self.endpoint)
            .bearer_auth(&self.api_key)
            .json(&req)
            .send()
            .await
            .context("openai post")?;
        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            let snippet: String = body.chars().take(200).collect();
            bail!("openai returned {status}: {snippet}");
        }
        let body: Resp = resp.json().await.context("openai response json")?;
        let content = body
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .unwrap_or_default();
        Ok(content.trim().to_string())
    }

    fn name(&self) -> &'static str {
        "openai"
    }
}
