// src/providers/mod.rs
//! Thin adapters behind the pipeline's collaborator traits.

pub mod crawler;
pub mod file_publisher;
pub mod google_news;
pub mod openai;

pub use crawler::HttpArticleCrawler;
pub use file_publisher::FilePublisher;
pub use google_news::GoogleNewsSearch;
pub use openai::OpenAiSummarizer;
