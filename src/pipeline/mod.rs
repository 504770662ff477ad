// src/pipeline/mod.rs
pub mod orchestrator;
pub mod report;
pub mod types;

pub use orchestrator::{
    Collaborators, PipelineOrchestrator, PipelineSettings, RunCancelled, StageTimeouts,
};
pub use report::{notification_message, render_markdown};
pub use types::{
    ArticleCrawler, ArticleRef, Artifact, CrawledArticle, Delivery, KeywordOutcome,
    NewsSearchClient, OverallStatus, ReportPublisher, RunReport, Stage, StageResult, StageStatus,
    Summarizer,
};
