// src/pipeline/report.rs
//! Human-readable renderings of a run report.

use std::fmt::Write as _;

use super::types::{Artifact, Delivery, RunReport, StageStatus};
use crate::keywords::SnapshotSource;

/// Markdown body of the published digest.
pub fn render_markdown(report: &RunReport) -> String {
    let mut out = String::new();
    let date = report.triggered_at.format("%Y-%m-%d");
    let _ = writeln!(out, "# News digest {date}");
    let _ = writeln!(out);
    let _ = writeln!(
        out,
        "- Status: **{}** ({}/{} keywords)",
        report.overall_status,
        report.succeeded_keywords(),
        report.keywords.len()
    );
    let _ = writeln!(out, "- Keyword source: {}", report.keyword_snapshot.source());
    let _ = writeln!(out, "- Triggered: {}", report.triggered_at.to_rfc3339());
    if report.cancelled {
        let _ = writeln!(out, "- Run was cancelled; unfinished keywords are marked skipped");
    }

    for outcome in &report.keywords {
        let kw = &outcome.keyword;
        let _ = writeln!(out);
        let _ = writeln!(out, "## {} ({}, priority {})", kw.text, kw.category, kw.priority);
        let _ = writeln!(out);

        match outcome.summary() {
            Some(summary) => {
                let _ = writeln!(out, "{summary}");
                let articles = outcome.crawled_articles();
                if !articles.is_empty() {
                    let _ = writeln!(out);
                    let _ = writeln!(out, "Sources:");
                    for a in articles {
                        match &a.source {
                            Some(src) => {
                                let _ = writeln!(out, "- [{}]({}) ({src})", a.title, a.url);
                            }
                            None => {
                                let _ = writeln!(out, "- [{}]({})", a.title, a.url);
                            }
                        }
                    }
                }
            }
            None => {
                for r in &outcome.stages {
                    let mark = match r.status {
                        StageStatus::Ok => "ok",
                        StageStatus::Skipped => "skipped",
                        StageStatus::Failed => "FAILED",
                    };
                    let detail = match (&r.error_kind, &r.error) {
                        (Some(kind), Some(msg)) => format!(" ({kind}: {msg})"),
                        _ => match &r.artifact {
                            Some(Artifact::Candidates { articles }) => {
                                format!(" ({} candidates)", articles.len())
                            }
                            Some(Artifact::Crawled { articles, dropped }) => {
                                format!(" ({} crawled, {dropped} dropped)", articles.len())
                            }
                            _ => String::new(),
                        },
                    };
                    let _ = writeln!(out, "- {}: {mark}{detail}", r.stage);
                }
            }
        }
    }
    out
}

/// Short message for the notifier: status, counts, fallback tier, and where the report went.
pub fn notification_message(report: &RunReport) -> String {
    let mut msg = format!(
        "📰 Daily news digest {}: {}\nKeywords: {} ({} summarized)\nFailed stages: {}",
        report.triggered_at.format("%Y-%m-%d"),
        report.overall_status,
        report.keywords.len(),
        report.succeeded_keywords(),
        report.failed_stage_count()
    );
    match report.keyword_snapshot.source() {
        SnapshotSource::Live => {}
        SnapshotSource::Cache => msg.push_str("\nKeyword source unavailable; used cached keywords"),
        SnapshotSource::Default => {
            msg.push_str("\nKeyword source unavailable; used default keywords")
        }
    }
    if report.cancelled {
        msg.push_str("\nRun was cancelled before finishing");
    }
    match &report.publish {
        Delivery::Delivered {
            reference: Some(r),
        } => {
            let _ = write!(msg, "\nReport: {r}");
        }
        Delivery::Failed { error } => {
            let _ = write!(msg, "\nPublishing failed: {error}");
        }
        _ => {}
    }
    msg
}
