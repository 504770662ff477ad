// src/providers/file_publisher.rs
use anyhow::{Context, Result};
use async_trait::async_trait;
use std::path::PathBuf;
use tokio::fs;

use crate::pipeline::{render_markdown, ReportPublisher, RunReport};
use crate::schedule::state::write_json_replace;

/// Writes each report as `digest-<timestamp>.json` plus a Markdown rendering next to it.
/// The returned reference is the Markdown path.
pub struct FilePublisher {
    output_dir: PathBuf,
}

impl FilePublisher {
    pub fn new(output_dir: impl Into<PathBuf>) -> Self {
        Self {
            output_dir: output_dir.into(),
        }
    }
}

#[async_trait]
impl ReportPublisher for FilePublisher {
    async fn publish(&self, report: &RunReport) -> Result<String> {
        let stem = format!("digest-{}", report.triggered_at.format("%Y%m%dT%H%M%SZ"));
        fs::create_dir_all(&self.output_dir)
            .await
            .with_context(|| format!("creating {}", self.output_dir.display()))?;

        write_json_replace(&self.output_dir.join(format!("{stem}.json")), report).await?;

        let md_path = self.output_dir.join(format!("{stem}.md"));
        fs::write(&md_path, render_markdown(report))
            .await
            .with_context(|| format!("writing {}", md_path.display()))?;
        Ok(md_path.display().to_string())
    }

    fn name(&self) -> &'static str {
        "file"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::keywords::{KeywordSnapshot, SnapshotSource};
    use crate::pipeline::{Delivery, OverallStatus};
    use chrono::{TimeZone, Utc};

    #[tokio::test]
    async fn writes_json_and_markdown() {
        let dir = tempfile::tempdir().unwrap();
        let at = Utc.with_ymd_and_hms(2025, 6, 1, 22, 30, 0).unwrap();
        let report = RunReport {
            triggered_at: at,
            finished_at: Some(at),
            keyword_snapshot: KeywordSnapshot::new(vec![], at, SnapshotSource::Live),
            keywords: vec![],
            overall_status: OverallStatus::Success,
            cancelled: false,
            publish: Delivery::NotAttempted,
            notify: Delivery::NotAttempted,
        };
        let publisher = FilePublisher::new(dir.path().join("out"));
        let reference = publisher.publish(&report).await.unwrap();
        assert!(reference.ends_with("digest-20250601T223000Z.md"));

        let json = std::fs::read_to_string(dir.path().join("out/digest-20250601T223000Z.json")).unwrap();
        let back: RunReport = serde_json::from_str(&json).unwrap();
        assert_eq!(back, report);
        let md = std::fs::read_to_string(&reference).unwrap();
        assert!(md.starts_with("# News digest 2025-06-01"));
    }
}
