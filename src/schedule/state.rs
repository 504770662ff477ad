// src/schedule/state.rs
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::fs;

use crate::pipeline::types::OverallStatus;

/// Scheduler bookkeeping that survives restarts.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SchedulerState {
    pub last_fired: Option<DateTime<Utc>>,
    pub last_completed: Option<DateTime<Utc>>,
    pub last_status: Option<OverallStatus>,
    #[serde(default)]
    pub execution_count: u64,
    #[serde(default)]
    pub success_count: u64,
}

impl SchedulerState {
    /// Runs that ended SUCCESS or PARTIAL over all started runs, as a percentage.
    pub fn success_rate(&self) -> f64 {
        if self.execution_count == 0 {
            0.0
        } else {
            self.success_count as f64 / self.execution_count as f64 * 100.0
        }
    }
}

/// JSON file holding one `SchedulerState`. `None` path means in-memory only.
#[derive(Debug, Clone)]
pub struct StateStore {
    path: Option<PathBuf>,
}

impl StateStore {
    pub fn new(path: Option<PathBuf>) -> Self {
        Self { path }
    }

    pub fn in_memory() -> Self {
        Self { path: None }
    }

    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    /// Missing or unreadable state is treated as "never ran".
    pub async fn load(&self) -> SchedulerState {
        let Some(path) = &self.path else {
            return SchedulerState::default();
        };
        match fs::read_to_string(path).await {
            Ok(s) => serde_json::from_str(&s).unwrap_or_else(|e| {
                tracing::warn!(path = %path.display(), "scheduler state unreadable, starting fresh: {e}");
                SchedulerState::default()
            }),
            Err(_) => SchedulerState::default(),
        }
    }

    pub async fn save(&self, state: &SchedulerState) -> Result<()> {
        let Some(path) = &self.path else {
            return Ok(());
        };
        write_json_replace(path, state).await
    }
}

/// Write JSON next to `path` and rename over it, so readers see the old or new file only.
pub(crate) async fn write_json_replace<T: Serialize>(path: &Path, value: &T) -> Result<()> {
    if let Some(dir) = path.parent().filter(|d| !d.as_os_str().is_empty()) {
        fs::create_dir_all(dir)
            .await
            .with_context(|| format!("creating {}", dir.display()))?;
    }
    let body = serde_json::to_vec_pretty(value).context("serializing state")?;
    let tmp = path.with_extension("json.tmp");
    fs::write(&tmp, body)
        .await
        .with_context(|| format!("writing {}", tmp.display()))?;
    fs::rename(&tmp, path)
        .await
        .with_context(|| format!("replacing {}", path.display()))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[tokio::test]
    async fn roundtrips_through_disk() {
        let dir = tempfile::tempdir().unwrap();
        let store = StateStore::new(Some(dir.path().join("nested/scheduler.json")));
        assert_eq!(store.load().await, SchedulerState::default());

        let st = SchedulerState {
            last_fired: Some(Utc.with_ymd_and_hms(2025, 3, 1, 22, 30, 2).unwrap()),
            last_completed: None,
            last_status: Some(OverallStatus::Partial),
            execution_count: 4,
            success_count: 3,
        };
        store.save(&st).await.unwrap();
        assert_eq!(store.load().await, st);
        assert!((st.success_rate() - 75.0).abs() < f64::EPSILON);
    }

    #[tokio::test]
    async fn garbage_file_means_fresh_state() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("scheduler.json");
        std::fs::write(&path, "{not json").unwrap();
        let store = StateStore::new(Some(path));
        assert_eq!(store.load().await, SchedulerState::default());
    }
}
