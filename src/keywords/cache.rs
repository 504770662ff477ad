// src/keywords/cache.rs
use std::path::PathBuf;
use std::sync::{Arc, RwLock};

use tokio::fs;

use super::types::KeywordSnapshot;
use crate::schedule::state::write_json_replace;

/// Holds the last successfully resolved snapshot.
///
/// The slot stores an `Arc` and is swapped whole under a short write lock, so a reader gets
/// either the previous or the new snapshot, never a mix. Staleness is the resolver's call.
#[derive(Debug, Default)]
pub struct KeywordCache {
    slot: RwLock<Option<Arc<KeywordSnapshot>>>,
    disk: Option<PathBuf>,
}

impl KeywordCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Disk-backed cache; the file is read now and rewritten on every `put`.
    /// A missing or unreadable file starts the cache empty.
    pub async fn with_disk(path: PathBuf) -> Self {
        let initial = match fs::read_to_string(&path).await {
            Ok(s) => match serde_json::from_str::<KeywordSnapshot>(&s) {
                Ok(snap) => {
                    tracing::info!(
                        path = %path.display(),
                        keywords = snap.len(),
                        resolved_at = %snap.resolved_at(),
                        "keyword cache loaded from disk"
                    );
                    Some(Arc::new(snap))
                }
                Err(e) => {
                    tracing::warn!(path = %path.display(), "keyword cache file unreadable: {e}");
                    None
                }
            },
            Err(_) => None,
        };
        Self {
            slot: RwLock::new(initial),
            disk: Some(path),
        }
    }

    pub fn get(&self) -> Option<KeywordSnapshot> {
        let guard = self.slot.read().unwrap_or_else(|e| e.into_inner());
        guard.as_deref().cloned()
    }

    /// Replace the held snapshot. Disk persistence is best-effort and never fails the caller.
    pub async fn put(&self, snapshot: KeywordSnapshot) {
        let fresh = Arc::new(snapshot);
        {
            let mut guard = self.slot.write().unwrap_or_else(|e| e.into_inner());
            *guard = Some(Arc::clone(&fresh));
        }
        if let Some(path) = &self.disk {
            if let Err(e) = write_json_replace(path, fresh.as_ref()).await {
                tracing::warn!(path = %path.display(), "keyword cache write failed: {e:#}");
            }
        }
    }
}
