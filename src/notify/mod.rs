// src/notify/mod.rs
//! Run-summary notifications. A failed delivery is logged and never affects the run.

pub mod slack;
pub mod telegram;

use std::sync::Arc;

use anyhow::{bail, Result};

pub use slack::SlackNotifier;
pub use telegram::TelegramNotifier;

#[async_trait::async_trait]
pub trait Notifier: Send + Sync {
    /// Deliver one short human-readable message.
    async fn send(&self, message: &str) -> Result<()>;
    fn name(&self) -> &'static str;
}

/// Fans a message out to every configured channel.
///
/// `send` succeeds if at least one channel accepted the message (or none is configured, in
/// which case the message is only logged).
#[derive(Clone, Default)]
pub struct NotifierMux {
    channels: Vec<Arc<dyn Notifier>>,
}

impl NotifierMux {
    pub fn new(channels: Vec<Arc<dyn Notifier>>) -> Self {
        Self { channels }
    }

    pub fn push(&mut self, channel: Arc<dyn Notifier>) {
        self.channels.push(channel);
    }

    pub fn is_empty(&self) -> bool {
        self.channels.is_empty()
    }
}

#[async_trait::async_trait]
impl Notifier for NotifierMux {
    async fn send(&self, message: &str) -> Result<()> {
        if self.channels.is_empty() {
            tracing::info!(target: "notify", "no notification channel configured:\n{message}");
            return Ok(());
        }
        let mut failures = Vec::new();
        for ch in &self.channels {
            match ch.send(message).await {
                Ok(()) => tracing::debug!(target: "notify", channel = ch.name(), "delivered"),
                Err(e) => {
                    tracing::warn!(target: "notify", channel = ch.name(), "delivery failed: {e:#}");
                    failures.push(format!("{}: {e:#}", ch.name()));
                }
            }
        }
        if failures.len() == self.channels.len() {
            bail!("all notification channels failed: {}", failures.join("; "));
        }
        Ok(())
    }

    fn name(&self) -> &'static str {
        "mux"
    }
}
