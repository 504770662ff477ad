// src/schedule/mod.rs
//! Daily trigger loop.
//!
//! The loop checks the anchor every `check_interval` and hands a due run to its own task, so
//! ticking never waits on pipeline work. A RUNNING flag refuses a second concurrent run; the
//! recorded `last_fired` instant refuses a second run within the same trigger period.

pub mod anchor;
pub mod state;

use std::str::FromStr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use chrono::{DateTime, Utc};
use metrics::{counter, describe_counter, describe_gauge, gauge};
use once_cell::sync::OnceCell;
use serde::{Deserialize, Serialize};
use tokio::sync::{watch, Mutex};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

use crate::keywords::KeywordResolver;
use crate::pipeline::{OverallStatus, PipelineOrchestrator};
use anchor::TimeAnchor;
use state::{SchedulerState, StateStore};

/// What to do at startup when the current period's trigger passed while the process was down.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum MissedTriggerPolicy {
    /// Wait for the next trigger.
    #[default]
    Skip,
    /// Run once immediately if today's trigger (local date) was missed.
    CatchUp,
}

impl FromStr for MissedTriggerPolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "skip" => Ok(Self::Skip),
            "catch-up" | "catch_up" | "catchup" => Ok(Self::CatchUp),
            other => Err(format!("unknown missed-trigger policy `{other}` (skip | catch-up)")),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SchedulerPhase {
    Idle,
    Running,
}

/// Work started by the scheduler at each trigger.
#[async_trait::async_trait]
pub trait ScheduledJob: Send + Sync + 'static {
    async fn run(
        &self,
        triggered_at: DateTime<Utc>,
        cancel: watch::Receiver<bool>,
    ) -> Result<OverallStatus>;
}

/// The production job: resolve keywords, then run the pipeline.
pub struct DigestJob {
    resolver: Arc<KeywordResolver>,
    orchestrator: Arc<PipelineOrchestrator>,
}

impl DigestJob {
    pub fn new(resolver: Arc<KeywordResolver>, orchestrator: Arc<PipelineOrchestrator>) -> Self {
        Self {
            resolver,
            orchestrator,
        }
    }
}

#[async_trait::async_trait]
impl ScheduledJob for DigestJob {
    async fn run(
        &self,
        triggered_at: DateTime<Utc>,
        cancel: watch::Receiver<bool>,
    ) -> Result<OverallStatus> {
        let snapshot = self.resolver.resolve().await;
        let report = self
            .orchestrator
            .run_cancellable(snapshot, triggered_at, cancel)
            .await?;
        Ok(report.overall_status)
    }
}

pub type Clock = Arc<dyn Fn() -> DateTime<Utc> + Send + Sync>;

fn ensure_metrics_described() {
    static ONCE: OnceCell<()> = OnceCell::new();
    ONCE.get_or_init(|| {
        describe_counter!("scheduler_runs_total", "Scheduled runs by outcome.");
        describe_gauge!(
            "scheduler_last_run_ts",
            "Unix ts when the last scheduled run finished."
        );
    });
}

pub struct Scheduler {
    anchor: TimeAnchor,
    job: Arc<dyn ScheduledJob>,
    store: StateStore,
    policy: MissedTriggerPolicy,
    check_interval: Duration,
    clock: Clock,
    state: Arc<Mutex<SchedulerState>>,
    running: Arc<AtomicBool>,
    cancel_tx: watch::Sender<bool>,
}

impl Scheduler {
    pub fn new(
        anchor: TimeAnchor,
        job: Arc<dyn ScheduledJob>,
        store: StateStore,
        policy: MissedTriggerPolicy,
        check_interval: Duration,
    ) -> Self {
        let (cancel_tx, _) = watch::channel(false);
        Self {
            anchor,
            job,
            store,
            policy,
            check_interval,
            clock: Arc::new(Utc::now),
            state: Arc::new(Mutex::new(SchedulerState::default())),
            running: Arc::new(AtomicBool::new(false)),
            cancel_tx,
        }
    }

    /// Replace the wall clock (tests drive time by hand).
    pub fn with_clock(mut self, clock: Clock) -> Self {
        self.clock = clock;
        self
    }

    pub fn anchor(&self) -> &TimeAnchor {
        &self.anchor
    }

    pub fn phase(&self) -> SchedulerPhase {
        if self.running.load(Ordering::SeqCst) {
            SchedulerPhase::Running
        } else {
            SchedulerPhase::Idle
        }
    }

    pub async fn state(&self) -> SchedulerState {
        self.state.lock().await.clone()
    }

    /// Load persisted state and apply the missed-trigger policy. Call once before ticking.
    pub async fn prepare(&self) -> Result<()> {
        ensure_metrics_described();
        let now = (self.clock)();
        let mut loaded = self.store.load().await;

        if self.anchor.has_fired(loaded.last_fired, now)? {
            let missed = self.anchor.previous_trigger(now)?;
            let missed_today = self.anchor.local_date(missed)? == self.anchor.local_date(now)?;
            match self.policy {
                MissedTriggerPolicy::CatchUp if missed_today => {
                    tracing::warn!(
                        missed_utc = %missed,
                        missed_local = %self.anchor.local_display(missed),
                        "missed today's trigger; catching up now"
                    );
                }
                _ => {
                    if loaded.last_fired.is_some() {
                        tracing::warn!(
                            missed_utc = %missed,
                            missed_local = %self.anchor.local_display(missed),
                            policy = ?self.policy,
                            "missed trigger skipped"
                        );
                    }
                    // Treat the missed period as handled; the next trigger still fires.
                    loaded.last_fired = Some(now);
                }
            }
        }

        *self.state.lock().await = loaded;
        self.log_next_trigger(now);
        Ok(())
    }

    /// One trigger check. Starts a run and returns its handle when the trigger is due and
    /// nothing is running.
    pub async fn tick(&self) -> Result<Option<JoinHandle<()>>> {
        let now = (self.clock)();
        let mut st = self.state.lock().await;
        if !self.anchor.has_fired(st.last_fired, now)? {
            return Ok(None);
        }
        if self
            .running
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            tracing::debug!("trigger due but a run is still in progress");
            return Ok(None);
        }

        st.last_fired = Some(now);
        st.execution_count += 1;
        let snapshot = st.clone();
        drop(st);
        if let Err(e) = self.store.save(&snapshot).await {
            tracing::warn!("persisting scheduler state failed: {e:#}");
        }

        tracing::info!(
            triggered_utc = %now,
            triggered_local = %self.anchor.local_display(now),
            "trigger fired; starting run"
        );
        Ok(Some(self.spawn_run(now)))
    }

    fn spawn_run(&self, triggered_at: DateTime<Utc>) -> JoinHandle<()> {
        let job = self.job.clone();
        let cancel = self.cancel_tx.subscribe();
        let state = self.state.clone();
        let store = self.store.clone();
        let running = self.running.clone();
        let clock = self.clock.clone();
        let anchor = self.anchor.clone();

        tokio::spawn(async move {
            // Inner task so a panic surfaces as a JoinError instead of unwinding this one.
            let outcome = tokio::spawn(async move { job.run(triggered_at, cancel).await }).await;

            let status = match outcome {
                Ok(Ok(status)) => {
                    tracing::info!(%status, "scheduled run finished");
                    Some(status)
                }
                Ok(Err(e)) => {
                    tracing::error!("scheduled run failed: {e:#}");
                    None
                }
                Err(e) if e.is_panic() => {
                    tracing::error!("scheduled run panicked: {e}");
                    None
                }
                Err(e) => {
                    tracing::error!("scheduled run aborted: {e}");
                    None
                }
            };
            let outcome_label = match status {
                Some(s) => s.as_str(),
                None => "ERROR",
            };
            counter!("scheduler_runs_total", "outcome" => outcome_label).increment(1);

            let finished = clock();
            let snapshot = {
                let mut st = state.lock().await;
                st.last_completed = Some(finished);
                st.last_status = status;
                if matches!(status, Some(OverallStatus::Success | OverallStatus::Partial)) {
                    st.success_count += 1;
                }
                st.clone()
            };
            if let Err(e) = store.save(&snapshot).await {
                tracing::warn!("persisting scheduler state failed: {e:#}");
            }
            gauge!("scheduler_last_run_ts").set(finished.timestamp() as f64);
            running.store(false, Ordering::SeqCst);

            match anchor.next_trigger(finished) {
                Ok(next) => tracing::info!(
                    next_utc = %next,
                    next_local = %anchor.local_display(next),
                    "scheduler idle"
                ),
                Err(e) => tracing::warn!("computing next trigger failed: {e:#}"),
            }
        })
    }

    /// Tick until `shutdown` turns `true`. An in-flight run is then signalled to cancel and
    /// awaited for at most `grace`.
    pub async fn run_until(&self, mut shutdown: watch::Receiver<bool>, grace: Duration) -> Result<()> {
        self.prepare().await?;

        let mut ticker = tokio::time::interval(self.check_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        let mut in_flight: Option<JoinHandle<()>> = None;

        loop {
            tokio::select! {
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
                _ = ticker.tick() => {
                    if in_flight.as_ref().is_some_and(|h| h.is_finished()) {
                        in_flight = None;
                    }
                    match self.tick().await {
                        Ok(Some(handle)) => in_flight = Some(handle),
                        Ok(None) => {}
                        Err(e) => tracing::error!("trigger check failed: {e:#}"),
                    }
                }
            }
        }

        tracing::info!("scheduler shutting down");
        if let Some(handle) = in_flight.filter(|h| !h.is_finished()) {
            let _ = self.cancel_tx.send(true);
            if tokio::time::timeout(grace, handle).await.is_err() {
                tracing::warn!(?grace, "in-flight run did not stop within grace period");
            }
        }
        Ok(())
    }

    fn log_next_trigger(&self, now: DateTime<Utc>) {
        match self.anchor.next_trigger(now) {
            Ok(next) => tracing::info!(
                timezone = %self.anchor.spec().timezone,
                time = %self.anchor.spec().time_of_day,
                next_utc = %next,
                next_local = %self.anchor.local_display(next),
                "scheduler ready"
            ),
            Err(e) => tracing::warn!("computing next trigger failed: {e:#}"),
        }
    }
}

/// Multi-line status text for the `status` command.
pub fn status_report(anchor: &TimeAnchor, state: &SchedulerState, now: DateTime<Utc>) -> Result<String> {
    let next = anchor.next_trigger(now)?;
    let until = next.signed_duration_since(now);
    let mut out = format!(
        "timezone:        {}\ntrigger time:    {}\nnow:             {}\nnext trigger:    {} (in {}h {:02}m)\n",
        anchor.spec().timezone,
        anchor.spec().time_of_day,
        anchor.local_display(now),
        anchor.local_display(next),
        until.num_hours(),
        until.num_minutes() % 60,
    );
    out.push_str(&format!(
        "runs:            {} ({} ok, {:.1}% success)\n",
        state.execution_count,
        state.success_count,
        state.success_rate()
    ));
    match state.last_fired {
        Some(t) => out.push_str(&format!("last fired:      {}\n", anchor.local_display(t))),
        None => out.push_str("last fired:      never\n"),
    }
    if let Some(t) = state.last_completed {
        out.push_str(&format!("last completed:  {}\n", anchor.local_display(t)));
    }
    if let Some(s) = state.last_status {
        out.push_str(&format!("last status:     {s}\n"));
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use anchor::TriggerSpec;
    use chrono::TimeZone;

    #[test]
    fn policy_parses_common_spellings() {
        let parse = |s: &str| s.parse::<MissedTriggerPolicy>();
        assert_eq!(parse("skip"), Ok(MissedTriggerPolicy::Skip));
        assert_eq!(parse("Catch-Up"), Ok(MissedTriggerPolicy::CatchUp));
        assert_eq!(parse("catch_up"), Ok(MissedTriggerPolicy::CatchUp));
        assert!("later".parse::<MissedTriggerPolicy>().is_err());
    }

    #[test]
    fn status_mentions_next_trigger_and_counters() {
        let anchor = TimeAnchor::new(TriggerSpec::parse("07:30", "Asia/Seoul").unwrap()).unwrap();
        // 2025-06-01 22:00 UTC = 2025-06-02 07:00 KST
        let now = Utc.with_ymd_and_hms(2025, 6, 1, 22, 0, 0).unwrap();
        let st = SchedulerState {
            execution_count: 4,
            success_count: 3,
            last_status: Some(OverallStatus::Partial),
            ..Default::default()
        };
        let text = status_report(&anchor, &st, now).unwrap();
        assert!(text.contains("2025-06-02 07:30:00 KST (in 0h 30m)"), "{text}");
        assert!(text.contains("runs:            4 (3 ok, 75.0% success)"));
        assert!(text.contains("last fired:      never"));
        assert!(text.contains("last status:     PARTIAL"));
    }
}
