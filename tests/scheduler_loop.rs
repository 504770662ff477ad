// tests/scheduler_loop.rs
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use anyhow::{bail, Result};
use async_trait::async_trait;
use chrono::{DateTime, FixedOffset, TimeZone, Utc};
use tokio::sync::{watch, Notify};

use daily_news_digest::pipeline::OverallStatus;
use daily_news_digest::schedule::anchor::{TimeAnchor, TriggerSpec};
use daily_news_digest::schedule::state::{SchedulerState, StateStore};
use daily_news_digest::schedule::{
    Clock, MissedTriggerPolicy, ScheduledJob, Scheduler, SchedulerPhase,
};

#[derive(Clone, Copy, PartialEq)]
enum Behaviour {
    Succeed,
    Fail,
    Panic,
    /// Block until released through `gate`.
    Block,
    /// Block until the scheduler signals cancellation.
    WaitForCancel,
}

struct MockJob {
    behaviour: Mutex<Behaviour>,
    runs: AtomicUsize,
    gate: Notify,
    saw_cancel: AtomicBool,
}

impl MockJob {
    fn new(behaviour: Behaviour) -> Arc<Self> {
        Arc::new(Self {
            behaviour: Mutex::new(behaviour),
            runs: AtomicUsize::new(0),
            gate: Notify::new(),
            saw_cancel: AtomicBool::new(false),
        })
    }
}

#[async_trait]
impl ScheduledJob for MockJob {
    async fn run(
        &self,
        _triggered_at: DateTime<Utc>,
        mut cancel: watch::Receiver<bool>,
    ) -> Result<OverallStatus> {
        self.runs.fetch_add(1, Ordering::SeqCst);
        let behaviour = *self.behaviour.lock().unwrap();
        match behaviour {
            Behaviour::Succeed => Ok(OverallStatus::Success),
            Behaviour::Fail => bail!("orchestrator exploded"),
            Behaviour::Panic => panic!("unexpected state in job"),
            Behaviour::Block => {
                self.gate.notified().await;
                Ok(OverallStatus::Partial)
            }
            Behaviour::WaitForCancel => {
                while !*cancel.borrow_and_update() {
                    if cancel.changed().await.is_err() {
                        break;
                    }
                }
                self.saw_cancel.store(true, Ordering::SeqCst);
                bail!("cancelled")
            }
        }
    }
}

fn kst(d: u32, h: u32, m: u32, s: u32) -> DateTime<Utc> {
    FixedOffset::east_opt(9 * 3600)
        .unwrap()
        .with_ymd_and_hms(2025, 6, d, h, m, s)
        .unwrap()
        .with_timezone(&Utc)
}

struct ManualClock(Arc<Mutex<DateTime<Utc>>>);

impl ManualClock {
    fn new(start: DateTime<Utc>) -> Self {
        Self(Arc::new(Mutex::new(start)))
    }
    fn set(&self, at: DateTime<Utc>) {
        *self.0.lock().unwrap() = at;
    }
    fn clock(&self) -> Clock {
        let inner = self.0.clone();
        Arc::new(move || *inner.lock().unwrap())
    }
}

fn anchor() -> TimeAnchor {
    TimeAnchor::new(TriggerSpec::parse("07:30", "Asia/Seoul").unwrap()).unwrap()
}

fn scheduler(
    job: Arc<MockJob>,
    store: StateStore,
    policy: MissedTriggerPolicy,
    clock: &ManualClock,
) -> Scheduler {
    Scheduler::new(anchor(), job, store, policy, Duration::from_secs(5)).with_clock(clock.clock())
}

#[tokio::test]
async fn fires_once_per_day_despite_many_ticks() {
    let clock = ManualClock::new(kst(1, 7, 29, 50));
    let job = MockJob::new(Behaviour::Succeed);
    let s = scheduler(job.clone(), StateStore::in_memory(), MissedTriggerPolicy::Skip, &clock);
    s.prepare().await.unwrap();

    assert!(s.tick().await.unwrap().is_none(), "not due yet");

    clock.set(kst(1, 7, 30, 2));
    let handle = s.tick().await.unwrap().expect("trigger should fire");
    for sec in 3..30 {
        clock.set(kst(1, 7, 30, sec));
        assert!(s.tick().await.unwrap().is_none());
    }
    handle.await.unwrap();
    clock.set(kst(1, 23, 59, 59));
    assert!(s.tick().await.unwrap().is_none());
    assert_eq!(job.runs.load(Ordering::SeqCst), 1);

    clock.set(kst(2, 7, 30, 1));
    s.tick().await.unwrap().expect("next day fires").await.unwrap();
    assert_eq!(job.runs.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn running_guard_blocks_a_second_run() {
    let clock = ManualClock::new(kst(1, 7, 0, 0));
    let job = MockJob::new(Behaviour::Block);
    let s = scheduler(job.clone(), StateStore::in_memory(), MissedTriggerPolicy::Skip, &clock);
    s.prepare().await.unwrap();

    clock.set(kst(1, 7, 30, 0));
    let first = s.tick().await.unwrap().expect("fires");
    tokio::task::yield_now().await;
    assert_eq!(s.phase(), SchedulerPhase::Running);

    // the run is still going when the next day's trigger comes due
    clock.set(kst(2, 7, 30, 0));
    assert!(s.tick().await.unwrap().is_none());
    assert_eq!(job.runs.load(Ordering::SeqCst), 1);

    job.gate.notify_one();
    first.await.unwrap();
    assert_eq!(s.phase(), SchedulerPhase::Idle);

    *job.behaviour.lock().unwrap() = Behaviour::Succeed;
    s.tick().await.unwrap().expect("due period fires once idle").await.unwrap();
    assert_eq!(job.runs.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn failing_or_panicking_runs_return_to_idle() {
    for behaviour in [Behaviour::Fail, Behaviour::Panic] {
        let clock = ManualClock::new(kst(1, 7, 0, 0));
        let job = MockJob::new(behaviour);
        let s = scheduler(job.clone(), StateStore::in_memory(), MissedTriggerPolicy::Skip, &clock);
        s.prepare().await.unwrap();

        clock.set(kst(1, 7, 30, 0));
        s.tick().await.unwrap().expect("fires").await.unwrap();
        assert_eq!(s.phase(), SchedulerPhase::Idle);

        let st = s.state().await;
        assert_eq!(st.execution_count, 1);
        assert_eq!(st.success_count, 0);
        assert_eq!(st.last_status, None);
        assert!(st.last_completed.is_some());

        // no immediate retry, but the next day still fires
        assert!(s.tick().await.unwrap().is_none());
        clock.set(kst(2, 7, 30, 0));
        assert!(s.tick().await.unwrap().is_some());
    }
}

#[tokio::test]
async fn state_is_persisted_after_a_run() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("scheduler.json");
    let clock = ManualClock::new(kst(1, 7, 0, 0));
    let job = MockJob::new(Behaviour::Succeed);
    let s = scheduler(job, StateStore::new(Some(path.clone())), MissedTriggerPolicy::Skip, &clock);
    s.prepare().await.unwrap();

    clock.set(kst(1, 7, 30, 4));
    s.tick().await.unwrap().unwrap().await.unwrap();

    let st = StateStore::new(Some(path)).load().await;
    assert_eq!(st.last_fired, Some(kst(1, 7, 30, 4)));
    assert_eq!(st.execution_count, 1);
    assert_eq!(st.success_count, 1);
    assert_eq!(st.last_status, Some(OverallStatus::Success));
}

async fn store_with_last_fired(dir: &tempfile::TempDir, at: DateTime<Utc>) -> StateStore {
    let store = StateStore::new(Some(dir.path().join("scheduler.json")));
    store
        .save(&SchedulerState {
            last_fired: Some(at),
            execution_count: 1,
            success_count: 1,
            ..Default::default()
        })
        .await
        .unwrap();
    store
}

#[tokio::test]
async fn catch_up_runs_immediately_after_missing_todays_trigger() {
    let dir = tempfile::tempdir().unwrap();
    let store = store_with_last_fired(&dir, kst(1, 7, 30, 0)).await;
    let clock = ManualClock::new(kst(2, 9, 15, 0));
    let job = MockJob::new(Behaviour::Succeed);
    let s = scheduler(job.clone(), store, MissedTriggerPolicy::CatchUp, &clock);
    s.prepare().await.unwrap();

    s.tick().await.unwrap().expect("catch-up run").await.unwrap();
    assert_eq!(job.runs.load(Ordering::SeqCst), 1);
    assert!(s.tick().await.unwrap().is_none());
}

#[tokio::test]
async fn skip_waits_for_the_next_trigger() {
    let dir = tempfile::tempdir().unwrap();
    let store = store_with_last_fired(&dir, kst(1, 7, 30, 0)).await;
    let clock = ManualClock::new(kst(2, 9, 15, 0));
    let job = MockJob::new(Behaviour::Succeed);
    let s = scheduler(job.clone(), store, MissedTriggerPolicy::Skip, &clock);
    s.prepare().await.unwrap();

    assert!(s.tick().await.unwrap().is_none());
    clock.set(kst(3, 7, 30, 0));
    s.tick().await.unwrap().expect("next day fires").await.unwrap();
    assert_eq!(job.runs.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn catch_up_ignores_a_trigger_missed_on_an_earlier_day() {
    let dir = tempfile::tempdir().unwrap();
    let store = store_with_last_fired(&dir, kst(1, 7, 30, 0)).await;
    // restarted before today's trigger; yesterday's was missed
    let clock = ManualClock::new(kst(3, 6, 0, 0));
    let job = MockJob::new(Behaviour::Succeed);
    let s = scheduler(job.clone(), store, MissedTriggerPolicy::CatchUp, &clock);
    s.prepare().await.unwrap();

    assert!(s.tick().await.unwrap().is_none());
    clock.set(kst(3, 7, 30, 0));
    assert!(s.tick().await.unwrap().is_some());
}

#[tokio::test]
async fn no_history_with_skip_does_not_fire_at_startup() {
    let clock = ManualClock::new(kst(1, 12, 0, 0));
    let job = MockJob::new(Behaviour::Succeed);
    let s = scheduler(job.clone(), StateStore::in_memory(), MissedTriggerPolicy::Skip, &clock);
    s.prepare().await.unwrap();
    assert!(s.tick().await.unwrap().is_none());
    assert_eq!(job.runs.load(Ordering::SeqCst), 0);
}

#[tokio::test(start_paused = true)]
async fn shutdown_cancels_the_in_flight_run() {
    let dir = tempfile::tempdir().unwrap();
    let store = store_with_last_fired(&dir, kst(1, 7, 30, 0)).await;
    let clock = ManualClock::new(kst(2, 8, 0, 0));
    let job = MockJob::new(Behaviour::WaitForCancel);
    let s = Arc::new(scheduler(job.clone(), store, MissedTriggerPolicy::CatchUp, &clock));

    let (tx, rx) = watch::channel(false);
    let runner = {
        let s = s.clone();
        tokio::spawn(async move { s.run_until(rx, Duration::from_secs(5)).await })
    };

    tokio::time::sleep(Duration::from_secs(12)).await;
    assert_eq!(job.runs.load(Ordering::SeqCst), 1);
    assert_eq!(s.phase(), SchedulerPhase::Running);

    tx.send(true).unwrap();
    runner.await.unwrap().unwrap();
    assert!(job.saw_cancel.load(Ordering::SeqCst));
    assert_eq!(s.phase(), SchedulerPhase::Idle);
}
