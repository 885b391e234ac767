//! One-shot jump scheduling.
//!
//! A jump is scheduled in two stages. A coarse sleep ends `lead` before the
//! trigger; then the target offset is looked up, the remainder of the lead
//! window is slept off, and the seek is issued. Only the coarse stage can be
//! canceled.

use std::sync::Arc;
use std::time::Duration;

use tokio::time::{Instant, sleep};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::handle::{JumpHandle, JumpPhase, JumpPhaseCell};
use super::metrics::SchedulerMetrics;
use super::registry::SubjectEntry;
use crate::Result;
use crate::database::repositories::TriggerStore;
use crate::domain::{Credential, compensated_sleep, plan_jump};
use crate::error::with_timeout;
use crate::playback::PlaybackProvider;

/// Result of a scheduling attempt.
#[derive(Debug)]
pub enum JumpOutcome {
    /// The track has no triggers.
    NoTriggers,
    /// Every trigger lies behind the current position.
    AllPassed,
    Scheduled(JumpHandle),
}

impl JumpOutcome {
    pub fn into_handle(self) -> Option<JumpHandle> {
        match self {
            Self::Scheduled(handle) => Some(handle),
            _ => None,
        }
    }
}

/// Everything a fired jump needs, captured at schedule time.
struct JumpTask {
    id: Uuid,
    subject_id: String,
    item_id: String,
    trigger_ms: i64,
    credential: Credential,
    store: Arc<dyn TriggerStore>,
    playback: Arc<dyn PlaybackProvider>,
    lead: Duration,
    call_timeout: Duration,
    metrics: Arc<SchedulerMetrics>,
}

pub struct JumpScheduler {
    store: Arc<dyn TriggerStore>,
    playback: Arc<dyn PlaybackProvider>,
    lead: Duration,
    min_delay: Duration,
    call_timeout: Duration,
    metrics: Arc<SchedulerMetrics>,
}

impl JumpScheduler {
    pub fn new(
        store: Arc<dyn TriggerStore>,
        playback: Arc<dyn PlaybackProvider>,
        lead: Duration,
        min_delay: Duration,
        call_timeout: Duration,
        metrics: Arc<SchedulerMetrics>,
    ) -> Self {
        Self {
            store,
            playback,
            lead,
            min_delay,
            call_timeout,
            metrics,
        }
    }

    /// Plan and spawn the next jump for `item_id` at `progress_ms`.
    ///
    /// The caller holds the subject's lock and has already canceled any
    /// previous pending jump.
    pub async fn schedule(
        &self,
        entry: &SubjectEntry,
        credential: &Credential,
        item_id: &str,
        progress_ms: i64,
    ) -> Result<JumpOutcome> {
        let subject_id = entry.id();
        let triggers = with_timeout(
            "list_triggers",
            self.call_timeout,
            self.store.list_triggers(subject_id, item_id),
        )
        .await?;

        if triggers.is_empty() {
            debug!(subject_id, track_id = item_id, "No jumps defined for track");
            return Ok(JumpOutcome::NoTriggers);
        }

        let Some(plan) = plan_jump(&triggers, progress_ms, self.lead, self.min_delay) else {
            debug!(
                subject_id,
                track_id = item_id,
                progress_ms,
                "All jumps for track already passed"
            );
            return Ok(JumpOutcome::AllPassed);
        };

        let id = Uuid::new_v4();
        let token = entry.token().child_token();
        let phase = JumpPhaseCell::new();
        let task = JumpTask {
            id,
            subject_id: subject_id.to_string(),
            item_id: item_id.to_string(),
            trigger_ms: plan.trigger_ms,
            credential: credential.clone(),
            store: Arc::clone(&self.store),
            playback: Arc::clone(&self.playback),
            lead: self.lead,
            call_timeout: self.call_timeout,
            metrics: Arc::clone(&self.metrics),
        };

        let join = tokio::spawn(task.run(plan.delay, token.clone(), phase.clone()));
        self.metrics.record_jump_scheduled();

        info!(
            subject_id,
            track_id = item_id,
            jump_id = %id,
            trigger_ms = plan.trigger_ms,
            progress_ms,
            delay_ms = plan.delay.as_millis() as u64,
            "Scheduled jump"
        );

        Ok(JumpOutcome::Scheduled(JumpHandle::new(
            id,
            item_id,
            plan.trigger_ms,
            token,
            phase,
            join,
        )))
    }
}

impl JumpTask {
    async fn run(self, delay: Duration, token: CancellationToken, phase: JumpPhaseCell) {
        tokio::select! {
            biased;
            _ = token.cancelled() => {
                phase.transition(JumpPhase::Pending, JumpPhase::Cancelled);
                self.metrics.record_jump_canceled();
                debug!(subject_id = %self.subject_id, jump_id = %self.id, "Jump canceled");
                return;
            }
            _ = sleep(delay) => {}
        }

        if !phase.transition(JumpPhase::Pending, JumpPhase::Firing) {
            self.metrics.record_jump_canceled();
            return;
        }

        self.fire().await;
        phase.set(JumpPhase::Done);
    }

    async fn fire(&self) {
        let subject_id = self.subject_id.as_str();
        let started = Instant::now();

        let lookup = with_timeout(
            "lookup_target",
            self.call_timeout,
            self.store
                .lookup_target(subject_id, &self.item_id, self.trigger_ms),
        )
        .await;

        let target_ms = match lookup {
            Ok(Some(target_ms)) => target_ms,
            Ok(None) => {
                self.metrics.record_jump_abandoned();
                info!(
                    subject_id,
                    track_id = %self.item_id,
                    trigger_ms = self.trigger_ms,
                    "Jump no longer defined, skipping"
                );
                return;
            }
            Err(e) => {
                self.metrics.record_jump_abandoned();
                self.metrics.record_store_error();
                warn!(
                    subject_id,
                    track_id = %self.item_id,
                    trigger_ms = self.trigger_ms,
                    error = %e,
                    "Jump target lookup failed"
                );
                return;
            }
        };

        let elapsed = started.elapsed();
        let remaining = compensated_sleep(self.lead, elapsed);
        debug!(
            subject_id,
            lookup_ms = elapsed.as_millis() as u64,
            sleep_ms = remaining.as_millis() as u64,
            "Jump target resolved"
        );
        if !remaining.is_zero() {
            sleep(remaining).await;
        }

        match with_timeout(
            "seek",
            self.call_timeout,
            self.playback.seek(&self.credential, target_ms),
        )
        .await
        {
            Ok(()) => {
                self.metrics.record_jump_fired();
                info!(
                    subject_id,
                    track_id = %self.item_id,
                    trigger_ms = self.trigger_ms,
                    target_ms,
                    "Jumped"
                );
            }
            Err(e) => {
                self.metrics.record_seek_failure();
                warn!(
                    subject_id,
                    track_id = %self.item_id,
                    target_ms,
                    error = %e,
                    "Seek failed"
                );
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::Trigger;
    use crate::scheduler::registry::SubjectRegistry;
    use crate::scheduler::testing::{FakePlayback, FakeStore};

    const LEAD: Duration = Duration::from_millis(1000);
    const MIN_DELAY: Duration = Duration::from_millis(100);

    struct Fixture {
        registry: SubjectRegistry,
        store: Arc<FakeStore>,
        playback: Arc<FakePlayback>,
        scheduler: JumpScheduler,
    }

    fn fixture() -> Fixture {
        let store = Arc::new(FakeStore::default());
        let playback = Arc::new(FakePlayback::default());
        let scheduler = JumpScheduler::new(
            store.clone(),
            playback.clone(),
            LEAD,
            MIN_DELAY,
            Duration::from_secs(5),
            Arc::new(SchedulerMetrics::new()),
        );
        Fixture {
            registry: SubjectRegistry::new(CancellationToken::new()),
            store,
            playback,
            scheduler,
        }
    }

    fn credential() -> Credential {
        Credential::new("tok", None)
    }

    #[tokio::test(start_paused = true)]
    async fn test_schedules_next_trigger_and_seeks_on_time() {
        let f = fixture();
        f.store.insert(
            "u1",
            "t1",
            &[Trigger::new(12_000, 0), Trigger::new(45_000, 0), Trigger::new(90_000, 120_000)],
        );
        let (entry, _) = f.registry.upsert("u1");

        let start = Instant::now();
        let handle = f
            .scheduler
            .schedule(&entry, &credential(), "t1", 50_000)
            .await
            .unwrap()
            .into_handle()
            .unwrap();
        assert_eq!(handle.trigger_ms(), 90_000);
        assert!(handle.is_pending());

        sleep(Duration::from_millis(38_900)).await;
        assert!(f.playback.seeks().is_empty());

        sleep(Duration::from_millis(1_200)).await;
        let seeks = f.playback.seeks();
        assert_eq!(seeks.len(), 1);
        assert_eq!(seeks[0].target_ms, 120_000);
        // 39s coarse delay plus the 1s lead.
        assert_eq!(seeks[0].at - start, Duration::from_millis(40_000));
        assert_eq!(handle.phase(), JumpPhase::Done);
    }

    #[tokio::test(start_paused = true)]
    async fn test_lookup_latency_is_compensated() {
        let f = fixture();
        f.store.insert("u1", "t1", &[Trigger::new(10_000, 20_000)]);
        f.store.set_lookup_delay(Duration::from_millis(300));
        let (entry, _) = f.registry.upsert("u1");

        let start = Instant::now();
        f.scheduler
            .schedule(&entry, &credential(), "t1", 5_000)
            .await
            .unwrap();

        sleep(Duration::from_secs(10)).await;
        let seeks = f.playback.seeks();
        assert_eq!(seeks.len(), 1);
        // 4000 coarse + 300 lookup + 700 fine sleep.
        assert_eq!(seeks[0].at - start, Duration::from_millis(5_000));
    }

    #[tokio::test(start_paused = true)]
    async fn test_slow_lookup_seeks_immediately() {
        let f = fixture();
        f.store.insert("u1", "t1", &[Trigger::new(10_000, 20_000)]);
        f.store.set_lookup_delay(Duration::from_millis(1_500));
        let (entry, _) = f.registry.upsert("u1");

        let start = Instant::now();
        f.scheduler
            .schedule(&entry, &credential(), "t1", 5_000)
            .await
            .unwrap();

        sleep(Duration::from_secs(10)).await;
        let seeks = f.playback.seeks();
        assert_eq!(seeks.len(), 1);
        assert_eq!(seeks[0].at - start, Duration::from_millis(5_500));
    }

    #[tokio::test(start_paused = true)]
    async fn test_no_triggers_and_all_passed() {
        let f = fixture();
        let (entry, _) = f.registry.upsert("u1");

        let outcome = f
            .scheduler
            .schedule(&entry, &credential(), "t1", 0)
            .await
            .unwrap();
        assert!(matches!(outcome, JumpOutcome::NoTriggers));

        f.store
            .insert("u1", "t1", &[Trigger::new(12_000, 0), Trigger::new(45_000, 0)]);
        let outcome = f
            .scheduler
            .schedule(&entry, &credential(), "t1", 50_000)
            .await
            .unwrap();
        assert!(matches!(outcome, JumpOutcome::AllPassed));
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_before_fire() {
        let f = fixture();
        f.store.insert("u1", "t1", &[Trigger::new(10_000, 20_000)]);
        let (entry, _) = f.registry.upsert("u1");

        let handle = f
            .scheduler
            .schedule(&entry, &credential(), "t1", 0)
            .await
            .unwrap()
            .into_handle()
            .unwrap();

        sleep(Duration::from_secs(5)).await;
        assert!(handle.cancel());
        sleep(Duration::from_secs(30)).await;

        assert!(f.playback.seeks().is_empty());
        assert_eq!(handle.phase(), JumpPhase::Cancelled);
    }

    #[tokio::test(start_paused = true)]
    async fn test_subject_removal_cancels_jump() {
        let f = fixture();
        f.store.insert("u1", "t1", &[Trigger::new(10_000, 20_000)]);
        let (entry, _) = f.registry.upsert("u1");

        let handle = f
            .scheduler
            .schedule(&entry, &credential(), "t1", 0)
            .await
            .unwrap()
            .into_handle()
            .unwrap();

        f.registry.remove("u1");
        sleep(Duration::from_secs(30)).await;

        assert!(f.playback.seeks().is_empty());
        assert_eq!(handle.phase(), JumpPhase::Cancelled);
    }

    #[tokio::test(start_paused = true)]
    async fn test_firing_jump_survives_cancel_and_removal() {
        let f = fixture();
        f.store.insert("u1", "t1", &[Trigger::new(10_000, 20_000)]);
        f.store.set_lookup_delay(Duration::from_millis(300));
        let (entry, _) = f.registry.upsert("u1");

        let start = Instant::now();
        let handle = f
            .scheduler
            .schedule(&entry, &credential(), "t1", 5_000)
            .await
            .unwrap()
            .into_handle()
            .unwrap();

        // Coarse delay ends at 4s; the lookup is in flight at 4.1s.
        sleep(Duration::from_millis(4_100)).await;
        assert_eq!(handle.phase(), JumpPhase::Firing);
        assert!(!handle.cancel());
        assert!(f.registry.remove("u1"));

        sleep(Duration::from_secs(5)).await;
        let seeks = f.playback.seeks();
        assert_eq!(seeks.len(), 1);
        assert_eq!(seeks[0].target_ms, 20_000);
        assert_eq!(seeks[0].at - start, Duration::from_millis(5_000));
        assert_eq!(handle.phase(), JumpPhase::Done);
    }

    #[tokio::test(start_paused = true)]
    async fn test_deleted_target_abandons_jump() {
        let f = fixture();
        f.store.insert("u1", "t1", &[Trigger::new(10_000, 20_000)]);
        let (entry, _) = f.registry.upsert("u1");

        f.scheduler
            .schedule(&entry, &credential(), "t1", 0)
            .await
            .unwrap();
        f.store.clear();

        sleep(Duration::from_secs(30)).await;
        assert!(f.playback.seeks().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_seek_failure_is_not_retried() {
        let f = fixture();
        f.store.insert("u1", "t1", &[Trigger::new(2_000, 20_000)]);
        f.playback.fail_seeks(true);
        let (entry, _) = f.registry.upsert("u1");

        let handle = f
            .scheduler
            .schedule(&entry, &credential(), "t1", 0)
            .await
            .unwrap()
            .into_handle()
            .unwrap();

        sleep(Duration::from_secs(30)).await;
        assert_eq!(f.playback.seek_attempts(), 1);
        assert_eq!(handle.phase(), JumpPhase::Done);
    }

    #[tokio::test(start_paused = true)]
    async fn test_store_error_propagates() {
        let f = fixture();
        f.store.fail_lists(true);
        let (entry, _) = f.registry.upsert("u1");

        assert!(
            f.scheduler
                .schedule(&entry, &credential(), "t1", 0)
                .await
                .is_err()
        );
    }
}
