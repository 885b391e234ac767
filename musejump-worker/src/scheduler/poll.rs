//! Per-subject poll timers.
//!
//! Every registered subject gets one recurring timer whose period follows
//! its state. A coarse sweep picks up subjects that have none yet; the state
//! machine swaps the timer when a subject changes state.

use std::sync::Arc;
use std::time::Duration;

use tokio::time::{Instant, MissedTickBehavior, interval_at};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use super::config::SchedulerConfig;
use super::handle::PollHandle;
use super::jump::JumpScheduler;
use super::metrics::SchedulerMetrics;
use super::registry::{SubjectEntry, SubjectRecord, SubjectRegistry};
use super::state_machine::StateMachine;
use crate::database::repositories::TriggerStore;
use crate::playback::PlaybackProvider;

pub struct PollScheduler {
    config: SchedulerConfig,
    state_machine: StateMachine,
}

impl PollScheduler {
    pub fn new(config: SchedulerConfig, state_machine: StateMachine) -> Arc<Self> {
        Arc::new(Self {
            config,
            state_machine,
        })
    }

    /// Wire a poller, state machine and jump scheduler over the given providers.
    pub fn from_parts(
        config: SchedulerConfig,
        store: Arc<dyn TriggerStore>,
        playback: Arc<dyn PlaybackProvider>,
        metrics: Arc<SchedulerMetrics>,
    ) -> Arc<Self> {
        let jumps = JumpScheduler::new(
            store,
            Arc::clone(&playback),
            config.jump_lead,
            config.jump_min_delay,
            config.call_timeout,
            Arc::clone(&metrics),
        );
        let state_machine = StateMachine::new(
            playback,
            jumps,
            config.active_interval,
            config.duplicate_poll_epsilon,
            config.call_timeout,
            metrics,
        );
        Self::new(config, state_machine)
    }

    pub fn state_machine(&self) -> &StateMachine {
        &self.state_machine
    }

    /// Replace the subject's timer with one at the period for its current state.
    ///
    /// The caller holds the subject's lock, passed in as `record`.
    pub fn restart_timer(self: &Arc<Self>, entry: &Arc<SubjectEntry>, record: &mut SubjectRecord) {
        if let Some(old) = record.poll.take() {
            old.cancel();
        }
        let period = self.config.interval_for(record.state);
        record.poll = Some(self.spawn_timer(entry, period));
    }

    fn spawn_timer(self: &Arc<Self>, entry: &Arc<SubjectEntry>, period: Duration) -> PollHandle {
        let token = entry.token().child_token();
        let poller = Arc::clone(self);
        let entry = Arc::clone(entry);
        let timer_token = token.clone();

        let task = tokio::spawn(async move {
            let mut ticker = interval_at(Instant::now() + period, period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

            loop {
                tokio::select! {
                    biased;
                    _ = timer_token.cancelled() => break,
                    _ = ticker.tick() => {
                        poller.state_machine().check(&poller, &entry).await;
                    }
                }
            }
        });

        PollHandle::new(token, period, task)
    }

    /// Start timers for subjects that lack a live one. Returns how many were started.
    ///
    /// Subjects whose lock is busy are left for the next sweep.
    pub fn sweep(self: &Arc<Self>, registry: &SubjectRegistry) -> usize {
        let mut started = 0;
        registry.for_each(|entry| {
            let Some(mut record) = entry.try_lock() else {
                return;
            };
            if entry.is_removed() || !record.needs_timer() {
                return;
            }
            debug!(
                subject_id = entry.id(),
                state = %record.state,
                "Starting poll timer"
            );
            self.restart_timer(entry, &mut record);
            started += 1;
        });
        started
    }

    /// Sweep every `sweep_interval` until `token` is canceled.
    pub async fn run(self: Arc<Self>, registry: Arc<SubjectRegistry>, token: CancellationToken) {
        let period = self.config.sweep_interval;
        let mut ticker = interval_at(Instant::now() + period, period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        info!("Poll sweep started (every {:?})", period);
        loop {
            tokio::select! {
                biased;
                _ = token.cancelled() => break,
                _ = ticker.tick() => {
                    let started = self.sweep(&registry);
                    if started > 0 {
                        debug!(started, "Sweep started poll timers");
                    }
                }
            }
        }
        info!("Poll sweep stopped");
    }
}
