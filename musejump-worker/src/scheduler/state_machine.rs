//! Per-tick playback state machine.
//!
//! Each poll tick asks the playback provider what the subject is playing,
//! then, under the subject's lock:
//! - moves it between Idle and Active, restarting its poll timer at the
//!   matching period;
//! - decides whether playback simply continued since the last tick (routine)
//!   or jumped somewhere new (supersession), in which case the pending jump
//!   is replaced.

use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, info, trace, warn};

use super::jump::JumpScheduler;
use super::metrics::SchedulerMetrics;
use super::poll::PollScheduler;
use super::registry::SubjectEntry;
use crate::domain::{Credential, SubjectState};
use crate::error::with_timeout;
use crate::playback::{PlaybackProvider, PlaybackStatus};

/// What a tick does beyond the state transition.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TickAction {
    /// Nothing is playing.
    Stopped,
    /// Same item, progress advanced by about one active period.
    Routine,
    /// Playing, but the provider gave no item detail.
    Inconclusive,
    /// New item, or a seek within the same item.
    Supersede { item_id: String },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TickDecision {
    pub next_state: SubjectState,
    pub transitioned: bool,
    pub action: TickAction,
}

/// Decide a tick's outcome from the previous record fields and a fresh status.
pub fn evaluate(
    state: SubjectState,
    last_track_id: Option<&str>,
    last_progress_ms: i64,
    status: &PlaybackStatus,
    active_interval: Duration,
    epsilon: Duration,
) -> TickDecision {
    let next_state = SubjectState::from_playing(status.is_playing);

    let action = match (status.is_playing, status.item_id.as_deref()) {
        (false, _) => TickAction::Stopped,
        (true, None) => TickAction::Inconclusive,
        (true, Some(item_id)) => {
            let progress_delta = status.progress_ms - last_progress_ms;
            let delta_error = (active_interval.as_millis() as i64 - progress_delta).abs();
            if last_track_id == Some(item_id) && delta_error < epsilon.as_millis() as i64 {
                TickAction::Routine
            } else {
                TickAction::Supersede {
                    item_id: item_id.to_string(),
                }
            }
        }
    };

    TickDecision {
        next_state,
        transitioned: next_state != state,
        action,
    }
}

pub struct StateMachine {
    playback: Arc<dyn PlaybackProvider>,
    jumps: JumpScheduler,
    active_interval: Duration,
    epsilon: Duration,
    call_timeout: Duration,
    metrics: Arc<SchedulerMetrics>,
}

impl StateMachine {
    pub fn new(
        playback: Arc<dyn PlaybackProvider>,
        jumps: JumpScheduler,
        active_interval: Duration,
        epsilon: Duration,
        call_timeout: Duration,
        metrics: Arc<SchedulerMetrics>,
    ) -> Self {
        Self {
            playback,
            jumps,
            active_interval,
            epsilon,
            call_timeout,
            metrics,
        }
    }

    /// Run one tick for `entry`. Returns `None` if the subject was removed meanwhile.
    pub async fn check(
        &self,
        poller: &Arc<PollScheduler>,
        entry: &Arc<SubjectEntry>,
    ) -> Option<TickDecision> {
        let subject_id = entry.id();
        self.metrics.record_tick();

        let credential = {
            let record = entry.lock().await;
            if entry.is_removed() {
                return None;
            }
            record.credential.clone()
        };

        let status = self.query_status(subject_id, credential.as_ref()).await;

        let mut record = entry.lock().await;
        if entry.is_removed() {
            return None;
        }

        let decision = evaluate(
            record.state,
            record.last_track_id.as_deref(),
            record.last_progress_ms,
            &status,
            self.active_interval,
            self.epsilon,
        );

        if decision.transitioned {
            let previous = record.state;
            record.state = decision.next_state;
            if !record.state.is_active() {
                record.last_track_id = None;
                record.last_progress_ms = 0;
                record.cancel_pending_jump();
            }
            self.metrics.record_transition();
            info!(
                subject_id,
                from = %previous,
                to = %record.state,
                "Subject changed state"
            );
            poller.restart_timer(entry, &mut record);
        }

        match &decision.action {
            TickAction::Stopped => {}
            TickAction::Routine => {
                self.metrics.record_routine_tick();
                trace!(subject_id, progress_ms = status.progress_ms, "Routine tick");
                record.last_progress_ms = status.progress_ms;
            }
            TickAction::Inconclusive => {
                debug!(subject_id, "Playback reported without item detail");
                record.last_progress_ms = status.progress_ms;
            }
            TickAction::Supersede { item_id } => {
                self.metrics.record_supersession();
                record.cancel_pending_jump();

                let Some(credential) = record.credential.clone().or(credential) else {
                    return Some(decision);
                };

                debug!(
                    subject_id,
                    track_id = %item_id,
                    progress_ms = status.progress_ms,
                    previous_track_id = ?record.last_track_id,
                    "Playback superseded"
                );

                match self
                    .jumps
                    .schedule(entry, &credential, item_id, status.progress_ms)
                    .await
                {
                    Ok(outcome) => {
                        record.pending_jump = outcome.into_handle();
                        record.last_track_id = Some(item_id.clone());
                        record.last_progress_ms = status.progress_ms;
                    }
                    Err(e) => {
                        self.metrics.record_store_error();
                        warn!(
                            subject_id,
                            track_id = %item_id,
                            error = %e,
                            "Failed to schedule jump, retrying next tick"
                        );
                    }
                }
            }
        }

        Some(decision)
    }

    /// A missing credential or a failed query both read as "not playing".
    async fn query_status(
        &self,
        subject_id: &str,
        credential: Option<&Credential>,
    ) -> PlaybackStatus {
        let Some(credential) = credential else {
            trace!(subject_id, "No credential, treating as not playing");
            return PlaybackStatus::not_playing();
        };

        match with_timeout(
            "currently_playing",
            self.call_timeout,
            self.playback.currently_playing(credential),
        )
        .await
        {
            Ok(status) => status,
            Err(e) => {
                self.metrics.record_provider_error();
                warn!(
                    subject_id,
                    timed_out = e.is_timeout(),
                    error = %e,
                    "Playback status query failed"
                );
                PlaybackStatus::not_playing()
            }
        }
    }
}
