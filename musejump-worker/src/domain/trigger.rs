//! Jump triggers and the timing arithmetic around them.

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// A stored `(trigger, target)` offset pair for one subject and track.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Trigger {
    /// Playback offset at which the jump should land, in milliseconds.
    pub trigger_ms: i64,
    /// Offset the subject is moved to, in milliseconds.
    pub target_ms: i64,
}

impl Trigger {
    pub fn new(trigger_ms: i64, target_ms: i64) -> Self {
        Self {
            trigger_ms,
            target_ms,
        }
    }
}

/// The next jump to schedule for a track.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct JumpPlan {
    /// Offset of the selected trigger.
    pub trigger_ms: i64,
    /// Coarse delay before the target lookup starts.
    pub delay: Duration,
}

/// Pick the first trigger at or after `progress_ms` and size the coarse delay.
///
/// `triggers` must be sorted ascending by `trigger_ms`. The delay is aimed at
/// `lead` before the trigger; if that moment has already passed it is clamped
/// to `min_delay`. Returns `None` when every trigger lies behind the current
/// position.
pub fn plan_jump(
    triggers: &[Trigger],
    progress_ms: i64,
    lead: Duration,
    min_delay: Duration,
) -> Option<JumpPlan> {
    let next = triggers.iter().find(|t| t.trigger_ms >= progress_ms)?;

    let delay_ms = next.trigger_ms - progress_ms - lead.as_millis() as i64;
    let delay = if delay_ms < 0 {
        min_delay
    } else {
        Duration::from_millis(delay_ms as u64)
    };

    Some(JumpPlan {
        trigger_ms: next.trigger_ms,
        delay,
    })
}

/// Remaining wait after the target lookup so the seek lands on the trigger.
pub fn compensated_sleep(lead: Duration, lookup_elapsed: Duration) -> Duration {
    lead.saturating_sub(lookup_elapsed)
}
