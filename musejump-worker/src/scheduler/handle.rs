//! Cancelable handles for per-subject tasks.
//!
//! Both handle types wrap a spawned tokio task and a `CancellationToken`
//! derived from the owning subject's token, so removing a subject cancels
//! everything it started. `cancel()` is idempotent on both.

use std::sync::Arc;
use std::sync::atomic::{AtomicU8, Ordering};
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

/// Handle to a subject's recurring poll timer.
#[derive(Debug)]
pub struct PollHandle {
    token: CancellationToken,
    period: Duration,
    task: JoinHandle<()>,
}

impl PollHandle {
    pub fn new(token: CancellationToken, period: Duration, task: JoinHandle<()>) -> Self {
        Self {
            token,
            period,
            task,
        }
    }

    pub fn period(&self) -> Duration {
        self.period
    }

    pub fn cancel(&self) {
        self.token.cancel();
    }

    /// Whether the timer is still scheduled to fire.
    pub fn is_live(&self) -> bool {
        !self.token.is_cancelled() && !self.task.is_finished()
    }
}

/// Lifecycle of a one-shot jump.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum JumpPhase {
    /// Waiting out the coarse delay.
    Pending = 0,
    /// Lookup, fine sleep and seek in progress; no longer cancelable.
    Firing = 1,
    /// Fired, or abandoned after the lookup.
    Done = 2,
    /// Canceled before firing.
    Cancelled = 3,
}

impl JumpPhase {
    fn from_u8(value: u8) -> Self {
        match value {
            0 => Self::Pending,
            1 => Self::Firing,
            2 => Self::Done,
            _ => Self::Cancelled,
        }
    }
}

/// Shared phase cell between a [`JumpHandle`] and its task.
#[derive(Debug, Clone)]
pub struct JumpPhaseCell(Arc<AtomicU8>);

impl JumpPhaseCell {
    pub fn new() -> Self {
        Self(Arc::new(AtomicU8::new(JumpPhase::Pending as u8)))
    }

    pub fn get(&self) -> JumpPhase {
        JumpPhase::from_u8(self.0.load(Ordering::Acquire))
    }

    /// Move from `from` to `to`; fails if another party moved it first.
    pub fn transition(&self, from: JumpPhase, to: JumpPhase) -> bool {
        self.0
            .compare_exchange(from as u8, to as u8, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }

    pub fn set(&self, phase: JumpPhase) {
        self.0.store(phase as u8, Ordering::Release);
    }
}

impl Default for JumpPhaseCell {
    fn default() -> Self {
        Self::new()
    }
}

/// Handle to a scheduled one-shot jump.
#[derive(Debug)]
pub struct JumpHandle {
    id: Uuid,
    item_id: String,
    trigger_ms: i64,
    token: CancellationToken,
    phase: JumpPhaseCell,
    task: JoinHandle<()>,
}

impl JumpHandle {
    pub fn new(
        id: Uuid,
        item_id: impl Into<String>,
        trigger_ms: i64,
        token: CancellationToken,
        phase: JumpPhaseCell,
        task: JoinHandle<()>,
    ) -> Self {
        Self {
            id,
            item_id: item_id.into(),
            trigger_ms,
            token,
            phase,
            task,
        }
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn item_id(&self) -> &str {
        &self.item_id
    }

    pub fn trigger_ms(&self) -> i64 {
        self.trigger_ms
    }

    pub fn phase(&self) -> JumpPhase {
        self.phase.get()
    }

    /// Cancel the jump. Returns `true` if it had not started firing.
    pub fn cancel(&self) -> bool {
        self.token.cancel();
        self.phase.transition(JumpPhase::Pending, JumpPhase::Cancelled)
            || self.phase.get() == JumpPhase::Cancelled
    }

    /// Whether the jump is still waiting to fire.
    pub fn is_pending(&self) -> bool {
        self.phase.get() == JumpPhase::Pending && !self.task.is_finished()
    }
}
