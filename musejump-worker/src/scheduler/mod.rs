//! Playback scheduling.
//!
//! - `Reconciler` keeps the `SubjectRegistry` in line with the directory.
//! - `PollScheduler` runs one recurring timer per subject, at a period that
//!   follows the subject's Idle/Active state.
//! - `StateMachine` handles each tick: state transitions, and detecting when
//!   playback moved somewhere new.
//! - `JumpScheduler` plans and fires the latency-compensated seek for the
//!   next trigger.
//! - `Worker` wires them together and owns startup and shutdown.

mod config;
pub mod handle;
pub mod jump;
pub mod metrics;
pub mod poll;
pub mod reconciler;
pub mod registry;
mod service;
pub mod state_machine;

#[cfg(test)]
pub(crate) mod testing;

pub use config::SchedulerConfig;
pub use handle::{JumpHandle, JumpPhase, PollHandle};
pub use jump::{JumpOutcome, JumpScheduler};
pub use metrics::{MetricsSnapshot, SchedulerMetrics};
pub use poll::PollScheduler;
pub use reconciler::{ReconcileReport, Reconciler};
pub use registry::{
    MembershipChange, PendingJumpStatus, SubjectEntry, SubjectRecord, SubjectRegistry, SubjectStatus,
};
pub use service::Worker;
pub use state_machine::{StateMachine, TickAction, TickDecision, evaluate};
