//! Domain types shared by the scheduler and the provider adapters.

pub mod credential;
pub mod subject;
pub mod trigger;

pub use credential::{Credential, needs_refresh};
pub use subject::{SubjectSnapshot, SubjectState};
pub use trigger::{JumpPlan, Trigger, compensated_sleep, plan_jump};
