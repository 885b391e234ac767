//! Database models.
//!
//! These map directly onto the schema in `migrations/`.

pub mod jump;

pub use jump::*;
