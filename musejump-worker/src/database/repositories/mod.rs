//! Repository layer for database access.

pub mod jump;

pub use jump::*;
