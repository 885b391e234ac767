//! musejump-worker library crate.
//!
//! Tracks what each linked user is playing and seeks their player to stored
//! jump targets when playback reaches a trigger offset.

pub mod config;
pub mod database;
pub mod directory;
pub mod domain;
pub mod error;
pub mod logging;
pub mod playback;
pub mod scheduler;
pub mod services;
pub mod utils;

pub use error::{Error, Result};
