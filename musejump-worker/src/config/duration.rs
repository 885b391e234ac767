//! Duration strings in the `500ms`, `1s`, `1m30s` style.

use std::time::Duration;

use crate::{Error, Result};

/// Parse a duration made of one or more `<number><unit>` pairs.
///
/// A bare `0` is accepted.
pub fn parse_duration(input: &str) -> Result<Duration> {
    let s = input.trim();
    if s.is_empty() {
        return Err(Error::config("empty duration"));
    }
    if s == "0" {
        return Ok(Duration::ZERO);
    }

    humantime::parse_duration(s)
        .map_err(|e| Error::config(format!("invalid duration '{}': {}", input, e)))
}
