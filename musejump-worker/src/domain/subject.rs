//! Subject playback state.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Playback state of a tracked subject.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SubjectState {
    /// Nothing is playing (or playback could not be confirmed).
    #[default]
    Idle,
    /// A track is playing.
    Active,
}

impl SubjectState {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Idle => "IDLE",
            Self::Active => "ACTIVE",
        }
    }

    /// The state a provider report of `is_playing` leads to.
    pub fn from_playing(is_playing: bool) -> Self {
        if is_playing { Self::Active } else { Self::Idle }
    }

    pub fn is_active(&self) -> bool {
        matches!(self, Self::Active)
    }
}

impl fmt::Display for SubjectState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A subject as reported by the directory provider.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubjectSnapshot {
    pub id: String,
    pub contact_email: Option<String>,
    pub has_linked_credential: bool,
}

impl SubjectSnapshot {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            contact_email: None,
            has_linked_credential: true,
        }
    }
}
