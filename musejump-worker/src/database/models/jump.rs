//! Jump database model.

use serde::{Deserialize, Serialize};
use sqlx::FromRow;

use crate::{Error, Result};

/// A stored jump: when `user_id` plays `song_id` and reaches `trigger_ms`,
/// playback is moved to `target_ms`.
#[derive(Debug, Clone, FromRow, Serialize, Deserialize, PartialEq, Eq)]
pub struct JumpDbModel {
    pub id: String,
    pub user_id: String,
    pub song_id: String,
    pub trigger_ms: i64,
    pub target_ms: i64,
    pub description: Option<String>,
    /// Unix epoch milliseconds (UTC) when created.
    pub created_at: i64,
    /// Unix epoch milliseconds (UTC) when last updated.
    pub updated_at: i64,
}

impl JumpDbModel {
    pub fn new(
        user_id: impl Into<String>,
        song_id: impl Into<String>,
        trigger_ms: i64,
        target_ms: i64,
        description: Option<String>,
    ) -> Self {
        let now = crate::database::time::now_ms();
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            user_id: user_id.into(),
            song_id: song_id.into(),
            trigger_ms,
            target_ms,
            description,
            created_at: now,
            updated_at: now,
        }
    }

    /// Reject rows the scheduler could never act on.
    pub fn validate(&self) -> Result<()> {
        if self.user_id.trim().is_empty() {
            return Err(Error::validation("user_id must not be empty"));
        }
        if self.song_id.trim().is_empty() {
            return Err(Error::validation("song_id must not be empty"));
        }
        if self.trigger_ms < 0 || self.target_ms < 0 {
            return Err(Error::validation("offsets must be non-negative"));
        }
        Ok(())
    }
}

/// Partial update for an existing jump. `None` leaves a field untouched.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct JumpUpdate {
    pub song_id: Option<String>,
    pub trigger_ms: Option<i64>,
    pub target_ms: Option<i64>,
    pub description: Option<String>,
}

impl JumpUpdate {
    pub fn apply(self, jump: &mut JumpDbModel) {
        if let Some(song_id) = self.song_id {
            jump.song_id = song_id;
        }
        if let Some(trigger_ms) = self.trigger_ms {
            jump.trigger_ms = trigger_ms;
        }
        if let Some(target_ms) = self.target_ms {
            jump.target_ms = target_ms;
        }
        if self.description.is_some() {
            jump.description = self.description;
        }
        jump.updated_at = crate::database::time::now_ms();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_jump() {
        let jump = JumpDbModel::new("user_1", "track_1", 30_000, 60_000, None);
        assert_eq!((jump.trigger_ms, jump.target_ms), (30_000, 60_000));
        assert_eq!(jump.created_at, jump.updated_at);
        assert!(uuid::Uuid::parse_str(&jump.id).is_ok());
        assert!(jump.validate().is_ok());
    }

    #[test]
    fn test_validate_rejects_bad_rows() {
        let jump = JumpDbModel::new("", "track_1", 0, 0, None);
        assert!(jump.validate().is_err());

        let jump = JumpDbModel::new("user_1", "track_1", -5, 0, None);
        assert!(jump.validate().is_err());
    }

    #[test]
    fn test_update_apply() {
        let mut jump = JumpDbModel::new("user_1", "track_1", 30_000, 60_000, Some("intro".into()));
        JumpUpdate {
            target_ms: Some(90_000),
            ..Default::default()
        }
        .apply(&mut jump);

        assert_eq!(jump.trigger_ms, 30_000);
        assert_eq!(jump.target_ms, 90_000);
        assert_eq!(jump.description.as_deref(), Some("intro"));
    }
}
