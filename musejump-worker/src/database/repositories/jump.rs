//! Jump repository.
//!
//! [`TriggerStore`] is the read-only view the scheduler depends on.
//! [`JumpRepository`] adds the per-user management operations.

use async_trait::async_trait;
use sqlx::SqlitePool;

use crate::database::models::{JumpDbModel, JumpUpdate};
use crate::database::retry::retry_on_sqlite_busy;
use crate::domain::Trigger;
use crate::{Error, Result};

/// Read access to jump triggers for the scheduler.
#[async_trait]
pub trait TriggerStore: Send + Sync {
    /// All triggers for a subject and track, ascending by trigger offset.
    async fn list_triggers(&self, subject_id: &str, item_id: &str) -> Result<Vec<Trigger>>;

    /// Target offset for the jump defined at `trigger_ms`, if it still exists.
    ///
    /// With duplicate rows at the same offset the oldest one wins.
    async fn lookup_target(
        &self,
        subject_id: &str,
        item_id: &str,
        trigger_ms: i64,
    ) -> Result<Option<i64>>;
}

/// Jump management, scoped by owning user.
#[async_trait]
pub trait JumpRepository: TriggerStore {
    async fn list_jumps(&self, user_id: &str) -> Result<Vec<JumpDbModel>>;
    /// Full rows for one song, ascending by trigger offset.
    async fn list_jumps_for_song(&self, user_id: &str, song_id: &str)
    -> Result<Vec<JumpDbModel>>;
    async fn get_jump(&self, user_id: &str, id: &str) -> Result<JumpDbModel>;
    async fn create_jump(&self, jump: &JumpDbModel) -> Result<()>;
    async fn update_jump(&self, user_id: &str, id: &str, update: JumpUpdate)
    -> Result<JumpDbModel>;
    async fn delete_jump(&self, user_id: &str, id: &str) -> Result<()>;
}

/// SQLx implementation of [`JumpRepository`].
pub struct SqlxJumpRepository {
    pool: SqlitePool,
}

impl SqlxJumpRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl TriggerStore for SqlxJumpRepository {
    async fn list_triggers(&self, subject_id: &str, item_id: &str) -> Result<Vec<Trigger>> {
        let rows: Vec<(i64, i64)> = sqlx::query_as(
            "SELECT trigger_ms, target_ms FROM user_song_jumps \
             WHERE user_id = ? AND song_id = ? \
             ORDER BY trigger_ms ASC, created_at ASC",
        )
        .bind(subject_id)
        .bind(item_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows
            .into_iter()
            .map(|(trigger_ms, target_ms)| Trigger::new(trigger_ms, target_ms))
            .collect())
    }

    async fn lookup_target(
        &self,
        subject_id: &str,
        item_id: &str,
        trigger_ms: i64,
    ) -> Result<Option<i64>> {
        let row: Option<(i64,)> = sqlx::query_as(
            "SELECT target_ms FROM user_song_jumps \
             WHERE user_id = ? AND song_id = ? AND trigger_ms = ? \
             ORDER BY created_at ASC LIMIT 1",
        )
        .bind(subject_id)
        .bind(item_id)
        .bind(trigger_ms)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(|(target_ms,)| target_ms))
    }
}

#[async_trait]
impl JumpRepository for SqlxJumpRepository {
    async fn list_jumps(&self, user_id: &str) -> Result<Vec<JumpDbModel>> {
        let jumps = sqlx::query_as::<_, JumpDbModel>(
            "SELECT * FROM user_song_jumps WHERE user_id = ? \
             ORDER BY song_id ASC, trigger_ms ASC",
        )
        .bind(user_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(jumps)
    }

    async fn list_jumps_for_song(
        &self,
        user_id: &str,
        song_id: &str,
    ) -> Result<Vec<JumpDbModel>> {
        let jumps = sqlx::query_as::<_, JumpDbModel>(
            "SELECT * FROM user_song_jumps WHERE user_id = ? AND song_id = ? \
             ORDER BY trigger_ms ASC, created_at ASC",
        )
        .bind(user_id)
        .bind(song_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(jumps)
    }

    async fn get_jump(&self, user_id: &str, id: &str) -> Result<JumpDbModel> {
        sqlx::query_as::<_, JumpDbModel>(
            "SELECT * FROM user_song_jumps WHERE id = ? AND user_id = ?",
        )
        .bind(id)
        .bind(user_id)
        .fetch_optional(&self.pool)
        .await?
        .ok_or_else(|| Error::not_found("Jump", id))
    }

    async fn create_jump(&self, jump: &JumpDbModel) -> Result<()> {
        jump.validate()?;
        retry_on_sqlite_busy("create_jump", || async {
            sqlx::query(
                r#"
                INSERT INTO user_song_jumps (
                    id, user_id, song_id, trigger_ms, target_ms, description,
                    created_at, updated_at
                ) VALUES (?, ?, ?, ?, ?, ?, ?, ?)
                "#,
            )
            .bind(&jump.id)
            .bind(&jump.user_id)
            .bind(&jump.song_id)
            .bind(jump.trigger_ms)
            .bind(jump.target_ms)
            .bind(&jump.description)
            .bind(jump.created_at)
            .bind(jump.updated_at)
            .execute(&self.pool)
            .await?;
            Ok(())
        })
        .await
    }

    async fn update_jump(
        &self,
        user_id: &str,
        id: &str,
        update: JumpUpdate,
    ) -> Result<JumpDbModel> {
        let mut jump = self.get_jump(user_id, id).await?;
        update.apply(&mut jump);
        jump.validate()?;

        let jump_ref = &jump;
        let result = retry_on_sqlite_busy("update_jump", || async move {
            Ok(sqlx::query(
                r#"
                UPDATE user_song_jumps SET
                    song_id = ?,
                    trigger_ms = ?,
                    target_ms = ?,
                    description = ?,
                    updated_at = ?
                WHERE id = ? AND user_id = ?
                "#,
            )
            .bind(&jump_ref.song_id)
            .bind(jump_ref.trigger_ms)
            .bind(jump_ref.target_ms)
            .bind(&jump_ref.description)
            .bind(jump_ref.updated_at)
            .bind(&jump_ref.id)
            .bind(&jump_ref.user_id)
            .execute(&self.pool)
            .await?)
        })
        .await?;

        if result.rows_affected() == 0 {
            return Err(Error::not_found("Jump", id));
        }
        Ok(jump)
    }

    async fn delete_jump(&self, user_id: &str, id: &str) -> Result<()> {
        let result = retry_on_sqlite_busy("delete_jump", || async {
            Ok(
                sqlx::query("DELETE FROM user_song_jumps WHERE id = ? AND user_id = ?")
                    .bind(id)
                    .bind(user_id)
                    .execute(&self.pool)
                    .await?,
            )
        })
        .await?;

        if result.rows_affected() == 0 {
            return Err(Error::not_found("Jump", id));
        }
        Ok(())
    }
}
