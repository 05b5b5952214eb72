//! Database queries for the Hivebot daemon.

use hivebot_core::db::unix_timestamp;

use super::db::{Database, DatabaseError};
use super::models::{NewSubbot, SubbotEventRow, SubbotRow, SubbotStatus};

/// Default page size for event queries.
const DEFAULT_EVENT_PAGE: u32 = 50;

/// Hard cap on event page size.
const MAX_EVENT_PAGE: u32 = 500;

impl Database {
    // =========================================================================
    // Subbot queries
    // =========================================================================

    /// Create a new subbot record with status `launching`.
    pub async fn create_subbot(&self, new: NewSubbot<'_>) -> Result<SubbotRow, DatabaseError> {
        let now = unix_timestamp();

        sqlx::query(
            r"
            INSERT INTO subbots (code, kind, status, owner_id, requester_chat, target_number,
                                 metadata, event_token, created_at, updated_at, last_heartbeat)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            ",
        )
        .bind(new.code)
        .bind(new.kind.as_str())
        .bind(SubbotStatus::Launching.as_str())
        .bind(new.owner_id)
        .bind(new.requester_chat)
        .bind(new.target_number)
        .bind(new.metadata)
        .bind(new.event_token)
        .bind(now)
        .bind(now)
        .bind(now)
        .execute(self.pool())
        .await?;

        self.get_subbot(new.code)
            .await?
            .ok_or_else(|| DatabaseError::NotFound(format!("Subbot {}", new.code)))
    }

    /// Get a subbot by code.
    pub async fn get_subbot(&self, code: &str) -> Result<Option<SubbotRow>, DatabaseError> {
        let row = sqlx::query_as::<_, SubbotRow>("SELECT * FROM subbots WHERE code = ?")
            .bind(code)
            .fetch_optional(self.pool())
            .await?;

        Ok(row)
    }

    /// Update a subbot's status.
    pub async fn update_subbot_status(
        &self,
        code: &str,
        status: SubbotStatus,
    ) -> Result<(), DatabaseError> {
        let now = unix_timestamp();

        sqlx::query("UPDATE subbots SET status = ?, updated_at = ? WHERE code = ?")
            .bind(status.as_str())
            .bind(now)
            .bind(code)
            .execute(self.pool())
            .await?;

        Ok(())
    }

    /// Set or clear the transient QR payload.
    pub async fn set_qr_payload(
        &self,
        code: &str,
        payload: Option<&str>,
    ) -> Result<(), DatabaseError> {
        let now = unix_timestamp();

        sqlx::query("UPDATE subbots SET qr_payload = ?, updated_at = ? WHERE code = ?")
            .bind(payload)
            .bind(now)
            .bind(code)
            .execute(self.pool())
            .await?;

        Ok(())
    }

    /// Record a heartbeat for a subbot.
    pub async fn touch_heartbeat(&self, code: &str) -> Result<(), DatabaseError> {
        sqlx::query("UPDATE subbots SET last_heartbeat = ? WHERE code = ?")
            .bind(unix_timestamp())
            .bind(code)
            .execute(self.pool())
            .await?;

        Ok(())
    }

    /// Count active subbots across all owners.
    ///
    /// `stopped` is the only persisted terminal status; deleted records
    /// are removed outright, so everything else holds a quota slot.
    pub async fn count_active(&self) -> Result<i64, DatabaseError> {
        let count: (i64,) = sqlx::query_as("SELECT COUNT(*) FROM subbots WHERE status != ?")
            .bind(SubbotStatus::Stopped.as_str())
            .fetch_one(self.pool())
            .await?;

        Ok(count.0)
    }

    /// Count active subbots held by one owner.
    pub async fn count_active_for_owner(&self, owner_id: &str) -> Result<i64, DatabaseError> {
        let count: (i64,) =
            sqlx::query_as("SELECT COUNT(*) FROM subbots WHERE owner_id = ? AND status != ?")
                .bind(owner_id)
                .bind(SubbotStatus::Stopped.as_str())
                .fetch_one(self.pool())
                .await?;

        Ok(count.0)
    }

    /// List subbot records, newest first, skipping the given statuses.
    ///
    /// The table is bounded by the global quota, so the exclusion filter
    /// runs over the fetched rows rather than in SQL.
    pub async fn list_subbots(
        &self,
        excluding: &[SubbotStatus],
    ) -> Result<Vec<SubbotRow>, DatabaseError> {
        let rows = sqlx::query_as::<_, SubbotRow>("SELECT * FROM subbots ORDER BY created_at DESC")
            .fetch_all(self.pool())
            .await?;

        if excluding.is_empty() {
            return Ok(rows);
        }
        Ok(rows
            .into_iter()
            .filter(|row| !excluding.iter().any(|status| status.as_str() == row.status))
            .collect())
    }

    /// Delete a subbot record. Returns `false` when the code was already
    /// gone.
    pub async fn delete_subbot(&self, code: &str) -> Result<bool, DatabaseError> {
        let result = sqlx::query("DELETE FROM subbots WHERE code = ?")
            .bind(code)
            .execute(self.pool())
            .await?;

        Ok(result.rows_affected() > 0)
    }

    // =========================================================================
    // Event log queries
    // =========================================================================

    /// Append a row to the event log.
    pub async fn insert_event(
        &self,
        code: &str,
        event: &str,
        payload: &str,
    ) -> Result<i64, DatabaseError> {
        let result = sqlx::query(
            "INSERT INTO subbot_events (code, event, payload, created_at) VALUES (?, ?, ?, ?)",
        )
        .bind(code)
        .bind(event)
        .bind(payload)
        .bind(unix_timestamp())
        .execute(self.pool())
        .await?;

        Ok(result.last_insert_rowid())
    }

    /// Query the event log, optionally filtered to one code, newest first.
    ///
    /// `page` is zero-based; `limit = 0` selects the default page size.
    pub async fn query_events(
        &self,
        code: Option<&str>,
        page: u32,
        limit: u32,
    ) -> Result<Vec<SubbotEventRow>, DatabaseError> {
        let limit = match limit {
            0 => DEFAULT_EVENT_PAGE,
            n => n.min(MAX_EVENT_PAGE),
        };
        let offset = page.saturating_mul(limit);

        let rows = if let Some(code) = code {
            sqlx::query_as::<_, SubbotEventRow>(
                "SELECT * FROM subbot_events WHERE code = ? ORDER BY id DESC LIMIT ? OFFSET ?",
            )
            .bind(code)
            .bind(limit)
            .bind(offset)
            .fetch_all(self.pool())
            .await?
        } else {
            sqlx::query_as::<_, SubbotEventRow>(
                "SELECT * FROM subbot_events ORDER BY id DESC LIMIT ? OFFSET ?",
            )
            .bind(limit)
            .bind(offset)
            .fetch_all(self.pool())
            .await?
        };

        Ok(rows)
    }

    /// Count event log rows for a code.
    pub async fn count_events(&self, code: &str) -> Result<i64, DatabaseError> {
        let count: (i64,) = sqlx::query_as("SELECT COUNT(*) FROM subbot_events WHERE code = ?")
            .bind(code)
            .fetch_one(self.pool())
            .await?;

        Ok(count.0)
    }
}
