use std::path::Path;

use chrono::{DateTime, Duration, Utc};
use deskmate_common::{Error, Nudge, Result};
use rusqlite::{Connection, params};
use tracing::{debug, info};

use crate::migrations::{self, format_timestamp, parse_timestamp};
use crate::workplace_store::{Claim, row_to_claim};

pub const CLAIM_REMINDER: &str = "claim_reminder";

/// Proactive notifications and the scan that produces them.
pub struct NudgeStore {
    conn: Connection,
}

impl NudgeStore {
    pub fn open(db_path: &Path) -> Result<Self> {
        Ok(Self {
            conn: migrations::open_connection(db_path)?,
        })
    }

    pub fn in_memory() -> Result<Self> {
        Ok(Self {
            conn: migrations::open_in_memory()?,
        })
    }

    /// Unread nudges for a user, newest first.
    pub fn unread(&self, user_id: &str, limit: Option<usize>) -> Result<Vec<Nudge>> {
        self.query_nudges(user_id, true, limit)
    }

    pub fn list(&self, user_id: &str, only_unread: bool) -> Result<Vec<Nudge>> {
        self.query_nudges(user_id, only_unread, None)
    }

    fn query_nudges(&self, user_id: &str, only_unread: bool, limit: Option<usize>) -> Result<Vec<Nudge>> {
        let limit = limit.map(|l| l as i64).unwrap_or(-1);
        let mut stmt = self
            .conn
            .prepare(
                "SELECT id, user_id, type, title, content, is_read, metadata, created_at
                 FROM nudges
                 WHERE user_id = ?1 AND (?2 = 0 OR is_read = 0)
                 ORDER BY created_at DESC, rowid DESC
                 LIMIT ?3",
            )
            .map_err(|e| Error::Database(format!("failed to prepare nudge query: {e}")))?;

        let rows = stmt
            .query_map(params![user_id, only_unread, limit], |row| {
                let metadata_raw: String = row.get(6)?;
                let created_raw: String = row.get(7)?;
                Ok(Nudge {
                    id: row.get(0)?,
                    user_id: row.get(1)?,
                    nudge_type: row.get(2)?,
                    title: row.get(3)?,
                    content: row.get(4)?,
                    is_read: row.get(5)?,
                    metadata: serde_json::from_str(&metadata_raw)
                        .unwrap_or(serde_json::Value::Null),
                    created_at: parse_timestamp(&created_raw),
                })
            })
            .map_err(|e| Error::Database(format!("failed to load nudges: {e}")))?;

        let mut nudges = Vec::new();
        for row in rows {
            nudges.push(row.map_err(|e| Error::Database(format!("failed to read nudge row: {e}")))?);
        }
        Ok(nudges)
    }

    /// Mark one of the user's nudges read. Returns false if it is not theirs or does not exist.
    pub fn mark_read(&self, nudge_id: &str, user_id: &str) -> Result<bool> {
        let updated = self
            .conn
            .execute(
                "UPDATE nudges SET is_read = 1 WHERE id = ?1 AND user_id = ?2",
                params![nudge_id, user_id],
            )
            .map_err(|e| Error::Database(format!("failed to mark nudge read: {e}")))?;
        Ok(updated > 0)
    }

    pub fn create(
        &self,
        user_id: &str,
        nudge_type: &str,
        title: &str,
        content: &str,
        metadata: serde_json::Value,
    ) -> Result<Nudge> {
        let nudge = Nudge {
            id: uuid::Uuid::new_v4().to_string(),
            user_id: user_id.to_string(),
            nudge_type: nudge_type.to_string(),
            title: title.to_string(),
            content: content.to_string(),
            is_read: false,
            metadata,
            created_at: Utc::now(),
        };
        self.conn
            .execute(
                "INSERT INTO nudges (id, user_id, type, title, content, is_read, metadata, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, 0, ?6, ?7)",
                params![
                    nudge.id,
                    nudge.user_id,
                    nudge.nudge_type,
                    nudge.title,
                    nudge.content,
                    nudge.metadata.to_string(),
                    format_timestamp(nudge.created_at)
                ],
            )
            .map_err(|e| Error::Database(format!("failed to create nudge: {e}")))?;
        Ok(nudge)
    }

    /// Create one claim reminder per pending claim older than `stale_after_days`
    /// that has never been nudged. Returns the nudges created by this scan.
    pub fn scan_for_stale_claims(&self, now: DateTime<Utc>, stale_after_days: i64) -> Result<Vec<Nudge>> {
        let cutoff = format_timestamp(now - Duration::days(stale_after_days));
        debug!("scanning for claims pending since before {cutoff}");

        let stale: Vec<Claim> = {
            let mut stmt = self
                .conn
                .prepare(
                    "SELECT c.id, c.user_id, k.name, c.amount, c.description, c.claim_date,
                            c.status, c.created_at
                     FROM claims c
                     JOIN claim_categories k ON k.id = c.category_id
                     WHERE c.status = 'pending' AND c.created_at < ?1
                       AND NOT EXISTS (
                           SELECT 1 FROM nudges n
                           WHERE n.user_id = c.user_id
                             AND n.type = ?2
                             AND json_extract(n.metadata, '$.claim_id') = c.id
                       )
                     ORDER BY c.created_at",
                )
                .map_err(|e| Error::Database(format!("failed to prepare claim scan: {e}")))?;
            let rows = stmt
                .query_map(params![cutoff, CLAIM_REMINDER], row_to_claim)
                .map_err(|e| Error::Database(format!("failed to scan claims: {e}")))?;
            let mut claims = Vec::new();
            for row in rows {
                claims.push(row.map_err(|e| Error::Database(format!("failed to read claim row: {e}")))?);
            }
            claims
        };

        let mut created = Vec::with_capacity(stale.len());
        for claim in stale {
            let content = format!(
                "Your RM{:.2} {} claim has been pending for more than {} days. Have you submitted the receipt?",
                claim.amount, claim.category, stale_after_days
            );
            let nudge = self.create(
                &claim.user_id,
                CLAIM_REMINDER,
                "Claim still pending 💸",
                &content,
                serde_json::json!({ "claim_id": claim.id }),
            )?;
            created.push(nudge);
        }

        if !created.is_empty() {
            info!("nudge scan created {} claim reminder(s)", created.len());
        }
        Ok(created)
    }
}
