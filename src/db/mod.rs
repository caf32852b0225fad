mod schema;

use chrono::{DateTime, Utc};
use rusqlite::{Connection, OptionalExtension, Result};
use std::sync::{Arc, Mutex};
use tracing::{debug, info};

const LAST_SUMMARY_AT_KEY: &str = "last_summary_at";

/// A retained message as stored in the log.
#[derive(Clone, Debug, PartialEq)]
pub struct StoredMessage {
    pub discord_id: String,
    pub channel_id: String,
    pub author_id: String,
    pub author_name: String,
    pub content: String,
    pub created_at: DateTime<Utc>,
}

/// Durable, deduplicated message log plus the scheduler's persisted state.
///
/// All access goes through this handle; the inner connection is serialized
/// behind a mutex so the live ingestion path and recovery replay can call in
/// concurrently.
#[derive(Clone)]
pub struct Database {
    conn: Arc<Mutex<Connection>>,
}

impl Database {
    pub fn new(database_url: &str) -> Result<Self> {
        let conn = Connection::open(database_url)?;

        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    pub fn execute_init(&self) -> anyhow::Result<()> {
        info!("Database: Initializing schema...");
        let conn = self.conn.lock().unwrap();
        conn.execute_batch(schema::INIT_SQL)?;
        debug!("Database: Schema initialized successfully");
        Ok(())
    }

    /// Insert a retained message. Returns `true` if a row was written,
    /// `false` if the id was already present (re-ingestion is a no-op).
    pub fn append_message(
        &self,
        discord_id: &str,
        channel_id: &str,
        author_id: &str,
        author_name: &str,
        content: &str,
        created_at: DateTime<Utc>,
    ) -> anyhow::Result<bool> {
        debug!(
            "Database: Appending message {} from user {} in channel {}",
            discord_id, author_id, channel_id
        );
        let conn = self.conn.lock().unwrap();
        let inserted = conn.execute(
            "INSERT OR IGNORE INTO messages (discord_id, channel_id, author_id, author_name, content, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            (
                discord_id,
                channel_id,
                author_id,
                author_name,
                content,
                created_at.timestamp(),
            ),
        )?;
        Ok(inserted > 0)
    }

    /// Messages in the half-open window `[start, end)` for one channel,
    /// ascending by timestamp with ties broken by message id.
    pub fn messages_between(
        &self,
        channel_id: &str,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> anyhow::Result<Vec<StoredMessage>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare(
            "SELECT discord_id, channel_id, author_id, author_name, content, created_at
             FROM messages
             WHERE channel_id = ?1 AND created_at >= ?2 AND created_at < ?3
             ORDER BY created_at ASC, discord_id ASC",
        )?;

        let rows = stmt.query_map((channel_id, start.timestamp(), end.timestamp()), |row| {
            Ok(StoredMessage {
                discord_id: row.get(0)?,
                channel_id: row.get(1)?,
                author_id: row.get(2)?,
                author_name: row.get(3)?,
                content: row.get(4)?,
                created_at: DateTime::from_timestamp(row.get::<_, i64>(5)?, 0)
                    .unwrap_or_default(),
            })
        })?;

        let mut messages = Vec::new();
        for row in rows {
            messages.push(row?);
        }
        Ok(messages)
    }

    /// Timestamp of the newest retained message for a channel, or `None` if
    /// nothing has ever been ingested. Recovery treats `None` as "replay
    /// from the configured lookback", not as an error.
    pub fn latest_timestamp(&self, channel_id: &str) -> anyhow::Result<Option<DateTime<Utc>>> {
        let conn = self.conn.lock().unwrap();
        let ts: Option<i64> = conn
            .query_row(
                "SELECT MAX(created_at) FROM messages WHERE channel_id = ?1",
                [channel_id],
                |row| row.get(0),
            )
            .optional()?
            .flatten();
        Ok(ts.and_then(|t| DateTime::from_timestamp(t, 0)))
    }

    /// Instant of the most recently completed summary run, if any.
    pub fn last_summary_at(&self) -> anyhow::Result<Option<DateTime<Utc>>> {
        let conn = self.conn.lock().unwrap();
        let value: Option<String> = conn
            .query_row(
                "SELECT value FROM bot_state WHERE key = ?1",
                [LAST_SUMMARY_AT_KEY],
                |row| row.get(0),
            )
            .optional()?;

        match value {
            Some(raw) => {
                let secs: i64 = raw
                    .parse()
                    .map_err(|e| anyhow::anyhow!("corrupt {LAST_SUMMARY_AT_KEY} value '{raw}': {e}"))?;
                Ok(DateTime::from_timestamp(secs, 0))
            }
            None => Ok(None),
        }
    }

    /// Persist the completion instant of a summary run. Written only after a
    /// run fully completes, so a crash mid-run never advances the state.
    pub fn set_last_summary_at(&self, instant: DateTime<Utc>) -> anyhow::Result<()> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "INSERT OR REPLACE INTO bot_state (key, value) VALUES (?1, ?2)",
            (LAST_SUMMARY_AT_KEY, instant.timestamp().to_string()),
        )?;
        Ok(())
    }
}
