/// Schema for the retained message log and bot state.
///
/// `discord_id` is the platform message id; making it the primary key means
/// replayed history and live ingestion can never double-insert the same
/// message. `bot_state` is a key/value table whose only current key is
/// `last_summary_at`.
pub const INIT_SQL: &str = "
    CREATE TABLE IF NOT EXISTS messages (
        discord_id TEXT PRIMARY KEY,
        channel_id TEXT NOT NULL,
        author_id TEXT NOT NULL,
        author_name TEXT NOT NULL,
        content TEXT NOT NULL,
        created_at INTEGER NOT NULL
    );
    CREATE INDEX IF NOT EXISTS idx_messages_channel_date ON messages (channel_id, created_at);

    CREATE TABLE IF NOT EXISTS bot_state (
        key TEXT PRIMARY KEY,
        value TEXT NOT NULL
    );
";
