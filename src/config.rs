use chrono::NaiveTime;
use chrono_tz::Tz;
use dotenvy::dotenv;
use serde::Deserialize;
use std::env;
use std::fs;

/// Discord message limit is 2000 characters
pub const DISCORD_MESSAGE_LIMIT: usize = 2000;

#[derive(Clone)]
pub struct Config {
    pub discord_token: String,
    pub monitor_channel: u64,
    pub subscriber_channels: Vec<u64>,
    pub whitelist_users: Vec<String>,
    /// Local wall-clock time of the daily digest, in `timezone`.
    pub summary_time: NaiveTime,
    pub timezone: Tz,
    pub database_url: String,
    pub llm_url: String,
    pub llm_model: String,
    pub llm_api_key: Option<String>,
    pub summary_max_tokens: u32,
    pub status_message: String,
    // Timeout & retry settings
    pub llm_timeout_secs: u64,
    pub summary_retry_attempts: u32,
    pub summary_retry_backoff_secs: u64,
    pub history_retry_attempts: u32,
    pub history_retry_backoff_secs: u64,
    // Startup backfill bounds
    pub backfill_lookback_hours: i64,
    pub backfill_max_messages: usize,
}

impl Config {
    pub fn from_env() -> anyhow::Result<Self> {
        dotenv().ok();
        Self::build()
    }

    fn build() -> anyhow::Result<Self> {
        let (whitelist_users, subscriber_channels) = Self::load_channel_lists()?;

        let summary_time_raw =
            env::var("SUMMARY_TIME").unwrap_or_else(|_| "18:00".to_string());
        let summary_time = NaiveTime::parse_from_str(&summary_time_raw, "%H:%M")
            .map_err(|e| anyhow::anyhow!("SUMMARY_TIME must be HH:MM, got '{summary_time_raw}': {e}"))?;

        let timezone_raw =
            env::var("TIMEZONE").unwrap_or_else(|_| "Europe/Helsinki".to_string());
        let timezone: Tz = timezone_raw
            .parse()
            .map_err(|_| anyhow::anyhow!("TIMEZONE '{timezone_raw}' is not a valid IANA timezone"))?;

        Ok(Config {
            discord_token: env::var("DISCORD_TOKEN")
                .map_err(|_| anyhow::anyhow!("DISCORD_TOKEN must be set"))?,
            monitor_channel: env::var("MONITOR_CHANNEL")
                .map_err(|_| anyhow::anyhow!("MONITOR_CHANNEL must be set"))?
                .parse()
                .map_err(|_| anyhow::anyhow!("MONITOR_CHANNEL must be a valid channel id"))?,
            subscriber_channels,
            whitelist_users,
            summary_time,
            timezone,
            database_url: env::var("DATABASE_URL")
                .unwrap_or_else(|_| "data/tidings.db".to_string()),
            llm_url: env::var("LLM_URL")
                .unwrap_or_else(|_| "http://localhost:8080/v1".to_string()),
            llm_model: env::var("LLM_MODEL").unwrap_or_else(|_| "local-model".to_string()),
            llm_api_key: env::var("LLM_API_KEY").ok(),
            summary_max_tokens: env::var("SUMMARY_MAX_TOKENS")
                .unwrap_or_else(|_| "1000".to_string())
                .parse()
                .unwrap_or(1000),
            status_message: env::var("STATUS_MESSAGE")
                .unwrap_or_else(|_| "Reading the news".to_string()),
            llm_timeout_secs: env::var("LLM_TIMEOUT_SECS")
                .unwrap_or_else(|_| "120".to_string())
                .parse()
                .unwrap_or(120),
            summary_retry_attempts: env::var("SUMMARY_RETRY_ATTEMPTS")
                .unwrap_or_else(|_| "3".to_string())
                .parse()
                .unwrap_or(3),
            summary_retry_backoff_secs: env::var("SUMMARY_RETRY_BACKOFF_SECS")
                .unwrap_or_else(|_| "60".to_string())
                .parse()
                .unwrap_or(60),
            history_retry_attempts: env::var("HISTORY_RETRY_ATTEMPTS")
                .unwrap_or_else(|_| "3".to_string())
                .parse()
                .unwrap_or(3),
            history_retry_backoff_secs: env::var("HISTORY_RETRY_BACKOFF_SECS")
                .unwrap_or_else(|_| "5".to_string())
                .parse()
                .unwrap_or(5),
            backfill_lookback_hours: env::var("BACKFILL_LOOKBACK_HOURS")
                .unwrap_or_else(|_| "24".to_string())
                .parse()
                .unwrap_or(24),
            backfill_max_messages: env::var("BACKFILL_MAX_MESSAGES")
                .unwrap_or_else(|_| "1000".to_string())
                .parse()
                .unwrap_or(1000),
        })
    }

    /// Whitelist and subscriber lists come from `config.toml` when present,
    /// falling back to comma-separated env variables.
    fn load_channel_lists() -> anyhow::Result<(Vec<String>, Vec<u64>)> {
        #[derive(Deserialize)]
        struct WhitelistSection {
            users: Vec<String>,
        }
        #[derive(Deserialize)]
        struct SubscribersSection {
            channels: Vec<u64>,
        }
        #[derive(Deserialize)]
        struct FileConfig {
            whitelist: WhitelistSection,
            subscribers: SubscribersSection,
        }

        if let Ok(content) = fs::read_to_string("config.toml") {
            let parsed: FileConfig = toml::from_str(&content)
                .map_err(|e| anyhow::anyhow!("invalid config.toml: {e}"))?;
            return Ok((parsed.whitelist.users, parsed.subscribers.channels));
        }

        let users = env::var("WHITELIST_USERS")
            .unwrap_or_default()
            .split(',')
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(str::to_string)
            .collect();

        let mut channels = Vec::new();
        for raw in env::var("SUBSCRIBER_CHANNELS")
            .unwrap_or_default()
            .split(',')
            .map(str::trim)
            .filter(|s| !s.is_empty())
        {
            let id: u64 = raw
                .parse()
                .map_err(|_| anyhow::anyhow!("SUBSCRIBER_CHANNELS entry '{raw}' is not a channel id"))?;
            channels.push(id);
        }

        Ok((users, channels))
    }
}

impl std::fmt::Debug for Config {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Config")
            .field("discord_token", &"[REDACTED]")
            .field("monitor_channel", &self.monitor_channel)
            .field("subscriber_channels", &self.subscriber_channels)
            .field("whitelist_users", &self.whitelist_users)
            .field("summary_time", &self.summary_time)
            .field("timezone", &self.timezone)
            .field("database_url", &self.database_url)
            .field("llm_url", &self.llm_url)
            .field("llm_model", &self.llm_model)
            .field(
                "llm_api_key",
                &self.llm_api_key.as_ref().map(|_| "[REDACTED]"),
            )
            .field("summary_max_tokens", &self.summary_max_tokens)
            .field("status_message", &self.status_message)
            .field("llm_timeout_secs", &self.llm_timeout_secs)
            .field("summary_retry_attempts", &self.summary_retry_attempts)
            .field(
                "summary_retry_backoff_secs",
                &self.summary_retry_backoff_secs,
            )
            .field("history_retry_attempts", &self.history_retry_attempts)
            .field(
                "history_retry_backoff_secs",
                &self.history_retry_backoff_secs,
            )
            .field("backfill_lookback_hours", &self.backfill_lookback_hours)
            .field("backfill_max_messages", &self.backfill_max_messages)
            .finish()
    }
}
