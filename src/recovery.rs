use chrono::{Duration as ChronoDuration, Utc};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::sleep;
use tracing::{info, warn};

use crate::db::Database;
use crate::gateway::{snowflake_at, GatewayMessage, HistoryFetcher};
use crate::ingest;
use crate::whitelist::Whitelist;

const PAGE_SIZE: u8 = 100;

pub struct RecoverySettings {
    pub channel_id: u64,
    /// First-run lookback when the store is empty.
    pub lookback_hours: i64,
    /// Hard cap on fetched history items per recovery run.
    pub max_messages: usize,
    pub retry_attempts: u32,
    pub retry_backoff: Duration,
}

/// Closes the gap between the last stored message and the present by
/// replaying channel history through the normal retention path. Runs once at
/// startup, before live events are processed; an unrecoverable fetch failure
/// aborts startup rather than letting the bot run with a hole in its log.
pub struct RecoveryCoordinator {
    db: Database,
    whitelist: Whitelist,
    fetcher: Arc<dyn HistoryFetcher>,
    settings: RecoverySettings,
}

impl RecoveryCoordinator {
    pub fn new(
        db: Database,
        whitelist: Whitelist,
        fetcher: Arc<dyn HistoryFetcher>,
        settings: RecoverySettings,
    ) -> Self {
        Self {
            db,
            whitelist,
            fetcher,
            settings,
        }
    }

    /// Replay missed history. Returns the number of newly stored messages.
    pub async fn run(&self) -> anyhow::Result<usize> {
        let channel = self.settings.channel_id.to_string();

        let boundary = match self.db.latest_timestamp(&channel)? {
            Some(ts) => {
                info!("Recovery: replaying history since last stored message at {}", ts);
                ts
            }
            None => {
                let horizon = Utc::now() - ChronoDuration::hours(self.settings.lookback_hours);
                info!(
                    "Recovery: empty store, backfilling the last {}h (since {})",
                    self.settings.lookback_hours, horizon
                );
                horizon
            }
        };

        let mut cursor = snowflake_at(boundary);
        let mut fetched = 0usize;
        let mut stored = 0usize;

        loop {
            let page = self.fetch_page_with_retry(cursor).await?;
            let Some(last) = page.last() else {
                break;
            };
            cursor = last.id;
            fetched += page.len();

            for message in &page {
                if ingest::retain(&self.db, &self.whitelist, message)? {
                    stored += 1;
                }
            }

            if fetched >= self.settings.max_messages {
                warn!(
                    "Recovery: hit backfill cap of {} messages; older history is not replayed",
                    self.settings.max_messages
                );
                break;
            }
        }

        info!("Recovery complete: {} fetched, {} stored", fetched, stored);
        Ok(stored)
    }

    async fn fetch_page_with_retry(&self, cursor: u64) -> anyhow::Result<Vec<GatewayMessage>> {
        let mut attempt = 0u32;
        loop {
            match self
                .fetcher
                .fetch_page(self.settings.channel_id, cursor, PAGE_SIZE)
                .await
            {
                Ok(page) => return Ok(page),
                Err(e) => {
                    attempt += 1;
                    if attempt >= self.settings.retry_attempts {
                        return Err(e.context(format!(
                            "history fetch failed after {} attempts",
                            attempt
                        )));
                    }
                    warn!(
                        "Recovery: history fetch failed (attempt {}/{}): {}",
                        attempt, self.settings.retry_attempts, e
                    );
                    sleep(self.settings.retry_backoff).await;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use chrono::{DateTime, TimeZone};
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Mutex;

    /// History source over a fixed message list, paginated by id cursor the
    /// way Discord does it, with optional injected failures.
    struct MockHistory {
        messages: Mutex<Vec<GatewayMessage>>,
        fail_remaining: AtomicU32,
        calls: AtomicU32,
    }

    impl MockHistory {
        fn new(messages: Vec<GatewayMessage>) -> Self {
            Self {
                messages: Mutex::new(messages),
                fail_remaining: AtomicU32::new(0),
                calls: AtomicU32::new(0),
            }
        }

        fn failing(messages: Vec<GatewayMessage>, failures: u32) -> Self {
            let mock = Self::new(messages);
            mock.fail_remaining.store(failures, Ordering::SeqCst);
            mock
        }
    }

    #[async_trait]
    impl HistoryFetcher for MockHistory {
        async fn fetch_page(
            &self,
            _channel_id: u64,
            after: u64,
            limit: u8,
        ) -> anyhow::Result<Vec<GatewayMessage>> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if self.fail_remaining.load(Ordering::SeqCst) > 0 {
                self.fail_remaining.fetch_sub(1, Ordering::SeqCst);
                anyhow::bail!("gateway unavailable");
            }

            let mut page: Vec<GatewayMessage> = self
                .messages
                .lock()
                .unwrap()
                .iter()
                .filter(|m| m.id > after)
                .cloned()
                .collect();
            page.sort_by_key(|m| m.id);
            page.truncate(limit as usize);
            Ok(page)
        }
    }

    // Within the first-run lookback horizon, on a whole second so stored
    // timestamps round-trip exactly.
    fn base_time() -> DateTime<Utc> {
        Utc.timestamp_opt(Utc::now().timestamp() - 3600, 0).unwrap()
    }

    fn history_message(offset_secs: i64, author_id: &str, content: &str) -> GatewayMessage {
        let created_at = base_time() + ChronoDuration::seconds(offset_secs);
        GatewayMessage {
            // Realistic snowflakes so timestamp-derived cursors order correctly.
            id: snowflake_at(created_at) + 17,
            channel_id: 500,
            author_id: author_id.to_string(),
            author_name: format!("user-{author_id}"),
            content: content.to_string(),
            created_at,
        }
    }

    fn settings() -> RecoverySettings {
        RecoverySettings {
            channel_id: 500,
            lookback_hours: 24,
            max_messages: 1000,
            retry_attempts: 3,
            retry_backoff: Duration::from_millis(1),
        }
    }

    fn test_db() -> Database {
        let db = Database::new(":memory:").unwrap();
        db.execute_init().unwrap();
        db
    }

    #[tokio::test]
    async fn test_replay_stores_whitelisted_history() {
        let db = test_db();
        let whitelist = Whitelist::new(["42".to_string()]).unwrap();
        let fetcher = Arc::new(MockHistory::new(vec![
            history_message(10, "42", "first"),
            history_message(20, "99", "ignored"),
            history_message(30, "42", "second"),
        ]));

        let coordinator =
            RecoveryCoordinator::new(db.clone(), whitelist, fetcher, settings());
        let stored = coordinator.run().await.unwrap();
        assert_eq!(stored, 2);

        let messages = db
            .messages_between("500", base_time(), base_time() + ChronoDuration::hours(1))
            .unwrap();
        let contents: Vec<_> = messages.iter().map(|m| m.content.as_str()).collect();
        assert_eq!(contents, vec!["first", "second"]);
    }

    #[tokio::test]
    async fn test_second_run_is_noop() {
        let db = test_db();
        let whitelist = Whitelist::new(["42".to_string()]).unwrap();
        let fetcher = Arc::new(MockHistory::new(vec![
            history_message(10, "42", "first"),
            history_message(30, "42", "second"),
        ]));

        let coordinator = RecoveryCoordinator::new(
            db.clone(),
            whitelist.clone(),
            fetcher.clone(),
            settings(),
        );
        assert_eq!(coordinator.run().await.unwrap(), 2);

        // No new external history between runs: nothing stored the second time.
        let coordinator = RecoveryCoordinator::new(db.clone(), whitelist, fetcher, settings());
        assert_eq!(coordinator.run().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_transient_fetch_failures_are_retried() {
        let db = test_db();
        let whitelist = Whitelist::new(["42".to_string()]).unwrap();
        let fetcher = Arc::new(MockHistory::failing(
            vec![history_message(10, "42", "survived the outage")],
            2,
        ));

        let coordinator =
            RecoveryCoordinator::new(db.clone(), whitelist, fetcher, settings());
        assert_eq!(coordinator.run().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_retry_budget_exhaustion_is_fatal() {
        let db = test_db();
        let whitelist = Whitelist::new(["42".to_string()]).unwrap();
        let fetcher = Arc::new(MockHistory::failing(
            vec![history_message(10, "42", "unreachable")],
            10,
        ));

        let coordinator = RecoveryCoordinator::new(db.clone(), whitelist, fetcher, settings());
        assert!(coordinator.run().await.is_err());

        // Nothing was stored; startup must not proceed on a partial replay.
        assert_eq!(db.latest_timestamp("500").unwrap(), None);
    }

    #[tokio::test]
    async fn test_backfill_cap() {
        let db = test_db();
        let whitelist = Whitelist::new(["42".to_string()]).unwrap();
        let messages: Vec<GatewayMessage> = (0..300)
            .map(|i| history_message(i * 10, "42", &format!("msg {i}")))
            .collect();
        let fetcher = Arc::new(MockHistory::new(messages));

        let mut capped = settings();
        capped.max_messages = 150;
        let coordinator = RecoveryCoordinator::new(db.clone(), whitelist, fetcher, capped);

        // Two 100-message pages get fetched, then the cap stops pagination.
        let stored = coordinator.run().await.unwrap();
        assert_eq!(stored, 200);
    }
}
