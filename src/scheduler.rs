use chrono::{DateTime, Duration as ChronoDuration, NaiveDate, NaiveTime, TimeZone, Utc};
use chrono_tz::Tz;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::sleep;
use tracing::{error, info, warn};

use crate::db::Database;
use crate::error::SummaryError;
use crate::gateway::ChannelSink;
use crate::summary::{self, SummaryGenerator};

pub struct SchedulerSettings {
    pub monitor_channel: u64,
    pub subscriber_channels: Vec<u64>,
    /// Local wall-clock time of the daily run.
    pub summary_time: NaiveTime,
    pub timezone: Tz,
    pub retry_attempts: u32,
    pub retry_backoff: Duration,
}

/// Fires summary generation once per calendar day in the configured
/// timezone, surviving restarts without duplicate or skipped runs.
/// `last_summary_at` lives in the message store and is only advanced after a
/// run fully completes.
pub struct SummaryScheduler {
    db: Database,
    generator: SummaryGenerator,
    sink: Arc<dyn ChannelSink>,
    /// Serializes scheduled and manual runs; only one firing at a time.
    run_lock: tokio::sync::Mutex<()>,
    settings: SchedulerSettings,
}

impl SummaryScheduler {
    pub fn new(
        db: Database,
        generator: SummaryGenerator,
        sink: Arc<dyn ChannelSink>,
        settings: SchedulerSettings,
    ) -> Self {
        Self {
            db,
            generator,
            sink,
            run_lock: tokio::sync::Mutex::new(()),
            settings,
        }
    }

    /// Background loop: wait for the next trigger instant, fire, repeat.
    /// Only storage failures escape; everything else is handled per window.
    pub async fn run(&self) -> anyhow::Result<()> {
        // An abandoned trigger is remembered in memory only, so scheduling
        // moves on to the next day while last_summary_at stays put and the
        // unsummarized messages roll into the next window.
        let mut abandoned: Option<DateTime<Utc>> = None;

        loop {
            let last = self.db.last_summary_at()?;
            let covered_through = [last, abandoned].into_iter().flatten().max();
            let trigger = next_trigger(
                Utc::now(),
                covered_through,
                self.settings.summary_time,
                self.settings.timezone,
            );
            info!("Next daily summary scheduled for {}", trigger);

            let delay = (trigger - Utc::now()).to_std().unwrap_or(Duration::ZERO);
            sleep(delay).await;

            if !self.fire(trigger, last).await? {
                abandoned = Some(trigger);
            }
        }
    }

    /// One scheduled firing for the window ending at `trigger`. Retries
    /// summarization failures a bounded number of times, then abandons the
    /// day's run without advancing `last_summary_at`. Returns `true` when
    /// the run completed, `false` when the window was abandoned.
    async fn fire(
        &self,
        trigger: DateTime<Utc>,
        last: Option<DateTime<Utc>>,
    ) -> anyhow::Result<bool> {
        let _guard = self.run_lock.lock().await;

        let period_start = last.unwrap_or(trigger - ChronoDuration::hours(24));
        if trigger - period_start > ChronoDuration::hours(25) {
            warn!(
                "Summary window [{}, {}) spans more than a day; catching up after an outage",
                period_start, trigger
            );
        }

        for attempt in 1..=self.settings.retry_attempts {
            match self
                .generator
                .generate(self.settings.monitor_channel, period_start, trigger)
                .await
            {
                Ok(text) => {
                    summary::deliver(
                        self.sink.as_ref(),
                        &self.settings.subscriber_channels,
                        &text,
                    )
                    .await;
                    self.db.set_last_summary_at(trigger)?;
                    info!("Daily summary completed for window [{}, {})", period_start, trigger);
                    return Ok(true);
                }
                Err(SummaryError::Storage(e)) => return Err(e),
                Err(SummaryError::SummarizationFailed(e)) => {
                    warn!(
                        "Summary attempt {}/{} failed: {}",
                        attempt, self.settings.retry_attempts, e
                    );
                    if attempt < self.settings.retry_attempts {
                        sleep(self.settings.retry_backoff).await;
                    }
                }
            }
        }

        error!(
            "Abandoning summary window [{}, {}); scheduling resumes with the next day",
            period_start, trigger
        );
        Ok(false)
    }

    /// On-demand digest of the trailing 24 hours. Serialized behind the same
    /// lock as scheduled runs and never touches `last_summary_at`, so a
    /// manual invocation cannot suppress the day's automatic run.
    pub async fn run_manual(&self) -> Result<String, SummaryError> {
        let _guard = self.run_lock.lock().await;

        let period_end = Utc::now();
        let period_start = period_end - ChronoDuration::hours(24);
        self.generator
            .generate(self.settings.monitor_channel, period_start, period_end)
            .await
    }
}

/// Compute the next trigger instant for a daily run at `summary_time` in
/// `tz`, given the completion instant of the previous run.
///
/// If a trigger instant at or before `now` is still uncovered (strictly
/// after `last_summary_at`), the most recent such instant is returned so an
/// overdue run fires immediately; a whole outage collapses into one catch-up
/// run. Otherwise the earliest future instant strictly after both `now` and
/// `last_summary_at` is returned, which guarantees at most one firing per
/// calendar day across restarts.
pub fn next_trigger(
    now: DateTime<Utc>,
    last_summary_at: Option<DateTime<Utc>>,
    summary_time: NaiveTime,
    tz: Tz,
) -> DateTime<Utc> {
    let today = now.with_timezone(&tz).date_naive();
    let mut day = today.pred_opt().unwrap_or(today);
    let mut overdue: Option<DateTime<Utc>> = None;

    loop {
        if let Some(instant) = trigger_on(day, summary_time, tz) {
            let uncovered = last_summary_at.is_none_or(|l| instant > l);
            if instant <= now {
                // Past instants count as overdue only once a run has ever
                // completed; a fresh install waits for its first scheduled time.
                if last_summary_at.is_some() && uncovered {
                    overdue = Some(instant);
                }
            } else {
                if let Some(due) = overdue {
                    return due;
                }
                if uncovered {
                    return instant;
                }
            }
        }
        day = day.succ_opt().unwrap_or(day);
    }
}

/// The trigger instant on one calendar day, resolved through the timezone
/// database. Ambiguous local times (DST fall-back) take the first
/// occurrence; nonexistent local times (spring-forward gap) shift one hour
/// later.
fn trigger_on(day: NaiveDate, summary_time: NaiveTime, tz: Tz) -> Option<DateTime<Utc>> {
    let naive = day.and_time(summary_time);
    let resolved = match tz.from_local_datetime(&naive) {
        chrono::LocalResult::Single(dt) => Some(dt),
        chrono::LocalResult::Ambiguous(first, _) => Some(first),
        chrono::LocalResult::None => tz
            .from_local_datetime(&(naive + ChronoDuration::hours(1)))
            .earliest(),
    };
    resolved.map(|dt| dt.with_timezone(&Utc))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::LlmError;
    use crate::llm::SummaryBackend;
    use async_trait::async_trait;
    use chrono_tz::Europe::Helsinki;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Mutex;

    fn t(s: &str) -> DateTime<Utc> {
        s.parse().unwrap()
    }

    fn six_pm() -> NaiveTime {
        NaiveTime::from_hms_opt(18, 0, 0).unwrap()
    }

    // Helsinki is UTC+2 in winter, UTC+3 in summer; 18:00 local is 16:00Z
    // and 15:00Z respectively.

    #[test]
    fn test_next_trigger_today_when_still_ahead() {
        let now = t("2024-01-10T10:00:00Z");
        let next = next_trigger(now, None, six_pm(), Helsinki);
        assert_eq!(next, t("2024-01-10T16:00:00Z"));
    }

    #[test]
    fn test_next_trigger_tomorrow_when_passed_and_no_history() {
        let now = t("2024-01-10T17:00:00Z");
        let next = next_trigger(now, None, six_pm(), Helsinki);
        assert_eq!(next, t("2024-01-11T16:00:00Z"));
    }

    #[test]
    fn test_overdue_window_fires_immediately() {
        // Last run completed at yesterday's trigger; today's trigger already
        // passed. The scheduler must fire now for today, exactly once.
        let last = t("2024-01-09T16:00:00Z");
        let now = t("2024-01-10T20:00:00Z");
        let next = next_trigger(now, Some(last), six_pm(), Helsinki);
        assert_eq!(next, t("2024-01-10T16:00:00Z"));

        // After that run completes, the same inputs yield tomorrow: no
        // double fire even if the process restarts right after completion.
        let next = next_trigger(now, Some(t("2024-01-10T16:00:00Z")), six_pm(), Helsinki);
        assert_eq!(next, t("2024-01-11T16:00:00Z"));
    }

    #[test]
    fn test_restart_just_after_fire_waits_a_day() {
        let trigger = t("2024-01-10T16:00:00Z");
        let now = t("2024-01-10T16:00:05Z");
        let next = next_trigger(now, Some(trigger), six_pm(), Helsinki);
        assert_eq!(next, t("2024-01-11T16:00:00Z"));
    }

    #[test]
    fn test_multiday_outage_collapses_to_one_catchup() {
        // Three missed days: one immediate catch-up at the most recent due
        // instant, not one run per missed day.
        let last = t("2024-01-07T16:00:00Z");
        let now = t("2024-01-10T20:00:00Z");
        let next = next_trigger(now, Some(last), six_pm(), Helsinki);
        assert_eq!(next, t("2024-01-10T16:00:00Z"));
    }

    #[test]
    fn test_dst_spring_forward_gap() {
        // Helsinki skips 03:00..04:00 local on 2024-03-31. A 03:30 trigger
        // does not exist that day and shifts one hour later: 04:30 EEST,
        // which is 01:30Z.
        let half_past_three = NaiveTime::from_hms_opt(3, 30, 0).unwrap();
        let now = t("2024-03-31T00:00:00Z");
        let next = next_trigger(now, None, half_past_three, Helsinki);
        assert_eq!(next, t("2024-03-31T01:30:00Z"));
    }

    #[test]
    fn test_dst_fall_back_ambiguity() {
        // Helsinki repeats 03:00..04:00 local on 2024-10-27. The first
        // occurrence of 03:30 wins: 03:30 EEST = 00:30Z.
        let half_past_three = NaiveTime::from_hms_opt(3, 30, 0).unwrap();
        let now = t("2024-10-26T12:00:00Z");
        let next = next_trigger(now, None, half_past_three, Helsinki);
        assert_eq!(next, t("2024-10-27T00:30:00Z"));
    }

    // Firing-path tests with mocked backend and sink.

    struct CountingBackend {
        fail_remaining: AtomicU32,
        calls: AtomicU32,
    }

    #[async_trait]
    impl SummaryBackend for CountingBackend {
        async fn summarize(&self, _prompt: &str, _max_tokens: u32) -> Result<String, LlmError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if self.fail_remaining.load(Ordering::SeqCst) > 0 {
                self.fail_remaining.fetch_sub(1, Ordering::SeqCst);
                return Err(LlmError::Timeout);
            }
            Ok("the day's news".to_string())
        }
    }

    struct RecordingSink {
        sent: Mutex<Vec<(u64, String)>>,
    }

    #[async_trait]
    impl ChannelSink for RecordingSink {
        async fn send(&self, channel_id: u64, text: &str) -> anyhow::Result<()> {
            self.sent.lock().unwrap().push((channel_id, text.to_string()));
            Ok(())
        }
    }

    fn scheduler_under_test(
        failures: u32,
    ) -> (SummaryScheduler, Database, Arc<CountingBackend>, Arc<RecordingSink>) {
        let db = Database::new(":memory:").unwrap();
        db.execute_init().unwrap();
        // One retained message so generation actually hits the backend.
        db.append_message(
            "m1",
            "500",
            "42",
            "alice",
            "something happened",
            t("2024-01-10T12:00:00Z"),
        )
        .unwrap();

        let backend = Arc::new(CountingBackend {
            fail_remaining: AtomicU32::new(failures),
            calls: AtomicU32::new(0),
        });
        let sink = Arc::new(RecordingSink {
            sent: Mutex::new(Vec::new()),
        });
        let generator = SummaryGenerator::new(db.clone(), backend.clone(), 1000);
        let scheduler = SummaryScheduler::new(
            db.clone(),
            generator,
            sink.clone(),
            SchedulerSettings {
                monitor_channel: 500,
                subscriber_channels: vec![1, 2],
                summary_time: six_pm(),
                timezone: Helsinki,
                retry_attempts: 3,
                retry_backoff: Duration::from_millis(1),
            },
        );
        (scheduler, db, backend, sink)
    }

    #[tokio::test]
    async fn test_fire_success_persists_state_and_delivers() {
        let (scheduler, db, backend, sink) = scheduler_under_test(0);
        let trigger = t("2024-01-10T16:00:00Z");

        assert!(scheduler.fire(trigger, None).await.unwrap());

        assert_eq!(backend.calls.load(Ordering::SeqCst), 1);
        assert_eq!(db.last_summary_at().unwrap(), Some(trigger));

        let sent = sink.sent.lock().unwrap();
        let channels: Vec<u64> = sent.iter().map(|(c, _)| *c).collect();
        assert_eq!(channels, vec![1, 2]);
        assert!(sent[0].1.contains("the day's news"));
    }

    #[tokio::test]
    async fn test_fire_retries_transient_failures() {
        let (scheduler, db, backend, _sink) = scheduler_under_test(2);
        let trigger = t("2024-01-10T16:00:00Z");

        assert!(scheduler.fire(trigger, None).await.unwrap());

        assert_eq!(backend.calls.load(Ordering::SeqCst), 3);
        assert_eq!(db.last_summary_at().unwrap(), Some(trigger));
    }

    #[tokio::test]
    async fn test_fire_abandons_window_after_retry_budget() {
        // Backend times out on every attempt: three tries, then the day is
        // abandoned without touching last_summary_at, and the next trigger
        // computation lands on the following day as usual.
        let (scheduler, db, backend, sink) = scheduler_under_test(u32::MAX);
        let trigger = t("2024-01-10T16:00:00Z");

        let completed = scheduler.fire(trigger, None).await.unwrap();
        assert!(!completed);

        assert_eq!(backend.calls.load(Ordering::SeqCst), 3);
        assert_eq!(db.last_summary_at().unwrap(), None);
        assert!(sink.sent.lock().unwrap().is_empty());

        // The run loop treats the abandoned trigger as covered, so the next
        // computation lands on the following day.
        let next = next_trigger(t("2024-01-10T16:05:00Z"), Some(trigger), six_pm(), Helsinki);
        assert_eq!(next, t("2024-01-11T16:00:00Z"));
    }

    #[tokio::test]
    async fn test_manual_run_does_not_advance_schedule_state() {
        let (scheduler, db, backend, sink) = scheduler_under_test(0);

        // Manual run first; its trailing-24h window holds nothing, so it
        // returns the deterministic no-activity text without a backend call
        // and leaves the schedule alone.
        let text = scheduler.run_manual().await.unwrap();
        assert!(text.contains("Daily Channel Summary"));
        assert_eq!(backend.calls.load(Ordering::SeqCst), 0);
        assert_eq!(db.last_summary_at().unwrap(), None);
        assert!(sink.sent.lock().unwrap().is_empty());

        // The scheduled run for the same day still fires and is the only
        // writer of last_summary_at.
        let trigger = t("2024-01-10T16:00:00Z");
        assert!(scheduler.fire(trigger, None).await.unwrap());
        assert_eq!(db.last_summary_at().unwrap(), Some(trigger));
        assert_eq!(backend.calls.load(Ordering::SeqCst), 1);
    }
}
