//! crates/study_tracker_core/src/progress.rs
//!
//! The progress aggregator: folds each closed session into the resource's
//! running progress record and the day's stat bucket. Runs only on the
//! active -> closed transition and is idempotent per session id, which is
//! what makes at-least-once delivery from the client safe.

use chrono::FixedOffset;
use std::sync::Arc;
use tracing::debug;

use crate::domain::{DailyStat, ProgressRecord, Session};
use crate::ports::{ResourceCatalog, SessionStore, StoreResult};

/// Pages per minute for one session. A zero-duration session contributes
/// `0.0`, never NaN or infinity.
pub fn session_speed(pages_covered: u32, duration_secs: i64) -> f64 {
    if duration_secs <= 0 {
        return 0.0;
    }
    pages_covered as f64 / (duration_secs as f64 / 60.0)
}

pub struct ProgressAggregator {
    store: Arc<dyn SessionStore>,
    catalog: Arc<dyn ResourceCatalog>,
    /// Timezone used to bucket daily stats; configured, not UTC-naive.
    tz: FixedOffset,
    /// Seconds of study per day that flip `goal_met` on the daily bucket.
    daily_goal_secs: i64,
}

impl ProgressAggregator {
    pub fn new(
        store: Arc<dyn SessionStore>,
        catalog: Arc<dyn ResourceCatalog>,
        tz: FixedOffset,
        daily_goal_secs: i64,
    ) -> Self {
        Self {
            store,
            catalog,
            tz,
            daily_goal_secs,
        }
    }

    /// Folds a closed session into the resource's progress record and the
    /// day's stat bucket. Applying the same session twice leaves both
    /// unchanged: the record carries a last-applied-session marker that
    /// gates the whole update.
    pub async fn on_session_closed(&self, session: &Session) -> StoreResult<ProgressRecord> {
        let mut record = self
            .store
            .get_progress(session.resource_id)
            .await?
            .unwrap_or_else(|| ProgressRecord::empty(session.resource_id));

        if record.last_applied_session == Some(session.id) {
            debug!(session_id = %session.id, "session already aggregated, skipping");
            return Ok(record);
        }

        let speed = session_speed(session.pages_covered, session.total_duration_secs);
        let old_count = record.session_count as f64;
        record.average_speed =
            ((record.average_speed * old_count) + speed) / (old_count + 1.0);
        record.current_page = session.end_page;
        record.total_time_secs += session.total_duration_secs;
        record.session_count += 1;
        record.last_session_at = session.ended_at;
        record.last_applied_session = Some(session.id);

        if let Some(total_pages) = self.catalog.total_pages(session.resource_id).await? {
            if total_pages > 0 {
                let pct = session.end_page as f64 / total_pages as f64 * 100.0;
                record.completion_percentage = pct.clamp(0.0, 100.0);
            }
        }

        self.store.upsert_progress(&record).await?;
        self.accumulate_daily(session).await?;
        Ok(record)
    }

    /// Adds a closed session to its calendar-day bucket. The bucket date is
    /// the session's end date in the configured timezone.
    async fn accumulate_daily(&self, session: &Session) -> StoreResult<()> {
        let Some(ended_at) = session.ended_at else {
            return Ok(());
        };
        let date = ended_at.with_timezone(&self.tz).date_naive();

        let mut stat = self
            .store
            .get_daily_stat(date)
            .await?
            .unwrap_or_else(|| DailyStat::empty(date));

        stat.total_seconds += session.total_duration_secs;
        stat.pages_read += session.pages_covered;
        stat.session_count += 1;
        stat.resources.insert(session.resource_id);
        stat.goal_met = stat.total_seconds >= self.daily_goal_secs;

        self.store.upsert_daily_stat(&stat).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::MemoryStore;
    use chrono::{TimeZone, Utc};
    use uuid::Uuid;

    fn aggregator(store: Arc<MemoryStore>, daily_goal_secs: i64) -> ProgressAggregator {
        let tz = FixedOffset::east_opt(0).unwrap();
        ProgressAggregator::new(store.clone(), store, tz, daily_goal_secs)
    }

    fn closed_session(resource_id: Uuid, end_page: u32, secs: i64, pages: u32) -> Session {
        let started = Utc.with_ymd_and_hms(2024, 3, 10, 9, 0, 0).unwrap();
        let mut session = Session::open(resource_id, 1, started);
        session.active = false;
        session.ended_at = Some(started + chrono::Duration::seconds(secs));
        session.end_page = end_page;
        session.total_duration_secs = secs;
        session.pages_covered = pages;
        session
    }

    #[tokio::test]
    async fn applying_the_same_session_twice_changes_nothing() {
        let store = Arc::new(MemoryStore::new());
        let agg = aggregator(store.clone(), 1800);
        let resource_id = Uuid::new_v4();
        store.insert_resource(resource_id, 100);

        let session = closed_session(resource_id, 10, 600, 9);
        let first = agg.on_session_closed(&session).await.unwrap();
        let second = agg.on_session_closed(&session).await.unwrap();

        assert_eq!(first.total_time_secs, 600);
        assert_eq!(second.total_time_secs, 600);
        assert_eq!(second.session_count, 1);

        let stat = store
            .get_daily_stat(session.ended_at.unwrap().date_naive())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(stat.total_seconds, 600);
        assert_eq!(stat.session_count, 1);
    }

    #[tokio::test]
    async fn average_speed_is_an_equal_weight_running_mean() {
        let store = Arc::new(MemoryStore::new());
        let agg = aggregator(store.clone(), 1800);
        let resource_id = Uuid::new_v4();

        // 10 pages in 10 minutes = 1.0 ppm, then 2 pages in 1 minute = 2.0 ppm.
        let first = closed_session(resource_id, 10, 600, 10);
        let second = closed_session(resource_id, 12, 60, 2);
        agg.on_session_closed(&first).await.unwrap();
        let record = agg.on_session_closed(&second).await.unwrap();

        // Equal weight regardless of session length: (1.0 + 2.0) / 2.
        assert!((record.average_speed - 1.5).abs() < 1e-9);
        assert_eq!(record.session_count, 2);
        assert_eq!(record.current_page, 12);
    }

    #[tokio::test]
    async fn zero_duration_session_contributes_zero_speed() {
        let store = Arc::new(MemoryStore::new());
        let agg = aggregator(store.clone(), 1800);
        let resource_id = Uuid::new_v4();

        let session = closed_session(resource_id, 5, 0, 0);
        let record = agg.on_session_closed(&session).await.unwrap();
        assert_eq!(record.average_speed, 0.0);
        assert!(record.average_speed.is_finite());
    }

    #[tokio::test]
    async fn completion_percentage_is_clamped() {
        let store = Arc::new(MemoryStore::new());
        let agg = aggregator(store.clone(), 1800);
        let resource_id = Uuid::new_v4();
        store.insert_resource(resource_id, 10);

        // end_page past the catalog's page count still caps at 100%.
        let session = closed_session(resource_id, 15, 600, 14);
        let record = agg.on_session_closed(&session).await.unwrap();
        assert_eq!(record.completion_percentage, 100.0);
    }

    #[tokio::test]
    async fn unknown_resource_leaves_completion_untouched() {
        let store = Arc::new(MemoryStore::new());
        let agg = aggregator(store.clone(), 1800);
        let resource_id = Uuid::new_v4();

        let session = closed_session(resource_id, 15, 600, 14);
        let record = agg.on_session_closed(&session).await.unwrap();
        assert_eq!(record.completion_percentage, 0.0);
    }

    #[tokio::test]
    async fn daily_bucket_accumulates_and_flags_the_goal() {
        let store = Arc::new(MemoryStore::new());
        let agg = aggregator(store.clone(), 1000);
        let resource_a = Uuid::new_v4();
        let resource_b = Uuid::new_v4();

        let first = closed_session(resource_a, 10, 600, 9);
        agg.on_session_closed(&first).await.unwrap();
        let date = first.ended_at.unwrap().date_naive();

        let stat = store.get_daily_stat(date).await.unwrap().unwrap();
        assert_eq!(stat.total_seconds, 600);
        assert!(!stat.goal_met);

        let second = closed_session(resource_b, 4, 500, 3);
        agg.on_session_closed(&second).await.unwrap();

        let stat = store.get_daily_stat(date).await.unwrap().unwrap();
        assert_eq!(stat.total_seconds, 1100);
        assert_eq!(stat.pages_read, 12);
        assert_eq!(stat.session_count, 2);
        assert_eq!(stat.distinct_resources(), 2);
        assert!(stat.goal_met);
    }

    #[tokio::test]
    async fn bucket_date_follows_the_configured_timezone() {
        let store = Arc::new(MemoryStore::new());
        // UTC+9: a 23:30 UTC close lands on the next calendar day.
        let tz = FixedOffset::east_opt(9 * 3600).unwrap();
        let agg = ProgressAggregator::new(store.clone(), store.clone(), tz, 1800);
        let resource_id = Uuid::new_v4();

        let mut session = closed_session(resource_id, 5, 300, 4);
        session.ended_at = Some(Utc.with_ymd_and_hms(2024, 3, 10, 23, 30, 0).unwrap());
        agg.on_session_closed(&session).await.unwrap();

        let date = chrono::NaiveDate::from_ymd_opt(2024, 3, 11).unwrap();
        assert!(store.get_daily_stat(date).await.unwrap().is_some());
    }
}
