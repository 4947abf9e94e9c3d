//! crates/study_tracker_core/src/lifecycle.rs
//!
//! The session lifecycle manager. Owns the at-most-one-active-session
//! invariant and the per-resource locking that is the engine's concurrency
//! boundary: all mutations for one resource serialize through the keyed
//! mutex held here, while different resources proceed in parallel.

use chrono::{DateTime, Duration, Utc};
use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::domain::{
    ActiveSessionView, CloseReason, PageActivity, Session, SessionStats, SweptSession,
};
use crate::ports::{SessionStore, StoreError};
use crate::progress::{session_speed, ProgressAggregator};

//=========================================================================================
// Engine Error Type
//=========================================================================================

#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    /// An end or page-change signal arrived with nothing active. Surfaced to
    /// the caller rather than retried silently.
    #[error("No active session for resource {0}")]
    NoActiveSession(Uuid),

    #[error(transparent)]
    Store(#[from] StoreError),
}

pub type EngineResult<T> = Result<T, EngineError>;

//=========================================================================================
// Session Lifecycle Manager
//=========================================================================================

pub struct SessionLifecycleManager {
    store: Arc<dyn SessionStore>,
    aggregator: ProgressAggregator,
    /// Keyed per-resource mutexes. Guards are held for the duration of one
    /// lifecycle operation, including the reaper's force-closes. Entries are
    /// evicted after a close once no task holds them, so the map tracks the
    /// working set rather than every resource ever touched.
    locks: Mutex<HashMap<Uuid, Arc<Mutex<()>>>>,
}

impl SessionLifecycleManager {
    pub fn new(store: Arc<dyn SessionStore>, aggregator: ProgressAggregator) -> Self {
        Self {
            store,
            aggregator,
            locks: Mutex::new(HashMap::new()),
        }
    }

    async fn resource_lock(&self, resource_id: Uuid) -> Arc<Mutex<()>> {
        let mut locks = self.locks.lock().await;
        locks
            .entry(resource_id)
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }

    /// Drops the resource's lock entry if no task holds or awaits it. The
    /// strong count is read under the map lock, so a task that has already
    /// fetched the Arc keeps the entry alive until it is done; it never ends
    /// up locking a mutex a later arrival cannot see.
    async fn evict_resource_lock(&self, resource_id: Uuid) {
        let mut locks = self.locks.lock().await;
        if let Some(entry) = locks.get(&resource_id) {
            if Arc::strong_count(entry) == 1 {
                locks.remove(&resource_id);
            }
        }
    }

    /// Starts a new session for the resource, opening its first page
    /// activity at `start_page`.
    ///
    /// If a session is already active for the resource it is force-closed
    /// first with reason `Superseded`, using the new session's start time as
    /// its end time and its last-known page as its end page. This models a
    /// client that refreshed or crashed without sending an end signal, so a
    /// pre-existing session is never a reason to fail.
    pub async fn start_session(&self, resource_id: Uuid, start_page: u32) -> EngineResult<Session> {
        self.start_session_at(resource_id, start_page, Utc::now())
            .await
    }

    pub async fn start_session_at(
        &self,
        resource_id: Uuid,
        start_page: u32,
        now: DateTime<Utc>,
    ) -> EngineResult<Session> {
        let lock = self.resource_lock(resource_id).await;
        let _guard = lock.lock().await;

        if let Some(stale) = self.store.get_active_session(resource_id).await? {
            info!(
                resource_id = %resource_id,
                superseded = %stale.id,
                "active session superseded by a new start signal"
            );
            self.close_locked(stale, None, now, CloseReason::Superseded, None)
                .await?;
        }

        let session = Session::open(resource_id, start_page, now);
        self.store.insert_session(session.clone()).await?;
        self.store
            .insert_activity(PageActivity::open(session.id, start_page, now))
            .await?;
        Ok(session)
    }

    /// Closes the activity for `from_page` and opens one for `to_page`.
    ///
    /// Duplicate or out-of-order signals, where the open activity is not on
    /// `from_page`, are silent no-ops so the one-open-activity invariant
    /// holds. A session that is no longer active is an error.
    pub async fn record_page_change(
        &self,
        session_id: Uuid,
        from_page: u32,
        to_page: u32,
        timestamp: DateTime<Utc>,
    ) -> EngineResult<()> {
        let resource_id = self.store.get_session(session_id).await?.resource_id;
        let lock = self.resource_lock(resource_id).await;
        let _guard = lock.lock().await;

        let mut session = self.store.get_session(session_id).await?;
        if !session.active {
            return Err(EngineError::NoActiveSession(session.resource_id));
        }

        match self.store.open_activity(session_id).await? {
            Some(mut activity) if activity.page == from_page => {
                close_activity(&mut activity, timestamp);
                self.store.update_activity(&activity).await?;
            }
            Some(activity) => {
                debug!(
                    session_id = %session_id,
                    open_page = activity.page,
                    from_page,
                    "page change does not match the open activity, ignoring"
                );
                return Ok(());
            }
            None => {
                debug!(session_id = %session_id, "no open activity to close, opening fresh");
            }
        }

        self.store
            .insert_activity(PageActivity::open(session_id, to_page, timestamp))
            .await?;
        session.end_page = to_page;
        self.store.update_session(&session).await?;
        Ok(())
    }

    /// Ends the resource's active session explicitly, returning the closed
    /// session and its stats. Fails with `NoActiveSession` if nothing is
    /// active for the resource.
    pub async fn end_session(
        &self,
        resource_id: Uuid,
        end_page: u32,
        notes: Option<String>,
    ) -> EngineResult<(Session, SessionStats)> {
        self.end_session_at(resource_id, end_page, notes, Utc::now())
            .await
    }

    pub async fn end_session_at(
        &self,
        resource_id: Uuid,
        end_page: u32,
        notes: Option<String>,
        now: DateTime<Utc>,
    ) -> EngineResult<(Session, SessionStats)> {
        let lock = self.resource_lock(resource_id).await;
        let guard = lock.lock().await;

        let result = match self.store.get_active_session(resource_id).await {
            Ok(Some(session)) => {
                self.close_locked(session, Some(end_page), now, CloseReason::Explicit, notes)
                    .await
            }
            Ok(None) => Err(EngineError::NoActiveSession(resource_id)),
            Err(e) => Err(e.into()),
        };

        drop(guard);
        drop(lock);
        self.evict_resource_lock(resource_id).await;
        result
    }

    /// Read-only lookup of the resource's active session, with the live
    /// wall-clock duration and currently open page for display.
    pub async fn get_active_session(
        &self,
        resource_id: Uuid,
    ) -> EngineResult<Option<ActiveSessionView>> {
        self.get_active_session_at(resource_id, Utc::now()).await
    }

    pub async fn get_active_session_at(
        &self,
        resource_id: Uuid,
        now: DateTime<Utc>,
    ) -> EngineResult<Option<ActiveSessionView>> {
        let Some(session) = self.store.get_active_session(resource_id).await? else {
            return Ok(None);
        };
        let current_page = self
            .store
            .open_activity(session.id)
            .await?
            .map(|a| a.page)
            .unwrap_or(session.end_page);
        let current_duration_secs = (now - session.started_at).num_seconds().max(0);
        Ok(Some(ActiveSessionView {
            session,
            current_page,
            current_duration_secs,
        }))
    }

    /// Reaper entry point: force-closes the session if it is still active
    /// and still stale once the per-resource lock is held, so a genuine
    /// client end signal racing the sweep always wins.
    ///
    /// The end time credited is `last signal + threshold`, not `now`: a
    /// session abandoned at 2pm must not bank eight hours because the sweep
    /// ran at 10pm.
    pub async fn expire_session(
        &self,
        session_id: Uuid,
        threshold: Duration,
        now: DateTime<Utc>,
    ) -> EngineResult<Option<SweptSession>> {
        let resource_id = self.store.get_session(session_id).await?.resource_id;
        let lock = self.resource_lock(resource_id).await;
        let guard = lock.lock().await;

        let result = self.expire_locked(session_id, threshold, now).await;

        drop(guard);
        drop(lock);
        self.evict_resource_lock(resource_id).await;
        result
    }

    async fn expire_locked(
        &self,
        session_id: Uuid,
        threshold: Duration,
        now: DateTime<Utc>,
    ) -> EngineResult<Option<SweptSession>> {
        let session = self.store.get_session(session_id).await?;
        if !session.active {
            return Ok(None);
        }

        let last_signal = self.last_signal_at(&session).await?;
        if now - last_signal <= threshold {
            return Ok(None);
        }

        let cutoff = last_signal + threshold;
        let idle_secs = (now - last_signal).num_seconds();
        info!(
            session_id = %session.id,
            resource_id = %session.resource_id,
            idle_secs,
            "force-closing abandoned session"
        );
        let (closed, _stats) = self
            .close_locked(session, None, cutoff, CloseReason::Expired, None)
            .await?;

        Ok(Some(SweptSession {
            session_id: closed.id,
            resource_id: closed.resource_id,
            closed_at: cutoff,
            idle_secs,
        }))
    }

    /// The most recent moment the client was provably present: the open
    /// activity's enter time, else the latest closed activity's exit time,
    /// else the session start.
    pub(crate) async fn last_signal_at(&self, session: &Session) -> EngineResult<DateTime<Utc>> {
        if let Some(open) = self.store.open_activity(session.id).await? {
            return Ok(open.entered_at);
        }
        let latest_exit = self
            .store
            .list_activities(session.id)
            .await?
            .iter()
            .filter_map(|a| a.exited_at)
            .max();
        Ok(latest_exit.unwrap_or(session.started_at))
    }

    /// Shared close path for every transition out of `active`. Must be
    /// called with the resource lock held.
    ///
    /// `end_page = None` means "last known page": the open activity's page
    /// if one exists, else the session's recorded end page. Totals come from
    /// the closed activities, so every second attributed to the session is
    /// backed by exactly one closed activity.
    async fn close_locked(
        &self,
        mut session: Session,
        end_page: Option<u32>,
        end_time: DateTime<Utc>,
        reason: CloseReason,
        notes: Option<String>,
    ) -> EngineResult<(Session, SessionStats)> {
        let last_known_page = match self.store.open_activity(session.id).await? {
            Some(mut activity) => {
                let page = activity.page;
                close_activity(&mut activity, end_time);
                self.store.update_activity(&activity).await?;
                page
            }
            None => session.end_page,
        };

        let activities = self.store.list_activities(session.id).await?;
        let closed: Vec<&PageActivity> =
            activities.iter().filter(|a| a.exited_at.is_some()).collect();
        let total_duration_secs: i64 = closed.iter().map(|a| a.duration_secs).sum();
        // Distinct pages actually read: a final zero-length close (the page
        // the user ended on an instant after entering it) does not count.
        let pages_covered = closed
            .iter()
            .filter(|a| a.duration_secs > 0)
            .map(|a| a.page)
            .collect::<BTreeSet<u32>>()
            .len() as u32;

        session.end_page = end_page.unwrap_or(last_known_page);
        session.ended_at = Some(end_time);
        session.total_duration_secs = total_duration_secs;
        session.pages_covered = pages_covered;
        session.active = false;
        session.close_reason = Some(reason);
        if notes.is_some() {
            session.notes = notes;
        }
        self.store.update_session(&session).await?;

        // Aggregation failures are logged for reconciliation, never allowed
        // to take down the tracking loop: the session itself is closed.
        if let Err(e) = self.aggregator.on_session_closed(&session).await {
            error!(session_id = %session.id, "progress aggregation failed: {e}");
        }

        let stats = SessionStats {
            duration_secs: total_duration_secs,
            pages_covered,
            reading_speed: session_speed(pages_covered, total_duration_secs),
        };
        Ok((session, stats))
    }
}

/// Closes an activity at `exit`, fixing its duration permanently. Negative
/// spans from clock skew or out-of-order signals clamp to zero so the
/// aggregate stays non-decreasing.
fn close_activity(activity: &mut PageActivity, exit: DateTime<Utc>) {
    let span = (exit - activity.entered_at).num_seconds();
    if span < 0 {
        warn!(
            activity_id = %activity.id,
            page = activity.page,
            span,
            "negative page activity duration clamped to zero"
        );
    }
    activity.exited_at = Some(exit);
    activity.duration_secs = span.max(0);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::MemoryStore;
    use chrono::{FixedOffset, TimeZone};

    fn manager() -> (Arc<MemoryStore>, SessionLifecycleManager) {
        let store = Arc::new(MemoryStore::new());
        let tz = FixedOffset::east_opt(0).unwrap();
        let aggregator = ProgressAggregator::new(store.clone(), store.clone(), tz, 1800);
        let manager = SessionLifecycleManager::new(store.clone(), aggregator);
        (store, manager)
    }

    #[tokio::test]
    async fn resource_lock_entries_are_evicted_after_a_close() {
        let (_store, manager) = manager();
        let resource_id = Uuid::new_v4();
        let t0 = Utc.with_ymd_and_hms(2024, 3, 10, 9, 0, 0).unwrap();

        manager.start_session_at(resource_id, 1, t0).await.unwrap();
        assert_eq!(manager.locks.lock().await.len(), 1);

        manager
            .end_session_at(resource_id, 2, None, t0 + Duration::seconds(60))
            .await
            .unwrap();
        assert!(manager.locks.lock().await.is_empty());
    }

    #[tokio::test]
    async fn eviction_covers_the_failed_end_path_too() {
        let (_store, manager) = manager();
        let resource_id = Uuid::new_v4();
        let t0 = Utc.with_ymd_and_hms(2024, 3, 10, 9, 0, 0).unwrap();

        let err = manager
            .end_session_at(resource_id, 2, None, t0)
            .await
            .unwrap_err();
        assert!(matches!(err, EngineError::NoActiveSession(_)));
        assert!(manager.locks.lock().await.is_empty());
    }

    #[tokio::test]
    async fn expiry_evicts_the_lock_entry() {
        let (_store, manager) = manager();
        let resource_id = Uuid::new_v4();
        let t0 = Utc.with_ymd_and_hms(2024, 3, 10, 9, 0, 0).unwrap();

        let session = manager.start_session_at(resource_id, 1, t0).await.unwrap();
        let swept = manager
            .expire_session(session.id, Duration::minutes(15), t0 + Duration::hours(2))
            .await
            .unwrap();
        assert!(swept.is_some());
        assert!(manager.locks.lock().await.is_empty());
    }
}
