//! crates/study_tracker_core/src/memory.rs
//!
//! In-memory implementation of the store ports. This is the authoritative
//! store in single-process mode and the substrate for the engine tests.

use async_trait::async_trait;
use chrono::NaiveDate;
use std::collections::HashMap;
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};
use uuid::Uuid;

use crate::domain::{DailyStat, Goal, PageActivity, ProgressRecord, Session};
use crate::ports::{ResourceCatalog, SessionStore, StoreError, StoreResult};

#[derive(Default)]
struct Tables {
    sessions: HashMap<Uuid, Session>,
    activities: HashMap<Uuid, Vec<PageActivity>>,
    progress: HashMap<Uuid, ProgressRecord>,
    daily: HashMap<NaiveDate, DailyStat>,
    goals: HashMap<Uuid, Goal>,
    resources: HashMap<Uuid, u32>,
}

/// A store backed by process memory. Guards are never held across an await,
/// so a plain `std::sync::RwLock` is sufficient.
#[derive(Default)]
pub struct MemoryStore {
    tables: RwLock<Tables>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seeds the resource catalog with a page count. Resource management is
    /// outside the engine; tests and single-process deployments use this.
    pub fn insert_resource(&self, resource_id: Uuid, total_pages: u32) {
        if let Ok(mut tables) = self.tables.write() {
            tables.resources.insert(resource_id, total_pages);
        }
    }

    fn read(&self) -> StoreResult<RwLockReadGuard<'_, Tables>> {
        self.tables
            .read()
            .map_err(|e| StoreError::Unexpected(format!("store lock poisoned: {e}")))
    }

    fn write(&self) -> StoreResult<RwLockWriteGuard<'_, Tables>> {
        self.tables
            .write()
            .map_err(|e| StoreError::Unexpected(format!("store lock poisoned: {e}")))
    }
}

#[async_trait]
impl SessionStore for MemoryStore {
    async fn insert_session(&self, session: Session) -> StoreResult<()> {
        self.write()?.sessions.insert(session.id, session);
        Ok(())
    }

    async fn update_session(&self, session: &Session) -> StoreResult<()> {
        let mut tables = self.write()?;
        if !tables.sessions.contains_key(&session.id) {
            return Err(StoreError::NotFound(format!("Session {}", session.id)));
        }
        tables.sessions.insert(session.id, session.clone());
        Ok(())
    }

    async fn get_session(&self, session_id: Uuid) -> StoreResult<Session> {
        self.read()?
            .sessions
            .get(&session_id)
            .cloned()
            .ok_or_else(|| StoreError::NotFound(format!("Session {}", session_id)))
    }

    async fn get_active_session(&self, resource_id: Uuid) -> StoreResult<Option<Session>> {
        Ok(self
            .read()?
            .sessions
            .values()
            .find(|s| s.resource_id == resource_id && s.active)
            .cloned())
    }

    async fn list_active_sessions(&self) -> StoreResult<Vec<Session>> {
        let mut sessions: Vec<Session> = self
            .read()?
            .sessions
            .values()
            .filter(|s| s.active)
            .cloned()
            .collect();
        sessions.sort_by_key(|s| s.started_at);
        Ok(sessions)
    }

    async fn insert_activity(&self, activity: PageActivity) -> StoreResult<()> {
        self.write()?
            .activities
            .entry(activity.session_id)
            .or_default()
            .push(activity);
        Ok(())
    }

    async fn update_activity(&self, activity: &PageActivity) -> StoreResult<()> {
        let mut tables = self.write()?;
        let slot = tables
            .activities
            .get_mut(&activity.session_id)
            .and_then(|list| list.iter_mut().find(|a| a.id == activity.id))
            .ok_or_else(|| StoreError::NotFound(format!("PageActivity {}", activity.id)))?;
        *slot = activity.clone();
        Ok(())
    }

    async fn open_activity(&self, session_id: Uuid) -> StoreResult<Option<PageActivity>> {
        Ok(self
            .read()?
            .activities
            .get(&session_id)
            .and_then(|list| list.iter().find(|a| a.is_open()))
            .cloned())
    }

    async fn list_activities(&self, session_id: Uuid) -> StoreResult<Vec<PageActivity>> {
        let mut list = self
            .read()?
            .activities
            .get(&session_id)
            .cloned()
            .unwrap_or_default();
        list.sort_by_key(|a| a.entered_at);
        Ok(list)
    }

    async fn get_progress(&self, resource_id: Uuid) -> StoreResult<Option<ProgressRecord>> {
        Ok(self.read()?.progress.get(&resource_id).cloned())
    }

    async fn upsert_progress(&self, record: &ProgressRecord) -> StoreResult<()> {
        self.write()?
            .progress
            .insert(record.resource_id, record.clone());
        Ok(())
    }

    async fn get_daily_stat(&self, date: NaiveDate) -> StoreResult<Option<DailyStat>> {
        Ok(self.read()?.daily.get(&date).cloned())
    }

    async fn upsert_daily_stat(&self, stat: &DailyStat) -> StoreResult<()> {
        self.write()?.daily.insert(stat.date, stat.clone());
        Ok(())
    }

    async fn list_daily_stats(&self) -> StoreResult<Vec<DailyStat>> {
        let mut stats: Vec<DailyStat> = self.read()?.daily.values().cloned().collect();
        stats.sort_by_key(|s| s.date);
        Ok(stats)
    }

    async fn insert_goal(&self, goal: Goal) -> StoreResult<()> {
        self.write()?.goals.insert(goal.id, goal);
        Ok(())
    }

    async fn get_goal(&self, goal_id: Uuid) -> StoreResult<Goal> {
        self.read()?
            .goals
            .get(&goal_id)
            .cloned()
            .ok_or_else(|| StoreError::NotFound(format!("Goal {}", goal_id)))
    }

    async fn update_goal(&self, goal: &Goal) -> StoreResult<()> {
        let mut tables = self.write()?;
        if !tables.goals.contains_key(&goal.id) {
            return Err(StoreError::NotFound(format!("Goal {}", goal.id)));
        }
        tables.goals.insert(goal.id, goal.clone());
        Ok(())
    }

    async fn list_goals(&self) -> StoreResult<Vec<Goal>> {
        let mut goals: Vec<Goal> = self.read()?.goals.values().cloned().collect();
        goals.sort_by_key(|g| g.created_at);
        Ok(goals)
    }
}

#[async_trait]
impl ResourceCatalog for MemoryStore {
    async fn total_pages(&self, resource_id: Uuid) -> StoreResult<Option<u32>> {
        Ok(self.read()?.resources.get(&resource_id).copied())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    #[tokio::test]
    async fn active_session_lookup_ignores_closed_sessions() {
        let store = MemoryStore::new();
        let resource_id = Uuid::new_v4();

        let mut closed = Session::open(resource_id, 1, Utc::now());
        closed.active = false;
        store.insert_session(closed).await.unwrap();
        assert!(store.get_active_session(resource_id).await.unwrap().is_none());

        let open = Session::open(resource_id, 3, Utc::now());
        let open_id = open.id;
        store.insert_session(open).await.unwrap();
        let found = store.get_active_session(resource_id).await.unwrap().unwrap();
        assert_eq!(found.id, open_id);
    }

    #[tokio::test]
    async fn open_activity_returns_only_the_unclosed_row() {
        let store = MemoryStore::new();
        let session_id = Uuid::new_v4();
        let now = Utc::now();

        let mut first = PageActivity::open(session_id, 1, now);
        first.exited_at = Some(now);
        first.duration_secs = 5;
        store.insert_activity(first).await.unwrap();

        let second = PageActivity::open(session_id, 2, now);
        let second_id = second.id;
        store.insert_activity(second).await.unwrap();

        let open = store.open_activity(session_id).await.unwrap().unwrap();
        assert_eq!(open.id, second_id);
        assert_eq!(open.page, 2);
    }

    #[tokio::test]
    async fn update_of_missing_session_is_not_found() {
        let store = MemoryStore::new();
        let session = Session::open(Uuid::new_v4(), 1, Utc::now());
        let err = store.update_session(&session).await.unwrap_err();
        assert!(matches!(err, StoreError::NotFound(_)));
    }
}
