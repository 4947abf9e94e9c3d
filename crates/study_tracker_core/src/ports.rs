//! crates/study_tracker_core/src/ports.rs
//!
//! Defines the storage contracts (traits) for the tracking engine.
//! These traits form the boundary of the hexagonal architecture, allowing the
//! engine to be independent of the concrete store (in-memory or Postgres).

use async_trait::async_trait;
use chrono::NaiveDate;
use uuid::Uuid;

use crate::domain::{DailyStat, Goal, PageActivity, ProgressRecord, Session};

//=========================================================================================
// Generic Store Error and Result Types
//=========================================================================================

/// A generic error type for all store operations.
/// This abstracts away the specific errors from concrete backends.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("Item not found: {0}")]
    NotFound(String),
    #[error("An unexpected error occurred: {0}")]
    Unexpected(String),
}

/// A convenience type alias for `Result<T, StoreError>`.
pub type StoreResult<T> = Result<T, StoreError>;

//=========================================================================================
// Store Ports (Traits)
//=========================================================================================

/// The single authoritative store for sessions, page activities, progress
/// records, daily stats and goals. All engine mutations flow through this
/// trait; no caller holds its own copy of progress that can drift from it.
#[async_trait]
pub trait SessionStore: Send + Sync {
    // --- Sessions ---
    async fn insert_session(&self, session: Session) -> StoreResult<()>;

    async fn update_session(&self, session: &Session) -> StoreResult<()>;

    async fn get_session(&self, session_id: Uuid) -> StoreResult<Session>;

    /// The at-most-one-active-session invariant makes this a point lookup.
    async fn get_active_session(&self, resource_id: Uuid) -> StoreResult<Option<Session>>;

    /// All currently active sessions, across resources. Used by the reaper.
    async fn list_active_sessions(&self) -> StoreResult<Vec<Session>>;

    // --- Page Activities ---
    async fn insert_activity(&self, activity: PageActivity) -> StoreResult<()>;

    async fn update_activity(&self, activity: &PageActivity) -> StoreResult<()>;

    /// The single open activity of a session, if any.
    async fn open_activity(&self, session_id: Uuid) -> StoreResult<Option<PageActivity>>;

    /// All activities of a session, ordered by enter time ascending.
    async fn list_activities(&self, session_id: Uuid) -> StoreResult<Vec<PageActivity>>;

    // --- Progress Records ---
    async fn get_progress(&self, resource_id: Uuid) -> StoreResult<Option<ProgressRecord>>;

    async fn upsert_progress(&self, record: &ProgressRecord) -> StoreResult<()>;

    // --- Daily Stats ---
    async fn get_daily_stat(&self, date: NaiveDate) -> StoreResult<Option<DailyStat>>;

    async fn upsert_daily_stat(&self, stat: &DailyStat) -> StoreResult<()>;

    /// All daily stats, ordered by date ascending.
    async fn list_daily_stats(&self) -> StoreResult<Vec<DailyStat>>;

    // --- Goals ---
    async fn insert_goal(&self, goal: Goal) -> StoreResult<()>;

    async fn get_goal(&self, goal_id: Uuid) -> StoreResult<Goal>;

    async fn update_goal(&self, goal: &Goal) -> StoreResult<()>;

    async fn list_goals(&self) -> StoreResult<Vec<Goal>>;
}

/// The engine's only dependency on the external resource catalog: the page
/// count needed for completion percentages. Resource creation and deletion
/// are managed elsewhere.
#[async_trait]
pub trait ResourceCatalog: Send + Sync {
    async fn total_pages(&self, resource_id: Uuid) -> StoreResult<Option<u32>>;
}
