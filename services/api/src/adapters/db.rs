//! services/api/src/adapters/db.rs
//!
//! This module contains the database adapter, which is the concrete implementation
//! of the `SessionStore` and `ResourceCatalog` ports from the `core` crate. It
//! handles all interactions with the PostgreSQL database using `sqlx`.

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use sqlx::{FromRow, PgPool};
use std::collections::BTreeSet;
use uuid::Uuid;

use study_tracker_core::domain::{
    CloseReason, DailyStat, Goal, PageActivity, ProgressRecord, Session,
};
use study_tracker_core::ports::{
    ResourceCatalog, SessionStore, StoreError, StoreResult,
};

//=========================================================================================
// The Main Adapter Struct
//=========================================================================================

/// A database adapter that implements the store ports against Postgres.
#[derive(Clone)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    /// Creates a new `PgStore`.
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// A helper function to run database migrations at startup.
    pub async fn run_migrations(&self) -> Result<(), sqlx::Error> {
        sqlx::migrate!("./migrations").run(&self.pool).await?;
        Ok(())
    }
}

fn unexpected(e: sqlx::Error) -> StoreError {
    StoreError::Unexpected(e.to_string())
}

//=========================================================================================
// "Impure" Database Record Structs
//=========================================================================================

#[derive(FromRow)]
struct SessionRecord {
    id: Uuid,
    resource_id: Uuid,
    started_at: DateTime<Utc>,
    ended_at: Option<DateTime<Utc>>,
    start_page: i32,
    end_page: i32,
    total_duration_secs: i64,
    pages_covered: i32,
    notes: Option<String>,
    active: bool,
    close_reason: Option<String>,
}
impl SessionRecord {
    fn to_domain(self) -> Session {
        Session {
            id: self.id,
            resource_id: self.resource_id,
            started_at: self.started_at,
            ended_at: self.ended_at,
            start_page: self.start_page as u32,
            end_page: self.end_page as u32,
            total_duration_secs: self.total_duration_secs,
            pages_covered: self.pages_covered as u32,
            notes: self.notes,
            active: self.active,
            close_reason: self.close_reason.as_deref().and_then(CloseReason::parse),
        }
    }
}

#[derive(FromRow)]
struct PageActivityRecord {
    id: Uuid,
    session_id: Uuid,
    page: i32,
    entered_at: DateTime<Utc>,
    exited_at: Option<DateTime<Utc>>,
    duration_secs: i64,
}
impl PageActivityRecord {
    fn to_domain(self) -> PageActivity {
        PageActivity {
            id: self.id,
            session_id: self.session_id,
            page: self.page as u32,
            entered_at: self.entered_at,
            exited_at: self.exited_at,
            duration_secs: self.duration_secs,
        }
    }
}

#[derive(FromRow)]
struct ProgressRecordRow {
    resource_id: Uuid,
    current_page: i32,
    total_time_secs: i64,
    session_count: i32,
    average_speed: f64,
    last_session_at: Option<DateTime<Utc>>,
    completion_percentage: f64,
    last_applied_session: Option<Uuid>,
}
impl ProgressRecordRow {
    fn to_domain(self) -> ProgressRecord {
        ProgressRecord {
            resource_id: self.resource_id,
            current_page: self.current_page as u32,
            total_time_secs: self.total_time_secs,
            session_count: self.session_count as u32,
            average_speed: self.average_speed,
            last_session_at: self.last_session_at,
            completion_percentage: self.completion_percentage,
            last_applied_session: self.last_applied_session,
        }
    }
}

#[derive(FromRow)]
struct DailyStatRecord {
    date: NaiveDate,
    total_seconds: i64,
    pages_read: i32,
    session_count: i32,
    resource_ids: Vec<Uuid>,
    goal_met: bool,
}
impl DailyStatRecord {
    fn to_domain(self) -> DailyStat {
        DailyStat {
            date: self.date,
            total_seconds: self.total_seconds,
            pages_read: self.pages_read as u32,
            session_count: self.session_count as u32,
            resources: self.resource_ids.into_iter().collect::<BTreeSet<Uuid>>(),
            goal_met: self.goal_met,
        }
    }
}

#[derive(FromRow)]
struct GoalRecord {
    id: Uuid,
    name: String,
    target_value: f64,
    current_progress: f64,
    is_achieved: bool,
    achieved_at: Option<DateTime<Utc>>,
    created_at: DateTime<Utc>,
}
impl GoalRecord {
    fn to_domain(self) -> Goal {
        Goal {
            id: self.id,
            name: self.name,
            target_value: self.target_value,
            current_progress: self.current_progress,
            is_achieved: self.is_achieved,
            achieved_at: self.achieved_at,
            created_at: self.created_at,
        }
    }
}

const SESSION_COLUMNS: &str = "id, resource_id, started_at, ended_at, start_page, end_page, \
     total_duration_secs, pages_covered, notes, active, close_reason";

//=========================================================================================
// `SessionStore` Trait Implementation
//=========================================================================================

#[async_trait]
impl SessionStore for PgStore {
    async fn insert_session(&self, session: Session) -> StoreResult<()> {
        sqlx::query(
            "INSERT INTO sessions (id, resource_id, started_at, ended_at, start_page, end_page, \
             total_duration_secs, pages_covered, notes, active, close_reason) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11)",
        )
        .bind(session.id)
        .bind(session.resource_id)
        .bind(session.started_at)
        .bind(session.ended_at)
        .bind(session.start_page as i32)
        .bind(session.end_page as i32)
        .bind(session.total_duration_secs)
        .bind(session.pages_covered as i32)
        .bind(&session.notes)
        .bind(session.active)
        .bind(session.close_reason.map(|r| r.as_str()))
        .execute(&self.pool)
        .await
        .map_err(unexpected)?;
        Ok(())
    }

    async fn update_session(&self, session: &Session) -> StoreResult<()> {
        let result = sqlx::query(
            "UPDATE sessions SET ended_at = $1, end_page = $2, total_duration_secs = $3, \
             pages_covered = $4, notes = $5, active = $6, close_reason = $7 WHERE id = $8",
        )
        .bind(session.ended_at)
        .bind(session.end_page as i32)
        .bind(session.total_duration_secs)
        .bind(session.pages_covered as i32)
        .bind(&session.notes)
        .bind(session.active)
        .bind(session.close_reason.map(|r| r.as_str()))
        .bind(session.id)
        .execute(&self.pool)
        .await
        .map_err(unexpected)?;

        if result.rows_affected() == 0 {
            return Err(StoreError::NotFound(format!("Session {}", session.id)));
        }
        Ok(())
    }

    async fn get_session(&self, session_id: Uuid) -> StoreResult<Session> {
        let record = sqlx::query_as::<_, SessionRecord>(&format!(
            "SELECT {SESSION_COLUMNS} FROM sessions WHERE id = $1"
        ))
        .bind(session_id)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| match e {
            sqlx::Error::RowNotFound => StoreError::NotFound(format!("Session {} not found", session_id)),
            _ => unexpected(e),
        })?;
        Ok(record.to_domain())
    }

    async fn get_active_session(&self, resource_id: Uuid) -> StoreResult<Option<Session>> {
        let record = sqlx::query_as::<_, SessionRecord>(&format!(
            "SELECT {SESSION_COLUMNS} FROM sessions WHERE resource_id = $1 AND active"
        ))
        .bind(resource_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(unexpected)?;
        Ok(record.map(SessionRecord::to_domain))
    }

    async fn list_active_sessions(&self) -> StoreResult<Vec<Session>> {
        let records = sqlx::query_as::<_, SessionRecord>(&format!(
            "SELECT {SESSION_COLUMNS} FROM sessions WHERE active ORDER BY started_at ASC"
        ))
        .fetch_all(&self.pool)
        .await
        .map_err(unexpected)?;
        Ok(records.into_iter().map(SessionRecord::to_domain).collect())
    }

    async fn insert_activity(&self, activity: PageActivity) -> StoreResult<()> {
        sqlx::query(
            "INSERT INTO page_activities (id, session_id, page, entered_at, exited_at, duration_secs) \
             VALUES ($1, $2, $3, $4, $5, $6)",
        )
        .bind(activity.id)
        .bind(activity.session_id)
        .bind(activity.page as i32)
        .bind(activity.entered_at)
        .bind(activity.exited_at)
        .bind(activity.duration_secs)
        .execute(&self.pool)
        .await
        .map_err(unexpected)?;
        Ok(())
    }

    async fn update_activity(&self, activity: &PageActivity) -> StoreResult<()> {
        let result = sqlx::query(
            "UPDATE page_activities SET exited_at = $1, duration_secs = $2 WHERE id = $3",
        )
        .bind(activity.exited_at)
        .bind(activity.duration_secs)
        .bind(activity.id)
        .execute(&self.pool)
        .await
        .map_err(unexpected)?;

        if result.rows_affected() == 0 {
            return Err(StoreError::NotFound(format!("PageActivity {}", activity.id)));
        }
        Ok(())
    }

    async fn open_activity(&self, session_id: Uuid) -> StoreResult<Option<PageActivity>> {
        let record = sqlx::query_as::<_, PageActivityRecord>(
            "SELECT id, session_id, page, entered_at, exited_at, duration_secs \
             FROM page_activities WHERE session_id = $1 AND exited_at IS NULL",
        )
        .bind(session_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(unexpected)?;
        Ok(record.map(PageActivityRecord::to_domain))
    }

    async fn list_activities(&self, session_id: Uuid) -> StoreResult<Vec<PageActivity>> {
        let records = sqlx::query_as::<_, PageActivityRecord>(
            "SELECT id, session_id, page, entered_at, exited_at, duration_secs \
             FROM page_activities WHERE session_id = $1 ORDER BY entered_at ASC",
        )
        .bind(session_id)
        .fetch_all(&self.pool)
        .await
        .map_err(unexpected)?;
        Ok(records.into_iter().map(PageActivityRecord::to_domain).collect())
    }

    async fn get_progress(&self, resource_id: Uuid) -> StoreResult<Option<ProgressRecord>> {
        let record = sqlx::query_as::<_, ProgressRecordRow>(
            "SELECT resource_id, current_page, total_time_secs, session_count, average_speed, \
             last_session_at, completion_percentage, last_applied_session \
             FROM progress_records WHERE resource_id = $1",
        )
        .bind(resource_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(unexpected)?;
        Ok(record.map(ProgressRecordRow::to_domain))
    }

    async fn upsert_progress(&self, record: &ProgressRecord) -> StoreResult<()> {
        sqlx::query(
            "INSERT INTO progress_records (resource_id, current_page, total_time_secs, \
             session_count, average_speed, last_session_at, completion_percentage, last_applied_session) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8) \
             ON CONFLICT (resource_id) DO UPDATE SET \
             current_page = EXCLUDED.current_page, total_time_secs = EXCLUDED.total_time_secs, \
             session_count = EXCLUDED.session_count, average_speed = EXCLUDED.average_speed, \
             last_session_at = EXCLUDED.last_session_at, \
             completion_percentage = EXCLUDED.completion_percentage, \
             last_applied_session = EXCLUDED.last_applied_session",
        )
        .bind(record.resource_id)
        .bind(record.current_page as i32)
        .bind(record.total_time_secs)
        .bind(record.session_count as i32)
        .bind(record.average_speed)
        .bind(record.last_session_at)
        .bind(record.completion_percentage)
        .bind(record.last_applied_session)
        .execute(&self.pool)
        .await
        .map_err(unexpected)?;
        Ok(())
    }

    async fn get_daily_stat(&self, date: NaiveDate) -> StoreResult<Option<DailyStat>> {
        let record = sqlx::query_as::<_, DailyStatRecord>(
            "SELECT date, total_seconds, pages_read, session_count, resource_ids, goal_met \
             FROM daily_stats WHERE date = $1",
        )
        .bind(date)
        .fetch_optional(&self.pool)
        .await
        .map_err(unexpected)?;
        Ok(record.map(DailyStatRecord::to_domain))
    }

    async fn upsert_daily_stat(&self, stat: &DailyStat) -> StoreResult<()> {
        let resource_ids: Vec<Uuid> = stat.resources.iter().copied().collect();
        sqlx::query(
            "INSERT INTO daily_stats (date, total_seconds, pages_read, session_count, resource_ids, goal_met) \
             VALUES ($1, $2, $3, $4, $5, $6) \
             ON CONFLICT (date) DO UPDATE SET \
             total_seconds = EXCLUDED.total_seconds, pages_read = EXCLUDED.pages_read, \
             session_count = EXCLUDED.session_count, resource_ids = EXCLUDED.resource_ids, \
             goal_met = EXCLUDED.goal_met",
        )
        .bind(stat.date)
        .bind(stat.total_seconds)
        .bind(stat.pages_read as i32)
        .bind(stat.session_count as i32)
        .bind(&resource_ids)
        .bind(stat.goal_met)
        .execute(&self.pool)
        .await
        .map_err(unexpected)?;
        Ok(())
    }

    async fn list_daily_stats(&self) -> StoreResult<Vec<DailyStat>> {
        let records = sqlx::query_as::<_, DailyStatRecord>(
            "SELECT date, total_seconds, pages_read, session_count, resource_ids, goal_met \
             FROM daily_stats ORDER BY date ASC",
        )
        .fetch_all(&self.pool)
        .await
        .map_err(unexpected)?;
        Ok(records.into_iter().map(DailyStatRecord::to_domain).collect())
    }

    async fn insert_goal(&self, goal: Goal) -> StoreResult<()> {
        sqlx::query(
            "INSERT INTO goals (id, name, target_value, current_progress, is_achieved, achieved_at, created_at) \
             VALUES ($1, $2, $3, $4, $5, $6, $7)",
        )
        .bind(goal.id)
        .bind(&goal.name)
        .bind(goal.target_value)
        .bind(goal.current_progress)
        .bind(goal.is_achieved)
        .bind(goal.achieved_at)
        .bind(goal.created_at)
        .execute(&self.pool)
        .await
        .map_err(unexpected)?;
        Ok(())
    }

    async fn get_goal(&self, goal_id: Uuid) -> StoreResult<Goal> {
        let record = sqlx::query_as::<_, GoalRecord>(
            "SELECT id, name, target_value, current_progress, is_achieved, achieved_at, created_at \
             FROM goals WHERE id = $1",
        )
        .bind(goal_id)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| match e {
            sqlx::Error::RowNotFound => StoreError::NotFound(format!("Goal {} not found", goal_id)),
            _ => unexpected(e),
        })?;
        Ok(record.to_domain())
    }

    async fn update_goal(&self, goal: &Goal) -> StoreResult<()> {
        let result = sqlx::query(
            "UPDATE goals SET current_progress = $1, is_achieved = $2, achieved_at = $3 WHERE id = $4",
        )
        .bind(goal.current_progress)
        .bind(goal.is_achieved)
        .bind(goal.achieved_at)
        .bind(goal.id)
        .execute(&self.pool)
        .await
        .map_err(unexpected)?;

        if result.rows_affected() == 0 {
            return Err(StoreError::NotFound(format!("Goal {}", goal.id)));
        }
        Ok(())
    }

    async fn list_goals(&self) -> StoreResult<Vec<Goal>> {
        let records = sqlx::query_as::<_, GoalRecord>(
            "SELECT id, name, target_value, current_progress, is_achieved, achieved_at, created_at \
             FROM goals ORDER BY created_at ASC",
        )
        .fetch_all(&self.pool)
        .await
        .map_err(unexpected)?;
        Ok(records.into_iter().map(GoalRecord::to_domain).collect())
    }
}

//=========================================================================================
// `ResourceCatalog` Trait Implementation
//=========================================================================================

#[async_trait]
impl ResourceCatalog for PgStore {
    async fn total_pages(&self, resource_id: Uuid) -> StoreResult<Option<u32>> {
        let total: Option<i32> = sqlx::query_scalar(
            "SELECT total_pages FROM resources WHERE id = $1",
        )
        .bind(resource_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(unexpected)?;
        Ok(total.map(|t| t.max(0) as u32))
    }
}
