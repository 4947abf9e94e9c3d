//! crates/study_tracker_core/src/domain.rs
//!
//! Defines the pure, core data structures for the tracking engine.
//! These structs are independent of any database or serialization format.

use chrono::{DateTime, NaiveDate, Utc};
use std::collections::BTreeSet;
use uuid::Uuid;

/// Why a session left the `active` state. Every close path records one of
/// these so an auto-ended session is distinguishable from a real end signal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CloseReason {
    /// The client sent an explicit end signal.
    Explicit,
    /// A new session was started for the same resource before this one ended.
    Superseded,
    /// The stale-session reaper force-closed an abandoned session.
    Expired,
}

impl CloseReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            CloseReason::Explicit => "explicit",
            CloseReason::Superseded => "superseded",
            CloseReason::Expired => "expired",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "explicit" => Some(CloseReason::Explicit),
            "superseded" => Some(CloseReason::Superseded),
            "expired" => Some(CloseReason::Expired),
            _ => None,
        }
    }
}

/// One continuous study interval against a resource.
///
/// Invariant: for a given resource, at most one session has `active = true`
/// at any instant. `total_duration_secs` is the sum of its closed page
/// activity durations, never the wall-clock span.
#[derive(Debug, Clone)]
pub struct Session {
    pub id: Uuid,
    pub resource_id: Uuid,
    pub started_at: DateTime<Utc>,
    pub ended_at: Option<DateTime<Utc>>,
    pub start_page: u32,
    pub end_page: u32,
    pub total_duration_secs: i64,
    pub pages_covered: u32,
    pub notes: Option<String>,
    pub active: bool,
    pub close_reason: Option<CloseReason>,
}

impl Session {
    /// Creates a fresh active session starting at `start_page`.
    pub fn open(resource_id: Uuid, start_page: u32, now: DateTime<Utc>) -> Self {
        Self {
            id: Uuid::new_v4(),
            resource_id,
            started_at: now,
            ended_at: None,
            start_page,
            end_page: start_page,
            total_duration_secs: 0,
            pages_covered: 0,
            notes: None,
            active: true,
            close_reason: None,
        }
    }
}

/// One continuous viewing interval of a single page within a session.
///
/// Invariant: within a session, at most one activity has `exited_at = None`.
/// `duration_secs` is fixed permanently once the activity closes.
#[derive(Debug, Clone)]
pub struct PageActivity {
    pub id: Uuid,
    pub session_id: Uuid,
    pub page: u32,
    pub entered_at: DateTime<Utc>,
    pub exited_at: Option<DateTime<Utc>>,
    pub duration_secs: i64,
}

impl PageActivity {
    pub fn open(session_id: Uuid, page: u32, now: DateTime<Utc>) -> Self {
        Self {
            id: Uuid::new_v4(),
            session_id,
            page,
            entered_at: now,
            exited_at: None,
            duration_secs: 0,
        }
    }

    pub fn is_open(&self) -> bool {
        self.exited_at.is_none()
    }
}

/// Per-resource rollup of all closed sessions. Mutated only by the progress
/// aggregator, and only on the active -> closed transition of a session.
#[derive(Debug, Clone)]
pub struct ProgressRecord {
    pub resource_id: Uuid,
    pub current_page: u32,
    pub total_time_secs: i64,
    pub session_count: u32,
    /// Pages per minute, blended as an equal-weight running mean.
    pub average_speed: f64,
    pub last_session_at: Option<DateTime<Utc>>,
    pub completion_percentage: f64,
    /// Idempotency marker: the last session already folded into this record.
    pub last_applied_session: Option<Uuid>,
}

impl ProgressRecord {
    pub fn empty(resource_id: Uuid) -> Self {
        Self {
            resource_id,
            current_page: 0,
            total_time_secs: 0,
            session_count: 0,
            average_speed: 0.0,
            last_session_at: None,
            completion_percentage: 0.0,
            last_applied_session: None,
        }
    }
}

/// Per-calendar-date aggregate across all resources. Created lazily on the
/// first session close of a day, accumulated additively thereafter.
#[derive(Debug, Clone)]
pub struct DailyStat {
    pub date: NaiveDate,
    pub total_seconds: i64,
    pub pages_read: u32,
    pub session_count: u32,
    pub resources: BTreeSet<Uuid>,
    pub goal_met: bool,
}

impl DailyStat {
    pub fn empty(date: NaiveDate) -> Self {
        Self {
            date,
            total_seconds: 0,
            pages_read: 0,
            session_count: 0,
            resources: BTreeSet::new(),
            goal_met: false,
        }
    }

    pub fn distinct_resources(&self) -> usize {
        self.resources.len()
    }
}

/// A user-defined study goal. `is_achieved` flips permanently the first time
/// `current_progress` crosses `target_value`; it never un-achieves.
#[derive(Debug, Clone)]
pub struct Goal {
    pub id: Uuid,
    pub name: String,
    pub target_value: f64,
    pub current_progress: f64,
    pub is_achieved: bool,
    pub achieved_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

impl Goal {
    pub fn new(name: String, target_value: f64, now: DateTime<Utc>) -> Self {
        Self {
            id: Uuid::new_v4(),
            name,
            target_value,
            current_progress: 0.0,
            is_achieved: false,
            achieved_at: None,
            created_at: now,
        }
    }
}

/// Summary returned to the client when a session ends.
#[derive(Debug, Clone, Copy)]
pub struct SessionStats {
    pub duration_secs: i64,
    pub pages_covered: u32,
    /// Pages per minute; `0.0` for zero-duration sessions, never NaN.
    pub reading_speed: f64,
}

/// Live view of an active session for UI display.
#[derive(Debug, Clone)]
pub struct ActiveSessionView {
    pub session: Session,
    /// Page of the currently open activity, falling back to the session's
    /// last known page when no activity is open.
    pub current_page: u32,
    /// Wall-clock seconds since the session started.
    pub current_duration_secs: i64,
}

/// Record of one reaper force-close, kept so auto-ended sessions are visible
/// to the user instead of silently losing time.
#[derive(Debug, Clone)]
pub struct SweptSession {
    pub session_id: Uuid,
    pub resource_id: Uuid,
    /// Best-effort end time credited to the session (last signal + threshold).
    pub closed_at: DateTime<Utc>,
    /// How long the session had been without a signal when swept.
    pub idle_secs: i64,
}
