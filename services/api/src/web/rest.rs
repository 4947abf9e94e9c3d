//! services/api/src/web/rest.rs
//!
//! Contains the Axum handlers for the REST API endpoints and the master
//! definition for the OpenAPI specification.

use crate::web::state::AppState;
use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Json},
};
use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::error;
use utoipa::{OpenApi, ToSchema};
use uuid::Uuid;

use study_tracker_core::domain::Goal;
use study_tracker_core::lifecycle::EngineError;
use study_tracker_core::ports::StoreError;
use study_tracker_core::streak::{activity_streak, advance_goal, evaluate_goal, goal_streak, GoalEvaluation};

//=========================================================================================
// OpenAPI Master Definition
//=========================================================================================

#[derive(OpenApi)]
#[openapi(
    paths(
        start_session_handler,
        page_change_handler,
        end_session_handler,
        get_active_session_handler,
        get_progress_handler,
        get_streak_handler,
        create_goal_handler,
        list_goals_handler,
        goal_progress_handler,
    ),
    components(
        schemas(
            StartSessionRequest,
            StartSessionResponse,
            PageChangeRequest,
            EndSessionRequest,
            EndSessionResponse,
            ActiveSessionResponse,
            ProgressResponse,
            StreakResponse,
            CreateGoalRequest,
            GoalProgressRequest,
            GoalResponse,
        )
    ),
    tags(
        (name = "Study Tracker API", description = "Session lifecycle and progress tracking endpoints.")
    )
)]
pub struct ApiDoc;

//=========================================================================================
// API Response and Payload Structs
//=========================================================================================

#[derive(Deserialize, ToSchema)]
pub struct StartSessionRequest {
    pub start_page: u32,
}

/// The response payload sent after successfully starting a session.
#[derive(Serialize, ToSchema)]
pub struct StartSessionResponse {
    pub session_id: Uuid,
    pub resource_id: Uuid,
    pub started_at: DateTime<Utc>,
    pub start_page: u32,
}

#[derive(Deserialize, ToSchema)]
pub struct PageChangeRequest {
    pub from_page: u32,
    pub to_page: u32,
    /// Client-side timestamp of the page turn.
    pub timestamp: DateTime<Utc>,
}

#[derive(Deserialize, ToSchema)]
pub struct EndSessionRequest {
    pub end_page: u32,
    pub notes: Option<String>,
}

#[derive(Serialize, ToSchema)]
pub struct EndSessionResponse {
    pub session_id: Uuid,
    pub duration_secs: i64,
    pub pages_covered: u32,
    /// Pages per minute for this session.
    pub reading_speed: f64,
}

#[derive(Serialize, ToSchema)]
pub struct ActiveSessionResponse {
    pub session_id: Uuid,
    pub started_at: DateTime<Utc>,
    pub start_page: u32,
    pub current_page: u32,
    pub current_duration_secs: i64,
}

#[derive(Serialize, ToSchema)]
pub struct ProgressResponse {
    pub resource_id: Uuid,
    pub current_page: u32,
    pub total_time_secs: i64,
    pub session_count: u32,
    pub average_speed: f64,
    pub last_session_at: Option<DateTime<Utc>>,
    pub completion_percentage: f64,
}

#[derive(Serialize, ToSchema)]
pub struct StreakResponse {
    pub as_of: NaiveDate,
    /// Consecutive days with any study time.
    pub activity_streak: u32,
    /// Consecutive days where the daily goal was met.
    pub goal_streak: u32,
}

#[derive(Deserialize, ToSchema)]
pub struct CreateGoalRequest {
    pub name: String,
    pub target_value: f64,
}

#[derive(Deserialize, ToSchema)]
pub struct GoalProgressRequest {
    /// Amount to add to the goal's current progress.
    pub amount: f64,
}

#[derive(Serialize, ToSchema)]
pub struct GoalResponse {
    pub id: Uuid,
    pub name: String,
    pub target_value: f64,
    pub current_progress: f64,
    pub percentage: f64,
    pub achieved: bool,
    pub achieved_at: Option<DateTime<Utc>>,
}

impl GoalResponse {
    fn from_goal(goal: Goal, eval: GoalEvaluation) -> Self {
        Self {
            id: goal.id,
            name: goal.name,
            target_value: goal.target_value,
            current_progress: goal.current_progress,
            percentage: eval.percentage,
            achieved: eval.achieved,
            achieved_at: goal.achieved_at,
        }
    }
}

//=========================================================================================
// Error Mapping
//=========================================================================================

fn engine_error(e: EngineError) -> (StatusCode, String) {
    match e {
        EngineError::NoActiveSession(resource_id) => (
            StatusCode::NOT_FOUND,
            format!("No active session for resource {}", resource_id),
        ),
        EngineError::Store(StoreError::NotFound(what)) => (StatusCode::NOT_FOUND, what),
        EngineError::Store(e) => {
            error!("store failure: {:?}", e);
            (StatusCode::INTERNAL_SERVER_ERROR, "Internal error".to_string())
        }
    }
}

fn store_error(e: StoreError) -> (StatusCode, String) {
    match e {
        StoreError::NotFound(what) => (StatusCode::NOT_FOUND, what),
        StoreError::Unexpected(e) => {
            error!("store failure: {}", e);
            (StatusCode::INTERNAL_SERVER_ERROR, "Internal error".to_string())
        }
    }
}

//=========================================================================================
// Session Lifecycle Handlers
//=========================================================================================

/// Start a study session against a resource.
///
/// Any session still active for the resource is force-closed first, so this
/// never fails because of a crashed or refreshed client.
#[utoipa::path(
    post,
    path = "/resources/{resource_id}/sessions/start",
    request_body = StartSessionRequest,
    responses(
        (status = 201, description = "Session started", body = StartSessionResponse),
        (status = 500, description = "Internal server error")
    ),
    params(
        ("resource_id" = Uuid, Path, description = "The resource being studied.")
    )
)]
pub async fn start_session_handler(
    State(app_state): State<Arc<AppState>>,
    Path(resource_id): Path<Uuid>,
    Json(payload): Json<StartSessionRequest>,
) -> Result<impl IntoResponse, (StatusCode, String)> {
    let session = app_state
        .engine
        .start_session(resource_id, payload.start_page)
        .await
        .map_err(engine_error)?;

    let response = StartSessionResponse {
        session_id: session.id,
        resource_id: session.resource_id,
        started_at: session.started_at,
        start_page: session.start_page,
    };
    Ok((StatusCode::CREATED, Json(response)))
}

/// Record a page turn within a session.
///
/// Duplicate signals are accepted and ignored; a closed or unknown session
/// is a 404.
#[utoipa::path(
    post,
    path = "/sessions/{session_id}/page-change",
    request_body = PageChangeRequest,
    responses(
        (status = 204, description = "Page change recorded"),
        (status = 404, description = "Session not found or not active"),
        (status = 500, description = "Internal server error")
    ),
    params(
        ("session_id" = Uuid, Path, description = "The active session.")
    )
)]
pub async fn page_change_handler(
    State(app_state): State<Arc<AppState>>,
    Path(session_id): Path<Uuid>,
    Json(payload): Json<PageChangeRequest>,
) -> Result<impl IntoResponse, (StatusCode, String)> {
    app_state
        .engine
        .record_page_change(
            session_id,
            payload.from_page,
            payload.to_page,
            payload.timestamp,
        )
        .await
        .map_err(engine_error)?;
    Ok(StatusCode::NO_CONTENT)
}

/// End the resource's active session and return its stats.
#[utoipa::path(
    post,
    path = "/resources/{resource_id}/sessions/end",
    request_body = EndSessionRequest,
    responses(
        (status = 200, description = "Session ended", body = EndSessionResponse),
        (status = 404, description = "No active session for the resource"),
        (status = 500, description = "Internal server error")
    ),
    params(
        ("resource_id" = Uuid, Path, description = "The resource being studied.")
    )
)]
pub async fn end_session_handler(
    State(app_state): State<Arc<AppState>>,
    Path(resource_id): Path<Uuid>,
    Json(payload): Json<EndSessionRequest>,
) -> Result<impl IntoResponse, (StatusCode, String)> {
    let (session, stats) = app_state
        .engine
        .end_session(resource_id, payload.end_page, payload.notes)
        .await
        .map_err(engine_error)?;

    let response = EndSessionResponse {
        session_id: session.id,
        duration_secs: stats.duration_secs,
        pages_covered: stats.pages_covered,
        reading_speed: stats.reading_speed,
    };
    Ok((StatusCode::OK, Json(response)))
}

/// The resource's active session, or `null` if none.
#[utoipa::path(
    get,
    path = "/resources/{resource_id}/sessions/active",
    responses(
        (status = 200, description = "The active session, if any", body = Option<ActiveSessionResponse>),
        (status = 500, description = "Internal server error")
    ),
    params(
        ("resource_id" = Uuid, Path, description = "The resource being studied.")
    )
)]
pub async fn get_active_session_handler(
    State(app_state): State<Arc<AppState>>,
    Path(resource_id): Path<Uuid>,
) -> Result<impl IntoResponse, (StatusCode, String)> {
    let view = app_state
        .engine
        .get_active_session(resource_id)
        .await
        .map_err(engine_error)?;

    let response = view.map(|v| ActiveSessionResponse {
        session_id: v.session.id,
        started_at: v.session.started_at,
        start_page: v.session.start_page,
        current_page: v.current_page,
        current_duration_secs: v.current_duration_secs,
    });
    Ok(Json(response))
}

//=========================================================================================
// Progress and Streak Handlers
//=========================================================================================

/// The resource's running progress record.
#[utoipa::path(
    get,
    path = "/resources/{resource_id}/progress",
    responses(
        (status = 200, description = "Progress for the resource", body = ProgressResponse),
        (status = 404, description = "No progress recorded yet"),
        (status = 500, description = "Internal server error")
    ),
    params(
        ("resource_id" = Uuid, Path, description = "The resource being studied.")
    )
)]
pub async fn get_progress_handler(
    State(app_state): State<Arc<AppState>>,
    Path(resource_id): Path<Uuid>,
) -> Result<impl IntoResponse, (StatusCode, String)> {
    let record = app_state
        .store
        .get_progress(resource_id)
        .await
        .map_err(store_error)?
        .ok_or_else(|| {
            (
                StatusCode::NOT_FOUND,
                format!("No progress recorded for resource {}", resource_id),
            )
        })?;

    let response = ProgressResponse {
        resource_id: record.resource_id,
        current_page: record.current_page,
        total_time_secs: record.total_time_secs,
        session_count: record.session_count,
        average_speed: record.average_speed,
        last_session_at: record.last_session_at,
        completion_percentage: record.completion_percentage,
    };
    Ok(Json(response))
}

/// Current streaks, derived on read from the daily stat series.
///
/// Both qualifying variants are reported: days with any study time, and
/// days where the configured daily goal was met.
#[utoipa::path(
    get,
    path = "/streak",
    responses(
        (status = 200, description = "Current streaks", body = StreakResponse),
        (status = 500, description = "Internal server error")
    )
)]
pub async fn get_streak_handler(
    State(app_state): State<Arc<AppState>>,
) -> Result<impl IntoResponse, (StatusCode, String)> {
    let stats = app_state
        .store
        .list_daily_stats()
        .await
        .map_err(store_error)?;

    let as_of = Utc::now()
        .with_timezone(&app_state.config.timezone())
        .date_naive();
    let response = StreakResponse {
        as_of,
        activity_streak: activity_streak(&stats, as_of),
        goal_streak: goal_streak(&stats, as_of),
    };
    Ok(Json(response))
}

//=========================================================================================
// Goal Handlers
//=========================================================================================

/// Create a study goal.
#[utoipa::path(
    post,
    path = "/goals",
    request_body = CreateGoalRequest,
    responses(
        (status = 201, description = "Goal created", body = GoalResponse),
        (status = 500, description = "Internal server error")
    )
)]
pub async fn create_goal_handler(
    State(app_state): State<Arc<AppState>>,
    Json(payload): Json<CreateGoalRequest>,
) -> Result<impl IntoResponse, (StatusCode, String)> {
    let now = Utc::now();
    let mut goal = Goal::new(payload.name, payload.target_value, now);
    let eval = evaluate_goal(&mut goal, now);
    app_state
        .store
        .insert_goal(goal.clone())
        .await
        .map_err(store_error)?;
    Ok((StatusCode::CREATED, Json(GoalResponse::from_goal(goal, eval))))
}

/// All goals, each evaluated against its current progress.
#[utoipa::path(
    get,
    path = "/goals",
    responses(
        (status = 200, description = "All goals with their evaluations", body = [GoalResponse]),
        (status = 500, description = "Internal server error")
    )
)]
pub async fn list_goals_handler(
    State(app_state): State<Arc<AppState>>,
) -> Result<impl IntoResponse, (StatusCode, String)> {
    let now = Utc::now();
    let mut responses = Vec::new();
    for mut goal in app_state.store.list_goals().await.map_err(store_error)? {
        let was_achieved = goal.is_achieved;
        let eval = evaluate_goal(&mut goal, now);
        if eval.achieved && !was_achieved {
            app_state
                .store
                .update_goal(&goal)
                .await
                .map_err(store_error)?;
        }
        responses.push(GoalResponse::from_goal(goal, eval));
    }
    Ok(Json(responses))
}

/// Advance a goal's progress and re-evaluate it.
#[utoipa::path(
    post,
    path = "/goals/{goal_id}/progress",
    request_body = GoalProgressRequest,
    responses(
        (status = 200, description = "Updated goal", body = GoalResponse),
        (status = 404, description = "Goal not found"),
        (status = 500, description = "Internal server error")
    ),
    params(
        ("goal_id" = Uuid, Path, description = "The goal to advance.")
    )
)]
pub async fn goal_progress_handler(
    State(app_state): State<Arc<AppState>>,
    Path(goal_id): Path<Uuid>,
    Json(payload): Json<GoalProgressRequest>,
) -> Result<impl IntoResponse, (StatusCode, String)> {
    let mut goal = app_state
        .store
        .get_goal(goal_id)
        .await
        .map_err(store_error)?;
    let eval = advance_goal(&mut goal, payload.amount, Utc::now());
    app_state
        .store
        .update_goal(&goal)
        .await
        .map_err(store_error)?;
    Ok(Json(GoalResponse::from_goal(goal, eval)))
}
