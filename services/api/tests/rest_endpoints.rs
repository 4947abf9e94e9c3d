//! Integration tests for the REST surface, driving the real router with an
//! in-memory store.

use axum::body::Body;
use axum::http::{header, Method, Request, StatusCode};
use axum::Router;
use chrono::{Duration, Utc};
use http_body_util::BodyExt;
use serde_json::{json, Value};
use std::net::SocketAddr;
use std::sync::Arc;
use tower::ServiceExt;
use uuid::Uuid;

use api_lib::config::Config;
use api_lib::web::{router, state::AppState};
use study_tracker_core::memory::MemoryStore;

fn test_config() -> Config {
    Config {
        bind_address: "127.0.0.1:0".parse::<SocketAddr>().unwrap(),
        database_url: None,
        log_level: tracing::Level::INFO,
        reaper_interval_secs: 300,
        stale_session_secs: 900,
        utc_offset_hours: 0,
        daily_goal_minutes: 30,
    }
}

fn test_app() -> (Arc<MemoryStore>, Router) {
    let store = Arc::new(MemoryStore::new());
    let state = Arc::new(AppState::new(
        store.clone(),
        store.clone(),
        Arc::new(test_config()),
    ));
    (store, router(state))
}

async fn send(app: &Router, method: Method, uri: &str, body: Option<Value>) -> (StatusCode, Value) {
    let request = match body {
        Some(json_body) => Request::builder()
            .method(method)
            .uri(uri)
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(json_body.to_string()))
            .unwrap(),
        None => Request::builder()
            .method(method)
            .uri(uri)
            .body(Body::empty())
            .unwrap(),
    };

    let response = app.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    let value = if bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&bytes).unwrap_or(Value::String(
            String::from_utf8_lossy(&bytes).into_owned(),
        ))
    };
    (status, value)
}

#[tokio::test]
async fn full_session_flow_through_the_api() {
    let (store, app) = test_app();
    let resource_id = Uuid::new_v4();
    store.insert_resource(resource_id, 200);

    // Start.
    let (status, body) = send(
        &app,
        Method::POST,
        &format!("/resources/{resource_id}/sessions/start"),
        Some(json!({ "start_page": 1 })),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);
    let session_id = body["session_id"].as_str().unwrap().to_string();

    // The active view reflects the open session.
    let (status, body) = send(
        &app,
        Method::GET,
        &format!("/resources/{resource_id}/sessions/active"),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["session_id"].as_str().unwrap(), session_id);
    assert_eq!(body["current_page"], 1);

    // Turn the page two minutes in (client clock, trusted as-is).
    let ts = Utc::now() + Duration::seconds(120);
    let (status, _) = send(
        &app,
        Method::POST,
        &format!("/sessions/{session_id}/page-change"),
        Some(json!({ "from_page": 1, "to_page": 5, "timestamp": ts })),
    )
    .await;
    assert_eq!(status, StatusCode::NO_CONTENT);

    // End.
    let (status, body) = send(
        &app,
        Method::POST,
        &format!("/resources/{resource_id}/sessions/end"),
        Some(json!({ "end_page": 5, "notes": "good run" })),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    // Page 1 was held for the 120 seconds between start and the page turn,
    // plus whatever real time elapsed between the two requests.
    let duration = body["duration_secs"].as_i64().unwrap();
    assert!((120..130).contains(&duration));
    assert_eq!(body["pages_covered"], 1);

    // Nothing active anymore.
    let (status, body) = send(
        &app,
        Method::GET,
        &format!("/resources/{resource_id}/sessions/active"),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, Value::Null);

    // Ending again is surfaced as an error, not silently retried.
    let (status, _) = send(
        &app,
        Method::POST,
        &format!("/resources/{resource_id}/sessions/end"),
        Some(json!({ "end_page": 5 })),
    )
    .await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    // Progress reflects exactly one applied session.
    let (status, body) = send(
        &app,
        Method::GET,
        &format!("/resources/{resource_id}/progress"),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["session_count"], 1);
    assert_eq!(body["current_page"], 5);
    assert_eq!(body["total_time_secs"].as_i64().unwrap(), duration);
    assert_eq!(body["completion_percentage"], 2.5);
}

#[tokio::test]
async fn page_change_for_an_unknown_session_is_not_found() {
    let (_store, app) = test_app();
    let (status, _) = send(
        &app,
        Method::POST,
        &format!("/sessions/{}/page-change", Uuid::new_v4()),
        Some(json!({ "from_page": 1, "to_page": 2, "timestamp": Utc::now() })),
    )
    .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn progress_for_an_untracked_resource_is_not_found() {
    let (_store, app) = test_app();
    let (status, _) = send(
        &app,
        Method::GET,
        &format!("/resources/{}/progress", Uuid::new_v4()),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn streaks_start_at_zero() {
    let (_store, app) = test_app();
    let (status, body) = send(&app, Method::GET, "/streak", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["activity_streak"], 0);
    assert_eq!(body["goal_streak"], 0);
}

#[tokio::test]
async fn goal_crud_and_achievement() {
    let (_store, app) = test_app();

    let (status, body) = send(
        &app,
        Method::POST,
        "/goals",
        Some(json!({ "name": "read 100 pages", "target_value": 100.0 })),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(body["achieved"], false);
    assert_eq!(body["percentage"], 0.0);
    let goal_id = body["id"].as_str().unwrap().to_string();

    let (status, body) = send(
        &app,
        Method::POST,
        &format!("/goals/{goal_id}/progress"),
        Some(json!({ "amount": 150.0 })),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["achieved"], true);
    assert_eq!(body["percentage"], 100.0);
    assert!(body["achieved_at"].is_string());

    let (status, body) = send(&app, Method::GET, "/goals", None).await;
    assert_eq!(status, StatusCode::OK);
    let goals = body.as_array().unwrap();
    assert_eq!(goals.len(), 1);
    assert_eq!(goals[0]["achieved"], true);

    let (status, _) = send(
        &app,
        Method::POST,
        &format!("/goals/{}/progress", Uuid::new_v4()),
        Some(json!({ "amount": 1.0 })),
    )
    .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}
