//! services/api/src/bin/api.rs

use api_lib::{
    adapters::db::PgStore,
    config::Config,
    error::ApiError,
    reaper::reaper_loop,
    web::{router, state::AppState, ApiDoc},
};
use axum::http::{
    header::{ACCEPT, AUTHORIZATION, CONTENT_TYPE},
    Method,
};
use axum::Router;
use sqlx::postgres::PgPoolOptions;
use std::sync::Arc;
use std::time::Duration;
use study_tracker_core::memory::MemoryStore;
use study_tracker_core::ports::{ResourceCatalog, SessionStore};
use study_tracker_core::reaper::StaleSessionReaper;
use tokio_util::sync::CancellationToken;
use tower_http::cors::{Any, CorsLayer};
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use utoipa::OpenApi;
use utoipa_swagger_ui::SwaggerUi;

#[tokio::main]
async fn main() -> Result<(), ApiError> {
    // --- 1. Load Configuration & Set Up Logging ---
    let config = Arc::new(Config::from_env()?);
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(config.log_level.to_string()))
        .with(tracing_subscriber::fmt::layer())
        .init();
    info!("Configuration loaded. Starting server...");

    // --- 2. Select the Authoritative Store ---
    let (store, catalog): (Arc<dyn SessionStore>, Arc<dyn ResourceCatalog>) =
        match &config.database_url {
            Some(database_url) => {
                info!("Connecting to database...");
                let db_pool = PgPoolOptions::new()
                    .max_connections(5)
                    .connect(database_url)
                    .await?;
                let pg_store = Arc::new(PgStore::new(db_pool));
                info!("Running database migrations...");
                pg_store.run_migrations().await?;
                info!("Database migrations complete.");
                (pg_store.clone(), pg_store)
            }
            None => {
                info!("DATABASE_URL not set; using the in-memory store");
                let memory = Arc::new(MemoryStore::new());
                (memory.clone(), memory)
            }
        };

    // --- 3. Build the Engine and Shared AppState ---
    let app_state = Arc::new(AppState::new(store.clone(), catalog, config.clone()));

    // --- 4. Start the Stale Session Reaper ---
    let reaper = StaleSessionReaper::new(
        store,
        app_state.engine.clone(),
        config.stale_threshold(),
    );
    let cancellation_token = CancellationToken::new();
    let reaper_handle = tokio::spawn(reaper_loop(
        reaper,
        Duration::from_secs(config.reaper_interval_secs),
        cancellation_token.clone(),
    ));

    // --- 5. Create the Web Router ---
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods([Method::GET, Method::POST])
        .allow_headers([AUTHORIZATION, CONTENT_TYPE, ACCEPT]);

    let app = Router::new()
        .merge(router(app_state))
        .layer(cors)
        .merge(SwaggerUi::new("/swagger-ui").url("/api-docs/openapi.json", ApiDoc::openapi()));

    // --- 6. Start the Server ---
    info!("Starting server on {}", config.bind_address);
    info!(
        "Swagger UI available at http://{}/swagger-ui",
        config.bind_address
    );
    let listener = tokio::net::TcpListener::bind(&config.bind_address).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            // Ctrl-C / SIGINT. If listening for it fails there is no shutdown
            // signal to wait for, so park instead of shutting down instantly.
            match tokio::signal::ctrl_c().await {
                Ok(()) => info!("shutdown signal received"),
                Err(e) => {
                    tracing::error!("could not listen for the shutdown signal: {e}");
                    std::future::pending::<()>().await;
                }
            }
        })
        .await?;

    info!("server stopped; stopping the reaper");
    cancellation_token.cancel();
    reaper_handle
        .await
        .map_err(|e| ApiError::Internal(format!("reaper task panicked: {e}")))?;
    Ok(())
}
