//! Router setup with all API routes and middleware.

use axum::extract::DefaultBodyLimit;
use axum::routing::{get, post};
use axum::Router;
use tower::limit::GlobalConcurrencyLimitLayer;
use tower_http::compression::CompressionLayer;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

use tutor_core::error::TutorError;

use crate::handlers;
use crate::state::AppState;
use crate::ws;

/// Concurrent `/stt` and `/tts` requests, shared across both routes.
const SPEECH_CONCURRENCY: usize = 4;

/// Body limit for JSON endpoints.
const JSON_BODY_LIMIT: usize = 1024 * 1024;

/// Create the axum Router with all routes and middleware.
pub fn create_router(state: AppState) -> Router {
    let speech_routes = Router::new()
        .route(
            "/stt",
            post(handlers::stt).layer(DefaultBodyLimit::max(state.max_upload_bytes)),
        )
        .route("/tts", post(handlers::tts))
        .layer(GlobalConcurrencyLimitLayer::new(SPEECH_CONCURRENCY));

    let socket_routes = Router::new()
        .route("/ws/chat", get(ws::ws_chat))
        .route("/ws/tts", get(ws::ws_tts));

    Router::new()
        .route("/healthz", get(handlers::healthz))
        .route("/query", post(handlers::query))
        .route("/chat", post(handlers::chat))
        .layer(DefaultBodyLimit::max(JSON_BODY_LIMIT))
        .merge(speech_routes)
        .merge(socket_routes)
        .layer(CompressionLayer::new())
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}

/// Bind `host:port` and serve until the process stops.
pub async fn start_server(host: &str, port: u16, state: AppState) -> Result<(), TutorError> {
    let addr = format!("{}:{}", host, port);
    let router = create_router(state);

    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .map_err(|e| TutorError::Api(format!("Failed to bind {}: {}", addr, e)))?;
    tracing::info!("Starting API server on {}", addr);

    axum::serve(listener, router)
        .await
        .map_err(|e| TutorError::Api(format!("Server error: {}", e)))?;

    Ok(())
}
