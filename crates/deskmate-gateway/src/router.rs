use axum::Router;
use axum::routing::{get, post};
use tower::ServiceBuilder;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

use crate::api;
use crate::state::SharedState;

/// Build the main application router with all routes.
pub fn build_router(state: SharedState) -> Router {
    Router::new()
        .route("/", get(root))
        .route("/health", get(health))
        .route("/api/chat", post(api::chat))
        .route("/api/conversations", get(api::list_conversations))
        .route(
            "/api/conversations/{id}",
            get(api::get_conversation).delete(api::delete_conversation),
        )
        .route("/api/nudges", get(api::list_nudges))
        .route("/api/nudges/{id}/read", post(api::mark_nudge_read))
        .with_state(state)
        .layer(
            ServiceBuilder::new()
                .layer(TraceLayer::new_for_http())
                .layer(CorsLayer::permissive()),
        )
}

async fn health() -> axum::Json<serde_json::Value> {
    axum::Json(serde_json::json!({
        "status": "healthy",
        "message": "Deskmate API is running",
    }))
}

async fn root() -> axum::Json<serde_json::Value> {
    axum::Json(serde_json::json!({
        "app": "Deskmate employee assistant",
        "version": env!("CARGO_PKG_VERSION"),
        "health": "/health",
    }))
}
