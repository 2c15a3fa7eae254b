//! Axum router configuration with middleware.
//!
//! All routes are under `/api/v1/`.
//! Middleware: CORS, HTTP tracing.

use axum::Router;
use axum::routing::{get, post};
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use crate::http::handlers;
use crate::state::AppState;

/// Build the complete API router with all routes and middleware.
pub fn build_router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    let api_routes = Router::new()
        // Definitions
        .route(
            "/definitions",
            get(handlers::definition::list_definitions).post(handlers::definition::create_definition),
        )
        .route("/definitions/import", post(handlers::definition::import_definition))
        .route(
            "/definitions/slug/{slug}",
            get(handlers::definition::get_definition_by_slug),
        )
        .route(
            "/definitions/{id}",
            get(handlers::definition::get_definition)
                .put(handlers::definition::update_definition)
                .delete(handlers::definition::delete_definition),
        )
        .route("/definitions/{id}/clone", post(handlers::definition::clone_definition))
        .route("/definitions/{id}/export", get(handlers::definition::export_definition))
        // Instances
        .route(
            "/instances",
            get(handlers::instance::list_instances).post(handlers::instance::start_instance),
        )
        .route("/instances/{id}", get(handlers::instance::get_instance))
        .route("/instances/{id}/cancel", post(handlers::instance::cancel_instance))
        .route("/instances/{id}/expire", post(handlers::instance::expire_instance))
        // Step actions
        .route("/steps/pending", get(handlers::step::list_pending_steps))
        .route("/steps/{id}", get(handlers::step::get_step))
        .route("/steps/{id}/claim", post(handlers::step::claim_step))
        .route("/steps/{id}/complete", post(handlers::step::complete_step))
        .route("/steps/{id}/decide", post(handlers::step::decide_step))
        .route("/steps/{id}/skip", post(handlers::step::skip_step))
        .route("/steps/{id}/timer", post(handlers::step::fire_step_timer))
        .route(
            "/steps/{id}/branches/{branch}",
            post(handlers::step::complete_branch),
        )
        // Dashboard
        .route("/dashboard", get(handlers::dashboard::get_dashboard));

    Router::new()
        .nest("/api/v1", api_routes)
        .route("/health", get(health_check))
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// GET /health - Liveness check (no caller headers required).
async fn health_check() -> axum::Json<serde_json::Value> {
    axum::Json(serde_json::json!({
        "status": "ok",
        "version": env!("CARGO_PKG_VERSION"),
    }))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_health_check() {
        let body = health_check().await.0;
        assert_eq!(body["status"], "ok");
        assert_eq!(body["version"], env!("CARGO_PKG_VERSION"));
    }
}
