//! Router assembly.

use axum::{
    middleware::from_fn_with_state,
    routing::{get, post},
    Router,
};
use tower_http::{cors::CorsLayer, trace::TraceLayer};

use crate::services::AppServices;
use crate::ws;

use super::handlers::{activity, auth, execute, health, rooms};
use super::middleware::general_rate_limit;

/// Build the full HTTP + WebSocket router.
pub fn router(services: AppServices) -> Router {
    let api = Router::new()
        .route("/auth/register", post(auth::register))
        .route("/auth/login", post(auth::login))
        .route("/rooms", get(rooms::list).post(rooms::create))
        .route(
            "/rooms/:id",
            get(rooms::get).put(rooms::update).delete(rooms::delete),
        )
        .route("/rooms/:id/join", post(rooms::join))
        .route("/rooms/:id/leave", post(rooms::leave))
        .route("/rooms/:id/messages", get(rooms::messages))
        .route("/rooms/:id/executions", get(rooms::executions))
        .route("/code/execute", post(execute::execute))
        .route("/languages", get(execute::list_languages))
        .route("/users/activity", get(activity::activity))
        .layer(from_fn_with_state(services.clone(), general_rate_limit));

    Router::new()
        .nest("/api", api)
        .route("/ws", get(ws::ws_handler))
        .route("/health", get(health::live))
        .route("/health/ready", get(health::ready))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(services)
}
