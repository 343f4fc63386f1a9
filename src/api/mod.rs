//! HTTP surface: routes and the handlers behind them.

use std::sync::Arc;

use axum::{
    routing::{get, post},
    Router,
};
use tower_http::{cors::CorsLayer, limit::RequestBodyLimitLayer, trace::TraceLayer};

pub mod handlers {
    pub use crate::handlers::*;
}

pub mod webhook_handler {
    pub use crate::webhook_handler::*;
}

use crate::handlers::AppState;

/// Request bodies above this size are rejected with 413.
pub const MAX_BODY_BYTES: usize = 5 * 1024 * 1024;

/// Routes subject to the outer request guards.
pub fn routes() -> Router<Arc<AppState>> {
    Router::new()
        .route("/leads", post(crate::handlers::create_lead))
        .route("/leads/bulk", post(crate::handlers::bulk_import))
        .route("/messages/send", post(crate::handlers::send_message))
        .route(
            "/webhooks/messages",
            post(crate::webhook_handler::gateway_webhook),
        )
}

/// Adds `/health`, state, tracing and CORS around already-guarded routes.
pub fn finish(protected: Router<Arc<AppState>>, state: Arc<AppState>) -> Router {
    Router::new()
        .route("/health", get(crate::handlers::health))
        .merge(protected)
        .with_state(state)
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
}

/// Full router with only the body-size guard. Used by tests; `main` adds the
/// per-IP burst guard and request timeout.
pub fn build_router(state: Arc<AppState>) -> Router {
    finish(
        routes().layer(RequestBodyLimitLayer::new(MAX_BODY_BYTES)),
        state,
    )
}
