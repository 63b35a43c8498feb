//! Admin surface: dashboard REST API + live traffic stream.
//!
//! Read-only routes are open; mutating routes require the `X-API-Key`
//! header to match the startup key.

use std::sync::Arc;

use axum::{
    extract::{Request, State},
    middleware::{self, Next},
    response::{IntoResponse, Response},
    routing::{get, post},
    Router,
};

use crate::errors::AppError;
use crate::AppState;

pub mod handlers;
pub mod stream;

/// Build the admin router. The caller serves this on the admin listener.
pub fn admin_router(state: Arc<AppState>) -> Router<Arc<AppState>> {
    Router::new()
        .route("/api/stats", get(handlers::get_stats))
        .route("/api/rules", get(handlers::get_rules).post(handlers::update_rules))
        .route("/api/access", get(handlers::get_access).post(handlers::update_access))
        .route(
            "/api/webhooks",
            get(handlers::list_webhooks)
                .post(handlers::add_webhook)
                .delete(handlers::delete_webhook),
        )
        .route("/api/alerts", get(handlers::get_alerts))
        .route("/api/traffic", get(handlers::get_traffic))
        .route("/api/traffic/export", get(handlers::export_traffic))
        .route("/api/budget", get(handlers::get_budget))
        .route(
            "/api/patterns",
            get(handlers::list_patterns)
                .post(handlers::add_pattern)
                .delete(handlers::delete_pattern),
        )
        .route("/api/replay", post(handlers::replay))
        .route("/api/test/pii", post(handlers::test_pii))
        .route("/api/test/injection", post(handlers::test_injection))
        .route("/ws", get(stream::ws_handler))
        .layer(middleware::from_fn_with_state(state, require_api_key))
}

/// Mutating requests must present the admin key; reads and CORS preflight
/// pass through.
async fn require_api_key(
    State(state): State<Arc<AppState>>,
    req: Request,
    next: Next,
) -> Response {
    let method = req.method();
    if method == &axum::http::Method::GET || method == &axum::http::Method::OPTIONS {
        return next.run(req).await;
    }

    let presented = req
        .headers()
        .get("x-api-key")
        .and_then(|v| v.to_str().ok())
        .unwrap_or_default();
    if presented != state.config.api_key {
        return AppError::Unauthorized.into_response();
    }
    next.run(req).await
}
