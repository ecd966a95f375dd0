//! API module
//!
//! HTTP API endpoints and middleware.

pub mod middleware;
pub mod routes;

use axum::{routing::get, Router};
use std::sync::Arc;
use tower_http::trace::TraceLayer;

use crate::audit::AuditSink;
use crate::jobs::DepositClearanceService;

pub use routes::create_router;

/// Shared handler state
#[derive(Clone)]
pub struct AppState {
    pub clearance: Arc<DepositClearanceService>,
    pub audit: Arc<dyn AuditSink>,
}

/// Build the application router
pub fn app(state: AppState) -> Router {
    // Axum layers run outermost-last: context -> logging -> route (audit) -> handler
    let api_router = create_router(state.audit.clone())
        .layer(axum::middleware::from_fn(middleware::logging_middleware))
        .layer(axum::middleware::from_fn(
            middleware::request_context_middleware,
        ));

    Router::new()
        // Health check (no audit)
        .route("/health", get(health_check))
        .nest("/api/v1", api_router)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Health check endpoint
async fn health_check() -> &'static str {
    "OK"
}
