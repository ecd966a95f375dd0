//! API Routes
//!
//! HTTP endpoint definitions. Every admin endpoint is audited.

use axum::{
    extract::{Query, State},
    middleware,
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

use crate::audit::{AuditAction, AuditLogEntry, AuditSink};
use crate::error::AppError;
use crate::jobs::{ClearanceReport, CronStatus, SweepOutcome};

use super::middleware::{audit, audit_middleware};
use super::AppState;

// =========================================================================
// Request/Response types
// =========================================================================

#[derive(Debug, Deserialize)]
pub struct AuditLogsQuery {
    #[serde(default = "default_limit")]
    pub limit: i64,
}

fn default_limit() -> i64 {
    50
}

const MAX_AUDIT_LIMIT: i64 = 500;

#[derive(Debug, Serialize, Deserialize)]
pub struct UnlockResponse {
    pub released: bool,
}

#[derive(Debug, Serialize)]
pub struct AuditLogsResponse {
    pub entries: Vec<AuditLogEntry>,
}

// =========================================================================
// API Router
// =========================================================================

/// Create the API router. `sink` receives the audit entries of every route.
pub fn create_router(sink: Arc<dyn AuditSink>) -> Router<AppState> {
    let audited = |action: AuditAction| {
        middleware::from_fn_with_state(audit(sink.clone(), Some(action.as_str())), audit_middleware)
    };

    Router::new()
        .route(
            "/admin/cron/status",
            get(cron_status).layer(audited(AuditAction::CronStatusViewed)),
        )
        .route(
            "/admin/cron/deposit-clearance/run",
            post(run_deposit_clearance).layer(audited(AuditAction::DepositClearanceTriggered)),
        )
        .route(
            "/admin/cron/deposit-clearance/unlock",
            post(unlock_deposit_clearance).layer(audited(AuditAction::JobLockReleased)),
        )
        .route(
            "/admin/audit-logs",
            get(list_audit_logs).layer(audited(AuditAction::AuditLogsViewed)),
        )
}

// =========================================================================
// GET /admin/cron/status
// =========================================================================

/// Deposit clearance job status
async fn cron_status(State(state): State<AppState>) -> Json<CronStatus> {
    Json(state.clearance.get_status())
}

// =========================================================================
// POST /admin/cron/deposit-clearance/run
// =========================================================================

/// Run one clearance tick now
async fn run_deposit_clearance(
    State(state): State<AppState>,
) -> Result<Json<ClearanceReport>, AppError> {
    match state.clearance.run_once().await? {
        SweepOutcome::Completed(report) => Ok(Json(report)),
        SweepOutcome::Skipped => Err(AppError::JobLocked),
    }
}

// =========================================================================
// POST /admin/cron/deposit-clearance/unlock
// =========================================================================

/// Release a stuck clearance lock
async fn unlock_deposit_clearance(
    State(state): State<AppState>,
) -> Result<Json<UnlockResponse>, AppError> {
    let released = state.clearance.force_unlock().await?;
    Ok(Json(UnlockResponse { released }))
}

// =========================================================================
// GET /admin/audit-logs
// =========================================================================

/// Most recent audit entries
async fn list_audit_logs(
    State(state): State<AppState>,
    Query(query): Query<AuditLogsQuery>,
) -> Result<Json<AuditLogsResponse>, AppError> {
    if query.limit <= 0 || query.limit > MAX_AUDIT_LIMIT {
        return Err(AppError::InvalidRequest(format!(
            "limit must be between 1 and {}",
            MAX_AUDIT_LIMIT
        )));
    }

    let entries = state.audit.recent(query.limit).await?;
    Ok(Json(AuditLogsResponse { entries }))
}
