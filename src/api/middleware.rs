//! API Middleware
//!
//! Request context, audit, and request logging middleware.

use axum::{
    body::Body,
    extract::{OriginalUri, State},
    http::{HeaderMap, HeaderValue, Request},
    middleware::Next,
    response::{IntoResponse, Response},
};
use std::net::IpAddr;
use std::sync::Arc;
use uuid::Uuid;

use crate::audit::{AuditLogBuilder, AuditSink};
use crate::domain::OperationContext;
use crate::error::AppError;

// =========================================================================
// Request context middleware
// =========================================================================

/// Header carrying the user identity established by the auth layer
pub const REQUEST_USER_HEADER: &str = "X-Request-User-Id";
/// Header carrying the admin identity established by the auth layer
pub const ADMIN_HEADER: &str = "X-Admin-Id";
/// Header carrying the request correlation id
pub const CORRELATION_HEADER: &str = "X-Correlation-Id";

/// Build the `OperationContext` for this request from its headers.
///
/// Identity headers are trusted as set by the upstream auth layer; this
/// middleware only propagates them.
pub async fn request_context_middleware(
    mut request: Request<Body>,
    next: Next,
) -> Result<Response, Response> {
    let headers = request.headers();

    let request_user_id = parse_uuid_header(headers, REQUEST_USER_HEADER)?;
    let admin_id = parse_uuid_header(headers, ADMIN_HEADER)?;

    // Extract correlation ID or generate new one
    let correlation_id = headers
        .get(CORRELATION_HEADER)
        .and_then(|v| v.to_str().ok())
        .and_then(|s| Uuid::parse_str(s).ok())
        .unwrap_or_else(Uuid::new_v4);

    let mut context = OperationContext::new().with_correlation_id(correlation_id);
    if let Some(user_id) = request_user_id {
        context = context.with_request_user(user_id);
    }
    if let Some(admin_id) = admin_id {
        context = context.with_admin(admin_id);
    }
    if let Some(ip) = forwarded_client_ip(headers) {
        context = context.with_client_ip(ip);
    }

    request.extensions_mut().insert(context);

    let mut response = next.run(request).await;
    if let Ok(value) = HeaderValue::from_str(&correlation_id.to_string()) {
        response.headers_mut().insert(CORRELATION_HEADER, value);
    }

    Ok(response)
}

fn parse_uuid_header(headers: &HeaderMap, name: &str) -> Result<Option<Uuid>, Response> {
    match headers.get(name).map(|v| v.to_str()) {
        None => Ok(None),
        Some(Ok(raw)) => Uuid::parse_str(raw)
            .map(Some)
            .map_err(|_| AppError::InvalidHeader(name.to_string()).into_response()),
        Some(Err(_)) => Err(AppError::InvalidHeader(name.to_string()).into_response()),
    }
}

/// First address in X-Forwarded-For
fn forwarded_client_ip(headers: &HeaderMap) -> Option<IpAddr> {
    headers
        .get("X-Forwarded-For")
        .and_then(|v| v.to_str().ok())
        .and_then(|s| s.split(',').next())
        .and_then(|s| s.trim().parse().ok())
}

// =========================================================================
// Audit middleware
// =========================================================================

/// State for one audited route: where entries go and what to call them
#[derive(Clone)]
pub struct AuditLayerState {
    sink: Arc<dyn AuditSink>,
    action: Option<String>,
}

/// Audit interceptor factory. Without an action label the entry is named
/// after the request line, e.g. `"POST /api/v1/admin/cron/status"`.
///
/// Use with `axum::middleware::from_fn_with_state(audit(..), audit_middleware)`.
pub fn audit(sink: Arc<dyn AuditSink>, action: Option<&str>) -> AuditLayerState {
    AuditLayerState {
        sink,
        action: action.map(str::to_string),
    }
}

/// Record an audit entry once the wrapped handler has produced a response.
/// The response passes through unchanged and does not wait for the write;
/// a failed write is only logged.
pub async fn audit_middleware(
    State(audit): State<AuditLayerState>,
    request: Request<Body>,
    next: Next,
) -> Response {
    let method = request.method().clone();
    let path = request
        .extensions()
        .get::<OriginalUri>()
        .map(|uri| uri.0.path().to_string())
        .unwrap_or_else(|| request.uri().path().to_string());
    let context = request
        .extensions()
        .get::<OperationContext>()
        .cloned()
        .unwrap_or_default();

    let response = next.run(request).await;

    let action = audit
        .action
        .clone()
        .unwrap_or_else(|| format!("{} {}", method, path));

    let entry = AuditLogBuilder::custom(&action)
        .context(&context)
        .request(method.as_str(), &path)
        .status(response.status().as_u16())
        .build();

    // Best effort, off the request path
    let sink = audit.sink.clone();
    tokio::spawn(async move {
        if let Err(e) = sink.record(&entry).await {
            tracing::warn!(
                error = %e,
                action = %entry.action,
                correlation_id = ?entry.correlation_id,
                "Failed to write audit log entry"
            );
        }
    });

    response
}

// =========================================================================
// mask_headers_for_logging
// =========================================================================

/// Headers that should be masked in logs
const SENSITIVE_HEADERS: &[&str] = &[
    "x-api-key",
    "authorization",
    "cookie",
    "set-cookie",
    "x-palmpay-signature",
];

/// Mask sensitive headers for logging
pub fn mask_headers_for_logging(headers: &HeaderMap) -> Vec<(String, String)> {
    headers
        .iter()
        .map(|(name, value)| {
            let name_lower = name.as_str().to_lowercase();
            let masked_value = if SENSITIVE_HEADERS.contains(&name_lower.as_str()) {
                "[REDACTED]".to_string()
            } else {
                value.to_str().unwrap_or("[invalid utf8]").to_string()
            };
            (name.to_string(), masked_value)
        })
        .collect()
}

// =========================================================================
// Request Logging Middleware
// =========================================================================

/// Request logging middleware
pub async fn logging_middleware(request: Request<Body>, next: Next) -> Response {
    let method = request.method().clone();
    let uri = request.uri().clone();
    let version = request.version();

    let headers = mask_headers_for_logging(request.headers());

    let correlation_id = request
        .extensions()
        .get::<OperationContext>()
        .and_then(|ctx| ctx.correlation_id);

    let start = std::time::Instant::now();

    tracing::info!(
        method = %method,
        uri = %uri,
        version = ?version,
        correlation_id = ?correlation_id,
        headers = ?headers,
        "Incoming request"
    );

    let response = next.run(request).await;

    let duration = start.elapsed();
    let status = response.status();

    tracing::info!(
        method = %method,
        uri = %uri,
        status = %status,
        duration_ms = %duration.as_millis(),
        correlation_id = ?correlation_id,
        "Request completed"
    );

    response
}
