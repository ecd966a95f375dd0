//! Deposit clearance backend
//!
//! Serves the admin API and runs the deposit clearance job.

use std::net::SocketAddr;
use std::sync::Arc;

use deposit_clearance::api::{self, AppState};
use deposit_clearance::audit::AuditLogService;
use deposit_clearance::deposits::PgDepositRepository;
use deposit_clearance::job_lock::PgJobLockRepository;
use deposit_clearance::{db, telemetry, Config, DepositClearanceService};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load environment variables
    dotenvy::dotenv().ok();

    // Load configuration
    let config = Config::from_env()?;

    telemetry::init_tracing(config.is_production());

    let addr: SocketAddr = format!("{}:{}", config.host, config.port).parse()?;

    tracing::info!(env = %config.node_env, "Starting deposit clearance backend");
    tracing::debug!(palmpay = ?config.palmpay, webhook_base_url = %config.webhook_base_url, "Provider configuration");
    tracing::info!("Connecting to database...");

    let pool = db::connect(&config).await?;
    db::verify_connection(&pool).await?;

    if !db::check_schema(&pool).await? {
        tracing::error!("Database schema is not complete. Please run migrations.");
        return Err(anyhow::anyhow!("Database schema incomplete"));
    }

    tracing::info!("Database connected successfully");

    let clearance = Arc::new(DepositClearanceService::new(
        Arc::new(PgJobLockRepository::new(pool.clone())),
        Arc::new(PgDepositRepository::new(pool.clone())),
        config.clearance.clone(),
    ));
    clearance.start_deposit_clearance_job();

    let state = AppState {
        clearance: clearance.clone(),
        audit: Arc::new(AuditLogService::new(pool.clone())),
    };

    let app = api::app(state);

    tracing::info!("Listening on http://{}", addr);
    let listener = tokio::net::TcpListener::bind(addr).await?;

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    // Cleanup
    tracing::info!("Server shutting down...");
    clearance.stop().await;
    pool.close().await;
    tracing::info!("Database connections closed. Goodbye!");

    Ok(())
}

/// Shutdown signal handler for graceful shutdown
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "Failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            tracing::info!("Received Ctrl+C, initiating graceful shutdown...");
        },
        _ = terminate => {
            tracing::info!("Received SIGTERM, initiating graceful shutdown...");
        },
    }
}
