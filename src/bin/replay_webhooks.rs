//! Webhook replay tool (disabled)
//!
//! Replayed stored provider webhooks against the local webhook endpoint.
//! The provider it targeted has been removed from the backend, so the tool
//! now exits without touching storage or the network.
//!
//! Run with: cargo run --bin replay_webhooks

use deposit_clearance::telemetry;

fn main() {
    dotenvy::dotenv().ok();
    telemetry::init_tracing(false);

    tracing::warn!(
        "Webhook replay is disabled: the provider integration it replayed against has been removed"
    );
}
