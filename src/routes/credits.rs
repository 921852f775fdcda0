//! Credit routes
//!
//! - `GET /api/v1/credits` - balance for the current principal
//! - `GET /api/v1/credits/events` - SSE stream of balance changes
//!
//! The event stream is the explicit pub/sub channel for "credits changed":
//! UI badges subscribe here instead of polling or listening for ambient
//! window events.

use bytes::Bytes;
use http_body_util::{BodyExt, Full, StreamBody};
use hyper::body::Frame;
use hyper::{Response, StatusCode};
use serde::Serialize;
use std::sync::Arc;
use tokio::sync::broadcast;

use crate::auth::Principal;
use crate::routes::{error_from, error_response, json_response};
use crate::server::{AppState, BoxBody};

/// Balance response body
#[derive(Serialize)]
struct BalanceResponse {
    principal: String,
    balance: i64,
    /// Remaining anonymous allowance when unauthenticated
    #[serde(skip_serializing_if = "Option::is_none")]
    anonymous_remaining: Option<u32>,
}

/// Handle GET /api/v1/credits
///
/// Authenticated callers read their ledger balance (first contact seeds the
/// signup credits). Anonymous callers read the device allowance when a
/// device token is supplied.
pub async fn handle_balance(
    state: Arc<AppState>,
    principal: Principal,
    device_token: Option<&str>,
) -> Response<Full<Bytes>> {
    match &principal {
        Principal::User(id) => {
            match state.ledger.ensure_account(id, state.args.signup_credits).await {
                Ok(balance) => json_response(
                    StatusCode::OK,
                    &BalanceResponse {
                        principal: id.clone(),
                        balance,
                        anonymous_remaining: None,
                    },
                ),
                Err(e) => error_from(e),
            }
        }
        Principal::Anonymous => {
            let Some(device) = device_token else {
                return error_response(
                    StatusCode::BAD_REQUEST,
                    "Anonymous balance requires a device token",
                    "BAD_REQUEST",
                );
            };
            let remaining = state.allowance.remaining(device);
            json_response(
                StatusCode::OK,
                &BalanceResponse {
                    principal: principal.id().to_string(),
                    balance: remaining as i64,
                    anonymous_remaining: Some(remaining),
                },
            )
        }
    }
}

/// Handle GET /api/v1/credits/events (SSE)
///
/// Streams this principal's balance changes as `data:` lines. Lagged
/// receivers skip missed events rather than erroring; the stream ends when
/// the ledger shuts down.
pub fn handle_events(state: Arc<AppState>, principal: Principal) -> Response<BoxBody> {
    let rx = state.ledger.subscribe();
    let principal_id = principal.id().to_string();

    let stream = futures_util::stream::unfold((rx, principal_id), |(mut rx, pid)| async move {
        loop {
            match rx.recv().await {
                Ok(event) if event.principal == pid => {
                    let payload = serde_json::to_string(&event).unwrap_or_default();
                    let line = format!("data: {}\n\n", payload);
                    return Some((
                        Ok::<_, hyper::Error>(Frame::data(Bytes::from(line))),
                        (rx, pid),
                    ));
                }
                Ok(_) => continue,
                Err(broadcast::error::RecvError::Lagged(_)) => continue,
                Err(broadcast::error::RecvError::Closed) => return None,
            }
        }
    });

    Response::builder()
        .status(StatusCode::OK)
        .header("Content-Type", "text/event-stream")
        .header("Cache-Control", "no-cache")
        .header("Connection", "keep-alive")
        .header("Access-Control-Allow-Origin", "*")
        .body(BodyExt::boxed_unsync(StreamBody::new(stream)))
        .unwrap()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Args;
    use crate::generation::{GenerationService, HttpGenerationClient};
    use clap::Parser;
    use std::time::Duration;

    fn test_state() -> Arc<AppState> {
        let args = Args::parse_from(["autoscape", "--dev-mode"]);
        let generator: Arc<dyn GenerationService> = Arc::new(HttpGenerationClient::new(
            "http://localhost:1",
            None,
            Duration::from_secs(1),
        ));
        Arc::new(AppState::in_memory(args, generator).unwrap())
    }

    #[tokio::test]
    async fn test_anonymous_balance_requires_device_token() {
        let res = handle_balance(test_state(), Principal::Anonymous, None).await;
        assert_eq!(res.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_anonymous_balance_reads_allowance() {
        let res = handle_balance(test_state(), Principal::Anonymous, Some("device-1")).await;
        assert_eq!(res.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn test_authenticated_balance_seeds_signup_credits() {
        let state = test_state();
        let res = handle_balance(
            Arc::clone(&state),
            Principal::User("user-1".into()),
            None,
        )
        .await;
        assert_eq!(res.status(), StatusCode::OK);

        // Default signup grant is visible in the ledger afterwards
        assert_eq!(
            state.ledger.balance("user-1").await.unwrap(),
            state.args.signup_credits
        );
    }
}
