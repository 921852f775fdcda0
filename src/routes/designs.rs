//! Design routes
//!
//! - `POST /api/v1/designs` - start a generation flow
//! - `GET /api/v1/designs/{route_id}` - resolve a design for display
//! - `GET /api/v1/designs` - list the caller's designs
//! - `POST /api/v1/designs/{id}/visibility` - owner publish/unpublish
//! - `DELETE /api/v1/designs/{id}` - owner delete
//! - `GET /api/v1/gallery` - public designs
//!
//! Anyone holding a short id may view the design (that is what makes it
//! shareable); visibility only controls gallery listing. Mutations are
//! owner-only.

use bytes::Bytes;
use http_body_util::Full;
use hyper::{Response, StatusCode};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::debug;

use crate::auth::Principal;
use crate::db::schemas::DesignDoc;
use crate::generation::types::{DesignRequest, DesignResult};
use crate::routes::{error_from, error_response, json_response};
use crate::server::AppState;
use crate::types::AutoscapeError;

/// Default and maximum gallery page sizes
const GALLERY_DEFAULT_LIMIT: i64 = 24;
const GALLERY_MAX_LIMIT: i64 = 100;

/// Response for a started generation
#[derive(Serialize)]
struct GenerateResponse {
    /// Shareable id; absent when the result is session-only
    #[serde(skip_serializing_if = "Option::is_none")]
    short_id: Option<String>,
    /// Ticket for the `generated` route in this session
    handoff: String,
    /// Remaining credits (authenticated callers)
    #[serde(skip_serializing_if = "Option::is_none")]
    balance: Option<i64>,
    design: DesignResult,
}

/// Summary of a saved design for listings
#[derive(Serialize)]
struct DesignSummary {
    id: String,
    short_id: String,
    is_public: bool,
    thumbnail: Option<String>,
    analysis: String,
    created_at: Option<String>,
}

impl DesignSummary {
    fn from_doc(doc: &DesignDoc) -> Self {
        Self {
            id: doc._id.map(|id| id.to_hex()).unwrap_or_default(),
            short_id: doc.short_id.clone(),
            is_public: doc.is_public,
            thumbnail: doc.rendered_images.first().cloned(),
            analysis: doc.analysis.clone(),
            created_at: doc
                .metadata
                .created_at
                .map(|ts| ts.try_to_rfc3339_string().unwrap_or_default()),
        }
    }
}

/// Handle POST /api/v1/designs
pub async fn handle_generate(
    state: Arc<AppState>,
    principal: Principal,
    body: &[u8],
) -> Response<Full<Bytes>> {
    let request: DesignRequest = match serde_json::from_slice(body) {
        Ok(r) => r,
        Err(e) => {
            return error_response(
                StatusCode::BAD_REQUEST,
                &format!("Invalid generation request: {}", e),
                "BAD_REQUEST",
            )
        }
    };

    if request.yard_image.is_empty() {
        return error_response(
            StatusCode::BAD_REQUEST,
            "A yard image is required",
            "BAD_REQUEST",
        );
    }

    // First contact for an authenticated principal creates the account with
    // its signup credits
    if let Principal::User(id) = &principal {
        if let Err(e) = state.ledger.ensure_account(id, state.args.signup_credits).await {
            return error_from(e);
        }
    }

    match state.orchestrator.start_generation(&principal, request).await {
        Ok(outcome) => json_response(
            StatusCode::CREATED,
            &GenerateResponse {
                short_id: outcome.short_id,
                handoff: outcome.handoff,
                balance: outcome.balance,
                design: outcome.design,
            },
        ),
        Err(e) => error_from(e),
    }
}

/// Handle GET /api/v1/designs/{route_id}?handoff={ticket}
pub async fn handle_resolve(
    state: Arc<AppState>,
    route_id: &str,
    handoff_ticket: Option<&str>,
) -> Response<Full<Bytes>> {
    debug!(route_id = %route_id, has_handoff = handoff_ticket.is_some(), "Resolving design");

    match state.resolver.resolve(route_id, handoff_ticket).await {
        Ok(design) => json_response(StatusCode::OK, &design),
        Err(e) => error_from(e),
    }
}

/// Handle GET /api/v1/designs (owner listing)
pub async fn handle_list_mine(
    state: Arc<AppState>,
    principal: Principal,
) -> Response<Full<Bytes>> {
    let Principal::User(id) = &principal else {
        return error_response(
            StatusCode::UNAUTHORIZED,
            "Sign in to list your designs",
            "UNAUTHORIZED",
        );
    };

    match state.designs.list_by_owner(id).await {
        Ok(docs) => {
            let summaries: Vec<DesignSummary> = docs.iter().map(DesignSummary::from_doc).collect();
            json_response(StatusCode::OK, &summaries)
        }
        Err(e) => error_from(e),
    }
}

/// Handle GET /api/v1/gallery?limit=N
pub async fn handle_gallery(state: Arc<AppState>, limit: Option<i64>) -> Response<Full<Bytes>> {
    let limit = limit
        .unwrap_or(GALLERY_DEFAULT_LIMIT)
        .clamp(1, GALLERY_MAX_LIMIT);

    match state.designs.list_public(limit).await {
        Ok(docs) => {
            let summaries: Vec<DesignSummary> = docs.iter().map(DesignSummary::from_doc).collect();
            json_response(StatusCode::OK, &summaries)
        }
        Err(e) => error_from(e),
    }
}

#[derive(Deserialize)]
struct VisibilityRequest {
    is_public: bool,
}

/// Load a design and verify the caller may manage it: the owner always can,
/// and administrative principals can delete (moderation).
async fn load_owned(
    state: &AppState,
    principal: &Principal,
    id: &str,
    allow_admin: bool,
) -> Result<DesignDoc, AutoscapeError> {
    if principal.is_anonymous() {
        return Err(AutoscapeError::Unauthorized(
            "Sign in to manage designs".into(),
        ));
    }

    let doc = state
        .designs
        .get_by_id(id)
        .await?
        .ok_or_else(|| AutoscapeError::NotFound(format!("No design with id {}", id)))?;

    let is_admin = allow_admin
        && state
            .args
            .admin_principals
            .iter()
            .any(|p| p == principal.id());

    if !principal.owns(&doc.owner) && !is_admin {
        return Err(AutoscapeError::Forbidden(
            "Only the owner may modify this design".into(),
        ));
    }

    Ok(doc)
}

/// Handle POST /api/v1/designs/{id}/visibility
pub async fn handle_set_visibility(
    state: Arc<AppState>,
    principal: Principal,
    id: &str,
    body: &[u8],
) -> Response<Full<Bytes>> {
    let request: VisibilityRequest = match serde_json::from_slice(body) {
        Ok(r) => r,
        Err(e) => {
            return error_response(
                StatusCode::BAD_REQUEST,
                &format!("Invalid visibility request: {}", e),
                "BAD_REQUEST",
            )
        }
    };

    if let Err(e) = load_owned(&state, &principal, id, false).await {
        return error_from(e);
    }

    match state.designs.set_visibility(id, request.is_public).await {
        Ok(Some(updated)) => {
            state
                .usage
                .log_visibility_changed(principal.id(), &updated.short_id, updated.is_public)
                .await;
            json_response(StatusCode::OK, &DesignSummary::from_doc(&updated))
        }
        Ok(None) => error_response(
            StatusCode::NOT_FOUND,
            &format!("No design with id {}", id),
            "NOT_FOUND",
        ),
        Err(e) => error_from(e),
    }
}

/// Handle DELETE /api/v1/designs/{id}
pub async fn handle_delete(
    state: Arc<AppState>,
    principal: Principal,
    id: &str,
) -> Response<Full<Bytes>> {
    let doc = match load_owned(&state, &principal, id, true).await {
        Ok(d) => d,
        Err(e) => return error_from(e),
    };

    match state.designs.delete_by_id(id).await {
        Ok(()) => {
            state
                .usage
                .log_design_deleted(principal.id(), &doc.short_id)
                .await;
            json_response(StatusCode::OK, &serde_json::json!({ "deleted": true }))
        }
        Err(e) => error_from(e),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Args;
    use crate::generation::{GenerationService, HttpGenerationClient};
    use clap::Parser;
    use std::time::Duration;

    fn test_state(extra_args: &[&str]) -> Arc<AppState> {
        let mut argv = vec!["autoscape", "--dev-mode"];
        argv.extend_from_slice(extra_args);
        let args = Args::parse_from(argv);

        // The generation service is never reached by these handlers
        let generator: Arc<dyn GenerationService> = Arc::new(HttpGenerationClient::new(
            "http://localhost:1",
            None,
            Duration::from_secs(1),
        ));
        Arc::new(AppState::in_memory(args, generator).unwrap())
    }

    #[tokio::test]
    async fn test_list_requires_auth() {
        let res = handle_list_mine(test_state(&[]), Principal::Anonymous).await;
        assert_eq!(res.status(), StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn test_generate_rejects_missing_yard_image() {
        let res = handle_generate(
            test_state(&[]),
            Principal::Anonymous,
            br#"{"yard_image": ""}"#,
        )
        .await;
        assert_eq!(res.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_generate_rejects_garbage_body() {
        let res = handle_generate(test_state(&[]), Principal::Anonymous, b"not json").await;
        assert_eq!(res.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_resolve_unknown_is_not_found() {
        let res = handle_resolve(test_state(&[]), "zzzzzzzzzz", None).await;
        assert_eq!(res.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_visibility_requires_auth() {
        let res = handle_set_visibility(
            test_state(&[]),
            Principal::Anonymous,
            "6569a1f0c0ffee0000000000",
            br#"{"is_public": true}"#,
        )
        .await;
        assert_eq!(res.status(), StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn test_delete_by_non_owner_forbidden() {
        let state = test_state(&[]);
        let saved = state
            .designs
            .save(
                "user-1",
                &crate::generation::types::DesignResult {
                    rendered_images: vec!["r.png".into()],
                    plan_image: None,
                    video_url: None,
                    yard_image: None,
                    analysis: String::new(),
                    estimate: Default::default(),
                    materials: vec![],
                },
                false,
            )
            .await
            .unwrap();

        let res = handle_delete(
            Arc::clone(&state),
            Principal::User("user-2".into()),
            &saved.id,
        )
        .await;
        assert_eq!(res.status(), StatusCode::FORBIDDEN);

        // Admin principals may delete for moderation
        let admin_state = test_state(&["--admin-principals", "mod-1"]);
        let saved = admin_state
            .designs
            .save(
                "user-1",
                &crate::generation::types::DesignResult {
                    rendered_images: vec!["r.png".into()],
                    plan_image: None,
                    video_url: None,
                    yard_image: None,
                    analysis: String::new(),
                    estimate: Default::default(),
                    materials: vec![],
                },
                false,
            )
            .await
            .unwrap();
        let res = handle_delete(
            Arc::clone(&admin_state),
            Principal::User("mod-1".into()),
            &saved.id,
        )
        .await;
        assert_eq!(res.status(), StatusCode::OK);
    }
}
