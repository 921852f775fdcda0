//! Client for the external design generation service
//!
//! The remote service is an opaque collaborator: it takes the yard photo,
//! style references, and prompt, and returns rendered images plus a
//! structural analysis and recommended materials. It may take tens of
//! seconds and fails with a generic error. The cost estimate is computed
//! locally from the returned materials; the remote never prices anything.

use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::debug;

use crate::generation::types::{DesignRequest, DesignResult, MaterialItem, StyleImage};
use crate::pricing;
use crate::types::AutoscapeError;

/// Trait for the external generation call (allows mocking in tests)
#[async_trait::async_trait]
pub trait GenerationService: Send + Sync {
    /// Run one generation. The caller binds this to a timeout; the
    /// implementation itself only fails on transport or remote errors.
    async fn generate(
        &self,
        request: &DesignRequest,
        style_references: &[StyleImage],
    ) -> Result<DesignResult, AutoscapeError>;
}

/// Wire request sent to the generation service
#[derive(Debug, Serialize)]
struct GenerateApiRequest<'a> {
    yard_image: &'a str,
    style_images: Vec<&'a str>,
    prompt: &'a str,
    style_id: Option<&'a str>,
    budget: Option<u32>,
    location_type: Option<&'a str>,
    space_size: Option<u32>,
    use_rag: bool,
}

/// Wire response from the generation service
#[derive(Debug, Deserialize)]
struct GenerateApiResponse {
    #[serde(default)]
    rendered_images: Vec<String>,
    plan_image: Option<String>,
    video_url: Option<String>,
    #[serde(default)]
    analysis: String,
    #[serde(default)]
    materials: Vec<MaterialItem>,
}

/// HTTP implementation of the generation service
pub struct HttpGenerationClient {
    base_url: String,
    api_key: Option<String>,
    http_client: reqwest::Client,
}

impl HttpGenerationClient {
    /// Create a new client. `request_ceiling` bounds the socket-level call;
    /// the orchestrator additionally wraps the whole operation in its own
    /// timeout so an orphaned flow still reaches a terminal ledger state.
    pub fn new(base_url: &str, api_key: Option<String>, request_ceiling: Duration) -> Self {
        let http_client = reqwest::Client::builder()
            .timeout(request_ceiling)
            .build()
            .expect("Failed to create HTTP client");

        Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key,
            http_client,
        }
    }
}

#[async_trait::async_trait]
impl GenerationService for HttpGenerationClient {
    async fn generate(
        &self,
        request: &DesignRequest,
        style_references: &[StyleImage],
    ) -> Result<DesignResult, AutoscapeError> {
        let url = format!("{}/api/generate-design", self.base_url);

        let body = GenerateApiRequest {
            yard_image: &request.yard_image,
            style_images: style_references.iter().map(|s| s.url.as_str()).collect(),
            prompt: &request.prompt,
            style_id: request.style_id.as_deref(),
            budget: request.budget,
            location_type: request.location_type.as_deref(),
            space_size: request.space_size,
            use_rag: request.use_rag,
        };

        debug!(
            url = %url,
            style_refs = style_references.len(),
            "Calling generation service"
        );

        let mut req = self.http_client.post(&url).json(&body);
        if let Some(ref key) = self.api_key {
            req = req.header("x-api-key", key);
        }

        let response = req
            .send()
            .await
            .map_err(|e| AutoscapeError::GenerationFailed(format!("Request failed: {}", e)))?;

        if !response.status().is_success() {
            return Err(AutoscapeError::GenerationFailed(format!(
                "Generation service returned {}",
                response.status()
            )));
        }

        let api_result: GenerateApiResponse = response
            .json()
            .await
            .map_err(|e| AutoscapeError::GenerationFailed(format!("Malformed response: {}", e)))?;

        if api_result.rendered_images.is_empty() {
            return Err(AutoscapeError::GenerationFailed(
                "Generation service returned no images".into(),
            ));
        }

        let estimate = pricing::estimate(&api_result.materials);

        Ok(DesignResult {
            rendered_images: api_result.rendered_images,
            plan_image: api_result.plan_image,
            video_url: api_result.video_url,
            yard_image: Some(request.yard_image.clone()),
            analysis: api_result.analysis,
            estimate,
            materials: api_result.materials,
        })
    }
}
