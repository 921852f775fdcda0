//! Saved design document schema
//!
//! A persisted generation result plus its shareable identity. The short id
//! is assigned once at save time, carries a unique index, and never changes
//! afterward; visibility toggles update `is_public` only.

use bson::{doc, oid::ObjectId, Document};
use mongodb::options::IndexOptions;
use serde::{Deserialize, Serialize};

use crate::db::mongo::{IntoIndexes, MutMetadata};
use crate::db::schemas::Metadata;
use crate::generation::types::{CostEstimate, DesignResult, MaterialItem};

/// Collection name for saved designs
pub const DESIGN_COLLECTION: &str = "designs";

/// Saved design document stored in MongoDB
#[derive(Serialize, Deserialize, Clone, Debug, Default)]
pub struct DesignDoc {
    /// MongoDB document ID (the long-form identifier)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub _id: Option<ObjectId>,

    /// Common metadata (created_at, updated_at, is_deleted)
    #[serde(default)]
    pub metadata: Metadata,

    /// Human-shareable identifier, unique and immutable
    pub short_id: String,

    /// Owning principal id, or the anonymous sentinel
    pub owner: String,

    /// Whether the design appears in the public gallery
    #[serde(default)]
    pub is_public: bool,

    /// Rendered redesign images, ordered
    pub rendered_images: Vec<String>,

    /// Top-down 2D plan image
    #[serde(skip_serializing_if = "Option::is_none")]
    pub plan_image: Option<String>,

    /// Before/after transformation video
    #[serde(skip_serializing_if = "Option::is_none")]
    pub video_url: Option<String>,

    /// Source yard photo
    #[serde(skip_serializing_if = "Option::is_none")]
    pub yard_image: Option<String>,

    /// Structural analysis / design description
    #[serde(default)]
    pub analysis: String,

    #[serde(default)]
    pub estimate: CostEstimate,

    #[serde(default)]
    pub materials: Vec<MaterialItem>,

    /// sha256 fingerprint of the source yard image, for audit/dedup
    #[serde(skip_serializing_if = "Option::is_none")]
    pub yard_fingerprint: Option<String>,
}

impl DesignDoc {
    /// Build a document from a generation result
    pub fn from_result(
        short_id: String,
        owner: String,
        is_public: bool,
        result: &DesignResult,
        yard_fingerprint: Option<String>,
    ) -> Self {
        Self {
            _id: None,
            metadata: Metadata::new(),
            short_id,
            owner,
            is_public,
            rendered_images: result.rendered_images.clone(),
            plan_image: result.plan_image.clone(),
            video_url: result.video_url.clone(),
            yard_image: result.yard_image.clone(),
            analysis: result.analysis.clone(),
            estimate: result.estimate.clone(),
            materials: result.materials.clone(),
            yard_fingerprint,
        }
    }

    /// Project to a displayable result, dropping ownership and visibility.
    /// Missing optional fields stay absent; they never fail the projection.
    pub fn to_result(&self) -> DesignResult {
        DesignResult {
            rendered_images: self.rendered_images.clone(),
            plan_image: self.plan_image.clone(),
            video_url: self.video_url.clone(),
            yard_image: self.yard_image.clone(),
            analysis: self.analysis.clone(),
            estimate: self.estimate.clone(),
            materials: self.materials.clone(),
        }
    }
}

impl IntoIndexes for DesignDoc {
    fn into_indices() -> Vec<(Document, Option<IndexOptions>)> {
        vec![
            // Unique index on short_id - collision retry happens at save time
            (
                doc! { "short_id": 1 },
                Some(
                    IndexOptions::builder()
                        .unique(true)
                        .name("short_id_unique".to_string())
                        .build(),
                ),
            ),
            // Index on owner for listing a principal's designs
            (
                doc! { "owner": 1 },
                Some(
                    IndexOptions::builder()
                        .name("owner_index".to_string())
                        .build(),
                ),
            ),
            // Index for the public gallery query
            (
                doc! { "is_public": 1, "metadata.created_at": -1 },
                Some(
                    IndexOptions::builder()
                        .name("public_gallery_index".to_string())
                        .build(),
                ),
            ),
        ]
    }
}

impl MutMetadata for DesignDoc {
    fn mut_metadata(&mut self) -> &mut Metadata {
        &mut self.metadata
    }
}
