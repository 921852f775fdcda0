//! Credit balance document schema
//!
//! One document per authenticated principal. The `credits` field is only
//! ever changed through atomic conditional updates so concurrent
//! reservations cannot drive it negative.

use bson::{doc, oid::ObjectId, Document};
use mongodb::options::IndexOptions;
use serde::{Deserialize, Serialize};

use crate::db::mongo::{IntoIndexes, MutMetadata};
use crate::db::schemas::Metadata;

/// Collection name for credit balances
pub const CREDIT_COLLECTION: &str = "credit_balances";

/// Credit balance document stored in MongoDB
#[derive(Serialize, Deserialize, Clone, Debug, Default)]
pub struct CreditDoc {
    /// MongoDB document ID
    #[serde(skip_serializing_if = "Option::is_none")]
    pub _id: Option<ObjectId>,

    /// Common metadata (created_at, updated_at, is_deleted)
    #[serde(default)]
    pub metadata: Metadata,

    /// Principal identifier this balance belongs to
    pub principal: String,

    /// Remaining generation credits. Never observed negative.
    pub credits: i64,

    /// Lifetime credits granted (signup + purchases), for support/audit
    #[serde(default)]
    pub total_granted: i64,
}

impl CreditDoc {
    /// Create a new balance document with an initial grant
    pub fn new(principal: String, credits: i64) -> Self {
        Self {
            _id: None,
            metadata: Metadata::new(),
            principal,
            credits,
            total_granted: credits,
        }
    }
}

impl IntoIndexes for CreditDoc {
    fn into_indices() -> Vec<(Document, Option<IndexOptions>)> {
        vec![
            // One balance document per principal
            (
                doc! { "principal": 1 },
                Some(
                    IndexOptions::builder()
                        .unique(true)
                        .name("principal_unique".to_string())
                        .build(),
                ),
            ),
        ]
    }
}

impl MutMetadata for CreditDoc {
    fn mut_metadata(&mut self) -> &mut Metadata {
        &mut self.metadata
    }
}
