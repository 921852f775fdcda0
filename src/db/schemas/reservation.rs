//! Reservation document schema
//!
//! Durable audit trail for credit reservations. The status field moves
//! pending → completed or pending → refunded exactly once; both transitions
//! go through an atomic compare-and-set on `status == "pending"`.

use bson::{doc, oid::ObjectId, Document};
use mongodb::options::IndexOptions;
use serde::{Deserialize, Serialize};

use crate::db::mongo::{IntoIndexes, MutMetadata};
use crate::db::schemas::Metadata;
use crate::ledger::{Reservation, ReservationStatus};

/// Collection name for reservations
pub const RESERVATION_COLLECTION: &str = "reservations";

/// Reservation document stored in MongoDB
#[derive(Serialize, Deserialize, Clone, Debug, Default)]
pub struct ReservationDoc {
    /// MongoDB document ID
    #[serde(skip_serializing_if = "Option::is_none")]
    pub _id: Option<ObjectId>,

    /// Common metadata (created_at, updated_at, is_deleted)
    #[serde(default)]
    pub metadata: Metadata,

    /// Opaque unique reservation identifier
    pub reservation_id: String,

    /// Principal whose balance the amount was deducted from
    pub principal: String,

    /// Credits deducted at creation (1 per generation)
    pub amount: i64,

    /// pending | completed | refunded
    pub status: ReservationStatus,

    /// Short id of the persisted design, set on completion when available
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result_short_id: Option<String>,

    /// Why the reservation was refunded, for audit
    #[serde(skip_serializing_if = "Option::is_none")]
    pub refund_reason: Option<String>,
}

impl ReservationDoc {
    pub fn from_reservation(res: &Reservation) -> Self {
        Self {
            _id: None,
            metadata: Metadata::new(),
            reservation_id: res.reservation_id.clone(),
            principal: res.principal.clone(),
            amount: res.amount,
            status: res.status.clone(),
            result_short_id: res.result_short_id.clone(),
            refund_reason: res.refund_reason.clone(),
        }
    }

    pub fn into_reservation(self) -> Reservation {
        Reservation {
            reservation_id: self.reservation_id,
            principal: self.principal,
            amount: self.amount,
            status: self.status,
            result_short_id: self.result_short_id,
            refund_reason: self.refund_reason,
        }
    }
}

impl IntoIndexes for ReservationDoc {
    fn into_indices() -> Vec<(Document, Option<IndexOptions>)> {
        vec![
            // Unique index on reservation_id
            (
                doc! { "reservation_id": 1 },
                Some(
                    IndexOptions::builder()
                        .unique(true)
                        .name("reservation_id_unique".to_string())
                        .build(),
                ),
            ),
            // Index on principal for audit queries
            (
                doc! { "principal": 1 },
                Some(
                    IndexOptions::builder()
                        .name("principal_index".to_string())
                        .build(),
                ),
            ),
        ]
    }
}

impl MutMetadata for ReservationDoc {
    fn mut_metadata(&mut self) -> &mut Metadata {
        &mut self.metadata
    }
}
