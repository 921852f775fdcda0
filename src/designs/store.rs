//! Saved design persistence
//!
//! The store owns the durable copy of every SavedDesign. Saving assigns the
//! long id and the immutable short id (retrying on unique-index collision);
//! visibility toggles and deletes are owner-gated at the route layer.

use bson::{doc, oid::ObjectId};
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use tokio::sync::Mutex;
use tracing::warn;

use crate::db::schemas::{DesignDoc, DESIGN_COLLECTION};
use crate::db::{MongoClient, MongoCollection};
use crate::designs::short_id;
use crate::generation::types::DesignResult;
use crate::types::{AutoscapeError, Result};

/// How many short-id collisions to absorb before giving up
const SHORT_ID_RETRIES: usize = 5;

/// Identity of a freshly persisted design
#[derive(Debug, Clone)]
pub struct SavedRef {
    /// Long-form identifier (primary key)
    pub id: String,
    /// Human-shareable identifier
    pub short_id: String,
}

/// Trait for saved-design storage (allows different backends)
#[async_trait::async_trait]
pub trait DesignStore: Send + Sync {
    /// Persist a design result, assigning both identifiers
    async fn save(&self, owner: &str, design: &DesignResult, is_public: bool) -> Result<SavedRef>;

    async fn get_by_short_id(&self, short_id: &str) -> Result<Option<DesignDoc>>;

    async fn get_by_id(&self, id: &str) -> Result<Option<DesignDoc>>;

    /// All designs owned by a principal, newest first
    async fn list_by_owner(&self, owner: &str) -> Result<Vec<DesignDoc>>;

    /// Public designs for the gallery, newest first
    async fn list_public(&self, limit: i64) -> Result<Vec<DesignDoc>>;

    async fn delete_by_id(&self, id: &str) -> Result<()>;

    /// Change visibility. The short id never changes. Returns the updated
    /// document, or None when the id is unknown.
    async fn set_visibility(&self, id: &str, is_public: bool) -> Result<Option<DesignDoc>>;
}

/// sha256 fingerprint of the source yard image, recorded for audit/dedup.
/// Data URLs are fingerprinted over their decoded bytes so the same photo
/// hashes the same regardless of encoding quirks; remote URLs hash as-is.
fn yard_fingerprint(design: &DesignResult) -> Option<String> {
    use base64::Engine;

    design.yard_image.as_ref().map(|img| {
        let mut hasher = Sha256::new();
        let decoded = img
            .strip_prefix("data:")
            .and_then(|rest| rest.split_once(";base64,"))
            .and_then(|(_, payload)| {
                base64::engine::general_purpose::STANDARD.decode(payload).ok()
            });
        match decoded {
            Some(bytes) => hasher.update(&bytes),
            None => hasher.update(img.as_bytes()),
        }
        format!("sha256-{}", hex::encode(hasher.finalize()))
    })
}

// ============================================================================
// MongoDB backend
// ============================================================================

/// MongoDB-backed design store
pub struct MongoDesignStore {
    designs: MongoCollection<DesignDoc>,
}

impl MongoDesignStore {
    pub async fn new(mongo: &MongoClient) -> Result<Self> {
        Ok(Self {
            designs: mongo.collection(DESIGN_COLLECTION).await?,
        })
    }
}

#[async_trait::async_trait]
impl DesignStore for MongoDesignStore {
    async fn save(&self, owner: &str, design: &DesignResult, is_public: bool) -> Result<SavedRef> {
        let fingerprint = yard_fingerprint(design);

        // The unique index on short_id is the real collision guard; on a
        // duplicate-key error we mint a fresh id and try again.
        let mut last_err = None;
        for attempt in 0..SHORT_ID_RETRIES {
            let candidate = short_id::generate();
            let doc = DesignDoc::from_result(
                candidate.clone(),
                owner.to_string(),
                is_public,
                design,
                fingerprint.clone(),
            );

            match self.designs.insert_one(doc).await {
                Ok(object_id) => {
                    return Ok(SavedRef {
                        id: object_id.to_hex(),
                        short_id: candidate,
                    });
                }
                Err(AutoscapeError::Database(msg)) if msg.contains("E11000") => {
                    warn!(attempt, short_id = %candidate, "Short id collided, retrying");
                    last_err = Some(AutoscapeError::Database(msg));
                }
                Err(e) => return Err(e),
            }
        }

        Err(last_err.unwrap_or_else(|| {
            AutoscapeError::Database("Short id assignment exhausted retries".into())
        }))
    }

    async fn get_by_short_id(&self, short_id: &str) -> Result<Option<DesignDoc>> {
        self.designs.find_one(doc! { "short_id": short_id }).await
    }

    async fn get_by_id(&self, id: &str) -> Result<Option<DesignDoc>> {
        let object_id = parse_object_id(id)?;
        self.designs.find_one(doc! { "_id": object_id }).await
    }

    async fn list_by_owner(&self, owner: &str) -> Result<Vec<DesignDoc>> {
        self.designs.find_many(doc! { "owner": owner }, None).await
    }

    async fn list_public(&self, limit: i64) -> Result<Vec<DesignDoc>> {
        self.designs
            .find_many(doc! { "is_public": true }, Some(limit))
            .await
    }

    async fn delete_by_id(&self, id: &str) -> Result<()> {
        let object_id = parse_object_id(id)?;
        self.designs.soft_delete(doc! { "_id": object_id }).await?;
        Ok(())
    }

    async fn set_visibility(&self, id: &str, is_public: bool) -> Result<Option<DesignDoc>> {
        let object_id = parse_object_id(id)?;
        self.designs
            .find_one_and_update(
                doc! { "_id": object_id },
                doc! {
                    "$set": {
                        "is_public": is_public,
                        "metadata.updated_at": bson::DateTime::now(),
                    }
                },
            )
            .await
    }
}

fn parse_object_id(id: &str) -> Result<ObjectId> {
    ObjectId::parse_str(id)
        .map_err(|_| AutoscapeError::BadRequest(format!("Invalid design id: {}", id)))
}

// ============================================================================
// In-memory backend (dev mode and tests)
// ============================================================================

/// Simple in-memory design store
pub struct InMemoryDesignStore {
    inner: Mutex<HashMap<String, DesignDoc>>,
}

impl InMemoryDesignStore {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(HashMap::new()),
        }
    }
}

impl Default for InMemoryDesignStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait::async_trait]
impl DesignStore for InMemoryDesignStore {
    async fn save(&self, owner: &str, design: &DesignResult, is_public: bool) -> Result<SavedRef> {
        let mut inner = self.inner.lock().await;

        let mut candidate = short_id::generate();
        while inner.values().any(|d| d.short_id == candidate) {
            candidate = short_id::generate();
        }

        let object_id = ObjectId::new();
        let mut doc = DesignDoc::from_result(
            candidate.clone(),
            owner.to_string(),
            is_public,
            design,
            yard_fingerprint(design),
        );
        doc._id = Some(object_id);

        let id = object_id.to_hex();
        inner.insert(id.clone(), doc);

        Ok(SavedRef {
            id,
            short_id: candidate,
        })
    }

    async fn get_by_short_id(&self, short_id: &str) -> Result<Option<DesignDoc>> {
        let inner = self.inner.lock().await;
        Ok(inner.values().find(|d| d.short_id == short_id).cloned())
    }

    async fn get_by_id(&self, id: &str) -> Result<Option<DesignDoc>> {
        let inner = self.inner.lock().await;
        Ok(inner.get(id).cloned())
    }

    async fn list_by_owner(&self, owner: &str) -> Result<Vec<DesignDoc>> {
        let inner = self.inner.lock().await;
        Ok(inner.values().filter(|d| d.owner == owner).cloned().collect())
    }

    async fn list_public(&self, limit: i64) -> Result<Vec<DesignDoc>> {
        let inner = self.inner.lock().await;
        Ok(inner
            .values()
            .filter(|d| d.is_public)
            .take(limit.max(0) as usize)
            .cloned()
            .collect())
    }

    async fn delete_by_id(&self, id: &str) -> Result<()> {
        let mut inner = self.inner.lock().await;
        inner.remove(id);
        Ok(())
    }

    async fn set_visibility(&self, id: &str, is_public: bool) -> Result<Option<DesignDoc>> {
        let mut inner = self.inner.lock().await;
        match inner.get_mut(id) {
            Some(doc) => {
                doc.is_public = is_public;
                Ok(Some(doc.clone()))
            }
            None => Ok(None),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::generation::types::CostEstimate;

    fn sample_design() -> DesignResult {
        DesignResult {
            rendered_images: vec!["render1.png".into(), "render2.png".into()],
            plan_image: Some("plan.png".into()),
            video_url: None,
            yard_image: Some("yard.png".into()),
            analysis: "sloped lawn, good drainage".into(),
            estimate: CostEstimate::default(),
            materials: vec![],
        }
    }

    #[tokio::test]
    async fn test_save_assigns_both_identifiers() {
        let store = InMemoryDesignStore::new();
        let saved = store.save("user-1", &sample_design(), false).await.unwrap();

        assert!(!saved.id.is_empty());
        assert!(short_id::is_plausible(&saved.short_id));

        let loaded = store.get_by_short_id(&saved.short_id).await.unwrap().unwrap();
        assert_eq!(loaded.owner, "user-1");
        assert!(loaded.yard_fingerprint.as_deref().unwrap().starts_with("sha256-"));
    }

    #[tokio::test]
    async fn test_private_design_excluded_from_gallery() {
        let store = InMemoryDesignStore::new();
        let saved = store.save("user-1", &sample_design(), false).await.unwrap();

        // Retrievable by short id but not listed publicly
        assert!(store.get_by_short_id(&saved.short_id).await.unwrap().is_some());
        assert!(store.list_public(10).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_publish_keeps_short_id() {
        let store = InMemoryDesignStore::new();
        let saved = store.save("user-1", &sample_design(), false).await.unwrap();

        let updated = store.set_visibility(&saved.id, true).await.unwrap().unwrap();
        assert!(updated.is_public);
        assert_eq!(updated.short_id, saved.short_id);

        let gallery = store.list_public(10).await.unwrap();
        assert_eq!(gallery.len(), 1);
        assert_eq!(gallery[0].short_id, saved.short_id);
    }

    #[tokio::test]
    async fn test_delete_removes_design() {
        let store = InMemoryDesignStore::new();
        let saved = store.save("user-1", &sample_design(), true).await.unwrap();

        store.delete_by_id(&saved.id).await.unwrap();
        assert!(store.get_by_short_id(&saved.short_id).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_list_by_owner_scopes_to_owner() {
        let store = InMemoryDesignStore::new();
        store.save("user-1", &sample_design(), false).await.unwrap();
        store.save("user-2", &sample_design(), false).await.unwrap();

        let mine = store.list_by_owner("user-1").await.unwrap();
        assert_eq!(mine.len(), 1);
        assert_eq!(mine[0].owner, "user-1");
    }
}
