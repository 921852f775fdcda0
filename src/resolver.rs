//! Shareable Result Resolver
//!
//! Turns a route parameter into a displayable design. Resolution is tiered:
//! a same-session hand-off wins without touching the store (the common path
//! right after generation), otherwise the short id is looked up in the
//! design store and projected down to a plain result. Ownership and
//! visibility metadata never leave the store layer.

use std::sync::Arc;

use crate::designs::DesignStore;
use crate::generation::types::DesignResult;
use crate::orchestrator::{SessionHandoff, GENERATED_ROUTE};
use crate::types::{AutoscapeError, Result};

/// Resolves route parameters to displayable results
pub struct ResultResolver {
    designs: Arc<dyn DesignStore>,
    handoff: Arc<SessionHandoff>,
}

impl ResultResolver {
    pub fn new(designs: Arc<dyn DesignStore>, handoff: Arc<SessionHandoff>) -> Self {
        Self { designs, handoff }
    }

    /// Resolve a route id (a short id, or the `generated` sentinel) to a
    /// design. `handoff_ticket` carries the same-session hand-off when the
    /// caller just came from a generation.
    pub async fn resolve(
        &self,
        route_id: &str,
        handoff_ticket: Option<&str>,
    ) -> Result<DesignResult> {
        // Same-session result: no store round-trip
        if let Some(ticket) = handoff_ticket {
            if let Some(result) = self.handoff.get(ticket) {
                return Ok(result);
            }
        }

        if route_id == GENERATED_ROUTE {
            // Hand-off expired or never existed; the result was session-only
            return Err(AutoscapeError::NotFound(
                "This design was not saved and is no longer available".into(),
            ));
        }

        match self.designs.get_by_short_id(route_id).await? {
            Some(doc) => Ok(doc.to_result()),
            None => Err(AutoscapeError::NotFound(format!(
                "No design found for '{}'",
                route_id
            ))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::designs::InMemoryDesignStore;
    use crate::generation::types::CostEstimate;
    use std::time::Duration;

    fn sample_result() -> DesignResult {
        DesignResult {
            rendered_images: vec!["render.png".into()],
            plan_image: None,
            video_url: None,
            yard_image: None,
            analysis: "narrow side yard".into(),
            estimate: CostEstimate::default(),
            materials: vec![],
        }
    }

    fn resolver_with_store() -> (ResultResolver, Arc<InMemoryDesignStore>, Arc<SessionHandoff>) {
        let store = Arc::new(InMemoryDesignStore::new());
        let handoff = Arc::new(SessionHandoff::new(Duration::from_secs(60)));
        let resolver = ResultResolver::new(
            Arc::clone(&store) as Arc<dyn DesignStore>,
            Arc::clone(&handoff),
        );
        (resolver, store, handoff)
    }

    #[tokio::test]
    async fn test_handoff_wins_without_store_roundtrip() {
        let (resolver, _store, handoff) = resolver_with_store();
        let ticket = handoff.stash(sample_result());

        let resolved = resolver
            .resolve(GENERATED_ROUTE, Some(&ticket))
            .await
            .unwrap();
        assert_eq!(resolved.rendered_images, vec!["render.png".to_string()]);
    }

    #[tokio::test]
    async fn test_short_id_lookup_projects_saved_design() {
        let (resolver, store, _handoff) = resolver_with_store();
        let saved = store.save("user-1", &sample_result(), false).await.unwrap();

        let resolved = resolver.resolve(&saved.short_id, None).await.unwrap();
        assert_eq!(resolved.analysis, "narrow side yard");
        // Optional fields missing in the record degrade to absent
        assert!(resolved.plan_image.is_none());
        assert!(resolved.video_url.is_none());
    }

    #[tokio::test]
    async fn test_unknown_short_id_is_not_found() {
        let (resolver, _store, _handoff) = resolver_with_store();

        let err = resolver.resolve("zzzzzzzzzz", None).await.unwrap_err();
        assert!(matches!(err, AutoscapeError::NotFound(_)));
    }

    #[tokio::test]
    async fn test_generated_sentinel_without_handoff_is_not_found() {
        let (resolver, _store, _handoff) = resolver_with_store();

        let err = resolver.resolve(GENERATED_ROUTE, None).await.unwrap_err();
        assert!(matches!(err, AutoscapeError::NotFound(_)));

        // Stale ticket behaves the same
        let err = resolver
            .resolve(GENERATED_ROUTE, Some("stale-ticket"))
            .await
            .unwrap_err();
        assert!(matches!(err, AutoscapeError::NotFound(_)));
    }

    #[tokio::test]
    async fn test_stale_ticket_falls_through_to_store() {
        let (resolver, store, _handoff) = resolver_with_store();
        let saved = store.save("user-1", &sample_result(), false).await.unwrap();

        // Ticket is dead but the short id still resolves
        let resolved = resolver
            .resolve(&saved.short_id, Some("stale-ticket"))
            .await
            .unwrap();
        assert_eq!(resolved.analysis, "narrow side yard");
    }
}
