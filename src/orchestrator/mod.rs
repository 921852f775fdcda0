//! Generation Orchestrator
//!
//! Sequences one generation flow as a single logical transaction across
//! unreliable collaborators: reserve credit, call the external generation
//! service, persist the result, finalize the reservation. Each invocation
//! drives an explicit state machine:
//!
//! ```text
//! IDLE -> RESERVING -> GENERATING -> PERSISTING -> COMMITTING -> DONE
//!   RESERVING  --(insufficient credit)--> REJECTED   (terminal, no side effects)
//!   GENERATING --(failure/timeout)-----> REFUNDING -> FAILED (terminal)
//!   PERSISTING --(failure)--> commit without id ----> DONE (session-only result)
//!   COMMITTING --(failure)--> DONE (logged, non-fatal)
//! ```
//!
//! The orchestrator is the sole caller of reserve/complete/refund for a
//! flow. A failed reservation produces zero calls to the generation
//! service; a generation failure produces exactly one refund and no
//! automatic retry.

pub mod handoff;

use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, error, info, warn};

use crate::auth::Principal;
use crate::designs::DesignStore;
use crate::generation::types::{DesignRequest, DesignResult, StyleImage};
use crate::generation::GenerationService;
use crate::ledger::{AnonymousAllowance, AnonymousTicket, CreditLedger};
use crate::logging::UsageLogger;
use crate::types::{AutoscapeError, Result};

pub use handoff::{spawn_cleanup_task, SessionHandoff, GENERATED_ROUTE};

/// States a generation flow moves through
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlowState {
    Idle,
    Reserving,
    Generating,
    Persisting,
    Committing,
    Done,
    /// Reservation failed; nothing happened
    Rejected,
    Refunding,
    Failed,
}

/// Mutable record of one flow, for tracing and invariants
struct FlowRecord {
    flow_id: String,
    state: FlowState,
}

impl FlowRecord {
    fn new() -> Self {
        Self {
            flow_id: uuid::Uuid::new_v4().to_string(),
            state: FlowState::Idle,
        }
    }

    fn enter(&mut self, next: FlowState) {
        debug!(flow_id = %self.flow_id, from = ?self.state, to = ?next, "Flow transition");
        self.state = next;
    }
}

/// The credit hold backing one flow. Authenticated flows hold a ledger
/// reservation; anonymous flows hold a best-effort allowance ticket. The
/// two are never mixed.
enum FlowReservation {
    Ledger(String),
    Anonymous(AnonymousTicket),
}

impl FlowReservation {
    fn reservation_id(&self) -> Option<&str> {
        match self {
            FlowReservation::Ledger(id) => Some(id),
            FlowReservation::Anonymous(_) => None,
        }
    }
}

/// What a successful flow hands back to the caller
#[derive(Debug, Clone)]
pub struct GenerationOutcome {
    /// The generated artifact, for immediate display
    pub design: DesignResult,
    /// Shareable identifier; None when persistence failed
    pub short_id: Option<String>,
    /// Session hand-off ticket for the `generated` route
    pub handoff: String,
    /// Remaining balance after the flow (authenticated principals only)
    pub balance: Option<i64>,
}

/// Generation Orchestrator service
pub struct GenerationOrchestrator {
    ledger: Arc<CreditLedger>,
    allowance: Arc<AnonymousAllowance>,
    generator: Arc<dyn GenerationService>,
    designs: Arc<dyn DesignStore>,
    handoff: Arc<SessionHandoff>,
    usage: UsageLogger,
    /// Ceiling on one generation call; expiry is treated as a failure and
    /// refunded so an abandoned flow cannot leak a reservation
    generation_ceiling: Duration,
}

impl GenerationOrchestrator {
    pub fn new(
        ledger: Arc<CreditLedger>,
        allowance: Arc<AnonymousAllowance>,
        generator: Arc<dyn GenerationService>,
        designs: Arc<dyn DesignStore>,
        handoff: Arc<SessionHandoff>,
        usage: UsageLogger,
        generation_ceiling: Duration,
    ) -> Self {
        Self {
            ledger,
            allowance,
            generator,
            designs,
            handoff,
            usage,
            generation_ceiling,
        }
    }

    /// Run one complete generation flow for a principal.
    ///
    /// Every exit path leaves the reservation in a terminal state: REJECTED
    /// before any side effects, FAILED after exactly one refund, or DONE
    /// with the reservation completed (with or without a shareable id).
    pub async fn start_generation(
        &self,
        principal: &Principal,
        request: DesignRequest,
    ) -> Result<GenerationOutcome> {
        let mut flow = FlowRecord::new();
        let started = Instant::now();

        // RESERVING: the only state allowed to fail on business grounds
        flow.enter(FlowState::Reserving);
        let reservation = match self.reserve(principal, &request).await {
            Ok(r) => r,
            Err(e) => {
                flow.enter(FlowState::Rejected);
                info!(flow_id = %flow.flow_id, principal = %principal, "Generation rejected: {}", e);
                return Err(e);
            }
        };

        if let Some(reservation_id) = reservation.reservation_id() {
            self.usage
                .log_generation_started(principal.id(), reservation_id)
                .await;
        }

        // GENERATING: failure or timeout triggers exactly one refund
        flow.enter(FlowState::Generating);
        let style_refs = request.merged_style_references();
        let design = match self.generate_bounded(&request, &style_refs).await {
            Ok(design) => design,
            Err(e) => {
                flow.enter(FlowState::Refunding);
                let reason = e.to_string();
                self.refund(&reservation, &reason).await;
                flow.enter(FlowState::Failed);
                self.usage
                    .log_generation_failed(
                        principal.id(),
                        &reason,
                        started.elapsed().as_millis() as u64,
                    )
                    .await;
                return Err(e);
            }
        };

        // PERSISTING: failure must not lose the artifact - the credit was
        // legitimately consumed since generation succeeded
        flow.enter(FlowState::Persisting);
        let saved = self.designs.save(principal.id(), &design, false).await;

        flow.enter(FlowState::Committing);
        let short_id = match saved {
            Ok(saved_ref) => {
                self.complete(&reservation, Some(&saved_ref.short_id)).await;
                Some(saved_ref.short_id)
            }
            Err(e) => {
                // Degrade to a session-only result; complete without an id
                warn!(
                    flow_id = %flow.flow_id,
                    error = %e,
                    "Persistence failed, falling back to session hand-off"
                );
                self.complete(&reservation, None).await;
                None
            }
        };

        let handoff_ticket = self.handoff.stash(design.clone());

        flow.enter(FlowState::Done);
        self.usage
            .log_generation_completed(
                principal.id(),
                short_id.as_deref(),
                started.elapsed().as_millis() as u64,
            )
            .await;

        let balance = match principal {
            Principal::User(id) => Some(self.ledger.balance(id).await.unwrap_or(0)),
            Principal::Anonymous => None,
        };

        info!(
            flow_id = %flow.flow_id,
            principal = %principal,
            short_id = ?short_id,
            "Generation flow done"
        );

        Ok(GenerationOutcome {
            design,
            short_id,
            handoff: handoff_ticket,
            balance,
        })
    }

    /// Reserve one credit for the principal. Authenticated principals go
    /// through the ledger (fail closed); anonymous principals through the
    /// best-effort device allowance.
    async fn reserve(
        &self,
        principal: &Principal,
        request: &DesignRequest,
    ) -> Result<FlowReservation> {
        match principal {
            Principal::User(id) => {
                let reservation_id = self.ledger.reserve(id, 1).await?;
                Ok(FlowReservation::Ledger(reservation_id))
            }
            Principal::Anonymous => {
                let device = request.device_token.as_deref().ok_or_else(|| {
                    AutoscapeError::BadRequest(
                        "Anonymous generation requires a device token".into(),
                    )
                })?;
                let ticket = self.allowance.try_reserve(device)?;
                Ok(FlowReservation::Anonymous(ticket))
            }
        }
    }

    /// Run the external generation call under the configured ceiling.
    /// Expiry is indistinguishable from failure to the rest of the flow.
    async fn generate_bounded(
        &self,
        request: &DesignRequest,
        style_refs: &[StyleImage],
    ) -> Result<DesignResult> {
        match tokio::time::timeout(
            self.generation_ceiling,
            self.generator.generate(request, style_refs),
        )
        .await
        {
            Ok(Ok(design)) => Ok(design),
            Ok(Err(e)) => Err(match e {
                e @ AutoscapeError::GenerationFailed(_) => e,
                other => AutoscapeError::GenerationFailed(other.to_string()),
            }),
            Err(_) => Err(AutoscapeError::GenerationFailed(format!(
                "Generation timed out after {}s",
                self.generation_ceiling.as_secs()
            ))),
        }
    }

    /// Exactly-once compensation after a generation failure
    async fn refund(&self, reservation: &FlowReservation, reason: &str) {
        match reservation {
            FlowReservation::Ledger(id) => {
                // A refund failure here is an invariant breach: log it loudly,
                // never swallow it silently
                if let Err(e) = self.ledger.refund(id, reason).await {
                    error!(reservation_id = %id, error = %e, "Refund failed");
                }
            }
            FlowReservation::Anonymous(ticket) => {
                self.allowance.refund(ticket);
            }
        }
    }

    /// Finalize the reservation as spent. Failures are warnings: the
    /// generation itself already succeeded, and losing a paid-for artifact
    /// over bookkeeping would be the worse outcome.
    async fn complete(&self, reservation: &FlowReservation, short_id: Option<&str>) {
        match reservation {
            FlowReservation::Ledger(id) => {
                if let Err(e) = self.ledger.complete(id, short_id).await {
                    warn!(reservation_id = %id, error = %e, "Reservation completion failed");
                }
            }
            FlowReservation::Anonymous(_) => {
                // The allowance was counted at reserve time; nothing to do
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::designs::{InMemoryDesignStore, SavedRef};
    use crate::generation::types::CostEstimate;
    use crate::ledger::{InMemoryLedgerStore, ReservationStatus};
    use std::sync::atomic::{AtomicU32, Ordering};

    // ------------------------------------------------------------------
    // Mocks
    // ------------------------------------------------------------------

    enum MockBehavior {
        Succeed,
        Fail,
        Hang,
    }

    struct MockGenerationService {
        behavior: MockBehavior,
        calls: AtomicU32,
    }

    impl MockGenerationService {
        fn new(behavior: MockBehavior) -> Self {
            Self {
                behavior,
                calls: AtomicU32::new(0),
            }
        }

        fn call_count(&self) -> u32 {
            self.calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait::async_trait]
    impl GenerationService for MockGenerationService {
        async fn generate(
            &self,
            request: &DesignRequest,
            _style_refs: &[StyleImage],
        ) -> crate::types::Result<DesignResult> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            match self.behavior {
                MockBehavior::Succeed => Ok(DesignResult {
                    rendered_images: vec!["render.png".into()],
                    plan_image: Some("plan.png".into()),
                    video_url: None,
                    yard_image: Some(request.yard_image.clone()),
                    analysis: "flat lawn".into(),
                    estimate: CostEstimate::default(),
                    materials: vec![],
                }),
                MockBehavior::Fail => Err(AutoscapeError::GenerationFailed("model error".into())),
                MockBehavior::Hang => {
                    tokio::time::sleep(Duration::from_secs(3600)).await;
                    unreachable!("hung call should be timed out")
                }
            }
        }
    }

    /// Design store whose save always fails (persistence outage)
    struct FailingDesignStore;

    #[async_trait::async_trait]
    impl DesignStore for FailingDesignStore {
        async fn save(
            &self,
            _owner: &str,
            _design: &DesignResult,
            _is_public: bool,
        ) -> crate::types::Result<SavedRef> {
            Err(AutoscapeError::Database("write concern failed".into()))
        }

        async fn get_by_short_id(
            &self,
            _short_id: &str,
        ) -> crate::types::Result<Option<crate::db::schemas::DesignDoc>> {
            Ok(None)
        }

        async fn get_by_id(
            &self,
            _id: &str,
        ) -> crate::types::Result<Option<crate::db::schemas::DesignDoc>> {
            Ok(None)
        }

        async fn list_by_owner(
            &self,
            _owner: &str,
        ) -> crate::types::Result<Vec<crate::db::schemas::DesignDoc>> {
            Ok(vec![])
        }

        async fn list_public(
            &self,
            _limit: i64,
        ) -> crate::types::Result<Vec<crate::db::schemas::DesignDoc>> {
            Ok(vec![])
        }

        async fn delete_by_id(&self, _id: &str) -> crate::types::Result<()> {
            Ok(())
        }

        async fn set_visibility(
            &self,
            _id: &str,
            _is_public: bool,
        ) -> crate::types::Result<Option<crate::db::schemas::DesignDoc>> {
            Ok(None)
        }
    }

    // ------------------------------------------------------------------
    // Harness
    // ------------------------------------------------------------------

    struct Harness {
        ledger: Arc<CreditLedger>,
        allowance: Arc<AnonymousAllowance>,
        generator: Arc<MockGenerationService>,
        designs: Arc<dyn DesignStore>,
        handoff: Arc<SessionHandoff>,
        orchestrator: GenerationOrchestrator,
    }

    fn harness_with(
        behavior: MockBehavior,
        designs: Arc<dyn DesignStore>,
        ceiling: Duration,
    ) -> Harness {
        let ledger = Arc::new(CreditLedger::new(Arc::new(InMemoryLedgerStore::new())));
        let allowance = Arc::new(AnonymousAllowance::new(2));
        let generator = Arc::new(MockGenerationService::new(behavior));
        let handoff = Arc::new(SessionHandoff::new(Duration::from_secs(60)));

        let orchestrator = GenerationOrchestrator::new(
            Arc::clone(&ledger),
            Arc::clone(&allowance),
            Arc::clone(&generator) as Arc<dyn GenerationService>,
            Arc::clone(&designs),
            Arc::clone(&handoff),
            UsageLogger::new("test-node".into()),
            ceiling,
        );

        Harness {
            ledger,
            allowance,
            generator,
            designs,
            handoff,
            orchestrator,
        }
    }

    fn harness(behavior: MockBehavior) -> Harness {
        harness_with(
            behavior,
            Arc::new(InMemoryDesignStore::new()),
            Duration::from_secs(5),
        )
    }

    fn request() -> DesignRequest {
        DesignRequest {
            yard_image: "data:image/png;base64,YARD".into(),
            uploaded_styles: vec![],
            gallery_styles: vec![],
            prompt: "drought tolerant".into(),
            style_id: Some("desert-modern".into()),
            budget: Some(5000),
            location_type: Some("back_yard".into()),
            space_size: Some(400),
            use_rag: true,
            device_token: None,
        }
    }

    fn anonymous_request(device: &str) -> DesignRequest {
        DesignRequest {
            device_token: Some(device.to_string()),
            ..request()
        }
    }

    // ------------------------------------------------------------------
    // Scenarios
    // ------------------------------------------------------------------

    #[tokio::test]
    async fn test_successful_flow_commits_and_persists() {
        // Scenario A: balance=2, generation succeeds
        let h = harness(MockBehavior::Succeed);
        h.ledger.grant("user-1", 2).await.unwrap();
        let user = Principal::User("user-1".into());

        let outcome = h.orchestrator.start_generation(&user, request()).await.unwrap();

        assert_eq!(h.ledger.balance("user-1").await.unwrap(), 1);
        assert_eq!(outcome.balance, Some(1));

        let short_id = outcome.short_id.expect("design should be persisted");
        let saved = h.designs.get_by_short_id(&short_id).await.unwrap().unwrap();
        assert_eq!(saved.rendered_images, outcome.design.rendered_images);

        // Reservation completed and linked to the short id
        let reservations = h.ledger.list_reservations("user-1").await.unwrap();
        assert_eq!(reservations.len(), 1);
        assert_eq!(reservations[0].status, ReservationStatus::Completed);
        assert_eq!(reservations[0].result_short_id.as_deref(), Some(short_id.as_str()));

        // Result resolvable through the session hand-off too
        let stashed = h.handoff.get(&outcome.handoff).unwrap();
        assert_eq!(stashed.rendered_images, outcome.design.rendered_images);
    }

    #[tokio::test]
    async fn test_generation_failure_refunds_once() {
        // Scenario B: balance=1, generation service throws
        let h = harness(MockBehavior::Fail);
        h.ledger.grant("user-1", 1).await.unwrap();
        let user = Principal::User("user-1".into());

        let err = h.orchestrator.start_generation(&user, request()).await.unwrap_err();
        assert!(matches!(err, AutoscapeError::GenerationFailed(_)));

        // Balance restored, no design created
        assert_eq!(h.ledger.balance("user-1").await.unwrap(), 1);
        assert!(h.designs.list_by_owner("user-1").await.unwrap().is_empty());
        assert_eq!(h.generator.call_count(), 1);

        // Reservation refunded with the failure recorded for audit
        let reservations = h.ledger.list_reservations("user-1").await.unwrap();
        assert_eq!(reservations.len(), 1);
        assert_eq!(reservations[0].status, ReservationStatus::Refunded);
        assert!(reservations[0].refund_reason.is_some());
    }

    #[tokio::test]
    async fn test_persistence_failure_degrades_to_handoff() {
        // Scenario C: balance=1, generation succeeds, persistence throws
        let h = harness_with(
            MockBehavior::Succeed,
            Arc::new(FailingDesignStore),
            Duration::from_secs(5),
        );
        h.ledger.grant("user-1", 1).await.unwrap();
        let user = Principal::User("user-1".into());

        let outcome = h.orchestrator.start_generation(&user, request()).await.unwrap();

        // Credit consumed: the generation itself succeeded
        assert_eq!(h.ledger.balance("user-1").await.unwrap(), 0);
        assert!(outcome.short_id.is_none());

        // Result still viewable via the session hand-off
        let stashed = h.handoff.get(&outcome.handoff).unwrap();
        assert_eq!(stashed.rendered_images, outcome.design.rendered_images);

        // But not retrievable from the store (a fresh page load would 404)
        assert!(h.designs.get_by_short_id("anything").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_insufficient_credits_makes_no_generation_call() {
        let h = harness(MockBehavior::Succeed);
        let user = Principal::User("user-1".into());

        let err = h.orchestrator.start_generation(&user, request()).await.unwrap_err();
        assert!(matches!(err, AutoscapeError::InsufficientCredits));

        // REJECTED is terminal with zero side effects
        assert_eq!(h.generator.call_count(), 0);
        assert!(h.handoff.is_empty());
    }

    #[tokio::test]
    async fn test_anonymous_allowance_blocks_third_attempt() {
        // Scenario D: allowance=2, third anonymous attempt blocked before
        // any generation call
        let h = harness(MockBehavior::Succeed);
        let anon = Principal::Anonymous;

        h.orchestrator
            .start_generation(&anon, anonymous_request("device-1"))
            .await
            .unwrap();
        h.orchestrator
            .start_generation(&anon, anonymous_request("device-1"))
            .await
            .unwrap();
        assert_eq!(h.generator.call_count(), 2);

        let err = h
            .orchestrator
            .start_generation(&anon, anonymous_request("device-1"))
            .await
            .unwrap_err();
        assert!(matches!(err, AutoscapeError::InsufficientCredits));
        assert_eq!(h.generator.call_count(), 2);
    }

    #[tokio::test]
    async fn test_anonymous_failure_restores_allowance() {
        let h = harness(MockBehavior::Fail);
        let anon = Principal::Anonymous;

        let err = h
            .orchestrator
            .start_generation(&anon, anonymous_request("device-1"))
            .await
            .unwrap_err();
        assert!(matches!(err, AutoscapeError::GenerationFailed(_)));
        assert_eq!(h.allowance.remaining("device-1"), 2);
    }

    #[tokio::test]
    async fn test_anonymous_without_device_token_rejected() {
        let h = harness(MockBehavior::Succeed);
        let anon = Principal::Anonymous;

        let err = h.orchestrator.start_generation(&anon, request()).await.unwrap_err();
        assert!(matches!(err, AutoscapeError::BadRequest(_)));
        assert_eq!(h.generator.call_count(), 0);
    }

    #[tokio::test]
    async fn test_timeout_treated_as_generation_failure() {
        let h = harness_with(
            MockBehavior::Hang,
            Arc::new(InMemoryDesignStore::new()),
            Duration::from_millis(50),
        );
        h.ledger.grant("user-1", 1).await.unwrap();
        let user = Principal::User("user-1".into());

        let err = h.orchestrator.start_generation(&user, request()).await.unwrap_err();
        match err {
            AutoscapeError::GenerationFailed(msg) => assert!(msg.contains("timed out")),
            other => panic!("expected GenerationFailed, got {:?}", other),
        }

        // Orphaned reservation self-resolved via refund
        assert_eq!(h.ledger.balance("user-1").await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_credit_events_fire_on_reserve_and_commit() {
        let h = harness(MockBehavior::Succeed);
        h.ledger.grant("user-1", 1).await.unwrap();
        let user = Principal::User("user-1".into());
        let mut events = h.ledger.subscribe();

        h.orchestrator.start_generation(&user, request()).await.unwrap();

        // Reserved then committed, in order
        let first = events.recv().await.unwrap();
        assert_eq!(first.kind, crate::ledger::CreditEventKind::Reserved);
        assert_eq!(first.balance, 0);
        let second = events.recv().await.unwrap();
        assert_eq!(second.kind, crate::ledger::CreditEventKind::Committed);
    }

    #[tokio::test]
    async fn test_persistence_failure_completes_without_result_id() {
        let h = harness_with(
            MockBehavior::Succeed,
            Arc::new(FailingDesignStore),
            Duration::from_secs(5),
        );
        h.ledger.grant("user-1", 1).await.unwrap();
        let user = Principal::User("user-1".into());

        h.orchestrator.start_generation(&user, request()).await.unwrap();

        let reservations = h.ledger.list_reservations("user-1").await.unwrap();
        assert_eq!(reservations.len(), 1);
        assert_eq!(reservations[0].status, ReservationStatus::Completed);
        assert!(reservations[0].result_short_id.is_none());
    }
}
