//! Credit Ledger
//!
//! Each generation costs exactly one credit, reserved before work begins and
//! refunded if the work does not complete. The ledger enforces:
//!
//! - balance is never observed negative (reservation fails closed)
//! - a reservation's amount is deducted exactly once, at creation
//! - a reservation reaches exactly one terminal state: completed or refunded
//! - refund restores the amount exactly once
//!
//! Balance changes fan out on a broadcast channel so interested components
//! (SSE stream, UI badges) can refresh without polling.

pub mod anonymous;
pub mod store;

use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::broadcast;
use tracing::{info, warn};
use uuid::Uuid;

use crate::types::{AutoscapeError, Result};

pub use anonymous::{AnonymousAllowance, AnonymousTicket};
pub use store::{InMemoryLedgerStore, LedgerStore, MongoLedgerStore};

/// Reservation lifecycle status
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum ReservationStatus {
    /// Created, amount deducted, outcome not yet known
    #[default]
    Pending,
    /// The generation succeeded; the credit was legitimately spent
    Completed,
    /// The generation did not complete; the amount was restored
    Refunded,
}

impl ReservationStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ReservationStatus::Pending => "pending",
            ReservationStatus::Completed => "completed",
            ReservationStatus::Refunded => "refunded",
        }
    }
}

/// One credit tentatively consumed by a generation attempt
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Reservation {
    pub reservation_id: String,
    pub principal: String,
    pub amount: i64,
    pub status: ReservationStatus,
    pub result_short_id: Option<String>,
    pub refund_reason: Option<String>,
}

/// What changed on a principal's balance
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CreditEventKind {
    Reserved,
    Refunded,
    Committed,
    Granted,
}

/// Broadcast payload for balance changes
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreditsChanged {
    pub principal: String,
    pub balance: i64,
    pub kind: CreditEventKind,
}

/// The credit ledger for authenticated principals.
///
/// The generation orchestrator is the sole caller of reserve/complete/refund
/// for a flow; the billing webhook calls grant.
pub struct CreditLedger {
    store: Arc<dyn LedgerStore>,
    events_tx: broadcast::Sender<CreditsChanged>,
}

impl CreditLedger {
    pub fn new(store: Arc<dyn LedgerStore>) -> Self {
        let (events_tx, _) = broadcast::channel(100);
        Self { store, events_tx }
    }

    /// Subscribe to balance-change events
    pub fn subscribe(&self) -> broadcast::Receiver<CreditsChanged> {
        self.events_tx.subscribe()
    }

    fn emit(&self, principal: &str, balance: i64, kind: CreditEventKind) {
        // No receivers is fine; send only fails when nobody listens
        let _ = self.events_tx.send(CreditsChanged {
            principal: principal.to_string(),
            balance,
            kind,
        });
    }

    /// Reserve `amount` credits for one generation attempt.
    ///
    /// Fails closed: a storage error is surfaced as-is and the caller must
    /// not proceed with generation. Insufficient balance fails with
    /// `InsufficientCredits` and leaves the balance untouched.
    pub async fn reserve(&self, principal: &str, amount: i64) -> Result<String> {
        let new_balance = self
            .store
            .try_decrement(principal, amount)
            .await?
            .ok_or(AutoscapeError::InsufficientCredits)?;

        let reservation_id = Uuid::new_v4().to_string();
        let reservation = Reservation {
            reservation_id: reservation_id.clone(),
            principal: principal.to_string(),
            amount,
            status: ReservationStatus::Pending,
            result_short_id: None,
            refund_reason: None,
        };

        if let Err(e) = self.store.create_reservation(reservation).await {
            // The deduction already happened; restore it before failing so
            // the credit is not silently lost.
            warn!(principal = %principal, error = %e, "Reservation record failed, restoring balance");
            let restored = self.store.credit(principal, amount).await?;
            self.emit(principal, restored, CreditEventKind::Refunded);
            return Err(e);
        }

        info!(
            principal = %principal,
            reservation_id = %reservation_id,
            balance = new_balance,
            "Credit reserved"
        );
        self.emit(principal, new_balance, CreditEventKind::Reserved);

        Ok(reservation_id)
    }

    /// Mark a reservation completed, recording the result identifier when
    /// one exists. Idempotent: completing again with the same result id is a
    /// no-op. Completing a refunded reservation fails with
    /// `InvalidReservationState`. Never changes the balance.
    pub async fn complete(&self, reservation_id: &str, result_id: Option<&str>) -> Result<()> {
        let finalized = self
            .store
            .finalize_reservation(
                reservation_id,
                ReservationStatus::Completed,
                result_id.map(|s| s.to_string()),
                None,
            )
            .await?;

        if let Some(reservation) = finalized {
            info!(
                reservation_id = %reservation_id,
                result_id = ?result_id,
                "Reservation completed"
            );
            let balance = self.store.balance(&reservation.principal).await?;
            self.emit(&reservation.principal, balance, CreditEventKind::Committed);
            return Ok(());
        }

        // Not pending: decide between idempotent repeat and invariant breach
        match self.store.get_reservation(reservation_id).await? {
            None => Err(AutoscapeError::InvalidReservationState(format!(
                "Unknown reservation {}",
                reservation_id
            ))),
            Some(existing) => match existing.status {
                ReservationStatus::Completed
                    if existing.result_short_id.as_deref() == result_id =>
                {
                    // Same call replayed; nothing to do
                    Ok(())
                }
                ReservationStatus::Completed => Err(AutoscapeError::InvalidReservationState(
                    format!(
                        "Reservation {} already completed with a different result",
                        reservation_id
                    ),
                )),
                ReservationStatus::Refunded => Err(AutoscapeError::InvalidReservationState(
                    format!("Reservation {} was already refunded", reservation_id),
                )),
                ReservationStatus::Pending => Err(AutoscapeError::InvalidReservationState(
                    format!("Reservation {} finalize raced", reservation_id),
                )),
            },
        }
    }

    /// Refund a pending reservation, restoring its amount exactly once.
    /// Refunding a completed reservation is rejected - that credit was
    /// legitimately spent.
    pub async fn refund(&self, reservation_id: &str, reason: &str) -> Result<()> {
        let finalized = self
            .store
            .finalize_reservation(
                reservation_id,
                ReservationStatus::Refunded,
                None,
                Some(reason.to_string()),
            )
            .await?;

        if let Some(reservation) = finalized {
            // The CAS won, so this credit happens exactly once
            let balance = self
                .store
                .credit(&reservation.principal, reservation.amount)
                .await?;
            info!(
                reservation_id = %reservation_id,
                principal = %reservation.principal,
                reason = %reason,
                balance,
                "Reservation refunded"
            );
            self.emit(&reservation.principal, balance, CreditEventKind::Refunded);
            return Ok(());
        }

        match self.store.get_reservation(reservation_id).await? {
            None => Err(AutoscapeError::InvalidReservationState(format!(
                "Unknown reservation {}",
                reservation_id
            ))),
            Some(existing) => match existing.status {
                ReservationStatus::Completed => Err(AutoscapeError::InvalidReservationState(
                    format!(
                        "Reservation {} is completed; the credit was spent",
                        reservation_id
                    ),
                )),
                ReservationStatus::Refunded => Err(AutoscapeError::InvalidReservationState(
                    format!("Reservation {} was already refunded", reservation_id),
                )),
                ReservationStatus::Pending => Err(AutoscapeError::InvalidReservationState(
                    format!("Reservation {} finalize raced", reservation_id),
                )),
            },
        }
    }

    /// Read-only balance; 0 at minimum, never negative
    pub async fn balance(&self, principal: &str) -> Result<i64> {
        self.store.balance(principal).await
    }

    /// Add purchased or promotional credits
    pub async fn grant(&self, principal: &str, amount: i64) -> Result<i64> {
        let balance = self.store.credit(principal, amount).await?;
        info!(principal = %principal, amount, balance, "Credits granted");
        self.emit(principal, balance, CreditEventKind::Granted);
        Ok(balance)
    }

    /// Create the principal's account with signup credits on first contact
    pub async fn ensure_account(&self, principal: &str, signup_credits: i64) -> Result<i64> {
        self.store.ensure_account(principal, signup_credits).await
    }

    /// Load a reservation for inspection (admin/audit)
    pub async fn get_reservation(&self, reservation_id: &str) -> Result<Option<Reservation>> {
        self.store.get_reservation(reservation_id).await
    }

    /// All reservations for a principal (admin/audit)
    pub async fn list_reservations(&self, principal: &str) -> Result<Vec<Reservation>> {
        self.store.list_reservations(principal).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ledger() -> CreditLedger {
        CreditLedger::new(Arc::new(InMemoryLedgerStore::new()))
    }

    async fn ledger_with_balance(principal: &str, credits: i64) -> CreditLedger {
        let l = ledger();
        if credits > 0 {
            l.grant(principal, credits).await.unwrap();
        }
        l
    }

    #[tokio::test]
    async fn test_reserve_decrements_balance() {
        let l = ledger_with_balance("user-1", 3).await;

        let reservation = l.reserve("user-1", 1).await.unwrap();
        assert!(!reservation.is_empty());
        assert_eq!(l.balance("user-1").await.unwrap(), 2);
    }

    #[tokio::test]
    async fn test_reserve_with_zero_balance_fails_unchanged() {
        let l = ledger();

        let err = l.reserve("user-1", 1).await.unwrap_err();
        assert!(matches!(err, AutoscapeError::InsufficientCredits));
        assert_eq!(l.balance("user-1").await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_complete_then_refund_rejected() {
        let l = ledger_with_balance("user-1", 1).await;
        let r = l.reserve("user-1", 1).await.unwrap();

        l.complete(&r, Some("abc123")).await.unwrap();

        let err = l.refund(&r, "too late").await.unwrap_err();
        assert!(matches!(err, AutoscapeError::InvalidReservationState(_)));
        // Balance untouched: the credit stays spent
        assert_eq!(l.balance("user-1").await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_refund_then_complete_rejected() {
        let l = ledger_with_balance("user-1", 1).await;
        let r = l.reserve("user-1", 1).await.unwrap();

        l.refund(&r, "generation failed").await.unwrap();
        assert_eq!(l.balance("user-1").await.unwrap(), 1);

        let err = l.complete(&r, Some("abc123")).await.unwrap_err();
        assert!(matches!(err, AutoscapeError::InvalidReservationState(_)));
    }

    #[tokio::test]
    async fn test_double_refund_restores_once() {
        let l = ledger_with_balance("user-1", 1).await;
        let r = l.reserve("user-1", 1).await.unwrap();

        l.refund(&r, "first").await.unwrap();
        let err = l.refund(&r, "second").await.unwrap_err();
        assert!(matches!(err, AutoscapeError::InvalidReservationState(_)));

        // Restored exactly once
        assert_eq!(l.balance("user-1").await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_complete_is_idempotent_for_same_result() {
        let l = ledger_with_balance("user-1", 2).await;
        let r = l.reserve("user-1", 1).await.unwrap();

        l.complete(&r, Some("abc123")).await.unwrap();
        // Replaying the same completion is a no-op
        l.complete(&r, Some("abc123")).await.unwrap();

        assert_eq!(l.balance("user-1").await.unwrap(), 1);
        let reservation = l.get_reservation(&r).await.unwrap().unwrap();
        assert_eq!(reservation.status, ReservationStatus::Completed);
        assert_eq!(reservation.result_short_id.as_deref(), Some("abc123"));
    }

    #[tokio::test]
    async fn test_complete_with_different_result_is_error() {
        let l = ledger_with_balance("user-1", 1).await;
        let r = l.reserve("user-1", 1).await.unwrap();

        l.complete(&r, Some("abc123")).await.unwrap();
        let err = l.complete(&r, Some("xyz789")).await.unwrap_err();
        assert!(matches!(err, AutoscapeError::InvalidReservationState(_)));
    }

    #[tokio::test]
    async fn test_complete_without_result_id() {
        // Persistence failed but generation succeeded: completion without a
        // linked artifact
        let l = ledger_with_balance("user-1", 1).await;
        let r = l.reserve("user-1", 1).await.unwrap();

        l.complete(&r, None).await.unwrap();
        let reservation = l.get_reservation(&r).await.unwrap().unwrap();
        assert_eq!(reservation.status, ReservationStatus::Completed);
        assert!(reservation.result_short_id.is_none());
    }

    #[tokio::test]
    async fn test_concurrent_reserves_against_one_credit() {
        let l = Arc::new(ledger_with_balance("user-1", 1).await);

        let l1 = Arc::clone(&l);
        let l2 = Arc::clone(&l);
        let (a, b) = tokio::join!(
            tokio::spawn(async move { l1.reserve("user-1", 1).await }),
            tokio::spawn(async move { l2.reserve("user-1", 1).await }),
        );
        let a = a.unwrap();
        let b = b.unwrap();

        // Exactly one success, one InsufficientCredits
        assert_eq!(a.is_ok() as u32 + b.is_ok() as u32, 1);
        let failure = if a.is_err() { a.unwrap_err() } else { b.unwrap_err() };
        assert!(matches!(failure, AutoscapeError::InsufficientCredits));

        // Final balance 0: never -1, never 1
        assert_eq!(l.balance("user-1").await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_grant_and_balance_floor() {
        let l = ledger();
        assert_eq!(l.balance("nobody").await.unwrap(), 0);

        let balance = l.grant("user-1", 5).await.unwrap();
        assert_eq!(balance, 5);
    }

    #[tokio::test]
    async fn test_ensure_account_grants_signup_credits_once() {
        let l = ledger();
        assert_eq!(l.ensure_account("user-1", 2).await.unwrap(), 2);

        l.reserve("user-1", 1).await.unwrap();
        // Second contact does not re-grant
        assert_eq!(l.ensure_account("user-1", 2).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_events_emitted_on_reserve_and_refund() {
        let l = ledger_with_balance("user-1", 1).await;
        let mut rx = l.subscribe();

        let r = l.reserve("user-1", 1).await.unwrap();
        let ev = rx.recv().await.unwrap();
        assert_eq!(ev.kind, CreditEventKind::Reserved);
        assert_eq!(ev.balance, 0);

        l.refund(&r, "test").await.unwrap();
        let ev = rx.recv().await.unwrap();
        assert_eq!(ev.kind, CreditEventKind::Refunded);
        assert_eq!(ev.balance, 1);
    }
}
