//! Durable counter and reservation storage behind the credit ledger
//!
//! A per-principal counter with atomic conditional decrement/increment,
//! plus reservation records with an atomic pending-to-terminal transition.
//! Two backends: MongoDB for production and an in-memory map for dev mode
//! and tests.

use bson::doc;
use std::collections::HashMap;
use tokio::sync::Mutex;
use tracing::warn;

use crate::db::schemas::{CreditDoc, ReservationDoc, CREDIT_COLLECTION, RESERVATION_COLLECTION};
use crate::db::{MongoClient, MongoCollection};
use crate::ledger::{Reservation, ReservationStatus};
use crate::types::{AutoscapeError, Result};

/// Trait for ledger storage (allows different backends)
#[async_trait::async_trait]
pub trait LedgerStore: Send + Sync {
    /// Atomically decrement the principal's balance if it holds at least
    /// `amount`. Returns the new balance, or None when the balance was
    /// insufficient (or the account does not exist). A storage failure is an
    /// Err - callers must treat it as "could not verify", not as zero.
    async fn try_decrement(&self, principal: &str, amount: i64) -> Result<Option<i64>>;

    /// Atomically add `amount` to the principal's balance, creating the
    /// account if needed. Returns the new balance.
    async fn credit(&self, principal: &str, amount: i64) -> Result<i64>;

    /// Current balance; 0 for unknown principals
    async fn balance(&self, principal: &str) -> Result<i64>;

    /// Create the account with an initial balance if it does not exist yet.
    /// Returns the current balance either way.
    async fn ensure_account(&self, principal: &str, initial: i64) -> Result<i64>;

    /// Record a new pending reservation
    async fn create_reservation(&self, reservation: Reservation) -> Result<()>;

    /// Load a reservation by its identifier
    async fn get_reservation(&self, reservation_id: &str) -> Result<Option<Reservation>>;

    /// All reservations for a principal, for audit/debugging
    async fn list_reservations(&self, principal: &str) -> Result<Vec<Reservation>>;

    /// Atomically transition a *pending* reservation to a terminal status.
    /// Returns the updated reservation, or None when the reservation was not
    /// pending (already finalized, or unknown). This is the only write path
    /// for reservation status, which is what keeps completed and refunded
    /// mutually exclusive.
    async fn finalize_reservation(
        &self,
        reservation_id: &str,
        to: ReservationStatus,
        result_short_id: Option<String>,
        refund_reason: Option<String>,
    ) -> Result<Option<Reservation>>;
}

// ============================================================================
// MongoDB backend
// ============================================================================

/// MongoDB-backed ledger store
pub struct MongoLedgerStore {
    credits: MongoCollection<CreditDoc>,
    reservations: MongoCollection<ReservationDoc>,
}

impl MongoLedgerStore {
    pub async fn new(mongo: &MongoClient) -> Result<Self> {
        Ok(Self {
            credits: mongo.collection(CREDIT_COLLECTION).await?,
            reservations: mongo.collection(RESERVATION_COLLECTION).await?,
        })
    }
}

#[async_trait::async_trait]
impl LedgerStore for MongoLedgerStore {
    async fn try_decrement(&self, principal: &str, amount: i64) -> Result<Option<i64>> {
        // The $gte filter is the race guard: of two concurrent calls against
        // a balance of `amount`, only one matches the filter.
        let updated = self
            .credits
            .find_one_and_update(
                doc! { "principal": principal, "credits": { "$gte": amount } },
                doc! {
                    "$inc": { "credits": -amount },
                    "$set": { "metadata.updated_at": bson::DateTime::now() },
                },
            )
            .await?;

        Ok(updated.map(|d| d.credits))
    }

    async fn credit(&self, principal: &str, amount: i64) -> Result<i64> {
        let updated = self
            .credits
            .find_one_and_update(
                doc! { "principal": principal },
                doc! {
                    "$inc": { "credits": amount, "total_granted": amount },
                    "$set": { "metadata.updated_at": bson::DateTime::now() },
                },
            )
            .await?;

        if let Some(d) = updated {
            return Ok(d.credits);
        }

        // No account yet: create it. A concurrent creator loses the unique
        // index race, in which case we retry the increment once.
        match self
            .credits
            .insert_one(CreditDoc::new(principal.to_string(), amount))
            .await
        {
            Ok(_) => Ok(amount),
            Err(e) => {
                warn!(principal = %principal, error = %e, "Balance insert raced, retrying increment");
                let retried = self
                    .credits
                    .find_one_and_update(
                        doc! { "principal": principal },
                        doc! {
                            "$inc": { "credits": amount, "total_granted": amount },
                            "$set": { "metadata.updated_at": bson::DateTime::now() },
                        },
                    )
                    .await?;
                retried
                    .map(|d| d.credits)
                    .ok_or_else(|| AutoscapeError::Database("Credit upsert failed".into()))
            }
        }
    }

    async fn balance(&self, principal: &str) -> Result<i64> {
        let found = self.credits.find_one(doc! { "principal": principal }).await?;
        Ok(found.map(|d| d.credits.max(0)).unwrap_or(0))
    }

    async fn ensure_account(&self, principal: &str, initial: i64) -> Result<i64> {
        if let Some(existing) = self.credits.find_one(doc! { "principal": principal }).await? {
            return Ok(existing.credits.max(0));
        }

        match self
            .credits
            .insert_one(CreditDoc::new(principal.to_string(), initial))
            .await
        {
            Ok(_) => Ok(initial),
            // Lost the unique-index race to a concurrent creator
            Err(_) => self.balance(principal).await,
        }
    }

    async fn create_reservation(&self, reservation: Reservation) -> Result<()> {
        self.reservations
            .insert_one(ReservationDoc::from_reservation(&reservation))
            .await?;
        Ok(())
    }

    async fn get_reservation(&self, reservation_id: &str) -> Result<Option<Reservation>> {
        let found = self
            .reservations
            .find_one(doc! { "reservation_id": reservation_id })
            .await?;
        Ok(found.map(|d| d.into_reservation()))
    }

    async fn list_reservations(&self, principal: &str) -> Result<Vec<Reservation>> {
        let docs = self
            .reservations
            .find_many(doc! { "principal": principal }, None)
            .await?;
        Ok(docs.into_iter().map(|d| d.into_reservation()).collect())
    }

    async fn finalize_reservation(
        &self,
        reservation_id: &str,
        to: ReservationStatus,
        result_short_id: Option<String>,
        refund_reason: Option<String>,
    ) -> Result<Option<Reservation>> {
        let mut set = doc! {
            "status": to.as_str(),
            "metadata.updated_at": bson::DateTime::now(),
        };
        if let Some(short_id) = result_short_id {
            set.insert("result_short_id", short_id);
        }
        if let Some(reason) = refund_reason {
            set.insert("refund_reason", reason);
        }

        let updated = self
            .reservations
            .find_one_and_update(
                doc! {
                    "reservation_id": reservation_id,
                    "status": ReservationStatus::Pending.as_str(),
                },
                doc! { "$set": set },
            )
            .await?;

        Ok(updated.map(|d| d.into_reservation()))
    }
}

// ============================================================================
// In-memory backend (dev mode and tests)
// ============================================================================

/// Simple in-memory ledger store. The mutex serializes the
/// check-then-decrement sequence, giving the same race guarantee as the
/// MongoDB filter.
pub struct InMemoryLedgerStore {
    inner: Mutex<InMemoryLedgerInner>,
}

#[derive(Default)]
struct InMemoryLedgerInner {
    balances: HashMap<String, i64>,
    reservations: HashMap<String, Reservation>,
}

impl InMemoryLedgerStore {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(InMemoryLedgerInner::default()),
        }
    }
}

impl Default for InMemoryLedgerStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait::async_trait]
impl LedgerStore for InMemoryLedgerStore {
    async fn try_decrement(&self, principal: &str, amount: i64) -> Result<Option<i64>> {
        let mut inner = self.inner.lock().await;
        match inner.balances.get_mut(principal) {
            Some(balance) if *balance >= amount => {
                *balance -= amount;
                Ok(Some(*balance))
            }
            _ => Ok(None),
        }
    }

    async fn credit(&self, principal: &str, amount: i64) -> Result<i64> {
        let mut inner = self.inner.lock().await;
        let balance = inner.balances.entry(principal.to_string()).or_insert(0);
        *balance += amount;
        Ok(*balance)
    }

    async fn balance(&self, principal: &str) -> Result<i64> {
        let inner = self.inner.lock().await;
        Ok(inner.balances.get(principal).copied().unwrap_or(0).max(0))
    }

    async fn ensure_account(&self, principal: &str, initial: i64) -> Result<i64> {
        let mut inner = self.inner.lock().await;
        let balance = inner.balances.entry(principal.to_string()).or_insert(initial);
        Ok((*balance).max(0))
    }

    async fn create_reservation(&self, reservation: Reservation) -> Result<()> {
        let mut inner = self.inner.lock().await;
        inner
            .reservations
            .insert(reservation.reservation_id.clone(), reservation);
        Ok(())
    }

    async fn get_reservation(&self, reservation_id: &str) -> Result<Option<Reservation>> {
        let inner = self.inner.lock().await;
        Ok(inner.reservations.get(reservation_id).cloned())
    }

    async fn list_reservations(&self, principal: &str) -> Result<Vec<Reservation>> {
        let inner = self.inner.lock().await;
        Ok(inner
            .reservations
            .values()
            .filter(|r| r.principal == principal)
            .cloned()
            .collect())
    }

    async fn finalize_reservation(
        &self,
        reservation_id: &str,
        to: ReservationStatus,
        result_short_id: Option<String>,
        refund_reason: Option<String>,
    ) -> Result<Option<Reservation>> {
        let mut inner = self.inner.lock().await;
        match inner.reservations.get_mut(reservation_id) {
            Some(res) if res.status == ReservationStatus::Pending => {
                res.status = to;
                if result_short_id.is_some() {
                    res.result_short_id = result_short_id;
                }
                if refund_reason.is_some() {
                    res.refund_reason = refund_reason;
                }
                Ok(Some(res.clone()))
            }
            _ => Ok(None),
        }
    }
}
