//! Credit grants from the payment processor
//!
//! The checkout flow itself lives with the payment provider; this module
//! only consumes its webhook callbacks. Webhook deliveries retry, so grants
//! are idempotent per event id. A grant failure never fails the webhook -
//! it is logged for manual processing instead, because a rejected delivery
//! would just retry into the same failure.

use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{error, info};

use crate::ledger::CreditLedger;
use crate::logging::UsageLogger;
use crate::types::{AutoscapeError, Result};

/// Cap on the processed-event set so a long-running server stays bounded
const PROCESSED_EVENTS_CAP: usize = 10_000;

/// Payload the payment processor posts on a completed purchase or renewal
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreditGrantEvent {
    /// Unique delivery id from the processor
    pub event_id: String,
    /// Principal to credit
    pub user_id: String,
    /// Credits purchased
    pub credits: i64,
    /// "purchase" | "renewal" | "promotion", informational
    #[serde(default)]
    pub kind: String,
}

/// Outcome of one webhook delivery
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum GrantOutcome {
    /// Credits were added
    Granted,
    /// This event id was seen before; nothing changed
    AlreadyProcessed,
    /// The grant failed; logged for manual processing
    Deferred,
}

/// Applies credit grants exactly once per event id
pub struct CreditGrants {
    ledger: Arc<CreditLedger>,
    usage: UsageLogger,
    processed: Mutex<HashSet<String>>,
}

impl CreditGrants {
    pub fn new(ledger: Arc<CreditLedger>, usage: UsageLogger) -> Self {
        Self {
            ledger,
            usage,
            processed: Mutex::new(HashSet::new()),
        }
    }

    /// Handle one webhook delivery
    pub async fn apply(&self, event: CreditGrantEvent) -> Result<GrantOutcome> {
        if event.event_id.is_empty() {
            return Err(AutoscapeError::BadRequest("Missing event id".into()));
        }
        if event.user_id.is_empty() || event.credits <= 0 {
            return Err(AutoscapeError::BadRequest(
                "Grant needs a user id and a positive credit amount".into(),
            ));
        }

        {
            let processed = self.processed.lock().await;
            if processed.contains(&event.event_id) {
                info!(event_id = %event.event_id, "Skipping already-processed event");
                return Ok(GrantOutcome::AlreadyProcessed);
            }
        }

        match self.ledger.grant(&event.user_id, event.credits).await {
            Ok(balance) => {
                info!(
                    event_id = %event.event_id,
                    user = %event.user_id,
                    credits = event.credits,
                    balance,
                    "Credits granted from payment event"
                );
                self.usage
                    .log_credit_granted(&event.user_id, event.credits)
                    .await;
                self.mark_processed(event.event_id).await;
                Ok(GrantOutcome::Granted)
            }
            Err(e) => {
                // Do not mark processed: a later retry may succeed
                error!(
                    event_id = %event.event_id,
                    user = %event.user_id,
                    error = %e,
                    "Credit grant failed; needs manual processing"
                );
                Ok(GrantOutcome::Deferred)
            }
        }
    }

    async fn mark_processed(&self, event_id: String) {
        let mut processed = self.processed.lock().await;
        if processed.len() >= PROCESSED_EVENTS_CAP {
            processed.clear();
        }
        processed.insert(event_id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ledger::InMemoryLedgerStore;

    fn grants() -> (CreditGrants, Arc<CreditLedger>) {
        let ledger = Arc::new(CreditLedger::new(Arc::new(InMemoryLedgerStore::new())));
        let grants = CreditGrants::new(Arc::clone(&ledger), UsageLogger::new("test-node".into()));
        (grants, ledger)
    }

    fn event(event_id: &str, credits: i64) -> CreditGrantEvent {
        CreditGrantEvent {
            event_id: event_id.to_string(),
            user_id: "user-1".to_string(),
            credits,
            kind: "purchase".to_string(),
        }
    }

    #[tokio::test]
    async fn test_grant_adds_credits() {
        let (grants, ledger) = grants();

        let outcome = grants.apply(event("evt-1", 10)).await.unwrap();
        assert_eq!(outcome, GrantOutcome::Granted);
        assert_eq!(ledger.balance("user-1").await.unwrap(), 10);
    }

    #[tokio::test]
    async fn test_replayed_event_credits_once() {
        let (grants, ledger) = grants();

        grants.apply(event("evt-1", 10)).await.unwrap();
        let outcome = grants.apply(event("evt-1", 10)).await.unwrap();

        assert_eq!(outcome, GrantOutcome::AlreadyProcessed);
        assert_eq!(ledger.balance("user-1").await.unwrap(), 10);
    }

    #[tokio::test]
    async fn test_distinct_events_stack() {
        let (grants, ledger) = grants();

        grants.apply(event("evt-1", 10)).await.unwrap();
        grants.apply(event("evt-2", 5)).await.unwrap();

        assert_eq!(ledger.balance("user-1").await.unwrap(), 15);
    }

    #[tokio::test]
    async fn test_invalid_events_rejected() {
        let (grants, _ledger) = grants();

        assert!(grants.apply(event("", 10)).await.is_err());
        assert!(grants.apply(event("evt-1", 0)).await.is_err());
        assert!(grants.apply(event("evt-2", -5)).await.is_err());

        let mut no_user = event("evt-3", 5);
        no_user.user_id = String::new();
        assert!(grants.apply(no_user).await.is_err());
    }
}
