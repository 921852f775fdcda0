//! Usage logging for billing analytics
//!
//! Logs generation and credit lifecycle events in JSONL format for
//! consumption by the billing/analytics pipeline.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fs::{File, OpenOptions};
use std::io::{BufWriter, Write};
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{error, info};

/// Usage event types
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum EventType {
    /// A generation flow started (credit reserved)
    GenerationStarted,
    /// A generation flow finished with a persisted or session-only result
    GenerationCompleted,
    /// A generation flow failed and was refunded
    GenerationFailed,
    /// Credits added from a purchase or promotion
    CreditGranted,
    /// A design was made public or private
    VisibilityChanged,
    /// A design was deleted by its owner
    DesignDeleted,
}

/// Usage event for billing/analytics
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UsageEvent {
    /// Event timestamp
    pub timestamp: DateTime<Utc>,
    /// Event type
    pub event_type: EventType,
    /// Node that handled the request
    pub node_id: String,
    /// Principal id (authenticated user or the anonymous sentinel)
    pub principal: Option<String>,
    /// Reservation tied to the event, if any
    pub reservation_id: Option<String>,
    /// Short id of the design involved, if any
    pub short_id: Option<String>,
    /// Duration in milliseconds (for completed/failed generations)
    pub duration_ms: Option<u64>,
    /// Additional metadata
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<serde_json::Value>,
}

impl UsageEvent {
    /// Create a new usage event
    pub fn new(event_type: EventType, node_id: String) -> Self {
        Self {
            timestamp: Utc::now(),
            event_type,
            node_id,
            principal: None,
            reservation_id: None,
            short_id: None,
            duration_ms: None,
            metadata: None,
        }
    }

    /// Set the principal
    pub fn with_principal(mut self, principal: String) -> Self {
        self.principal = Some(principal);
        self
    }

    /// Set the reservation id
    pub fn with_reservation(mut self, reservation_id: String) -> Self {
        self.reservation_id = Some(reservation_id);
        self
    }

    /// Set the design short id
    pub fn with_short_id(mut self, short_id: String) -> Self {
        self.short_id = Some(short_id);
        self
    }

    /// Set the duration
    pub fn with_duration(mut self, duration_ms: u64) -> Self {
        self.duration_ms = Some(duration_ms);
        self
    }

    /// Convert to JSONL line
    pub fn to_jsonl(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }
}

/// Usage logger that writes events to a JSONL file
#[derive(Clone)]
pub struct UsageLogger {
    inner: Arc<Mutex<UsageLoggerInner>>,
    node_id: String,
}

struct UsageLoggerInner {
    writer: Option<BufWriter<File>>,
    path: Option<PathBuf>,
}

impl UsageLogger {
    /// Create a new usage logger. Without `init_file` it is a no-op sink.
    pub fn new(node_id: String) -> Self {
        Self {
            inner: Arc::new(Mutex::new(UsageLoggerInner {
                writer: None,
                path: None,
            })),
            node_id,
        }
    }

    /// Initialize file logging to the specified path
    pub async fn init_file(&self, path: PathBuf) -> std::io::Result<()> {
        let file = OpenOptions::new().create(true).append(true).open(&path)?;

        let writer = BufWriter::new(file);

        let mut inner = self.inner.lock().await;
        inner.writer = Some(writer);
        inner.path = Some(path.clone());

        info!("Usage logging initialized to {}", path.display());
        Ok(())
    }

    /// Log a usage event
    pub async fn log(&self, event: UsageEvent) {
        let jsonl = match event.to_jsonl() {
            Ok(line) => line,
            Err(e) => {
                error!("Failed to serialize usage event: {}", e);
                return;
            }
        };

        let mut inner = self.inner.lock().await;

        if let Some(ref mut writer) = inner.writer {
            if let Err(e) = writeln!(writer, "{}", jsonl) {
                error!("Failed to write usage event: {}", e);
            }
            // Flush per event for durability
            if let Err(e) = writer.flush() {
                error!("Failed to flush usage log: {}", e);
            }
        }
    }

    /// Log the start of a generation flow
    pub async fn log_generation_started(&self, principal: &str, reservation_id: &str) {
        let event = UsageEvent::new(EventType::GenerationStarted, self.node_id.clone())
            .with_principal(principal.to_string())
            .with_reservation(reservation_id.to_string());
        self.log(event).await;
    }

    /// Log a completed generation (with or without a shareable id)
    pub async fn log_generation_completed(
        &self,
        principal: &str,
        short_id: Option<&str>,
        duration_ms: u64,
    ) {
        let mut event = UsageEvent::new(EventType::GenerationCompleted, self.node_id.clone())
            .with_principal(principal.to_string())
            .with_duration(duration_ms);
        if let Some(sid) = short_id {
            event = event.with_short_id(sid.to_string());
        }
        self.log(event).await;
    }

    /// Log a failed (refunded) generation
    pub async fn log_generation_failed(&self, principal: &str, reason: &str, duration_ms: u64) {
        let mut event = UsageEvent::new(EventType::GenerationFailed, self.node_id.clone())
            .with_principal(principal.to_string())
            .with_duration(duration_ms);
        event.metadata = Some(serde_json::json!({ "reason": reason }));
        self.log(event).await;
    }

    /// Log a credit grant
    pub async fn log_credit_granted(&self, principal: &str, amount: i64) {
        let mut event = UsageEvent::new(EventType::CreditGranted, self.node_id.clone())
            .with_principal(principal.to_string());
        event.metadata = Some(serde_json::json!({ "amount": amount }));
        self.log(event).await;
    }

    /// Log a visibility change
    pub async fn log_visibility_changed(&self, principal: &str, short_id: &str, is_public: bool) {
        let mut event = UsageEvent::new(EventType::VisibilityChanged, self.node_id.clone())
            .with_principal(principal.to_string())
            .with_short_id(short_id.to_string());
        event.metadata = Some(serde_json::json!({ "is_public": is_public }));
        self.log(event).await;
    }

    /// Log a design deletion
    pub async fn log_design_deleted(&self, principal: &str, short_id: &str) {
        let event = UsageEvent::new(EventType::DesignDeleted, self.node_id.clone())
            .with_principal(principal.to_string())
            .with_short_id(short_id.to_string());
        self.log(event).await;
    }

    /// Get the node ID
    pub fn node_id(&self) -> &str {
        &self.node_id
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_event_serialization() {
        let event = UsageEvent::new(EventType::GenerationCompleted, "node-1".to_string())
            .with_principal("user-123".to_string())
            .with_short_id("abc123xyz9".to_string())
            .with_duration(42_000);

        let jsonl = event.to_jsonl().unwrap();
        assert!(jsonl.contains("generation_completed"));
        assert!(jsonl.contains("user-123"));
        assert!(jsonl.contains("abc123xyz9"));
        assert!(jsonl.contains("42000"));
    }

    #[test]
    fn test_failed_event_carries_reason() {
        let mut event = UsageEvent::new(EventType::GenerationFailed, "node-1".to_string())
            .with_principal("user-123".to_string());
        event.metadata = Some(serde_json::json!({ "reason": "timeout" }));

        let jsonl = event.to_jsonl().unwrap();
        assert!(jsonl.contains("generation_failed"));
        assert!(jsonl.contains("timeout"));
    }

    #[tokio::test]
    async fn test_logging_without_file_is_noop() {
        let logger = UsageLogger::new("node-1".to_string());
        // No init_file: must not panic or error
        logger.log_generation_started("user-1", "res-1").await;
    }
}
