//! Session result hand-off
//!
//! When a flow finishes, the generated result is stashed in memory under a
//! one-time ticket so the very next navigation can display it without a
//! store round-trip. This is also the fallback identity when persistence
//! fails: the result stays viewable for the current session, and only for
//! the current session.

use dashmap::DashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::debug;
use uuid::Uuid;

use crate::generation::types::DesignResult;

/// Route sentinel for a same-session result with no shareable id
pub const GENERATED_ROUTE: &str = "generated";

struct HandoffEntry {
    result: DesignResult,
    stashed_at: Instant,
}

/// In-memory store of recently generated results keyed by ticket
pub struct SessionHandoff {
    entries: DashMap<String, HandoffEntry>,
    ttl: Duration,
}

impl SessionHandoff {
    pub fn new(ttl: Duration) -> Self {
        Self {
            entries: DashMap::new(),
            ttl,
        }
    }

    /// Stash a result and return its ticket
    pub fn stash(&self, result: DesignResult) -> String {
        let ticket = Uuid::new_v4().to_string();
        self.entries.insert(
            ticket.clone(),
            HandoffEntry {
                result,
                stashed_at: Instant::now(),
            },
        );
        debug!(ticket = %ticket, "Result stashed for session hand-off");
        ticket
    }

    /// Fetch a stashed result. Stays available until expiry so the page can
    /// be refreshed within the session.
    pub fn get(&self, ticket: &str) -> Option<DesignResult> {
        let entry = self.entries.get(ticket)?;
        if entry.stashed_at.elapsed() > self.ttl {
            drop(entry);
            self.entries.remove(ticket);
            return None;
        }
        Some(entry.result.clone())
    }

    /// Drop expired entries
    pub fn evict_expired(&self) {
        let ttl = self.ttl;
        self.entries.retain(|_, entry| entry.stashed_at.elapsed() <= ttl);
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Spawn a periodic eviction task for expired hand-offs
pub fn spawn_cleanup_task(handoff: Arc<SessionHandoff>, interval: Duration) {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        loop {
            ticker.tick().await;
            let before = handoff.len();
            handoff.evict_expired();
            let evicted = before.saturating_sub(handoff.len());
            if evicted > 0 {
                debug!(evicted, "Expired session hand-offs evicted");
            }
        }
    });
}
