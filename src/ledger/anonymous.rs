//! Anonymous usage allowance
//!
//! Unauthenticated visitors get a small fixed number of free generations,
//! tracked per device token in process memory. This is a soft client-side
//! gate only: it is deliberately weaker than the authenticated ledger (no
//! durability, no cross-device consistency) and deliberately a separate
//! implementation so the two guarantees never get conflated.

use dashmap::DashMap;
use tracing::debug;

use crate::types::{AutoscapeError, Result};

/// Default free generations per device
pub const DEFAULT_ALLOWANCE: u32 = 2;

/// A best-effort hold on one unit of the anonymous allowance
#[derive(Debug, Clone)]
pub struct AnonymousTicket {
    pub device_token: String,
}

/// Per-device usage counters for anonymous generations
pub struct AnonymousAllowance {
    allowance: u32,
    used: DashMap<String, u32>,
}

impl AnonymousAllowance {
    pub fn new(allowance: u32) -> Self {
        Self {
            allowance,
            used: DashMap::new(),
        }
    }

    /// Remaining free generations for a device
    pub fn remaining(&self, device_token: &str) -> u32 {
        let used = self.used.get(device_token).map(|u| *u).unwrap_or(0);
        self.allowance.saturating_sub(used)
    }

    /// Take one unit of the allowance. Blocks the flow before any
    /// generation call is made once the allowance is exhausted.
    pub fn try_reserve(&self, device_token: &str) -> Result<AnonymousTicket> {
        let mut used = self.used.entry(device_token.to_string()).or_insert(0);
        if *used >= self.allowance {
            return Err(AutoscapeError::InsufficientCredits);
        }
        *used += 1;
        debug!(device = %device_token, used = *used, "Anonymous generation reserved");
        Ok(AnonymousTicket {
            device_token: device_token.to_string(),
        })
    }

    /// Return one unit after a failed generation
    pub fn refund(&self, ticket: &AnonymousTicket) {
        if let Some(mut used) = self.used.get_mut(&ticket.device_token) {
            *used = used.saturating_sub(1);
            debug!(device = %ticket.device_token, used = *used, "Anonymous generation refunded");
        }
    }
}
