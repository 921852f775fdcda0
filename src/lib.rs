//! AutoScape - credit-metered AI landscape design service
//!
//! "Your yard, reimagined"
//!
//! AutoScape takes a photo of a yard and a design style and produces an
//! AI-generated redesign: rendered images, a 2D plan, and a cost estimate,
//! persisted under a stable shareable identity. Each generation costs one
//! credit, reserved before work begins and refunded when the work does not
//! complete.
//!
//! ## Components
//!
//! - **Ledger**: per-principal credit balances with reserve/complete/refund
//! - **Orchestrator**: the generation flow as an explicit state machine
//! - **Resolver**: short ids and same-session hand-offs to displayable results
//! - **Designs**: durable SavedDesign records and the public gallery
//! - **Billing**: idempotent credit grants from the payment processor

pub mod auth;
pub mod billing;
pub mod config;
pub mod db;
pub mod designs;
pub mod generation;
pub mod ledger;
pub mod logging;
pub mod orchestrator;
pub mod pricing;
pub mod resolver;
pub mod routes;
pub mod server;
pub mod types;

pub use config::Args;
pub use server::{run, AppState};
pub use types::{AutoscapeError, Result};
