//! Configuration for AutoScape
//!
//! CLI arguments and environment variable handling using clap.

use clap::Parser;
use std::net::SocketAddr;
use uuid::Uuid;

use crate::types::AutoscapeError;

/// AutoScape - credit-metered AI landscape design service
#[derive(Parser, Debug, Clone)]
#[command(name = "autoscape")]
#[command(about = "HTTP API for AI-generated landscape redesigns")]
pub struct Args {
    /// Unique node identifier for this instance
    #[arg(long, env = "NODE_ID", default_value_t = Uuid::new_v4())]
    pub node_id: Uuid,

    /// Address to listen on
    #[arg(long, env = "LISTEN", default_value = "0.0.0.0:8080")]
    pub listen: SocketAddr,

    /// Enable development mode (in-memory stores when MongoDB is unreachable,
    /// permissive JWT secret)
    #[arg(long, env = "DEV_MODE", default_value = "false")]
    pub dev_mode: bool,

    /// MongoDB connection URI
    #[arg(long, env = "MONGODB_URI", default_value = "mongodb://localhost:27017")]
    pub mongodb_uri: String,

    /// MongoDB database name
    #[arg(long, env = "MONGODB_DB", default_value = "autoscape")]
    pub mongodb_db: String,

    /// JWT secret for token validation (required in production)
    #[arg(long, env = "JWT_SECRET")]
    pub jwt_secret: Option<String>,

    /// JWT token expiry in seconds
    #[arg(long, env = "JWT_EXPIRY_SECONDS", default_value = "3600")]
    pub jwt_expiry_seconds: u64,

    /// Base URL of the external design generation service
    #[arg(long, env = "GENERATION_URL", default_value = "http://localhost:8002")]
    pub generation_url: String,

    /// API key for the generation service
    #[arg(long, env = "GENERATION_API_KEY")]
    pub generation_api_key: Option<String>,

    /// Ceiling on a single generation call, in seconds. On expiry the call
    /// is treated as a failure and the reservation is refunded.
    #[arg(long, env = "GENERATION_TIMEOUT_SECS", default_value = "60")]
    pub generation_timeout_secs: u64,

    /// Free generations for anonymous (unauthenticated) visitors, tracked
    /// per device token. Best-effort only.
    #[arg(long, env = "ANONYMOUS_ALLOWANCE", default_value = "2")]
    pub anonymous_allowance: u32,

    /// Credits granted when an authenticated account is first seen
    #[arg(long, env = "SIGNUP_CREDITS", default_value = "2")]
    pub signup_credits: i64,

    /// Shared secret the payment processor presents on webhook calls
    #[arg(long, env = "BILLING_WEBHOOK_SECRET")]
    pub billing_webhook_secret: Option<String>,

    /// How long a session-only result hand-off stays resolvable, in seconds
    #[arg(long, env = "HANDOFF_TTL_SECS", default_value = "1800")]
    pub handoff_ttl_secs: u64,

    /// Principal ids with administrative rights (moderation deletes)
    #[arg(long, env = "ADMIN_PRINCIPALS", value_delimiter = ',')]
    pub admin_principals: Vec<String>,

    /// Path to the JSONL usage log (disabled when unset)
    #[arg(long, env = "USAGE_LOG_PATH")]
    pub usage_log_path: Option<String>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, env = "LOG_LEVEL", default_value = "info")]
    pub log_level: String,
}

impl Args {
    /// Validate configuration before startup
    pub fn validate(&self) -> Result<(), AutoscapeError> {
        if !self.dev_mode {
            match &self.jwt_secret {
                None => {
                    return Err(AutoscapeError::Config(
                        "JWT_SECRET is required in production mode".into(),
                    ));
                }
                Some(secret) if secret.len() < 32 => {
                    return Err(AutoscapeError::Config(
                        "JWT_SECRET must be at least 32 characters".into(),
                    ));
                }
                _ => {}
            }

            if self.billing_webhook_secret.is_none() {
                return Err(AutoscapeError::Config(
                    "BILLING_WEBHOOK_SECRET is required in production mode".into(),
                ));
            }
        }

        if self.generation_timeout_secs == 0 {
            return Err(AutoscapeError::Config(
                "GENERATION_TIMEOUT_SECS must be greater than zero".into(),
            ));
        }

        if self.generation_url.is_empty() {
            return Err(AutoscapeError::Config("GENERATION_URL must not be empty".into()));
        }

        Ok(())
    }
}
