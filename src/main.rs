//! AutoScape - credit-metered AI landscape design service
//!
//! "Your yard, reimagined"

use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use autoscape::{
    config::Args,
    db::MongoClient,
    generation::{GenerationService, HttpGenerationClient},
    server,
};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load environment variables from .env file if present
    let _ = dotenvy::dotenv();

    // Parse command line arguments
    let args = Args::parse();

    // Initialize tracing/logging
    let log_level = args.log_level.clone();
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| format!("autoscape={},info", log_level).into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    // Validate configuration
    if let Err(e) = args.validate() {
        error!("Configuration error: {}", e);
        std::process::exit(1);
    }

    // Print startup banner
    info!("======================================");
    info!("  AutoScape - AI landscape designs");
    info!("  \"Your yard, reimagined\"");
    info!("======================================");
    info!("Node ID: {}", args.node_id);
    info!("Listen: {}", args.listen);
    info!("Mode: {}", if args.dev_mode { "DEVELOPMENT" } else { "PRODUCTION" });
    info!("MongoDB: {}", args.mongodb_uri);
    info!("Generation service: {}", args.generation_url);
    info!("Generation ceiling: {}s", args.generation_timeout_secs);
    info!("Anonymous allowance: {}", args.anonymous_allowance);
    info!("======================================");

    // External generation client. The socket-level timeout gets headroom
    // over the orchestrator's own ceiling so the ceiling fires first.
    let generator: Arc<dyn GenerationService> = Arc::new(HttpGenerationClient::new(
        &args.generation_url,
        args.generation_api_key.clone(),
        Duration::from_secs(args.generation_timeout_secs + 5),
    ));

    // Connect to MongoDB (optional in dev mode)
    let state = match MongoClient::new(&args.mongodb_uri, &args.mongodb_db).await {
        Ok(mongo) => {
            info!("MongoDB connected successfully");
            server::AppState::with_mongo(args.clone(), &mongo, generator).await?
        }
        Err(e) => {
            if args.dev_mode {
                warn!("MongoDB connection failed (dev mode, using in-memory stores): {}", e);
                server::AppState::in_memory(args.clone(), generator)?
            } else {
                error!("MongoDB connection failed: {}", e);
                std::process::exit(1);
            }
        }
    };

    // Initialize usage logging if configured
    if let Some(ref path) = args.usage_log_path {
        if let Err(e) = state.usage.init_file(PathBuf::from(path)).await {
            warn!("Usage logging disabled ({}): {}", path, e);
        }
    }

    let state = Arc::new(state);

    // Run the server
    if let Err(e) = server::run(state).await {
        error!("Server error: {:?}", e);
        std::process::exit(1);
    }

    Ok(())
}
