//! HTTP server implementation
//!
//! hyper http1 with TokioIo for async handling. One shared AppState wires
//! the ledger, orchestrator, resolver, and stores together; request
//! dispatch is a method/path match.

use bytes::Bytes;
use http_body_util::{BodyExt, Full};
use hyper::body::Incoming;
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper::{Method, Request, Response, StatusCode};
use hyper_util::rt::TokioIo;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tracing::{debug, error, info, warn};

use crate::auth::JwtValidator;
use crate::billing::CreditGrants;
use crate::config::Args;
use crate::db::MongoClient;
use crate::designs::{DesignStore, InMemoryDesignStore, MongoDesignStore};
use crate::generation::GenerationService;
use crate::ledger::{AnonymousAllowance, CreditLedger, InMemoryLedgerStore, MongoLedgerStore};
use crate::logging::UsageLogger;
use crate::orchestrator::{self, GenerationOrchestrator, SessionHandoff};
use crate::resolver::ResultResolver;
use crate::routes::{self, billing::WEBHOOK_SECRET_HEADER};
use crate::types::AutoscapeError;

/// Boxed body type used by the dispatcher (JSON responses and SSE streams)
pub type BoxBody = http_body_util::combinators::UnsyncBoxBody<Bytes, hyper::Error>;

/// Shared application state
pub struct AppState {
    pub args: Args,
    pub jwt: JwtValidator,
    pub ledger: Arc<CreditLedger>,
    pub allowance: Arc<AnonymousAllowance>,
    pub designs: Arc<dyn DesignStore>,
    pub orchestrator: Arc<GenerationOrchestrator>,
    pub resolver: Arc<ResultResolver>,
    pub grants: Arc<CreditGrants>,
    pub handoff: Arc<SessionHandoff>,
    pub usage: UsageLogger,
    /// Whether designs and credits are durably stored (MongoDB) as opposed
    /// to the in-memory dev fallback
    pub durable_store: bool,
}

impl AppState {
    /// Create AppState backed by MongoDB
    pub async fn with_mongo(
        args: Args,
        mongo: &MongoClient,
        generator: Arc<dyn GenerationService>,
    ) -> Result<Self, AutoscapeError> {
        let ledger_store = Arc::new(MongoLedgerStore::new(mongo).await?);
        let design_store: Arc<dyn DesignStore> = Arc::new(MongoDesignStore::new(mongo).await?);
        Self::build(args, ledger_store, design_store, generator, true)
    }

    /// Create AppState on in-memory stores (dev mode only)
    pub fn in_memory(args: Args, generator: Arc<dyn GenerationService>) -> Result<Self, AutoscapeError> {
        let ledger_store = Arc::new(InMemoryLedgerStore::new());
        let design_store: Arc<dyn DesignStore> = Arc::new(InMemoryDesignStore::new());
        Self::build(args, ledger_store, design_store, generator, false)
    }

    fn build(
        args: Args,
        ledger_store: Arc<dyn crate::ledger::LedgerStore>,
        designs: Arc<dyn DesignStore>,
        generator: Arc<dyn GenerationService>,
        durable_store: bool,
    ) -> Result<Self, AutoscapeError> {
        let jwt = match &args.jwt_secret {
            Some(secret) => JwtValidator::new(secret.clone(), args.jwt_expiry_seconds)?,
            None if args.dev_mode => JwtValidator::new_dev(),
            None => {
                return Err(AutoscapeError::Config(
                    "JWT_SECRET is required in production mode".into(),
                ))
            }
        };

        let ledger = Arc::new(CreditLedger::new(ledger_store));
        let allowance = Arc::new(AnonymousAllowance::new(args.anonymous_allowance));
        let handoff = Arc::new(SessionHandoff::new(Duration::from_secs(args.handoff_ttl_secs)));
        let usage = UsageLogger::new(args.node_id.to_string());

        let orchestrator = Arc::new(GenerationOrchestrator::new(
            Arc::clone(&ledger),
            Arc::clone(&allowance),
            generator,
            Arc::clone(&designs),
            Arc::clone(&handoff),
            usage.clone(),
            Duration::from_secs(args.generation_timeout_secs),
        ));

        let resolver = Arc::new(ResultResolver::new(
            Arc::clone(&designs),
            Arc::clone(&handoff),
        ));

        let grants = Arc::new(CreditGrants::new(Arc::clone(&ledger), usage.clone()));

        Ok(Self {
            args,
            jwt,
            ledger,
            allowance,
            designs,
            orchestrator,
            resolver,
            grants,
            handoff,
            usage,
            durable_store,
        })
    }
}

/// Parsed design route components
#[derive(Debug, PartialEq, Eq)]
struct DesignRoute<'a> {
    /// Route id: a short id, the `generated` sentinel, or a long id for
    /// mutations
    id: &'a str,
    /// Optional trailing action ("visibility")
    action: Option<&'a str>,
}

impl<'a> DesignRoute<'a> {
    /// Parse "/api/v1/designs/{id}" or "/api/v1/designs/{id}/{action}"
    fn parse(path: &'a str) -> Option<Self> {
        let stripped = path.strip_prefix("/api/v1/designs/")?;
        let mut parts = stripped.splitn(2, '/');

        let id = parts.next().filter(|s| !s.is_empty())?;
        let action = parts.next().filter(|s| !s.is_empty());

        Some(Self { id, action })
    }
}

fn to_boxed(res: Response<Full<Bytes>>) -> Response<BoxBody> {
    res.map(|b| b.map_err(|never| match never {}).boxed_unsync())
}

/// Start the HTTP server
pub async fn run(state: Arc<AppState>) -> Result<(), AutoscapeError> {
    let listener = TcpListener::bind(state.args.listen).await?;

    info!(
        "AutoScape listening on {} as node {}",
        state.args.listen, state.args.node_id
    );

    if state.args.dev_mode {
        warn!("Development mode enabled - relaxed auth, in-memory fallbacks");
    }

    // Evict expired session hand-offs once a minute
    orchestrator::spawn_cleanup_task(Arc::clone(&state.handoff), Duration::from_secs(60));

    loop {
        match listener.accept().await {
            Ok((stream, addr)) => {
                let state = Arc::clone(&state);
                tokio::spawn(async move {
                    let io = TokioIo::new(stream);

                    let service = service_fn(move |req| {
                        let state = Arc::clone(&state);
                        async move { handle_request(state, addr, req).await }
                    });

                    if let Err(err) = http1::Builder::new().serve_connection(io, service).await {
                        error!("Error serving connection from {}: {:?}", addr, err);
                    }
                });
            }
            Err(e) => {
                error!("Error accepting connection: {:?}", e);
            }
        }
    }
}

/// Route incoming HTTP requests
async fn handle_request(
    state: Arc<AppState>,
    addr: SocketAddr,
    req: Request<Incoming>,
) -> Result<Response<BoxBody>, hyper::Error> {
    let method = req.method().clone();
    let path = req.uri().path().to_string();
    let query = req.uri().query().unwrap_or("").to_string();

    let auth_header = req
        .headers()
        .get("authorization")
        .and_then(|h| h.to_str().ok())
        .map(|s| s.to_string());
    let webhook_secret = req
        .headers()
        .get(WEBHOOK_SECRET_HEADER)
        .and_then(|h| h.to_str().ok())
        .map(|s| s.to_string());

    debug!("[{}] {} {}", addr, method, path);

    let principal = state.jwt.principal_from_header(auth_header.as_deref());
    let params = routes::parse_query_params(&query);

    // Collect the body up front for mutating methods
    let body = if matches!(method, Method::POST | Method::PUT | Method::DELETE) {
        req.into_body().collect().await?.to_bytes()
    } else {
        Bytes::new()
    };

    let response = match (method, path.as_str()) {
        (Method::GET, "/health") | (Method::GET, "/healthz") => {
            to_boxed(routes::health::health_check(state))
        }

        (Method::GET, "/ready") | (Method::GET, "/readyz") => {
            to_boxed(routes::health::readiness_check(state))
        }

        (Method::GET, "/version") => to_boxed(routes::health::version_info()),

        (Method::OPTIONS, _) => to_boxed(routes::preflight_response()),

        // Generation flow
        (Method::POST, "/api/v1/designs") => {
            to_boxed(routes::designs::handle_generate(state, principal, &body).await)
        }

        // Owner listing
        (Method::GET, "/api/v1/designs") => {
            to_boxed(routes::designs::handle_list_mine(state, principal).await)
        }

        // Public gallery
        (Method::GET, "/api/v1/gallery") => {
            let limit = params.get("limit").and_then(|l| l.parse::<i64>().ok());
            to_boxed(routes::designs::handle_gallery(state, limit).await)
        }

        // Balance and its event stream
        (Method::GET, "/api/v1/credits/events") => {
            routes::credits::handle_events(state, principal)
        }

        (Method::GET, "/api/v1/credits") => {
            let device = params.get("device").map(String::as_str);
            to_boxed(routes::credits::handle_balance(state, principal, device).await)
        }

        // Payment processor callback
        (Method::POST, "/api/v1/billing/webhook") => to_boxed(
            routes::billing::handle_webhook(state, webhook_secret.as_deref(), &body).await,
        ),

        // Design resolution and mutations
        (Method::GET, p) if p.starts_with("/api/v1/designs/") => match DesignRoute::parse(p) {
            Some(DesignRoute { id, action: None }) => {
                let handoff = params.get("handoff").map(String::as_str);
                to_boxed(routes::designs::handle_resolve(state, id, handoff).await)
            }
            _ => to_boxed(routes::error_response(
                StatusCode::NOT_FOUND,
                "Unknown design route",
                "NOT_FOUND",
            )),
        },

        (Method::POST, p) if p.starts_with("/api/v1/designs/") => match DesignRoute::parse(p) {
            Some(DesignRoute {
                id,
                action: Some("visibility"),
            }) => to_boxed(
                routes::designs::handle_set_visibility(state, principal, id, &body).await,
            ),
            _ => to_boxed(routes::error_response(
                StatusCode::NOT_FOUND,
                "Unknown design route",
                "NOT_FOUND",
            )),
        },

        (Method::DELETE, p) if p.starts_with("/api/v1/designs/") => match DesignRoute::parse(p) {
            Some(DesignRoute { id, action: None }) => {
                to_boxed(routes::designs::handle_delete(state, principal, id).await)
            }
            _ => to_boxed(routes::error_response(
                StatusCode::NOT_FOUND,
                "Unknown design route",
                "NOT_FOUND",
            )),
        },

        _ => to_boxed(routes::error_response(
            StatusCode::NOT_FOUND,
            "Not found",
            "NOT_FOUND",
        )),
    };

    Ok(response)
}
