//! # relayctl: request-mediation gateway for AI providers
//!
//! `relayctl` sits between a browser client and third-party AI providers. It applies a per-user,
//! per-feature daily allowance to every forwarded request, relays provider responses (streamed
//! chat tokens, knowledge answers, voice call handles) and records what happened.
//!
//! ## Request Flow
//!
//! Every forwarding endpoint follows the same order:
//!
//! 1. **Validate** the request: caller identity, required fields, upload type, phone number.
//!    Invalid requests are rejected with 400 and never count against the allowance.
//! 2. **Admit** through the [`limits::RateLimiter`]. A denial becomes a 429 carrying
//!    `X-RateLimit-Limit`, `X-RateLimit-Remaining` and `X-RateLimit-Reset`, and the first denial
//!    per user, feature and day is recorded.
//! 3. **Forward** through the [`forwarder::ProxyForwarder`]. Provider failures become a single
//!    502 (or a terminal `error` event on a stream) with a user-safe message.
//! 4. **Record**: completed chat turns are saved to the conversation, knowledge queries and voice
//!    calls to the call history. These writes are best effort.
//!
//! ## Core Components
//!
//! - [`api`]: axum handlers and wire models
//! - [`limits`]: fixed-window counters, fail-closed admission, rejection events
//! - [`forwarder`]: provider calls for chat, knowledge queries, flow nodes and voice calls
//! - [`providers`]: HTTP clients for the chat, workflow and voice providers, plus dummies
//! - [`session`]: conversation state machine, flow graphs and chaining, call lifecycle
//! - [`db`]: repositories over PostgreSQL or an in-memory store
//!
//! ## Quick Start
//!
//! ```no_run
//! use clap::Parser;
//! use relayctl::{Application, Config};
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     relayctl::install_crypto_provider();
//!     let args = relayctl::config::Args::parse();
//!     let config = Config::load(&args)?;
//!     relayctl::telemetry::init_telemetry(config.enable_otel_export)?;
//!
//!     let app = Application::new(config).await?;
//!     app.serve(async {
//!         tokio::signal::ctrl_c().await.expect("Failed to listen for Ctrl+C");
//!     })
//!     .await
//! }
//! ```
//!
//! ## Configuration
//!
//! See the [`config`] module for configuration options.

pub mod api;
pub mod config;
pub mod db;
pub mod errors;
pub mod forwarder;
pub mod limits;
mod openapi;
pub mod providers;
pub mod session;
pub mod telemetry;
pub mod types;

#[cfg(any(test, feature = "test-utils"))]
pub mod test_utils;

use std::sync::Arc;
use std::time::Duration;

use axum::{
    Json, Router,
    extract::DefaultBodyLimit,
    http::{self, HeaderName, HeaderValue, Method},
    routing::{get, post, put},
};
use axum_prometheus::PrometheusMetricLayer;
use bon::Builder;
use tokio::net::TcpListener;
use tokio_util::sync::{CancellationToken, DropGuard};
use tower_http::{
    cors::{AllowOrigin, CorsLayer},
    trace::{DefaultMakeSpan, DefaultOnRequest, DefaultOnResponse, TraceLayer},
};
use tracing::{Level, debug, info, instrument, warn};
use utoipa::OpenApi;

use crate::api::handlers::{calls, chat, conversations, flows, health, knowledge, prompts, rate_limits};
use crate::config::CorsOrigin;
use crate::db::Database;
use crate::errors::{RATE_LIMIT_LIMIT_HEADER, RATE_LIMIT_REMAINING_HEADER, RATE_LIMIT_RESET_HEADER};
use crate::forwarder::ProxyForwarder;
use crate::limits::RateLimiter;
use crate::providers::{ChatProvider, VoiceProvider, WorkflowProvider};
use crate::session::controller::InFlightRegistry;
pub use config::Config;
pub use types::{ConversationId, FlowId, UserId};

/// How often expired rate-limit events are purged
const EVENT_PURGE_INTERVAL: Duration = Duration::from_secs(60 * 60);

/// How long an ended call stays queryable before it is dropped from the registry
const ENDED_CALL_RETENTION: Duration = Duration::from_secs(60 * 60);

/// How often ended calls are swept from the registry
const CALL_PURGE_INTERVAL: Duration = Duration::from_secs(5 * 60);

/// Application state shared across all request handlers.
///
/// ```ignore
/// let state = AppState::builder()
///     .config(config)
///     .db(db)
///     .rate_limiter(rate_limiter)
///     .forwarder(forwarder)
///     .build();
/// ```
#[derive(Clone, Builder)]
pub struct AppState {
    pub config: Config,
    pub db: Database,
    pub rate_limiter: Arc<RateLimiter>,
    pub forwarder: Arc<ProxyForwarder>,
    /// Conversations with a chat reply streaming
    #[builder(default)]
    pub in_flight: InFlightRegistry,
}

impl AppState {
    /// Wire the limiter and forwarder to `db` and the given providers.
    pub fn new(
        config: Config,
        db: Database,
        chat: Arc<dyn ChatProvider>,
        workflow: Arc<dyn WorkflowProvider>,
        voice: Arc<dyn VoiceProvider>,
    ) -> Self {
        let rate_limiter = RateLimiter::new(Arc::new(db.clone()), config.rate_limits.clone());
        let forwarder = ProxyForwarder::new(&config, db.clone(), chat, workflow, voice);
        AppState::builder()
            .rate_limiter(Arc::new(rate_limiter))
            .forwarder(Arc::new(forwarder))
            .db(db)
            .config(config)
            .build()
    }
}

/// Get the relayctl database migrator
pub fn migrator() -> sqlx::migrate::Migrator {
    sqlx::migrate!("./migrations")
}

/// Install the process-wide rustls crypto provider. Safe to call more than once.
pub fn install_crypto_provider() {
    let _ = rustls::crypto::aws_lc_rs::default_provider().install_default();
}

fn create_cors_layer(config: &Config) -> anyhow::Result<CorsLayer> {
    let cors_config = &config.cors;
    let allow_origin = if cors_config
        .allowed_origins
        .iter()
        .any(|origin| matches!(origin, CorsOrigin::Wildcard))
    {
        AllowOrigin::any()
    } else {
        let mut origins = Vec::new();
        for origin in &cors_config.allowed_origins {
            if let CorsOrigin::Url(url) = origin {
                // Origins never carry a trailing slash
                origins.push(url.as_str().trim_end_matches('/').parse::<HeaderValue>()?);
            }
        }
        AllowOrigin::list(origins)
    };

    let mut cors = CorsLayer::new()
        .allow_origin(allow_origin)
        .allow_credentials(cors_config.allow_credentials)
        .allow_methods([Method::GET, Method::POST, Method::PUT, Method::DELETE])
        .allow_headers([http::header::CONTENT_TYPE, http::header::ACCEPT])
        .expose_headers([
            HeaderName::from_static(RATE_LIMIT_LIMIT_HEADER),
            HeaderName::from_static(RATE_LIMIT_REMAINING_HEADER),
            HeaderName::from_static(RATE_LIMIT_RESET_HEADER),
        ]);

    if let Some(max_age) = cors_config.max_age {
        cors = cors.max_age(Duration::from_secs(max_age));
    }

    Ok(cors)
}

/// Build the application router with all endpoints and middleware.
///
/// Uploads are bounded by `limits.max_upload_size`. The Prometheus endpoint is only mounted when
/// `enable_metrics` is set.
#[instrument(skip_all)]
pub fn build_router(state: &AppState) -> anyhow::Result<Router> {
    let mut router = Router::new()
        .route("/chat", post(chat::chat))
        .route("/knowledge-query", post(knowledge::knowledge_query))
        .route("/flows", get(flows::list_flows).post(flows::create_flow))
        .route(
            "/flows/{id}",
            get(flows::get_flow).put(flows::update_flow).delete(flows::delete_flow),
        )
        .route("/flows/{id}/run", post(flows::run_flow))
        .route("/calls", post(calls::start_call))
        .route("/calls/{id}", get(calls::get_call))
        .route("/calls/{id}/events", post(calls::call_event))
        .route("/call-history", get(calls::list_call_history))
        .route(
            "/conversations",
            get(conversations::list_conversations).post(conversations::save_conversation),
        )
        .route(
            "/conversations/{id}",
            get(conversations::get_conversation)
                .put(conversations::update_conversation)
                .delete(conversations::delete_conversation),
        )
        .route("/prompts", get(prompts::list_prompts).post(prompts::create_prompt))
        .route("/prompts/{id}", put(prompts::update_prompt).delete(prompts::delete_prompt))
        .route("/rate-limits/events", get(rate_limits::list_rate_limit_events))
        .route("/healthz", get(health::healthz))
        .route("/openapi.json", get(|| async { Json(openapi::ApiDoc::openapi()) }))
        .layer(DefaultBodyLimit::max(state.config.limits.max_upload_size))
        .with_state(state.clone())
        .layer(create_cors_layer(&state.config)?);

    if state.config.enable_metrics {
        let (prometheus_layer, metric_handle) = PrometheusMetricLayer::pair();
        router = router
            .route("/internal/metrics", get(|| async move { metric_handle.render() }))
            .layer(prometheus_layer);
    }

    let router = router.layer(
        TraceLayer::new_for_http()
            .make_span_with(DefaultMakeSpan::new().level(Level::INFO))
            .on_request(DefaultOnRequest::new().level(Level::INFO))
            .on_response(DefaultOnResponse::new().level(Level::INFO)),
    );

    Ok(router)
}

/// Tasks running alongside the HTTP server.
///
/// Dropping this cancels the tasks through `drop_guard`; [`BackgroundServices::shutdown`] also
/// waits for them to finish.
pub struct BackgroundServices {
    background_tasks: Vec<tokio::task::JoinHandle<()>>,
    shutdown_token: CancellationToken,
    // Pub so that we can disarm it if we want to
    pub drop_guard: Option<DropGuard>,
}

impl BackgroundServices {
    /// Gracefully shutdown all background tasks
    pub async fn shutdown(self) {
        self.shutdown_token.cancel();
        for handle in self.background_tasks {
            let _ = handle.await;
        }
    }
}

/// Drop calls that ended more than [`ENDED_CALL_RETENTION`] before `now`
fn purge_ended_calls(calls: &session::call::CallRegistry, now: chrono::DateTime<chrono::Utc>) -> usize {
    let retention = chrono::Duration::from_std(ENDED_CALL_RETENTION).unwrap_or(chrono::Duration::hours(1));
    calls.purge_ended_before(now - retention)
}

fn setup_background_services(state: &AppState) -> BackgroundServices {
    let shutdown_token = CancellationToken::new();
    let drop_guard = shutdown_token.clone().drop_guard();
    let mut background_tasks = Vec::new();

    // Rejections stop being listable after the retention period; this only reclaims the rows
    let rate_limiter = state.rate_limiter.clone();
    let purge_shutdown = shutdown_token.clone();
    background_tasks.push(tokio::spawn(async move {
        let mut interval = tokio::time::interval(EVENT_PURGE_INTERVAL);
        loop {
            tokio::select! {
                _ = purge_shutdown.cancelled() => break,
                _ = interval.tick() => {
                    if let Err(e) = rate_limiter.purge_expired_events().await {
                        warn!(error = %e, "Failed to purge expired rate-limit events");
                    }
                }
            }
        }
        debug!("Rate-limit event purge stopped");
    }));

    let calls = state.forwarder.calls().clone();
    let call_shutdown = shutdown_token.clone();
    background_tasks.push(tokio::spawn(async move {
        let mut interval = tokio::time::interval(CALL_PURGE_INTERVAL);
        loop {
            tokio::select! {
                _ = call_shutdown.cancelled() => break,
                _ = interval.tick() => {
                    let removed = purge_ended_calls(&calls, chrono::Utc::now());
                    if removed > 0 {
                        debug!(removed, remaining = calls.len(), "Purged ended calls");
                    }
                }
            }
        }
        debug!("Ended call purge stopped");
    }));

    BackgroundServices {
        background_tasks,
        shutdown_token,
        drop_guard: Some(drop_guard),
    }
}

/// The gateway: router, shared state and background services.
///
/// 1. **Create**: [`Application::new`] connects the store (running migrations for PostgreSQL),
///    builds the provider clients and starts background services
/// 2. **Serve**: [`Application::serve`] binds to a TCP port and handles requests until the
///    shutdown signal, then stops background services and closes the store
pub struct Application {
    router: Router,
    app_state: AppState,
    config: Config,
    bg_services: BackgroundServices,
}

impl Application {
    /// Create a new application instance with all resources initialized
    pub async fn new(config: Config) -> anyhow::Result<Self> {
        debug!("Starting relayctl with configuration: {:#?}", config);

        let db = Database::connect(&config.database).await?;
        let chat = providers::create_chat_provider(&config.providers.chat)?;
        let workflow = providers::create_workflow_provider(&config.providers.workflow)?;
        let voice = providers::create_voice_provider(&config.providers.voice)?;

        let app_state = AppState::new(config.clone(), db, chat, workflow, voice);
        let router = build_router(&app_state)?;
        let bg_services = setup_background_services(&app_state);

        Ok(Self {
            router,
            app_state,
            config,
            bg_services,
        })
    }

    /// Convert application into a test server (for tests). Background services stop here.
    #[cfg(test)]
    pub fn into_test_server(self) -> axum_test::TestServer {
        drop(self.bg_services);
        axum_test::TestServer::new(self.router.into_make_service()).expect("Failed to create test server")
    }

    /// Start serving the application
    pub async fn serve<F>(self, shutdown: F) -> anyhow::Result<()>
    where
        F: std::future::Future<Output = ()> + Send + 'static,
    {
        let bind_addr = self.config.bind_address();
        let listener = TcpListener::bind(&bind_addr).await?;
        info!(
            "relayctl listening on http://{}, available at http://localhost:{}",
            bind_addr, self.config.port
        );

        axum::serve(listener, self.router.into_make_service())
            .with_graceful_shutdown(shutdown)
            .await?;

        self.bg_services.shutdown().await;

        info!("Closing database connections...");
        self.app_state.db.close().await;

        info!("Shutting down telemetry...");
        telemetry::shutdown_telemetry();

        Ok(())
    }
}
