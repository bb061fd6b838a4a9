//! mailk-daemon entry point.
//!
//! This file is intentionally thin: it sets up tracing, wires the store,
//! provider and controller, attaches middleware, and starts the HTTP
//! server.  Route handlers live in `routes.rs`; shared state in `state.rs`.

use std::{sync::Arc, time::Duration};

use anyhow::Context;
use axum::http::{HeaderValue, Method};
use mailk_config::{report_unused_keys, secrets::resolve_gateway_secrets, ConfigMode, UnusedKeyPolicy};
use mailk_daemon::{boot, routes, state};
use mailk_db::PgRecordStore;
use mailk_execution::FulfillmentGateway;
use mailk_gateway_http::{HttpFulfillment, HttpGatewayConfig};
use mailk_reconcile::Reconciler;
use mailk_runtime::Controller;
use tokio::sync::mpsc;
use tower_http::{
    cors::CorsLayer,
    trace::{DefaultMakeSpan, DefaultOnResponse, TraceLayer},
};
use tracing::{info, warn, Level};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env.local if present (dev convenience).
    // Silent if the file does not exist; production injects env vars directly.
    let _ = dotenvy::from_filename(".env.local");

    init_tracing();

    let paths = boot::config_paths(std::env::var(boot::ENV_CONFIG).ok().as_deref());
    let addr_override = std::env::var(boot::ENV_DAEMON_ADDR).ok();
    let settings = boot::DaemonSettings::load(&paths, addr_override.as_deref())?;
    info!(config_hash = %settings.loaded.config_hash, layers = ?paths, "config loaded");

    let unused = report_unused_keys(
        ConfigMode::Daemon,
        &settings.loaded.config_json,
        UnusedKeyPolicy::Warn,
    )?;
    if !unused.is_clean() {
        warn!(keys = ?unused.unused_leaf_pointers, "unused config keys");
    }

    // Fail closed: no provider endpoint or key, no controller.
    let secrets = resolve_gateway_secrets(&settings.loaded.config_json, true)?;
    let base_url = settings
        .controller
        .gateway
        .base_url
        .clone()
        .context("CONFIG_INVALID: /gateway/base_url is required by the daemon")?;
    let adapter = HttpFulfillment::new(HttpGatewayConfig {
        base_url,
        api_key: secrets.api_key,
        timeout: settings.controller.gateway.timeout,
    })?;

    let pool = mailk_db::connect_from_env().await?;
    mailk_db::migrate(&pool).await?;
    let feed = mailk_db::listen_changes(&pool).await?;

    let engine = Arc::new(Reconciler::new(
        FulfillmentGateway::new(adapter),
        PgRecordStore::from_current(pool.clone()),
        boot::reconcile_config(&settings.controller),
    ));

    let (trigger, events) = mpsc::unbounded_channel();
    boot::forward_changes(feed, trigger.clone());
    let controller = Controller::start(engine, boot::runtime_config(&settings.controller), events);

    let shared = Arc::new(state::AppState::with_controller(
        settings.loaded.config_hash.clone(),
        state::ControllerLink {
            stats: controller.stats(),
            trigger,
        },
    ));
    state::spawn_heartbeat(shared.bus.clone(), Duration::from_secs(1));
    state::spawn_report_forwarder(shared.bus.clone(), controller.subscribe());

    let app = routes::build_router(Arc::clone(&shared))
        .layer(
            TraceLayer::new_for_http()
                .make_span_with(DefaultMakeSpan::new().level(Level::INFO))
                .on_response(DefaultOnResponse::new().level(Level::INFO)),
        )
        .layer(cors_localhost_only());

    info!("mailk-daemon listening on http://{}", settings.bind_addr);
    axum::serve(tokio::net::TcpListener::bind(settings.bind_addr).await?, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("server crashed")?;

    *shared.lifecycle.write().await = "stopping".to_string();
    controller.shutdown().await;
    pool.close().await;
    Ok(())
}

fn init_tracing() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()),
        )
        .init();
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!(error = %e, "ctrl-c handler failed; shutting down");
    }
    info!("shutdown requested");
}

/// CORS: allow only localhost origins.
fn cors_localhost_only() -> CorsLayer {
    let allowed_origins = [
        "http://localhost",
        "http://127.0.0.1",
        "http://localhost:3000",
        "http://127.0.0.1:3000",
        "http://localhost:5173",
        "http://127.0.0.1:5173",
    ];

    let origins: Vec<HeaderValue> = allowed_origins
        .iter()
        .filter_map(|o| HeaderValue::from_str(o).ok())
        .collect();

    CorsLayer::new()
        .allow_origin(origins)
        .allow_methods([Method::GET, Method::POST])
        .allow_headers(tower_http::cors::Any)
}
