//! bl-daemon entry point.
//!
//! Thin on purpose: load configuration, pick the record store, build the
//! shared state, wire middleware and serve. Handlers live in `routes.rs`;
//! shared state types in `state.rs`.
//!
//! Usage: `bl-daemon [config.yaml ...]` (layers merge left to right).

use std::{net::SocketAddr, sync::Arc, time::Duration};

use anyhow::Context;
use axum::http::{HeaderValue, Method};
use bl_audit::{JsonlEventSink, MemoryEventSink};
use bl_config::{ProcureSettings, StoreBackend};
use bl_daemon::{routes, state};
use bl_schemas::{EventSink, SystemClock};
use bl_store::{MemStore, Store};
use tower_http::{
    cors::CorsLayer,
    trace::{DefaultMakeSpan, DefaultOnResponse, TraceLayer},
};
use tracing::{info, Level};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Silent if the file does not exist; production injects env vars directly.
    let _ = dotenvy::from_filename(".env.local");

    init_tracing();

    let settings = load_settings()?;
    let store = open_store(&settings).await?;
    let audit = open_audit(&settings)?;

    let shared = Arc::new(state::AppState::new(
        store,
        Arc::new(SystemClock),
        audit,
        &settings,
    ));
    state::spawn_heartbeat(
        shared.bus.clone(),
        Duration::from_secs(settings.daemon.heartbeat_secs.max(1)),
    );

    let app = routes::build_router(Arc::clone(&shared))
        .layer(
            TraceLayer::new_for_http()
                .make_span_with(DefaultMakeSpan::new().level(Level::INFO))
                .on_response(DefaultOnResponse::new().level(Level::INFO)),
        )
        .layer(cors_localhost_only());

    let addr = bind_addr(&settings)?;
    info!("bl-daemon listening on http://{}", addr);

    axum::serve(tokio::net::TcpListener::bind(addr).await?, app)
        .await
        .context("server crashed")?;

    Ok(())
}

fn init_tracing() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()),
        )
        .init();
}

fn load_settings() -> anyhow::Result<ProcureSettings> {
    let paths: Vec<String> = std::env::args().skip(1).collect();
    if paths.is_empty() {
        info!("no config layers given; using defaults");
        return Ok(ProcureSettings::default());
    }
    let refs: Vec<&str> = paths.iter().map(String::as_str).collect();
    let loaded = bl_config::load_layered_yaml(&refs).context("load config layers")?;
    info!(config_hash = %loaded.config_hash, layers = refs.len(), "config loaded");
    loaded.settings()
}

async fn open_store(settings: &ProcureSettings) -> anyhow::Result<Arc<dyn Store>> {
    match settings.store.backend {
        StoreBackend::Memory => {
            info!(change_buffer = settings.store.change_buffer, "using in-memory record store");
            Ok(Arc::new(MemStore::with_change_buffer(
                settings.store.change_buffer,
            )))
        }
        StoreBackend::Postgres => {
            let pool = bl_db::connect_from_env().await?;
            bl_db::migrate(&pool).await?;
            let store = bl_db::PgStore::new(pool.clone(), settings.store.change_buffer);
            bl_db::spawn_change_listener(pool, store.change_sender());
            info!("using postgres record store");
            Ok(Arc::new(store))
        }
    }
}

fn open_audit(settings: &ProcureSettings) -> anyhow::Result<Arc<dyn EventSink>> {
    let path = settings.audit.path.trim();
    if path.is_empty() {
        return Ok(Arc::new(MemoryEventSink::new()));
    }
    let sink = JsonlEventSink::open(path, settings.audit.hash_chain)
        .with_context(|| format!("open audit log: {path}"))?;
    info!(path, hash_chain = settings.audit.hash_chain, "event log opened");
    Ok(Arc::new(sink))
}

/// `BL_DAEMON_ADDR` overrides `daemon.addr`.
fn bind_addr(settings: &ProcureSettings) -> anyhow::Result<SocketAddr> {
    let raw = std::env::var("BL_DAEMON_ADDR").unwrap_or_else(|_| settings.daemon.addr.clone());
    raw.parse()
        .with_context(|| format!("invalid bind address: {raw}"))
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
        .allow_methods([Method::GET, Method::POST, Method::PUT])
        .allow_headers(tower_http::cors::Any)
}
