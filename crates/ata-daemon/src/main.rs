//! ata-daemon entry point.
//!
//! This file is intentionally thin: it sets up tracing, loads configuration,
//! wires the engines and background loops, and starts the HTTP server. All
//! route handlers live in `routes.rs`; shared state types live in `state.rs`.
//!
//! Exit codes: 0 = clean shutdown, 1 = fatal startup error, 2 = signal-driven
//! graceful termination.

use std::{net::SocketAddr, sync::Arc, time::Duration};

use anyhow::Context;
use axum::http::{HeaderValue, Method};
use tokio::sync::{mpsc, watch, RwLock};
use tower_http::{
    cors::CorsLayer,
    trace::{DefaultMakeSpan, DefaultOnResponse, TraceLayer},
};
use tracing::{debug, error, info, Level};

use ata_broker::{BrokerApi, HttpBroker};
use ata_config::AppConfig;
use ata_daemon::{routes, state::AppState};
use ata_execution::{ExecutionEngine, Reconciler};
use ata_md::Ingester;
use ata_orchestrator::{
    HttpMemory, HttpPlanner, HttpResearch, MemoryFacade, OrchestrateRequest, Orchestrator, Planner,
    Research,
};
use ata_signal::{AutoTrigger, RegistryHandle, SignalEngine};
use ata_strategy::StrategyRegistry;

fn main() {
    // Load .env.local if present (dev convenience). Silent if the file does
    // not exist; production injects env vars directly.
    let _ = dotenvy::from_filename(".env.local");

    init_tracing();

    let runtime = match tokio::runtime::Runtime::new() {
        Ok(rt) => rt,
        Err(e) => {
            eprintln!("failed to start runtime: {e}");
            std::process::exit(1);
        }
    };

    match runtime.block_on(run()) {
        Ok(code) => std::process::exit(code),
        Err(e) => {
            error!(error = %e, "fatal startup error");
            std::process::exit(1);
        }
    }
}

async fn run() -> anyhow::Result<i32> {
    let cfg = AppConfig::from_env()?;

    let pool = ata_db::connect(&cfg.database_url).await?;
    ata_db::migrate(&pool).await?;

    let broker: Arc<dyn BrokerApi> = Arc::new(HttpBroker::new(
        &cfg.broker.base_url,
        Duration::from_secs(cfg.broker.timeout_secs),
    )?);

    // Load APPROVED/ACTIVE artifacts into the registry. An approved artifact
    // referencing a missing evaluator is a deployment error: fail fast.
    let artifacts = ata_db::artifacts::list_approved_artifacts(&pool).await?;
    let registry = StrategyRegistry::from_artifacts(&artifacts)
        .context("strategy registry failed to load")?;
    info!(strategies = registry.len(), "strategy registry loaded");
    let registry: RegistryHandle = Arc::new(RwLock::new(Arc::new(registry)));

    let memory: Option<Arc<dyn MemoryFacade>> = match &cfg.orchestration.memory_url {
        Some(url) => Some(Arc::new(HttpMemory::new(
            url,
            Duration::from_secs(cfg.orchestration.memory_timeout_secs),
        )?)),
        None => None,
    };
    let planner: Option<Arc<dyn Planner>> = match &cfg.orchestration.planner_url {
        Some(url) => Some(Arc::new(HttpPlanner::new(
            url,
            Duration::from_secs(cfg.orchestration.planner_timeout_secs),
        )?)),
        None => None,
    };
    let research: Option<Arc<dyn Research>> = match &cfg.orchestration.research_url {
        Some(url) => Some(Arc::new(HttpResearch::new(
            url,
            Duration::from_secs(cfg.orchestration.research_timeout_secs),
        )?)),
        None => None,
    };

    let orchestrator = Arc::new(Orchestrator::new(
        pool.clone(),
        cfg.orchestration.clone(),
        memory,
        planner,
        research,
    ));
    let executor = Arc::new(ExecutionEngine::new(
        pool.clone(),
        Arc::clone(&broker),
        cfg.execution.clone(),
    ));

    let (trigger_tx, trigger_rx) = mpsc::channel::<AutoTrigger>(32);
    let signal_engine = Arc::new(SignalEngine::new(
        pool.clone(),
        cfg.signals.clone(),
        Arc::clone(&registry),
        Some(trigger_tx),
    ));

    let ingester = Ingester::new(pool.clone(), Arc::clone(&broker), cfg.market.clone());
    let ingest_health = ingester.health();

    // Shutdown fan-out: every loop observes this and stops at its next tick
    // boundary.
    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    tokio::spawn(ingester.run(shutdown_rx.clone()));
    tokio::spawn(
        Arc::clone(&signal_engine).run(cfg.market.symbols.clone(), shutdown_rx.clone()),
    );
    tokio::spawn(ata_signal::run_expiry_sweep(
        pool.clone(),
        cfg.signals.expire_interval_secs,
        shutdown_rx.clone(),
    ));
    tokio::spawn(
        Reconciler::new(
            pool.clone(),
            Arc::clone(&broker),
            cfg.execution.reconcile_interval_secs,
        )
        .run(shutdown_rx.clone()),
    );
    spawn_auto_trigger_worker(Arc::clone(&orchestrator), trigger_rx, shutdown_rx.clone());

    let shared = Arc::new(AppState {
        pool,
        cfg: cfg.clone(),
        broker,
        registry,
        orchestrator,
        executor,
        signal_engine,
        ingest_health,
        build: AppState::build_info(),
    });

    let app = routes::build_router(Arc::clone(&shared))
        .layer(
            TraceLayer::new_for_http()
                .make_span_with(DefaultMakeSpan::new().level(Level::INFO))
                .on_response(DefaultOnResponse::new().level(Level::INFO)),
        )
        .layer(cors_localhost_only());

    let addr = SocketAddr::from(([0, 0, 0, 0], cfg.port));
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("bind failed on {addr}"))?;
    info!("ata-daemon listening on http://{addr}");

    // Track whether shutdown was signal-driven to pick the exit code.
    let (signalled_tx, signalled_rx) = watch::channel(false);
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal(shutdown_tx, signalled_tx))
        .await
        .context("server crashed")?;

    Ok(if *signalled_rx.borrow() { 2 } else { 0 })
}

/// Consume auto-triggers from the signal engine. Per-symbol coalescing
/// happens inside the orchestrator; a refused trigger is dropped quietly.
fn spawn_auto_trigger_worker(
    orchestrator: Arc<Orchestrator>,
    mut rx: mpsc::Receiver<AutoTrigger>,
    mut shutdown: watch::Receiver<bool>,
) {
    tokio::spawn(async move {
        loop {
            let trigger = tokio::select! {
                t = rx.recv() => match t {
                    Some(t) => t,
                    None => return,
                },
                _ = shutdown.changed() => {
                    if *shutdown.borrow() {
                        return;
                    }
                    continue;
                }
            };

            info!(
                signal_id = %trigger.signal_id,
                symbol = %trigger.symbol,
                confidence = trigger.confidence,
                "auto-orchestration trigger"
            );
            let req = OrchestrateRequest::from_signal(&trigger.symbol, trigger.signal_id);
            if let Err(e) = Arc::clone(&orchestrator).begin(req).await {
                debug!(symbol = %trigger.symbol, error = %e, "auto-trigger coalesced");
            }
        }
    });
}

async fn shutdown_signal(shutdown_tx: watch::Sender<bool>, signalled_tx: watch::Sender<bool>) {
    let ctrl_c = async {
        let _ = tokio::signal::ctrl_c().await;
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(_) => std::future::pending::<()>().await,
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
    }

    info!("termination signal received, stopping loops");
    let _ = signalled_tx.send(true);
    let _ = shutdown_tx.send(true);
}

fn init_tracing() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()),
        )
        .init();
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
