//! Route-level scenarios composed on the bare router (no middleware):
//! artifact create -> validate -> promote chain with the illegal jump
//! rejected, registry reload visibility, orchestrate strategy lookup, and
//! the execution kill switch.

use std::sync::Arc;

use axum::body::Body;
use axum::http::{header, Request, StatusCode};
use http_body_util::BodyExt;
use serde_json::{json, Value};
use sqlx::PgPool;
use tokio::sync::RwLock;
use tower::ServiceExt;
use uuid::Uuid;

use ata_broker::{BrokerAccount, BrokerApi, PaperBroker};
use ata_config::{
    AppConfig, BrokerConfig, ExecutionConfig, MarketDataConfig, OrchestrationConfig, SignalConfig,
};
use ata_daemon::{routes, state::AppState};
use ata_execution::ExecutionEngine;
use ata_md::Ingester;
use ata_orchestrator::Orchestrator;
use ata_schemas::OrderType;
use ata_signal::SignalEngine;
use ata_strategy::StrategyRegistry;

async fn pool_or_skip() -> Option<PgPool> {
    if std::env::var(ata_db::ENV_DB_URL).is_err() {
        eprintln!("skipping: DATABASE_URL not set");
        return None;
    }
    Some(ata_db::testkit_db_pool().await.expect("db pool"))
}

fn test_config(database_url: String) -> AppConfig {
    AppConfig {
        database_url,
        port: 0,
        broker: BrokerConfig {
            base_url: "http://127.0.0.1:1".to_string(),
            timeout_secs: 1,
        },
        market: MarketDataConfig {
            symbols: vec![],
            ingest_interval_secs: 60,
            candle_backfill: 250,
            stale_quote_secs: 120,
        },
        signals: SignalConfig {
            interval_secs: 300,
            min_candles: 50,
            min_confidence: 0.6,
            auto_trigger_threshold: 0.75,
            auto_orchestration_enabled: true,
            dedup_window_secs: 3_600,
            ttl_secs: 86_400,
            expire_interval_secs: 60,
        },
        orchestration: OrchestrationConfig {
            memory_url: None,
            planner_url: None,
            research_url: None,
            recall_limit: 8,
            gather_limit: 5,
            memory_timeout_secs: 5,
            planner_timeout_secs: 30,
            research_timeout_secs: 30,
        },
        execution: ExecutionConfig {
            enabled: false, // fail-closed in route tests
            max_risk_per_trade: 0.01,
            max_position_value_pct: 0.20,
            max_open_positions: 5,
            max_daily_loss: 1_000.0,
            default_order_type: OrderType::Lmt,
            min_position_size: 1,
            max_position_size: 10_000,
            reconcile_interval_secs: 30,
        },
    }
}

async fn test_state(pool: PgPool) -> Arc<AppState> {
    let cfg = test_config("unused".to_string());
    let broker: Arc<dyn BrokerApi> = Arc::new(PaperBroker::new(BrokerAccount {
        net_liquidation: 100_000.0,
        buying_power: 200_000.0,
        currency: "USD".to_string(),
    }));

    let registry = Arc::new(RwLock::new(Arc::new(StrategyRegistry::default())));
    let orchestrator = Arc::new(Orchestrator::new(
        pool.clone(),
        cfg.orchestration.clone(),
        None,
        None,
        None,
    ));
    let executor = Arc::new(ExecutionEngine::new(
        pool.clone(),
        Arc::clone(&broker),
        cfg.execution.clone(),
    ));
    let signal_engine = Arc::new(SignalEngine::new(
        pool.clone(),
        cfg.signals.clone(),
        Arc::clone(&registry),
        None,
    ));
    let ingest_health = Ingester::new(pool.clone(), Arc::clone(&broker), cfg.market.clone()).health();

    Arc::new(AppState {
        pool,
        cfg,
        broker,
        registry,
        orchestrator,
        executor,
        signal_engine,
        ingest_health,
        build: AppState::build_info(),
    })
}

async fn call(app: &axum::Router, method: &str, uri: &str, body: Option<Value>) -> (StatusCode, Value) {
    let builder = Request::builder()
        .method(method)
        .uri(uri)
        .header(header::CONTENT_TYPE, "application/json");
    let request = match body {
        Some(v) => builder.body(Body::from(v.to_string())).unwrap(),
        None => builder.body(Body::empty()).unwrap(),
    };

    let response = app.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    let value = if bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&bytes).unwrap_or(Value::Null)
    };
    (status, value)
}

fn artifact_body(version: &str) -> Value {
    json!({
        "strategy_name": "rsi_momentum",
        "strategy_version": version,
        "params": {"period": 14, "oversold": 30.0, "overbought": 70.0},
        "risk_profile": {
            "max_position_pct": 0.20,
            "max_daily_loss": 1000.0,
            "allowed_order_types": ["LMT"]
        },
        "created_by": "route-test"
    })
}

#[tokio::test]
async fn artifact_promotion_flow_over_http() {
    let Some(pool) = pool_or_skip().await else {
        return;
    };
    let app = routes::build_router(test_state(pool).await);

    // Create: lands in DRAFT with a content hash.
    let version = format!("1.0-{}", Uuid::new_v4());
    let (status, created) =
        call(&app, "POST", "/api/v1/artifacts", Some(artifact_body(&version))).await;
    assert_eq!(status, StatusCode::CREATED, "{created}");
    assert_eq!(created["state"], "DRAFT");
    assert_eq!(created["hash"].as_str().unwrap().len(), 64);
    let id = created["id"].as_str().unwrap().to_string();

    // Duplicate content: 409 with the data kind.
    let (status, dup) =
        call(&app, "POST", "/api/v1/artifacts", Some(artifact_body(&version))).await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(dup["error"]["kind"], "data");

    // Validate: passes and transitions DRAFT -> VALIDATED.
    let (status, validated) =
        call(&app, "POST", &format!("/api/v1/artifacts/{id}/validate"), Some(json!({}))).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(validated["passed"], true);

    let (_, detail) = call(&app, "GET", &format!("/api/v1/artifacts/{id}"), None).await;
    assert_eq!(detail["approval"]["state"], "VALIDATED");
    assert_eq!(detail["validation_reports"].as_array().unwrap().len(), 1);

    // VALIDATED -> REVIEWED is legal.
    let (status, _) = call(
        &app,
        "POST",
        &format!("/api/v1/artifacts/{id}/promote"),
        Some(json!({"to_state": "REVIEWED", "promoted_by": "reviewer"})),
    )
    .await;
    assert_eq!(status, StatusCode::OK);

    // REVIEWED -> ACTIVE skips APPROVED: 409 illegal_transition.
    let (status, refused) = call(
        &app,
        "POST",
        &format!("/api/v1/artifacts/{id}/promote"),
        Some(json!({"to_state": "ACTIVE", "promoted_by": "reviewer"})),
    )
    .await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(refused["error"]["kind"], "illegal_transition");

    // REVIEWED -> APPROVED -> ACTIVE succeeds.
    for to in ["APPROVED", "ACTIVE"] {
        let (status, _) = call(
            &app,
            "POST",
            &format!("/api/v1/artifacts/{id}/promote"),
            Some(json!({"to_state": to, "promoted_by": "approver"})),
        )
        .await;
        assert_eq!(status, StatusCode::OK, "promote to {to}");
    }

    // The approved filter now includes it; a reload publishes it to the
    // registry snapshot.
    let (_, list) = call(&app, "GET", "/api/v1/artifacts?state=approved", None).await;
    assert!(list
        .as_array()
        .unwrap()
        .iter()
        .any(|a| a["id"].as_str() == Some(id.as_str())));

    let (status, reloaded) = call(&app, "POST", "/api/v1/artifacts/reload", None).await;
    assert_eq!(status, StatusCode::OK);
    assert!(reloaded["registry_size"].as_u64().unwrap() >= 1);

    // Revoke: drops out of the approved list at the next reload, and a
    // manual orchestration referencing it turns into a 404.
    let strategy_id = format!("rsi_momentum@{version}");
    let (status, _) = call(
        &app,
        "POST",
        &format!("/api/v1/artifacts/{id}/promote"),
        Some(json!({"to_state": "REVOKED", "promoted_by": "ops", "reason": "emergency stop"})),
    )
    .await;
    assert_eq!(status, StatusCode::OK);

    call(&app, "POST", "/api/v1/artifacts/reload", None).await;
    let (status, refused) = call(
        &app,
        "POST",
        "/api/v1/orchestrate",
        Some(json!({"symbol": "AAPL", "strategy": strategy_id})),
    )
    .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(refused["error"]["kind"], "not_found");
}

#[tokio::test]
async fn execute_is_fail_closed_when_disabled() {
    let Some(pool) = pool_or_skip().await else {
        return;
    };
    let app = routes::build_router(test_state(pool.clone()).await);

    // Seed an approved signal with an approval row.
    let now = chrono::Utc::now();
    let signal = ata_schemas::Signal {
        id: Uuid::new_v4(),
        symbol: "AAPL".to_string(),
        strategy_id: format!("rsi_momentum@{}", Uuid::new_v4()),
        signal_type: ata_schemas::SignalType::Buy,
        confidence: 0.8,
        entry_price: 150.0,
        stop_loss: 145.0,
        take_profit: 160.0,
        reasoning: String::new(),
        status: ata_schemas::SignalStatus::Pending,
        generated_at: now,
        expires_at: now + chrono::Duration::hours(24),
        orchestration_run_id: None,
        created_at: now,
    };
    assert!(ata_db::signals::insert_signal(&pool, &signal).await.unwrap());
    ata_db::signals::update_signal_status(
        &pool,
        signal.id,
        ata_schemas::SignalStatus::Pending,
        ata_schemas::SignalStatus::Approved,
    )
    .await
    .unwrap();
    ata_db::trades::upsert_trade_approval(
        &pool,
        &ata_schemas::TradeApproval {
            signal_id: signal.id,
            orchestration_run_id: None,
            approved: true,
            approved_by: "route-test".to_string(),
            approved_at: now,
            modification_notes: None,
            order_id: None,
        },
    )
    .await
    .unwrap();

    let (status, body) = call(
        &app,
        "POST",
        "/api/v1/execute",
        Some(json!({"signal_id": signal.id, "approved_by": "route-test"})),
    )
    .await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(body["error"]["kind"], "risk_gate");
    assert!(body["error"]["message"]
        .as_str()
        .unwrap()
        .contains("ExecutionDisabled"));
    assert!(body["error"]["correlation_id"].as_str().is_some());
}

#[tokio::test]
async fn unknown_ids_are_404s() {
    let Some(pool) = pool_or_skip().await else {
        return;
    };
    let app = routes::build_router(test_state(pool).await);

    let id = Uuid::new_v4();
    for uri in [
        format!("/api/v1/artifacts/{id}"),
        format!("/api/v1/signals/{id}"),
        format!("/api/v1/orchestrate/runs/{id}"),
        format!("/trades/{id}"),
    ] {
        let (status, body) = call(&app, "GET", &uri, None).await;
        assert_eq!(status, StatusCode::NOT_FOUND, "{uri}");
        assert_eq!(body["error"]["kind"], "not_found", "{uri}");
    }
}

#[tokio::test]
async fn signal_approval_is_single_shot() {
    let Some(pool) = pool_or_skip().await else {
        return;
    };
    let app = routes::build_router(test_state(pool.clone()).await);

    let now = chrono::Utc::now();
    let signal = ata_schemas::Signal {
        id: Uuid::new_v4(),
        symbol: "MSFT".to_string(),
        strategy_id: format!("ma_crossover@{}", Uuid::new_v4()),
        signal_type: ata_schemas::SignalType::Sell,
        confidence: 0.7,
        entry_price: 400.0,
        stop_loss: 410.0,
        take_profit: 380.0,
        reasoning: String::new(),
        status: ata_schemas::SignalStatus::Pending,
        generated_at: now,
        expires_at: now + chrono::Duration::hours(24),
        orchestration_run_id: None,
        created_at: now,
    };
    assert!(ata_db::signals::insert_signal(&pool, &signal).await.unwrap());

    let (status, body) = call(
        &app,
        "POST",
        &format!("/api/v1/signals/{}/approve", signal.id),
        Some(json!({"approved_by": "route-test"})),
    )
    .await;
    assert_eq!(status, StatusCode::OK, "{body}");
    assert_eq!(body["status"], "approved");

    // Second approval: the signal is no longer pending.
    let (status, body) = call(
        &app,
        "POST",
        &format!("/api/v1/signals/{}/approve", signal.id),
        Some(json!({"approved_by": "route-test"})),
    )
    .await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(body["error"]["kind"], "illegal_transition");
}
