//! Axum router and all HTTP handlers.
//!
//! `build_router` is the single entry point; `main.rs` calls it and attaches
//! middleware layers. Handlers are `pub(crate)` so the scenario tests in
//! `tests/` can compose the router directly.

use std::sync::Arc;

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::IntoResponse,
    routing::{get, post},
    Json, Router,
};
use chrono::Utc;
use tracing::{info, warn};
use uuid::Uuid;

use ata_artifacts::{ApprovalState, NewArtifact, ValidationReport};
use ata_orchestrator::OrchestrateRequest;
use ata_schemas::{SignalStatus, TradeApproval};
use ata_strategy::{bind_evaluator, validate_params};

use crate::api_types::*;
use crate::state::AppState;

// ---------------------------------------------------------------------------
// Router
// ---------------------------------------------------------------------------

/// Build the complete application router wired to the given shared state.
///
/// Middleware layers (CORS, tracing) are **not** applied here; `main.rs`
/// attaches them after this call so tests can use the bare router.
pub fn build_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/api/v1/health", get(health))
        .route("/api/v1/status", get(status_handler))
        .route("/api/v1/artifacts", post(artifact_create).get(artifact_list))
        .route("/api/v1/artifacts/reload", post(artifact_reload))
        .route("/api/v1/artifacts/:id", get(artifact_detail))
        .route("/api/v1/artifacts/:id/validate", post(artifact_validate))
        .route("/api/v1/artifacts/:id/promote", post(artifact_promote))
        .route("/api/v1/signals/generate", post(signals_generate))
        .route("/api/v1/signals", get(signals_list))
        .route("/api/v1/signals/:id", get(signal_detail))
        .route("/api/v1/signals/:id/approve", post(signal_approve))
        .route("/api/v1/signals/:id/reject", post(signal_reject))
        .route("/api/v1/signals/:id/analyze", post(signal_analyze))
        .route("/api/v1/orchestrate", post(orchestrate_start))
        .route("/api/v1/orchestrate/runs", get(run_list))
        .route("/api/v1/orchestrate/runs/:id", get(run_detail))
        .route("/api/v1/execute", post(execute))
        .route("/trades", get(trade_list))
        .route("/trades/:id", get(trade_detail))
        .with_state(state)
}

// ---------------------------------------------------------------------------
// Health / status
// ---------------------------------------------------------------------------

pub(crate) async fn health(State(st): State<Arc<AppState>>) -> impl IntoResponse {
    let db_ok = ata_db::status(&st.pool).await.map(|s| s.ok).unwrap_or(false);
    let body = HealthResponse {
        ok: db_ok,
        service: st.build.service,
        version: st.build.version,
        db_ok,
        ingest_degraded: st.ingest_health.is_degraded(),
    };
    let status = if db_ok {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };
    (status, Json(body))
}

pub(crate) async fn status_handler(State(st): State<Arc<AppState>>) -> impl IntoResponse {
    let registry = st.registry.read().await.clone();
    Json(StatusResponse {
        registry_size: registry.len(),
        strategies: registry
            .entries()
            .iter()
            .map(|e| e.strategy_id.clone())
            .collect(),
        watchlist: st.cfg.market.symbols.clone(),
        execution_enabled: st.cfg.execution.enabled,
        auto_orchestration_enabled: st.cfg.signals.auto_orchestration_enabled,
    })
}

// ---------------------------------------------------------------------------
// Artifacts
// ---------------------------------------------------------------------------

pub(crate) async fn artifact_create(
    State(st): State<Arc<AppState>>,
    Json(body): Json<CreateArtifactRequest>,
) -> Result<impl IntoResponse, ApiError> {
    if body.strategy_name.trim().is_empty() || body.strategy_version.trim().is_empty() {
        return Err(ApiError::validation("strategy_name and strategy_version are required"));
    }

    let input = NewArtifact {
        strategy_name: body.strategy_name,
        strategy_version: body.strategy_version,
        params: body.params,
        risk_profile: body.risk_profile,
        created_by: body.created_by,
    };
    let artifact = ata_db::artifacts::create_artifact(&st.pool, &input).await?;

    info!(artifact_id = %artifact.artifact_id, hash = %artifact.hash, "artifact created");
    Ok((
        StatusCode::CREATED,
        Json(ArtifactResponse {
            artifact,
            state: ApprovalState::Draft,
        }),
    ))
}

pub(crate) async fn artifact_list(
    State(st): State<Arc<AppState>>,
    Query(q): Query<ListArtifactsQuery>,
) -> Result<impl IntoResponse, ApiError> {
    let filter: Option<&[ApprovalState]> = match q.state.as_deref() {
        Some("approved") => Some(&[ApprovalState::Approved, ApprovalState::Active]),
        _ => None,
    };
    let rows = ata_db::artifacts::list_artifacts(&st.pool, filter).await?;
    let out: Vec<ArtifactResponse> = rows
        .into_iter()
        .map(|(artifact, state)| ArtifactResponse { artifact, state })
        .collect();
    Ok(Json(out))
}

pub(crate) async fn artifact_detail(
    State(st): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
) -> Result<impl IntoResponse, ApiError> {
    let artifact = ata_db::artifacts::fetch_artifact(&st.pool, id).await?;
    let approval = ata_db::artifacts::fetch_approval(&st.pool, id).await?;
    let validation_reports = ata_db::artifacts::list_validation_reports(&st.pool, id).await?;
    Ok(Json(ArtifactDetailResponse {
        artifact,
        approval,
        validation_reports,
    }))
}

/// Static validation: the referenced evaluator must be linked, the params
/// must satisfy its schema, and the risk profile must be coherent. On pass,
/// a DRAFT artifact transitions to VALIDATED.
pub(crate) async fn artifact_validate(
    State(st): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
) -> Result<impl IntoResponse, ApiError> {
    let artifact = ata_db::artifacts::fetch_artifact(&st.pool, id).await?;
    let approval = ata_db::artifacts::fetch_approval(&st.pool, id).await?;

    let started_at = Utc::now();
    let mut errors: Vec<String> = Vec::new();
    let mut warnings: Vec<String> = Vec::new();

    match bind_evaluator(&artifact.strategy_name) {
        None => errors.push(format!(
            "evaluator {:?} is not linked into this binary",
            artifact.strategy_name
        )),
        Some(evaluator) => {
            if let Err(reason) = validate_params(evaluator.param_schema(), &artifact.params) {
                errors.push(format!("params: {reason}"));
            }
        }
    }

    let rp = &artifact.risk_profile;
    if !(rp.max_position_pct > 0.0 && rp.max_position_pct <= 1.0) {
        errors.push(format!(
            "risk_profile.max_position_pct must be in (0, 1], got {}",
            rp.max_position_pct
        ));
    }
    if rp.max_daily_loss <= 0.0 {
        errors.push(format!(
            "risk_profile.max_daily_loss must be > 0, got {}",
            rp.max_daily_loss
        ));
    }
    if rp.allowed_order_types.is_empty() {
        warnings.push("risk_profile.allowed_order_types is empty".to_string());
    }
    for ot in &rp.allowed_order_types {
        if ata_schemas::OrderType::parse(ot).is_none() {
            errors.push(format!("unknown order type {ot:?} in risk_profile"));
        }
    }

    let passed = errors.is_empty();
    let completed_at = Utc::now();
    let metrics = serde_json::json!({
        "evaluator": artifact.strategy_name,
        "error_count": errors.len(),
        "warning_count": warnings.len(),
    });

    let report = ValidationReport {
        artifact_id: id,
        run_id: Uuid::new_v4(),
        test_type: "static".to_string(),
        passed,
        metrics: metrics.clone(),
        errors: errors.clone(),
        warnings: warnings.clone(),
        started_at,
        completed_at,
        duration_seconds: (completed_at - started_at).num_milliseconds() as f64 / 1_000.0,
    };
    ata_db::artifacts::create_validation_report(&st.pool, &report).await?;

    if passed && approval.state == ApprovalState::Draft {
        ata_db::artifacts::update_approval_state(
            &st.pool,
            id,
            ApprovalState::Validated,
            "validator",
            Some("validation passed"),
        )
        .await?;
    }

    Ok(Json(ValidateResponse {
        passed,
        metrics,
        errors,
        warnings,
    }))
}

pub(crate) async fn artifact_promote(
    State(st): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
    Json(body): Json<PromoteRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let to = ApprovalState::parse(&body.to_state.to_ascii_uppercase())
        .ok_or_else(|| ApiError::validation(format!("unknown state {:?}", body.to_state)))?;

    let approval = ata_db::artifacts::update_approval_state(
        &st.pool,
        id,
        to,
        &body.promoted_by,
        body.reason.as_deref(),
    )
    .await?;

    info!(artifact_id = %id, to = to.as_str(), by = %body.promoted_by, "artifact promoted");
    Ok(Json(approval))
}

pub(crate) async fn artifact_reload(
    State(st): State<Arc<AppState>>,
) -> Result<impl IntoResponse, ApiError> {
    let registry_size = st
        .reload_registry()
        .await
        .map_err(|e| ApiError::new(StatusCode::CONFLICT, "validation", e.to_string()))?;
    info!(registry_size, "strategy registry reloaded");
    Ok(Json(ReloadResponse { registry_size }))
}

// ---------------------------------------------------------------------------
// Signals
// ---------------------------------------------------------------------------

pub(crate) async fn signals_generate(
    State(st): State<Arc<AppState>>,
    Json(body): Json<GenerateRequest>,
) -> Result<impl IntoResponse, ApiError> {
    if body.symbols.is_empty() {
        return Err(ApiError::validation("symbols must not be empty"));
    }
    let symbols: Vec<String> = body
        .symbols
        .iter()
        .map(|s| s.trim().to_ascii_uppercase())
        .filter(|s| !s.is_empty())
        .collect();

    let report = st.signal_engine.generate_for_symbols(&symbols).await;
    let signals = report
        .outcomes
        .iter()
        .flat_map(|o| o.signals.iter().cloned())
        .collect();

    Ok(Json(GenerateResponse {
        signals,
        count: report.count,
        duration: report.duration_ms as f64 / 1_000.0,
        outcomes: report.outcomes,
    }))
}

pub(crate) async fn signals_list(
    State(st): State<Arc<AppState>>,
    Query(q): Query<ListSignalsQuery>,
) -> Result<impl IntoResponse, ApiError> {
    let signals = ata_db::signals::list_signals(
        &st.pool,
        q.symbol.as_deref(),
        q.limit.unwrap_or(50).clamp(1, 500),
    )
    .await?;
    Ok(Json(signals))
}

pub(crate) async fn signal_detail(
    State(st): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
) -> Result<impl IntoResponse, ApiError> {
    let signal = ata_db::signals::fetch_signal(&st.pool, id)
        .await?
        .ok_or_else(|| ApiError::not_found(format!("signal {id} not found")))?;
    Ok(Json(signal))
}

/// Approve a pending signal and hand it to the execution engine. The broker
/// call runs detached so this handler returns promptly; the approval row
/// carries the order id once known.
pub(crate) async fn signal_approve(
    State(st): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
    Json(body): Json<ApproveSignalRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let signal = ata_db::signals::fetch_signal(&st.pool, id)
        .await?
        .ok_or_else(|| ApiError::not_found(format!("signal {id} not found")))?;

    let moved = ata_db::signals::update_signal_status(
        &st.pool,
        id,
        SignalStatus::Pending,
        SignalStatus::Approved,
    )
    .await?;
    if !moved {
        return Err(ApiError::new(
            StatusCode::CONFLICT,
            "illegal_transition",
            format!("signal is {}, expected pending", signal.status.as_str()),
        ));
    }

    ata_db::trades::upsert_trade_approval(
        &st.pool,
        &TradeApproval {
            signal_id: id,
            orchestration_run_id: signal.orchestration_run_id,
            approved: true,
            approved_by: body.approved_by.clone(),
            approved_at: Utc::now(),
            modification_notes: body.modification_notes,
            order_id: None,
        },
    )
    .await?;

    // Detached execution; failures surface on the trade row and in the log.
    let executor = Arc::clone(&st.executor);
    let approver = body.approved_by;
    tokio::spawn(async move {
        if let Err(e) = executor.execute_signal(id, &approver).await {
            warn!(signal_id = %id, error = %e, "detached execution failed");
        }
    });

    Ok(Json(SignalDecisionResponse {
        signal_id: id,
        status: "approved",
    }))
}

pub(crate) async fn signal_reject(
    State(st): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
    Json(body): Json<RejectSignalRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let signal = ata_db::signals::fetch_signal(&st.pool, id)
        .await?
        .ok_or_else(|| ApiError::not_found(format!("signal {id} not found")))?;

    let moved = ata_db::signals::update_signal_status(
        &st.pool,
        id,
        SignalStatus::Pending,
        SignalStatus::Rejected,
    )
    .await?;
    if !moved {
        return Err(ApiError::new(
            StatusCode::CONFLICT,
            "illegal_transition",
            format!("signal is {}, expected pending", signal.status.as_str()),
        ));
    }

    ata_db::trades::upsert_trade_approval(
        &st.pool,
        &TradeApproval {
            signal_id: id,
            orchestration_run_id: signal.orchestration_run_id,
            approved: false,
            approved_by: body.approved_by,
            approved_at: Utc::now(),
            modification_notes: body.rejection_reason,
            order_id: None,
        },
    )
    .await?;

    Ok(Json(SignalDecisionResponse {
        signal_id: id,
        status: "rejected",
    }))
}

pub(crate) async fn signal_analyze(
    State(st): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
    Json(body): Json<AnalyzeSignalRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let signal = ata_db::signals::fetch_signal(&st.pool, id)
        .await?
        .ok_or_else(|| ApiError::not_found(format!("signal {id} not found")))?;

    let mut req = OrchestrateRequest::from_signal(&signal.symbol, signal.id);
    req.user_context = body.context;

    let run = Arc::clone(&st.orchestrator).begin(req).await?;
    Ok((
        StatusCode::ACCEPTED,
        Json(RunStartedResponse {
            run_id: run.id,
            status: "running",
        }),
    ))
}

// ---------------------------------------------------------------------------
// Orchestration
// ---------------------------------------------------------------------------

pub(crate) async fn orchestrate_start(
    State(st): State<Arc<AppState>>,
    Json(body): Json<OrchestrateBody>,
) -> Result<impl IntoResponse, ApiError> {
    if body.symbol.trim().is_empty() {
        return Err(ApiError::validation("symbol is required"));
    }

    // A referenced strategy must exist in the current registry snapshot; a
    // revoked artifact disappears at the next reload and turns into a 404.
    if let Some(strategy) = &body.strategy {
        let registry = st.registry.read().await.clone();
        if registry.get(strategy).is_none() {
            return Err(ApiError::not_found(format!(
                "strategy {strategy} is not registered"
            )));
        }
    }

    let mut req = OrchestrateRequest::manual(&body.symbol.trim().to_ascii_uppercase());
    req.bank = body.bank;
    req.user_context = body.context;
    req.constraints = body.constraints;
    req.research_queries = body.research_queries;

    let run = Arc::clone(&st.orchestrator).begin(req).await?;
    Ok((
        StatusCode::ACCEPTED,
        Json(RunStartedResponse {
            run_id: run.id,
            status: "running",
        }),
    ))
}

pub(crate) async fn run_detail(
    State(st): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
) -> Result<impl IntoResponse, ApiError> {
    let run = ata_db::orchestration::fetch_run(&st.pool, id)
        .await?
        .ok_or_else(|| ApiError::not_found(format!("orchestration run {id} not found")))?;
    Ok(Json(run))
}

pub(crate) async fn run_list(
    State(st): State<Arc<AppState>>,
    Query(q): Query<ListRunsQuery>,
) -> Result<impl IntoResponse, ApiError> {
    let runs =
        ata_db::orchestration::list_runs(&st.pool, q.limit.unwrap_or(50).clamp(1, 500)).await?;
    Ok(Json(RunListResponse { runs }))
}

// ---------------------------------------------------------------------------
// Trades
// ---------------------------------------------------------------------------

pub(crate) async fn execute(
    State(st): State<Arc<AppState>>,
    Json(body): Json<ExecuteRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let outcome = st
        .executor
        .execute_signal(body.signal_id, &body.approved_by)
        .await?;
    Ok(Json(outcome))
}

pub(crate) async fn trade_list(
    State(st): State<Arc<AppState>>,
    Query(q): Query<ListTradesQuery>,
) -> Result<impl IntoResponse, ApiError> {
    let trades = ata_db::trades::list_trades(
        &st.pool,
        q.symbol.as_deref(),
        q.strategy.as_deref(),
        q.limit.unwrap_or(50).clamp(1, 500),
    )
    .await?;
    Ok(Json(TradeListResponse { trades }))
}

pub(crate) async fn trade_detail(
    State(st): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
) -> Result<impl IntoResponse, ApiError> {
    let trade = ata_db::trades::fetch_trade(&st.pool, id)
        .await?
        .ok_or_else(|| ApiError::not_found(format!("trade {id} not found")))?;
    Ok(Json(trade))
}
