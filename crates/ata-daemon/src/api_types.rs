//! Request/response DTOs and the error envelope for the HTTP surface.
//!
//! Every user-visible failure carries the error `kind`, a short message and
//! a correlation id that also appears in the logs.

use ata_artifacts::{Approval, Artifact, ArtifactError, RiskProfile, ValidationReport};
use ata_execution::{ExecError, RiskRefusal};
use ata_orchestrator::OrchError;
use ata_schemas::{OrchestrationRun, Signal, Trade};
use ata_signal::SymbolOutcome;
use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{error, warn};
use uuid::Uuid;

// ---------------------------------------------------------------------------
// Error envelope
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize)]
pub struct ErrorBody {
    pub kind: &'static str,
    pub message: String,
    pub correlation_id: Uuid,
}

#[derive(Debug)]
pub struct ApiError {
    pub status: StatusCode,
    pub body: ErrorBody,
}

impl ApiError {
    pub fn new(status: StatusCode, kind: &'static str, message: impl Into<String>) -> Self {
        let body = ErrorBody {
            kind,
            message: message.into(),
            correlation_id: Uuid::new_v4(),
        };
        warn!(
            kind = body.kind,
            correlation_id = %body.correlation_id,
            message = %body.message,
            "request refused"
        );
        Self { status, body }
    }

    pub fn validation(message: impl Into<String>) -> Self {
        Self::new(StatusCode::BAD_REQUEST, "validation", message)
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self::new(StatusCode::NOT_FOUND, "not_found", message)
    }

    /// Classify an `anyhow::Error` bubbled out of the domain layers.
    pub fn from_domain(err: anyhow::Error) -> Self {
        if let Some(e) = err.downcast_ref::<ArtifactError>() {
            return match e {
                ArtifactError::DuplicateHash { .. } => {
                    Self::new(StatusCode::CONFLICT, "data", e.to_string())
                }
                ArtifactError::IllegalTransition { .. } => {
                    Self::new(StatusCode::CONFLICT, "illegal_transition", e.to_string())
                }
                ArtifactError::NotFound { .. } => Self::not_found(e.to_string()),
            };
        }

        if let Some(e) = err.downcast_ref::<ExecError>() {
            return match e {
                ExecError::SignalNotFound { .. } => Self::not_found(e.to_string()),
                ExecError::Validation(_) | ExecError::ZeroStopDistance => {
                    Self::validation(e.to_string())
                }
                ExecError::RiskGate(refusal) => {
                    let message = match refusal {
                        RiskRefusal::DailyLossLimit { .. } => format!("DailyLossLimit: {refusal}"),
                        RiskRefusal::TooManyPositions { .. } => {
                            format!("TooManyPositions: {refusal}")
                        }
                        RiskRefusal::ExecutionDisabled => format!("ExecutionDisabled: {refusal}"),
                    };
                    Self::new(StatusCode::CONFLICT, "risk_gate", message)
                }
                ExecError::InsufficientBuyingPower { .. } => {
                    Self::new(StatusCode::CONFLICT, "risk_gate", e.to_string())
                }
                ExecError::Upstream(_) => {
                    Self::new(StatusCode::BAD_GATEWAY, "upstream", e.to_string())
                }
            };
        }

        if let Some(e) = err.downcast_ref::<OrchError>() {
            return match e {
                OrchError::InFlight { .. } => {
                    Self::new(StatusCode::CONFLICT, "risk_gate", e.to_string())
                }
            };
        }

        error!(error = %err, "internal error");
        Self::new(
            StatusCode::INTERNAL_SERVER_ERROR,
            "internal",
            "internal error",
        )
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (self.status, Json(serde_json::json!({ "error": self.body }))).into_response()
    }
}

impl From<anyhow::Error> for ApiError {
    fn from(err: anyhow::Error) -> Self {
        Self::from_domain(err)
    }
}

// ---------------------------------------------------------------------------
// Health / status
// ---------------------------------------------------------------------------

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub ok: bool,
    pub service: &'static str,
    pub version: &'static str,
    pub db_ok: bool,
    pub ingest_degraded: bool,
}

#[derive(Debug, Serialize)]
pub struct StatusResponse {
    pub registry_size: usize,
    pub strategies: Vec<String>,
    pub watchlist: Vec<String>,
    pub execution_enabled: bool,
    pub auto_orchestration_enabled: bool,
}

// ---------------------------------------------------------------------------
// Artifacts
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
pub struct CreateArtifactRequest {
    pub strategy_name: String,
    pub strategy_version: String,
    #[serde(default)]
    pub params: Value,
    pub risk_profile: RiskProfile,
    pub created_by: String,
}

#[derive(Debug, Serialize)]
pub struct ArtifactResponse {
    #[serde(flatten)]
    pub artifact: Artifact,
    pub state: ata_artifacts::ApprovalState,
}

#[derive(Debug, Serialize)]
pub struct ArtifactDetailResponse {
    pub artifact: Artifact,
    pub approval: Approval,
    pub validation_reports: Vec<ValidationReport>,
}

#[derive(Debug, Deserialize)]
pub struct ListArtifactsQuery {
    /// `approved` filters to APPROVED/ACTIVE; anything else (or absent) is
    /// the full list.
    pub state: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct ValidateResponse {
    pub passed: bool,
    pub metrics: Value,
    pub errors: Vec<String>,
    pub warnings: Vec<String>,
}

#[derive(Debug, Deserialize)]
pub struct PromoteRequest {
    pub to_state: String,
    pub promoted_by: String,
    #[serde(default)]
    pub reason: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct ReloadResponse {
    pub registry_size: usize,
}

// ---------------------------------------------------------------------------
// Signals
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
pub struct GenerateRequest {
    pub symbols: Vec<String>,
}

#[derive(Debug, Serialize)]
pub struct GenerateResponse {
    pub signals: Vec<Signal>,
    pub outcomes: Vec<SymbolOutcome>,
    pub count: usize,
    /// Wall-clock seconds spent evaluating the batch.
    pub duration: f64,
}

#[derive(Debug, Deserialize)]
pub struct ListSignalsQuery {
    pub symbol: Option<String>,
    pub limit: Option<i64>,
}

#[derive(Debug, Deserialize)]
pub struct ApproveSignalRequest {
    pub approved_by: String,
    #[serde(default)]
    pub modification_notes: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct RejectSignalRequest {
    pub approved_by: String,
    #[serde(default)]
    pub rejection_reason: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct SignalDecisionResponse {
    pub signal_id: Uuid,
    pub status: &'static str,
}

#[derive(Debug, Deserialize)]
pub struct AnalyzeSignalRequest {
    #[serde(default)]
    pub context: Option<String>,
}

// ---------------------------------------------------------------------------
// Orchestration
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
pub struct OrchestrateBody {
    pub symbol: String,
    #[serde(default)]
    pub strategy: Option<String>,
    #[serde(default)]
    pub bank: Option<String>,
    #[serde(default)]
    pub context: Option<String>,
    #[serde(default)]
    pub constraints: Value,
    #[serde(default)]
    pub research_queries: Vec<String>,
}

#[derive(Debug, Serialize)]
pub struct RunStartedResponse {
    pub run_id: Uuid,
    pub status: &'static str,
}

#[derive(Debug, Serialize)]
pub struct RunListResponse {
    pub runs: Vec<OrchestrationRun>,
}

#[derive(Debug, Deserialize)]
pub struct ListRunsQuery {
    pub limit: Option<i64>,
}

// ---------------------------------------------------------------------------
// Trades
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
pub struct ExecuteRequest {
    pub signal_id: Uuid,
    pub approved_by: String,
}

#[derive(Debug, Deserialize)]
pub struct ListTradesQuery {
    pub symbol: Option<String>,
    pub strategy: Option<String>,
    pub limit: Option<i64>,
}

#[derive(Debug, Serialize)]
pub struct TradeListResponse {
    pub trades: Vec<Trade>,
}
