//! HTTP clients for the external collaborators: memory facade, planner,
//! research. Each is behind a trait so the pipeline can be exercised with
//! in-process mocks.

use std::time::Duration;

use async_trait::async_trait;
use ata_schemas::MemoryItem;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

// ---------------------------------------------------------------------------
// Upstream error
// ---------------------------------------------------------------------------

/// Failure talking to an upstream collaborator.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UpstreamError {
    Transport(String),
    Api { status: u16, message: String },
    Decode(String),
}

impl std::fmt::Display for UpstreamError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            UpstreamError::Transport(msg) => write!(f, "transport error: {msg}"),
            UpstreamError::Api { status, message } => {
                write!(f, "upstream api error status={status}: {message}")
            }
            UpstreamError::Decode(msg) => write!(f, "decode error: {msg}"),
        }
    }
}

impl std::error::Error for UpstreamError {}

async fn decode<T: serde::de::DeserializeOwned>(
    resp: Result<reqwest::Response, reqwest::Error>,
) -> Result<T, UpstreamError> {
    let resp = resp.map_err(|e| UpstreamError::Transport(e.to_string()))?;
    let status = resp.status();
    if !status.is_success() {
        let message = resp.text().await.unwrap_or_default();
        return Err(UpstreamError::Api {
            status: status.as_u16(),
            message,
        });
    }
    resp.json::<T>()
        .await
        .map_err(|e| UpstreamError::Decode(e.to_string()))
}

// ---------------------------------------------------------------------------
// Memory facade
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize)]
pub struct RecallQuery {
    pub symbol: String,
    pub tags: Vec<String>,
    pub limit: u32,
}

/// Bank-scoped retain/recall/reflect over the external long-term memory
/// store. `reflect` is an opaque pass-through pending a settled contract.
#[async_trait]
pub trait MemoryFacade: Send + Sync {
    async fn recall(&self, bank: &str, query: &RecallQuery)
        -> Result<Vec<MemoryItem>, UpstreamError>;

    async fn retain(&self, bank: &str, item: &MemoryItem) -> Result<(), UpstreamError>;

    async fn reflect(&self, input: Value) -> Result<Value, UpstreamError>;
}

/// Memory facade speaking the `POST /tools` envelope.
pub struct HttpMemory {
    base_url: String,
    client: reqwest::Client,
}

impl HttpMemory {
    pub fn new(base_url: &str, timeout: Duration) -> Result<Self, UpstreamError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| UpstreamError::Transport(e.to_string()))?;
        Ok(Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            client,
        })
    }

    async fn tool_call<T: serde::de::DeserializeOwned>(
        &self,
        tool: &str,
        input: Value,
    ) -> Result<T, UpstreamError> {
        decode(
            self.client
                .post(format!("{}/tools", self.base_url))
                .json(&json!({"tool": tool, "input": input}))
                .send()
                .await,
        )
        .await
    }
}

#[derive(Debug, Deserialize)]
struct RecallResponse {
    #[serde(default)]
    items: Vec<MemoryItem>,
}

#[async_trait]
impl MemoryFacade for HttpMemory {
    async fn recall(
        &self,
        bank: &str,
        query: &RecallQuery,
    ) -> Result<Vec<MemoryItem>, UpstreamError> {
        let resp: RecallResponse = self
            .tool_call(
                "memory.recall",
                json!({"bank": bank, "query": query, "limit": query.limit}),
            )
            .await?;
        Ok(resp.items)
    }

    async fn retain(&self, bank: &str, item: &MemoryItem) -> Result<(), UpstreamError> {
        let _: Value = self
            .tool_call("memory.retain", json!({"bank": bank, "item": item}))
            .await?;
        Ok(())
    }

    async fn reflect(&self, input: Value) -> Result<Value, UpstreamError> {
        self.tool_call("memory.reflect", input).await
    }
}

// ---------------------------------------------------------------------------
// Planner
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize)]
pub struct PlanRequest {
    pub task: String,
    pub context: String,
    pub symbol: String,
    pub constraints: Value,
    pub memories: Vec<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PlanAction {
    Buy,
    Sell,
    Hold,
    Watch,
    Skipped,
}

impl PlanAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            PlanAction::Buy => "buy",
            PlanAction::Sell => "sell",
            PlanAction::Hold => "hold",
            PlanAction::Watch => "watch",
            PlanAction::Skipped => "skipped",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlanStep {
    pub description: String,
    /// Tool to invoke for this step, when any.
    #[serde(default)]
    pub tool: Option<String>,
    #[serde(default)]
    pub args: Value,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlanResponse {
    pub summary: String,
    #[serde(default)]
    pub steps: Vec<PlanStep>,
    pub action: PlanAction,
    pub confidence: f64,
    #[serde(default)]
    pub reasoning_notes: String,
}

/// Planner failures are split because the run-failure reason differs:
/// malformed output is terminal (`planner_malformed`) and never retried.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PlannerError {
    Malformed(String),
    Upstream(UpstreamError),
}

impl std::fmt::Display for PlannerError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PlannerError::Malformed(msg) => write!(f, "planner returned malformed plan: {msg}"),
            PlannerError::Upstream(e) => write!(f, "planner upstream failure: {e}"),
        }
    }
}

impl std::error::Error for PlannerError {}

/// The planner is a black box; the contract is the field set of
/// [`PlanRequest`] / [`PlanResponse`] only.
#[async_trait]
pub trait Planner: Send + Sync {
    async fn plan(&self, req: &PlanRequest) -> Result<PlanResponse, PlannerError>;
}

pub struct HttpPlanner {
    base_url: String,
    client: reqwest::Client,
}

impl HttpPlanner {
    pub fn new(base_url: &str, timeout: Duration) -> Result<Self, UpstreamError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| UpstreamError::Transport(e.to_string()))?;
        Ok(Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            client,
        })
    }
}

#[async_trait]
impl Planner for HttpPlanner {
    async fn plan(&self, req: &PlanRequest) -> Result<PlanResponse, PlannerError> {
        let resp = self
            .client
            .post(format!("{}/v1/plan", self.base_url))
            .json(req)
            .send()
            .await
            .map_err(|e| PlannerError::Upstream(UpstreamError::Transport(e.to_string())))?;

        let status = resp.status();
        if !status.is_success() {
            let message = resp.text().await.unwrap_or_default();
            return Err(PlannerError::Upstream(UpstreamError::Api {
                status: status.as_u16(),
                message,
            }));
        }

        // A 200 with an undecodable body is malformed planner output, not a
        // transport problem; it must not be retried.
        let body = resp
            .text()
            .await
            .map_err(|e| PlannerError::Upstream(UpstreamError::Transport(e.to_string())))?;
        serde_json::from_str::<PlanResponse>(&body).map_err(|e| PlannerError::Malformed(e.to_string()))
    }
}

// ---------------------------------------------------------------------------
// Research
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResearchReport {
    pub summary: String,
    #[serde(default)]
    pub key_points: Vec<String>,
    #[serde(default)]
    pub metrics: Value,
}

#[async_trait]
pub trait Research: Send + Sync {
    async fn company_research(
        &self,
        symbol: &str,
        queries: &[String],
    ) -> Result<ResearchReport, UpstreamError>;
}

pub struct HttpResearch {
    base_url: String,
    client: reqwest::Client,
}

impl HttpResearch {
    pub fn new(base_url: &str, timeout: Duration) -> Result<Self, UpstreamError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| UpstreamError::Transport(e.to_string()))?;
        Ok(Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            client,
        })
    }
}

#[async_trait]
impl Research for HttpResearch {
    async fn company_research(
        &self,
        symbol: &str,
        queries: &[String],
    ) -> Result<ResearchReport, UpstreamError> {
        decode(
            self.client
                .post(format!("{}/research", self.base_url))
                .json(&json!({"symbol": symbol, "queries": queries}))
                .send()
                .await,
        )
        .await
    }
}
