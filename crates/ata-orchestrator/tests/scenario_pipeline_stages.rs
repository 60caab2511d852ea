//! Pipeline behavior against a real database with in-process collaborator
//! mocks: stage ordering, signal linking, planner failure modes,
//! cancellation, and per-symbol coalescing.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use ata_config::OrchestrationConfig;
use ata_orchestrator::{
    MemoryFacade, OrchError, OrchestrateRequest, Orchestrator, PlanAction, PlanRequest,
    PlanResponse, PlanStep, Planner, PlannerError, RecallQuery, Research, ResearchReport,
    UpstreamError, CANCELLED, PLANNER_MALFORMED,
};
use ata_schemas::{
    MemoryItem, OrchestrationStatus, Signal, SignalStatus, SignalType, TriggerType,
};
use chrono::Utc;
use serde_json::{json, Value};
use sqlx::PgPool;
use uuid::Uuid;

async fn pool_or_skip() -> Option<PgPool> {
    if std::env::var(ata_db::ENV_DB_URL).is_err() {
        eprintln!("skipping: DATABASE_URL not set");
        return None;
    }
    Some(ata_db::testkit_db_pool().await.expect("db pool"))
}

fn cfg() -> OrchestrationConfig {
    OrchestrationConfig {
        memory_url: None,
        planner_url: None,
        research_url: None,
        recall_limit: 8,
        gather_limit: 5,
        memory_timeout_secs: 5,
        planner_timeout_secs: 30,
        research_timeout_secs: 30,
    }
}

// ---------------------------------------------------------------------------
// Collaborator mocks
// ---------------------------------------------------------------------------

#[derive(Default)]
struct MockMemory {
    recalled: Vec<MemoryItem>,
    retained: Mutex<Vec<(String, MemoryItem)>>,
}

#[async_trait]
impl MemoryFacade for MockMemory {
    async fn recall(
        &self,
        _bank: &str,
        _query: &RecallQuery,
    ) -> Result<Vec<MemoryItem>, UpstreamError> {
        Ok(self.recalled.clone())
    }

    async fn retain(&self, bank: &str, item: &MemoryItem) -> Result<(), UpstreamError> {
        self.retained
            .lock()
            .unwrap()
            .push((bank.to_string(), item.clone()));
        Ok(())
    }

    async fn reflect(&self, input: Value) -> Result<Value, UpstreamError> {
        Ok(json!({"echo": input}))
    }
}

struct MockPlanner {
    response: Result<PlanResponse, PlannerError>,
    delay: Duration,
}

#[async_trait]
impl Planner for MockPlanner {
    async fn plan(&self, _req: &PlanRequest) -> Result<PlanResponse, PlannerError> {
        tokio::time::sleep(self.delay).await;
        self.response.clone()
    }
}

struct MockResearch;

#[async_trait]
impl Research for MockResearch {
    async fn company_research(
        &self,
        symbol: &str,
        _queries: &[String],
    ) -> Result<ResearchReport, UpstreamError> {
        Ok(ResearchReport {
            summary: format!("{symbol} earnings beat"),
            key_points: vec!["margin expansion".to_string()],
            metrics: json!({"pe": 28.0}),
        })
    }
}

fn buy_plan() -> PlanResponse {
    PlanResponse {
        summary: "Enter long on oversold bounce".to_string(),
        steps: vec![PlanStep {
            description: "sanity-check prior sizing".to_string(),
            tool: Some("memory.reflect".to_string()),
            args: json!({"query": "sizing"}),
        }],
        action: PlanAction::Buy,
        confidence: 0.82,
        reasoning_notes: "memory and signals agree".to_string(),
    }
}

fn memory_item(summary: &str) -> MemoryItem {
    MemoryItem {
        bank: "decisions".to_string(),
        summary: summary.to_string(),
        content: String::new(),
        metadata: Value::Null,
        created_at: None,
    }
}

async fn seed_pending_signal(pool: &PgPool, symbol: &str) -> Signal {
    let now = Utc::now();
    let signal = Signal {
        id: Uuid::new_v4(),
        symbol: symbol.to_string(),
        strategy_id: format!("rsi_momentum@{}", Uuid::new_v4()),
        signal_type: SignalType::Buy,
        confidence: 0.8,
        entry_price: 150.0,
        stop_loss: 145.0,
        take_profit: 160.0,
        reasoning: "oversold".to_string(),
        status: SignalStatus::Pending,
        generated_at: now,
        expires_at: now + chrono::Duration::hours(24),
        orchestration_run_id: None,
        created_at: now,
    };
    assert!(ata_db::signals::insert_signal(pool, &signal).await.unwrap());
    signal
}

fn unique_symbol() -> String {
    format!("TK{}", &Uuid::new_v4().simple().to_string()[..8].to_uppercase())
}

// ---------------------------------------------------------------------------
// Scenarios
// ---------------------------------------------------------------------------

#[tokio::test]
async fn completed_run_walks_all_seven_stages_in_order() {
    let Some(pool) = pool_or_skip().await else {
        return;
    };
    let symbol = unique_symbol();
    let signal = seed_pending_signal(&pool, &symbol).await;

    let memory = Arc::new(MockMemory {
        recalled: vec![memory_item("cut losses fast last time"), memory_item("avoid earnings week")],
        retained: Mutex::new(Vec::new()),
    });
    let orch = Arc::new(Orchestrator::new(
        pool.clone(),
        cfg(),
        Some(memory.clone()),
        Some(Arc::new(MockPlanner {
            response: Ok(buy_plan()),
            delay: Duration::ZERO,
        })),
        Some(Arc::new(MockResearch)),
    ));

    let mut req = OrchestrateRequest::from_signal(&symbol, signal.id);
    req.research_queries = vec!["latest earnings".to_string()];
    let outcome = orch.clone().run_to_completion(req).await.expect("outcome");

    // Stage order is the seven-stage contract; timestamps never go backwards.
    let names: Vec<&str> = outcome.stages.iter().map(|s| s.stage).collect();
    assert_eq!(
        names,
        vec![
            "recall",
            "gather",
            "research",
            "build_context",
            "plan",
            "execute_tools",
            "retain"
        ]
    );
    assert!(outcome.stages.windows(2).all(|w| w[0].at <= w[1].at));

    let run = &outcome.run;
    assert_eq!(run.status, OrchestrationStatus::Completed);
    assert_eq!(run.trigger_type, TriggerType::Signal);
    assert_eq!(run.trigger_id, Some(signal.id));
    assert_eq!(run.agent_suggestion.as_deref(), Some("buy"));
    assert_eq!(run.confidence, Some(0.82));
    assert_eq!(run.memories_recalled, 2);
    assert!(run.completed_at.is_some());

    // The triggering signal points back at the run.
    let linked = ata_db::signals::fetch_signal(&pool, signal.id)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(linked.orchestration_run_id, Some(run.id));

    // Retained decision carries research provenance.
    let retained = memory.retained.lock().unwrap();
    assert_eq!(retained.len(), 1);
    let (bank, item) = &retained[0];
    assert_eq!(bank, "decisions");
    assert_eq!(item.metadata["research_used"], json!(true));
    assert_eq!(item.metadata["action"], json!("buy"));
}

#[tokio::test]
async fn malformed_planner_output_fails_run_without_retry() {
    let Some(pool) = pool_or_skip().await else {
        return;
    };
    let symbol = unique_symbol();

    let orch = Arc::new(Orchestrator::new(
        pool.clone(),
        cfg(),
        None,
        Some(Arc::new(MockPlanner {
            response: Err(PlannerError::Malformed("action: yolo".to_string())),
            delay: Duration::ZERO,
        })),
        None,
    ));

    let outcome = orch
        .run_to_completion(OrchestrateRequest::manual(&symbol))
        .await
        .expect("outcome");
    assert_eq!(outcome.run.status, OrchestrationStatus::Failed);
    assert_eq!(outcome.run.error.as_deref(), Some(PLANNER_MALFORMED));
}

#[tokio::test]
async fn missing_planner_fails_run() {
    let Some(pool) = pool_or_skip().await else {
        return;
    };
    let orch = Arc::new(Orchestrator::new(pool.clone(), cfg(), None, None, None));

    let outcome = orch
        .run_to_completion(OrchestrateRequest::manual(&unique_symbol()))
        .await
        .expect("outcome");
    assert_eq!(outcome.run.status, OrchestrationStatus::Failed);
    assert!(outcome
        .run
        .error
        .as_deref()
        .unwrap()
        .contains("planner not configured"));
}

#[tokio::test]
async fn expired_deadline_cancels_at_first_stage_boundary() {
    let Some(pool) = pool_or_skip().await else {
        return;
    };
    let orch = Arc::new(Orchestrator::new(
        pool.clone(),
        cfg(),
        None,
        Some(Arc::new(MockPlanner {
            response: Ok(buy_plan()),
            delay: Duration::ZERO,
        })),
        None,
    ));

    let mut req = OrchestrateRequest::manual(&unique_symbol());
    req.timeout = Some(Duration::ZERO);
    let outcome = orch.clone().run_to_completion(req).await.expect("outcome");

    assert_eq!(outcome.run.status, OrchestrationStatus::Failed);
    assert_eq!(outcome.run.error.as_deref(), Some(CANCELLED));
    assert!(outcome.stages.is_empty());
}

#[tokio::test]
async fn second_trigger_for_same_symbol_coalesces() {
    let Some(pool) = pool_or_skip().await else {
        return;
    };
    let symbol = unique_symbol();

    let orch = Arc::new(Orchestrator::new(
        pool.clone(),
        cfg(),
        None,
        Some(Arc::new(MockPlanner {
            response: Ok(buy_plan()),
            delay: Duration::from_millis(300),
        })),
        None,
    ));

    let first = orch
        .clone()
        .begin(OrchestrateRequest::manual(&symbol))
        .await
        .expect("first run");

    // While the first run is in flight, a second trigger for the same
    // symbol is refused; a different symbol is unaffected.
    let err = orch
        .clone()
        .begin(OrchestrateRequest::manual(&symbol))
        .await
        .unwrap_err();
    assert!(matches!(
        err.downcast_ref::<OrchError>(),
        Some(OrchError::InFlight { .. })
    ));
    orch.clone().begin(OrchestrateRequest::manual(&unique_symbol()))
        .await
        .expect("other symbol runs");

    // Wait for the detached pipeline to settle, then the symbol is free.
    let mut settled = false;
    for _ in 0..50 {
        tokio::time::sleep(Duration::from_millis(50)).await;
        let run = ata_db::orchestration::fetch_run(&pool, first.id)
            .await
            .unwrap()
            .unwrap();
        if run.status != OrchestrationStatus::Running {
            settled = true;
            assert_eq!(run.status, OrchestrationStatus::Completed);
            break;
        }
    }
    assert!(settled, "first run never settled");

    orch.clone().begin(OrchestrateRequest::manual(&symbol))
        .await
        .expect("symbol free after completion");
}
