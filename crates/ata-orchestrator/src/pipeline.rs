//! The seven-stage enrichment pipeline:
//! recall -> gather signals -> research -> build context -> plan ->
//! execute tools -> retain.
//!
//! Stages are strictly sequential per run; sibling runs are independent. A
//! deadline is checked at every stage boundary; when it fires the run is
//! marked failed with reason `cancelled` and nothing downstream is persisted.
//! A per-symbol in-flight guard bounds the auto-trigger path to one run per
//! symbol at a time.

use std::collections::HashSet;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use ata_config::OrchestrationConfig;
use ata_schemas::{MemoryItem, OrchestrationRun, Signal, TriggerType};
use chrono::{DateTime, Utc};
use serde_json::{json, Value};
use sqlx::PgPool;
use tracing::{info, warn};
use uuid::Uuid;

use crate::clients::{
    MemoryFacade, PlanRequest, PlanResponse, Planner, PlannerError, RecallQuery, Research,
    ResearchReport,
};

pub const DEFAULT_BANK: &str = "decisions";
pub const CANCELLED: &str = "cancelled";
pub const PLANNER_MALFORMED: &str = "planner_malformed";

// ---------------------------------------------------------------------------
// Request / outcome
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct OrchestrateRequest {
    pub symbol: String,
    pub trigger_type: TriggerType,
    /// Signal that triggered this run, when `trigger_type = signal`.
    pub trigger_id: Option<Uuid>,
    /// Memory bank; defaults to `decisions`.
    pub bank: Option<String>,
    pub user_context: Option<String>,
    pub constraints: Value,
    pub research_queries: Vec<String>,
    /// Overall pipeline deadline; `None` means no external cancellation.
    pub timeout: Option<Duration>,
}

impl OrchestrateRequest {
    pub fn manual(symbol: &str) -> Self {
        Self {
            symbol: symbol.to_string(),
            trigger_type: TriggerType::Manual,
            trigger_id: None,
            bank: None,
            user_context: None,
            constraints: Value::Null,
            research_queries: Vec::new(),
            timeout: None,
        }
    }

    pub fn from_signal(symbol: &str, signal_id: Uuid) -> Self {
        Self {
            trigger_type: TriggerType::Signal,
            trigger_id: Some(signal_id),
            ..Self::manual(symbol)
        }
    }
}

/// One stage-boundary timestamp; `completed` runs carry all seven in order.
#[derive(Debug, Clone)]
pub struct StageLog {
    pub stage: &'static str,
    pub at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct OrchestrationOutcome {
    pub run: OrchestrationRun,
    pub stages: Vec<StageLog>,
}

/// Refusals surfaced by [`Orchestrator::begin`] before a run row exists.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OrchError {
    /// A run for this symbol is already in flight; the trigger coalesces.
    InFlight { symbol: String },
}

impl std::fmt::Display for OrchError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            OrchError::InFlight { symbol } => {
                write!(f, "orchestration already in flight for {symbol}")
            }
        }
    }
}

impl std::error::Error for OrchError {}

// ---------------------------------------------------------------------------
// In-flight guard
// ---------------------------------------------------------------------------

struct InFlightGuard {
    symbol: String,
    set: Arc<Mutex<HashSet<String>>>,
}

impl Drop for InFlightGuard {
    fn drop(&mut self) {
        self.set.lock().unwrap().remove(&self.symbol);
    }
}

// ---------------------------------------------------------------------------
// Orchestrator
// ---------------------------------------------------------------------------

pub struct Orchestrator {
    pool: PgPool,
    cfg: OrchestrationConfig,
    memory: Option<Arc<dyn MemoryFacade>>,
    planner: Option<Arc<dyn Planner>>,
    research: Option<Arc<dyn Research>>,
    in_flight: Arc<Mutex<HashSet<String>>>,
}

impl Orchestrator {
    pub fn new(
        pool: PgPool,
        cfg: OrchestrationConfig,
        memory: Option<Arc<dyn MemoryFacade>>,
        planner: Option<Arc<dyn Planner>>,
        research: Option<Arc<dyn Research>>,
    ) -> Self {
        Self {
            pool,
            cfg,
            memory,
            planner,
            research,
            in_flight: Arc::new(Mutex::new(HashSet::new())),
        }
    }

    fn try_acquire(&self, symbol: &str) -> Result<InFlightGuard, OrchError> {
        let mut set = self.in_flight.lock().unwrap();
        if !set.insert(symbol.to_string()) {
            return Err(OrchError::InFlight {
                symbol: symbol.to_string(),
            });
        }
        Ok(InFlightGuard {
            symbol: symbol.to_string(),
            set: Arc::clone(&self.in_flight),
        })
    }

    /// Create the run row and detach the pipeline. Returns immediately with
    /// the run in `running`; the caller polls `GET /orchestrate/runs/{id}`.
    pub async fn begin(
        self: Arc<Self>,
        req: OrchestrateRequest,
    ) -> Result<OrchestrationRun, anyhow::Error> {
        let guard = self.try_acquire(&req.symbol)?;

        let run =
            ata_db::orchestration::insert_run(&self.pool, &req.symbol, req.trigger_type, req.trigger_id)
                .await?;

        // Link the triggering signal before detaching so the reference is
        // visible immediately.
        if let Some(signal_id) = req.trigger_id {
            ata_db::signals::link_orchestration_run(&self.pool, signal_id, run.id).await?;
        }

        let run_id = run.id;
        tokio::spawn(async move {
            let _guard = guard;
            self.drive(run_id, req).await;
        });

        Ok(run)
    }

    /// Run the full pipeline inline (tests and scheduled invocations).
    pub async fn run_to_completion(
        self: Arc<Self>,
        req: OrchestrateRequest,
    ) -> Result<OrchestrationOutcome, anyhow::Error> {
        let guard = self.try_acquire(&req.symbol)?;
        let run =
            ata_db::orchestration::insert_run(&self.pool, &req.symbol, req.trigger_type, req.trigger_id)
                .await?;
        if let Some(signal_id) = req.trigger_id {
            ata_db::signals::link_orchestration_run(&self.pool, signal_id, run.id).await?;
        }

        let stages = {
            let _guard = guard;
            self.drive(run.id, req).await
        };

        let run = ata_db::orchestration::fetch_run(&self.pool, run.id)
            .await?
            .expect("run row exists");
        Ok(OrchestrationOutcome { run, stages })
    }

    /// Execute the stages and settle the run row. Returns the stage log.
    async fn drive(&self, run_id: Uuid, req: OrchestrateRequest) -> Vec<StageLog> {
        match self.pipeline(run_id, &req).await {
            Ok((plan, memories_recalled, stages)) => {
                let settled = ata_db::orchestration::complete_run(
                    &self.pool,
                    run_id,
                    plan.action.as_str(),
                    plan.confidence,
                    &plan.reasoning_notes,
                    memories_recalled,
                )
                .await;
                if let Err(e) = settled {
                    warn!(run_id = %run_id, error = %e, "run completion persist failed");
                }
                info!(
                    run_id = %run_id,
                    symbol = %req.symbol,
                    action = plan.action.as_str(),
                    confidence = plan.confidence,
                    "orchestration completed"
                );
                stages
            }
            Err((reason, stages)) => {
                if let Err(e) = ata_db::orchestration::fail_run(&self.pool, run_id, &reason).await {
                    warn!(run_id = %run_id, error = %e, "run failure persist failed");
                }
                warn!(run_id = %run_id, symbol = %req.symbol, reason, "orchestration failed");
                stages
            }
        }
    }

    /// The seven stages. On error the accumulated stage log is returned so
    /// the caller can still observe how far the run got.
    async fn pipeline(
        &self,
        run_id: Uuid,
        req: &OrchestrateRequest,
    ) -> Result<(PlanResponse, i32, Vec<StageLog>), (String, Vec<StageLog>)> {
        let deadline = req.timeout.map(|t| Instant::now() + t);
        let bank = req.bank.as_deref().unwrap_or(DEFAULT_BANK);
        let mut stages: Vec<StageLog> = Vec::with_capacity(7);

        let enter = |stage: &'static str, stages: &mut Vec<StageLog>| -> Result<(), String> {
            if let Some(d) = deadline {
                if Instant::now() >= d {
                    return Err(CANCELLED.to_string());
                }
            }
            stages.push(StageLog {
                stage,
                at: Utc::now(),
            });
            Ok(())
        };

        macro_rules! stage {
            ($name:literal, $stages:ident) => {
                if let Err(reason) = enter($name, &mut $stages) {
                    return Err((reason, $stages));
                }
            };
        }

        // 1. Recall prior decisions.
        stage!("recall", stages);
        let memories: Vec<MemoryItem> = match &self.memory {
            Some(memory) => {
                let query = RecallQuery {
                    symbol: req.symbol.clone(),
                    tags: vec!["decision".to_string()],
                    limit: self.cfg.recall_limit,
                };
                match memory.recall(bank, &query).await {
                    Ok(items) => items,
                    Err(e) => return Err((format!("memory recall failed: {e}"), stages)),
                }
            }
            None => Vec::new(),
        };

        // 2. Gather recent pending strategy signals.
        stage!("gather", stages);
        let signals = match ata_db::signals::recent_pending_for_symbol(
            &self.pool,
            &req.symbol,
            self.cfg.gather_limit,
        )
        .await
        {
            Ok(s) => s,
            Err(e) => return Err((format!("signal gather failed: {e}"), stages)),
        };

        // 3. Research (optional).
        stage!("research", stages);
        let research = match (&self.research, req.research_queries.is_empty()) {
            (Some(client), false) => {
                match client
                    .company_research(&req.symbol, &req.research_queries)
                    .await
                {
                    Ok(report) => Some(report),
                    Err(e) => return Err((format!("research failed: {e}"), stages)),
                }
            }
            _ => None,
        };

        // 4. Build context (stable, documented order).
        stage!("build_context", stages);
        let context = build_context(
            req.user_context.as_deref(),
            &memories,
            &signals,
            research.as_ref(),
        );

        // 5. Plan.
        stage!("plan", stages);
        let Some(planner) = &self.planner else {
            return Err(("planner not configured".to_string(), stages));
        };
        let plan_req = PlanRequest {
            task: format!("Evaluate trading opportunity for {}", req.symbol),
            context,
            symbol: req.symbol.clone(),
            constraints: req.constraints.clone(),
            memories: memories.iter().map(|m| m.summary.clone()).collect(),
        };
        let planner_deadline = Duration::from_secs(self.cfg.planner_timeout_secs);
        let plan = match tokio::time::timeout(planner_deadline, planner.plan(&plan_req)).await {
            Err(_) => return Err(("planner timeout".to_string(), stages)),
            Ok(Err(PlannerError::Malformed(_))) => {
                return Err((PLANNER_MALFORMED.to_string(), stages))
            }
            Ok(Err(PlannerError::Upstream(e))) => {
                return Err((format!("planner failed: {e}"), stages))
            }
            Ok(Ok(plan)) => plan,
        };

        // 6. Execute tools named by the plan. The only side effects allowed
        // are the designated tool calls themselves.
        stage!("execute_tools", stages);
        let mut tool_results: Vec<Value> = Vec::new();
        for step in plan.steps.iter().filter(|s| s.tool.is_some()) {
            let tool = step.tool.as_deref().expect("filtered on Some");
            let result = match (tool, &self.memory) {
                ("memory.reflect", Some(memory)) => {
                    match memory.reflect(step.args.clone()).await {
                        Ok(v) => json!({"tool": tool, "ok": true, "result": v}),
                        Err(e) => return Err((format!("tool {tool} failed: {e}"), stages)),
                    }
                }
                _ => json!({"tool": tool, "ok": false, "reason": "unsupported"}),
            };
            tool_results.push(result);
        }

        // 7. Retain the decision, including research provenance.
        stage!("retain", stages);
        if let Some(memory) = &self.memory {
            let item = MemoryItem {
                bank: bank.to_string(),
                summary: plan.summary.clone(),
                content: format!(
                    "action={} confidence={:.2} notes={}",
                    plan.action.as_str(),
                    plan.confidence,
                    plan.reasoning_notes
                ),
                metadata: json!({
                    "symbol": req.symbol,
                    "run_id": run_id,
                    "action": plan.action.as_str(),
                    "confidence": plan.confidence,
                    "research_used": research.is_some(),
                    "tool_results": tool_results,
                }),
                created_at: None,
            };
            if let Err(e) = memory.retain(bank, &item).await {
                return Err((format!("memory retain failed: {e}"), stages));
            }
        }

        Ok((plan, memories.len() as i32, stages))
    }
}

// ---------------------------------------------------------------------------
// Context assembly
// ---------------------------------------------------------------------------

/// Concatenate the enrichment context. The section order is part of the
/// contract: user context, recalled-memory summaries, strategy-signal
/// summaries, research block.
pub fn build_context(
    user_context: Option<&str>,
    memories: &[MemoryItem],
    signals: &[Signal],
    research: Option<&ResearchReport>,
) -> String {
    let mut sections: Vec<String> = Vec::new();

    if let Some(ctx) = user_context {
        if !ctx.trim().is_empty() {
            sections.push(ctx.trim().to_string());
        }
    }

    if !memories.is_empty() {
        let mut block = String::from("Recalled decisions:\n");
        for m in memories {
            block.push_str(&format!("- {}\n", m.summary));
        }
        sections.push(block.trim_end().to_string());
    }

    if !signals.is_empty() {
        let mut block = String::from("Strategy signals:\n");
        for s in signals {
            block.push_str(&format!(
                "- {} {} @ {:.2} (confidence {:.2}, stop {:.2}, target {:.2}): {}\n",
                s.strategy_id,
                s.signal_type.as_str(),
                s.entry_price,
                s.confidence,
                s.stop_loss,
                s.take_profit,
                s.reasoning
            ));
        }
        sections.push(block.trim_end().to_string());
    }

    if let Some(r) = research {
        let mut block = format!("Research:\n{}\n", r.summary);
        for p in &r.key_points {
            block.push_str(&format!("- {p}\n"));
        }
        sections.push(block.trim_end().to_string());
    }

    sections.join("\n\n")
}

#[cfg(test)]
mod tests {
    use super::*;
    use ata_schemas::{SignalStatus, SignalType};

    fn memory(summary: &str) -> MemoryItem {
        MemoryItem {
            bank: DEFAULT_BANK.to_string(),
            summary: summary.to_string(),
            content: String::new(),
            metadata: Value::Null,
            created_at: None,
        }
    }

    fn signal(strategy_id: &str) -> Signal {
        let now = Utc::now();
        Signal {
            id: Uuid::new_v4(),
            symbol: "AAPL".to_string(),
            strategy_id: strategy_id.to_string(),
            signal_type: SignalType::Buy,
            confidence: 0.8,
            entry_price: 150.0,
            stop_loss: 145.0,
            take_profit: 160.0,
            reasoning: "oversold".to_string(),
            status: SignalStatus::Pending,
            generated_at: now,
            expires_at: now,
            orchestration_run_id: None,
            created_at: now,
        }
    }

    #[test]
    fn context_sections_appear_in_contract_order() {
        let research = ResearchReport {
            summary: "Earnings beat".to_string(),
            key_points: vec!["margin expansion".to_string()],
            metrics: Value::Null,
        };
        let ctx = build_context(
            Some("User prefers small size"),
            &[memory("took profit early last time")],
            &[signal("rsi_momentum@1.0")],
            Some(&research),
        );

        let user = ctx.find("User prefers").unwrap();
        let mem = ctx.find("Recalled decisions:").unwrap();
        let sig = ctx.find("Strategy signals:").unwrap();
        let res = ctx.find("Research:").unwrap();
        assert!(user < mem && mem < sig && sig < res, "{ctx}");
        assert!(ctx.contains("rsi_momentum@1.0 BUY @ 150.00"));
    }

    #[test]
    fn empty_sections_are_omitted() {
        let ctx = build_context(None, &[], &[signal("x@1")], None);
        assert!(!ctx.contains("Recalled decisions:"));
        assert!(!ctx.contains("Research:"));
        assert!(ctx.starts_with("Strategy signals:"));
    }

    #[test]
    fn context_is_deterministic() {
        let memories = [memory("a"), memory("b")];
        let signals = [signal("x@1"), signal("y@2")];
        let a = build_context(None, &memories, &signals, None);
        let b = build_context(None, &memories, &signals, None);
        assert_eq!(a, b);
    }
}
