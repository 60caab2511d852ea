//! Orchestration engine: the seven-stage enrichment pipeline and the HTTP
//! clients it drives.

mod clients;
mod pipeline;

pub use clients::{
    HttpMemory, HttpPlanner, HttpResearch, MemoryFacade, PlanAction, PlanRequest, PlanResponse,
    PlanStep, Planner, PlannerError, RecallQuery, Research, ResearchReport, UpstreamError,
};
pub use pipeline::{
    build_context, OrchError, OrchestrateRequest, OrchestrationOutcome, Orchestrator, StageLog,
    CANCELLED, DEFAULT_BANK, PLANNER_MALFORMED,
};
