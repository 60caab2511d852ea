//! Shared runtime state for the daemon.
//!
//! Handlers receive `State<Arc<AppState>>` from Axum; this module owns
//! nothing async itself. The registry is published as an immutable snapshot
//! behind `RwLock<Arc<..>>`: a reload builds a fresh registry and swaps the
//! Arc, so readers never see a partially loaded catalog.

use std::sync::Arc;

use ata_broker::BrokerApi;
use ata_config::AppConfig;
use ata_execution::ExecutionEngine;
use ata_md::IngestHealth;
use ata_orchestrator::Orchestrator;
use ata_signal::{RegistryHandle, SignalEngine};
use ata_strategy::StrategyRegistry;
use serde::{Deserialize, Serialize};
use sqlx::PgPool;

/// Static build metadata included in health responses.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct BuildInfo {
    pub service: &'static str,
    pub version: &'static str,
}

/// Cloneable (Arc) handle shared across all Axum handlers.
#[derive(Clone)]
pub struct AppState {
    pub pool: PgPool,
    pub cfg: AppConfig,
    pub broker: Arc<dyn BrokerApi>,
    pub registry: RegistryHandle,
    pub orchestrator: Arc<Orchestrator>,
    pub executor: Arc<ExecutionEngine>,
    pub signal_engine: Arc<SignalEngine>,
    pub ingest_health: Arc<IngestHealth>,
    pub build: BuildInfo,
}

impl AppState {
    pub fn build_info() -> BuildInfo {
        BuildInfo {
            service: "ata-daemon",
            version: env!("CARGO_PKG_VERSION"),
        }
    }

    /// Rebuild the registry from APPROVED/ACTIVE artifacts and publish the
    /// new snapshot atomically.
    pub async fn reload_registry(&self) -> anyhow::Result<usize> {
        let artifacts = ata_db::artifacts::list_approved_artifacts(&self.pool).await?;
        let registry = StrategyRegistry::from_artifacts(&artifacts)?;
        let size = registry.len();

        let mut slot = self.registry.write().await;
        *slot = Arc::new(registry);
        Ok(size)
    }
}
