//! Strategy registry: binds APPROVED/ACTIVE artifacts to linked evaluators.
//!
//! The registry is an immutable snapshot. A reload builds a fresh
//! [`StrategyRegistry`] and publishes it by swapping the `Arc` held by the
//! daemon, so readers see either the old or the new catalog, never a mix.

use std::sync::Arc;

use ata_artifacts::Artifact;
use serde_json::Value;
use uuid::Uuid;

use crate::strategies::{MaCrossover, MacdCrossover, RsiMomentum};
use crate::types::{validate_params, Strategy};

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

/// Loader failures. Both are fatal at startup: an approved artifact the
/// binary cannot evaluate means the deployment is wrong.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RegistryError {
    /// The artifact references an evaluator that is not linked in.
    MissingEvaluator {
        strategy_id: String,
        evaluator: String,
    },
    /// The artifact's params do not satisfy the evaluator's schema.
    InvalidParams { strategy_id: String, reason: String },
}

impl std::fmt::Display for RegistryError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RegistryError::MissingEvaluator {
                strategy_id,
                evaluator,
            } => write!(
                f,
                "approved artifact {strategy_id} references evaluator {evaluator:?} \
                 which is not linked into this binary"
            ),
            RegistryError::InvalidParams {
                strategy_id,
                reason,
            } => write!(f, "artifact {strategy_id} has invalid params: {reason}"),
        }
    }
}

impl std::error::Error for RegistryError {}

// ---------------------------------------------------------------------------
// Evaluator binding
// ---------------------------------------------------------------------------

/// Resolve an evaluator by its stable name. This is the single place new
/// strategy variants get linked in.
pub fn bind_evaluator(name: &str) -> Option<Arc<dyn Strategy>> {
    match name {
        "rsi_momentum" => Some(Arc::new(RsiMomentum)),
        "macd_crossover" => Some(Arc::new(MacdCrossover)),
        "ma_crossover" => Some(Arc::new(MaCrossover)),
        _ => None,
    }
}

// ---------------------------------------------------------------------------
// Registry
// ---------------------------------------------------------------------------

/// One approved artifact bound to its evaluator.
#[derive(Clone)]
pub struct RegisteredStrategy {
    /// `name@version`.
    pub strategy_id: String,
    /// Store row id of the backing artifact.
    pub artifact_uuid: Uuid,
    pub params: Value,
    pub evaluator: Arc<dyn Strategy>,
}

impl std::fmt::Debug for RegisteredStrategy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RegisteredStrategy")
            .field("strategy_id", &self.strategy_id)
            .field("artifact_uuid", &self.artifact_uuid)
            .field("params", &self.params)
            .field("evaluator", &self.evaluator.id())
            .finish()
    }
}

/// Read-mostly catalog of pure evaluators keyed by strategy id.
#[derive(Clone, Default, Debug)]
pub struct StrategyRegistry {
    entries: Vec<RegisteredStrategy>,
}

impl StrategyRegistry {
    /// Build a registry from APPROVED/ACTIVE artifacts.
    ///
    /// Fails fast on the first artifact whose evaluator is not linked or
    /// whose params do not validate - a partial registry never publishes.
    /// Entries are sorted by `strategy_id` so evaluation order per tick is
    /// deterministic.
    pub fn from_artifacts(artifacts: &[Artifact]) -> Result<Self, RegistryError> {
        let mut entries = Vec::with_capacity(artifacts.len());

        for artifact in artifacts {
            let evaluator = bind_evaluator(&artifact.strategy_name).ok_or_else(|| {
                RegistryError::MissingEvaluator {
                    strategy_id: artifact.artifact_id.clone(),
                    evaluator: artifact.strategy_name.clone(),
                }
            })?;

            validate_params(evaluator.param_schema(), &artifact.params).map_err(|reason| {
                RegistryError::InvalidParams {
                    strategy_id: artifact.artifact_id.clone(),
                    reason,
                }
            })?;

            entries.push(RegisteredStrategy {
                strategy_id: artifact.artifact_id.clone(),
                artifact_uuid: artifact.id,
                params: artifact.params.clone(),
                evaluator,
            });
        }

        entries.sort_by(|a, b| a.strategy_id.cmp(&b.strategy_id));
        Ok(Self { entries })
    }

    /// Registered strategies in deterministic (sorted) order.
    pub fn entries(&self) -> &[RegisteredStrategy] {
        &self.entries
    }

    pub fn get(&self, strategy_id: &str) -> Option<&RegisteredStrategy> {
        self.entries.iter().find(|e| e.strategy_id == strategy_id)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
