//! Artifact domain: content-addressed strategy versions and their approval
//! lifecycle.
//!
//! This crate is pure - no database, no IO. The persistence layer (ata-db)
//! stores these types and consults [`ApprovalState::can_transition`] before
//! mutating an approval row.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

mod canonical;
mod state;

pub use canonical::{artifact_hash, canonical_json};
pub use state::ApprovalState;

// ---------------------------------------------------------------------------
// Risk profile
// ---------------------------------------------------------------------------

/// Per-artifact risk envelope, hashed into the artifact's content address.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RiskProfile {
    /// Maximum share of net liquidation one position may consume.
    pub max_position_pct: f64,
    /// Daily loss, in account currency, at which the strategy stands down.
    pub max_daily_loss: f64,
    /// Order types this strategy may emit (e.g. `["LMT"]`).
    pub allowed_order_types: Vec<String>,
}

// ---------------------------------------------------------------------------
// Artifact
// ---------------------------------------------------------------------------

/// Immutable record of a specific strategy version.
///
/// `artifact_id` is the human-readable `name@version`; `hash` is the
/// content address ([`artifact_hash`]). Attributes never change after
/// creation - a new version is a new artifact.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Artifact {
    pub id: Uuid,
    pub artifact_id: String,
    pub strategy_name: String,
    pub strategy_version: String,
    /// Opaque evaluator parameters, validated by the registry loader.
    pub params: Value,
    pub risk_profile: RiskProfile,
    pub hash: String,
    pub created_by: String,
    pub created_at: DateTime<Utc>,
}

/// Input for creating an artifact; the store assigns `id`, `hash` and
/// `created_at`.
#[derive(Debug, Clone, Deserialize)]
pub struct NewArtifact {
    pub strategy_name: String,
    pub strategy_version: String,
    pub params: Value,
    pub risk_profile: RiskProfile,
    pub created_by: String,
}

impl NewArtifact {
    pub fn artifact_id(&self) -> String {
        format!("{}@{}", self.strategy_name, self.strategy_version)
    }

    pub fn content_hash(&self) -> String {
        artifact_hash(
            &self.strategy_name,
            &self.strategy_version,
            &self.params,
            &self.risk_profile,
        )
    }
}

// ---------------------------------------------------------------------------
// Approval + validation report
// ---------------------------------------------------------------------------

/// Exactly one approval row exists per artifact; only the state machine
/// mutates it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Approval {
    pub artifact_id: Uuid,
    pub state: ApprovalState,
    pub approved_by: Option<String>,
    pub approved_at: Option<DateTime<Utc>>,
    pub reason: Option<String>,
}

/// One row per validation attempt, idempotent on `(artifact_id, run_id)`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ValidationReport {
    pub artifact_id: Uuid,
    pub run_id: Uuid,
    pub test_type: String,
    pub passed: bool,
    pub metrics: Value,
    pub errors: Vec<String>,
    pub warnings: Vec<String>,
    pub started_at: DateTime<Utc>,
    pub completed_at: DateTime<Utc>,
    pub duration_seconds: f64,
}

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

/// Domain errors surfaced by the artifact store. All are non-retriable.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ArtifactError {
    /// An artifact with the same content hash already exists.
    DuplicateHash { hash: String },
    /// The requested state transition is not in the legal table.
    IllegalTransition {
        from: ApprovalState,
        to: ApprovalState,
    },
    /// Unknown artifact id.
    NotFound { id: Uuid },
}

impl std::fmt::Display for ArtifactError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ArtifactError::DuplicateHash { hash } => {
                write!(f, "artifact with hash {hash} already exists")
            }
            ArtifactError::IllegalTransition { from, to } => {
                write!(
                    f,
                    "illegal approval transition {} -> {}",
                    from.as_str(),
                    to.as_str()
                )
            }
            ArtifactError::NotFound { id } => write!(f, "artifact {id} not found"),
        }
    }
}

impl std::error::Error for ArtifactError {}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn new_artifact() -> NewArtifact {
        NewArtifact {
            strategy_name: "rsi_momentum".to_string(),
            strategy_version: "1.0".to_string(),
            params: json!({"period": 14, "oversold": 30.0, "overbought": 70.0}),
            risk_profile: RiskProfile {
                max_position_pct: 0.20,
                max_daily_loss: 1_000.0,
                allowed_order_types: vec!["LMT".to_string(), "MKT".to_string()],
            },
            created_by: "ops".to_string(),
        }
    }

    #[test]
    fn artifact_id_is_name_at_version() {
        assert_eq!(new_artifact().artifact_id(), "rsi_momentum@1.0");
    }

    #[test]
    fn content_hash_round_trips_through_serde() {
        // Create -> serialize -> deserialize -> rehash must be bit-identical.
        let input = new_artifact();
        let h = input.content_hash();

        let json = serde_json::to_string(&input.params).unwrap();
        let params: Value = serde_json::from_str(&json).unwrap();
        let rehashed = artifact_hash(
            &input.strategy_name,
            &input.strategy_version,
            &params,
            &input.risk_profile,
        );
        assert_eq!(h, rehashed);
    }

    #[test]
    fn error_display_is_actionable() {
        let e = ArtifactError::IllegalTransition {
            from: ApprovalState::Draft,
            to: ApprovalState::Active,
        };
        assert_eq!(e.to_string(), "illegal approval transition DRAFT -> ACTIVE");
    }
}
