//! Approval lifecycle state machine.
//!
//! The table in [`ApprovalState::can_transition`] is the single source of
//! truth for legality; the persistence layer performs the actual transition
//! as an atomic check-and-set keyed on the expected `from` state.

use serde::{Deserialize, Serialize};

/// Lifecycle stage of a strategy artifact.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum ApprovalState {
    Draft,
    Validated,
    Reviewed,
    Approved,
    Active,
    Deprecated,
    Revoked,
}

impl ApprovalState {
    pub fn as_str(&self) -> &'static str {
        match self {
            ApprovalState::Draft => "DRAFT",
            ApprovalState::Validated => "VALIDATED",
            ApprovalState::Reviewed => "REVIEWED",
            ApprovalState::Approved => "APPROVED",
            ApprovalState::Active => "ACTIVE",
            ApprovalState::Deprecated => "DEPRECATED",
            ApprovalState::Revoked => "REVOKED",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "DRAFT" => Some(ApprovalState::Draft),
            "VALIDATED" => Some(ApprovalState::Validated),
            "REVIEWED" => Some(ApprovalState::Reviewed),
            "APPROVED" => Some(ApprovalState::Approved),
            "ACTIVE" => Some(ApprovalState::Active),
            "DEPRECATED" => Some(ApprovalState::Deprecated),
            "REVOKED" => Some(ApprovalState::Revoked),
            _ => None,
        }
    }

    /// Legal transition table:
    ///
    /// | From       | To         | Trigger                    |
    /// |------------|------------|----------------------------|
    /// | DRAFT      | VALIDATED  | validation run passes      |
    /// | VALIDATED  | REVIEWED   | human reviewer accepts     |
    /// | REVIEWED   | APPROVED   | approver signs off         |
    /// | APPROVED   | ACTIVE     | loader activates           |
    /// | ACTIVE     | DEPRECATED | operator retires           |
    /// | any        | REVOKED    | emergency stop             |
    ///
    /// Everything else is illegal, including self-transitions (a repeated
    /// promote is rejected by the second caller) and re-animating a REVOKED
    /// artifact.
    pub fn can_transition(self, to: ApprovalState) -> bool {
        use ApprovalState::*;
        match (self, to) {
            (Revoked, _) => false,
            (_, Revoked) => true,
            (Draft, Validated) => true,
            (Validated, Reviewed) => true,
            (Reviewed, Approved) => true,
            (Approved, Active) => true,
            (Active, Deprecated) => true,
            _ => false,
        }
    }

    /// Only APPROVED or ACTIVE artifacts may be loaded into the registry.
    pub fn is_loadable(&self) -> bool {
        matches!(self, ApprovalState::Approved | ApprovalState::Active)
    }
}
