//! Risk-gated order execution: sizing, portfolio gates, broker submission
//! with bounded retries, trade recording, and status reconciliation.

mod engine;
mod error;
mod gates;
mod reconcile;
mod sizing;

pub use engine::{ExecutionEngine, ExecutionOutcome};
pub use error::{ExecError, RiskRefusal};
pub use gates::{check_portfolio_gates, GateInputs};
pub use reconcile::{map_broker_status, Reconciler};
pub use sizing::{compute_position_size, PositionSize, SizingInputs};
