//! Execution engine error taxonomy.
//!
//! Validation and risk-gate refusals are non-retriable and map to 4xx/409 at
//! the HTTP layer. `Upstream` is the broker after retry exhaustion.

use uuid::Uuid;

/// A refusal from the portfolio risk gates.
#[derive(Debug, Clone, PartialEq)]
pub enum RiskRefusal {
    /// `EXECUTION_ENABLED=false`: the engine is fail-closed.
    ExecutionDisabled,
    TooManyPositions { open: i64, max: i64 },
    DailyLossLimit { pnl_today: f64, max_daily_loss: f64 },
}

impl std::fmt::Display for RiskRefusal {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RiskRefusal::ExecutionDisabled => write!(f, "execution is disabled"),
            RiskRefusal::TooManyPositions { open, max } => {
                write!(f, "open position count {open} at limit {max}")
            }
            RiskRefusal::DailyLossLimit {
                pnl_today,
                max_daily_loss,
            } => write!(
                f,
                "daily loss limit reached: pnl today {pnl_today:.2}, limit {max_daily_loss:.2}"
            ),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum ExecError {
    /// Unknown signal id.
    SignalNotFound { id: Uuid },
    /// The signal is not executable (wrong status, missing approval,
    /// violated price invariants, HOLD type).
    Validation(String),
    /// Refused by a portfolio gate.
    RiskGate(RiskRefusal),
    /// `|entry - stop| == 0`: position sizing is undefined.
    ZeroStopDistance,
    /// The sized position exceeds available buying power.
    InsufficientBuyingPower { required: f64, available: f64 },
    /// Broker failure after retry exhaustion (or a non-retriable refusal).
    Upstream(String),
}

impl std::fmt::Display for ExecError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ExecError::SignalNotFound { id } => write!(f, "signal {id} not found"),
            ExecError::Validation(msg) => write!(f, "signal not executable: {msg}"),
            ExecError::RiskGate(refusal) => write!(f, "risk gate refused: {refusal}"),
            ExecError::ZeroStopDistance => {
                write!(f, "stop distance is zero, cannot size position")
            }
            ExecError::InsufficientBuyingPower {
                required,
                available,
            } => write!(
                f,
                "insufficient buying power: need {required:.2}, have {available:.2}"
            ),
            ExecError::Upstream(msg) => write!(f, "broker failure: {msg}"),
        }
    }
}

impl std::error::Error for ExecError {}
