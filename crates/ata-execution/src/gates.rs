//! Portfolio-wide risk gates evaluated before sizing.
//!
//! Pure and deterministic. Gate order matters and is part of the audit
//! contract: kill switch, position count, daily loss.

use crate::error::{ExecError, RiskRefusal};

#[derive(Debug, Clone, Copy)]
pub struct GateInputs {
    pub execution_enabled: bool,
    pub open_positions: i64,
    pub max_open_positions: i64,
    /// Realized + unrealized P&L today, negative for a loss.
    pub pnl_today: f64,
    pub max_daily_loss: f64,
}

pub fn check_portfolio_gates(inp: &GateInputs) -> Result<(), ExecError> {
    if !inp.execution_enabled {
        return Err(ExecError::RiskGate(RiskRefusal::ExecutionDisabled));
    }

    if inp.open_positions >= inp.max_open_positions {
        return Err(ExecError::RiskGate(RiskRefusal::TooManyPositions {
            open: inp.open_positions,
            max: inp.max_open_positions,
        }));
    }

    // Breach at exactly the limit counts: pnl <= -max_daily_loss.
    if inp.max_daily_loss > 0.0 && inp.pnl_today <= -inp.max_daily_loss {
        return Err(ExecError::RiskGate(RiskRefusal::DailyLossLimit {
            pnl_today: inp.pnl_today,
            max_daily_loss: inp.max_daily_loss,
        }));
    }

    Ok(())
}
