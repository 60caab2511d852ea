//! Execution engine: validates an approved signal, sizes the position,
//! checks portfolio gates, submits through the broker adapter with bounded
//! retries, and records the trade lifecycle.

use std::sync::Arc;
use std::time::Duration;

use ata_broker::{BrokerApi, BrokerError, OrderRequest};
use ata_config::ExecutionConfig;
use ata_schemas::{
    OrderType, Signal, SignalStatus, SignalType, Trade, TradeDirection, TradeStatus,
};
use chrono::Utc;
use sqlx::PgPool;
use tracing::{info, warn};
use uuid::Uuid;

use crate::error::{ExecError, RiskRefusal};
use crate::gates::{check_portfolio_gates, GateInputs};
use crate::sizing::{compute_position_size, SizingInputs};

const RETRY_BASE: Duration = Duration::from_millis(250);
const RETRY_CAP: Duration = Duration::from_secs(5);
const RETRY_ATTEMPTS: u32 = 3;

#[derive(Debug, Clone, serde::Serialize)]
pub struct ExecutionOutcome {
    pub trade_id: Uuid,
    pub order_id: String,
    pub status: TradeStatus,
}

pub struct ExecutionEngine {
    pool: PgPool,
    broker: Arc<dyn BrokerApi>,
    cfg: ExecutionConfig,
}

impl ExecutionEngine {
    pub fn new(pool: PgPool, broker: Arc<dyn BrokerApi>, cfg: ExecutionConfig) -> Self {
        Self { pool, broker, cfg }
    }

    /// Execute an approved signal end to end.
    ///
    /// Non-retriable refusals ([`ExecError::Validation`],
    /// [`ExecError::RiskGate`], sizing failures) leave no trade row. Broker
    /// submit failures retry with exponential backoff; on exhaustion the
    /// already-persisted trade is marked `rejected` with the broker's error.
    pub async fn execute_signal(
        &self,
        signal_id: Uuid,
        approver: &str,
    ) -> Result<ExecutionOutcome, anyhow::Error> {
        // 1. Load and validate the signal + its approval row.
        let signal = ata_db::signals::fetch_signal(&self.pool, signal_id)
            .await?
            .ok_or(ExecError::SignalNotFound { id: signal_id })?;
        let direction = self.validate_signal(&signal)?;

        let approval = ata_db::trades::fetch_trade_approval(&self.pool, signal_id)
            .await?
            .ok_or_else(|| ExecError::Validation("no approval row for signal".to_string()))?;
        if !approval.approved {
            return Err(ExecError::Validation("signal approval was a rejection".to_string()).into());
        }

        // 2. Account state and open positions from the broker.
        let account = self
            .broker
            .account()
            .await
            .map_err(|e| ExecError::Upstream(e.to_string()))?;
        let positions = self
            .broker
            .positions()
            .await
            .map_err(|e| ExecError::Upstream(e.to_string()))?;

        let open_positions = positions.iter().filter(|p| p.quantity != 0.0).count() as i64;
        let unrealized: f64 = positions.iter().filter_map(|p| p.unrealized_pnl).sum();
        let realized = ata_db::trades::realized_pnl_today(&self.pool).await?;

        // 3. Portfolio gates.
        check_portfolio_gates(&GateInputs {
            execution_enabled: self.cfg.enabled,
            open_positions,
            max_open_positions: self.cfg.max_open_positions,
            pnl_today: realized + unrealized,
            max_daily_loss: self.cfg.max_daily_loss,
        })?;

        // 4. Position size.
        let size = compute_position_size(&SizingInputs {
            net_liquidation: account.net_liquidation,
            buying_power: account.buying_power,
            entry_price: signal.entry_price,
            stop_loss: signal.stop_loss,
            max_risk_per_trade: self.cfg.max_risk_per_trade,
            max_position_value_pct: self.cfg.max_position_value_pct,
            min_position_size: self.cfg.min_position_size,
            max_position_size: self.cfg.max_position_size,
        })?;

        // 5. Persist the trade first so a crash between submit and ack is
        // visible, then submit.
        let trade = Trade {
            id: Uuid::new_v4(),
            symbol: signal.symbol.clone(),
            direction,
            quantity: size.quantity,
            entry_price: signal.entry_price,
            stop_loss: signal.stop_loss,
            take_profit: signal.take_profit,
            strategy_id: signal.strategy_id.clone(),
            signal_id: signal.id,
            order_id: None,
            status: TradeStatus::Pending,
            risk_amount: size.risk_amount,
            risk_percent: size.risk_percent,
            position_value: size.position_value,
            rr_ratio: signal.rr_ratio(),
            created_at: Utc::now(),
            exit_price: None,
            exit_time: None,
            pnl: None,
            pnl_percent: None,
            outcome: None,
            hold_duration_secs: None,
            error: None,
        };
        ata_db::trades::insert_trade(&self.pool, &trade).await?;

        let order = OrderRequest {
            symbol: signal.symbol.clone(),
            action: direction,
            quantity: size.quantity,
            order_type: self.cfg.default_order_type,
            limit_price: match self.cfg.default_order_type {
                OrderType::Lmt => Some(signal.entry_price),
                OrderType::Mkt => None,
            },
        };

        let ack = match self.submit_with_retry(&order, signal.id).await {
            Ok(ack) => ack,
            Err(e) => {
                let msg = e.to_string();
                ata_db::trades::mark_trade_rejected(&self.pool, trade.id, &msg).await?;
                warn!(
                    trade_id = %trade.id,
                    signal_id = %signal.id,
                    error = %msg,
                    "broker submit exhausted, trade rejected"
                );
                return Err(ExecError::Upstream(msg).into());
            }
        };

        ata_db::trades::set_trade_order_id(&self.pool, trade.id, &ack.order_id).await?;
        ata_db::trades::set_approval_order_id(&self.pool, signal.id, &ack.order_id).await?;

        // Audit trail for the decision.
        info!(
            trade_id = %trade.id,
            signal_id = %signal.id,
            order_id = %ack.order_id,
            approver,
            symbol = %trade.symbol,
            direction = direction.as_str(),
            quantity = size.quantity,
            entry_price = trade.entry_price,
            risk_amount = size.risk_amount,
            position_value = size.position_value,
            "order submitted"
        );

        Ok(ExecutionOutcome {
            trade_id: trade.id,
            order_id: ack.order_id,
            status: TradeStatus::Pending,
        })
    }

    fn validate_signal(&self, signal: &Signal) -> Result<TradeDirection, ExecError> {
        if signal.status != SignalStatus::Approved {
            return Err(ExecError::Validation(format!(
                "signal status is {}, expected approved",
                signal.status.as_str()
            )));
        }
        let direction = match signal.signal_type {
            SignalType::Buy => TradeDirection::Buy,
            SignalType::Sell => TradeDirection::Sell,
            SignalType::Hold => {
                return Err(ExecError::Validation("HOLD signals are not executable".to_string()))
            }
        };
        if !signal.price_levels_valid() {
            return Err(ExecError::Validation(format!(
                "price invariants violated: entry {} stop {} target {}",
                signal.entry_price, signal.stop_loss, signal.take_profit
            )));
        }
        if !(signal.entry_price > 0.0 && signal.stop_loss > 0.0 && signal.take_profit > 0.0) {
            return Err(ExecError::Validation("missing entry/stop/target".to_string()));
        }
        Ok(direction)
    }

    /// Submit with exponential backoff: 250 ms base, factor 2, 5 s cap,
    /// three attempts, deterministic jitter derived from the signal id.
    /// Non-retriable broker refusals (4xx) abort immediately.
    async fn submit_with_retry(
        &self,
        order: &OrderRequest,
        signal_id: Uuid,
    ) -> Result<ata_broker::OrderAck, BrokerError> {
        let mut last_err = None;
        for attempt in 0..RETRY_ATTEMPTS {
            match self.broker.submit_order(order).await {
                Ok(ack) => return Ok(ack),
                Err(e) if e.is_retriable() && attempt + 1 < RETRY_ATTEMPTS => {
                    let delay = backoff_delay(attempt, signal_id);
                    warn!(
                        attempt,
                        delay_ms = delay.as_millis() as u64,
                        error = %e,
                        "broker submit failed, backing off"
                    );
                    tokio::time::sleep(delay).await;
                    last_err = Some(e);
                }
                Err(e) => return Err(e),
            }
        }
        Err(last_err.expect("loop stores error before falling through"))
    }
}

/// `base * 2^attempt` capped, plus up to 100 ms of jitter derived from the
/// signal id so concurrent executors do not retry in lockstep.
fn backoff_delay(attempt: u32, signal_id: Uuid) -> Duration {
    let exp = RETRY_BASE.saturating_mul(1 << attempt.min(16));
    let capped = exp.min(RETRY_CAP);
    let jitter_ms = (signal_id.as_u128() >> (attempt % 16)) as u64 % 100;
    capped + Duration::from_millis(jitter_ms)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn backoff_grows_and_caps() {
        let id = Uuid::nil(); // zero jitter
        assert_eq!(backoff_delay(0, id), Duration::from_millis(250));
        assert_eq!(backoff_delay(1, id), Duration::from_millis(500));
        assert_eq!(backoff_delay(2, id), Duration::from_millis(1_000));
        assert_eq!(backoff_delay(10, id), Duration::from_secs(5));
    }

    #[test]
    fn jitter_is_bounded_and_deterministic() {
        let id = Uuid::new_v4();
        let a = backoff_delay(0, id);
        let b = backoff_delay(0, id);
        assert_eq!(a, b);
        assert!(a >= Duration::from_millis(250));
        assert!(a < Duration::from_millis(350));
    }
}
