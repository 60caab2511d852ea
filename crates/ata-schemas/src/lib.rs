//! Shared domain types for the trading assistant core.
//!
//! Plain serde structs and string-backed enums only. No IO, no engine logic:
//! every crate that touches a signal, candle, trade or orchestration run
//! speaks these types.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

// ---------------------------------------------------------------------------
// Signal enums
// ---------------------------------------------------------------------------

/// Direction a strategy wants to act in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum SignalType {
    Buy,
    Sell,
    Hold,
}

impl SignalType {
    pub fn as_str(&self) -> &'static str {
        match self {
            SignalType::Buy => "BUY",
            SignalType::Sell => "SELL",
            SignalType::Hold => "HOLD",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "BUY" => Some(SignalType::Buy),
            "SELL" => Some(SignalType::Sell),
            "HOLD" => Some(SignalType::Hold),
            _ => None,
        }
    }
}

/// Lifecycle of a persisted signal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SignalStatus {
    Pending,
    Approved,
    Rejected,
    Expired,
}

impl SignalStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            SignalStatus::Pending => "pending",
            SignalStatus::Approved => "approved",
            SignalStatus::Rejected => "rejected",
            SignalStatus::Expired => "expired",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(SignalStatus::Pending),
            "approved" => Some(SignalStatus::Approved),
            "rejected" => Some(SignalStatus::Rejected),
            "expired" => Some(SignalStatus::Expired),
            _ => None,
        }
    }
}

// ---------------------------------------------------------------------------
// Market data
// ---------------------------------------------------------------------------

/// Daily (or intraday) OHLCV bar keyed by `(symbol, ts)`.
///
/// Invariant: `low <= min(open, close) <= max(open, close) <= high` and
/// `volume >= 0`. Rows violating this are rejected at the ingest boundary.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Candle {
    pub symbol: String,
    pub ts: DateTime<Utc>,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    pub volume: i64,
}

impl Candle {
    /// OHLC sanity check used by the ingest gate.
    pub fn is_sane(&self) -> bool {
        let body_lo = self.open.min(self.close);
        let body_hi = self.open.max(self.close);
        self.volume >= 0 && self.low <= body_lo && body_hi <= self.high
    }
}

/// Latest quote per symbol, refreshed by upsert.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Quote {
    pub symbol: String,
    pub price: f64,
    pub bid: Option<f64>,
    pub ask: Option<f64>,
    pub bid_size: Option<i64>,
    pub ask_size: Option<i64>,
    pub volume: Option<i64>,
    pub event_ts: DateTime<Utc>,
    pub exchange: Option<String>,
}

// ---------------------------------------------------------------------------
// Signal
// ---------------------------------------------------------------------------

/// A strategy's emitted intent to buy, sell, or hold a symbol.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Signal {
    pub id: Uuid,
    pub symbol: String,
    /// `name@version` of the artifact that produced this signal.
    pub strategy_id: String,
    pub signal_type: SignalType,
    /// In `[0, 1]`.
    pub confidence: f64,
    pub entry_price: f64,
    pub stop_loss: f64,
    pub take_profit: f64,
    pub reasoning: String,
    pub status: SignalStatus,
    pub generated_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    pub orchestration_run_id: Option<Uuid>,
    pub created_at: DateTime<Utc>,
}

impl Signal {
    /// Price-level invariants:
    /// BUY  requires `stop_loss < entry_price < take_profit`;
    /// SELL requires `take_profit < entry_price < stop_loss`;
    /// HOLD carries no actionable levels and always passes.
    pub fn price_levels_valid(&self) -> bool {
        match self.signal_type {
            SignalType::Buy => {
                self.stop_loss < self.entry_price && self.entry_price < self.take_profit
            }
            SignalType::Sell => {
                self.take_profit < self.entry_price && self.entry_price < self.stop_loss
            }
            SignalType::Hold => true,
        }
    }

    /// Reward-to-risk ratio; `None` when the stop distance is zero or the
    /// signal is a HOLD.
    pub fn rr_ratio(&self) -> Option<f64> {
        let (reward, risk) = match self.signal_type {
            SignalType::Buy => (
                self.take_profit - self.entry_price,
                self.entry_price - self.stop_loss,
            ),
            SignalType::Sell => (
                self.entry_price - self.take_profit,
                self.stop_loss - self.entry_price,
            ),
            SignalType::Hold => return None,
        };
        if risk <= 0.0 {
            return None;
        }
        Some(reward / risk)
    }
}

// ---------------------------------------------------------------------------
// Orchestration
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TriggerType {
    Signal,
    Manual,
    Scheduled,
}

impl TriggerType {
    pub fn as_str(&self) -> &'static str {
        match self {
            TriggerType::Signal => "signal",
            TriggerType::Manual => "manual",
            TriggerType::Scheduled => "scheduled",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "signal" => Some(TriggerType::Signal),
            "manual" => Some(TriggerType::Manual),
            "scheduled" => Some(TriggerType::Scheduled),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OrchestrationStatus {
    Running,
    Completed,
    Failed,
}

impl OrchestrationStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            OrchestrationStatus::Running => "running",
            OrchestrationStatus::Completed => "completed",
            OrchestrationStatus::Failed => "failed",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "running" => Some(OrchestrationStatus::Running),
            "completed" => Some(OrchestrationStatus::Completed),
            "failed" => Some(OrchestrationStatus::Failed),
            _ => None,
        }
    }
}

/// One execution of the seven-stage enrichment pipeline.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrchestrationRun {
    pub id: Uuid,
    pub symbol: String,
    pub trigger_type: TriggerType,
    /// The signal that triggered this run, when `trigger_type = signal`.
    pub trigger_id: Option<Uuid>,
    pub status: OrchestrationStatus,
    pub started_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
    /// Planner action: buy | sell | hold | watch | skipped.
    pub agent_suggestion: Option<String>,
    pub confidence: Option<f64>,
    pub reasoning: Option<String>,
    pub memories_recalled: i32,
    pub error: Option<String>,
}

// ---------------------------------------------------------------------------
// Trades
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum TradeDirection {
    Buy,
    Sell,
}

impl TradeDirection {
    pub fn as_str(&self) -> &'static str {
        match self {
            TradeDirection::Buy => "BUY",
            TradeDirection::Sell => "SELL",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "BUY" => Some(TradeDirection::Buy),
            "SELL" => Some(TradeDirection::Sell),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TradeStatus {
    Pending,
    Open,
    Cancelled,
    Rejected,
    Filled,
    Closed,
}

impl TradeStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            TradeStatus::Pending => "pending",
            TradeStatus::Open => "open",
            TradeStatus::Cancelled => "cancelled",
            TradeStatus::Rejected => "rejected",
            TradeStatus::Filled => "filled",
            TradeStatus::Closed => "closed",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(TradeStatus::Pending),
            "open" => Some(TradeStatus::Open),
            "cancelled" => Some(TradeStatus::Cancelled),
            "rejected" => Some(TradeStatus::Rejected),
            "filled" => Some(TradeStatus::Filled),
            "closed" => Some(TradeStatus::Closed),
            _ => None,
        }
    }

    /// Terminal states are never revisited by the reconciler.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            TradeStatus::Filled
                | TradeStatus::Cancelled
                | TradeStatus::Rejected
                | TradeStatus::Closed
        )
    }
}

/// Broker order type. LMT orders carry `limit_price = entry_price`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum OrderType {
    Lmt,
    Mkt,
}

impl OrderType {
    pub fn as_str(&self) -> &'static str {
        match self {
            OrderType::Lmt => "LMT",
            OrderType::Mkt => "MKT",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "LMT" => Some(OrderType::Lmt),
            "MKT" => Some(OrderType::Mkt),
            _ => None,
        }
    }
}

/// Human decision record over a signal, created at approval time and updated
/// with the broker `order_id` once execution submits.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TradeApproval {
    pub signal_id: Uuid,
    pub orchestration_run_id: Option<Uuid>,
    pub approved: bool,
    pub approved_by: String,
    pub approved_at: DateTime<Utc>,
    pub modification_notes: Option<String>,
    pub order_id: Option<String>,
}

/// Realized order lifecycle with risk metrics captured at submit time.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Trade {
    pub id: Uuid,
    pub symbol: String,
    pub direction: TradeDirection,
    pub quantity: i64,
    pub entry_price: f64,
    pub stop_loss: f64,
    pub take_profit: f64,
    pub strategy_id: String,
    pub signal_id: Uuid,
    /// Broker-assigned order id; absent until the broker acks the submit.
    pub order_id: Option<String>,
    pub status: TradeStatus,
    pub risk_amount: f64,
    pub risk_percent: f64,
    pub position_value: f64,
    pub rr_ratio: Option<f64>,
    pub created_at: DateTime<Utc>,
    pub exit_price: Option<f64>,
    pub exit_time: Option<DateTime<Utc>>,
    pub pnl: Option<f64>,
    pub pnl_percent: Option<f64>,
    /// "win" | "loss" | "flat" once closed.
    pub outcome: Option<String>,
    pub hold_duration_secs: Option<i64>,
    /// Broker error message when the submit was exhausted and rejected.
    pub error: Option<String>,
}

// ---------------------------------------------------------------------------
// Memory
// ---------------------------------------------------------------------------

/// Bank-scoped long-term memory record surfaced by the memory facade.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MemoryItem {
    pub bank: String,
    pub summary: String,
    pub content: String,
    #[serde(default)]
    pub metadata: Value,
    pub created_at: Option<DateTime<Utc>>,
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
