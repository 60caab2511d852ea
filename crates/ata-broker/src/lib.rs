//! Broker adapter boundary.
//!
//! This crate defines the adapter contract ([`BrokerApi`]), the production
//! HTTP client ([`HttpBroker`]) and a deterministic in-memory
//! [`PaperBroker`] for tests and scenario wiring. No persistence and no
//! retry policy here - retries are the execution engine's concern.

use std::fmt;

use async_trait::async_trait;
use ata_schemas::{Candle, OrderType, Quote, TradeDirection};
use serde::{Deserialize, Serialize};

mod http;
mod paper;

pub use http::HttpBroker;
pub use paper::PaperBroker;

// ---------------------------------------------------------------------------
// Wire types
// ---------------------------------------------------------------------------

/// Account snapshot from `GET /account`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BrokerAccount {
    pub net_liquidation: f64,
    pub buying_power: f64,
    pub currency: String,
}

impl Default for BrokerAccount {
    fn default() -> Self {
        Self {
            net_liquidation: 0.0,
            buying_power: 0.0,
            currency: "USD".to_string(),
        }
    }
}

/// One open position from `GET /positions`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BrokerPosition {
    pub symbol: String,
    /// Signed quantity; negative for short.
    pub quantity: f64,
    pub avg_price: f64,
    #[serde(default)]
    pub unrealized_pnl: Option<f64>,
}

/// Order submission payload for `POST /orders`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrderRequest {
    pub symbol: String,
    pub action: TradeDirection,
    pub quantity: i64,
    pub order_type: OrderType,
    pub limit_price: Option<f64>,
}

/// Broker acknowledgement of a submitted order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrderAck {
    pub order_id: String,
    pub status: String,
}

/// Polled order state for the reconciler.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BrokerOrderStatus {
    pub order_id: String,
    /// Broker-side status string: pending | open | filled | cancelled | rejected.
    pub status: String,
    #[serde(default)]
    pub filled_quantity: f64,
    #[serde(default)]
    pub avg_fill_price: Option<f64>,
}

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

/// Errors a broker adapter may return.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BrokerError {
    /// Network or transport failure (connect refused, timeout).
    Transport(String),
    /// The upstream returned a non-success HTTP status.
    Api { status: u16, message: String },
    /// A response payload could not be decoded.
    Decode(String),
}

impl BrokerError {
    /// Transport failures and 5xx responses are worth retrying; 4xx are not.
    pub fn is_retriable(&self) -> bool {
        match self {
            BrokerError::Transport(_) => true,
            BrokerError::Api { status, .. } => *status >= 500,
            BrokerError::Decode(_) => false,
        }
    }
}

impl fmt::Display for BrokerError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BrokerError::Transport(msg) => write!(f, "broker transport error: {msg}"),
            BrokerError::Api { status, message } => {
                write!(f, "broker api error status={status}: {message}")
            }
            BrokerError::Decode(msg) => write!(f, "broker decode error: {msg}"),
        }
    }
}

impl std::error::Error for BrokerError {}

// ---------------------------------------------------------------------------
// Adapter contract
// ---------------------------------------------------------------------------

/// The broker adapter contract consumed by the ingester, the execution
/// engine and the reconciler.
///
/// Implementations must be `Send + Sync` so a `Arc<dyn BrokerApi>` can cross
/// task boundaries.
#[async_trait]
pub trait BrokerApi: Send + Sync {
    async fn health(&self) -> Result<(), BrokerError>;

    async fn account(&self) -> Result<BrokerAccount, BrokerError>;

    async fn positions(&self) -> Result<Vec<BrokerPosition>, BrokerError>;

    async fn submit_order(&self, req: &OrderRequest) -> Result<OrderAck, BrokerError>;

    async fn order_status(&self, order_id: &str) -> Result<BrokerOrderStatus, BrokerError>;

    async fn quote(&self, symbol: &str) -> Result<Quote, BrokerError>;

    /// Historical candles newest-last.
    async fn candles(
        &self,
        symbol: &str,
        limit: u32,
        timeframe: &str,
    ) -> Result<Vec<Candle>, BrokerError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn retriability_classification() {
        assert!(BrokerError::Transport("timeout".into()).is_retriable());
        assert!(BrokerError::Api {
            status: 503,
            message: "unavailable".into()
        }
        .is_retriable());
        assert!(!BrokerError::Api {
            status: 400,
            message: "bad order".into()
        }
        .is_retriable());
        assert!(!BrokerError::Decode("truncated".into()).is_retriable());
    }

    #[test]
    fn error_display() {
        let e = BrokerError::Api {
            status: 429,
            message: "rate limited".into(),
        };
        assert_eq!(e.to_string(), "broker api error status=429: rate limited");
    }
}
