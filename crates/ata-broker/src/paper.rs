//! Deterministic in-memory "paper" broker adapter.
//!
//! Design decisions (kept intentionally simple/deterministic):
//! - `order_id` is `"paper-{seq}"`, assigned in submit order.
//! - No randomness, no wall-clock reads.
//! - Fills are not auto-generated; tests drive state with
//!   [`PaperBroker::set_order_status`].
//! - Submit failures are injected with [`PaperBroker::fail_next_submits`] so
//!   the execution engine's retry/backoff path is exercisable.

use std::collections::BTreeMap;
use std::sync::Mutex;

use async_trait::async_trait;
use ata_schemas::{Candle, Quote};

use crate::{
    BrokerAccount, BrokerApi, BrokerError, BrokerOrderStatus, BrokerPosition, OrderAck,
    OrderRequest,
};

#[derive(Debug, Default)]
struct Inner {
    account: BrokerAccount,
    positions: Vec<BrokerPosition>,
    quotes: BTreeMap<String, Quote>,
    candles: BTreeMap<String, Vec<Candle>>,
    orders: BTreeMap<String, (OrderRequest, BrokerOrderStatus)>,
    next_order_seq: u64,
    fail_submits_remaining: u32,
    healthy: bool,
}

pub struct PaperBroker {
    inner: Mutex<Inner>,
}

impl PaperBroker {
    pub fn new(account: BrokerAccount) -> Self {
        Self {
            inner: Mutex::new(Inner {
                account,
                healthy: true,
                next_order_seq: 1,
                ..Inner::default()
            }),
        }
    }

    pub fn set_account(&self, account: BrokerAccount) {
        self.inner.lock().unwrap().account = account;
    }

    pub fn set_position(&self, position: BrokerPosition) {
        let mut inner = self.inner.lock().unwrap();
        inner.positions.retain(|p| p.symbol != position.symbol);
        inner.positions.push(position);
    }

    pub fn set_quote(&self, quote: Quote) {
        self.inner
            .lock()
            .unwrap()
            .quotes
            .insert(quote.symbol.clone(), quote);
    }

    pub fn set_candles(&self, symbol: &str, candles: Vec<Candle>) {
        self.inner
            .lock()
            .unwrap()
            .candles
            .insert(symbol.to_string(), candles);
    }

    /// The next `n` submits fail with a retriable 503.
    pub fn fail_next_submits(&self, n: u32) {
        self.inner.lock().unwrap().fail_submits_remaining = n;
    }

    pub fn set_healthy(&self, healthy: bool) {
        self.inner.lock().unwrap().healthy = healthy;
    }

    /// Drive an order to a broker-side state for reconciler tests.
    pub fn set_order_status(&self, order_id: &str, status: &str, avg_fill_price: Option<f64>) {
        let mut inner = self.inner.lock().unwrap();
        if let Some((req, st)) = inner.orders.get_mut(order_id) {
            st.status = status.to_string();
            st.avg_fill_price = avg_fill_price;
            if status == "filled" {
                st.filled_quantity = req.quantity as f64;
            }
        }
    }

    /// Orders accepted so far, in submission order.
    pub fn submitted_orders(&self) -> Vec<(String, OrderRequest)> {
        self.inner
            .lock()
            .unwrap()
            .orders
            .iter()
            .map(|(id, (req, _))| (id.clone(), req.clone()))
            .collect()
    }
}

#[async_trait]
impl BrokerApi for PaperBroker {
    async fn health(&self) -> Result<(), BrokerError> {
        if self.inner.lock().unwrap().healthy {
            Ok(())
        } else {
            Err(BrokerError::Transport("paper broker down".to_string()))
        }
    }

    async fn account(&self) -> Result<BrokerAccount, BrokerError> {
        Ok(self.inner.lock().unwrap().account.clone())
    }

    async fn positions(&self) -> Result<Vec<BrokerPosition>, BrokerError> {
        Ok(self.inner.lock().unwrap().positions.clone())
    }

    async fn submit_order(&self, req: &OrderRequest) -> Result<OrderAck, BrokerError> {
        let mut inner = self.inner.lock().unwrap();

        if inner.fail_submits_remaining > 0 {
            inner.fail_submits_remaining -= 1;
            return Err(BrokerError::Api {
                status: 503,
                message: "injected submit failure".to_string(),
            });
        }

        let order_id = format!("paper-{}", inner.next_order_seq);
        inner.next_order_seq += 1;

        let status = BrokerOrderStatus {
            order_id: order_id.clone(),
            status: "pending".to_string(),
            filled_quantity: 0.0,
            avg_fill_price: None,
        };
        inner.orders.insert(order_id.clone(), (req.clone(), status));

        Ok(OrderAck {
            order_id,
            status: "pending".to_string(),
        })
    }

    async fn order_status(&self, order_id: &str) -> Result<BrokerOrderStatus, BrokerError> {
        let inner = self.inner.lock().unwrap();
        match inner.orders.get(order_id) {
            Some((_, st)) => Ok(st.clone()),
            None => Err(BrokerError::Api {
                status: 404,
                message: format!("unknown order {order_id}"),
            }),
        }
    }

    async fn quote(&self, symbol: &str) -> Result<Quote, BrokerError> {
        let inner = self.inner.lock().unwrap();
        match inner.quotes.get(symbol) {
            Some(q) => Ok(q.clone()),
            None => Err(BrokerError::Api {
                status: 404,
                message: format!("no quote for {symbol}"),
            }),
        }
    }

    async fn candles(
        &self,
        symbol: &str,
        limit: u32,
        _timeframe: &str,
    ) -> Result<Vec<Candle>, BrokerError> {
        let inner = self.inner.lock().unwrap();
        let all = inner.candles.get(symbol).cloned().unwrap_or_default();
        let skip = all.len().saturating_sub(limit as usize);
        Ok(all[skip..].to_vec())
    }
}
