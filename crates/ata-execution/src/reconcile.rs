//! Order status reconciler.
//!
//! Polling, not pushing: the broker's status endpoints are eventually
//! consistent, so the reconciler re-reads every non-terminal trade each tick
//! and applies the observed state. Updates are idempotent; duplicate fill
//! observations are harmless.

use std::sync::Arc;
use std::time::Duration;

use ata_broker::BrokerApi;
use ata_schemas::TradeStatus;
use sqlx::PgPool;
use tokio::sync::watch;
use tracing::{debug, info, warn};

/// Map a broker-side status string onto the trade lifecycle. Unknown states
/// are left alone rather than guessed at.
pub fn map_broker_status(status: &str) -> Option<TradeStatus> {
    match status {
        "pending" | "pending_submit" => Some(TradeStatus::Pending),
        "open" | "submitted" | "accepted" | "partially_filled" => Some(TradeStatus::Open),
        "filled" => Some(TradeStatus::Filled),
        "cancelled" | "canceled" => Some(TradeStatus::Cancelled),
        "rejected" => Some(TradeStatus::Rejected),
        _ => None,
    }
}

pub struct Reconciler {
    pool: PgPool,
    broker: Arc<dyn BrokerApi>,
    interval_secs: u64,
}

impl Reconciler {
    pub fn new(pool: PgPool, broker: Arc<dyn BrokerApi>, interval_secs: u64) -> Self {
        Self {
            pool,
            broker,
            interval_secs,
        }
    }

    /// One reconcile pass. A broker failure on one trade never blocks the
    /// others. Returns how many trades changed state.
    pub async fn tick(&self) -> usize {
        let trades = match ata_db::trades::list_reconcilable_trades(&self.pool).await {
            Ok(t) => t,
            Err(e) => {
                warn!(error = %e, "reconciler trade listing failed");
                return 0;
            }
        };

        let mut changed = 0usize;
        for trade in trades {
            let order_id = trade.order_id.as_deref().expect("query filters on order_id");

            let status = match self.broker.order_status(order_id).await {
                Ok(s) => s,
                Err(e) => {
                    warn!(trade_id = %trade.id, order_id, error = %e, "order status poll failed");
                    continue;
                }
            };

            let Some(mapped) = map_broker_status(&status.status) else {
                debug!(trade_id = %trade.id, broker_status = %status.status, "unmapped status");
                continue;
            };

            if mapped == trade.status {
                continue;
            }

            let fill_price = status.avg_fill_price.filter(|_| mapped == TradeStatus::Filled);
            match ata_db::trades::update_trade_from_broker(&self.pool, trade.id, mapped, fill_price)
                .await
            {
                Ok(()) => {
                    info!(
                        trade_id = %trade.id,
                        order_id,
                        from = trade.status.as_str(),
                        to = mapped.as_str(),
                        "trade status reconciled"
                    );
                    changed += 1;
                }
                Err(e) => warn!(trade_id = %trade.id, error = %e, "trade update failed"),
            }
        }
        changed
    }

    /// Poll at a fixed cadence until `shutdown` flips true.
    pub async fn run(self, mut shutdown: watch::Receiver<bool>) {
        info!(interval_secs = self.interval_secs, "order reconciler starting");

        let mut ticker = tokio::time::interval(Duration::from_secs(self.interval_secs.max(1)));
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                _ = ticker.tick() => {}
                _ = shutdown.changed() => {
                    if *shutdown.borrow() {
                        info!("order reconciler stopping");
                        return;
                    }
                    continue;
                }
            }

            let changed = self.tick().await;
            if changed > 0 {
                debug!(changed, "reconcile tick");
            }
        }
    }
}
