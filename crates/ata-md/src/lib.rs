//! Market data ingester.
//!
//! On startup: backfill `candle_backfill` daily candles per watchlist symbol.
//! Every `ingest_interval`: refresh one quote per symbol. Every 24 h: re-run
//! the candle backfill. A per-symbol failure is logged and skipped; the tick
//! continues. Three consecutive ticks with zero successful upserts raise the
//! health degradation flag.
//!
//! Upstream requests are issued sequentially per tick, so outstanding broker
//! calls are bounded at one regardless of watchlist size.

use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use ata_broker::BrokerApi;
use ata_config::MarketDataConfig;
use sqlx::PgPool;
use tokio::sync::watch;
use tracing::{debug, info, warn};

const DEGRADED_AFTER_EMPTY_TICKS: u32 = 3;
const BACKFILL_EVERY: Duration = Duration::from_secs(24 * 3_600);

// ---------------------------------------------------------------------------
// Health flag
// ---------------------------------------------------------------------------

/// Shared ingest health surfaced by the daemon's health endpoint.
#[derive(Debug, Default)]
pub struct IngestHealth {
    degraded: AtomicBool,
    consecutive_empty_ticks: AtomicU32,
}

impl IngestHealth {
    pub fn is_degraded(&self) -> bool {
        self.degraded.load(Ordering::Relaxed)
    }

    /// Record one tick's successful-upsert count and update the flag.
    pub fn record_tick(&self, successes: usize) {
        if successes == 0 {
            let empty = self.consecutive_empty_ticks.fetch_add(1, Ordering::Relaxed) + 1;
            if empty >= DEGRADED_AFTER_EMPTY_TICKS {
                self.degraded.store(true, Ordering::Relaxed);
            }
        } else {
            self.consecutive_empty_ticks.store(0, Ordering::Relaxed);
            self.degraded.store(false, Ordering::Relaxed);
        }
    }
}

// ---------------------------------------------------------------------------
// Ingester
// ---------------------------------------------------------------------------

pub struct Ingester {
    pool: PgPool,
    broker: Arc<dyn BrokerApi>,
    cfg: MarketDataConfig,
    health: Arc<IngestHealth>,
}

impl Ingester {
    pub fn new(pool: PgPool, broker: Arc<dyn BrokerApi>, cfg: MarketDataConfig) -> Self {
        Self {
            pool,
            broker,
            cfg,
            health: Arc::new(IngestHealth::default()),
        }
    }

    pub fn health(&self) -> Arc<IngestHealth> {
        Arc::clone(&self.health)
    }

    /// Backfill daily candles for every watchlist symbol.
    /// Returns the number of symbols that backfilled successfully.
    pub async fn backfill_all(&self) -> usize {
        let mut ok = 0usize;
        for symbol in &self.cfg.symbols {
            match self
                .broker
                .candles(symbol, self.cfg.candle_backfill, "1D")
                .await
            {
                Ok(candles) => {
                    match ata_db::md::upsert_candles(&self.pool, &candles).await {
                        Ok(written) => {
                            debug!(symbol, written, "candle backfill");
                            ok += 1;
                        }
                        Err(e) => warn!(symbol, error = %e, "candle persist failed"),
                    }
                }
                Err(e) => warn!(symbol, error = %e, "candle fetch failed"),
            }
        }
        ok
    }

    /// Refresh one quote per symbol. Returns the number of successful
    /// upserts; a per-symbol failure never aborts the tick.
    pub async fn refresh_quotes_tick(&self) -> usize {
        let mut ok = 0usize;
        for symbol in &self.cfg.symbols {
            match self.broker.quote(symbol).await {
                Ok(quote) => {
                    let age = chrono::Utc::now()
                        .signed_duration_since(quote.event_ts)
                        .num_seconds();
                    if age > self.cfg.stale_quote_secs as i64 {
                        warn!(symbol, age_secs = age, "quote is stale");
                    }
                    match ata_db::md::upsert_quote(&self.pool, &quote).await {
                        Ok(()) => ok += 1,
                        Err(e) => warn!(symbol, error = %e, "quote persist failed"),
                    }
                }
                Err(e) => warn!(symbol, error = %e, "quote fetch failed"),
            }
        }
        self.health.record_tick(ok);
        ok
    }

    /// Drive the ingest loop until `shutdown` flips true.
    pub async fn run(self, mut shutdown: watch::Receiver<bool>) {
        if self.cfg.symbols.is_empty() {
            info!("market data ingester disabled: empty watchlist");
            return;
        }

        info!(
            symbols = self.cfg.symbols.len(),
            interval_secs = self.cfg.ingest_interval_secs,
            backfill = self.cfg.candle_backfill,
            "market data ingester starting"
        );

        self.backfill_all().await;

        let mut ticker =
            tokio::time::interval(Duration::from_secs(self.cfg.ingest_interval_secs.max(1)));
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        let mut last_backfill = tokio::time::Instant::now();

        loop {
            tokio::select! {
                _ = ticker.tick() => {}
                _ = shutdown.changed() => {
                    if *shutdown.borrow() {
                        info!("market data ingester stopping");
                        return;
                    }
                    continue;
                }
            }

            let ok = self.refresh_quotes_tick().await;
            if self.health.is_degraded() {
                warn!("ingest health degraded: three consecutive empty ticks");
            }
            debug!(ok, "quote refresh tick");

            if last_backfill.elapsed() >= BACKFILL_EVERY {
                self.backfill_all().await;
                last_backfill = tokio::time::Instant::now();
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn health_degrades_after_three_empty_ticks() {
        let h = IngestHealth::default();
        assert!(!h.is_degraded());

        h.record_tick(0);
        h.record_tick(0);
        assert!(!h.is_degraded());
        h.record_tick(0);
        assert!(h.is_degraded());
    }

    #[test]
    fn one_success_resets_degradation() {
        let h = IngestHealth::default();
        for _ in 0..5 {
            h.record_tick(0);
        }
        assert!(h.is_degraded());

        h.record_tick(2);
        assert!(!h.is_degraded());

        // Needs three fresh empty ticks to degrade again.
        h.record_tick(0);
        h.record_tick(0);
        assert!(!h.is_degraded());
        h.record_tick(0);
        assert!(h.is_degraded());
    }
}
