//! Ingester against a paper broker and a real database: backfill persists
//! candles, quote ticks upsert, and per-symbol failures degrade health
//! without aborting the tick.

use std::sync::Arc;

use ata_broker::{BrokerAccount, PaperBroker};
use ata_config::MarketDataConfig;
use ata_md::Ingester;
use ata_schemas::{Candle, Quote};
use chrono::{Duration, TimeZone, Utc};
use sqlx::PgPool;
use uuid::Uuid;

async fn pool_or_skip() -> Option<PgPool> {
    if std::env::var(ata_db::ENV_DB_URL).is_err() {
        eprintln!("skipping: DATABASE_URL not set");
        return None;
    }
    Some(ata_db::testkit_db_pool().await.expect("db pool"))
}

fn daily_candles(symbol: &str, n: usize) -> Vec<Candle> {
    let start = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
    (0..n)
        .map(|i| Candle {
            symbol: symbol.to_string(),
            ts: start + Duration::days(i as i64),
            open: 100.0 + i as f64,
            high: 101.0 + i as f64,
            low: 99.0 + i as f64,
            close: 100.5 + i as f64,
            volume: 1_000 + i as i64,
        })
        .collect()
}

fn quote(symbol: &str, price: f64) -> Quote {
    Quote {
        symbol: symbol.to_string(),
        price,
        bid: Some(price - 0.05),
        ask: Some(price + 0.05),
        bid_size: Some(100),
        ask_size: Some(100),
        volume: Some(1_000_000),
        event_ts: Utc::now(),
        exchange: Some("SMART".to_string()),
    }
}

fn cfg(symbols: Vec<String>) -> MarketDataConfig {
    MarketDataConfig {
        symbols,
        ingest_interval_secs: 60,
        candle_backfill: 250,
        stale_quote_secs: 120,
    }
}

#[tokio::test]
async fn backfill_persists_candles_and_tick_upserts_quotes() {
    let Some(pool) = pool_or_skip().await else {
        return;
    };

    // Unique symbol per run so re-runs do not interfere.
    let symbol = format!("TK{}", &Uuid::new_v4().simple().to_string()[..8].to_uppercase());

    let broker = Arc::new(PaperBroker::new(BrokerAccount::default()));
    broker.set_candles(&symbol, daily_candles(&symbol, 30));
    broker.set_quote(quote(&symbol, 130.25));

    let ingester = Ingester::new(pool.clone(), broker.clone(), cfg(vec![symbol.clone()]));

    assert_eq!(ingester.backfill_all().await, 1);
    let candles = ata_db::md::fetch_recent_candles(&pool, &symbol, 50)
        .await
        .expect("candles");
    assert_eq!(candles.len(), 30);
    // Oldest-first ordering for indicator math.
    assert!(candles.windows(2).all(|w| w[0].ts < w[1].ts));

    assert_eq!(ingester.refresh_quotes_tick().await, 1);
    let q = ata_db::md::fetch_quote(&pool, &symbol)
        .await
        .expect("query")
        .expect("quote row");
    assert_eq!(q.price, 130.25);

    // Same quote again: upsert leaves the row unchanged.
    assert_eq!(ingester.refresh_quotes_tick().await, 1);
    let q2 = ata_db::md::fetch_quote(&pool, &symbol)
        .await
        .expect("query")
        .expect("quote row");
    assert_eq!(q2, q);
    assert!(!ingester.health().is_degraded());
}

#[tokio::test]
async fn failing_symbol_is_skipped_and_health_degrades() {
    let Some(pool) = pool_or_skip().await else {
        return;
    };

    let good = format!("TK{}", &Uuid::new_v4().simple().to_string()[..8].to_uppercase());
    let missing = format!("TK{}", &Uuid::new_v4().simple().to_string()[..8].to_uppercase());

    let broker = Arc::new(PaperBroker::new(BrokerAccount::default()));
    broker.set_quote(quote(&good, 55.5));
    // No quote seeded for `missing`: its fetch fails every tick.

    let ingester = Ingester::new(
        pool.clone(),
        broker.clone(),
        cfg(vec![missing.clone(), good.clone()]),
    );

    // The failing symbol does not abort the tick; the good one still lands.
    assert_eq!(ingester.refresh_quotes_tick().await, 1);
    assert!(ata_db::md::fetch_quote(&pool, &good)
        .await
        .expect("query")
        .is_some());
    assert!(ata_db::md::fetch_quote(&pool, &missing)
        .await
        .expect("query")
        .is_none());

    // All-failing watchlist: three empty ticks flip the degradation flag.
    let dead = Ingester::new(pool.clone(), broker, cfg(vec![missing]));
    for _ in 0..3 {
        assert_eq!(dead.refresh_quotes_tick().await, 0);
    }
    assert!(dead.health().is_degraded());
}
