//! Candle and quote persistence owned by the market data ingester.
//!
//! Candles upsert on `(symbol, ts)`; quotes upsert on `symbol`. Ingesting
//! the same quote twice leaves the row unchanged except for `updated_at`.

use anyhow::{Context, Result};
use sqlx::{PgPool, Row};

use ata_schemas::{Candle, Quote};

pub async fn upsert_candle(pool: &PgPool, c: &Candle) -> Result<()> {
    sqlx::query(
        r#"
        insert into candles (symbol, ts, open, high, low, close, volume)
        values ($1, $2, $3, $4, $5, $6, $7)
        on conflict (symbol, ts) do update
            set open   = excluded.open,
                high   = excluded.high,
                low    = excluded.low,
                close  = excluded.close,
                volume = excluded.volume
        "#,
    )
    .bind(&c.symbol)
    .bind(c.ts)
    .bind(c.open)
    .bind(c.high)
    .bind(c.low)
    .bind(c.close)
    .bind(c.volume)
    .execute(pool)
    .await
    .context("upsert_candle failed")?;
    Ok(())
}

/// Upsert a batch of candles; returns how many rows were written.
/// Insane rows (OHLC violation, negative volume) are skipped, not inserted.
pub async fn upsert_candles(pool: &PgPool, candles: &[Candle]) -> Result<u64> {
    let mut written = 0u64;
    for c in candles {
        if !c.is_sane() {
            continue;
        }
        upsert_candle(pool, c).await?;
        written += 1;
    }
    Ok(written)
}

pub async fn upsert_quote(pool: &PgPool, q: &Quote) -> Result<()> {
    sqlx::query(
        r#"
        insert into quotes (
          symbol, price, bid, ask, bid_size, ask_size, volume, event_ts, exchange, updated_at
        ) values ($1, $2, $3, $4, $5, $6, $7, $8, $9, now())
        on conflict (symbol) do update
            set price      = excluded.price,
                bid        = excluded.bid,
                ask        = excluded.ask,
                bid_size   = excluded.bid_size,
                ask_size   = excluded.ask_size,
                volume     = excluded.volume,
                event_ts   = excluded.event_ts,
                exchange   = excluded.exchange,
                updated_at = now()
        "#,
    )
    .bind(&q.symbol)
    .bind(q.price)
    .bind(q.bid)
    .bind(q.ask)
    .bind(q.bid_size)
    .bind(q.ask_size)
    .bind(q.volume)
    .bind(q.event_ts)
    .bind(&q.exchange)
    .execute(pool)
    .await
    .context("upsert_quote failed")?;
    Ok(())
}

pub async fn fetch_quote(pool: &PgPool, symbol: &str) -> Result<Option<Quote>> {
    let row = sqlx::query(
        r#"
        select symbol, price, bid, ask, bid_size, ask_size, volume, event_ts, exchange
        from quotes
        where symbol = $1
        "#,
    )
    .bind(symbol)
    .fetch_optional(pool)
    .await
    .context("fetch_quote failed")?;

    let Some(row) = row else { return Ok(None) };

    Ok(Some(Quote {
        symbol: row.try_get("symbol")?,
        price: row.try_get("price")?,
        bid: row.try_get("bid")?,
        ask: row.try_get("ask")?,
        bid_size: row.try_get("bid_size")?,
        ask_size: row.try_get("ask_size")?,
        volume: row.try_get("volume")?,
        event_ts: row.try_get("event_ts")?,
        exchange: row.try_get("exchange")?,
    }))
}

/// The most recent `limit` candles for a symbol, returned oldest-first so
/// indicator math can walk the series forward.
pub async fn fetch_recent_candles(pool: &PgPool, symbol: &str, limit: i64) -> Result<Vec<Candle>> {
    let rows = sqlx::query(
        r#"
        select symbol, ts, open, high, low, close, volume
        from candles
        where symbol = $1
        order by ts desc
        limit $2
        "#,
    )
    .bind(symbol)
    .bind(limit)
    .fetch_all(pool)
    .await
    .context("fetch_recent_candles failed")?;

    let mut out = Vec::with_capacity(rows.len());
    for row in rows {
        out.push(Candle {
            symbol: row.try_get("symbol")?,
            ts: row.try_get("ts")?,
            open: row.try_get("open")?,
            high: row.try_get("high")?,
            low: row.try_get("low")?,
            close: row.try_get("close")?,
            volume: row.try_get("volume")?,
        });
    }
    out.reverse();
    Ok(out)
}
