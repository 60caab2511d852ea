//! Signal persistence: dedup-guarded insert, status lifecycle, expiry sweep.
//!
//! Dedup is a SELECT followed by a conditional INSERT; the unique index on
//! `(symbol, strategy_id, signal_type, generated_at_bucket)` closes the race
//! between two engines inserting in the same hour bucket. Expired signals do
//! not count against dedup - the probe matches only pending rows.

use anyhow::{anyhow, Context, Result};
use chrono::{DateTime, Duration, Utc};
use sqlx::{PgPool, Row};
use uuid::Uuid;

use ata_schemas::{Signal, SignalStatus, SignalType};

/// Hour index of `generated_at`; feeds the dedup unique index.
pub fn dedup_bucket(ts: DateTime<Utc>) -> i64 {
    ts.timestamp().div_euclid(3_600)
}

fn signal_from_row(row: &sqlx::postgres::PgRow) -> Result<Signal> {
    let signal_type: String = row.try_get("signal_type")?;
    let status: String = row.try_get("status")?;
    Ok(Signal {
        id: row.try_get("id")?,
        symbol: row.try_get("symbol")?,
        strategy_id: row.try_get("strategy_id")?,
        signal_type: SignalType::parse(&signal_type)
            .ok_or_else(|| anyhow!("invalid signal_type in db: {signal_type}"))?,
        confidence: row.try_get("confidence")?,
        entry_price: row.try_get("entry_price")?,
        stop_loss: row.try_get("stop_loss")?,
        take_profit: row.try_get("take_profit")?,
        reasoning: row.try_get("reasoning")?,
        status: SignalStatus::parse(&status)
            .ok_or_else(|| anyhow!("invalid signal status in db: {status}"))?,
        generated_at: row.try_get("generated_at")?,
        expires_at: row.try_get("expires_at")?,
        orchestration_run_id: row.try_get("orchestration_run_id")?,
        created_at: row.try_get("created_at")?,
    })
}

const SIGNAL_COLUMNS: &str = r#"
    id, symbol, strategy_id, signal_type, confidence, entry_price, stop_loss,
    take_profit, reasoning, status, generated_at, expires_at,
    orchestration_run_id, created_at
"#;

// ---------------------------------------------------------------------------
// Dedup probe + insert
// ---------------------------------------------------------------------------

/// True when a pending signal with the same `(symbol, strategy_id,
/// signal_type)` was generated inside the dedup window.
pub async fn has_active_duplicate(
    pool: &PgPool,
    symbol: &str,
    strategy_id: &str,
    signal_type: SignalType,
    now: DateTime<Utc>,
    window_secs: i64,
) -> Result<bool> {
    let since = now - Duration::seconds(window_secs);
    let (exists,): (bool,) = sqlx::query_as(
        r#"
        select exists (
            select 1
            from signals
            where symbol = $1
              and strategy_id = $2
              and signal_type = $3
              and status = 'pending'
              and generated_at > $4
        )
        "#,
    )
    .bind(symbol)
    .bind(strategy_id)
    .bind(signal_type.as_str())
    .bind(since)
    .fetch_one(pool)
    .await
    .context("has_active_duplicate failed")?;
    Ok(exists)
}

/// Insert a signal; returns `false` when the dedup unique index suppressed
/// the row (same symbol/strategy/type in the same hour bucket).
pub async fn insert_signal(pool: &PgPool, s: &Signal) -> Result<bool> {
    let row: Option<(Uuid,)> = sqlx::query_as(
        r#"
        insert into signals (
          id, symbol, strategy_id, signal_type, confidence, entry_price,
          stop_loss, take_profit, reasoning, status, generated_at,
          generated_at_bucket, expires_at, orchestration_run_id, created_at
        ) values ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15)
        on conflict (symbol, strategy_id, signal_type, generated_at_bucket) do nothing
        returning id
        "#,
    )
    .bind(s.id)
    .bind(&s.symbol)
    .bind(&s.strategy_id)
    .bind(s.signal_type.as_str())
    .bind(s.confidence)
    .bind(s.entry_price)
    .bind(s.stop_loss)
    .bind(s.take_profit)
    .bind(&s.reasoning)
    .bind(s.status.as_str())
    .bind(s.generated_at)
    .bind(dedup_bucket(s.generated_at))
    .bind(s.expires_at)
    .bind(s.orchestration_run_id)
    .bind(s.created_at)
    .fetch_optional(pool)
    .await
    .context("insert_signal failed")?;

    Ok(row.is_some())
}

// ---------------------------------------------------------------------------
// Reads
// ---------------------------------------------------------------------------

pub async fn fetch_signal(pool: &PgPool, id: Uuid) -> Result<Option<Signal>> {
    let row = sqlx::query(&format!(
        "select {SIGNAL_COLUMNS} from signals where id = $1"
    ))
    .bind(id)
    .fetch_optional(pool)
    .await
    .context("fetch_signal failed")?;

    row.map(|r| signal_from_row(&r)).transpose()
}

pub async fn list_signals(pool: &PgPool, symbol: Option<&str>, limit: i64) -> Result<Vec<Signal>> {
    let rows = sqlx::query(&format!(
        r#"
        select {SIGNAL_COLUMNS}
        from signals
        where $1::text is null or symbol = $1
        order by generated_at desc
        limit $2
        "#
    ))
    .bind(symbol)
    .bind(limit)
    .fetch_all(pool)
    .await
    .context("list_signals failed")?;

    rows.iter().map(signal_from_row).collect()
}

/// Most recent pending signals for one symbol - the orchestration gather
/// stage input.
pub async fn recent_pending_for_symbol(
    pool: &PgPool,
    symbol: &str,
    limit: i64,
) -> Result<Vec<Signal>> {
    let rows = sqlx::query(&format!(
        r#"
        select {SIGNAL_COLUMNS}
        from signals
        where symbol = $1 and status = 'pending'
        order by generated_at desc
        limit $2
        "#
    ))
    .bind(symbol)
    .bind(limit)
    .fetch_all(pool)
    .await
    .context("recent_pending_for_symbol failed")?;

    rows.iter().map(signal_from_row).collect()
}

// ---------------------------------------------------------------------------
// Status lifecycle
// ---------------------------------------------------------------------------

/// Check-and-set on signal status; returns `false` when the row was not in
/// the expected `from` status.
pub async fn update_signal_status(
    pool: &PgPool,
    id: Uuid,
    from: SignalStatus,
    to: SignalStatus,
) -> Result<bool> {
    let row: Option<(Uuid,)> = sqlx::query_as(
        r#"
        update signals
           set status = $1
         where id = $2
           and status = $3
        returning id
        "#,
    )
    .bind(to.as_str())
    .bind(id)
    .bind(from.as_str())
    .fetch_optional(pool)
    .await
    .context("update_signal_status failed")?;
    Ok(row.is_some())
}

/// Link the orchestration run that a signal triggered back into the signal
/// row. Idempotent: a second link with the same run id succeeds silently.
pub async fn link_orchestration_run(pool: &PgPool, signal_id: Uuid, run_id: Uuid) -> Result<()> {
    sqlx::query(
        r#"
        update signals
           set orchestration_run_id = $1
         where id = $2
        "#,
    )
    .bind(run_id)
    .bind(signal_id)
    .execute(pool)
    .await
    .context("link_orchestration_run failed")?;
    Ok(())
}

/// Idempotent expiry sweep: pending signals past `expires_at` become
/// expired. Returns the number of rows swept.
pub async fn expire_pending(pool: &PgPool, now: DateTime<Utc>) -> Result<u64> {
    let res = sqlx::query(
        r#"
        update signals
           set status = 'expired'
         where status = 'pending'
           and expires_at < $1
        "#,
    )
    .bind(now)
    .execute(pool)
    .await
    .context("expire_pending failed")?;
    Ok(res.rows_affected())
}
