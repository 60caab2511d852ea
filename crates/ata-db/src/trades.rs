//! Trade approvals and realized trades owned by the execution engine.

use anyhow::{anyhow, Context, Result};
use sqlx::{PgPool, Row};
use uuid::Uuid;

use ata_schemas::{Trade, TradeApproval, TradeDirection, TradeStatus};

fn trade_from_row(row: &sqlx::postgres::PgRow) -> Result<Trade> {
    let direction: String = row.try_get("direction")?;
    let status: String = row.try_get("status")?;
    Ok(Trade {
        id: row.try_get("id")?,
        symbol: row.try_get("symbol")?,
        direction: TradeDirection::parse(&direction)
            .ok_or_else(|| anyhow!("invalid trade direction in db: {direction}"))?,
        quantity: row.try_get("quantity")?,
        entry_price: row.try_get("entry_price")?,
        stop_loss: row.try_get("stop_loss")?,
        take_profit: row.try_get("take_profit")?,
        strategy_id: row.try_get("strategy_id")?,
        signal_id: row.try_get("signal_id")?,
        order_id: row.try_get("order_id")?,
        status: TradeStatus::parse(&status)
            .ok_or_else(|| anyhow!("invalid trade status in db: {status}"))?,
        risk_amount: row.try_get("risk_amount")?,
        risk_percent: row.try_get("risk_percent")?,
        position_value: row.try_get("position_value")?,
        rr_ratio: row.try_get("rr_ratio")?,
        created_at: row.try_get("created_at")?,
        exit_price: row.try_get("exit_price")?,
        exit_time: row.try_get("exit_time")?,
        pnl: row.try_get("pnl")?,
        pnl_percent: row.try_get("pnl_percent")?,
        outcome: row.try_get("outcome")?,
        hold_duration_secs: row.try_get("hold_duration_secs")?,
        error: row.try_get("error")?,
    })
}

const TRADE_COLUMNS: &str = r#"
    id, symbol, direction, quantity, entry_price, stop_loss, take_profit,
    strategy_id, signal_id, order_id, status, risk_amount, risk_percent,
    position_value, rr_ratio, created_at, exit_price, exit_time, pnl,
    pnl_percent, outcome, hold_duration_secs, error
"#;

// ---------------------------------------------------------------------------
// Trade approvals
// ---------------------------------------------------------------------------

/// Record the human decision over a signal. Upsert keyed on `signal_id` so a
/// re-approval overwrites rather than duplicates.
pub async fn upsert_trade_approval(pool: &PgPool, a: &TradeApproval) -> Result<()> {
    sqlx::query(
        r#"
        insert into trade_approvals (
          signal_id, orchestration_run_id, approved, approved_by, approved_at,
          modification_notes, order_id
        ) values ($1, $2, $3, $4, $5, $6, $7)
        on conflict (signal_id) do update
            set orchestration_run_id = excluded.orchestration_run_id,
                approved             = excluded.approved,
                approved_by          = excluded.approved_by,
                approved_at          = excluded.approved_at,
                modification_notes   = excluded.modification_notes
        "#,
    )
    .bind(a.signal_id)
    .bind(a.orchestration_run_id)
    .bind(a.approved)
    .bind(&a.approved_by)
    .bind(a.approved_at)
    .bind(&a.modification_notes)
    .bind(&a.order_id)
    .execute(pool)
    .await
    .context("upsert_trade_approval failed")?;
    Ok(())
}

pub async fn fetch_trade_approval(pool: &PgPool, signal_id: Uuid) -> Result<Option<TradeApproval>> {
    let row = sqlx::query(
        r#"
        select signal_id, orchestration_run_id, approved, approved_by,
               approved_at, modification_notes, order_id
        from trade_approvals
        where signal_id = $1
        "#,
    )
    .bind(signal_id)
    .fetch_optional(pool)
    .await
    .context("fetch_trade_approval failed")?;

    let Some(row) = row else { return Ok(None) };
    Ok(Some(TradeApproval {
        signal_id: row.try_get("signal_id")?,
        orchestration_run_id: row.try_get("orchestration_run_id")?,
        approved: row.try_get("approved")?,
        approved_by: row.try_get("approved_by")?,
        approved_at: row.try_get("approved_at")?,
        modification_notes: row.try_get("modification_notes")?,
        order_id: row.try_get("order_id")?,
    }))
}

/// Stamp the broker order id onto the approval once the submit is acked.
pub async fn set_approval_order_id(pool: &PgPool, signal_id: Uuid, order_id: &str) -> Result<()> {
    sqlx::query(
        r#"
        update trade_approvals
           set order_id = $1
         where signal_id = $2
        "#,
    )
    .bind(order_id)
    .bind(signal_id)
    .execute(pool)
    .await
    .context("set_approval_order_id failed")?;
    Ok(())
}

// ---------------------------------------------------------------------------
// Trades
// ---------------------------------------------------------------------------

pub async fn insert_trade(pool: &PgPool, t: &Trade) -> Result<()> {
    sqlx::query(
        r#"
        insert into trades (
          id, symbol, direction, quantity, entry_price, stop_loss, take_profit,
          strategy_id, signal_id, order_id, status, risk_amount, risk_percent,
          position_value, rr_ratio, created_at, error
        ) values ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16, $17)
        "#,
    )
    .bind(t.id)
    .bind(&t.symbol)
    .bind(t.direction.as_str())
    .bind(t.quantity)
    .bind(t.entry_price)
    .bind(t.stop_loss)
    .bind(t.take_profit)
    .bind(&t.strategy_id)
    .bind(t.signal_id)
    .bind(&t.order_id)
    .bind(t.status.as_str())
    .bind(t.risk_amount)
    .bind(t.risk_percent)
    .bind(t.position_value)
    .bind(t.rr_ratio)
    .bind(t.created_at)
    .bind(&t.error)
    .execute(pool)
    .await
    .context("insert_trade failed")?;
    Ok(())
}

pub async fn fetch_trade(pool: &PgPool, id: Uuid) -> Result<Option<Trade>> {
    let row = sqlx::query(&format!("select {TRADE_COLUMNS} from trades where id = $1"))
        .bind(id)
        .fetch_optional(pool)
        .await
        .context("fetch_trade failed")?;

    row.map(|r| trade_from_row(&r)).transpose()
}

pub async fn list_trades(
    pool: &PgPool,
    symbol: Option<&str>,
    strategy_id: Option<&str>,
    limit: i64,
) -> Result<Vec<Trade>> {
    let rows = sqlx::query(&format!(
        r#"
        select {TRADE_COLUMNS}
        from trades
        where ($1::text is null or symbol = $1)
          and ($2::text is null or strategy_id = $2)
        order by created_at desc
        limit $3
        "#
    ))
    .bind(symbol)
    .bind(strategy_id)
    .bind(limit)
    .fetch_all(pool)
    .await
    .context("list_trades failed")?;

    rows.iter().map(trade_from_row).collect()
}

/// Non-terminal trades the reconciler polls: status pending or open, with a
/// broker order id.
pub async fn list_reconcilable_trades(pool: &PgPool) -> Result<Vec<Trade>> {
    let rows = sqlx::query(&format!(
        r#"
        select {TRADE_COLUMNS}
        from trades
        where status in ('pending','open')
          and order_id is not null
        order by created_at asc
        "#
    ))
    .fetch_all(pool)
    .await
    .context("list_reconcilable_trades failed")?;

    rows.iter().map(trade_from_row).collect()
}

/// Reconciler update: status plus observed fill price. Idempotent - writing
/// the same status twice is a no-op.
pub async fn update_trade_from_broker(
    pool: &PgPool,
    id: Uuid,
    status: TradeStatus,
    fill_price: Option<f64>,
) -> Result<()> {
    sqlx::query(
        r#"
        update trades
           set status      = $1,
               entry_price = coalesce($2, entry_price)
         where id = $3
        "#,
    )
    .bind(status.as_str())
    .bind(fill_price)
    .bind(id)
    .execute(pool)
    .await
    .context("update_trade_from_broker failed")?;
    Ok(())
}

/// Stamp the broker order id after a successful submit.
pub async fn set_trade_order_id(pool: &PgPool, id: Uuid, order_id: &str) -> Result<()> {
    sqlx::query(
        r#"
        update trades
           set order_id = $1
         where id = $2
        "#,
    )
    .bind(order_id)
    .bind(id)
    .execute(pool)
    .await
    .context("set_trade_order_id failed")?;
    Ok(())
}

/// Mark a trade rejected with the broker's final error message.
pub async fn mark_trade_rejected(pool: &PgPool, id: Uuid, error: &str) -> Result<()> {
    sqlx::query(
        r#"
        update trades
           set status = 'rejected',
               error  = $1
         where id = $2
        "#,
    )
    .bind(error)
    .bind(id)
    .execute(pool)
    .await
    .context("mark_trade_rejected failed")?;
    Ok(())
}

/// Realized P&L over trades that closed today (UTC). The execution engine
/// adds unrealized P&L from broker positions on top of this.
pub async fn realized_pnl_today(pool: &PgPool) -> Result<f64> {
    let (pnl,): (Option<f64>,) = sqlx::query_as(
        r#"
        select sum(pnl)
        from trades
        where exit_time >= date_trunc('day', now())
        "#,
    )
    .fetch_one(pool)
    .await
    .context("realized_pnl_today failed")?;
    Ok(pnl.unwrap_or(0.0))
}
