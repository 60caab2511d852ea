//! Orchestration run lifecycle: running -> completed | failed.

use anyhow::{anyhow, Context, Result};
use chrono::Utc;
use sqlx::{PgPool, Row};
use uuid::Uuid;

use ata_schemas::{OrchestrationRun, OrchestrationStatus, TriggerType};

fn run_from_row(row: &sqlx::postgres::PgRow) -> Result<OrchestrationRun> {
    let trigger_type: String = row.try_get("trigger_type")?;
    let status: String = row.try_get("status")?;
    Ok(OrchestrationRun {
        id: row.try_get("id")?,
        symbol: row.try_get("symbol")?,
        trigger_type: TriggerType::parse(&trigger_type)
            .ok_or_else(|| anyhow!("invalid trigger_type in db: {trigger_type}"))?,
        trigger_id: row.try_get("trigger_id")?,
        status: OrchestrationStatus::parse(&status)
            .ok_or_else(|| anyhow!("invalid run status in db: {status}"))?,
        started_at: row.try_get("started_at")?,
        completed_at: row.try_get("completed_at")?,
        agent_suggestion: row.try_get("agent_suggestion")?,
        confidence: row.try_get("confidence")?,
        reasoning: row.try_get("reasoning")?,
        memories_recalled: row.try_get("memories_recalled")?,
        error: row.try_get("error")?,
    })
}

const RUN_COLUMNS: &str = r#"
    id, symbol, trigger_type, trigger_id, status, started_at, completed_at,
    agent_suggestion, confidence, reasoning, memories_recalled, error
"#;

/// Create a run row in `running`. Every orchestration invocation starts here.
pub async fn insert_run(
    pool: &PgPool,
    symbol: &str,
    trigger_type: TriggerType,
    trigger_id: Option<Uuid>,
) -> Result<OrchestrationRun> {
    let run = OrchestrationRun {
        id: Uuid::new_v4(),
        symbol: symbol.to_string(),
        trigger_type,
        trigger_id,
        status: OrchestrationStatus::Running,
        started_at: Utc::now(),
        completed_at: None,
        agent_suggestion: None,
        confidence: None,
        reasoning: None,
        memories_recalled: 0,
        error: None,
    };

    sqlx::query(
        r#"
        insert into orchestration_runs (
          id, symbol, trigger_type, trigger_id, status, started_at, memories_recalled
        ) values ($1, $2, $3, $4, 'running', $5, 0)
        "#,
    )
    .bind(run.id)
    .bind(&run.symbol)
    .bind(run.trigger_type.as_str())
    .bind(run.trigger_id)
    .bind(run.started_at)
    .execute(pool)
    .await
    .context("insert_run failed")?;

    Ok(run)
}

/// Transition running -> completed with the planner's verdict.
pub async fn complete_run(
    pool: &PgPool,
    id: Uuid,
    agent_suggestion: &str,
    confidence: f64,
    reasoning: &str,
    memories_recalled: i32,
) -> Result<()> {
    sqlx::query(
        r#"
        update orchestration_runs
           set status            = 'completed',
               completed_at      = now(),
               agent_suggestion  = $1,
               confidence        = $2,
               reasoning         = $3,
               memories_recalled = $4
         where id = $5
           and status = 'running'
        "#,
    )
    .bind(agent_suggestion)
    .bind(confidence)
    .bind(reasoning)
    .bind(memories_recalled)
    .bind(id)
    .execute(pool)
    .await
    .context("complete_run failed")?;
    Ok(())
}

/// Transition running -> failed with a reason (`cancelled`,
/// `planner_malformed`, or an upstream error message).
pub async fn fail_run(pool: &PgPool, id: Uuid, error: &str) -> Result<()> {
    sqlx::query(
        r#"
        update orchestration_runs
           set status       = 'failed',
               completed_at = now(),
               error        = $1
         where id = $2
           and status = 'running'
        "#,
    )
    .bind(error)
    .bind(id)
    .execute(pool)
    .await
    .context("fail_run failed")?;
    Ok(())
}

pub async fn fetch_run(pool: &PgPool, id: Uuid) -> Result<Option<OrchestrationRun>> {
    let row = sqlx::query(&format!(
        "select {RUN_COLUMNS} from orchestration_runs where id = $1"
    ))
    .bind(id)
    .fetch_optional(pool)
    .await
    .context("fetch_run failed")?;

    row.map(|r| run_from_row(&r)).transpose()
}

pub async fn list_runs(pool: &PgPool, limit: i64) -> Result<Vec<OrchestrationRun>> {
    let rows = sqlx::query(&format!(
        r#"
        select {RUN_COLUMNS}
        from orchestration_runs
        order by started_at desc
        limit $1
        "#
    ))
    .bind(limit)
    .fetch_all(pool)
    .await
    .context("list_runs failed")?;

    rows.iter().map(run_from_row).collect()
}
