//! Artifact store persistence: immutable artifacts, the single approval row
//! per artifact, and validation reports.
//!
//! State transitions are an atomic check-and-set: the UPDATE is keyed on the
//! expected `from` state, so two racing promoters cannot both succeed.

use anyhow::{anyhow, Context, Result};
use chrono::Utc;
use sqlx::{PgPool, Row};
use uuid::Uuid;

use ata_artifacts::{
    Approval, ApprovalState, Artifact, ArtifactError, NewArtifact, RiskProfile, ValidationReport,
};

use crate::is_unique_constraint_violation;

// ---------------------------------------------------------------------------
// Row mapping
// ---------------------------------------------------------------------------

fn artifact_from_row(row: &sqlx::postgres::PgRow) -> Result<Artifact> {
    let risk_profile: serde_json::Value = row.try_get("risk_profile")?;
    Ok(Artifact {
        id: row.try_get("id")?,
        artifact_id: row.try_get("artifact_id")?,
        strategy_name: row.try_get("strategy_name")?,
        strategy_version: row.try_get("strategy_version")?,
        params: row.try_get("params")?,
        risk_profile: serde_json::from_value::<RiskProfile>(risk_profile)
            .context("risk_profile column is not a valid RiskProfile")?,
        hash: row.try_get("hash")?,
        created_by: row.try_get("created_by")?,
        created_at: row.try_get("created_at")?,
    })
}

fn approval_from_row(row: &sqlx::postgres::PgRow) -> Result<Approval> {
    let state: String = row.try_get("state")?;
    Ok(Approval {
        artifact_id: row.try_get("artifact_id")?,
        state: ApprovalState::parse(&state)
            .ok_or_else(|| anyhow!("invalid approval state in db: {state}"))?,
        approved_by: row.try_get("approved_by")?,
        approved_at: row.try_get("approved_at")?,
        reason: row.try_get("reason")?,
    })
}

// ---------------------------------------------------------------------------
// Create / read
// ---------------------------------------------------------------------------

/// Insert a new artifact in DRAFT.
///
/// Fails with [`ArtifactError::DuplicateHash`] when an artifact with the
/// same content hash already exists. The artifact row and its approval row
/// are created in one transaction.
pub async fn create_artifact(pool: &PgPool, input: &NewArtifact) -> Result<Artifact> {
    let id = Uuid::new_v4();
    let hash = input.content_hash();
    let created_at = Utc::now();

    let mut tx = pool.begin().await.context("create_artifact begin failed")?;

    let res = sqlx::query(
        r#"
        insert into artifacts (
          id, artifact_id, strategy_name, strategy_version, params, risk_profile,
          hash, created_by, created_at
        ) values ($1, $2, $3, $4, $5, $6, $7, $8, $9)
        "#,
    )
    .bind(id)
    .bind(input.artifact_id())
    .bind(&input.strategy_name)
    .bind(&input.strategy_version)
    .bind(&input.params)
    .bind(serde_json::to_value(&input.risk_profile).context("serialize risk_profile failed")?)
    .bind(&hash)
    .bind(&input.created_by)
    .bind(created_at)
    .execute(&mut *tx)
    .await;

    if let Err(e) = res {
        if is_unique_constraint_violation(&e, "uq_artifacts_hash") {
            return Err(anyhow::Error::new(ArtifactError::DuplicateHash { hash }));
        }
        return Err(anyhow::Error::new(e).context("create_artifact insert failed"));
    }

    sqlx::query(
        r#"
        insert into approvals (artifact_id, state)
        values ($1, 'DRAFT')
        "#,
    )
    .bind(id)
    .execute(&mut *tx)
    .await
    .context("create_artifact approval insert failed")?;

    tx.commit().await.context("create_artifact commit failed")?;

    Ok(Artifact {
        id,
        artifact_id: input.artifact_id(),
        strategy_name: input.strategy_name.clone(),
        strategy_version: input.strategy_version.clone(),
        params: input.params.clone(),
        risk_profile: input.risk_profile.clone(),
        hash,
        created_by: input.created_by.clone(),
        created_at,
    })
}

pub async fn fetch_artifact(pool: &PgPool, id: Uuid) -> Result<Artifact> {
    let row = sqlx::query(
        r#"
        select id, artifact_id, strategy_name, strategy_version, params,
               risk_profile, hash, created_by, created_at
        from artifacts
        where id = $1
        "#,
    )
    .bind(id)
    .fetch_optional(pool)
    .await
    .context("fetch_artifact failed")?;

    match row {
        Some(row) => artifact_from_row(&row),
        None => Err(anyhow::Error::new(ArtifactError::NotFound { id })),
    }
}

/// List artifacts together with their current approval state, optionally
/// filtered to a state set. Newest first.
pub async fn list_artifacts(
    pool: &PgPool,
    states: Option<&[ApprovalState]>,
) -> Result<Vec<(Artifact, ApprovalState)>> {
    let filter: Option<Vec<String>> =
        states.map(|s| s.iter().map(|st| st.as_str().to_string()).collect());

    let rows = sqlx::query(
        r#"
        select a.id, a.artifact_id, a.strategy_name, a.strategy_version, a.params,
               a.risk_profile, a.hash, a.created_by, a.created_at, ap.state
        from artifacts a
        join approvals ap on ap.artifact_id = a.id
        where $1::text[] is null or ap.state = any($1)
        order by a.created_at desc
        "#,
    )
    .bind(filter)
    .fetch_all(pool)
    .await
    .context("list_artifacts failed")?;

    let mut out = Vec::with_capacity(rows.len());
    for row in rows {
        let state: String = row.try_get("state")?;
        let state = ApprovalState::parse(&state)
            .ok_or_else(|| anyhow!("invalid approval state in db: {state}"))?;
        out.push((artifact_from_row(&row)?, state));
    }
    Ok(out)
}

/// Artifacts whose current state is APPROVED or ACTIVE - the only states the
/// registry loader may consume. A REVOKED artifact never appears here.
pub async fn list_approved_artifacts(pool: &PgPool) -> Result<Vec<Artifact>> {
    let rows = list_artifacts(
        pool,
        Some(&[ApprovalState::Approved, ApprovalState::Active]),
    )
    .await?;
    Ok(rows.into_iter().map(|(a, _)| a).collect())
}

pub async fn fetch_approval(pool: &PgPool, id: Uuid) -> Result<Approval> {
    let row = sqlx::query(
        r#"
        select artifact_id, state, approved_by, approved_at, reason
        from approvals
        where artifact_id = $1
        "#,
    )
    .bind(id)
    .fetch_optional(pool)
    .await
    .context("fetch_approval failed")?;

    match row {
        Some(row) => approval_from_row(&row),
        None => Err(anyhow::Error::new(ArtifactError::NotFound { id })),
    }
}

// ---------------------------------------------------------------------------
// State machine transition
// ---------------------------------------------------------------------------

/// Atomic check-and-set on the approval state.
///
/// Reads the current state, validates the transition against the legal
/// table, then updates keyed on the expected `from` state. If a concurrent
/// writer moved the row first, the UPDATE matches zero rows and the call
/// fails with [`ArtifactError::IllegalTransition`] - the second observer of
/// a repeated transition always loses.
pub async fn update_approval_state(
    pool: &PgPool,
    id: Uuid,
    to: ApprovalState,
    actor: &str,
    reason: Option<&str>,
) -> Result<Approval> {
    let current = fetch_approval(pool, id).await?;
    let from = current.state;

    if !from.can_transition(to) {
        return Err(anyhow::Error::new(ArtifactError::IllegalTransition {
            from,
            to,
        }));
    }

    let approved_at = Utc::now();
    let row = sqlx::query(
        r#"
        update approvals
           set state       = $1,
               approved_by = $2,
               approved_at = $3,
               reason      = $4
         where artifact_id = $5
           and state       = $6
        returning artifact_id, state, approved_by, approved_at, reason
        "#,
    )
    .bind(to.as_str())
    .bind(actor)
    .bind(approved_at)
    .bind(reason)
    .bind(id)
    .bind(from.as_str())
    .fetch_optional(pool)
    .await
    .context("update_approval_state failed")?;

    match row {
        Some(row) => approval_from_row(&row),
        // Lost the CAS race: someone else transitioned the row first.
        None => Err(anyhow::Error::new(ArtifactError::IllegalTransition {
            from,
            to,
        })),
    }
}

// ---------------------------------------------------------------------------
// Validation reports
// ---------------------------------------------------------------------------

/// Insert a validation report, idempotent on `(artifact_id, run_id)`.
/// Returns `false` when the report was already recorded.
pub async fn create_validation_report(pool: &PgPool, report: &ValidationReport) -> Result<bool> {
    let row: Option<(Uuid,)> = sqlx::query_as(
        r#"
        insert into validation_reports (
          artifact_id, run_id, test_type, passed, metrics, errors, warnings,
          started_at, completed_at, duration_seconds
        ) values ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)
        on conflict (artifact_id, run_id) do nothing
        returning artifact_id
        "#,
    )
    .bind(report.artifact_id)
    .bind(report.run_id)
    .bind(&report.test_type)
    .bind(report.passed)
    .bind(&report.metrics)
    .bind(serde_json::to_value(&report.errors).context("serialize errors failed")?)
    .bind(serde_json::to_value(&report.warnings).context("serialize warnings failed")?)
    .bind(report.started_at)
    .bind(report.completed_at)
    .bind(report.duration_seconds)
    .fetch_optional(pool)
    .await
    .context("create_validation_report failed")?;

    Ok(row.is_some())
}

pub async fn list_validation_reports(pool: &PgPool, id: Uuid) -> Result<Vec<ValidationReport>> {
    let rows = sqlx::query(
        r#"
        select artifact_id, run_id, test_type, passed, metrics, errors, warnings,
               started_at, completed_at, duration_seconds
        from validation_reports
        where artifact_id = $1
        order by started_at desc
        "#,
    )
    .bind(id)
    .fetch_all(pool)
    .await
    .context("list_validation_reports failed")?;

    let mut out = Vec::with_capacity(rows.len());
    for row in rows {
        let errors: serde_json::Value = row.try_get("errors")?;
        let warnings: serde_json::Value = row.try_get("warnings")?;
        out.push(ValidationReport {
            artifact_id: row.try_get("artifact_id")?,
            run_id: row.try_get("run_id")?,
            test_type: row.try_get("test_type")?,
            passed: row.try_get("passed")?,
            metrics: row.try_get("metrics")?,
            errors: serde_json::from_value(errors).context("errors column malformed")?,
            warnings: serde_json::from_value(warnings).context("warnings column malformed")?,
            started_at: row.try_get("started_at")?,
            completed_at: row.try_get("completed_at")?,
            duration_seconds: row.try_get("duration_seconds")?,
        });
    }
    Ok(out)
}
