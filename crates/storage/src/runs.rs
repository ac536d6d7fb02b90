//! Row-level queries for runs, fingerprints, decisions and placement intents.

use crate::models::{DecisionRow, FingerprintRow, IntentRow, NewDecision, RunRow};
use crate::Result;
use sqlx::SqlitePool;

pub async fn insert_run(pool: &SqlitePool, run: &RunRow) -> Result<()> {
    sqlx::query(
        r#"
        INSERT INTO runs (run_id, source_root, output_root, started_at, dry_run, status, finished_at)
        VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
        "#,
    )
    .bind(&run.run_id)
    .bind(&run.source_root)
    .bind(&run.output_root)
    .bind(&run.started_at)
    .bind(run.dry_run)
    .bind(&run.status)
    .bind(&run.finished_at)
    .execute(pool)
    .await?;
    Ok(())
}

pub async fn get_run(pool: &SqlitePool, run_id: &str) -> Result<Option<RunRow>> {
    let row = sqlx::query_as::<_, RunRow>("SELECT * FROM runs WHERE run_id = ?1")
        .bind(run_id)
        .fetch_optional(pool)
        .await?;
    Ok(row)
}

/// Most recent run over `source_root` that never reached `completed`.
pub async fn latest_unfinished_run(pool: &SqlitePool, source_root: &str) -> Result<Option<RunRow>> {
    let row = sqlx::query_as::<_, RunRow>(
        r#"
        SELECT * FROM runs
        WHERE source_root = ?1 AND status != 'completed'
        ORDER BY started_at DESC
        LIMIT 1
        "#,
    )
    .bind(source_root)
    .fetch_optional(pool)
    .await?;
    Ok(row)
}

pub async fn latest_run(pool: &SqlitePool) -> Result<Option<RunRow>> {
    let row = sqlx::query_as::<_, RunRow>("SELECT * FROM runs ORDER BY started_at DESC LIMIT 1")
        .fetch_optional(pool)
        .await?;
    Ok(row)
}

pub async fn set_run_status(
    pool: &SqlitePool,
    run_id: &str,
    status: &str,
    finished: bool,
) -> Result<()> {
    sqlx::query(
        r#"
        UPDATE runs
        SET status = ?2,
            finished_at = CASE WHEN ?3 THEN strftime('%Y-%m-%dT%H:%M:%fZ','now') ELSE NULL END
        WHERE run_id = ?1
        "#,
    )
    .bind(run_id)
    .bind(status)
    .bind(finished)
    .execute(pool)
    .await?;
    Ok(())
}

/// Registers fingerprints as pending in one transaction. Already processed
/// fingerprints keep their state; pending ones get their path list refreshed.
pub async fn upsert_pending(
    pool: &SqlitePool,
    run_id: &str,
    entries: &[(String, String)],
) -> Result<()> {
    let mut tx = pool.begin().await?;
    for (fingerprint, paths_json) in entries {
        sqlx::query(
            r#"
            INSERT INTO fingerprints (run_id, fingerprint, state, paths_json)
            VALUES (?1, ?2, 'pending', ?3)
            ON CONFLICT(run_id, fingerprint) DO UPDATE SET
                paths_json = excluded.paths_json,
                updated_at = strftime('%Y-%m-%dT%H:%M:%fZ','now')
            WHERE fingerprints.state = 'pending'
            "#,
        )
        .bind(run_id)
        .bind(fingerprint)
        .bind(paths_json)
        .execute(&mut *tx)
        .await?;
    }
    tx.commit().await?;
    Ok(())
}

pub async fn fingerprints(pool: &SqlitePool, run_id: &str) -> Result<Vec<FingerprintRow>> {
    let rows = sqlx::query_as::<_, FingerprintRow>(
        "SELECT fingerprint, state, outcome, paths_json FROM fingerprints WHERE run_id = ?1 ORDER BY fingerprint",
    )
    .bind(run_id)
    .fetch_all(pool)
    .await?;
    Ok(rows)
}

pub async fn is_processed(pool: &SqlitePool, run_id: &str, fingerprint: &str) -> Result<bool> {
    let state: Option<String> = sqlx::query_scalar(
        "SELECT state FROM fingerprints WHERE run_id = ?1 AND fingerprint = ?2",
    )
    .bind(run_id)
    .bind(fingerprint)
    .fetch_optional(pool)
    .await?;
    Ok(state.as_deref() == Some("processed"))
}

/// Marks a fingerprint processed and records its decisions atomically.
///
/// Decisions are insert-once per source path: a path that already has a
/// terminal decision in this run keeps it. Any placement intent for the
/// fingerprint is cleared in the same transaction.
pub async fn commit_processed(
    pool: &SqlitePool,
    run_id: &str,
    fingerprint: &str,
    outcome: &str,
    decisions: &[NewDecision],
) -> Result<()> {
    let mut tx = pool.begin().await?;
    for d in decisions {
        sqlx::query(
            r#"
            INSERT INTO decisions (run_id, source_path, fingerprint, action, decision_json)
            VALUES (?1, ?2, ?3, ?4, ?5)
            ON CONFLICT(run_id, source_path) DO NOTHING
            "#,
        )
        .bind(run_id)
        .bind(&d.source_path)
        .bind(fingerprint)
        .bind(&d.action)
        .bind(&d.decision_json)
        .execute(&mut *tx)
        .await?;
    }
    sqlx::query(
        r#"
        INSERT INTO fingerprints (run_id, fingerprint, state, outcome)
        VALUES (?1, ?2, 'processed', ?3)
        ON CONFLICT(run_id, fingerprint) DO UPDATE SET
            state = 'processed',
            outcome = excluded.outcome,
            updated_at = strftime('%Y-%m-%dT%H:%M:%fZ','now')
        "#,
    )
    .bind(run_id)
    .bind(fingerprint)
    .bind(outcome)
    .execute(&mut *tx)
    .await?;
    sqlx::query("DELETE FROM intents WHERE run_id = ?1 AND fingerprint = ?2")
        .bind(run_id)
        .bind(fingerprint)
        .execute(&mut *tx)
        .await?;
    tx.commit().await?;
    Ok(())
}

/// Records a decision for a file that never got a fingerprint.
pub async fn commit_unkeyed(pool: &SqlitePool, run_id: &str, decision: &NewDecision) -> Result<()> {
    sqlx::query(
        r#"
        INSERT INTO decisions (run_id, source_path, fingerprint, action, decision_json)
        VALUES (?1, ?2, NULL, ?3, ?4)
        ON CONFLICT(run_id, source_path) DO NOTHING
        "#,
    )
    .bind(run_id)
    .bind(&decision.source_path)
    .bind(&decision.action)
    .bind(&decision.decision_json)
    .execute(pool)
    .await?;
    Ok(())
}

pub async fn decisions(pool: &SqlitePool, run_id: &str) -> Result<Vec<DecisionRow>> {
    let rows = sqlx::query_as::<_, DecisionRow>(
        r#"
        SELECT source_path, fingerprint, action, decision_json
        FROM decisions WHERE run_id = ?1
        ORDER BY recorded_at, source_path
        "#,
    )
    .bind(run_id)
    .fetch_all(pool)
    .await?;
    Ok(rows)
}

pub async fn decisions_for_fingerprint(
    pool: &SqlitePool,
    run_id: &str,
    fingerprint: &str,
) -> Result<Vec<DecisionRow>> {
    let rows = sqlx::query_as::<_, DecisionRow>(
        r#"
        SELECT source_path, fingerprint, action, decision_json
        FROM decisions WHERE run_id = ?1 AND fingerprint = ?2
        ORDER BY recorded_at, source_path
        "#,
    )
    .bind(run_id)
    .bind(fingerprint)
    .fetch_all(pool)
    .await?;
    Ok(rows)
}

pub async fn insert_intent(pool: &SqlitePool, run_id: &str, intent: &IntentRow) -> Result<()> {
    sqlx::query(
        r#"
        INSERT INTO intents (run_id, source_path, fingerprint, destination_path, decision_json)
        VALUES (?1, ?2, ?3, ?4, ?5)
        ON CONFLICT(run_id, source_path) DO UPDATE SET
            destination_path = excluded.destination_path,
            decision_json = excluded.decision_json
        "#,
    )
    .bind(run_id)
    .bind(&intent.source_path)
    .bind(&intent.fingerprint)
    .bind(&intent.destination_path)
    .bind(&intent.decision_json)
    .execute(pool)
    .await?;
    Ok(())
}

pub async fn intents(pool: &SqlitePool, run_id: &str) -> Result<Vec<IntentRow>> {
    let rows = sqlx::query_as::<_, IntentRow>(
        "SELECT source_path, fingerprint, destination_path, decision_json FROM intents WHERE run_id = ?1",
    )
    .bind(run_id)
    .fetch_all(pool)
    .await?;
    Ok(rows)
}

pub async fn delete_intent(pool: &SqlitePool, run_id: &str, source_path: &str) -> Result<()> {
    sqlx::query("DELETE FROM intents WHERE run_id = ?1 AND source_path = ?2")
        .bind(run_id)
        .bind(source_path)
        .execute(pool)
        .await?;
    Ok(())
}
