//! Durable per-run progress keyed by fingerprint.
//!
//! [`ResumeStateStore`] is the only writer of run state. Every mutation goes
//! through one async mutex and lands in a single SQLite transaction, so
//! interleaved batch completions never interleave their writes.

use crate::error::StateStoreError;
use crate::models::{Fingerprint, GroupOutcome, PlacementDecision, RunState, RunStatus};
use chrono::{DateTime, Utc};
use sqlx::SqlitePool;
use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use storage::models::{IntentRow, NewDecision, RunRow};
use storage::{runs, StorageError};
use tokio::sync::Mutex;
use tracing::{info, warn};

type Result<T> = std::result::Result<T, StateStoreError>;

pub const STATE_DB_FILE: &str = "state.db";

/// Handle on the state database of one output tree.
#[derive(Clone)]
pub struct StateDb {
    pool: SqlitePool,
    path: PathBuf,
}

impl StateDb {
    /// Opens `<dir>/state.db`, creating it on first use. A database that fails
    /// to open or fails its integrity check is an error unless
    /// `discard_corrupt` is set, in which case it is renamed aside and a fresh
    /// one is created.
    pub async fn open(dir: &Path, discard_corrupt: bool) -> Result<Self> {
        std::fs::create_dir_all(dir).map_err(|source| StateStoreError::Io {
            path: dir.to_path_buf(),
            source,
        })?;
        let path = dir.join(STATE_DB_FILE);
        match try_open(&path).await {
            Ok(pool) => Ok(Self { pool, path }),
            Err(err) if is_corruption(&err) => {
                if !discard_corrupt {
                    return Err(StateStoreError::Corrupt {
                        path,
                        message: err.to_string(),
                    });
                }
                let moved = quarantine(&path)?;
                warn!(
                    path = %path.display(),
                    moved_to = %moved.display(),
                    error = %err,
                    "discarding corrupt state database"
                );
                let pool = try_open(&path).await?;
                Ok(Self { pool, path })
            }
            Err(err) => Err(err.into()),
        }
    }

    /// Opens an existing database without creating anything.
    pub async fn open_existing(dir: &Path) -> Result<Option<Self>> {
        let path = dir.join(STATE_DB_FILE);
        if !path.exists() {
            return Ok(None);
        }
        let pool = try_open(&path).await.map_err(|err| {
            if is_corruption(&err) {
                StateStoreError::Corrupt {
                    path: path.clone(),
                    message: err.to_string(),
                }
            } else {
                err.into()
            }
        })?;
        Ok(Some(Self { pool, path }))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub async fn find_resumable(&self, source_root: &Path) -> Result<Option<String>> {
        let row = runs::latest_unfinished_run(&self.pool, &path_key(source_root)).await?;
        Ok(row.map(|r| r.run_id))
    }

    pub async fn latest_run(&self) -> Result<Option<String>> {
        Ok(runs::latest_run(&self.pool).await?.map(|r| r.run_id))
    }

    pub async fn close(&self) {
        self.pool.close().await;
    }
}

async fn try_open(path: &Path) -> std::result::Result<SqlitePool, StorageError> {
    let pool = storage::connect(&path.to_string_lossy()).await?;
    storage::quick_check(&pool).await?;
    storage::migrate(&pool).await?;
    Ok(pool)
}

fn is_corruption(err: &StorageError) -> bool {
    match err {
        StorageError::Integrity(_) => true,
        other => {
            let text = other.to_string().to_lowercase();
            text.contains("not a database") || text.contains("malformed") || text.contains("corrupt")
        }
    }
}

fn quarantine(path: &Path) -> Result<PathBuf> {
    let stamp = Utc::now().format("%Y%m%dT%H%M%S");
    let target = PathBuf::from(format!("{}.corrupt-{stamp}", path.display()));
    for suffix in ["", "-wal", "-shm"] {
        let from = PathBuf::from(format!("{}{suffix}", path.display()));
        if !from.exists() {
            continue;
        }
        let to = PathBuf::from(format!("{}{suffix}", target.display()));
        std::fs::rename(&from, &to).map_err(|source| StateStoreError::Io { path: from, source })?;
    }
    Ok(target)
}

fn path_key(path: &Path) -> String {
    path.to_string_lossy().into_owned()
}

/// A move that was about to happen when the previous process stopped.
#[derive(Debug, Clone)]
pub struct PlacementIntent {
    pub fingerprint: Fingerprint,
    pub destination: PathBuf,
    pub decision: PlacementDecision,
}

pub struct ResumeStateStore {
    pool: SqlitePool,
    run: RunRow,
    write_lock: Mutex<()>,
}

impl ResumeStateStore {
    pub async fn create(
        db: &StateDb,
        source_root: &Path,
        output_root: &Path,
        dry_run: bool,
    ) -> Result<Self> {
        let run = RunRow {
            run_id: uuid::Uuid::new_v4().to_string(),
            source_root: path_key(source_root),
            output_root: path_key(output_root),
            started_at: Utc::now().to_rfc3339(),
            dry_run,
            status: RunStatus::Running.as_str().to_string(),
            finished_at: None,
        };
        runs::insert_run(&db.pool, &run).await?;
        info!(run_id = %run.run_id, dry_run, "started new run");
        Ok(Self {
            pool: db.pool.clone(),
            run,
            write_lock: Mutex::new(()),
        })
    }

    pub async fn load(db: &StateDb, run_id: &str) -> Result<Self> {
        let run = runs::get_run(&db.pool, run_id)
            .await?
            .ok_or_else(|| StateStoreError::UnknownRun(run_id.to_string()))?;
        Ok(Self {
            pool: db.pool.clone(),
            run,
            write_lock: Mutex::new(()),
        })
    }

    pub fn run_id(&self) -> &str {
        &self.run.run_id
    }

    pub fn dry_run(&self) -> bool {
        self.run.dry_run
    }

    pub fn source_root(&self) -> &str {
        &self.run.source_root
    }

    pub async fn is_processed(&self, fingerprint: &Fingerprint) -> Result<bool> {
        Ok(runs::is_processed(&self.pool, self.run_id(), fingerprint.as_str()).await?)
    }

    pub async fn register_pending(&self, groups: &[(Fingerprint, Vec<PathBuf>)]) -> Result<()> {
        let mut entries = Vec::with_capacity(groups.len());
        for (fp, paths) in groups {
            entries.push((fp.as_str().to_string(), serde_json::to_string(paths)?));
        }
        let _guard = self.write_lock.lock().await;
        runs::upsert_pending(&self.pool, self.run_id(), &entries).await?;
        Ok(())
    }

    /// Durably records the decisions of one fingerprint group and marks the
    /// fingerprint processed, in one transaction.
    pub async fn mark_processed(
        &self,
        fingerprint: &Fingerprint,
        outcome: GroupOutcome,
        decisions: &[PlacementDecision],
    ) -> Result<()> {
        let rows = decisions
            .iter()
            .map(encode_decision)
            .collect::<Result<Vec<_>>>()?;
        let _guard = self.write_lock.lock().await;
        runs::commit_processed(
            &self.pool,
            self.run_id(),
            fingerprint.as_str(),
            outcome.as_str(),
            &rows,
        )
        .await?;
        Ok(())
    }

    /// Records a decision for a file that has no fingerprint.
    pub async fn record_unkeyed(&self, decision: &PlacementDecision) -> Result<()> {
        let row = encode_decision(decision)?;
        let _guard = self.write_lock.lock().await;
        runs::commit_unkeyed(&self.pool, self.run_id(), &row).await?;
        Ok(())
    }

    pub async fn record_intent(
        &self,
        fingerprint: &Fingerprint,
        destination: &Path,
        decision: &PlacementDecision,
    ) -> Result<()> {
        let row = IntentRow {
            source_path: path_key(&decision.source_path),
            fingerprint: fingerprint.as_str().to_string(),
            destination_path: path_key(destination),
            decision_json: serde_json::to_string(decision)?,
        };
        let _guard = self.write_lock.lock().await;
        runs::insert_intent(&self.pool, self.run_id(), &row).await?;
        Ok(())
    }

    pub async fn intents(&self) -> Result<Vec<PlacementIntent>> {
        runs::intents(&self.pool, self.run_id())
            .await?
            .into_iter()
            .map(|row| {
                Ok(PlacementIntent {
                    fingerprint: Fingerprint::new(row.fingerprint),
                    destination: PathBuf::from(row.destination_path),
                    decision: serde_json::from_str(&row.decision_json)?,
                })
            })
            .collect()
    }

    pub async fn discard_intent(&self, source_path: &Path) -> Result<()> {
        let _guard = self.write_lock.lock().await;
        runs::delete_intent(&self.pool, self.run_id(), &path_key(source_path)).await?;
        Ok(())
    }

    pub async fn decisions(&self) -> Result<Vec<PlacementDecision>> {
        runs::decisions(&self.pool, self.run_id())
            .await?
            .iter()
            .map(|row| Ok(serde_json::from_str(&row.decision_json)?))
            .collect()
    }

    pub async fn decisions_for(&self, fingerprint: &Fingerprint) -> Result<Vec<PlacementDecision>> {
        runs::decisions_for_fingerprint(&self.pool, self.run_id(), fingerprint.as_str())
            .await?
            .iter()
            .map(|row| Ok(serde_json::from_str(&row.decision_json)?))
            .collect()
    }

    /// Fingerprints registered but not yet processed, with the paths recorded
    /// for them.
    pub async fn pending_paths(&self) -> Result<Vec<(Fingerprint, Vec<PathBuf>)>> {
        runs::fingerprints(&self.pool, self.run_id())
            .await?
            .into_iter()
            .filter(|row| row.state == "pending")
            .map(|row| {
                let paths: Vec<PathBuf> = serde_json::from_str(&row.paths_json)?;
                Ok((Fingerprint::new(row.fingerprint), paths))
            })
            .collect()
    }

    pub async fn snapshot(&self) -> Result<RunState> {
        let run = runs::get_run(&self.pool, self.run_id())
            .await?
            .ok_or_else(|| StateStoreError::UnknownRun(self.run_id().to_string()))?;
        let mut processed = BTreeSet::new();
        let mut pending = BTreeSet::new();
        for row in runs::fingerprints(&self.pool, self.run_id()).await? {
            let fp = Fingerprint::new(row.fingerprint);
            if row.state == "processed" {
                processed.insert(fp);
            } else {
                pending.insert(fp);
            }
        }
        Ok(RunState {
            run_id: run.run_id,
            source_root: PathBuf::from(run.source_root),
            output_root: PathBuf::from(run.output_root),
            started_at: DateTime::parse_from_rfc3339(&run.started_at)
                .map(|d| d.with_timezone(&Utc))
                .unwrap_or_default(),
            processed,
            pending,
            dry_run: run.dry_run,
            status: RunStatus::parse(&run.status),
        })
    }

    pub async fn set_status(&self, status: RunStatus) -> Result<()> {
        let finished = !matches!(status, RunStatus::Running);
        let _guard = self.write_lock.lock().await;
        runs::set_run_status(&self.pool, self.run_id(), status.as_str(), finished).await?;
        Ok(())
    }
}

fn encode_decision(decision: &PlacementDecision) -> Result<NewDecision> {
    Ok(NewDecision {
        source_path: path_key(&decision.source_path),
        action: decision.action.as_str().to_string(),
        decision_json: serde_json::to_string(decision)?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{DecisionAction, ErrorCause, FileRecord};

    fn record(path: &str, fp: &str) -> FileRecord {
        FileRecord {
            absolute_path: PathBuf::from(path),
            size_bytes: 1,
            modified_time: None,
            content_fingerprint: Fingerprint::new(fp),
            extension: None,
        }
    }

    async fn fresh() -> (tempfile::TempDir, StateDb) {
        let temp = tempfile::tempdir().unwrap();
        let db = StateDb::open(&temp.path().join("state"), false).await.unwrap();
        (temp, db)
    }

    #[tokio::test]
    async fn processed_survives_reload() {
        let (temp, db) = fresh().await;
        let store = ResumeStateStore::create(&db, Path::new("/src"), Path::new("/out"), false)
            .await
            .unwrap();
        let fp = Fingerprint::new("b3:aa");
        store
            .register_pending(&[(fp.clone(), vec![PathBuf::from("/src/a")])])
            .await
            .unwrap();
        let d = PlacementDecision::duplicate(&record("/src/a", "b3:aa"), "/out/a".into(), Some(0.9))
            .for_run(store.run_id());
        store.mark_processed(&fp, GroupOutcome::Resolved, &[d.clone()]).await.unwrap();
        let run_id = store.run_id().to_string();
        db.close().await;

        let db = StateDb::open(&temp.path().join("state"), false).await.unwrap();
        let reloaded = ResumeStateStore::load(&db, &run_id).await.unwrap();
        assert!(reloaded.is_processed(&fp).await.unwrap());
        let snap = reloaded.snapshot().await.unwrap();
        assert!(snap.processed.contains(&fp));
        assert!(snap.pending.is_empty());
        assert_eq!(snap.status, RunStatus::Running);
        assert_eq!(reloaded.decisions().await.unwrap(), vec![d]);
    }

    #[tokio::test]
    async fn unknown_run_is_reported() {
        let (_temp, db) = fresh().await;
        let err = ResumeStateStore::load(&db, "nope").await.err().unwrap();
        assert!(matches!(err, StateStoreError::UnknownRun(_)));
    }

    #[tokio::test]
    async fn resumable_run_is_found_until_completed() {
        let (_temp, db) = fresh().await;
        let store = ResumeStateStore::create(&db, Path::new("/src"), Path::new("/out"), true)
            .await
            .unwrap();
        assert_eq!(
            db.find_resumable(Path::new("/src")).await.unwrap().as_deref(),
            Some(store.run_id())
        );
        assert!(db.find_resumable(Path::new("/other")).await.unwrap().is_none());
        store.set_status(RunStatus::Completed).await.unwrap();
        assert!(db.find_resumable(Path::new("/src")).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn pending_paths_and_intents_round_trip() {
        let (_temp, db) = fresh().await;
        let store = ResumeStateStore::create(&db, Path::new("/src"), Path::new("/out"), false)
            .await
            .unwrap();
        let fp = Fingerprint::new("b3:bb");
        store
            .register_pending(&[(fp.clone(), vec!["/src/x".into(), "/src/y".into()])])
            .await
            .unwrap();
        let pending = store.pending_paths().await.unwrap();
        assert_eq!(pending, vec![(fp.clone(), vec![PathBuf::from("/src/x"), PathBuf::from("/src/y")])]);

        let d = PlacementDecision::error("/src/x".into(), Some(fp.clone()), ErrorCause::MissingResponse);
        store.record_intent(&fp, Path::new("/out/x"), &d).await.unwrap();
        let intents = store.intents().await.unwrap();
        assert_eq!(intents.len(), 1);
        assert_eq!(intents[0].destination, PathBuf::from("/out/x"));
        store.discard_intent(Path::new("/src/x")).await.unwrap();
        assert!(store.intents().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn unkeyed_errors_are_recorded() {
        let (_temp, db) = fresh().await;
        let store = ResumeStateStore::create(&db, Path::new("/src"), Path::new("/out"), false)
            .await
            .unwrap();
        let d = PlacementDecision::error(
            "/src/locked".into(),
            None,
            ErrorCause::Fingerprint { message: "denied".into() },
        );
        store.record_unkeyed(&d).await.unwrap();
        let all = store.decisions().await.unwrap();
        assert_eq!(all.len(), 1);
        assert_eq!(all[0].action, DecisionAction::SkipError);
    }

    #[tokio::test]
    async fn corrupt_database_needs_explicit_discard() {
        let temp = tempfile::tempdir().unwrap();
        let dir = temp.path().join("state");
        std::fs::create_dir_all(&dir).unwrap();
        std::fs::write(dir.join(STATE_DB_FILE), vec![0x42u8; 8192]).unwrap();

        let err = StateDb::open(&dir, false).await.err().unwrap();
        assert!(matches!(err, StateStoreError::Corrupt { .. }), "got {err:?}");
        // Nothing was discarded.
        assert_eq!(std::fs::read(dir.join(STATE_DB_FILE)).unwrap(), vec![0x42u8; 8192]);

        let db = StateDb::open(&dir, true).await.unwrap();
        assert!(db.latest_run().await.unwrap().is_none());
        let moved = std::fs::read_dir(&dir)
            .unwrap()
            .filter_map(|e| e.ok())
            .any(|e| e.file_name().to_string_lossy().contains(".corrupt-"));
        assert!(moved);
    }
}
