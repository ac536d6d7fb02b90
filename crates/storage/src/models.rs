use serde::{Deserialize, Serialize};
use sqlx::FromRow;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, FromRow)]
pub struct RunRow {
    pub run_id: String,
    pub source_root: String,
    pub output_root: String,
    pub started_at: String,
    pub dry_run: bool,
    pub status: String,
    pub finished_at: Option<String>,
}

#[derive(Debug, Clone, FromRow)]
pub struct FingerprintRow {
    pub fingerprint: String,
    /// `pending` or `processed`.
    pub state: String,
    /// `resolved`, `unresolved` or `failed` once processed.
    pub outcome: Option<String>,
    pub paths_json: String,
}

#[derive(Debug, Clone, FromRow)]
pub struct DecisionRow {
    pub source_path: String,
    pub fingerprint: Option<String>,
    pub action: String,
    pub decision_json: String,
}

#[derive(Debug, Clone, FromRow)]
pub struct IntentRow {
    pub source_path: String,
    pub fingerprint: String,
    pub destination_path: String,
    pub decision_json: String,
}

/// One decision to persist alongside a fingerprint commit.
#[derive(Debug, Clone)]
pub struct NewDecision {
    pub source_path: String,
    pub action: String,
    pub decision_json: String,
}
