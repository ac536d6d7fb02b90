//! Error taxonomy. Per-file errors become `skip-error` decisions; the
//! run-fatal ones surface as [`PipelineError`].

use crate::models::ErrorCause;
use providers::OracleError;
use std::path::PathBuf;
use storage::StorageError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ScanError {
    #[error("source root does not exist: {0}")]
    RootMissing(PathBuf),
    #[error("source root is not a directory: {0}")]
    NotADirectory(PathBuf),
    #[error("source root is not traversable: {path}: {source}")]
    Untraversable {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("invalid exclude pattern '{pattern}': {message}")]
    Pattern { pattern: String, message: String },
}

#[derive(Debug, Error)]
#[error("cannot fingerprint {path}: {source}")]
pub struct FingerprintError {
    pub path: PathBuf,
    #[source]
    pub source: std::io::Error,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TemplateResolutionError {
    #[error("template '{template}' needs field '{field}' which the assignment lacks")]
    MissingField { template: String, field: String },
    #[error("template '{template}' is invalid: {message}")]
    Parse { template: String, message: String },
    #[error("template '{template}' rendered an empty path")]
    EmptyPath { template: String },
}

#[derive(Debug, Error)]
pub enum PlacementError {
    #[error("source vanished before placement: {0}")]
    SourceMissing(PathBuf),
    #[error("destination {0} escapes the output root")]
    OutsideOutput(PathBuf),
    #[error("no free name for {0} after {1} attempts")]
    NoFreeName(PathBuf, u32),
    #[error("destination appeared while moving: {0}")]
    DestinationTaken(PathBuf),
    #[error("{op} {path}: {source}")]
    Io {
        op: &'static str,
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

#[derive(Debug, Error)]
pub enum StateStoreError {
    #[error("state database: {0}")]
    Storage(#[from] StorageError),
    #[error("state database {path} is corrupt or unreadable ({message}); rerun with --discard-corrupt-state to move it aside")]
    Corrupt { path: PathBuf, message: String },
    #[error("unknown run id: {0}")]
    UnknownRun(String),
    #[error("stored decision could not be decoded: {0}")]
    Decode(#[from] serde_json::Error),
    #[error("state directory {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

#[derive(Debug, Error)]
pub enum AuditError {
    #[error("audit log {path}: {message}")]
    Write { path: PathBuf, message: String },
    #[error("audit sink closed")]
    Closed,
    #[error("audit event could not be encoded: {0}")]
    Encode(#[from] serde_json::Error),
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("configuration could not be loaded: {0}")]
    Load(#[from] config::ConfigError),
    #[error("invalid configuration: {0}")]
    Invalid(String),
    #[error(transparent)]
    Template(#[from] TemplateResolutionError),
    #[error("unknown run id: {0}")]
    UnknownRun(String),
    #[error("run {run_id} was started with dry_run={stored}; rerun with the same mode to resume it")]
    DryRunMismatch { run_id: String, stored: bool },
    #[error(transparent)]
    Oracle(#[from] OracleError),
}

/// Conditions that stop a run.
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error(transparent)]
    Scan(#[from] ScanError),
    /// The store could not be opened; nothing was processed.
    #[error(transparent)]
    StateUnavailable(StateStoreError),
    /// A write failed mid-run. `checkpoint` is the number of fingerprints durably processed.
    #[error("state store failed mid-run after {checkpoint} processed fingerprints: {source}")]
    StateWrite {
        checkpoint: usize,
        #[source]
        source: StateStoreError,
    },
    #[error(transparent)]
    Audit(#[from] AuditError),
    #[error("{context}: {source}")]
    Io {
        context: String,
        #[source]
        source: std::io::Error,
    },
}

impl From<&FingerprintError> for ErrorCause {
    fn from(err: &FingerprintError) -> Self {
        ErrorCause::Fingerprint {
            message: err.to_string(),
        }
    }
}

impl From<&TemplateResolutionError> for ErrorCause {
    fn from(err: &TemplateResolutionError) -> Self {
        ErrorCause::Template {
            message: err.to_string(),
        }
    }
}

impl From<&PlacementError> for ErrorCause {
    fn from(err: &PlacementError) -> Self {
        ErrorCause::Placement {
            message: err.to_string(),
        }
    }
}

impl From<&OracleError> for ErrorCause {
    fn from(err: &OracleError) -> Self {
        ErrorCause::Oracle {
            message: err.to_string(),
        }
    }
}
