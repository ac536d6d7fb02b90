use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::path::PathBuf;

/// Content-derived identifier. `b3:` prefixes a full BLAKE3 digest, `p3:` the
/// size-plus-head-and-tail surrogate used for very large files.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Fingerprint(String);

impl Fingerprint {
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FileRecord {
    pub absolute_path: PathBuf,
    pub size_bytes: u64,
    pub modified_time: Option<DateTime<Utc>>,
    pub content_fingerprint: Fingerprint,
    pub extension: Option<String>,
}

impl FileRecord {
    pub fn file_name(&self) -> String {
        self.absolute_path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default()
    }
}

#[derive(Debug, Clone)]
pub struct AssignmentRequest {
    pub file_record: FileRecord,
    pub content_excerpt: String,
}

/// Oracle proposal for one file. Never mutated after gating.
#[derive(Debug, Clone, PartialEq)]
pub struct Assignment {
    pub file_record: FileRecord,
    pub proposed_fields: BTreeMap<String, String>,
    pub confidence: f32,
    pub rationale: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum DecisionAction {
    Move,
    SkipDuplicate,
    SkipLowConfidence,
    SkipError,
}

impl DecisionAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            DecisionAction::Move => "move",
            DecisionAction::SkipDuplicate => "skip-duplicate",
            DecisionAction::SkipLowConfidence => "skip-low-confidence",
            DecisionAction::SkipError => "skip-error",
        }
    }
}

impl fmt::Display for DecisionAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Why a file ended in `skip-error`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "kebab-case")]
pub enum ErrorCause {
    Fingerprint { message: String },
    Oracle { message: String },
    MissingResponse,
    InvalidConfidence { value: String },
    Template { message: String },
    Placement { message: String },
    MissingAtResume,
    /// Cause written by a newer version that this build does not know.
    #[serde(other)]
    Unknown,
}

impl fmt::Display for ErrorCause {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ErrorCause::Fingerprint { message } => write!(f, "fingerprint: {message}"),
            ErrorCause::Oracle { message } => write!(f, "oracle: {message}"),
            ErrorCause::MissingResponse => f.write_str("oracle returned no answer for this file"),
            ErrorCause::InvalidConfidence { value } => write!(f, "invalid confidence {value}"),
            ErrorCause::Template { message } => write!(f, "template: {message}"),
            ErrorCause::Placement { message } => write!(f, "placement: {message}"),
            ErrorCause::MissingAtResume => f.write_str("source file missing at resume"),
            ErrorCause::Unknown => f.write_str("unknown cause"),
        }
    }
}

/// Terminal outcome for one file in one run.
///
/// Everything past `confidence` is optional on the wire so decisions written by
/// older builds keep deserializing.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlacementDecision {
    pub source_path: PathBuf,
    pub destination_path: Option<PathBuf>,
    pub action: DecisionAction,
    pub confidence: Option<f32>,
    #[serde(default)]
    pub run_id: String,
    #[serde(default)]
    pub fingerprint: Option<Fingerprint>,
    /// Canonical destination this duplicate collapsed into.
    #[serde(default)]
    pub duplicate_of: Option<PathBuf>,
    #[serde(default)]
    pub cause: Option<ErrorCause>,
    #[serde(default)]
    pub rationale: Option<String>,
    #[serde(default)]
    pub fields: BTreeMap<String, String>,
    #[serde(default = "Utc::now")]
    pub decided_at: DateTime<Utc>,
}

impl PlacementDecision {
    fn base(source_path: PathBuf, action: DecisionAction) -> Self {
        Self {
            source_path,
            destination_path: None,
            action,
            confidence: None,
            run_id: String::new(),
            fingerprint: None,
            duplicate_of: None,
            cause: None,
            rationale: None,
            fields: BTreeMap::new(),
            decided_at: Utc::now(),
        }
    }

    pub fn moved(assignment: &Assignment, destination: PathBuf) -> Self {
        let mut d = Self::base(assignment.file_record.absolute_path.clone(), DecisionAction::Move);
        d.destination_path = Some(destination);
        d.fingerprint = Some(assignment.file_record.content_fingerprint.clone());
        d.with_assignment(assignment)
    }

    pub fn duplicate(record: &FileRecord, canonical: PathBuf, confidence: Option<f32>) -> Self {
        let mut d = Self::base(record.absolute_path.clone(), DecisionAction::SkipDuplicate);
        d.fingerprint = Some(record.content_fingerprint.clone());
        d.duplicate_of = Some(canonical);
        d.confidence = confidence;
        d
    }

    pub fn low_confidence(assignment: &Assignment) -> Self {
        let mut d = Self::base(
            assignment.file_record.absolute_path.clone(),
            DecisionAction::SkipLowConfidence,
        );
        d.fingerprint = Some(assignment.file_record.content_fingerprint.clone());
        d.with_assignment(assignment)
    }

    pub fn error(source_path: PathBuf, fingerprint: Option<Fingerprint>, cause: ErrorCause) -> Self {
        let mut d = Self::base(source_path, DecisionAction::SkipError);
        d.fingerprint = fingerprint;
        d.cause = Some(cause);
        d
    }

    fn with_assignment(mut self, assignment: &Assignment) -> Self {
        self.confidence = Some(assignment.confidence);
        self.rationale = Some(assignment.rationale.clone()).filter(|r| !r.is_empty());
        self.fields = assignment.proposed_fields.clone();
        self
    }

    pub fn for_run(mut self, run_id: &str) -> Self {
        self.run_id = run_id.to_string();
        self
    }
}

/// Per-fingerprint resolution recorded alongside `processed`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GroupOutcome {
    /// Placed, or collapsed into an identical file already at the destination.
    Resolved,
    /// Rejected by the confidence gate; eligible for manual or later processing.
    Unresolved,
    Failed,
}

impl GroupOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            GroupOutcome::Resolved => "resolved",
            GroupOutcome::Unresolved => "unresolved",
            GroupOutcome::Failed => "failed",
        }
    }

    pub fn for_action(action: DecisionAction) -> Self {
        match action {
            DecisionAction::Move | DecisionAction::SkipDuplicate => GroupOutcome::Resolved,
            DecisionAction::SkipLowConfidence => GroupOutcome::Unresolved,
            DecisionAction::SkipError => GroupOutcome::Failed,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    Running,
    Completed,
    Cancelled,
    Failed,
}

impl RunStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            RunStatus::Running => "running",
            RunStatus::Completed => "completed",
            RunStatus::Cancelled => "cancelled",
            RunStatus::Failed => "failed",
        }
    }

    pub fn parse(s: &str) -> Self {
        match s {
            "completed" => RunStatus::Completed,
            "cancelled" => RunStatus::Cancelled,
            "failed" => RunStatus::Failed,
            _ => RunStatus::Running,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct RunState {
    pub run_id: String,
    pub source_root: PathBuf,
    pub output_root: PathBuf,
    pub started_at: DateTime<Utc>,
    pub processed: BTreeSet<Fingerprint>,
    pub pending: BTreeSet<Fingerprint>,
    pub dry_run: bool,
    pub status: RunStatus,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decision_from_older_build_still_parses() {
        let json = r#"{
            "source_path": "/in/a.txt",
            "destination_path": "/out/docs/a.txt",
            "action": "move",
            "confidence": 0.9
        }"#;
        let d: PlacementDecision = serde_json::from_str(json).unwrap();
        assert_eq!(d.action, DecisionAction::Move);
        assert!(d.fingerprint.is_none());
        assert!(d.fields.is_empty());
    }

    #[test]
    fn unknown_fields_and_causes_are_tolerated() {
        let json = r#"{
            "source_path": "/in/a.txt",
            "destination_path": null,
            "action": "skip-error",
            "confidence": null,
            "cause": {"kind": "quota-exceeded"},
            "reviewer": "someone"
        }"#;
        let d: PlacementDecision = serde_json::from_str(json).unwrap();
        assert_eq!(d.cause, Some(ErrorCause::Unknown));
    }

    #[test]
    fn actions_use_kebab_case_on_the_wire() {
        let s = serde_json::to_string(&DecisionAction::SkipLowConfidence).unwrap();
        assert_eq!(s, "\"skip-low-confidence\"");
        assert_eq!(DecisionAction::SkipLowConfidence.as_str(), "skip-low-confidence");
    }
}
