use chrono::{DateTime, Utc};
use serde::Serialize;
use shelver_core::models::{DecisionAction, PlacementDecision, RunState, RunStatus};
use shelver_core::RunSummary;
use std::fmt::Write;
use std::path::PathBuf;

#[derive(Debug, Clone, Default, Serialize, PartialEq, Eq)]
pub struct DecisionCounts {
    pub placed: usize,
    pub duplicates: usize,
    pub low_confidence: usize,
    pub errors: usize,
}

impl DecisionCounts {
    pub fn tally(decisions: &[PlacementDecision]) -> Self {
        let mut counts = Self::default();
        for d in decisions {
            match d.action {
                DecisionAction::Move => counts.placed += 1,
                DecisionAction::SkipDuplicate => counts.duplicates += 1,
                DecisionAction::SkipLowConfidence => counts.low_confidence += 1,
                DecisionAction::SkipError => counts.errors += 1,
            }
        }
        counts
    }
}

/// What `shelver status` prints.
#[derive(Debug, Clone, Serialize)]
pub struct StatusReport {
    pub run_id: String,
    pub status: RunStatus,
    pub dry_run: bool,
    pub source_root: PathBuf,
    pub output_root: PathBuf,
    pub started_at: DateTime<Utc>,
    pub processed: usize,
    pub pending: usize,
    pub decisions: DecisionCounts,
}

impl StatusReport {
    pub fn new(state: &RunState, decisions: &[PlacementDecision]) -> Self {
        Self {
            run_id: state.run_id.clone(),
            status: state.status,
            dry_run: state.dry_run,
            source_root: state.source_root.clone(),
            output_root: state.output_root.clone(),
            started_at: state.started_at,
            processed: state.processed.len(),
            pending: state.pending.len(),
            decisions: DecisionCounts::tally(decisions),
        }
    }

    pub fn render(&self) -> String {
        let mut out = String::new();
        let _ = writeln!(
            out,
            "run {} ({}{})",
            self.run_id,
            self.status.as_str(),
            if self.dry_run { ", dry run" } else { "" }
        );
        let _ = writeln!(out, "  source:  {}", self.source_root.display());
        let _ = writeln!(out, "  output:  {}", self.output_root.display());
        let _ = writeln!(out, "  started: {}", self.started_at.to_rfc3339());
        let _ = writeln!(
            out,
            "  fingerprints: {} processed, {} pending",
            self.processed, self.pending
        );
        let c = &self.decisions;
        let _ = write!(
            out,
            "  decisions: placed {}, duplicate {}, low-confidence {}, error {}",
            c.placed, c.duplicates, c.low_confidence, c.errors
        );
        out
    }
}

pub fn render_summary(summary: &RunSummary) -> String {
    let mut out = String::new();
    let verb = if summary.dry_run { "would place" } else { "placed" };
    let _ = write!(
        out,
        "run {} {}: {} {}, duplicate {}, low-confidence {}, error {}",
        summary.run_id,
        summary.status.as_str(),
        verb,
        summary.placed,
        summary.duplicates,
        summary.low_confidence,
        summary.errors
    );
    if summary.resumed {
        out.push_str(" (resumed)");
    }
    if summary.recovered > 0 {
        let _ = write!(out, "\n  recovered {} interrupted moves", summary.recovered);
    }
    if summary.scan_issues > 0 {
        let _ = write!(out, "\n  {} entries could not be read", summary.scan_issues);
    }
    if summary.audit_failures > 0 {
        let _ = write!(out, "\n  {} audit events were not written", summary.audit_failures);
    }
    if !summary.proposed_moves.is_empty() {
        out.push_str("\nproposed moves:");
        for m in &summary.proposed_moves {
            let _ = write!(out, "\n  {} -> {}", m.source.display(), m.destination.display());
        }
    }
    out
}
