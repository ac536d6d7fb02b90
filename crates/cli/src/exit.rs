//! Process exit codes.

use shelver_core::models::RunStatus;
use shelver_core::{PipelineError, RunSummary};

pub const OK: u8 = 0;
/// Completed, but some files ended in `skip-error` or audit writes failed.
pub const PARTIAL: u8 = 10;
/// Interrupted; the run can be resumed.
pub const CANCELLED: u8 = 11;
pub const CONFIG: u8 = 20;
pub const FATAL_STARTUP: u8 = 30;
/// State store failed after processing had begun.
pub const FATAL_MID_RUN: u8 = 31;

pub fn for_error(err: &PipelineError) -> u8 {
    match err {
        PipelineError::Config(_) => CONFIG,
        PipelineError::Scan(_)
        | PipelineError::StateUnavailable(_)
        | PipelineError::Audit(_)
        | PipelineError::Io { .. } => FATAL_STARTUP,
        PipelineError::StateWrite { .. } => FATAL_MID_RUN,
    }
}

pub fn for_summary(summary: &RunSummary) -> u8 {
    if summary.status == RunStatus::Cancelled {
        CANCELLED
    } else if summary.is_partial() {
        PARTIAL
    } else {
        OK
    }
}

pub fn exit_code_for(result: &Result<RunSummary, PipelineError>) -> u8 {
    match result {
        Ok(summary) => for_summary(summary),
        Err(err) => for_error(err),
    }
}
