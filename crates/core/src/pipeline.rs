//! Run orchestration: scan, resume filtering, oracle dispatch, placement and
//! bookkeeping.

use crate::assigner::{BatchAssigner, Gated};
use crate::audit::{AuditSink, JsonlAuditSink};
use crate::config::AppConfig;
use crate::dedup::{Deduplicator, DuplicateGroup};
use crate::error::{ConfigError, FingerprintError, PipelineError, ScanError, StateStoreError};
use crate::fingerprint::Fingerprinter;
use crate::models::{
    DecisionAction, ErrorCause, FileRecord, Fingerprint, GroupOutcome, PlacementDecision, RunStatus,
};
use crate::placer::{Placer, Plan};
use crate::scanner::{ScanEvent, ScanIssue, ScanOptions, ScannedFile, Scanner};
use crate::state::{ResumeStateStore, StateDb};
use crate::template::PathResolver;
use providers::heuristic::HeuristicOracle;
use providers::openai::{OpenAiConfig, OpenAiOracle};
use providers::{ClassificationOracle, OracleRegistry};
use serde::Serialize;
use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument, warn};

/// Heuristic oracle always; OpenAI when `OPENAI_API_KEY` is set.
pub fn build_registry(config: &AppConfig) -> OracleRegistry {
    let mut reg = OracleRegistry::new().with_oracle("heuristic", Arc::new(HeuristicOracle));

    if let Some(key) = std::env::var_os("OPENAI_API_KEY") {
        let base_url = config
            .oracle
            .base_url
            .clone()
            .or_else(|| std::env::var("OPENAI_BASE_URL").ok())
            .unwrap_or_else(|| "https://api.openai.com".to_string());
        let oracle = OpenAiOracle::new(OpenAiConfig {
            api_key: key.to_string_lossy().into_owned(),
            base_url,
            chat_model: config.oracle.model.clone(),
            fields: vec![
                config.classification.category_field.clone(),
                "doc_type".to_string(),
            ],
        });
        reg = reg.with_oracle("openai", Arc::new(oracle));
    }

    reg.set_preferred(&config.oracle.provider)
}

/// Selects the configured oracle; an unknown name is a configuration error.
pub fn select_oracle(config: &AppConfig) -> Result<Arc<dyn ClassificationOracle>, ConfigError> {
    Ok(build_registry(config).oracle(None)?)
}

#[derive(Debug, Clone, Default)]
pub struct RunRequest {
    pub source: PathBuf,
    pub output: PathBuf,
    pub dry_run: bool,
    /// Continue the latest unfinished run over the same source.
    pub resume: bool,
    /// Continue this specific run.
    pub run_id: Option<String>,
    pub discard_corrupt_state: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct ProposedMove {
    pub source: PathBuf,
    pub destination: PathBuf,
}

/// Outcome counts over every decision the run has recorded, across all of
/// its attempts.
#[derive(Debug, Clone, Serialize)]
pub struct RunSummary {
    pub run_id: String,
    pub dry_run: bool,
    pub resumed: bool,
    pub status: RunStatus,
    pub placed: usize,
    pub duplicates: usize,
    pub low_confidence: usize,
    pub errors: usize,
    /// Unreadable entries met during this attempt's scan.
    pub scan_issues: usize,
    pub audit_failures: usize,
    /// Moves finalized from intents left by an interrupted attempt.
    pub recovered: usize,
    /// Moves decided in a dry run (empty for real runs).
    pub proposed_moves: Vec<ProposedMove>,
}

impl RunSummary {
    pub fn total(&self) -> usize {
        self.placed + self.duplicates + self.low_confidence + self.errors
    }

    pub fn is_partial(&self) -> bool {
        self.errors > 0
            || self.scan_issues > 0
            || self.audit_failures > 0
            || self.status == RunStatus::Failed
    }
}

pub struct Pipeline {
    config: AppConfig,
    oracle: Arc<dyn ClassificationOracle>,
    audit: Option<Arc<dyn AuditSink>>,
}

struct ScanOutput {
    records: Vec<FileRecord>,
    failures: Vec<(ScannedFile, FingerprintError)>,
    issues: Vec<ScanIssue>,
}

/// Mutable state of one attempt. Only the orchestrating task touches it.
struct RunContext<'a> {
    store: &'a ResumeStateStore,
    audit: Arc<dyn AuditSink>,
    placer: Placer,
    resolver: PathResolver,
    dry_run: bool,
    checkpoint: usize,
    audit_failures: usize,
}

impl RunContext<'_> {
    /// Audit events are on disk before the state commit. A crash in between
    /// repeats them on resume rather than losing them.
    async fn finalize(
        &mut self,
        fingerprint: Option<&Fingerprint>,
        outcome: GroupOutcome,
        decisions: &[PlacementDecision],
    ) -> Result<(), PipelineError> {
        for decision in decisions {
            if let Err(err) = self.audit.emit(decision).await {
                error!(path = %decision.source_path.display(), error = %err, "audit event not written");
                self.audit_failures += 1;
            }
        }
        if !decisions.is_empty() {
            if let Err(err) = self.audit.flush().await {
                error!(error = %err, "audit log flush failed");
                self.audit_failures += 1;
            }
        }
        let written = match fingerprint {
            Some(fp) => self.store.mark_processed(fp, outcome, decisions).await,
            None => {
                let mut res = Ok(());
                for decision in decisions {
                    res = self.store.record_unkeyed(decision).await;
                    if res.is_err() {
                        break;
                    }
                }
                res
            }
        };
        written.map_err(state_err(self.checkpoint))?;
        if fingerprint.is_some() {
            self.checkpoint += 1;
        }
        Ok(())
    }

    /// Decision for a canonical file the oracle answered for.
    async fn settle(&mut self, outcome: Gated) -> Result<PlacementDecision, PipelineError> {
        let run_id = self.store.run_id().to_string();
        let assignment = match outcome {
            Gated::Failed { record, cause } => {
                return Ok(PlacementDecision::error(
                    record.absolute_path,
                    Some(record.content_fingerprint),
                    cause,
                )
                .for_run(&run_id))
            }
            Gated::LowConfidence(a) => {
                debug!(path = %a.file_record.absolute_path.display(), confidence = a.confidence, "below threshold");
                return Ok(PlacementDecision::low_confidence(&a).for_run(&run_id));
            }
            Gated::Accepted(a) => a,
        };
        let record = &assignment.file_record;
        let fail = |cause: ErrorCause| {
            PlacementDecision::error(
                record.absolute_path.clone(),
                Some(record.content_fingerprint.clone()),
                cause,
            )
            .for_run(&run_id)
        };

        let relative = match self.resolver.resolve(&assignment) {
            Ok(rel) => rel,
            Err(err) => {
                warn!(path = %record.absolute_path.display(), error = %err, "template resolution failed");
                return Ok(fail(ErrorCause::from(&err)));
            }
        };
        let destination = match self.placer.plan(record, &relative) {
            Ok(Plan::Place { destination }) => destination,
            Ok(Plan::AlreadyPlaced { existing }) => {
                let mut d = PlacementDecision::duplicate(record, existing, Some(assignment.confidence));
                d.fields = assignment.proposed_fields.clone();
                return Ok(d.for_run(&run_id));
            }
            Err(err) => {
                warn!(path = %record.absolute_path.display(), error = %err, "no destination");
                return Ok(fail(ErrorCause::from(&err)));
            }
        };

        let decision = PlacementDecision::moved(&assignment, destination.clone()).for_run(&run_id);
        if !self.dry_run {
            self.store
                .record_intent(&record.content_fingerprint, &destination, &decision)
                .await
                .map_err(state_err(self.checkpoint))?;
        }
        match self.placer.commit(record, &destination) {
            Ok(()) => {
                info!(
                    from = %record.absolute_path.display(),
                    to = %destination.display(),
                    dry_run = self.dry_run,
                    "placed"
                );
                Ok(decision)
            }
            Err(err) => {
                warn!(path = %record.absolute_path.display(), error = %err, "move failed");
                self.placer.release(&destination);
                Ok(fail(ErrorCause::from(&err)))
            }
        }
    }
}

impl Pipeline {
    pub fn new(config: AppConfig, oracle: Arc<dyn ClassificationOracle>) -> Self {
        Self {
            config,
            oracle,
            audit: None,
        }
    }

    /// Replaces the default JSON Lines audit log.
    pub fn with_audit_sink(mut self, sink: Arc<dyn AuditSink>) -> Self {
        self.audit = Some(sink);
        self
    }

    #[instrument(skip_all, fields(source = %req.source.display(), output = %req.output.display()))]
    pub async fn run(
        &self,
        req: RunRequest,
        cancel: CancellationToken,
    ) -> Result<RunSummary, PipelineError> {
        let cfg = &self.config;
        cfg.validate()?;
        let resolver = PathResolver::from_config(&cfg.templates, &cfg.classification.category_field)
            .map_err(ConfigError::from)?;

        let source = canonical_source(&req.source)?;
        std::fs::create_dir_all(&req.output).map_err(|source| PipelineError::Io {
            context: format!("create output root {}", req.output.display()),
            source,
        })?;
        let output = std::fs::canonicalize(&req.output).map_err(|source| PipelineError::Io {
            context: format!("resolve output root {}", req.output.display()),
            source,
        })?;
        if output == source {
            return Err(ConfigError::Invalid("output root must differ from the source root".into()).into());
        }

        let state_dir = cfg.state.dir_for(&output);
        let discard = req.discard_corrupt_state || cfg.state.discard_corrupt;
        let db = StateDb::open(&state_dir, discard)
            .await
            .map_err(PipelineError::StateUnavailable)?;
        let state_dir = std::fs::canonicalize(&state_dir).unwrap_or(state_dir);

        let requested_dry_run = req.dry_run || cfg.placement.dry_run;
        let (store, resumed) = open_run(&db, &req, &source, &output, requested_dry_run).await?;
        let dry_run = store.dry_run();
        info!(run_id = store.run_id(), resumed, dry_run, "run opened");

        let audit: Arc<dyn AuditSink> = match &self.audit {
            Some(sink) => sink.clone(),
            None => {
                let sink =
                    JsonlAuditSink::open(&state_dir.join("audit").join(format!("{}.jsonl", store.run_id())))
                        .await?;
                debug!(path = %sink.path().display(), "audit log opened");
                Arc::new(sink)
            }
        };

        let fingerprinter = Fingerprinter::new(cfg.scan.large_file_threshold, cfg.scan.partial_hash_bytes);
        let scan = scan_tree(
            &source,
            ScanOptions {
                exclude: cfg.scan.exclude.clone(),
                include_hidden: cfg.scan.include_hidden,
                skip_dirs: vec![state_dir.clone(), output.clone()],
            },
            fingerprinter,
        )
        .await?;
        info!(
            files = scan.records.len(),
            fingerprint_failures = scan.failures.len(),
            issues = scan.issues.len(),
            "scan complete"
        );

        let unavailable = PipelineError::StateUnavailable;
        let mut decided: HashMap<PathBuf, PlacementDecision> = store
            .decisions()
            .await
            .map_err(unavailable)?
            .into_iter()
            .map(|d| (d.source_path.clone(), d))
            .collect();
        let checkpoint = store.snapshot().await.map_err(unavailable)?.processed.len();

        let mut placer = Placer::new(output.clone(), dry_run, fingerprinter);
        for d in decided.values() {
            if let (DecisionAction::Move, Some(dest), Some(fp)) =
                (d.action, &d.destination_path, &d.fingerprint)
            {
                placer.claim_existing(dest.clone(), fp.clone());
            }
        }

        let mut ctx = RunContext {
            store: &store,
            audit,
            placer,
            resolver,
            dry_run,
            checkpoint,
            audit_failures: 0,
        };
        let run_id = store.run_id().to_string();

        let outcome = self
            .process(&mut ctx, scan.records, scan.failures, &mut decided, &fingerprinter, cancel)
            .await;
        let (status, recovered) = match outcome {
            Ok(done) => done,
            Err(err) => {
                if let Err(status_err) = store.set_status(RunStatus::Failed).await {
                    warn!(error = %status_err, "could not mark run failed");
                }
                let _ = ctx.audit.flush().await;
                return Err(err);
            }
        };

        store
            .set_status(status)
            .await
            .map_err(state_err(ctx.checkpoint))?;
        if let Err(err) = ctx.audit.flush().await {
            error!(error = %err, "audit log flush failed");
            ctx.audit_failures += 1;
        }

        let decisions = store.decisions().await.map_err(state_err(ctx.checkpoint))?;
        let summary = summarize(
            run_id,
            dry_run,
            resumed,
            status,
            &decisions,
            scan.issues.len(),
            ctx.audit_failures,
            recovered,
        );
        info!(
            status = status.as_str(),
            placed = summary.placed,
            duplicates = summary.duplicates,
            low_confidence = summary.low_confidence,
            errors = summary.errors,
            "run finished"
        );
        db.close().await;
        Ok(summary)
    }

    /// Everything between the scan and the final status. Returns the run
    /// status and the number of recovered intents.
    async fn process(
        &self,
        ctx: &mut RunContext<'_>,
        records: Vec<FileRecord>,
        failures: Vec<(ScannedFile, FingerprintError)>,
        decided: &mut HashMap<PathBuf, PlacementDecision>,
        fingerprinter: &Fingerprinter,
        cancel: CancellationToken,
    ) -> Result<(RunStatus, usize), PipelineError> {
        let store = ctx.store;
        let run_id = store.run_id().to_string();

        // Files that could not be fingerprinted.
        for (file, err) in failures {
            if decided.contains_key(&file.path) {
                continue;
            }
            let d = PlacementDecision::error(file.path.clone(), None, ErrorCause::from(&err)).for_run(&run_id);
            ctx.finalize(None, GroupOutcome::Failed, std::slice::from_ref(&d)).await?;
            decided.insert(file.path, d);
        }

        let undecided: Vec<FileRecord> = records
            .into_iter()
            .filter(|r| !decided.contains_key(&r.absolute_path))
            .collect();
        let mut groups: Vec<DuplicateGroup> = Deduplicator::group(undecided);

        // Moves that happened before the previous attempt could commit them.
        let mut recovered = 0;
        for intent in store.intents().await.map_err(state_err(ctx.checkpoint))? {
            let source = intent.decision.source_path.clone();
            let finished = !source.exists()
                && fingerprinter
                    .fingerprint(&intent.destination)
                    .map(|fp| fp == intent.fingerprint)
                    .unwrap_or(false);
            if !finished {
                debug!(path = %source.display(), "dropping stale placement intent");
                store.discard_intent(&source).await.map_err(state_err(ctx.checkpoint))?;
                continue;
            }
            info!(from = %source.display(), to = %intent.destination.display(), "recovered interrupted move");
            let mut canonical = intent.decision.clone().for_run(&run_id);
            canonical.destination_path = Some(intent.destination.clone());
            let mut decisions = vec![canonical.clone()];
            if let Some(pos) = groups.iter().position(|g| g.fingerprint == intent.fingerprint) {
                let group = groups.remove(pos);
                decisions.extend(
                    group
                        .members()
                        .filter(|m| m.absolute_path != source)
                        .map(|m| Deduplicator::inherit(m, &canonical)),
                );
            }
            ctx.placer
                .claim_existing(intent.destination.clone(), intent.fingerprint.clone());
            ctx.finalize(Some(&intent.fingerprint), GroupOutcome::Resolved, &decisions)
                .await?;
            for d in decisions {
                decided.insert(d.source_path.clone(), d);
            }
            recovered += 1;
        }

        // Pending fingerprints whose files are gone. A recorded path that the
        // scan still produced (possibly with new content) is decided with its
        // current group instead.
        let present: HashSet<Fingerprint> = groups.iter().map(|g| g.fingerprint.clone()).collect();
        let scanned: HashSet<&Path> = groups
            .iter()
            .flat_map(|g| g.members())
            .map(|m| m.absolute_path.as_path())
            .collect();
        for (fp, paths) in store.pending_paths().await.map_err(state_err(ctx.checkpoint))? {
            if present.contains(&fp) {
                continue;
            }
            let decisions: Vec<PlacementDecision> = paths
                .into_iter()
                .filter(|p| !decided.contains_key(p) && !scanned.contains(p.as_path()))
                .map(|p| PlacementDecision::error(p, Some(fp.clone()), ErrorCause::MissingAtResume).for_run(&run_id))
                .collect();
            if decisions.is_empty() {
                debug!(fingerprint = %fp, "pending fingerprint superseded by changed content");
            } else {
                warn!(fingerprint = %fp, files = decisions.len(), "pending files missing at resume");
            }
            ctx.finalize(Some(&fp), GroupOutcome::Failed, &decisions).await?;
            for d in decisions {
                decided.insert(d.source_path.clone(), d);
            }
        }

        // Already processed fingerprints: new copies inherit the stored outcome.
        let mut pending_groups: HashMap<Fingerprint, DuplicateGroup> = HashMap::new();
        let mut canonicals = Vec::new();
        for group in groups {
            if store.is_processed(&group.fingerprint).await.map_err(state_err(ctx.checkpoint))? {
                let stored = store.decisions_for(&group.fingerprint).await.map_err(state_err(ctx.checkpoint))?;
                let Some(anchor) = anchor_decision(&stored) else {
                    warn!(fingerprint = %group.fingerprint, "processed fingerprint without decisions");
                    continue;
                };
                let decisions: Vec<PlacementDecision> = group
                    .members()
                    .map(|m| Deduplicator::inherit(m, anchor).for_run(&run_id))
                    .collect();
                debug!(fingerprint = %group.fingerprint, files = decisions.len(), "inheriting stored outcome");
                let outcome = GroupOutcome::for_action(anchor.action);
                ctx.finalize(Some(&group.fingerprint), outcome, &decisions).await?;
                continue;
            }
            canonicals.push(group.canonical.clone());
            pending_groups.insert(group.fingerprint.clone(), group);
        }

        let registrations: Vec<(Fingerprint, Vec<PathBuf>)> = canonicals
            .iter()
            .filter_map(|c| pending_groups.get(&c.content_fingerprint))
            .map(|g| (g.fingerprint.clone(), g.members().map(|m| m.absolute_path.clone()).collect()))
            .collect();
        store
            .register_pending(&registrations)
            .await
            .map_err(state_err(ctx.checkpoint))?;

        let assigner = BatchAssigner::new(
            self.oracle.clone(),
            &self.config.oracle,
            self.config.classification.threshold,
            self.config.scan.excerpt_bytes,
        );
        let batches = assigner.partition(canonicals);
        info!(groups = pending_groups.len(), batches = batches.len(), "dispatching to oracle");
        let (mut results, dispatcher) = assigner.dispatch(batches, cancel.clone());

        while let Some(batch) = results.recv().await {
            debug!(batch = batch.index, files = batch.outcomes.len(), "batch returned");
            for outcome in batch.outcomes {
                let fp = outcome.record().content_fingerprint.clone();
                let Some(group) = pending_groups.remove(&fp) else {
                    continue;
                };
                let settled = match ctx.settle(outcome).await {
                    Ok(d) => d,
                    Err(err) => {
                        cancel.cancel();
                        return Err(err);
                    }
                };
                let mut decisions = vec![settled.clone()];
                decisions.extend(Deduplicator::resolve_duplicates(&group.duplicates, &settled));
                if let Err(err) = ctx
                    .finalize(Some(&fp), GroupOutcome::for_action(settled.action), &decisions)
                    .await
                {
                    cancel.cancel();
                    return Err(err);
                }
            }
        }

        let report = match dispatcher.await {
            Ok(report) => Some(report),
            Err(err) => {
                error!(error = %err, "dispatcher task failed");
                None
            }
        };
        let status = if pending_groups.is_empty() {
            RunStatus::Completed
        } else if cancel.is_cancelled() || report.map(|r| r.cancelled).unwrap_or(false) {
            info!(remaining = pending_groups.len(), "run cancelled; resume to finish");
            RunStatus::Cancelled
        } else {
            error!(remaining = pending_groups.len(), "batches ended without results");
            RunStatus::Failed
        };
        Ok((status, recovered))
    }
}

fn state_err(checkpoint: usize) -> impl Fn(StateStoreError) -> PipelineError {
    move |source| PipelineError::StateWrite { checkpoint, source }
}

fn canonical_source(path: &Path) -> Result<PathBuf, ScanError> {
    if !path.exists() {
        return Err(ScanError::RootMissing(path.to_path_buf()));
    }
    if !path.is_dir() {
        return Err(ScanError::NotADirectory(path.to_path_buf()));
    }
    std::fs::canonicalize(path).map_err(|source| ScanError::Untraversable {
        path: path.to_path_buf(),
        source,
    })
}

async fn open_run(
    db: &StateDb,
    req: &RunRequest,
    source: &Path,
    output: &Path,
    dry_run: bool,
) -> Result<(ResumeStateStore, bool), PipelineError> {
    let existing = match &req.run_id {
        Some(id) => Some(id.clone()),
        None if req.resume => db
            .find_resumable(source)
            .await
            .map_err(PipelineError::StateUnavailable)?,
        None => None,
    };
    let Some(run_id) = existing else {
        if req.resume {
            info!("no unfinished run for this source; starting a new one");
        }
        let store = ResumeStateStore::create(db, source, output, dry_run)
            .await
            .map_err(PipelineError::StateUnavailable)?;
        return Ok((store, false));
    };

    let store = match ResumeStateStore::load(db, &run_id).await {
        Ok(store) => store,
        Err(StateStoreError::UnknownRun(id)) => return Err(ConfigError::UnknownRun(id).into()),
        Err(err) => return Err(PipelineError::StateUnavailable(err)),
    };
    if Path::new(store.source_root()) != source {
        return Err(ConfigError::Invalid(format!(
            "run {run_id} was started over {}, not {}",
            store.source_root(),
            source.display()
        ))
        .into());
    }
    if store.dry_run() != dry_run {
        return Err(ConfigError::DryRunMismatch {
            run_id,
            stored: store.dry_run(),
        }
        .into());
    }
    store
        .set_status(RunStatus::Running)
        .await
        .map_err(PipelineError::StateUnavailable)?;
    Ok((store, true))
}

async fn scan_tree(
    root: &Path,
    opts: ScanOptions,
    fingerprinter: Fingerprinter,
) -> Result<ScanOutput, PipelineError> {
    let scanner = Scanner::new(root, &opts)?;
    let joined = tokio::task::spawn_blocking(move || {
        let mut out = ScanOutput {
            records: Vec::new(),
            failures: Vec::new(),
            issues: Vec::new(),
        };
        for event in scanner.records(&fingerprinter) {
            match event {
                ScanEvent::Record(r) => out.records.push(r),
                ScanEvent::FingerprintFailed { file, error } => out.failures.push((file, error)),
                ScanEvent::Issue(issue) => out.issues.push(issue),
            }
        }
        out
    })
    .await;
    joined.map_err(|err| PipelineError::Io {
        context: "scan task".into(),
        source: std::io::Error::new(std::io::ErrorKind::Other, err.to_string()),
    })
}

/// The stored decision new copies of a processed fingerprint inherit from:
/// the move if there is one, else any duplicate, else the first decision.
fn anchor_decision(stored: &[PlacementDecision]) -> Option<&PlacementDecision> {
    stored
        .iter()
        .find(|d| d.action == DecisionAction::Move)
        .or_else(|| stored.iter().find(|d| d.action == DecisionAction::SkipDuplicate))
        .or_else(|| stored.first())
}

#[allow(clippy::too_many_arguments)]
fn summarize(
    run_id: String,
    dry_run: bool,
    resumed: bool,
    status: RunStatus,
    decisions: &[PlacementDecision],
    scan_issues: usize,
    audit_failures: usize,
    recovered: usize,
) -> RunSummary {
    let count = |action| decisions.iter().filter(|d| d.action == action).count();
    let proposed_moves = if dry_run {
        decisions
            .iter()
            .filter(|d| d.action == DecisionAction::Move)
            .filter_map(|d| {
                d.destination_path.as_ref().map(|dest| ProposedMove {
                    source: d.source_path.clone(),
                    destination: dest.clone(),
                })
            })
            .collect()
    } else {
        Vec::new()
    };
    RunSummary {
        run_id,
        dry_run,
        resumed,
        status,
        placed: count(DecisionAction::Move),
        duplicates: count(DecisionAction::SkipDuplicate),
        low_confidence: count(DecisionAction::SkipLowConfidence),
        errors: count(DecisionAction::SkipError),
        scan_issues,
        audit_failures,
        recovered,
        proposed_moves,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;

    #[test]
    fn registry_defaults_to_heuristic() {
        let cfg = AppConfig::default();
        let oracle = select_oracle(&cfg).unwrap();
        assert_eq!(oracle.name(), "heuristic");
    }

    #[test]
    fn unknown_provider_is_a_config_error() {
        let mut cfg = AppConfig::default();
        cfg.oracle.provider = "nonexistent".into();
        assert!(matches!(select_oracle(&cfg), Err(ConfigError::Oracle(_))));
    }

    #[test]
    fn anchor_prefers_the_move() {
        let record = FileRecord {
            absolute_path: "/in/a".into(),
            size_bytes: 1,
            modified_time: None,
            content_fingerprint: Fingerprint::new("b3:1"),
            extension: None,
        };
        let dup = PlacementDecision::duplicate(&record, "/out/x".into(), None);
        let moved = PlacementDecision::moved(
            &crate::models::Assignment {
                file_record: record,
                proposed_fields: BTreeMap::new(),
                confidence: 0.9,
                rationale: String::new(),
            },
            "/out/a".into(),
        );
        let stored = vec![dup, moved];
        assert_eq!(anchor_decision(&stored).unwrap().action, DecisionAction::Move);
        assert!(anchor_decision(&[]).is_none());
    }

    #[test]
    fn partial_summary_flags() {
        let s = summarize("r".into(), true, false, RunStatus::Completed, &[], 0, 0, 0);
        assert!(!s.is_partial());
        assert_eq!(s.total(), 0);
        let s = summarize("r".into(), true, false, RunStatus::Completed, &[], 1, 0, 0);
        assert!(s.is_partial());
    }
}
