use clap::Parser;
use shelver_cli::args::{Cli, Commands};
use shelver_cli::exit::{self, exit_code_for};
use shelver_cli::report::StatusReport;
use shelver_core::config::AppConfig;
use shelver_core::error::{ConfigError, PipelineError, StateStoreError};
use shelver_core::pipeline::select_oracle;
use shelver_core::state::{ResumeStateStore, StateDb};
use shelver_core::{Pipeline, RunRequest};
use std::fs;
use std::path::Path;
use tempfile::tempdir;
use tokio_util::sync::CancellationToken;

fn request(source: &Path, output: &Path) -> RunRequest {
    RunRequest {
        source: source.to_path_buf(),
        output: output.to_path_buf(),
        ..RunRequest::default()
    }
}

async fn run_with(
    cfg: AppConfig,
    req: RunRequest,
    cancel: CancellationToken,
) -> Result<shelver_core::RunSummary, PipelineError> {
    let oracle = select_oracle(&cfg).unwrap();
    Pipeline::new(cfg, oracle).run(req, cancel).await
}

#[test]
fn run_flags_parse() {
    let cli = Cli::try_parse_from([
        "shelver",
        "run",
        "--source",
        "/in",
        "--output",
        "/out",
        "--dry-run",
        "--resume",
        "--json",
    ])
    .unwrap();
    match cli.command {
        Commands::Run(args) => {
            assert_eq!(args.source, Path::new("/in"));
            assert!(args.dry_run && args.resume && args.json);
            assert!(args.run_id.is_none());
            assert!(!args.discard_corrupt_state);
        }
        Commands::Status(_) => panic!("expected run"),
    }
}

#[test]
fn run_requires_source_and_output() {
    assert!(Cli::try_parse_from(["shelver", "run", "--source", "/in"]).is_err());
}

#[test]
fn config_flag_is_accepted_after_subcommand() {
    let cli = Cli::try_parse_from([
        "shelver", "status", "--output", "/out", "--config", "shelver.toml",
    ])
    .unwrap();
    assert_eq!(cli.config.as_deref(), Some("shelver.toml"));
    assert!(matches!(cli.command, Commands::Status(_)));
}

#[test]
fn error_kinds_map_to_distinct_ranges() {
    let config = PipelineError::Config(ConfigError::Invalid("bad".into()));
    let startup = PipelineError::StateUnavailable(StateStoreError::UnknownRun("x".into()));
    let mid_run = PipelineError::StateWrite {
        checkpoint: 3,
        source: StateStoreError::UnknownRun("x".into()),
    };
    assert_eq!(exit::for_error(&config), exit::CONFIG);
    assert_eq!(exit::for_error(&startup), exit::FATAL_STARTUP);
    assert_eq!(exit::for_error(&mid_run), exit::FATAL_MID_RUN);
}

#[tokio::test]
async fn clean_run_exits_zero() {
    let temp = tempdir().unwrap();
    let source = temp.path().join("inbox");
    fs::create_dir_all(&source).unwrap();
    fs::write(source.join("invoice_march.txt"), "invoice total 10").unwrap();

    let result = run_with(
        AppConfig::default(),
        request(&source, &temp.path().join("library")),
        CancellationToken::new(),
    )
    .await;
    assert_eq!(exit_code_for(&result), exit::OK);
    assert!(temp
        .path()
        .join("library/finance/invoice/invoice_march.txt")
        .exists());
}

#[tokio::test]
async fn unresolvable_template_is_partial() {
    let temp = tempdir().unwrap();
    let source = temp.path().join("inbox");
    fs::create_dir_all(&source).unwrap();
    fs::write(source.join("invoice.txt"), "invoice").unwrap();

    let mut cfg = AppConfig::default();
    cfg.templates.default = "{category}/{project}".into();
    let result = run_with(cfg, request(&source, &temp.path().join("library")), CancellationToken::new()).await;
    assert_eq!(result.as_ref().unwrap().errors, 1);
    assert_eq!(exit_code_for(&result), exit::PARTIAL);
    assert!(source.join("invoice.txt").exists());
}

#[tokio::test]
async fn interrupted_run_exits_cancelled() {
    let temp = tempdir().unwrap();
    let source = temp.path().join("inbox");
    fs::create_dir_all(&source).unwrap();
    fs::write(source.join("contract.txt"), "agreement").unwrap();

    let cancel = CancellationToken::new();
    cancel.cancel();
    let result = run_with(AppConfig::default(), request(&source, &temp.path().join("library")), cancel).await;
    assert_eq!(exit_code_for(&result), exit::CANCELLED);
}

#[tokio::test]
async fn invalid_config_and_missing_source_are_fatal() {
    let temp = tempdir().unwrap();
    let source = temp.path().join("inbox");
    fs::create_dir_all(&source).unwrap();

    let mut cfg = AppConfig::default();
    cfg.oracle.batch_size = 0;
    let result = run_with(cfg, request(&source, &temp.path().join("out")), CancellationToken::new()).await;
    assert_eq!(exit_code_for(&result), exit::CONFIG);

    let result = run_with(
        AppConfig::default(),
        request(&temp.path().join("absent"), &temp.path().join("out")),
        CancellationToken::new(),
    )
    .await;
    assert_eq!(exit_code_for(&result), exit::FATAL_STARTUP);
}

#[tokio::test]
async fn status_report_counts_recorded_decisions() {
    let temp = tempdir().unwrap();
    let source = temp.path().join("inbox");
    let output = temp.path().join("library");
    fs::create_dir_all(&source).unwrap();
    fs::write(source.join("receipt.txt"), "receipt").unwrap();
    fs::write(source.join("receipt copy.txt"), "receipt").unwrap();
    fs::write(source.join("mystery.zzz"), "???").unwrap();

    let summary = run_with(AppConfig::default(), request(&source, &output), CancellationToken::new())
        .await
        .unwrap();

    let db = StateDb::open_existing(&fs::canonicalize(&output).unwrap().join(".shelver"))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(db.latest_run().await.unwrap().as_deref(), Some(summary.run_id.as_str()));
    let store = ResumeStateStore::load(&db, &summary.run_id).await.unwrap();
    let report = StatusReport::new(&store.snapshot().await.unwrap(), &store.decisions().await.unwrap());

    assert_eq!(report.processed, 2);
    assert_eq!(report.pending, 0);
    assert_eq!(report.decisions.placed, 1);
    assert_eq!(report.decisions.duplicates, 1);
    assert_eq!(report.decisions.low_confidence, 1);
    assert!(report.render().contains("2 processed, 0 pending"));
}
