use anyhow::{anyhow, Context, Result};
use clap::Parser;
use shelver_cli::args::{Cli, Commands, RunArgs, StatusArgs};
use shelver_cli::exit;
use shelver_cli::report::{render_summary, StatusReport};
use shelver_core::config::{self, AppConfig};
use shelver_core::pipeline::select_oracle;
use shelver_core::state::{ResumeStateStore, StateDb};
use shelver_core::{Pipeline, PipelineError, RunRequest};
use std::process::ExitCode;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

#[tokio::main]
async fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let cfg = match config::load(cli.config.as_deref()) {
        Ok(cfg) => cfg,
        Err(err) => {
            eprintln!("error: {err}");
            return ExitCode::from(exit::CONFIG);
        }
    };

    match cli.command {
        Commands::Run(args) => run(cfg, args).await,
        Commands::Status(args) => match status(&cfg, args).await {
            Ok(()) => ExitCode::from(exit::OK),
            Err(err) => {
                eprintln!("error: {err:#}");
                ExitCode::from(exit::FATAL_STARTUP)
            }
        },
    }
}

async fn run(cfg: AppConfig, args: RunArgs) -> ExitCode {
    let oracle = match select_oracle(&cfg) {
        Ok(oracle) => oracle,
        Err(err) => {
            return report_error(&PipelineError::Config(err), args.json);
        }
    };
    info!(oracle = oracle.name(), "oracle selected");

    let cancel = CancellationToken::new();
    let on_signal = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("interrupt received; finishing in-flight work");
            on_signal.cancel();
        }
    });

    let req = RunRequest {
        source: args.source,
        output: args.output,
        dry_run: args.dry_run,
        resume: args.resume,
        run_id: args.run_id,
        discard_corrupt_state: args.discard_corrupt_state,
    };
    let result = Pipeline::new(cfg, oracle).run(req, cancel).await;
    let code = exit::exit_code_for(&result);
    match result {
        Ok(summary) => {
            if args.json {
                match serde_json::to_string_pretty(&summary) {
                    Ok(text) => println!("{text}"),
                    Err(err) => error!(error = %err, "summary could not be encoded"),
                }
            } else {
                println!("{}", render_summary(&summary));
            }
            ExitCode::from(code)
        }
        Err(err) => report_error(&err, args.json),
    }
}

fn report_error(err: &PipelineError, json: bool) -> ExitCode {
    let code = exit::for_error(err);
    if json {
        let body = serde_json::json!({
            "status": "error",
            "error": err.to_string(),
            "exit_code": code,
        });
        println!("{body}");
    } else {
        eprintln!("error: {err}");
    }
    ExitCode::from(code)
}

async fn status(cfg: &AppConfig, args: StatusArgs) -> Result<()> {
    let output = std::fs::canonicalize(&args.output)
        .with_context(|| format!("output root {}", args.output.display()))?;
    let state_dir = cfg.state.dir_for(&output);
    let db = StateDb::open_existing(&state_dir)
        .await?
        .ok_or_else(|| anyhow!("no run state under {}", state_dir.display()))?;

    let run_id = match args.run_id {
        Some(id) => id,
        None => db
            .latest_run()
            .await?
            .ok_or_else(|| anyhow!("no runs recorded in {}", db.path().display()))?,
    };
    let store = ResumeStateStore::load(&db, &run_id).await?;
    let report = StatusReport::new(&store.snapshot().await?, &store.decisions().await?);
    db.close().await;

    if args.json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        println!("{}", report.render());
    }
    Ok(())
}
