//! The `contextlens` binary runs Codex analyses over project files.

mod context;

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use contextlens_bridge::analyzer::AnalysisJob;
use contextlens_bridge::env::API_KEY_ENV;
use contextlens_bridge::{
    discover_codex, resolve_tool_path, Analyzer, BridgeError, InsightBridge, InsightEvent,
    InsightSettings, CODEX_BIN_ENV_VAR,
};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;
use tokio::sync::{mpsc, Semaphore};
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;

const EXIT_CANCELLED: u8 = 130;

#[derive(Parser)]
#[command(author, version, about, long_about = None)]
struct Cli {
    #[command(flatten)]
    settings: SettingsArgs,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Analyzes files and stores the results under the output root
    Analyze(AnalyzeArgs),
    /// Prints the stored analysis of a file
    Show {
        /// Source file whose analysis to print
        file: PathBuf,
    },
    /// Locates the Codex CLI and checks that it runs
    Doctor,
}

/// Overrides layered on top of the settings file.
#[derive(Args)]
struct SettingsArgs {
    /// JSON settings file (camelCase keys)
    #[arg(long, global = true)]
    settings: Option<PathBuf>,

    /// Project root; defaults to the current directory
    #[arg(long, global = true)]
    project_root: Option<PathBuf>,

    /// Codex executable (bare name or path)
    #[arg(long, global = true)]
    codex_path: Option<String>,

    /// Model passed to Codex
    #[arg(long, global = true)]
    model: Option<String>,

    /// Base URL for the model API
    #[arg(long, global = true)]
    api_url: Option<String>,

    /// Keep existing analysis files instead of replacing them
    #[arg(long, global = true)]
    no_overwrite: bool,

    /// Append Codex stderr to the run log
    #[arg(long, global = true)]
    cli_logs: bool,

    /// Per-file timeout in seconds (0 disables)
    #[arg(long, global = true)]
    timeout: Option<u64>,
}

#[derive(Args)]
struct AnalyzeArgs {
    /// Files to analyze
    #[arg(required = true)]
    files: Vec<PathBuf>,

    /// Do not store the results; print them instead
    #[arg(long)]
    ad_hoc: bool,

    /// Extra context sent with every request
    #[arg(long = "context", value_name = "KEY=VALUE", value_parser = context::parse_key_val)]
    context: Vec<(String, String)>,

    /// Print each outcome as a JSON line
    #[arg(long)]
    json: bool,
}

impl SettingsArgs {
    fn resolve(&self) -> Result<InsightSettings> {
        let mut settings = match &self.settings {
            Some(path) => InsightSettings::from_json_file(path)
                .with_context(|| format!("loading settings from {}", path.display()))?,
            None => InsightSettings::new(),
        };

        if let Some(path) = &self.codex_path {
            settings.codex_path.clone_from(path);
        }
        if let Some(model) = &self.model {
            settings.codex_model.clone_from(model);
        }
        if let Some(url) = &self.api_url {
            settings.api_url.clone_from(url);
        }
        if self.no_overwrite {
            settings.overwrite_existing_output = false;
        }
        if self.cli_logs {
            settings.enable_cli_logs = true;
        }
        if let Some(secs) = self.timeout {
            settings.request_timeout_sec = secs;
        }
        Ok(settings)
    }

    fn project_root(&self) -> Result<PathBuf> {
        match &self.project_root {
            Some(root) => std::path::absolute(root)
                .with_context(|| format!("resolving project root {}", root.display())),
            None => std::env::current_dir().context("reading current directory"),
        }
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();

    match run(cli).await {
        Ok(code) => code,
        Err(e) => {
            tracing::error!("{e:#}");
            ExitCode::FAILURE
        }
    }
}

async fn run(cli: Cli) -> Result<ExitCode> {
    let settings = cli.settings.resolve()?;
    let project_root = cli.settings.project_root()?;

    match cli.command {
        Commands::Analyze(args) => run_analyze(settings, project_root, args).await,
        Commands::Show { file } => run_show(settings, &project_root, &file).await,
        Commands::Doctor => Ok(run_doctor(settings).await),
    }
}

async fn run_analyze(
    settings: InsightSettings,
    project_root: PathBuf,
    args: AnalyzeArgs,
) -> Result<ExitCode> {
    let mut jobs_to_run = Vec::with_capacity(args.files.len());
    for file in &args.files {
        let prepared = context::prepare(&project_root, file, &args.context).await?;
        jobs_to_run.push(AnalysisJob::new(prepared.source, prepared.request).ad_hoc(args.ad_hoc));
    }

    let labels: HashMap<String, String> = jobs_to_run
        .iter()
        .map(|job| (job.request_id.clone(), label(&project_root, &job.source)))
        .collect();

    let cancel = CancellationToken::new();
    cancel_on_ctrl_c(cancel.clone());

    let (events_tx, events_rx) = mpsc::unbounded_channel();
    let printer = tokio::spawn(print_events(events_rx, labels, args.json, args.ad_hoc));

    let semaphore = Arc::new(Semaphore::new(settings.max_concurrency.max(1)));
    let analyzer = Arc::new(Analyzer::new(settings, project_root));
    let mut running = JoinSet::new();

    for job in jobs_to_run {
        let analyzer = Arc::clone(&analyzer);
        let semaphore = Arc::clone(&semaphore);
        let cancel = cancel.clone();
        let events = events_tx.clone();
        running.spawn(async move {
            let _permit = semaphore.acquire_owned().await.ok();
            analyzer.analyze(&job, &cancel, Some(&events)).await
        });
    }
    drop(events_tx);

    let mut failed = 0usize;
    let mut cancelled = false;
    while let Some(joined) = running.join_next().await {
        match joined {
            Ok(Ok(_)) => {}
            Ok(Err(e)) if e.is_cancelled() => cancelled = true,
            Ok(Err(_)) => failed += 1,
            Err(e) => {
                tracing::error!("Analysis task failed to complete: {e}");
                failed += 1;
            }
        }
    }
    printer.await.context("event printer")?;

    Ok(if cancelled {
        ExitCode::from(EXIT_CANCELLED)
    } else if failed > 0 {
        ExitCode::FAILURE
    } else {
        ExitCode::SUCCESS
    })
}

fn cancel_on_ctrl_c(cancel: CancellationToken) {
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::warn!("Interrupted; cancelling running analyses");
            cancel.cancel();
        }
    });
}

async fn print_events(
    mut events: mpsc::UnboundedReceiver<InsightEvent>,
    labels: HashMap<String, String>,
    json: bool,
    ad_hoc: bool,
) {
    let label_of = |id: &str| labels.get(id).map_or(id, String::as_str).to_string();

    while let Some(event) = events.recv().await {
        match &event {
            InsightEvent::Progress {
                request_id,
                message,
                percent,
            } => eprintln!("[{}] {percent:>3}% {message}", label_of(request_id)),
            InsightEvent::Completed {
                request_id,
                response,
                ..
            } => {
                if json {
                    print_json(&event);
                } else if ad_hoc {
                    println!("{}", response.raw);
                } else {
                    eprintln!("[{}] done", label_of(request_id));
                }
            }
            InsightEvent::Failed {
                request_id,
                message,
                code,
            } => {
                if json {
                    print_json(&event);
                } else if code == "CANCELLED" {
                    eprintln!("[{}] {message}", label_of(request_id));
                } else {
                    eprintln!("[{}] error ({code}): {message}", label_of(request_id));
                }
            }
        }
    }
}

fn print_json(event: &InsightEvent) {
    match serde_json::to_string(event) {
        Ok(line) => println!("{line}"),
        Err(e) => tracing::error!("Failed to serialize event: {e}"),
    }
}

fn label(project_root: &Path, source: &Path) -> String {
    source
        .strip_prefix(project_root)
        .unwrap_or(source)
        .display()
        .to_string()
}

async fn run_show(settings: InsightSettings, project_root: &Path, file: &Path) -> Result<ExitCode> {
    let source = std::path::absolute(file).with_context(|| format!("resolving {}", file.display()))?;
    let analyzer = Analyzer::new(settings, project_root);

    match analyzer.cached(&source).await {
        Ok(response) => {
            println!("{}", response.raw);
            Ok(ExitCode::SUCCESS)
        }
        Err(e @ BridgeError::CacheMissing { .. }) => {
            eprintln!(
                "{e} under {}. Run `contextlens analyze {}` first.",
                analyzer.storage().output_root().display(),
                file.display()
            );
            Ok(ExitCode::FAILURE)
        }
        Err(e) => Err(e.into()),
    }
}

async fn run_doctor(settings: InsightSettings) -> ExitCode {
    let bridge = InsightBridge::new(settings);
    let settings = bridge.settings();
    let mut healthy = true;

    match discover_codex(None) {
        Ok(path) => eprintln!("codex found: {}", path.display()),
        Err(e) => eprintln!("discovery: {e} (set {CODEX_BIN_ENV_VAR} or --codex-path)"),
    }
    eprintln!("configured tool: {}", resolve_tool_path(settings));

    let key_configured = !settings.api_key.trim().is_empty()
        || std::env::var(API_KEY_ENV).is_ok_and(|k| !k.trim().is_empty());
    if !key_configured {
        eprintln!("warning: no API key in settings or {API_KEY_ENV}");
    }

    match bridge.check_health().await {
        Ok(version) => println!("{version}"),
        Err(e) => {
            eprintln!("health check failed ({}): {e}", e.code());
            healthy = false;
        }
    }

    if healthy {
        ExitCode::SUCCESS
    } else {
        ExitCode::FAILURE
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_definition_is_valid() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_flags_override_settings_file() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("settings.json");
        std::fs::write(&file, r#"{"codexModel":"from-file","requestTimeoutSec":30}"#).unwrap();

        let cli = Cli::try_parse_from([
            "contextlens",
            "analyze",
            "src/lib.rs",
            "--settings",
            file.to_str().unwrap(),
            "--model",
            "from-flag",
            "--no-overwrite",
            "--context",
            "module=core",
        ])
        .unwrap();

        let settings = cli.settings.resolve().unwrap();
        assert_eq!(settings.codex_model, "from-flag");
        assert_eq!(settings.request_timeout_sec, 30);
        assert!(!settings.overwrite_existing_output);

        let Commands::Analyze(args) = cli.command else {
            panic!("expected analyze");
        };
        assert_eq!(args.context, vec![("module".to_string(), "core".to_string())]);
    }

    #[test]
    fn test_analyze_requires_files() {
        assert!(Cli::try_parse_from(["contextlens", "analyze"]).is_err());
    }

    #[test]
    fn test_label_is_project_relative() {
        assert_eq!(
            label(Path::new("/work/p"), Path::new("/work/p/src/a.rs")),
            Path::new("src/a.rs").display().to_string()
        );
        assert_eq!(label(Path::new("/work/p"), Path::new("/tmp/x.rs")), "/tmp/x.rs");
    }
}
