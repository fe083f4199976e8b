//! Rust bridge for running the Codex CLI as a per-file analysis tool.
//!
//! One invocation builds the command line, composes the environment, picks
//! where the final message is written, supervises the subprocess while its
//! JSON event stream is turned into progress text, and reads the result back.

/// Per-file analysis orchestration with progress events.
pub mod analyzer;
/// Command-line argument construction for Codex invocations.
pub mod cmd;
/// Explicit settings passed into every call.
pub mod config;
/// Discovery and resolution of the Codex CLI executable path.
pub mod discovery;
/// Subprocess environment composition and CLI home preparation.
pub mod env;
/// Error types returned by bridge operations.
pub mod error;
/// Output file planning and result loading.
pub mod output;
/// Subprocess execution with streaming, cancellation and timeouts.
pub mod process;
/// Project-relative analysis output layout and the run log.
pub mod storage;
/// Decoding of the tool's JSON event stream into progress text.
pub mod stream;
/// Shared request, result and event types.
pub mod types;

use std::path::{Path, PathBuf};
use std::process::Stdio;
use tokio::process::Command;
use tokio_util::sync::CancellationToken;

pub use analyzer::Analyzer;
pub use config::InsightSettings;
pub use discovery::{discover_codex, resolve_tool_path, CODEX_BIN_ENV_VAR};
pub use error::BridgeError;
pub use output::{plan_output, OutputPlan};
pub use storage::{AnalysisStorage, AnalysisTarget};
pub use types::*;

/// Runs Codex invocations with one set of settings.
#[derive(Debug, Clone)]
pub struct InsightBridge {
    settings: InsightSettings,
    project_root: Option<PathBuf>,
    storage: Option<AnalysisStorage>,
}

impl InsightBridge {
    /// A bridge without a project: the tool inherits the working directory
    /// and nothing is logged to disk.
    #[must_use]
    pub const fn new(settings: InsightSettings) -> Self {
        Self {
            settings,
            project_root: None,
            storage: None,
        }
    }

    /// A bridge rooted at `project_root`; runs start there and diagnostics go
    /// to the project's run log when enabled.
    #[must_use]
    pub fn for_project(settings: InsightSettings, project_root: impl Into<PathBuf>) -> Self {
        let project_root = project_root.into();
        let storage = AnalysisStorage::new(&project_root, &settings);
        Self {
            settings,
            project_root: Some(project_root),
            storage: Some(storage),
        }
    }

    /// Settings every invocation uses.
    #[must_use]
    pub const fn settings(&self) -> &InsightSettings {
        &self.settings
    }

    /// Project storage, for bridges created with [`Self::for_project`].
    #[must_use]
    pub fn storage(&self) -> Option<&AnalysisStorage> {
        self.storage.as_ref()
    }

    /// Checks that the configured tool starts and reports a version.
    ///
    /// # Errors
    /// `LaunchFailed` if the binary cannot be executed, `NonZeroExit` if it
    /// fails its own version check.
    pub async fn check_health(&self) -> Result<String, BridgeError> {
        let tool_path = resolve_tool_path(&self.settings);
        let output = Command::new(&tool_path)
            .arg("--version")
            .stdin(Stdio::null())
            .kill_on_drop(true)
            .output()
            .await
            .map_err(|e| BridgeError::launch("version check", e))?;

        if output.status.success() {
            Ok(String::from_utf8_lossy(&output.stdout).trim().to_string())
        } else {
            Err(BridgeError::NonZeroExit {
                exit_code: output.status.code().unwrap_or(-1),
                stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
            })
        }
    }

    /// Runs one invocation.
    ///
    /// `target` is the caller's persistent output file; `None` is an ad-hoc
    /// run whose output lives in a temporary file. Progress fragments go to
    /// `progress` in the order the tool produced them.
    ///
    /// # Errors
    /// `LaunchFailed`, `NonZeroExit`, `MissingOutput` and `Cancelled` are the
    /// outcomes callers are expected to tell apart; `Timeout` when the
    /// configured deadline passes.
    pub async fn invoke(
        &self,
        request: &InvocationRequest,
        target: Option<&Path>,
        cancel: &CancellationToken,
        progress: Option<&ProgressSender>,
    ) -> Result<InvocationResult, BridgeError> {
        let cli_home = env::prepare_cli_home(&self.settings).await?;
        let plan = plan_output(target, self.settings.overwrite_existing_output)?;

        let outcome = self
            .run_planned(request, &plan, &cli_home, cancel, progress)
            .await;
        plan.release();
        outcome
    }

    async fn run_planned(
        &self,
        request: &InvocationRequest,
        plan: &OutputPlan,
        cli_home: &Path,
        cancel: &CancellationToken,
        progress: Option<&ProgressSender>,
    ) -> Result<InvocationResult, BridgeError> {
        let tool_path = resolve_tool_path(&self.settings);
        let argv = cmd::build_command(&tool_path, &self.settings.codex_model, plan.path())?;
        let command_line = cmd::display_command(&argv);

        let composed = env::compose_environment(
            env::current_environment(),
            &env::EnvironmentInputs {
                api_key: &self.settings.api_key,
                api_url: &self.settings.api_url,
                cli_home,
                tool_path: &tool_path,
                project_root: self.project_root.as_deref(),
            },
        );

        let key_note = composed.api_key_missing.then(|| {
            format!("{} not configured; the request will likely be rejected", env::API_KEY_ENV)
        });
        if let Some(note) = &key_note {
            tracing::warn!("{note}");
        }

        let spec = process::LaunchSpec {
            argv,
            env: composed.vars,
            working_dir: composed.working_dir,
            timeout: self.settings.request_timeout(),
        };
        let body = serde_json::to_vec(request)?;

        tracing::info!("Executing Codex command: {}", command_line.join(" "));
        let run = process::supervise(&spec, &body, cancel, progress).await?;
        tracing::debug!(
            "Codex exited with {} after {:?} (PID: {})",
            run.exit_code,
            run.elapsed,
            run.pid
        );

        let diagnostics = self.surface_diagnostics(key_note, &run.output.stderr).await;
        let captured = run.into_success()?;
        let raw = output::load_output(plan, &captured.stdout).await?;

        Ok(InvocationResult {
            response: InsightResponse {
                status: STATUS_OK.to_string(),
                raw,
            },
            command_line,
            wrote_to_target: !plan.cleanup(),
            diagnostics,
        })
    }

    /// Collects what the caller should see besides the payload: a missing
    /// secret, then secondary-channel text whatever the exit code was. Both
    /// go to the run log when it is enabled.
    async fn surface_diagnostics(&self, key_note: Option<String>, stderr: &str) -> Option<String> {
        let mut diagnostics = String::new();
        if let Some(note) = key_note {
            self.log_run("env", &note).await;
            diagnostics.push_str(&note);
            diagnostics.push('\n');
        }
        if !stderr.trim().is_empty() {
            tracing::warn!("Codex stderr: {}", stderr.trim_end());
            self.log_run("stderr", stderr.trim_end()).await;
            diagnostics.push_str(stderr);
        }
        (!diagnostics.is_empty()).then_some(diagnostics)
    }

    async fn log_run(&self, section: &str, text: &str) {
        if let Some(storage) = &self.storage {
            storage.append_log(section, text).await;
        }
    }
}
