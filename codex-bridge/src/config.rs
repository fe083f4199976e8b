//! Explicit per-call configuration for analysis runs.

use crate::error::BridgeError;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Agent instructions bundled with the crate, synced into the CLI home.
pub const DEFAULT_AGENT_PROMPT: &str = include_str!("../prompts/AGENTS.md");

/// Settings for running Codex analyses.
///
/// Every field has a default, so a settings file only needs the keys it
/// changes. Keys are camelCase on disk.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default, rename_all = "camelCase")]
pub struct InsightSettings {
    /// Codex executable: a bare name resolved through discovery, or a path.
    pub codex_path: String,
    /// Model passed via `--model`.
    pub codex_model: String,
    /// API key; blank falls back to the `CODEX_API_KEY` environment variable.
    pub api_key: String,
    /// Base URL override; blank leaves the tool's default in place.
    pub api_url: String,
    /// How many analyses a caller should run at once.
    pub max_concurrency: usize,
    /// Per-run timeout in seconds; `0` disables it.
    pub request_timeout_sec: u64,
    /// Directory, relative to the project root, holding analysis output.
    pub analysis_output_root: String,
    /// Whether a fresh run may replace an existing analysis file.
    pub overwrite_existing_output: bool,
    /// Whether to append tool diagnostics to `logs/last-run.log`.
    pub enable_cli_logs: bool,
    /// Replaces [`DEFAULT_AGENT_PROMPT`] when non-blank.
    pub agent_prompt: String,
    /// Overrides the CLI home directory (default `~/.codex/analysis`).
    pub cli_home: Option<PathBuf>,
}

impl Default for InsightSettings {
    fn default() -> Self {
        Self {
            codex_path: "codex".to_string(),
            codex_model: "code-navigator".to_string(),
            api_key: String::new(),
            api_url: String::new(),
            max_concurrency: 2,
            request_timeout_sec: 120,
            analysis_output_root: ".analysis".to_string(),
            overwrite_existing_output: true,
            enable_cli_logs: false,
            agent_prompt: String::new(),
            cli_home: None,
        }
    }
}

impl InsightSettings {
    /// Create settings with every default applied.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Loads settings from a JSON file; absent keys keep their defaults.
    ///
    /// # Errors
    /// `Io` when the file cannot be read, `InvalidConfig` when it does not parse.
    pub fn from_json_file(path: &Path) -> Result<Self, BridgeError> {
        let text = std::fs::read_to_string(path)
            .map_err(|e| BridgeError::io(format!("read settings {}", path.display()), e))?;
        serde_json::from_str(&text).map_err(|e| {
            BridgeError::InvalidConfig(format!("settings file {}: {e}", path.display()))
        })
    }

    /// Set the Codex executable.
    #[must_use]
    pub fn with_codex_path(mut self, path: impl Into<String>) -> Self {
        self.codex_path = path.into();
        self
    }

    /// Set the model identifier.
    #[must_use]
    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.codex_model = model.into();
        self
    }

    /// Set whether existing analysis files may be overwritten.
    #[must_use]
    pub const fn with_overwrite(mut self, overwrite: bool) -> Self {
        self.overwrite_existing_output = overwrite;
        self
    }

    /// Set the per-run timeout in seconds (`0` disables it).
    #[must_use]
    pub const fn with_timeout_secs(mut self, secs: u64) -> Self {
        self.request_timeout_sec = secs;
        self
    }

    /// Set the CLI home directory.
    #[must_use]
    pub fn with_cli_home(mut self, home: impl Into<PathBuf>) -> Self {
        self.cli_home = Some(home.into());
        self
    }

    /// The run deadline, if one is configured.
    #[must_use]
    pub const fn request_timeout(&self) -> Option<Duration> {
        if self.request_timeout_sec == 0 {
            None
        } else {
            Some(Duration::from_secs(self.request_timeout_sec))
        }
    }

    /// The agent prompt to sync: the override if non-blank, else the bundled one.
    #[must_use]
    pub fn effective_agent_prompt(&self) -> &str {
        let custom = self.agent_prompt.trim();
        if custom.is_empty() {
            DEFAULT_AGENT_PROMPT.trim()
        } else {
            custom
        }
    }

    /// The output root, falling back to `.analysis` when blank.
    #[must_use]
    pub fn output_root(&self) -> &str {
        let root = self.analysis_output_root.trim();
        if root.is_empty() {
            ".analysis"
        } else {
            root
        }
    }
}
