//! Environment composition for the Codex subprocess.
//!
//! The composed environment is a complete mapping: the supervisor clears the
//! inherited environment and applies exactly what is returned here. The
//! caller supplies the base mapping (normally [`current_environment`]), which
//! keeps composition a pure function of its inputs.

use crate::config::InsightSettings;
use crate::error::BridgeError;
use std::collections::BTreeMap;
use std::ffi::{OsStr, OsString};
use std::path::{Path, PathBuf};

/// Secret consumed by the tool; also the fallback source for a blank setting.
pub const API_KEY_ENV: &str = "CODEX_API_KEY";
/// Base-URL variables, one per client convention the tool may read.
pub const BASE_URL_ENVS: [&str; 2] = ["OPENAI_BASE_URL", "CODEX_API_URL"];
/// Home directory the tool keeps its state and `AGENTS.md` in.
pub const HOME_ENV: &str = "CODEX_HOME";

/// Environment variable name to value.
pub type EnvMap = BTreeMap<OsString, OsString>;

/// Inputs to [`compose_environment`].
#[derive(Debug, Clone, Copy)]
pub struct EnvironmentInputs<'a> {
    /// Declared secret; blank falls back to [`API_KEY_ENV`] in the base mapping.
    pub api_key: &'a str,
    /// Declared base-URL override; blank sets nothing.
    pub api_url: &'a str,
    /// Prepared home directory.
    pub cli_home: &'a Path,
    /// Tool path as configured; its parent joins `PATH` when absolute.
    pub tool_path: &'a str,
    /// Working directory for the subprocess, when the project root is known.
    pub project_root: Option<&'a Path>,
}

/// A complete subprocess environment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ComposedEnvironment {
    /// Every variable the subprocess sees.
    pub vars: EnvMap,
    /// `None` inherits the caller's working directory.
    pub working_dir: Option<PathBuf>,
    /// No secret could be resolved. The run still proceeds and the caller
    /// reports it.
    pub api_key_missing: bool,
}

/// Snapshot of this process's environment.
#[must_use]
pub fn current_environment() -> EnvMap {
    std::env::vars_os().collect()
}

/// Returns the first candidate that is present and not blank, trimmed.
pub fn first_non_blank<'a, I>(candidates: I) -> Option<&'a str>
where
    I: IntoIterator<Item = Option<&'a str>>,
{
    candidates
        .into_iter()
        .flatten()
        .map(str::trim)
        .find(|value| !value.is_empty())
}

/// Builds the full environment for one run from `base`.
#[must_use]
pub fn compose_environment(mut base: EnvMap, inputs: &EnvironmentInputs<'_>) -> ComposedEnvironment {
    let inherited_key = base.get(OsStr::new(API_KEY_ENV)).and_then(|v| v.to_str());
    let resolved_key = first_non_blank([Some(inputs.api_key), inherited_key]).map(str::to_owned);

    let api_key_missing = resolved_key.is_none();
    if let Some(key) = resolved_key {
        base.insert(API_KEY_ENV.into(), key.into());
    }

    if let Some(url) = first_non_blank([Some(inputs.api_url)]) {
        for name in BASE_URL_ENVS {
            base.insert(name.into(), url.into());
        }
    }

    base.insert(HOME_ENV.into(), inputs.cli_home.as_os_str().to_os_string());

    let key = path_key(&base);
    if let Some(path) = augment_path(base.get(&key).map(OsString::as_os_str), inputs.tool_path) {
        base.insert(key, path);
    }

    ComposedEnvironment {
        vars: base,
        working_dir: inputs.project_root.map(Path::to_path_buf),
        api_key_missing,
    }
}

/// Appends the tool's directory to `current` when the tool path is absolute
/// and the directory is not already listed.
///
/// Returns `None` when `PATH` should stay as it is.
#[must_use]
pub fn augment_path(current: Option<&OsStr>, tool_path: &str) -> Option<OsString> {
    let tool = Path::new(tool_path);
    if !tool.is_absolute() {
        return None;
    }
    let parent = tool.parent().filter(|p| !p.as_os_str().is_empty())?;

    let mut segments: Vec<PathBuf> = current
        .map(|value| {
            std::env::split_paths(value)
                .filter(|segment| !is_blank(segment))
                .collect()
        })
        .unwrap_or_default();

    if segments.iter().any(|segment| segment == parent) {
        return None;
    }
    segments.push(parent.to_path_buf());

    match std::env::join_paths(segments) {
        Ok(joined) => Some(joined),
        Err(e) => {
            tracing::warn!("Cannot add {} to PATH: {e}", parent.display());
            None
        }
    }
}

fn is_blank(segment: &Path) -> bool {
    segment.as_os_str().is_empty() || segment.to_str().is_some_and(|s| s.trim().is_empty())
}

fn path_key(vars: &EnvMap) -> OsString {
    if cfg!(windows) {
        if let Some(existing) = vars
            .keys()
            .find(|k| k.to_str().is_some_and(|s| s.eq_ignore_ascii_case("PATH")))
        {
            return existing.clone();
        }
    }
    OsString::from("PATH")
}

/// Creates the CLI home and syncs the agent prompt into it.
///
/// Defaults to `~/.codex/analysis` unless the settings override it.
pub async fn prepare_cli_home(settings: &InsightSettings) -> Result<PathBuf, BridgeError> {
    let home = match &settings.cli_home {
        Some(dir) => dir.clone(),
        None => dirs::home_dir()
            .ok_or_else(|| BridgeError::InvalidConfig("home directory not set".to_string()))?
            .join(".codex")
            .join("analysis"),
    };

    tokio::fs::create_dir_all(&home)
        .await
        .map_err(|e| BridgeError::io(format!("create CLI home {}", home.display()), e))?;

    sync_agents_file(&home, settings.effective_agent_prompt()).await;
    Ok(home)
}

async fn sync_agents_file(home: &Path, prompt: &str) {
    if prompt.trim().is_empty() {
        tracing::warn!("Agent prompt is blank; skipping AGENTS.md sync");
        return;
    }
    let target = home.join("AGENTS.md");
    if let Err(e) = tokio::fs::write(&target, prompt).await {
        tracing::warn!("Failed to sync AGENTS.md to {}: {e}", target.display());
    }
}
