//! Locates the Codex CLI binary on the host system.

use crate::config::InsightSettings;
use crate::error::BridgeError;
use std::path::PathBuf;
use which::which;

/// Environment variable that overrides the default Codex CLI binary path.
pub const CODEX_BIN_ENV_VAR: &str = "CONTEXTLENS_CODEX_BIN";

/// Finds the Codex CLI executable.
///
/// An explicit path must exist. Without one, the first hit wins among
/// `CONTEXTLENS_CODEX_BIN`, `codex` on `PATH`, and the usual npm/Homebrew
/// install directories.
///
/// # Errors
///
/// `BridgeError::ExecutableNotFound` when nothing usable turns up.
pub fn discover_codex(explicit_path: Option<PathBuf>) -> Result<PathBuf, BridgeError> {
    if let Some(path) = explicit_path {
        return if path.exists() {
            Ok(path)
        } else {
            Err(BridgeError::ExecutableNotFound(format!(
                "{} does not exist",
                path.display()
            )))
        };
    }

    let from_env = std::env::var_os(CODEX_BIN_ENV_VAR).map(PathBuf::from);
    from_env
        .into_iter()
        .chain(which("codex").ok())
        .chain(install_dirs().into_iter().map(|dir| dir.join(EXECUTABLE)))
        .find(|candidate| candidate.exists())
        .ok_or_else(|| {
            BridgeError::ExecutableNotFound(format!(
                "no codex in ${CODEX_BIN_ENV_VAR}, PATH or npm/Homebrew install directories; \
                 install it with `npm install -g @openai/codex`"
            ))
        })
}

/// The tool path to launch for `settings`.
///
/// A configured path with a directory part is used as given. A bare name is
/// looked up on `PATH` (the default `codex` goes through full discovery); if
/// nothing is found the bare name is kept and the launch fails on its own.
#[must_use]
pub fn resolve_tool_path(settings: &InsightSettings) -> String {
    let configured = settings.codex_path.trim();
    let bare = !configured.is_empty()
        && !configured.contains(std::path::MAIN_SEPARATOR)
        && !configured.contains('/');
    if !bare {
        return configured.to_string();
    }

    let found = if configured == "codex" {
        discover_codex(None).ok()
    } else {
        which(configured).ok()
    };

    match found {
        Some(path) => path.to_string_lossy().into_owned(),
        None => {
            tracing::warn!("Could not resolve '{configured}' on PATH; launching it as-is");
            configured.to_string()
        }
    }
}

#[cfg(unix)]
const EXECUTABLE: &str = "codex";
#[cfg(windows)]
const EXECUTABLE: &str = "codex.cmd";

/// Global npm prefixes and package-manager bin directories.
fn install_dirs() -> Vec<PathBuf> {
    let home_relative: &[&str] = if cfg!(windows) {
        &["AppData/Roaming/npm"]
    } else {
        &[".npm-global/bin", ".npm/bin", ".local/bin"]
    };
    let system: &[&str] = if cfg!(windows) {
        &[r"C:\Program Files\nodejs"]
    } else {
        &["/usr/local/bin", "/opt/homebrew/bin"]
    };

    let home = dirs::home_dir();
    home_relative
        .iter()
        .filter_map(|rel| home.as_ref().map(|h| h.join(rel)))
        .chain(system.iter().map(PathBuf::from))
        .collect()
}
