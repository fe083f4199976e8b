//! On-disk layout of analysis output under a project.
//!
//! ```text
//! <project>/<output root>/<relative source path>.html
//! <project>/<output root>/logs/last-run.log
//! ```

use crate::config::InsightSettings;
use crate::error::BridgeError;
use chrono::{SecondsFormat, Utc};
use std::path::{Component, Path, PathBuf};
use tokio::io::AsyncWriteExt;

const LOG_DIR: &str = "logs";
const LOG_FILE: &str = "last-run.log";

/// Where one source file's analysis lives.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AnalysisTarget {
    /// Source path relative to the project, `/`-separated.
    pub relative_source: String,
    /// Absolute `.html` path the analysis is written to.
    pub output_file: PathBuf,
}

/// Analysis output for one project.
#[derive(Debug, Clone)]
pub struct AnalysisStorage {
    project_root: PathBuf,
    output_root: PathBuf,
    logs_enabled: bool,
}

impl AnalysisStorage {
    /// Storage rooted at `project_root` with the configured output root.
    #[must_use]
    pub fn new(project_root: impl Into<PathBuf>, settings: &InsightSettings) -> Self {
        let project_root = project_root.into();
        let output_root = project_root.join(settings.output_root());
        Self {
            project_root,
            output_root,
            logs_enabled: settings.enable_cli_logs,
        }
    }

    /// Directory all analyses and the run log live under.
    #[must_use]
    pub fn output_root(&self) -> &Path {
        &self.output_root
    }

    /// Resolves the output file for `source` and creates its directory.
    ///
    /// # Errors
    /// `Io` when the directory cannot be created.
    pub fn resolve_target(&self, source: &Path) -> Result<AnalysisTarget, BridgeError> {
        let relative = self.relative_to_project(source);
        let output_file = self.output_file_for(&relative);
        if let Some(parent) = output_file.parent() {
            std::fs::create_dir_all(parent)
                .map_err(|e| BridgeError::io(format!("create {}", parent.display()), e))?;
        }
        Ok(AnalysisTarget {
            relative_source: normalize_relative(&relative),
            output_file,
        })
    }

    /// The stored analysis for `source`, if there is one.
    #[must_use]
    pub fn find_existing(&self, source: &Path) -> Option<PathBuf> {
        let output_file = self.output_file_for(&self.relative_to_project(source));
        output_file.is_file().then_some(output_file)
    }

    /// True for paths inside the output root.
    #[must_use]
    pub fn is_analysis_output(&self, path: &Path) -> bool {
        let path = if path.is_absolute() {
            path.to_path_buf()
        } else {
            self.project_root.join(path)
        };
        lexical_normalize(&path).starts_with(lexical_normalize(&self.output_root))
    }

    /// Appends one timestamped line to `logs/last-run.log` when logging is on.
    ///
    /// Failures are logged and swallowed.
    pub async fn append_log(&self, section: &str, text: &str) {
        if !self.logs_enabled {
            return;
        }
        if let Err(e) = self.try_append_log(section, text).await {
            tracing::warn!("Failed to append to {LOG_FILE}: {e}");
        }
    }

    async fn try_append_log(&self, section: &str, text: &str) -> std::io::Result<()> {
        let dir = self.output_root.join(LOG_DIR);
        tokio::fs::create_dir_all(&dir).await?;
        let timestamp = Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true);
        let mut file = tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(dir.join(LOG_FILE))
            .await?;
        file.write_all(format!("[{timestamp}][{section}] {text}\n").as_bytes())
            .await?;
        file.flush().await
    }

    fn output_file_for(&self, relative: &Path) -> PathBuf {
        let mut name = relative.as_os_str().to_os_string();
        name.push(".html");
        self.output_root.join(name)
    }

    fn relative_to_project(&self, source: &Path) -> PathBuf {
        let absolute = if source.is_absolute() {
            lexical_normalize(source)
        } else {
            lexical_normalize(&self.project_root.join(source))
        };
        match absolute.strip_prefix(lexical_normalize(&self.project_root)) {
            Ok(relative) if !relative.as_os_str().is_empty() => relative.to_path_buf(),
            _ => {
                tracing::warn!(
                    "File {} is outside {}",
                    source.display(),
                    self.project_root.display()
                );
                source
                    .file_name()
                    .map_or_else(|| source.to_path_buf(), PathBuf::from)
            }
        }
    }
}

fn normalize_relative(relative: &Path) -> String {
    relative
        .components()
        .map(|c| c.as_os_str().to_string_lossy())
        .collect::<Vec<_>>()
        .join("/")
}

/// Resolves `.` and `..` without touching the filesystem.
fn lexical_normalize(path: &Path) -> PathBuf {
    let mut out = PathBuf::new();
    for component in path.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                out.pop();
            }
            other => out.push(other.as_os_str()),
        }
    }
    out
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]
mod tests {
    use super::*;

    fn storage(root: &Path, logs: bool) -> AnalysisStorage {
        let mut settings = InsightSettings::default();
        settings.enable_cli_logs = logs;
        AnalysisStorage::new(root, &settings)
    }

    #[test]
    fn test_target_mirrors_source_tree() {
        let dir = tempfile::tempdir().unwrap();
        let storage = storage(dir.path(), false);
        let source = dir.path().join("src/core/bridge.rs");

        let target = storage.resolve_target(&source).unwrap();
        assert_eq!(target.relative_source, "src/core/bridge.rs");
        assert_eq!(
            target.output_file,
            dir.path().join(".analysis/src/core/bridge.rs.html")
        );
        assert!(target.output_file.parent().unwrap().is_dir());
    }

    #[test]
    fn test_relative_source_resolves_against_project() {
        let dir = tempfile::tempdir().unwrap();
        let storage = storage(dir.path(), false);

        let target = storage.resolve_target(Path::new("./lib/../src/main.rs")).unwrap();
        assert_eq!(target.relative_source, "src/main.rs");
    }

    #[test]
    fn test_source_outside_project_uses_file_name() {
        let project = tempfile::tempdir().unwrap();
        let elsewhere = tempfile::tempdir().unwrap();
        let storage = storage(project.path(), false);

        let target = storage
            .resolve_target(&elsewhere.path().join("notes/todo.md"))
            .unwrap();
        assert_eq!(target.relative_source, "todo.md");
        assert_eq!(target.output_file, project.path().join(".analysis/todo.md.html"));
    }

    #[test]
    fn test_find_existing() {
        let dir = tempfile::tempdir().unwrap();
        let storage = storage(dir.path(), false);
        let source = dir.path().join("a.rs");
        assert_eq!(storage.find_existing(&source), None);

        let target = storage.resolve_target(&source).unwrap();
        std::fs::write(&target.output_file, "<html/>").unwrap();
        assert_eq!(storage.find_existing(&source), Some(target.output_file));
    }

    #[test]
    fn test_is_analysis_output() {
        let dir = tempfile::tempdir().unwrap();
        let storage = storage(dir.path(), false);

        assert!(storage.is_analysis_output(&dir.path().join(".analysis/src/a.rs.html")));
        assert!(storage.is_analysis_output(Path::new(".analysis/logs/last-run.log")));
        assert!(!storage.is_analysis_output(&dir.path().join("src/a.rs")));
        assert!(!storage.is_analysis_output(&dir.path().join(".analysis-old/x.html")));
    }

    #[tokio::test]
    async fn test_append_log_writes_timestamped_lines() {
        let dir = tempfile::tempdir().unwrap();
        let storage = storage(dir.path(), true);

        storage.append_log("stderr", "model overloaded").await;
        storage.append_log("stderr", "retrying").await;

        let log = std::fs::read_to_string(dir.path().join(".analysis/logs/last-run.log")).unwrap();
        let lines: Vec<&str> = log.lines().collect();
        assert_eq!(lines.len(), 2);
        assert!(lines[0].starts_with('['));
        assert!(lines[0].ends_with("][stderr] model overloaded"), "{}", lines[0]);
        assert!(lines[1].ends_with("][stderr] retrying"));
    }

    #[tokio::test]
    async fn test_append_log_disabled_writes_nothing() {
        let dir = tempfile::tempdir().unwrap();
        storage(dir.path(), false).append_log("stderr", "ignored").await;
        assert!(!dir.path().join(".analysis").exists());
    }
}
