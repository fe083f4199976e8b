//! Where a run writes its final message, and how that message is read back.

use crate::error::BridgeError;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use tempfile::TempPath;

const TEMP_PREFIX: &str = "codex-output";
const TEMP_SUFFIX: &str = ".json";

/// Destination of one run's output and whether it is disposable.
///
/// A disposable plan owns its temporary file: [`OutputPlan::release`] deletes
/// it, and dropping the plan without releasing deletes it silently.
#[derive(Debug)]
pub struct OutputPlan {
    path: PathBuf,
    temp: Option<TempPath>,
}

impl OutputPlan {
    fn persistent(path: &Path) -> Self {
        Self {
            path: path.to_path_buf(),
            temp: None,
        }
    }

    fn disposable() -> Result<Self, BridgeError> {
        let temp = tempfile::Builder::new()
            .prefix(TEMP_PREFIX)
            .suffix(TEMP_SUFFIX)
            .tempfile()
            .map_err(|e| BridgeError::io("create temporary output file", e))?
            .into_temp_path();
        Ok(Self {
            path: temp.to_path_buf(),
            temp: Some(temp),
        })
    }

    /// File the tool is told to write to.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// True when the file must not outlive the run.
    #[must_use]
    pub const fn cleanup(&self) -> bool {
        self.temp.is_some()
    }

    /// Ends the plan, deleting a disposable file.
    ///
    /// Deletion failures are logged; the run's outcome does not change.
    pub fn release(self) {
        let Some(temp) = self.temp else {
            return;
        };
        match temp.close() {
            Ok(()) => {}
            Err(e) if e.kind() == ErrorKind::NotFound => {}
            Err(e) => {
                tracing::warn!("Failed to delete temporary Codex output {}: {e}", self.path.display());
            }
        }
    }
}

/// Picks the output destination for one run.
///
/// | target  | overwrite | target exists | plan                   |
/// |---------|-----------|---------------|------------------------|
/// | none    | -         | -             | temp file, cleanup     |
/// | some    | true      | any           | target, keep           |
/// | some    | false     | false         | target, keep           |
/// | some    | false     | true          | temp file, cleanup     |
///
/// With overwrite disabled an existing analysis is never replaced by a run
/// that might fail; that run writes to a disposable file instead.
pub fn plan_output(target: Option<&Path>, overwrite_allowed: bool) -> Result<OutputPlan, BridgeError> {
    match target {
        Some(target) if overwrite_allowed || !target.exists() => Ok(OutputPlan::persistent(target)),
        Some(target) => {
            tracing::info!(
                "Keeping existing analysis {}; writing this run to a temporary file",
                target.display()
            );
            OutputPlan::disposable()
        }
        None => OutputPlan::disposable(),
    }
}

/// Reads the run's final payload.
///
/// A persistent target that exists after exit is the result, byte for byte,
/// even when empty. A disposable file is created empty before launch, so a
/// blank one counts as unwritten. Without a file the captured stdout is
/// used, and when that is blank too the run has no output.
pub async fn load_output(plan: &OutputPlan, stdout_fallback: &str) -> Result<String, BridgeError> {
    let path = plan.path();
    match tokio::fs::read_to_string(path).await {
        Ok(content) if !plan.cleanup() || !content.trim().is_empty() => return Ok(content),
        Ok(_) => tracing::debug!("Temporary output file {} was never written", path.display()),
        Err(e) if e.kind() == ErrorKind::NotFound => {}
        Err(e) => return Err(BridgeError::io(format!("read output {}", path.display()), e)),
    }

    if stdout_fallback.trim().is_empty() {
        return Err(BridgeError::MissingOutput {
            path: path.to_path_buf(),
        });
    }

    tracing::warn!(
        "Output file {} missing, falling back to stdout content",
        path.display()
    );
    Ok(stdout_fallback.to_string())
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]
mod tests {
    use super::*;

    #[test]
    fn test_no_target_uses_disposable_file() {
        let plan = plan_output(None, true).unwrap();
        assert!(plan.cleanup());
        assert!(plan.path().exists());
        assert!(plan
            .path()
            .file_name()
            .and_then(|n| n.to_str())
            .is_some_and(|n| n.starts_with(TEMP_PREFIX) && n.ends_with(TEMP_SUFFIX)));
        plan.release();
    }

    #[test]
    fn test_overwrite_allowed_always_uses_target() {
        let dir = tempfile::tempdir().unwrap();
        let target = dir.path().join("main.rs.html");

        let plan = plan_output(Some(&target), true).unwrap();
        assert_eq!(plan.path(), target);
        assert!(!plan.cleanup());

        std::fs::write(&target, "<html>old</html>").unwrap();
        let plan = plan_output(Some(&target), true).unwrap();
        assert_eq!(plan.path(), target);
        assert!(!plan.cleanup());
    }

    #[test]
    fn test_no_overwrite_new_target_uses_target() {
        let dir = tempfile::tempdir().unwrap();
        let target = dir.path().join("lib.rs.html");

        let plan = plan_output(Some(&target), false).unwrap();
        assert_eq!(plan.path(), target);
        assert!(!plan.cleanup());
    }

    #[test]
    fn test_no_overwrite_existing_target_is_protected() {
        let dir = tempfile::tempdir().unwrap();
        let target = dir.path().join("lib.rs.html");
        std::fs::write(&target, "<html>kept</html>").unwrap();

        let plan = plan_output(Some(&target), false).unwrap();
        assert_ne!(plan.path(), target);
        assert!(plan.cleanup());
        plan.release();

        assert_eq!(std::fs::read_to_string(&target).unwrap(), "<html>kept</html>");
    }

    #[test]
    fn test_release_deletes_disposable_file() {
        let plan = plan_output(None, true).unwrap();
        let path = plan.path().to_path_buf();
        plan.release();
        assert!(!path.exists());
    }

    #[test]
    fn test_release_tolerates_already_deleted_file() {
        let plan = plan_output(None, true).unwrap();
        std::fs::remove_file(plan.path()).unwrap();
        plan.release();
    }

    #[test]
    fn test_release_keeps_persistent_file() {
        let dir = tempfile::tempdir().unwrap();
        let target = dir.path().join("kept.html");
        std::fs::write(&target, "x").unwrap();

        plan_output(Some(&target), true).unwrap().release();
        assert!(target.exists());
    }

    #[tokio::test]
    async fn test_file_content_wins_over_stdout() {
        let dir = tempfile::tempdir().unwrap();
        let target = dir.path().join("out.html");
        std::fs::write(&target, "<html>\u{4e2d}\u{6587}</html>\n").unwrap();

        let plan = plan_output(Some(&target), true).unwrap();
        let raw = load_output(&plan, "{\"type\":\"noise\"}").await.unwrap();
        assert_eq!(raw, "<html>\u{4e2d}\u{6587}</html>\n");
    }

    #[tokio::test]
    async fn test_missing_file_falls_back_to_stdout() {
        let dir = tempfile::tempdir().unwrap();
        let plan = plan_output(Some(&dir.path().join("never-written.html")), true).unwrap();

        let raw = load_output(&plan, "fallback body\n").await.unwrap();
        assert_eq!(raw, "fallback body\n");
    }

    #[tokio::test]
    async fn test_empty_disposable_file_falls_back_to_stdout() {
        let plan = plan_output(None, true).unwrap();
        let raw = load_output(&plan, "from stdout").await.unwrap();
        assert_eq!(raw, "from stdout");
        plan.release();
    }

    #[tokio::test]
    async fn test_blank_persistent_target_is_returned_as_is() {
        let dir = tempfile::tempdir().unwrap();
        let target = dir.path().join("blank.html");
        std::fs::write(&target, "\n").unwrap();

        let plan = plan_output(Some(&target), true).unwrap();
        let raw = load_output(&plan, "{\"type\":\"thread.started\"}\n").await.unwrap();
        assert_eq!(raw, "\n");
    }

    #[tokio::test]
    async fn test_no_file_and_blank_stdout_is_missing_output() {
        let dir = tempfile::tempdir().unwrap();
        let target = dir.path().join("never-written.html");
        let plan = plan_output(Some(&target), true).unwrap();

        let err = load_output(&plan, " \n\t").await.unwrap_err();
        match err {
            BridgeError::MissingOutput { path } => assert_eq!(path, target),
            other => panic!("expected MissingOutput, got {other:?}"),
        }
    }
}
