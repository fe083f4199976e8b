//! Command-line argument builder for Codex analysis runs.
//!
//! ## Flag Reference
//!
//! - `exec`: non-interactive mode; the prompt is read once and the process exits
//! - `--json`: emit newline-delimited JSON events on stdout
//! - `-m, --model <model>`: model to use
//! - `-o, --output-last-message <file>`: write the agent's final message to `<file>`
//! - `-`: read the prompt from stdin instead of argv
//!
//! ## Resulting Shape
//!
//! ```text
//! <codex> exec --json --model <model> -o <absolute output path> -
//! ```
//!
//! The trailing `-` means the tool only starts working once stdin reaches
//! end-of-file, so the supervisor must close stdin after writing the request.
//!
//! ## External References
//! - [Codex CLI Reference](https://developers.openai.com/codex/cli/reference/)

use crate::error::BridgeError;
use std::ffi::OsString;
use std::path::Path;

/// Builds the full argument vector, tool path first.
///
/// Only an empty tool path is rejected; anything else that cannot be
/// executed surfaces later as a launch failure.
pub fn build_command(
    tool_path: &str,
    model: &str,
    output_file: &Path,
) -> Result<Vec<OsString>, BridgeError> {
    if tool_path.trim().is_empty() {
        return Err(BridgeError::InvalidConfig(
            "Codex path must not be empty".to_string(),
        ));
    }

    let output_file = std::path::absolute(output_file).unwrap_or_else(|_| output_file.to_path_buf());

    let mut args = Vec::with_capacity(8);
    args.push(OsString::from(tool_path));
    args.push(OsString::from("exec"));
    args.push(OsString::from("--json"));
    args.push(OsString::from("--model"));
    args.push(OsString::from(model));
    args.push(OsString::from("-o"));
    args.push(output_file.into_os_string());
    // Request body arrives on stdin.
    args.push(OsString::from("-"));

    Ok(args)
}

/// Renders an argument vector for logs and results.
#[must_use]
pub fn display_command(args: &[OsString]) -> Vec<String> {
    args.iter()
        .map(|arg| arg.to_string_lossy().into_owned())
        .collect()
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    fn args_of(tool: &str, model: &str, out: &Path) -> Vec<String> {
        display_command(&build_command(tool, model, out).unwrap())
    }

    #[test]
    fn test_tool_path_comes_first() {
        let args = args_of("/opt/codex/bin/codex", "o4-mini", Path::new("/tmp/out.html"));
        assert_eq!(args[0], "/opt/codex/bin/codex");
        assert_eq!(args[1], "exec");
    }

    #[test]
    #[cfg(unix)]
    fn test_exact_argument_order() {
        let args = args_of("codex", "code-navigator", Path::new("/tmp/out.html"));
        assert_eq!(
            args,
            vec![
                "codex",
                "exec",
                "--json",
                "--model",
                "code-navigator",
                "-o",
                "/tmp/out.html",
                "-",
            ]
        );
    }

    #[test]
    fn test_model_flag() {
        let args = args_of("codex", "o4-mini", Path::new("/tmp/out.html"));
        assert!(
            args.windows(2).any(|w| w[0] == "--model" && w[1] == "o4-mini"),
            "Expected '--model o4-mini' but got: {args:?}",
        );
    }

    #[test]
    fn test_relative_output_path_is_made_absolute() {
        let args = args_of("codex", "m", Path::new("out/report.html"));
        let out = args
            .windows(2)
            .find(|w| w[0] == "-o")
            .map(|w| PathBuf::from(&w[1]))
            .expect("-o flag present");
        assert!(out.is_absolute(), "Expected absolute -o path, got {out:?}");
        assert!(out.ends_with("out/report.html"));
    }

    #[test]
    fn test_stdin_marker_is_last() {
        let args = args_of("codex", "m", Path::new("/tmp/x"));
        assert_eq!(args.last().map(String::as_str), Some("-"));
    }

    #[test]
    fn test_blank_tool_path_rejected() {
        let err = build_command("   ", "m", Path::new("/tmp/x")).unwrap_err();
        assert!(matches!(err, BridgeError::InvalidConfig(_)), "got {err:?}");
    }
}
