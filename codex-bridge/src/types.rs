//! Request, result and event types exchanged with the bridge's callers.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::PathBuf;

/// Status tag for a response produced by a fresh Codex run.
pub const STATUS_OK: &str = "ok";
/// Status tag for a response served from a previously stored analysis.
pub const STATUS_CACHED: &str = "cached";

/// Sink for streamed progress fragments.
///
/// Each fragment is one trimmed, non-empty line of text decoded from the
/// tool's event stream. Send failures (a dropped receiver) are ignored.
pub type ProgressSender = tokio::sync::mpsc::UnboundedSender<String>;

/// Payload written to the tool's stdin, once, before stdin is closed.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct InvocationRequest {
    /// Path of the file under analysis.
    pub file_path: String,
    /// Language identifier (e.g. `"rust"`, `"kotlin"`).
    pub language: String,
    /// Full text of the file.
    pub file_content: String,
    /// Open-ended extra context: module name, neighbours, revision, notes.
    pub extra_context: BTreeMap<String, serde_json::Value>,
}

impl InvocationRequest {
    /// Creates a request with no extra context.
    #[must_use]
    pub fn new(
        file_path: impl Into<String>,
        language: impl Into<String>,
        file_content: impl Into<String>,
    ) -> Self {
        Self {
            file_path: file_path.into(),
            language: language.into(),
            file_content: file_content.into(),
            extra_context: BTreeMap::new(),
        }
    }

    /// Adds one extra context entry, replacing any previous value for `key`.
    #[must_use]
    pub fn with_context(mut self, key: impl Into<String>, value: impl Into<serde_json::Value>) -> Self {
        self.extra_context.insert(key.into(), value.into());
        self
    }
}

/// Tagged raw payload handed back to front ends.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct InsightResponse {
    /// [`STATUS_OK`] or [`STATUS_CACHED`].
    pub status: String,
    /// The analysis document as produced by the tool.
    pub raw: String,
}

/// Outcome of one successful invocation.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InvocationResult {
    /// The payload and its status tag.
    pub response: InsightResponse,
    /// Full argument vector, tool path first.
    pub command_line: Vec<String>,
    /// Whether the output landed in the caller's persistent target.
    pub wrote_to_target: bool,
    /// A missing-secret note and the tool's secondary-channel text, when
    /// there is either.
    pub diagnostics: Option<String>,
}

impl InvocationResult {
    /// The raw payload of the response.
    #[must_use]
    pub fn raw(&self) -> &str {
        &self.response.raw
    }
}

/// Notification published while an analysis runs.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum InsightEvent {
    /// Human-readable progress with a coarse completion percentage.
    Progress {
        /// Job the event belongs to.
        request_id: String,
        /// One line of progress text.
        message: String,
        /// Coarse completion, 0 to 100.
        percent: u8,
    },
    /// The analysis finished and its response is ready.
    Completed {
        /// Job the event belongs to.
        request_id: String,
        /// File that was analyzed.
        source: PathBuf,
        /// The finished analysis.
        response: InsightResponse,
    },
    /// The analysis failed or was cancelled.
    Failed {
        /// Job the event belongs to.
        request_id: String,
        /// Human-readable reason.
        message: String,
        /// Stable error code, see [`crate::BridgeError::code`].
        code: String,
    },
}
