//! Turns `codex exec --json` stdout lines into progress text.
//!
//! Each line is one JSON event or a JSON array of events. Recognized shapes:
//!
//! - `{"type":"item.*","item":{"type":"reasoning"|"agent_message","text":...}}`
//! - `{"type":"item.*","item":{"type":"command_execution","aggregated_output":...,"command":...,"status":...}}`
//! - `{"type":"response.output_text.delta","delta":...}`
//!
//! Everything else is ignored. This channel is best-effort: nothing here can
//! fail a run.

use serde_json::Value;

/// Separator between command and status when a command has no output yet.
const COMMAND_STATUS_SEPARATOR: &str = " · ";

/// Decodes one stdout line into ordered progress fragments.
///
/// Unparseable input yields no fragments.
#[must_use]
pub fn translate_line(line: &str) -> Vec<String> {
    let trimmed = line.trim();
    if trimmed.is_empty() {
        return Vec::new();
    }

    let value = match serde_json::from_str::<Value>(trimmed) {
        Ok(value) => value,
        Err(e) => {
            tracing::debug!("Failed to parse Codex stream payload: {e}");
            return Vec::new();
        }
    };

    let mut fragments = Vec::new();
    match &value {
        Value::Array(events) => {
            for event in events.iter().filter(|e| e.is_object()) {
                translate_event(event, &mut fragments);
            }
        }
        Value::Object(_) => translate_event(&value, &mut fragments),
        _ => tracing::debug!("Ignoring non-object Codex stream payload"),
    }
    fragments
}

fn translate_event(event: &Value, out: &mut Vec<String>) {
    let Some(kind) = event.get("type").and_then(Value::as_str) else {
        return;
    };

    if kind.starts_with("item.") {
        let Some(item) = event.get("item").filter(|i| i.is_object()) else {
            return;
        };
        match item.get("type").and_then(Value::as_str) {
            Some("reasoning" | "agent_message") => {
                emit_lines(item.get("text").and_then(Value::as_str), out);
            }
            Some("command_execution") => emit_lines(command_message(item).as_deref(), out),
            _ => {}
        }
        return;
    }

    if kind == "response.output_text.delta" {
        emit_lines(event.get("delta").and_then(Value::as_str), out);
    }
}

fn command_message(item: &Value) -> Option<String> {
    let non_blank = |key: &str| {
        item.get(key)
            .and_then(Value::as_str)
            .filter(|s| !s.trim().is_empty())
    };

    if let Some(output) = non_blank("aggregated_output") {
        return Some(output.to_string());
    }

    let composed = [non_blank("command"), non_blank("status")]
        .into_iter()
        .flatten()
        .collect::<Vec<_>>()
        .join(COMMAND_STATUS_SEPARATOR);
    (!composed.is_empty()).then_some(composed)
}

fn emit_lines(text: Option<&str>, out: &mut Vec<String>) {
    let Some(text) = text else {
        return;
    };
    out.extend(
        text.lines()
            .map(str::trim)
            .filter(|line| !line.is_empty())
            .map(str::to_string),
    );
}
