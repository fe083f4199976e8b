//! Builds invocation requests from files on disk.

use anyhow::{Context, Result};
use contextlens_bridge::InvocationRequest;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

const MAX_NEIGHBORS: usize = 5;

/// Files that mark a directory as a module of the project.
const MODULE_MANIFESTS: [&str; 7] = [
    "Cargo.toml",
    "build.gradle.kts",
    "build.gradle",
    "pom.xml",
    "package.json",
    "go.mod",
    "pyproject.toml",
];

/// A file resolved for analysis and the request describing it.
#[derive(Debug)]
pub struct PreparedFile {
    pub source: PathBuf,
    pub request: InvocationRequest,
}

/// Reads `file` and gathers the context sent along with it.
pub async fn prepare(
    project_root: &Path,
    file: &Path,
    extra: &[(String, String)],
) -> Result<PreparedFile> {
    let source = std::path::absolute(file)
        .with_context(|| format!("resolving {}", file.display()))?;
    let bytes = tokio::fs::read(&source)
        .await
        .with_context(|| format!("reading {}", source.display()))?;
    let content = String::from_utf8_lossy(&bytes).into_owned();
    let language = language_for(&source);
    let module = module_name(project_root, &source);

    let mut notes: BTreeMap<&str, String> = BTreeMap::new();
    if let Some(module) = &module {
        notes.insert("module", module.clone());
    }
    notes.insert("size", content.chars().count().to_string());
    notes.insert("language", language.to_string());

    let mut request = InvocationRequest::new(source.to_string_lossy(), language, content)
        .with_context("neighbors", neighbors(project_root, &source))
        .with_context("notes", serde_json::json!(notes));
    if let Some(module) = module {
        request = request.with_context("module", module);
    }
    if let Some(revision) = git_revision(&source) {
        request = request.with_context("gitRevision", revision);
    }
    for (key, value) in extra {
        request = request.with_context(key.clone(), value.clone());
    }

    Ok(PreparedFile { source, request })
}

/// Language identifier from the file extension.
pub fn language_for(path: &Path) -> &'static str {
    let ext = path
        .extension()
        .and_then(|e| e.to_str())
        .map(str::to_ascii_lowercase)
        .unwrap_or_default();
    match ext.as_str() {
        "rs" => "rust",
        "kt" | "kts" => "kotlin",
        "java" => "java",
        "py" => "python",
        "ts" | "tsx" => "typescript",
        "js" | "jsx" | "mjs" | "cjs" => "javascript",
        "go" => "go",
        "c" | "h" => "c",
        "cc" | "cpp" | "cxx" | "hpp" | "hh" => "cpp",
        "cs" => "csharp",
        "rb" => "ruby",
        "swift" => "swift",
        "scala" => "scala",
        "sh" | "bash" | "zsh" => "shell",
        "md" | "markdown" => "markdown",
        "toml" => "toml",
        "json" => "json",
        "yaml" | "yml" => "yaml",
        "sql" => "sql",
        _ => "text",
    }
}

/// Up to five sibling files, sorted, relative to the project when possible.
fn neighbors(project_root: &Path, source: &Path) -> Vec<String> {
    let Some(parent) = source.parent() else {
        return Vec::new();
    };
    let Ok(entries) = std::fs::read_dir(parent) else {
        return Vec::new();
    };

    let mut siblings: Vec<PathBuf> = entries
        .filter_map(Result::ok)
        .filter(|entry| entry.file_type().is_ok_and(|t| t.is_file()))
        .map(|entry| entry.path())
        .filter(|path| path != source)
        .collect();
    siblings.sort();

    siblings
        .iter()
        .take(MAX_NEIGHBORS)
        .map(|path| {
            path.strip_prefix(project_root).map_or_else(
                |_| path.to_string_lossy().into_owned(),
                |relative| {
                    relative
                        .components()
                        .map(|c| c.as_os_str().to_string_lossy())
                        .collect::<Vec<_>>()
                        .join("/")
                },
            )
        })
        .collect()
}

/// Name of the innermost directory inside the project that holds a build
/// manifest, searching upwards from the file.
fn module_name(project_root: &Path, source: &Path) -> Option<String> {
    source
        .ancestors()
        .skip(1)
        .take_while(|dir| dir.starts_with(project_root))
        .find(|dir| MODULE_MANIFESTS.iter().any(|m| dir.join(m).is_file()))
        .and_then(Path::file_name)
        .map(|name| name.to_string_lossy().into_owned())
}

/// Commit checked out in the repository containing `source`.
///
/// Reads `.git` directly: `HEAD`, then the loose ref, then `packed-refs`.
/// `None` outside a repository and on an unborn branch.
fn git_revision(source: &Path) -> Option<String> {
    let git_dir = source.ancestors().skip(1).find_map(git_dir_at)?;
    let head = std::fs::read_to_string(git_dir.join("HEAD")).ok()?;
    let head = head.trim();
    let Some(reference) = head.strip_prefix("ref:") else {
        return is_commit_id(head).then(|| head.to_string());
    };
    let reference = reference.trim();

    // Linked worktrees keep their refs in the common directory.
    let common = std::fs::read_to_string(git_dir.join("commondir"))
        .map_or_else(|_| git_dir.clone(), |dir| git_dir.join(dir.trim()));

    let loose = std::fs::read_to_string(common.join(reference)).ok();
    match loose.as_deref().map(str::trim) {
        Some(id) if is_commit_id(id) => Some(id.to_string()),
        _ => packed_ref(&common, reference),
    }
}

fn git_dir_at(dir: &Path) -> Option<PathBuf> {
    let dot_git = dir.join(".git");
    if dot_git.is_dir() {
        return Some(dot_git);
    }
    let pointer = std::fs::read_to_string(&dot_git).ok()?;
    let target = pointer.trim().strip_prefix("gitdir:")?.trim();
    Some(dir.join(target))
}

fn packed_ref(git_dir: &Path, reference: &str) -> Option<String> {
    let packed = std::fs::read_to_string(git_dir.join("packed-refs")).ok()?;
    packed
        .lines()
        .filter(|line| !line.starts_with('#') && !line.starts_with('^'))
        .find_map(|line| {
            let (id, name) = line.split_once(' ')?;
            (name.trim() == reference && is_commit_id(id)).then(|| id.to_string())
        })
}

fn is_commit_id(id: &str) -> bool {
    matches!(id.len(), 40 | 64) && id.chars().all(|c| c.is_ascii_hexdigit())
}

/// Parses a `KEY=VALUE` flag.
pub fn parse_key_val(raw: &str) -> Result<(String, String), String> {
    let (key, value) = raw
        .split_once('=')
        .ok_or_else(|| format!("expected KEY=VALUE, got '{raw}'"))?;
    let key = key.trim();
    if key.is_empty() {
        return Err(format!("empty key in '{raw}'"));
    }
    Ok((key.to_string(), value.to_string()))
}
