//! Materializes a finished run as a project directory.
//!
//! Source files keep their generated paths. Everything else lands under the
//! inferred project root: tests in `tests/unit` and `tests/acceptance`, design
//! documents in `docs/`, the dependency manifest, and a coverage config.

use std::collections::BTreeMap;
use std::path::{Component, Path, PathBuf};

use tracing::{info, warn};

use pipewright_core::error::{PipewrightError, Result};
use pipewright_core::state::{RunState, CODE_KEY};

/// Root used when generated files share no directory.
pub const FALLBACK_ROOT: &str = "project-root/";

const COVERAGE_CONFIG: &str = "[run]\nomit =\n    */__init__.py\n    tests/*\n";

const DOC_KEYS: [&str; 4] = ["PRD", "UML_class", "UML_sequence", "architecture_design"];

/// Infer the project root as the directory prefix shared by every file key.
///
/// Returns the prefix with a trailing slash, or [`FALLBACK_ROOT`] when there
/// are no files or they share no directory.
pub fn infer_root(files: &BTreeMap<String, String>) -> String {
    let mut common: Option<Vec<&str>> = None;

    for path in files.keys() {
        let mut dirs: Vec<&str> = path
            .split('/')
            .filter(|c| !c.is_empty() && *c != ".")
            .collect();
        dirs.pop(); // file name

        common = Some(match common {
            None => dirs,
            Some(prev) => prev
                .into_iter()
                .zip(dirs)
                .take_while(|(a, b)| a == b)
                .map(|(a, _)| a)
                .collect(),
        });
    }

    match common {
        Some(dirs) if !dirs.is_empty() => format!("{}/", dirs.join("/")),
        _ => FALLBACK_ROOT.to_string(),
    }
}

fn python_name(name: &str) -> String {
    if Path::new(name).extension().is_some() {
        name.to_string()
    } else {
        format!("{}.py", name)
    }
}

/// Compute the full file layout for a finished run.
///
/// Every document the layout needs must be present; a missing one is a
/// state-shape error.
pub fn layout(state: &RunState) -> Result<BTreeMap<String, String>> {
    let mut files = state.files(CODE_KEY)?.clone();
    let root = infer_root(&files);

    let unit_tests = state.files("unit_tests")?;
    let acceptance_tests = state.files("acceptance_tests")?;

    for (name, content) in unit_tests {
        files.insert(format!("{}tests/unit/{}", root, python_name(name)), content.clone());
    }
    files.insert(format!("{}tests/unit/__init__.py", root), String::new());

    for (name, content) in acceptance_tests {
        files.insert(
            format!("{}tests/acceptance/{}", root, python_name(name)),
            content.clone(),
        );
    }
    files.insert(format!("{}tests/acceptance/__init__.py", root), String::new());

    for key in DOC_KEYS {
        files.insert(format!("{}docs/{}.md", root, key), state.text(key)?.to_string());
    }
    files.insert(
        format!("{}requirements.txt", root),
        state.text("requirements")?.to_string(),
    );
    files.insert(format!("{}.coveragerc", root), COVERAGE_CONFIG.to_string());

    Ok(files)
}

/// Reject absolute paths and parent-directory components.
fn safe_relative(path: &str) -> Result<&Path> {
    let p = Path::new(path);
    let ok = p
        .components()
        .all(|c| matches!(c, Component::Normal(_) | Component::CurDir));
    if ok {
        Ok(p)
    } else {
        Err(PipewrightError::ToolValidation(format!("unsafe file path: {}", path)))
    }
}

/// Persistence target for a finished run.
pub struct Repository {
    base: PathBuf,
}

impl Repository {
    pub fn new(base: impl Into<PathBuf>) -> Self {
        Self { base: base.into() }
    }

    pub fn base(&self) -> &Path {
        &self.base
    }

    /// Write the run's artifacts to the base directory.
    ///
    /// Destructive: existing contents of the base directory are removed. The
    /// layout is validated before anything is deleted.
    pub async fn materialize(&self, state: &RunState) -> Result<Vec<PathBuf>> {
        let files = layout(state)?;
        for path in files.keys() {
            safe_relative(path)?;
        }

        tokio::fs::create_dir_all(&self.base).await?;
        self.clear().await?;

        let mut written = Vec::with_capacity(files.len());
        for (path, content) in &files {
            let full = self.base.join(safe_relative(path)?);
            if let Some(parent) = full.parent() {
                tokio::fs::create_dir_all(parent).await?;
            }
            tokio::fs::write(&full, content).await?;
            written.push(full);
        }

        info!(base = %self.base.display(), files = written.len(), "Repository written");
        Ok(written)
    }

    async fn clear(&self) -> Result<()> {
        let mut entries = tokio::fs::read_dir(&self.base).await?;
        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            let result = if entry.file_type().await?.is_dir() {
                tokio::fs::remove_dir_all(&path).await
            } else {
                tokio::fs::remove_file(&path).await
            };
            if let Err(e) = result {
                warn!(path = %path.display(), error = %e, "Failed to remove old entry");
                return Err(e.into());
            }
        }
        Ok(())
    }
}
