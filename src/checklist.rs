//! Pre-deployment checklist: files, directories, executables and
//! environment variables that must be in place before `start`.

use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

use crate::env::{NODE_ENV, PORT};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum CheckKind {
    File,
    Directory,
    Executable,
    Env,
}

/// One checklist entry. For `env` checks `path` is the variable name.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct CheckItem {
    pub path: String,
    pub kind: CheckKind,
    pub description: Option<String>,
}

impl CheckItem {
    pub fn new(path: impl Into<String>, kind: CheckKind) -> Self {
        Self {
            path: path.into(),
            kind,
            description: None,
        }
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }
}

/// Checks every run includes regardless of configuration.
pub fn default_items() -> Vec<CheckItem> {
    vec![
        CheckItem::new(NODE_ENV, CheckKind::Env).with_description("runtime environment"),
        CheckItem::new(PORT, CheckKind::Env).with_description("listen port"),
    ]
}

#[derive(Debug, Clone, Serialize)]
pub struct CheckOutcome {
    pub item: CheckItem,
    pub passed: bool,
    pub detail: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct ChecklistReport {
    pub outcomes: Vec<CheckOutcome>,
}

impl ChecklistReport {
    pub fn passed(&self) -> bool {
        self.outcomes.iter().all(|o| o.passed)
    }

    pub fn failures(&self) -> Vec<&CheckOutcome> {
        self.outcomes.iter().filter(|o| !o.passed).collect()
    }
}

pub struct Checklist {
    items: Vec<CheckItem>,
    base_dir: PathBuf,
}

impl Checklist {
    /// Relative paths resolve against `base_dir`. The default env checks are
    /// prepended unless the configured items already name them.
    pub fn new(configured: Vec<CheckItem>, base_dir: impl Into<PathBuf>) -> Self {
        let mut items: Vec<CheckItem> = default_items()
            .into_iter()
            .filter(|d| !configured.iter().any(|c| c.kind == d.kind && c.path == d.path))
            .collect();
        items.extend(configured);
        Self {
            items,
            base_dir: base_dir.into(),
        }
    }

    pub fn items(&self) -> &[CheckItem] {
        &self.items
    }

    pub fn run<F>(&self, lookup: F) -> ChecklistReport
    where
        F: Fn(&str) -> Option<String>,
    {
        let outcomes = self
            .items
            .iter()
            .map(|item| {
                let result = match item.kind {
                    CheckKind::Env => check_env(&lookup, &item.path),
                    CheckKind::File => check_file(&self.resolve(&item.path)),
                    CheckKind::Directory => check_directory(&self.resolve(&item.path)),
                    CheckKind::Executable => check_executable(&self.resolve(&item.path)),
                };
                let (passed, detail) = match result {
                    Ok(detail) => (true, detail),
                    Err(detail) => {
                        warn!(path = %item.path, kind = ?item.kind, "Check failed: {}", detail);
                        (false, detail)
                    }
                };
                debug!(path = %item.path, passed, "Checked");
                CheckOutcome {
                    item: item.clone(),
                    passed,
                    detail,
                }
            })
            .collect();
        ChecklistReport { outcomes }
    }

    fn resolve(&self, path: &str) -> PathBuf {
        let path = Path::new(path);
        if path.is_absolute() {
            path.to_path_buf()
        } else {
            self.base_dir.join(path)
        }
    }
}

type CheckResult = std::result::Result<String, String>;

fn check_env<F>(lookup: &F, name: &str) -> CheckResult
where
    F: Fn(&str) -> Option<String>,
{
    match lookup(name) {
        Some(value) if !value.trim().is_empty() => Ok("set".to_string()),
        Some(_) => Err("empty".to_string()),
        None => Err("unset".to_string()),
    }
}

fn check_file(path: &Path) -> CheckResult {
    match fs::metadata(path) {
        Ok(meta) if meta.is_file() => Ok("present".to_string()),
        Ok(_) => Err("not a regular file".to_string()),
        Err(_) => Err("missing".to_string()),
    }
}

fn check_directory(path: &Path) -> CheckResult {
    match fs::metadata(path) {
        Ok(meta) if meta.is_dir() => Ok("present".to_string()),
        Ok(_) => Err("not a directory".to_string()),
        Err(_) => Err("missing".to_string()),
    }
}

fn check_executable(path: &Path) -> CheckResult {
    let meta = fs::metadata(path).map_err(|_| "missing".to_string())?;
    if !meta.is_file() {
        return Err("not a regular file".to_string());
    }
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        if meta.permissions().mode() & 0o111 == 0 {
            return Err("not executable".to_string());
        }
    }
    Ok("executable".to_string())
}
