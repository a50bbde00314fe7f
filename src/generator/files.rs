//! Generated file set with normalized, repository-relative paths.

use std::collections::BTreeMap;

use thiserror::Error;

/// Root page GitHub Pages serves for `/`.
pub const ENTRY_POINT: &str = "index.html";

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PathError {
    #[error("empty path")]
    Empty,
    #[error("absolute path not allowed: {0}")]
    Absolute(String),
    #[error("path escapes the repository root: {0}")]
    Traversal(String),
    #[error("path points into .git: {0}")]
    GitDirectory(String),
}

/// Normalize a model-supplied path.
///
/// Converts backslashes, strips `./` and empty segments, and rejects paths
/// that are absolute, contain `..`, or point into `.git`.
pub fn normalize_path(raw: &str) -> Result<String, PathError> {
    let trimmed = raw.trim().trim_matches('`').trim();
    let unified = trimmed.replace('\\', "/");
    if unified.is_empty() {
        return Err(PathError::Empty);
    }
    if unified.starts_with('/') || unified.contains(':') {
        return Err(PathError::Absolute(raw.to_string()));
    }

    let mut parts = Vec::new();
    for segment in unified.split('/') {
        match segment {
            "" | "." => continue,
            ".." => return Err(PathError::Traversal(raw.to_string())),
            s => parts.push(s),
        }
    }
    if parts.is_empty() {
        return Err(PathError::Empty);
    }
    if parts[0] == ".git" {
        return Err(PathError::GitDirectory(raw.to_string()));
    }
    Ok(parts.join("/"))
}

/// Mapping relative path -> text content.
///
/// # Invariants
/// - every key passed through [`normalize_path`]
/// - keys are unique (a later insert for the same path replaces the earlier one)
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct GeneratedFileSet {
    files: BTreeMap<String, String>,
}

impl GeneratedFileSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a file, normalizing its path.
    pub fn insert(&mut self, path: &str, content: impl Into<String>) -> Result<(), PathError> {
        let path = normalize_path(path)?;
        self.files.insert(path, content.into());
        Ok(())
    }

    /// Insert only if the path is not present yet.
    pub fn insert_if_missing(&mut self, path: &str, content: impl FnOnce() -> String) -> Result<(), PathError> {
        let path = normalize_path(path)?;
        self.files.entry(path).or_insert_with(content);
        Ok(())
    }

    pub fn get(&self, path: &str) -> Option<&str> {
        self.files.get(path).map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.files.len()
    }

    pub fn is_empty(&self) -> bool {
        self.files.is_empty()
    }

    /// True when the root page exists.
    pub fn has_entry_point(&self) -> bool {
        self.files.contains_key(ENTRY_POINT)
    }

    pub fn paths(&self) -> impl Iterator<Item = &str> {
        self.files.keys().map(String::as_str)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.files.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalizes_relative_paths() {
        assert_eq!(normalize_path("./index.html").unwrap(), "index.html");
        assert_eq!(normalize_path("js\\app.js").unwrap(), "js/app.js");
        assert_eq!(normalize_path("css//style.css").unwrap(), "css/style.css");
        assert_eq!(normalize_path(" `README.md` ").unwrap(), "README.md");
    }

    #[test]
    fn rejects_paths_outside_the_root() {
        assert!(matches!(normalize_path("../secret"), Err(PathError::Traversal(_))));
        assert!(matches!(normalize_path("a/../../b"), Err(PathError::Traversal(_))));
        assert!(matches!(normalize_path("/etc/passwd"), Err(PathError::Absolute(_))));
        assert!(matches!(normalize_path("C:/x"), Err(PathError::Absolute(_))));
        assert!(matches!(normalize_path(".git/config"), Err(PathError::GitDirectory(_))));
        assert!(matches!(normalize_path("./"), Err(PathError::Empty)));
    }

    #[test]
    fn duplicate_paths_collapse() {
        let mut files = GeneratedFileSet::new();
        files.insert("index.html", "a").unwrap();
        files.insert("./index.html", "b").unwrap();
        assert_eq!(files.len(), 1);
        assert_eq!(files.get("index.html"), Some("b"));
        assert!(files.has_entry_point());
    }

    #[test]
    fn insert_if_missing_keeps_existing() {
        let mut files = GeneratedFileSet::new();
        files.insert("LICENSE", "custom").unwrap();
        files.insert_if_missing("LICENSE", || "default".to_string()).unwrap();
        assert_eq!(files.get("LICENSE"), Some("custom"));
    }
}
