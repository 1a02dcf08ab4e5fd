//! Per-build file registry
//!
//! Holds at most one [`SourceFile`] per canonical path. Files referenced only
//! through `@import` or `composes` (library partials, node_modules files) are
//! read from disk the first time they are asked for.

use crate::error::{CompilerError, Result};
use crate::options::ResolvedOptions;
use crate::types::SourceFile;
use crate::utils;
use std::collections::HashMap;
use std::fs;
use std::path::Path;

#[derive(Debug, Default)]
pub struct FileRegistry {
    files: HashMap<String, SourceFile>,
    base_path: String,
    prelude: String,
    default_arch: String,
}

impl FileRegistry {
    pub fn new(options: &ResolvedOptions, default_arch: impl Into<String>) -> Self {
        Self {
            files: HashMap::new(),
            base_path: options.base_path.clone(),
            prelude: options.global_variables_text.clone(),
            default_arch: default_arch.into(),
        }
    }

    /// Add or replace the entry for `file.path`.
    pub fn insert(&mut self, file: SourceFile) {
        self.files.insert(file.path.clone(), file);
    }

    pub fn get(&self, path: &str) -> Option<&SourceFile> {
        self.files.get(path)
    }

    pub fn contains(&self, path: &str) -> bool {
        self.files.contains_key(path)
    }

    /// Known to the build, or present on disk.
    pub fn exists(&self, path: &str) -> bool {
        self.contains(path) || Path::new(path).is_file()
    }

    pub fn len(&self) -> usize {
        self.files.len()
    }

    pub fn is_empty(&self) -> bool {
        self.files.is_empty()
    }

    pub fn paths(&self) -> impl Iterator<Item = &String> {
        self.files.keys()
    }

    /// Look up a file, creating it from disk on a miss.
    pub fn get_or_load(&mut self, path: &str) -> Result<&SourceFile> {
        if !self.files.contains_key(path) {
            let file = self.read_from_disk(path)?;
            log::debug!("Registered file discovered through an import: {}", path);
            self.files.insert(path.to_string(), file);
        }
        Ok(&self.files[path])
    }

    /// The first candidate that is registered, otherwise the first that can be
    /// read from disk.
    pub fn load_first(&mut self, specifier: &str, candidates: &[String]) -> Result<&SourceFile> {
        let found = candidates
            .iter()
            .find(|candidate| self.files.contains_key(candidate.as_str()))
            .or_else(|| candidates.iter().find(|candidate| Path::new(candidate.as_str()).is_file()))
            .cloned();

        match found {
            Some(path) => self.get_or_load(&path),
            None => Err(CompilerError::resolution_with_candidates(
                specifier,
                "file not found",
                candidates.to_vec(),
            )),
        }
    }

    fn read_from_disk(&self, path: &str) -> Result<SourceFile> {
        let raw = fs::read_to_string(path).map_err(|e| {
            CompilerError::resolution_with_candidates(
                path,
                format!("unable to read file: {}", e),
                vec![path.to_string()],
            )
        })?;

        let path_in_package = match path.strip_prefix(&self.base_path) {
            Some(rest) => rest.trim_start_matches('/').to_string(),
            None => path.to_string(),
        };
        let contents = if self.prelude.is_empty() {
            raw.clone()
        } else {
            format!("{}\n\n{}", self.prelude, raw)
        };

        Ok(SourceFile::new(
            utils::normalize_slashes(path),
            path_in_package,
            self.default_arch.clone(),
            raw,
        )
        .with_contents(contents))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn registry_for(dir: &TempDir) -> (FileRegistry, String) {
        let base = utils::normalize_slashes(&dir.path().to_string_lossy());
        let options = ResolvedOptions::with_base_path(&base).unwrap();
        (FileRegistry::new(&options, "web.browser"), base)
    }

    #[test]
    fn test_get_or_load_reads_once() {
        let temp_dir = TempDir::new().unwrap();
        fs::write(temp_dir.path().join("lib.css"), ".a { color: red; }").unwrap();
        let (mut registry, base) = registry_for(&temp_dir);
        let path = format!("{}/lib.css", base);

        let file = registry.get_or_load(&path).unwrap();
        assert_eq!(file.path_in_package, "lib.css");
        assert_eq!(file.arch, "web.browser");
        assert_eq!(registry.len(), 1);

        // Later disk changes are not observed within the build.
        fs::write(temp_dir.path().join("lib.css"), ".b {}").unwrap();
        assert_eq!(registry.get_or_load(&path).unwrap().contents, ".a { color: red; }");
    }

    #[test]
    fn test_missing_file_is_resolution_error() {
        let temp_dir = TempDir::new().unwrap();
        let (mut registry, base) = registry_for(&temp_dir);
        let result = registry.get_or_load(&format!("{}/missing.css", base));
        assert!(matches!(result, Err(CompilerError::Resolution { .. })));
    }

    #[test]
    fn test_load_first_prefers_registered_files() {
        let temp_dir = TempDir::new().unwrap();
        fs::write(temp_dir.path().join("_partial.scss"), "$a: 1;").unwrap();
        let (mut registry, base) = registry_for(&temp_dir);

        let exact = format!("{}/partial.scss", base);
        let underscored = format!("{}/_partial.scss", base);
        let file = registry
            .load_first("partial", &[exact.clone(), underscored.clone()])
            .unwrap();
        assert_eq!(file.path, underscored);

        registry.insert(SourceFile::new(exact.clone(), "partial.scss", "web", "$b: 2;"));
        let file = registry.load_first("partial", &[exact.clone(), underscored]).unwrap();
        assert_eq!(file.path, exact);
    }

    #[test]
    fn test_load_first_reports_candidates() {
        let temp_dir = TempDir::new().unwrap();
        let (mut registry, base) = registry_for(&temp_dir);
        let candidates = vec![format!("{}/a.scss", base), format!("{}/_a.scss", base)];
        match registry.load_first("a", &candidates) {
            Err(CompilerError::Resolution { candidates: tried, .. }) => assert_eq!(tried, candidates),
            other => panic!("Expected resolution error, got {:?}", other.map(|f| f.path.clone())),
        }
    }
}
