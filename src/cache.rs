//! Cross-build compile cache
//!
//! One entry per file path. An entry is reused only while its key (the options
//! fingerprint plus the content hash of the file) is unchanged and every file
//! the output depended on still hashes the same.

use crate::error::Result;
use crate::types::CompileResult;
use crate::utils;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::fs;
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CacheEntry {
    pub path: String,
    pub key: String,
    pub result: CompileResult,
    /// Absolute dependency path -> content hash at the time of compilation.
    pub referenced_imports: BTreeMap<String, String>,
}

#[derive(Debug, Default)]
pub struct BuildCache {
    entries: HashMap<String, CacheEntry>,
    cache_dir: Option<PathBuf>,
}

impl BuildCache {
    /// A cache that lives as long as the compiler instance.
    pub fn in_memory() -> Self {
        Self::default()
    }

    /// A cache that also persists entries as JSON files under `cache_dir`.
    pub fn persistent(cache_dir: impl AsRef<Path>) -> Result<Self> {
        let cache_dir = cache_dir.as_ref().to_path_buf();
        fs::create_dir_all(&cache_dir)?;
        Ok(Self {
            entries: HashMap::new(),
            cache_dir: Some(cache_dir),
        })
    }

    pub fn key(options_hash: &str, source_hash: &str) -> String {
        format!("{}...{}", options_hash, source_hash)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Look up a still-valid entry for `path`. `current_hash` reports the
    /// present hash of a dependency, or `None` when it no longer exists.
    pub fn get(
        &mut self,
        path: &str,
        key: &str,
        current_hash: &mut dyn FnMut(&str) -> Option<String>,
    ) -> Option<CompileResult> {
        if !self.entries.contains_key(path) {
            let entry = self.read_entry(path)?;
            self.entries.insert(path.to_string(), entry);
        }

        let entry = self.entries.get(path)?;
        if entry.key != key {
            return None;
        }
        let stale = entry
            .referenced_imports
            .iter()
            .find(|(dependency, hash)| current_hash(dependency.as_str()).as_deref() != Some(hash.as_str()))
            .map(|(dependency, _)| dependency.clone());
        if let Some(dependency) = stale {
            log::debug!("Cache entry for {} is stale: {} changed", path, dependency);
            self.remove(path);
            return None;
        }

        Some(entry.result.clone())
    }

    pub fn insert(
        &mut self,
        path: &str,
        key: &str,
        result: CompileResult,
        referenced_imports: BTreeMap<String, String>,
    ) {
        let entry = CacheEntry {
            path: path.to_string(),
            key: key.to_string(),
            result,
            referenced_imports,
        };
        self.write_entry(&entry);
        self.entries.insert(path.to_string(), entry);
    }

    pub fn remove(&mut self, path: &str) {
        self.entries.remove(path);
        if let Some(entry_path) = self.entry_path(path) {
            fs::remove_file(entry_path).ok();
        }
    }

    /// Drop every entry, in memory and on disk.
    pub fn clear(&mut self) {
        self.entries.clear();
        if let Some(dir) = &self.cache_dir {
            if let Ok(read_dir) = fs::read_dir(dir) {
                for entry in read_dir.flatten() {
                    let path = entry.path();
                    if path.extension().map_or(false, |ext| ext == "json") {
                        fs::remove_file(path).ok();
                    }
                }
            }
        }
    }

    fn entry_path(&self, path: &str) -> Option<PathBuf> {
        self.cache_dir
            .as_ref()
            .map(|dir| dir.join(format!("{}.json", utils::content_hash(path))))
    }

    fn read_entry(&self, file_path: &str) -> Option<CacheEntry> {
        let path = self.entry_path(file_path)?;
        let data = fs::read_to_string(&path).ok()?;
        match serde_json::from_str::<CacheEntry>(&data) {
            Ok(entry) if entry.path == file_path => Some(entry),
            Ok(_) => None,
            Err(e) => {
                log::warn!("Discarding corrupt cache entry {}: {}", path.display(), e);
                fs::remove_file(&path).ok();
                None
            }
        }
    }

    fn write_entry(&self, entry: &CacheEntry) {
        let Some(path) = self.entry_path(&entry.path) else {
            return;
        };
        match serde_json::to_string(entry) {
            Ok(data) => {
                if let Err(e) = fs::write(&path, data) {
                    log::warn!("Unable to write cache entry {}: {}", path.display(), e);
                }
            }
            Err(e) => log::warn!("Unable to serialize cache entry {}: {}", entry.key, e),
        }
    }
}

/// Content hash of a file on disk, `None` if it cannot be read.
pub fn hash_on_disk(path: &str) -> Option<String> {
    fs::read_to_string(path).ok().map(|text| utils::content_hash(&text))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    const PATH: &str = "/app/client/a.css";

    fn result(css: &str) -> CompileResult {
        CompileResult {
            file_path: "client/a.css".into(),
            stylesheet: css.into(),
            ..Default::default()
        }
    }

    fn no_dependencies(_: &str) -> Option<String> {
        None
    }

    #[test]
    fn test_key_shape() {
        assert_eq!(BuildCache::key("opts", "src"), "opts...src");
    }

    #[test]
    fn test_hit_and_miss() {
        let mut cache = BuildCache::in_memory();
        let key = BuildCache::key("o", "s");
        assert!(cache.get(PATH, &key, &mut no_dependencies).is_none());

        cache.insert(PATH, &key, result(".a{}"), BTreeMap::new());
        assert_eq!(cache.get(PATH, &key, &mut no_dependencies).unwrap().stylesheet, ".a{}");
        assert!(cache.get(PATH, &BuildCache::key("o2", "s"), &mut no_dependencies).is_none());
        assert!(cache.get("/app/client/b.css", &key, &mut no_dependencies).is_none());
    }

    #[test]
    fn test_changed_dependency_invalidates() {
        let mut cache = BuildCache::in_memory();
        let mut deps = BTreeMap::new();
        deps.insert("/app/b.css".to_string(), "h1".to_string());
        cache.insert(PATH, "k", result(".a{}"), deps);

        assert!(cache.get(PATH, "k", &mut |_| Some("h1".to_string())).is_some());
        assert!(cache.get(PATH, "k", &mut |_| Some("h2".to_string())).is_none());
        assert!(cache.is_empty());
    }

    #[test]
    fn test_persists_across_instances() {
        let temp_dir = TempDir::new().unwrap();
        {
            let mut cache = BuildCache::persistent(temp_dir.path()).unwrap();
            cache.insert(PATH, "k", result(".a{}"), BTreeMap::new());
        }
        let mut cache = BuildCache::persistent(temp_dir.path()).unwrap();
        assert_eq!(cache.get(PATH, "k", &mut no_dependencies).unwrap().stylesheet, ".a{}");
    }

    #[test]
    fn test_corrupt_entry_is_removed() {
        let temp_dir = TempDir::new().unwrap();
        let mut cache = BuildCache::persistent(temp_dir.path()).unwrap();
        let entry_path = temp_dir
            .path()
            .join(format!("{}.json", utils::content_hash(PATH)));
        fs::write(&entry_path, "{ not json").unwrap();

        assert!(cache.get(PATH, "k", &mut no_dependencies).is_none());
        assert!(!entry_path.exists());
    }

    #[test]
    fn test_clear_removes_files() {
        let temp_dir = TempDir::new().unwrap();
        let mut cache = BuildCache::persistent(temp_dir.path()).unwrap();
        cache.insert(PATH, "k", result(".a{}"), BTreeMap::new());
        cache.clear();

        assert!(cache.is_empty());
        assert_eq!(fs::read_dir(temp_dir.path()).unwrap().count(), 0);
    }

    #[test]
    fn test_hash_on_disk() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("a.css");
        fs::write(&path, ".a{}").unwrap();
        let path = path.to_string_lossy().to_string();
        assert_eq!(hash_on_disk(&path), Some(utils::content_hash(".a{}")));
        assert_eq!(hash_on_disk("/definitely/missing.css"), None);
    }
}
