//! Import specifier resolution
//!
//! Maps the specifiers written in `@import` and `composes ... from` to
//! canonical absolute paths (forward slashes, `.`/`..` collapsed).
//! Supported forms:
//!
//! - `~pkg/file.css` and `~pkg` (package main entry from its manifest)
//! - `/file.css` (project-root absolute)
//! - `{}/file.css` and `{pkg}/file.css`, `{scope:pkg}/file.css` (package paths)
//! - `./file.css`, `../file.css` and bare `file.css` (relative to the importer)

use crate::error::{CompilerError, Result};
use crate::utils;
use std::fs;
use std::path::Path;

#[derive(Debug, Clone)]
pub struct PathResolver {
    base_path: String,
}

impl PathResolver {
    pub fn new(base_path: impl Into<String>) -> Self {
        let base_path = utils::normalize_slashes(&base_path.into());
        Self {
            base_path: base_path.trim_end_matches('/').to_string(),
        }
    }

    pub fn base_path(&self) -> &str {
        &self.base_path
    }

    /// Absolute paths pass through; relative ones are joined to the base.
    pub fn absolute_import_path(&self, path: &str) -> String {
        if utils::is_absolute(path) {
            return clean(path);
        }
        clean(&format!("{}/{}", self.base_path, path))
    }

    /// `/`-rooted path relative to the project base.
    pub fn app_relative_import_path(&self, absolute_path: &str) -> String {
        let absolute_path = utils::normalize_slashes(absolute_path);
        match absolute_path.strip_prefix(&self.base_path) {
            Some(rest) => format!("/{}", rest.trim_start_matches('/')),
            None => absolute_path,
        }
    }

    /// Canonical path of a host file, placing package files under
    /// `packages/<name>` with `:` mapped to `_`.
    pub fn import_path_in_package(&self, package_name: Option<&str>, path_in_package: &str) -> String {
        match package_name {
            None => clean(&format!("{}/{}", self.base_path, path_in_package)),
            Some(package) => clean(&format!(
                "{}/packages/{}/{}",
                self.base_path,
                package.replace(':', "_"),
                path_in_package
            )),
        }
    }

    /// Resolve `specifier` relative to the file at `relative_to`, probing the
    /// disk for package-scoped paths.
    pub fn resolve_relative(&self, specifier: &str, relative_to: &str) -> Result<String> {
        self.resolve_relative_with(specifier, relative_to, &|path| Path::new(path).exists())
    }

    /// Same as [`resolve_relative`](Self::resolve_relative) with a custom
    /// existence probe, so files that only live in the build's registry count.
    pub fn resolve_relative_with(
        &self,
        specifier: &str,
        relative_to: &str,
        exists: &dyn Fn(&str) -> bool,
    ) -> Result<String> {
        let import_path = utils::normalize_slashes(utils::strip_quotes(specifier.trim()));
        let relative_to = utils::normalize_slashes(relative_to);
        // An importer living under a package-scoped path resolves from there.
        let relative_to = match relative_to.find('{') {
            Some(idx) => relative_to[idx..].to_string(),
            None => relative_to,
        };

        if let Some(module) = import_path.strip_prefix('~') {
            return self.module_path(module, specifier);
        }

        if let Some(rooted) = import_path.strip_prefix('/') {
            return Ok(self.absolute_import_path(rooted));
        }

        if import_path.starts_with('{') {
            return self.package_path(&import_path, specifier, exists);
        }

        let import_path = if utils::is_absolute(&import_path) || import_path.starts_with('.') {
            import_path
        } else {
            format!("./{}", import_path)
        };

        let joined = if import_path.starts_with('.') {
            format!("{}/{}", utils::dirname(&relative_to), import_path)
        } else {
            import_path
        };

        match joined.find('{') {
            Some(idx) => self.package_path(&joined[idx..], specifier, exists),
            None => Ok(clean(&joined)),
        }
    }

    fn module_path(&self, module: &str, specifier: &str) -> Result<String> {
        let node_modules = format!("{}/node_modules", self.base_path);
        if module.contains('/') {
            return Ok(clean(&format!("{}/{}", node_modules, module)));
        }

        let module_dir = format!("{}/{}", node_modules, module);
        let manifest_path = format!("{}/package.json", module_dir);
        let manifest = fs::read_to_string(&manifest_path).map_err(|e| {
            CompilerError::resolution_with_candidates(
                specifier,
                format!("unable to read package manifest: {}", e),
                vec![manifest_path.clone()],
            )
        })?;
        let manifest: serde_json::Value = serde_json::from_str(&manifest).map_err(|e| {
            CompilerError::resolution(specifier, format!("invalid package manifest {}: {}", manifest_path, e))
        })?;
        let main = manifest
            .get("main")
            .and_then(|main| main.as_str())
            .ok_or_else(|| {
                CompilerError::resolution(specifier, format!("no \"main\" entry in {}", manifest_path))
            })?;

        Ok(clean(&format!("{}/{}", module_dir, main)))
    }

    fn package_path(&self, path: &str, specifier: &str, exists: &dyn Fn(&str) -> bool) -> Result<String> {
        if let Some(rest) = path.strip_prefix("{}") {
            return Ok(clean(&format!("{}/{}", self.base_path, rest)));
        }

        let close = path.find('}').ok_or_else(|| {
            CompilerError::resolution(specifier, "unterminated package segment")
        })?;
        let package = &path[1..close];
        let rest = path[close + 1..].trim_start_matches('/');

        let scoped = clean(&format!(
            "{}/packages/{}/{}",
            self.base_path,
            package.replacen(':', "_", 1),
            rest
        ));
        if exists(&scoped) {
            return Ok(scoped);
        }

        let unscoped_name = match package.rfind(':') {
            Some(idx) => &package[idx + 1..],
            None => package,
        };
        let unscoped = clean(&format!("{}/packages/{}/{}", self.base_path, unscoped_name, rest));
        if exists(&unscoped) {
            return Ok(unscoped);
        }

        let mut candidates = vec![scoped];
        if !candidates.contains(&unscoped) {
            candidates.push(unscoped);
        }
        Err(CompilerError::resolution_with_candidates(
            specifier,
            "path does not exist",
            candidates,
        ))
    }
}

/// Collapse `.`/`..` segments and force forward slashes.
fn clean(path: &str) -> String {
    let cleaned = path_clean::clean(utils::normalize_slashes(path));
    utils::normalize_slashes(&cleaned.to_string_lossy())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    fn resolver() -> PathResolver {
        PathResolver::new("C:/test")
    }

    fn never(_: &str) -> bool {
        false
    }

    fn always(_: &str) -> bool {
        true
    }

    #[test]
    fn test_absolute_import_path() {
        let resolver = resolver();
        assert_eq!(resolver.absolute_import_path("C:/other"), "C:/other");
        assert_eq!(resolver.absolute_import_path("C:\\other"), "C:/other");
        assert_eq!(resolver.absolute_import_path("hello"), "C:/test/hello");
    }

    #[test]
    fn test_app_relative_import_path() {
        assert_eq!(resolver().app_relative_import_path("C:/test/hello"), "/hello");
    }

    #[test]
    fn test_relative_forms() {
        let resolver = resolver();
        let resolve = |spec: &str| resolver.resolve_relative_with(spec, "C:/test/other", &never).unwrap();
        assert_eq!(resolve("./hello"), "C:/test/hello");
        assert_eq!(resolve("hello"), "C:/test/hello");
        assert_eq!(resolve("../hello"), "C:/hello");
        assert_eq!(resolve("./world/hello"), "C:/test/world/hello");
        assert_eq!(resolve("C:/test/hello"), "C:/test/hello");
        assert_eq!(resolve("\"./quoted.css\""), "C:/test/quoted.css");
        assert_eq!(resolve(".\\win\\style.css"), "C:/test/win/style.css");
    }

    #[test]
    fn test_root_and_module_forms() {
        let resolver = resolver();
        assert_eq!(
            resolver.resolve_relative_with("/client/a.css", "C:/test/deep/b.css", &never).unwrap(),
            "C:/test/client/a.css"
        );
        assert_eq!(
            resolver.resolve_relative_with("~world/hello", "C:/test/other", &never).unwrap(),
            "C:/test/node_modules/world/hello"
        );
    }

    #[test]
    fn test_package_main_entry() {
        let temp_dir = TempDir::new().unwrap();
        let module_dir = temp_dir.path().join("node_modules").join("theme");
        fs::create_dir_all(&module_dir).unwrap();
        fs::write(module_dir.join("package.json"), r#"{"main": "dist/theme.css"}"#).unwrap();

        let base = temp_dir.path().to_string_lossy().to_string();
        let resolver = PathResolver::new(base.clone());
        let resolved = resolver.resolve_relative("~theme", &format!("{}/a.css", base)).unwrap();
        assert!(resolved.ends_with("/node_modules/theme/dist/theme.css"));

        let missing = resolver.resolve_relative("~absent", &format!("{}/a.css", base));
        assert!(matches!(missing, Err(CompilerError::Resolution { .. })));
    }

    #[test]
    fn test_curly_syntax() {
        let resolver = resolver();
        assert_eq!(
            resolver.resolve_relative_with("{}/world/hello", "C:/test/other", &never).unwrap(),
            "C:/test/world/hello"
        );
        assert_eq!(
            resolver.resolve_relative_with("{my_package}/world/hello", "C:/test/other", &always).unwrap(),
            "C:/test/packages/my_package/world/hello"
        );
        assert_eq!(
            resolver.resolve_relative_with("{my:package}/world/hello", "C:/test/other", &always).unwrap(),
            "C:/test/packages/my_package/world/hello"
        );
    }

    #[test]
    fn test_curly_syntax_falls_back_to_unscoped_name() {
        let resolver = resolver();
        let only_unscoped = |path: &str| path == "C:/test/packages/package/world/hello";
        assert_eq!(
            resolver
                .resolve_relative_with("{my:package}/world/hello", "C:/test/other", &only_unscoped)
                .unwrap(),
            "C:/test/packages/package/world/hello"
        );

        match resolver.resolve_relative_with("{my:package}/world/hello", "C:/test/other", &never) {
            Err(CompilerError::Resolution { candidates, .. }) => {
                assert_eq!(
                    candidates,
                    vec![
                        "C:/test/packages/my_package/world/hello".to_string(),
                        "C:/test/packages/package/world/hello".to_string(),
                    ]
                );
            }
            other => panic!("Expected resolution error, got {:?}", other),
        }
    }

    #[test]
    fn test_importer_under_package_path() {
        let resolver = resolver();
        assert_eq!(
            resolver
                .resolve_relative_with("./b.css", "/elsewhere/{}/client/a.css", &never)
                .unwrap(),
            "C:/test/client/b.css"
        );
    }

    #[test]
    fn test_import_path_in_package() {
        let resolver = resolver();
        assert_eq!(resolver.import_path_in_package(None, "client/a.css"), "C:/test/client/a.css");
        assert_eq!(
            resolver.import_path_in_package(Some("acme:ui"), "styles/a.css"),
            "C:/test/packages/acme_ui/styles/a.css"
        );
    }
}
