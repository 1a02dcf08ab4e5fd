//! Core data types shared by every stage of the pipeline

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

/// Local name -> space-joined scoped names (own name first, then the
/// composed-in names in declaration order). Keys stay in the order the
/// stylesheet declared them.
pub type ExportTokenMap = IndexMap<String, String>;

/// Per-file options supplied by the host.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FileOptions {
    /// Forces the file to be treated as an import-only partial (or not).
    pub is_import: Option<bool>,
}

/// One stylesheet flowing through the build.
///
/// Each stage takes a `SourceFile` by value and hands back an updated copy,
/// so a stage can never observe another stage's half-finished mutations.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SourceFile {
    /// Canonical absolute path, forward slashes only. Identity of the file.
    pub path: String,

    /// Path relative to the package/project root as the host reported it.
    pub path_in_package: String,

    /// Architecture tag of the compile unit (e.g. `web.browser`, `os`).
    pub arch: String,

    /// Text as read, without the global-variables prelude. Imports of this
    /// file see this text.
    pub raw_contents: String,

    /// Current text: raw plus prelude, then preprocessed CSS, then scoped CSS.
    pub contents: String,

    /// Exported tokens, present once the module scoping stage ran.
    pub tokens: Option<ExportTokenMap>,

    /// Source map of the last stage that produced one.
    pub source_map: Option<serde_json::Value>,

    /// Direct `composes ... from` specifiers, as written.
    pub imports: Vec<String>,

    /// Every absolute path this file's output depends on.
    pub referenced_import_paths: BTreeSet<String>,

    pub file_options: FileOptions,

    pub is_lazy: bool,
    pub is_preprocessed: bool,
    pub is_scoped: bool,
}

impl SourceFile {
    pub fn new(
        path: impl Into<String>,
        path_in_package: impl Into<String>,
        arch: impl Into<String>,
        raw_contents: impl Into<String>,
    ) -> Self {
        let raw_contents = raw_contents.into();
        Self {
            path: path.into(),
            path_in_package: path_in_package.into(),
            arch: arch.into(),
            contents: raw_contents.clone(),
            raw_contents,
            ..Default::default()
        }
    }

    /// Replace the working text, keeping `raw_contents` as read.
    pub fn with_contents(mut self, contents: impl Into<String>) -> Self {
        self.contents = contents.into();
        self
    }

    pub fn with_file_options(mut self, file_options: FileOptions) -> Self {
        self.file_options = file_options;
        self
    }

    /// Base name of the package-relative path (`_vars.scss` for `a/_vars.scss`).
    pub fn basename(&self) -> &str {
        crate::utils::basename(&self.path_in_package)
    }
}

/// Memoized outcome of scoping one file within a build.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ModuleResult {
    pub css: String,
    pub tokens: ExportTokenMap,
    pub source_map: Option<serde_json::Value>,
    /// Direct `composes` specifiers as written, for re-emitted imports.
    pub imports: Vec<String>,
    /// Transitive absolute dependency paths; may contain repeats.
    pub import_tree: Vec<String>,
}

/// Everything needed to emit a file's artifacts; this is what the persistent
/// cache stores.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CompileResult {
    pub is_lazy: bool,
    pub file_path: String,
    pub imports: Vec<String>,
    pub stylesheet: String,
    pub source_map: Option<serde_json::Value>,
    pub tokens: Option<ExportTokenMap>,
    pub imports_code: String,
    pub stylesheet_code: String,
    pub tokens_code: String,
}

/// A stylesheet artifact handed to the host.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StylesheetOutput {
    pub data: String,
    pub path: String,
    pub source_path: String,
    pub source_map: Option<String>,
    pub lazy: bool,
}

/// A generated code artifact handed to the host.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct JavaScriptOutput {
    pub data: String,
    pub path: String,
    pub source_path: String,
    pub lazy: bool,
    pub bare: bool,
}

/// A file-scoped error reported back to the host.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FileError {
    pub message: String,
    pub source_path: String,
}
