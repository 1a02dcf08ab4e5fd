//! Stylesheet renderers and the registry they are looked up in
//!
//! A renderer turns one dialect (Sass-like, Less-like, Stylus-like) into
//! plain CSS. Imports are never read directly: every `@import` goes through
//! the [`Importer`] the caller supplies, so the preprocessing stage controls
//! path resolution, the file registry and dependency tracking.
//!
//! Renderers are selected by name from a [`RendererRegistry`]. The built-in
//! ones cover variables, imports and nesting; a host that needs the full
//! grammar registers its own implementation under the same name.

mod scss;
mod stylus;
mod tree;

pub use scss::ScssRenderer;
pub use stylus::StylusRenderer;
pub use tree::{Node, Position};

use crate::error::{CompilerError, ProcessingStep, Result};
use std::collections::HashMap;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RenderOptions {
    /// Canonical path of the file being rendered; imports resolve against it.
    pub filename: String,
    /// Stage name used in error reports.
    pub step: ProcessingStep,
}

#[derive(Debug, Clone, PartialEq)]
pub struct RenderOutput {
    pub css: String,
    pub source_map: Option<serde_json::Value>,
}

/// Contents of an imported stylesheet.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImportedSource {
    /// Canonical path of the imported file; nested imports resolve against it.
    pub path: String,
    pub contents: String,
}

/// Callback through which a renderer loads `@import` targets.
pub trait Importer {
    fn import(&mut self, specifier: &str, relative_to: &str) -> Result<ImportedSource>;
}

pub trait StylesheetRenderer {
    fn render(
        &self,
        source: &str,
        options: &RenderOptions,
        importer: &mut dyn Importer,
    ) -> Result<RenderOutput>;
}

pub type RendererFactory = fn() -> Box<dyn StylesheetRenderer>;

/// Named renderer factories, populated once at startup.
#[derive(Default)]
pub struct RendererRegistry {
    factories: HashMap<String, RendererFactory>,
}

impl RendererRegistry {
    /// An empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// A registry with the built-in `sass`, `less` and `stylus` renderers.
    pub fn with_builtins() -> Self {
        let mut registry = Self::new();
        registry.register("sass", || Box::new(ScssRenderer::sass()));
        registry.register("less", || Box::new(ScssRenderer::less()));
        registry.register("stylus", || Box::new(StylusRenderer::new()));
        registry
    }

    /// Add or replace a factory.
    pub fn register(&mut self, name: impl Into<String>, factory: RendererFactory) {
        self.factories.insert(name.into(), factory);
    }

    pub fn contains(&self, name: &str) -> bool {
        self.factories.contains_key(name)
    }

    pub fn names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.factories.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }

    pub fn create(&self, name: &str) -> Result<Box<dyn StylesheetRenderer>> {
        self.factories
            .get(name)
            .map(|factory| factory())
            .ok_or_else(|| CompilerError::UnregisteredCapability {
                kind: "stylesheet renderer".to_string(),
                name: name.to_string(),
            })
    }
}

impl std::fmt::Debug for RendererRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RendererRegistry")
            .field("renderers", &self.names())
            .finish()
    }
}

#[cfg(test)]
pub(crate) mod test_support {
    use super::*;

    /// Serves imports from an in-memory map keyed by specifier.
    pub struct MapImporter {
        pub files: HashMap<String, String>,
        pub requested: Vec<String>,
    }

    impl MapImporter {
        pub fn new(files: &[(&str, &str)]) -> Self {
            Self {
                files: files
                    .iter()
                    .map(|(name, contents)| (name.to_string(), contents.to_string()))
                    .collect(),
                requested: Vec::new(),
            }
        }
    }

    impl Importer for MapImporter {
        fn import(&mut self, specifier: &str, _relative_to: &str) -> Result<ImportedSource> {
            self.requested.push(specifier.to_string());
            self.files
                .get(specifier)
                .map(|contents| ImportedSource {
                    path: format!("/virtual/{}", specifier),
                    contents: contents.clone(),
                })
                .ok_or_else(|| CompilerError::resolution(specifier, "not in test map"))
        }
    }
}
