//! Preprocessing stage: Sass-like, Stylus-like and Less-like sources are
//! rendered to CSS before module scoping sees them.
//!
//! Each preprocessor owns a set of extensions, decides whether a file is a
//! compilation root or an import-only partial, and renders roots through a
//! renderer taken from the [`RendererRegistry`]. Imports are resolved with the
//! [`PathResolver`] and looked up in the build's [`FileRegistry`], which loads
//! files it has never seen (library partials) from disk on demand.

use crate::error::{self, CompilerError, ProcessingStep, Result};
use crate::options::{CompilationToggle, ResolvedOptions};
use crate::path_resolver::PathResolver;
use crate::registry::FileRegistry;
use crate::renderer::{ImportedSource, Importer, RenderOptions, RendererRegistry, StylesheetRenderer};
use crate::types::SourceFile;
use crate::utils;
use std::collections::{BTreeSet, HashMap};

pub trait Preprocessor {
    /// Short dialect name used in logs.
    fn name(&self) -> &str;

    /// Whether this preprocessor owns the file.
    fn should_process(&self, file: &SourceFile) -> bool;

    /// Whether the file is compiled on its own rather than only pulled in via
    /// `@import`. The host's `isImport` flag wins; otherwise a leading `_` in
    /// the file name marks a partial.
    fn is_root(&self, file: &SourceFile) -> bool {
        match file.file_options.is_import {
            Some(is_import) => !is_import,
            None => !file.basename().starts_with('_'),
        }
    }

    /// Render the file to CSS. Already-preprocessed files come back unchanged.
    fn process(&mut self, file: SourceFile, registry: &mut FileRegistry) -> Result<SourceFile>;
}

/// Static description of one stylesheet dialect.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Dialect {
    pub name: &'static str,
    /// Key in the [`RendererRegistry`].
    pub renderer: &'static str,
    pub step: ProcessingStep,
    /// Appended to extension-less import specifiers.
    pub default_extension: &'static str,
    /// Extensions claimed when the dialect is switched on with a plain `true`.
    pub extensions: &'static [&'static str],
}

pub const SASS: Dialect = Dialect {
    name: "sass",
    renderer: "sass",
    step: ProcessingStep::SassCompilation,
    default_extension: ".scss",
    extensions: &["scss", "sass"],
};

pub const STYLUS: Dialect = Dialect {
    name: "stylus",
    renderer: "stylus",
    step: ProcessingStep::StylusCompilation,
    default_extension: ".styl",
    extensions: &["styl", "m.styl"],
};

pub const LESS: Dialect = Dialect {
    name: "less",
    renderer: "less",
    step: ProcessingStep::LessCompilation,
    default_extension: ".less",
    extensions: &["less"],
};

pub struct StylesheetPreprocessor {
    dialect: Dialect,
    toggle: CompilationToggle,
    renderer: Box<dyn StylesheetRenderer>,
    resolver: PathResolver,
    prelude_line_offset: usize,
    /// Imported sources keyed by resolved path, reused for the rest of the build.
    file_cache: HashMap<String, ImportedSource>,
}

impl StylesheetPreprocessor {
    pub fn new(
        dialect: Dialect,
        toggle: CompilationToggle,
        options: &ResolvedOptions,
        renderers: &RendererRegistry,
    ) -> Result<Self> {
        Ok(Self {
            dialect,
            toggle,
            renderer: renderers.create(dialect.renderer)?,
            resolver: PathResolver::new(options.base_path.clone()),
            prelude_line_offset: options.prelude_line_offset(),
            file_cache: HashMap::new(),
        })
    }

    pub fn dialect(&self) -> Dialect {
        self.dialect
    }
}

/// The preprocessors switched on by the options, in routing order.
pub fn configured_preprocessors(
    options: &ResolvedOptions,
    renderers: &RendererRegistry,
) -> Result<Vec<Box<dyn Preprocessor>>> {
    let mut preprocessors: Vec<Box<dyn Preprocessor>> = Vec::new();
    for (dialect, toggle) in [
        (SASS, &options.enable_sass_compilation),
        (STYLUS, &options.enable_stylus_compilation),
        (LESS, &options.enable_less_compilation),
    ] {
        if toggle.is_enabled() {
            log::debug!("Enabled {} preprocessing", dialect.name);
            preprocessors.push(Box::new(StylesheetPreprocessor::new(
                dialect,
                toggle.clone(),
                options,
                renderers,
            )?));
        }
    }
    Ok(preprocessors)
}

impl Preprocessor for StylesheetPreprocessor {
    fn name(&self) -> &str {
        self.dialect.name
    }

    fn should_process(&self, file: &SourceFile) -> bool {
        let path = file.path_in_package.as_str();
        match &self.toggle {
            CompilationToggle::Enabled(false) => false,
            CompilationToggle::Enabled(true) => self
                .dialect
                .extensions
                .iter()
                .any(|extension| path.ends_with(&format!(".{}", extension))),
            toggle => toggle.matches(path),
        }
    }

    fn process(&mut self, file: SourceFile, registry: &mut FileRegistry) -> Result<SourceFile> {
        if file.is_preprocessed {
            return Ok(file);
        }

        let options = RenderOptions {
            filename: file.path.clone(),
            step: self.dialect.step,
        };
        let mut importer = RegistryImporter {
            resolver: &self.resolver,
            registry,
            file_cache: &mut self.file_cache,
            default_extension: self.dialect.default_extension,
            referenced: BTreeSet::new(),
        };

        match self.renderer.render(&file.contents, &options, &mut importer) {
            Ok(output) => {
                let RegistryImporter { registry, referenced, .. } = importer;
                log::debug!(
                    "{} rendered {} ({} imports)",
                    self.dialect.name,
                    file.path,
                    referenced.len()
                );

                let mut file = file;
                file.contents = output.css;
                file.source_map = output.source_map;
                file.is_preprocessed = true;
                file.referenced_import_paths.extend(referenced);
                registry.insert(file.clone());
                Ok(file)
            }
            Err(e) => {
                // Only the root carries the prelude; imported files are as read.
                let in_root = matches!(&e, CompilerError::Transform { file: failed, .. } if *failed == file.path);
                let e = if in_root {
                    e.with_line_offset(self.prelude_line_offset)
                } else {
                    e
                };
                error::log_failure_banner(self.dialect.step, &file.path, &e);
                Err(e)
            }
        }
    }
}

/// Resolves `@import` targets for one render call.
struct RegistryImporter<'a> {
    resolver: &'a PathResolver,
    registry: &'a mut FileRegistry,
    file_cache: &'a mut HashMap<String, ImportedSource>,
    default_extension: &'static str,
    referenced: BTreeSet<String>,
}

impl<'a> RegistryImporter<'a> {
    /// Exact path first, then the `_`-prefixed partial next to it.
    fn candidates(&self, resolved: &str) -> Vec<String> {
        let path = if utils::extname(resolved).is_empty() {
            format!("{}{}", resolved, self.default_extension)
        } else {
            resolved.to_string()
        };

        let mut candidates = vec![path.clone()];
        let name = utils::basename(&path);
        if !name.starts_with('_') {
            candidates.push(format!("{}/_{}", utils::dirname(&path), name));
        }
        candidates
    }
}

impl<'a> Importer for RegistryImporter<'a> {
    fn import(&mut self, specifier: &str, relative_to: &str) -> Result<ImportedSource> {
        let registry = &*self.registry;
        let resolved = self
            .resolver
            .resolve_relative_with(specifier, relative_to, &|path| registry.exists(path))?;
        let candidates = self.candidates(&resolved);

        if let Some(cached) = candidates.iter().find_map(|path| self.file_cache.get(path)) {
            let cached = cached.clone();
            self.referenced.insert(cached.path.clone());
            return Ok(cached);
        }

        let file = self.registry.load_first(specifier, &candidates)?;
        let source = ImportedSource {
            path: file.path.clone(),
            contents: file.raw_contents.clone(),
        };
        log::debug!("Resolved import '{}' to {}", specifier, source.path);

        self.referenced.insert(source.path.clone());
        self.file_cache.insert(source.path.clone(), source.clone());
        Ok(source)
    }
}

/// How the build treats a file with respect to preprocessing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileRole {
    /// No preprocessor owns the file; it is compiled as plain CSS.
    Plain,
    /// Compiled standalone through the preprocessor at this index.
    Root(usize),
    /// Owned by a preprocessor but only ever imported.
    Partial,
}

/// The first owning preprocessor that treats the file as a root wins. A file
/// that is owned but never a root is a partial.
pub fn classify(preprocessors: &[Box<dyn Preprocessor>], file: &SourceFile) -> FileRole {
    let mut role = FileRole::Plain;
    for (index, preprocessor) in preprocessors.iter().enumerate() {
        if preprocessor.should_process(file) {
            if preprocessor.is_root(file) {
                return FileRole::Root(index);
            }
            role = FileRole::Partial;
        }
    }
    role
}

impl std::fmt::Debug for StylesheetPreprocessor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StylesheetPreprocessor")
            .field("dialect", &self.dialect.name)
            .field("toggle", &self.toggle)
            .field("cached_imports", &self.file_cache.len())
            .finish()
    }
}
