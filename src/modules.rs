//! Module scoping and cross-file `composes` resolution
//!
//! One [`CssModulesProcessor`] lives for one build. It scopes each file at
//! most once: results are kept in a per-path slot that is `Pending` while the
//! file is being scoped and `Done` afterwards. A `composes ... from` that
//! reaches a `Pending` slot is a cycle. A file that fails leaves no slot
//! behind, so nothing partial is ever reused.

use crate::error::{self, CompilerError, ProcessingStep, Result};
use crate::options::ResolvedOptions;
use crate::path_resolver::PathResolver;
use crate::preprocessor::{self, FileRole, Preprocessor};
use crate::registry::FileRegistry;
use crate::scoped_name::ScopedNameGenerator;
use crate::scoper::{ComposesResolver, CssModulesTransform, SelectorTransform};
use crate::types::{ExportTokenMap, ModuleResult, SourceFile};
use crate::utils;
use regex::Regex;
use std::collections::HashMap;
use std::rc::Rc;

#[derive(Debug, Clone)]
pub enum ResolutionSlot {
    Pending,
    Done(Rc<ModuleResult>),
}

/// One resolved `composes ... from` target of a file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImportRecord {
    /// Specifier as written; re-emitted in generated imports.
    pub relative: String,
    /// Canonical path; used for dependency tracking.
    pub absolute: String,
}

pub struct CssModulesProcessor {
    resolver: PathResolver,
    names: Rc<ScopedNameGenerator>,
    transform: Rc<dyn SelectorTransform>,
    passthrough_paths: Vec<Regex>,
    camel_case: bool,
    slots: HashMap<String, ResolutionSlot>,
    imports_by_file: HashMap<String, Vec<ImportRecord>>,
    /// Files currently being scoped, outermost first.
    chain: Vec<String>,
    /// Debug label of the current top-level file; one letter per root.
    trace: char,
    roots_seen: u32,
}

impl CssModulesProcessor {
    pub fn new(options: &ResolvedOptions) -> Result<Self> {
        Self::with_transform(options, Rc::new(CssModulesTransform::new()))
    }

    pub fn with_transform(options: &ResolvedOptions, transform: Rc<dyn SelectorTransform>) -> Result<Self> {
        Ok(Self {
            resolver: PathResolver::new(options.base_path.clone()),
            names: Rc::new(ScopedNameGenerator::from_options(options)?),
            transform,
            passthrough_paths: options.passthrough_paths.clone(),
            camel_case: options.raw.js_class_naming_convention.camel_case,
            slots: HashMap::new(),
            imports_by_file: HashMap::new(),
            chain: Vec::new(),
            trace: 'a',
            roots_seen: 0,
        })
    }

    pub fn is_passthrough(&self, path: &str) -> bool {
        utils::matches_any(&self.passthrough_paths, path)
    }

    /// Scope a top-level file: rewrite its CSS, export its tokens and record
    /// every file it depends on. Passthrough files and files that were already
    /// scoped come back unchanged.
    pub fn process(&mut self, file: SourceFile, registry: &mut FileRegistry) -> Result<SourceFile> {
        self.process_with(file, registry, &mut [])
    }

    /// Like [`process`](Self::process), rendering any preprocessor root that
    /// `composes` reaches before it was preprocessed.
    pub fn process_with(
        &mut self,
        file: SourceFile,
        registry: &mut FileRegistry,
        preprocessors: &mut [Box<dyn Preprocessor>],
    ) -> Result<SourceFile> {
        if self.is_passthrough(&file.path) {
            log::debug!("Passing {} through unscoped", file.path);
            return Ok(file);
        }
        if file.is_scoped {
            return Ok(file);
        }

        self.trace = trace_label(self.roots_seen);
        self.roots_seen += 1;

        let result = match self.process_file(&file.path, Some(file.contents.as_str()), registry, preprocessors) {
            Ok(result) => result,
            Err(e) => {
                error::log_failure_banner(ProcessingStep::CssModulesCompilation, &file.path, &e);
                return Err(e);
            }
        };

        let mut file = file;
        file.contents = result.css.clone();
        file.tokens = Some(self.export_tokens(&result.tokens));
        file.source_map = result.source_map.clone();
        file.imports = result.imports.clone();
        file.referenced_import_paths
            .extend(result.import_tree.iter().cloned());
        file.is_scoped = true;

        registry.insert(file.clone());
        Ok(file)
    }

    /// Result computed for `path` in this build, if it finished.
    pub fn result_for(&self, path: &str) -> Option<Rc<ModuleResult>> {
        match self.slots.get(path) {
            Some(ResolutionSlot::Done(result)) => Some(Rc::clone(result)),
            _ => None,
        }
    }

    pub fn imports_of(&self, path: &str) -> &[ImportRecord] {
        self.imports_by_file
            .get(path)
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    /// Apply the JS naming convention to exported keys; values are untouched.
    fn export_tokens(&self, tokens: &ExportTokenMap) -> ExportTokenMap {
        if !self.camel_case {
            return tokens.clone();
        }
        tokens
            .iter()
            .map(|(local, scoped)| (utils::camel_case(local), scoped.clone()))
            .collect()
    }

    fn process_file(
        &mut self,
        path: &str,
        contents: Option<&str>,
        registry: &mut FileRegistry,
        preprocessors: &mut [Box<dyn Preprocessor>],
    ) -> Result<Rc<ModuleResult>> {
        match self.slots.get(path) {
            Some(ResolutionSlot::Done(result)) => {
                log::trace!("[{}] Reusing scoped result for {}", self.trace, path);
                return Ok(Rc::clone(result));
            }
            Some(ResolutionSlot::Pending) => {
                let mut cycle = self.chain.clone();
                cycle.push(path.to_string());
                return Err(CompilerError::resolution(
                    path,
                    format!("cyclic composes dependency: {}", cycle.join(" -> ")),
                ));
            }
            None => {}
        }

        log::debug!("[{}] Scoping {} (depth {})", self.trace, path, self.chain.len());
        self.slots.insert(path.to_string(), ResolutionSlot::Pending);
        self.chain.push(path.to_string());

        let outcome = match contents {
            Some(contents) => self.scope(path, contents, registry, preprocessors),
            None => match load_rendered(path, registry, preprocessors) {
                Ok(contents) => self.scope(path, &contents, registry, preprocessors),
                Err(e) => Err(e),
            },
        };
        self.chain.pop();

        match outcome {
            Ok(result) => {
                let result = Rc::new(result);
                self.slots
                    .insert(path.to_string(), ResolutionSlot::Done(Rc::clone(&result)));
                Ok(result)
            }
            Err(e) => {
                self.slots.remove(path);
                Err(e)
            }
        }
    }

    fn scope(
        &mut self,
        path: &str,
        contents: &str,
        registry: &mut FileRegistry,
        preprocessors: &mut [Box<dyn Preprocessor>],
    ) -> Result<ModuleResult> {
        let transform = Rc::clone(&self.transform);
        let names = Rc::clone(&self.names);
        let rename = |local: &str| names.generate(local, path);

        let mut resolver = EngineResolver {
            engine: self,
            registry,
            preprocessors,
            importer: path,
            records: Vec::new(),
        };
        let output = transform.transform(contents, path, &rename, &mut resolver)?;
        let records = resolver.records;

        let mut import_tree: Vec<String> = records.iter().map(|record| record.absolute.clone()).collect();
        for record in &records {
            if let Some(ResolutionSlot::Done(target)) = self.slots.get(&record.absolute) {
                import_tree.extend(target.import_tree.iter().cloned());
            }
        }
        let imports = records.iter().map(|record| record.relative.clone()).collect();
        self.imports_by_file.insert(path.to_string(), records);

        Ok(ModuleResult {
            css: output.css,
            tokens: output.tokens,
            source_map: output.source_map,
            imports,
            import_tree,
        })
    }
}

/// Resolves `composes ... from` for the file being scoped by recursing into
/// the engine.
struct EngineResolver<'e> {
    engine: &'e mut CssModulesProcessor,
    registry: &'e mut FileRegistry,
    preprocessors: &'e mut [Box<dyn Preprocessor>],
    importer: &'e str,
    records: Vec<ImportRecord>,
}

impl<'e> ComposesResolver for EngineResolver<'e> {
    fn resolve(&mut self, specifier: &str) -> Result<ExportTokenMap> {
        let registry = &*self.registry;
        let absolute = self
            .engine
            .resolver
            .resolve_relative_with(specifier, self.importer, &|path| registry.exists(path))?;

        let result = self
            .engine
            .process_file(&absolute, None, self.registry, self.preprocessors)?;
        self.records.push(ImportRecord {
            relative: utils::strip_quotes(specifier).to_string(),
            absolute,
        });
        Ok(result.tokens.clone())
    }
}

/// Contents of a `composes` target as CSS. A preprocessor root that has not
/// been rendered in this build yet is rendered now.
fn load_rendered(
    path: &str,
    registry: &mut FileRegistry,
    preprocessors: &mut [Box<dyn Preprocessor>],
) -> Result<String> {
    let file = registry.get_or_load(path)?.clone();
    if file.is_preprocessed {
        return Ok(file.contents);
    }
    match preprocessor::classify(preprocessors, &file) {
        FileRole::Root(index) => {
            log::debug!("Preprocessing composes target {}", path);
            Ok(preprocessors[index].process(file, registry)?.contents)
        }
        FileRole::Plain | FileRole::Partial => Ok(file.contents),
    }
}

fn trace_label(index: u32) -> char {
    char::from_u32('a' as u32 + index % 26).unwrap_or('?')
}

impl std::fmt::Debug for CssModulesProcessor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CssModulesProcessor")
            .field("base_path", &self.resolver.base_path())
            .field("camel_case", &self.camel_case)
            .field("resolved", &self.slots.len())
            .finish()
    }
}
