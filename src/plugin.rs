//! Build orchestration
//!
//! One call to [`CssModulesBuildPlugin::process_files_for_target`] is one
//! build. The host's files are filtered, files from explicit-include folders
//! are added, each file is classified as a root or a partial, every root is
//! preprocessed, and only then is each file scoped and emitted through its
//! host handle. A file that
//! fails is reported on its own handle and the remaining files still build.

use crate::cache::BuildCache;
use crate::codegen;
use crate::error::{CompilerError, Result};
use crate::host::{IncludedFile, InputFile};
use crate::modules::CssModulesProcessor;
use crate::options::ResolvedOptions;
use crate::output_path::output_path;
use crate::path_resolver::PathResolver;
use crate::preprocessor::{self, FileRole, Preprocessor};
use crate::registry::FileRegistry;
use crate::renderer::RendererRegistry;
use crate::scoper::{CssModulesTransform, SelectorTransform};
use crate::types::{CompileResult, FileError, JavaScriptOutput, SourceFile, StylesheetOutput};
use crate::utils;
use serde::Serialize;
use std::collections::{BTreeMap, HashSet};
use std::path::Path;
use std::rc::Rc;
use std::time::{Duration, Instant};
use walkdir::WalkDir;

/// Outcome of one build.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BuildReport {
    pub compiled: usize,
    pub cached: usize,
    /// Ignored files and partials.
    pub skipped: usize,
    pub failed: usize,
    pub failures: Vec<FileError>,
}

impl BuildReport {
    pub fn is_success(&self) -> bool {
        self.failed == 0
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct ProfilingResults {
    pub process_files_for_target: Option<Duration>,
    pub preprocessing: Duration,
    pub css_modules: Duration,
}

enum Unit {
    Host(usize),
    Included(IncludedFile),
}

/// A unit that passed preprocessing and still has to be scoped and emitted.
struct Prepared {
    file: SourceFile,
    key: String,
}

/// State that lives for exactly one build.
struct Build {
    registry: FileRegistry,
    preprocessors: Vec<Box<dyn Preprocessor>>,
    modules: CssModulesProcessor,
}

pub struct CssModulesBuildPlugin {
    options: ResolvedOptions,
    renderers: RendererRegistry,
    transform: Rc<dyn SelectorTransform>,
    resolver: PathResolver,
    cache: BuildCache,
    profiling: ProfilingResults,
}

impl CssModulesBuildPlugin {
    pub fn new(options: ResolvedOptions) -> Self {
        Self::with_renderers(options, RendererRegistry::with_builtins())
    }

    pub fn with_renderers(options: ResolvedOptions, renderers: RendererRegistry) -> Self {
        Self {
            resolver: PathResolver::new(options.base_path.clone()),
            options,
            renderers,
            transform: Rc::new(CssModulesTransform::new()),
            cache: BuildCache::in_memory(),
            profiling: ProfilingResults::default(),
        }
    }

    pub fn with_transform(mut self, transform: Rc<dyn SelectorTransform>) -> Self {
        self.transform = transform;
        self
    }

    pub fn with_cache(mut self, cache: BuildCache) -> Self {
        self.cache = cache;
        self
    }

    pub fn options(&self) -> &ResolvedOptions {
        &self.options
    }

    /// Swap in freshly loaded options; takes effect with the next build.
    pub fn reload_options(&mut self, options: ResolvedOptions) {
        self.resolver = PathResolver::new(options.base_path.clone());
        self.options = options;
    }

    pub fn cache(&self) -> &BuildCache {
        &self.cache
    }

    pub fn profiling_results(&self) -> &ProfilingResults {
        &self.profiling
    }

    /// Run one build over the host's files.
    ///
    /// Only a failure to establish the file set (an unreadable explicit-include
    /// folder) or to set up the pipeline aborts the build; per-file failures
    /// are reported through the file's handle and counted in the report.
    pub fn process_files_for_target<F: InputFile>(&mut self, files: &mut [F]) -> Result<BuildReport> {
        let started = Instant::now();
        self.begin_build();

        let default_arch = files
            .first()
            .map(|file| file.arch().to_string())
            .unwrap_or_else(|| self.options.raw.specific_architecture.clone());
        let mut build = self.start_build(&default_arch)?;
        let mut report = BuildReport::default();

        // Every host file is resolvable by imports, even the ignored ones.
        for file in files.iter() {
            build.registry.insert(self.source_file(file, file.contents()));
        }

        let mut units = Vec::new();
        for (index, file) in files.iter().enumerate() {
            if self.keep_file(file.path_in_package()) {
                units.push(Unit::Host(index));
            } else {
                log::debug!("Ignoring {}", file.path_in_package());
                report.skipped += 1;
            }
        }

        let backing = units.iter().find_map(|unit| match unit {
            Unit::Host(index) => Some(*index),
            Unit::Included(_) => None,
        });
        let mut seen: HashSet<String> = build.registry.paths().cloned().collect();
        for included in self.discover(backing)? {
            let path = self.resolver.absolute_import_path(&included.path);
            if !seen.insert(path) {
                continue;
            }
            let source = self.source_file(&included.attach(&mut files[included.backing]), &included.contents);
            build.registry.insert(source);
            units.push(Unit::Included(included));
        }

        // All preprocessing happens before the first file is scoped.
        let mut pending = Vec::with_capacity(units.len());
        for unit in &units {
            let prepared = match unit {
                Unit::Host(index) => self.prepare_unit(&mut build, &mut files[*index], &mut report),
                Unit::Included(included) => {
                    let mut attached = included.attach(&mut files[included.backing]);
                    self.prepare_unit(&mut build, &mut attached, &mut report)
                }
            };
            pending.push(prepared);
        }

        for (unit, prepared) in units.iter().zip(pending) {
            let Some(prepared) = prepared else {
                continue;
            };
            match unit {
                Unit::Host(index) => self.emit_unit(&mut build, &mut files[*index], prepared, &mut report),
                Unit::Included(included) => {
                    let mut attached = included.attach(&mut files[included.backing]);
                    self.emit_unit(&mut build, &mut attached, prepared, &mut report);
                }
            }
        }

        let elapsed = started.elapsed();
        self.profiling.process_files_for_target = Some(elapsed);
        if self.options.raw.enable_profiling {
            log::info!("processFilesForTarget {}ms", elapsed.as_millis());
            log::info!("preprocessing {}ms", self.profiling.preprocessing.as_millis());
            log::info!("css modules {}ms", self.profiling.css_modules.as_millis());
        }
        log::info!(
            "Built {} files ({} compiled, {} cached, {} skipped, {} failed)",
            units.len(),
            report.compiled,
            report.cached,
            report.skipped,
            report.failed
        );

        Ok(report)
    }

    /// Compile in-memory stylesheet text attributed to `backing`. Nothing is
    /// emitted; the caller decides what to do with the result.
    pub fn compile_from_source(
        &mut self,
        source: &str,
        backing: &dyn InputFile,
        transpile_css_modules: bool,
    ) -> Result<CompileResult> {
        self.begin_build();
        let mut build = self.start_build(backing.arch())?;

        let file = self.source_file(backing, source);
        build.registry.insert(file.clone());
        let role = preprocessor::classify(&build.preprocessors, &file);

        let file = self.compile_one_file(&mut build, file, role, transpile_css_modules)?;
        codegen::generate_output(&file, self.options.is_client_arch(&file.arch))
    }

    /// Hand a file's artifacts to the host: a static stylesheet for eager
    /// client files with CSS, and the generated module whenever it has content.
    pub fn add_compile_result(&self, file: &mut dyn InputFile, result: &CompileResult) -> Result<()> {
        let is_client_arch = self.options.is_client_arch(file.arch());

        if !result.stylesheet.is_empty() && is_client_arch && !result.is_lazy {
            let path = format!(
                "{}.css",
                output_path(&result.file_path, &self.options.raw.output_css_file_path)?
            );
            file.add_stylesheet(StylesheetOutput {
                data: result.stylesheet.clone(),
                source_path: path.clone(),
                path,
                source_map: result.source_map.as_ref().map(|map| map.to_string()),
                lazy: false,
            });
        }

        let data = codegen::module_source(result, is_client_arch);
        if !data.is_empty() {
            let source_path = output_path(&result.file_path, &self.options.raw.output_js_file_path)?;
            file.add_javascript(JavaScriptOutput {
                data,
                path: format!("{}.js", source_path),
                source_path,
                lazy: result.is_lazy,
                bare: false,
            });
        }

        Ok(())
    }

    fn begin_build(&mut self) {
        self.profiling = ProfilingResults::default();
        if !self.options.raw.cache.enable_cache {
            self.cache.clear();
        }
    }

    fn start_build(&self, default_arch: &str) -> Result<Build> {
        Ok(Build {
            registry: FileRegistry::new(&self.options, default_arch),
            preprocessors: preprocessor::configured_preprocessors(&self.options, &self.renderers)?,
            modules: CssModulesProcessor::with_transform(&self.options, Rc::clone(&self.transform))?,
        })
    }

    /// Kept when an include pattern matches, or when no ignore pattern does.
    fn keep_file(&self, path_in_package: &str) -> bool {
        utils::matches_any(&self.options.include_paths, path_in_package)
            || !utils::matches_any(&self.options.ignore_paths, path_in_package)
    }

    fn source_file(&self, input: &dyn InputFile, contents: &str) -> SourceFile {
        let path_in_package = input.path_in_package();
        let path = if utils::is_absolute(path_in_package) {
            self.resolver.absolute_import_path(path_in_package)
        } else {
            self.resolver
                .import_path_in_package(input.package_name(), path_in_package)
        };

        let mut file = SourceFile::new(path, path_in_package, input.arch(), contents)
            .with_contents(self.options.prepare_contents(contents))
            .with_file_options(input.file_options());
        file.is_lazy = codegen::is_lazy_path(path_in_package);
        file
    }

    /// Files with a handled extension below every explicit-include folder,
    /// attributed to the input file at `backing`.
    fn discover(&self, backing: Option<usize>) -> Result<Vec<IncludedFile>> {
        let mut included = Vec::new();
        if self.options.raw.explicit_includes.is_empty() {
            return Ok(included);
        }
        let Some(backing) = backing else {
            log::warn!("No input files to attribute explicitly included files to; skipping explicit includes");
            return Ok(included);
        };

        for folder in &self.options.raw.explicit_includes {
            let root = self.resolver.absolute_import_path(folder);
            if !Path::new(&root).is_dir() {
                return Err(CompilerError::Discovery {
                    path: root,
                    message: "explicit include folder does not exist".to_string(),
                });
            }

            for entry in WalkDir::new(&root).sort_by_file_name() {
                let entry = entry.map_err(|e| CompilerError::Discovery {
                    path: root.clone(),
                    message: e.to_string(),
                })?;
                if !entry.file_type().is_file() {
                    continue;
                }
                let path = utils::normalize_slashes(&entry.path().to_string_lossy());
                if !self.options.handles_extension(&path) {
                    continue;
                }
                log::debug!("Including {} from {}", path, folder);
                included.push(IncludedFile::load(&path, backing).map_err(|e| {
                    CompilerError::Discovery {
                        path: path.clone(),
                        message: e.to_string(),
                    }
                })?);
            }
        }

        Ok(included)
    }

    /// Classify, consult the cache and preprocess. Returns the file still to
    /// be scoped, or `None` when the unit is finished (partial, cache hit or
    /// failure).
    fn prepare_unit(
        &mut self,
        build: &mut Build,
        input: &mut dyn InputFile,
        report: &mut BuildReport,
    ) -> Option<Prepared> {
        let source = self.source_file(input, input.contents());
        let role = preprocessor::classify(&build.preprocessors, &source);
        if role == FileRole::Partial {
            log::debug!("Skipping partial {}", source.path);
            report.skipped += 1;
            return None;
        }

        let key = BuildCache::key(&self.options.hash, &input.source_hash());
        let registry = &mut build.registry;
        if let Some(result) = self
            .cache
            .get(&source.path, &key, &mut |dependency| dependency_hash(registry, dependency))
        {
            log::debug!("Reusing cached output for {}", source.path);
            match self.add_compile_result(input, &result) {
                Ok(()) => report.cached += 1,
                Err(e) => report_failure(input, e, report),
            }
            return None;
        }

        match self.preprocess(build, source, role) {
            Ok(file) => Some(Prepared { file, key }),
            Err(e) => {
                report_failure(input, e, report);
                None
            }
        }
    }

    /// Scope a prepared file, emit its artifacts and store them in the cache.
    fn emit_unit(
        &mut self,
        build: &mut Build,
        input: &mut dyn InputFile,
        prepared: Prepared,
        report: &mut BuildReport,
    ) {
        let Prepared { file, key } = prepared;
        let path = file.path.clone();
        let outcome = self.resolve(build, file, true).and_then(|file| {
            let result = codegen::generate_output(&file, self.options.is_client_arch(&file.arch))?;
            Ok((file, result))
        });

        match outcome {
            Ok((file, result)) => {
                if let Err(e) = self.add_compile_result(input, &result) {
                    report_failure(input, e, report);
                    return;
                }
                let dependencies: BTreeMap<String, String> = file
                    .referenced_import_paths
                    .iter()
                    .filter_map(|dependency| {
                        dependency_hash(&mut build.registry, dependency)
                            .map(|hash| (dependency.clone(), hash))
                    })
                    .collect();
                self.cache.insert(&path, &key, result, dependencies);
                report.compiled += 1;
            }
            Err(e) => report_failure(input, e, report),
        }
    }

    fn compile_one_file(
        &mut self,
        build: &mut Build,
        file: SourceFile,
        role: FileRole,
        transpile_css_modules: bool,
    ) -> Result<SourceFile> {
        let file = self.preprocess(build, file, role)?;
        self.resolve(build, file, transpile_css_modules)
    }

    fn preprocess(&mut self, build: &mut Build, file: SourceFile, role: FileRole) -> Result<SourceFile> {
        match role {
            FileRole::Root(index) => {
                let started = Instant::now();
                let file = build.preprocessors[index].process(file, &mut build.registry)?;
                self.profiling.preprocessing += started.elapsed();
                Ok(file)
            }
            FileRole::Plain | FileRole::Partial => Ok(file),
        }
    }

    fn resolve(&mut self, build: &mut Build, file: SourceFile, transpile_css_modules: bool) -> Result<SourceFile> {
        if !transpile_css_modules {
            return Ok(file);
        }
        let started = Instant::now();
        let file = build
            .modules
            .process_with(file, &mut build.registry, &mut build.preprocessors)?;
        self.profiling.css_modules += started.elapsed();
        Ok(file)
    }
}

impl std::fmt::Debug for CssModulesBuildPlugin {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CssModulesBuildPlugin")
            .field("base_path", &self.options.base_path)
            .field("options_hash", &self.options.hash)
            .field("renderers", &self.renderers)
            .field("cache", &self.cache)
            .finish()
    }
}

/// Hash of a dependency's raw text as the registry sees it now.
fn dependency_hash(registry: &mut FileRegistry, path: &str) -> Option<String> {
    registry
        .get_or_load(path)
        .ok()
        .map(|file| utils::content_hash(&file.raw_contents))
}

fn report_failure(input: &mut dyn InputFile, error: CompilerError, report: &mut BuildReport) {
    let failure = FileError {
        message: error.to_string(),
        source_path: input.path_in_package().to_string(),
    };
    input.error(failure.clone());
    report.failed += 1;
    report.failures.push(failure);
}
