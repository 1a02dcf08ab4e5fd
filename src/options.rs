//! Compiler configuration: the recognised option surface, its defaults,
//! loading from disk and the derived values every component needs.

use crate::error::{CompilerError, Result};
use crate::renderer::RendererRegistry;
use crate::scoped_name::TextReplacer;
use crate::utils;
use regex::{Regex, RegexBuilder};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::path::Path;

/// Ignore pattern applied to every build: test/doc/example folders that ship
/// inside dependency trees.
pub const DEFAULT_IGNORE_PATTERN: &str =
    r"node_modules/.+/(test|tests|doc|docs|example|examples)/";

pub const DEFAULT_OUTPUT_PATH_TEMPLATE: &str = "{dirname}/{basename}{extname}";

/// A preprocessing switch: either on/off, or on for a list of extensions.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum CompilationToggle {
    Enabled(bool),
    Extensions(Vec<String>),
}

impl CompilationToggle {
    pub fn is_enabled(&self) -> bool {
        match self {
            CompilationToggle::Enabled(enabled) => *enabled,
            CompilationToggle::Extensions(extensions) => !extensions.is_empty(),
        }
    }

    /// Whether a file path is claimed by this switch.
    pub fn matches(&self, path: &str) -> bool {
        match self {
            CompilationToggle::Enabled(enabled) => *enabled,
            CompilationToggle::Extensions(extensions) => {
                extensions.iter().any(|extension| path.ends_with(extension.as_str()))
            }
        }
    }
}

/// A path pattern: a bare regex, or `[regex, flags]`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum PatternSpec {
    Pattern(String),
    WithFlags(Vec<String>),
}

impl PatternSpec {
    pub fn compile(&self) -> Result<Regex> {
        let (pattern, flags) = match self {
            PatternSpec::Pattern(pattern) => (pattern.as_str(), ""),
            PatternSpec::WithFlags(parts) => match parts.as_slice() {
                [pattern] => (pattern.as_str(), ""),
                [pattern, flags] => (pattern.as_str(), flags.as_str()),
                _ => {
                    return Err(CompilerError::invalid_format(format!(
                        "Path pattern must be a string or [pattern, flags], got {:?}",
                        parts
                    )))
                }
            },
        };
        build_regex(pattern, flags)
    }
}

/// A class-name replacement rule: a bare regex (matches are removed),
/// `[regex, replacement]` or `[regex, flags, replacement]`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ReplacementSpec {
    Remove(String),
    Rule(Vec<String>),
}

impl ReplacementSpec {
    pub fn compile(&self) -> Result<TextReplacer> {
        let (pattern, flags, replacement) = match self {
            ReplacementSpec::Remove(pattern) => (pattern.as_str(), "", ""),
            ReplacementSpec::Rule(parts) => match parts.as_slice() {
                [pattern] => (pattern.as_str(), "", ""),
                [pattern, replacement] => (pattern.as_str(), "", replacement.as_str()),
                [pattern, flags, replacement] => {
                    (pattern.as_str(), flags.as_str(), replacement.as_str())
                }
                _ => {
                    return Err(CompilerError::invalid_format(format!(
                        "Replacement must be a string or [pattern, (flags,) replacement], got {:?}",
                        parts
                    )))
                }
            },
        };
        Ok(TextReplacer::new(
            build_regex(pattern, flags)?,
            replacement,
            flags.contains('g'),
        ))
    }
}

/// Where emitted artifacts go: one template, or regex-keyed templates with a
/// `default` entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum OutputPathTemplate {
    Single(String),
    ByPattern(BTreeMap<String, String>),
}

impl Default for OutputPathTemplate {
    fn default() -> Self {
        OutputPathTemplate::Single(DEFAULT_OUTPUT_PATH_TEMPLATE.to_string())
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct JsClassNamingConvention {
    pub camel_case: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct CssClassNamingConvention {
    pub replacements: Vec<ReplacementSpec>,
    pub template: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct CacheOptions {
    pub enable_cache: bool,
}

impl Default for CacheOptions {
    fn default() -> Self {
        Self { enable_cache: true }
    }
}

/// The user-facing configuration, exactly as written in the config file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Options {
    pub css_class_naming_convention: CssClassNamingConvention,
    pub enable_profiling: bool,
    pub enable_sass_compilation: CompilationToggle,
    pub enable_stylus_compilation: CompilationToggle,
    pub enable_less_compilation: CompilationToggle,
    pub explicit_includes: Vec<String>,
    pub extensions: Vec<String>,
    pub global_variables: Vec<serde_json::Value>,
    pub global_variables_text: String,
    pub ignore_paths: Vec<PatternSpec>,
    pub include_paths: Vec<PatternSpec>,
    pub js_class_naming_convention: JsClassNamingConvention,
    pub output_js_file_path: OutputPathTemplate,
    pub output_css_file_path: OutputPathTemplate,
    pub passthrough_paths: Vec<PatternSpec>,
    pub specific_architecture: String,
    pub cache: CacheOptions,
}

impl Default for Options {
    fn default() -> Self {
        Self {
            css_class_naming_convention: CssClassNamingConvention::default(),
            enable_profiling: false,
            enable_sass_compilation: CompilationToggle::Extensions(vec![
                "scss".to_string(),
                "sass".to_string(),
            ]),
            enable_stylus_compilation: CompilationToggle::Extensions(vec![
                "styl".to_string(),
                "m.styl".to_string(),
            ]),
            enable_less_compilation: CompilationToggle::Enabled(false),
            explicit_includes: Vec::new(),
            extensions: vec!["css".to_string(), "m.css".to_string(), "mss".to_string()],
            global_variables: Vec::new(),
            global_variables_text: String::new(),
            ignore_paths: Vec::new(),
            include_paths: Vec::new(),
            js_class_naming_convention: JsClassNamingConvention::default(),
            output_js_file_path: OutputPathTemplate::default(),
            output_css_file_path: OutputPathTemplate::default(),
            passthrough_paths: Vec::new(),
            specific_architecture: "web".to_string(),
            cache: CacheOptions::default(),
        }
    }
}

/// Options after loading: patterns compiled, prelude assembled, preprocessing
/// switches checked against the registered renderers, fingerprint computed.
///
/// Passed explicitly into every component; nothing reads options from a
/// global.
#[derive(Debug, Clone)]
pub struct ResolvedOptions {
    pub raw: Options,
    /// Project root every import path and scoped name is computed against.
    pub base_path: String,
    pub ignore_paths: Vec<Regex>,
    pub include_paths: Vec<Regex>,
    pub passthrough_paths: Vec<Regex>,
    pub class_name_replacements: Vec<TextReplacer>,
    pub enable_sass_compilation: CompilationToggle,
    pub enable_stylus_compilation: CompilationToggle,
    pub enable_less_compilation: CompilationToggle,
    /// Text prepended to every stylesheet.
    pub global_variables_text: String,
    pub global_variables_text_line_count: usize,
    pub hash: String,
}

impl Options {
    /// Turn the raw configuration into the value the build runs with.
    pub fn resolve(self, base_path: &str, renderers: &RendererRegistry) -> Result<ResolvedOptions> {
        let base_path = utils::normalize_slashes(base_path)
            .trim_end_matches('/')
            .to_string();

        let global_variables_text = assemble_global_variables(&self, &base_path)?;
        let global_variables_text_line_count = if global_variables_text.is_empty() {
            0
        } else {
            utils::line_count(&global_variables_text)
        };

        let mut ignore_paths = vec![build_regex(DEFAULT_IGNORE_PATTERN, "")?];
        ignore_paths.extend(compile_patterns(&self.ignore_paths)?);
        let include_paths = compile_patterns(&self.include_paths)?;
        let passthrough_paths = compile_patterns(&self.passthrough_paths)?;
        let class_name_replacements = self
            .css_class_naming_convention
            .replacements
            .iter()
            .map(ReplacementSpec::compile)
            .collect::<Result<Vec<_>>>()?;

        let enable_sass_compilation = check_compilation(
            &self.enable_sass_compilation,
            &self.extensions,
            "sass",
            "enableSassCompilation",
            renderers,
        );
        let enable_stylus_compilation = check_compilation(
            &self.enable_stylus_compilation,
            &self.extensions,
            "stylus",
            "enableStylusCompilation",
            renderers,
        );
        let enable_less_compilation = check_compilation(
            &self.enable_less_compilation,
            &self.extensions,
            "less",
            "enableLessCompilation",
            renderers,
        );

        let serialized = serde_json::to_string(&self).map_err(|e| {
            CompilerError::invalid_format(format!("Unable to serialize options: {}", e))
        })?;
        let hash = utils::content_hash(&format!("{}\n{}", serialized, global_variables_text));

        log::debug!("Resolved options with hash {}", hash);

        Ok(ResolvedOptions {
            raw: self,
            base_path,
            ignore_paths,
            include_paths,
            passthrough_paths,
            class_name_replacements,
            enable_sass_compilation,
            enable_stylus_compilation,
            enable_less_compilation,
            global_variables_text,
            global_variables_text_line_count,
            hash,
        })
    }
}

impl ResolvedOptions {
    /// Default options rooted at `base_path`, with the built-in renderers.
    pub fn with_base_path(base_path: &str) -> Result<Self> {
        Options::default().resolve(base_path, &RendererRegistry::with_builtins())
    }

    /// Apply the global-variables prelude to raw file text.
    pub fn prepare_contents(&self, raw: &str) -> String {
        if self.global_variables_text.is_empty() {
            raw.to_string()
        } else {
            format!("{}\n\n{}", self.global_variables_text, raw)
        }
    }

    /// Lines the prelude pushes the real source down by.
    pub fn prelude_line_offset(&self) -> usize {
        if self.global_variables_text_line_count == 0 {
            0
        } else {
            self.global_variables_text_line_count + 1
        }
    }

    /// Whether an extension (without the dot) is handled by the compiler.
    pub fn handles_extension(&self, path: &str) -> bool {
        let name = utils::basename(path);
        self.raw
            .extensions
            .iter()
            .any(|extension| name.ends_with(&format!(".{}", extension)))
    }

    /// Whether the architecture tag names a client (browser) build.
    pub fn is_client_arch(&self, arch: &str) -> bool {
        arch.starts_with(self.raw.specific_architecture.as_str())
    }
}

fn build_regex(pattern: &str, flags: &str) -> Result<Regex> {
    RegexBuilder::new(pattern)
        .case_insensitive(flags.contains('i'))
        .multi_line(flags.contains('m'))
        .build()
        .map_err(|e| CompilerError::invalid_format(format!("Invalid pattern '{}': {}", pattern, e)))
}

fn compile_patterns(patterns: &[PatternSpec]) -> Result<Vec<Regex>> {
    patterns.iter().map(PatternSpec::compile).collect()
}

/// Keep a preprocessing switch only if it can actually take effect: it must
/// overlap the handled extensions (or be a plain `true`) and its renderer must
/// be registered. A missing renderer degrades the feature with a warning.
fn check_compilation(
    toggle: &CompilationToggle,
    extensions: &[String],
    renderer: &str,
    feature: &str,
    renderers: &RendererRegistry,
) -> CompilationToggle {
    let wanted = match toggle {
        CompilationToggle::Enabled(enabled) => *enabled,
        CompilationToggle::Extensions(list) => list.iter().any(|ext| extensions.contains(ext)),
    };
    if !wanted {
        return CompilationToggle::Enabled(false);
    }

    if !renderers.contains(renderer) {
        let error = CompilerError::MissingDependency {
            feature: feature.to_string(),
            dependency: renderer.to_string(),
        };
        log::warn!("{}; {} has been disabled", error, feature);
        return CompilationToggle::Enabled(false);
    }

    toggle.clone()
}

/// Build the prelude from `globalVariables` entries plus any literal
/// `globalVariablesText`.
fn assemble_global_variables(options: &Options, base_path: &str) -> Result<String> {
    let mut sections = Vec::new();

    for entry in &options.global_variables {
        match entry {
            serde_json::Value::Object(map) => sections.push(json_to_scss_variables(map)),
            serde_json::Value::String(file) => {
                let full_path = if utils::is_absolute(file) {
                    file.clone()
                } else {
                    format!("{}/{}", base_path, file)
                };
                let text = fs::read_to_string(&full_path).map_err(|e| {
                    CompilerError::FileNotFound {
                        path: format!("Global variables file {}: {}", full_path, e),
                    }
                })?;
                if utils::extname(file) == ".json" {
                    let parsed: serde_json::Value = serde_json::from_str(&text).map_err(|e| {
                        CompilerError::invalid_format(format!(
                            "Invalid JSON in global variables file {}: {}",
                            full_path, e
                        ))
                    })?;
                    match parsed {
                        serde_json::Value::Object(map) => sections.push(json_to_scss_variables(&map)),
                        _ => {
                            return Err(CompilerError::invalid_format(format!(
                                "Global variables file {} must contain an object",
                                full_path
                            )))
                        }
                    }
                } else {
                    sections.push(text);
                }
            }
            other => {
                return Err(CompilerError::invalid_format(format!(
                    "globalVariables entries must be objects or file paths, got {}",
                    other
                )))
            }
        }
    }

    if !options.global_variables_text.is_empty() {
        sections.push(options.global_variables_text.clone());
    }

    Ok(sections.join("\n"))
}

fn json_to_scss_variables(map: &serde_json::Map<String, serde_json::Value>) -> String {
    let mut text = String::new();
    for (name, value) in map {
        let value = match value {
            serde_json::Value::String(s) => s.clone(),
            other => other.to_string(),
        };
        text.push_str(&format!("${}: {};\n", name, value));
    }
    text
}

/// Load options from a `.json`, `.toml` or `package.json` file. For
/// `package.json` the `cssModules` key is used; a missing key means defaults.
pub fn load(config_path: &str) -> Result<Options> {
    let config_content = fs::read_to_string(config_path).map_err(|e| CompilerError::FileNotFound {
        path: format!("Config file {}: {}", config_path, e),
    })?;

    let options = if Path::new(config_path)
        .file_name()
        .map_or(false, |name| name == "package.json")
    {
        let package: serde_json::Value = serde_json::from_str(&config_content).map_err(|e| {
            CompilerError::invalid_format(format!("Invalid package.json: {}", e))
        })?;
        match package.get("cssModules") {
            Some(section) => serde_json::from_value(section.clone()).map_err(|e| {
                CompilerError::invalid_format(format!("Invalid cssModules options: {}", e))
            })?,
            None => Options::default(),
        }
    } else if config_path.ends_with(".json") {
        serde_json::from_str(&config_content)
            .map_err(|e| CompilerError::invalid_format(format!("Invalid JSON config: {}", e)))?
    } else if config_path.ends_with(".toml") {
        toml::from_str(&config_content)
            .map_err(|e| CompilerError::invalid_format(format!("Invalid TOML config: {}", e)))?
    } else {
        return Err(CompilerError::invalid_format(
            "Config file must be .json, .toml or package.json",
        ));
    };

    log::info!("Loaded configuration from {}", config_path);
    Ok(options)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_defaults_disable_preprocessors_outside_handled_extensions() {
        let resolved = ResolvedOptions::with_base_path("/app").unwrap();
        assert!(!resolved.enable_sass_compilation.is_enabled());
        assert!(!resolved.enable_stylus_compilation.is_enabled());
        assert!(!resolved.enable_less_compilation.is_enabled());
        assert!(resolved.handles_extension("client/a.m.css"));
        assert!(!resolved.handles_extension("client/a.scss"));
    }

    #[test]
    fn test_sass_kept_when_extensions_overlap() {
        let options = Options {
            extensions: vec!["css".into(), "scss".into()],
            ..Default::default()
        };
        let resolved = options.resolve("/app", &RendererRegistry::with_builtins()).unwrap();
        assert!(resolved.enable_sass_compilation.matches("client/a.scss"));
        assert!(!resolved.enable_sass_compilation.matches("client/a.css"));
    }

    #[test]
    fn test_missing_renderer_degrades_feature() {
        let options = Options {
            enable_sass_compilation: CompilationToggle::Enabled(true),
            ..Default::default()
        };
        let resolved = options.resolve("/app", &RendererRegistry::new()).unwrap();
        assert_eq!(resolved.enable_sass_compilation, CompilationToggle::Enabled(false));
    }

    #[test]
    fn test_deserialize_mixed_forms() {
        let json = r#"{
            "enableSassCompilation": true,
            "passthroughPaths": ["vendor/", ["LEGACY", "i"]],
            "cssClassNamingConvention": { "replacements": ["^_client_", ["_ui_", "g", "_"]] },
            "jsClassNamingConvention": { "camelCase": true },
            "outputCssFilePath": { "imports/": "{dirname}/lazy-{basename}", "default": "{dirname}/{basename}" }
        }"#;
        let options: Options = serde_json::from_str(json).unwrap();
        assert_eq!(options.enable_sass_compilation, CompilationToggle::Enabled(true));
        assert!(options.js_class_naming_convention.camel_case);
        assert_eq!(options.extensions, vec!["css", "m.css", "mss"]);

        let resolved = options.resolve("/app", &RendererRegistry::with_builtins()).unwrap();
        assert_eq!(resolved.passthrough_paths.len(), 2);
        assert!(resolved.passthrough_paths[1].is_match("/app/legacy/a.css"));
        assert_eq!(resolved.class_name_replacements.len(), 2);
    }

    #[test]
    fn test_default_ignore_pattern_always_present() {
        let resolved = ResolvedOptions::with_base_path("/app").unwrap();
        assert!(utils::matches_any(
            &resolved.ignore_paths,
            "node_modules/lib/test/a.css"
        ));
        assert!(!utils::matches_any(&resolved.ignore_paths, "client/test/a.css"));
    }

    #[test]
    fn test_global_variables_prelude() {
        let temp_dir = TempDir::new().unwrap();
        fs::write(temp_dir.path().join("vars.json"), r#"{"accent": "red"}"#).unwrap();
        fs::write(temp_dir.path().join("extra.scss"), "$gap: 4px;").unwrap();

        let options = Options {
            global_variables: vec![
                serde_json::json!({"primary": "blue"}),
                serde_json::json!("vars.json"),
                serde_json::json!("extra.scss"),
            ],
            ..Default::default()
        };
        let base = temp_dir.path().to_string_lossy().to_string();
        let resolved = options.resolve(&base, &RendererRegistry::with_builtins()).unwrap();

        assert!(resolved.global_variables_text.contains("$primary: blue;"));
        assert!(resolved.global_variables_text.contains("$accent: red;"));
        assert!(resolved.global_variables_text.contains("$gap: 4px;"));
        assert!(resolved.global_variables_text_line_count >= 3);

        let prepared = resolved.prepare_contents(".a { color: $primary; }");
        assert!(prepared.ends_with("\n\n.a { color: $primary; }"));
        assert_eq!(
            resolved.prelude_line_offset(),
            resolved.global_variables_text_line_count + 1
        );
    }

    #[test]
    fn test_hash_tracks_option_changes() {
        let registry = RendererRegistry::with_builtins();
        let a = Options::default().resolve("/app", &registry).unwrap();
        let b = Options::default().resolve("/app", &registry).unwrap();
        let c = Options {
            enable_profiling: true,
            ..Default::default()
        }
        .resolve("/app", &registry)
        .unwrap();
        assert_eq!(a.hash, b.hash);
        assert_ne!(a.hash, c.hash);
    }

    #[test]
    fn test_load_package_json_section() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("package.json");
        fs::write(
            &path,
            r#"{"name": "app", "cssModules": {"extensions": ["css", "scss"], "enableProfiling": true}}"#,
        )
        .unwrap();
        let options = load(path.to_str().unwrap()).unwrap();
        assert!(options.enable_profiling);
        assert_eq!(options.extensions, vec!["css", "scss"]);
    }

    #[test]
    fn test_load_toml_and_reject_unknown_format() {
        let temp_dir = TempDir::new().unwrap();
        let toml_path = temp_dir.path().join("cssmc.toml");
        fs::write(&toml_path, "extensions = [\"css\"]\nenableLessCompilation = true\n").unwrap();
        let options = load(toml_path.to_str().unwrap()).unwrap();
        assert_eq!(options.enable_less_compilation, CompilationToggle::Enabled(true));

        let yaml_path = temp_dir.path().join("cssmc.yaml");
        fs::write(&yaml_path, "extensions: []").unwrap();
        assert!(matches!(
            load(yaml_path.to_str().unwrap()),
            Err(CompilerError::InvalidFormat { .. })
        ));
    }
}
