//! CSS Modules Compiler
//!
//! Scopes the class names of stylesheets to the file that declares them,
//! resolves `composes` across files, optionally renders Sass-like, Stylus-like
//! and Less-like sources first, and emits a stylesheet plus a JavaScript module
//! exporting the class-name map for every compiled file.
//!
//! # Basic Usage
//!
//! ```no_run
//! use cssmc::{CssModulesBuildPlugin, DiskInputFile, ResolvedOptions, Result};
//!
//! fn main() -> Result<()> {
//!     let options = ResolvedOptions::with_base_path("/path/to/app")?;
//!     let mut plugin = CssModulesBuildPlugin::new(options);
//!     let mut files = vec![DiskInputFile::new(
//!         "client/button.css",
//!         "web.browser",
//!         ".button { color: red; }",
//!     )];
//!     let report = plugin.process_files_for_target(&mut files)?;
//!     assert_eq!(report.compiled, 1);
//!     Ok(())
//! }
//! ```
//!
//! # Build Pipeline
//!
//! 1. **Filter**: drop ignored files unless an include pattern keeps them
//! 2. **Discover**: add files from explicit-include folders
//! 3. **Preprocess**: render Sass/Stylus/Less roots to CSS; partials are skipped
//! 4. **Resolve**: scope class names and resolve `composes` (memoized per build)
//! 5. **Emit**: hand the stylesheet and generated module to the host

pub mod cache;
pub mod cli;
pub mod codegen;
pub mod error;
pub mod host;
pub mod modules;
pub mod options;
pub mod output_path;
pub mod path_resolver;
pub mod plugin;
pub mod preprocessor;
pub mod registry;
pub mod renderer;
pub mod scoped_name;
pub mod scoper;
pub mod types;
pub mod utils;

// Re-export commonly used types and functions
pub use cache::BuildCache;
pub use cli::CssmcCli;
pub use error::{CompilerError, ProcessingStep, Result};
pub use host::{DiskInputFile, IncludedFile, InputFile};
pub use modules::CssModulesProcessor;
pub use options::{Options, ResolvedOptions};
pub use path_resolver::PathResolver;
pub use plugin::{BuildReport, CssModulesBuildPlugin};
pub use preprocessor::{Preprocessor, StylesheetPreprocessor};
pub use registry::FileRegistry;
pub use renderer::{RendererRegistry, StylesheetRenderer};
pub use scoped_name::ScopedNameGenerator;
pub use scoper::{CssModulesTransform, SelectorTransform};
pub use types::*;

/// Compiler version information
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
pub const NAME: &str = env!("CARGO_PKG_NAME");
pub const DESCRIPTION: &str = env!("CARGO_PKG_DESCRIPTION");

/// Compile a single stylesheet held in memory as if it lived at
/// `path_in_package` below `base_path`.
pub fn compile_source(base_path: &str, path_in_package: &str, source: &str) -> Result<CompileResult> {
    let options = ResolvedOptions::with_base_path(base_path)?;
    let mut plugin = CssModulesBuildPlugin::new(options);
    let backing = DiskInputFile::new(path_in_package, "web.browser", source);
    plugin.compile_from_source(source, &backing, true)
}
