//! Host collaborator interface
//!
//! The build reads its inputs through [`InputFile`] and hands artifacts and
//! file-scoped errors back through the same handle. [`DiskInputFile`] is the
//! implementation used by the command line front-end and by tests; it simply
//! collects whatever the build emits.

use crate::error::Result;
use crate::types::{FileError, FileOptions, JavaScriptOutput, StylesheetOutput};
use crate::utils;
use std::fs;
use std::path::Path;

pub trait InputFile {
    /// Path relative to the package (or project) root, forward slashes.
    fn path_in_package(&self) -> &str;

    fn contents(&self) -> &str;

    /// Architecture tag of the compile unit.
    fn arch(&self) -> &str;

    fn file_options(&self) -> FileOptions {
        FileOptions::default()
    }

    fn source_hash(&self) -> String {
        utils::content_hash(self.contents())
    }

    /// Owning package for package files, `None` for application files.
    fn package_name(&self) -> Option<&str> {
        None
    }

    fn add_stylesheet(&mut self, output: StylesheetOutput);

    fn add_javascript(&mut self, output: JavaScriptOutput);

    fn error(&mut self, error: FileError);
}

/// An input file held in memory that records every emitted artifact.
#[derive(Debug, Clone, Default)]
pub struct DiskInputFile {
    pub path_in_package: String,
    pub arch: String,
    pub contents: String,
    pub package_name: Option<String>,
    pub file_options: FileOptions,
    pub stylesheets: Vec<StylesheetOutput>,
    pub javascripts: Vec<JavaScriptOutput>,
    pub errors: Vec<FileError>,
}

impl DiskInputFile {
    pub fn new(
        path_in_package: impl Into<String>,
        arch: impl Into<String>,
        contents: impl Into<String>,
    ) -> Self {
        Self {
            path_in_package: utils::normalize_slashes(&path_in_package.into()),
            arch: arch.into(),
            contents: contents.into(),
            ..Default::default()
        }
    }

    /// Read `path_in_package` below `base_path`.
    pub fn load(base_path: &Path, path_in_package: &str, arch: &str) -> Result<Self> {
        let contents = fs::read_to_string(base_path.join(path_in_package))?;
        Ok(Self::new(path_in_package, arch, contents))
    }

    pub fn with_package_name(mut self, package_name: impl Into<String>) -> Self {
        self.package_name = Some(package_name.into());
        self
    }

    pub fn with_file_options(mut self, file_options: FileOptions) -> Self {
        self.file_options = file_options;
        self
    }

    pub fn has_errors(&self) -> bool {
        !self.errors.is_empty()
    }
}

impl InputFile for DiskInputFile {
    fn path_in_package(&self) -> &str {
        &self.path_in_package
    }

    fn contents(&self) -> &str {
        &self.contents
    }

    fn arch(&self) -> &str {
        &self.arch
    }

    fn file_options(&self) -> FileOptions {
        self.file_options.clone()
    }

    fn package_name(&self) -> Option<&str> {
        self.package_name.as_deref()
    }

    fn add_stylesheet(&mut self, output: StylesheetOutput) {
        self.stylesheets.push(output);
    }

    fn add_javascript(&mut self, output: JavaScriptOutput) {
        self.javascripts.push(output);
    }

    fn error(&mut self, error: FileError) {
        log::error!("{}: {}", error.source_path, error.message);
        self.errors.push(error);
    }
}

/// A file pulled in from an explicit-include folder. It is not one of the
/// host's inputs, so artifacts and errors go through a backing input file.
#[derive(Debug, Clone)]
pub struct IncludedFile {
    /// Discovered path; also used as the path in package.
    pub path: String,
    pub contents: String,
    /// Index of the backing file in the build's input list.
    pub backing: usize,
}

impl IncludedFile {
    pub fn load(path: &str, backing: usize) -> Result<Self> {
        Ok(Self {
            path: utils::normalize_slashes(path),
            contents: fs::read_to_string(path)?,
            backing,
        })
    }

    /// Borrow the backing file for emitting this file's results.
    pub fn attach<'a>(&'a self, backing: &'a mut dyn InputFile) -> BackedInclude<'a> {
        BackedInclude {
            file: self,
            backing,
        }
    }
}

pub struct BackedInclude<'a> {
    file: &'a IncludedFile,
    backing: &'a mut dyn InputFile,
}

impl InputFile for BackedInclude<'_> {
    fn path_in_package(&self) -> &str {
        &self.file.path
    }

    fn contents(&self) -> &str {
        &self.file.contents
    }

    fn arch(&self) -> &str {
        self.backing.arch()
    }

    fn add_stylesheet(&mut self, output: StylesheetOutput) {
        self.backing.add_stylesheet(output);
    }

    fn add_javascript(&mut self, output: JavaScriptOutput) {
        self.backing.add_javascript(output);
    }

    fn error(&mut self, mut error: FileError) {
        error.message = format!("Explicitly imported file error: {}", error.message);
        self.backing.error(error);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_disk_input_file_load() {
        let temp_dir = TempDir::new().unwrap();
        fs::create_dir_all(temp_dir.path().join("client")).unwrap();
        fs::write(temp_dir.path().join("client/a.css"), ".a{}").unwrap();

        let file = DiskInputFile::load(temp_dir.path(), "client/a.css", "web.browser").unwrap();
        assert_eq!(file.contents(), ".a{}");
        assert_eq!(file.source_hash(), utils::content_hash(".a{}"));
        assert_eq!(file.package_name(), None);
    }

    #[test]
    fn test_included_file_forwards_to_backing() {
        let mut backing = DiskInputFile::new("client/main.css", "web.browser", "");
        let included = IncludedFile {
            path: "/lib/styles/a.css".into(),
            contents: ".a{}".into(),
            backing: 0,
        };

        {
            let mut attached = included.attach(&mut backing);
            assert_eq!(attached.path_in_package(), "/lib/styles/a.css");
            assert_eq!(attached.arch(), "web.browser");
            attached.add_javascript(JavaScriptOutput {
                data: String::new(),
                path: "/lib/styles/a.css.js".into(),
                source_path: "/lib/styles/a.css".into(),
                lazy: false,
                bare: false,
            });
            attached.error(FileError {
                message: "boom".into(),
                source_path: "/lib/styles/a.css".into(),
            });
        }

        assert_eq!(backing.javascripts.len(), 1);
        assert_eq!(
            backing.errors[0].message,
            "Explicitly imported file error: boom"
        );
    }
}
