//! Error types for the CSS modules compiler

use std::fmt;
use thiserror::Error;

/// The stage of the pipeline that produced a failure.
///
/// Printed in the failure banner so that a broken file can be attributed to
/// the right transform when several are chained.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProcessingStep {
    SassCompilation,
    StylusCompilation,
    LessCompilation,
    CssModulesCompilation,
}

impl fmt::Display for ProcessingStep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ProcessingStep::SassCompilation => "Sass compilation",
            ProcessingStep::StylusCompilation => "Stylus compilation",
            ProcessingStep::LessCompilation => "Less compilation",
            ProcessingStep::CssModulesCompilation => "CSS modules compilation",
        };
        f.write_str(name)
    }
}

#[derive(Error, Debug)]
pub enum CompilerError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Unable to resolve '{specifier}': {message}{}", format_candidates(.candidates))]
    Resolution {
        specifier: String,
        message: String,
        candidates: Vec<String>,
    },

    #[error("{step} error in {file} at line {line}, column {column}: {message}")]
    Transform {
        step: ProcessingStep,
        file: String,
        line: usize,
        column: usize,
        message: String,
    },

    #[error("Missing dependency for {feature}: {dependency}")]
    MissingDependency { feature: String, dependency: String },

    #[error("Scope generation failed for '{class_name}' in {file}: {message}")]
    ScopeGeneration {
        file: String,
        class_name: String,
        message: String,
    },

    #[error("No {kind} registered under the name '{name}'")]
    UnregisteredCapability { kind: String, name: String },

    #[error("Discovery error in {path}: {message}")]
    Discovery { path: String, message: String },

    #[error("File not found: {path}")]
    FileNotFound { path: String },

    #[error("Invalid format: {message}")]
    InvalidFormat { message: String },

    #[error("{failed} file(s) failed to compile")]
    BuildFailed { failed: usize },
}

pub type Result<T> = std::result::Result<T, CompilerError>;

fn format_candidates(candidates: &[String]) -> String {
    if candidates.is_empty() {
        return String::new();
    }
    let mut out = String::from(" (tried:");
    for candidate in candidates {
        out.push(' ');
        out.push_str(candidate);
    }
    out.push(')');
    out
}

impl CompilerError {
    pub fn resolution(specifier: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Resolution {
            specifier: specifier.into(),
            message: message.into(),
            candidates: Vec::new(),
        }
    }

    pub fn resolution_with_candidates(
        specifier: impl Into<String>,
        message: impl Into<String>,
        candidates: Vec<String>,
    ) -> Self {
        Self::Resolution {
            specifier: specifier.into(),
            message: message.into(),
            candidates,
        }
    }

    pub fn transform(
        step: ProcessingStep,
        file: impl Into<String>,
        line: usize,
        column: usize,
        message: impl Into<String>,
    ) -> Self {
        Self::Transform {
            step,
            file: file.into(),
            line,
            column,
            message: message.into(),
        }
    }

    pub fn invalid_format(message: impl Into<String>) -> Self {
        Self::InvalidFormat {
            message: message.into(),
        }
    }

    /// Shift the line of a transform error back by the number of lines an
    /// injected prelude added in front of the real source.
    pub fn with_line_offset(self, offset: usize) -> Self {
        match self {
            Self::Transform {
                step,
                file,
                line,
                column,
                message,
            } => Self::Transform {
                step,
                file,
                line: line.saturating_sub(offset).max(1),
                column,
                message,
            },
            other => other,
        }
    }

    /// Line and column of the failure, when the error carries them.
    pub fn location(&self) -> Option<(usize, usize)> {
        match self {
            Self::Transform { line, column, .. } => Some((*line, *column)),
            _ => None,
        }
    }
}

const BANNER_RULE: &str = "/~~~~~~~~~~~~~~~~~~~~~~~~~~~~~~~~~~~~~";

/// Print the per-file failure banner naming the stage and the offending file.
pub fn log_failure_banner(step: ProcessingStep, path: &str, error: &CompilerError) {
    log::error!("\n{}", BANNER_RULE);
    log::error!("Processing Step: {}", step);
    match error.location() {
        Some((line, column)) => log::error!(
            "Unable to compile {}\nLine: {}, Column: {}\n{}",
            path,
            line,
            column,
            error
        ),
        None => log::error!("Unable to compile {}\n{}", path, error),
    }
    log::error!("\n{}", BANNER_RULE);
}
