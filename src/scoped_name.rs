//! Scoped class name generation
//!
//! A scoped name is derived only from the file's path and the local class
//! name, so the same input always produces the same output across builds.
//! The value is embedded in both the CSS and the generated module; the two
//! must agree byte for byte.

use crate::error::{CompilerError, Result};
use crate::options::ResolvedOptions;
use crate::utils;
use regex::Regex;

/// One configured text-replacement rule applied to generated names.
#[derive(Debug, Clone)]
pub struct TextReplacer {
    regex: Regex,
    replacement: String,
    replace_all: bool,
}

impl TextReplacer {
    pub fn new(regex: Regex, replacement: impl Into<String>, replace_all: bool) -> Self {
        Self {
            regex,
            replacement: replacement.into(),
            replace_all,
        }
    }

    pub fn apply(&self, text: &str) -> String {
        if self.replace_all {
            self.regex.replace_all(text, self.replacement.as_str()).into_owned()
        } else {
            self.regex.replace(text, self.replacement.as_str()).into_owned()
        }
    }
}

/// A piece of a name template.
#[derive(Debug, Clone, PartialEq, Eq)]
enum Segment {
    Literal(String),
    /// The sanitized file path.
    Path,
    /// The sanitized file name.
    Name,
    /// The local class name.
    Local,
    /// Short hash of the file path.
    Hash,
}

fn parse_template(mut input: &str) -> Result<Vec<Segment>> {
    let mut segments = Vec::new();
    let mut index = 0;
    while !input.is_empty() {
        if input.starts_with('[') {
            let end = input.find(']').ok_or_else(|| {
                CompilerError::invalid_format(format!(
                    "Unclosed bracket in class name template at index {}",
                    index
                ))
            })?;
            let segment = match &input[..=end] {
                "[path]" => Segment::Path,
                "[name]" => Segment::Name,
                "[local]" => Segment::Local,
                "[hash]" => Segment::Hash,
                other => {
                    return Err(CompilerError::invalid_format(format!(
                        "Unknown placeholder \"{}\" in class name template at index {}",
                        other, index
                    )))
                }
            };
            segments.push(segment);
            index += end + 1;
            input = &input[end + 1..];
        } else {
            let end = input.find('[').unwrap_or(input.len());
            segments.push(Segment::Literal(input[..end].to_string()));
            index += end;
            input = &input[end..];
        }
    }
    Ok(segments)
}

#[derive(Debug, Clone)]
pub struct ScopedNameGenerator {
    base_path: String,
    replacements: Vec<TextReplacer>,
    template: Option<Vec<Segment>>,
    empty_package_prefix: Regex,
    package_prefix: Regex,
    extension: Regex,
    non_word: Regex,
}

impl ScopedNameGenerator {
    pub fn new(
        base_path: &str,
        replacements: Vec<TextReplacer>,
        template: Option<&str>,
    ) -> Result<Self> {
        Ok(Self {
            base_path: utils::normalize_slashes(base_path).trim_end_matches('/').to_string(),
            replacements,
            template: template.map(parse_template).transpose()?,
            empty_package_prefix: Regex::new(r"^.*\{\}[/\\]").unwrap(),
            package_prefix: Regex::new(r"^.*\{.*?\}").unwrap(),
            extension: Regex::new(r"\.[^./\\]+$").unwrap(),
            non_word: Regex::new(r"[\W_]+").unwrap(),
        })
    }

    pub fn from_options(options: &ResolvedOptions) -> Result<Self> {
        Self::new(
            &options.base_path,
            options.class_name_replacements.clone(),
            options.raw.css_class_naming_convention.template.as_deref(),
        )
    }

    /// Scoped name for `local` declared in the file at `file_path`.
    pub fn generate(&self, local: &str, file_path: &str) -> Result<String> {
        let sanitized_path = self.sanitized_path(file_path);
        let scoped = match &self.template {
            None => format!("_{}__{}", sanitized_path, local),
            Some(segments) => {
                let mut name = String::new();
                for segment in segments {
                    match segment {
                        Segment::Literal(text) => name.push_str(text),
                        Segment::Path => name.push_str(&sanitized_path),
                        Segment::Name => name.push_str(&self.sanitized_name(file_path)),
                        Segment::Local => name.push_str(local),
                        Segment::Hash => name.push_str(&utils::content_hash(&sanitized_path)[..8]),
                    }
                }
                name
            }
        };

        let scoped = self
            .replacements
            .iter()
            .fold(scoped, |name, replacer| replacer.apply(&name));

        if scoped.is_empty() || scoped.chars().any(char::is_whitespace) {
            return Err(CompilerError::ScopeGeneration {
                file: file_path.to_string(),
                class_name: local.to_string(),
                message: format!("generated name '{}' is not a valid class name", scoped),
            });
        }

        Ok(scoped)
    }

    /// Path relative to the base with package prefixes folded, extension
    /// stripped and non-word runs collapsed to `_`. A trailing file name gets
    /// a `__` separator so `ui/button/button.css` does not read as one word.
    fn sanitized_path(&self, file_path: &str) -> String {
        let file_path = utils::normalize_slashes(file_path);
        let relative = match file_path.strip_prefix(&self.base_path) {
            Some(rest) if rest.starts_with('/') => &rest[1..],
            _ => file_path.as_str(),
        };

        let path = self.empty_package_prefix.replace(relative, "");
        let path = self.package_prefix.replace(&path, "packages");
        let path = self.extension.replace(&path, "");
        let sanitized = self.sanitize(&path);

        let file_name = self.sanitized_name(&file_path);
        let suffix = format!("_{}", file_name);
        if !file_name.is_empty() && sanitized.ends_with(&suffix) {
            let head = &sanitized[..sanitized.len() - suffix.len()];
            format!("{}__{}", head, file_name)
        } else {
            sanitized
        }
    }

    fn sanitized_name(&self, file_path: &str) -> String {
        let name = utils::basename(file_path);
        let name = self.extension.replace(name, "");
        self.sanitize(&name)
    }

    fn sanitize(&self, text: &str) -> String {
        self.non_word
            .replace_all(text, "_")
            .trim_matches('_')
            .to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn generator() -> ScopedNameGenerator {
        ScopedNameGenerator::new("/app", Vec::new(), None).unwrap()
    }

    #[test]
    fn test_root_level_file() {
        let generator = generator();
        assert_eq!(generator.generate("test", "./test.css").unwrap(), "_test__test");
        assert_eq!(generator.generate("test2", "/app/test.css").unwrap(), "_test__test2");
    }

    #[test]
    fn test_nested_file_gets_name_separator() {
        let generator = generator();
        assert_eq!(
            generator.generate("button", "/app/client/ui/button.m.css").unwrap(),
            "_client_ui__button_m__button"
        );
        assert_eq!(
            generator.generate("title", "/app/client/header.css").unwrap(),
            "_client__header__title"
        );
    }

    #[test]
    fn test_package_paths_fold_to_packages() {
        let generator = generator();
        assert_eq!(
            generator.generate("x", "/app/{}/client/a.css").unwrap(),
            "_client__a__x"
        );
        assert_eq!(
            generator.generate("x", "/app/{acme:ui}/styles/a.css").unwrap(),
            "_packages_styles__a__x"
        );
    }

    #[test]
    fn test_local_name_kept_verbatim() {
        assert_eq!(generator().generate("test-two", "./test.css").unwrap(), "_test__test-two");
    }

    #[test]
    fn test_deterministic() {
        let generator = generator();
        let first = generator.generate("card", "/app/imports/ui/card.css").unwrap();
        let second = generator.generate("card", "/app/imports/ui/card.css").unwrap();
        assert_eq!(first, second);
        let other = ScopedNameGenerator::new("/app", Vec::new(), None).unwrap();
        assert_eq!(other.generate("card", "/app/imports/ui/card.css").unwrap(), first);
    }

    #[test]
    fn test_replacements_apply_in_order() {
        let replacements = vec![
            TextReplacer::new(Regex::new("^_imports_").unwrap(), "_", false),
            TextReplacer::new(Regex::new("_").unwrap(), "-", true),
        ];
        let generator = ScopedNameGenerator::new("/app", replacements, None).unwrap();
        assert_eq!(
            generator.generate("card", "/app/imports/ui/card.css").unwrap(),
            "-ui--card--card"
        );
    }

    #[test]
    fn test_template() {
        let generator = ScopedNameGenerator::new("/app", Vec::new(), Some("[name]_[local]_[hash]")).unwrap();
        let name = generator.generate("card", "/app/imports/ui/card.css").unwrap();
        assert!(name.starts_with("card_card_"));
        assert_eq!(name.len(), "card_card_".len() + 8);

        assert!(ScopedNameGenerator::new("/app", Vec::new(), Some("[nope]")).is_err());
        assert!(ScopedNameGenerator::new("/app", Vec::new(), Some("[local")).is_err());
    }

    #[test]
    fn test_empty_result_is_scope_error() {
        let replacements = vec![TextReplacer::new(Regex::new(".*").unwrap(), "", false)];
        let generator = ScopedNameGenerator::new("/app", replacements, None).unwrap();
        assert!(matches!(
            generator.generate("a", "/app/a.css"),
            Err(CompilerError::ScopeGeneration { .. })
        ));
    }
}
