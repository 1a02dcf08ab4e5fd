//! Output path templates for emitted artifacts

use crate::error::{CompilerError, Result};
use crate::options::{OutputPathTemplate, DEFAULT_OUTPUT_PATH_TEMPLATE};
use crate::utils;
use regex::Regex;

/// Expand the template that applies to `file_path`. Placeholders:
/// `{dirname}`, `{basename}` (without extension) and `{extname}`.
pub fn output_path(file_path: &str, templates: &OutputPathTemplate) -> Result<String> {
    let template = select_template(file_path, templates)?;
    let extname = utils::extname(file_path);
    let base = utils::basename(file_path);
    let basename = &base[..base.len() - extname.len()];

    Ok(template
        .replace("{dirname}", utils::dirname(file_path))
        .replace("{basename}", basename)
        .replace("{extname}", extname))
}

fn select_template<'a>(file_path: &str, templates: &'a OutputPathTemplate) -> Result<&'a str> {
    match templates {
        OutputPathTemplate::Single(template) => Ok(template.as_str()),
        OutputPathTemplate::ByPattern(by_pattern) => {
            for (pattern, template) in by_pattern {
                if pattern == "default" {
                    continue;
                }
                let regex = Regex::new(pattern).map_err(|e| {
                    CompilerError::invalid_format(format!("Invalid output path pattern '{}': {}", pattern, e))
                })?;
                if regex.is_match(file_path) {
                    return Ok(template.as_str());
                }
            }
            Ok(by_pattern
                .get("default")
                .map(String::as_str)
                .unwrap_or(DEFAULT_OUTPUT_PATH_TEMPLATE))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;

    #[test]
    fn test_default_template_is_identity() {
        let path = output_path("client/ui/button.m.css", &OutputPathTemplate::default()).unwrap();
        assert_eq!(path, "client/ui/button.m.css");
    }

    #[test]
    fn test_single_template() {
        let template = OutputPathTemplate::Single("{dirname}/compiled/{basename}".into());
        assert_eq!(output_path("client/a.scss", &template).unwrap(), "client/compiled/a");
    }

    #[test]
    fn test_pattern_templates_and_default() {
        let mut map = BTreeMap::new();
        map.insert("^imports/".to_string(), "{dirname}/lazy-{basename}{extname}".to_string());
        map.insert("default".to_string(), "out/{basename}{extname}".to_string());
        let template = OutputPathTemplate::ByPattern(map);

        assert_eq!(output_path("imports/a.css", &template).unwrap(), "imports/lazy-a.css");
        assert_eq!(output_path("client/a.css", &template).unwrap(), "out/a.css");
    }
}
