//! Generated JavaScript module for a compiled stylesheet
//!
//! The module re-imports every direct `composes` dependency, registers the
//! stylesheet at runtime when it is loaded lazily on the client, and exports
//! the token map:
//!
//! ```text
//! import './base.css';
//! import modules from 'meteor/modules';
//! modules.addStyles(".x{}");
//! const styles = {"x":"_a__x"};
//! export { styles as default, styles };
//! ```

use crate::error::{CompilerError, Result};
use crate::types::{CompileResult, ExportTokenMap, SourceFile};

const STYLES_RUNTIME_IMPORT: &str = "import modules from 'meteor/modules';";

/// Files under an `imports` or `node_modules` segment are only loaded when
/// something imports them.
pub fn is_lazy_path(path_in_package: &str) -> bool {
    path_in_package
        .split('/')
        .any(|segment| segment == "imports" || segment == "node_modules")
}

pub fn imports_code(imports: &[String]) -> String {
    imports
        .iter()
        .map(|import| format!("import '{}';", import.replace('\\', "\\\\").replace('\'', "\\'")))
        .collect::<Vec<_>>()
        .join("\n")
}

pub fn stylesheet_code(css: &str) -> Result<String> {
    Ok(format!("{}\nmodules.addStyles({});", STYLES_RUNTIME_IMPORT, to_json(css)?))
}

pub fn tokens_code(tokens: &ExportTokenMap) -> Result<String> {
    Ok(format!(
        "const styles = {};\nexport {{ styles as default, styles }};",
        to_json(tokens)?
    ))
}

/// Build the cacheable description of everything a file emits.
pub fn generate_output(file: &SourceFile, is_client_arch: bool) -> Result<CompileResult> {
    let is_lazy = is_lazy_path(&file.path_in_package);

    let stylesheet_code = if is_lazy && is_client_arch && !file.contents.is_empty() {
        stylesheet_code(&file.contents)?
    } else {
        String::new()
    };
    let tokens_code = match &file.tokens {
        Some(tokens) => tokens_code(tokens)?,
        None => String::new(),
    };

    Ok(CompileResult {
        is_lazy,
        file_path: file.path_in_package.clone(),
        imports: file.imports.clone(),
        stylesheet: file.contents.clone(),
        source_map: file.source_map.clone(),
        tokens: file.tokens.clone(),
        imports_code: imports_code(&file.imports),
        stylesheet_code,
        tokens_code,
    })
}

/// Join the non-empty sections into the final module text. The runtime
/// stylesheet registration only ever ships to client architectures.
pub fn module_source(result: &CompileResult, is_client_arch: bool) -> String {
    let stylesheet = if is_client_arch {
        result.stylesheet_code.as_str()
    } else {
        ""
    };
    [result.imports_code.as_str(), stylesheet, result.tokens_code.as_str()]
        .iter()
        .filter(|section| !section.is_empty())
        .copied()
        .collect::<Vec<_>>()
        .join("\n")
}

fn to_json<T: serde::Serialize + ?Sized>(value: &T) -> Result<String> {
    serde_json::to_string(value)
        .map_err(|e| CompilerError::invalid_format(format!("Unable to encode generated code: {}", e)))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn scoped_file(path_in_package: &str, css: &str) -> SourceFile {
        let mut file = SourceFile::new(
            format!("/app/{}", path_in_package),
            path_in_package,
            "web.browser",
            css,
        );
        let mut tokens = ExportTokenMap::new();
        tokens.insert("test".into(), "_test__test".into());
        file.tokens = Some(tokens);
        file
    }

    #[test]
    fn test_lazy_paths() {
        assert!(is_lazy_path("imports/ui/button.css"));
        assert!(is_lazy_path("client/node_modules/lib/a.css"));
        assert!(!is_lazy_path("client/imports.css"));
        assert!(!is_lazy_path("client/main.css"));
    }

    #[test]
    fn test_eager_module_shape() {
        let mut file = scoped_file("client/test.css", "._test__test { color: red; }");
        file.imports = vec!["./base.css".into(), "./theme.css".into()];

        let result = generate_output(&file, true).unwrap();
        assert!(!result.is_lazy);
        assert!(result.stylesheet_code.is_empty());
        assert_eq!(
            module_source(&result, true),
            "import './base.css';\nimport './theme.css';\n\
             const styles = {\"test\":\"_test__test\"};\n\
             export { styles as default, styles };"
        );
    }

    #[test]
    fn test_lazy_client_file_registers_styles() {
        let file = scoped_file("imports/ui/test.css", ".a{color:\"red\"}");
        let result = generate_output(&file, true).unwrap();

        let source = module_source(&result, true);
        assert!(source.starts_with("import modules from 'meteor/modules';\n"));
        assert!(source.contains("modules.addStyles(\".a{color:\\\"red\\\"}\");"));
        assert!(source.ends_with("export { styles as default, styles };"));
    }

    #[test]
    fn test_server_arch_never_registers_styles() {
        let file = scoped_file("imports/ui/test.css", ".a{}");
        let result = generate_output(&file, false).unwrap();
        assert!(result.stylesheet_code.is_empty());
        assert!(!module_source(&result, false).contains("addStyles"));
    }

    #[test]
    fn test_empty_sections_are_omitted() {
        let file = SourceFile::new("/app/imports/empty.css", "imports/empty.css", "web.browser", "");
        let result = generate_output(&file, true).unwrap();
        assert_eq!(module_source(&result, true), "");
    }

    #[test]
    fn test_import_quotes_are_escaped() {
        assert_eq!(imports_code(&["./it's.css".to_string()]), "import './it\\'s.css';");
    }
}
