//! Stylesheet syntax tree shared by the built-in renderers, and the
//! evaluator that flattens it into plain CSS.

use super::Importer;
use crate::error::{CompilerError, ProcessingStep, Result};
use crate::utils;
use std::collections::HashMap;

/// Imports nested deeper than this are treated as a cycle.
const MAX_IMPORT_DEPTH: usize = 64;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Position {
    pub line: usize,
    pub column: usize,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Node {
    Declaration {
        property: String,
        value: String,
        at: Position,
    },
    Variable {
        name: String,
        value: String,
        default: bool,
        at: Position,
    },
    /// `@import` with its raw (still quoted) comma-separated targets.
    Import { targets: Vec<String>, at: Position },
    Rule {
        selector: String,
        children: Vec<Node>,
        at: Position,
    },
    AtRule {
        name: String,
        params: String,
        children: Option<Vec<Node>>,
        at: Position,
    },
}

/// How variable references look inside values.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VariableSyntax {
    /// `$name` / `@name`, plus `#{$name}` interpolation.
    Sigil(char),
    /// Any bare identifier that names a defined variable.
    Bare,
}

/// Parses one stylesheet's text into nodes; `file` is used in error reports.
pub type ParseFn<'a> = &'a dyn Fn(&str, &str) -> Result<Vec<Node>>;

/// At-rules whose body is scoped to the enclosing selector.
const CONDITIONAL_AT_RULES: &[&str] = &["media", "supports", "document", "container", "layer"];

pub struct Evaluator<'a> {
    syntax: VariableSyntax,
    step: ProcessingStep,
    importer: &'a mut dyn Importer,
    parse: ParseFn<'a>,
    scopes: Vec<HashMap<String, String>>,
    files: Vec<String>,
    css_imports: Vec<String>,
}

/// Output of evaluating one block: its own declarations and everything
/// nested inside it, already flattened.
#[derive(Default)]
struct BlockOutput {
    declarations: Vec<String>,
    nested: String,
}

impl<'a> Evaluator<'a> {
    pub fn new(
        syntax: VariableSyntax,
        step: ProcessingStep,
        importer: &'a mut dyn Importer,
        parse: ParseFn<'a>,
    ) -> Self {
        Self {
            syntax,
            step,
            importer,
            parse,
            scopes: vec![HashMap::new()],
            files: Vec::new(),
            css_imports: Vec::new(),
        }
    }

    /// Evaluate a parsed root stylesheet into CSS text.
    pub fn run(mut self, nodes: &[Node], file: &str) -> Result<String> {
        self.files.push(file.to_string());
        let mut body = String::new();
        self.eval_block(nodes, &[], 0, &mut body)?;

        let mut css = String::new();
        for target in &self.css_imports {
            css.push_str(&format!("@import {};\n", target));
        }
        css.push_str(&body);
        Ok(css)
    }

    fn current_file(&self) -> &str {
        self.files.last().map(String::as_str).unwrap_or("")
    }

    fn error(&self, at: Position, message: impl Into<String>) -> CompilerError {
        CompilerError::transform(self.step, self.current_file(), at.line, at.column, message)
    }

    fn eval_block(&mut self, nodes: &[Node], selectors: &[String], depth: usize, out: &mut String) -> Result<()> {
        self.scopes.push(HashMap::new());
        let mut block = BlockOutput::default();
        let result = nodes
            .iter()
            .try_for_each(|node| self.eval_node(node, selectors, depth, &mut block));
        self.scopes.pop();
        result?;

        let indent = "  ".repeat(depth);
        if !block.declarations.is_empty() {
            if selectors.is_empty() {
                for declaration in &block.declarations {
                    out.push_str(&format!("{}{}\n", indent, declaration));
                }
            } else {
                out.push_str(&format!("{}{} {{\n", indent, selectors.join(",\n")));
                for declaration in &block.declarations {
                    out.push_str(&format!("{}  {}\n", indent, declaration));
                }
                out.push_str(&format!("{}}}\n", indent));
            }
        }
        out.push_str(&block.nested);
        Ok(())
    }

    fn eval_node(&mut self, node: &Node, selectors: &[String], depth: usize, block: &mut BlockOutput) -> Result<()> {
        match node {
            Node::Declaration { property, value, at } => {
                let property = self.interpolate(property, *at)?;
                let value = self.substitute(value, *at)?;
                block.declarations.push(format!("{}: {};", property, value));
            }
            Node::Variable {
                name,
                value,
                default,
                at,
            } => {
                let value = self.substitute(value, *at)?;
                self.assign(name, value, *default);
            }
            Node::Import { targets, at } => {
                for target in targets {
                    self.eval_import(target, *at, selectors, depth, block)?;
                }
            }
            Node::Rule {
                selector,
                children,
                at,
            } => {
                let selector = self.interpolate(selector, *at)?;
                let resolved = combine_selectors(selectors, &selector);
                self.eval_block(children, &resolved, depth, &mut block.nested)?;
            }
            Node::AtRule {
                name,
                params,
                children,
                at,
            } => {
                let params = self.substitute(params, *at)?;
                let header = if params.is_empty() {
                    format!("@{}", name)
                } else {
                    format!("@{} {}", name, params)
                };
                let indent = "  ".repeat(depth);
                match children {
                    Some(children) => {
                        block.nested.push_str(&format!("{}{} {{\n", indent, header));
                        if CONDITIONAL_AT_RULES.contains(&name.as_str()) {
                            self.eval_block(children, selectors, depth + 1, &mut block.nested)?;
                        } else {
                            self.eval_block(children, &[], depth + 1, &mut block.nested)?;
                        }
                        block.nested.push_str(&format!("{}}}\n", indent));
                    }
                    None => block.nested.push_str(&format!("{}{};\n", indent, header)),
                }
            }
        }
        Ok(())
    }

    /// Inline an imported stylesheet into the current block and scope.
    /// Plain CSS targets are hoisted to the top of the output unchanged.
    fn eval_import(
        &mut self,
        target: &str,
        at: Position,
        selectors: &[String],
        depth: usize,
        block: &mut BlockOutput,
    ) -> Result<()> {
        let specifier = utils::strip_quotes(target);
        if is_plain_css_import(target, specifier) {
            self.css_imports.push(target.to_string());
            return Ok(());
        }

        if self.files.len() >= MAX_IMPORT_DEPTH {
            return Err(self.error(at, format!("Import of '{}' nests too deeply; is there a cycle?", specifier)));
        }

        let relative_to = self.current_file().to_string();
        let imported = self.importer.import(specifier, &relative_to).map_err(|e| match e {
            CompilerError::Resolution { .. } => self.error(at, e.to_string()),
            other => other,
        })?;
        let nodes = (self.parse)(&imported.contents, &imported.path)?;

        self.files.push(imported.path);
        let result = nodes
            .iter()
            .try_for_each(|node| self.eval_node(node, selectors, depth, block));
        self.files.pop();
        result
    }

    fn lookup(&self, name: &str) -> Option<&String> {
        self.scopes.iter().rev().find_map(|scope| scope.get(name))
    }

    /// Update the innermost scope that already defines `name`, otherwise
    /// define it in the current one. `!default` only fills in missing values.
    fn assign(&mut self, name: &str, value: String, default: bool) {
        if let Some(scope) = self.scopes.iter_mut().rev().find(|scope| scope.contains_key(name)) {
            if !default {
                scope.insert(name.to_string(), value);
            }
            return;
        }
        if let Some(scope) = self.scopes.last_mut() {
            scope.insert(name.to_string(), value);
        }
    }

    /// Replace `#{...}` interpolations only.
    fn interpolate(&self, text: &str, at: Position) -> Result<String> {
        if !text.contains("#{") {
            return Ok(text.to_string());
        }
        let mut out = String::with_capacity(text.len());
        let mut rest = text;
        while let Some(start) = rest.find("#{") {
            out.push_str(&rest[..start]);
            let end = rest[start..]
                .find('}')
                .map(|offset| start + offset)
                .ok_or_else(|| self.error(at, "Unterminated interpolation"))?;
            let inner = rest[start + 2..end].trim();
            out.push_str(&self.substitute_references(inner, at)?);
            rest = &rest[end + 1..];
        }
        out.push_str(rest);
        Ok(out)
    }

    /// Replace interpolations and variable references in a value.
    fn substitute(&self, text: &str, at: Position) -> Result<String> {
        let interpolated = self.interpolate(text, at)?;
        self.substitute_references(&interpolated, at)
    }

    fn substitute_references(&self, text: &str, at: Position) -> Result<String> {
        let chars: Vec<char> = text.chars().collect();
        let mut out = String::with_capacity(text.len());
        let mut quote: Option<char> = None;
        let mut i = 0;

        while i < chars.len() {
            let ch = chars[i];
            if let Some(q) = quote {
                out.push(ch);
                if ch == '\\' && i + 1 < chars.len() {
                    out.push(chars[i + 1]);
                    i += 1;
                } else if ch == q {
                    quote = None;
                }
                i += 1;
                continue;
            }
            if ch == '"' || ch == '\'' {
                quote = Some(ch);
                out.push(ch);
                i += 1;
                continue;
            }

            match self.syntax {
                VariableSyntax::Sigil(sigil) => {
                    if ch == sigil && i + 1 < chars.len() && is_ident_start(chars[i + 1]) {
                        let end = ident_end(&chars, i + 1);
                        let name: String = chars[i + 1..end].iter().collect();
                        let value = self
                            .lookup(&name)
                            .ok_or_else(|| self.error(at, format!("Undefined variable: {}{}", sigil, name)))?;
                        out.push_str(value);
                        i = end;
                        continue;
                    }
                }
                VariableSyntax::Bare => {
                    let starts_word = i == 0 || !is_ident_char(chars[i - 1]);
                    if starts_word && (is_ident_start(ch) || ch == '$') {
                        let end = ident_end(&chars, i + 1);
                        let word: String = chars[i..end].iter().collect();
                        match self.lookup(&word) {
                            Some(value) => out.push_str(value),
                            None => out.push_str(&word),
                        }
                        i = end;
                        continue;
                    }
                }
            }

            out.push(ch);
            i += 1;
        }

        Ok(out)
    }
}

fn is_ident_start(ch: char) -> bool {
    ch.is_ascii_alphabetic() || ch == '_' || ch == '-'
}

fn is_ident_char(ch: char) -> bool {
    ch.is_ascii_alphanumeric() || ch == '_' || ch == '-' || ch == '$'
}

fn ident_end(chars: &[char], start: usize) -> usize {
    let mut end = start;
    while end < chars.len() && (chars[end].is_ascii_alphanumeric() || chars[end] == '_' || chars[end] == '-') {
        end += 1;
    }
    end
}

fn is_plain_css_import(target: &str, specifier: &str) -> bool {
    target.starts_with("url(")
        || specifier.ends_with(".css")
        || specifier.starts_with("http://")
        || specifier.starts_with("https://")
        || specifier.starts_with("//")
}

/// Split on commas that are not inside parentheses or quotes.
pub fn split_top_level(text: &str) -> Vec<String> {
    let mut parts = Vec::new();
    let mut current = String::new();
    let mut depth = 0usize;
    let mut quote: Option<char> = None;

    for ch in text.chars() {
        match quote {
            Some(q) => {
                if ch == q {
                    quote = None;
                }
                current.push(ch);
            }
            None => match ch {
                '"' | '\'' => {
                    quote = Some(ch);
                    current.push(ch);
                }
                '(' | '[' => {
                    depth += 1;
                    current.push(ch);
                }
                ')' | ']' => {
                    depth = depth.saturating_sub(1);
                    current.push(ch);
                }
                ',' if depth == 0 => parts.push(std::mem::take(&mut current)),
                _ => current.push(ch),
            },
        }
    }
    parts.push(current);

    parts
        .into_iter()
        .map(|part| part.trim().to_string())
        .filter(|part| !part.is_empty())
        .collect()
}

/// Resolve a nested selector against its parents. `&` stands for the parent;
/// without it the child becomes a descendant of every parent.
pub fn combine_selectors(parents: &[String], selector: &str) -> Vec<String> {
    let children = split_top_level(selector);
    if parents.is_empty() {
        return children
            .into_iter()
            .map(|child| child.replace('&', "").trim().to_string())
            .collect();
    }

    let mut combined = Vec::with_capacity(parents.len() * children.len());
    for parent in parents {
        for child in &children {
            if child.contains('&') {
                combined.push(child.replace('&', parent));
            } else {
                combined.push(format!("{} {}", parent, child));
            }
        }
    }
    combined
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_combine_selectors() {
        let parents = vec![".a".to_string(), ".b".to_string()];
        assert_eq!(combine_selectors(&parents, "&:hover"), vec![".a:hover", ".b:hover"]);
        assert_eq!(combine_selectors(&parents, "span"), vec![".a span", ".b span"]);
        assert_eq!(combine_selectors(&[], ".x, .y"), vec![".x", ".y"]);
        assert_eq!(
            combine_selectors(&[".card".to_string()], "&-title"),
            vec![".card-title"]
        );
    }

    #[test]
    fn test_split_top_level_respects_parens_and_quotes() {
        assert_eq!(
            split_top_level(":is(.a, .b), .c"),
            vec![":is(.a, .b)", ".c"]
        );
        assert_eq!(split_top_level("'a,b', \"c\""), vec!["'a,b'", "\"c\""]);
    }

    #[test]
    fn test_plain_css_imports() {
        assert!(is_plain_css_import("'theme.css'", "theme.css"));
        assert!(is_plain_css_import("url(x.css)", "url(x.css)"));
        assert!(is_plain_css_import("'https://cdn/x'", "https://cdn/x"));
        assert!(!is_plain_css_import("'vars'", "vars"));
    }
}
