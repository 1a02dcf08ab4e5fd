//! Indentation-syntax renderer for the Stylus-like dialect.
//!
//! Blocks are defined by indentation instead of braces, semicolons and colons
//! are optional, and variables are assigned with `name = value` and referenced
//! by bare name.

use super::tree::{split_top_level, Evaluator, Node, Position, VariableSyntax};
use super::{Importer, RenderOptions, RenderOutput, StylesheetRenderer};
use crate::error::{CompilerError, ProcessingStep, Result};
use regex::Regex;

#[derive(Debug, Clone)]
pub struct StylusRenderer {
    assignment: Regex,
}

impl Default for StylusRenderer {
    fn default() -> Self {
        Self::new()
    }
}

impl StylusRenderer {
    pub fn new() -> Self {
        Self {
            assignment: Regex::new(r"^(?:(\$[A-Za-z_][\w-]*)\s*[:=]|([A-Za-z_][\w-]*)\s*=)\s*(.+)$").unwrap(),
        }
    }

    pub fn parse(&self, source: &str, file: &str, step: ProcessingStep) -> Result<Vec<Node>> {
        let lines = logical_lines(source, file, step)?;
        let mut parser = IndentParser {
            lines,
            index: 0,
            file,
            step,
            assignment: &self.assignment,
        };
        parser.parse_children(None)
    }
}

impl StylesheetRenderer for StylusRenderer {
    fn render(
        &self,
        source: &str,
        options: &RenderOptions,
        importer: &mut dyn Importer,
    ) -> Result<RenderOutput> {
        let step = options.step;
        let parse = |text: &str, file: &str| self.parse(text, file, step);
        let nodes = parse(source, &options.filename)?;
        let css = Evaluator::new(VariableSyntax::Bare, step, importer, &parse).run(&nodes, &options.filename)?;
        Ok(RenderOutput { css, source_map: None })
    }
}

#[derive(Debug, Clone)]
struct Line {
    indent: usize,
    text: String,
    at: Position,
}

/// Non-blank lines with comments removed and their indentation measured.
fn logical_lines(source: &str, file: &str, step: ProcessingStep) -> Result<Vec<Line>> {
    let mut lines = Vec::new();
    let mut in_block_comment: Option<Position> = None;

    for (index, raw) in source.lines().enumerate() {
        let mut text = String::new();
        let mut chars = raw.chars().peekable();
        let mut quote: Option<char> = None;

        while let Some(ch) = chars.next() {
            if in_block_comment.is_some() {
                if ch == '*' && chars.peek() == Some(&'/') {
                    chars.next();
                    in_block_comment = None;
                }
                continue;
            }
            match quote {
                Some(q) => {
                    if ch == q {
                        quote = None;
                    }
                    text.push(ch);
                }
                None => match ch {
                    '"' | '\'' => {
                        quote = Some(ch);
                        text.push(ch);
                    }
                    '/' if chars.peek() == Some(&'/') => break,
                    '/' if chars.peek() == Some(&'*') => {
                        chars.next();
                        in_block_comment = Some(Position {
                            line: index + 1,
                            column: text.chars().count() + 1,
                        });
                    }
                    _ => text.push(ch),
                },
            }
        }

        let content = text.trim_end();
        let body = content.trim_start();
        if body.is_empty() {
            continue;
        }
        let indent = content.len() - body.len();
        let body = body.trim_end_matches(';').trim_end();
        lines.push(Line {
            indent,
            text: body.to_string(),
            at: Position {
                line: index + 1,
                column: indent + 1,
            },
        });
    }

    if let Some(at) = in_block_comment {
        return Err(CompilerError::transform(step, file, at.line, at.column, "Unterminated comment"));
    }
    Ok(lines)
}

struct IndentParser<'p> {
    lines: Vec<Line>,
    index: usize,
    file: &'p str,
    step: ProcessingStep,
    assignment: &'p Regex,
}

impl<'p> IndentParser<'p> {
    fn error_at(&self, at: Position, message: impl Into<String>) -> CompilerError {
        CompilerError::transform(self.step, self.file, at.line, at.column, message)
    }

    /// Parse the lines indented deeper than `parent_indent`.
    fn parse_children(&mut self, parent_indent: Option<usize>) -> Result<Vec<Node>> {
        let mut nodes = Vec::new();
        let mut block_indent: Option<usize> = None;

        while self.index < self.lines.len() {
            let line = self.lines[self.index].clone();
            if let Some(parent) = parent_indent {
                if line.indent <= parent {
                    break;
                }
            }
            match block_indent {
                None => block_indent = Some(line.indent),
                Some(expected) if line.indent > expected => {
                    return Err(self.error_at(line.at, "Unexpected indentation"));
                }
                Some(expected) if line.indent < expected => {
                    return Err(self.error_at(line.at, "Inconsistent indentation"));
                }
                Some(_) => {}
            }
            self.index += 1;

            // A selector list may continue over lines ending in a comma.
            let mut text = line.text.clone();
            while text.ends_with(',')
                && self.index < self.lines.len()
                && self.lines[self.index].indent == line.indent
            {
                text.push(' ');
                text.push_str(&self.lines[self.index].text);
                self.index += 1;
            }

            let has_children = self.index < self.lines.len() && self.lines[self.index].indent > line.indent;
            if has_children {
                let children = self.parse_children(Some(line.indent))?;
                nodes.push(block_node(&text, children, line.at));
            } else {
                nodes.push(self.statement_node(&text, line.at)?);
            }
        }

        Ok(nodes)
    }

    fn statement_node(&self, text: &str, at: Position) -> Result<Node> {
        if let Some(captures) = self.assignment.captures(text) {
            let name = captures.get(1).or_else(|| captures.get(2)).map_or("", |m| m.as_str());
            return Ok(Node::Variable {
                name: name.to_string(),
                value: captures[3].trim().to_string(),
                default: false,
                at,
            });
        }
        if let Some(rest) = text.strip_prefix("@import") {
            let targets = split_top_level(rest);
            if targets.is_empty() {
                return Err(self.error_at(at, "Expected a file to import"));
            }
            return Ok(Node::Import { targets, at });
        }
        if let Some(rest) = text.strip_prefix('@') {
            let (name, params) = split_at_rule(rest);
            return Ok(Node::AtRule {
                name,
                params,
                children: None,
                at,
            });
        }

        let (property, value) = match text.split_once(':') {
            Some((property, value)) if is_property_name(property) => (property, value),
            _ => text.split_once(char::is_whitespace).ok_or_else(|| {
                self.error_at(at, format!("Expected a property value after \"{}\"", text))
            })?,
        };
        Ok(Node::Declaration {
            property: property.trim().to_string(),
            value: value.trim().to_string(),
            at,
        })
    }
}

fn block_node(header: &str, children: Vec<Node>, at: Position) -> Node {
    match header.strip_prefix('@') {
        Some(rest) => {
            let (name, params) = split_at_rule(rest);
            Node::AtRule {
                name,
                params,
                children: Some(children),
                at,
            }
        }
        None => Node::Rule {
            selector: header.trim_end_matches('{').trim().to_string(),
            children,
            at,
        },
    }
}

fn is_property_name(text: &str) -> bool {
    !text.is_empty() && text.chars().all(|c| c.is_ascii_alphanumeric() || c == '-')
}

fn split_at_rule(rest: &str) -> (String, String) {
    let name_len = rest
        .find(|c: char| !(c.is_ascii_alphanumeric() || c == '-' || c == '_'))
        .unwrap_or(rest.len());
    (rest[..name_len].to_string(), rest[name_len..].trim().to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::renderer::test_support::MapImporter;

    fn render_with(source: &str, importer: &mut MapImporter) -> Result<String> {
        let options = RenderOptions {
            filename: "/app/client/main.styl".into(),
            step: ProcessingStep::StylusCompilation,
        };
        StylusRenderer::new()
            .render(source, &options, importer)
            .map(|output| output.css)
    }

    fn render(source: &str) -> Result<String> {
        render_with(source, &mut MapImporter::new(&[]))
    }

    #[test]
    fn test_indented_rules_and_variables() {
        let css = render("primary = #c00\n\n.button\n  color primary\n  padding: 4px 8px\n").unwrap();
        assert_eq!(css, ".button {\n  color: #c00;\n  padding: 4px 8px;\n}\n");
    }

    #[test]
    fn test_nesting_and_parent_reference() {
        let css = render(".nav\n  display flex\n  a\n    color red\n  &:hover\n    opacity 0.5\n").unwrap();
        assert_eq!(
            css,
            ".nav {\n  display: flex;\n}\n.nav a {\n  color: red;\n}\n.nav:hover {\n  opacity: 0.5;\n}\n"
        );
    }

    #[test]
    fn test_comments_are_dropped() {
        let css = render("// header\n.a\n  /* inline */ color red // trailing\n").unwrap();
        assert_eq!(css, ".a {\n  color: red;\n}\n");
    }

    #[test]
    fn test_selector_list_over_several_lines() {
        let css = render(".a,\n.b\n  margin 0\n").unwrap();
        assert_eq!(css, ".a,\n.b {\n  margin: 0;\n}\n");
    }

    #[test]
    fn test_import_through_importer() {
        let mut importer = MapImporter::new(&[("theme", "accent = teal\n")]);
        let css = render_with("@import 'theme'\n.a\n  color accent\n", &mut importer).unwrap();
        assert_eq!(css, ".a {\n  color: teal;\n}\n");
    }

    #[test]
    fn test_bad_indentation_reports_line() {
        match render(".a\n    color red\n  margin 0\n") {
            Err(CompilerError::Transform { line, .. }) => assert_eq!(line, 3),
            other => panic!("Expected transform error, got {:?}", other),
        }
    }

    #[test]
    fn test_dollar_variables_from_prelude() {
        let css = render("$accent: red;\n.a\n  color $accent\n").unwrap();
        assert_eq!(css, ".a {\n  color: red;\n}\n");
    }

    #[test]
    fn test_property_without_value() {
        assert!(matches!(render(".a\n  color\n"), Err(CompilerError::Transform { line: 2, .. })));
    }
}
