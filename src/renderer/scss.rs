//! Brace-syntax renderer used for the Sass-like and Less-like dialects.
//!
//! The two dialects share one grammar and differ only in the variable sigil:
//! `$name: value;` for Sass, `@name: value;` for Less. Supported: line and
//! block comments, variables (with `!default`), `#{}` interpolation, `@import`
//! through the caller's importer, nested rules with `&`, and at-rules.

use super::tree::{split_top_level, Evaluator, Node, Position, VariableSyntax};
use super::{Importer, RenderOptions, RenderOutput, StylesheetRenderer};
use crate::error::{CompilerError, ProcessingStep, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ScssRenderer {
    sigil: char,
}

impl ScssRenderer {
    pub fn sass() -> Self {
        Self { sigil: '$' }
    }

    pub fn less() -> Self {
        Self { sigil: '@' }
    }

    /// Parse text into nodes without evaluating it.
    pub fn parse(&self, source: &str, file: &str, step: ProcessingStep) -> Result<Vec<Node>> {
        BlockParser::new(source, file, step, self.sigil).parse()
    }
}

impl StylesheetRenderer for ScssRenderer {
    fn render(
        &self,
        source: &str,
        options: &RenderOptions,
        importer: &mut dyn Importer,
    ) -> Result<RenderOutput> {
        let step = options.step;
        let parse = |text: &str, file: &str| self.parse(text, file, step);
        let nodes = parse(source, &options.filename)?;
        let css = Evaluator::new(VariableSyntax::Sigil(self.sigil), step, importer, &parse)
            .run(&nodes, &options.filename)?;
        Ok(RenderOutput { css, source_map: None })
    }
}

struct BlockParser<'s> {
    chars: Vec<char>,
    pos: usize,
    line: usize,
    column: usize,
    file: &'s str,
    step: ProcessingStep,
    sigil: char,
}

impl<'s> BlockParser<'s> {
    fn new(source: &str, file: &'s str, step: ProcessingStep, sigil: char) -> Self {
        Self {
            chars: source.chars().collect(),
            pos: 0,
            line: 1,
            column: 1,
            file,
            step,
            sigil,
        }
    }

    fn parse(mut self) -> Result<Vec<Node>> {
        self.parse_block(None)
    }

    fn position(&self) -> Position {
        Position {
            line: self.line,
            column: self.column,
        }
    }

    fn error_at(&self, at: Position, message: impl Into<String>) -> CompilerError {
        CompilerError::transform(self.step, self.file, at.line, at.column, message)
    }

    fn peek(&self) -> Option<char> {
        self.chars.get(self.pos).copied()
    }

    fn peek_next(&self) -> Option<char> {
        self.chars.get(self.pos + 1).copied()
    }

    fn advance(&mut self) -> Option<char> {
        let ch = self.chars.get(self.pos).copied()?;
        self.pos += 1;
        if ch == '\n' {
            self.line += 1;
            self.column = 1;
        } else {
            self.column += 1;
        }
        Some(ch)
    }

    fn skip_line_comment(&mut self) {
        while let Some(ch) = self.peek() {
            if ch == '\n' {
                break;
            }
            self.advance();
        }
    }

    fn skip_block_comment(&mut self) -> Result<()> {
        let start = self.position();
        self.advance();
        self.advance();
        loop {
            match self.advance() {
                Some('*') if self.peek() == Some('/') => {
                    self.advance();
                    return Ok(());
                }
                Some(_) => {}
                None => return Err(self.error_at(start, "Unterminated comment")),
            }
        }
    }

    fn skip_trivia(&mut self) -> Result<()> {
        loop {
            match (self.peek(), self.peek_next()) {
                (Some(ch), _) if ch.is_whitespace() => {
                    self.advance();
                }
                (Some('/'), Some('/')) => self.skip_line_comment(),
                (Some('/'), Some('*')) => self.skip_block_comment()?,
                _ => return Ok(()),
            }
        }
    }

    /// Parse statements until the closing brace of the block opened at
    /// `open`, or until end of input at the top level.
    fn parse_block(&mut self, open: Option<Position>) -> Result<Vec<Node>> {
        let mut nodes = Vec::new();
        loop {
            self.skip_trivia()?;
            let at = self.position();
            match self.peek() {
                None => {
                    return match open {
                        Some(open) => Err(self.error_at(open, "Unclosed block: expected '}'")),
                        None => Ok(nodes),
                    };
                }
                Some('}') => {
                    if open.is_none() {
                        return Err(self.error_at(at, "Unexpected '}'"));
                    }
                    self.advance();
                    return Ok(nodes);
                }
                Some(_) => {}
            }

            let (text, terminator) = self.read_statement()?;
            let text = text.trim();
            if terminator == Some('{') {
                let children = self.parse_block(Some(at))?;
                nodes.push(self.block_node(text, children, at)?);
            } else if !text.is_empty() {
                nodes.push(self.statement_node(text, at)?);
            }
        }
    }

    /// Read up to a `{`, `;` or `}` at nesting level zero. The terminator is
    /// consumed, except for `}` which closes the enclosing block.
    fn read_statement(&mut self) -> Result<(String, Option<char>)> {
        let mut text = String::new();
        let mut parens = 0usize;

        while let Some(ch) = self.peek() {
            match ch {
                '"' | '\'' => self.read_string(ch, &mut text)?,
                '(' => {
                    parens += 1;
                    text.push(ch);
                    self.advance();
                }
                ')' => {
                    parens = parens.saturating_sub(1);
                    text.push(ch);
                    self.advance();
                }
                '#' if self.peek_next() == Some('{') => self.read_interpolation(&mut text)?,
                '/' if self.peek_next() == Some('*') => {
                    self.skip_block_comment()?;
                    text.push(' ');
                }
                '/' if self.peek_next() == Some('/') && parens == 0 => self.skip_line_comment(),
                '{' | ';' if parens == 0 => {
                    self.advance();
                    return Ok((text, Some(ch)));
                }
                '}' if parens == 0 => return Ok((text, Some('}'))),
                _ => {
                    text.push(ch);
                    self.advance();
                }
            }
        }

        Ok((text, None))
    }

    fn read_string(&mut self, quote: char, text: &mut String) -> Result<()> {
        let start = self.position();
        text.push(quote);
        self.advance();
        loop {
            match self.advance() {
                Some('\\') => {
                    text.push('\\');
                    if let Some(escaped) = self.advance() {
                        text.push(escaped);
                    }
                }
                Some(ch) if ch == quote => {
                    text.push(ch);
                    return Ok(());
                }
                Some('\n') | None => return Err(self.error_at(start, "Unterminated string")),
                Some(ch) => text.push(ch),
            }
        }
    }

    fn read_interpolation(&mut self, text: &mut String) -> Result<()> {
        let start = self.position();
        loop {
            match self.advance() {
                Some('}') => {
                    text.push('}');
                    return Ok(());
                }
                Some(ch) => text.push(ch),
                None => return Err(self.error_at(start, "Unterminated interpolation")),
            }
        }
    }

    fn block_node(&self, header: &str, children: Vec<Node>, at: Position) -> Result<Node> {
        if header.is_empty() {
            return Err(self.error_at(at, "Expected a selector before '{'"));
        }
        if let Some(rest) = header.strip_prefix('@') {
            let (name, params) = split_at_rule(rest);
            return Ok(Node::AtRule {
                name,
                params,
                children: Some(children),
                at,
            });
        }
        Ok(Node::Rule {
            selector: header.to_string(),
            children,
            at,
        })
    }

    fn statement_node(&self, text: &str, at: Position) -> Result<Node> {
        if let Some(node) = self.variable_node(text, at) {
            return Ok(node);
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

        match text.split_once(':') {
            Some((property, value)) if !property.trim().is_empty() => Ok(Node::Declaration {
                property: property.trim().to_string(),
                value: value.trim().to_string(),
                at,
            }),
            _ => Err(self.error_at(at, format!("Expected \"property: value\", found \"{}\"", text))),
        }
    }

    /// `<sigil>name: value [!default]`
    fn variable_node(&self, text: &str, at: Position) -> Option<Node> {
        let rest = text.strip_prefix(self.sigil)?;
        let name_len = rest
            .find(|c: char| !(c.is_ascii_alphanumeric() || c == '_' || c == '-'))
            .unwrap_or(rest.len());
        if name_len == 0 {
            return None;
        }
        let (name, after) = rest.split_at(name_len);
        let value = after.trim_start().strip_prefix(':')?.trim();

        let mut value = value.to_string();
        let mut default = false;
        for flag in ["!default", "!global"] {
            if let Some(stripped) = value.strip_suffix(flag) {
                default |= flag == "!default";
                value = stripped.trim_end().to_string();
            }
        }

        Some(Node::Variable {
            name: name.to_string(),
            value,
            default,
            at,
        })
    }
}

fn split_at_rule(rest: &str) -> (String, String) {
    let name_len = rest
        .find(|c: char| !(c.is_ascii_alphanumeric() || c == '-' || c == '_'))
        .unwrap_or(rest.len());
    (rest[..name_len].to_string(), rest[name_len..].trim().to_string())
}
