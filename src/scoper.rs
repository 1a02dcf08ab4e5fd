//! Selector scoping: rewrites local class and id selectors and `@keyframes`
//! names to scoped names and evaluates `composes` declarations.
//!
//! The transform itself is a trait so a host can plug in a full CSS parser;
//! [`CssModulesTransform`] is the built-in implementation. It understands
//! enough CSS structure to leave comments, strings, declaration values and the
//! bodies of at-rules alone, except for the animation names in `animation`
//! and `animation-name`, which follow the scoped `@keyframes` names.

use crate::error::{CompilerError, ProcessingStep, Result};
use crate::types::ExportTokenMap;
use crate::utils;
use indexmap::IndexMap;
use regex::Regex;
use std::collections::HashMap;

/// At-rules whose body holds ordinary rules.
const CONTAINER_AT_RULES: &[&str] = &["media", "supports", "document", "container", "layer", "scope"];

/// Identifiers in `animation-name` that never name a keyframes rule.
const ANIMATION_NAME_KEYWORDS: &[&str] = &["none", "initial", "inherit", "unset", "revert", "revert-layer"];

/// Further identifiers the `animation` shorthand reserves.
const ANIMATION_KEYWORDS: &[&str] = &[
    "infinite",
    "normal",
    "reverse",
    "alternate",
    "alternate-reverse",
    "forwards",
    "backwards",
    "both",
    "running",
    "paused",
    "ease",
    "ease-in",
    "ease-out",
    "ease-in-out",
    "linear",
    "step-start",
    "step-end",
];

/// Supplies the exported tokens of files named in `composes ... from`.
pub trait ComposesResolver {
    fn resolve(&mut self, specifier: &str) -> Result<ExportTokenMap>;
}

#[derive(Debug, Clone, PartialEq)]
pub struct TransformOutput {
    pub css: String,
    pub tokens: ExportTokenMap,
    pub source_map: Option<serde_json::Value>,
}

pub trait SelectorTransform {
    /// Scope `css`, which was read from `file_path`. `rename` maps a local
    /// class name to its scoped name.
    fn transform(
        &self,
        css: &str,
        file_path: &str,
        rename: &dyn Fn(&str) -> Result<String>,
        resolver: &mut dyn ComposesResolver,
    ) -> Result<TransformOutput>;
}

#[derive(Debug, Clone)]
pub struct CssModulesTransform {
    composes: Regex,
    from: Regex,
    keyframes: Regex,
    animation: Regex,
}

impl Default for CssModulesTransform {
    fn default() -> Self {
        Self::new()
    }
}

impl CssModulesTransform {
    pub fn new() -> Self {
        Self {
            composes: Regex::new(r"(?is)^\s*composes\s*:\s*(.*?)\s*$").unwrap(),
            from: Regex::new(r"(?s)^(.*?)\s+from\s+(.+)$").unwrap(),
            keyframes: Regex::new(r"(?is)^(\s*@(?:-[a-z]+-)?keyframes\s+)(.*?)(\s*)$").unwrap(),
            animation: Regex::new(r"(?is)^(\s*(?:-[a-z]+-)?animation(-name)?\s*:\s*)(.*)$").unwrap(),
        }
    }
}

impl SelectorTransform for CssModulesTransform {
    fn transform(
        &self,
        css: &str,
        file_path: &str,
        rename: &dyn Fn(&str) -> Result<String>,
        resolver: &mut dyn ComposesResolver,
    ) -> Result<TransformOutput> {
        let mut run = ScopeRun {
            transform: self,
            scanner: Scanner::new(css, file_path),
            rename,
            resolver,
            tokens: IndexMap::new(),
            imported: HashMap::new(),
        };
        let css = run.run()?;
        let tokens = run
            .tokens
            .into_iter()
            .map(|(local, names)| (local, names.join(" ")))
            .collect();

        Ok(TransformOutput {
            source_map: Some(line_source_map(file_path, &css)),
            css,
            tokens,
        })
    }
}

/// A v3 source map mapping each output line to the same input line. The
/// transform keeps line breaks where it removes text, so the two agree.
pub fn line_source_map(file_path: &str, css: &str) -> serde_json::Value {
    let lines = utils::line_count(css);
    let mut mappings = String::from("AAAA");
    for _ in 1..lines {
        mappings.push_str(";AACA");
    }
    serde_json::json!({
        "version": 3,
        "file": utils::basename(file_path),
        "sources": [file_path],
        "names": [],
        "mappings": mappings,
    })
}

#[derive(Debug, Clone, Copy)]
struct Position {
    line: usize,
    column: usize,
}

enum Context {
    /// Top level or a conditional at-rule: holds rules.
    Container,
    /// A style rule. `composable` holds the local classes of a selector list
    /// made only of single classes, the only rules `composes` may appear in.
    Rule { composable: Vec<String> },
}

struct Scanner<'a> {
    chars: Vec<char>,
    pos: usize,
    line: usize,
    column: usize,
    file: &'a str,
}

impl<'a> Scanner<'a> {
    fn new(source: &str, file: &'a str) -> Self {
        Self {
            chars: source.chars().collect(),
            pos: 0,
            line: 1,
            column: 1,
            file,
        }
    }

    fn position(&self) -> Position {
        Position {
            line: self.line,
            column: self.column,
        }
    }

    fn error_at(&self, at: Position, message: impl Into<String>) -> CompilerError {
        CompilerError::transform(ProcessingStep::CssModulesCompilation, self.file, at.line, at.column, message)
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

    fn copy_whitespace(&mut self, out: &mut String) {
        while let Some(ch) = self.peek() {
            if !ch.is_whitespace() {
                break;
            }
            out.push(ch);
            self.advance();
        }
    }

    /// Copy a comment or string starting at the current character.
    fn copy_atom(&mut self, out: &mut String) -> Result<bool> {
        let start = self.position();
        match (self.peek(), self.peek_next()) {
            (Some('/'), Some('*')) => {
                out.push_str("/*");
                self.advance();
                self.advance();
                loop {
                    match self.advance() {
                        Some('*') if self.peek() == Some('/') => {
                            self.advance();
                            out.push_str("*/");
                            return Ok(true);
                        }
                        Some(ch) => out.push(ch),
                        None => return Err(self.error_at(start, "Unterminated comment")),
                    }
                }
            }
            (Some(quote), _) if quote == '"' || quote == '\'' => {
                out.push(quote);
                self.advance();
                loop {
                    match self.advance() {
                        Some('\\') => {
                            out.push('\\');
                            if let Some(escaped) = self.advance() {
                                out.push(escaped);
                            }
                        }
                        Some(ch) if ch == quote => {
                            out.push(ch);
                            return Ok(true);
                        }
                        Some('\n') | None => return Err(self.error_at(start, "Unterminated string")),
                        Some(ch) => out.push(ch),
                    }
                }
            }
            _ => Ok(false),
        }
    }

    /// Read up to a `{`, `;` or `}` outside parentheses, comments and
    /// strings. The terminator is consumed and returned.
    fn read_segment(&mut self) -> Result<(String, Option<char>)> {
        let mut text = String::new();
        let mut parens = 0usize;
        while let Some(ch) = self.peek() {
            if self.copy_atom(&mut text)? {
                continue;
            }
            match ch {
                '(' => parens += 1,
                ')' => parens = parens.saturating_sub(1),
                '{' | ';' | '}' if parens == 0 => {
                    self.advance();
                    return Ok((text, Some(ch)));
                }
                _ => {}
            }
            text.push(ch);
            self.advance();
        }
        Ok((text, None))
    }

    /// Copy the rest of a block whose `{` was just consumed, through its
    /// closing brace.
    fn copy_block(&mut self, open: Position, out: &mut String) -> Result<()> {
        let mut depth = 1usize;
        while let Some(ch) = self.peek() {
            if self.copy_atom(out)? {
                continue;
            }
            self.advance();
            out.push(ch);
            match ch {
                '{' => depth += 1,
                '}' => {
                    depth -= 1;
                    if depth == 0 {
                        return Ok(());
                    }
                }
                _ => {}
            }
        }
        Err(self.error_at(open, "Unclosed block: expected '}'"))
    }
}

struct ScopeRun<'t, 'a> {
    transform: &'t CssModulesTransform,
    scanner: Scanner<'a>,
    rename: &'t dyn Fn(&str) -> Result<String>,
    resolver: &'t mut dyn ComposesResolver,
    tokens: IndexMap<String, Vec<String>>,
    /// Tokens per `composes ... from` specifier, resolved once per file.
    imported: HashMap<String, ExportTokenMap>,
}

impl<'t, 'a> ScopeRun<'t, 'a> {
    fn run(&mut self) -> Result<String> {
        let mut out = String::new();
        let mut stack: Vec<(Context, Position)> = Vec::new();

        loop {
            self.scanner.copy_whitespace(&mut out);
            let at = self.scanner.position();
            let (text, terminator) = self.scanner.read_segment()?;
            let in_rule = matches!(stack.last(), Some((Context::Rule { .. }, _)));

            match terminator {
                None => {
                    out.push_str(&text);
                    if let Some((_, open)) = stack.last() {
                        return Err(self.scanner.error_at(*open, "Unclosed block: expected '}'"));
                    }
                    return Ok(out);
                }
                Some('{') => {
                    let prelude = text.trim();
                    if let Some(rest) = prelude.strip_prefix('@') {
                        let name = at_rule_name(rest);
                        if name.ends_with("keyframes") {
                            let renamed = self.rewrite_keyframes(&text)?;
                            out.push_str(&renamed);
                        } else {
                            out.push_str(&text);
                        }
                        out.push('{');
                        if CONTAINER_AT_RULES.contains(&name.as_str()) {
                            stack.push((Context::Container, at));
                        } else {
                            self.scanner.copy_block(at, &mut out)?;
                        }
                    } else {
                        let (selector, composable) = self.rewrite_selector(&text, at)?;
                        out.push_str(&selector);
                        out.push('{');
                        stack.push((Context::Rule { composable }, at));
                    }
                }
                Some(terminator) => {
                    let (comments, declaration) = split_leading_comments(&text);
                    if in_rule && self.transform.composes.is_match(declaration) {
                        self.apply_composes(declaration, &stack, at)?;
                        out.push_str(comments);
                        out.extend(declaration.chars().filter(|&c| c == '\n'));
                    } else {
                        let rewritten = if in_rule { self.rewrite_animation(declaration)? } else { None };
                        match rewritten {
                            Some(rewritten) => {
                                out.push_str(comments);
                                out.push_str(&rewritten);
                            }
                            None => out.push_str(&text),
                        }
                        if terminator == ';' {
                            out.push(';');
                        }
                    }

                    if terminator == '}' {
                        if stack.pop().is_none() {
                            return Err(self.scanner.error_at(at, "Unexpected '}'"));
                        }
                        out.push('}');
                    }
                }
            }
        }
    }

    /// Scope the class and id selectors in a rule prelude. Returns the
    /// rewritten text and the classes `composes` may extend.
    fn rewrite_selector(&mut self, selector: &str, at: Position) -> Result<(String, Vec<String>)> {
        let chars: Vec<char> = selector.chars().collect();
        let mut locals = Vec::new();
        let out = self.rewrite_range(&chars, false, &mut locals, at)?;
        let composable = if is_class_list(selector) { locals } else { Vec::new() };
        Ok((out, composable))
    }

    /// Scoped name for a local identifier, recorded as an exported token.
    fn scope_name(&mut self, local: &str) -> Result<String> {
        let scoped = (self.rename)(local)?;
        self.tokens
            .entry(local.to_string())
            .or_insert_with(|| vec![scoped.clone()]);
        Ok(scoped)
    }

    /// `@keyframes name`, `@keyframes :local(name)` or
    /// `@keyframes :global(name)`; quoted names are left alone.
    fn rewrite_keyframes(&mut self, prelude: &str) -> Result<String> {
        let transform = self.transform;
        let Some(captures) = transform.keyframes.captures(prelude) else {
            return Ok(prelude.to_string());
        };
        let name = captures[2].trim();

        let renamed = if let Some(inner) = wrapped(name, ":global(") {
            inner.to_string()
        } else {
            let local = wrapped(name, ":local(").unwrap_or(name);
            if local.is_empty() || local.starts_with('"') || local.starts_with('\'') {
                local.to_string()
            } else {
                self.scope_name(local)?
            }
        };
        Ok(format!("{}{}{}", &captures[1], renamed, &captures[3]))
    }

    /// Scope the keyframes names referenced by `animation-name`, or the first
    /// non-keyword identifier of each `animation` shorthand entry.
    fn rewrite_animation(&mut self, declaration: &str) -> Result<Option<String>> {
        let transform = self.transform;
        let Some(captures) = transform.animation.captures(declaration) else {
            return Ok(None);
        };
        let shorthand = captures.get(2).is_none();
        let value: Vec<char> = captures[3].chars().collect();

        let mut out = captures[1].to_string();
        let mut depth = 0usize;
        let mut named = false;
        let mut i = 0;
        while i < value.len() {
            let ch = value[i];
            let next = value.get(i + 1).copied();
            match ch {
                '(' => depth += 1,
                ')' => depth = depth.saturating_sub(1),
                ',' if depth == 0 => named = false,
                '"' | '\'' => {
                    let end = skip_string(&value, i);
                    out.extend(&value[i..end]);
                    i = end;
                    continue;
                }
                _ if is_number_start(ch, next) || ch == '!' => {
                    let end = token_end(&value, i + 1);
                    out.extend(&value[i..end]);
                    i = end;
                    continue;
                }
                _ if depth == 0 && is_ident_start(ch, next) => {
                    let end = class_name_end(&value, i);
                    let word: String = value[i..end].iter().collect();
                    let is_function = value.get(end) == Some(&'(');
                    if is_function || (shorthand && named) || is_animation_keyword(&word, shorthand) {
                        out.push_str(&word);
                    } else {
                        out.push_str(&self.scope_name(&word)?);
                        named = true;
                    }
                    i = end;
                    continue;
                }
                _ => {}
            }
            out.push(ch);
            i += 1;
        }

        Ok(Some(out))
    }

    fn rewrite_range(
        &mut self,
        chars: &[char],
        start_global: bool,
        locals: &mut Vec<String>,
        at: Position,
    ) -> Result<String> {
        let mut out = String::with_capacity(chars.len());
        let mut global = start_global;
        let mut i = 0;

        while i < chars.len() {
            let ch = chars[i];
            match ch {
                '/' if chars.get(i + 1) == Some(&'*') => {
                    let end = find_sequence(chars, i + 2, &['*', '/']).map_or(chars.len(), |end| end + 2);
                    out.extend(&chars[i..end]);
                    i = end;
                }
                '"' | '\'' => {
                    let end = skip_string(chars, i);
                    out.extend(&chars[i..end]);
                    i = end;
                }
                '[' => {
                    let mut end = i + 1;
                    while end < chars.len() && chars[end] != ']' {
                        end = if chars[end] == '"' || chars[end] == '\'' {
                            skip_string(chars, end)
                        } else {
                            end + 1
                        };
                    }
                    let end = (end + 1).min(chars.len());
                    out.extend(&chars[i..end]);
                    i = end;
                }
                ',' => {
                    global = start_global;
                    out.push(ch);
                    i += 1;
                }
                ':' if starts_with(chars, i, ":global(") || starts_with(chars, i, ":local(") => {
                    let is_global = starts_with(chars, i, ":global(");
                    let open = i + if is_global { 7 } else { 6 };
                    let close = matching_paren(chars, open)
                        .ok_or_else(|| self.scanner.error_at(at, "Unclosed parenthesis in selector"))?;
                    let inner = self.rewrite_range(&chars[open + 1..close], is_global, locals, at)?;
                    out.push_str(&inner);
                    i = close + 1;
                }
                ':' if starts_with_word(chars, i, ":global") || starts_with_word(chars, i, ":local") => {
                    global = starts_with_word(chars, i, ":global");
                    i += if global { 7 } else { 6 };
                    if out.is_empty() || out.ends_with(char::is_whitespace) {
                        while i < chars.len() && chars[i].is_whitespace() {
                            i += 1;
                        }
                    }
                }
                '.' | '#' if chars.get(i + 1).map_or(false, |&next| is_class_start(next)) => {
                    let end = class_name_end(chars, i + 1);
                    let local: String = chars[i + 1..end].iter().collect();
                    out.push(ch);
                    if global {
                        out.push_str(&local);
                    } else {
                        out.push_str(&self.scope_name(&local)?);
                        if ch == '.' && !locals.contains(&local) {
                            locals.push(local);
                        }
                    }
                    i = end;
                }
                _ => {
                    out.push(ch);
                    i += 1;
                }
            }
        }

        Ok(out)
    }

    /// `composes: a b [from global | from "specifier"]`: append the composed
    /// names to every class of the enclosing rule.
    fn apply_composes(&mut self, declaration: &str, stack: &[(Context, Position)], at: Position) -> Result<()> {
        let locals = match stack.last() {
            Some((Context::Rule { composable }, _)) if !composable.is_empty() => composable.clone(),
            _ => {
                return Err(self.scanner.error_at(
                    at,
                    "composes is only allowed in rules whose selectors are single local classes",
                ))
            }
        };

        let value = self
            .transform
            .composes
            .captures(declaration)
            .and_then(|captures| captures.get(1))
            .map_or("", |m| m.as_str())
            .to_string();
        let (names, source) = match self.transform.from.captures(&value) {
            Some(captures) => (
                captures[1].to_string(),
                Some(captures[2].trim().to_string()),
            ),
            None => (value.clone(), None),
        };
        let names: Vec<&str> = names.split_whitespace().collect();
        if names.is_empty() {
            return Err(self.scanner.error_at(at, "composes needs at least one class name"));
        }

        let mut composed = Vec::new();
        match source.as_deref() {
            None => {
                for name in &names {
                    let existing = self.tokens.get(*name).ok_or_else(|| {
                        self.scanner
                            .error_at(at, format!("composes: class '{}' is not defined in this file", name))
                    })?;
                    composed.extend(existing.iter().cloned());
                }
            }
            Some("global") => composed.extend(names.iter().map(|name| name.to_string())),
            Some(source) => {
                let specifier = utils::strip_quotes(source).to_string();
                if !self.imported.contains_key(&specifier) {
                    let tokens = self.resolver.resolve(&specifier)?;
                    self.imported.insert(specifier.clone(), tokens);
                }
                let imported = &self.imported[&specifier];
                for name in &names {
                    let value = imported.get(*name).ok_or_else(|| {
                        self.scanner.error_at(
                            at,
                            format!("composes: class '{}' not found in '{}'", name, specifier),
                        )
                    })?;
                    composed.extend(value.split_whitespace().map(str::to_string));
                }
            }
        }

        for local in &locals {
            if let Some(names) = self.tokens.get_mut(local) {
                names.extend(composed.iter().cloned());
            }
        }
        Ok(())
    }
}

/// Split leading block comments (and the whitespace around them) from a
/// declaration.
fn split_leading_comments(text: &str) -> (&str, &str) {
    let mut offset = 0;
    loop {
        let rest = &text[offset..];
        let trimmed = rest.trim_start();
        if !trimmed.starts_with("/*") {
            return text.split_at(offset);
        }
        let start = offset + (rest.len() - trimmed.len());
        match trimmed.find("*/") {
            Some(end) => offset = start + end + 2,
            None => return text.split_at(offset),
        }
    }
}

/// `.a` or `.a, .b`: every selector of the list is one bare class.
fn is_class_list(selector: &str) -> bool {
    selector.split(',').all(|part| {
        let chars: Vec<char> = part.trim().chars().collect();
        chars.len() > 1 && chars[0] == '.' && is_class_start(chars[1]) && class_name_end(&chars, 1) == chars.len()
    })
}

/// The text inside `prefix ... )`.
fn wrapped<'s>(name: &'s str, prefix: &str) -> Option<&'s str> {
    name.strip_prefix(prefix)?.strip_suffix(')').map(str::trim)
}

fn is_animation_keyword(word: &str, shorthand: bool) -> bool {
    let word = word.to_ascii_lowercase();
    ANIMATION_NAME_KEYWORDS.contains(&word.as_str()) || (shorthand && ANIMATION_KEYWORDS.contains(&word.as_str()))
}

fn is_ident_start(ch: char, next: Option<char>) -> bool {
    if ch == '-' {
        return next.map_or(false, |next| next.is_ascii_alphabetic() || next == '_' || next == '-');
    }
    ch.is_ascii_alphabetic() || ch == '_' || !ch.is_ascii()
}

fn is_number_start(ch: char, next: Option<char>) -> bool {
    ch.is_ascii_digit() || (matches!(ch, '.' | '-' | '+') && next.map_or(false, |next| next.is_ascii_digit()))
}

/// End of a number with its unit, or of a `!flag`.
fn token_end(chars: &[char], start: usize) -> usize {
    let mut end = start;
    while end < chars.len() && (chars[end].is_ascii_alphanumeric() || matches!(chars[end], '.' | '%' | '-')) {
        end += 1;
    }
    end
}

fn at_rule_name(rest: &str) -> String {
    let name: String = rest
        .chars()
        .take_while(|c| c.is_ascii_alphanumeric() || *c == '-' || *c == '_')
        .collect();
    name.to_ascii_lowercase()
}

fn is_class_start(ch: char) -> bool {
    ch.is_ascii_alphabetic() || ch == '_' || ch == '-' || ch == '\\' || !ch.is_ascii()
}

fn class_name_end(chars: &[char], start: usize) -> usize {
    let mut end = start;
    while end < chars.len() {
        let ch = chars[end];
        if ch == '\\' && end + 1 < chars.len() {
            end += 2;
        } else if ch.is_ascii_alphanumeric() || ch == '_' || ch == '-' || !ch.is_ascii() {
            end += 1;
        } else {
            break;
        }
    }
    end
}

fn starts_with(chars: &[char], at: usize, needle: &str) -> bool {
    let mut i = at;
    for expected in needle.chars() {
        if chars.get(i) != Some(&expected) {
            return false;
        }
        i += 1;
    }
    true
}

/// `needle` at `at`, not followed by another identifier character.
fn starts_with_word(chars: &[char], at: usize, needle: &str) -> bool {
    starts_with(chars, at, needle)
        && chars
            .get(at + needle.chars().count())
            .map_or(true, |&next| !(next.is_ascii_alphanumeric() || next == '-' || next == '_' || next == '('))
}

fn find_sequence(chars: &[char], from: usize, sequence: &[char]) -> Option<usize> {
    (from..chars.len()).find(|&i| chars[i..].starts_with(sequence))
}

/// Index just past the string starting at `start`.
fn skip_string(chars: &[char], start: usize) -> usize {
    let quote = chars[start];
    let mut i = start + 1;
    while i < chars.len() {
        match chars[i] {
            '\\' => i += 2,
            ch if ch == quote => return i + 1,
            _ => i += 1,
        }
    }
    chars.len()
}

fn matching_paren(chars: &[char], open: usize) -> Option<usize> {
    let mut depth = 0usize;
    for (offset, &ch) in chars[open..].iter().enumerate() {
        match ch {
            '(' => depth += 1,
            ')' => {
                depth -= 1;
                if depth == 0 {
                    return Some(open + offset);
                }
            }
            _ => {}
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Serves tokens from a fixed map and counts lookups.
    struct StaticResolver {
        files: HashMap<String, ExportTokenMap>,
        calls: Vec<String>,
    }

    impl StaticResolver {
        fn new(files: &[(&str, &[(&str, &str)])]) -> Self {
            Self {
                files: files
                    .iter()
                    .map(|(name, tokens)| {
                        let tokens = tokens
                            .iter()
                            .map(|(k, v)| (k.to_string(), v.to_string()))
                            .collect();
                        (name.to_string(), tokens)
                    })
                    .collect(),
                calls: Vec::new(),
            }
        }
    }

    impl ComposesResolver for StaticResolver {
        fn resolve(&mut self, specifier: &str) -> Result<ExportTokenMap> {
            self.calls.push(specifier.to_string());
            self.files
                .get(specifier)
                .cloned()
                .ok_or_else(|| CompilerError::resolution(specifier, "unknown"))
        }
    }

    fn scope(css: &str, resolver: &mut StaticResolver) -> Result<TransformOutput> {
        let rename = |local: &str| Ok(format!("_test__{}", local));
        CssModulesTransform::new().transform(css, "/app/test.css", &rename, resolver)
    }

    fn tokens(pairs: &[(&str, &str)]) -> ExportTokenMap {
        pairs.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect()
    }

    #[test]
    fn test_rewrites_class_selectors() {
        let output = scope(
            ".test { color: red; } .test2 { color: blue; }",
            &mut StaticResolver::new(&[]),
        )
        .unwrap();
        assert_eq!(
            output.css,
            "._test__test { color: red; } ._test__test2 { color: blue; }"
        );
        assert_eq!(
            output.tokens,
            tokens(&[("test", "_test__test"), ("test2", "_test__test2")])
        );
    }

    #[test]
    fn test_values_comments_and_strings_untouched() {
        let css = "/* .note */\n.a[data-x=\".b\"] { background: url(./img.png); content: \".c\"; }";
        let output = scope(css, &mut StaticResolver::new(&[])).unwrap();
        assert_eq!(
            output.css,
            "/* .note */\n._test__a[data-x=\".b\"] { background: url(./img.png); content: \".c\"; }"
        );
        assert_eq!(output.tokens.len(), 1);
    }

    #[test]
    fn test_global_and_local() {
        let output = scope(
            ":global(.app) .a, .b :global .c .d, :local(.e) {}",
            &mut StaticResolver::new(&[]),
        )
        .unwrap();
        assert_eq!(
            output.css,
            ".app ._test__a, ._test__b .c .d, ._test__e {}"
        );
        let keys: Vec<&String> = output.tokens.keys().collect();
        assert_eq!(keys, vec!["a", "b", "e"]);
    }

    #[test]
    fn test_keyframes_and_media() {
        let css = "@keyframes fade { from { opacity: 0; } to { opacity: 1; } }\n@media (min-width: 1px) { .a { animation: fade 1s; } }";
        let output = scope(css, &mut StaticResolver::new(&[])).unwrap();
        assert!(output.css.contains("@keyframes _test__fade { from { opacity: 0; } to { opacity: 1; } }"));
        assert!(output.css.contains("@media (min-width: 1px) { ._test__a { animation: _test__fade 1s; } }"));
        let keys: Vec<&String> = output.tokens.keys().collect();
        assert_eq!(keys, vec!["fade", "a"]);
    }

    #[test]
    fn test_animation_values_skip_keywords_and_globals() {
        let css = "@keyframes :global(spin) {}\n@-webkit-keyframes pulse {}\n.a {\n  animation: 2s ease-in-out infinite pulse, spin 1s steps(4, end) !important;\n  animation-name: none, glow;\n  animation-duration: 1s;\n}";
        let output = scope(css, &mut StaticResolver::new(&[])).unwrap();

        assert!(output.css.contains("@keyframes spin {}"));
        assert!(output.css.contains("@-webkit-keyframes _test__pulse {}"));
        assert!(output
            .css
            .contains("animation: 2s ease-in-out infinite _test__pulse, _test__spin 1s steps(4, end) !important;"));
        assert!(output.css.contains("animation-name: none, _test__glow;"));
        assert!(output.css.contains("animation-duration: 1s;"));
        assert!(output.tokens.contains_key("glow"));
        assert!(!output.tokens.contains_key("none"));
        assert!(!output.tokens.contains_key("infinite"));
    }

    #[test]
    fn test_id_selectors_are_scoped() {
        let output = scope(
            "#main .a, :global(#app) { color: red; }",
            &mut StaticResolver::new(&[]),
        )
        .unwrap();
        assert_eq!(output.css, "#_test__main ._test__a, #app { color: red; }");
        assert_eq!(output.tokens, tokens(&[("main", "_test__main"), ("a", "_test__a")]));
    }

    #[test]
    fn test_composes_after_comment_is_applied() {
        let css = ".base {}\n.a { /* shared */ composes: base; color: red; }";
        let output = scope(css, &mut StaticResolver::new(&[])).unwrap();
        assert_eq!(output.tokens["a"], "_test__a _test__base");
        assert!(!output.css.contains("composes"));
        assert!(output.css.contains("/* shared */"));
    }

    #[test]
    fn test_composes_requires_single_class_selectors() {
        let mut resolver = StaticResolver::new(&[]);
        for css in [
            ".base {} .a .b { composes: base; }",
            ".base {} .a:hover { composes: base; }",
            ".base {} #a { composes: base; }",
        ] {
            assert!(
                matches!(scope(css, &mut resolver), Err(CompilerError::Transform { .. })),
                "{}",
                css
            );
        }

        let output = scope(".base {} .a, .b { composes: base; }", &mut resolver).unwrap();
        assert_eq!(output.tokens["a"], "_test__a _test__base");
        assert_eq!(output.tokens["b"], "_test__b _test__base");
    }

    #[test]
    fn test_composes_local_global_and_imported() {
        let mut resolver = StaticResolver::new(&[("./b.css", &[("x", "_b__x _c__x")])]);
        let css = ".base { color: red; }\n.a {\n  composes: base;\n  composes: shared from global;\n  composes: x from \"./b.css\";\n  margin: 0;\n}\n.z { composes: x from './b.css'; }";
        let output = scope(css, &mut resolver).unwrap();

        assert_eq!(
            output.tokens["a"],
            "_test__a _test__base shared _b__x _c__x"
        );
        assert_eq!(output.tokens["z"], "_test__z _b__x _c__x");
        assert!(!output.css.contains("composes"));
        assert!(output.css.contains("margin: 0;"));
        // One lookup per distinct specifier.
        assert_eq!(resolver.calls, vec!["./b.css"]);
        // Removed declarations keep their line breaks.
        assert_eq!(utils::line_count(&output.css), utils::line_count(css));
    }

    #[test]
    fn test_composes_unknown_class_is_an_error() {
        let mut resolver = StaticResolver::new(&[("./b.css", &[("x", "_b__x")])]);
        assert!(matches!(
            scope(".a { composes: nope; }", &mut resolver),
            Err(CompilerError::Transform { .. })
        ));
        assert!(matches!(
            scope(".a { composes: y from './b.css'; }", &mut resolver),
            Err(CompilerError::Transform { .. })
        ));
        assert!(matches!(
            scope(".a { composes: y from './missing.css'; }", &mut resolver),
            Err(CompilerError::Resolution { .. })
        ));
    }

    #[test]
    fn test_unbalanced_braces() {
        let mut resolver = StaticResolver::new(&[]);
        match scope(".a {\n  color: red;\n", &mut resolver) {
            Err(CompilerError::Transform { step, line, .. }) => {
                assert_eq!(step, ProcessingStep::CssModulesCompilation);
                assert_eq!(line, 1);
            }
            other => panic!("Expected transform error, got {:?}", other),
        }
        assert!(scope("}", &mut resolver).is_err());
    }

    #[test]
    fn test_source_map_covers_every_line() {
        let output = scope(".a {}\n.b {}\n", &mut StaticResolver::new(&[])).unwrap();
        let map = output.source_map.unwrap();
        assert_eq!(map["version"], 3);
        assert_eq!(map["mappings"], "AAAA;AACA;AACA");
        assert_eq!(map["sources"][0], "/app/test.css");
    }
}
