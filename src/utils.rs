//! Small string and path helpers used across the compiler

use regex::Regex;

/// Replace every backslash with a forward slash.
pub fn normalize_slashes(path: &str) -> String {
    path.replace('\\', "/")
}

/// Strip one layer of matching surrounding quotes, if present.
pub fn strip_quotes(value: &str) -> &str {
    let bytes = value.as_bytes();
    if bytes.len() >= 2 {
        let first = bytes[0];
        let last = bytes[bytes.len() - 1];
        if (first == b'"' || first == b'\'') && first == last {
            return &value[1..value.len() - 1];
        }
    }
    value
}

/// Final path segment.
pub fn basename(path: &str) -> &str {
    let trimmed = path.trim_end_matches('/');
    match trimmed.rfind(|c| c == '/' || c == '\\') {
        Some(idx) => &trimmed[idx + 1..],
        None => trimmed,
    }
}

/// Everything before the final segment, `.` when there is none.
pub fn dirname(path: &str) -> &str {
    match path.rfind(|c| c == '/' || c == '\\') {
        Some(0) => "/",
        Some(idx) => &path[..idx],
        None => ".",
    }
}

/// Extension of the final segment including the dot, or `""`.
pub fn extname(path: &str) -> &str {
    let base = basename(path);
    match base.rfind('.') {
        Some(0) | None => "",
        Some(idx) => &base[idx..],
    }
}

/// Whether a path looks absolute on either platform (`/x`, `C:/x`, `C:\x`).
pub fn is_absolute(path: &str) -> bool {
    if path.starts_with('/') || path.starts_with('\\') {
        return true;
    }
    let bytes = path.as_bytes();
    bytes.len() >= 2 && bytes[0].is_ascii_alphabetic() && bytes[1] == b':'
}

/// Hex md5 digest of some text. Used for content and option fingerprints.
pub fn content_hash(text: &str) -> String {
    hex::encode(md5::compute(text.as_bytes()).0)
}

/// Convert a class name to camelCase: `test-two` -> `testTwo`,
/// `foo_bar-baz` -> `fooBarBaz`, `Foo` -> `foo`.
pub fn camel_case(input: &str) -> String {
    let mut result = String::with_capacity(input.len());
    let mut upper_next = false;

    for ch in input.chars() {
        if ch == '-' || ch == '_' || ch == '.' || ch.is_whitespace() {
            upper_next = !result.is_empty();
            continue;
        }
        if upper_next {
            result.extend(ch.to_uppercase());
            upper_next = false;
        } else if result.is_empty() {
            result.extend(ch.to_lowercase());
        } else {
            result.push(ch);
        }
    }

    result
}

/// Whether any of the patterns matches the text.
pub fn matches_any(patterns: &[Regex], text: &str) -> bool {
    patterns.iter().any(|regex| regex.is_match(text))
}

/// Number of lines in a block of text, counting `\r\n`, `\r` and `\n`.
pub fn line_count(text: &str) -> usize {
    let mut count = 1;
    let mut chars = text.chars().peekable();
    while let Some(ch) = chars.next() {
        match ch {
            '\n' => count += 1,
            '\r' => {
                if chars.peek() == Some(&'\n') {
                    chars.next();
                }
                count += 1;
            }
            _ => {}
        }
    }
    count
}
