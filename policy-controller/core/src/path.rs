//! Converts slash-delimited field paths (`/a/b/0/c`) into the dotted, indexed
//! form the evaluation engine reads (`a.b[0].c`).

use std::fmt::Write;

/// Normalizes a slash path. Paths that do not start with `/` are assumed to
/// be normalized already and are returned unchanged.
pub fn normalize(path: &str) -> String {
    let Some(rest) = path.strip_prefix('/') else {
        return path.to_string();
    };

    let mut out = String::with_capacity(path.len() + 8);
    for raw in rest.split('/').filter(|s| !s.is_empty()) {
        let segment = unescape(raw);
        if segment.bytes().all(|b| b.is_ascii_digit()) {
            let _ = write!(out, "[{segment}]");
            continue;
        }
        if !out.is_empty() {
            out.push('.');
        }
        if is_identifier(&segment) {
            out.push_str(&segment);
        } else {
            out.push_str(&quote(&segment));
        }
    }
    out
}

/// Builds an expression selecting `path` beneath `root`.
pub fn expression(root: &str, path: &str) -> String {
    let normalized = normalize(path);
    if normalized.is_empty() {
        root.to_string()
    } else if normalized.starts_with('[') {
        format!("{root}{normalized}")
    } else {
        format!("{root}.{normalized}")
    }
}

/// Escapes a single key for use as a JSON pointer segment.
pub fn escape_pointer_segment(key: &str) -> String {
    key.replace('~', "~0").replace('/', "~1")
}

fn unescape(segment: &str) -> String {
    segment.replace("~1", "/").replace("~0", "~")
}

fn is_identifier(segment: &str) -> bool {
    let mut chars = segment.chars();
    match chars.next() {
        Some(c) if c.is_ascii_alphabetic() || c == '_' || c == '$' => {}
        _ => return false,
    }
    chars.all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '$')
}

fn quote(segment: &str) -> String {
    let mut out = String::with_capacity(segment.len() + 2);
    out.push('"');
    for c in segment.chars() {
        match c {
            '"' => out.push_str("\\\""),
            '\\' => out.push_str("\\\\"),
            c => out.push(c),
        }
    }
    out.push('"');
    out
}
