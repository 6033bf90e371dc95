//! Whitespace normalization and the stable chunk hash.
//!
//! The hash must survive whitespace-only edits and change on any semantic
//! edit, so the input is normalized content concatenated with the linked
//! documentation and signature.

use crate::types::sha256_hex;

/// Normalize chunk content for hashing:
/// drop leading/trailing blank lines, strip the common indent of non-blank
/// lines, trim the result.
pub fn normalize(content: &str) -> String {
    let lines: Vec<&str> = content.lines().collect();

    let first = lines.iter().position(|l| !l.trim().is_empty());
    let Some(first) = first else {
        return String::new();
    };
    let last = lines
        .iter()
        .rposition(|l| !l.trim().is_empty())
        .unwrap_or(first);

    let body = &lines[first..=last];
    let min_indent = body
        .iter()
        .filter(|l| !l.trim().is_empty())
        .map(|l| l.chars().take_while(|c| c.is_whitespace()).count())
        .min()
        .unwrap_or(0);

    let stripped: Vec<&str> = body
        .iter()
        .map(|l| strip_indent(l, min_indent))
        .collect();

    stripped.join("\n").trim().to_string()
}

/// Drop up to `n` leading whitespace characters.
fn strip_indent(line: &str, n: usize) -> &str {
    let mut offset = 0;
    for (count, c) in line.chars().enumerate() {
        if count == n || !c.is_whitespace() {
            break;
        }
        offset += c.len_utf8();
    }
    &line[offset..]
}

/// Compute the stable 64-hex chunk hash.
///
/// Input is `normalize(content)` joined with documentation and signature by
/// NUL separators so field boundaries cannot collide.
pub fn chunk_hash(content: &str, documentation: Option<&str>, signature: Option<&str>) -> String {
    let input = format!(
        "{}\u{0}{}\u{0}{}",
        normalize(content),
        documentation.unwrap_or(""),
        signature.unwrap_or("")
    );
    sha256_hex(&input)
}
