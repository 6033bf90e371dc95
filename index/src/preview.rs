//! Code preview extraction for `open_at`.
//!
//! Pulls a window of lines around an anchor, truncates long lines with an
//! ellipsis, strips control characters, and refuses binary files (NUL in
//! the first 8 KiB).

use std::path::Path;

use serde::Serialize;

use crate::error::IndexErr;
use crate::error::Result;

/// Default context on each side of the anchor line.
pub const DEFAULT_CONTEXT_LINES: u32 = 10;

/// Longest rendered line before truncation.
const MAX_LINE_CHARS: usize = 300;

/// Binary sniff window.
const SNIFF_BYTES: usize = 8 * 1024;

/// One rendered preview line.
#[derive(Debug, Clone, Serialize)]
pub struct PreviewLine {
    /// 1-based line number.
    pub number: u32,
    pub text: String,
    /// True when the raw line exceeded the length cap.
    pub truncated: bool,
}

/// Extracted preview window.
#[derive(Debug, Clone, Serialize)]
pub struct Preview {
    pub file: String,
    /// The requested anchor line, 1-based.
    pub line: u32,
    pub start_line: u32,
    pub end_line: u32,
    pub lines: Vec<PreviewLine>,
    /// `true` when lines precede the window; rendered as a leading `…`.
    pub truncated_start: bool,
    /// `true` when lines follow the window.
    pub truncated_end: bool,
}

impl Preview {
    /// Render as plain text with ellipsis markers.
    pub fn render(&self) -> String {
        let mut out = String::new();
        if self.truncated_start {
            out.push_str("…\n");
        }
        for line in &self.lines {
            out.push_str(&format!("{:>6} | {}", line.number, line.text));
            if line.truncated {
                out.push('…');
            }
            out.push('\n');
        }
        if self.truncated_end {
            out.push_str("…\n");
        }
        out
    }
}

/// Whether the first 8 KiB contain a NUL byte.
pub fn looks_binary(bytes: &[u8]) -> bool {
    bytes[..bytes.len().min(SNIFF_BYTES)].contains(&0)
}

/// Strip control characters, keeping tabs.
fn sanitize(line: &str) -> String {
    line.chars()
        .filter(|c| !c.is_control() || *c == '\t')
        .collect()
}

/// Extract a preview window from already-read content.
pub fn extract(content: &str, file: &str, line: u32, before: u32, after: u32) -> Preview {
    let all_lines: Vec<&str> = content.lines().collect();
    let total = all_lines.len() as u32;
    let line = line.clamp(1, total.max(1));

    let start_line = line.saturating_sub(before).max(1);
    let end_line = (line + after).min(total.max(1));

    let lines = (start_line..=end_line)
        .filter_map(|number| {
            all_lines.get(number as usize - 1).map(|raw| {
                let sanitized = sanitize(raw);
                let truncated = sanitized.chars().count() > MAX_LINE_CHARS;
                let text = if truncated {
                    sanitized.chars().take(MAX_LINE_CHARS).collect()
                } else {
                    sanitized
                };
                PreviewLine {
                    number,
                    text,
                    truncated,
                }
            })
        })
        .collect();

    Preview {
        file: file.to_string(),
        line,
        start_line,
        end_line,
        lines,
        truncated_start: start_line > 1,
        truncated_end: end_line < total,
    }
}

/// Read a file and extract a preview, refusing binaries.
pub fn open_at(root: &Path, file: &str, line: u32, before: u32, after: u32) -> Result<Preview> {
    let full_path = root.join(file);
    let bytes = std::fs::read(&full_path).map_err(|e| match e.kind() {
        std::io::ErrorKind::NotFound => IndexErr::FileNotFound {
            path: full_path.clone(),
        },
        std::io::ErrorKind::PermissionDenied => IndexErr::PermissionDenied {
            path: full_path.clone(),
        },
        _ => IndexErr::FileRead {
            path: full_path.clone(),
            cause: e.to_string(),
        },
    })?;

    if looks_binary(&bytes) {
        return Err(IndexErr::BinaryFile { path: full_path });
    }
    let content = String::from_utf8_lossy(&bytes);
    Ok(extract(&content, file, line, before, after))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn numbered_content(lines: u32) -> String {
        (1..=lines).map(|i| format!("line {i}\n")).collect()
    }

    #[test]
    fn test_window_at_file_start_has_no_leading_ellipsis() {
        // before = 3, after = 6, line = 1.
        let content = numbered_content(20);
        let preview = extract(&content, "a.ts", 1, 3, 6);

        assert_eq!(preview.start_line, 1);
        assert_eq!(preview.end_line, 7);
        assert!(!preview.truncated_start);
        assert!(preview.truncated_end);
        assert!(!preview.render().starts_with("…"));
        assert!(preview.render().ends_with("…\n"));
    }

    #[test]
    fn test_window_in_middle_has_both_markers() {
        let content = numbered_content(40);
        let preview = extract(&content, "a.ts", 20, 3, 3);
        assert_eq!(preview.start_line, 17);
        assert_eq!(preview.end_line, 23);
        assert!(preview.truncated_start);
        assert!(preview.truncated_end);
        assert!(preview.render().starts_with("…\n"));
    }

    #[test]
    fn test_long_line_truncated_with_marker() {
        let content = format!("short\n{}\nshort again\n", "x".repeat(400));
        let preview = extract(&content, "a.ts", 2, 1, 1);
        let long = &preview.lines[1];
        assert!(long.truncated);
        assert_eq!(long.text.chars().count(), MAX_LINE_CHARS);
        assert!(preview.render().contains(&format!("{}…", "x".repeat(MAX_LINE_CHARS))));
    }

    #[test]
    fn test_control_characters_sanitized() {
        let content = "a\u{1b}[31mred\u{7}bell\tkeep-tab\n";
        let preview = extract(content, "a.ts", 1, 0, 0);
        assert_eq!(preview.lines[0].text, "a[31mredbell\tkeep-tab");
    }

    #[test]
    fn test_binary_guard() {
        assert!(looks_binary(b"ELF\0binary"));
        assert!(!looks_binary(b"plain text content"));

        // NUL beyond the sniff window is not checked.
        let mut big = vec![b'a'; SNIFF_BYTES + 10];
        big[SNIFF_BYTES + 5] = 0;
        assert!(!looks_binary(&big));
    }

    #[test]
    fn test_open_at_reads_from_disk() {
        let dir = tempfile::TempDir::new().unwrap();
        std::fs::write(dir.path().join("src.ts"), numbered_content(5)).unwrap();

        let preview = open_at(dir.path(), "src.ts", 3, 1, 1).unwrap();
        assert_eq!(preview.lines.len(), 3);
        assert_eq!(preview.lines[0].number, 2);

        let err = open_at(dir.path(), "missing.ts", 1, 1, 1).unwrap_err();
        assert!(matches!(err, IndexErr::FileNotFound { .. }));
    }

    #[test]
    fn test_open_at_refuses_binary() {
        let dir = tempfile::TempDir::new().unwrap();
        std::fs::write(dir.path().join("blob.bin"), b"head\0tail").unwrap();
        let err = open_at(dir.path(), "blob.bin", 1, 1, 1).unwrap_err();
        assert!(matches!(err, IndexErr::BinaryFile { .. }));
    }

    #[test]
    fn test_anchor_clamped_to_file() {
        let content = numbered_content(3);
        let preview = extract(&content, "a.ts", 99, 2, 2);
        assert_eq!(preview.line, 3);
        assert_eq!(preview.end_line, 3);
    }
}
