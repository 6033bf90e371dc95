//! Core data types shared across the engine.

use std::path::Path;
use std::path::PathBuf;

use serde::Deserialize;
use serde::Serialize;
use sha2::Digest;
use sha2::Sha256;

/// Source span.
///
/// Lines are 1-based, columns 0-based, byte offsets half-open.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Span {
    pub start_line: u32,
    pub end_line: u32,
    pub start_col: u32,
    pub end_col: u32,
    pub start_byte: u32,
    pub end_byte: u32,
}

impl Default for Span {
    fn default() -> Self {
        Self::point(1, 0, 0)
    }
}

impl Span {
    /// A span covering a single point (used for synthesized symbols).
    pub fn point(line: u32, col: u32, byte: u32) -> Self {
        Self {
            start_line: line,
            end_line: line,
            start_col: col,
            end_col: col,
            start_byte: byte,
            end_byte: byte,
        }
    }

    /// Whether the span satisfies its ordering invariants.
    pub fn is_well_formed(&self) -> bool {
        self.start_line <= self.end_line && self.start_byte <= self.end_byte
    }

    /// Number of lines covered, inclusive.
    pub fn line_count(&self) -> u32 {
        self.end_line - self.start_line + 1
    }
}

/// Per-file identity record.
///
/// Exactly one active record exists per canonical path; deletion is soft so
/// cascades can still find chunk and embedding rows.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FileRecord {
    pub id: i64,
    /// Project-relative path, forward-slash normalized.
    pub path: String,
    /// SHA-256 of the file content, 64 hex chars.
    pub content_hash: String,
    pub language: String,
    pub size_bytes: i64,
    /// Filesystem mtime, Unix seconds.
    pub mtime: i64,
    /// When the file was last indexed, Unix seconds.
    pub indexed_at: i64,
    /// Soft-delete timestamp; `None` while the record is active.
    pub deleted_at: Option<i64>,
}

/// The nine logical chunk kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChunkKind {
    Function,
    Method,
    Constructor,
    Property,
    Class,
    Module,
    AsyncFunction,
    AsyncMethod,
    Generator,
}

impl ChunkKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Function => "function",
            Self::Method => "method",
            Self::Constructor => "constructor",
            Self::Property => "property",
            Self::Class => "class",
            Self::Module => "module",
            Self::AsyncFunction => "async_function",
            Self::AsyncMethod => "async_method",
            Self::Generator => "generator",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "function" => Some(Self::Function),
            "method" => Some(Self::Method),
            "constructor" => Some(Self::Constructor),
            "property" => Some(Self::Property),
            "class" => Some(Self::Class),
            "module" => Some(Self::Module),
            "async_function" => Some(Self::AsyncFunction),
            "async_method" => Some(Self::AsyncMethod),
            "generator" => Some(Self::Generator),
            _ => None,
        }
    }
}

impl std::fmt::Display for ChunkKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Context bundle attached to every chunk.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ChunkContext {
    /// Nearest enclosing class, if any.
    pub class_name: Option<String>,
    /// Declared parents of the enclosing class, in source order.
    pub class_inheritance: Vec<String>,
    /// File path relative to project root, forward-slash normalized.
    pub module_path: String,
    pub namespace: Option<String>,
    /// Full signature source text including parameters.
    pub method_signature: Option<String>,
    /// True when the chunk is not nested inside another function or method.
    pub is_top_level: bool,
    /// Hash of the directly enclosing chunk, if any.
    pub parent_chunk_hash: Option<String>,
}

/// A logical unit of indexed code.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Chunk {
    /// Database row id; 0 until stored.
    #[serde(default)]
    pub id: i64,
    /// Stable 64-hex content hash.
    pub chunk_hash: String,
    pub file_id: i64,
    pub kind: ChunkKind,
    pub name: String,
    pub content: String,
    pub normalized_content: String,
    /// 1-based, inclusive.
    pub start_line: u32,
    pub end_line: u32,
    pub start_byte: u32,
    pub end_byte: u32,
    pub language: String,
    pub context: ChunkContext,
    /// Leading documentation, if linked.
    pub documentation: Option<String>,
    pub signature: Option<String>,
    pub line_count: u32,
    pub char_count: u32,
    /// Unix seconds; 0 until stored.
    #[serde(default)]
    pub created_at: i64,
    #[serde(default)]
    pub updated_at: i64,
}

impl Chunk {
    /// Check the structural invariants of §3.
    pub fn check_invariants(&self) -> crate::error::Result<()> {
        if !is_valid_chunk_hash(&self.chunk_hash) {
            return Err(crate::error::IndexErr::InvalidChunkHash {
                hash: self.chunk_hash.clone(),
            });
        }
        if self.name.is_empty() {
            return Err(crate::error::IndexErr::Validation {
                rule: "chunk.name".to_string(),
                cause: "name must be non-empty".to_string(),
            });
        }
        if self.start_line > self.end_line || self.start_byte > self.end_byte {
            return Err(crate::error::IndexErr::Validation {
                rule: "chunk.span".to_string(),
                cause: format!(
                    "inverted span {}..{} ({}..{})",
                    self.start_line, self.end_line, self.start_byte, self.end_byte
                ),
            });
        }
        if self.line_count != self.end_line - self.start_line + 1 {
            return Err(crate::error::IndexErr::Validation {
                rule: "chunk.line_count".to_string(),
                cause: format!(
                    "line_count {} != {} - {} + 1",
                    self.line_count, self.end_line, self.start_line
                ),
            });
        }
        Ok(())
    }
}

/// Whether a string is a valid 64-char lowercase hex chunk hash.
pub fn is_valid_chunk_hash(hash: &str) -> bool {
    hash.len() == 64 && hash.bytes().all(|b| b.is_ascii_hexdigit() && !b.is_ascii_uppercase())
}

/// Compute the SHA-256 digest of arbitrary content as 64 hex chars.
pub fn sha256_hex(content: &str) -> String {
    hex::encode(Sha256::digest(content.as_bytes()))
}

/// A `file:line[:column]` reference safe for terminal linking.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Anchor {
    pub file: String,
    /// 1-based.
    pub line: u32,
    /// 0-based; omitted from display when `None`.
    pub column: Option<u32>,
}

impl std::fmt::Display for Anchor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self.column {
            Some(col) => write!(f, "{}:{}:{}", self.file, self.line, col),
            None => write!(f, "{}:{}", self.file, self.line),
        }
    }
}

/// Normalize a project-relative path to forward slashes.
pub fn module_path(path: &Path) -> String {
    path.to_string_lossy().replace('\\', "/")
}

/// Resolve `path` against `root` and normalize to a project-relative
/// module path.
pub fn relative_module_path(root: &Path, path: &Path) -> String {
    let rel = path.strip_prefix(root).unwrap_or(path);
    module_path(rel)
}

/// A file-change event observed by the watcher.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FileChangeEvent {
    pub id: u64,
    /// Project-relative path.
    pub path: PathBuf,
    /// Symlink-resolved absolute path.
    pub canonical_path: PathBuf,
    pub kind: ChangeKind,
    /// Unix milliseconds.
    pub timestamp: i64,
    pub status: EventStatus,
    pub retry_count: u32,
    pub error: Option<String>,
    /// Previous path, rename only.
    pub old_path: Option<PathBuf>,
    /// Previous canonical path, rename only.
    pub old_canonical_path: Option<PathBuf>,
    pub size: u64,
    pub is_directory: bool,
    pub is_symlink: bool,
}

/// Kind of filesystem change.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChangeKind {
    Create,
    Modify,
    Delete,
    Rename,
}

/// Processing status of a change event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EventStatus {
    Pending,
    Processing,
    Completed,
    Failed,
    Skipped,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_span_invariants() {
        let span = Span {
            start_line: 3,
            end_line: 7,
            start_col: 0,
            end_col: 1,
            start_byte: 40,
            end_byte: 120,
        };
        assert!(span.is_well_formed());
        assert_eq!(span.line_count(), 5);
    }

    #[test]
    fn test_chunk_hash_validity() {
        let good = sha256_hex("fn main() {}");
        assert!(is_valid_chunk_hash(&good));
        assert!(!is_valid_chunk_hash("abc"));
        assert!(!is_valid_chunk_hash(&good.to_uppercase()));
        assert!(!is_valid_chunk_hash(&format!("{}g", &good[..63])));
    }

    #[test]
    fn test_anchor_display() {
        let with_col = Anchor {
            file: "src/parser.ts".to_string(),
            line: 42,
            column: Some(4),
        };
        assert_eq!(with_col.to_string(), "src/parser.ts:42:4");

        let without = Anchor {
            file: "src/parser.ts".to_string(),
            line: 42,
            column: None,
        };
        assert_eq!(without.to_string(), "src/parser.ts:42");
    }

    #[test]
    fn test_chunk_invariant_check() {
        let chunk = Chunk {
            id: 0,
            chunk_hash: sha256_hex("body"),
            file_id: 1,
            kind: ChunkKind::Function,
            name: "add".to_string(),
            content: "function add() {}".to_string(),
            normalized_content: "function add() {}".to_string(),
            start_line: 1,
            end_line: 1,
            start_byte: 0,
            end_byte: 17,
            language: "javascript".to_string(),
            context: ChunkContext::default(),
            documentation: None,
            signature: None,
            line_count: 1,
            char_count: 17,
            created_at: 0,
            updated_at: 0,
        };
        assert!(chunk.check_invariants().is_ok());

        let mut bad = chunk.clone();
        bad.line_count = 2;
        assert!(bad.check_invariants().is_err());

        let mut bad = chunk;
        bad.name.clear();
        assert!(bad.check_invariants().is_err());
    }
}
