//! Syntax parsing with incremental reparse and error recovery reporting.

use serde::Deserialize;
use serde::Serialize;
use tree_sitter::InputEdit;
use tree_sitter::Node;
use tree_sitter::Point;
use tree_sitter::Tree;

use crate::error::IndexErr;
use crate::error::Result;
use crate::language::Language;
use crate::language::grammar_for;
use crate::types::Span;

/// Minimum parse buffer size.
const MIN_BUFFER_BYTES: usize = 64 * 1024;

/// Error-message preview length cap.
const PREVIEW_MAX_CHARS: usize = 50;

/// Buffer sizing policy: at least 64 KiB, otherwise twice the source size.
pub fn parse_buffer_size(source_len: usize) -> usize {
    MIN_BUFFER_BYTES.max(source_len * 2)
}

/// A single text edit for incremental reparsing.
///
/// Byte offsets and `(row, column)` points describe the replaced region
/// before and after the edit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceEdit {
    pub start_index: usize,
    pub old_end_index: usize,
    pub new_end_index: usize,
    pub start_pos: (usize, usize),
    pub old_end_pos: (usize, usize),
    pub new_end_pos: (usize, usize),
}

impl SourceEdit {
    fn to_input_edit(self) -> InputEdit {
        InputEdit {
            start_byte: self.start_index,
            old_end_byte: self.old_end_index,
            new_end_byte: self.new_end_index,
            start_position: Point {
                row: self.start_pos.0,
                column: self.start_pos.1,
            },
            old_end_position: Point {
                row: self.old_end_pos.0,
                column: self.old_end_pos.1,
            },
            new_end_position: Point {
                row: self.new_end_pos.0,
                column: self.new_end_pos.1,
            },
        }
    }
}

/// A syntax error extracted from a parsed tree.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyntaxError {
    pub span: Span,
    pub message: String,
    /// True when declaration-level symbols follow the error.
    pub recovered: bool,
    /// `skip_statement` when recovered, `none` otherwise.
    pub strategy: String,
    /// Number of declaration-level nodes starting after the error.
    pub symbols_after_error: u32,
}

/// Syntax parser over cached grammars.
///
/// Holds one reusable `tree_sitter::Parser`; switching language swaps the
/// grammar on the same parser instance.
pub struct SyntaxParser {
    parser: tree_sitter::Parser,
    language: Option<Language>,
}

impl Default for SyntaxParser {
    fn default() -> Self {
        Self::new()
    }
}

impl SyntaxParser {
    pub fn new() -> Self {
        Self {
            parser: tree_sitter::Parser::new(),
            language: None,
        }
    }

    fn ensure_language(&mut self, language: Language) -> Result<()> {
        if self.language != Some(language) {
            self.parser
                .set_language(&grammar_for(language))
                .map_err(|e| IndexErr::ParseFailed {
                    path: std::path::PathBuf::new(),
                    cause: format!("grammar rejected: {e}"),
                })?;
            self.language = Some(language);
        }
        Ok(())
    }

    /// Parse `source` from scratch.
    pub fn parse(&mut self, source: &str, language: Language) -> Result<Tree> {
        self.ensure_language(language)?;
        self.parser
            .parse(source, None)
            .ok_or_else(|| IndexErr::ParseFailed {
                path: std::path::PathBuf::new(),
                cause: "parser returned no tree".to_string(),
            })
    }

    /// Incrementally reparse after applying `edits` to `old_tree`.
    ///
    /// Each edit mutates the old tree's node positions; the mutated tree is
    /// then handed to tree-sitter as a reuse hint.
    pub fn reparse(
        &mut self,
        source: &str,
        language: Language,
        old_tree: &mut Tree,
        edits: &[SourceEdit],
    ) -> Result<Tree> {
        self.ensure_language(language)?;
        for edit in edits {
            old_tree.edit(&edit.to_input_edit());
        }
        self.parser
            .parse(source, Some(old_tree))
            .ok_or_else(|| IndexErr::ParseFailed {
                path: std::path::PathBuf::new(),
                cause: "incremental parse returned no tree".to_string(),
            })
    }
}

/// Node kinds that count as declaration-level symbols for recovery
/// detection.
fn is_declaration_kind(kind: &str) -> bool {
    matches!(
        kind,
        "function_declaration"
            | "function_definition"
            | "function_item"
            | "generator_function_declaration"
            | "class_declaration"
            | "class_definition"
            | "method_definition"
            | "method_declaration"
            | "variable_declaration"
            | "lexical_declaration"
            | "let_declaration"
            | "const_item"
            | "static_item"
            | "interface_declaration"
            | "type_alias_declaration"
            | "type_item"
            | "enum_declaration"
            | "enum_item"
            | "struct_item"
            | "trait_item"
            | "impl_item"
            | "decorated_definition"
    )
}

fn node_span(node: Node<'_>) -> Span {
    Span {
        start_line: node.start_position().row as u32 + 1,
        end_line: node.end_position().row as u32 + 1,
        start_col: node.start_position().column as u32,
        end_col: node.end_position().column as u32,
        start_byte: node.start_byte() as u32,
        end_byte: node.end_byte() as u32,
    }
}

/// Walk the tree collecting ERROR nodes with recovery metadata.
pub fn extract_errors(tree: &Tree, source: &str) -> Vec<SyntaxError> {
    let mut errors = Vec::new();
    let mut error_nodes = Vec::new();
    let mut declaration_starts = Vec::new();
    collect(tree.root_node(), &mut error_nodes, &mut declaration_starts);

    for node in error_nodes {
        let span = node_span(node);
        let preview = error_preview(source, node.start_byte(), node.end_byte());
        let symbols_after = declaration_starts
            .iter()
            .filter(|&&start| start > node.end_byte())
            .count() as u32;
        let recovered = symbols_after > 0;
        errors.push(SyntaxError {
            message: format!(
                "Syntax error at line {}, column {}: unexpected \"{preview}\"",
                span.start_line, span.start_col
            ),
            span,
            recovered,
            strategy: if recovered { "skip_statement" } else { "none" }.to_string(),
            symbols_after_error: symbols_after,
        });
    }
    errors
}

fn collect<'a>(node: Node<'a>, errors: &mut Vec<Node<'a>>, declarations: &mut Vec<usize>) {
    if node.kind() == "ERROR" {
        errors.push(node);
    }
    if is_declaration_kind(node.kind()) {
        declarations.push(node.start_byte());
    }
    let mut cursor = node.walk();
    for child in node.children(&mut cursor) {
        collect(child, errors, declarations);
    }
}

fn error_preview(source: &str, start: usize, end: usize) -> String {
    let end = end.min(source.len());
    let start = start.min(end);
    let raw = &source[start..end];
    let preview: String = raw.chars().take(PREVIEW_MAX_CHARS).collect();
    preview.replace('\n', "\\n")
}
