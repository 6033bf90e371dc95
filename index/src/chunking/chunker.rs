//! Chunk extraction from AST documents.
//!
//! A chunk is one of nine logical units. Inner functions are folded into
//! their enclosing chunk; classes produce one chunk for the class plus one
//! per member.

use std::collections::HashSet;
use std::time::Instant;

use serde::Deserialize;
use serde::Serialize;

use crate::ast::document::AstDocument;
use crate::ast::document::ClassSymbol;
use crate::ast::document::FunctionSymbol;
use crate::chunking::normalize::chunk_hash;
use crate::chunking::normalize::normalize;
use crate::types::Chunk;
use crate::types::ChunkContext;
use crate::types::ChunkKind;
use crate::types::Span;

/// Default warning threshold for oversized chunks, in lines.
pub const DEFAULT_LARGE_CHUNK_THRESHOLD: u32 = 5000;

/// Emitted when a chunk exceeds the large-chunk threshold. Indexing
/// proceeds; the event is advisory.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LargeChunkEvent {
    pub name: String,
    pub path: String,
    pub line_count: u32,
    pub threshold: u32,
}

/// Output of one chunking pass.
#[derive(Debug, Default)]
pub struct ChunkingResult {
    pub chunks: Vec<Chunk>,
    pub warnings: Vec<LargeChunkEvent>,
    /// Non-fatal per-symbol failures.
    pub errors: Vec<String>,
    pub duration_ms: u64,
}

/// Chunk extractor.
pub struct Chunker {
    large_chunk_threshold: u32,
}

impl Default for Chunker {
    fn default() -> Self {
        Self::new()
    }
}

impl Chunker {
    pub fn new() -> Self {
        Self {
            large_chunk_threshold: DEFAULT_LARGE_CHUNK_THRESHOLD,
        }
    }

    pub fn with_threshold(threshold: u32) -> Self {
        Self {
            large_chunk_threshold: threshold,
        }
    }

    /// Extract all chunks for one file.
    pub fn chunk_document(&self, doc: &AstDocument, source: &str, file_id: i64) -> ChunkingResult {
        let started = Instant::now();
        let mut result = ChunkingResult::default();
        let lines: Vec<&str> = source.lines().collect();

        // Spans of every callable, for inner-function detection.
        let callable_spans: Vec<Span> = doc
            .functions
            .values()
            .map(|f| f.base.span)
            .chain(
                doc.classes
                    .values()
                    .flat_map(|c| c.methods.values().map(|m| m.base.span)),
            )
            .collect();

        let mut seen_start_lines: HashSet<u32> = HashSet::new();

        // Free functions (skipping ones nested inside another callable).
        for func in doc.functions.values() {
            if is_nested(func.base.span, &callable_spans) {
                continue;
            }
            let kind = function_kind(func);
            let documentation = self.documentation_for(doc, &lines, func);
            self.push_chunk(
                &mut result,
                &mut seen_start_lines,
                doc,
                source,
                file_id,
                kind,
                &func.base.name,
                func.base.span,
                documentation,
                func.base.signature.clone(),
                ChunkContext {
                    module_path: doc.path.clone(),
                    namespace: enclosing_namespace(doc, func.base.span),
                    is_top_level: true,
                    ..Default::default()
                },
            );
        }

        // Classes and their members.
        for class in doc.classes.values() {
            let class_doc = self.documentation_for_base(doc, &lines, class.base.span.start_line, class.base.doc.as_deref());
            let class_hash = chunk_hash(
                slice_span(source, class.base.span),
                class_doc.as_deref(),
                class.base.signature.as_deref(),
            );
            self.push_chunk(
                &mut result,
                &mut seen_start_lines,
                doc,
                source,
                file_id,
                ChunkKind::Class,
                &class.base.name,
                class.base.span,
                class_doc,
                class.base.signature.clone(),
                ChunkContext {
                    class_inheritance: class.inheritance.clone(),
                    module_path: doc.path.clone(),
                    namespace: enclosing_namespace(doc, class.base.span),
                    is_top_level: true,
                    ..Default::default()
                },
            );

            for method in class.methods.values() {
                let kind = method_kind(doc, method);
                let documentation = self.documentation_for(doc, &lines, method);
                self.push_chunk(
                    &mut result,
                    &mut seen_start_lines,
                    doc,
                    source,
                    file_id,
                    kind,
                    &format!("{}.{}", class.base.name, method.base.name),
                    method.base.span,
                    documentation,
                    method.base.signature.clone(),
                    member_context(doc, class, Some(&class_hash), method.base.signature.clone()),
                );
            }

            for prop in class.properties.values() {
                self.push_chunk(
                    &mut result,
                    &mut seen_start_lines,
                    doc,
                    source,
                    file_id,
                    ChunkKind::Property,
                    &format!("{}.{}", class.base.name, prop.base.name),
                    prop.base.span,
                    None,
                    None,
                    member_context(doc, class, Some(&class_hash), None),
                );
            }
        }

        // Namespace / module declarations.
        for namespace in doc.namespaces.values() {
            self.push_chunk(
                &mut result,
                &mut seen_start_lines,
                doc,
                source,
                file_id,
                ChunkKind::Module,
                &namespace.base.name,
                namespace.base.span,
                None,
                None,
                ChunkContext {
                    module_path: doc.path.clone(),
                    is_top_level: true,
                    ..Default::default()
                },
            );
        }

        result.chunks.sort_by_key(|c| c.start_line);
        result.duration_ms = started.elapsed().as_millis() as u64;
        result
    }

    #[allow(clippy::too_many_arguments)]
    fn push_chunk(
        &self,
        result: &mut ChunkingResult,
        seen_start_lines: &mut HashSet<u32>,
        doc: &AstDocument,
        source: &str,
        file_id: i64,
        kind: ChunkKind,
        name: &str,
        span: Span,
        documentation: Option<String>,
        signature: Option<String>,
        context: ChunkContext,
    ) {
        if name.is_empty() {
            result
                .errors
                .push(format!("skipped unnamed {kind} at line {}", span.start_line));
            return;
        }
        // (file_id, start_line) must stay unique per file.
        if !seen_start_lines.insert(span.start_line) {
            return;
        }

        let content = slice_span(source, span).to_string();
        let normalized = normalize(&content);
        let hash = chunk_hash(&content, documentation.as_deref(), signature.as_deref());
        let line_count = span.line_count();

        if line_count > self.large_chunk_threshold {
            result.warnings.push(LargeChunkEvent {
                name: name.to_string(),
                path: doc.path.clone(),
                line_count,
                threshold: self.large_chunk_threshold,
            });
        }

        let now = chrono::Utc::now().timestamp();
        result.chunks.push(Chunk {
            id: 0,
            chunk_hash: hash,
            file_id,
            kind,
            name: name.to_string(),
            char_count: content.chars().count() as u32,
            content,
            normalized_content: normalized,
            start_line: span.start_line,
            end_line: span.end_line,
            start_byte: span.start_byte,
            end_byte: span.end_byte,
            language: doc.language.clone(),
            context,
            documentation,
            signature,
            line_count,
            created_at: now,
            updated_at: now,
        });
    }

    fn documentation_for(
        &self,
        doc: &AstDocument,
        lines: &[&str],
        func: &FunctionSymbol,
    ) -> Option<String> {
        self.documentation_for_base(doc, lines, func.base.span.start_line, func.base.doc.as_deref())
    }

    /// Documentation linking.
    ///
    /// Python symbols carry their docstring already; other languages take
    /// the longest contiguous run of comments directly above the
    /// declaration, separated from it by whitespace only.
    fn documentation_for_base(
        &self,
        doc: &AstDocument,
        lines: &[&str],
        start_line: u32,
        docstring: Option<&str>,
    ) -> Option<String> {
        if let Some(ds) = docstring {
            return Some(ds.to_string());
        }
        if doc.language == "python" {
            return None;
        }

        let mut run: Vec<&str> = Vec::new();
        let mut boundary = start_line;
        loop {
            // Closest comment above the boundary with only blank lines in
            // between; repeated lookups extend the run upward.
            let above = doc
                .comments
                .iter()
                .filter(|c| {
                    c.span.end_line < boundary && blank_between(lines, c.span.end_line, boundary)
                })
                .max_by_key(|c| c.span.end_line);
            match above {
                Some(comment) => {
                    run.insert(0, comment.text.as_str());
                    boundary = comment.span.start_line;
                }
                None => break,
            }
        }

        if run.is_empty() {
            None
        } else {
            Some(run.join("\n"))
        }
    }
}

/// Whether all source lines strictly between `end_line` (a comment's last
/// line) and `start_line` (the declaration) are blank.
fn blank_between(lines: &[&str], end_line: u32, start_line: u32) -> bool {
    if end_line + 1 > start_line {
        return false;
    }
    ((end_line + 1)..start_line).all(|line| {
        lines
            .get(line as usize - 1)
            .map(|l| l.trim().is_empty())
            .unwrap_or(true)
    })
}

fn slice_span(source: &str, span: Span) -> &str {
    let start = (span.start_byte as usize).min(source.len());
    let end = (span.end_byte as usize).clamp(start, source.len());
    &source[start..end]
}

/// True when `span` sits strictly inside another callable's span.
fn is_nested(span: Span, callable_spans: &[Span]) -> bool {
    callable_spans.iter().any(|outer| {
        (outer.start_byte < span.start_byte && span.end_byte <= outer.end_byte)
            || (outer.start_byte <= span.start_byte && span.end_byte < outer.end_byte)
    })
}

fn function_kind(func: &FunctionSymbol) -> ChunkKind {
    if func.is_generator {
        ChunkKind::Generator
    } else if func.is_async {
        ChunkKind::AsyncFunction
    } else {
        ChunkKind::Function
    }
}

fn method_kind(doc: &AstDocument, method: &FunctionSymbol) -> ChunkKind {
    let ctor_name = match doc.language.as_str() {
        "python" => "__init__",
        "rust" => "new",
        _ => "constructor",
    };
    if method.base.name == ctor_name {
        ChunkKind::Constructor
    } else if method.is_generator {
        ChunkKind::Generator
    } else if method.is_async {
        ChunkKind::AsyncMethod
    } else {
        ChunkKind::Method
    }
}

fn member_context(
    doc: &AstDocument,
    class: &ClassSymbol,
    parent_chunk_hash: Option<&str>,
    method_signature: Option<String>,
) -> ChunkContext {
    ChunkContext {
        class_name: Some(class.base.name.clone()),
        class_inheritance: class.inheritance.clone(),
        module_path: doc.path.clone(),
        namespace: enclosing_namespace(doc, class.base.span),
        method_signature,
        is_top_level: true,
        parent_chunk_hash: parent_chunk_hash.map(|h| h.to_string()),
    }
}

fn enclosing_namespace(doc: &AstDocument, span: Span) -> Option<String> {
    doc.namespaces
        .values()
        .filter(|ns| {
            ns.base.span.start_byte <= span.start_byte && span.end_byte <= ns.base.span.end_byte
        })
        .min_by_key(|ns| ns.base.span.end_byte - ns.base.span.start_byte)
        .map(|ns| ns.base.name.clone())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ast::build_document;
    use crate::language::Language;
    use crate::parser::SyntaxParser;

    fn chunk_source(source: &str, language: Language) -> ChunkingResult {
        let tree = SyntaxParser::new().parse(source, language).unwrap();
        let doc = build_document("src/test.src", source, language, &tree, "test");
        Chunker::new().chunk_document(&doc, source, 1)
    }

    #[test]
    fn test_two_top_level_functions() {
        let source = "function add(a,b){return a+b;}\n\nfunction sub(a,b){return a-b;}";
        let result = chunk_source(source, Language::JavaScript);

        assert_eq!(result.chunks.len(), 2);
        let names: Vec<&str> = result.chunks.iter().map(|c| c.name.as_str()).collect();
        assert_eq!(names, vec!["add", "sub"]);
        for chunk in &result.chunks {
            assert_eq!(chunk.kind, ChunkKind::Function);
            assert!(chunk.context.is_top_level);
            chunk.check_invariants().unwrap();
        }

        // Hashes are stable across reruns.
        let rerun = chunk_source(source, Language::JavaScript);
        assert_eq!(result.chunks[0].chunk_hash, rerun.chunks[0].chunk_hash);
        assert_eq!(result.chunks[1].chunk_hash, rerun.chunks[1].chunk_hash);
    }

    #[test]
    fn test_inner_functions_are_not_chunks() {
        let source = "function outer() {\n  function inner() { return 1; }\n  return inner();\n}\n";
        let result = chunk_source(source, Language::JavaScript);

        assert_eq!(result.chunks.len(), 1);
        assert_eq!(result.chunks[0].name, "outer");
        assert!(result.chunks[0].content.contains("function inner"));
    }

    #[test]
    fn test_class_and_members() {
        let source = "class Service {\n  constructor(db) { this.db = db; }\n  async fetch(id) { return this.db.get(id); }\n  cache = new Map();\n}\n";
        let result = chunk_source(source, Language::JavaScript);

        let kinds: Vec<ChunkKind> = result.chunks.iter().map(|c| c.kind).collect();
        assert!(kinds.contains(&ChunkKind::Class));
        assert!(kinds.contains(&ChunkKind::Constructor));
        assert!(kinds.contains(&ChunkKind::AsyncMethod));
        assert!(kinds.contains(&ChunkKind::Property));

        let class_chunk = result
            .chunks
            .iter()
            .find(|c| c.kind == ChunkKind::Class)
            .unwrap();
        let method = result
            .chunks
            .iter()
            .find(|c| c.kind == ChunkKind::AsyncMethod)
            .unwrap();
        assert_eq!(method.context.class_name.as_deref(), Some("Service"));
        assert_eq!(
            method.context.parent_chunk_hash.as_deref(),
            Some(class_chunk.chunk_hash.as_str())
        );
    }

    #[test]
    fn test_generator_kind() {
        let source = "function* walk(tree) { yield tree; }\n";
        let result = chunk_source(source, Language::JavaScript);
        assert_eq!(result.chunks[0].kind, ChunkKind::Generator);
    }

    #[test]
    fn test_python_docstring_is_documentation() {
        let source = "def run(job):\n    \"\"\"Execute one job.\"\"\"\n    return job()\n";
        let result = chunk_source(source, Language::Python);
        assert_eq!(
            result.chunks[0].documentation.as_deref(),
            Some("Execute one job.")
        );
    }

    #[test]
    fn test_js_leading_comment_run_links() {
        let source = "// first\n// second\nfunction documented() {}\n";
        let result = chunk_source(source, Language::JavaScript);
        let doc = result.chunks[0].documentation.as_deref().unwrap();
        assert!(doc.contains("first"));
        assert!(doc.contains("second"));
    }

    #[test]
    fn test_documentation_feeds_hash() {
        let with_doc = chunk_source("/** d */\nfunction f() {}\n", Language::JavaScript);
        let without = chunk_source("function f() {}\n", Language::JavaScript);
        assert_ne!(
            with_doc.chunks[0].chunk_hash,
            without.chunks[0].chunk_hash
        );
    }

    #[test]
    fn test_no_functions_no_chunks() {
        let source = "import './boot';\nconst X = 1;\n";
        let result = chunk_source(source, Language::JavaScript);
        assert!(result.chunks.is_empty());
    }

    #[test]
    fn test_large_chunk_warning_boundary() {
        // Exactly at the threshold: no warning.
        let body: String = (0..8).map(|i| format!("  line{i}();\n")).collect();
        let source = format!("function big() {{\n{body}}}\n");
        let tree = SyntaxParser::new()
            .parse(&source, Language::JavaScript)
            .unwrap();
        let doc = build_document("big.js", &source, Language::JavaScript, &tree, "test");

        let at = Chunker::with_threshold(10).chunk_document(&doc, &source, 1);
        assert_eq!(at.chunks[0].line_count, 10);
        assert!(at.warnings.is_empty());

        let over = Chunker::with_threshold(9).chunk_document(&doc, &source, 1);
        assert_eq!(over.warnings.len(), 1);
        assert_eq!(over.warnings[0].threshold, 9);
    }

    #[test]
    fn test_namespace_module_chunk() {
        let source = "namespace Geometry {\n  export function area(r: number) { return r * r; }\n}\n";
        let result = chunk_source(source, Language::TypeScript);

        let module = result.chunks.iter().find(|c| c.kind == ChunkKind::Module);
        let module = module.expect("module chunk for namespace");
        assert_eq!(module.name, "Geometry");
        let func = result.chunks.iter().find(|c| c.name == "area").unwrap();
        assert_eq!(func.context.namespace.as_deref(), Some("Geometry"));
    }
}
