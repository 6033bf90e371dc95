//! Document builder with post-walk fix-up passes.
//!
//! Extractors feed symbols, comments, and raw call pairs into the builder;
//! `build` then runs the two fix-up passes: doc-comment association and
//! call-graph construction.

use crate::ast::calls::CallSite;
use crate::ast::document::AstDocument;
use crate::ast::document::ClassSymbol;
use crate::ast::document::Comment;
use crate::ast::document::CommentKind;
use crate::ast::document::ComponentSymbol;
use crate::ast::document::ConstantSymbol;
use crate::ast::document::EnumSymbol;
use crate::ast::document::ExportStatement;
use crate::ast::document::FunctionSymbol;
use crate::ast::document::ImportStatement;
use crate::ast::document::InterfaceSymbol;
use crate::ast::document::ModuleSymbol;
use crate::ast::document::TypeAliasSymbol;
use crate::language::Language;
use crate::parser::SyntaxError;

/// Maximum line distance for doc-comment association, exclusive at 0 and
/// inclusive at 5: `symbol.start_line - comment.start_line ∈ (0, 5]`.
const DOC_ASSOCIATION_MAX_LINES: u32 = 5;

/// Incrementally populated builder for one file's [`AstDocument`].
pub struct DocumentBuilder {
    doc: AstDocument,
    calls: Vec<CallSite>,
}

impl DocumentBuilder {
    pub fn new(path: &str, language: Language, file_size: u64) -> Self {
        Self {
            doc: AstDocument {
                path: path.to_string(),
                language: language.tag().to_string(),
                file_size,
                ..Default::default()
            },
            calls: Vec::new(),
        }
    }

    pub fn add_function(&mut self, symbol: FunctionSymbol) {
        self.doc.functions.insert(symbol.base.name.clone(), symbol);
    }

    pub fn add_class(&mut self, symbol: ClassSymbol) {
        self.doc.classes.insert(symbol.base.name.clone(), symbol);
    }

    pub fn add_interface(&mut self, symbol: InterfaceSymbol) {
        self.doc.interfaces.insert(symbol.base.name.clone(), symbol);
    }

    pub fn add_type_alias(&mut self, symbol: TypeAliasSymbol) {
        self.doc
            .type_aliases
            .insert(symbol.base.name.clone(), symbol);
    }

    pub fn add_enum(&mut self, symbol: EnumSymbol) {
        self.doc.enums.insert(symbol.base.name.clone(), symbol);
    }

    pub fn add_constant(&mut self, symbol: ConstantSymbol) {
        self.doc.constants.insert(symbol.base.name.clone(), symbol);
    }

    pub fn add_component(&mut self, symbol: ComponentSymbol) {
        self.doc.components.insert(symbol.base.name.clone(), symbol);
    }

    pub fn add_namespace(&mut self, symbol: ModuleSymbol) {
        self.doc.namespaces.insert(symbol.base.name.clone(), symbol);
    }

    pub fn add_import(&mut self, import: ImportStatement) {
        self.doc.imports.push(import);
    }

    pub fn add_export(&mut self, export: ExportStatement) {
        self.doc.exports.push(export);
    }

    pub fn add_comment(&mut self, comment: Comment) {
        self.doc.comments.push(comment);
    }

    pub fn add_errors(&mut self, errors: Vec<SyntaxError>) {
        self.doc.errors.extend(errors);
    }

    pub fn add_calls(&mut self, calls: Vec<CallSite>) {
        self.calls.extend(calls);
    }

    /// Read-only view of the document built so far.
    pub fn document(&self) -> &AstDocument {
        &self.doc
    }

    /// Finalize the document: associate doc comments, build the call graph.
    pub fn build(mut self, line_count: u32, parser_version: &str) -> AstDocument {
        self.doc.line_count = line_count;
        self.doc.parser_version = parser_version.to_string();
        self.associate_comments();
        self.build_call_graph();
        self.doc
    }

    /// Associate each `jsdoc`/`docstring` comment with the nearest symbol
    /// whose start line falls within the window. Line and block comments
    /// are never associated.
    fn associate_comments(&mut self) {
        for comment in &mut self.doc.comments {
            if !matches!(comment.kind, CommentKind::Jsdoc | CommentKind::Docstring) {
                continue;
            }
            let comment_line = comment.span.start_line;
            let mut best: Option<(u32, String)> = None;

            let mut consider = |name: &str, start_line: u32| {
                if start_line <= comment_line {
                    return;
                }
                let distance = start_line - comment_line;
                if distance > DOC_ASSOCIATION_MAX_LINES {
                    return;
                }
                match &best {
                    Some((best_distance, _)) if *best_distance <= distance => {}
                    _ => best = Some((distance, name.to_string())),
                }
            };

            for (name, f) in &self.doc.functions {
                consider(name, f.base.span.start_line);
            }
            for (name, c) in &self.doc.classes {
                consider(name, c.base.span.start_line);
            }
            for (name, i) in &self.doc.interfaces {
                consider(name, i.base.span.start_line);
            }

            comment.associated_symbol = best.map(|(_, name)| name);
        }
    }

    /// Populate `calls`/`called_by` adjacency from the recorded call pairs.
    ///
    /// Edges are name references into the same document; unknown callees
    /// stay in the caller's `calls` list as unresolved identifiers.
    fn build_call_graph(&mut self) {
        for site in &self.calls {
            let Some(caller) = &site.caller else {
                continue;
            };
            let callee = &site.callee;
            if callee.starts_with('<') {
                continue;
            }

            push_unique_calls(&mut self.doc, caller, callee);
            // Reverse edge only when the callee resolves in this document.
            if callable_exists(&self.doc, callee) {
                push_unique_called_by(&mut self.doc, callee, caller);
            }
        }
    }
}

fn callable_exists(doc: &AstDocument, name: &str) -> bool {
    doc.find_callable(name).is_some()
}

fn with_callable_mut(doc: &mut AstDocument, name: &str, f: impl FnOnce(&mut FunctionSymbol)) {
    if let Some(func) = doc.functions.get_mut(name) {
        f(func);
        return;
    }
    if let Some((class, method)) = name.split_once('.') {
        if let Some(m) = doc
            .classes
            .get_mut(class)
            .and_then(|c| c.methods.get_mut(method))
        {
            f(m);
        }
        return;
    }
    for class in doc.classes.values_mut() {
        if let Some(m) = class.methods.get_mut(name) {
            f(m);
            return;
        }
    }
}

fn push_unique_calls(doc: &mut AstDocument, caller: &str, callee: &str) {
    with_callable_mut(doc, caller, |f| {
        if !f.calls.iter().any(|c| c == callee) {
            f.calls.push(callee.to_string());
        }
    });
}

fn push_unique_called_by(doc: &mut AstDocument, callee: &str, caller: &str) {
    with_callable_mut(doc, callee, |f| {
        if !f.called_by.iter().any(|c| c == caller) {
            f.called_by.push(caller.to_string());
        }
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ast::calls::CallChain;
    use crate::ast::calls::CallKind;
    use crate::ast::document::SymbolBase;
    use crate::types::Span;

    fn func_at(name: &str, line: u32) -> FunctionSymbol {
        FunctionSymbol {
            base: SymbolBase {
                name: name.to_string(),
                span: Span::point(line, 0, 0),
                ..Default::default()
            },
            ..Default::default()
        }
    }

    fn call(caller: &str, callee: &str) -> CallSite {
        CallSite {
            caller: Some(caller.to_string()),
            callee: callee.to_string(),
            kind: CallKind::Function,
            arg_count: 0,
            span: Span::point(1, 0, 0),
            chain: CallChain::default(),
        }
    }

    fn jsdoc_at(line: u32) -> Comment {
        Comment {
            kind: CommentKind::Jsdoc,
            text: "/** doc */".to_string(),
            span: Span::point(line, 0, 0),
            associated_symbol: None,
        }
    }

    #[test]
    fn test_comment_associates_to_nearest_symbol_in_window() {
        let mut builder = DocumentBuilder::new("a.ts", Language::TypeScript, 0);
        builder.add_function(func_at("near", 3));
        builder.add_function(func_at("far", 7));
        builder.add_comment(jsdoc_at(1));

        let doc = builder.build(10, "test");
        assert_eq!(
            doc.comments[0].associated_symbol.as_deref(),
            Some("near"),
            "distance 2 beats distance 6"
        );
    }

    #[test]
    fn test_comment_outside_window_stays_unassociated() {
        let mut builder = DocumentBuilder::new("a.ts", Language::TypeScript, 0);
        builder.add_function(func_at("distant", 10));
        builder.add_comment(jsdoc_at(1));

        let doc = builder.build(20, "test");
        assert!(doc.comments[0].associated_symbol.is_none());
    }

    #[test]
    fn test_comment_on_same_line_not_associated() {
        // The window is exclusive at 0: a symbol on the comment's own line
        // does not qualify.
        let mut builder = DocumentBuilder::new("a.ts", Language::TypeScript, 0);
        builder.add_function(func_at("same", 4));
        builder.add_comment(jsdoc_at(4));

        let doc = builder.build(10, "test");
        assert!(doc.comments[0].associated_symbol.is_none());
    }

    #[test]
    fn test_line_comment_never_associated() {
        let mut builder = DocumentBuilder::new("a.ts", Language::TypeScript, 0);
        builder.add_function(func_at("f", 2));
        builder.add_comment(Comment {
            kind: CommentKind::Line,
            text: "// nearby".to_string(),
            span: Span::point(1, 0, 0),
            associated_symbol: None,
        });

        let doc = builder.build(10, "test");
        assert!(doc.comments[0].associated_symbol.is_none());
    }

    #[test]
    fn test_call_graph_adjacency_dedup() {
        let mut builder = DocumentBuilder::new("a.ts", Language::TypeScript, 0);
        builder.add_function(func_at("caller", 1));
        builder.add_function(func_at("callee", 5));
        builder.add_calls(vec![
            call("caller", "callee"),
            call("caller", "callee"),
            call("caller", "external"),
        ]);

        let doc = builder.build(10, "test");
        let caller = &doc.functions["caller"];
        assert_eq!(caller.calls, vec!["callee", "external"]);
        let callee = &doc.functions["callee"];
        assert_eq!(callee.called_by, vec!["caller"]);
        // External callee gets no reverse edge.
        assert!(!doc.functions.contains_key("external"));
    }

    #[test]
    fn test_method_adjacency_is_populated() {
        let mut builder = DocumentBuilder::new("a.ts", Language::TypeScript, 0);
        let mut class = ClassSymbol {
            base: SymbolBase {
                name: "Svc".to_string(),
                span: Span::point(1, 0, 0),
                ..Default::default()
            },
            ..Default::default()
        };
        class.methods.insert("run".to_string(), func_at("run", 2));
        builder.add_class(class);
        builder.add_function(func_at("helper", 9));
        builder.add_calls(vec![call("Svc.run", "helper")]);

        let doc = builder.build(12, "test");
        assert_eq!(doc.classes["Svc"].methods["run"].calls, vec!["helper"]);
        assert_eq!(doc.functions["helper"].called_by, vec!["Svc.run"]);
    }
}
