//! Per-file AST documents: symbol tables, imports/exports, comments,
//! syntax errors, and the intra-file call graph.

pub mod builder;
pub mod calls;
pub mod document;
pub mod extract;

pub use builder::DocumentBuilder;
pub use calls::CallKind;
pub use calls::CallSite;
pub use document::AstDocument;
pub use document::Comment;
pub use document::CommentKind;
pub use document::SymbolKind;
pub use document::SymbolRef;
pub use extract::build_document;
