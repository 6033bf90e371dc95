//! Local code-intelligence engine for a single project tree.
//!
//! Parses source files into per-file AST documents, decomposes them into
//! logical chunks, and serves symbol lookup plus hybrid (lexical +
//! semantic) search over those chunks.
//!
//! ## Subsystems
//!
//! | Subsystem | Module | Responsibility |
//! |-----------|--------|----------------|
//! | Language loader | `language` | extension -> grammar, cached |
//! | Syntax parser | `parser` | parse, incremental reparse, error recovery |
//! | AST documents | `ast` | symbols, imports/exports, comments, call graph |
//! | Chunker | `chunking` | nine chunk kinds with stable content hashes |
//! | Chunk store | `storage` | SQLite + FTS5 over chunks and files |
//! | Sparse vectors | `sparse` | n-gram hashing into 2^18 features, CSR |
//! | Embeddings | `embeddings` | adapter contract, registry, fallback chain, cache |
//! | Hybrid index | `hybrid` | row-aligned sparse + dense search, snapshots |
//! | Ranking | `ranking` | RRF fusion, diversification, tie-breakers, SLA |
//! | Symbol index | `symbols` | exact/prefix/substring/fuzzy with k-grams |
//! | Watcher | `watcher` | debounce, coalesce, batch, dependency order |
//! | Configuration | `config` | ranking + watcher config, hot reload |
//! | Orchestrator | `service` | the eight assistant-protocol operations |

pub mod ast;
pub mod chunking;
pub mod config;
pub mod error;
pub mod hybrid;
pub mod language;
pub mod logs;
pub mod parser;
pub mod paths;
pub mod preview;
pub mod ranking;
pub mod service;
pub mod sparse;
pub mod storage;
pub mod symbols;
pub mod types;
pub mod watcher;

pub mod embeddings;

// Re-exports
pub use ast::AstDocument;
pub use ast::SymbolKind;
pub use ast::build_document;
pub use chunking::Chunker;
pub use chunking::ChunkingResult;
pub use config::RankingConfig;
pub use config::RankingConfigManager;
pub use config::WatcherConfig;
pub use embeddings::Embedder;
pub use embeddings::EmbedderRegistry;
pub use embeddings::FallbackChain;
pub use embeddings::VectorCache;
pub use error::AUTH_ERROR_CODE;
pub use error::IndexErr;
pub use error::Result;
pub use hybrid::HybridIndex;
pub use language::Language;
pub use parser::SyntaxParser;
pub use paths::IndexPaths;
pub use ranking::RankedResult;
pub use service::AUTH_TOKEN_ENV;
pub use service::CodeIndexService;
pub use service::TOOL_NAMES;
pub use sparse::CsrMatrix;
pub use sparse::SparseVector;
pub use storage::ChunkQuery;
pub use storage::ChunkStore;
pub use storage::SqliteStore;
pub use symbols::SymbolIndex;
pub use types::Chunk;
pub use types::ChunkKind;
pub use watcher::ChangeWatcher;
pub use watcher::IgnoreSet;
