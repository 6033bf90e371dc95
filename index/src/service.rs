//! Orchestrator: glues storage, symbols, hybrid search, ranking, and the
//! watcher behind the eight query operations of the assistant protocol.

use std::collections::HashMap;
use std::path::Path;
use std::path::PathBuf;
use std::sync::Arc;

use futures::StreamExt;
use serde::Serialize;
use tokio::sync::RwLock;

use crate::ast::AstDocument;
use crate::ast::SymbolKind;
use crate::ast::build_document;
use crate::chunking::Chunker;
use crate::config::RankingConfigManager;
use crate::embeddings::EmbedOptions;
use crate::embeddings::Embedder;
use crate::embeddings::HashEmbedder;
use crate::embeddings::ModelKey;
use crate::embeddings::ReembedTracker;
use crate::embeddings::VectorCache;
use crate::error::IndexErr;
use crate::error::Result;
use crate::hybrid::HybridIndex;
use crate::hybrid::HybridSearchOptions;
use crate::language::Language;
use crate::logs::JsonlSink;
use crate::parser::SyntaxParser;
use crate::paths::IndexPaths;
use crate::preview::DEFAULT_CONTEXT_LINES;
use crate::preview::Preview;
use crate::ranking::FallbackMode;
use crate::ranking::RankCandidate;
use crate::ranking::RankedResult;
use crate::ranking::SlaMonitor;
use crate::ranking::sla::Phase;
use crate::sparse::SparseVector;
use crate::sparse::vectorize_document;
use crate::sparse::vectorize_text;
use crate::storage::ChunkQuery;
use crate::storage::ChunkStore;
use crate::storage::FileStore;
use crate::storage::SqliteStore;
use crate::symbols::SymbolEntry;
use crate::symbols::SymbolIndex;
use crate::types::Anchor;
use crate::types::ChangeKind;
use crate::types::Chunk;
use crate::types::FileChangeEvent;
use crate::types::relative_module_path;
use crate::types::sha256_hex;
use crate::watcher::DependencyGraph;
use crate::watcher::EventBatch;
use crate::watcher::RetryPolicy;
use crate::watcher::resolve_specifier;
use crate::watcher::scan_imports;

/// Fixed tool names of the assistant protocol.
pub const TOOL_NAMES: [&str; 8] = [
    "search", "find_def", "find_refs", "callers", "callees", "open_at", "refresh", "symbols",
];

/// Environment variable holding the process-wide auth token.
pub const AUTH_TOKEN_ENV: &str = "CODE_INDEX_AUTH_TOKEN";

/// Largest file the indexer will read, in bytes.
const MAX_FILE_BYTES: u64 = 5 * 1024 * 1024;

/// Parser version recorded on AST documents.
const PARSER_VERSION: &str = "tree-sitter-0.25";

/// One search hit with its terminal-safe anchor.
#[derive(Debug, Clone, Serialize)]
pub struct SearchHit {
    pub anchor: String,
    #[serde(flatten)]
    pub result: RankedResult,
}

/// Response envelope for search-shaped operations.
#[derive(Debug, Serialize)]
pub struct SearchResponse {
    pub hits: Vec<SearchHit>,
    pub fallback_mode: FallbackMode,
    pub warnings: Vec<String>,
    pub timing: crate::ranking::SlaReport,
}

/// One definition hit.
#[derive(Debug, Clone, Serialize)]
pub struct DefinitionHit {
    pub anchor: String,
    #[serde(flatten)]
    pub entry: SymbolEntry,
}

/// One caller of a symbol.
#[derive(Debug, Clone, Serialize)]
pub struct CallerHit {
    pub anchor: String,
    /// Qualified caller name.
    pub caller: String,
    pub file: String,
}

/// Outcome of a refresh.
#[derive(Debug, Default, Serialize)]
pub struct RefreshSummary {
    pub indexed: usize,
    pub unchanged: usize,
    pub failed: Vec<(String, String)>,
    pub duration_ms: u64,
}

/// The indexing-and-search orchestrator for one project tree.
pub struct CodeIndexService {
    root: PathBuf,
    paths: IndexPaths,
    files: FileStore,
    chunks: ChunkStore,
    tracker: ReembedTracker,
    vector_cache: Arc<VectorCache>,
    symbols: RwLock<SymbolIndex>,
    /// Module path -> AST document, mirrored to `ast/<encoded>.json`.
    documents: RwLock<HashMap<String, AstDocument>>,
    deps: RwLock<DependencyGraph>,
    hybrid: RwLock<Arc<HybridIndex>>,
    embedder: Arc<dyn Embedder>,
    config: RankingConfigManager,
    perf_log: Option<Arc<JsonlSink>>,
    chunker: Chunker,
    auth_token: Option<String>,
}

impl CodeIndexService {
    /// Open the full on-disk layout for a project root, with the default
    /// local embedder.
    pub async fn open(root: &Path) -> Result<Self> {
        Self::open_with_embedder(root, Arc::new(HashEmbedder::default_local())).await
    }

    /// Open with an explicit embedder (remote or registry-created).
    pub async fn open_with_embedder(root: &Path, embedder: Arc<dyn Embedder>) -> Result<Self> {
        let paths = IndexPaths::for_project(root);
        let store = Arc::new(SqliteStore::open(&paths.database())?);
        let vector_cache = Arc::new(VectorCache::open(&paths.embedding_cache())?);
        let config = RankingConfigManager::start(&paths.ranking_config_file())?;
        let perf_log = JsonlSink::open(&paths.search_performance_log())
            .ok()
            .map(Arc::new);

        embedder.initialize().await?;

        let hybrid = match HybridIndex::load(&paths.vectors_dir()) {
            Ok(snapshot) => Arc::new(snapshot),
            Err(_) => Arc::new(HybridIndex::default()),
        };

        let service = Self {
            root: root.to_path_buf(),
            files: FileStore::new(store.clone()),
            chunks: ChunkStore::new(store.clone()),
            tracker: ReembedTracker::new(store),
            vector_cache,
            symbols: RwLock::new(SymbolIndex::new()),
            documents: RwLock::new(HashMap::new()),
            deps: RwLock::new(DependencyGraph::new()),
            hybrid: RwLock::new(hybrid),
            embedder,
            config,
            perf_log,
            chunker: Chunker::new(),
            auth_token: std::env::var(AUTH_TOKEN_ENV).ok().filter(|t| !t.is_empty()),
            paths,
        };
        service.load_documents().await;
        service.write_engine_config(&[]);
        Ok(service)
    }

    /// Write `.codeindex/config.json`: the active embedding profile, the
    /// detected hardware shape, and any fallback history from this
    /// session.
    fn write_engine_config(&self, history: &[crate::embeddings::fallback::AppliedFallback]) {
        let capabilities = self.embedder.capabilities();
        let value = serde_json::json!({
            "embedding": {
                "id": self.embedder.id(),
                "name": self.embedder.name(),
                "dimensions": self.embedder.dimensions(),
                "version": self.embedder.version(),
                "batching": capabilities.batching,
                "requiresNetwork": capabilities.requires_network,
            },
            "hardware": {
                "cpus": std::thread::available_parallelism().map(|n| n.get()).unwrap_or(1),
            },
            "fallbackHistory": history,
        });
        if let Ok(json) = serde_json::to_vec_pretty(&value) {
            if let Err(e) = std::fs::write(self.paths.config_file(), json) {
                tracing::debug!(error = %e, "engine config not written");
            }
        }
    }

    /// Project root this service indexes.
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// On-disk layout.
    pub fn paths(&self) -> &IndexPaths {
        &self.paths
    }

    /// Override the auth token read from the environment (for embedding
    /// the service without process-wide configuration).
    pub fn with_auth_token(mut self, token: Option<String>) -> Self {
        self.auth_token = token.filter(|t| !t.is_empty());
        self
    }

    /// Check the caller's token against the process-wide token.
    ///
    /// When no process token is configured every caller is accepted; when
    /// one is set, a missing or wrong token fails (protocol code −32001).
    fn authorize(&self, token: Option<&str>) -> Result<()> {
        match &self.auth_token {
            None => Ok(()),
            Some(expected) if token == Some(expected.as_str()) => Ok(()),
            Some(_) => Err(IndexErr::AuthFailed),
        }
    }

    /// Rehydrate the in-memory documents and symbol index from the
    /// persisted per-file AST documents.
    async fn load_documents(&self) {
        let Ok(entries) = std::fs::read_dir(self.paths.ast_dir()) else {
            return;
        };
        let mut documents = self.documents.write().await;
        let mut symbols = self.symbols.write().await;
        for entry in entries.flatten() {
            let Ok(json) = std::fs::read_to_string(entry.path()) else {
                continue;
            };
            match serde_json::from_str::<AstDocument>(&json) {
                Ok(doc) => {
                    symbols.add(&doc.path.clone(), &doc);
                    documents.insert(doc.path.clone(), doc);
                }
                Err(e) => {
                    tracing::warn!(file = %entry.path().display(), error = %e, "stale AST document skipped");
                }
            }
        }
    }

    // ------------------------------------------------------------------
    // Indexing
    // ------------------------------------------------------------------

    /// Force a re-index of a file, a folder, or the whole project.
    pub async fn refresh(&self, target: Option<&Path>, token: Option<&str>) -> Result<RefreshSummary> {
        self.authorize(token)?;
        let started = std::time::Instant::now();

        let targets: Vec<PathBuf> = match target {
            Some(path) => {
                let absolute = if path.is_absolute() {
                    path.to_path_buf()
                } else {
                    self.root.join(path)
                };
                if absolute.is_dir() {
                    self.walk_project(&absolute)
                } else {
                    vec![absolute]
                }
            }
            None => self.walk_project(&self.root),
        };

        // Parse and index with bounded concurrency; paths are distinct so
        // the per-file single-writer rule holds.
        let concurrency = std::thread::available_parallelism()
            .map(|n| n.get().saturating_sub(1).max(1))
            .unwrap_or(1);
        let outcomes: Vec<(PathBuf, Result<bool>)> = futures::stream::iter(
            targets.into_iter().map(|path| async move {
                let outcome = self.index_file(&path).await;
                (path, outcome)
            }),
        )
        .buffer_unordered(concurrency)
        .collect()
        .await;

        let mut summary = RefreshSummary::default();
        for (path, outcome) in outcomes {
            match outcome {
                Ok(true) => summary.indexed += 1,
                Ok(false) => summary.unchanged += 1,
                Err(e) => {
                    let relative = relative_module_path(&self.root, &path);
                    tracing::warn!(file = %relative, error = %e, "indexing failed");
                    summary.failed.push((relative, e.to_string()));
                }
            }
        }

        if summary.indexed > 0 {
            self.rebuild_hybrid().await?;
        }
        summary.duration_ms = started.elapsed().as_millis() as u64;
        Ok(summary)
    }

    /// Gitignore-aware project walk bounded by file size and grammar
    /// support.
    fn walk_project(&self, dir: &Path) -> Vec<PathBuf> {
        ignore::WalkBuilder::new(dir)
            .hidden(true)
            .git_ignore(true)
            .filter_entry(|entry| entry.file_name() != crate::paths::INDEX_DIR)
            .build()
            .flatten()
            .filter(|entry| entry.file_type().is_some_and(|t| t.is_file()))
            .map(|entry| entry.into_path())
            .filter(|path| Language::from_path(path).is_some())
            .filter(|path| {
                std::fs::metadata(path)
                    .map(|m| m.len() <= MAX_FILE_BYTES)
                    .unwrap_or(false)
            })
            .collect()
    }

    /// Index one file. Returns `false` when the stored content hash
    /// already matches (no rows written, no embeddings scheduled).
    pub async fn index_file(&self, absolute: &Path) -> Result<bool> {
        let relative = relative_module_path(&self.root, absolute);
        let language = Language::from_path(absolute).ok_or_else(|| IndexErr::UnsupportedExtension {
            extension: absolute
                .extension()
                .and_then(|e| e.to_str())
                .unwrap_or("")
                .to_string(),
        })?;

        let content = read_source(absolute)?;
        let content_hash = sha256_hex(&content);

        if let Some(existing) = self.files.find_active(&relative).await? {
            if existing.content_hash == content_hash {
                return Ok(false);
            }
        }

        // Parse and build the document synchronously; everything after is
        // store I/O.
        let mut parser = SyntaxParser::new();
        let tree = parser.parse(&content, language).map_err(|e| IndexErr::ParseFailed {
            path: absolute.to_path_buf(),
            cause: e.to_string(),
        })?;
        let doc = build_document(&relative, &content, language, &tree, PARSER_VERSION);
        if !doc.errors.is_empty() {
            tracing::debug!(
                file = %relative,
                errors = doc.errors.len(),
                recovered = doc.errors.iter().filter(|e| e.recovered).count(),
                "indexed with syntax errors"
            );
        }

        let mtime = std::fs::metadata(absolute)
            .and_then(|m| m.modified())
            .ok()
            .and_then(|t| t.duration_since(std::time::UNIX_EPOCH).ok())
            .map(|d| d.as_secs() as i64)
            .unwrap_or(0);
        let record = self
            .files
            .upsert(&relative, &content_hash, language.tag(), content.len() as i64, mtime)
            .await?;

        let result = self.chunker.chunk_document(&doc, &content, record.id);
        for warning in &result.warnings {
            tracing::warn!(
                file = %warning.path,
                chunk = %warning.name,
                lines = warning.line_count,
                threshold = warning.threshold,
                "oversized chunk"
            );
        }
        let stored = self.chunks.replace_file_chunks(record.id, result.chunks).await?;
        self.files.index_content(&relative, &content).await?;

        // Persist the AST document and swap the in-memory views.
        self.persist_document(&relative, &doc);
        {
            let mut symbols = self.symbols.write().await;
            symbols.remove(&relative);
            symbols.add(&relative, &doc);
        }
        self.documents.write().await.insert(relative.clone(), doc);

        // Keep the file-level dependency graph current.
        let known: std::collections::HashSet<PathBuf> = self
            .files
            .all_active()
            .await?
            .into_iter()
            .map(|f| PathBuf::from(f.path))
            .collect();
        let dependencies: Vec<PathBuf> = scan_imports(Path::new(&relative), &content)
            .iter()
            .filter_map(|spec| resolve_specifier(Path::new(&relative), spec, &known))
            .collect();
        self.deps
            .write()
            .await
            .set_dependencies(Path::new(&relative), &dependencies);

        // Embedding failures degrade to lexical-only search; existing
        // embeddings stay untouched.
        if let Err(e) = self.embed_chunks(&stored).await {
            tracing::warn!(file = %relative, error = %e, "embedding unavailable, lexical-only");
        }
        Ok(true)
    }

    fn persist_document(&self, relative: &str, doc: &AstDocument) {
        let ast_path = self.paths.ast_document(relative);
        if let Some(parent) = ast_path.parent() {
            let _ = std::fs::create_dir_all(parent);
        }
        if let Ok(json) = serde_json::to_vec_pretty(doc) {
            if let Err(e) = std::fs::write(&ast_path, json) {
                tracing::warn!(file = %ast_path.display(), error = %e, "AST document not persisted");
            }
        }
    }

    /// Remove a file from every index surface.
    pub async fn remove_file(&self, relative: &str) -> Result<()> {
        if let Some(file_id) = self.files.soft_delete(relative).await? {
            self.chunks.delete_by_file_id(file_id).await?;
        }
        self.symbols.write().await.remove(relative);
        self.documents.write().await.remove(relative);
        self.deps.write().await.remove_file(Path::new(relative));
        let _ = std::fs::remove_file(self.paths.ast_document(relative));
        Ok(())
    }

    /// Apply one watcher batch: dependency-ordered processing with the
    /// retry policy, then re-index of affected dependents.
    pub async fn apply_batch(&self, batch: &EventBatch, policy: &RetryPolicy) -> RefreshSummary {
        let started = std::time::Instant::now();
        let mut summary = RefreshSummary::default();

        let changed: Vec<PathBuf> = batch.events.iter().map(|e| e.path.clone()).collect();
        let (affected, order) = {
            let deps = self.deps.read().await;
            let affected = deps.affected_by(&changed);
            let order = deps.processing_order(&affected);
            (affected, order)
        };
        let topo_position = |path: &PathBuf| -> usize {
            order.iter().position(|p| p == path).unwrap_or(usize::MAX)
        };

        // Batch priority first (deletes, renames, creates, modifies with
        // user files ahead of dependencies), topological order inside.
        let mut events = batch.events.clone();
        let kind_rank = |kind: ChangeKind| match kind {
            ChangeKind::Delete => 0u8,
            ChangeKind::Rename => 1,
            ChangeKind::Create => 2,
            ChangeKind::Modify => 3,
        };
        events.sort_by(|a, b| {
            kind_rank(a.kind)
                .cmp(&kind_rank(b.kind))
                .then_with(|| topo_position(&a.path).cmp(&topo_position(&b.path)))
        });

        for event in &events {
            let mut attempts = 0u32;
            loop {
                match self.apply_event(event).await {
                    Ok(()) => {
                        summary.indexed += 1;
                        break;
                    }
                    Err(e) if policy.should_retry(&e, attempts) => {
                        let delay = policy.delay_for(attempts);
                        attempts += 1;
                        tracing::warn!(
                            path = %event.path.display(),
                            attempt = attempts,
                            error = %e,
                            "event failed, retrying"
                        );
                        tokio::time::sleep(delay).await;
                    }
                    Err(e) => {
                        summary
                            .failed
                            .push((event.path.display().to_string(), e.to_string()));
                        break;
                    }
                }
            }
        }

        // Dependents of the changed set re-index in topological order.
        for path in &order {
            if changed.contains(path) || !affected.contains(path) {
                continue;
            }
            let absolute = self.root.join(path);
            match self.index_file(&absolute).await {
                Ok(true) => summary.indexed += 1,
                Ok(false) => summary.unchanged += 1,
                Err(e) => summary
                    .failed
                    .push((path.display().to_string(), e.to_string())),
            }
        }

        summary.duration_ms = started.elapsed().as_millis() as u64;
        summary
    }

    /// Apply one coalesced watcher event.
    pub async fn apply_event(&self, event: &FileChangeEvent) -> Result<()> {
        let relative = crate::types::module_path(&event.path);
        match event.kind {
            ChangeKind::Create | ChangeKind::Modify => {
                let absolute = self.root.join(&event.path);
                self.index_file(&absolute).await?;
                self.rebuild_hybrid().await
            }
            ChangeKind::Delete => {
                self.remove_file(&relative).await?;
                self.rebuild_hybrid().await
            }
            ChangeKind::Rename => {
                let old_relative = event
                    .old_path
                    .as_ref()
                    .map(|p| crate::types::module_path(p))
                    .unwrap_or_else(|| relative.clone());
                let renamed = self.files.rename(&old_relative, &relative).await?;
                let absolute = self.root.join(&event.path);

                // Content hash still matching means no re-parse is needed;
                // only the path moves.
                let mut unchanged = false;
                if renamed {
                    if let Ok(content) = std::fs::read_to_string(&absolute) {
                        if let Some(record) = self.files.find_active(&relative).await? {
                            unchanged = record.content_hash == sha256_hex(&content);
                        }
                    }
                }
                if unchanged {
                    let moved = self.documents.write().await.remove(&old_relative);
                    if let Some(mut doc) = moved {
                        doc.path = relative.clone();
                        let mut symbols = self.symbols.write().await;
                        symbols.remove(&old_relative);
                        symbols.add(&relative, &doc);
                        drop(symbols);
                        self.persist_document(&relative, &doc);
                        self.documents.write().await.insert(relative.clone(), doc);
                    }
                    let _ = std::fs::remove_file(self.paths.ast_document(&old_relative));
                } else {
                    self.remove_file(&old_relative).await?;
                    self.index_file(&absolute).await?;
                }
                self.rebuild_hybrid().await
            }
        }
    }

    /// Embed chunks whose hash is new or stale, consulting the byte cache.
    async fn embed_chunks(&self, chunks: &[Chunk]) -> Result<()> {
        let key = ModelKey::of(self.embedder.as_ref());
        let mut to_embed: Vec<&Chunk> = Vec::new();

        for chunk in chunks {
            if self.tracker.is_fresh(chunk.id, &key.model_id).await? {
                continue;
            }
            if let Some(cached) = self.vector_cache.get(
                &chunk.chunk_hash,
                &key.model_id,
                &key.model_version,
                key.dimensions,
            )? {
                self.tracker
                    .record_embedding(
                        chunk.id,
                        &key.model_id,
                        &key.model_version,
                        &cached,
                        &chunk.chunk_hash,
                    )
                    .await?;
                continue;
            }
            to_embed.push(chunk);
        }

        if to_embed.is_empty() {
            return Ok(());
        }
        let texts: Vec<String> = to_embed.iter().map(|c| embedding_text(c)).collect();
        let embedded = self.embed_with_fallback(&texts).await?;
        for (chunk, vector) in to_embed.iter().zip(embedded.iter()) {
            self.vector_cache
                .put(&chunk.chunk_hash, &key.model_id, &key.model_version, vector)?;
            self.tracker
                .record_embedding(chunk.id, &key.model_id, &key.model_version, vector, &chunk.chunk_hash)
                .await?;
        }
        Ok(())
    }

    /// Run one embed call under the fallback chain: each failure degrades
    /// one knob (batch size first for this adapter shape) until the chain
    /// exhausts and the original error surfaces.
    async fn embed_with_fallback(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        use crate::embeddings::fallback::Device;
        use crate::embeddings::fallback::EmbeddingState;
        use crate::embeddings::fallback::Quantization;

        let initial_batch = self
            .embedder
            .capabilities()
            .max_batch_size
            .unwrap_or(64)
            .min(64);
        let mut chain = crate::embeddings::FallbackChain::new(
            EmbeddingState::new(initial_batch, Device::Cpu, Quantization::Fp32),
            vec![self.embedder.id().to_string()],
        );

        loop {
            let options = EmbedOptions {
                batch_size: Some(chain.state().batch_size),
                ..Default::default()
            };
            match self.embedder.embed(texts, &options).await {
                Ok(result) => {
                    if !chain.history().is_empty() {
                        self.write_engine_config(chain.history());
                    }
                    return Ok(result.vectors);
                }
                Err(e) if e.retryable() => {
                    let action = chain.apply(&e.to_string())?;
                    if chain.take_dimensions_invalidated() {
                        let _ = self
                            .vector_cache
                            .invalidate_by_dimensions(self.embedder.dimensions());
                    }
                    tracing::warn!(error = %e, action = ?action, "embedding degraded, retrying");
                }
                Err(e) => return Err(e),
            }
        }
    }

    /// Rebuild the hybrid snapshot from the store and swap it in after the
    /// new files are written.
    pub async fn rebuild_hybrid(&self) -> Result<()> {
        let all_chunks = self.chunks.all().await?;
        let key = ModelKey::of(self.embedder.as_ref());
        let documents = self.documents.read().await;

        let mut ids = Vec::with_capacity(all_chunks.len());
        let mut sparse_rows: Vec<SparseVector> = Vec::with_capacity(all_chunks.len());
        let mut dense_rows: Vec<Vec<f32>> = Vec::with_capacity(all_chunks.len());

        for chunk in &all_chunks {
            ids.push(chunk.id);
            // The sparse side is the file-level document vector; every
            // chunk row of a file shares it.
            let sparse = documents
                .get(&chunk.context.module_path)
                .map(vectorize_document)
                .unwrap_or_else(|| vectorize_text(&chunk.normalized_content));
            sparse_rows.push(sparse);

            let dense = self
                .vector_cache
                .get(&chunk.chunk_hash, &key.model_id, &key.model_version, key.dimensions)?
                .unwrap_or_else(|| vec![0.0; key.dimensions as usize]);
            dense_rows.push(dense);
        }
        drop(documents);

        let snapshot = HybridIndex::build(ids, &sparse_rows, &dense_rows, key.dimensions)?;
        snapshot.save(&self.paths.vectors_dir())?;
        *self.hybrid.write().await = Arc::new(snapshot);
        Ok(())
    }

    // ------------------------------------------------------------------
    // Query operations
    // ------------------------------------------------------------------

    /// Hybrid search: lexical FTS list + vector list, fused and ranked.
    pub async fn search(&self, query: &str, limit: usize, token: Option<&str>) -> Result<SearchResponse> {
        self.authorize(token)?;
        self.search_internal(query, limit).await
    }

    async fn search_internal(&self, query: &str, limit: usize) -> Result<SearchResponse> {
        let config = self.config.get();
        let mut warnings = self.config.warnings();
        let mut monitor = SlaMonitor::new(config.performance.timeout_ms);
        let candidate_limit = config.performance.candidate_limit;

        // Lexical list from the chunk FTS index.
        monitor.start_phase(Phase::LexicalSearch);
        let lexical = match self
            .chunks
            .query(ChunkQuery {
                search_text: Some(query.to_string()),
                limit: candidate_limit,
                ..Default::default()
            })
            .await
        {
            Ok(page) => page
                .chunks
                .iter()
                .enumerate()
                .map(|(i, chunk)| chunk_candidate(chunk, i as u32 + 1, 1.0 / (i as f32 + 1.0)))
                .collect(),
            Err(e) => {
                warnings.push(format!("lexical search degraded: {e}"));
                Vec::new()
            }
        };
        monitor.stop_phase(Phase::LexicalSearch);

        // Vector list from the hybrid snapshot.
        monitor.start_phase(Phase::VectorSearch);
        let snapshot = self.hybrid.read().await.clone();
        let mut vector: Vec<RankCandidate> = Vec::new();
        if !snapshot.is_empty() {
            let options = HybridSearchOptions {
                limit: candidate_limit as usize,
                ..Default::default()
            };
            match snapshot.search(query, self.embedder.as_ref(), &options).await {
                Ok(hits) => {
                    for (i, hit) in hits.iter().enumerate() {
                        if let Some(chunk) = self.chunks.find_by_id(hit.id).await? {
                            vector.push(chunk_candidate(&chunk, i as u32 + 1, hit.score));
                        }
                    }
                }
                Err(e) => {
                    warnings.push(format!("vector search degraded: {e}"));
                }
            }
        }
        monitor.stop_phase(Phase::VectorSearch);

        let mut outcome = crate::ranking::rank(query, &lexical, &vector, &config, &mut monitor);
        outcome.results.truncate(limit);
        warnings.extend(outcome.warnings);

        if let Some(sink) = &self.perf_log {
            let _ = sink.append("search", &outcome.report);
        }

        Ok(SearchResponse {
            hits: outcome
                .results
                .into_iter()
                .map(|result| SearchHit {
                    anchor: Anchor {
                        file: result.candidate.file_path.clone(),
                        line: result.candidate.line,
                        column: result.candidate.column,
                    }
                    .to_string(),
                    result,
                })
                .collect(),
            fallback_mode: outcome.fallback_mode,
            warnings,
            timing: outcome.report,
        })
    }

    /// Symbol definition lookup: exact, then prefix, then fuzzy.
    pub async fn find_def(&self, name: &str, limit: usize, token: Option<&str>) -> Result<Vec<DefinitionHit>> {
        self.authorize(token)?;
        let symbols = self.symbols.read().await;

        let mut entries = symbols.exact_match(name);
        if entries.is_empty() {
            entries = symbols.prefix_match(name, limit);
        }
        if entries.is_empty() {
            entries = symbols.fuzzy_match(name, crate::symbols::DEFAULT_FUZZY_DISTANCE, limit);
        }
        entries.truncate(limit);

        Ok(entries
            .into_iter()
            .map(|entry| DefinitionHit {
                anchor: Anchor {
                    file: entry.file_path.clone(),
                    line: entry.span.start_line,
                    column: Some(entry.span.start_col),
                }
                .to_string(),
                entry,
            })
            .collect())
    }

    /// References: hybrid search narrowed to files whose AST mentions the
    /// name in calls, imports, exports, or symbols.
    pub async fn find_refs(&self, name: &str, limit: usize, token: Option<&str>) -> Result<SearchResponse> {
        self.authorize(token)?;
        let mut response = self.search_internal(name, limit * 4).await?;

        let documents = self.documents.read().await;
        let file_matches: std::collections::HashSet<String> = self
            .files
            .search_content(name, limit as u32 * 4)
            .await
            .unwrap_or_default()
            .into_iter()
            .collect();
        response.hits.retain(|hit| {
            let path = &hit.result.candidate.file_path;
            documents
                .get(path)
                .map(|doc| doc.mentions(name))
                .unwrap_or_else(|| file_matches.contains(path))
        });
        response.hits.truncate(limit);
        Ok(response)
    }

    /// Files whose chunks call `name`.
    pub async fn callers(&self, name: &str, limit: usize, token: Option<&str>) -> Result<Vec<CallerHit>> {
        self.authorize(token)?;
        let documents = self.documents.read().await;
        let mut hits = Vec::new();

        'outer: for (path, doc) in documents.iter() {
            let mut callables: Vec<(String, &crate::ast::document::FunctionSymbol)> = doc
                .functions
                .iter()
                .map(|(n, f)| (n.clone(), f))
                .collect();
            for (class_name, class) in &doc.classes {
                for (method_name, method) in &class.methods {
                    callables.push((format!("{class_name}.{method_name}"), method));
                }
            }
            callables.sort_by(|a, b| a.1.base.span.start_line.cmp(&b.1.base.span.start_line));

            for (caller, symbol) in callables {
                if symbol.calls.iter().any(|callee| callee == name) {
                    hits.push(CallerHit {
                        anchor: Anchor {
                            file: path.clone(),
                            line: symbol.base.span.start_line,
                            column: Some(symbol.base.span.start_col),
                        }
                        .to_string(),
                        caller,
                        file: path.clone(),
                    });
                    if hits.len() >= limit {
                        break 'outer;
                    }
                }
            }
        }
        hits.sort_by(|a, b| a.file.cmp(&b.file).then_with(|| a.anchor.cmp(&b.anchor)));
        Ok(hits)
    }

    /// Unique callees inside the definition of `name`.
    pub async fn callees(&self, name: &str, token: Option<&str>) -> Result<Vec<String>> {
        self.authorize(token)?;
        let documents = self.documents.read().await;
        for doc in documents.values() {
            if let Some(symbol) = doc.find_callable(name) {
                return Ok(symbol.calls.clone());
            }
        }
        Ok(Vec::new())
    }

    /// Preview around an anchor line.
    pub async fn open_at(
        &self,
        file: &str,
        line: u32,
        context_lines: Option<u32>,
        token: Option<&str>,
    ) -> Result<Preview> {
        self.authorize(token)?;
        let context = context_lines.unwrap_or(DEFAULT_CONTEXT_LINES);
        crate::preview::open_at(&self.root, file, line, context, context)
    }

    /// Enumerate symbols, optionally narrowed by file and kind.
    pub async fn symbols(
        &self,
        file: Option<&str>,
        kind: Option<SymbolKind>,
        token: Option<&str>,
    ) -> Result<Vec<SymbolEntry>> {
        self.authorize(token)?;
        let symbols = self.symbols.read().await;
        let mut entries = match file {
            Some(path) => symbols.entries_for_file(path),
            None => symbols.entries(),
        };
        if let Some(kind) = kind {
            entries.retain(|e| e.kind == kind);
        }
        Ok(entries)
    }

    /// Store statistics plus tracker totals for the active model.
    pub async fn statistics(&self) -> Result<serde_json::Value> {
        let chunk_stats = self
            .chunks
            .get_statistics(crate::chunking::DEFAULT_LARGE_CHUNK_THRESHOLD)
            .await?;
        let totals = self.tracker.totals(self.embedder.id()).await?;
        Ok(serde_json::json!({
            "chunks": chunk_stats,
            "embeddings": totals,
            "symbols": self.symbols.read().await.stats(),
        }))
    }
}

/// Read a source file into a buffer sized by the parse buffer policy.
fn read_source(absolute: &Path) -> Result<String> {
    use std::io::Read;

    let map_err = |e: std::io::Error| match e.kind() {
        std::io::ErrorKind::NotFound => IndexErr::FileNotFound {
            path: absolute.to_path_buf(),
        },
        std::io::ErrorKind::PermissionDenied => IndexErr::PermissionDenied {
            path: absolute.to_path_buf(),
        },
        _ => IndexErr::FileRead {
            path: absolute.to_path_buf(),
            cause: e.to_string(),
        },
    };

    let mut file = std::fs::File::open(absolute).map_err(map_err)?;
    let len = file.metadata().map(|m| m.len() as usize).unwrap_or(0);
    let mut content = String::with_capacity(crate::parser::parse_buffer_size(len));
    file.read_to_string(&mut content).map_err(map_err)?;
    Ok(content)
}

/// Text handed to the embedder for one chunk: fenced with the module path
/// so the model sees file context.
fn embedding_text(chunk: &Chunk) -> String {
    format!(
        "```{}\n{}\n```",
        chunk.context.module_path, chunk.normalized_content
    )
}

fn chunk_candidate(chunk: &Chunk, rank: u32, raw_score: f32) -> RankCandidate {
    let snippet = chunk
        .content
        .lines()
        .find(|l| !l.trim().is_empty())
        .unwrap_or("")
        .trim()
        .chars()
        .take(160)
        .collect();
    RankCandidate {
        file_id: chunk.file_id,
        file_path: chunk.context.module_path.clone(),
        line: chunk.start_line,
        column: None,
        snippet,
        symbol_name: Some(chunk.name.clone()),
        symbol_kind: Some(chunk.kind.as_str().to_string()),
        language: Some(chunk.language.clone()),
        source_rank: rank,
        raw_score,
    }
}
