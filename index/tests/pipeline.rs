//! End-to-end pipeline tests: index a small project tree, then exercise
//! the query operations and persistence round-trips.

use std::path::Path;

use code_index::CodeIndexService;
use code_index::chunking::chunk_hash;
use code_index::types::ChunkKind;
use pretty_assertions::assert_eq;
use tempfile::TempDir;

const MATH_TS: &str = "function add(a,b){return a+b;}\n\nfunction sub(a,b){return a-b;}";

const PARSER_TS: &str = "\
import { tokenize } from './lexer';\n\
\n\
/** Parses a token stream into a tree. */\n\
export function parse(source: string) {\n\
  const tokens = tokenize(source);\n\
  return buildTree(tokens);\n\
}\n\
\n\
function buildTree(tokens: string[]) {\n\
  return { kind: 'root', children: tokens };\n\
}\n";

const LEXER_TS: &str = "\
export function tokenize(source: string) {\n\
  return source.split(/\\s+/);\n\
}\n";

async fn project(sources: &[(&str, &str)]) -> (TempDir, CodeIndexService) {
    let dir = TempDir::new().unwrap();
    for (name, content) in sources {
        let path = dir.path().join(name);
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).unwrap();
        }
        std::fs::write(path, content).unwrap();
    }
    let service = CodeIndexService::open(dir.path()).await.unwrap();
    service.refresh(None, None).await.unwrap();
    (dir, service)
}

#[tokio::test]
async fn chunking_two_functions() {
    let (_dir, service) = project(&[("src/math.ts", MATH_TS)]).await;

    let chunks = service
        .symbols(Some("src/math.ts"), None, None)
        .await
        .unwrap();
    let names: Vec<&str> = chunks.iter().map(|s| s.name.as_str()).collect();
    assert!(names.contains(&"add"));
    assert!(names.contains(&"sub"));
}

#[test]
fn hash_stability_across_indentation() {
    let a = "  function f(){\n    return 1\n  }";
    let b = "function f(){\n  return 1\n}";
    let hash_a = chunk_hash(a, None, None);
    let hash_b = chunk_hash(b, None, None);
    assert_eq!(hash_a, hash_b);
    assert_eq!(hash_a.len(), 64);
}

#[tokio::test]
async fn reindex_unchanged_project_writes_nothing() {
    let (_dir, service) = project(&[
        ("src/parser.ts", PARSER_TS),
        ("src/lexer.ts", LEXER_TS),
    ])
    .await;

    let before = service.statistics().await.unwrap();
    let summary = service.refresh(None, None).await.unwrap();
    assert_eq!(summary.indexed, 0);
    assert_eq!(summary.unchanged, 2);

    let after = service.statistics().await.unwrap();
    assert_eq!(
        before["chunks"]["total_chunks"],
        after["chunks"]["total_chunks"]
    );
}

#[tokio::test]
async fn repeated_query_is_deterministic() {
    let (_dir, service) = project(&[
        ("src/parser.ts", PARSER_TS),
        ("src/lexer.ts", LEXER_TS),
    ])
    .await;

    let first = service.search("tokenize source", 10, None).await.unwrap();
    let second = service.search("tokenize source", 10, None).await.unwrap();

    let anchors_first: Vec<&str> = first.hits.iter().map(|h| h.anchor.as_str()).collect();
    let anchors_second: Vec<&str> = second.hits.iter().map(|h| h.anchor.as_str()).collect();
    assert_eq!(anchors_first, anchors_second);

    let scores_first: Vec<f32> = first.hits.iter().map(|h| h.result.final_score).collect();
    let scores_second: Vec<f32> = second.hits.iter().map(|h| h.result.final_score).collect();
    assert_eq!(scores_first, scores_second);
}

#[tokio::test]
async fn hybrid_snapshot_survives_reopen() {
    let (dir, service) = project(&[("src/parser.ts", PARSER_TS), ("src/lexer.ts", LEXER_TS)]).await;
    let before = service.search("parse tree", 5, None).await.unwrap();
    drop(service);

    // Snapshot files exist on disk.
    let vectors = dir.path().join(".codeindex/vectors");
    for name in ["sparse.csr", "dense.f32", "ids.json", "meta.json"] {
        assert!(vectors.join(name).exists(), "{name} persisted");
    }

    // A fresh service loads the snapshot and the AST documents without
    // re-indexing.
    let reopened = CodeIndexService::open(dir.path()).await.unwrap();
    let after = reopened.search("parse tree", 5, None).await.unwrap();
    let anchors_before: Vec<&str> = before.hits.iter().map(|h| h.anchor.as_str()).collect();
    let anchors_after: Vec<&str> = after.hits.iter().map(|h| h.anchor.as_str()).collect();
    assert_eq!(anchors_before, anchors_after);

    let defs = reopened.find_def("tokenize", 10, None).await.unwrap();
    assert!(!defs.is_empty(), "symbol index rehydrated from AST documents");
}

#[tokio::test]
async fn call_graph_operations() {
    let (_dir, service) = project(&[
        ("src/parser.ts", PARSER_TS),
        ("src/lexer.ts", LEXER_TS),
    ])
    .await;

    let callees = service.callees("parse", None).await.unwrap();
    assert!(callees.contains(&"tokenize".to_string()));
    assert!(callees.contains(&"buildTree".to_string()));

    let callers = service.callers("buildTree", 10, None).await.unwrap();
    assert_eq!(callers.len(), 1);
    assert_eq!(callers[0].caller, "parse");
}

#[tokio::test]
async fn syntax_error_recovery_still_indexes_later_symbols() {
    let broken = "function broken( {\n\nfunction stillHere() { return 1; }\n";
    let (_dir, service) = project(&[("src/broken.js", broken)]).await;

    let defs = service.find_def("stillHere", 10, None).await.unwrap();
    assert!(
        !defs.is_empty(),
        "declaration after the syntax error is still extracted"
    );
}

#[tokio::test]
async fn modified_file_changes_chunks() {
    let (dir, service) = project(&[("src/math.ts", MATH_TS)]).await;

    std::fs::write(
        dir.path().join("src/math.ts"),
        "function add(a,b){return a+b+1;}\n",
    )
    .unwrap();
    let summary = service
        .refresh(Some(Path::new("src/math.ts")), None)
        .await
        .unwrap();
    assert_eq!(summary.indexed, 1);

    // `sub` is gone, `add` survives with new content.
    assert!(service.find_def("sub", 10, None).await.unwrap().is_empty());
    let add = service.find_def("add", 10, None).await.unwrap();
    assert!(!add.is_empty());
}

#[tokio::test]
async fn auth_token_enforced() {
    let dir = TempDir::new().unwrap();
    std::fs::write(dir.path().join("a.ts"), "export function a() {}\n").unwrap();

    let service = CodeIndexService::open(dir.path())
        .await
        .unwrap()
        .with_auth_token(Some("sekret-token-value".to_string()));

    let denied = service.search("a", 10, None).await;
    assert!(denied.is_err());
    let denied = service.search("a", 10, Some("wrong")).await;
    assert!(denied.is_err());
    let allowed = service.search("a", 10, Some("sekret-token-value")).await;
    assert!(allowed.is_ok());
}

#[tokio::test]
async fn class_chunks_have_kinds_and_parents() {
    let source = "\
export class Stack {\n\
  items = [];\n\
  constructor() { this.items = []; }\n\
  push(item) { this.items.push(item); }\n\
  async drain() { await this.flush(); }\n\
}\n";
    let (_dir, service) = project(&[("src/stack.ts", source)]).await;

    let symbols = service.symbols(Some("src/stack.ts"), None, None).await.unwrap();
    let names: Vec<&str> = symbols.iter().map(|s| s.name.as_str()).collect();
    assert!(names.contains(&"Stack"));
    assert!(names.contains(&"Stack.push"));
    assert!(names.contains(&"Stack.drain"));

    // The chunk kinds behind the class cover the member variants.
    let stats = service.statistics().await.unwrap();
    let by_kind = &stats["chunks"]["by_kind"];
    assert!(by_kind[ChunkKind::Class.as_str()].as_u64().unwrap() >= 1);
    assert!(by_kind[ChunkKind::Constructor.as_str()].as_u64().unwrap() >= 1);
    assert!(by_kind[ChunkKind::AsyncMethod.as_str()].as_u64().unwrap() >= 1);
    assert!(by_kind[ChunkKind::Property.as_str()].as_u64().unwrap() >= 1);
}
