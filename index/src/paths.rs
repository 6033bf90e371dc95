//! On-disk layout under `.codeindex/`.

use std::path::Path;
use std::path::PathBuf;

/// Name of the index directory at the project root.
pub const INDEX_DIR: &str = ".codeindex";

/// Resolved layout for one project.
#[derive(Debug, Clone)]
pub struct IndexPaths {
    pub root: PathBuf,
    pub index_dir: PathBuf,
}

impl IndexPaths {
    pub fn for_project(root: &Path) -> Self {
        let index_dir = root.join(INDEX_DIR);
        Self {
            root: root.to_path_buf(),
            index_dir,
        }
    }

    pub fn database(&self) -> PathBuf {
        self.index_dir.join("index.db")
    }

    pub fn vectors_dir(&self) -> PathBuf {
        self.index_dir.join("vectors")
    }

    pub fn ast_dir(&self) -> PathBuf {
        self.index_dir.join("ast")
    }

    pub fn logs_dir(&self) -> PathBuf {
        self.index_dir.join("logs")
    }

    pub fn embedding_cache(&self) -> PathBuf {
        self.index_dir.join("cache").join("embeddings.db")
    }

    pub fn config_file(&self) -> PathBuf {
        self.index_dir.join("config.json")
    }

    pub fn ranking_config_file(&self) -> PathBuf {
        self.index_dir.join("ranking-config.json")
    }

    pub fn watcher_log(&self) -> PathBuf {
        self.logs_dir().join("watcher.jsonl")
    }

    pub fn search_performance_log(&self) -> PathBuf {
        self.logs_dir().join("search-performance.jsonl")
    }

    /// Daily engine log file.
    pub fn engine_log(&self, date: chrono::NaiveDate) -> PathBuf {
        self.logs_dir()
            .join(format!("code-index-{}.jsonl", date.format("%Y-%m-%d")))
    }

    /// AST document file for a project-relative path.
    pub fn ast_document(&self, relative_path: &str) -> PathBuf {
        self.ast_dir()
            .join(format!("{}.json", encode_ast_path(relative_path)))
    }
}

/// Encode a project-relative path for use as an AST document file name:
/// `..` becomes `__`, and `/`, `\`, `:` become `_`.
pub fn encode_ast_path(relative_path: &str) -> String {
    relative_path
        .replace("..", "__")
        .replace(['/', '\\', ':'], "_")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_layout() {
        let paths = IndexPaths::for_project(Path::new("/project"));
        assert_eq!(paths.database(), PathBuf::from("/project/.codeindex/index.db"));
        assert_eq!(
            paths.vectors_dir(),
            PathBuf::from("/project/.codeindex/vectors")
        );
        assert_eq!(
            paths.embedding_cache(),
            PathBuf::from("/project/.codeindex/cache/embeddings.db")
        );
        assert_eq!(
            paths.watcher_log(),
            PathBuf::from("/project/.codeindex/logs/watcher.jsonl")
        );
    }

    #[test]
    fn test_encode_ast_path() {
        assert_eq!(encode_ast_path("src/a.ts"), "src_a.ts");
        assert_eq!(encode_ast_path("a\\b:c.ts"), "a_b_c.ts");
        assert_eq!(encode_ast_path("../escape.ts"), "___escape.ts");
    }

    #[test]
    fn test_engine_log_name() {
        let paths = IndexPaths::for_project(Path::new("/p"));
        let date = chrono::NaiveDate::from_ymd_opt(2026, 3, 9).unwrap();
        assert!(
            paths
                .engine_log(date)
                .ends_with("logs/code-index-2026-03-09.jsonl")
        );
    }
}
