//! Language detection and grammar management.
//!
//! Maps file extensions to tree-sitter grammars and caches loaded grammar
//! objects so repeated parses do not pay the load cost.

use std::collections::HashMap;
use std::path::Path;
use std::sync::Mutex;

use once_cell::sync::Lazy;
use serde::Deserialize;
use serde::Serialize;

use crate::error::IndexErr;
use crate::error::Result;

/// Languages with a bundled grammar.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Language {
    TypeScript,
    Tsx,
    JavaScript,
    Python,
    Rust,
}

impl Language {
    /// Detect the language from a file extension.
    pub fn from_path(path: &Path) -> Option<Self> {
        let ext = path.extension().and_then(|e| e.to_str())?;
        match ext {
            "ts" | "mts" | "cts" => Some(Self::TypeScript),
            "tsx" => Some(Self::Tsx),
            "js" | "mjs" | "cjs" | "jsx" => Some(Self::JavaScript),
            "py" | "pyi" => Some(Self::Python),
            "rs" => Some(Self::Rust),
            _ => None,
        }
    }

    /// Language tag used in stored rows and query filters.
    pub fn tag(&self) -> &'static str {
        match self {
            Self::TypeScript => "typescript",
            Self::Tsx => "tsx",
            Self::JavaScript => "javascript",
            Self::Python => "python",
            Self::Rust => "rust",
        }
    }

    /// Parse a stored language tag back into a [`Language`].
    pub fn from_tag(tag: &str) -> Option<Self> {
        match tag {
            "typescript" => Some(Self::TypeScript),
            "tsx" => Some(Self::Tsx),
            "javascript" => Some(Self::JavaScript),
            "python" => Some(Self::Python),
            "rust" => Some(Self::Rust),
            _ => None,
        }
    }

    /// Load the tree-sitter grammar for this language.
    fn load_grammar(&self) -> tree_sitter::Language {
        match self {
            Self::TypeScript => tree_sitter_typescript::LANGUAGE_TYPESCRIPT.into(),
            Self::Tsx => tree_sitter_typescript::LANGUAGE_TSX.into(),
            Self::JavaScript => tree_sitter_javascript::LANGUAGE.into(),
            Self::Python => tree_sitter_python::LANGUAGE.into(),
            Self::Rust => tree_sitter_rust::LANGUAGE.into(),
        }
    }

    /// Whether this language uses the JS/TS family of node types.
    pub fn is_js_family(&self) -> bool {
        matches!(self, Self::TypeScript | Self::Tsx | Self::JavaScript)
    }
}

impl std::fmt::Display for Language {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.tag())
    }
}

/// Process-wide grammar cache.
///
/// Grammar objects are cheap to clone once loaded; the cache avoids
/// re-running grammar constructors per parsed file.
static GRAMMARS: Lazy<Mutex<HashMap<Language, tree_sitter::Language>>> =
    Lazy::new(|| Mutex::new(HashMap::new()));

/// Get the cached grammar for a language, loading it on first use.
pub fn grammar_for(language: Language) -> tree_sitter::Language {
    let mut cache = GRAMMARS.lock().unwrap_or_else(|poisoned| {
        tracing::warn!("grammar cache mutex poisoned, recovering");
        poisoned.into_inner()
    });
    cache
        .entry(language)
        .or_insert_with(|| language.load_grammar())
        .clone()
}

/// Resolve the grammar for a file path.
///
/// Fails with `UnsupportedExtension` when no grammar covers the extension.
pub fn grammar_for_path(path: &Path) -> Result<(Language, tree_sitter::Language)> {
    let language = Language::from_path(path).ok_or_else(|| IndexErr::UnsupportedExtension {
        extension: path
            .extension()
            .and_then(|e| e.to_str())
            .unwrap_or("")
            .to_string(),
    })?;
    Ok((language, grammar_for(language)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_extension_mapping() {
        assert_eq!(
            Language::from_path(Path::new("src/a.ts")),
            Some(Language::TypeScript)
        );
        assert_eq!(
            Language::from_path(Path::new("src/a.tsx")),
            Some(Language::Tsx)
        );
        assert_eq!(
            Language::from_path(Path::new("src/a.mjs")),
            Some(Language::JavaScript)
        );
        assert_eq!(
            Language::from_path(Path::new("src/a.pyi")),
            Some(Language::Python)
        );
        assert_eq!(
            Language::from_path(Path::new("src/a.rs")),
            Some(Language::Rust)
        );
        assert_eq!(Language::from_path(Path::new("src/a.css")), None);
    }

    #[test]
    fn test_tag_round_trip() {
        for lang in [
            Language::TypeScript,
            Language::Tsx,
            Language::JavaScript,
            Language::Python,
            Language::Rust,
        ] {
            assert_eq!(Language::from_tag(lang.tag()), Some(lang));
        }
    }

    #[test]
    fn test_grammar_cache_returns_usable_grammar() {
        let grammar = grammar_for(Language::JavaScript);
        let mut parser = tree_sitter::Parser::new();
        parser.set_language(&grammar).expect("grammar loads");
        let tree = parser.parse("const x = 1;", None).expect("parses");
        assert_eq!(tree.root_node().kind(), "program");
    }

    #[test]
    fn test_unsupported_extension_error() {
        let err = grammar_for_path(Path::new("style.css")).unwrap_err();
        assert!(matches!(err, IndexErr::UnsupportedExtension { .. }));
    }
}
