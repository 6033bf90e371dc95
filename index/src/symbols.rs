//! In-memory symbol index.
//!
//! Names map to symbol entries; a k-gram map (k = 3, names padded as
//! `$name$`) narrows candidates for prefix, substring, and fuzzy lookup
//! before the real predicate runs.

use std::collections::HashMap;
use std::collections::HashSet;

use serde::Serialize;

use crate::ast::AstDocument;
use crate::ast::SymbolKind;
use crate::ranking::diversify::levenshtein;
use crate::types::Span;

const K: usize = 3;

/// Default edit-distance bound for fuzzy lookup.
pub const DEFAULT_FUZZY_DISTANCE: usize = 2;

/// One indexed symbol occurrence.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SymbolEntry {
    /// Qualified name; methods are `Class.method`.
    pub name: String,
    pub kind: SymbolKind,
    pub file_path: String,
    pub span: Span,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub signature: Option<String>,
}

/// Index statistics.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct SymbolIndexStats {
    pub names: usize,
    pub entries: usize,
    pub kgrams: usize,
}

/// Exact/prefix/substring/fuzzy symbol lookup.
#[derive(Debug, Default)]
pub struct SymbolIndex {
    by_name: HashMap<String, Vec<SymbolEntry>>,
    /// k-gram -> names containing it.
    kgram_buckets: HashMap<String, HashSet<String>>,
}

/// k-grams of `$name$`.
fn kgrams(name: &str) -> Vec<String> {
    let padded: Vec<char> = std::iter::once('$')
        .chain(name.chars())
        .chain(std::iter::once('$'))
        .collect();
    if padded.len() < K {
        return vec![padded.into_iter().collect()];
    }
    padded.windows(K).map(|w| w.iter().collect()).collect()
}

impl SymbolIndex {
    pub fn new() -> Self {
        Self::default()
    }

    /// Index every symbol of a document; methods arrive pre-qualified as
    /// `Class.method` from the document enumeration.
    pub fn add(&mut self, file_path: &str, doc: &AstDocument) {
        for symbol in doc.iter_symbols() {
            let entry = SymbolEntry {
                name: symbol.name.clone(),
                kind: symbol.kind,
                file_path: file_path.to_string(),
                span: symbol.span,
                signature: symbol.signature,
            };
            let is_new_name = !self.by_name.contains_key(&symbol.name);
            self.by_name.entry(symbol.name.clone()).or_default().push(entry);
            if is_new_name {
                for gram in kgrams(&symbol.name) {
                    self.kgram_buckets
                        .entry(gram)
                        .or_default()
                        .insert(symbol.name.clone());
                }
            }
        }
    }

    /// Drop every entry for a file. Names with no remaining entries leave
    /// the name map and their k-gram buckets.
    pub fn remove(&mut self, file_path: &str) {
        let mut emptied: Vec<String> = Vec::new();
        self.by_name.retain(|name, entries| {
            entries.retain(|e| e.file_path != file_path);
            if entries.is_empty() {
                emptied.push(name.clone());
                false
            } else {
                true
            }
        });

        for name in emptied {
            for gram in kgrams(&name) {
                if let Some(bucket) = self.kgram_buckets.get_mut(&gram) {
                    bucket.remove(&name);
                    if bucket.is_empty() {
                        self.kgram_buckets.remove(&gram);
                    }
                }
            }
        }
    }

    pub fn exact_match(&self, query: &str) -> Vec<SymbolEntry> {
        self.by_name.get(query).cloned().unwrap_or_default()
    }

    /// Union of the query's k-gram buckets.
    fn candidates(&self, query: &str) -> HashSet<&String> {
        let mut names: HashSet<&String> = HashSet::new();
        for gram in kgrams(query) {
            if let Some(bucket) = self.kgram_buckets.get(&gram) {
                names.extend(bucket.iter());
            }
        }
        names
    }

    fn collect_sorted(&self, names: Vec<&String>, limit: usize) -> Vec<SymbolEntry> {
        let mut sorted = names;
        sorted.sort();
        sorted
            .into_iter()
            .flat_map(|name| self.by_name.get(name).cloned().unwrap_or_default())
            .take(limit)
            .collect()
    }

    pub fn prefix_match(&self, query: &str, limit: usize) -> Vec<SymbolEntry> {
        let names: Vec<&String> = self
            .candidates(query)
            .into_iter()
            .filter(|name| name.starts_with(query))
            .collect();
        self.collect_sorted(names, limit)
    }

    pub fn substring_match(&self, query: &str, limit: usize) -> Vec<SymbolEntry> {
        let names: Vec<&String> = self
            .candidates(query)
            .into_iter()
            .filter(|name| name.contains(query))
            .collect();
        self.collect_sorted(names, limit)
    }

    /// Fuzzy lookup ordered by ascending edit distance.
    pub fn fuzzy_match(&self, query: &str, max_distance: usize, limit: usize) -> Vec<SymbolEntry> {
        let mut scored: Vec<(usize, &String)> = self
            .candidates(query)
            .into_iter()
            .filter_map(|name| {
                let distance = levenshtein(name, query);
                (distance <= max_distance).then_some((distance, name))
            })
            .collect();
        scored.sort_by(|a, b| a.0.cmp(&b.0).then_with(|| a.1.cmp(b.1)));

        scored
            .into_iter()
            .flat_map(|(_, name)| self.by_name.get(name).cloned().unwrap_or_default())
            .take(limit)
            .collect()
    }

    /// Every entry, sorted by name then file path.
    pub fn entries(&self) -> Vec<SymbolEntry> {
        let mut all: Vec<SymbolEntry> = self.by_name.values().flatten().cloned().collect();
        all.sort_by(|a, b| a.name.cmp(&b.name).then_with(|| a.file_path.cmp(&b.file_path)));
        all
    }

    /// Entries declared in one file.
    pub fn entries_for_file(&self, file_path: &str) -> Vec<SymbolEntry> {
        let mut found: Vec<SymbolEntry> = self
            .by_name
            .values()
            .flatten()
            .filter(|e| e.file_path == file_path)
            .cloned()
            .collect();
        found.sort_by_key(|e| e.span.start_line);
        found
    }

    pub fn stats(&self) -> SymbolIndexStats {
        SymbolIndexStats {
            names: self.by_name.len(),
            entries: self.by_name.values().map(|v| v.len()).sum(),
            kgrams: self.kgram_buckets.len(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ast::build_document;
    use crate::language::Language;
    use crate::parser::SyntaxParser;

    fn doc_for(source: &str) -> AstDocument {
        let tree = SyntaxParser::new().parse(source, Language::JavaScript).unwrap();
        build_document("src/sample.js", source, Language::JavaScript, &tree, "t")
    }

    fn sample_index() -> SymbolIndex {
        let mut index = SymbolIndex::new();
        let doc = doc_for(
            "function parseConfig() {}\n\
             function parseArgs() {}\n\
             class Parser { parse() {} }\n\
             const LIMIT = 10;\n",
        );
        index.add("src/sample.js", &doc);
        index
    }

    #[test]
    fn test_exact_match() {
        let index = sample_index();
        let hits = index.exact_match("parseConfig");
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].kind, SymbolKind::Function);
        assert!(index.exact_match("nope").is_empty());
    }

    #[test]
    fn test_methods_qualified() {
        let index = sample_index();
        assert_eq!(index.exact_match("Parser.parse").len(), 1);
    }

    #[test]
    fn test_prefix_match() {
        let index = sample_index();
        let hits = index.prefix_match("parse", 10);
        let names: Vec<&str> = hits.iter().map(|h| h.name.as_str()).collect();
        assert!(names.contains(&"parseConfig"));
        assert!(names.contains(&"parseArgs"));
        assert!(!names.contains(&"Parser"), "prefix is case-sensitive");
    }

    #[test]
    fn test_substring_match() {
        let index = sample_index();
        let hits = index.substring_match("Config", 10);
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].name, "parseConfig");
    }

    #[test]
    fn test_fuzzy_match_ordered_by_distance() {
        let index = sample_index();
        // "parseArg" is distance 1 from parseArgs.
        let hits = index.fuzzy_match("parseArg", DEFAULT_FUZZY_DISTANCE, 10);
        assert!(!hits.is_empty());
        assert_eq!(hits[0].name, "parseArgs");
    }

    #[test]
    fn test_limit_respected() {
        let index = sample_index();
        assert_eq!(index.prefix_match("parse", 1).len(), 1);
    }

    #[test]
    fn test_add_remove_restores_state() {
        let mut index = sample_index();
        let before = index.stats();

        let other = doc_for("function extraThing() {}\n");
        index.add("src/other.js", &other);
        assert!(index.stats().entries > before.entries);
        assert_eq!(index.exact_match("extraThing").len(), 1);

        index.remove("src/other.js");
        assert_eq!(index.stats(), before, "stats return to pre-add state");
        assert!(index.exact_match("extraThing").is_empty());
        assert!(
            index.substring_match("extraThing", 10).is_empty(),
            "k-gram buckets cleaned up"
        );
    }

    #[test]
    fn test_same_name_in_two_files() {
        let mut index = SymbolIndex::new();
        index.add("a.js", &doc_for("function shared() {}\n"));
        index.add("b.js", &doc_for("function shared() {}\n"));
        assert_eq!(index.exact_match("shared").len(), 2);

        index.remove("a.js");
        let hits = index.exact_match("shared");
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].file_path, "b.js");
        // Name still findable through k-grams.
        assert!(!index.substring_match("shared", 10).is_empty());
    }

    #[test]
    fn test_short_name_kgrams() {
        let grams = kgrams("ab");
        assert_eq!(grams, vec!["$ab", "ab$"]);
        let grams = kgrams("a");
        assert_eq!(grams, vec!["$a$"]);
    }
}
