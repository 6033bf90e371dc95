//! Sparse lexical vectors over AST-derived text.
//!
//! Character n-grams (3..=5) of the normalized token stream are hashed with
//! FNV-1a into a fixed feature space of 2^18 buckets, term-frequency
//! weighted, then L2-normalized so cosine similarity reduces to a dot
//! product.

use std::collections::HashMap;

use serde::Deserialize;
use serde::Serialize;

use crate::ast::document::AstDocument;
use crate::ast::document::CommentKind;
use crate::error::IndexErr;
use crate::error::Result;

/// Fixed sparse feature space: 2^18 buckets.
pub const NUM_FEATURES: u32 = 1 << 18;

/// Smallest and largest n-gram sizes.
const NGRAM_MIN: usize = 3;
const NGRAM_MAX: usize = 5;

const FNV_OFFSET: u32 = 2_166_136_261;
const FNV_PRIME: u32 = 16_777_619;

/// 32-bit FNV-1a over a byte slice.
pub fn fnv1a(bytes: &[u8]) -> u32 {
    let mut hash = FNV_OFFSET;
    for &b in bytes {
        hash ^= b as u32;
        hash = hash.wrapping_mul(FNV_PRIME);
    }
    hash
}

/// An L2-normalized sparse vector with ascending feature indices.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SparseVector {
    pub indices: Vec<u32>,
    pub values: Vec<f32>,
}

impl SparseVector {
    /// Number of non-zero features.
    pub fn nnz(&self) -> usize {
        self.indices.len()
    }

    pub fn is_empty(&self) -> bool {
        self.indices.is_empty()
    }

    /// Euclidean norm.
    pub fn norm(&self) -> f32 {
        self.values.iter().map(|v| v * v).sum::<f32>().sqrt()
    }

    /// Cosine similarity via dot product of the smaller support set
    /// against the other vector. Both sides are L2-normalized at build
    /// time, so no re-normalization happens here.
    pub fn cosine(&self, other: &SparseVector) -> f32 {
        if self.is_empty() || other.is_empty() {
            return 0.0;
        }
        let (small, large) = if self.nnz() <= other.nnz() {
            (self, other)
        } else {
            (other, self)
        };
        let mut dot = 0.0f32;
        for (i, &index) in small.indices.iter().enumerate() {
            if let Ok(pos) = large.indices.binary_search(&index) {
                dot += small.values[i] * large.values[pos];
            }
        }
        dot
    }
}

/// Vectorize free text (queries and chunk content).
pub fn vectorize_text(text: &str) -> SparseVector {
    let normalized = normalize_stream(text);
    let mut counts: HashMap<u32, f32> = HashMap::new();

    let chars: Vec<char> = normalized.chars().collect();
    for n in NGRAM_MIN..=NGRAM_MAX {
        if chars.len() < n {
            break;
        }
        for window in chars.windows(n) {
            let gram: String = window.iter().collect();
            let index = fnv1a(gram.as_bytes()) % NUM_FEATURES;
            *counts.entry(index).or_insert(0.0) += 1.0;
        }
    }

    let mut entries: Vec<(u32, f32)> = counts.into_iter().collect();
    entries.sort_unstable_by_key(|(i, _)| *i);

    let mut vector = SparseVector {
        indices: entries.iter().map(|(i, _)| *i).collect(),
        values: entries.iter().map(|(_, v)| *v).collect(),
    };

    let norm = vector.norm();
    if norm > 0.0 {
        for v in &mut vector.values {
            *v /= norm;
        }
    }
    vector
}

/// Vectorize an AST document: the flat token stream concatenates file path,
/// symbol names/kinds/signatures/docs, enum values, import and export
/// sources and specifiers, and jsdoc/docstring comment bodies.
pub fn vectorize_document(doc: &AstDocument) -> SparseVector {
    vectorize_text(&document_stream(doc))
}

/// Build the lowercase flat token stream of a document.
pub fn document_stream(doc: &AstDocument) -> String {
    let mut parts: Vec<String> = vec![doc.path.clone()];

    for symbol in doc.iter_symbols() {
        parts.push(symbol.name);
        parts.push(symbol.kind.as_str().to_string());
        if let Some(sig) = symbol.signature {
            parts.push(sig);
        }
        if let Some(doc_text) = symbol.doc {
            parts.push(doc_text);
        }
    }
    for e in doc.enums.values() {
        parts.extend(e.values.iter().cloned());
    }
    for import in &doc.imports {
        parts.push(import.source.clone());
        parts.extend(import.specifiers.iter().cloned());
    }
    for export in &doc.exports {
        if let Some(source) = &export.source {
            parts.push(source.clone());
        }
        parts.extend(export.specifiers.iter().cloned());
    }
    for comment in &doc.comments {
        if matches!(comment.kind, CommentKind::Jsdoc | CommentKind::Docstring) {
            parts.push(comment.text.clone());
        }
    }

    parts.join(" ")
}

fn normalize_stream(text: &str) -> String {
    text.to_lowercase()
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
}

/// A sparse matrix in compressed sparse row form.
///
/// `row_pointers[0] = 0` and `row_pointers[i + 1] = row_pointers[i] +
/// nnz(row i)`; column indices are ascending within each row.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CsrMatrix {
    pub values: Vec<f32>,
    pub col_indices: Vec<u32>,
    pub row_pointers: Vec<u32>,
}

impl CsrMatrix {
    pub fn rows(&self) -> usize {
        self.row_pointers.len().saturating_sub(1)
    }

    /// Pack row vectors into CSR form.
    pub fn from_rows(rows: &[SparseVector]) -> Self {
        let mut matrix = CsrMatrix {
            row_pointers: vec![0],
            ..Default::default()
        };
        for row in rows {
            matrix.values.extend_from_slice(&row.values);
            matrix.col_indices.extend_from_slice(&row.indices);
            let last = *matrix.row_pointers.last().unwrap_or(&0);
            matrix.row_pointers.push(last + row.nnz() as u32);
        }
        matrix
    }

    /// Unpack back into row vectors.
    pub fn to_rows(&self) -> Vec<SparseVector> {
        let mut rows = Vec::with_capacity(self.rows());
        for i in 0..self.rows() {
            let start = self.row_pointers[i] as usize;
            let end = self.row_pointers[i + 1] as usize;
            rows.push(SparseVector {
                indices: self.col_indices[start..end].to_vec(),
                values: self.values[start..end].to_vec(),
            });
        }
        rows
    }

    /// Row view without copying.
    pub fn row(&self, i: usize) -> SparseVector {
        let start = self.row_pointers[i] as usize;
        let end = self.row_pointers[i + 1] as usize;
        SparseVector {
            indices: self.col_indices[start..end].to_vec(),
            values: self.values[start..end].to_vec(),
        }
    }

    /// Binary layout: three little-endian u32 lengths, then values (f32 LE),
    /// column indices (u32 LE), row pointers (u32 LE).
    pub fn encode(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(
            12 + self.values.len() * 4 + self.col_indices.len() * 4 + self.row_pointers.len() * 4,
        );
        out.extend_from_slice(&(self.values.len() as u32).to_le_bytes());
        out.extend_from_slice(&(self.col_indices.len() as u32).to_le_bytes());
        out.extend_from_slice(&(self.row_pointers.len() as u32).to_le_bytes());
        for v in &self.values {
            out.extend_from_slice(&v.to_le_bytes());
        }
        for c in &self.col_indices {
            out.extend_from_slice(&c.to_le_bytes());
        }
        for r in &self.row_pointers {
            out.extend_from_slice(&r.to_le_bytes());
        }
        out
    }

    /// Decode the binary layout produced by [`CsrMatrix::encode`].
    pub fn decode(bytes: &[u8]) -> Result<Self> {
        let header_err = || IndexErr::Validation {
            rule: "csr.layout".to_string(),
            cause: "truncated CSR buffer".to_string(),
        };
        if bytes.len() < 12 {
            return Err(header_err());
        }
        let read_u32 = |offset: usize| -> u32 {
            u32::from_le_bytes([
                bytes[offset],
                bytes[offset + 1],
                bytes[offset + 2],
                bytes[offset + 3],
            ])
        };
        let values_len = read_u32(0) as usize;
        let cols_len = read_u32(4) as usize;
        let rows_len = read_u32(8) as usize;
        let expected = 12 + (values_len + cols_len + rows_len) * 4;
        if bytes.len() != expected {
            return Err(header_err());
        }

        let mut offset = 12;
        let mut values = Vec::with_capacity(values_len);
        for _ in 0..values_len {
            values.push(f32::from_le_bytes([
                bytes[offset],
                bytes[offset + 1],
                bytes[offset + 2],
                bytes[offset + 3],
            ]));
            offset += 4;
        }
        let mut col_indices = Vec::with_capacity(cols_len);
        for _ in 0..cols_len {
            col_indices.push(read_u32(offset));
            offset += 4;
        }
        let mut row_pointers = Vec::with_capacity(rows_len);
        for _ in 0..rows_len {
            row_pointers.push(read_u32(offset));
            offset += 4;
        }

        Ok(Self {
            values,
            col_indices,
            row_pointers,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const EPSILON: f32 = 1e-6;

    #[test]
    fn test_fnv1a_constants() {
        // Offset basis is the hash of the empty input.
        assert_eq!(fnv1a(b""), FNV_OFFSET);
        // Deterministic across calls.
        assert_eq!(fnv1a(b"parse"), fnv1a(b"parse"));
        assert_ne!(fnv1a(b"parse"), fnv1a(b"parser"));
    }

    #[test]
    fn test_vectors_are_l2_normalized() {
        let v = vectorize_text("function parse config loader");
        assert!(!v.is_empty());
        // Accumulate in f64 so the check reflects the vector, not f32
        // summation error.
        let norm = v
            .values
            .iter()
            .map(|&x| x as f64 * x as f64)
            .sum::<f64>()
            .sqrt();
        assert!((norm - 1.0).abs() < EPSILON as f64);
        assert!(v.indices.iter().all(|&i| i < NUM_FEATURES));
    }

    #[test]
    fn test_indices_sorted_ascending() {
        let v = vectorize_text("the quick brown fox jumps over the lazy dog");
        for pair in v.indices.windows(2) {
            assert!(pair[0] < pair[1]);
        }
    }

    #[test]
    fn test_empty_text_gives_empty_vector() {
        let v = vectorize_text("");
        assert!(v.is_empty());
        assert_eq!(v.norm(), 0.0);

        let other = vectorize_text("something");
        assert_eq!(v.cosine(&other), 0.0);
        assert_eq!(other.cosine(&v), 0.0);
    }

    #[test]
    fn test_cosine_identity_and_disjoint() {
        let a = vectorize_text("hash table lookup");
        let b = vectorize_text("hash table lookup");
        assert!((a.cosine(&b) - 1.0).abs() < 1e-4);

        let c = vectorize_text("zzzzqqq");
        let sim = a.cosine(&c);
        assert!(sim < 0.2, "unrelated text scores low, got {sim}");
    }

    #[test]
    fn test_case_insensitive() {
        let a = vectorize_text("ParseConfig");
        let b = vectorize_text("parseconfig");
        assert!((a.cosine(&b) - 1.0).abs() < 1e-4);
    }

    #[test]
    fn test_csr_round_trip() {
        let rows = vec![
            vectorize_text("first row of tokens"),
            vectorize_text("second row"),
            SparseVector::default(),
            vectorize_text("fourth"),
        ];
        let matrix = CsrMatrix::from_rows(&rows);
        assert_eq!(matrix.rows(), 4);
        assert_eq!(matrix.row_pointers[0], 0);
        assert_eq!(matrix.to_rows(), rows);
    }

    #[test]
    fn test_csr_binary_round_trip() {
        let rows = vec![vectorize_text("alpha beta"), vectorize_text("gamma")];
        let matrix = CsrMatrix::from_rows(&rows);
        let decoded = CsrMatrix::decode(&matrix.encode()).unwrap();
        assert_eq!(decoded, matrix);
    }

    #[test]
    fn test_csr_decode_rejects_truncation() {
        let matrix = CsrMatrix::from_rows(&[vectorize_text("alpha beta")]);
        let mut bytes = matrix.encode();
        bytes.truncate(bytes.len() - 1);
        assert!(CsrMatrix::decode(&bytes).is_err());
        assert!(CsrMatrix::decode(&[1, 2]).is_err());
    }

    #[test]
    fn test_document_stream_contains_expected_fields() {
        use crate::ast::build_document;
        use crate::language::Language;
        use crate::parser::SyntaxParser;

        let source = "import { load } from './loader';\n\
                      /** Parses things. */\n\
                      export function parseAll(items) { return items.map(load); }\n";
        let tree = SyntaxParser::new().parse(source, Language::JavaScript).unwrap();
        let doc = build_document("src/parse.js", source, Language::JavaScript, &tree, "t");

        let stream = document_stream(&doc);
        assert!(stream.contains("src/parse.js"));
        assert!(stream.contains("parseAll"));
        assert!(stream.contains("function"));
        assert!(stream.contains("./loader"));
        assert!(stream.contains("load"));
        assert!(stream.contains("Parses things."));
    }
}
