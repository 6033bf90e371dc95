//! ε-band tie-breaking.
//!
//! Results whose fused scores sit within a small threshold of each other
//! are reordered by secondary signals: symbol type, path priority,
//! language match, and exact identifier match. Clusters further apart
//! than the threshold keep their relative order.

use crate::config::TieBreakerConfig;
use crate::ranking::RankedResult;
use crate::ranking::TieBreakerScores;

/// Two consecutive results closer than this are considered tied.
pub const TIE_THRESHOLD: f32 = 0.01;

/// Scale of the tie-breaker contribution added to the final score.
const CONTRIBUTION_SCALE: f32 = 0.1;

/// Symbol-type priorities on a 0..100 scale, divided by 100 when applied.
fn symbol_type_priority(kind: Option<&str>) -> f32 {
    let priority = match kind {
        Some("class") => 95,
        Some("function") => 90,
        Some("component") => 88,
        Some("method") | Some("async_method") | Some("constructor") => 85,
        Some("interface") => 80,
        Some("async_function") | Some("generator") => 78,
        Some("type_alias") => 75,
        Some("enum") => 70,
        Some("module") => 65,
        Some("constant") => 60,
        Some("property") => 55,
        _ => 50,
    };
    priority as f32 / 100.0
}

/// Path priority from the pattern table.
fn path_priority(path: &str) -> f32 {
    let lower = path.to_lowercase();
    if lower.contains("test") || lower.contains("spec") || lower.contains("__tests__") {
        0.6
    } else if lower.starts_with("src/") || lower.contains("/src/") {
        1.0
    } else if lower.starts_with("lib/") || lower.contains("/lib/") {
        0.9
    } else if lower.starts_with("docs/") || lower.contains("/docs/") || lower.ends_with(".md") {
        0.4
    } else {
        0.5
    }
}

/// Detect a language named in the query, by keyword or extension
/// substring.
fn query_language(query: &str) -> Option<&'static str> {
    let lower = query.to_lowercase();
    const KEYWORDS: &[(&str, &str)] = &[
        ("typescript", "typescript"),
        (".tsx", "tsx"),
        (".ts", "typescript"),
        ("javascript", "javascript"),
        (".jsx", "javascript"),
        (".js", "javascript"),
        ("python", "python"),
        (".py", "python"),
        ("rust", "rust"),
        (".rs", "rust"),
    ];
    KEYWORDS
        .iter()
        .find(|(needle, _)| lower.contains(needle))
        .map(|(_, language)| *language)
}

/// Identifier tokens from the query: alphanumeric + underscore runs longer
/// than two characters, case preserved.
fn identifier_tokens(query: &str) -> Vec<String> {
    let mut tokens = Vec::new();
    let mut current = String::new();
    for c in query.chars() {
        if c.is_alphanumeric() || c == '_' {
            current.push(c);
        } else if !current.is_empty() {
            tokens.push(std::mem::take(&mut current));
        }
    }
    if !current.is_empty() {
        tokens.push(current);
    }
    tokens.retain(|t| t.len() > 2);
    tokens
}

/// Apply tie-breaking in place over score-descending results.
pub fn apply(query: &str, results: &mut Vec<RankedResult>, config: &TieBreakerConfig) {
    if results.len() < 2 {
        return;
    }

    let wanted_language = query_language(query);
    let identifiers = identifier_tokens(query);

    // Cluster consecutive results within the threshold.
    let mut cluster_start = 0;
    let mut boundaries: Vec<(usize, usize)> = Vec::new();
    for i in 1..results.len() {
        let gap = (results[i - 1].final_score - results[i].final_score).abs();
        if gap > TIE_THRESHOLD {
            boundaries.push((cluster_start, i));
            cluster_start = i;
        }
    }
    boundaries.push((cluster_start, results.len()));

    for (start, end) in boundaries {
        if end - start < 2 {
            continue;
        }
        for result in &mut results[start..end] {
            let scores = TieBreakerScores {
                symbol_type_priority: symbol_type_priority(
                    result.candidate.symbol_kind.as_deref(),
                ),
                path_priority: path_priority(&result.candidate.file_path),
                language_match: match (wanted_language, result.candidate.language.as_deref()) {
                    (Some(wanted), Some(have)) if wanted == have => 1.0,
                    _ => 0.0,
                },
                identifier_match: match &result.candidate.symbol_name {
                    Some(name) if identifiers.iter().any(|t| t == name) => 1.0,
                    _ => 0.0,
                },
                combined: 0.0,
            };
            let combined = config.symbol_type_weight * scores.symbol_type_priority
                + config.path_priority_weight * scores.path_priority
                + config.language_match_weight * scores.language_match
                + config.identifier_match_weight * scores.identifier_match;

            result.score_breakdown.tie_breaker_scores = Some(TieBreakerScores {
                combined,
                ..scores
            });
            result.score_breakdown.tie_breaker_contribution = combined * CONTRIBUTION_SCALE;
            result.final_score += combined * CONTRIBUTION_SCALE;
        }

        // Re-sort inside the cluster only, so clusters further apart than
        // the threshold keep their relative order.
        results[start..end].sort_by(|a, b| {
            b.final_score
                .total_cmp(&a.final_score)
                .then_with(|| a.candidate.file_path.cmp(&b.candidate.file_path))
                .then_with(|| a.candidate.line.cmp(&b.candidate.line))
        });
    }
}
