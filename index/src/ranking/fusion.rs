//! Deduplication and Reciprocal Rank Fusion.

use std::collections::HashMap;

use crate::config::FusionConfig;
use crate::ranking::RankCandidate;
use crate::ranking::RankedResult;
use crate::ranking::ScoreBreakdown;

/// Merge the two source lists by `fileId:line` and fuse ranks with RRF:
/// `finalScore = α/(k + rankₗ) + β/(k + rankᵥ)`, a missing rank
/// contributing zero.
///
/// When a candidate appears in both lists the vector candidate's metadata
/// wins (its snippet is richer); both source ranks are kept on the
/// breakdown.
pub fn fuse(
    lexical: &[RankCandidate],
    vector: &[RankCandidate],
    config: &FusionConfig,
) -> Vec<RankedResult> {
    struct Merged {
        candidate: RankCandidate,
        lexical_rank: Option<u32>,
        lexical_raw: Option<f32>,
        vector_rank: Option<u32>,
        vector_raw: Option<f32>,
    }

    let mut merged: HashMap<String, Merged> = HashMap::new();
    let mut order: Vec<String> = Vec::new();

    for candidate in lexical {
        let key = format!("{}:{}", candidate.file_id, candidate.line);
        let entry = merged.entry(key.clone()).or_insert_with(|| {
            order.push(key);
            Merged {
                candidate: candidate.clone(),
                lexical_rank: None,
                lexical_raw: None,
                vector_rank: None,
                vector_raw: None,
            }
        });
        entry.lexical_rank = Some(candidate.source_rank);
        entry.lexical_raw = Some(candidate.raw_score);
    }

    for candidate in vector {
        let key = format!("{}:{}", candidate.file_id, candidate.line);
        match merged.get_mut(&key) {
            Some(entry) => {
                // Present in both: prefer the vector candidate's metadata.
                entry.candidate = candidate.clone();
                entry.vector_rank = Some(candidate.source_rank);
                entry.vector_raw = Some(candidate.raw_score);
            }
            None => {
                order.push(key.clone());
                merged.insert(
                    key,
                    Merged {
                        candidate: candidate.clone(),
                        lexical_rank: None,
                        lexical_raw: None,
                        vector_rank: Some(candidate.source_rank),
                        vector_raw: Some(candidate.raw_score),
                    },
                );
            }
        }
    }

    order
        .into_iter()
        .filter_map(|key| merged.remove(&key))
        .map(|entry| {
            let lexical_contribution = entry
                .lexical_rank
                .map(|rank| config.alpha / (config.rrf_k + rank as f32))
                .unwrap_or(0.0);
            let vector_contribution = entry
                .vector_rank
                .map(|rank| config.beta / (config.rrf_k + rank as f32))
                .unwrap_or(0.0);

            RankedResult {
                candidate: entry.candidate,
                final_score: lexical_contribution + vector_contribution,
                final_rank: 0,
                score_breakdown: ScoreBreakdown {
                    lexical_contribution,
                    vector_contribution,
                    tie_breaker_contribution: 0.0,
                    lexical_rank: entry.lexical_rank,
                    vector_rank: entry.vector_rank,
                    lexical_raw_score: entry.lexical_raw,
                    vector_raw_score: entry.vector_raw,
                    tie_breaker_scores: None,
                    diversity_penalty: None,
                },
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn candidate(file_id: i64, line: u32, rank: u32, snippet: &str) -> RankCandidate {
        RankCandidate {
            file_id,
            file_path: format!("src/file{file_id}.ts"),
            line,
            column: None,
            snippet: snippet.to_string(),
            symbol_name: None,
            symbol_kind: None,
            language: None,
            source_rank: rank,
            raw_score: 1.0 / rank as f32,
        }
    }

    #[test]
    fn test_dedup_merges_by_file_and_line() {
        let lexical = vec![candidate(1, 10, 1, "lexical snippet")];
        let vector = vec![candidate(1, 10, 2, "vector snippet")];

        let fused = fuse(&lexical, &vector, &FusionConfig::default());
        assert_eq!(fused.len(), 1);
        // Vector metadata wins on merge.
        assert_eq!(fused[0].candidate.snippet, "vector snippet");
        assert_eq!(fused[0].score_breakdown.lexical_rank, Some(1));
        assert_eq!(fused[0].score_breakdown.vector_rank, Some(2));
    }

    #[test]
    fn test_missing_rank_contributes_zero() {
        let lexical = vec![candidate(1, 5, 3, "only lexical")];
        let config = FusionConfig {
            alpha: 0.5,
            beta: 0.5,
            gamma: 0.0,
            rrf_k: 60.0,
        };
        let fused = fuse(&lexical, &[], &config);
        assert!((fused[0].final_score - 0.5 / 63.0).abs() < 1e-7);
        assert_eq!(fused[0].score_breakdown.vector_contribution, 0.0);
    }

    #[test]
    fn test_contribution_breakdown_sums_to_score() {
        let lexical = vec![candidate(1, 1, 1, "a"), candidate(2, 2, 2, "b")];
        let vector = vec![candidate(2, 2, 1, "b2"), candidate(3, 3, 2, "c")];
        let fused = fuse(&lexical, &vector, &FusionConfig::default());

        for result in &fused {
            let sum = result.score_breakdown.lexical_contribution
                + result.score_breakdown.vector_contribution;
            assert!((result.final_score - sum).abs() < 1e-7);
        }
    }

    #[test]
    fn test_distinct_lines_in_same_file_stay_separate() {
        let lexical = vec![candidate(1, 10, 1, "a")];
        let vector = vec![candidate(1, 20, 1, "b")];
        let fused = fuse(&lexical, &vector, &FusionConfig::default());
        assert_eq!(fused.len(), 2);
    }
}
