//! MMR-style path diversification.

use std::collections::HashMap;

use crate::config::DiversificationConfig;
use crate::ranking::RankedResult;

/// Levenshtein edit distance.
pub fn levenshtein(a: &str, b: &str) -> usize {
    let a: Vec<char> = a.chars().collect();
    let b: Vec<char> = b.chars().collect();
    if a.is_empty() {
        return b.len();
    }
    if b.is_empty() {
        return a.len();
    }

    let mut previous: Vec<usize> = (0..=b.len()).collect();
    let mut current = vec![0usize; b.len() + 1];

    for (i, &ca) in a.iter().enumerate() {
        current[0] = i + 1;
        for (j, &cb) in b.iter().enumerate() {
            let substitution = previous[j] + usize::from(ca != cb);
            current[j + 1] = substitution.min(previous[j + 1] + 1).min(current[j] + 1);
        }
        std::mem::swap(&mut previous, &mut current);
    }
    previous[b.len()]
}

/// Normalized path similarity: `1 − d / max(|a|, |b|)`.
pub fn normalized_path_similarity(a: &str, b: &str) -> f32 {
    let longest = a.chars().count().max(b.chars().count());
    if longest == 0 {
        return 1.0;
    }
    1.0 - levenshtein(a, b) as f32 / longest as f32
}

/// Greedy MMR selection over the ranked results.
///
/// For a candidate `c` with already-selected set `S`, the adjusted score is
/// `λ·score(c) − (1−λ)·max_{s∈S} sim(c.path, s.path)`. A file that already
/// holds `max_per_file` selections defers its remaining candidates until
/// everything else is placed. When every result comes from one path there
/// is nothing to diversify.
pub fn diversify(results: Vec<RankedResult>, config: &DiversificationConfig) -> Vec<RankedResult> {
    if results.len() < 2 {
        return results;
    }
    let first_path = &results[0].candidate.file_path;
    if results.iter().all(|r| &r.candidate.file_path == first_path) {
        return results;
    }

    let lambda = config.lambda;
    let mut pool: Vec<RankedResult> = results;
    let mut selected: Vec<RankedResult> = Vec::with_capacity(pool.len());
    let mut per_file: HashMap<String, u32> = HashMap::new();
    let mut deferred: Vec<RankedResult> = Vec::new();

    while !pool.is_empty() {
        let mut best: Option<(usize, f32, f32)> = None;
        for (i, candidate) in pool.iter().enumerate() {
            let used = per_file
                .get(&candidate.candidate.file_path)
                .copied()
                .unwrap_or(0);
            if used >= config.max_per_file {
                continue;
            }
            let max_sim = selected
                .iter()
                .map(|s| {
                    normalized_path_similarity(
                        &candidate.candidate.file_path,
                        &s.candidate.file_path,
                    )
                })
                .fold(0.0f32, f32::max);
            let penalty = (1.0 - lambda) * max_sim;
            let adjusted = lambda * candidate.final_score - penalty;
            let better = match best {
                None => true,
                Some((_, best_adjusted, _)) => adjusted > best_adjusted,
            };
            if better {
                best = Some((i, adjusted, penalty));
            }
        }

        match best {
            Some((i, _, penalty)) => {
                let mut chosen = pool.remove(i);
                chosen.score_breakdown.diversity_penalty = Some(penalty);
                *per_file
                    .entry(chosen.candidate.file_path.clone())
                    .or_insert(0) += 1;
                selected.push(chosen);
            }
            None => {
                // Everything left is file-capped: defer in current order.
                deferred.append(&mut pool);
            }
        }
    }

    selected.extend(deferred);
    selected
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ranking::RankCandidate;
    use crate::ranking::ScoreBreakdown;

    fn result(path: &str, line: u32, score: f32) -> RankedResult {
        RankedResult {
            candidate: RankCandidate {
                file_id: 1,
                file_path: path.to_string(),
                line,
                column: None,
                snippet: String::new(),
                symbol_name: None,
                symbol_kind: None,
                language: None,
                source_rank: 1,
                raw_score: score,
            },
            final_score: score,
            final_rank: 0,
            score_breakdown: ScoreBreakdown::default(),
        }
    }

    #[test]
    fn test_levenshtein_basics() {
        assert_eq!(levenshtein("", ""), 0);
        assert_eq!(levenshtein("abc", "abc"), 0);
        assert_eq!(levenshtein("abc", "abd"), 1);
        assert_eq!(levenshtein("kitten", "sitting"), 3);
        assert_eq!(levenshtein("", "xyz"), 3);
    }

    #[test]
    fn test_path_similarity_range() {
        assert_eq!(normalized_path_similarity("", ""), 1.0);
        assert!((normalized_path_similarity("src/a.ts", "src/a.ts") - 1.0).abs() < 1e-6);
        let sim = normalized_path_similarity("src/parser.ts", "src/lexer.ts");
        assert!(sim > 0.0 && sim < 1.0);
    }

    #[test]
    fn test_seed_scenario_lexer_surfaces() {
        // Five candidates from parser.ts, one from lexer.ts, maxPerFile 2,
        // lambda 0.5: the lexer result must land in the top three.
        let results = vec![
            result("src/parser.ts", 1, 0.9),
            result("src/parser.ts", 5, 0.85),
            result("src/parser.ts", 9, 0.8),
            result("src/parser.ts", 13, 0.75),
            result("src/parser.ts", 17, 0.7),
            result("src/lexer.ts", 3, 0.65),
        ];
        let config = DiversificationConfig {
            enabled: true,
            lambda: 0.5,
            max_per_file: 2,
        };
        let diversified = diversify(results, &config);

        let lexer_position = diversified
            .iter()
            .position(|r| r.candidate.file_path == "src/lexer.ts")
            .unwrap();
        assert!(
            lexer_position < 3,
            "lexer.ts should be in the top three, found at {lexer_position}"
        );
        // All six results survive.
        assert_eq!(diversified.len(), 6);
    }

    #[test]
    fn test_max_per_file_defers_extras() {
        let results = vec![
            result("src/a.ts", 1, 0.9),
            result("src/a.ts", 2, 0.8),
            result("src/a.ts", 3, 0.7),
            result("src/b.ts", 1, 0.1),
        ];
        let config = DiversificationConfig {
            enabled: true,
            lambda: 0.9,
            max_per_file: 2,
        };
        let diversified = diversify(results, &config);
        // The third a.ts result is deferred behind b.ts.
        let last = &diversified[3];
        assert_eq!(last.candidate.file_path, "src/a.ts");
        assert_eq!(last.candidate.line, 3);
    }

    #[test]
    fn test_single_path_skips_diversification() {
        let results = vec![
            result("src/only.ts", 1, 0.9),
            result("src/only.ts", 2, 0.8),
            result("src/only.ts", 3, 0.7),
        ];
        let config = DiversificationConfig {
            enabled: true,
            lambda: 0.5,
            max_per_file: 1,
        };
        let diversified = diversify(results.clone(), &config);
        assert_eq!(diversified, results, "single-path input is untouched");
    }

    #[test]
    fn test_penalty_recorded() {
        let results = vec![
            result("src/aaa.ts", 1, 0.9),
            result("src/aab.ts", 1, 0.8),
        ];
        let config = DiversificationConfig {
            enabled: true,
            lambda: 0.5,
            max_per_file: 5,
        };
        let diversified = diversify(results, &config);
        // First pick has no predecessors, zero penalty.
        assert_eq!(diversified[0].score_breakdown.diversity_penalty, Some(0.0));
        // Second pick pays for similarity to the first.
        assert!(diversified[1].score_breakdown.diversity_penalty.unwrap() > 0.0);
    }
}
