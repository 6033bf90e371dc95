//! Ranking pipeline: RRF fusion, early termination, path diversification,
//! ε-band tie-breaking, and SLA timing.

pub mod diversify;
pub mod fusion;
pub mod sla;
pub mod tiebreak;

use serde::Deserialize;
use serde::Serialize;

use crate::config::RankingConfig;

pub use diversify::normalized_path_similarity;
pub use fusion::fuse;
pub use sla::SlaMonitor;
pub use sla::SlaReport;
pub use tiebreak::TIE_THRESHOLD;

/// A candidate from one source list (lexical or vector), 1-based rank.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RankCandidate {
    pub file_id: i64,
    pub file_path: String,
    /// 1-based.
    pub line: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub column: Option<u32>,
    pub snippet: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub symbol_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub symbol_kind: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub language: Option<String>,
    /// 1-based rank within the source list.
    pub source_rank: u32,
    pub raw_score: f32,
}

/// Tie-breaker sub-scores.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TieBreakerScores {
    pub symbol_type_priority: f32,
    pub path_priority: f32,
    pub language_match: f32,
    pub identifier_match: f32,
    pub combined: f32,
}

/// Per-result score decomposition.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScoreBreakdown {
    pub lexical_contribution: f32,
    pub vector_contribution: f32,
    pub tie_breaker_contribution: f32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub lexical_rank: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub vector_rank: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub lexical_raw_score: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub vector_raw_score: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tie_breaker_scores: Option<TieBreakerScores>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub diversity_penalty: Option<f32>,
}

/// A final, ranked result.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RankedResult {
    #[serde(flatten)]
    pub candidate: RankCandidate,
    pub final_score: f32,
    /// 1-based.
    pub final_rank: u32,
    pub score_breakdown: ScoreBreakdown,
}

/// Which source list, if any, the pipeline fell back to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FallbackMode {
    None,
    /// Vector list was empty.
    Lexical,
    /// Lexical list was empty.
    Vector,
}

/// Pipeline output.
#[derive(Debug, Clone)]
pub struct RankingOutcome {
    pub results: Vec<RankedResult>,
    pub fallback_mode: FallbackMode,
    pub warnings: Vec<String>,
    pub report: SlaReport,
}

/// Run the full pipeline over the two source lists.
pub fn rank(
    query: &str,
    lexical: &[RankCandidate],
    vector: &[RankCandidate],
    config: &RankingConfig,
    monitor: &mut SlaMonitor,
) -> RankingOutcome {
    monitor.start_phase(sla::Phase::Ranking);
    monitor.record_candidates(lexical.len(), vector.len());

    let fallback_mode = if vector.is_empty() && !lexical.is_empty() {
        FallbackMode::Lexical
    } else if lexical.is_empty() && !vector.is_empty() {
        FallbackMode::Vector
    } else {
        FallbackMode::None
    };

    // Dedup + RRF.
    let mut results = fusion::fuse(lexical, vector, &config.fusion);

    // Early termination: keep the strongest candidates only.
    results.sort_by(|a, b| {
        b.final_score
            .total_cmp(&a.final_score)
            .then_with(|| a.candidate.file_path.cmp(&b.candidate.file_path))
            .then_with(|| a.candidate.line.cmp(&b.candidate.line))
    });
    results.truncate(config.performance.early_termination_top_k as usize);
    renumber(&mut results);

    // MMR path diversification.
    if config.diversification.enabled {
        results = diversify::diversify(results, &config.diversification);
        renumber(&mut results);
    }

    // ε-band tie-breakers.
    tiebreak::apply(query, &mut results, &config.tie_breakers);
    renumber(&mut results);

    monitor.stop_phase(sla::Phase::Ranking);
    let report = monitor.report();

    let mut warnings = Vec::new();
    if report.sla_violation {
        warnings.push(format!(
            "query exceeded its time budget: {} ms > {} ms",
            report.total_ms, report.timeout_ms
        ));
    }

    RankingOutcome {
        results,
        fallback_mode,
        warnings,
        report,
    }
}

pub(crate) fn renumber(results: &mut [RankedResult]) {
    for (i, result) in results.iter_mut().enumerate() {
        result.final_rank = i as u32 + 1;
    }
}
