//! Per-query performance monitoring.
//!
//! Phase timers cover the lexical fetch, the vector fetch, and ranking
//! itself. Exceeding the query's time budget flags an SLA violation; the
//! results are still returned with a warning.

use std::collections::HashMap;
use std::time::Instant;

use serde::Serialize;

/// Pipeline phases with individual timers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum Phase {
    LexicalSearch,
    VectorSearch,
    Ranking,
}

/// Timing report for one query.
#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SlaReport {
    pub lexical_ms: u64,
    pub vector_ms: u64,
    pub ranking_ms: u64,
    pub total_ms: u64,
    pub lexical_candidates: usize,
    pub vector_candidates: usize,
    pub timeout_ms: u64,
    pub sla_violation: bool,
}

/// Collects phase timings for a single query.
pub struct SlaMonitor {
    started: Instant,
    timeout_ms: u64,
    running: HashMap<Phase, Instant>,
    elapsed: HashMap<Phase, u64>,
    lexical_candidates: usize,
    vector_candidates: usize,
}

impl SlaMonitor {
    pub fn new(timeout_ms: u64) -> Self {
        Self {
            started: Instant::now(),
            timeout_ms,
            running: HashMap::new(),
            elapsed: HashMap::new(),
            lexical_candidates: 0,
            vector_candidates: 0,
        }
    }

    pub fn start_phase(&mut self, phase: Phase) {
        self.running.insert(phase, Instant::now());
    }

    pub fn stop_phase(&mut self, phase: Phase) {
        if let Some(started) = self.running.remove(&phase) {
            *self.elapsed.entry(phase).or_insert(0) += started.elapsed().as_millis() as u64;
        }
    }

    pub fn record_candidates(&mut self, lexical: usize, vector: usize) {
        self.lexical_candidates = lexical;
        self.vector_candidates = vector;
    }

    /// Remaining budget, zero once exceeded.
    pub fn remaining_ms(&self) -> u64 {
        self.timeout_ms
            .saturating_sub(self.started.elapsed().as_millis() as u64)
    }

    pub fn report(&self) -> SlaReport {
        let total_ms = self.started.elapsed().as_millis() as u64;
        SlaReport {
            lexical_ms: self.elapsed.get(&Phase::LexicalSearch).copied().unwrap_or(0),
            vector_ms: self.elapsed.get(&Phase::VectorSearch).copied().unwrap_or(0),
            ranking_ms: self.elapsed.get(&Phase::Ranking).copied().unwrap_or(0),
            total_ms,
            lexical_candidates: self.lexical_candidates,
            vector_candidates: self.vector_candidates,
            timeout_ms: self.timeout_ms,
            sla_violation: total_ms > self.timeout_ms,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn test_phase_timing_accumulates() {
        let mut monitor = SlaMonitor::new(5000);
        monitor.start_phase(Phase::LexicalSearch);
        std::thread::sleep(Duration::from_millis(5));
        monitor.stop_phase(Phase::LexicalSearch);
        monitor.record_candidates(7, 3);

        let report = monitor.report();
        assert!(report.lexical_ms >= 5);
        assert_eq!(report.vector_ms, 0);
        assert_eq!(report.lexical_candidates, 7);
        assert_eq!(report.vector_candidates, 3);
        assert!(!report.sla_violation);
    }

    #[test]
    fn test_sla_violation_flagged() {
        let monitor = SlaMonitor::new(0);
        std::thread::sleep(Duration::from_millis(2));
        let report = monitor.report();
        assert!(report.sla_violation);
        assert_eq!(report.timeout_ms, 0);
    }

    #[test]
    fn test_remaining_budget_saturates() {
        let monitor = SlaMonitor::new(1);
        std::thread::sleep(Duration::from_millis(3));
        assert_eq!(monitor.remaining_ms(), 0);
    }

    #[test]
    fn test_stop_without_start_is_noop() {
        let mut monitor = SlaMonitor::new(100);
        monitor.stop_phase(Phase::VectorSearch);
        assert_eq!(monitor.report().vector_ms, 0);
    }
}
