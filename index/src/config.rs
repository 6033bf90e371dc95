//! Ranking and watcher configuration.
//!
//! Ranking config loads from JSON, validates hard bounds, emits advisory
//! warnings for extreme weights, and hot-reloads with a debounce. On any
//! validation failure the previous valid config is retained.

use std::path::Path;
use std::path::PathBuf;
use std::sync::Arc;
use std::sync::RwLock;
use std::time::Duration;

use notify::RecursiveMode;
use notify::Watcher;
use serde::Deserialize;
use serde::Serialize;

use crate::error::IndexErr;
use crate::error::Result;

/// Debounce window for config hot reload.
const RELOAD_DEBOUNCE: Duration = Duration::from_millis(200);

/// RRF fusion weights.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct FusionConfig {
    /// Lexical weight.
    pub alpha: f32,
    /// Vector weight.
    pub beta: f32,
    /// Reserved third-source weight.
    pub gamma: f32,
    pub rrf_k: f32,
}

impl Default for FusionConfig {
    fn default() -> Self {
        Self {
            alpha: 0.5,
            beta: 0.5,
            gamma: 0.0,
            rrf_k: 60.0,
        }
    }
}

/// MMR-style path diversification.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct DiversificationConfig {
    pub enabled: bool,
    /// Relevance/diversity trade-off.
    pub lambda: f32,
    pub max_per_file: u32,
}

impl Default for DiversificationConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            lambda: 0.7,
            max_per_file: 3,
        }
    }
}

/// Tie-breaker factor weights.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct TieBreakerConfig {
    pub symbol_type_weight: f32,
    pub path_priority_weight: f32,
    pub language_match_weight: f32,
    pub identifier_match_weight: f32,
}

impl Default for TieBreakerConfig {
    fn default() -> Self {
        Self {
            symbol_type_weight: 0.4,
            path_priority_weight: 0.3,
            language_match_weight: 0.15,
            identifier_match_weight: 0.15,
        }
    }
}

/// Query performance envelope.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct PerformanceConfig {
    /// 10..=1000.
    pub candidate_limit: u32,
    /// 100..=5000 ms.
    pub timeout_ms: u64,
    /// 1..=100.
    pub early_termination_top_k: u32,
}

impl Default for PerformanceConfig {
    fn default() -> Self {
        Self {
            candidate_limit: 200,
            timeout_ms: 1000,
            early_termination_top_k: 50,
        }
    }
}

/// Full ranking configuration.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct RankingConfig {
    pub fusion: FusionConfig,
    pub diversification: DiversificationConfig,
    pub tie_breakers: TieBreakerConfig,
    pub performance: PerformanceConfig,
}

fn check_unit(rule: &str, value: f32) -> Result<()> {
    if !(0.0..=1.0).contains(&value) || !value.is_finite() {
        return Err(IndexErr::Validation {
            rule: rule.to_string(),
            cause: format!("{value} outside [0, 1]"),
        });
    }
    Ok(())
}

fn check_range<T: PartialOrd + std::fmt::Display>(rule: &str, value: T, min: T, max: T) -> Result<()> {
    if value < min || value > max {
        return Err(IndexErr::Validation {
            rule: rule.to_string(),
            cause: format!("{value} outside [{min}, {max}]"),
        });
    }
    Ok(())
}

impl RankingConfig {
    /// Validate hard bounds. Violations reject the whole config.
    pub fn validate(&self) -> Result<()> {
        check_unit("fusion.alpha", self.fusion.alpha)?;
        check_unit("fusion.beta", self.fusion.beta)?;
        check_unit("fusion.gamma", self.fusion.gamma)?;
        if self.fusion.alpha + self.fusion.beta + self.fusion.gamma > 1.0 {
            return Err(IndexErr::Validation {
                rule: "fusion.weights".to_string(),
                cause: format!(
                    "alpha + beta + gamma = {} exceeds 1.0",
                    self.fusion.alpha + self.fusion.beta + self.fusion.gamma
                ),
            });
        }
        if self.fusion.rrf_k <= 0.0 || !self.fusion.rrf_k.is_finite() {
            return Err(IndexErr::Validation {
                rule: "fusion.rrfK".to_string(),
                cause: format!("{} must be positive", self.fusion.rrf_k),
            });
        }
        check_unit("diversification.lambda", self.diversification.lambda)?;
        if self.diversification.max_per_file < 1 {
            return Err(IndexErr::Validation {
                rule: "diversification.maxPerFile".to_string(),
                cause: "must be >= 1".to_string(),
            });
        }
        check_unit("tieBreakers.symbolTypeWeight", self.tie_breakers.symbol_type_weight)?;
        check_unit("tieBreakers.pathPriorityWeight", self.tie_breakers.path_priority_weight)?;
        check_unit("tieBreakers.languageMatchWeight", self.tie_breakers.language_match_weight)?;
        check_unit(
            "tieBreakers.identifierMatchWeight",
            self.tie_breakers.identifier_match_weight,
        )?;
        check_range(
            "performance.candidateLimit",
            self.performance.candidate_limit,
            10,
            1000,
        )?;
        check_range("performance.timeoutMs", self.performance.timeout_ms, 100, 5000)?;
        check_range(
            "performance.earlyTerminationTopK",
            self.performance.early_termination_top_k,
            1,
            100,
        )?;
        Ok(())
    }

    /// Advisory warnings for extreme (but legal) weights.
    pub fn advisories(&self) -> Vec<String> {
        let mut warnings = Vec::new();
        if self.fusion.alpha == 0.0 {
            warnings.push("fusion.alpha is 0: lexical ranking is disabled".to_string());
        }
        if self.fusion.beta == 0.0 {
            warnings.push("fusion.beta is 0: vector ranking is disabled".to_string());
        }
        if self.fusion.alpha > 0.9 {
            warnings.push(format!(
                "fusion.alpha {} is extreme: results will be almost purely lexical",
                self.fusion.alpha
            ));
        }
        if self.fusion.beta > 0.9 {
            warnings.push(format!(
                "fusion.beta {} is extreme: results will be almost purely semantic",
                self.fusion.beta
            ));
        }
        warnings
    }

    /// Parse and validate a JSON config document.
    pub fn from_json(json: &str) -> Result<Self> {
        let config: RankingConfig = serde_json::from_str(json).map_err(|e| IndexErr::Config {
            field: "ranking-config.json".to_string(),
            cause: e.to_string(),
        })?;
        config.validate()?;
        Ok(config)
    }

    pub fn load(path: &Path) -> Result<Self> {
        let json = std::fs::read_to_string(path).map_err(|e| IndexErr::FileRead {
            path: path.to_path_buf(),
            cause: e.to_string(),
        })?;
        Self::from_json(&json)
    }
}

/// Shared, hot-reloading ranking configuration.
///
/// The watcher debounces change events; a failed reload keeps the previous
/// valid config and records the failure as a warning.
pub struct RankingConfigManager {
    current: Arc<RwLock<RankingConfig>>,
    warnings: Arc<RwLock<Vec<String>>>,
    path: PathBuf,
    _watcher: Option<notify::RecommendedWatcher>,
}

impl RankingConfigManager {
    /// Load the config file (falling back to defaults when absent) and
    /// start watching it for changes.
    pub fn start(path: &Path) -> Result<Self> {
        let initial = if path.exists() {
            match RankingConfig::load(path) {
                Ok(config) => config,
                Err(e) => {
                    tracing::warn!(path = %path.display(), error = %e, "invalid ranking config, using defaults");
                    RankingConfig::default()
                }
            }
        } else {
            RankingConfig::default()
        };

        let current = Arc::new(RwLock::new(initial));
        let warnings = Arc::new(RwLock::new(initial.advisories()));

        let watcher = Self::spawn_watcher(path, current.clone(), warnings.clone());

        Ok(Self {
            current,
            warnings,
            path: path.to_path_buf(),
            _watcher: watcher,
        })
    }

    /// Manager with a fixed config and no file watching (tests, embedding).
    pub fn fixed(config: RankingConfig) -> Self {
        Self {
            warnings: Arc::new(RwLock::new(config.advisories())),
            current: Arc::new(RwLock::new(config)),
            path: PathBuf::new(),
            _watcher: None,
        }
    }

    fn spawn_watcher(
        path: &Path,
        current: Arc<RwLock<RankingConfig>>,
        warnings: Arc<RwLock<Vec<String>>>,
    ) -> Option<notify::RecommendedWatcher> {
        let watch_dir = path.parent()?.to_path_buf();
        let config_path = path.to_path_buf();
        let (tx, rx) = std::sync::mpsc::channel::<()>();

        let mut watcher = notify::recommended_watcher(move |event: notify::Result<notify::Event>| {
            if let Ok(event) = event {
                if event.paths.iter().any(|p| p.ends_with("ranking-config.json")) {
                    let _ = tx.send(());
                }
            }
        })
        .ok()?;
        watcher.watch(&watch_dir, RecursiveMode::NonRecursive).ok()?;

        std::thread::spawn(move || {
            while rx.recv().is_ok() {
                // Debounce: absorb the burst of events an editor save emits.
                std::thread::sleep(RELOAD_DEBOUNCE);
                while rx.try_recv().is_ok() {}

                match RankingConfig::load(&config_path) {
                    Ok(config) => {
                        let advisories = config.advisories();
                        if let Ok(mut slot) = current.write() {
                            *slot = config;
                        }
                        if let Ok(mut w) = warnings.write() {
                            *w = advisories;
                        }
                        tracing::info!(path = %config_path.display(), "ranking config reloaded");
                    }
                    Err(e) => {
                        tracing::warn!(path = %config_path.display(), error = %e, "ranking config reload rejected, keeping previous");
                        if let Ok(mut w) = warnings.write() {
                            w.push(format!("config reload rejected: {e}"));
                        }
                    }
                }
            }
        });

        Some(watcher)
    }

    /// Snapshot of the current config.
    pub fn get(&self) -> RankingConfig {
        self.current.read().map(|c| *c).unwrap_or_default()
    }

    /// Pending warnings (advisories + reload failures).
    pub fn warnings(&self) -> Vec<String> {
        self.warnings.read().map(|w| w.clone()).unwrap_or_default()
    }

    /// Apply a new config programmatically, with the same keep-previous
    /// semantics as a file reload.
    pub fn apply(&self, config: RankingConfig) -> Result<()> {
        config.validate()?;
        if let Ok(mut slot) = self.current.write() {
            *slot = config;
        }
        if let Ok(mut w) = self.warnings.write() {
            *w = config.advisories();
        }
        Ok(())
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

/// Watcher configuration with strict ranges.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct WatcherConfig {
    /// 100..=10000 ms.
    pub debounce_delay_ms: u64,
    /// 1..=1000.
    pub batch_size: u32,
    /// 100..=100000.
    pub max_queue_size: u32,
    /// 50..=2000 MB.
    pub memory_threshold_mb: u32,
    /// 0..=10.
    pub retry_attempts: u32,
    /// 100..=60000 ms.
    pub retry_delay_ms: u64,
    pub follow_symlinks: bool,
    pub use_gitignore: bool,
    /// User patterns merged with the non-disableable defaults.
    pub ignore_patterns: Vec<String>,
}

impl Default for WatcherConfig {
    fn default() -> Self {
        Self {
            debounce_delay_ms: 500,
            batch_size: 100,
            max_queue_size: 10_000,
            memory_threshold_mb: 400,
            retry_attempts: 3,
            retry_delay_ms: 1000,
            follow_symlinks: false,
            use_gitignore: true,
            ignore_patterns: Vec::new(),
        }
    }
}

impl WatcherConfig {
    pub fn validate(&self) -> Result<()> {
        check_range("watcher.debounceDelay", self.debounce_delay_ms, 100, 10_000)?;
        check_range("watcher.batchSize", self.batch_size, 1, 1000)?;
        check_range("watcher.maxQueueSize", self.max_queue_size, 100, 100_000)?;
        check_range("watcher.memoryThreshold", self.memory_threshold_mb, 50, 2000)?;
        check_range("watcher.retryAttempts", self.retry_attempts, 0, 10)?;
        check_range("watcher.retryDelay", self.retry_delay_ms, 100, 60_000)?;
        Ok(())
    }
}
