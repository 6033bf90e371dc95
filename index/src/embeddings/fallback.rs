//! Embedding fallback chain.
//!
//! On an embedding failure the chain degrades one knob at a time:
//! batch size, device, model, quantization. Triggers in the error message
//! steer which knob moves first; the chain gives up after a fixed number
//! of attempts and surfaces the original error.

use serde::Deserialize;
use serde::Serialize;

use crate::error::IndexErr;
use crate::error::Result;

/// Attempts before the chain surfaces the original error.
pub const MAX_FALLBACK_ATTEMPTS: u32 = 10;

/// Smallest batch size `reduce_batch` can reach.
pub const MIN_BATCH_SIZE: u32 = 1;

/// Compute device for local embedding.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Device {
    Gpu,
    Cpu,
}

/// Model weight precision.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Quantization {
    Fp32,
    Fp16,
    Int8,
    Int4,
}

impl Quantization {
    /// Next step down; int4 is less stable than int8 so it falls back *up*
    /// to int8. Returns `None` when no further step exists.
    fn degraded(self) -> Option<Self> {
        match self {
            Self::Fp32 => Some(Self::Fp16),
            Self::Fp16 => Some(Self::Int8),
            Self::Int8 => None,
            Self::Int4 => Some(Self::Int8),
        }
    }
}

/// One degradation action.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FallbackAction {
    ReduceBatch,
    SwitchDevice,
    SwitchModel,
    SwitchQuantization,
}

/// A record of one applied action, kept for the config history file.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppliedFallback {
    pub action: FallbackAction,
    pub detail: String,
    /// Unix seconds.
    pub at: i64,
}

/// Mutable embedding runtime state the chain degrades.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EmbeddingState {
    pub batch_size: u32,
    pub device: Device,
    /// Index into the descending model list.
    pub model_index: usize,
    pub quantization: Quantization,
}

impl EmbeddingState {
    pub fn new(batch_size: u32, device: Device, quantization: Quantization) -> Self {
        Self {
            batch_size,
            device,
            model_index: 0,
            quantization,
        }
    }
}

/// The fallback chain over a descending list of progressively lighter
/// models.
#[derive(Debug, Clone)]
pub struct FallbackChain {
    state: EmbeddingState,
    /// Model ids ordered heaviest to lightest.
    models: Vec<String>,
    attempts: u32,
    history: Vec<AppliedFallback>,
    /// Set when a model switch changed output dimensionality; the dense
    /// vector cache for the old dimension must be invalidated.
    dimensions_invalidated: bool,
}

impl FallbackChain {
    pub fn new(state: EmbeddingState, models: Vec<String>) -> Self {
        Self {
            state,
            models,
            attempts: 0,
            history: Vec::new(),
            dimensions_invalidated: false,
        }
    }

    pub fn state(&self) -> &EmbeddingState {
        &self.state
    }

    pub fn history(&self) -> &[AppliedFallback] {
        &self.history
    }

    pub fn attempts(&self) -> u32 {
        self.attempts
    }

    /// Current model id, if the list is non-empty.
    pub fn current_model(&self) -> Option<&str> {
        self.models.get(self.state.model_index).map(|s| s.as_str())
    }

    /// Whether a model switch invalidated cached dense vectors; reading
    /// clears the flag.
    pub fn take_dimensions_invalidated(&mut self) -> bool {
        std::mem::take(&mut self.dimensions_invalidated)
    }

    /// React to an embedding failure: apply the first structurally
    /// possible action from the trigger-specific preference order.
    ///
    /// Returns the applied action, or `FallbackExhausted` carrying the
    /// original error once the attempt budget is spent or nothing can be
    /// degraded further.
    pub fn apply(&mut self, error_message: &str) -> Result<FallbackAction> {
        if self.attempts >= MAX_FALLBACK_ATTEMPTS {
            return Err(IndexErr::FallbackExhausted {
                attempts: self.attempts,
                original: error_message.to_string(),
            });
        }
        self.attempts += 1;

        for action in preference_order(error_message) {
            if let Some(detail) = self.try_apply(action) {
                tracing::warn!(
                    action = ?action,
                    detail = %detail,
                    attempt = self.attempts,
                    "embedding fallback applied"
                );
                self.history.push(AppliedFallback {
                    action,
                    detail,
                    at: chrono::Utc::now().timestamp(),
                });
                return Ok(action);
            }
        }

        Err(IndexErr::FallbackExhausted {
            attempts: self.attempts,
            original: error_message.to_string(),
        })
    }

    /// Apply an action if it is structurally possible; returns a detail
    /// string describing the transition.
    fn try_apply(&mut self, action: FallbackAction) -> Option<String> {
        match action {
            FallbackAction::ReduceBatch => {
                if self.state.batch_size <= MIN_BATCH_SIZE {
                    return None;
                }
                let old = self.state.batch_size;
                self.state.batch_size = (old / 2).max(MIN_BATCH_SIZE);
                Some(format!("batch {old} -> {}", self.state.batch_size))
            }
            FallbackAction::SwitchDevice => {
                if self.state.device != Device::Gpu {
                    return None;
                }
                self.state.device = Device::Cpu;
                // CPU inference pins quantization to int8.
                self.state.quantization = Quantization::Int8;
                Some("gpu -> cpu (int8)".to_string())
            }
            FallbackAction::SwitchModel => {
                if self.state.model_index + 1 >= self.models.len() {
                    return None;
                }
                let old = self.models[self.state.model_index].clone();
                self.state.model_index += 1;
                self.dimensions_invalidated = true;
                Some(format!(
                    "model {old} -> {}",
                    self.models[self.state.model_index]
                ))
            }
            FallbackAction::SwitchQuantization => {
                let next = self.state.quantization.degraded()?;
                let old = self.state.quantization;
                self.state.quantization = next;
                Some(format!("quantization {old:?} -> {next:?}"))
            }
        }
    }
}

/// Trigger-specific preference order over the four actions.
fn preference_order(error_message: &str) -> Vec<FallbackAction> {
    let lower = error_message.to_lowercase();
    let is_oom = lower.contains("out of memory") || lower.contains("oom");
    let is_gpu = ["cuda", "gpu", "metal", "mps"]
        .iter()
        .any(|kw| lower.contains(kw));
    let is_model_load = lower.contains("model load")
        || lower.contains("load model")
        || lower.contains("download");

    if is_oom {
        vec![
            FallbackAction::ReduceBatch,
            FallbackAction::SwitchDevice,
            FallbackAction::SwitchModel,
            FallbackAction::SwitchQuantization,
        ]
    } else if is_gpu {
        vec![
            FallbackAction::SwitchDevice,
            FallbackAction::ReduceBatch,
            FallbackAction::SwitchModel,
            FallbackAction::SwitchQuantization,
        ]
    } else if is_model_load {
        vec![
            FallbackAction::SwitchModel,
            FallbackAction::ReduceBatch,
            FallbackAction::SwitchDevice,
            FallbackAction::SwitchQuantization,
        ]
    } else {
        vec![
            FallbackAction::ReduceBatch,
            FallbackAction::SwitchQuantization,
            FallbackAction::SwitchDevice,
            FallbackAction::SwitchModel,
        ]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn gpu_chain(batch: u32) -> FallbackChain {
        FallbackChain::new(
            EmbeddingState::new(batch, Device::Gpu, Quantization::Fp16),
            vec!["large".to_string(), "base".to_string(), "mini".to_string()],
        )
    }

    #[test]
    fn test_oom_halves_batch_then_switches_device() {
        let mut chain = gpu_chain(64);

        assert_eq!(
            chain.apply("CUDA out of memory").unwrap(),
            FallbackAction::ReduceBatch
        );
        assert_eq!(chain.state().batch_size, 32);
        assert_eq!(chain.state().device, Device::Gpu);

        assert_eq!(
            chain.apply("CUDA out of memory").unwrap(),
            FallbackAction::ReduceBatch
        );
        assert_eq!(chain.state().batch_size, 16);

        // Drive the batch down to the floor.
        for _ in 0..4 {
            chain.apply("CUDA out of memory").unwrap();
        }
        assert_eq!(chain.state().batch_size, 1);

        // At the floor, the next OOM switches the device and pins int8.
        assert_eq!(
            chain.apply("CUDA out of memory").unwrap(),
            FallbackAction::SwitchDevice
        );
        assert_eq!(chain.state().device, Device::Cpu);
        assert_eq!(chain.state().quantization, Quantization::Int8);
    }

    #[test]
    fn test_gpu_error_prefers_device_switch() {
        let mut chain = gpu_chain(64);
        assert_eq!(
            chain.apply("Metal backend initialization failed").unwrap(),
            FallbackAction::SwitchDevice
        );
        assert_eq!(chain.state().device, Device::Cpu);
    }

    #[test]
    fn test_model_load_error_advances_model_list() {
        let mut chain = gpu_chain(8);
        assert_eq!(chain.current_model(), Some("large"));
        assert_eq!(
            chain.apply("model load failed: checksum mismatch").unwrap(),
            FallbackAction::SwitchModel
        );
        assert_eq!(chain.current_model(), Some("base"));
        assert!(chain.take_dimensions_invalidated());
        assert!(!chain.take_dimensions_invalidated(), "flag clears on read");
    }

    #[test]
    fn test_generic_error_reduces_batch_then_quantization() {
        let mut chain = FallbackChain::new(
            EmbeddingState::new(1, Device::Cpu, Quantization::Fp32),
            vec!["only".to_string()],
        );
        // Batch already at floor, device already CPU, single model: the
        // generic path degrades quantization.
        assert_eq!(
            chain.apply("unexpected inference failure").unwrap(),
            FallbackAction::SwitchQuantization
        );
        assert_eq!(chain.state().quantization, Quantization::Fp16);
        assert_eq!(
            chain.apply("unexpected inference failure").unwrap(),
            FallbackAction::SwitchQuantization
        );
        assert_eq!(chain.state().quantization, Quantization::Int8);
    }

    #[test]
    fn test_int4_falls_back_to_int8() {
        let mut chain = FallbackChain::new(
            EmbeddingState::new(1, Device::Cpu, Quantization::Int4),
            vec!["only".to_string()],
        );
        chain.apply("failure").unwrap();
        assert_eq!(chain.state().quantization, Quantization::Int8);
    }

    #[test]
    fn test_exhaustion_surfaces_original_error() {
        let mut chain = FallbackChain::new(
            EmbeddingState::new(1, Device::Cpu, Quantization::Int8),
            vec!["only".to_string()],
        );
        // Nothing is structurally possible anymore.
        let err = chain.apply("persistent failure").unwrap_err();
        assert!(matches!(err, IndexErr::FallbackExhausted { .. }));
        if let IndexErr::FallbackExhausted { original, .. } = err {
            assert_eq!(original, "persistent failure");
        }
    }

    #[test]
    fn test_attempt_budget() {
        let mut chain = gpu_chain(1 << 12);
        for _ in 0..MAX_FALLBACK_ATTEMPTS {
            chain.apply("some failure").unwrap();
        }
        let err = chain.apply("some failure").unwrap_err();
        assert!(matches!(
            err,
            IndexErr::FallbackExhausted {
                attempts: MAX_FALLBACK_ATTEMPTS,
                ..
            }
        ));
        assert_eq!(chain.history().len() as u32, MAX_FALLBACK_ATTEMPTS);
    }
}
