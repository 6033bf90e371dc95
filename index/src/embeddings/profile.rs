//! Adapter profiles from environment variables.
//!
//! Each adapter reads `EMBED_<NAME>_*` variables. API keys are validated
//! for minimum length and always masked in logs and serialized output.

use std::collections::HashMap;

use serde::Serialize;

use crate::error::IndexErr;
use crate::error::Result;

/// Adapter backend kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum AdapterType {
    Onnx,
    Openai,
    Anthropic,
    Custom,
}

impl AdapterType {
    fn parse(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "onnx" => Some(Self::Onnx),
            "openai" => Some(Self::Openai),
            "anthropic" => Some(Self::Anthropic),
            "custom" => Some(Self::Custom),
            _ => None,
        }
    }
}

/// Minimum accepted API key length.
const MIN_API_KEY_LEN: usize = 20;

/// Parsed profile for one adapter.
#[derive(Debug, Clone, Serialize)]
pub struct AdapterProfile {
    pub name: String,
    pub adapter_type: AdapterType,
    pub model_path: Option<String>,
    /// ONNX inference threads, 1..=32.
    pub threads: Option<u32>,
    /// Memory budget, 100..=4096 MB.
    pub max_memory_mb: Option<u32>,
    pub use_gpu: bool,
    /// Masked on serialization; the raw key never leaves this struct
    /// except through [`AdapterProfile::raw_api_key`].
    #[serde(serialize_with = "serialize_masked")]
    pub api_key: Option<String>,
    pub endpoint: Option<String>,
    /// Requests per minute.
    pub rate_limit: Option<u32>,
    pub timeout_ms: Option<u64>,
}

fn serialize_masked<S: serde::Serializer>(
    key: &Option<String>,
    serializer: S,
) -> std::result::Result<S::Ok, S::Error> {
    match key {
        Some(k) => serializer.serialize_some(&mask_api_key(k)),
        None => serializer.serialize_none(),
    }
}

/// Mask an API key as `****` plus the last four characters.
pub fn mask_api_key(key: &str) -> String {
    let tail: String = key
        .chars()
        .rev()
        .take(4)
        .collect::<Vec<_>>()
        .into_iter()
        .rev()
        .collect();
    format!("****{tail}")
}

impl AdapterProfile {
    /// Read the profile for `<name>` from an environment map.
    ///
    /// The map is injected for testability; production callers pass
    /// `std::env::vars().collect()`.
    pub fn from_env_map(name: &str, env: &HashMap<String, String>) -> Result<Self> {
        let upper = name.to_uppercase();
        let var = |suffix: &str| env.get(&format!("EMBED_{upper}_{suffix}")).cloned();

        let type_raw = var("TYPE").ok_or_else(|| IndexErr::Config {
            field: format!("EMBED_{upper}_TYPE"),
            cause: "missing".to_string(),
        })?;
        let adapter_type = AdapterType::parse(&type_raw).ok_or_else(|| IndexErr::Config {
            field: format!("EMBED_{upper}_TYPE"),
            cause: format!("expected onnx|openai|anthropic|custom, got {type_raw:?}"),
        })?;

        let threads = var("THREADS")
            .map(|raw| parse_ranged(&raw, 1, 32, &format!("EMBED_{upper}_THREADS")))
            .transpose()?;
        let max_memory_mb = var("MAX_MEMORY_MB")
            .map(|raw| parse_ranged(&raw, 100, 4096, &format!("EMBED_{upper}_MAX_MEMORY_MB")))
            .transpose()?;

        let api_key = var("API_KEY");
        if let Some(key) = &api_key {
            if key.len() < MIN_API_KEY_LEN {
                return Err(IndexErr::Config {
                    field: format!("EMBED_{upper}_API_KEY"),
                    cause: format!("too short (< {MIN_API_KEY_LEN} chars)"),
                });
            }
        }

        let rate_limit = var("RATE_LIMIT")
            .map(|raw| parse_ranged(&raw, 1, 1_000_000, &format!("EMBED_{upper}_RATE_LIMIT")))
            .transpose()?;
        let timeout_ms = var("TIMEOUT_MS")
            .map(|raw| {
                raw.parse::<u64>().map_err(|_| IndexErr::Config {
                    field: format!("EMBED_{upper}_TIMEOUT_MS"),
                    cause: format!("not a number: {raw:?}"),
                })
            })
            .transpose()?;

        Ok(Self {
            name: name.to_string(),
            adapter_type,
            model_path: var("MODEL_PATH"),
            threads,
            max_memory_mb,
            use_gpu: var("USE_GPU")
                .map(|v| matches!(v.to_lowercase().as_str(), "1" | "true" | "yes"))
                .unwrap_or(false),
            api_key,
            endpoint: var("ENDPOINT"),
            rate_limit,
            timeout_ms,
        })
    }

    /// The unmasked key, for request signing only.
    pub fn raw_api_key(&self) -> Option<&str> {
        self.api_key.as_deref()
    }

    /// Display form with the key masked.
    pub fn masked_api_key(&self) -> Option<String> {
        self.api_key.as_deref().map(mask_api_key)
    }
}

fn parse_ranged(raw: &str, min: u32, max: u32, field: &str) -> Result<u32> {
    let value: u32 = raw.parse().map_err(|_| IndexErr::Config {
        field: field.to_string(),
        cause: format!("not a number: {raw:?}"),
    })?;
    if value < min || value > max {
        return Err(IndexErr::Config {
            field: field.to_string(),
            cause: format!("{value} outside [{min}, {max}]"),
        });
    }
    Ok(value)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn env(pairs: &[(&str, &str)]) -> HashMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn test_full_profile() {
        let env = env(&[
            ("EMBED_LOCAL_TYPE", "onnx"),
            ("EMBED_LOCAL_MODEL_PATH", "/models/mini.onnx"),
            ("EMBED_LOCAL_THREADS", "4"),
            ("EMBED_LOCAL_MAX_MEMORY_MB", "512"),
            ("EMBED_LOCAL_USE_GPU", "true"),
        ]);
        let profile = AdapterProfile::from_env_map("local", &env).unwrap();
        assert_eq!(profile.adapter_type, AdapterType::Onnx);
        assert_eq!(profile.threads, Some(4));
        assert_eq!(profile.max_memory_mb, Some(512));
        assert!(profile.use_gpu);
    }

    #[test]
    fn test_missing_type_fails() {
        let err = AdapterProfile::from_env_map("local", &env(&[])).unwrap_err();
        assert!(matches!(err, IndexErr::Config { .. }));
    }

    #[test]
    fn test_thread_range_enforced() {
        let bad = env(&[("EMBED_X_TYPE", "onnx"), ("EMBED_X_THREADS", "64")]);
        assert!(AdapterProfile::from_env_map("x", &bad).is_err());

        let bad = env(&[("EMBED_X_TYPE", "onnx"), ("EMBED_X_THREADS", "0")]);
        assert!(AdapterProfile::from_env_map("x", &bad).is_err());
    }

    #[test]
    fn test_short_api_key_rejected() {
        let bad = env(&[("EMBED_R_TYPE", "openai"), ("EMBED_R_API_KEY", "short")]);
        assert!(AdapterProfile::from_env_map("r", &bad).is_err());
    }

    #[test]
    fn test_api_key_masking() {
        let ok = env(&[
            ("EMBED_R_TYPE", "openai"),
            ("EMBED_R_API_KEY", "sk-abcdefghijklmnop1234"),
        ]);
        let profile = AdapterProfile::from_env_map("r", &ok).unwrap();
        assert_eq!(profile.masked_api_key().unwrap(), "****1234");

        // Serialized output carries the mask, never the raw key.
        let json = serde_json::to_string(&profile).unwrap();
        assert!(json.contains("****1234"));
        assert!(!json.contains("abcdefghijklmnop"));
    }
}
