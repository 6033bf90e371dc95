//! Error types for the code-intelligence engine.
//!
//! One crate-wide error enum with struct variants. Every fallible operation
//! returns [`Result`]; only broken internal invariants panic.

use std::path::PathBuf;

use thiserror::Error;

/// Crate-wide result alias.
pub type Result<T> = std::result::Result<T, IndexErr>;

/// JSON-RPC error code returned for a missing or wrong auth token.
pub const AUTH_ERROR_CODE: i32 = -32001;

/// Broad classification of an error, used by callers to decide whether to
/// retry, degrade, or surface the failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorClass {
    /// Bad configuration, malformed request, invalid hash or model id.
    Validation,
    /// Network, timeout, rate limit, locked file. Retry may succeed.
    Transient,
    /// File not found, permission denied, unsupported extension, schema
    /// mismatch. Retry will not help.
    Permanent,
    /// Partial results are still usable (recovered syntax errors, missing
    /// embedder, extreme ranking weights).
    Degraded,
}

/// Errors produced by the indexing and search core.
#[derive(Debug, Error)]
pub enum IndexErr {
    #[error("failed to read {path}: {cause}")]
    FileRead { path: PathBuf, cause: String },

    #[error("file not found: {path}")]
    FileNotFound { path: PathBuf },

    #[error("permission denied: {path}")]
    PermissionDenied { path: PathBuf },

    #[error("unsupported file extension: {extension}")]
    UnsupportedExtension { extension: String },

    #[error("parse failed for {path}: {cause}")]
    ParseFailed { path: PathBuf, cause: String },

    #[error("sqlite error on {path}: {cause}")]
    Sqlite { path: PathBuf, cause: String },

    #[error("sqlite operation failed ({operation}): {cause}")]
    SqliteOp { operation: String, cause: String },

    #[error("invalid configuration field {field}: {cause}")]
    Config { field: String, cause: String },

    #[error("validation failed ({rule}): {cause}")]
    Validation { rule: String, cause: String },

    #[error("invalid chunk hash {hash:?}: expected 64 lowercase hex chars")]
    InvalidChunkHash { hash: String },

    #[error("invalid model id {model_id:?}: {cause}")]
    InvalidModelId { model_id: String, cause: String },

    #[error("embedding adapter {adapter} failed: [{code}] {message}")]
    Embedding {
        adapter: String,
        code: EmbeddingErrorCode,
        message: String,
    },

    #[error("embedding fallback chain exhausted after {attempts} attempts: {original}")]
    FallbackExhausted { attempts: u32, original: String },

    #[error("hybrid index persistence failed for {path}: {cause}")]
    HybridIndex { path: PathBuf, cause: String },

    #[error("watcher error: {cause}")]
    Watcher { cause: String },

    #[error("query timed out after {elapsed_ms} ms (budget {timeout_ms} ms)")]
    Timeout { elapsed_ms: u64, timeout_ms: u64 },

    #[error("operation cancelled")]
    Cancelled,

    #[error("authentication failed")]
    AuthFailed,

    #[error("binary file refused: {path}")]
    BinaryFile { path: PathBuf },

    #[error("{0}")]
    Io(#[from] std::io::Error),
}

/// Error codes for the embedding adapter layer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EmbeddingErrorCode {
    InitFailed,
    NetworkError,
    Timeout,
    ValidationError,
    /// Carries the server-suggested delay before retrying, if any.
    RateLimit,
}

impl EmbeddingErrorCode {
    /// Wire/display name of the code.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::InitFailed => "ADAPTER_INIT_FAILED",
            Self::NetworkError => "ADAPTER_NETWORK_ERROR",
            Self::Timeout => "ADAPTER_TIMEOUT",
            Self::ValidationError => "ADAPTER_VALIDATION_ERROR",
            Self::RateLimit => "ADAPTER_RATE_LIMIT",
        }
    }

    /// Whether a failed call with this code may be retried.
    pub fn retryable(&self) -> bool {
        match self {
            Self::InitFailed | Self::ValidationError => false,
            Self::NetworkError | Self::Timeout | Self::RateLimit => true,
        }
    }
}

impl std::fmt::Display for EmbeddingErrorCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl IndexErr {
    /// Build a sqlite error with path context.
    pub fn sqlite(path: &std::path::Path, e: impl std::fmt::Display) -> Self {
        Self::Sqlite {
            path: path.to_path_buf(),
            cause: e.to_string(),
        }
    }

    /// Classify the error for propagation decisions.
    pub fn class(&self) -> ErrorClass {
        match self {
            Self::Config { .. }
            | Self::Validation { .. }
            | Self::InvalidChunkHash { .. }
            | Self::InvalidModelId { .. }
            | Self::AuthFailed => ErrorClass::Validation,

            Self::Sqlite { .. }
            | Self::SqliteOp { .. }
            | Self::Timeout { .. }
            | Self::Watcher { .. }
            | Self::Io(_) => ErrorClass::Transient,

            Self::FileRead { .. }
            | Self::FileNotFound { .. }
            | Self::PermissionDenied { .. }
            | Self::UnsupportedExtension { .. }
            | Self::BinaryFile { .. }
            | Self::Cancelled
            | Self::HybridIndex { .. } => ErrorClass::Permanent,

            Self::ParseFailed { .. } | Self::FallbackExhausted { .. } => ErrorClass::Degraded,

            Self::Embedding { code, .. } => {
                if code.retryable() {
                    ErrorClass::Transient
                } else {
                    ErrorClass::Permanent
                }
            }
        }
    }

    /// Whether the failed operation may be retried as-is.
    pub fn retryable(&self) -> bool {
        match self {
            Self::Cancelled => false,
            Self::Embedding { code, .. } => code.retryable(),
            other => other.class() == ErrorClass::Transient,
        }
    }
}

impl From<rusqlite::Error> for IndexErr {
    fn from(e: rusqlite::Error) -> Self {
        Self::SqliteOp {
            operation: "query".to_string(),
            cause: e.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_embedding_code_retryable() {
        assert!(EmbeddingErrorCode::NetworkError.retryable());
        assert!(EmbeddingErrorCode::Timeout.retryable());
        assert!(EmbeddingErrorCode::RateLimit.retryable());
        assert!(!EmbeddingErrorCode::InitFailed.retryable());
        assert!(!EmbeddingErrorCode::ValidationError.retryable());
    }

    #[test]
    fn test_classification() {
        let e = IndexErr::FileNotFound {
            path: PathBuf::from("missing.ts"),
        };
        assert_eq!(e.class(), ErrorClass::Permanent);
        assert!(!e.retryable());

        let e = IndexErr::Timeout {
            elapsed_ms: 900,
            timeout_ms: 500,
        };
        assert_eq!(e.class(), ErrorClass::Transient);
        assert!(e.retryable());

        let e = IndexErr::Config {
            field: "fusion.alpha".to_string(),
            cause: "out of range".to_string(),
        };
        assert_eq!(e.class(), ErrorClass::Validation);
    }

    #[test]
    fn test_cancellation_is_not_retryable() {
        assert!(!IndexErr::Cancelled.retryable());
    }
}
