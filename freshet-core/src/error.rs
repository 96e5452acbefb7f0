//! Error types for FRESHET operations

use thiserror::Error;
use uuid::Uuid;

/// Storage layer errors.
///
/// The only error kind that is surfaced to readers as a hard failure;
/// everything on the refresh path degrades to serving best-known data.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum StorageError {
    #[error("Read failed for {key}: {reason}")]
    ReadFailed { key: String, reason: String },

    #[error("Write failed for {key}: {reason}")]
    WriteFailed { key: String, reason: String },

    #[error("Refresh attempt not found: {attempt_id}")]
    AttemptNotFound { attempt_id: Uuid },

    #[error("Backend error: {reason}")]
    Backend { reason: String },

    #[error("Codec error: {reason}")]
    Codec { reason: String },
}

/// Upstream fetch provider errors.
///
/// Recorded in the refresh ledger as a failed attempt; never propagated to
/// the reader as a hard failure.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum FetchError {
    #[error("Upstream fetch failed for {key}: {reason}")]
    Upstream { key: String, reason: String },

    #[error("Fetch timed out for {key} after {timeout_ms}ms")]
    Timeout { key: String, timeout_ms: u64 },

    #[error("Fetch cancelled for {key}: {reason}")]
    Cancelled { key: String, reason: String },
}

/// Validation errors for keys, partitions, and status strings.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ValidationError {
    #[error("Entity identifier is empty")]
    EmptyEntity,

    #[error("Entity identifier contains invalid character: {character:?}")]
    InvalidEntityCharacter { character: char },

    #[error("Unknown data domain: {token}")]
    UnknownDomain { token: String },

    #[error("Unknown period: {token}")]
    UnknownPeriod { token: String },

    #[error("Unknown refresh status: {token}")]
    UnknownStatus { token: String },
}

/// Configuration errors.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("Invalid value for {field}: {value} - {reason}")]
    InvalidValue {
        field: String,
        value: String,
        reason: String,
    },
}

/// Master error type for all FRESHET errors.
#[derive(Debug, Clone, Error)]
pub enum FreshetError {
    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("Fetch error: {0}")]
    Fetch(#[from] FetchError),

    #[error("Validation error: {0}")]
    Validation(#[from] ValidationError),

    #[error("Config error: {0}")]
    Config(#[from] ConfigError),
}

/// Result type alias for FRESHET operations.
pub type FreshetResult<T> = Result<T, FreshetError>;

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_storage_error_display_read_failed() {
        let err = StorageError::ReadFailed {
            key: "insider_filings:AAPL".to_string(),
            reason: "backend unreachable".to_string(),
        };
        let msg = format!("{}", err);
        assert!(msg.contains("Read failed"));
        assert!(msg.contains("insider_filings:AAPL"));
        assert!(msg.contains("backend unreachable"));
    }

    #[test]
    fn test_fetch_error_display_timeout() {
        let err = FetchError::Timeout {
            key: "ipo_calendar:US".to_string(),
            timeout_ms: 30_000,
        };
        let msg = format!("{}", err);
        assert!(msg.contains("timed out"));
        assert!(msg.contains("30000"));
    }

    #[test]
    fn test_validation_error_display_invalid_character() {
        let err = ValidationError::InvalidEntityCharacter { character: ':' };
        let msg = format!("{}", err);
        assert!(msg.contains("invalid character"));
    }

    #[test]
    fn test_config_error_display_invalid_value() {
        let err = ConfigError::InvalidValue {
            field: "reclaim_after".to_string(),
            value: "0s".to_string(),
            reason: "must be at least the fetch timeout".to_string(),
        };
        let msg = format!("{}", err);
        assert!(msg.contains("reclaim_after"));
        assert!(msg.contains("0s"));
        assert!(msg.contains("fetch timeout"));
    }

    #[test]
    fn test_freshet_error_from_variants() {
        let storage = FreshetError::from(StorageError::Backend {
            reason: "lost connection".to_string(),
        });
        assert!(matches!(storage, FreshetError::Storage(_)));

        let fetch = FreshetError::from(FetchError::Upstream {
            key: "k".to_string(),
            reason: "503".to_string(),
        });
        assert!(matches!(fetch, FreshetError::Fetch(_)));

        let validation = FreshetError::from(ValidationError::EmptyEntity);
        assert!(matches!(validation, FreshetError::Validation(_)));

        let config = FreshetError::from(ConfigError::InvalidValue {
            field: "f".to_string(),
            value: "v".to_string(),
            reason: "r".to_string(),
        });
        assert!(matches!(config, FreshetError::Config(_)));
    }
}
