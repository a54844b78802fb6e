//! Error types for sitescan-core operations.

use crate::types::LocationKey;

/// All errors that can occur in sitescan-core operations.
#[derive(Debug, thiserror::Error)]
pub enum SurveyError {
    // ─────────────────────────────────────────────────────────────────────
    // Session Errors
    // ─────────────────────────────────────────────────────────────────────
    #[error("Failed to flush series for location {location}: {details}")]
    Flush {
        location: LocationKey,
        details: String,
    },

    #[error("Failed to spawn session for location {location}: {source}")]
    SpawnFailed {
        location: LocationKey,
        #[source]
        source: std::io::Error,
    },

    // ─────────────────────────────────────────────────────────────────────
    // Configuration Errors
    // ─────────────────────────────────────────────────────────────────────
    #[error("Invalid scan configuration: {0}")]
    InvalidConfig(String),

    // ─────────────────────────────────────────────────────────────────────
    // Comparison Errors
    // ─────────────────────────────────────────────────────────────────────
    #[error("Comparison needs at least {required} locations, got {found}")]
    NotEnoughLocations { required: usize, found: usize },
}

/// Convenience type alias for Results using SurveyError.
pub type Result<T> = std::result::Result<T, SurveyError>;

impl From<SurveyError> for String {
    fn from(err: SurveyError) -> String {
        err.to_string()
    }
}
