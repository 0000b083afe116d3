//! Error types for the itinerary orchestrator

use thiserror::Error;

/// Result type alias for itinerary operations
pub type Result<T> = std::result::Result<T, ItineraryError>;

#[derive(Error, Debug)]
pub enum ItineraryError {

    // =============================
    // Request Errors
    // =============================

    #[error("Invalid trip request: {0}")]
    InvalidTripRequest(String),

    #[error("Invalid segment: {0}")]
    InvalidSegment(String),

    // =============================
    // Upstream Capability Errors
    // =============================

    #[error("Upstream timeout: {0}")]
    UpstreamTimeout(String),

    #[error("Malformed upstream response: {0}")]
    MalformedUpstreamResponse(String),

    #[error("Upstream error: {0}")]
    UpstreamError(String),

    // =============================
    // Pipeline Errors
    // =============================

    #[error("Resolution error: {0}")]
    ResolutionError(String),

    #[error("Verification error: {0}")]
    VerificationError(String),

    // =============================
    // Infrastructure Errors
    // =============================

    #[error("Cache error: {0}")]
    CacheError(String),

    #[error("Database error: {0}")]
    DatabaseError(String),

    #[error("Configuration error: {0}")]
    ConfigError(String),

    // =============================
    // External Library Conversions
    // =============================

    #[error("Serialization error: {0}")]
    SerializationError(#[from] serde_json::Error),

    #[error("HTTP client error: {0}")]
    HttpError(#[from] reqwest::Error),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),
}

impl ItineraryError {
    /// Errors from an external capability that route to the documented
    /// fallback path instead of reaching the caller.
    pub fn triggers_fallback(&self) -> bool {
        matches!(
            self,
            ItineraryError::UpstreamTimeout(_)
                | ItineraryError::MalformedUpstreamResponse(_)
                | ItineraryError::UpstreamError(_)
                | ItineraryError::SerializationError(_)
                | ItineraryError::HttpError(_)
        )
    }

    /// Stable machine-readable name, used in failure outcomes.
    pub fn kind(&self) -> &'static str {
        match self {
            ItineraryError::InvalidTripRequest(_) => "invalid_trip_request",
            ItineraryError::InvalidSegment(_) => "invalid_segment",
            ItineraryError::UpstreamTimeout(_) => "upstream_timeout",
            ItineraryError::MalformedUpstreamResponse(_) => "malformed_upstream_response",
            ItineraryError::UpstreamError(_) => "upstream_error",
            ItineraryError::ResolutionError(_) => "resolution_error",
            ItineraryError::VerificationError(_) => "verification_error",
            ItineraryError::CacheError(_) => "cache_error",
            ItineraryError::DatabaseError(_) => "database_error",
            ItineraryError::ConfigError(_) => "config_error",
            ItineraryError::SerializationError(_) => "serialization_error",
            ItineraryError::HttpError(_) => "http_error",
            ItineraryError::IoError(_) => "io_error",
        }
    }
}
