//! Error types for the ground-game library.
//!
//! Every failure the core can surface is a variant of [`GroundGameError`].
//! Transport layers turn these into user-visible responses through
//! [`GroundGameError::report`], which carries a stable identifier and an
//! HTTP-style status.

use serde::Serialize;
use thiserror::Error;

/// A single field-level validation failure.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FieldError {
    /// Name of the offending field
    pub field: String,
    /// Human readable reason
    pub message: String,
}

impl FieldError {
    pub fn new(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            message: message.into(),
        }
    }
}

/// Errors that can occur while ingesting visits and aggregating scores.
#[derive(Error, Debug)]
pub enum GroundGameError {
    /// A referenced record does not exist
    #[error("{kind} not found: {id}")]
    RecordNotFound { kind: &'static str, id: String },

    /// The geocoder returned no result, failed or timed out
    #[error("Geocoder unavailable: {0}")]
    GeocodeUnavailable(String),

    /// An entity invariant was violated
    #[error("Validation failed for {entity}: {}", format_fields(.errors))]
    ValidationFailed {
        entity: &'static str,
        errors: Vec<FieldError>,
    },

    /// Another writer changed the address between read and commit
    #[error("Concurrent update on address {address_id}")]
    ConcurrentAddressConflict { address_id: String },

    /// Database-related errors
    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    /// Connection pool errors
    #[error("Connection pool error: {0}")]
    Pool(#[from] r2d2::Error),

    /// Serialization/deserialization errors
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// File I/O errors
    #[error("File I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Invalid configuration
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// Task queue errors
    #[error("Task queue error: {0}")]
    Queue(String),

    /// General error with context
    #[error("{0}")]
    Other(String),
}

/// Convenience type alias for Result with GroundGameError
pub type Result<T> = std::result::Result<T, GroundGameError>;

fn format_fields(errors: &[FieldError]) -> String {
    errors
        .iter()
        .map(|e| format!("{} {}", e.field, e.message))
        .collect::<Vec<_>>()
        .join(", ")
}

impl GroundGameError {
    pub fn not_found(kind: &'static str, id: impl ToString) -> Self {
        Self::RecordNotFound {
            kind,
            id: id.to_string(),
        }
    }

    pub fn invalid(entity: &'static str, field: &str, message: &str) -> Self {
        Self::ValidationFailed {
            entity,
            errors: vec![FieldError::new(field, message)],
        }
    }

    /// Stable identifier surfaced to API clients.
    #[must_use]
    pub const fn error_id(&self) -> &'static str {
        match self {
            Self::RecordNotFound { .. } => "RECORD_NOT_FOUND",
            Self::GeocodeUnavailable(_) => "GEOCODE_UNAVAILABLE",
            Self::ValidationFailed { .. } => "VALIDATION_FAILED",
            Self::ConcurrentAddressConflict { .. } => "CONCURRENT_UPDATE",
            _ => "INTERNAL_ERROR",
        }
    }

    /// HTTP-style status for the error.
    #[must_use]
    pub const fn status(&self) -> u16 {
        match self {
            Self::RecordNotFound { .. } => 404,
            Self::GeocodeUnavailable(_) => 503,
            Self::ValidationFailed { .. } => 422,
            Self::ConcurrentAddressConflict { .. } => 409,
            _ => 500,
        }
    }

    /// Whether retrying the same operation may succeed.
    #[must_use]
    pub const fn is_transient(&self) -> bool {
        matches!(
            self,
            Self::ConcurrentAddressConflict { .. } | Self::GeocodeUnavailable(_) | Self::Pool(_)
        )
    }

    #[must_use]
    pub fn report(&self) -> ErrorReport {
        let fields = match self {
            Self::ValidationFailed { errors, .. } => errors.clone(),
            _ => Vec::new(),
        };
        ErrorReport {
            id: self.error_id(),
            status: self.status(),
            title: self.to_string(),
            fields,
        }
    }
}

/// Structured error body handed to the transport layer.
#[derive(Debug, Clone, Serialize)]
pub struct ErrorReport {
    pub id: &'static str,
    pub status: u16,
    pub title: String,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub fields: Vec<FieldError>,
}

impl From<anyhow::Error> for GroundGameError {
    fn from(err: anyhow::Error) -> Self {
        GroundGameError::Other(err.to_string())
    }
}
