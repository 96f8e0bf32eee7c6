//! Unified error handling for the metakind engine.
//!
//! Field-level validation problems never surface through this type; they
//! accumulate in an [`crate::errors::ErrorCollector`] instead. `MetakindError`
//! covers the cases that abort an operation outright: schema inconsistencies,
//! unknown property access, and infrastructure failures.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum MetakindError {
    /// A value could not be coerced to its declared property type.
    #[error("conversion error: {0}")]
    Conversion(String),

    #[error("validation failed: {0}")]
    Validation(String),

    /// Client-retryable write collision: a stale `key_version` or an
    /// identifier that is already taken.
    #[error("conflict: {0}")]
    Conflict(String),

    /// Schema inconsistency, raised while updating or assembling schema
    /// documents rather than while cleaning entity values.
    #[error("schema error: {0}")]
    Structural(String),

    #[error("not found: {0}")]
    NotFound(String),

    /// Access to a property the schema does not declare.
    #[error("unknown property: {0}")]
    UnknownProperty(String),

    /// The identity service could not be reached; callers should retry.
    #[error("identity service unavailable: {0}")]
    IdentityUnavailable(String),

    #[error("database error: {0}")]
    Database(#[from] sled::Error),

    #[error("serialization error: {0}")]
    Serde(#[from] serde_json::Error),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("configuration error: {0}")]
    Config(String),
}

pub type MetakindResult<T> = Result<T, MetakindError>;

impl From<crate::metadata::conversions::ConversionError> for MetakindError {
    fn from(error: crate::metadata::conversions::ConversionError) -> Self {
        MetakindError::Conversion(error.to_string())
    }
}
