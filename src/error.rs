//! Error taxonomy for ingestion, registry lookup and scoring.

use thiserror::Error;

/// A source could not be opened, resolved or connected to.
///
/// The core never retries; timeouts imposed by the HTTP client or database
/// driver surface here as well.
#[derive(Debug, Error)]
#[error("source unavailable: {location}: {reason}")]
pub struct SourceUnavailableError {
    pub location: String,
    pub reason: String,
}

impl SourceUnavailableError {
    pub fn new(location: impl Into<String>, reason: impl std::fmt::Display) -> Self {
        Self {
            location: location.into(),
            reason: reason.to_string(),
        }
    }
}

/// Why a single record could not become a canonical edge.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SchemaViolation {
    #[error("record has no geometry")]
    MissingGeometry,
    #[error("unsupported geometry type `{0}`")]
    UnsupportedGeometry(String),
    #[error("geometry has {0} coordinate(s), at least 2 are required")]
    TooFewCoordinates(usize),
    #[error("geometry contains a non-finite coordinate")]
    NonFiniteCoordinate,
    #[error("coordinates could not be reprojected: {0}")]
    Reprojection(String),
}

/// A record lacking usable geometry or required structure.
///
/// Raised per record; extraction drops the record and counts it in the
/// [`DropReport`](crate::adapters::DropReport) instead of aborting.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("record `{record}`: {violation}")]
pub struct SchemaError {
    pub record: String,
    pub violation: SchemaViolation,
}

/// The requested adapter name is not registered.
#[derive(Debug, Error)]
#[error("unknown adapter `{name}` (registered: {})", registered.join(", "))]
pub struct UnknownAdapterError {
    pub name: String,
    pub registered: Vec<String>,
}

/// Adapter configuration rejected at construction time, before any I/O.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConfigError {
    #[error("{adapter} adapter requires `{key}` in its configuration")]
    MissingKey { adapter: &'static str, key: &'static str },
    #[error("{adapter} adapter: invalid `{key}`: {reason}")]
    InvalidValue {
        adapter: &'static str,
        key: &'static str,
        reason: String,
    },
}

impl ConfigError {
    pub fn invalid(adapter: &'static str, key: &'static str, reason: impl Into<String>) -> Self {
        ConfigError::InvalidValue {
            adapter,
            key,
            reason: reason.into(),
        }
    }
}

/// Crate-level error returned by the exposed surface.
#[derive(Debug, Error)]
pub enum Error {
    #[error(transparent)]
    SourceUnavailable(#[from] SourceUnavailableError),
    #[error(transparent)]
    Schema(#[from] SchemaError),
    #[error(transparent)]
    UnknownAdapter(#[from] UnknownAdapterError),
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error("dropped {dropped} of {total} records, above the tolerated rate {tolerance}")]
    DropToleranceExceeded {
        dropped: usize,
        total: usize,
        tolerance: f64,
    },
    #[error("quality threshold {0} is outside [0, 1]")]
    InvalidThreshold(f64),
    #[error("malformed source data: {0}")]
    Malformed(String),
}

pub type Result<T, E = Error> = std::result::Result<T, E>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unknown_adapter_lists_registered_names() {
        let err = UnknownAdapterError {
            name: "kml".to_string(),
            registered: vec!["geojson".to_string(), "osm".to_string()],
        };
        assert_eq!(
            err.to_string(),
            "unknown adapter `kml` (registered: geojson, osm)"
        );
    }

    #[test]
    fn test_config_error_names_adapter_and_key() {
        let err = ConfigError::MissingKey {
            adapter: "postgis",
            key: "connection_string",
        };
        assert!(err.to_string().contains("postgis"));
        assert!(err.to_string().contains("connection_string"));
    }

    #[test]
    fn test_schema_error_identifies_record() {
        let err = SchemaError {
            record: "feature-7".to_string(),
            violation: SchemaViolation::MissingGeometry,
        };
        assert_eq!(err.to_string(), "record `feature-7`: record has no geometry");
    }
}
