//! Error types for the exporter.

use thiserror::Error;

use crate::client::ClientError;
use crate::mapping::Family;
use crate::registry::RegistryError;

/// Result type alias using [`ExporterError`].
pub type Result<T> = std::result::Result<T, ExporterError>;

/// Errors raised while talking to Kea.
#[derive(Debug, Error)]
pub enum ExporterError {
    /// The startup configuration could not be fetched.
    #[error("Failed to fetch {what}: {source}")]
    ConfigFetch {
        what: &'static str,
        #[source]
        source: ClientError,
    },

    /// The startup configuration lacks an expected field.
    #[error("Unexpected configuration: {0}")]
    ConfigShape(String),

    /// A module's statistics could not be fetched.
    #[error("Failed to fetch statistics for {module}: {source}")]
    StatisticsFetch {
        module: String,
        #[source]
        source: ClientError,
    },

    /// A module's statistics are not a JSON object.
    #[error("Unexpected statistics for {module}: expected an object")]
    StatisticsShape { module: String },
}

impl ExporterError {
    /// Create a configuration shape error.
    pub fn shape(msg: impl Into<String>) -> Self {
        Self::ConfigShape(msg.into())
    }
}

/// Reasons a single statistic is skipped during an update cycle.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum KeyError {
    #[error("No mapping for {family} statistic '{key}'")]
    Unmapped { family: Family, key: String },

    #[error("Malformed subnet index in '{0}'")]
    MalformedIndex(String),

    #[error("Statistic '{key}' maps to per-subnet metric {metric} but has no subnet index")]
    MissingIndex { key: String, metric: String },

    #[error("Statistic '{key}' has a subnet index but {metric} is not per-subnet")]
    UnexpectedIndex { key: String, metric: String },

    #[error("Per-subnet statistics are not yet supported for {family}: '{key}'")]
    SubnetUnsupported { family: Family, key: String },

    #[error("Statistic '{0}' has no numeric sample")]
    MalformedValue(String),

    #[error(transparent)]
    Registry(#[from] RegistryError),
}
