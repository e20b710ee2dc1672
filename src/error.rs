//! Error types for the analytics engine

use thiserror::Error;

use crate::accessor::Collection;

/// Failure raised by a record accessor while serving a query.
#[derive(Error, Debug)]
pub enum AccessError {
    /// Database error
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    /// A filter or projection named a field the collection does not have
    #[error("unknown field `{field}` for {collection}")]
    UnknownField {
        collection: Collection,
        field: String,
    },

    /// An `in` filter mixed value types
    #[error("`in` filter on `{field}` mixes value types")]
    MixedList { field: String },
}

/// Main error type for analytics computations
#[derive(Error, Debug)]
pub enum AnalyticsError {
    /// An underlying query failed; never substituted with a zero result
    #[error("could not load {collection} data: {source}")]
    Fetch {
        collection: Collection,
        #[source]
        source: AccessError,
    },

    /// A row did not have the expected shape
    #[error("malformed {collection} row: {source}")]
    Decode {
        collection: Collection,
        #[source]
        source: serde_json::Error,
    },

    /// Configuration error
    #[error("configuration error: {0}")]
    Config(String),
}

/// Result type alias for analytics computations
pub type Result<T> = std::result::Result<T, AnalyticsError>;
