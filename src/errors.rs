//! Typed error hierarchy for linewatch.
//!
//! Four enums cover the four places things go wrong:
//! - `FetchError`: HTTP refresh fetches against the production backend
//! - `WireError`: inbound realtime messages that fail validation
//! - `StoreError`: reconciliation store ownership violations
//! - `ConfigError`: loading and validating `linewatch.toml`
//!
//! Formatting never fails and has no error type.

use std::path::PathBuf;

use thiserror::Error;

/// Errors from a refresh fetch.
#[derive(Debug, Error)]
pub enum FetchError {
    #[error("Request to {url} failed: {source}")]
    Transport {
        url: String,
        #[source]
        source: reqwest::Error,
    },

    #[error("Backend returned HTTP {status} for {url}")]
    Status { status: u16, url: String },

    #[error("Failed to decode response from {url}: {source}")]
    Decode {
        url: String,
        #[source]
        source: serde_json::Error,
    },

    #[error("Backend reported failure: {0}")]
    Backend(String),

    #[error("Invalid backend URL '{0}'")]
    InvalidUrl(String),
}

/// Reasons an inbound update message is dropped as malformed.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum WireError {
    #[error("update message has no timestamp")]
    MissingTimestamp,

    #[error("update message carries neither a line code nor a factory")]
    MissingIdentity,

    #[error("test update messages are not displayed")]
    TestUpdate,

    #[error("nested record has neither a line code nor a numeric output")]
    InvalidRecord,

    #[error("undecodable frame: {0}")]
    Decode(String),
}

/// Errors from the reconciliation store.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum StoreError {
    #[error("a writer is already open for {identity}")]
    WriterAlreadyOpen { identity: String },

    #[error("partition for {identity} has been closed")]
    PartitionClosed { identity: String },
}

/// Errors loading or validating configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file at {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse config file at {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },

    #[error("Invalid value for {field}: {message}")]
    Invalid { field: String, message: String },

    #[error("Failed to serialize config: {0}")]
    Serialize(#[from] toml::ser::Error),
}
