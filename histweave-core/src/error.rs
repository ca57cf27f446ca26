//! Pipeline error taxonomy.
//!
//! Every variant is fatal to the run: partial datasets are never handed to
//! the engine. Variants name the offending request where one exists.

use crate::config::ConfigError;
use crate::data::provider::FeedError;
use crate::domain::ResolutionError;
use polars::prelude::PolarsError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("configuration error: {0}")]
    Configuration(String),

    #[error("unsupported data feed '{feed}' (supported: {supported})")]
    UnsupportedFeed { feed: String, supported: String },

    #[error("unsupported table representation '{kind}' for {product}")]
    UnsupportedSchema { product: String, kind: String },

    #[error("data resolution(s) must be defined for {feed}")]
    MissingResolution { feed: String },

    #[error(transparent)]
    InvalidResolution(#[from] ResolutionError),

    #[error("fetch failed for {request}: {source}")]
    Fetch {
        request: String,
        #[source]
        source: FeedError,
    },

    #[error("schema mismatch for {request}: {reason}")]
    SchemaMismatch { request: String, reason: String },

    #[error("no data is found, make sure add_data(...) is called with backtest parameters")]
    EmptyDataset,

    #[error("table operation failed: {0}")]
    Table(#[from] PolarsError),

    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl PipelineError {
    pub fn configuration(msg: impl Into<String>) -> Self {
        PipelineError::Configuration(msg.into())
    }

    pub fn schema_mismatch(request: impl Into<String>, reason: impl Into<String>) -> Self {
        PipelineError::SchemaMismatch {
            request: request.into(),
            reason: reason.into(),
        }
    }
}
