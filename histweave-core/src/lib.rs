//! histweave core: historical market-data assembly for backtesting.
//!
//! This crate turns the data declarations of strategies and models into one
//! canonical, index-sorted dataset:
//! - Domain types (products, resolutions, declarations, requests)
//! - Feeds (Yahoo Finance, Bybit) behind the `Feed` trait and a registry
//! - Kwargs adaptation to the backtest mode
//! - Rate-limited fetching, canonicalization and assembly
//! - Event-driven preprocessing and Parquet output
//! - Consumers and the `FetchAndAttach` registration decorator

pub mod config;
pub mod consumer;
pub mod data;
pub mod domain;
pub mod engine;
pub mod error;

pub use config::{BacktestMode, ConfigError, Configuration, Layered, PipelineSettings};
pub use consumer::{Consumer, ConsumerKind, Signature};
pub use engine::BacktestEngine;
pub use error::PipelineError;

#[cfg(test)]
mod tests {
    use super::*;

    /// Compile-time check: shared pipeline types are Send + Sync.
    ///
    /// Feeds and tables are shared through `Arc`; if any of these stops
    /// being thread-safe the build breaks here first.
    #[allow(dead_code)]
    fn assert_send_sync() {
        fn require_send<T: Send>() {}
        fn require_sync<T: Sync>() {}

        // Domain types
        require_send::<domain::Product>();
        require_sync::<domain::Product>();
        require_send::<domain::Resolution>();
        require_sync::<domain::Resolution>();
        require_send::<domain::DataRequest>();
        require_sync::<domain::DataRequest>();
        require_send::<domain::DataDeclaration>();
        require_sync::<domain::DataDeclaration>();

        // Data types
        require_send::<data::CanonicalTable>();
        require_sync::<data::CanonicalTable>();
        require_send::<data::AssembledDataset>();
        require_sync::<data::AssembledDataset>();
        require_send::<data::FeedRegistry>();
        require_sync::<data::FeedRegistry>();
        require_send::<data::YahooFinanceFeed>();
        require_sync::<data::YahooFinanceFeed>();
        require_send::<data::BybitFeed>();
        require_sync::<data::BybitFeed>();

        // Config
        require_send::<config::PipelineSettings>();
        require_sync::<config::PipelineSettings>();

        // Errors
        require_send::<error::PipelineError>();
        require_sync::<error::PipelineError>();
    }
}
