//! Feed registry and data-source resolution.

use super::bybit::BybitFeed;
use super::provider::{Feed, FeedError};
use super::yahoo::YahooFinanceFeed;
use crate::domain::FetchWindow;
use crate::error::PipelineError;
use std::collections::BTreeMap;
use std::sync::Arc;

/// Supported feeds, keyed by uppercase identifier.
#[derive(Clone, Default)]
pub struct FeedRegistry {
    feeds: BTreeMap<String, Arc<dyn Feed>>,
}

impl FeedRegistry {
    /// Empty registry; feeds are added with [`FeedRegistry::register`].
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry with the built-in HTTP feeds (Yahoo Finance, Bybit).
    pub fn with_default_feeds() -> Result<Self, FeedError> {
        let mut registry = Self::new();
        registry.register(Arc::new(YahooFinanceFeed::new()?));
        registry.register(Arc::new(BybitFeed::new()?));
        Ok(registry)
    }

    /// Add or replace a feed under its uppercased name.
    pub fn register(&mut self, feed: Arc<dyn Feed>) {
        self.feeds.insert(feed.name().to_uppercase(), feed);
    }

    pub fn is_supported(&self, identifier: &str) -> bool {
        self.feeds.contains_key(&identifier.trim().to_uppercase())
    }

    pub fn identifiers(&self) -> Vec<&str> {
        self.feeds.keys().map(|k| k.as_str()).collect()
    }

    /// Look up a feed by identifier (case-insensitive).
    pub fn select_feed(&self, identifier: &str) -> Result<Arc<dyn Feed>, PipelineError> {
        let key = identifier.trim().to_uppercase();
        self.feeds
            .get(&key)
            .cloned()
            .ok_or_else(|| PipelineError::UnsupportedFeed {
                feed: key,
                supported: self.identifiers().join(", "),
            })
    }

    /// Decide which feed serves a request.
    ///
    /// An explicit `data_source` always wins. Without one, the trading venue is
    /// used only when it is itself a supported feed.
    pub fn resolve_data_source(
        &self,
        trading_venue: &str,
        window: &FetchWindow,
    ) -> Result<String, PipelineError> {
        let venue = trading_venue.trim().to_uppercase();
        let data_source = match &window.data_source {
            Some(source) => source.trim().to_uppercase(),
            None if self.feeds.contains_key(&venue) => venue,
            None => {
                return Err(PipelineError::configuration(format!(
                    "trading venue '{venue}' is not a data feed; \
                     declare backtest.data_source explicitly (supported: {})",
                    self.identifiers().join(", ")
                )))
            }
        };
        if !self.feeds.contains_key(&data_source) {
            return Err(PipelineError::UnsupportedFeed {
                feed: data_source,
                supported: self.identifiers().join(", "),
            });
        }
        Ok(data_source)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::provider::{HistoricalQuery, RawTable};

    struct NamedFeed(&'static str);

    impl Feed for NamedFeed {
        fn name(&self) -> &str {
            self.0
        }

        fn get_historical_data(
            &self,
            _product_or_symbol: &str,
            _query: &HistoricalQuery<'_>,
        ) -> Result<RawTable, FeedError> {
            Err(FeedError::Other("not used".into()))
        }
    }

    fn registry() -> FeedRegistry {
        let mut registry = FeedRegistry::new();
        registry.register(Arc::new(NamedFeed("YAHOO_FINANCE")));
        registry.register(Arc::new(NamedFeed("BYBIT")));
        registry
    }

    #[test]
    fn select_is_case_insensitive() {
        let feed = registry().select_feed("yahoo_finance").unwrap();
        assert_eq!(feed.name(), "YAHOO_FINANCE");
    }

    #[test]
    fn unknown_feed_is_rejected() {
        match registry().select_feed("polygon") {
            Err(PipelineError::UnsupportedFeed { feed, supported }) => {
                assert_eq!(feed, "POLYGON");
                assert!(supported.contains("BYBIT"));
            }
            Err(other) => panic!("expected UnsupportedFeed, got {other:?}"),
            Ok(_) => panic!("expected UnsupportedFeed"),
        }
    }

    #[test]
    fn venue_doubles_as_source_when_supported() {
        let source = registry()
            .resolve_data_source("bybit", &FetchWindow::default())
            .unwrap();
        assert_eq!(source, "BYBIT");
    }

    #[test]
    fn unsupported_venue_requires_explicit_source() {
        let err = registry()
            .resolve_data_source("IB", &FetchWindow::default())
            .unwrap_err();
        assert!(matches!(err, PipelineError::Configuration(msg) if msg.contains("data_source")));

        let source = registry()
            .resolve_data_source("IB", &FetchWindow::from_source("yahoo_finance"))
            .unwrap();
        assert_eq!(source, "YAHOO_FINANCE");
    }

    #[test]
    fn explicit_source_must_be_supported() {
        let err = registry()
            .resolve_data_source("BYBIT", &FetchWindow::from_source("polygon"))
            .unwrap_err();
        assert!(matches!(err, PipelineError::UnsupportedFeed { .. }));
    }
}
