//! Shared fixtures: a recording mock feed and engine builders.

#![allow(dead_code)]

use histweave_core::data::{
    BybitFeed, Feed, FeedError, FeedRegistry, HistoricalQuery, RawTable, TableForm,
    YahooFinanceFeed, BYBIT, YAHOO_FINANCE,
};
use histweave_core::domain::TimeframeTable;
use histweave_core::{BacktestEngine, BacktestMode, PipelineSettings};
use polars::prelude::*;
use std::collections::BTreeSet;
use std::sync::{Arc, Mutex};

pub const DAY_MS: i64 = 86_400_000;

#[derive(Debug, Clone, PartialEq)]
pub struct Call {
    pub product_or_symbol: String,
    pub resolution: String,
    pub rollback_period: String,
    pub table_form: TableForm,
}

/// Feed that records every call and answers with a small unsorted table.
///
/// Symbol-addressed feeds (by name) return a `symbol` column, others a
/// feed-native `product` column, like the real clients.
pub struct MockFeed {
    name: String,
    calls: Mutex<Vec<Call>>,
    extra_column_for: BTreeSet<String>,
    table: Option<TimeframeTable>,
}

impl MockFeed {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            calls: Mutex::new(Vec::new()),
            extra_column_for: BTreeSet::new(),
            table: None,
        }
    }

    /// Add a `turnover` column to results at `resolution`.
    pub fn with_extra_column_for(mut self, resolution: &str) -> Self {
        self.extra_column_for.insert(resolution.to_string());
        self
    }

    pub fn with_supported_table(mut self, table: TimeframeTable) -> Self {
        self.table = Some(table);
        self
    }

    pub fn calls(&self) -> Vec<Call> {
        self.calls.lock().unwrap().clone()
    }
}

impl Feed for MockFeed {
    fn name(&self) -> &str {
        &self.name
    }

    fn get_historical_data(
        &self,
        product_or_symbol: &str,
        query: &HistoricalQuery<'_>,
    ) -> Result<RawTable, FeedError> {
        let resolution = query.resolution.to_string();
        self.calls.lock().unwrap().push(Call {
            product_or_symbol: product_or_symbol.to_string(),
            resolution: resolution.clone(),
            rollback_period: query.rollback_period.to_string(),
            table_form: query.table_form,
        });

        let ts = Column::new("ts".into(), vec![3 * DAY_MS, DAY_MS, 2 * DAY_MS])
            .cast(&DataType::Datetime(TimeUnit::Milliseconds, None))?;
        let identity = if self.name == "YAHOO_FINANCE" { "symbol" } else { "product" };
        let mut columns = vec![
            ts,
            Column::new(identity.into(), vec![product_or_symbol; 3]),
            Column::new("resolution".into(), vec![resolution.as_str(); 3]),
            Column::new("close".into(), vec![3.0, 1.0, 2.0]),
        ];
        if self.extra_column_for.contains(&resolution) {
            columns.push(Column::new("turnover".into(), vec![0.0; 3]));
        }
        Ok(query.table_form.wrap(DataFrame::new(columns)?))
    }

    fn supported_timeframes_and_periods(&self) -> Option<TimeframeTable> {
        self.table.clone()
    }
}

/// Feed that answers every call with a saved API body, parsed by the real
/// client for its name. Tables therefore carry the client's native layout.
pub struct NativeFeed {
    name: &'static str,
    body: &'static str,
}

impl NativeFeed {
    pub fn yahoo(body: &'static str) -> Self {
        Self {
            name: YAHOO_FINANCE,
            body,
        }
    }

    pub fn bybit(body: &'static str) -> Self {
        Self { name: BYBIT, body }
    }
}

impl Feed for NativeFeed {
    fn name(&self) -> &str {
        self.name
    }

    fn get_historical_data(
        &self,
        product_or_symbol: &str,
        query: &HistoricalQuery<'_>,
    ) -> Result<RawTable, FeedError> {
        let df = if self.name == YAHOO_FINANCE {
            YahooFinanceFeed::frame_from_chart_json(product_or_symbol, &query.resolution, self.body)?
        } else {
            BybitFeed::frame_from_kline_json(product_or_symbol, &query.resolution, self.body)?
        };
        Ok(query.table_form.wrap(df))
    }
}

/// Settings with no rate limits, so tests do not sleep.
pub fn fast_settings(mode: BacktestMode) -> PipelineSettings {
    let mut settings = PipelineSettings::default();
    settings.mode = mode;
    settings.rate_limits.clear();
    settings
}

pub fn engine_with(feeds: &[Arc<MockFeed>], settings: PipelineSettings) -> BacktestEngine {
    let mut registry = FeedRegistry::new();
    for feed in feeds {
        registry.register(Arc::clone(feed) as Arc<dyn Feed>);
    }
    BacktestEngine::new(settings, registry).unwrap()
}

pub fn engine_with_feeds(feeds: Vec<Arc<dyn Feed>>, settings: PipelineSettings) -> BacktestEngine {
    let mut registry = FeedRegistry::new();
    for feed in feeds {
        registry.register(feed);
    }
    BacktestEngine::new(settings, registry).unwrap()
}
