//! Feed trait and structured feed-side error types.
//!
//! The Feed trait abstracts over historical data sources (Yahoo Finance,
//! Bybit) so the pipeline can select one per request and tests can register
//! mocks. Feeds return tables in their own native schema; canonicalization
//! happens in the pipeline, not in the feed.

use crate::domain::{Resolution, TimeframeTable};
use chrono::{Duration, Months, NaiveDate};
use polars::prelude::{DataFrame, LazyFrame, PolarsError};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use thiserror::Error;

pub const YAHOO_FINANCE: &str = "YAHOO_FINANCE";
pub const BYBIT: &str = "BYBIT";

/// Structured error types for feed calls.
#[derive(Debug, Error)]
pub enum FeedError {
    #[error("network unreachable: {0}")]
    NetworkUnreachable(String),

    #[error("rate limited by provider (retry after {retry_after_secs}s)")]
    RateLimited { retry_after_secs: u64 },

    #[error("response format changed: {0}")]
    ResponseFormatChanged(String),

    #[error("symbol not found: {symbol}")]
    SymbolNotFound { symbol: String },

    #[error("{feed} does not serve resolution {resolution}")]
    UnsupportedResolution { feed: String, resolution: String },

    #[error("invalid fetch window: {0}")]
    InvalidWindow(String),

    #[error("table construction failed: {0}")]
    Table(#[from] PolarsError),

    #[error("feed error: {0}")]
    Other(String),
}

/// A feed's result for one request, in the feed's native schema.
pub enum RawTable {
    Eager(DataFrame),
    Lazy(LazyFrame),
    /// Provider payload that was never tabulated.
    Json(serde_json::Value),
}

impl RawTable {
    pub fn kind(&self) -> &'static str {
        match self {
            RawTable::Eager(_) => "eager",
            RawTable::Lazy(_) => "lazy",
            RawTable::Json(_) => "json",
        }
    }
}

impl From<DataFrame> for RawTable {
    fn from(df: DataFrame) -> Self {
        RawTable::Eager(df)
    }
}

impl From<LazyFrame> for RawTable {
    fn from(lf: LazyFrame) -> Self {
        RawTable::Lazy(lf)
    }
}

/// Which table form the engine prefers to receive.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TableForm {
    #[default]
    Eager,
    Lazy,
}

impl TableForm {
    pub fn wrap(&self, df: DataFrame) -> RawTable {
        match self {
            TableForm::Eager => RawTable::Eager(df),
            TableForm::Lazy => RawTable::Lazy(polars::prelude::IntoLazy::lazy(df)),
        }
    }
}

/// Parameters of one historical fetch.
#[derive(Debug, Clone)]
pub struct HistoricalQuery<'a> {
    pub rollback_period: &'a str,
    pub start_date: Option<NaiveDate>,
    pub end_date: Option<NaiveDate>,
    pub resolution: Resolution,
    pub table_form: TableForm,
    pub feed_kwargs: &'a BTreeMap<String, serde_json::Value>,
}

impl HistoricalQuery<'_> {
    /// Inclusive date range: explicit dates win, otherwise the window ends
    /// `today` and starts one rollback period earlier.
    pub fn date_range(&self, today: NaiveDate) -> Result<(NaiveDate, NaiveDate), FeedError> {
        let end = self.end_date.unwrap_or(today);
        let start = match self.start_date {
            Some(start) => start,
            None => rollback_start(end, self.rollback_period)?,
        };
        if start > end {
            return Err(FeedError::InvalidWindow(format!(
                "start date {start} is after end date {end}"
            )));
        }
        Ok((start, end))
    }
}

/// `end` minus a rollback period such as `3d`, `1w`, `6M` or `2y`.
pub fn rollback_start(end: NaiveDate, period: &str) -> Result<NaiveDate, FeedError> {
    let invalid = || FeedError::InvalidWindow(format!("invalid rollback period '{period}'"));
    let period = period.trim();
    let split = period.find(|c: char| !c.is_ascii_digit()).ok_or_else(invalid)?;
    let (digits, unit) = period.split_at(split);
    let n: u32 = digits.parse().map_err(|_| invalid())?;
    if n == 0 {
        return Err(invalid());
    }
    let start = match unit {
        "d" => end.checked_sub_signed(Duration::days(n as i64)),
        "w" => end.checked_sub_signed(Duration::weeks(n as i64)),
        "M" => end.checked_sub_months(Months::new(n)),
        "y" => end.checked_sub_months(Months::new(n.saturating_mul(12))),
        _ => None,
    };
    start.ok_or_else(invalid)
}

/// How a feed addresses products.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProductForm {
    /// Ticker symbol, e.g. `AAPL`.
    Symbol,
    /// Venue-native product code, e.g. `BTC_USDT_PERP`.
    Pdt,
}

/// Known per-feed quirks, keyed by feed name.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FeedProfile {
    pub product_form: ProductForm,
    /// Minutes past the hour at which the feed's hourly bars start.
    pub hourly_bar_offset_minutes: Option<i64>,
}

impl FeedProfile {
    pub fn for_feed(name: &str) -> Self {
        match name {
            // Yahoo hourly bars run 9:30-10:30, 10:30-11:30, ...
            YAHOO_FINANCE => Self {
                product_form: ProductForm::Symbol,
                hourly_bar_offset_minutes: Some(30),
            },
            _ => Self {
                product_form: ProductForm::Pdt,
                hourly_bar_offset_minutes: None,
            },
        }
    }
}

/// Trait for historical data feeds.
///
/// Calls are synchronous and blocking; any retry policy belongs to the feed.
pub trait Feed: Send + Sync {
    /// Uppercase registry identifier, e.g. `YAHOO_FINANCE`.
    fn name(&self) -> &str;

    /// Fetch one product at one resolution over the query's window.
    fn get_historical_data(
        &self,
        product_or_symbol: &str,
        query: &HistoricalQuery<'_>,
    ) -> Result<RawTable, FeedError>;

    /// Resolutions this feed serves, with their maximum lookback.
    fn supported_timeframes_and_periods(&self) -> Option<TimeframeTable> {
        None
    }
}
