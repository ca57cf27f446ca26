//! Data declarations and the requests they expand into.
//!
//! A consumer declares data once per product (`DataDeclaration`); the
//! declaration fans out into one `DataRequest` per resolution. Requests are
//! immutable once built and are shared between consumers through `Arc`.

use super::product::Product;
use super::resolution::{Resolution, ResolutionError};
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// Names owned by the fetch window. They never belong in the generic kwargs bag.
pub const RESERVED_BACKTEST_KWARGS: &[&str] =
    &["data_source", "rollback_period", "start_date", "end_date"];

/// Default lookback when neither dates nor an override are declared.
pub const DEFAULT_ROLLBACK_PERIOD: &str = "1w";

/// Resolution string → maximum lookback a feed serves at that resolution.
pub type TimeframeTable = BTreeMap<String, String>;

/// Automatic resampling policy for bar data.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct AutoResample {
    #[serde(default)]
    pub by_official_resolution: bool,
    #[serde(default)]
    pub by_highest_resolution: bool,
}

impl AutoResample {
    pub fn disabled() -> Self {
        Self {
            by_official_resolution: false,
            by_highest_resolution: false,
        }
    }
}

impl Default for AutoResample {
    fn default() -> Self {
        Self {
            by_official_resolution: true,
            by_highest_resolution: true,
        }
    }
}

/// Per-declaration parameters besides product identity.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DataKwargs {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resolution: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub resolutions: Vec<String>,
    /// resamplee → resampler, e.g. `{"5m": "1m"}`.
    #[serde(default)]
    pub resamples: BTreeMap<String, String>,
    /// resolution → bar start shift in minutes.
    #[serde(default)]
    pub shifts: BTreeMap<String, i64>,
    #[serde(default)]
    pub auto_resample: AutoResample,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub is_skip_first_bar: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub supported_timeframes_and_periods: Option<TimeframeTable>,
    /// Anything else the caller passed.
    #[serde(flatten)]
    pub extra: BTreeMap<String, serde_json::Value>,
}

impl DataKwargs {
    pub fn with_resolution(resolution: impl Into<String>) -> Self {
        Self {
            resolution: Some(resolution.into()),
            ..Default::default()
        }
    }

    pub fn with_resolutions<I, S>(resolutions: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            resolutions: resolutions.into_iter().map(Into::into).collect(),
            ..Default::default()
        }
    }

    pub fn has_resolution(&self) -> bool {
        self.resolution.is_some() || !self.resolutions.is_empty()
    }

    /// Declared resolutions in declaration order, duplicates removed.
    pub fn parsed_resolutions(&self) -> Result<Vec<Resolution>, ResolutionError> {
        let mut parsed: Vec<Resolution> = Vec::new();
        for raw in self.resolution.iter().chain(self.resolutions.iter()) {
            let resolution = Resolution::parse(raw)?;
            if !parsed.contains(&resolution) {
                parsed.push(resolution);
            }
        }
        Ok(parsed)
    }
}

/// Fetch window: where and how far back to fetch. Everything not named here
/// is passed through to the feed.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FetchWindow {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data_source: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rollback_period: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub start_date: Option<NaiveDate>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub end_date: Option<NaiveDate>,
    #[serde(flatten)]
    pub feed_kwargs: BTreeMap<String, serde_json::Value>,
}

impl FetchWindow {
    pub fn from_source(data_source: impl Into<String>) -> Self {
        Self {
            data_source: Some(data_source.into()),
            ..Default::default()
        }
    }
}

/// Train/validation/test periods recorded for model training.
///
/// Windowing the dataset by these periods is not part of assembly.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TrainPeriods {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub train_period: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub val_period: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub test_period: Option<String>,
}

/// One `add_data` call as the consumer wrote it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DataDeclaration {
    pub trading_venue: String,
    pub base_currency: String,
    pub quote_currency: String,
    pub product_type: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub exchange: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub symbol: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub backtest: Option<FetchWindow>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub train: Option<TrainPeriods>,
    #[serde(flatten)]
    pub kwargs: DataKwargs,
}

impl DataDeclaration {
    pub fn new(
        trading_venue: impl Into<String>,
        base_currency: impl Into<String>,
        quote_currency: impl Into<String>,
        product_type: impl Into<String>,
    ) -> Self {
        Self {
            trading_venue: trading_venue.into(),
            base_currency: base_currency.into(),
            quote_currency: quote_currency.into(),
            product_type: product_type.into(),
            exchange: None,
            symbol: None,
            backtest: None,
            train: None,
            kwargs: DataKwargs::default(),
        }
    }

    pub fn kwargs(mut self, kwargs: DataKwargs) -> Self {
        self.kwargs = kwargs;
        self
    }

    pub fn backtest(mut self, window: FetchWindow) -> Self {
        self.backtest = Some(window);
        self
    }

    pub fn train(mut self, periods: TrainPeriods) -> Self {
        self.train = Some(periods);
        self
    }

    pub fn product(&self) -> Product {
        let product = Product::new(
            &self.trading_venue,
            &self.base_currency,
            &self.quote_currency,
            &self.product_type,
            self.exchange.as_deref(),
        );
        match &self.symbol {
            Some(symbol) => product.with_symbol(symbol.clone()),
            None => product,
        }
    }
}

/// Identity of a request inside a table store.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct DataKey {
    pub trading_venue: String,
    pub product: String,
    pub resolution: String,
}

impl fmt::Display for DataKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {} {}", self.trading_venue, self.product, self.resolution)
    }
}

/// One venue/product/resolution combination to be fetched or derived.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DataRequest {
    pub trading_venue: String,
    pub product: Product,
    pub resolution: Resolution,
    /// Set when this bar series is resampled locally from a finer one.
    pub resampled_from: Option<Resolution>,
    pub shift_minutes: Option<i64>,
    pub skip_first_bar: bool,
    pub train: Option<TrainPeriods>,
}

impl DataRequest {
    pub fn new(trading_venue: &str, product: Product, resolution: Resolution) -> Self {
        Self {
            trading_venue: trading_venue.trim().to_uppercase(),
            product,
            resolution,
            resampled_from: None,
            shift_minutes: None,
            skip_first_bar: false,
            train: None,
        }
    }

    pub fn key(&self) -> DataKey {
        DataKey {
            trading_venue: self.trading_venue.clone(),
            product: self.product.canonical(),
            resolution: self.resolution.to_string(),
        }
    }

    pub fn is_time_based(&self) -> bool {
        self.resolution.is_bar()
    }

    pub fn is_resamplee(&self) -> bool {
        self.resampled_from.is_some()
    }
}

impl fmt::Display for DataRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} {} {}",
            self.trading_venue,
            self.product.canonical(),
            self.resolution
        )
    }
}
