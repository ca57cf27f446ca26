//! Yahoo Finance feed.
//!
//! Fetches OHLCV bars from Yahoo's v8 chart API and returns them in Yahoo's
//! native layout: `ts, symbol, resolution, open, high, low, close, volume,
//! turnover`. Yahoo reports no turnover, so that column is all null; it keeps
//! the layout stackable with the Bybit feed's.
//! Hourly bars start at the half hour (9:30, 10:30, ...).
//!
//! Yahoo Finance has no official API and is subject to unannounced format
//! changes; response parsing is kept separate from HTTP so it can be tested
//! offline.

use super::provider::{Feed, FeedError, HistoricalQuery, RawTable, YAHOO_FINANCE};
use crate::domain::{Resolution, Timeframe, TimeframeTable};
use chrono::NaiveDate;
use polars::prelude::*;
use serde::Deserialize;
use std::time::Duration;

#[derive(Debug, Deserialize)]
struct ChartResponse {
    chart: ChartResult,
}

#[derive(Debug, Deserialize)]
struct ChartResult {
    result: Option<Vec<ChartData>>,
    error: Option<ChartError>,
}

#[derive(Debug, Deserialize)]
struct ChartError {
    code: String,
    description: String,
}

#[derive(Debug, Deserialize)]
struct ChartData {
    timestamp: Option<Vec<i64>>,
    indicators: Indicators,
}

#[derive(Debug, Deserialize)]
struct Indicators {
    quote: Vec<QuoteData>,
}

#[derive(Debug, Deserialize)]
struct QuoteData {
    open: Vec<Option<f64>>,
    high: Vec<Option<f64>>,
    low: Vec<Option<f64>>,
    close: Vec<Option<f64>>,
    volume: Vec<Option<f64>>,
}

/// Yahoo Finance historical feed.
pub struct YahooFinanceFeed {
    client: reqwest::blocking::Client,
    max_retries: u32,
    base_delay: Duration,
}

impl YahooFinanceFeed {
    pub fn new() -> Result<Self, FeedError> {
        let client = reqwest::blocking::Client::builder()
            .timeout(Duration::from_secs(30))
            .user_agent("Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36")
            .build()
            .map_err(|e| FeedError::Other(format!("failed to build HTTP client: {e}")))?;

        Ok(Self {
            client,
            max_retries: 3,
            base_delay: Duration::from_millis(500),
        })
    }

    /// Chart API interval for a resolution, if Yahoo serves it.
    pub fn interval(resolution: &Resolution) -> Option<&'static str> {
        match (resolution.timeframe(), resolution.period()) {
            (Timeframe::Minute, 1) => Some("1m"),
            (Timeframe::Minute, 2) => Some("2m"),
            (Timeframe::Minute, 5) => Some("5m"),
            (Timeframe::Minute, 15) => Some("15m"),
            (Timeframe::Minute, 30) => Some("30m"),
            (Timeframe::Minute, 60) | (Timeframe::Hour, 1) => Some("1h"),
            (Timeframe::Minute, 90) => Some("90m"),
            (Timeframe::Day, 1) => Some("1d"),
            (Timeframe::Day, 5) => Some("5d"),
            (Timeframe::Week, 1) => Some("1wk"),
            (Timeframe::Month, 1) => Some("1mo"),
            (Timeframe::Month, 3) => Some("3mo"),
            _ => None,
        }
    }

    fn chart_url(
        symbol: &str,
        start: NaiveDate,
        end: NaiveDate,
        interval: &str,
        prepost: bool,
    ) -> Result<String, FeedError> {
        let start_ts = start
            .and_hms_opt(0, 0, 0)
            .ok_or_else(|| FeedError::InvalidWindow(format!("bad start date {start}")))?
            .and_utc()
            .timestamp();
        let end_ts = end
            .and_hms_opt(23, 59, 59)
            .ok_or_else(|| FeedError::InvalidWindow(format!("bad end date {end}")))?
            .and_utc()
            .timestamp();
        Ok(format!(
            "https://query2.finance.yahoo.com/v8/finance/chart/{symbol}\
             ?period1={start_ts}&period2={end_ts}&interval={interval}\
             &includePrePost={prepost}"
        ))
    }

    /// Parse a chart API body into Yahoo's native table.
    fn parse_response(
        symbol: &str,
        resolution: &Resolution,
        resp: ChartResponse,
    ) -> Result<DataFrame, FeedError> {
        let result = resp.chart.result.ok_or_else(|| {
            if let Some(err) = resp.chart.error {
                if err.code == "Not Found" {
                    FeedError::SymbolNotFound {
                        symbol: symbol.to_string(),
                    }
                } else {
                    FeedError::ResponseFormatChanged(format!("{}: {}", err.code, err.description))
                }
            } else {
                FeedError::ResponseFormatChanged("empty result with no error".into())
            }
        })?;

        let data = result
            .into_iter()
            .next()
            .ok_or_else(|| FeedError::ResponseFormatChanged("result array is empty".into()))?;

        let timestamps = data
            .timestamp
            .ok_or_else(|| FeedError::ResponseFormatChanged("no timestamps".into()))?;

        let quote = data
            .indicators
            .quote
            .into_iter()
            .next()
            .ok_or_else(|| FeedError::ResponseFormatChanged("no quote data".into()))?;

        let n = timestamps.len();
        let mut ts = Vec::with_capacity(n);
        let mut opens = Vec::with_capacity(n);
        let mut highs = Vec::with_capacity(n);
        let mut lows = Vec::with_capacity(n);
        let mut closes = Vec::with_capacity(n);
        let mut volumes = Vec::with_capacity(n);

        for (i, &secs) in timestamps.iter().enumerate() {
            let open = quote.open.get(i).copied().flatten();
            let high = quote.high.get(i).copied().flatten();
            let low = quote.low.get(i).copied().flatten();
            let close = quote.close.get(i).copied().flatten();
            let volume = quote.volume.get(i).copied().flatten();

            // Rows with no prices at all are holidays or halted sessions
            if open.is_none() && high.is_none() && low.is_none() && close.is_none() {
                continue;
            }

            ts.push(secs * 1_000);
            opens.push(open.unwrap_or(f64::NAN));
            highs.push(high.unwrap_or(f64::NAN));
            lows.push(low.unwrap_or(f64::NAN));
            closes.push(close.unwrap_or(f64::NAN));
            volumes.push(volume.unwrap_or(0.0));
        }

        if ts.is_empty() {
            return Err(FeedError::SymbolNotFound {
                symbol: symbol.to_string(),
            });
        }

        let rows = ts.len();
        let df = DataFrame::new(vec![
            Column::new("ts".into(), ts)
                .cast(&DataType::Datetime(TimeUnit::Milliseconds, None))?,
            Column::new("symbol".into(), vec![symbol.to_string(); rows]),
            Column::new("resolution".into(), vec![resolution.to_string(); rows]),
            Column::new("open".into(), opens),
            Column::new("high".into(), highs),
            Column::new("low".into(), lows),
            Column::new("close".into(), closes),
            Column::new("volume".into(), volumes),
            Column::new("turnover".into(), vec![None::<f64>; rows]),
        ])?;
        Ok(df)
    }

    /// Parse a raw chart API body, e.g. one saved to disk.
    pub fn frame_from_chart_json(
        symbol: &str,
        resolution: &Resolution,
        body: &str,
    ) -> Result<DataFrame, FeedError> {
        let resp: ChartResponse = serde_json::from_str(body).map_err(|e| {
            FeedError::ResponseFormatChanged(format!("failed to parse chart body for {symbol}: {e}"))
        })?;
        Self::parse_response(symbol, resolution, resp)
    }

    /// Execute the chart request with exponential-backoff retry.
    fn fetch_with_retry(&self, symbol: &str, url: &str) -> Result<ChartResponse, FeedError> {
        let mut last_error = None;

        for attempt in 0..=self.max_retries {
            if attempt > 0 {
                let delay = self.base_delay * 2u32.pow(attempt - 1);
                tracing::warn!(symbol, attempt, ?delay, "retrying Yahoo Finance request");
                std::thread::sleep(delay);
            }

            match self.client.get(url).send() {
                Ok(resp) => {
                    let status = resp.status();

                    if status == reqwest::StatusCode::TOO_MANY_REQUESTS {
                        let retry_after = resp
                            .headers()
                            .get("retry-after")
                            .and_then(|v| v.to_str().ok())
                            .and_then(|v| v.parse::<u64>().ok())
                            .unwrap_or(60);
                        last_error = Some(FeedError::RateLimited {
                            retry_after_secs: retry_after,
                        });
                        continue;
                    }

                    if status == reqwest::StatusCode::NOT_FOUND {
                        return Err(FeedError::SymbolNotFound {
                            symbol: symbol.to_string(),
                        });
                    }

                    if !status.is_success() {
                        last_error = Some(FeedError::Other(format!("HTTP {status} for {symbol}")));
                        continue;
                    }

                    return resp.json().map_err(|e| {
                        FeedError::ResponseFormatChanged(format!(
                            "failed to parse response for {symbol}: {e}"
                        ))
                    });
                }
                Err(e) => {
                    if e.is_connect() || e.is_timeout() {
                        last_error = Some(FeedError::NetworkUnreachable(e.to_string()));
                        continue;
                    }
                    return Err(FeedError::NetworkUnreachable(e.to_string()));
                }
            }
        }

        Err(last_error.unwrap_or_else(|| FeedError::Other("max retries exceeded".into())))
    }
}

impl Feed for YahooFinanceFeed {
    fn name(&self) -> &str {
        YAHOO_FINANCE
    }

    fn get_historical_data(
        &self,
        symbol: &str,
        query: &HistoricalQuery<'_>,
    ) -> Result<RawTable, FeedError> {
        let interval =
            Self::interval(&query.resolution).ok_or_else(|| FeedError::UnsupportedResolution {
                feed: YAHOO_FINANCE.to_string(),
                resolution: query.resolution.to_string(),
            })?;
        let (start, end) = query.date_range(chrono::Utc::now().date_naive())?;
        let prepost = query
            .feed_kwargs
            .get("prepost")
            .and_then(|v| v.as_bool())
            .unwrap_or(false);

        let url = Self::chart_url(symbol, start, end, interval, prepost)?;
        let chart = self.fetch_with_retry(symbol, &url)?;
        let df = Self::parse_response(symbol, &query.resolution, chart)?;
        Ok(query.table_form.wrap(df))
    }

    fn supported_timeframes_and_periods(&self) -> Option<TimeframeTable> {
        let table = [
            ("1m", "7d"),
            ("2m", "60d"),
            ("5m", "60d"),
            ("15m", "60d"),
            ("30m", "60d"),
            ("90m", "60d"),
            ("1h", "730d"),
            ("1d", "max"),
            ("5d", "max"),
            ("1w", "max"),
            ("1M", "max"),
            ("3M", "max"),
        ];
        Some(
            table
                .into_iter()
                .map(|(res, period)| (res.to_string(), period.to_string()))
                .collect(),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const BODY: &str = r#"{
        "chart": {
            "result": [{
                "timestamp": [1704205800, 1704209400, 1704213000],
                "indicators": {
                    "quote": [{
                        "open":   [187.15, null, 185.5],
                        "high":   [188.44, null, 186.1],
                        "low":    [183.89, null, 185.0],
                        "close":  [185.64, null, 185.9],
                        "volume": [8200000, null, null]
                    }]
                }
            }],
            "error": null
        }
    }"#;

    #[test]
    fn parses_chart_body_into_native_table() {
        let resp: ChartResponse = serde_json::from_str(BODY).unwrap();
        let res = Resolution::parse("1h").unwrap();
        let df = YahooFinanceFeed::parse_response("AAPL", &res, resp).unwrap();

        // The all-null row is dropped
        assert_eq!(df.height(), 2);
        let names: Vec<String> = df
            .get_column_names()
            .into_iter()
            .map(|n| n.to_string())
            .collect();
        assert_eq!(
            names,
            ["ts", "symbol", "resolution", "open", "high", "low", "close", "volume", "turnover"]
        );
        assert_eq!(df.column("turnover").unwrap().null_count(), 2);
        assert_eq!(df.column("turnover").unwrap().dtype(), &DataType::Float64);
        assert_eq!(df.column("symbol").unwrap().str().unwrap().get(0), Some("AAPL"));
        assert_eq!(df.column("resolution").unwrap().str().unwrap().get(1), Some("1h"));
        assert_eq!(df.column("volume").unwrap().f64().unwrap().get(1), Some(0.0));
    }

    #[test]
    fn not_found_maps_to_symbol_error() {
        let body = r#"{"chart":{"result":null,"error":{"code":"Not Found","description":"No data found"}}}"#;
        let resp: ChartResponse = serde_json::from_str(body).unwrap();
        let res = Resolution::parse("1d").unwrap();
        let err = YahooFinanceFeed::parse_response("NOPE", &res, resp).unwrap_err();
        assert!(matches!(err, FeedError::SymbolNotFound { symbol } if symbol == "NOPE"));
    }

    #[test]
    fn interval_mapping() {
        let iv = |s: &str| YahooFinanceFeed::interval(&Resolution::parse(s).unwrap());
        assert_eq!(iv("1h"), Some("1h"));
        assert_eq!(iv("60m"), Some("1h"));
        assert_eq!(iv("1w"), Some("1wk"));
        assert_eq!(iv("1M"), Some("1mo"));
        assert_eq!(iv("4h"), None);
        assert_eq!(iv("1t"), None);
    }

    #[test]
    fn supported_table_keys_are_valid_resolutions() {
        let feed = YahooFinanceFeed::new().unwrap();
        let table = feed.supported_timeframes_and_periods().unwrap();
        for key in table.keys() {
            let res = Resolution::parse(key).unwrap();
            assert_eq!(&res.to_string(), key);
            assert!(YahooFinanceFeed::interval(&res).is_some(), "{key}");
        }
    }
}
