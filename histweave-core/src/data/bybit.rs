//! Bybit feed.
//!
//! Fetches klines from Bybit's public v5 market API. Products are addressed by
//! their venue-native code (`BTC_USDT_PERP`), and the native table carries that
//! code in a `product` column without broker or exchange qualifiers:
//! `ts, product, resolution, open, high, low, close, volume, turnover`.

use super::provider::{Feed, FeedError, HistoricalQuery, RawTable, BYBIT};
use crate::domain::{Resolution, Timeframe, TimeframeTable};
use chrono::NaiveDate;
use polars::prelude::*;
use serde::Deserialize;
use std::time::Duration;

const BASE_URL: &str = "https://api.bybit.com/v5/market/kline";
const PAGE_LIMIT: usize = 1000;

#[derive(Debug, Deserialize)]
struct KlineResponse {
    #[serde(rename = "retCode")]
    ret_code: i64,
    #[serde(rename = "retMsg")]
    ret_msg: String,
    result: Option<KlineResult>,
}

#[derive(Debug, Deserialize)]
struct KlineResult {
    #[serde(default)]
    list: Vec<Vec<String>>,
}

/// One parsed kline row.
#[derive(Debug, Clone, PartialEq)]
struct Kline {
    start_ms: i64,
    open: f64,
    high: f64,
    low: f64,
    close: f64,
    volume: f64,
    turnover: f64,
}

/// Bybit historical kline feed.
pub struct BybitFeed {
    client: reqwest::blocking::Client,
}

impl BybitFeed {
    pub fn new() -> Result<Self, FeedError> {
        let client = reqwest::blocking::Client::builder()
            .timeout(Duration::from_secs(30))
            .build()
            .map_err(|e| FeedError::Other(format!("failed to build HTTP client: {e}")))?;
        Ok(Self { client })
    }

    /// Kline interval code for a resolution, if Bybit serves it.
    pub fn interval(resolution: &Resolution) -> Option<&'static str> {
        match (resolution.timeframe(), resolution.period()) {
            (Timeframe::Minute, 1) => Some("1"),
            (Timeframe::Minute, 3) => Some("3"),
            (Timeframe::Minute, 5) => Some("5"),
            (Timeframe::Minute, 15) => Some("15"),
            (Timeframe::Minute, 30) => Some("30"),
            (Timeframe::Minute, 60) | (Timeframe::Hour, 1) => Some("60"),
            (Timeframe::Hour, 2) => Some("120"),
            (Timeframe::Hour, 4) => Some("240"),
            (Timeframe::Hour, 6) => Some("360"),
            (Timeframe::Hour, 12) => Some("720"),
            (Timeframe::Day, 1) => Some("D"),
            (Timeframe::Week, 1) => Some("W"),
            (Timeframe::Month, 1) => Some("M"),
            _ => None,
        }
    }

    /// Split `BTC_USDT_PERP` into the API's (category, symbol).
    fn category_and_symbol(pdt: &str) -> Result<(&'static str, String), FeedError> {
        let parts: Vec<&str> = pdt.split('_').collect();
        let [base, quote, ptype] = parts.as_slice() else {
            return Err(FeedError::SymbolNotFound {
                symbol: pdt.to_string(),
            });
        };
        let category = match *ptype {
            "PERP" | "FUT" => "linear",
            "IPERP" | "IFUT" => "inverse",
            "SPOT" | "CRYPTO" => "spot",
            _ => {
                return Err(FeedError::SymbolNotFound {
                    symbol: pdt.to_string(),
                })
            }
        };
        Ok((category, format!("{base}{quote}")))
    }

    fn parse_page(resp: KlineResponse) -> Result<Vec<Kline>, FeedError> {
        if resp.ret_code != 0 {
            return Err(FeedError::ResponseFormatChanged(format!(
                "retCode {}: {}",
                resp.ret_code, resp.ret_msg
            )));
        }
        let result = resp
            .result
            .ok_or_else(|| FeedError::ResponseFormatChanged("missing result".into()))?;

        result
            .list
            .iter()
            .map(|row| {
                if row.len() < 7 {
                    return Err(FeedError::ResponseFormatChanged(format!(
                        "kline row has {} fields, expected 7",
                        row.len()
                    )));
                }
                let num = |i: usize| {
                    row[i].parse::<f64>().map_err(|e| {
                        FeedError::ResponseFormatChanged(format!("bad kline field '{}': {e}", row[i]))
                    })
                };
                let start_ms = row[0].parse::<i64>().map_err(|e| {
                    FeedError::ResponseFormatChanged(format!("bad kline start '{}': {e}", row[0]))
                })?;
                Ok(Kline {
                    start_ms,
                    open: num(1)?,
                    high: num(2)?,
                    low: num(3)?,
                    close: num(4)?,
                    volume: num(5)?,
                    turnover: num(6)?,
                })
            })
            .collect()
    }

    /// Parse one raw kline page body into the native table.
    pub fn frame_from_kline_json(
        pdt: &str,
        resolution: &Resolution,
        body: &str,
    ) -> Result<DataFrame, FeedError> {
        let resp: KlineResponse = serde_json::from_str(body).map_err(|e| {
            FeedError::ResponseFormatChanged(format!("failed to parse klines for {pdt}: {e}"))
        })?;
        Self::klines_to_frame(pdt, resolution, Self::parse_page(resp)?)
    }

    /// Page backwards from `end_ms` until `start_ms` is reached.
    fn fetch_klines(
        &self,
        category: &str,
        symbol: &str,
        interval: &str,
        start_ms: i64,
        end_ms: i64,
    ) -> Result<Vec<Kline>, FeedError> {
        let mut klines: Vec<Kline> = Vec::new();
        let mut cursor = end_ms;

        while cursor >= start_ms {
            let url = format!(
                "{BASE_URL}?category={category}&symbol={symbol}&interval={interval}\
                 &start={start_ms}&end={cursor}&limit={PAGE_LIMIT}"
            );
            let resp = self
                .client
                .get(&url)
                .send()
                .map_err(|e| FeedError::NetworkUnreachable(e.to_string()))?;

            if resp.status() == reqwest::StatusCode::TOO_MANY_REQUESTS {
                return Err(FeedError::RateLimited {
                    retry_after_secs: 1,
                });
            }
            if !resp.status().is_success() {
                return Err(FeedError::Other(format!(
                    "HTTP {} for {symbol}",
                    resp.status()
                )));
            }

            let body: KlineResponse = resp.json().map_err(|e| {
                FeedError::ResponseFormatChanged(format!("failed to parse klines for {symbol}: {e}"))
            })?;
            let page = Self::parse_page(body)?;
            let page_len = page.len();

            // Pages come newest first
            let oldest = page.iter().map(|k| k.start_ms).min();
            klines.extend(page);

            match oldest {
                Some(oldest) if page_len >= PAGE_LIMIT => cursor = oldest - 1,
                _ => break,
            }
        }

        Ok(klines)
    }

    /// Sort ascending, drop duplicate starts, and build the native table.
    fn klines_to_frame(
        pdt: &str,
        resolution: &Resolution,
        mut klines: Vec<Kline>,
    ) -> Result<DataFrame, FeedError> {
        klines.sort_by_key(|k| k.start_ms);
        klines.dedup_by_key(|k| k.start_ms);
        if klines.is_empty() {
            return Err(FeedError::SymbolNotFound {
                symbol: pdt.to_string(),
            });
        }

        let rows = klines.len();
        let df = DataFrame::new(vec![
            Column::new(
                "ts".into(),
                klines.iter().map(|k| k.start_ms).collect::<Vec<_>>(),
            )
            .cast(&DataType::Datetime(TimeUnit::Milliseconds, None))?,
            Column::new("product".into(), vec![pdt.to_string(); rows]),
            Column::new("resolution".into(), vec![resolution.to_string(); rows]),
            Column::new("open".into(), klines.iter().map(|k| k.open).collect::<Vec<_>>()),
            Column::new("high".into(), klines.iter().map(|k| k.high).collect::<Vec<_>>()),
            Column::new("low".into(), klines.iter().map(|k| k.low).collect::<Vec<_>>()),
            Column::new("close".into(), klines.iter().map(|k| k.close).collect::<Vec<_>>()),
            Column::new("volume".into(), klines.iter().map(|k| k.volume).collect::<Vec<_>>()),
            Column::new(
                "turnover".into(),
                klines.iter().map(|k| k.turnover).collect::<Vec<_>>(),
            ),
        ])?;
        Ok(df)
    }
}

fn day_bounds_ms(start: NaiveDate, end: NaiveDate) -> Result<(i64, i64), FeedError> {
    let start_ms = start
        .and_hms_opt(0, 0, 0)
        .ok_or_else(|| FeedError::InvalidWindow(format!("bad start date {start}")))?
        .and_utc()
        .timestamp_millis();
    let end_ms = end
        .and_hms_milli_opt(23, 59, 59, 999)
        .ok_or_else(|| FeedError::InvalidWindow(format!("bad end date {end}")))?
        .and_utc()
        .timestamp_millis();
    Ok((start_ms, end_ms))
}

impl Feed for BybitFeed {
    fn name(&self) -> &str {
        BYBIT
    }

    fn get_historical_data(
        &self,
        pdt: &str,
        query: &HistoricalQuery<'_>,
    ) -> Result<RawTable, FeedError> {
        let interval =
            Self::interval(&query.resolution).ok_or_else(|| FeedError::UnsupportedResolution {
                feed: BYBIT.to_string(),
                resolution: query.resolution.to_string(),
            })?;
        let (category, symbol) = Self::category_and_symbol(pdt)?;
        let (start, end) = query.date_range(chrono::Utc::now().date_naive())?;
        let (start_ms, end_ms) = day_bounds_ms(start, end)?;

        let klines = self.fetch_klines(category, &symbol, interval, start_ms, end_ms)?;
        let df = Self::klines_to_frame(pdt, &query.resolution, klines)?;
        Ok(query.table_form.wrap(df))
    }

    fn supported_timeframes_and_periods(&self) -> Option<TimeframeTable> {
        let resolutions = [
            "1m", "3m", "5m", "15m", "30m", "1h", "2h", "4h", "6h", "12h", "1d", "1w", "1M",
        ];
        Some(
            resolutions
                .into_iter()
                .map(|res| (res.to_string(), "max".to_string()))
                .collect(),
        )
    }
}
