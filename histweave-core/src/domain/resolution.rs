//! Resolution: sampling granularity of a data request.
//!
//! A resolution string is `<period><unit>`, e.g. `1h`, `5m`, `1d`, `1t` (tick)
//! or `1q` (quote). Quotes may carry an order-book level: `1q_L2`. Long-form
//! aliases (`tick`, `quote`, `minute`, `2hours`, ...) parse to the same value.
//! Two resolutions are equal iff their canonical string forms are equal.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// Unit of a resolution.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Timeframe {
    Quote,
    Tick,
    Second,
    Minute,
    Hour,
    Day,
    Week,
    Month,
    Year,
}

impl Timeframe {
    /// Short code used in the canonical string form.
    pub fn code(&self) -> &'static str {
        match self {
            Timeframe::Quote => "q",
            Timeframe::Tick => "t",
            Timeframe::Second => "s",
            Timeframe::Minute => "m",
            Timeframe::Hour => "h",
            Timeframe::Day => "d",
            Timeframe::Week => "w",
            Timeframe::Month => "M",
            Timeframe::Year => "y",
        }
    }

    /// Seconds in one unit. `None` for quote and tick data.
    ///
    /// Months and years use 30 and 365 days; only used for ordering and
    /// divisibility checks, never for calendar arithmetic.
    pub fn unit_secs(&self) -> Option<u64> {
        match self {
            Timeframe::Quote | Timeframe::Tick => None,
            Timeframe::Second => Some(1),
            Timeframe::Minute => Some(60),
            Timeframe::Hour => Some(3_600),
            Timeframe::Day => Some(86_400),
            Timeframe::Week => Some(7 * 86_400),
            Timeframe::Month => Some(30 * 86_400),
            Timeframe::Year => Some(365 * 86_400),
        }
    }

    fn from_unit(unit: &str) -> Option<Self> {
        // Case matters for the short codes (`m` minute vs `M` month).
        let short = match unit {
            "q" => Some(Timeframe::Quote),
            "t" => Some(Timeframe::Tick),
            "s" => Some(Timeframe::Second),
            "m" => Some(Timeframe::Minute),
            "h" => Some(Timeframe::Hour),
            "d" => Some(Timeframe::Day),
            "w" => Some(Timeframe::Week),
            "M" => Some(Timeframe::Month),
            "y" => Some(Timeframe::Year),
            _ => None,
        };
        if short.is_some() {
            return short;
        }

        let lower = unit.to_ascii_lowercase();
        let singular = lower.strip_suffix('s').unwrap_or(&lower);
        match singular {
            "quote" => Some(Timeframe::Quote),
            "tick" => Some(Timeframe::Tick),
            "sec" | "second" => Some(Timeframe::Second),
            "min" | "minute" => Some(Timeframe::Minute),
            "hour" => Some(Timeframe::Hour),
            "day" => Some(Timeframe::Day),
            "week" => Some(Timeframe::Week),
            "mo" | "month" => Some(Timeframe::Month),
            "year" => Some(Timeframe::Year),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("invalid resolution '{input}': {reason}")]
pub struct ResolutionError {
    pub input: String,
    pub reason: String,
}

impl ResolutionError {
    fn new(input: &str, reason: impl Into<String>) -> Self {
        Self {
            input: input.to_string(),
            reason: reason.into(),
        }
    }
}

/// Parsed resolution descriptor. Pure value type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Resolution {
    period: u32,
    timeframe: Timeframe,
    orderbook_level: Option<u8>,
}

impl Resolution {
    pub fn new(period: u32, timeframe: Timeframe) -> Self {
        Self {
            period: period.max(1),
            timeframe,
            orderbook_level: None,
        }
    }

    pub fn parse(input: &str) -> Result<Self, ResolutionError> {
        let trimmed = input.trim();
        if trimmed.is_empty() {
            return Err(ResolutionError::new(input, "empty string"));
        }

        let (body, level) = match trimmed.split_once("_L") {
            Some((body, level)) => {
                let level: u8 = level
                    .parse()
                    .map_err(|_| ResolutionError::new(input, "order-book level must be a number"))?;
                if !(1..=3).contains(&level) {
                    return Err(ResolutionError::new(input, "order-book level must be 1, 2 or 3"));
                }
                (body, Some(level))
            }
            None => (trimmed, None),
        };

        let digits_end = body
            .find(|c: char| !c.is_ascii_digit())
            .ok_or_else(|| ResolutionError::new(input, "missing unit"))?;
        let (digits, unit) = body.split_at(digits_end);

        let period = if digits.is_empty() {
            1
        } else {
            digits
                .parse::<u32>()
                .map_err(|_| ResolutionError::new(input, "period out of range"))?
        };
        if period == 0 {
            return Err(ResolutionError::new(input, "period must be positive"));
        }

        let timeframe = Timeframe::from_unit(unit)
            .ok_or_else(|| ResolutionError::new(input, format!("unknown unit '{unit}'")))?;

        if level.is_some() && timeframe != Timeframe::Quote {
            return Err(ResolutionError::new(
                input,
                "order-book level is only valid for quote data",
            ));
        }

        Ok(Self {
            period,
            timeframe,
            orderbook_level: level,
        })
    }

    pub fn period(&self) -> u32 {
        self.period
    }

    pub fn timeframe(&self) -> Timeframe {
        self.timeframe
    }

    pub fn orderbook_level(&self) -> Option<u8> {
        self.orderbook_level
    }

    pub fn is_quote(&self) -> bool {
        self.timeframe == Timeframe::Quote
    }

    pub fn is_tick(&self) -> bool {
        self.timeframe == Timeframe::Tick
    }

    pub fn is_second(&self) -> bool {
        self.timeframe == Timeframe::Second
    }

    pub fn is_minute(&self) -> bool {
        self.timeframe == Timeframe::Minute
    }

    pub fn is_hour(&self) -> bool {
        self.timeframe == Timeframe::Hour
    }

    pub fn is_day(&self) -> bool {
        self.timeframe == Timeframe::Day
    }

    pub fn is_week(&self) -> bool {
        self.timeframe == Timeframe::Week
    }

    pub fn is_month(&self) -> bool {
        self.timeframe == Timeframe::Month
    }

    pub fn is_year(&self) -> bool {
        self.timeframe == Timeframe::Year
    }

    /// Time-based bar data (everything except quotes and ticks).
    pub fn is_bar(&self) -> bool {
        self.timeframe.unit_secs().is_some()
    }

    /// Approximate bar length in seconds; `None` for quotes and ticks.
    pub fn duration_secs(&self) -> Option<u64> {
        self.timeframe.unit_secs().map(|s| s * self.period as u64)
    }

    /// True if `self` samples more finely than `other`.
    ///
    /// Quotes are finer than ticks, ticks finer than any bar.
    pub fn is_finer_than(&self, other: &Resolution) -> bool {
        self.rank() < other.rank()
    }

    fn rank(&self) -> (u8, u64) {
        match self.timeframe {
            Timeframe::Quote => (0, 0),
            Timeframe::Tick => (1, self.period as u64),
            _ => (2, self.duration_secs().unwrap_or(u64::MAX)),
        }
    }
}

impl fmt::Display for Resolution {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}", self.period, self.timeframe.code())?;
        if let Some(level) = self.orderbook_level {
            write!(f, "_L{level}")?;
        }
        Ok(())
    }
}

impl FromStr for Resolution {
    type Err = ResolutionError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl TryFrom<String> for Resolution {
    type Error = ResolutionError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(&value)
    }
}

impl From<Resolution> for String {
    fn from(value: Resolution) -> Self {
        value.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_short_forms() {
        let r = Resolution::parse("1h").unwrap();
        assert!(r.is_hour());
        assert!(r.is_bar());
        assert_eq!(r.to_string(), "1h");

        let r = Resolution::parse("15m").unwrap();
        assert!(r.is_minute());
        assert_eq!(r.period(), 15);
        assert_eq!(r.duration_secs(), Some(900));
    }

    #[test]
    fn month_and_minute_are_distinct() {
        assert!(Resolution::parse("1M").unwrap().is_month());
        assert!(Resolution::parse("1m").unwrap().is_minute());
    }

    #[test]
    fn long_aliases_canonicalize() {
        assert_eq!(Resolution::parse("tick").unwrap().to_string(), "1t");
        assert_eq!(Resolution::parse("quote").unwrap().to_string(), "1q");
        assert_eq!(Resolution::parse("2hours").unwrap().to_string(), "2h");
        assert_eq!(Resolution::parse("minute").unwrap(), Resolution::parse("1m").unwrap());
    }

    #[test]
    fn tick_and_quote_are_not_bars() {
        let tick = Resolution::parse("1t").unwrap();
        let quote = Resolution::parse("1q_L2").unwrap();
        assert!(tick.is_tick() && !tick.is_bar());
        assert!(quote.is_quote() && !quote.is_bar());
        assert_eq!(quote.orderbook_level(), Some(2));
        assert_eq!(quote.to_string(), "1q_L2");
        assert_eq!(tick.duration_secs(), None);
    }

    #[test]
    fn rejects_malformed() {
        for bad in ["", "h1", "0m", "1x", "12", "1h_L1", "1q_L9", "1q_Lx"] {
            assert!(Resolution::parse(bad).is_err(), "{bad} should fail");
        }
    }

    #[test]
    fn finer_ordering() {
        let m1 = Resolution::parse("1m").unwrap();
        let m5 = Resolution::parse("5m").unwrap();
        let h1 = Resolution::parse("1h").unwrap();
        let t = Resolution::parse("1t").unwrap();
        assert!(m1.is_finer_than(&m5));
        assert!(m5.is_finer_than(&h1));
        assert!(t.is_finer_than(&m1));
        assert!(!h1.is_finer_than(&h1));
    }

    #[test]
    fn serde_uses_string_form() {
        let r: Resolution = serde_json::from_str("\"1d\"").unwrap();
        assert!(r.is_day());
        assert_eq!(serde_json::to_string(&r).unwrap(), "\"1d\"");
        assert!(serde_json::from_str::<Resolution>("\"bogus\"").is_err());
    }
}
