//! Product identity in its three forms.
//!
//! - `pdt`: venue-native code `BASE_QUOTE_PTYPE`, e.g. `BTC_USDT_PERP`
//! - `symbol`: the ticker a symbol-addressed feed expects, e.g. `AAPL`
//! - canonical: `BROKER-EXCHANGE-PDT`, e.g. `CRYPTO-BYBIT-BTC_USDT_PERP`
//!
//! The canonical form is what the `product` column of every canonical table
//! holds. Its first `-`-separated segment is always the broker.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Venues that are crypto exchanges: broker `CRYPTO`, exchange = venue.
pub const CRYPTO_EXCHANGES: &[&str] = &["BYBIT", "BINANCE", "OKX"];

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Product {
    pub broker: String,
    pub exchange: Option<String>,
    pub base_currency: String,
    pub quote_currency: String,
    pub product_type: String,
    symbol: Option<String>,
}

impl Product {
    /// Build a product from a declaration. Inputs are uppercased.
    pub fn new(
        trading_venue: &str,
        base_currency: &str,
        quote_currency: &str,
        product_type: &str,
        exchange: Option<&str>,
    ) -> Self {
        let venue = trading_venue.trim().to_uppercase();
        let (broker, exchange) = if CRYPTO_EXCHANGES.contains(&venue.as_str()) {
            ("CRYPTO".to_string(), Some(venue))
        } else {
            (venue, exchange.map(|e| e.trim().to_uppercase()))
        };
        Self {
            broker,
            exchange,
            base_currency: base_currency.trim().to_uppercase(),
            quote_currency: quote_currency.trim().to_uppercase(),
            product_type: product_type.trim().to_uppercase(),
            symbol: None,
        }
    }

    /// Override the feed symbol instead of deriving it.
    pub fn with_symbol(mut self, symbol: impl Into<String>) -> Self {
        self.symbol = Some(symbol.into());
        self
    }

    pub fn pdt(&self) -> String {
        format!(
            "{}_{}_{}",
            self.base_currency, self.quote_currency, self.product_type
        )
    }

    /// Ticker for symbol-addressed feeds.
    pub fn symbol(&self) -> String {
        if let Some(symbol) = &self.symbol {
            return symbol.clone();
        }
        let (base, quote) = (&self.base_currency, &self.quote_currency);
        match self.product_type.as_str() {
            "FX" => format!("{base}{quote}=X"),
            "CRYPTO" | "SPOT" | "PERP" => format!("{base}-{quote}"),
            "FUT" => format!("{base}=F"),
            _ => base.clone(),
        }
    }

    /// Full canonical representation, including broker and exchange.
    pub fn canonical(&self) -> String {
        self.to_string()
    }
}

impl fmt::Display for Product {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.exchange {
            Some(exchange) => write!(f, "{}-{}-{}", self.broker, exchange, self.pdt()),
            None => write!(f, "{}-{}", self.broker, self.pdt()),
        }
    }
}
