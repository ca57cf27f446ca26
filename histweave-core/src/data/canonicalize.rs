use super::provider::RawTable;
use super::schema::CanonicalTable;
use crate::domain::Product;
use crate::error::PipelineError;
use polars::prelude::*;

/// Feed-native identity columns, replaced by the canonical `product`.
const FEED_IDENTITY_COLUMNS: [&str; 2] = ["symbol", "product"];

/// Bring one feed result into the canonical layout.
///
/// Drops `symbol` and any feed-native `product`, then appends `product`
/// holding the canonical product representation. Every other column keeps
/// its position and dtype. Running this on a canonical table only re-asserts
/// the `product` value.
pub fn canonicalize(raw: RawTable, product: &Product) -> Result<CanonicalTable, PipelineError> {
    let mut lf = match raw {
        RawTable::Eager(df) => df.lazy(),
        RawTable::Lazy(lf) => lf,
        other => {
            return Err(PipelineError::UnsupportedSchema {
                product: product.canonical(),
                kind: other.kind().to_string(),
            })
        }
    };

    let schema = lf.collect_schema()?;
    let kept: Vec<Expr> = schema
        .iter_names()
        .filter(|name| !FEED_IDENTITY_COLUMNS.contains(&name.as_str()))
        .map(|name| col(name.clone()))
        .collect();

    let lf = lf
        .select(kept)
        .with_column(lit(product.canonical()).alias("product"));
    Ok(CanonicalTable::new(lf))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn aapl() -> Product {
        Product::new("IB", "AAPL", "USD", "STK", None)
    }

    fn yahoo_frame() -> DataFrame {
        df!(
            "ts" => &[1i64, 2],
            "symbol" => &["AAPL", "AAPL"],
            "resolution" => &["1d", "1d"],
            "open" => &[1.0, 2.0],
            "close" => &[1.5, 2.5],
        )
        .unwrap()
    }

    #[test]
    fn test_symbol_column_replaced_by_product() {
        let table = canonicalize(RawTable::Eager(yahoo_frame()), &aapl()).unwrap();
        let df = table.collect().unwrap();

        assert_eq!(
            df.get_column_names()
                .into_iter()
                .map(|n| n.to_string())
                .collect::<Vec<_>>(),
            vec!["ts", "resolution", "open", "close", "product"]
        );
        let products = df.column("product").unwrap().str().unwrap();
        assert!(products.into_iter().all(|p| p == Some("IB-AAPL_USD_STK")));
    }

    #[test]
    fn test_feed_native_product_is_overwritten() {
        let df = df!(
            "ts" => &[1i64],
            "product" => &["BTC_USDT_PERP"],
            "resolution" => &["1h"],
            "close" => &[50_000.0],
            "turnover" => &[1.0],
        )
        .unwrap();
        let product = Product::new("BYBIT", "BTC", "USDT", "PERP", None);
        let out = canonicalize(RawTable::Lazy(df.lazy()), &product)
            .unwrap()
            .collect()
            .unwrap();

        let products = out.column("product").unwrap().str().unwrap();
        assert_eq!(products.get(0), Some("CRYPTO-BYBIT-BTC_USDT_PERP"));
        assert_eq!(out.width(), 5);
    }

    #[test]
    fn test_json_payload_rejected() {
        let raw = RawTable::Json(serde_json::json!({"chart": {}}));
        match canonicalize(raw, &aapl()) {
            Err(PipelineError::UnsupportedSchema { product, kind }) => {
                assert_eq!(product, "IB-AAPL_USD_STK");
                assert_eq!(kind, "json");
            }
            Err(other) => panic!("expected UnsupportedSchema, got {other:?}"),
            Ok(_) => panic!("expected UnsupportedSchema"),
        }
    }

    #[test]
    fn test_canonicalize_is_idempotent() {
        let once = canonicalize(RawTable::Eager(yahoo_frame()), &aapl())
            .unwrap()
            .collect()
            .unwrap();
        let twice = canonicalize(RawTable::Eager(once.clone()), &aapl())
            .unwrap()
            .collect()
            .unwrap();
        assert!(once.equals(&twice));
    }
}
