//! Per-consumer table store and the one-shot `prepare` that turns it into an
//! assembled dataset.

use super::parquet::{write_table_to_columnar_file, Compression};
use super::schema::{check_union_compatible, validate_index, CanonicalTable, DEFAULT_INDEX};
use crate::domain::{DataKey, DataRequest};
use crate::error::PipelineError;
use polars::prelude::*;
use std::path::Path;
use std::sync::Arc;

/// Canonical tables keyed by the request that produced them.
///
/// Tables are held behind `Arc` so a dependent consumer can share its
/// parent's table without copying it. Insertion order is kept; it decides
/// which table's column order wins in `prepare`.
pub struct CanonicalAssembler {
    index: Vec<String>,
    tables: Vec<(Arc<DataRequest>, Arc<CanonicalTable>)>,
}

impl Default for CanonicalAssembler {
    fn default() -> Self {
        Self::new(DEFAULT_INDEX.iter().map(|c| c.to_string()).collect())
    }
}

impl CanonicalAssembler {
    pub fn new(index: Vec<String>) -> Self {
        Self {
            index,
            tables: Vec::new(),
        }
    }

    pub fn index(&self) -> &[String] {
        &self.index
    }

    /// Store a table, replacing any table stored under the same key.
    pub fn insert(&mut self, request: Arc<DataRequest>, table: Arc<CanonicalTable>) {
        let key = request.key();
        match self.tables.iter_mut().find(|(r, _)| r.key() == key) {
            Some(slot) => *slot = (request, table),
            None => self.tables.push((request, table)),
        }
    }

    pub fn has_raw_table(&self, key: &DataKey) -> bool {
        self.tables.iter().any(|(r, _)| &r.key() == key)
    }

    pub fn raw_table(&self, key: &DataKey) -> Option<Arc<CanonicalTable>> {
        self.tables
            .iter()
            .find(|(r, _)| &r.key() == key)
            .map(|(_, t)| Arc::clone(t))
    }

    pub fn len(&self) -> usize {
        self.tables.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tables.is_empty()
    }

    /// Union every stored table into one dataset sorted by the index.
    ///
    /// The store is drained only on success; a failed prepare leaves it
    /// untouched. A second call with nothing new stored fails with
    /// [`PipelineError::EmptyDataset`].
    pub fn prepare(&mut self) -> Result<AssembledDataset, PipelineError> {
        let Some((first_request, first_table)) = self.tables.first() else {
            return Err(PipelineError::EmptyDataset);
        };

        let reference = first_table.schema()?;
        let reference_names: Vec<PlSmallStr> = reference.iter_names().cloned().collect();
        for name in &self.index {
            if !reference.contains(name) {
                return Err(PipelineError::schema_mismatch(
                    first_request.to_string(),
                    format!("missing index column '{name}'"),
                ));
            }
        }

        let mut frames = Vec::with_capacity(self.tables.len());
        frames.push(first_table.lazy());
        for (request, table) in &self.tables[1..] {
            let schema = table.schema()?;
            check_union_compatible(&reference, &schema).map_err(|e| {
                PipelineError::schema_mismatch(request.to_string(), e.to_string())
            })?;
            let aligned: Vec<Expr> = reference_names.iter().map(|n| col(n.clone())).collect();
            frames.push(table.lazy().select(aligned));
        }

        let sort_by: Vec<Expr> = self.index.iter().map(|c| col(c.as_str())).collect();
        let arranged: Vec<Expr> = self
            .index
            .iter()
            .map(|c| col(c.as_str()))
            .chain(
                reference_names
                    .iter()
                    .filter(|n| !self.index.iter().any(|c| c == n.as_str()))
                    .map(|n| col(n.clone())),
            )
            .collect();

        let table = concat(&frames, UnionArgs::default())?
            .sort_by_exprs(
                sort_by,
                SortMultipleOptions::default().with_maintain_order(true),
            )
            .select(arranged)
            .collect()?;

        if let Err(e) = validate_index(&table, &self.index) {
            let request = self.offending_request()?.unwrap_or_else(|| "dataset".to_string());
            return Err(PipelineError::schema_mismatch(request, e.to_string()));
        }

        tracing::info!(
            tables = self.tables.len(),
            rows = table.height(),
            columns = table.width(),
            "prepared dataset"
        );
        self.tables.clear();

        Ok(AssembledDataset {
            table,
            index: self.index.clone(),
        })
    }

    fn offending_request(&self) -> Result<Option<String>, PipelineError> {
        for (request, table) in &self.tables {
            if validate_index(&table.collect()?, &self.index).is_err() {
                return Ok(Some(request.to_string()));
            }
        }
        Ok(None)
    }
}

/// The union of all canonical tables, index columns first, sorted by index.
#[derive(Debug, Clone)]
pub struct AssembledDataset {
    table: DataFrame,
    index: Vec<String>,
}

impl AssembledDataset {
    pub(crate) fn from_parts(table: DataFrame, index: Vec<String>) -> Self {
        Self { table, index }
    }

    pub fn table(&self) -> &DataFrame {
        &self.table
    }

    pub fn into_table(self) -> DataFrame {
        self.table
    }

    pub fn index(&self) -> &[String] {
        &self.index
    }

    pub fn height(&self) -> usize {
        self.table.height()
    }

    pub fn column_names(&self) -> Vec<String> {
        self.table
            .get_column_names()
            .into_iter()
            .map(|n| n.to_string())
            .collect()
    }

    /// Split into row slices of `len / num_chunks` rows for chunked replay.
    ///
    /// Each slice has at least one row and a trailing partial slice is kept,
    /// so an uneven split yields one extra chunk.
    pub fn chunks(&self, num_chunks: usize) -> Vec<DataFrame> {
        let total = self.table.height();
        let size = (total / num_chunks.max(1)).max(1);
        (0..total)
            .step_by(size)
            .map(|offset| self.table.slice(offset as i64, size))
            .collect()
    }

    pub fn write_parquet(&self, path: &Path, compression: Compression) -> Result<(), PipelineError> {
        write_table_to_columnar_file(&self.table, path, compression)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{Product, Resolution};

    fn request(res: &str) -> Arc<DataRequest> {
        let product = Product::new("BYBIT", "BTC", "USDT", "PERP", None);
        Arc::new(DataRequest::new("BYBIT", product, Resolution::parse(res).unwrap()))
    }

    fn table(ts: &[i64], res: &str, close: &[f64]) -> Arc<CanonicalTable> {
        let n = ts.len();
        let df = df!(
            "ts" => ts,
            "resolution" => vec![res; n],
            "close" => close,
            "product" => vec!["CRYPTO-BYBIT-BTC_USDT_PERP"; n],
        )
        .unwrap();
        Arc::new(CanonicalTable::from(df))
    }

    #[test]
    fn prepare_sorts_and_puts_index_first() {
        let mut assembler = CanonicalAssembler::default();
        assembler.insert(request("1h"), table(&[3, 1], "1h", &[3.0, 1.0]));
        assembler.insert(request("1m"), table(&[2, 1], "1m", &[2.0, 1.5]));

        let dataset = assembler.prepare().unwrap();
        assert_eq!(
            dataset.column_names(),
            vec!["ts", "product", "resolution", "close"]
        );
        let ts: Vec<Option<i64>> = dataset.table().column("ts").unwrap().i64().unwrap().into_iter().collect();
        assert_eq!(ts, vec![Some(1), Some(1), Some(2), Some(3)]);
        let res = dataset.table().column("resolution").unwrap().str().unwrap();
        assert_eq!(res.get(0), Some("1h"));
        assert_eq!(res.get(1), Some("1m"));
        assert!(assembler.is_empty());
    }

    #[test]
    fn second_prepare_is_empty() {
        let mut assembler = CanonicalAssembler::default();
        assembler.insert(request("1d"), table(&[1], "1d", &[1.0]));
        assembler.prepare().unwrap();
        assert!(matches!(assembler.prepare(), Err(PipelineError::EmptyDataset)));
    }

    #[test]
    fn insert_replaces_same_key() {
        let mut assembler = CanonicalAssembler::default();
        assembler.insert(request("1d"), table(&[1], "1d", &[1.0]));
        assembler.insert(request("1d"), table(&[1, 2], "1d", &[1.0, 2.0]));
        assert_eq!(assembler.len(), 1);
        assert!(assembler.has_raw_table(&request("1d").key()));
        assert!(assembler.raw_table(&request("1h").key()).is_none());
        assert_eq!(assembler.prepare().unwrap().height(), 2);
    }

    #[test]
    fn mismatched_table_names_request_and_keeps_store() {
        let mut assembler = CanonicalAssembler::default();
        assembler.insert(request("1d"), table(&[1], "1d", &[1.0]));
        let narrow = df!(
            "ts" => &[1i64],
            "resolution" => &["1h"],
            "product" => &["CRYPTO-BYBIT-BTC_USDT_PERP"],
        )
        .unwrap();
        assembler.insert(request("1h"), Arc::new(CanonicalTable::from(narrow)));

        match assembler.prepare() {
            Err(PipelineError::SchemaMismatch { request, reason }) => {
                assert!(request.ends_with(" 1h"));
                assert!(reason.contains("close"));
            }
            other => panic!("expected SchemaMismatch, got {other:?}"),
        }
        assert_eq!(assembler.len(), 2);
    }

    #[test]
    fn null_index_is_rejected() {
        let mut assembler = CanonicalAssembler::default();
        assembler.insert(request("1d"), table(&[1], "1d", &[1.0]));
        let holes = df!(
            "ts" => &[Some(2i64), None],
            "resolution" => &["1h", "1h"],
            "close" => &[1.0, 2.0],
            "product" => &["CRYPTO-BYBIT-BTC_USDT_PERP"; 2],
        )
        .unwrap();
        assembler.insert(request("1h"), Arc::new(CanonicalTable::from(holes)));

        match assembler.prepare() {
            Err(PipelineError::SchemaMismatch { request, reason }) => {
                assert!(request.ends_with(" 1h"));
                assert!(reason.contains("ts"));
            }
            other => panic!("expected SchemaMismatch, got {other:?}"),
        }
    }

    #[test]
    fn built_in_feed_layouts_stack() {
        use crate::data::{canonicalize, BybitFeed, RawTable, YahooFinanceFeed};

        let daily = Resolution::parse("1d").unwrap();
        let klines = r#"{"retCode":0,"retMsg":"OK","result":{"list":[
            ["1704153600000","42300","42450","42200","42400","120.5","5100000"],
            ["1704067200000","42100","42350","42050","42300","98.1","4150000"]
        ]}}"#;
        let chart = r#"{"chart":{"result":[{
            "timestamp":[1704153600,1704240000],
            "indicators":{"quote":[{
                "open":[187.15,185.5],"high":[188.44,186.1],"low":[183.89,185.0],
                "close":[185.64,185.9],"volume":[8200000,7100000]
            }]}
        }],"error":null}}"#;

        let btc = Product::new("BYBIT", "BTC", "USDT", "PERP", None);
        let aapl = Product::new("IB", "AAPL", "USD", "STK", None);
        let bybit = BybitFeed::frame_from_kline_json("BTC_USDT_PERP", &daily, klines).unwrap();
        let yahoo = YahooFinanceFeed::frame_from_chart_json("AAPL", &daily, chart).unwrap();

        let mut assembler = CanonicalAssembler::default();
        assembler.insert(
            request("1d"),
            Arc::new(canonicalize(RawTable::Eager(bybit), &btc).unwrap()),
        );
        assembler.insert(
            Arc::new(DataRequest::new("IB", aapl.clone(), daily)),
            Arc::new(canonicalize(RawTable::Eager(yahoo), &aapl).unwrap()),
        );

        let dataset = assembler.prepare().unwrap();
        assert_eq!(dataset.height(), 4);
        let products: Vec<&str> = dataset
            .table()
            .column("product")
            .unwrap()
            .str()
            .unwrap()
            .into_no_null_iter()
            .collect();
        assert_eq!(
            products,
            vec![
                "CRYPTO-BYBIT-BTC_USDT_PERP",
                "CRYPTO-BYBIT-BTC_USDT_PERP",
                "IB-AAPL_USD_STK",
                "IB-AAPL_USD_STK",
            ]
        );
        assert_eq!(dataset.table().column("turnover").unwrap().null_count(), 2);
    }

    #[test]
    fn chunks_keep_trailing_rows() {
        let mut assembler = CanonicalAssembler::default();
        assembler.insert(request("1d"), table(&[1, 2, 3, 4, 5], "1d", &[1.0; 5]));
        let dataset = assembler.prepare().unwrap();

        let chunks = dataset.chunks(2);
        let heights: Vec<usize> = chunks.iter().map(|c| c.height()).collect();
        assert_eq!(heights, vec![2, 2, 1]);
        assert_eq!(dataset.chunks(1).len(), 1);
        assert_eq!(dataset.chunks(10).len(), 5);
    }
}
