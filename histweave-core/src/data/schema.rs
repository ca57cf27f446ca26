use polars::prelude::*;

/// Composite index of the canonical table, in sort priority order.
pub const DEFAULT_INDEX: [&str; 3] = ["ts", "product", "resolution"];

/// A feed result after canonicalization.
///
/// Wraps a lazy plan so a table shared between consumers is only collected
/// once, by the assembler.
#[derive(Clone)]
pub struct CanonicalTable(LazyFrame);

impl CanonicalTable {
    pub(crate) fn new(lf: LazyFrame) -> Self {
        Self(lf)
    }

    pub fn lazy(&self) -> LazyFrame {
        self.0.clone()
    }

    pub fn collect(&self) -> PolarsResult<DataFrame> {
        self.0.clone().collect()
    }

    pub fn schema(&self) -> PolarsResult<SchemaRef> {
        self.0.clone().collect_schema()
    }

    pub fn column_names(&self) -> PolarsResult<Vec<String>> {
        Ok(self
            .schema()?
            .iter_names()
            .map(|name| name.to_string())
            .collect())
    }
}

impl From<DataFrame> for CanonicalTable {
    fn from(df: DataFrame) -> Self {
        Self(df.lazy())
    }
}

/// Check that `candidate` can be stacked under `reference`: same column
/// names and dtypes. Column order may differ.
pub fn check_union_compatible(reference: &Schema, candidate: &Schema) -> Result<(), SchemaError> {
    for (name, expected) in reference.iter() {
        let actual = candidate
            .get(name)
            .ok_or_else(|| SchemaError::MissingColumn(name.to_string()))?;
        if actual != expected {
            return Err(SchemaError::TypeMismatch {
                column: name.to_string(),
                expected: expected.clone(),
                actual: actual.clone(),
            });
        }
    }

    if let Some(extra) = candidate.iter_names().find(|name| !reference.contains(name)) {
        return Err(SchemaError::UnexpectedColumn(extra.to_string()));
    }

    Ok(())
}

/// Every index column exists and holds no nulls.
pub fn validate_index(df: &DataFrame, index: &[String]) -> Result<(), SchemaError> {
    for name in index {
        let column = df
            .column(name)
            .map_err(|_| SchemaError::MissingColumn(name.clone()))?;
        let nulls = column.null_count();
        if nulls > 0 {
            return Err(SchemaError::NullIndex {
                column: name.clone(),
                nulls,
            });
        }
    }
    Ok(())
}

#[derive(Debug, thiserror::Error)]
pub enum SchemaError {
    #[error("Missing required column: {0}")]
    MissingColumn(String),

    #[error("Unexpected column: {0}")]
    UnexpectedColumn(String),

    #[error("Type mismatch in column {column}: expected {expected:?}, got {actual:?}")]
    TypeMismatch {
        column: String,
        expected: DataType,
        actual: DataType,
    },

    #[error("Index column {column} has {nulls} null value(s)")]
    NullIndex { column: String, nulls: usize },
}

#[cfg(test)]
mod tests {
    use super::*;

    fn bars() -> DataFrame {
        df!(
            "ts" => &[1i64, 2],
            "resolution" => &["1d", "1d"],
            "close" => &[10.0, 11.0],
            "product" => &["IB-AAPL_USD_STK", "IB-AAPL_USD_STK"],
        )
        .unwrap()
    }

    #[test]
    fn test_union_accepts_reordered_columns() {
        let reference = bars();
        let reordered = reference
            .select(["product", "close", "ts", "resolution"])
            .unwrap();
        check_union_compatible(&reference.schema(), &reordered.schema()).unwrap();
    }

    #[test]
    fn test_union_rejects_missing_column() {
        let reference = bars();
        let narrow = reference.select(["ts", "resolution", "product"]).unwrap();
        let result = check_union_compatible(&reference.schema(), &narrow.schema());
        assert!(matches!(result, Err(SchemaError::MissingColumn(c)) if c == "close"));
    }

    #[test]
    fn test_union_rejects_extra_column() {
        let reference = bars();
        let mut wide = reference.clone();
        wide.with_column(Column::new("turnover".into(), &[1.0, 2.0]))
            .unwrap();
        let result = check_union_compatible(&reference.schema(), &wide.schema());
        assert!(matches!(result, Err(SchemaError::UnexpectedColumn(c)) if c == "turnover"));
    }

    #[test]
    fn test_union_rejects_dtype_change() {
        let reference = bars();
        let mut retyped = reference.clone();
        retyped
            .with_column(Column::new("close".into(), &[10i64, 11]))
            .unwrap();
        let result = check_union_compatible(&reference.schema(), &retyped.schema());
        assert!(matches!(result, Err(SchemaError::TypeMismatch { column, .. }) if column == "close"));
    }

    #[test]
    fn test_validate_index_rejects_nulls() {
        let df = df!(
            "ts" => &[Some(1i64), None],
            "product" => &["A", "A"],
            "resolution" => &["1d", "1d"],
        )
        .unwrap();
        let index: Vec<String> = DEFAULT_INDEX.iter().map(|c| c.to_string()).collect();
        let result = validate_index(&df, &index);
        assert!(matches!(result, Err(SchemaError::NullIndex { column, nulls: 1 }) if column == "ts"));
    }

    #[test]
    fn test_canonical_table_reports_columns() {
        let table = CanonicalTable::from(bars());
        assert_eq!(
            table.column_names().unwrap(),
            vec!["ts", "resolution", "close", "product"]
        );
        assert_eq!(table.collect().unwrap().height(), 2);
    }
}
