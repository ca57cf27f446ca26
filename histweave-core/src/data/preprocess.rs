//! Event-driven preprocessing of an assembled dataset.

use super::assembler::AssembledDataset;
use crate::domain::Resolution;
use crate::error::PipelineError;
use polars::prelude::*;
use std::collections::HashMap;

/// Columns added right after the index, in this order.
pub const DERIVED_COLUMNS: [&str; 4] = ["ts_ms", "broker", "is_quote", "is_tick"];

/// Tag every row with the metadata the event loop dispatches on.
///
/// Adds `ts_ms` (epoch milliseconds, floored to the millisecond), `broker` (leading segment
/// of `product`) and the `is_quote` / `is_tick` flags of the row's
/// resolution. Resolution strings are parsed once per distinct value.
pub fn preprocess(dataset: AssembledDataset) -> Result<AssembledDataset, PipelineError> {
    let index = dataset.index().to_vec();
    let df = dataset.into_table();

    let ts_ms = epoch_millis(required(&df, "ts")?)?;
    let broker = brokers(required(&df, "product")?)?;
    let (is_quote, is_tick) = resolution_flags(required(&df, "resolution")?)?;

    let mut columns: Vec<Column> = Vec::with_capacity(df.width() + DERIVED_COLUMNS.len());
    for name in &index {
        columns.push(required(&df, name)?.clone());
    }
    columns.push(ts_ms);
    columns.push(broker);
    columns.push(is_quote);
    columns.push(is_tick);
    for column in df.get_columns() {
        let name = column.name().as_str();
        if index.iter().any(|i| i == name) || DERIVED_COLUMNS.contains(&name) {
            continue;
        }
        columns.push(column.clone());
    }

    let table = DataFrame::new(columns)?;
    tracing::debug!(rows = table.height(), "preprocessed event-driven dataset");
    Ok(AssembledDataset::from_parts(table, index))
}

fn required<'a>(df: &'a DataFrame, name: &str) -> Result<&'a Column, PipelineError> {
    df.column(name).map_err(|_| {
        PipelineError::schema_mismatch("assembled dataset", format!("missing column '{name}'"))
    })
}

fn epoch_millis(ts: &Column) -> Result<Column, PipelineError> {
    let scale: fn(i64) -> i64 = match ts.dtype() {
        DataType::Datetime(TimeUnit::Nanoseconds, _) => |v| v.div_euclid(1_000_000),
        DataType::Datetime(TimeUnit::Microseconds, _) => |v| v.div_euclid(1_000),
        DataType::Datetime(TimeUnit::Milliseconds, _) | DataType::Int64 => |v| v,
        DataType::Date => |days| days * 86_400_000,
        other => {
            return Err(PipelineError::schema_mismatch(
                "assembled dataset",
                format!("column 'ts' has unsupported dtype {other:?}"),
            ))
        }
    };
    let raw = ts.cast(&DataType::Int64)?;
    let millis: Vec<Option<i64>> = raw.i64()?.into_iter().map(|v| v.map(scale)).collect();
    Ok(Column::new("ts_ms".into(), millis))
}

fn brokers(product: &Column) -> Result<Column, PipelineError> {
    let broker: Vec<Option<&str>> = product
        .str()?
        .into_iter()
        .map(|p| p.and_then(|p| p.split('-').next()))
        .collect();
    Ok(Column::new("broker".into(), broker))
}

fn resolution_flags(resolution: &Column) -> Result<(Column, Column), PipelineError> {
    let values = resolution.str()?;
    let mut parsed: HashMap<&str, (bool, bool)> = HashMap::new();
    let mut is_quote = Vec::with_capacity(values.len());
    let mut is_tick = Vec::with_capacity(values.len());

    for value in values.into_iter() {
        let value = value.ok_or_else(|| {
            PipelineError::schema_mismatch("assembled dataset", "null resolution value")
        })?;
        let flags = match parsed.get(value) {
            Some(flags) => *flags,
            None => {
                let r = Resolution::parse(value)?;
                let flags = (r.is_quote(), r.is_tick());
                parsed.insert(value, flags);
                flags
            }
        };
        is_quote.push(flags.0);
        is_tick.push(flags.1);
    }

    Ok((
        Column::new("is_quote".into(), is_quote),
        Column::new("is_tick".into(), is_tick),
    ))
}
