//! Columnar output.

use crate::error::PipelineError;
use polars::prelude::*;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;

/// Parquet compression codec.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Compression {
    #[default]
    Zstd,
    Snappy,
    Lz4,
    Gzip,
    Brotli,
    Uncompressed,
}

impl Compression {
    fn codec(&self) -> ParquetCompression {
        match self {
            Compression::Zstd => ParquetCompression::Zstd(None),
            Compression::Snappy => ParquetCompression::Snappy,
            Compression::Lz4 => ParquetCompression::Lz4Raw,
            Compression::Gzip => ParquetCompression::Gzip(None),
            Compression::Brotli => ParquetCompression::Brotli(None),
            Compression::Uncompressed => ParquetCompression::Uncompressed,
        }
    }
}

impl std::str::FromStr for Compression {
    type Err = PipelineError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "zstd" => Ok(Compression::Zstd),
            "snappy" => Ok(Compression::Snappy),
            "lz4" => Ok(Compression::Lz4),
            "gzip" => Ok(Compression::Gzip),
            "brotli" => Ok(Compression::Brotli),
            "uncompressed" | "none" => Ok(Compression::Uncompressed),
            other => Err(PipelineError::configuration(format!(
                "unknown parquet compression '{other}'"
            ))),
        }
    }
}

/// Write a table to a Parquet file.
///
/// The write goes to `{path}.tmp` first and is renamed into place, so a
/// failed write never leaves a truncated dataset behind.
pub fn write_table_to_columnar_file(
    df: &DataFrame,
    path: &Path,
    compression: Compression,
) -> Result<(), PipelineError> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent)?;
    }
    let tmp_path = path.with_extension("parquet.tmp");

    let file = fs::File::create(&tmp_path)?;
    let written = ParquetWriter::new(file)
        .with_compression(compression.codec())
        .finish(&mut df.clone());
    if let Err(e) = written {
        let _ = fs::remove_file(&tmp_path);
        return Err(e.into());
    }

    fs::rename(&tmp_path, path).map_err(|e| {
        let _ = fs::remove_file(&tmp_path);
        PipelineError::Io(e)
    })?;
    tracing::info!(path = %path.display(), rows = df.height(), ?compression, "wrote dataset");
    Ok(())
}
