//! Data pipeline: feeds, fetch orchestration, canonicalization, assembly
//! and event-driven preprocessing.

pub mod assembler;
pub mod bybit;
pub mod canonicalize;
pub mod fetch;
pub mod kwargs;
pub mod parquet;
pub mod preprocess;
pub mod provider;
pub mod registry;
pub mod schema;
pub mod yahoo;

pub use assembler::{AssembledDataset, CanonicalAssembler};
pub use bybit::BybitFeed;
pub use canonicalize::canonicalize;
pub use fetch::fetch_all;
pub use parquet::{write_table_to_columnar_file, Compression};
pub use preprocess::preprocess;
pub use provider::{Feed, FeedError, HistoricalQuery, RawTable, TableForm, BYBIT, YAHOO_FINANCE};
pub use registry::FeedRegistry;
pub use schema::{CanonicalTable, SchemaError, DEFAULT_INDEX};
pub use yahoo::YahooFinanceFeed;
