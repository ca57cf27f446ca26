//! Domain types: resolutions, products, data declarations and requests.

pub mod product;
pub mod request;
pub mod resolution;

pub use product::Product;
pub use request::{
    AutoResample, DataDeclaration, DataKey, DataKwargs, DataRequest, FetchWindow, TimeframeTable,
    TrainPeriods, DEFAULT_ROLLBACK_PERIOD, RESERVED_BACKTEST_KWARGS,
};
pub use resolution::{Resolution, ResolutionError, Timeframe};
