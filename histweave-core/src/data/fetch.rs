//! Fetch orchestration: one feed call per fetchable request, in declaration
//! order, under the feed's rate limit.

use super::canonicalize::canonicalize;
use super::provider::{Feed, FeedProfile, HistoricalQuery, ProductForm};
use super::schema::CanonicalTable;
use crate::config::PipelineSettings;
use crate::domain::{DataKwargs, DataRequest, FetchWindow, RESERVED_BACKTEST_KWARGS};
use crate::error::PipelineError;
use std::sync::Arc;
use std::thread;

/// Reserved fetch-window names must not leak into the generic kwargs bag.
pub fn check_reserved_kwargs(kwargs: &DataKwargs) -> Result<(), PipelineError> {
    match RESERVED_BACKTEST_KWARGS
        .iter()
        .find(|name| kwargs.extra.contains_key(**name))
    {
        Some(name) => Err(PipelineError::configuration(format!(
            "'{name}' belongs to the fetch window; move it under 'backtest'"
        ))),
        None => Ok(()),
    }
}

/// Fetch and canonicalize every request that is not a resampled derivative.
///
/// Each table is returned paired with the request it answers. Consecutive
/// calls are separated by the feed's configured rate limit; the first
/// failure aborts the whole batch.
pub fn fetch_all(
    feed: &dyn Feed,
    data_requests: &[Arc<DataRequest>],
    kwargs: &DataKwargs,
    window: &FetchWindow,
    settings: &PipelineSettings,
) -> Result<Vec<(Arc<DataRequest>, CanonicalTable)>, PipelineError> {
    check_reserved_kwargs(kwargs)?;

    let profile = FeedProfile::for_feed(feed.name());
    let pause = settings.rate_limit(feed.name());
    let mut tables = Vec::with_capacity(data_requests.len());
    let mut calls = 0usize;

    for request in data_requests {
        if request.is_time_based() && request.is_resamplee() {
            tracing::debug!(%request, "skipping resampled request");
            continue;
        }

        if calls > 0 {
            if let Some(pause) = pause {
                tracing::debug!(feed = feed.name(), ?pause, "rate limit");
                thread::sleep(pause);
            }
        }
        calls += 1;

        let product = &request.product;
        let product_or_symbol = match profile.product_form {
            ProductForm::Symbol => product.symbol(),
            ProductForm::Pdt => product.pdt(),
        };
        let rollback_period = match &window.rollback_period {
            Some(period) => period.as_str(),
            None => settings
                .rollback_period
                .resolve(&product.product_type, &product.pdt())
                .as_str(),
        };
        let query = HistoricalQuery {
            rollback_period,
            start_date: window.start_date,
            end_date: window.end_date,
            resolution: request.resolution,
            table_form: settings.table_form,
            feed_kwargs: &window.feed_kwargs,
        };

        tracing::info!(
            feed = feed.name(),
            %request,
            product_or_symbol = %product_or_symbol,
            rollback_period,
            "fetching historical data"
        );
        let raw = feed
            .get_historical_data(&product_or_symbol, &query)
            .map_err(|source| PipelineError::Fetch {
                request: request.to_string(),
                source,
            })?;

        tables.push((Arc::clone(request), canonicalize(raw, product)?));
    }

    Ok(tables)
}
