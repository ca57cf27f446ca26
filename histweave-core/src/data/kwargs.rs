//! Kwargs adaptation: fit a declaration's parameters to the backtest mode and
//! the chosen feed before any request is built.

use super::provider::{Feed, FeedProfile};
use crate::config::BacktestMode;
use crate::domain::{AutoResample, DataKwargs};
use crate::error::PipelineError;

/// Sanitize `kwargs` for `mode` and `feed`.
///
/// - vectorized: resampling, shifts and auto-resampling are event-driven
///   concepts and are cleared
/// - event-driven: `is_skip_first_bar` defaults to false, and feeds whose
///   hourly bars start off the hour get a shift for every hour resolution
///   that has none yet
///
/// The feed's supported-timeframe table, when it has one, replaces the one
/// the venue would have supplied: the data source decides which
/// granularities are obtainable.
pub fn adapt(
    feed: &dyn Feed,
    mode: BacktestMode,
    mut kwargs: DataKwargs,
) -> Result<DataKwargs, PipelineError> {
    if !kwargs.has_resolution() {
        return Err(PipelineError::MissingResolution {
            feed: feed.name().to_string(),
        });
    }
    let resolutions = kwargs.parsed_resolutions()?;

    match mode {
        BacktestMode::Vectorized => {
            kwargs.resamples.clear();
            kwargs.shifts.clear();
            kwargs.auto_resample = AutoResample::disabled();
        }
        BacktestMode::EventDriven => {
            kwargs.is_skip_first_bar.get_or_insert(false);

            if let Some(offset) = FeedProfile::for_feed(feed.name()).hourly_bar_offset_minutes {
                for resolution in resolutions.iter().filter(|r| r.is_hour()) {
                    kwargs.shifts.entry(resolution.to_string()).or_insert(offset);
                }
            }
        }
    }

    if let Some(table) = feed.supported_timeframes_and_periods() {
        kwargs.supported_timeframes_and_periods = Some(table);
    }

    Ok(kwargs)
}
