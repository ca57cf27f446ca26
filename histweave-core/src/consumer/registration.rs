//! Base data registration: expand one declaration into requests and decide
//! which bar series are fetched and which are resampled locally.

use crate::domain::{DataDeclaration, DataKwargs, DataRequest, Resolution};
use crate::error::PipelineError;

/// Resolution plan of one declaration before requests are built.
#[derive(Debug, Clone, PartialEq)]
struct Planned {
    resolution: Resolution,
    resampled_from: Option<Resolution>,
}

/// Build the requests for `declaration` under the adapted `kwargs`.
///
/// Declared resolutions come first in declaration order; resamplers that
/// were not declared are appended after them.
pub fn build_requests(
    declaration: &DataDeclaration,
    kwargs: &DataKwargs,
) -> Result<Vec<DataRequest>, PipelineError> {
    let mut plan: Vec<Planned> = kwargs
        .parsed_resolutions()?
        .into_iter()
        .map(|resolution| Planned {
            resolution,
            resampled_from: None,
        })
        .collect();
    if plan.is_empty() {
        return Err(PipelineError::MissingResolution {
            feed: declaration.trading_venue.to_uppercase(),
        });
    }

    apply_explicit_resamples(&mut plan, kwargs)?;
    if kwargs.auto_resample.by_official_resolution {
        apply_official_resamples(&mut plan, kwargs)?;
    }
    if kwargs.auto_resample.by_highest_resolution {
        apply_highest_resamples(&mut plan);
    }

    let product = declaration.product();
    let skip_first_bar = kwargs.is_skip_first_bar.unwrap_or(false);
    let mut requests = Vec::with_capacity(plan.len());
    for planned in plan {
        let mut request = DataRequest::new(
            &declaration.trading_venue,
            product.clone(),
            planned.resolution,
        );
        request.resampled_from = planned.resampled_from;
        request.shift_minutes = shift_for(kwargs, &planned.resolution)?;
        request.skip_first_bar = skip_first_bar;
        request.train = declaration.train.clone();
        requests.push(request);
    }
    Ok(requests)
}

fn position(plan: &[Planned], resolution: &Resolution) -> Option<usize> {
    plan.iter().position(|p| &p.resolution == resolution)
}

fn add_resampler(plan: &mut Vec<Planned>, resampler: Resolution) {
    if position(plan, &resampler).is_none() {
        plan.push(Planned {
            resolution: resampler,
            resampled_from: None,
        });
    }
}

fn apply_explicit_resamples(plan: &mut Vec<Planned>, kwargs: &DataKwargs) -> Result<(), PipelineError> {
    for (resamplee, resampler) in &kwargs.resamples {
        let resamplee = Resolution::parse(resamplee)?;
        let resampler = Resolution::parse(resampler)?;
        if !resampler.is_finer_than(&resamplee) {
            return Err(PipelineError::configuration(format!(
                "cannot resample {resamplee} from {resampler}: the resampler must be finer"
            )));
        }
        let Some(i) = position(plan, &resamplee) else {
            return Err(PipelineError::configuration(format!(
                "resample target {resamplee} is not a declared resolution"
            )));
        };
        plan[i].resampled_from = Some(resampler);
        add_resampler(plan, resampler);
    }
    Ok(())
}

/// Bar resolutions the feed does not serve are resampled from the coarsest
/// official bar resolution that evenly divides them.
fn apply_official_resamples(plan: &mut Vec<Planned>, kwargs: &DataKwargs) -> Result<(), PipelineError> {
    let Some(table) = &kwargs.supported_timeframes_and_periods else {
        return Ok(());
    };
    let official: Vec<Resolution> = table
        .keys()
        .map(|k| Resolution::parse(k))
        .collect::<Result<_, _>>()?;

    let unofficial: Vec<Resolution> = plan
        .iter()
        .filter(|p| p.resampled_from.is_none() && p.resolution.is_bar())
        .map(|p| p.resolution)
        .filter(|r| !official.contains(r))
        .collect();

    for resolution in unofficial {
        let Some(target) = resolution.duration_secs() else {
            continue;
        };
        let resampler = official
            .iter()
            .filter(|o| o.is_bar() && o.is_finer_than(&resolution))
            .filter(|o| o.duration_secs().is_some_and(|d| d > 0 && target % d == 0))
            .max_by_key(|o| o.duration_secs())
            .copied()
            .ok_or_else(|| {
                PipelineError::configuration(format!(
                    "resolution {resolution} is not served by the data source and no official resolution divides it"
                ))
            })?;
        if let Some(i) = position(plan, &resolution) {
            plan[i].resampled_from = Some(resampler);
        }
        add_resampler(plan, resampler);
    }
    Ok(())
}

/// All fetched bar resolutions but the finest are resampled from the finest.
fn apply_highest_resamples(plan: &mut [Planned]) {
    let fetched_bars = || {
        plan.iter()
            .filter(|p| p.resampled_from.is_none() && p.resolution.is_bar())
            .map(|p| p.resolution)
    };
    let Some(finest) = fetched_bars().min_by_key(|r| r.duration_secs()) else {
        return;
    };
    for planned in plan.iter_mut() {
        if planned.resampled_from.is_none()
            && planned.resolution.is_bar()
            && finest.is_finer_than(&planned.resolution)
        {
            planned.resampled_from = Some(finest);
        }
    }
}

fn shift_for(kwargs: &DataKwargs, resolution: &Resolution) -> Result<Option<i64>, PipelineError> {
    for (key, minutes) in &kwargs.shifts {
        if &Resolution::parse(key)? == resolution {
            return Ok(Some(*minutes));
        }
    }
    Ok(None)
}
