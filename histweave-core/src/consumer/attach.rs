use super::DataRegistrar;
use crate::config::PipelineSettings;
use crate::data::fetch::{check_reserved_kwargs, fetch_all};
use crate::data::{kwargs, FeedRegistry};
use crate::domain::{DataDeclaration, DataRequest};
use crate::error::PipelineError;
use std::sync::Arc;

/// Decorates a registrar's `register_data` with fetching.
///
/// Per declaration: resolve and select the feed and adapt kwargs (only when
/// a backtest window is declared), register the requests and record the
/// signature, then fetch, canonicalize and store each table in the
/// registrar's assembler. A declaration rejected before registration leaves
/// no signature behind. Train periods travel on the requests.
pub struct FetchAndAttach<'a, R: DataRegistrar> {
    inner: &'a mut R,
    feeds: &'a FeedRegistry,
    settings: &'a PipelineSettings,
}

impl<'a, R: DataRegistrar> FetchAndAttach<'a, R> {
    pub fn new(inner: &'a mut R, feeds: &'a FeedRegistry, settings: &'a PipelineSettings) -> Self {
        Self {
            inner,
            feeds,
            settings,
        }
    }

    pub fn add_data(
        &mut self,
        declaration: &DataDeclaration,
    ) -> Result<Vec<Arc<DataRequest>>, PipelineError> {
        check_reserved_kwargs(&declaration.kwargs)?;

        let Some(window) = &declaration.backtest else {
            let requests = self.inner.register_data(declaration, &declaration.kwargs)?;
            self.inner.record_signature(declaration);
            return Ok(requests);
        };

        let data_source = self
            .feeds
            .resolve_data_source(&declaration.trading_venue, window)?;
        let feed = self.feeds.select_feed(&data_source)?;
        let adapted = kwargs::adapt(feed.as_ref(), self.settings.mode, declaration.kwargs.clone())?;

        let requests = self.inner.register_data(declaration, &adapted)?;
        self.inner.record_signature(declaration);
        let tables = fetch_all(feed.as_ref(), &requests, &adapted, window, self.settings)?;
        let assembler = self.inner.assembler_mut();
        for (request, table) in tables {
            assembler.insert(request, Arc::new(table));
        }
        tracing::info!(
            data_source = %data_source,
            venue = %declaration.trading_venue,
            requests = requests.len(),
            stored = assembler.len(),
            "attached data"
        );
        Ok(requests)
    }
}
