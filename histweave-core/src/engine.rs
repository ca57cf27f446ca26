//! Backtest engine surface of the pipeline.
//!
//! The engine owns the feed registry and settings; consumers own their data.
//! `add_data` routes a declaration through `FetchAndAttach`, `prepare`
//! assembles a consumer's tables and, in event-driven mode, tags them for
//! the event loop.

use crate::config::{BacktestMode, PipelineSettings};
use crate::consumer::{Consumer, FetchAndAttach, Signature};
use crate::data::{preprocess, AssembledDataset, CanonicalAssembler, FeedRegistry};
use crate::domain::{DataDeclaration, DataRequest};
use crate::error::PipelineError;
use std::sync::Arc;

pub struct BacktestEngine {
    mode: BacktestMode,
    feeds: FeedRegistry,
    settings: PipelineSettings,
}

impl BacktestEngine {
    pub fn new(settings: PipelineSettings, feeds: FeedRegistry) -> Result<Self, PipelineError> {
        settings.validate()?;
        Ok(Self {
            mode: settings.mode,
            feeds,
            settings,
        })
    }

    /// Engine over the built-in HTTP feeds.
    pub fn with_default_feeds(settings: PipelineSettings) -> Result<Self, PipelineError> {
        let feeds = FeedRegistry::with_default_feeds()
            .map_err(|e| PipelineError::configuration(format!("cannot build feeds: {e}")))?;
        Self::new(settings, feeds)
    }

    pub fn mode(&self) -> BacktestMode {
        self.mode
    }

    pub fn settings(&self) -> &PipelineSettings {
        &self.settings
    }

    pub fn feeds(&self) -> &FeedRegistry {
        &self.feeds
    }

    pub fn strategy(&self, signature: Signature) -> Consumer {
        Consumer::strategy(signature).with_assembler(self.assembler())
    }

    pub fn model(&self, signature: Signature) -> Consumer {
        Consumer::model(signature).with_assembler(self.assembler())
    }

    fn assembler(&self) -> CanonicalAssembler {
        CanonicalAssembler::new(self.settings.index.clone())
    }

    pub fn add_data(
        &self,
        consumer: &mut Consumer,
        declaration: &DataDeclaration,
    ) -> Result<Vec<Arc<DataRequest>>, PipelineError> {
        FetchAndAttach::new(consumer, &self.feeds, &self.settings).add_data(declaration)
    }

    /// Assemble everything `consumer` has stored so far.
    ///
    /// Vectorized datasets are returned as assembled.
    pub fn prepare(&self, consumer: &mut Consumer) -> Result<AssembledDataset, PipelineError> {
        use crate::consumer::DataRegistrar;

        let dataset = consumer.assembler_mut().prepare()?;
        match self.mode {
            BacktestMode::EventDriven => preprocess(dataset),
            BacktestMode::Vectorized => Ok(dataset),
        }
    }
}
