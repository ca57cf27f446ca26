//! Backtest file: pipeline settings plus the consumers and their data.
//!
//! ```toml
//! [pipeline]
//! mode = "event_driven"
//!
//! [strategy]
//! name = "trend"
//! params = { window = 20 }
//!
//! [[strategy.data]]
//! trading_venue = "BYBIT"
//! base_currency = "BTC"
//! quote_currency = "USDT"
//! product_type = "PERP"
//! resolutions = ["1m", "1h"]
//! backtest = { rollback_period = "1M" }
//!
//! [[models]]
//! name = "regime"
//! use_strategy_data = true
//! ```

use anyhow::{Context, Result};
use histweave_core::domain::DataDeclaration;
use histweave_core::{Configuration, PipelineSettings, Signature};
use serde::Deserialize;
use std::collections::BTreeMap;
use std::path::Path;

#[derive(Debug, Clone, Deserialize)]
pub struct ConsumerSpec {
    pub name: String,
    #[serde(default)]
    pub params: BTreeMap<String, serde_json::Value>,
    #[serde(default)]
    pub data: Vec<DataDeclaration>,
    /// Models only: reuse the strategy's data instead of fetching again.
    #[serde(default)]
    pub use_strategy_data: bool,
}

impl ConsumerSpec {
    pub fn signature(&self) -> Signature {
        Signature {
            name: self.name.clone(),
            params: self.params.clone(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct BacktestFile {
    pub pipeline: PipelineSettings,
    pub strategy: ConsumerSpec,
    pub models: Vec<ConsumerSpec>,
}

impl BacktestFile {
    /// Load `{dir}/{name}.toml`.
    pub fn load(config: &Configuration) -> Result<Self> {
        let pipeline = if config.has_section("pipeline") {
            config.section::<PipelineSettings>("pipeline")?
        } else {
            PipelineSettings::default()
        };
        let strategy = config.section::<ConsumerSpec>("strategy")?;
        let models = if config.has_section("models") {
            config.section::<Vec<ConsumerSpec>>("models")?
        } else {
            Vec::new()
        };
        Ok(Self {
            pipeline,
            strategy,
            models,
        })
    }

    /// Load a backtest file by path.
    pub fn from_file(path: &Path) -> Result<Self> {
        let dir = path.parent().unwrap_or_else(|| Path::new("."));
        let name = path
            .file_stem()
            .and_then(|s| s.to_str())
            .with_context(|| format!("invalid backtest file path {}", path.display()))?;
        let config = Configuration::new(dir, name)?;
        if !config.exists_and_not_empty(name) {
            anyhow::bail!("backtest file {} is missing or empty", path.display());
        }
        Self::load(&config)
    }
}
