//! Configuration: a TOML config-directory loader, layered per-product
//! overrides, and the pipeline settings built on top of them.

use crate::data::parquet::Compression;
use crate::data::provider::TableForm;
use crate::data::schema::DEFAULT_INDEX;
use crate::domain::DEFAULT_ROLLBACK_PERIOD;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse config {path}: {message}")]
    Parse { path: PathBuf, message: String },

    #[error("could not find section '{section}' in config '{config}'")]
    MissingSection { section: String, config: String },

    #[error("invalid section '{section}': {message}")]
    Invalid { section: String, message: String },

    #[error("failed to write config {path}: {message}")]
    Write { path: PathBuf, message: String },
}

/// Backtest execution regime.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BacktestMode {
    /// Whole history at once.
    Vectorized,
    /// Row-by-row replay through the event loop.
    #[default]
    EventDriven,
}

/// Named TOML configs under one directory: `{config_path}/{name}.toml`.
#[derive(Debug, Clone)]
pub struct Configuration {
    config_path: PathBuf,
    config_name: String,
    configs: Vec<toml::Table>,
}

impl Configuration {
    pub fn new(config_path: impl Into<PathBuf>, config_name: &str) -> Result<Self, ConfigError> {
        let mut config = Self {
            config_path: config_path.into(),
            config_name: config_name.to_string(),
            configs: Vec::new(),
        };
        config.reload()?;
        Ok(config)
    }

    pub fn reload(&mut self) -> Result<(), ConfigError> {
        self.configs = self.read_config(&self.config_name)?;
        Ok(())
    }

    pub fn config_path(&self) -> &Path {
        &self.config_path
    }

    fn file_path(&self, config_name: &str) -> PathBuf {
        self.config_path.join(format!("{config_name}.toml"))
    }

    /// Config blocks of `{config_name}.toml`. A missing file yields no blocks.
    pub fn read_config(&self, config_name: &str) -> Result<Vec<toml::Table>, ConfigError> {
        let path = self.file_path(config_name);
        if !path.exists() {
            tracing::warn!(path = %path.display(), "cannot find config");
            return Ok(Vec::new());
        }
        let content = fs::read_to_string(&path).map_err(|source| ConfigError::Read {
            path: path.clone(),
            source,
        })?;
        let table = content
            .parse::<toml::Table>()
            .map_err(|e| ConfigError::Parse {
                path,
                message: e.to_string(),
            })?;
        Ok(vec![table])
    }

    pub fn write_config(&self, config_name: &str, content: &toml::Table) -> Result<(), ConfigError> {
        let path = self.file_path(config_name);
        let body = toml::to_string_pretty(content).map_err(|e| ConfigError::Write {
            path: path.clone(),
            message: e.to_string(),
        })?;
        fs::create_dir_all(&self.config_path).map_err(|e| ConfigError::Write {
            path: path.clone(),
            message: e.to_string(),
        })?;
        fs::write(&path, body).map_err(|e| ConfigError::Write {
            path,
            message: e.to_string(),
        })
    }

    /// First block that defines `section`.
    pub fn load_config_section(&self, section: &str) -> Result<&toml::Value, ConfigError> {
        self.configs
            .iter()
            .find_map(|block| block.get(section))
            .ok_or_else(|| ConfigError::MissingSection {
                section: section.to_string(),
                config: self.config_name.clone(),
            })
    }

    /// Deserialize a section into `T`.
    pub fn section<T: DeserializeOwned>(&self, section: &str) -> Result<T, ConfigError> {
        self.load_config_section(section)?
            .clone()
            .try_into()
            .map_err(|e: toml::de::Error| ConfigError::Invalid {
                section: section.to_string(),
                message: e.to_string(),
            })
    }

    pub fn has_section(&self, section: &str) -> bool {
        self.configs.iter().any(|block| block.contains_key(section))
    }

    pub fn exists_and_not_empty(&self, config_name: &str) -> bool {
        fs::metadata(self.file_path(config_name))
            .map(|m| m.len() > 0)
            .unwrap_or(false)
    }
}

/// Per-product-type and per-product overrides of a value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Overrides<T> {
    #[serde(default = "BTreeMap::new")]
    pub ptypes: BTreeMap<String, T>,
    #[serde(default = "BTreeMap::new")]
    pub pdts: BTreeMap<String, T>,
}

impl<T> Default for Overrides<T> {
    fn default() -> Self {
        Self {
            ptypes: BTreeMap::new(),
            pdts: BTreeMap::new(),
        }
    }
}

/// A default value with explicit exceptions.
///
/// Lookup order: product (`pdt`) override, then product-type override, then
/// the default. Accepts either a bare value or `{ all, except }` in TOML.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(
    from = "LayeredRepr<T>",
    bound(deserialize = "T: Deserialize<'de>")
)]
pub struct Layered<T> {
    pub all: T,
    #[serde(default)]
    pub except: Overrides<T>,
}

#[derive(Deserialize)]
#[serde(untagged)]
enum LayeredRepr<T> {
    Full {
        all: T,
        #[serde(default = "Overrides::default")]
        except: Overrides<T>,
    },
    Plain(T),
}

impl<T> From<LayeredRepr<T>> for Layered<T> {
    fn from(repr: LayeredRepr<T>) -> Self {
        match repr {
            LayeredRepr::Full { all, except } => Self { all, except },
            LayeredRepr::Plain(all) => Self::new(all),
        }
    }
}

impl<T> Layered<T> {
    pub fn new(all: T) -> Self {
        Self {
            all,
            except: Overrides::default(),
        }
    }

    pub fn resolve(&self, product_type: &str, pdt: &str) -> &T {
        self.except
            .pdts
            .get(pdt)
            .or_else(|| self.except.ptypes.get(product_type))
            .unwrap_or(&self.all)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct OutputSettings {
    pub path: PathBuf,
    pub compression: Compression,
}

impl Default for OutputSettings {
    fn default() -> Self {
        Self {
            path: PathBuf::from("dataset.parquet"),
            compression: Compression::Zstd,
        }
    }
}

/// Settings of one assembly run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineSettings {
    pub mode: BacktestMode,
    /// Composite index of the canonical table, in sort priority order.
    pub index: Vec<String>,
    /// Feed name → minimum milliseconds between consecutive calls.
    pub rate_limits: BTreeMap<String, u64>,
    /// Lookback used when a fetch window declares neither dates nor a period.
    pub rollback_period: Layered<String>,
    /// Form feeds are asked to return: `eager` frames or `lazy` plans.
    pub table_form: TableForm,
    pub output: OutputSettings,
}

impl Default for PipelineSettings {
    fn default() -> Self {
        Self {
            mode: BacktestMode::default(),
            index: DEFAULT_INDEX.iter().map(|c| c.to_string()).collect(),
            rate_limits: BTreeMap::from([("YAHOO_FINANCE".to_string(), 3_000)]),
            rollback_period: Layered::new(DEFAULT_ROLLBACK_PERIOD.to_string()),
            table_form: TableForm::default(),
            output: OutputSettings::default(),
        }
    }
}

impl PipelineSettings {
    pub fn from_toml(content: &str) -> Result<Self, ConfigError> {
        toml::from_str(content).map_err(|e| ConfigError::Parse {
            path: PathBuf::from("<inline>"),
            message: e.to_string(),
        })
    }

    /// Pause between consecutive calls to `feed`, if it is rate limited.
    pub fn rate_limit(&self, feed: &str) -> Option<Duration> {
        self.rate_limits
            .get(&feed.to_uppercase())
            .filter(|ms| **ms > 0)
            .map(|ms| Duration::from_millis(*ms))
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.index.is_empty() {
            return Err(ConfigError::Invalid {
                section: "index".into(),
                message: "at least one index column is required".into(),
            });
        }
        Ok(())
    }
}
