//! histweave CLI: assemble canonical backtest datasets.
//!
//! Commands:
//! - `assemble`: fetch every declared dataset of a backtest file and write
//!   one Parquet file per consumer
//! - `init`: write a starter backtest file
//! - `feeds`: list supported data feeds and their resolutions
//! - `resolution`: show how a resolution string is interpreted

mod backtest_file;

use anyhow::{bail, Context, Result};
use backtest_file::BacktestFile;
use clap::{Parser, Subcommand, ValueEnum};
use histweave_core::data::{AssembledDataset, Compression};
use histweave_core::domain::Resolution;
use histweave_core::{BacktestEngine, BacktestMode, Configuration, Consumer};
use std::path::{Path, PathBuf};

#[derive(Parser)]
#[command(
    name = "histweave",
    about = "histweave: historical market-data assembly for backtests"
)]
struct Cli {
    /// Log at debug level (RUST_LOG takes precedence).
    #[arg(short, long, global = true, default_value_t = false)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Clone, Copy, ValueEnum)]
enum ModeArg {
    Vectorized,
    EventDriven,
}

impl From<ModeArg> for BacktestMode {
    fn from(mode: ModeArg) -> Self {
        match mode {
            ModeArg::Vectorized => BacktestMode::Vectorized,
            ModeArg::EventDriven => BacktestMode::EventDriven,
        }
    }
}

#[derive(Subcommand)]
enum Commands {
    /// Fetch and assemble the datasets declared in a backtest file.
    Assemble {
        /// Path to a backtest TOML file.
        #[arg(long, conflicts_with_all = ["config_dir", "config_name"])]
        file: Option<PathBuf>,

        /// Config directory holding `{config_name}.toml`.
        #[arg(long)]
        config_dir: Option<PathBuf>,

        /// Config name inside --config-dir.
        #[arg(long, default_value = "backtest")]
        config_name: String,

        /// Override the backtest mode from the file.
        #[arg(long, value_enum)]
        mode: Option<ModeArg>,

        /// Override the output Parquet path for the strategy dataset.
        #[arg(long)]
        output: Option<PathBuf>,

        /// Override the Parquet compression (zstd, snappy, lz4, gzip, brotli, none).
        #[arg(long)]
        compression: Option<String>,
    },
    /// Write a starter backtest file.
    Init {
        /// Config directory to write into.
        #[arg(long, default_value = "configs")]
        config_dir: PathBuf,

        /// Config name (file stem).
        #[arg(long, default_value = "backtest")]
        config_name: String,

        /// Overwrite an existing, non-empty file.
        #[arg(long, default_value_t = false)]
        force: bool,
    },
    /// List supported data feeds.
    Feeds,
    /// Show how a resolution string is interpreted.
    Resolution {
        /// e.g. 1m, 4h, 1d, 1q_L2, 1t
        value: String,
    },
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    let default_level = if cli.verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default_level)),
        )
        .with_writer(std::io::stderr)
        .init();

    match cli.command {
        Commands::Assemble {
            file,
            config_dir,
            config_name,
            mode,
            output,
            compression,
        } => run_assemble(file, config_dir, config_name, mode, output, compression),
        Commands::Init {
            config_dir,
            config_name,
            force,
        } => run_init(&config_dir, &config_name, force),
        Commands::Feeds => run_feeds(),
        Commands::Resolution { value } => run_resolution(&value),
    }
}

fn run_assemble(
    file: Option<PathBuf>,
    config_dir: Option<PathBuf>,
    config_name: String,
    mode: Option<ModeArg>,
    output: Option<PathBuf>,
    compression: Option<String>,
) -> Result<()> {
    let mut backtest = match (file, config_dir) {
        (Some(path), _) => BacktestFile::from_file(&path)?,
        (None, Some(dir)) => BacktestFile::load(&Configuration::new(dir, &config_name)?)?,
        (None, None) => bail!("one of --file or --config-dir is required"),
    };
    if let Some(mode) = mode {
        backtest.pipeline.mode = mode.into();
    }
    if let Some(path) = output {
        backtest.pipeline.output.path = path;
    }
    if let Some(compression) = compression {
        backtest.pipeline.output.compression = compression.parse::<Compression>()?;
    }

    let output_path = backtest.pipeline.output.path.clone();
    let compression = backtest.pipeline.output.compression;
    let engine = BacktestEngine::with_default_feeds(backtest.pipeline.clone())?;
    tracing::info!(
        mode = ?engine.mode(),
        strategy = %backtest.strategy.name,
        models = backtest.models.len(),
        "assembling datasets"
    );

    let mut strategy = engine.strategy(backtest.strategy.signature());
    for declaration in &backtest.strategy.data {
        engine
            .add_data(&mut strategy, declaration)
            .with_context(|| format!("strategy '{}'", strategy.name()))?;
    }

    // Models share before the strategy's store is drained by prepare.
    let mut models = Vec::with_capacity(backtest.models.len());
    for spec in &backtest.models {
        let mut model = engine.model(spec.signature());
        if spec.use_strategy_data {
            model.add_consumer_datas(&strategy);
        }
        for declaration in &spec.data {
            engine
                .add_data(&mut model, declaration)
                .with_context(|| format!("model '{}'", model.name()))?;
        }
        models.push(model);
    }

    let dataset = engine.prepare(&mut strategy)?;
    write_dataset(&strategy, &dataset, &output_path, compression)?;

    for mut model in models {
        let dataset = engine.prepare(&mut model)?;
        let path = model_output_path(&output_path, model.name());
        write_dataset(&model, &dataset, &path, compression)?;
    }

    Ok(())
}

fn model_output_path(strategy_path: &Path, model: &str) -> PathBuf {
    let stem = strategy_path
        .file_stem()
        .and_then(|s| s.to_str())
        .unwrap_or("dataset");
    strategy_path.with_file_name(format!("{stem}.{model}.parquet"))
}

fn write_dataset(
    consumer: &Consumer,
    dataset: &AssembledDataset,
    path: &Path,
    compression: Compression,
) -> Result<()> {
    dataset.write_parquet(path, compression)?;
    println!(
        "{:<16} {:>10} rows  {:>3} cols  {}  -> {}",
        consumer.name(),
        dataset.height(),
        dataset.column_names().len(),
        &consumer.fingerprint().0[..12],
        path.display()
    );
    Ok(())
}

const STARTER: &str = r#"
[pipeline]
mode = "event_driven"
rollback_period = "1w"

[pipeline.rate_limits]
YAHOO_FINANCE = 3000

[pipeline.output]
path = "data/trend.parquet"
compression = "zstd"

[strategy]
name = "trend"
params = { window = 20 }

[[strategy.data]]
trading_venue = "BYBIT"
base_currency = "BTC"
quote_currency = "USDT"
product_type = "PERP"
resolutions = ["1m", "5m"]
resamples = { "5m" = "1m" }
backtest = { rollback_period = "3d" }

[[strategy.data]]
trading_venue = "IB"
base_currency = "AAPL"
quote_currency = "USD"
product_type = "STK"
resolution = "1h"
backtest = { data_source = "YAHOO_FINANCE", rollback_period = "1M" }

[[models]]
name = "regime"
use_strategy_data = true
"#;

fn run_init(config_dir: &Path, config_name: &str, force: bool) -> Result<()> {
    let config = Configuration::new(config_dir, config_name)?;
    if config.exists_and_not_empty(config_name) && !force {
        bail!(
            "{}/{config_name}.toml already exists (use --force to overwrite)",
            config_dir.display()
        );
    }
    let table: toml::Table = STARTER.parse()?;
    config.write_config(config_name, &table)?;
    println!("Wrote {}/{config_name}.toml", config_dir.display());
    Ok(())
}

fn run_feeds() -> Result<()> {
    let engine = BacktestEngine::with_default_feeds(Default::default())?;
    let feeds = engine.feeds();
    for id in feeds.identifiers() {
        let feed = feeds.select_feed(id)?;
        let limit = engine
            .settings()
            .rate_limit(id)
            .map(|d| format!("{}ms between calls", d.as_millis()))
            .unwrap_or_else(|| "no rate limit".into());
        println!("{id}  ({limit})");
        if let Some(table) = feed.supported_timeframes_and_periods() {
            for (resolution, period) in table {
                println!("  {resolution:<6} up to {period}");
            }
        }
    }
    Ok(())
}

fn run_resolution(value: &str) -> Result<()> {
    let resolution = Resolution::parse(value)?;
    println!("canonical:  {resolution}");
    println!("timeframe:  {:?}", resolution.timeframe());
    println!("period:     {}", resolution.period());
    if let Some(level) = resolution.orderbook_level() {
        println!("book level: L{level}");
    }
    match resolution.duration_secs() {
        Some(secs) => println!("bar length: {secs}s"),
        None => println!("bar length: n/a (not time-based)"),
    }
    println!(
        "flags:      quote={} tick={} bar={}",
        resolution.is_quote(),
        resolution.is_tick(),
        resolution.is_bar()
    );
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cli_parses_assemble() {
        let cli = Cli::try_parse_from([
            "histweave",
            "-v",
            "assemble",
            "--file",
            "configs/backtest.toml",
            "--mode",
            "vectorized",
        ])
        .unwrap();
        assert!(cli.verbose);
        match cli.command {
            Commands::Assemble { file, mode, .. } => {
                assert_eq!(file, Some(PathBuf::from("configs/backtest.toml")));
                assert!(matches!(mode, Some(ModeArg::Vectorized)));
            }
            _ => panic!("expected assemble"),
        }
    }

    #[test]
    fn file_conflicts_with_config_dir() {
        let parsed = Cli::try_parse_from([
            "histweave",
            "assemble",
            "--file",
            "a.toml",
            "--config-dir",
            "configs",
        ]);
        assert!(parsed.is_err());
    }

    #[test]
    fn model_outputs_sit_next_to_strategy_output() {
        let path = model_output_path(Path::new("data/trend.parquet"), "regime");
        assert_eq!(path, PathBuf::from("data/trend.regime.parquet"));
    }

    #[test]
    fn starter_file_round_trips() {
        let dir = tempfile::tempdir().unwrap();
        run_init(dir.path(), "backtest", false).unwrap();
        assert!(run_init(dir.path(), "backtest", false).is_err());

        let file = BacktestFile::from_file(&dir.path().join("backtest.toml")).unwrap();
        assert_eq!(file.strategy.data.len(), 2);
        assert_eq!(file.models.len(), 1);
        assert!(file.models[0].use_strategy_data);
    }
}
