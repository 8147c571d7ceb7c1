//! CLI definition and dispatch.

use chrono::{Local, NaiveDate};
use clap::{Args, Parser, Subcommand, ValueEnum};
use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::str::FromStr;
use tracing_subscriber::EnvFilter;

use crate::adapters::csv_adapter::CsvAdapter;
use crate::adapters::file_config_adapter::FileConfigAdapter;
use crate::adapters::json_report::JsonReport;
use crate::adapters::price_cache::PriceCache;
use crate::adapters::text_report::TextReport;
use crate::domain::allocation::discrete_allocation;
use crate::domain::backtest::{self as backtest_engine, BacktestConfig, Rebalance, equal_weights};
use crate::domain::config_validation::{
    validate_backtest_config, validate_optimizer_config, validate_resampling_config,
};
use crate::domain::error::PortoptError;
use crate::domain::estimate::{self, EstimatorConfig, ReturnsEstimate};
use crate::domain::holdings::{self, Holdings};
use crate::domain::metrics::PerformanceMetrics;
use crate::domain::optimizer::{
    OptimizationOutput, OptimizeRequest, Optimizer, OptimizerSettings, available_optimizers,
    optimizer_by_name,
};
use crate::domain::period::Period;
use crate::domain::price::PriceMatrix;
use crate::domain::result::OptimizationResult;
use crate::domain::solver::{Constraints, Objective};
use crate::domain::strategy::{self, Strategy};
use crate::domain::universe::{parse_tickers, validate_universe};
use crate::ports::config_port::ConfigPort;
use crate::ports::data_port::DataPort;
use crate::ports::report_port::{BacktestRun, NamedPortfolio, ReportPort};

const DEFAULT_DATA_DIR: &str = "data";

#[derive(Parser, Debug)]
#[command(name = "portopt", about = "Mean-variance portfolio optimizer")]
pub struct Cli {
    /// Debug logging (RUST_LOG takes precedence)
    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, ValueEnum)]
pub enum OutputFormat {
    #[default]
    Text,
    Json,
}

/// Options shared by every command that reads prices.
#[derive(Args, Debug, Clone)]
pub struct CommonArgs {
    /// INI configuration file
    #[arg(short, long)]
    pub config: Option<PathBuf>,
    /// Comma-separated tickers, overrides [universe] tickers
    #[arg(short, long)]
    pub tickers: Option<String>,
    /// Lookback period: 1mo, 3mo, 6mo, 1y, 2y, 5y, 10y or max
    #[arg(short, long, default_value = "2y")]
    pub period: String,
    /// Last date of the lookback window (YYYY-MM-DD), defaults to today
    #[arg(long)]
    pub as_of: Option<NaiveDate>,
    /// Directory holding <TICKER>.csv files, overrides [data] path
    #[arg(long)]
    pub data_dir: Option<PathBuf>,
    #[arg(short, long, value_enum, default_value_t = OutputFormat::Text)]
    pub format: OutputFormat,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Optimize a portfolio for a strategy or an explicit target
    Optimize {
        #[command(flatten)]
        common: CommonArgs,
        /// max_sharpe, min_volatility, conservative, moderate or aggressive
        #[arg(short, long, default_value = "max_sharpe")]
        strategy: String,
        /// Optimizer name (see list-optimizers)
        #[arg(short, long, default_value = "mean_variance")]
        optimizer: String,
        /// Annualized return to reach with minimum volatility
        #[arg(long, conflicts_with = "target_volatility")]
        target_return: Option<f64>,
        /// Annualized volatility to hold while maximizing return
        #[arg(long)]
        target_volatility: Option<f64>,
        /// Portfolio value to split into whole shares
        #[arg(long)]
        value: Option<f64>,
    },
    /// Compute the efficient frontier
    Frontier {
        #[command(flatten)]
        common: CommonArgs,
        #[arg(short, long, default_value = "mean_variance")]
        optimizer: String,
        /// Number of frontier points, overrides [optimizer] num_portfolios
        #[arg(long)]
        points: Option<usize>,
    },
    /// Risk and return of current holdings
    Analyze {
        #[command(flatten)]
        common: CommonArgs,
        /// JSON file: {"positions": {"AAPL": 10}, "cash": 500}
        #[arg(long)]
        holdings: PathBuf,
    },
    /// Trades that move current holdings onto a strategy
    Rebalance {
        #[command(flatten)]
        common: CommonArgs,
        #[arg(long)]
        holdings: PathBuf,
        #[arg(short, long, default_value = "max_sharpe")]
        strategy: String,
    },
    /// Backtest a strategy against an equal-weight portfolio
    Backtest {
        #[command(flatten)]
        common: CommonArgs,
        #[arg(short, long, default_value = "max_sharpe")]
        strategy: String,
        /// monthly, quarterly, yearly or none; overrides [backtest] rebalance
        #[arg(long)]
        rebalance: Option<String>,
        /// Starting value, overrides [backtest] initial_value
        #[arg(long)]
        initial_value: Option<f64>,
    },
    /// Compare every strategy side by side
    Compare {
        #[command(flatten)]
        common: CommonArgs,
    },
    /// List available optimizers
    ListOptimizers,
    /// List price files and their date ranges
    ListSymbols {
        #[arg(short, long)]
        config: Option<PathBuf>,
        #[arg(long)]
        data_dir: Option<PathBuf>,
    },
    /// Validate a configuration file
    Validate {
        #[arg(short, long)]
        config: PathBuf,
    },
}

pub fn init_tracing(verbose: bool) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        EnvFilter::new(if verbose { "portopt=debug" } else { "portopt=warn" })
    });
    // A subscriber may already be installed when run() is driven from tests.
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(io::stderr)
        .try_init();
}

pub fn run(cli: Cli) -> ExitCode {
    let result = match cli.command {
        Command::Optimize {
            common,
            strategy,
            optimizer,
            target_return,
            target_volatility,
            value,
        } => run_optimize(
            &common,
            &strategy,
            &optimizer,
            target_return,
            target_volatility,
            value,
        ),
        Command::Frontier {
            common,
            optimizer,
            points,
        } => run_frontier(&common, &optimizer, points),
        Command::Analyze { common, holdings } => run_analyze(&common, &holdings),
        Command::Rebalance {
            common,
            holdings,
            strategy,
        } => run_rebalance(&common, &holdings, &strategy),
        Command::Backtest {
            common,
            strategy,
            rebalance,
            initial_value,
        } => run_backtest(&common, &strategy, rebalance.as_deref(), initial_value),
        Command::Compare { common } => run_compare(&common),
        Command::ListOptimizers => run_list_optimizers(),
        Command::ListSymbols { config, data_dir } => {
            run_list_symbols(config.as_deref(), data_dir.as_deref())
        }
        Command::Validate { config } => run_validate(&config),
    };

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("error: {e}");
            (&e).into()
        }
    }
}

pub fn load_config(path: Option<&Path>) -> Result<FileConfigAdapter, PortoptError> {
    match path {
        Some(path) => {
            eprintln!("Loading config from {}", path.display());
            FileConfigAdapter::from_file(path)
        }
        None => FileConfigAdapter::from_string(""),
    }
}

fn parsed<T: FromStr<Err = PortoptError>>(
    config: &dyn ConfigPort,
    section: &str,
    key: &str,
) -> Result<Option<T>, PortoptError> {
    config
        .get_string(section, key)
        .map(|s| s.parse())
        .transpose()
}

/// Builds optimizer settings from `[optimizer]` and `[resampling]`,
/// falling back to defaults for absent keys.
pub fn build_settings(config: &dyn ConfigPort) -> Result<OptimizerSettings, PortoptError> {
    let defaults = OptimizerSettings::default();

    let estimator = EstimatorConfig {
        shrinkage_intensity: config.get_double(
            "optimizer",
            "shrinkage_intensity",
            defaults.estimator.shrinkage_intensity,
        ),
        shrinkage_target: parsed(config, "optimizer", "shrinkage_target")?
            .unwrap_or(defaults.estimator.shrinkage_target),
        return_kind: parsed(config, "optimizer", "returns")?
            .unwrap_or(defaults.estimator.return_kind),
        trading_days: config.get_int(
            "optimizer",
            "trading_days",
            defaults.estimator.trading_days as i64,
        ) as f64,
        return_shrinkage: config.get_double(
            "optimizer",
            "return_shrinkage",
            defaults.estimator.return_shrinkage,
        ),
        return_shrinkage_factor: config.get_double(
            "optimizer",
            "return_shrinkage_factor",
            defaults.estimator.return_shrinkage_factor,
        ),
    };
    estimator.validate()?;

    let constraints = Constraints::new(
        config.get_double("optimizer", "min_weight", defaults.constraints.min_weight),
        config.get_double("optimizer", "max_weight", defaults.constraints.max_weight),
    );

    let seed = match config.get_string("resampling", "seed") {
        Some(s) => s.trim().parse::<u64>().map_err(|_| PortoptError::ConfigInvalid {
            section: "resampling".into(),
            key: "seed".into(),
            reason: format!("'{}' is not a non-negative integer", s.trim()),
        })?,
        None => defaults.seed,
    };

    Ok(OptimizerSettings {
        estimator,
        constraints,
        risk_free_rate: config.get_double("optimizer", "risk_free_rate", defaults.risk_free_rate),
        num_portfolios: config
            .get_int("optimizer", "num_portfolios", defaults.num_portfolios as i64)
            .max(0) as usize,
        objective: None,
        num_simulations: config
            .get_int("resampling", "num_simulations", defaults.num_simulations as i64)
            .max(0) as usize,
        method: parsed(config, "resampling", "method")?.unwrap_or(defaults.method),
        noise_scale: config.get_double("resampling", "noise_scale", defaults.noise_scale),
        seed,
    })
}

pub fn build_backtest_config(config: &dyn ConfigPort) -> Result<BacktestConfig, PortoptError> {
    let defaults = BacktestConfig::default();
    Ok(BacktestConfig {
        initial_value: config.get_double("backtest", "initial_value", defaults.initial_value),
        rebalance: parsed::<Rebalance>(config, "backtest", "rebalance")?
            .unwrap_or(defaults.rebalance),
    })
}

/// Everything a price-reading command needs, resolved from flags and config.
struct Session {
    config: FileConfigAdapter,
    settings: OptimizerSettings,
    data: CsvAdapter,
    tickers: Vec<String>,
    period: Period,
    as_of: NaiveDate,
    report: Box<dyn ReportPort>,
    cache: PriceCache,
}

impl Session {
    fn open(common: &CommonArgs) -> Result<Self, PortoptError> {
        let config = load_config(common.config.as_deref())?;
        validate_optimizer_config(&config)?;
        validate_resampling_config(&config)?;
        validate_backtest_config(&config)?;
        let settings = build_settings(&config)?;

        let tickers = match &common.tickers {
            Some(list) => parse_tickers(list)?,
            None => {
                let list = config.get_list("universe", "tickers");
                if list.is_empty() {
                    Vec::new()
                } else {
                    parse_tickers(&list.join(","))?
                }
            }
        };

        let report: Box<dyn ReportPort> = match common.format {
            OutputFormat::Text => Box::new(TextReport),
            OutputFormat::Json => Box::new(JsonReport),
        };

        Ok(Self {
            data: CsvAdapter::new(data_dir(common.data_dir.as_deref(), &config)),
            settings,
            tickers,
            period: common.period.parse()?,
            as_of: common.as_of.unwrap_or_else(|| Local::now().date_naive()),
            report,
            cache: PriceCache::new(),
            config,
        })
    }

    /// Aligned prices for `tickers` over the session window. Tickers with
    /// too little history are dropped with a warning.
    fn prices(&mut self, tickers: &[String]) -> Result<PriceMatrix, PortoptError> {
        if tickers.is_empty() {
            return Err(PortoptError::invalid(
                "tickers",
                "no tickers given (use --tickers or [universe] tickers)",
            ));
        }
        let start = self.period.start_date(self.as_of);
        let as_of = self.as_of;
        eprintln!(
            "Loading {} tickers ({}, {} to {})",
            tickers.len(),
            self.period,
            start,
            as_of
        );
        let data = &self.data;
        let prices = self.cache.get_or_load(tickers, self.period, as_of, || {
            validate_universe(data, tickers.to_vec(), start, as_of).map(|v| v.series)
        })?;
        let (hits, misses) = self.cache.stats();
        tracing::debug!(hits, misses, "price cache");
        eprintln!(
            "  {} aligned observations, {} to {}",
            prices.observation_count(),
            prices.dates().first().map(|d| d.to_string()).unwrap_or_default(),
            prices.dates().last().map(|d| d.to_string()).unwrap_or_default(),
        );
        Ok(prices)
    }

    fn universe_prices(&mut self) -> Result<PriceMatrix, PortoptError> {
        let tickers = self.tickers.clone();
        self.prices(&tickers)
    }

    fn estimate(&self, prices: &PriceMatrix) -> Result<ReturnsEstimate, PortoptError> {
        estimate::estimate(prices, &self.settings.estimator)
    }

    fn optimize(
        &self,
        optimizer: &dyn Optimizer,
        prices: &PriceMatrix,
        settings: &OptimizerSettings,
    ) -> Result<OptimizationOutput, PortoptError> {
        optimizer.optimize(&OptimizeRequest {
            prices,
            period: self.period,
            settings,
        })
    }
}

fn data_dir(flag: Option<&Path>, config: &dyn ConfigPort) -> PathBuf {
    flag.map(Path::to_path_buf)
        .or_else(|| config.get_string("data", "path").map(PathBuf::from))
        .unwrap_or_else(|| PathBuf::from(DEFAULT_DATA_DIR))
}

fn read_holdings(path: &Path) -> Result<Holdings, PortoptError> {
    eprintln!("Loading holdings from {}", path.display());
    Holdings::from_json(&fs::read_to_string(path)?)
}

fn run_optimize(
    common: &CommonArgs,
    strategy: &str,
    optimizer: &str,
    target_return: Option<f64>,
    target_volatility: Option<f64>,
    value: Option<f64>,
) -> Result<(), PortoptError> {
    let mut session = Session::open(common)?;
    let strategy: Strategy = strategy.parse()?;
    let optimizer = optimizer_by_name(optimizer)?;
    let prices = session.universe_prices()?;

    let explicit = match (target_return, target_volatility) {
        (Some(r), _) => Some(Objective::TargetReturn(r)),
        (None, Some(v)) => Some(Objective::TargetVolatility(v)),
        (None, None) => None,
    };

    let solve = |objective: Objective| -> Result<OptimizationResult, PortoptError> {
        let settings = OptimizerSettings {
            objective: Some(objective),
            ..session.settings.clone()
        };
        match session.optimize(optimizer.as_ref(), &prices, &settings)? {
            OptimizationOutput::Portfolio(p) => Ok(p),
            OptimizationOutput::Frontier(f) => {
                strategy::select_from_frontier(&f, objective).cloned()
            }
        }
    };

    let (title, portfolio) = match explicit {
        Some(objective) => (objective.to_string(), solve(objective)?),
        None => (strategy.to_string(), strategy::solve_with_fallback(strategy, solve)?),
    };

    let mut out = io::stdout().lock();
    session.report.write_portfolio(
        &mut out,
        &format!("{title} ({})", optimizer.name()),
        &portfolio,
    )?;

    if let Some(total) = value {
        let allocation = discrete_allocation(&portfolio, &prices.latest_prices(), total)?;
        session.report.write_allocation(&mut out, &allocation)?;
    }
    out.flush()?;
    Ok(())
}

fn run_frontier(common: &CommonArgs, optimizer: &str, points: Option<usize>) -> Result<(), PortoptError> {
    let mut session = Session::open(common)?;
    let optimizer = optimizer_by_name(optimizer)?;
    let prices = session.universe_prices()?;

    let settings = OptimizerSettings {
        num_portfolios: points.unwrap_or(session.settings.num_portfolios),
        objective: None,
        ..session.settings.clone()
    };
    if optimizer.name() != "mean_variance" {
        eprintln!(
            "Running {} with {} simulations...",
            optimizer.name(),
            settings.num_simulations
        );
    }

    let mut out = io::stdout().lock();
    match session.optimize(optimizer.as_ref(), &prices, &settings)? {
        OptimizationOutput::Frontier(frontier) => session.report.write_frontier(&mut out, &frontier)?,
        OptimizationOutput::Portfolio(p) => session.report.write_portfolio(&mut out, optimizer.name(), &p)?,
    }
    out.flush()?;
    Ok(())
}

fn run_analyze(common: &CommonArgs, holdings_path: &Path) -> Result<(), PortoptError> {
    let mut session = Session::open(common)?;
    let holdings = read_holdings(holdings_path)?;
    let prices = session.prices(&holdings.tickers())?;
    let estimate = session.estimate(&prices)?;

    let analysis = holdings::analyze(
        &holdings,
        &estimate,
        &prices.latest_prices(),
        session.settings.risk_free_rate,
    )?;

    let mut out = io::stdout().lock();
    session.report.write_analysis(&mut out, &analysis)?;
    out.flush()?;
    Ok(())
}

fn run_rebalance(common: &CommonArgs, holdings_path: &Path, strategy: &str) -> Result<(), PortoptError> {
    let mut session = Session::open(common)?;
    let strategy: Strategy = strategy.parse()?;
    let holdings = read_holdings(holdings_path)?;

    let mut universe = session.tickers.clone();
    for ticker in holdings.tickers() {
        if !universe.contains(&ticker) {
            universe.push(ticker);
        }
    }

    let prices = session.prices(&universe)?;
    let estimate = session.estimate(&prices)?;
    let s = &session.settings;
    let target = strategy::run_strategy(&estimate, strategy, &s.constraints, s.risk_free_rate)?;
    eprintln!(
        "Target ({strategy}): return {:.2}%, volatility {:.2}%, sharpe {:.3}",
        target.expected_return * 100.0,
        target.volatility * 100.0,
        target.sharpe_ratio
    );

    let trades = holdings::rebalance_trades(&holdings, &target, &prices.latest_prices())?;
    let mut out = io::stdout().lock();
    session.report.write_trades(&mut out, &trades)?;
    out.flush()?;
    Ok(())
}

fn run_backtest(
    common: &CommonArgs,
    strategy: &str,
    rebalance: Option<&str>,
    initial_value: Option<f64>,
) -> Result<(), PortoptError> {
    let mut session = Session::open(common)?;
    let strategy: Strategy = strategy.parse()?;

    let mut bt_config = build_backtest_config(&session.config)?;
    if let Some(r) = rebalance {
        bt_config.rebalance = r.parse()?;
    }
    if let Some(v) = initial_value {
        bt_config.initial_value = v;
    }

    let prices = session.universe_prices()?;
    let estimate = session.estimate(&prices)?;
    let s = &session.settings;
    let target = strategy::run_strategy(&estimate, strategy, &s.constraints, s.risk_free_rate)?;

    eprintln!(
        "Running backtest: {} assets, {} observations, {} rebalancing",
        prices.asset_count(),
        prices.observation_count(),
        bt_config.rebalance
    );
    let optimized = backtest_engine::run_backtest(&prices, &target.weights, &bt_config)?;
    let equal = backtest_engine::run_backtest(&prices, &equal_weights(prices.asset_count()), &bt_config)?;

    let optimized_metrics = PerformanceMetrics::compute(&optimized.equity_curve, s.risk_free_rate);
    let equal_metrics = PerformanceMetrics::compute(&equal.equity_curve, s.risk_free_rate);

    let runs = [
        BacktestRun {
            name: strategy.to_string(),
            final_value: optimized.final_value().unwrap_or(bt_config.initial_value),
            rebalances: optimized.rebalances,
            metrics: &optimized_metrics,
            result: &optimized,
        },
        BacktestRun {
            name: "equal_weight".to_string(),
            final_value: equal.final_value().unwrap_or(bt_config.initial_value),
            rebalances: equal.rebalances,
            metrics: &equal_metrics,
            result: &equal,
        },
    ];

    let mut out = io::stdout().lock();
    session.report.write_backtest(&mut out, &runs)?;
    out.flush()?;
    Ok(())
}

fn run_compare(common: &CommonArgs) -> Result<(), PortoptError> {
    let mut session = Session::open(common)?;
    let prices = session.universe_prices()?;
    let estimate = session.estimate(&prices)?;
    let s = &session.settings;

    let portfolios = Strategy::ALL
        .iter()
        .map(|strategy| {
            strategy::run_strategy(&estimate, *strategy, &s.constraints, s.risk_free_rate)
                .map(|p| (strategy.to_string(), p))
        })
        .collect::<Result<Vec<_>, _>>()?;
    let named: Vec<NamedPortfolio<'_>> = portfolios
        .iter()
        .map(|(name, portfolio)| NamedPortfolio {
            name: name.clone(),
            portfolio,
        })
        .collect();

    let mut out = io::stdout().lock();
    session.report.write_comparison(&mut out, &named)?;
    out.flush()?;
    Ok(())
}

fn run_list_optimizers() -> Result<(), PortoptError> {
    for optimizer in available_optimizers() {
        println!("{:<24} {}", optimizer.name(), optimizer.description());
    }
    Ok(())
}

fn run_list_symbols(config_path: Option<&Path>, data_dir_flag: Option<&Path>) -> Result<(), PortoptError> {
    let config = load_config(config_path)?;
    let adapter = CsvAdapter::new(data_dir(data_dir_flag, &config));
    eprintln!("Price files in {}", adapter.base_path().display());

    for symbol in adapter.list_symbols()? {
        match adapter.get_data_range(&symbol) {
            Ok(Some((first, last, count))) => {
                println!("{symbol}: {count} prices, {first} to {last}");
            }
            Ok(None) => eprintln!("{symbol}: no data found"),
            Err(e) => eprintln!("error reading {symbol}: {e}"),
        }
    }
    Ok(())
}

fn run_validate(config_path: &Path) -> Result<(), PortoptError> {
    eprintln!("Validating config: {}", config_path.display());
    let config = FileConfigAdapter::from_file(config_path)?;

    validate_optimizer_config(&config)?;
    validate_resampling_config(&config)?;
    validate_backtest_config(&config)?;
    let settings = build_settings(&config)?;
    let backtest = build_backtest_config(&config)?;

    let tickers = config.get_list("universe", "tickers");
    if !tickers.is_empty() {
        let parsed = parse_tickers(&tickers.join(","))?;
        eprintln!("  Universe: {} tickers ({})", parsed.len(), parsed.join(", "));
    }
    eprintln!(
        "  Optimizer: risk-free {:.2}%, weights [{}, {}], {} frontier points",
        settings.risk_free_rate * 100.0,
        settings.constraints.min_weight,
        settings.constraints.max_weight,
        settings.num_portfolios
    );
    eprintln!(
        "  Resampling: {} {} simulations, noise {}, seed {}",
        settings.num_simulations, settings.method, settings.noise_scale, settings.seed
    );
    eprintln!(
        "  Backtest: {} rebalancing from {:.2}",
        backtest.rebalance, backtest.initial_value
    );
    println!("{} is valid", config_path.display());
    Ok(())
}
