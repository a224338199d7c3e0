//! CLI definition and dispatch.

use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use tracing::{debug, warn};

use crate::adapters::csv_adapter::{self, CsvAdapter};
use crate::adapters::csv_report_adapter::CsvReportAdapter;
use crate::adapters::file_config_adapter::FileConfigAdapter;
use crate::domain::backtest::{self as harness, AssetData, BacktestConfig, BacktestResult};
use crate::domain::condition::Condition;
use crate::domain::condition_eval::explain;
use crate::domain::config_validation::{
    parse_number_list, validate_calibrate_config, validate_engine_config, validate_strategy_config,
};
use crate::domain::error::TrendgateError;
use crate::domain::factor::FactorMap;
use crate::domain::ledger::{DEFAULT_LOT_EPSILON, PositionResult, compute_pnl};
use crate::domain::metrics::{CohortStats, Summary};
use crate::domain::strategy::Strategy;
use crate::domain::trend::{
    DirectionMultipliers, ScoreWeights, TrendConfig, TrendResult, confirm_trend,
};
use crate::ports::config_port::ConfigPort;
use crate::ports::data_port::DataPort;
use crate::ports::report_port::ReportPort;

const DEFAULT_SCORE_GRID: &str = "20,30,40,50";
const DEFAULT_CV_GRID: &str = "0.003,0.005,0.01";

#[derive(Parser, Debug)]
#[command(
    name = "trendgate",
    about = "Trend confirmation gate and FIFO position backtester"
)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Run the harness over the configured assets
    Backtest {
        #[arg(short, long)]
        config: PathBuf,
        #[arg(short, long)]
        output: Option<PathBuf>,
        #[arg(long)]
        asset: Option<String>,
        /// Override `[data] path`
        #[arg(long)]
        data: Option<PathBuf>,
    },
    /// Confirm a trend over a comma-separated price list
    Trend {
        #[arg(long, value_delimiter = ',', allow_hyphen_values = true, required = true)]
        prices: Vec<f64>,
        #[arg(long)]
        cv_threshold: Option<f64>,
        #[arg(long)]
        score_threshold: Option<f64>,
    },
    /// FIFO profit and loss for a fills CSV
    Pnl {
        #[arg(long)]
        fills: PathBuf,
        #[arg(long)]
        mark_price: Option<f64>,
        #[arg(long)]
        lot_epsilon: Option<f64>,
    },
    /// Evaluate a condition against `name=value` factors
    Eval {
        #[arg(long)]
        expr: String,
        #[arg(long = "factor", value_parser = parse_factor_arg, allow_hyphen_values = true)]
        factors: Vec<(String, f64)>,
    },
    /// Validate a configuration file
    Validate {
        #[arg(short, long)]
        config: PathBuf,
    },
    /// Sweep score and CV thresholds over the configured assets
    Calibrate {
        #[arg(short, long)]
        config: PathBuf,
        #[arg(long)]
        data: Option<PathBuf>,
    },
    /// List buy and sell signal points for one asset
    Signals {
        #[arg(short, long)]
        config: PathBuf,
        #[arg(long)]
        asset: String,
        #[arg(long)]
        data: Option<PathBuf>,
    },
}

pub fn run(cli: Cli) -> ExitCode {
    match cli.command {
        Command::Backtest {
            config,
            output,
            asset,
            data,
        } => run_backtest(&config, output.as_ref(), asset.as_deref(), data.as_ref()),
        Command::Trend {
            prices,
            cv_threshold,
            score_threshold,
        } => run_trend(&prices, cv_threshold, score_threshold),
        Command::Pnl {
            fills,
            mark_price,
            lot_epsilon,
        } => run_pnl(&fills, mark_price, lot_epsilon),
        Command::Eval { expr, factors } => run_eval(&expr, &factors),
        Command::Validate { config } => run_validate(&config),
        Command::Calibrate { config, data } => run_calibrate(&config, data.as_ref()),
        Command::Signals {
            config,
            asset,
            data,
        } => run_signals(&config, &asset, data.as_ref()),
    }
}

pub fn parse_factor_arg(raw: &str) -> Result<(String, f64), String> {
    let (name, value) = raw
        .split_once('=')
        .ok_or_else(|| format!("expected name=value, got '{raw}'"))?;
    let value: f64 = value
        .trim()
        .parse()
        .map_err(|e| format!("invalid value for {}: {e}", name.trim()))?;
    Ok((name.trim().to_string(), value))
}

fn fail(err: TrendgateError) -> ExitCode {
    eprintln!("error: {err}");
    ExitCode::from(&err)
}

pub fn load_config(path: &Path) -> Result<FileConfigAdapter, ExitCode> {
    FileConfigAdapter::from_file(path).map_err(fail)
}

pub fn build_backtest_config(adapter: &dyn ConfigPort) -> Result<BacktestConfig, TrendgateError> {
    validate_engine_config(adapter)?;

    let defaults = BacktestConfig::default();
    let weights = ScoreWeights::default();
    let multipliers = DirectionMultipliers::default();

    let window_size = adapter.get_int("engine", "window_size", defaults.window_size as i64);
    let window_size = usize::try_from(window_size)
        .ok()
        .filter(|w| *w > 0)
        .ok_or_else(|| TrendgateError::ConfigInvalid {
            section: "engine".into(),
            key: "window_size".into(),
            reason: "window_size must be at least 1".into(),
        })?;

    Ok(BacktestConfig {
        trend: TrendConfig {
            cv_threshold: adapter.get_double("engine", "cv_threshold", defaults.trend.cv_threshold),
            score_threshold: adapter.get_double(
                "engine",
                "score_threshold",
                defaults.trend.score_threshold,
            ),
            weights: ScoreWeights {
                slope: adapter.get_double("engine", "weight_slope", weights.slope),
                total_return: adapter.get_double("engine", "weight_return", weights.total_return),
                consistency: adapter.get_double(
                    "engine",
                    "weight_consistency",
                    weights.consistency,
                ),
                stability: adapter.get_double("engine", "weight_stability", weights.stability),
            },
            multipliers: DirectionMultipliers {
                rising: adapter.get_double("engine", "multiplier_rising", multipliers.rising),
                flat: adapter.get_double("engine", "multiplier_flat", multipliers.flat),
                falling: adapter.get_double("engine", "multiplier_falling", multipliers.falling),
            },
        },
        window_size,
        lot_epsilon: adapter.get_double("engine", "lot_epsilon", DEFAULT_LOT_EPSILON),
    })
}

fn parse_condition(key: &str, expr: &str) -> Result<Condition, TrendgateError> {
    Condition::parse(expr).map_err(|e| {
        eprintln!(
            "error: failed to parse {key}:\n{}",
            e.display_with_context(expr)
        );
        TrendgateError::ConditionParse(e)
    })
}

pub fn build_strategy(adapter: &dyn ConfigPort) -> Result<Strategy, TrendgateError> {
    let name = adapter
        .get_string("strategy", "name")
        .unwrap_or_else(|| "Unnamed".to_string());
    let description = adapter
        .get_string("strategy", "description")
        .unwrap_or_default();

    let buy_str = adapter
        .get_string("strategy", "buy_condition")
        .ok_or_else(|| TrendgateError::ConfigMissing {
            section: "strategy".into(),
            key: "buy_condition".into(),
        })?;
    let buy_condition = parse_condition("buy_condition", &buy_str)?;

    let sell_condition = match adapter
        .get_string("strategy", "sell_condition")
        .filter(|s| !s.trim().is_empty())
    {
        Some(s) => Some(parse_condition("sell_condition", &s)?),
        None => None,
    };

    Ok(Strategy {
        name,
        description,
        buy_condition,
        sell_condition,
    })
}

/// `--data` wins over `[data] path`.
pub fn resolve_data_path(
    data_override: Option<&PathBuf>,
    config: &dyn ConfigPort,
) -> Result<PathBuf, TrendgateError> {
    if let Some(p) = data_override {
        return Ok(p.clone());
    }
    config
        .get_string("data", "path")
        .filter(|p| !p.trim().is_empty())
        .map(|p| PathBuf::from(p.trim()))
        .ok_or_else(|| TrendgateError::ConfigMissing {
            section: "data".into(),
            key: "path".into(),
        })
}

/// `--asset` wins over `[data] assets`; with neither, every asset the data
/// port knows about.
pub fn resolve_assets(
    asset_override: Option<&str>,
    config: &dyn ConfigPort,
    data_port: &dyn DataPort,
) -> Result<Vec<String>, TrendgateError> {
    if let Some(a) = asset_override {
        return Ok(vec![a.trim().to_string()]);
    }

    let assets = config.get_list("data", "assets");
    if !assets.is_empty() {
        return Ok(assets);
    }

    data_port.list_assets()
}

/// Fetch every asset, skipping ones that fail or have no observations.
pub fn load_assets(data_port: &dyn DataPort, assets: &[String]) -> Vec<AssetData> {
    let mut loaded = Vec::with_capacity(assets.len());
    for asset in assets {
        match data_port.fetch_asset(asset) {
            Ok(data) if data.observations.is_empty() => {
                warn!(asset = %asset, "skipping asset with no observations");
            }
            Ok(data) => loaded.push(data),
            Err(e) => {
                warn!(asset = %asset, error = %e, "skipping asset");
            }
        }
    }
    loaded
}

struct RunContext {
    config: FileConfigAdapter,
    strategy: Strategy,
    bt_config: BacktestConfig,
    data_port: CsvAdapter,
}

fn load_run_context(config_path: &Path, data_override: Option<&PathBuf>) -> Result<RunContext, ExitCode> {
    eprintln!("Loading config from {}", config_path.display());
    let config = load_config(config_path)?;
    debug!(source = config.source(), "config loaded");

    let strategy = build_strategy(&config).map_err(fail)?;
    eprintln!("Loading strategy: {}", strategy.name);
    let bt_config = build_backtest_config(&config).map_err(fail)?;
    let data_path = resolve_data_path(data_override, &config).map_err(fail)?;

    Ok(RunContext {
        config,
        strategy,
        bt_config,
        data_port: CsvAdapter::new(data_path),
    })
}

fn run_backtest(
    config_path: &Path,
    output_path: Option<&PathBuf>,
    asset_override: Option<&str>,
    data_override: Option<&PathBuf>,
) -> ExitCode {
    let ctx = match load_run_context(config_path, data_override) {
        Ok(c) => c,
        Err(code) => return code,
    };

    let assets = match resolve_assets(asset_override, &ctx.config, &ctx.data_port) {
        Ok(a) => a,
        Err(e) => return fail(e),
    };

    let output = output_path
        .cloned()
        .or_else(|| ctx.config.get_string("report", "output").map(PathBuf::from));

    run_backtest_pipeline(
        &ctx.data_port,
        &ctx.strategy,
        &ctx.bt_config,
        &assets,
        output.as_deref(),
    )
}

pub fn run_backtest_pipeline(
    data_port: &dyn DataPort,
    strategy: &Strategy,
    bt_config: &BacktestConfig,
    assets: &[String],
    output_path: Option<&Path>,
) -> ExitCode {
    if assets.is_empty() {
        return fail(TrendgateError::NoAssets);
    }

    let data = load_assets(data_port, assets);
    if data.is_empty() {
        eprintln!("error: no assets with data to evaluate");
        return ExitCode::from(5);
    }

    eprintln!(
        "Running backtest: {} assets, window {}",
        data.len(),
        bt_config.window_size
    );
    let result = harness::run_backtest(&data, strategy, bt_config);

    print_asset_table(&result);
    print_summary(&result.summary);

    if let Some(path) = output_path {
        let path_str = path.to_string_lossy();
        if let Err(e) = CsvReportAdapter::new().write(&result, strategy, &path_str) {
            return fail(e);
        }
        eprintln!("\nReport written to: {}", path.display());
    }

    ExitCode::SUCCESS
}

fn print_asset_table(result: &BacktestResult) {
    eprintln!("\n=== Per-Asset Results ===");
    for r in &result.reports {
        let rejection = r
            .trend
            .rejection
            .map(|x| format!(" ({x})"))
            .unwrap_or_default();
        let ret = r
            .return_rate()
            .map(|x| format!("{x:+.2}%"))
            .unwrap_or_else(|| "-".to_string());
        eprintln!(
            "  {}:  score {:.1}{}, buy {}, {}, return {}",
            r.asset, r.trend.strength_score, rejection, r.buy_signal, r.outcome, ret
        );
    }
}

pub fn print_summary(s: &Summary) {
    eprintln!("\n=== Aggregate Results ===");
    eprintln!("Assets:           {}", s.assets);
    eprintln!("Confirmed:        {}", s.confirmed);
    eprintln!("Signalled:        {}", s.signalled);
    eprintln!("Traded:           {}", s.traded);
    eprintln!(
        "Won/Lost/Even:    {}/{}/{}",
        s.trades_won, s.trades_lost, s.trades_breakeven
    );
    eprintln!("Win Rate:         {:.1}%", s.win_rate * 100.0);
    eprintln!("Avg Return:       {:+.2}%", s.avg_return_rate);
    eprintln!("Max Return:       {:+.2}%", s.max_return_rate);
    eprintln!("Min Return:       {:+.2}%", s.min_return_rate);
    eprintln!("Total Spent:      {:.8}", s.total_spent);
    eprintln!("Total Received:   {:.8}", s.total_received);
    eprintln!("Realized PnL:     {:+.8}", s.total_realized_pnl);
    eprintln!("Aggregate Return: {:+.2}%", s.aggregate_return_rate);
    if let Some((asset, rate)) = &s.best_asset {
        eprintln!("Best:             {asset} ({rate:+.2}%)");
    }
    if let Some((asset, rate)) = &s.worst_asset {
        eprintln!("Worst:            {asset} ({rate:+.2}%)");
    }
    if let Some(hold) = s.avg_hold_time {
        eprintln!(
            "Avg Hold:         {:.2} hours",
            hold.num_seconds() as f64 / 3600.0
        );
    }

    let bucketed = s.buckets.total();
    if bucketed > 0 {
        eprintln!("\n=== Return Distribution ===");
        for (label, count) in s.buckets.labelled() {
            eprintln!(
                "  {:>8}: {} ({:.1}%)",
                label,
                count,
                count as f64 / bucketed as f64 * 100.0
            );
        }
    }

    eprintln!("\n=== Traded vs Untraded ===");
    print_cohort("Traded", &s.traded_cohort);
    print_cohort("Untraded", &s.untraded_cohort);

    if s.invalid_windows > 0 || s.ignored_fills > 0 || s.unconsumed_sells > 0 {
        eprintln!("\n=== Data Quality ===");
        eprintln!("Invalid windows:  {}", s.invalid_windows);
        eprintln!("Ignored fills:    {}", s.ignored_fills);
        eprintln!("Over-sold assets: {}", s.unconsumed_sells);
    }
}

fn print_cohort(label: &str, cohort: &CohortStats) {
    eprintln!("{label}: {} assets", cohort.assets);
    for (factor, stats) in cohort.factors() {
        match stats {
            Some(f) => {
                let quartiles = match (f.p25, f.p75) {
                    (Some(lo), Some(hi)) => format!(", p25 {lo:.2}, p75 {hi:.2}"),
                    _ => String::new(),
                };
                eprintln!(
                    "  {factor:<10} n={} mean {:.2}, median {:.2}, min {:.2}, max {:.2}{quartiles}",
                    f.count, f.mean, f.median, f.min, f.max
                );
            }
            None => eprintln!("  {factor:<10} n=0"),
        }
    }
}

fn run_trend(prices: &[f64], cv_threshold: Option<f64>, score_threshold: Option<f64>) -> ExitCode {
    let defaults = TrendConfig::default();
    let config = TrendConfig::with_thresholds(
        cv_threshold.unwrap_or(defaults.cv_threshold),
        score_threshold.unwrap_or(defaults.score_threshold),
    );
    let result = confirm_trend(prices, &config);
    print_trend(&result);
    ExitCode::SUCCESS
}

fn print_trend(t: &TrendResult) {
    println!("points:           {}", t.points);
    if t.invalid_points > 0 {
        println!("invalid points:   {}", t.invalid_points);
    }
    println!("cv:               {:.6}", t.coefficient_of_variation);
    println!("direction votes:  {}", t.direction_votes);
    println!("total return:     {:.4}%", t.total_return_percent);
    println!("rise ratio:       {:.4}", t.rise_ratio);
    println!("normalized slope: {:.6}%", t.normalized_slope);
    if let Some(b) = &t.breakdown {
        println!(
            "sub-scores:       slope {:.2}, return {:.2}, consistency {:.2}, stability {:.2}",
            b.slope_score, b.return_score, b.consistency_score, b.stability_score
        );
        println!(
            "raw score:        {:.4} x {:.1}",
            b.raw_score, b.multiplier
        );
    }
    println!("strength score:   {:.4}", t.strength_score);
    match t.rejection {
        None => println!("confirmed:        true"),
        Some(r) => println!("confirmed:        false ({r})"),
    }
}

fn run_pnl(fills_path: &Path, mark_price: Option<f64>, lot_epsilon: Option<f64>) -> ExitCode {
    let fills = match csv_adapter::read_fills(fills_path) {
        Ok(f) => f,
        Err(e) => return fail(e),
    };

    let epsilon = lot_epsilon.unwrap_or(DEFAULT_LOT_EPSILON);
    match compute_pnl(&fills, epsilon) {
        Some(p) => {
            print_position(&p, mark_price);
            ExitCode::SUCCESS
        }
        None => {
            eprintln!("error: no successful fills in {}", fills_path.display());
            ExitCode::from(5)
        }
    }
}

fn print_position(p: &PositionResult, mark_price: Option<f64>) {
    println!("status:           {}", p.status);
    println!("fills processed:  {}", p.processed_fills);
    if p.ignored_fills > 0 {
        println!("fills ignored:    {}", p.ignored_fills);
    }
    println!("total spent:      {:.8}", p.total_spent);
    println!("total received:   {:.8}", p.total_received);
    println!("realized pnl:     {:+.8}", p.total_realized_pnl);
    println!("net pnl at cost:  {:+.8}", p.net_pnl());
    println!("remaining amount: {:.8}", p.remaining_amount);
    println!("remaining cost:   {:.8}", p.remaining_cost);
    println!("return rate:      {:+.4}%", p.return_rate);
    if p.has_data_gap() {
        println!("unconsumed sell:  {:.8}", p.unconsumed_sell_amount);
    }
    for sell in &p.realized_sells {
        let held = sell
            .hold_duration()
            .map(|d| format!(", held {:.2}h", d.num_seconds() as f64 / 3600.0))
            .unwrap_or_default();
        println!(
            "  sell {}: {:.8} for {:.8}, pnl {:+.8} ({:+.2}%){held}",
            sell.timestamp.to_rfc3339(),
            sell.consumed,
            sell.proceeds,
            sell.pnl,
            sell.return_percent()
        );
    }
    for lot in &p.open_lots {
        println!(
            "  open lot: {:.8} @ {:.10} since {}",
            lot.amount,
            lot.unit_cost(),
            lot.opened_at.to_rfc3339()
        );
    }
    if let Some(mark) = mark_price {
        println!("unrealized pnl:   {:+.8} @ {}", p.unrealized_pnl(mark), mark);
    }
}

fn run_eval(expr: &str, factors: &[(String, f64)]) -> ExitCode {
    let condition = match parse_condition("expression", expr) {
        Ok(c) => c,
        Err(e) => return ExitCode::from(&e),
    };
    let map: FactorMap = factors.iter().map(|(k, v)| (k.as_str(), *v)).collect();

    for outcome in explain(&condition, &map) {
        let source = if outcome.present { "" } else { " (missing)" };
        println!(
            "  {:<40} actual {}{}  {}",
            outcome.comparison.to_string(),
            outcome.actual,
            source,
            if outcome.passed { "pass" } else { "fail" }
        );
    }
    println!("{}", condition.evaluate(&map));
    ExitCode::SUCCESS
}

pub fn run_validate(config_path: &Path) -> ExitCode {
    eprintln!("Validating config: {}", config_path.display());
    let config = match load_config(config_path) {
        Ok(c) => c,
        Err(code) => return code,
    };

    if let Err(e) = validate_engine_config(&config) {
        return fail(e);
    }
    if let Err(e) = validate_calibrate_config(&config) {
        return fail(e);
    }

    for key in ["buy_condition", "sell_condition"] {
        let Some(raw) = config.get_string("strategy", key) else {
            continue;
        };
        eprintln!("\n{key}:");
        match Condition::parse(&raw) {
            Ok(c) => {
                eprintln!("  Parsed:  {}", c);
                eprintln!("  Raw:     {}", raw);
                eprintln!("  Factors: {}", c.factors().join(", "));
            }
            Err(e) => {
                eprintln!("  error: {}", e.display_with_context(&raw));
                return ExitCode::from(&TrendgateError::from(e));
            }
        }
    }

    if let Err(e) = validate_strategy_config(&config) {
        return fail(e);
    }

    eprintln!("\nConfiguration is valid.");
    ExitCode::SUCCESS
}

fn run_calibrate(config_path: &Path, data_override: Option<&PathBuf>) -> ExitCode {
    let ctx = match load_run_context(config_path, data_override) {
        Ok(c) => c,
        Err(code) => return code,
    };
    if let Err(e) = validate_calibrate_config(&ctx.config) {
        return fail(e);
    }

    let grid = |key: &str, default: &str| {
        let raw = ctx
            .config
            .get_string("calibrate", key)
            .unwrap_or_else(|| default.to_string());
        parse_number_list(&raw).unwrap_or_default()
    };
    let score_thresholds = grid("score_thresholds", DEFAULT_SCORE_GRID);
    let cv_thresholds = grid("cv_thresholds", DEFAULT_CV_GRID);

    let assets = match resolve_assets(None, &ctx.config, &ctx.data_port) {
        Ok(a) => a,
        Err(e) => return fail(e),
    };
    let data = load_assets(&ctx.data_port, &assets);
    if data.is_empty() {
        eprintln!("error: no assets with data to evaluate");
        return ExitCode::from(5);
    }

    eprintln!(
        "Calibrating {} assets over {} x {} thresholds",
        data.len(),
        score_thresholds.len(),
        cv_thresholds.len()
    );
    let points = harness::calibrate(
        &data,
        &ctx.strategy,
        &ctx.bt_config,
        &score_thresholds,
        &cv_thresholds,
    );

    println!("score_threshold,cv_threshold,confirmed,signalled,traded,wins,win_rate,avg_return_rate");
    for p in &points {
        println!(
            "{},{},{},{},{},{},{:.4},{:.4}",
            p.score_threshold,
            p.cv_threshold,
            p.confirmed,
            p.signalled,
            p.traded,
            p.wins,
            p.win_rate,
            p.avg_return_rate
        );
    }
    ExitCode::SUCCESS
}

fn run_signals(config_path: &Path, asset: &str, data_override: Option<&PathBuf>) -> ExitCode {
    let ctx = match load_run_context(config_path, data_override) {
        Ok(c) => c,
        Err(code) => return code,
    };

    let observations = match ctx.data_port.fetch_observations(asset) {
        Ok(o) if o.is_empty() => {
            return fail(TrendgateError::NoData {
                asset: asset.to_string(),
            });
        }
        Ok(o) => o,
        Err(e) => return fail(e),
    };

    let signals = harness::scan_signals(&observations, &ctx.strategy, &ctx.bt_config);
    eprintln!(
        "{}: {} observations, {} signal points",
        asset,
        observations.len(),
        signals.len()
    );
    for s in &signals {
        println!(
            "{},{},{},{},{:.4}",
            s.index,
            s.timestamp.to_rfc3339(),
            s.kind,
            s.price,
            s.strength_score
        );
    }
    ExitCode::SUCCESS
}
