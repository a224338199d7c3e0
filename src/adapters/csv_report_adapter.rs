//! CSV report adapter implementing ReportPort.
//!
//! One row per asset, in report order.

use crate::domain::backtest::{AssetReport, BacktestResult};
use crate::domain::error::TrendgateError;
use crate::domain::strategy::Strategy;
use crate::ports::report_port::ReportPort;
use std::io::Write;
use tracing::info;

pub const REPORT_COLUMNS: &[&str] = &[
    "strategy",
    "asset",
    "points",
    "invalid_points",
    "coefficient_of_variation",
    "direction_votes",
    "strength_score",
    "total_return_percent",
    "rise_ratio",
    "normalized_slope",
    "confirmed",
    "rejection",
    "buy_signal",
    "sell_signal",
    "outcome",
    "status",
    "total_spent",
    "total_received",
    "realized_pnl",
    "remaining_amount",
    "remaining_cost",
    "return_rate",
    "unconsumed_sell_amount",
];

#[derive(Debug, Default)]
pub struct CsvReportAdapter;

impl CsvReportAdapter {
    pub fn new() -> Self {
        Self
    }

    /// Write the report to any sink.
    pub fn write_to<W: Write>(
        &self,
        sink: W,
        result: &BacktestResult,
        strategy: &Strategy,
    ) -> Result<(), TrendgateError> {
        let mut wtr = csv::Writer::from_writer(sink);
        wtr.write_record(REPORT_COLUMNS)?;
        for report in &result.reports {
            wtr.write_record(report_row(report, &strategy.name))?;
        }
        wtr.flush()?;
        Ok(())
    }
}

fn report_row(report: &AssetReport, strategy: &str) -> Vec<String> {
    let trend = &report.trend;
    let mut row = vec![
        strategy.to_string(),
        report.asset.clone(),
        trend.points.to_string(),
        trend.invalid_points.to_string(),
        format!("{:.6}", trend.coefficient_of_variation),
        trend.direction_votes.to_string(),
        format!("{:.4}", trend.strength_score),
        format!("{:.4}", trend.total_return_percent),
        format!("{:.4}", trend.rise_ratio),
        format!("{:.6}", trend.normalized_slope),
        trend.confirmed.to_string(),
        trend.rejection.map(|r| r.to_string()).unwrap_or_default(),
        report.buy_signal.to_string(),
        report.sell_signal.map(|s| s.to_string()).unwrap_or_default(),
        report.outcome.to_string(),
    ];

    match &report.position {
        Some(p) => row.extend([
            p.status.to_string(),
            format!("{:.8}", p.total_spent),
            format!("{:.8}", p.total_received),
            format!("{:.8}", p.total_realized_pnl),
            format!("{:.8}", p.remaining_amount),
            format!("{:.8}", p.remaining_cost),
            format!("{:.4}", p.return_rate),
            format!("{:.8}", p.unconsumed_sell_amount),
        ]),
        None => row.extend(std::iter::repeat_n(String::new(), 8)),
    }

    row
}

impl ReportPort for CsvReportAdapter {
    fn write(
        &self,
        result: &BacktestResult,
        strategy: &Strategy,
        output_path: &str,
    ) -> Result<(), TrendgateError> {
        let file = std::fs::File::create(output_path)?;
        self.write_to(file, result, strategy)?;
        info!(path = output_path, rows = result.reports.len(), "report written");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::backtest::{AssetData, BacktestConfig, run_backtest};
    use crate::domain::fill::Fill;
    use crate::domain::observation::Observation;
    use chrono::{DateTime, TimeZone, Utc};
    use tempfile::TempDir;

    fn ts(minute: i64) -> DateTime<Utc> {
        Utc.timestamp_opt(1_700_000_000 + minute * 60, 0).unwrap()
    }

    fn sample() -> (BacktestResult, Strategy) {
        let obs: Vec<Observation> = [1.0, 1.0, 1.0, 1.05, 1.10]
            .iter()
            .enumerate()
            .map(|(i, p)| Observation::new(ts(i as i64), *p))
            .collect();
        let assets = vec![
            AssetData::new(
                "ALPHA",
                obs.clone(),
                vec![Fill::buy(ts(5), 10.0, 100.0), Fill::sell(ts(9), 100.0, 12.0)],
            ),
            AssetData::new("BETA", obs, vec![]),
        ];
        let strategy = Strategy::from_expressions("Trend gate", "trend_confirmed == 1", None).unwrap();
        let result = run_backtest(&assets, &strategy, &BacktestConfig::default());
        (result, strategy)
    }

    #[test]
    fn writes_header_and_one_row_per_asset() {
        let (result, strategy) = sample();
        let mut buf = Vec::new();
        CsvReportAdapter::new()
            .write_to(&mut buf, &result, &strategy)
            .unwrap();
        let text = String::from_utf8(buf).unwrap();
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines.len(), 3);
        assert!(lines[0].starts_with("strategy,asset,points"));
        assert!(lines[1].starts_with("Trend gate,ALPHA,5,0,"));
        assert!(lines[1].contains(",profitable,exited,"));
        assert!(lines[2].contains(",signal_not_traded,"));
    }

    #[test]
    fn rows_have_a_cell_per_column() {
        let (result, strategy) = sample();
        let mut buf = Vec::new();
        CsvReportAdapter::new()
            .write_to(&mut buf, &result, &strategy)
            .unwrap();
        let mut rdr = csv::Reader::from_reader(buf.as_slice());
        for record in rdr.records() {
            assert_eq!(record.unwrap().len(), REPORT_COLUMNS.len());
        }
    }

    #[test]
    fn write_creates_file() {
        let (result, strategy) = sample();
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("report.csv");
        CsvReportAdapter::new()
            .write(&result, &strategy, path.to_str().unwrap())
            .unwrap();
        let content = std::fs::read_to_string(&path).unwrap();
        assert!(content.contains("ALPHA"));
        assert!(content.contains("BETA"));
    }

    #[test]
    fn write_to_missing_directory_fails() {
        let (result, strategy) = sample();
        let err = CsvReportAdapter::new()
            .write(&result, &strategy, "/nonexistent/dir/report.csv")
            .unwrap_err();
        assert!(matches!(err, TrendgateError::Io(_)));
    }
}
