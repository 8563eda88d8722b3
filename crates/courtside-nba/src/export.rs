// Mart exports: versioned CSV datasets for BI consumption plus a JSON summary.

use std::collections::BTreeMap;

use anyhow::{Context, Result};
use chrono::{Months, NaiveDateTime};
use courtside_core::snapshot::SnapshotDir;
use serde::Serialize;
use tracing::info;

use crate::warehouse::{ScoreDiff, Warehouse};

pub const TEAM_WIN_RATES: &str = "team_win_rates";
pub const ELO_TRENDS: &str = "elo_trends";
pub const POINT_DIFF_BY_SEASON: &str = "point_diff_by_season";
pub const SUMMARY_NAME: &str = "export_summary";

const TEAM_WIN_RATES_HEADER: [&str; 6] = [
    "team_name", "season", "games_played", "wins", "win_rate", "avg_point_diff",
];
const ELO_TRENDS_HEADER: [&str; 7] = [
    "team_name", "game_date", "season", "elo_pre", "elo_post", "elo_change",
    "cumulative_elo_change",
];
const POINT_DIFF_HEADER: [&str; 10] = [
    "team_name", "season", "games", "avg_point_diff", "stddev_point_diff", "worst_loss",
    "best_win", "q1_point_diff", "median_point_diff", "q3_point_diff",
];

/// Point differential distribution for one team in one season.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PointDiffSummary {
    pub team_name: String,
    pub season: i32,
    pub games: usize,
    pub avg_point_diff: f64,
    /// Sample standard deviation; `None` for a single game.
    pub stddev_point_diff: Option<f64>,
    pub worst_loss: i64,
    pub best_win: i64,
    pub q1_point_diff: f64,
    pub median_point_diff: f64,
    pub q3_point_diff: f64,
}

#[derive(Debug, Clone, Serialize)]
pub struct ExportedFile {
    pub dataset: String,
    pub path: String,
    pub rows: usize,
}

#[derive(Debug, Clone, Serialize)]
pub struct TableCount {
    pub table: String,
    pub row_count: usize,
}

#[derive(Debug, Clone, Serialize)]
pub struct ExportSummary {
    pub export_timestamp: String,
    pub warehouse_type: String,
    pub database_path: String,
    pub exports: Vec<TableCount>,
    pub files: Vec<ExportedFile>,
}

/// Write all exports into `dir` and return the summary (also written as
/// `export_summary.json`).
///
/// The Elo trend window covers `trend_years` back from the most recent game
/// in the warehouse.
pub fn export_all(
    wh: &Warehouse,
    dir: &SnapshotDir,
    timestamp: NaiveDateTime,
    trend_years: u32,
    database_path: &str,
) -> Result<ExportSummary> {
    let mut files = Vec::new();

    let win_rates = wh.team_win_rates()?;
    files.push(write_dataset(dir, TEAM_WIN_RATES, &TEAM_WIN_RATES_HEADER, &win_rates, timestamp)?);

    let trends = match wh.latest_game_date()? {
        Some(latest) => {
            let since = trend_years
                .checked_mul(12)
                .and_then(|months| latest.checked_sub_months(Months::new(months)))
                .unwrap_or(chrono::NaiveDate::MIN);
            wh.elo_trends(since)?
        }
        None => Vec::new(),
    };
    files.push(write_dataset(dir, ELO_TRENDS, &ELO_TRENDS_HEADER, &trends, timestamp)?);

    let point_diffs = summarize_point_diffs(&wh.score_diffs()?);
    files.push(write_dataset(dir, POINT_DIFF_BY_SEASON, &POINT_DIFF_HEADER, &point_diffs, timestamp)?);

    let mut exports = Vec::new();
    for table in ["dim_teams", "fct_games"] {
        exports.push(TableCount {
            table: table.to_string(),
            row_count: wh.table_count(table)?,
        });
    }

    let summary = ExportSummary {
        export_timestamp: timestamp.format("%Y-%m-%dT%H:%M:%S").to_string(),
        warehouse_type: "SQLite".to_string(),
        database_path: database_path.to_string(),
        exports,
        files,
    };
    let value = serde_json::to_value(&summary).context("failed to serialize export summary")?;
    let path = dir.write_json(SUMMARY_NAME, &value)?;
    info!("Created export summary: {}", path.display());

    Ok(summary)
}

fn write_dataset<T: Serialize>(
    dir: &SnapshotDir,
    dataset: &str,
    header: &[&str],
    rows: &[T],
    timestamp: NaiveDateTime,
) -> Result<ExportedFile> {
    let mut writer = csv::WriterBuilder::new().has_headers(false).from_writer(Vec::new());
    writer.write_record(header)?;
    for row in rows {
        writer.serialize(row)?;
    }
    let bytes = writer
        .into_inner()
        .map_err(|e| anyhow::anyhow!("failed to finish {dataset} CSV: {}", e.error()))?;

    let path = dir.write_versioned(dataset, &bytes, timestamp)?;
    info!("Exported {} rows to {}", rows.len(), path.display());
    Ok(ExportedFile {
        dataset: dataset.to_string(),
        path: path.display().to_string(),
        rows: rows.len(),
    })
}

/// Group per-game differentials by (team, season) and compute their
/// distribution. Output is ordered by season (newest first), then average
/// differential (best first).
pub fn summarize_point_diffs(diffs: &[ScoreDiff]) -> Vec<PointDiffSummary> {
    let mut groups: BTreeMap<(&str, i32), Vec<i64>> = BTreeMap::new();
    for d in diffs {
        groups
            .entry((d.team_name.as_str(), d.season))
            .or_default()
            .push(d.score_diff);
    }

    let mut out: Vec<PointDiffSummary> = groups
        .into_iter()
        .map(|((team, season), mut values)| {
            values.sort_unstable();
            let n = values.len();
            let mean = values.iter().sum::<i64>() as f64 / n as f64;
            let stddev = (n > 1).then(|| {
                let var = values
                    .iter()
                    .map(|&v| (v as f64 - mean).powi(2))
                    .sum::<f64>()
                    / (n - 1) as f64;
                round2(var.sqrt())
            });
            PointDiffSummary {
                team_name: team.to_string(),
                season,
                games: n,
                avg_point_diff: round2(mean),
                stddev_point_diff: stddev,
                worst_loss: values[0],
                best_win: values[n - 1],
                q1_point_diff: percentile_cont(&values, 0.25),
                median_point_diff: percentile_cont(&values, 0.50),
                q3_point_diff: percentile_cont(&values, 0.75),
            }
        })
        .collect();

    out.sort_by(|a, b| {
        b.season
            .cmp(&a.season)
            .then(b.avg_point_diff.total_cmp(&a.avg_point_diff))
            .then_with(|| a.team_name.cmp(&b.team_name))
    });
    out
}

/// Continuous percentile with linear interpolation over sorted values.
fn percentile_cont(sorted: &[i64], p: f64) -> f64 {
    let pos = p * (sorted.len() - 1) as f64;
    let lower = pos.floor() as usize;
    let upper = pos.ceil() as usize;
    let frac = pos - lower as f64;
    sorted[lower] as f64 + (sorted[upper] - sorted[lower]) as f64 * frac
}

fn round2(v: f64) -> f64 {
    (v * 100.0).round() / 100.0
}
