// CSV boundary for the Elo datasets.
//
// Reads the per-team-per-game `nbaallelo` snapshot into validated
// `TeamGameRow`s and reads/writes the per-game `elo` dataset produced by the
// reconciler.

use std::io::{Read, Write};

use chrono::NaiveDate;
use courtside_core::config::InvalidRowPolicy;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::warn;

use crate::model::{GameRecord, Location, TeamGameRow};

/// Columns of the per-game dataset, in output order.
pub const GAMES_HEADER: [&str; 14] = [
    "date", "season", "neutral", "playoff", "team1", "team2", "elo1_pre", "elo2_pre",
    "elo_prob1", "elo_prob2", "elo1_post", "elo2_post", "score1", "score2",
];

/// Columns the reconciler needs from the per-team snapshot.
pub const REQUIRED_TEAM_COLUMNS: [&str; 8] = [
    "game_id", "date", "franch_id", "opp_franch", "elo_i", "elo_n", "game_location", "forecast",
];

const DATE_FORMATS: [&str; 2] = ["%Y-%m-%d", "%m/%d/%Y"];

// ---------------------------------------------------------------------------
// Error types
// ---------------------------------------------------------------------------

/// A snapshot row that cannot be turned into a `TeamGameRow`.
#[derive(Debug, Clone, PartialEq, Error)]
#[error("line {line}: invalid `{field}` value '{value}': {message}")]
pub struct InvalidRowError {
    pub line: u64,
    pub field: &'static str,
    pub value: String,
    pub message: String,
}

#[derive(Debug, Error)]
pub enum IngestError {
    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    #[error(transparent)]
    InvalidRow(#[from] InvalidRowError),

    #[error("snapshot is missing required columns: {}", .0.join(", "))]
    MissingColumns(Vec<String>),
}

// ---------------------------------------------------------------------------
// Raw CSV serde structs (private)
// ---------------------------------------------------------------------------

/// nbaallelo row. Numeric columns are read as text so that a bad value can be
/// reported with its field name instead of a generic deserialize error. Extra
/// columns (gameorder, lg_id, win_equiv, ...) are ignored.
#[derive(Debug, Deserialize)]
struct RawTeamRow {
    game_id: String,
    date: String,
    franch_id: String,
    opp_franch: String,
    elo_i: String,
    elo_n: String,
    forecast: String,
    game_location: String,
    #[serde(default)]
    game_result: Option<String>,
    #[serde(default)]
    notes: Option<String>,
}

#[derive(Debug, Serialize, Deserialize)]
struct GameCsvRow {
    date: NaiveDate,
    season: i32,
    neutral: u8,
    playoff: u8,
    team1: String,
    team2: String,
    elo1_pre: f64,
    elo2_pre: f64,
    elo_prob1: f64,
    elo_prob2: f64,
    elo1_post: f64,
    elo2_post: f64,
    score1: Option<u32>,
    score2: Option<u32>,
}

impl From<&GameRecord> for GameCsvRow {
    fn from(g: &GameRecord) -> Self {
        Self {
            date: g.date,
            season: g.season,
            neutral: u8::from(g.is_neutral),
            playoff: u8::from(g.is_playoff),
            team1: g.team1.clone(),
            team2: g.team2.clone(),
            elo1_pre: g.elo1_pre,
            elo2_pre: g.elo2_pre,
            elo_prob1: g.forecast1,
            elo_prob2: g.forecast2,
            elo1_post: g.elo1_post,
            elo2_post: g.elo2_post,
            score1: g.score1,
            score2: g.score2,
        }
    }
}

impl From<GameCsvRow> for GameRecord {
    fn from(r: GameCsvRow) -> Self {
        Self {
            date: r.date,
            season: r.season,
            is_neutral: r.neutral != 0,
            is_playoff: r.playoff != 0,
            team1: r.team1,
            team2: r.team2,
            elo1_pre: r.elo1_pre,
            elo2_pre: r.elo2_pre,
            forecast1: r.elo_prob1,
            forecast2: r.elo_prob2,
            elo1_post: r.elo1_post,
            elo2_post: r.elo2_post,
            score1: r.score1,
            score2: r.score2,
        }
    }
}

// ---------------------------------------------------------------------------
// Per-team snapshot
// ---------------------------------------------------------------------------

/// Rows read from a per-team snapshot plus the rows that were rejected.
#[derive(Debug, Default)]
pub struct TeamRows {
    pub rows: Vec<TeamGameRow>,
    pub invalid: Vec<InvalidRowError>,
}

/// Read and validate a per-team snapshot.
///
/// With `InvalidRowPolicy::Skip` a bad row is logged and collected in
/// `TeamRows::invalid`; with `InvalidRowPolicy::Fail` the first bad row is
/// returned as an error.
pub fn read_team_rows<R: Read>(rdr: R, policy: InvalidRowPolicy) -> Result<TeamRows, IngestError> {
    let mut reader = csv::Reader::from_reader(rdr);
    let headers = reader.headers()?.clone();

    let missing: Vec<String> = REQUIRED_TEAM_COLUMNS
        .iter()
        .filter(|col| !headers.iter().any(|h| h.trim() == **col))
        .map(|col| col.to_string())
        .collect();
    if !missing.is_empty() {
        return Err(IngestError::MissingColumns(missing));
    }

    let mut out = TeamRows::default();
    for result in reader.records() {
        let record = match result {
            Ok(record) => record,
            Err(e) if policy == InvalidRowPolicy::Skip => {
                warn!("skipping malformed snapshot row: {}", e);
                continue;
            }
            Err(e) => return Err(e.into()),
        };
        let line = record.position().map_or(0, |p| p.line());

        let validated = record
            .deserialize::<RawTeamRow>(Some(&headers))
            .map_err(|e| InvalidRowError {
                line,
                field: "record",
                value: String::new(),
                message: e.to_string(),
            })
            .and_then(|raw| validate_row(raw, line));

        match validated {
            Ok(row) => out.rows.push(row),
            Err(e) if policy == InvalidRowPolicy::Skip => {
                warn!("skipping invalid snapshot row: {}", e);
                out.invalid.push(e);
            }
            Err(e) => return Err(e.into()),
        }
    }
    Ok(out)
}

fn validate_row(raw: RawTeamRow, line: u64) -> Result<TeamGameRow, InvalidRowError> {
    let invalid = |field: &'static str, value: &str, message: String| InvalidRowError {
        line,
        field,
        value: value.to_string(),
        message,
    };

    let game_id = required_text(&raw.game_id, "game_id", line)?;
    let franchise_code = required_text(&raw.franch_id, "franch_id", line)?;
    let opponent_code = required_text(&raw.opp_franch, "opp_franch", line)?;

    let date = parse_date(&raw.date).ok_or_else(|| {
        invalid("date", &raw.date, "expected YYYY-MM-DD or M/D/YYYY".into())
    })?;

    let location: Location = raw
        .game_location
        .parse()
        .map_err(|msg| invalid("game_location", &raw.game_location, msg))?;

    let elo_pre = parse_finite(&raw.elo_i, "elo_i", line)?;
    let elo_post = parse_finite(&raw.elo_n, "elo_n", line)?;
    let forecast = parse_finite(&raw.forecast, "forecast", line)?;

    Ok(TeamGameRow {
        game_id,
        date,
        franchise_code,
        opponent_code,
        elo_pre,
        elo_post,
        forecast,
        location,
        result: non_blank(raw.game_result),
        notes: non_blank(raw.notes),
    })
}

fn required_text(value: &str, field: &'static str, line: u64) -> Result<String, InvalidRowError> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        return Err(InvalidRowError {
            line,
            field,
            value: value.to_string(),
            message: "must not be empty".into(),
        });
    }
    Ok(trimmed.to_string())
}

fn parse_finite(value: &str, field: &'static str, line: u64) -> Result<f64, InvalidRowError> {
    match value.trim().parse::<f64>() {
        Ok(v) if v.is_finite() => Ok(v),
        Ok(_) => Err(InvalidRowError {
            line,
            field,
            value: value.to_string(),
            message: "must be finite".into(),
        }),
        Err(e) => Err(InvalidRowError {
            line,
            field,
            value: value.to_string(),
            message: e.to_string(),
        }),
    }
}

fn parse_date(value: &str) -> Option<NaiveDate> {
    let value = value.trim();
    DATE_FORMATS
        .iter()
        .find_map(|fmt| NaiveDate::parse_from_str(value, fmt).ok())
}

fn non_blank(value: Option<String>) -> Option<String> {
    value.filter(|v| !v.trim().is_empty())
}

// ---------------------------------------------------------------------------
// Per-game dataset
// ---------------------------------------------------------------------------

/// Write game records as CSV. The header is written even when `records` is
/// empty.
pub fn write_games<W: Write>(wtr: W, records: &[GameRecord]) -> Result<(), csv::Error> {
    let mut writer = csv::WriterBuilder::new().has_headers(false).from_writer(wtr);
    writer.write_record(GAMES_HEADER)?;
    for record in records {
        writer.serialize(GameCsvRow::from(record))?;
    }
    writer.flush()?;
    Ok(())
}

/// Read a per-game dataset written by `write_games`.
pub fn read_games<R: Read>(rdr: R) -> Result<Vec<GameRecord>, IngestError> {
    let mut reader = csv::Reader::from_reader(rdr);
    let mut games = Vec::new();
    for result in reader.deserialize::<GameCsvRow>() {
        games.push(GameRecord::from(result?));
    }
    Ok(games)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
