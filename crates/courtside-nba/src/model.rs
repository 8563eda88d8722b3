// Game data types: one row per team per game in, one record per game out.

use chrono::{Datelike, NaiveDate};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Month (1-based) in which a new NBA season starts. Games before it belong
/// to the season that started the previous calendar year.
pub const SEASON_START_MONTH: u32 = 10;

/// Where a game was played, from one team's perspective.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Location {
    Home,
    Away,
    Neutral,
}

impl Location {
    pub fn code(self) -> &'static str {
        match self {
            Location::Home => "H",
            Location::Away => "A",
            Location::Neutral => "N",
        }
    }
}

impl fmt::Display for Location {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.code())
    }
}

impl FromStr for Location {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().as_str() {
            "H" => Ok(Location::Home),
            "A" => Ok(Location::Away),
            "N" => Ok(Location::Neutral),
            other => Err(format!("unknown game location '{other}'")),
        }
    }
}

/// One team's view of one game, as published in the Elo dataset.
#[derive(Debug, Clone, PartialEq)]
pub struct TeamGameRow {
    pub game_id: String,
    pub date: NaiveDate,
    pub franchise_code: String,
    pub opponent_code: String,
    pub elo_pre: f64,
    pub elo_post: f64,
    pub forecast: f64,
    pub location: Location,
    /// `"W 119-107"` / `"L 107-119"`; absent for unplayed or unrecorded games.
    pub result: Option<String>,
    pub notes: Option<String>,
}

/// One game with both teams' perspectives merged, home team first.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GameRecord {
    pub date: NaiveDate,
    pub season: i32,
    pub is_neutral: bool,
    pub is_playoff: bool,
    pub team1: String,
    pub team2: String,
    pub elo1_pre: f64,
    pub elo2_pre: f64,
    pub forecast1: f64,
    pub forecast2: f64,
    pub elo1_post: f64,
    pub elo2_post: f64,
    pub score1: Option<u32>,
    pub score2: Option<u32>,
}

impl GameRecord {
    /// True when both final scores are known.
    pub fn is_scored(&self) -> bool {
        self.score1.is_some() && self.score2.is_some()
    }
}

/// Season label for a game date: seasons run October to June and are named
/// after the calendar year they start in.
pub fn season_for(date: NaiveDate) -> i32 {
    if date.month() >= SEASON_START_MONTH {
        date.year()
    } else {
        date.year() - 1
    }
}
