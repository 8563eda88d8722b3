// SQLite warehouse: raw tables, dimensional marts, and the queries the
// exports are built from.
//
// Every load is a full refresh: the target table is emptied and refilled in
// one transaction.

use std::path::Path;
use std::sync::{Mutex, MutexGuard};

use anyhow::{bail, Context, Result};
use chrono::NaiveDate;
use rusqlite::{params, Connection};
use serde::Serialize;

use crate::model::{GameRecord, TeamGameRow};
use crate::teams::TeamAlias;

/// Tables whose row counts may be queried by name.
pub const COUNTABLE_TABLES: [&str; 5] = [
    "raw_nbaallelo",
    "raw_games",
    "seed_team_aliases",
    "dim_teams",
    "fct_games",
];

const DATE_FMT: &str = "%Y-%m-%d";

// ---------------------------------------------------------------------------
// Query result types
// ---------------------------------------------------------------------------

/// Basic data-quality figures for the loaded games.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct QualityReport {
    /// Number of (date, team1, team2) combinations that appear more than once.
    pub duplicate_games: usize,
    pub earliest: Option<NaiveDate>,
    pub latest: Option<NaiveDate>,
    pub unique_dates: usize,
    pub unique_teams: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TeamWinRate {
    pub team_name: String,
    pub season: i32,
    pub games_played: u32,
    pub wins: u32,
    pub win_rate: f64,
    pub avg_point_diff: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EloTrendPoint {
    pub team_name: String,
    pub game_date: NaiveDate,
    pub season: i32,
    pub elo_pre: f64,
    pub elo_post: f64,
    pub elo_change: f64,
    pub cumulative_elo_change: f64,
}

/// Violation counts from the data tests run against the marts. Every field
/// is zero for a healthy build.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct MartChecks {
    /// `fct_games` rows with a null `game_key` or `team_id`.
    pub null_keys: usize,
    /// `(game_key, team_id)` pairs that occur more than once.
    pub duplicate_keys: usize,
    /// Distinct `fct_games.team_id` values with no `dim_teams` row.
    pub orphan_teams: usize,
    /// `game_key`s without exactly two team rows.
    pub unpaired_games: usize,
}

impl MartChecks {
    pub fn passed(&self) -> bool {
        *self == Self::default()
    }

    /// Human-readable description of every failing check.
    pub fn failures(&self) -> Vec<String> {
        let mut out = Vec::new();
        if self.null_keys > 0 {
            out.push(format!("{} fct_games rows with null keys", self.null_keys));
        }
        if self.duplicate_keys > 0 {
            out.push(format!("{} duplicate (game_key, team_id) pairs", self.duplicate_keys));
        }
        if self.orphan_teams > 0 {
            out.push(format!("{} teams missing from dim_teams", self.orphan_teams));
        }
        if self.unpaired_games > 0 {
            out.push(format!("{} games without exactly two team rows", self.unpaired_games));
        }
        out
    }
}

/// One team's point differential in one game.
#[derive(Debug, Clone, PartialEq)]
pub struct ScoreDiff {
    pub team_name: String,
    pub season: i32,
    pub score_diff: i64,
}

// ---------------------------------------------------------------------------
// Database
// ---------------------------------------------------------------------------

/// SQLite-backed warehouse for raw snapshots and marts.
pub struct Warehouse {
    conn: Mutex<Connection>,
}

impl Warehouse {
    /// Open (or create) a warehouse at `path` and ensure the raw tables
    /// exist. Pass `":memory:"` for an ephemeral in-memory database (useful
    /// for tests).
    pub fn open(path: &str) -> Result<Self> {
        if path != ":memory:" {
            if let Some(parent) = Path::new(path).parent().filter(|p| !p.as_os_str().is_empty()) {
                std::fs::create_dir_all(parent)
                    .with_context(|| format!("failed to create {}", parent.display()))?;
            }
        }

        let conn = Connection::open(path)
            .with_context(|| format!("failed to open warehouse at {path}"))?;

        conn.execute_batch(
            "PRAGMA journal_mode = WAL;
             PRAGMA busy_timeout = 5000;",
        )
        .context("failed to set warehouse pragmas")?;

        conn.execute_batch(
            "
            CREATE TABLE IF NOT EXISTS raw_nbaallelo (
                game_id       TEXT NOT NULL,
                date          TEXT NOT NULL,
                franch_id     TEXT NOT NULL,
                opp_franch    TEXT NOT NULL,
                elo_i         REAL NOT NULL,
                elo_n         REAL NOT NULL,
                forecast      REAL NOT NULL,
                game_location TEXT NOT NULL,
                game_result   TEXT,
                notes         TEXT
            );

            CREATE TABLE IF NOT EXISTS raw_games (
                game_key  INTEGER PRIMARY KEY,
                date      TEXT NOT NULL,
                season    INTEGER NOT NULL,
                neutral   INTEGER NOT NULL,
                playoff   INTEGER NOT NULL,
                team1     TEXT NOT NULL,
                team2     TEXT NOT NULL,
                elo1_pre  REAL NOT NULL,
                elo2_pre  REAL NOT NULL,
                elo_prob1 REAL NOT NULL,
                elo_prob2 REAL NOT NULL,
                elo1_post REAL NOT NULL,
                elo2_post REAL NOT NULL,
                score1    INTEGER,
                score2    INTEGER
            );

            CREATE TABLE IF NOT EXISTS seed_team_aliases (
                team_id   TEXT PRIMARY KEY,
                team_name TEXT NOT NULL
            );

            CREATE INDEX IF NOT EXISTS idx_raw_nbaallelo_game_id ON raw_nbaallelo(game_id);
            CREATE INDEX IF NOT EXISTS idx_raw_games_date ON raw_games(date);
            ",
        )
        .context("failed to create warehouse schema")?;

        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// Acquire the database connection.
    ///
    /// Panics if the mutex is poisoned (another thread panicked while
    /// holding the lock).
    fn conn(&self) -> MutexGuard<'_, Connection> {
        self.conn.lock().expect("warehouse mutex poisoned")
    }

    /// Replace the contents of `raw_nbaallelo` with `rows`.
    pub fn load_team_rows(&self, rows: &[TeamGameRow]) -> Result<usize> {
        let mut conn = self.conn();
        let tx = conn.transaction().context("failed to begin transaction")?;
        tx.execute("DELETE FROM raw_nbaallelo", [])
            .context("failed to clear raw_nbaallelo")?;
        {
            let mut stmt = tx
                .prepare(
                    "INSERT INTO raw_nbaallelo
                        (game_id, date, franch_id, opp_franch, elo_i, elo_n, forecast, game_location, game_result, notes)
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)",
                )
                .context("failed to prepare raw_nbaallelo insert")?;
            for row in rows {
                stmt.execute(params![
                    row.game_id,
                    row.date.format(DATE_FMT).to_string(),
                    row.franchise_code,
                    row.opponent_code,
                    row.elo_pre,
                    row.elo_post,
                    row.forecast,
                    row.location.code(),
                    row.result,
                    row.notes,
                ])
                .with_context(|| format!("failed to insert team row for game {}", row.game_id))?;
            }
        }
        tx.commit().context("failed to commit raw_nbaallelo load")?;
        Ok(rows.len())
    }

    /// Replace the contents of `raw_games` with `games`. Game keys are
    /// assigned 1..=n in slice order.
    pub fn load_games(&self, games: &[GameRecord]) -> Result<usize> {
        let mut conn = self.conn();
        let tx = conn.transaction().context("failed to begin transaction")?;
        tx.execute("DELETE FROM raw_games", [])
            .context("failed to clear raw_games")?;
        {
            let mut stmt = tx
                .prepare(
                    "INSERT INTO raw_games
                        (game_key, date, season, neutral, playoff, team1, team2, elo1_pre, elo2_pre,
                         elo_prob1, elo_prob2, elo1_post, elo2_post, score1, score2)
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15)",
                )
                .context("failed to prepare raw_games insert")?;
            for (idx, g) in games.iter().enumerate() {
                stmt.execute(params![
                    (idx + 1) as i64,
                    g.date.format(DATE_FMT).to_string(),
                    g.season,
                    g.is_neutral,
                    g.is_playoff,
                    g.team1,
                    g.team2,
                    g.elo1_pre,
                    g.elo2_pre,
                    g.forecast1,
                    g.forecast2,
                    g.elo1_post,
                    g.elo2_post,
                    g.score1,
                    g.score2,
                ])
                .with_context(|| format!("failed to insert game {} {} vs {}", g.date, g.team1, g.team2))?;
            }
        }
        tx.commit().context("failed to commit raw_games load")?;
        Ok(games.len())
    }

    /// Replace the contents of `seed_team_aliases` with `aliases`.
    pub fn load_team_aliases(&self, aliases: &[TeamAlias]) -> Result<usize> {
        let mut conn = self.conn();
        let tx = conn.transaction().context("failed to begin transaction")?;
        tx.execute("DELETE FROM seed_team_aliases", [])
            .context("failed to clear seed_team_aliases")?;
        {
            let mut stmt = tx
                .prepare("INSERT INTO seed_team_aliases (team_id, team_name) VALUES (?1, ?2)")
                .context("failed to prepare seed_team_aliases insert")?;
            for alias in aliases {
                stmt.execute(params![alias.team_id, alias.team_name])
                    .with_context(|| format!("failed to insert alias for {}", alias.team_id))?;
            }
        }
        tx.commit().context("failed to commit seed_team_aliases load")?;
        Ok(aliases.len())
    }

    /// Rebuild `dim_teams` and `fct_games` from `raw_games`.
    ///
    /// `fct_games` holds one row per team per scored game; games with a
    /// missing score are left out. Team names come from `seed_team_aliases`,
    /// falling back to the franchise code. On failure nothing is changed.
    pub fn build_marts(&self) -> Result<()> {
        let mut conn = self.conn();
        let tx = conn.transaction().context("failed to begin transaction")?;
        tx.execute_batch(
            "
            DROP TABLE IF EXISTS fct_games;
            CREATE TABLE fct_games AS
            SELECT game_key,
                   team1                                   AS team_id,
                   team2                                   AS opponent_id,
                   date                                    AS game_date,
                   season,
                   CASE WHEN neutral = 1 THEN 0 ELSE 1 END AS is_home,
                   neutral                                 AS is_neutral,
                   playoff                                 AS is_playoff,
                   score1                                  AS points_for,
                   score2                                  AS points_against,
                   score1 - score2                         AS score_diff,
                   CASE WHEN score1 > score2 THEN 1 ELSE 0 END AS win_flag,
                   elo1_pre                                AS elo_pre,
                   elo1_post                               AS elo_post,
                   elo1_post - elo1_pre                    AS elo_change,
                   elo_prob1                               AS forecast
            FROM raw_games
            WHERE score1 IS NOT NULL AND score2 IS NOT NULL
            UNION ALL
            SELECT game_key,
                   team2,
                   team1,
                   date,
                   season,
                   0,
                   neutral,
                   playoff,
                   score2,
                   score1,
                   score2 - score1,
                   CASE WHEN score2 > score1 THEN 1 ELSE 0 END,
                   elo2_pre,
                   elo2_post,
                   elo2_post - elo2_pre,
                   elo_prob2
            FROM raw_games
            WHERE score1 IS NOT NULL AND score2 IS NOT NULL;

            CREATE INDEX idx_fct_games_team_date ON fct_games(team_id, game_date);

            DROP TABLE IF EXISTS dim_teams;
            CREATE TABLE dim_teams AS
            SELECT g.team                        AS team_id,
                   COALESCE(a.team_name, g.team) AS team_name,
                   MIN(g.season)                 AS first_season,
                   MAX(g.season)                 AS last_season
            FROM (
                SELECT team1 AS team, season FROM raw_games
                UNION ALL
                SELECT team2 AS team, season FROM raw_games
            ) g
            LEFT JOIN seed_team_aliases a ON a.team_id = g.team
            GROUP BY g.team
            ORDER BY g.team;
            ",
        )
        .context("failed to build marts")?;
        tx.commit().context("failed to commit marts")?;
        Ok(())
    }

    /// Data tests over the built marts: key integrity of `fct_games`, team
    /// coverage of `dim_teams` and two rows per game.
    pub fn check_marts(&self) -> Result<MartChecks> {
        let conn = self.conn();
        let count = |sql: &str, what: &str| -> Result<usize> {
            let n: i64 = conn
                .query_row(sql, [], |row| row.get(0))
                .with_context(|| format!("failed to check {what}"))?;
            Ok(n as usize)
        };

        Ok(MartChecks {
            null_keys: count(
                "SELECT COUNT(*) FROM fct_games WHERE game_key IS NULL OR team_id IS NULL",
                "null keys",
            )?,
            duplicate_keys: count(
                "SELECT COUNT(*) FROM (
                    SELECT 1 FROM fct_games
                    GROUP BY game_key, team_id
                    HAVING COUNT(*) > 1
                 )",
                "duplicate keys",
            )?,
            orphan_teams: count(
                "SELECT COUNT(DISTINCT f.team_id)
                 FROM fct_games f
                 LEFT JOIN dim_teams t ON f.team_id = t.team_id
                 WHERE t.team_id IS NULL",
                "team coverage",
            )?,
            unpaired_games: count(
                "SELECT COUNT(*) FROM (
                    SELECT 1 FROM fct_games
                    GROUP BY game_key
                    HAVING COUNT(*) <> 2
                 )",
                "game pairing",
            )?,
        })
    }

    /// Row count of one of the `COUNTABLE_TABLES`.
    pub fn table_count(&self, table: &str) -> Result<usize> {
        if !COUNTABLE_TABLES.contains(&table) {
            bail!("unknown table `{table}`");
        }
        let conn = self.conn();
        let count: i64 = conn
            .query_row(&format!("SELECT COUNT(*) FROM {table}"), [], |row| row.get(0))
            .with_context(|| format!("failed to count rows of {table}"))?;
        Ok(count as usize)
    }

    /// Date of the most recent loaded game, if any.
    pub fn latest_game_date(&self) -> Result<Option<NaiveDate>> {
        let conn = self.conn();
        let latest: Option<String> = conn
            .query_row("SELECT MAX(date) FROM raw_games", [], |row| row.get(0))
            .context("failed to query latest game date")?;
        latest.as_deref().map(parse_date).transpose()
    }

    /// Duplicate, date-range and team-count checks over `raw_games`.
    pub fn quality_report(&self) -> Result<QualityReport> {
        let conn = self.conn();

        let duplicate_games: i64 = conn
            .query_row(
                "SELECT COUNT(*) FROM (
                    SELECT 1 FROM raw_games
                    GROUP BY date, team1, team2
                    HAVING COUNT(*) > 1
                 )",
                [],
                |row| row.get(0),
            )
            .context("failed to count duplicate games")?;

        let (earliest, latest, unique_dates): (Option<String>, Option<String>, i64) = conn
            .query_row(
                "SELECT MIN(date), MAX(date), COUNT(DISTINCT date) FROM raw_games",
                [],
                |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?)),
            )
            .context("failed to query date range")?;

        let unique_teams: i64 = conn
            .query_row(
                "SELECT COUNT(*) FROM (
                    SELECT team1 FROM raw_games
                    UNION
                    SELECT team2 FROM raw_games
                 )",
                [],
                |row| row.get(0),
            )
            .context("failed to count teams")?;

        Ok(QualityReport {
            duplicate_games: duplicate_games as usize,
            earliest: earliest.as_deref().map(parse_date).transpose()?,
            latest: latest.as_deref().map(parse_date).transpose()?,
            unique_dates: unique_dates as usize,
            unique_teams: unique_teams as usize,
        })
    }

    /// Per team and season: games, wins, win rate (percent) and average point
    /// differential. Ordered by season (newest first), then win rate.
    pub fn team_win_rates(&self) -> Result<Vec<TeamWinRate>> {
        let conn = self.conn();
        let mut stmt = conn
            .prepare(
                "SELECT t.team_name,
                        f.season,
                        COUNT(*)                                    AS games_played,
                        SUM(f.win_flag)                             AS wins,
                        ROUND(SUM(f.win_flag) * 100.0 / COUNT(*), 2) AS win_rate,
                        ROUND(AVG(f.score_diff), 2)                 AS avg_point_diff
                 FROM fct_games f
                 JOIN dim_teams t ON f.team_id = t.team_id
                 GROUP BY t.team_name, f.season
                 ORDER BY f.season DESC, win_rate DESC, t.team_name",
            )
            .context("failed to prepare team_win_rates query")?;

        let rows = stmt
            .query_map([], |row| {
                Ok(TeamWinRate {
                    team_name: row.get(0)?,
                    season: row.get(1)?,
                    games_played: row.get(2)?,
                    wins: row.get(3)?,
                    win_rate: row.get(4)?,
                    avg_point_diff: row.get(5)?,
                })
            })
            .context("failed to query team win rates")?
            .collect::<std::result::Result<Vec<_>, _>>()
            .context("failed to map team win rate rows")?;
        Ok(rows)
    }

    /// Elo movement per team for games on or after `since`, with a running
    /// total of the change per team.
    pub fn elo_trends(&self, since: NaiveDate) -> Result<Vec<EloTrendPoint>> {
        let conn = self.conn();
        let mut stmt = conn
            .prepare(
                "SELECT t.team_name,
                        f.game_date,
                        f.season,
                        f.elo_pre,
                        f.elo_post,
                        f.elo_change,
                        SUM(f.elo_change) OVER (
                            PARTITION BY t.team_name
                            ORDER BY f.game_date, f.game_key
                            ROWS BETWEEN UNBOUNDED PRECEDING AND CURRENT ROW
                        ) AS cumulative_elo_change
                 FROM fct_games f
                 JOIN dim_teams t ON f.team_id = t.team_id
                 WHERE f.game_date >= ?1
                 ORDER BY t.team_name, f.game_date, f.game_key",
            )
            .context("failed to prepare elo_trends query")?;

        let raw = stmt
            .query_map(params![since.format(DATE_FMT).to_string()], |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    row.get::<_, String>(1)?,
                    row.get::<_, i32>(2)?,
                    row.get::<_, f64>(3)?,
                    row.get::<_, f64>(4)?,
                    row.get::<_, f64>(5)?,
                    row.get::<_, f64>(6)?,
                ))
            })
            .context("failed to query elo trends")?
            .collect::<std::result::Result<Vec<_>, _>>()
            .context("failed to map elo trend rows")?;

        raw.into_iter()
            .map(|(team_name, date, season, elo_pre, elo_post, elo_change, cumulative)| {
                Ok(EloTrendPoint {
                    team_name,
                    game_date: parse_date(&date)?,
                    season,
                    elo_pre,
                    elo_post,
                    elo_change,
                    cumulative_elo_change: cumulative,
                })
            })
            .collect()
    }

    /// Every team's point differential per scored game, grouped by team and
    /// season.
    pub fn score_diffs(&self) -> Result<Vec<ScoreDiff>> {
        let conn = self.conn();
        let mut stmt = conn
            .prepare(
                "SELECT t.team_name, f.season, f.score_diff
                 FROM fct_games f
                 JOIN dim_teams t ON f.team_id = t.team_id
                 ORDER BY t.team_name, f.season, f.score_diff",
            )
            .context("failed to prepare score_diffs query")?;

        let rows = stmt
            .query_map([], |row| {
                Ok(ScoreDiff {
                    team_name: row.get(0)?,
                    season: row.get(1)?,
                    score_diff: row.get(2)?,
                })
            })
            .context("failed to query score diffs")?
            .collect::<std::result::Result<Vec<_>, _>>()
            .context("failed to map score diff rows")?;
        Ok(rows)
    }
}

fn parse_date(text: &str) -> Result<NaiveDate> {
    NaiveDate::parse_from_str(text, DATE_FMT)
        .with_context(|| format!("invalid date '{text}' in warehouse"))
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
