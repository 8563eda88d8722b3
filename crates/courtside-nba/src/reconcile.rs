// Game reconciliation: pairs the two per-team rows of each game into one
// home-oriented game record.
//
// Policies:
// - A game_id with anything other than exactly two rows is skipped, never an
//   error. The skip is reported as an `Outcome::Skipped` so callers can count
//   or log it.
// - A result string that does not parse yields a null score; the record is
//   still emitted (`Outcome::PartialScore`).
// - When the pair does not contain exactly one home row (both neutral, or
//   bad data with two away/home rows) the first row in input order is used as
//   the home side. This is an arbitrary but deterministic tie-break, not a
//   statement about who actually hosted the game.

use std::collections::BTreeMap;
use std::fmt;

use tracing::debug;

use crate::model::{season_for, GameRecord, Location, TeamGameRow};

// ---------------------------------------------------------------------------
// Outcomes
// ---------------------------------------------------------------------------

/// Why a game_id group produced no record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipReason {
    /// The group did not contain exactly two rows.
    GroupSize(usize),
}

impl fmt::Display for SkipReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SkipReason::GroupSize(n) => write!(f, "expected 2 rows, found {n}"),
        }
    }
}

/// Result of reconciling one game_id group.
#[derive(Debug, Clone, PartialEq)]
pub enum Outcome {
    /// Both scores parsed.
    Reconciled { game_id: String, record: GameRecord },
    /// Record emitted, but at least one score could not be parsed.
    PartialScore { game_id: String, record: GameRecord },
    /// No record for this group.
    Skipped { game_id: String, reason: SkipReason },
}

impl Outcome {
    pub fn game_id(&self) -> &str {
        match self {
            Outcome::Reconciled { game_id, .. }
            | Outcome::PartialScore { game_id, .. }
            | Outcome::Skipped { game_id, .. } => game_id,
        }
    }

    pub fn record(&self) -> Option<&GameRecord> {
        match self {
            Outcome::Reconciled { record, .. } | Outcome::PartialScore { record, .. } => {
                Some(record)
            }
            Outcome::Skipped { .. } => None,
        }
    }
}

/// Every group's outcome, in ascending game_id order.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Reconciliation {
    pub outcomes: Vec<Outcome>,
}

impl Reconciliation {
    /// Records of all reconciled and partially scored games, in order.
    pub fn into_records(self) -> Vec<GameRecord> {
        self.outcomes
            .into_iter()
            .filter_map(|o| match o {
                Outcome::Reconciled { record, .. } | Outcome::PartialScore { record, .. } => {
                    Some(record)
                }
                Outcome::Skipped { .. } => None,
            })
            .collect()
    }

    pub fn reconciled_count(&self) -> usize {
        self.count(|o| matches!(o, Outcome::Reconciled { .. }))
    }

    pub fn partial_count(&self) -> usize {
        self.count(|o| matches!(o, Outcome::PartialScore { .. }))
    }

    pub fn skipped_count(&self) -> usize {
        self.count(|o| matches!(o, Outcome::Skipped { .. }))
    }

    fn count(&self, pred: impl Fn(&Outcome) -> bool) -> usize {
        self.outcomes.iter().filter(|&o| pred(o)).count()
    }
}

// ---------------------------------------------------------------------------
// Public entry points
// ---------------------------------------------------------------------------

/// Reconcile per-team rows into per-game records, dropping skipped groups.
pub fn reconcile(rows: &[TeamGameRow]) -> Vec<GameRecord> {
    reconcile_detailed(rows).into_records()
}

/// Reconcile per-team rows, reporting what happened to every game_id group.
pub fn reconcile_detailed(rows: &[TeamGameRow]) -> Reconciliation {
    // game_id -> indices into `rows`, in input order
    let mut groups: BTreeMap<&str, Vec<usize>> = BTreeMap::new();
    for (idx, row) in rows.iter().enumerate() {
        groups.entry(row.game_id.as_str()).or_default().push(idx);
    }

    let outcomes = groups
        .into_iter()
        .map(|(game_id, indices)| match indices.as_slice() {
            &[first, second] => {
                let record = merge_pair(&rows[first], &rows[second]);
                if record.is_scored() {
                    Outcome::Reconciled {
                        game_id: game_id.to_string(),
                        record,
                    }
                } else {
                    debug!(game_id, "game result could not be parsed for one or both teams");
                    Outcome::PartialScore {
                        game_id: game_id.to_string(),
                        record,
                    }
                }
            }
            other => {
                let reason = SkipReason::GroupSize(other.len());
                debug!(game_id, %reason, "skipping game");
                Outcome::Skipped {
                    game_id: game_id.to_string(),
                    reason,
                }
            }
        })
        .collect();

    Reconciliation { outcomes }
}

/// Parse a result string of the form `"W 119-107"` into `(own, opponent)`.
///
/// Splits on whitespace, takes the second token and expects exactly two
/// non-negative integers separated by `-`. Anything else yields `None`.
pub fn parse_score(result: Option<&str>) -> Option<(u32, u32)> {
    let token = result?.split_whitespace().nth(1)?;
    let mut parts = token.split('-');
    let own = parts.next()?.parse().ok()?;
    let opp = parts.next()?.parse().ok()?;
    if parts.next().is_some() {
        return None;
    }
    Some((own, opp))
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

/// Pick (home, away) from a pair given in input order.
fn orient<'a>(
    first: &'a TeamGameRow,
    second: &'a TeamGameRow,
) -> (&'a TeamGameRow, &'a TeamGameRow) {
    match (first.location, second.location) {
        (Location::Home, other) if other != Location::Home => (first, second),
        (other, Location::Home) if other != Location::Home => (second, first),
        _ => (first, second),
    }
}

fn merge_pair(first: &TeamGameRow, second: &TeamGameRow) -> GameRecord {
    let (home, away) = orient(first, second);

    let is_playoff = home
        .notes
        .as_deref()
        .is_some_and(|n| n.to_lowercase().contains("playoff"));

    GameRecord {
        date: home.date,
        season: season_for(home.date),
        is_neutral: home.location == Location::Neutral,
        is_playoff,
        team1: home.franchise_code.clone(),
        team2: away.franchise_code.clone(),
        elo1_pre: home.elo_pre,
        elo2_pre: away.elo_pre,
        forecast1: home.forecast,
        forecast2: away.forecast,
        elo1_post: home.elo_post,
        elo2_post: away.elo_post,
        score1: parse_score(home.result.as_deref()).map(|(own, _)| own),
        score2: parse_score(away.result.as_deref()).map(|(own, _)| own),
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
