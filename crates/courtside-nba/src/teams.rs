// Team alias seed: display names for the franchise codes used in the Elo data.

use std::collections::HashSet;
use std::io::Read;

use serde::Deserialize;

use crate::elo_csv::{IngestError, InvalidRowError};

/// The shipped alias seed (`team_id,team_name`).
pub const DEFAULT_TEAM_ALIASES_CSV: &str = include_str!("../../../defaults/team_aliases.csv");

/// Display name for one franchise code.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct TeamAlias {
    pub team_id: String,
    pub team_name: String,
}

/// Read an alias seed. Both columns must be non-empty and each `team_id` may
/// appear only once.
pub fn read_team_aliases<R: Read>(rdr: R) -> Result<Vec<TeamAlias>, IngestError> {
    let mut reader = csv::Reader::from_reader(rdr);
    let headers = reader.headers()?.clone();
    let missing: Vec<String> = ["team_id", "team_name"]
        .iter()
        .filter(|col| !headers.iter().any(|h| h.trim() == **col))
        .map(|col| col.to_string())
        .collect();
    if !missing.is_empty() {
        return Err(IngestError::MissingColumns(missing));
    }

    let mut seen = HashSet::new();
    let mut aliases = Vec::new();
    for result in reader.deserialize::<TeamAlias>() {
        let alias = result?;
        let line = aliases.len() as u64 + 2;
        let invalid = |field: &'static str, value: &str, message: &str| InvalidRowError {
            line,
            field,
            value: value.to_string(),
            message: message.to_string(),
        };

        let team_id = alias.team_id.trim().to_string();
        let team_name = alias.team_name.trim().to_string();
        if team_id.is_empty() {
            return Err(invalid("team_id", &alias.team_id, "must not be empty").into());
        }
        if team_name.is_empty() {
            return Err(invalid("team_name", &alias.team_name, "must not be empty").into());
        }
        if !seen.insert(team_id.clone()) {
            return Err(invalid("team_id", &team_id, "duplicate team_id").into());
        }
        aliases.push(TeamAlias { team_id, team_name });
    }
    Ok(aliases)
}

/// The shipped seed, parsed.
pub fn default_team_aliases() -> Result<Vec<TeamAlias>, IngestError> {
    read_team_aliases(DEFAULT_TEAM_ALIASES_CSV.as_bytes())
}
