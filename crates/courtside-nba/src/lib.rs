// NBA Elo data: game model, per-team to per-game reconciliation, the CSV
// boundary, the SQLite warehouse and its exports.

pub mod elo_csv;
pub mod export;
pub mod model;
pub mod reconcile;
pub mod teams;
pub mod warehouse;
