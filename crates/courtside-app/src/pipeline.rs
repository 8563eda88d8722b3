// Stage runner: fetch -> reconcile -> load -> model -> export.
//
// Each stage reads what the previous one left on disk (the latest snapshot
// pointers or the warehouse), so any stage can be rerun on its own.

use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Instant;

use anyhow::{bail, Context, Result};
use chrono::NaiveDateTime;
use courtside_core::config::Config;
use courtside_core::snapshot::SnapshotDir;
use courtside_nba::elo_csv;
use courtside_nba::export::{self, ExportSummary};
use courtside_nba::reconcile;
use courtside_nba::teams;
use courtside_nba::warehouse::{MartChecks, QualityReport, Warehouse};
use tracing::{debug, info, warn};

use crate::fetch::{self, SnapshotSource};

/// Dataset name of the raw per-team snapshot.
pub const RAW_DATASET: &str = "nbaallelo";
/// Dataset name of the reconciled games file.
pub const GAMES_DATASET: &str = "elo";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Fetch,
    Reconcile,
    Load,
    Model,
    Export,
    All,
}

impl Stage {
    /// The stages `All` expands to, in run order.
    pub const SEQUENCE: [Stage; 5] = [
        Stage::Fetch,
        Stage::Reconcile,
        Stage::Load,
        Stage::Model,
        Stage::Export,
    ];

    pub fn name(self) -> &'static str {
        match self {
            Stage::Fetch => "fetch",
            Stage::Reconcile => "reconcile",
            Stage::Load => "load",
            Stage::Model => "model",
            Stage::Export => "export",
            Stage::All => "all",
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for Stage {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "fetch" => Ok(Stage::Fetch),
            "reconcile" => Ok(Stage::Reconcile),
            "load" => Ok(Stage::Load),
            "model" => Ok(Stage::Model),
            "export" => Ok(Stage::Export),
            "all" => Ok(Stage::All),
            other => Err(format!(
                "unknown stage '{other}' (expected fetch, reconcile, load, model, export or all)"
            )),
        }
    }
}

/// Counts produced by the reconcile stage.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReconcileSummary {
    pub team_rows: usize,
    pub invalid_rows: usize,
    pub reconciled: usize,
    pub partial: usize,
    pub skipped: usize,
    pub output: PathBuf,
}

#[derive(Debug, Clone)]
pub struct Pipeline {
    config: Config,
    base_dir: PathBuf,
}

impl Pipeline {
    /// Relative paths in `config` are resolved against `base_dir`.
    pub fn new(config: Config, base_dir: impl Into<PathBuf>) -> Self {
        Self {
            config,
            base_dir: base_dir.into(),
        }
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn raw_dir(&self) -> SnapshotDir {
        SnapshotDir::new(self.base_dir.join(&self.config.paths.raw_dir))
    }

    pub fn export_dir(&self) -> SnapshotDir {
        SnapshotDir::new(self.base_dir.join(&self.config.paths.export_dir))
    }

    pub fn database_path(&self) -> String {
        let configured = &self.config.database.path;
        if configured == ":memory:" {
            return configured.clone();
        }
        self.base_dir
            .join(Path::new(configured))
            .to_string_lossy()
            .into_owned()
    }

    fn open_warehouse(&self) -> Result<Warehouse> {
        let path = self.database_path();
        let wh = Warehouse::open(&path).with_context(|| format!("failed to open warehouse {path}"))?;
        debug!("Warehouse opened at {}", path);
        Ok(wh)
    }

    /// Download the per-team snapshot, check it and save a new version.
    pub async fn fetch(&self, source: &dyn SnapshotSource, now: NaiveDateTime) -> Result<PathBuf> {
        info!("Fetching {}", source.describe());
        let text = source
            .fetch_csv()
            .await
            .with_context(|| format!("failed to download {}", source.describe()))?;

        let min_rows = self.config.source.min_row_count;
        fetch::validate_snapshot(&text, min_rows).context("snapshot failed validation")?;

        let path = self
            .raw_dir()
            .write_versioned(RAW_DATASET, text.as_bytes(), now)
            .context("failed to save snapshot")?;
        Ok(path)
    }

    /// Turn the latest per-team snapshot into a new version of the games
    /// dataset.
    pub fn reconcile(&self, now: NaiveDateTime) -> Result<ReconcileSummary> {
        let raw = self.raw_dir();
        let file = raw.open_latest(RAW_DATASET)?;
        let team_rows = elo_csv::read_team_rows(file, self.config.ingest.on_invalid_row)
            .context("failed to read per-team snapshot")?;
        if !team_rows.invalid.is_empty() {
            warn!("Skipped {} invalid rows", team_rows.invalid.len());
        }

        let result = reconcile::reconcile_detailed(&team_rows.rows);
        let (reconciled, partial, skipped) = (
            result.reconciled_count(),
            result.partial_count(),
            result.skipped_count(),
        );
        let games = result.into_records();

        let mut buf = Vec::new();
        elo_csv::write_games(&mut buf, &games).context("failed to write games CSV")?;
        let output = raw.write_versioned(GAMES_DATASET, &buf, now)?;

        let summary = ReconcileSummary {
            team_rows: team_rows.rows.len(),
            invalid_rows: team_rows.invalid.len(),
            reconciled,
            partial,
            skipped,
            output,
        };
        info!(
            "Reconciled {} games from {} team rows ({} partial scores, {} skipped groups, {} invalid rows)",
            summary.reconciled + summary.partial,
            summary.team_rows,
            summary.partial,
            summary.skipped,
            summary.invalid_rows
        );
        if summary.skipped > 0 {
            warn!("{} game groups did not have exactly two rows", summary.skipped);
        }
        Ok(summary)
    }

    /// Full-refresh both raw tables from the latest snapshots.
    pub fn load(&self) -> Result<QualityReport> {
        let raw = self.raw_dir();

        let team_rows = elo_csv::read_team_rows(
            raw.open_latest(RAW_DATASET)?,
            self.config.ingest.on_invalid_row,
        )
        .context("failed to read per-team snapshot")?;
        let games = elo_csv::read_games(raw.open_latest(GAMES_DATASET)?)
            .context("failed to read games dataset")?;

        let wh = self.open_warehouse()?;
        let team_count = wh.load_team_rows(&team_rows.rows)?;
        let game_count = wh.load_games(&games)?;
        info!("Loaded {} team rows and {} games", team_count, game_count);

        let report = wh.quality_report()?;
        info!(
            "Quality: {} duplicate games, {} dates, {} teams, range {:?} to {:?}",
            report.duplicate_games,
            report.unique_dates,
            report.unique_teams,
            report.earliest,
            report.latest
        );
        if report.duplicate_games > 0 {
            warn!("{} duplicate games in raw_games", report.duplicate_games);
        }
        Ok(report)
    }

    /// Seed team aliases, rebuild the marts and run the mart checks. A
    /// failing check fails the stage.
    pub fn model(&self) -> Result<MartChecks> {
        let wh = self.open_warehouse()?;
        let aliases = teams::default_team_aliases().context("failed to read team alias seed")?;
        let seeded = wh.load_team_aliases(&aliases)?;
        debug!("Seeded {} team aliases", seeded);

        wh.build_marts().context("failed to build marts")?;
        info!(
            "Marts built: {} teams, {} team-games",
            wh.table_count("dim_teams")?,
            wh.table_count("fct_games")?
        );

        let checks = wh.check_marts()?;
        if !checks.passed() {
            bail!("mart checks failed: {}", checks.failures().join("; "));
        }
        info!("Mart checks passed");
        Ok(checks)
    }

    pub fn export(&self, now: NaiveDateTime) -> Result<ExportSummary> {
        let wh = self.open_warehouse()?;
        let summary = export::export_all(
            &wh,
            &self.export_dir(),
            now,
            self.config.export.elo_trend_years,
            &self.database_path(),
        )?;
        info!("Exported {} datasets", summary.files.len());
        Ok(summary)
    }

    /// Run one stage, or every stage in order for `Stage::All`. Stops at the
    /// first failing stage.
    pub async fn run(
        &self,
        stage: Stage,
        source: &dyn SnapshotSource,
        now: NaiveDateTime,
    ) -> Result<()> {
        let stages: Vec<Stage> = match stage {
            Stage::All => Stage::SEQUENCE.to_vec(),
            single => vec![single],
        };

        for stage in stages {
            let started = Instant::now();
            info!("Stage {} starting", stage);
            match stage {
                Stage::Fetch => {
                    self.fetch(source, now).await?;
                }
                Stage::Reconcile => {
                    self.blocking(move |p| p.reconcile(now)).await?;
                }
                Stage::Load => {
                    self.blocking(|p| p.load()).await?;
                }
                Stage::Model => {
                    self.blocking(|p| p.model()).await?;
                }
                Stage::Export => {
                    self.blocking(move |p| p.export(now)).await?;
                }
                Stage::All => unreachable!("All is expanded above"),
            }
            info!("Stage {} finished in {:.2?}", stage, started.elapsed());
        }
        Ok(())
    }

    /// Run a file or warehouse stage on the blocking thread pool.
    async fn blocking<T, F>(&self, work: F) -> Result<T>
    where
        F: FnOnce(&Pipeline) -> Result<T> + Send + 'static,
        T: Send + 'static,
    {
        let pipeline = self.clone();
        tokio::task::spawn_blocking(move || work(&pipeline))
            .await
            .context("stage task panicked")?
    }
}
