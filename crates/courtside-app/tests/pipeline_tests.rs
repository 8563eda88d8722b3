// Integration tests for the courtside pipeline.
//
// These run the stages end-to-end against a small nbaallelo fixture served by
// an in-memory snapshot source, writing into a scratch directory under the
// system temp dir.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use chrono::{NaiveDate, NaiveDateTime};
use courtside_app::fetch::{FetchError, SnapshotSource};
use courtside_app::pipeline::{Pipeline, Stage, GAMES_DATASET, RAW_DATASET};
use courtside_core::config::{parse_config, Config, InvalidRowPolicy, DEFAULT_PIPELINE_TOML};
use courtside_nba::elo_csv::read_games;
use courtside_nba::model::GameRecord;
use courtside_nba::warehouse::Warehouse;

// ===========================================================================
// Test helpers
// ===========================================================================

const SAMPLE_CSV: &str = include_str!("fixtures/nbaallelo_sample.csv");

/// Serves a fixed CSV body.
struct StaticSource(String);

#[async_trait]
impl SnapshotSource for StaticSource {
    fn describe(&self) -> String {
        "static fixture".into()
    }

    async fn fetch_csv(&self) -> Result<String, FetchError> {
        Ok(self.0.clone())
    }
}

fn sample_source() -> StaticSource {
    StaticSource(SAMPLE_CSV.to_string())
}

fn test_config() -> Config {
    let mut config = parse_config(DEFAULT_PIPELINE_TOML, Path::new("pipeline.toml")).unwrap();
    config.source.min_row_count = 5;
    config
}

/// Fresh scratch directory for one test.
fn scratch_dir(name: &str) -> PathBuf {
    let dir = std::env::temp_dir().join(format!("courtside_pipeline_{name}"));
    let _ = std::fs::remove_dir_all(&dir);
    std::fs::create_dir_all(&dir).unwrap();
    dir
}

fn at(h: u32, m: u32, s: u32) -> NaiveDateTime {
    NaiveDate::from_ymd_opt(2024, 1, 2)
        .unwrap()
        .and_hms_opt(h, m, s)
        .unwrap()
}

fn ymd(y: i32, m: u32, d: u32) -> NaiveDate {
    NaiveDate::from_ymd_opt(y, m, d).unwrap()
}

// ===========================================================================
// Full run
// ===========================================================================

#[tokio::test]
async fn all_stages_produce_games_marts_and_exports() {
    let dir = scratch_dir("all_stages");
    let pipeline = Pipeline::new(test_config(), &dir);

    pipeline
        .run(Stage::All, &sample_source(), at(3, 4, 5))
        .await
        .unwrap();

    // Raw snapshot and games dataset, versioned plus latest pointers.
    let raw = dir.join("data/raw");
    assert!(raw.join("nbaallelo_20240102_030405.csv").exists());
    assert!(raw.join("elo_20240102_030405.csv").exists());
    assert!(pipeline.raw_dir().latest_path(RAW_DATASET).exists());
    assert!(pipeline.raw_dir().latest_path(GAMES_DATASET).exists());

    // Warehouse contents.
    let wh = Warehouse::open(&pipeline.database_path()).unwrap();
    assert_eq!(wh.table_count("raw_nbaallelo").unwrap(), 10);
    assert_eq!(wh.table_count("raw_games").unwrap(), 4);
    assert_eq!(wh.table_count("fct_games").unwrap(), 6);
    assert_eq!(wh.table_count("dim_teams").unwrap(), 8);
    assert_eq!(wh.table_count("seed_team_aliases").unwrap(), 30);
    assert!(wh.check_marts().unwrap().passed());

    // Exports.
    let exports = dir.join("data/exports");
    for dataset in ["team_win_rates", "elo_trends", "point_diff_by_season"] {
        assert!(
            exports.join(format!("{dataset}_20240102_030405.csv")).exists(),
            "missing export {dataset}"
        );
    }
    // Seeded teams get their full name; Bobcats has no alias and keeps its code.
    let win_rates =
        std::fs::read_to_string(pipeline.export_dir().latest_path("team_win_rates")).unwrap();
    assert!(win_rates.contains("Indiana Pacers,2013,1,1,100.0,10.0"));
    assert!(win_rates.contains("Bobcats,2013,1,0,0.0,-21.0"));
    assert!(!win_rates.contains("\nPacers,"));

    let summary: serde_json::Value = serde_json::from_str(
        &std::fs::read_to_string(exports.join("export_summary.json")).unwrap(),
    )
    .unwrap();
    assert_eq!(summary["warehouse_type"], "SQLite");
    assert_eq!(summary["export_timestamp"], "2024-01-02T03:04:05");
    assert_eq!(summary["exports"][0]["table"], "dim_teams");
    assert_eq!(summary["exports"][0]["row_count"], 8);
    assert_eq!(summary["exports"][1]["row_count"], 6);
}

#[tokio::test]
async fn reconciled_games_are_home_oriented_and_ordered() {
    let dir = scratch_dir("reconciled_games");
    let pipeline = Pipeline::new(test_config(), &dir);

    pipeline
        .run(Stage::Fetch, &sample_source(), at(1, 0, 0))
        .await
        .unwrap();
    let summary = pipeline.reconcile(at(1, 0, 0)).unwrap();
    assert_eq!(summary.team_rows, 10);
    assert_eq!(summary.invalid_rows, 1);
    assert_eq!(summary.reconciled, 3);
    assert_eq!(summary.partial, 1);
    // NYK lost its partner to the invalid row; OKC has a single row.
    assert_eq!(summary.skipped, 2);

    let games = read_games(pipeline.raw_dir().open_latest(GAMES_DATASET).unwrap()).unwrap();
    assert_eq!(games.len(), 4);
    let dates: Vec<NaiveDate> = games.iter().map(|g| g.date).collect();
    assert_eq!(
        dates,
        vec![ymd(2013, 10, 29), ymd(2013, 10, 30), ymd(2014, 1, 15), ymd(2014, 4, 20)]
    );

    // Lakers were listed second but hosted the game.
    let lal = &games[1];
    assert_eq!((lal.team1.as_str(), lal.team2.as_str()), ("Lakers", "Nuggets"));
    assert_eq!((lal.score1, lal.score2), (Some(107), Some(119)));
    assert_eq!(lal.elo1_pre, 1500.0);
    assert_eq!(lal.elo2_post, 1614.8);
    assert_eq!(lal.season, 2013);

    // Neutral site, first row becomes team1, its result has no score.
    let london = &games[2];
    assert!(london.is_neutral);
    assert_eq!(london.team1, "Celtics");
    assert_eq!((london.score1, london.score2), (None, Some(116)));

    let playoff = &games[3];
    assert!(playoff.is_playoff);
    assert_eq!(playoff.team1, "Heat");
}

#[tokio::test]
async fn reconcile_is_repeatable() {
    let dir = scratch_dir("repeatable");
    let pipeline = Pipeline::new(test_config(), &dir);
    pipeline
        .run(Stage::Fetch, &sample_source(), at(1, 0, 0))
        .await
        .unwrap();

    let first = pipeline.reconcile(at(2, 0, 0)).unwrap();
    let second = pipeline.reconcile(at(2, 0, 1)).unwrap();
    assert_ne!(first.output, second.output);
    assert_eq!(
        std::fs::read(&first.output).unwrap(),
        std::fs::read(&second.output).unwrap()
    );
}

#[tokio::test]
async fn reloading_replaces_warehouse_contents() {
    let dir = scratch_dir("reload");
    let pipeline = Pipeline::new(test_config(), &dir);
    pipeline
        .run(Stage::All, &sample_source(), at(1, 0, 0))
        .await
        .unwrap();

    let report = pipeline.load().unwrap();
    assert_eq!(report.duplicate_games, 0);
    assert_eq!(report.earliest, Some(ymd(2013, 10, 29)));
    assert_eq!(report.latest, Some(ymd(2014, 4, 20)));
    assert_eq!(report.unique_dates, 4);
    assert_eq!(report.unique_teams, 8);

    let wh = Warehouse::open(&pipeline.database_path()).unwrap();
    assert_eq!(wh.table_count("raw_games").unwrap(), 4);
}

// ===========================================================================
// Failures
// ===========================================================================

#[tokio::test]
async fn fetch_rejects_short_snapshot_without_saving() {
    let dir = scratch_dir("short_snapshot");
    let mut config = test_config();
    config.source.min_row_count = 1000;
    let pipeline = Pipeline::new(config, &dir);

    let err = pipeline
        .run(Stage::All, &sample_source(), at(1, 0, 0))
        .await
        .unwrap_err();
    assert!(format!("{err:#}").contains("expected at least 1000"));
    assert!(!pipeline.raw_dir().latest_path(RAW_DATASET).exists());
}

#[test]
fn reconcile_without_snapshot_fails() {
    let dir = scratch_dir("no_snapshot");
    let pipeline = Pipeline::new(test_config(), &dir);
    let err = pipeline.reconcile(at(1, 0, 0)).unwrap_err();
    assert!(err.to_string().contains("nbaallelo"));
}

#[tokio::test]
async fn fail_policy_stops_on_invalid_row() {
    let dir = scratch_dir("fail_policy");
    let mut config = test_config();
    config.ingest.on_invalid_row = InvalidRowPolicy::Fail;
    let pipeline = Pipeline::new(config, &dir);

    pipeline
        .run(Stage::Fetch, &sample_source(), at(1, 0, 0))
        .await
        .unwrap();
    let err = pipeline.reconcile(at(1, 0, 0)).unwrap_err();
    assert!(format!("{err:#}").contains("elo_i"));
    assert!(!pipeline.raw_dir().latest_path(GAMES_DATASET).exists());
}

#[tokio::test]
async fn model_fails_when_mart_checks_fail() {
    let dir = scratch_dir("mart_checks");
    let pipeline = Pipeline::new(test_config(), &dir);
    pipeline
        .run(Stage::All, &sample_source(), at(1, 0, 0))
        .await
        .unwrap();
    assert!(pipeline.model().unwrap().passed());

    // A team listed on both sides of one game yields two identical
    // (game_key, team_id) rows in fct_games.
    let wh = Warehouse::open(&pipeline.database_path()).unwrap();
    wh.load_games(&[GameRecord {
        date: ymd(2014, 3, 1),
        season: 2013,
        is_neutral: false,
        is_playoff: false,
        team1: "Heat".into(),
        team2: "Heat".into(),
        elo1_pre: 1650.0,
        elo2_pre: 1650.0,
        forecast1: 0.5,
        forecast2: 0.5,
        elo1_post: 1650.0,
        elo2_post: 1650.0,
        score1: Some(100),
        score2: Some(90),
    }])
    .unwrap();
    drop(wh);

    let err = pipeline
        .run(Stage::Model, &sample_source(), at(1, 0, 0))
        .await
        .unwrap_err();
    let message = format!("{err:#}");
    assert!(message.contains("mart checks failed"), "{message}");
    assert!(message.contains("duplicate (game_key, team_id)"), "{message}");
}
