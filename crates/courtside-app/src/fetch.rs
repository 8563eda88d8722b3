// Snapshot download: fetch the per-team Elo CSV and sanity-check it before it
// is saved.
//
// A single attempt is made; rerunning the stage is the retry mechanism.

use std::time::Duration;

use async_trait::async_trait;
use courtside_core::config::SourceConfig;
use thiserror::Error;
use tracing::{info, warn};

/// Columns the nbaallelo dataset is expected to carry. Missing ones are only
/// reported; the ingest step enforces the columns it actually needs.
pub const EXPECTED_COLUMNS: [&str; 16] = [
    "gameorder", "game_id", "lg_id", "date", "franch_id", "opp_franch", "elo_i", "elo_n",
    "win_equiv", "opp_id", "opp_elo_i", "opp_elo_n", "game_location", "game_result",
    "forecast", "notes",
];

#[derive(Debug, Error)]
pub enum FetchError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    #[error("CSV has only {rows} rows, expected at least {min}")]
    TooFewRows { rows: usize, min: usize },
}

/// Where raw snapshots come from.
#[async_trait]
pub trait SnapshotSource: Send + Sync {
    /// Human-readable origin, for logs.
    fn describe(&self) -> String;

    /// Return the full CSV body.
    async fn fetch_csv(&self) -> Result<String, FetchError>;
}

/// Fetches a snapshot over HTTP(S).
pub struct HttpSource {
    http: reqwest::Client,
    url: String,
}

impl HttpSource {
    pub fn new(url: &str, user_agent: &str, timeout: Duration) -> Result<Self, FetchError> {
        let http = reqwest::Client::builder()
            .user_agent(user_agent)
            .timeout(timeout)
            .build()?;
        Ok(Self {
            http,
            url: url.to_string(),
        })
    }

    pub fn from_config(source: &SourceConfig) -> Result<Self, FetchError> {
        Self::new(
            &source.nba_allelo_url,
            &source.user_agent,
            Duration::from_secs(source.timeout_secs),
        )
    }
}

#[async_trait]
impl SnapshotSource for HttpSource {
    fn describe(&self) -> String {
        self.url.clone()
    }

    async fn fetch_csv(&self) -> Result<String, FetchError> {
        let response = self.http.get(&self.url).send().await?.error_for_status()?;

        let content_type = response
            .headers()
            .get(reqwest::header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .unwrap_or("")
            .to_string();
        if !looks_like_csv(&content_type) {
            warn!("unexpected content type from {}: '{}'", self.url, content_type);
        }

        Ok(response.text().await?)
    }
}

/// True when a Content-Type header plausibly describes CSV text.
pub fn looks_like_csv(content_type: &str) -> bool {
    let ct = content_type.to_ascii_lowercase();
    ct.contains("text") || ct.contains("csv")
}

/// Shape of a downloaded snapshot.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SnapshotStats {
    pub rows: usize,
    pub columns: usize,
}

/// Count data rows and check the header of a downloaded snapshot.
///
/// Fails when the snapshot has fewer than `min_rows` rows; missing expected
/// columns are logged as a warning.
pub fn validate_snapshot(text: &str, min_rows: usize) -> Result<SnapshotStats, FetchError> {
    let mut reader = csv::ReaderBuilder::new()
        .flexible(true)
        .from_reader(text.as_bytes());
    let headers = reader.headers()?.clone();

    let mut rows = 0;
    for record in reader.records() {
        record?;
        rows += 1;
    }
    info!("Fetched {} rows, {} columns", rows, headers.len());

    if rows < min_rows {
        return Err(FetchError::TooFewRows {
            rows,
            min: min_rows,
        });
    }

    let missing: Vec<&str> = EXPECTED_COLUMNS
        .iter()
        .copied()
        .filter(|col| !headers.iter().any(|h| h.trim() == *col))
        .collect();
    if !missing.is_empty() {
        warn!(
            "expected columns missing: {:?}; available columns: {:?}",
            missing,
            headers.iter().collect::<Vec<_>>()
        );
    }

    Ok(SnapshotStats {
        rows,
        columns: headers.len(),
    })
}
