// Configuration loading and parsing (config/pipeline.toml).

use serde::Deserialize;
use std::path::{Path, PathBuf};
use thiserror::Error;

/// The shipped default configuration, written to `config/pipeline.toml` when
/// no config file exists yet.
pub const DEFAULT_PIPELINE_TOML: &str = include_str!("../../../defaults/pipeline.toml");

/// Environment variable overriding `source.nba_allelo_url`.
pub const ENV_SOURCE_URL: &str = "NBA_ALLELO_URL";
/// Upper bound for `export.elo_trend_years`.
pub const MAX_ELO_TREND_YEARS: u32 = 100;

/// Environment variable overriding `database.path`.
pub const ENV_DB_PATH: &str = "COURTSIDE_DB_PATH";

// ---------------------------------------------------------------------------
// Error types
// ---------------------------------------------------------------------------

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("config file not found: {path}")]
    FileNotFound { path: PathBuf },

    #[error("failed to parse config file {path}: {source}")]
    ParseError {
        path: PathBuf,
        source: toml::de::Error,
    },

    #[error("validation error for field `{field}`: {message}")]
    ValidationError { field: String, message: String },

    #[error("failed to write default config to {path}: {source}")]
    DefaultsWriteError {
        path: PathBuf,
        source: std::io::Error,
    },
}

// ---------------------------------------------------------------------------
// pipeline.toml structs
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    pub source: SourceConfig,
    pub paths: PathsConfig,
    pub database: DatabaseConfig,
    pub ingest: IngestConfig,
    pub export: ExportConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SourceConfig {
    pub nba_allelo_url: String,
    pub user_agent: String,
    pub timeout_secs: u64,
    pub min_row_count: usize,
}

#[derive(Debug, Clone, Deserialize)]
pub struct PathsConfig {
    pub raw_dir: String,
    pub export_dir: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct DatabaseConfig {
    pub path: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct IngestConfig {
    pub on_invalid_row: InvalidRowPolicy,
}

/// What the CSV boundary does with a row that fails validation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum InvalidRowPolicy {
    /// Log the row, count it, keep going.
    Skip,
    /// Abort ingestion on the first invalid row.
    Fail,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ExportConfig {
    pub elo_trend_years: u32,
}

// ---------------------------------------------------------------------------
// Loading logic
// ---------------------------------------------------------------------------

/// Parse a config from TOML text. `path` is only used for error messages.
pub fn parse_config(text: &str, path: &Path) -> Result<Config, ConfigError> {
    toml::from_str(text).map_err(|e| ConfigError::ParseError {
        path: path.to_path_buf(),
        source: e,
    })
}

/// Load and validate `config/pipeline.toml` relative to `base_dir`, without
/// writing defaults and without environment overrides.
pub fn load_config_from(base_dir: &Path) -> Result<Config, ConfigError> {
    let path = config_path(base_dir);
    let text = std::fs::read_to_string(&path)
        .map_err(|_| ConfigError::FileNotFound { path: path.clone() })?;
    let config = parse_config(&text, &path)?;
    validate(&config)?;
    Ok(config)
}

/// Write the default config to `config/pipeline.toml` if it does not exist.
/// Returns the path written, or `None` when a config was already present.
pub fn ensure_config_file(base_dir: &Path) -> Result<Option<PathBuf>, ConfigError> {
    let path = config_path(base_dir);
    if path.exists() {
        return Ok(None);
    }
    let write_err = |source| ConfigError::DefaultsWriteError {
        path: path.clone(),
        source,
    };
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).map_err(write_err)?;
    }
    std::fs::write(&path, DEFAULT_PIPELINE_TOML).map_err(write_err)?;
    Ok(Some(path))
}

/// Convenience wrapper: loads config relative to the current working
/// directory, creating it from defaults first and applying environment
/// overrides afterwards.
pub fn load_config() -> Result<Config, ConfigError> {
    let cwd = std::env::current_dir().map_err(|_| ConfigError::FileNotFound {
        path: PathBuf::from("."),
    })?;
    ensure_config_file(&cwd)?;
    let mut config = load_config_from(&cwd)?;
    apply_overrides(&mut config, |key| std::env::var(key).ok());
    validate(&config)?;
    Ok(config)
}

/// Apply overrides from a key lookup (normally the process environment).
/// Empty values are ignored.
pub fn apply_overrides<F>(config: &mut Config, lookup: F)
where
    F: Fn(&str) -> Option<String>,
{
    if let Some(url) = lookup(ENV_SOURCE_URL).filter(|v| !v.trim().is_empty()) {
        config.source.nba_allelo_url = url;
    }
    if let Some(db) = lookup(ENV_DB_PATH).filter(|v| !v.trim().is_empty()) {
        config.database.path = db;
    }
}

fn config_path(base_dir: &Path) -> PathBuf {
    base_dir.join("config").join("pipeline.toml")
}

// ---------------------------------------------------------------------------
// Validation
// ---------------------------------------------------------------------------

pub fn validate(config: &Config) -> Result<(), ConfigError> {
    let non_empty: &[(&str, &str)] = &[
        ("source.nba_allelo_url", &config.source.nba_allelo_url),
        ("paths.raw_dir", &config.paths.raw_dir),
        ("paths.export_dir", &config.paths.export_dir),
        ("database.path", &config.database.path),
    ];
    for (field, value) in non_empty {
        if value.trim().is_empty() {
            return Err(ConfigError::ValidationError {
                field: field.to_string(),
                message: "must not be empty".into(),
            });
        }
    }

    if config.source.timeout_secs == 0 {
        return Err(ConfigError::ValidationError {
            field: "source.timeout_secs".into(),
            message: "must be greater than 0".into(),
        });
    }

    if config.source.min_row_count == 0 {
        return Err(ConfigError::ValidationError {
            field: "source.min_row_count".into(),
            message: "must be greater than 0".into(),
        });
    }

    let years = config.export.elo_trend_years;
    if years == 0 || years > MAX_ELO_TREND_YEARS {
        return Err(ConfigError::ValidationError {
            field: "export.elo_trend_years".into(),
            message: format!("must be between 1 and {MAX_ELO_TREND_YEARS}"),
        });
    }

    Ok(())
}

// ---------------------------------------------------------------------------
// Unit tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    fn scratch_dir(name: &str) -> PathBuf {
        let tmp = std::env::temp_dir().join(name);
        let _ = fs::remove_dir_all(&tmp);
        fs::create_dir_all(&tmp).unwrap();
        tmp
    }

    fn write_config(base: &Path, text: &str) {
        let config_dir = base.join("config");
        fs::create_dir_all(&config_dir).unwrap();
        fs::write(config_dir.join("pipeline.toml"), text).unwrap();
    }

    #[test]
    fn default_config_parses_and_validates() {
        let config = parse_config(DEFAULT_PIPELINE_TOML, Path::new("defaults/pipeline.toml"))
            .expect("default config should parse");
        validate(&config).expect("default config should validate");

        assert!(config.source.nba_allelo_url.ends_with("nbaallelo.csv"));
        assert_eq!(config.source.user_agent, "Sports Analytics Pipeline/1.0");
        assert_eq!(config.source.timeout_secs, 30);
        assert_eq!(config.source.min_row_count, 1000);
        assert_eq!(config.paths.raw_dir, "data/raw");
        assert_eq!(config.paths.export_dir, "data/exports");
        assert_eq!(config.database.path, "data/warehouse/sports.db");
        assert_eq!(config.ingest.on_invalid_row, InvalidRowPolicy::Skip);
        assert_eq!(config.export.elo_trend_years, 2);
    }

    #[test]
    fn ensure_config_file_writes_default_once() {
        let tmp = scratch_dir("courtside_config_ensure");

        let written = ensure_config_file(&tmp).unwrap();
        assert!(written.is_some());
        assert!(tmp.join("config/pipeline.toml").exists());

        // Second call keeps the existing file untouched.
        fs::write(tmp.join("config/pipeline.toml"), "# custom\n").unwrap();
        assert!(ensure_config_file(&tmp).unwrap().is_none());
        let content = fs::read_to_string(tmp.join("config/pipeline.toml")).unwrap();
        assert_eq!(content, "# custom\n");

        let _ = fs::remove_dir_all(&tmp);
    }

    #[test]
    fn load_config_from_reads_written_file() {
        let tmp = scratch_dir("courtside_config_load");
        ensure_config_file(&tmp).unwrap();

        let config = load_config_from(&tmp).expect("should load");
        assert_eq!(config.database.path, "data/warehouse/sports.db");

        let _ = fs::remove_dir_all(&tmp);
    }

    #[test]
    fn file_not_found_for_missing_config() {
        let tmp = scratch_dir("courtside_config_missing");

        let err = load_config_from(&tmp).unwrap_err();
        match &err {
            ConfigError::FileNotFound { path } => assert!(path.ends_with("pipeline.toml")),
            other => panic!("expected FileNotFound, got: {other}"),
        }

        let _ = fs::remove_dir_all(&tmp);
    }

    #[test]
    fn parse_error_for_invalid_toml() {
        let tmp = scratch_dir("courtside_config_invalid");
        write_config(&tmp, "this is not valid [[[ toml");

        let err = load_config_from(&tmp).unwrap_err();
        assert!(matches!(err, ConfigError::ParseError { .. }));

        let _ = fs::remove_dir_all(&tmp);
    }

    #[test]
    fn unknown_invalid_row_policy_is_a_parse_error() {
        let text = DEFAULT_PIPELINE_TOML.replace(
            "on_invalid_row = \"skip\"",
            "on_invalid_row = \"ignore\"",
        );
        let err = parse_config(&text, Path::new("pipeline.toml")).unwrap_err();
        assert!(matches!(err, ConfigError::ParseError { .. }));
    }

    #[test]
    fn fail_policy_parses() {
        let text = DEFAULT_PIPELINE_TOML.replace(
            "on_invalid_row = \"skip\"",
            "on_invalid_row = \"fail\"",
        );
        let config = parse_config(&text, Path::new("pipeline.toml")).unwrap();
        assert_eq!(config.ingest.on_invalid_row, InvalidRowPolicy::Fail);
    }

    #[test]
    fn rejects_zero_timeout() {
        let tmp = scratch_dir("courtside_config_zero_timeout");
        write_config(
            &tmp,
            &DEFAULT_PIPELINE_TOML.replace("timeout_secs   = 30", "timeout_secs   = 0"),
        );

        let err = load_config_from(&tmp).unwrap_err();
        match &err {
            ConfigError::ValidationError { field, .. } => {
                assert_eq!(field, "source.timeout_secs");
            }
            other => panic!("expected ValidationError, got: {other}"),
        }

        let _ = fs::remove_dir_all(&tmp);
    }

    #[test]
    fn rejects_zero_min_row_count() {
        let text = DEFAULT_PIPELINE_TOML.replace("min_row_count  = 1000", "min_row_count  = 0");
        let config = parse_config(&text, Path::new("pipeline.toml")).unwrap();
        match validate(&config).unwrap_err() {
            ConfigError::ValidationError { field, .. } => {
                assert_eq!(field, "source.min_row_count");
            }
            other => panic!("expected ValidationError, got: {other}"),
        }
    }

    #[test]
    fn rejects_empty_database_path() {
        let text = DEFAULT_PIPELINE_TOML.replace(
            "path = \"data/warehouse/sports.db\"",
            "path = \"  \"",
        );
        let config = parse_config(&text, Path::new("pipeline.toml")).unwrap();
        match validate(&config).unwrap_err() {
            ConfigError::ValidationError { field, .. } => assert_eq!(field, "database.path"),
            other => panic!("expected ValidationError, got: {other}"),
        }
    }

    #[test]
    fn rejects_zero_trend_window() {
        let text = DEFAULT_PIPELINE_TOML.replace("elo_trend_years = 2", "elo_trend_years = 0");
        let config = parse_config(&text, Path::new("pipeline.toml")).unwrap();
        match validate(&config).unwrap_err() {
            ConfigError::ValidationError { field, .. } => {
                assert_eq!(field, "export.elo_trend_years");
            }
            other => panic!("expected ValidationError, got: {other}"),
        }
    }

    #[test]
    fn rejects_oversized_trend_window() {
        let text = DEFAULT_PIPELINE_TOML.replace("elo_trend_years = 2", "elo_trend_years = 4000000000");
        let config = parse_config(&text, Path::new("pipeline.toml")).unwrap();
        match validate(&config).unwrap_err() {
            ConfigError::ValidationError { field, message } => {
                assert_eq!(field, "export.elo_trend_years");
                assert!(message.contains("100"));
            }
            other => panic!("expected ValidationError, got: {other}"),
        }

        let text = DEFAULT_PIPELINE_TOML.replace("elo_trend_years = 2", "elo_trend_years = 100");
        let config = parse_config(&text, Path::new("pipeline.toml")).unwrap();
        assert!(validate(&config).is_ok());
    }

    #[test]
    fn overrides_replace_url_and_db_path() {
        let mut config =
            parse_config(DEFAULT_PIPELINE_TOML, Path::new("pipeline.toml")).unwrap();
        apply_overrides(&mut config, |key| match key {
            ENV_SOURCE_URL => Some("http://localhost/elo.csv".to_string()),
            ENV_DB_PATH => Some("/tmp/other.db".to_string()),
            _ => None,
        });
        assert_eq!(config.source.nba_allelo_url, "http://localhost/elo.csv");
        assert_eq!(config.database.path, "/tmp/other.db");
    }

    #[test]
    fn blank_overrides_are_ignored() {
        let mut config =
            parse_config(DEFAULT_PIPELINE_TOML, Path::new("pipeline.toml")).unwrap();
        apply_overrides(&mut config, |_| Some("   ".to_string()));
        assert!(config.source.nba_allelo_url.ends_with("nbaallelo.csv"));
        assert_eq!(config.database.path, "data/warehouse/sports.db");
    }
}
