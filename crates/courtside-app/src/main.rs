// Courtside entry point.
//
// Startup sequence:
// 1. Initialize tracing (stderr)
// 2. Parse the stage argument (default: all)
// 3. Load config
// 4. Build the HTTP snapshot source
// 5. Run the stage(s); the first failure is logged once and ends the process
//    with a non-zero exit code

use std::process::ExitCode;

use courtside_app::fetch::HttpSource;
use courtside_app::pipeline::{Pipeline, Stage};
use courtside_core::config;

use anyhow::Context;
use tracing::{error, info};

#[tokio::main]
async fn main() -> ExitCode {
    // 1. Initialize tracing
    if let Err(e) = init_tracing() {
        eprintln!("Error: {e:#}");
        return ExitCode::FAILURE;
    }

    let result = run().await;
    if let Err(e) = &result {
        error!("{:#}", e);
    }
    ExitCode::from(exit_status(&result))
}

async fn run() -> anyhow::Result<()> {
    // 2. Stage argument
    let stage = match std::env::args().nth(1) {
        Some(arg) => arg.parse::<Stage>().map_err(anyhow::Error::msg)?,
        None => Stage::All,
    };
    info!("Courtside starting (stage: {})", stage);

    // 3. Load config
    let config = config::load_config().context("failed to load configuration")?;
    let base_dir = std::env::current_dir().context("failed to read working directory")?;
    let pipeline = Pipeline::new(config, base_dir);
    info!(
        "Config loaded: source={}, database={}",
        pipeline.config().source.nba_allelo_url,
        pipeline.database_path()
    );

    // 4. Snapshot source
    let source = HttpSource::from_config(&pipeline.config().source)
        .context("failed to build HTTP client")?;

    // 5. Run
    let now = chrono::Local::now().naive_local();
    pipeline
        .run(stage, &source, now)
        .await
        .with_context(|| format!("stage {stage} failed"))?;

    info!("Courtside finished");
    Ok(())
}

/// Process exit status for a finished run.
fn exit_status(result: &anyhow::Result<()>) -> u8 {
    match result {
        Ok(()) => 0,
        Err(_) => 1,
    }
}

/// Initialize tracing to stderr, filtered by `RUST_LOG`.
fn init_tracing() -> anyhow::Result<()> {
    use tracing_subscriber::fmt;
    use tracing_subscriber::EnvFilter;

    let subscriber = fmt::Subscriber::builder()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| {
            EnvFilter::new("courtside_app=info,courtside_nba=info,courtside_core=info,warn")
        }))
        .with_writer(std::io::stderr)
        .with_target(true)
        .with_line_number(true)
        .finish();

    tracing::subscriber::set_global_default(subscriber)
        .context("failed to set tracing subscriber")?;

    Ok(())
}
