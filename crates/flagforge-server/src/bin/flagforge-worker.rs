//! Background worker: owns the SQLite pool and runs the staleness sweep on
//! a fixed interval. Deliberately thin — no HTTP surface.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use clap::Parser;

use flagforge_server::{create_pool, logging, run_migrations, FlagCache, StalenessController, SystemClock};

#[derive(Parser, Debug)]
#[command(name = "flagforge-worker", about = "Feature-flag staleness worker", version)]
struct Args {
    /// Path to a TOML config file; falls back to built-in defaults and
    /// `FLAGFORGE_SERVER_*` environment variables either way.
    #[arg(long, env = "FLAGFORGE_SERVER_CONFIG")]
    config: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();
    dotenvy::dotenv().ok();

    let config = match &args.config {
        Some(path) => flagforge_server::load_config_with_file(path.clone())?,
        None => flagforge_server::load_config()?,
    };

    logging::init(&config.logging);

    tracing::info!(database = %config.database.url, tick_interval_secs = config.staleness.tick_interval_secs, "starting flagforge-worker");

    let pool = create_pool(&config.database.url).await?;
    run_migrations(&pool).await?;

    let repo = Arc::new(flagforge_server::SqliteFlagsRepository::new(pool));
    let cache = Arc::new(FlagCache::empty());
    if let Err(err) = cache.load_all(repo.as_ref()).await {
        tracing::error!(error = %err, "initial cache load failed");
    }

    let controller = StalenessController::new(repo, cache, Arc::new(SystemClock));
    let mut interval = tokio::time::interval(Duration::from_secs(config.staleness.tick_interval_secs));

    loop {
        tokio::select! {
            _ = interval.tick() => {
                if let Err(err) = controller.tick().await {
                    tracing::error!(error = %err, "staleness tick failed");
                }
            }
            _ = tokio::signal::ctrl_c() => {
                tracing::info!("received shutdown signal");
                break;
            }
        }
    }

    tracing::info!("flagforge-worker shutdown complete");
    Ok(())
}
