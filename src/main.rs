use meta_ads_pipeline::config::Config;
use meta_ads_pipeline::worker::run_job;
use std::error::Error;
use tokio::time;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<(), Box<dyn Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_target(true)
        .init();

    // Load configuration
    let config = Config::from_env()?;
    info!(
        accounts = config.accounts.accounts().len(),
        tokens = config.accounts.token_count(),
        mappings = config.sync.mappings.len(),
        "Configuration loaded"
    );

    loop {
        let today = chrono::Local::now().date_naive();
        let succeeded = match run_job(&config, today).await {
            Ok(summary) => {
                info!(
                    accounts_ok = summary.accounts.succeeded.len(),
                    accounts_failed = summary.accounts.failed.len(),
                    syncs_failed = summary.syncs.iter().filter(|s| s.is_err()).count(),
                    "Run finished"
                );
                summary.is_success()
            }
            Err(e) => {
                error!(error = %e, "Run aborted");
                false
            }
        };

        match config.worker_interval {
            Some(interval) => time::sleep(interval).await,
            None if succeeded => return Ok(()),
            None => return Err("run finished with failures".into()),
        }
    }
}
