use std::sync::Arc;

use clap::Parser;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use stagewatch_cli::render::ViewDiff;
use stagewatch_cli::WatchConfig;
use stagewatch_client::{ConnectionManager, LinkStatus, ProgressTracker};
use stagewatch_events::StoreRegistry;

#[derive(Debug, Parser)]
#[command(name = "stagewatch", version, about = "Follow a job's realtime progress")]
struct Cli {
    /// Job to follow.
    job_id: String,
    /// REST origin of the dashboard API (overrides STAGEWATCH_API_URL).
    #[arg(long)]
    api_url: Option<String>,
    /// Write diagnostics as JSON lines.
    #[arg(long)]
    json: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();

    // --- Tracing ---
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| "stagewatch=info,stagewatch_client=info".into());
    let registry = tracing_subscriber::registry().with(filter);
    if cli.json {
        registry
            .with(tracing_subscriber::fmt::layer().json().with_writer(std::io::stderr))
            .init();
    } else {
        registry
            .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
            .init();
    }

    // --- Configuration ---
    let mut config = WatchConfig::from_env()?;
    if let Some(api_url) = cli.api_url {
        config.api_url = api_url;
    }
    tracing::info!(api_url = %config.api_url, job_id = %cli.job_id, "Loaded watcher configuration");

    // --- Tracker ---
    let manager = Arc::new(ConnectionManager::new(
        config.api_url.clone(),
        config.manager_config(),
    ));
    let stores = StoreRegistry::new();
    let tracker = ProgressTracker::start(Arc::clone(&manager), &stores, cli.job_id).await?;

    let mut view = tracker.view();
    let mut diff = ViewDiff::default();
    loop {
        let current = view.borrow_and_update().clone();
        for line in diff.lines(&current) {
            println!("{line}");
        }
        if current.link == LinkStatus::Closed {
            tracing::info!("Progress stream closed by server");
            break;
        }

        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                tracing::info!("Interrupted, closing progress stream");
                break;
            }
            changed = view.changed() => {
                if changed.is_err() {
                    break;
                }
            }
        }
    }

    tracker.stop().await;
    manager.shutdown().await;
    Ok(())
}
