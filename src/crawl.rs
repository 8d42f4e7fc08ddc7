use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use tokio::signal;
use tokio::sync::broadcast;
use tracing::{debug, info, warn};

use torspider_client::HttpClient;
use torspider_consumers::ConsumerRegistry;
use torspider_core::config::AppConfig;
use torspider_store::TaskStore;

use crate::worker::{admit, Worker};

/// Cadence of the controller's completion poll.
const POLL_PAUSE: Duration = Duration::from_secs(5);

pub async fn run_crawl(config: AppConfig) -> Result<()> {
    let store = TaskStore::connect(&config.redis)?;
    let client = HttpClient::new(&config.http)?;
    let registry = Arc::new(ConsumerRegistry::from_config(&config.consumers));
    if registry.is_empty() {
        warn!("no consumers enabled, reports will be dropped");
    } else {
        info!(consumers = ?registry.names(), "consumer registry ready");
    }

    registry.init_all().await?;

    if config.crawl.clear_tasks {
        store.clear_all().await?;
        info!("cleared existing tasks");
    }

    let seeds = std::fs::read_to_string(&config.crawl.seeds)
        .with_context(|| format!("reading seeds file {}", config.crawl.seeds))?;
    let mut seeded = 0usize;
    for seed in seed_lines(&seeds) {
        match admit(&store, seed).await {
            Ok(true) => {
                seeded += 1;
                info!(seed, "added seed");
            }
            Ok(false) => debug!(seed, "seed already known"),
            Err(error) => warn!(seed, %error, "seed not admitted"),
        }
    }
    info!(seeded, "seeding complete");

    let (shutdown_tx, _) = broadcast::channel::<()>(1);
    let mut handles = Vec::with_capacity(config.crawl.workers);
    for id in 1..=config.crawl.workers {
        let worker = Worker {
            id,
            store: store.clone(),
            client: client.clone(),
            registry: Arc::clone(&registry),
            config: config.crawl.clone(),
            shutdown: shutdown_tx.subscribe(),
        };
        handles.push(tokio::spawn(worker.run()));
    }
    info!(workers = config.crawl.workers, "workers spawned");

    loop {
        tokio::select! {
            _ = signal::ctrl_c() => {
                warn!("interrupted");
                break;
            }
            _ = tokio::time::sleep(POLL_PAUSE) => {
                let passed = match store.passed_count().await {
                    Ok(n) => n,
                    Err(error) => {
                        warn!(%error, "store unavailable");
                        continue;
                    }
                };
                debug!(passed, "completion poll");
                if config.crawl.max_pages > 0 && passed >= config.crawl.max_pages {
                    warn!(passed, limit = config.crawl.max_pages, "pages limit reached, exiting");
                    break;
                }
            }
        }
    }

    let _ = shutdown_tx.send(());
    for handle in handles {
        let _ = handle.await;
    }
    registry.done_all().await;
    info!("shutdown complete");
    Ok(())
}

/// Trimmed, non-blank, non-comment lines of a seeds file.
fn seed_lines(text: &str) -> impl Iterator<Item = &str> {
    text.lines()
        .map(str::trim)
        .filter(|line| !line.is_empty() && !line.starts_with('#'))
}
