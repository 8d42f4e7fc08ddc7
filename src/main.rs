mod cli;
mod commands;
mod crawl;
mod worker;

use anyhow::Result;
use clap::Parser;
use tracing::warn;

#[global_allocator]
static GLOBAL: mimalloc::MiMalloc = mimalloc::MiMalloc;

use torspider_core::config::AppConfig;

use crate::cli::{Cli, Commands};
use crate::crawl::run_crawl;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();

    let config_str = std::fs::read_to_string(&cli.config).unwrap_or_else(|_| {
        warn!(path = %cli.config, "config file not found, using defaults");
        include_str!("../config/default.toml").to_string()
    });
    let mut config: AppConfig = toml::from_str(&config_str)?;

    // Environment overrides for deployment tuning
    if let Ok(v) = std::env::var("TORSPIDER_REDIS_URL") {
        config.redis.url = v;
    }
    if let Ok(v) = std::env::var("TORSPIDER_PROXY") {
        config.http.proxy = v;
    }
    if let Ok(v) = std::env::var("TORSPIDER_WORKERS") {
        if let Ok(n) = v.parse::<usize>() {
            if n > 0 {
                config.crawl.workers = n;
            }
        }
    }
    if let Ok(v) = std::env::var("TORSPIDER_MAX_PAGES") {
        if let Ok(n) = v.parse::<u64>() {
            config.crawl.max_pages = n;
        }
    }

    match cli.command {
        Commands::Crawl {
            seeds,
            max_pages,
            workers,
        } => {
            if let Some(path) = seeds {
                config.crawl.seeds = path;
            }
            if let Some(n) = max_pages {
                config.crawl.max_pages = n;
            }
            if let Some(n) = workers.filter(|&n| n > 0) {
                config.crawl.workers = n;
            }
            run_crawl(config).await?;
        }
        Commands::Status => {
            commands::status::run(&config).await?;
        }
    }

    Ok(())
}
