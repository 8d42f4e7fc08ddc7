use anyhow::Result;
use torspider_core::config::AppConfig;
use torspider_store::TaskStore;

pub async fn run(config: &AppConfig) -> Result<()> {
    let store = TaskStore::connect(&config.redis)?;

    let pending = store.pending_count().await?;
    let passed = store.passed_count().await?;

    println!("Store:          {}", config.redis.url);
    println!("Pending tasks:  {}", pending);
    println!("Finished tasks: {}", passed);

    Ok(())
}
