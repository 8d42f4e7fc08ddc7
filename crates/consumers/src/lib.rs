//! Report consumers.
//!
//! Every consumer is a named plug-in with three extension points: `init`
//! runs once before the crawl, `consume` receives every terminal report,
//! `done` runs once after the crawl. The registry is assembled from the
//! operator's allow-list at startup and never changes afterwards.

pub mod sinks;

use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;
use tracing::{error, warn};

use torspider_core::config::ConsumersConfig;
use torspider_core::Report;

use crate::sinks::{JsonlSink, LogSink};

#[async_trait]
pub trait Consumer: Send + Sync {
    fn name(&self) -> &'static str;

    /// Runs once before the crawl starts.
    async fn init(&self) -> Result<()> {
        Ok(())
    }

    /// Receives one report per terminal transition.
    async fn consume(&self, report: &Report) -> Result<()>;

    /// Runs once after the crawl finishes.
    async fn done(&self) -> Result<()> {
        Ok(())
    }
}

/// The frozen, ordered set of enabled consumers.
pub struct ConsumerRegistry {
    consumers: Vec<Arc<dyn Consumer>>,
}

impl ConsumerRegistry {
    /// Instantiate every enabled plug-in. Unknown names are logged and
    /// skipped so a stale allow-list does not stop the crawl.
    pub fn from_config(config: &ConsumersConfig) -> Self {
        let mut consumers: Vec<Arc<dyn Consumer>> = Vec::new();
        for name in &config.enabled {
            match name.as_str() {
                "log" => consumers.push(Arc::new(LogSink)),
                "jsonl" => consumers.push(Arc::new(JsonlSink::new(&config.report_file))),
                other => warn!(consumer = other, "unknown consumer, skipping"),
            }
        }
        Self { consumers }
    }

    pub fn names(&self) -> Vec<&'static str> {
        self.consumers.iter().map(|c| c.name()).collect()
    }

    pub fn is_empty(&self) -> bool {
        self.consumers.is_empty()
    }

    /// Run every `init` hook. A failing hook aborts startup.
    pub async fn init_all(&self) -> Result<()> {
        for consumer in &self.consumers {
            consumer.init().await?;
        }
        Ok(())
    }

    /// Hand the report to every consumer in registration order. A failing
    /// consumer is logged and skipped; it never affects the task.
    pub async fn fanout(&self, report: &Report) {
        for consumer in &self.consumers {
            if let Err(error) = consumer.consume(report).await {
                error!(consumer = consumer.name(), %error, "consumer failed");
            }
        }
    }

    /// Run every `done` hook. Failures are logged; shutdown continues.
    pub async fn done_all(&self) {
        for consumer in &self.consumers {
            if let Err(error) = consumer.done().await {
                error!(consumer = consumer.name(), %error, "done hook failed");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use super::*;

    struct Counting {
        seen: AtomicUsize,
    }

    #[async_trait]
    impl Consumer for Counting {
        fn name(&self) -> &'static str {
            "counting"
        }

        async fn consume(&self, _report: &Report) -> Result<()> {
            self.seen.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    struct Failing;

    #[async_trait]
    impl Consumer for Failing {
        fn name(&self) -> &'static str {
            "failing"
        }

        async fn consume(&self, _report: &Report) -> Result<()> {
            anyhow::bail!("sink is broken")
        }
    }

    #[tokio::test]
    async fn fanout_reaches_every_consumer_despite_failures() {
        let counting = Arc::new(Counting {
            seen: AtomicUsize::new(0),
        });
        let consumers: Vec<Arc<dyn Consumer>> = vec![Arc::new(Failing), counting.clone()];
        let registry = ConsumerRegistry { consumers };
        let report = Report::failure("http://a/", "boom");
        registry.fanout(&report).await;
        registry.fanout(&report).await;
        assert_eq!(counting.seen.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn unknown_names_are_skipped() {
        let config = ConsumersConfig {
            enabled: vec!["log".to_string(), "nonsense".to_string()],
            report_file: "reports.jsonl".to_string(),
        };
        let registry = ConsumerRegistry::from_config(&config);
        assert_eq!(registry.names(), ["log"]);
    }

    #[test]
    fn registration_order_is_kept() {
        let config = ConsumersConfig {
            enabled: vec!["jsonl".to_string(), "log".to_string()],
            report_file: "reports.jsonl".to_string(),
        };
        let registry = ConsumerRegistry::from_config(&config);
        assert_eq!(registry.names(), ["jsonl", "log"]);
    }
}
