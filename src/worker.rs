use std::sync::Arc;
use std::time::Duration;

use tokio::sync::broadcast;
use tokio::sync::broadcast::error::TryRecvError;
use tracing::{debug, info, warn};

use torspider_client::HttpClient;
use torspider_consumers::ConsumerRegistry;
use torspider_core::config::CrawlConfig;
use torspider_core::{CrawlError, PageRecord, Report};
use torspider_parser::Page;
use torspider_store::TaskStore;
use torspider_urlnorm::{join_parts, norm};

/// Breather between tasks so a warm cache cannot monopolize the scheduler.
const YIELD_PAUSE: Duration = Duration::from_millis(10);
/// Back-off before retrying a store operation that failed.
const STORE_RETRY_PAUSE: Duration = Duration::from_secs(1);

/// Canonicalize a URL and enqueue it unless the ledger already knows it.
/// Returns whether the URL actually entered the queue.
pub async fn admit(store: &TaskStore, url: &str) -> Result<bool, CrawlError> {
    let parts = norm(url, None)?;
    let task = join_parts(&parts);
    let known = store
        .is_known_task(&task)
        .await
        .map_err(|e| CrawlError::Store(e.to_string()))?;
    if known {
        debug!(task = %task, "already known, skipping");
        return Ok(false);
    }
    store
        .put_task(&task)
        .await
        .map_err(|e| CrawlError::Store(e.to_string()))?;
    info!(task = %task, "admitted");
    Ok(true)
}

pub struct Worker {
    pub id: usize,
    pub store: TaskStore,
    pub client: HttpClient,
    pub registry: Arc<ConsumerRegistry>,
    pub config: CrawlConfig,
    pub shutdown: broadcast::Receiver<()>,
}

impl Worker {
    /// Drive tasks through the ledger until shutdown or the pages limit.
    pub async fn run(mut self) {
        info!(worker_id = self.id, "worker started");
        loop {
            match self.shutdown.try_recv() {
                Err(TryRecvError::Empty) => {}
                _ => {
                    info!(worker_id = self.id, "worker shutting down");
                    break;
                }
            }

            let task = match self.store.get_task().await {
                Ok(Some(task)) => task,
                // blocking pop timed out; loop around and re-check shutdown
                Ok(None) => continue,
                Err(error) => {
                    warn!(worker_id = self.id, %error, "store unavailable, retrying");
                    tokio::time::sleep(STORE_RETRY_PAUSE).await;
                    continue;
                }
            };
            info!(worker_id = self.id, task = %task, "got task");

            if self.process(&task).await {
                info!(worker_id = self.id, "worker exiting on pages limit");
                break;
            }
            tokio::time::sleep(YIELD_PAUSE).await;
        }
    }

    /// One full task: fetch, extract, report, settle, admit links.
    /// Returns true when the pages limit has been reached.
    async fn process(&self, task: &str) -> bool {
        let record = match self.visit_and_extract(task).await {
            Ok(record) => record,
            Err(error) => {
                warn!(worker_id = self.id, task, %error, "task failed");
                self.registry
                    .fanout(&Report::failure(task, error.to_string()))
                    .await;
                self.settle(task, false).await;
                return false;
            }
        };

        let links = record.links.clone();
        self.registry.fanout(&Report::success(task, record)).await;
        self.settle(task, true).await;
        info!(worker_id = self.id, task, "task completed");

        if self.config.max_pages > 0 {
            if let Ok(passed) = self.store.passed_count().await {
                if limit_reached(passed, self.config.max_pages) {
                    warn!(
                        worker_id = self.id,
                        passed,
                        limit = self.config.max_pages,
                        "pages limit reached"
                    );
                    return true;
                }
            }
        }

        if self.throttled().await {
            debug!(worker_id = self.id, "throttled, skipping link admission");
            return false;
        }

        if let Some(links) = links {
            let mut candidates = Vec::new();
            if self.config.follow_outer_links {
                candidates.extend(links.outer);
            }
            if self.config.follow_inner_links {
                candidates.extend(links.inner);
            }
            for link in candidates {
                if let Err(error) = admit(&self.store, &link).await {
                    debug!(worker_id = self.id, link = %link, %error, "link not admitted");
                }
            }
        }

        false
    }

    async fn visit_and_extract(&self, task: &str) -> Result<PageRecord, CrawlError> {
        let response = self.client.visit(task).await?;
        let url = task.to_string();
        // HTML parsing is CPU-bound; keep it off the async scheduler.
        tokio::task::spawn_blocking(move || -> Result<PageRecord, CrawlError> {
            Ok(Page::new(url, response)?.to_record())
        })
        .await
        .map_err(|e| CrawlError::Parse(e.to_string()))?
    }

    /// Record the terminal transition, waiting out store outages.
    async fn settle(&self, task: &str, success: bool) {
        loop {
            let result = if success {
                self.store.register_success(task).await
            } else {
                self.store.register_failure(task).await
            };
            match result {
                Ok(()) => return,
                Err(error) => {
                    warn!(worker_id = self.id, task, %error, "store unavailable, retrying");
                    tokio::time::sleep(STORE_RETRY_PAUSE).await;
                }
            }
        }
    }

    /// Feedback brake against queue blow-up: while finished/pending is below
    /// the configured ratio, stop admitting new links.
    async fn throttled(&self) -> bool {
        if self.config.throttling_ratio <= 0.0 {
            return false;
        }
        let (pending, passed) = match (
            self.store.pending_count().await,
            self.store.passed_count().await,
        ) {
            (Ok(pending), Ok(passed)) => (pending, passed),
            _ => return false,
        };
        should_throttle(passed, pending, self.config.throttling_ratio)
    }
}

fn limit_reached(passed: u64, max_pages: u64) -> bool {
    max_pages > 0 && passed >= max_pages
}

fn should_throttle(passed: u64, pending: u64, ratio: f64) -> bool {
    ratio > 0.0 && pending > 0 && (passed as f64 / pending as f64) < ratio
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn zero_ratio_never_throttles() {
        assert!(!should_throttle(0, 1000, 0.0));
        assert!(!should_throttle(100, 1, 0.0));
    }

    #[test]
    fn empty_queue_never_throttles() {
        assert!(!should_throttle(0, 0, 0.9));
        assert!(!should_throttle(500, 0, 0.9));
    }

    #[test]
    fn throttles_while_backlog_outgrows_progress() {
        // 10 finished vs 100 pending: 0.1 < 0.9
        assert!(should_throttle(10, 100, 0.9));
        // caught up: 90/100 handled, ratio met
        assert!(!should_throttle(90, 100, 0.9));
    }

    #[test]
    fn zero_max_pages_never_reaches_limit() {
        assert!(!limit_reached(0, 0));
        assert!(!limit_reached(1_000_000, 0));
    }

    #[test]
    fn limit_reached_at_threshold() {
        assert!(!limit_reached(99, 100));
        assert!(limit_reached(100, 100));
        assert!(limit_reached(101, 100));
    }
}
