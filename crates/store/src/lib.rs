//! Coordination store client.
//!
//! All shared crawl state lives in Redis under five keys: a pending FIFO
//! list, its mirror set, a working set and the two terminal sets. Every
//! write that touches two keys goes through a MULTI pipeline so a task is
//! never visible in only one of them. The pop-then-move in
//! [`TaskStore::get_task`] is two round trips; a worker dying between them
//! strands the task outside every set, which the design tolerates.

use deadpool_redis::{Config as DeadpoolConfig, Pool, PoolConfig, Runtime};
use redis::AsyncCommands;
use thiserror::Error;
use tracing::{debug, error};

use torspider_core::config::RedisConfig;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("redis pool setup: {0}")]
    Create(#[from] deadpool_redis::CreatePoolError),

    #[error("redis pool: {0}")]
    Pool(#[from] deadpool_redis::PoolError),

    #[error("redis: {0}")]
    Redis(#[from] redis::RedisError),
}

/// The five key names the ledger lives under.
#[derive(Debug, Clone)]
struct StoreKeys {
    pending_list: String,
    pending_set: String,
    working_set: String,
    success_set: String,
    failure_set: String,
}

#[derive(Clone)]
pub struct TaskStore {
    pool: Pool,
    keys: StoreKeys,
    pop_timeout: f64,
}

impl TaskStore {
    /// Build the bounded pool. Connections are opened lazily, so this does
    /// not touch the server.
    pub fn connect(config: &RedisConfig) -> Result<Self, StoreError> {
        let mut pool_config = DeadpoolConfig::from_url(&config.url);
        pool_config.pool = Some(PoolConfig::new(config.max_connections));
        let pool = pool_config.create_pool(Some(Runtime::Tokio1))?;
        debug!(url = %config.url, max_connections = config.max_connections, "task store ready");
        Ok(Self {
            pool,
            keys: StoreKeys {
                pending_list: config.pending_list.clone(),
                pending_set: config.pending_set.clone(),
                working_set: config.working_set.clone(),
                success_set: config.success_set.clone(),
                failure_set: config.failure_set.clone(),
            },
            pop_timeout: config.pop_timeout,
        })
    }

    /// Register a pending task: member of the pending set, pushed onto the
    /// left of the pending queue, in one transaction. Re-adding a URL the
    /// set already holds grows only the queue; the pre-admission
    /// [`TaskStore::is_known_task`] check keeps that window narrow.
    pub async fn put_task(&self, task: &str) -> Result<(), StoreError> {
        debug!(task, "registering as pending");
        let mut conn = self.pool.get().await?;
        redis::pipe()
            .atomic()
            .sadd(&self.keys.pending_set, task)
            .lpush(&self.keys.pending_list, task)
            .exec_async(&mut conn)
            .await?;
        Ok(())
    }

    /// Wait for a task on the pending queue, then move it into the working
    /// set. Returns `None` when the blocking pop times out, so callers can
    /// notice a shutdown request while the queue is idle.
    pub async fn get_task(&self) -> Result<Option<String>, StoreError> {
        let mut conn = self.pool.get().await?;
        let popped: Option<(String, String)> = conn
            .brpop(&self.keys.pending_list, self.pop_timeout)
            .await?;
        let Some((_, task)) = popped else {
            return Ok(None);
        };
        let (removed, _added): (i64, i64) = redis::pipe()
            .atomic()
            .srem(&self.keys.pending_set, &task)
            .sadd(&self.keys.working_set, &task)
            .query_async(&mut conn)
            .await?;
        if removed != 1 {
            error!(task = %task, set = %self.keys.pending_set, "task missing from pending set");
        }
        Ok(Some(task))
    }

    /// Move a finished task from the working set into the success set.
    pub async fn register_success(&self, task: &str) -> Result<(), StoreError> {
        self.move_task(task, &self.keys.working_set, &self.keys.success_set)
            .await
    }

    /// Move a finished task from the working set into the failure set.
    pub async fn register_failure(&self, task: &str) -> Result<(), StoreError> {
        self.move_task(task, &self.keys.working_set, &self.keys.failure_set)
            .await
    }

    /// True when the URL is registered anywhere in the ledger.
    pub async fn is_known_task(&self, task: &str) -> Result<bool, StoreError> {
        let mut conn = self.pool.get().await?;
        let (pending, working, success, failure): (bool, bool, bool, bool) = redis::pipe()
            .sismember(&self.keys.pending_set, task)
            .sismember(&self.keys.working_set, task)
            .sismember(&self.keys.success_set, task)
            .sismember(&self.keys.failure_set, task)
            .query_async(&mut conn)
            .await?;
        Ok(pending || working || success || failure)
    }

    pub async fn pending_count(&self) -> Result<u64, StoreError> {
        let mut conn = self.pool.get().await?;
        Ok(conn.scard(&self.keys.pending_set).await?)
    }

    /// Finished tasks, success and failure together.
    pub async fn passed_count(&self) -> Result<u64, StoreError> {
        let mut conn = self.pool.get().await?;
        let (success, failure): (u64, u64) = redis::pipe()
            .scard(&self.keys.success_set)
            .scard(&self.keys.failure_set)
            .query_async(&mut conn)
            .await?;
        Ok(success + failure)
    }

    /// Drop all five keys.
    pub async fn clear_all(&self) -> Result<(), StoreError> {
        let mut conn = self.pool.get().await?;
        let _: () = conn
            .del((
                self.keys.pending_list.as_str(),
                self.keys.pending_set.as_str(),
                self.keys.working_set.as_str(),
                self.keys.success_set.as_str(),
                self.keys.failure_set.as_str(),
            ))
            .await?;
        Ok(())
    }

    async fn move_task(&self, task: &str, from: &str, to: &str) -> Result<(), StoreError> {
        let mut conn = self.pool.get().await?;
        let (removed, added): (i64, i64) = redis::pipe()
            .atomic()
            .srem(from, task)
            .sadd(to, task)
            .query_async(&mut conn)
            .await?;
        if removed != 1 {
            error!(task, set = from, "task missing from source set");
        }
        if added != 1 {
            error!(task, set = to, "task already in target set");
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const TASK: &str = "http://tornadoweb.org/";

    /// A store on throwaway keys. Needs a redis server; export `REDIS_URL`
    /// to point somewhere other than localhost.
    fn test_store(ns: &str) -> TaskStore {
        let config = RedisConfig {
            url: std::env::var("REDIS_URL")
                .unwrap_or_else(|_| "redis://127.0.0.1:6379/".to_string()),
            max_connections: 4,
            pop_timeout: 0.2,
            pending_list: format!("torspider:test:{ns}:pending_lst"),
            pending_set: format!("torspider:test:{ns}:pending_set"),
            working_set: format!("torspider:test:{ns}:working_set"),
            success_set: format!("torspider:test:{ns}:success_set"),
            failure_set: format!("torspider:test:{ns}:failure_set"),
        };
        TaskStore::connect(&config).unwrap()
    }

    #[tokio::test]
    #[ignore = "requires a running redis server"]
    async fn put_makes_task_known_and_pending() {
        let store = test_store("put");
        store.clear_all().await.unwrap();

        store.put_task(TASK).await.unwrap();
        assert!(store.is_known_task(TASK).await.unwrap());
        assert_eq!(store.pending_count().await.unwrap(), 1);
        assert_eq!(store.passed_count().await.unwrap(), 0);

        store.clear_all().await.unwrap();
    }

    #[tokio::test]
    #[ignore = "requires a running redis server"]
    async fn get_moves_task_to_working() {
        let store = test_store("get");
        store.clear_all().await.unwrap();

        store.put_task(TASK).await.unwrap();
        let task = store.get_task().await.unwrap();
        assert_eq!(task.as_deref(), Some(TASK));
        // out of pending, still known (working)
        assert_eq!(store.pending_count().await.unwrap(), 0);
        assert!(store.is_known_task(TASK).await.unwrap());
        // queue is drained
        assert_eq!(store.get_task().await.unwrap(), None);

        store.clear_all().await.unwrap();
    }

    #[tokio::test]
    #[ignore = "requires a running redis server"]
    async fn register_success_is_terminal() {
        let store = test_store("success");
        store.clear_all().await.unwrap();

        store.put_task(TASK).await.unwrap();
        let task = store.get_task().await.unwrap().unwrap();
        store.register_success(&task).await.unwrap();

        assert_eq!(store.pending_count().await.unwrap(), 0);
        assert_eq!(store.passed_count().await.unwrap(), 1);
        assert!(store.is_known_task(TASK).await.unwrap());

        store.clear_all().await.unwrap();
    }

    #[tokio::test]
    #[ignore = "requires a running redis server"]
    async fn register_failure_is_terminal() {
        let store = test_store("failure");
        store.clear_all().await.unwrap();

        store.put_task(TASK).await.unwrap();
        let task = store.get_task().await.unwrap().unwrap();
        store.register_failure(&task).await.unwrap();

        assert_eq!(store.pending_count().await.unwrap(), 0);
        assert_eq!(store.passed_count().await.unwrap(), 1);
        assert!(store.is_known_task(TASK).await.unwrap());

        store.clear_all().await.unwrap();
    }

    #[tokio::test]
    #[ignore = "requires a running redis server"]
    async fn empty_queue_pop_times_out() {
        let store = test_store("timeout");
        store.clear_all().await.unwrap();
        assert_eq!(store.get_task().await.unwrap(), None);
    }
}
