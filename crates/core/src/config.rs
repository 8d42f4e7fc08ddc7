use serde::Deserialize;

#[derive(Debug, Deserialize, Clone, Default)]
pub struct AppConfig {
    #[serde(default)]
    pub crawl: CrawlConfig,
    #[serde(default)]
    pub http: HttpConfig,
    #[serde(default)]
    pub redis: RedisConfig,
    #[serde(default)]
    pub consumers: ConsumersConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct CrawlConfig {
    /// Worker count.
    #[serde(default = "default_workers")]
    pub workers: usize,
    /// Terminate after this many finished pages; 0 = unlimited.
    #[serde(default = "default_max_pages")]
    pub max_pages: u64,
    /// Wipe all store keys at startup.
    #[serde(default = "default_true")]
    pub clear_tasks: bool,
    #[serde(default = "default_true")]
    pub follow_outer_links: bool,
    #[serde(default = "default_false")]
    pub follow_inner_links: bool,
    /// Skip link admission while finished/pending falls below this ratio;
    /// 0 disables throttling.
    #[serde(default = "default_throttling_ratio")]
    pub throttling_ratio: f64,
    /// Seeds file, one URL per line.
    #[serde(default = "default_seeds")]
    pub seeds: String,
}

#[derive(Debug, Deserialize, Clone)]
pub struct HttpConfig {
    /// HTTP proxy as `host:port`; empty string disables the proxy.
    #[serde(default = "default_proxy")]
    pub proxy: String,
    /// TCP connect timeout, seconds.
    #[serde(default = "default_connect_timeout")]
    pub connect_timeout: f64,
    /// Full request timeout, seconds.
    #[serde(default = "default_request_timeout")]
    pub request_timeout: f64,
    /// TLS certificate verification.
    #[serde(default = "default_false")]
    pub validate_cert: bool,
}

#[derive(Debug, Deserialize, Clone)]
pub struct RedisConfig {
    #[serde(default = "default_redis_url")]
    pub url: String,
    /// Upper bound on pooled connections.
    #[serde(default = "default_max_connections")]
    pub max_connections: usize,
    /// BRPOP timeout, seconds. Doubles as the shutdown-release latency for
    /// workers parked on an empty queue.
    #[serde(default = "default_pop_timeout")]
    pub pop_timeout: f64,
    #[serde(default = "default_pending_list")]
    pub pending_list: String,
    #[serde(default = "default_pending_set")]
    pub pending_set: String,
    #[serde(default = "default_working_set")]
    pub working_set: String,
    #[serde(default = "default_success_set")]
    pub success_set: String,
    #[serde(default = "default_failure_set")]
    pub failure_set: String,
}

#[derive(Debug, Deserialize, Clone)]
pub struct ConsumersConfig {
    /// Allow-list of enabled consumer plug-ins, in fan-out order.
    #[serde(default = "default_consumers")]
    pub enabled: Vec<String>,
    /// Target file for the `jsonl` consumer.
    #[serde(default = "default_report_file")]
    pub report_file: String,
}

impl Default for CrawlConfig {
    fn default() -> Self {
        Self {
            workers: default_workers(),
            max_pages: default_max_pages(),
            clear_tasks: true,
            follow_outer_links: true,
            follow_inner_links: false,
            throttling_ratio: default_throttling_ratio(),
            seeds: default_seeds(),
        }
    }
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            proxy: default_proxy(),
            connect_timeout: default_connect_timeout(),
            request_timeout: default_request_timeout(),
            validate_cert: false,
        }
    }
}

impl Default for RedisConfig {
    fn default() -> Self {
        Self {
            url: default_redis_url(),
            max_connections: default_max_connections(),
            pop_timeout: default_pop_timeout(),
            pending_list: default_pending_list(),
            pending_set: default_pending_set(),
            working_set: default_working_set(),
            success_set: default_success_set(),
            failure_set: default_failure_set(),
        }
    }
}

impl Default for ConsumersConfig {
    fn default() -> Self {
        Self {
            enabled: default_consumers(),
            report_file: default_report_file(),
        }
    }
}

fn default_workers() -> usize { 10 }
fn default_max_pages() -> u64 { 100 }
fn default_true() -> bool { true }
fn default_false() -> bool { false }
fn default_throttling_ratio() -> f64 { 0.9 }
fn default_seeds() -> String { "seeds.txt".to_string() }
fn default_proxy() -> String { "localhost:8118".to_string() }
fn default_connect_timeout() -> f64 { 10.0 }
fn default_request_timeout() -> f64 { 20.0 }
fn default_redis_url() -> String { "redis://127.0.0.1:6379/".to_string() }
fn default_max_connections() -> usize { 200 }
fn default_pop_timeout() -> f64 { 5.0 }
fn default_pending_list() -> String { "torspider:pending_lst".to_string() }
fn default_pending_set() -> String { "torspider:pending_set".to_string() }
fn default_working_set() -> String { "torspider:working_set".to_string() }
fn default_success_set() -> String { "torspider:success_set".to_string() }
fn default_failure_set() -> String { "torspider:failure_set".to_string() }
fn default_consumers() -> Vec<String> { vec!["log".to_string()] }
fn default_report_file() -> String { "reports.jsonl".to_string() }

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_config_uses_defaults() {
        let config: AppConfig = toml::from_str("").unwrap();
        assert_eq!(config.crawl.workers, 10);
        assert_eq!(config.crawl.max_pages, 100);
        assert!(config.crawl.clear_tasks);
        assert!(config.crawl.follow_outer_links);
        assert!(!config.crawl.follow_inner_links);
        assert_eq!(config.http.proxy, "localhost:8118");
        assert_eq!(config.redis.max_connections, 200);
        assert_eq!(config.redis.pending_list, "torspider:pending_lst");
        assert_eq!(config.consumers.enabled, ["log"]);
    }

    #[test]
    fn partial_section_keeps_other_defaults() {
        let config: AppConfig = toml::from_str(
            r#"
            [crawl]
            workers = 3
            max_pages = 0

            [redis]
            pending_list = "test:pending_lst"
            "#,
        )
        .unwrap();
        assert_eq!(config.crawl.workers, 3);
        assert_eq!(config.crawl.max_pages, 0);
        assert!((config.crawl.throttling_ratio - 0.9).abs() < f64::EPSILON);
        assert_eq!(config.redis.pending_list, "test:pending_lst");
        assert_eq!(config.redis.working_set, "torspider:working_set");
    }
}
