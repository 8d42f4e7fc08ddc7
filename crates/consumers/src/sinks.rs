//! Built-in report sinks.

use anyhow::{Context, Result};
use async_trait::async_trait;
use tokio::fs::{File, OpenOptions};
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;
use tracing::info;

use torspider_core::Report;

use crate::Consumer;

/// Logs a one-line summary of every report.
pub struct LogSink;

#[async_trait]
impl Consumer for LogSink {
    fn name(&self) -> &'static str {
        "log"
    }

    async fn consume(&self, report: &Report) -> Result<()> {
        match (&report.page, &report.error) {
            (Some(page), _) => info!(
                url = %report.url,
                title = page.title.as_deref().unwrap_or(""),
                language = page.language.as_deref().unwrap_or(""),
                "page",
            ),
            (None, Some(error)) => info!(url = %report.url, error = %error, "failure"),
            (None, None) => info!(url = %report.url, "empty report"),
        }
        Ok(())
    }
}

/// Appends every report as one JSON line.
pub struct JsonlSink {
    path: String,
    file: Mutex<Option<File>>,
}

impl JsonlSink {
    pub fn new(path: &str) -> Self {
        Self {
            path: path.to_string(),
            file: Mutex::new(None),
        }
    }
}

#[async_trait]
impl Consumer for JsonlSink {
    fn name(&self) -> &'static str {
        "jsonl"
    }

    async fn init(&self) -> Result<()> {
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .await
            .with_context(|| format!("opening report file {}", self.path))?;
        *self.file.lock().await = Some(file);
        info!(path = %self.path, "report file ready");
        Ok(())
    }

    async fn consume(&self, report: &Report) -> Result<()> {
        let mut line = serde_json::to_string(report)?;
        line.push('\n');
        let mut guard = self.file.lock().await;
        let file = guard
            .as_mut()
            .context("report file is not open; init did not run")?;
        file.write_all(line.as_bytes()).await?;
        Ok(())
    }

    async fn done(&self) -> Result<()> {
        if let Some(file) = self.file.lock().await.as_mut() {
            file.flush().await?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use torspider_core::PageRecord;

    use super::*;

    #[tokio::test]
    async fn jsonl_writes_one_line_per_report() {
        let dir = std::env::temp_dir().join("torspider-jsonl-test");
        tokio::fs::create_dir_all(&dir).await.unwrap();
        let path = dir.join(format!("reports-{}.jsonl", std::process::id()));
        let path_str = path.to_str().unwrap().to_string();
        let _ = tokio::fs::remove_file(&path).await;

        let sink = JsonlSink::new(&path_str);
        sink.init().await.unwrap();
        sink.consume(&Report::success("http://a/", PageRecord::default()))
            .await
            .unwrap();
        sink.consume(&Report::failure("http://b/", "HTTP status 404"))
            .await
            .unwrap();
        sink.done().await.unwrap();

        let contents = tokio::fs::read_to_string(&path).await.unwrap();
        let lines: Vec<&str> = contents.lines().collect();
        assert_eq!(lines.len(), 2);
        assert!(lines[0].contains("\"url\":\"http://a/\""));
        assert!(lines[1].contains("\"error\":\"HTTP status 404\""));

        let _ = tokio::fs::remove_file(&path).await;
    }

    #[tokio::test]
    async fn jsonl_consume_without_init_fails() {
        let sink = JsonlSink::new("/nonexistent/reports.jsonl");
        let report = Report::failure("http://a/", "boom");
        assert!(sink.consume(&report).await.is_err());
    }
}
