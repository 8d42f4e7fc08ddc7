//! HTTP fetcher.
//!
//! One GET per task, routed through the configured HTTP proxy, followed by
//! header validation. The fetcher never retries; anything wrong with the
//! response is a [`CrawlError`] the worker turns into a failure report.

use std::collections::HashMap;
use std::time::Duration;

use reqwest::header;
use tracing::{debug, info, warn};

use torspider_core::config::HttpConfig;
use torspider_core::{CrawlError, FetchResponse};

const DEFAULT_AGENT: &str =
    "Mozilla/5.0 (Macintosh; Intel Mac OS X 10.8; rv:28.0) Gecko/20100101 Firefox/28.0";
const ACCEPT: &str = "text/html";
const ACCEPT_CHARSET: &str = "utf-8, windows-1251;q=0.5, koi8-r;q=0.3, *;q=0.3";
const ACCEPT_LANGUAGE: &str = "ru, en;q=0.7";

const ALLOWED_TYPE: &str = "text/html";
const ALLOWED_LANGS: [&str; 4] = ["ru", "en", "russian", "ru-ru"];
/// Largest Content-Length we are willing to download, in KiB.
const MAX_CONTENT_KB: u64 = 1024;

#[derive(Clone)]
pub struct HttpClient {
    client: reqwest::Client,
}

impl HttpClient {
    pub fn new(config: &HttpConfig) -> Result<Self, CrawlError> {
        let mut headers = header::HeaderMap::new();
        headers.insert(header::ACCEPT, header::HeaderValue::from_static(ACCEPT));
        headers.insert(
            header::ACCEPT_CHARSET,
            header::HeaderValue::from_static(ACCEPT_CHARSET),
        );
        headers.insert(
            header::ACCEPT_LANGUAGE,
            header::HeaderValue::from_static(ACCEPT_LANGUAGE),
        );

        let mut builder = reqwest::Client::builder()
            .user_agent(DEFAULT_AGENT)
            .default_headers(headers)
            .connect_timeout(Duration::from_secs_f64(config.connect_timeout))
            .timeout(Duration::from_secs_f64(config.request_timeout))
            .danger_accept_invalid_certs(!config.validate_cert)
            .redirect(reqwest::redirect::Policy::limited(10));

        if config.proxy.is_empty() {
            debug!("working without proxy");
        } else {
            debug!(proxy = %config.proxy, "using proxy");
            let proxy = reqwest::Proxy::all(format!("http://{}", config.proxy))
                .map_err(|e| CrawlError::Network(e.to_string()))?;
            builder = builder.proxy(proxy);
        }

        let client = builder
            .build()
            .map_err(|e| CrawlError::Network(e.to_string()))?;
        Ok(Self { client })
    }

    /// Fetch one page and validate its headers.
    pub async fn visit(&self, url: &str) -> Result<FetchResponse, CrawlError> {
        debug!(url, "fetching");
        let response = self.client.get(url).send().await.map_err(|error| {
            warn!(url, %error, "fetch failed");
            CrawlError::Network(error.to_string())
        })?;

        let status = response.status().as_u16();
        info!(url = %response.url(), status, "fetched");
        if !response.status().is_success() {
            return Err(CrawlError::Http(status));
        }

        let final_url = response.url().clone();
        let mut headers = HashMap::new();
        for (name, value) in response.headers() {
            if let Ok(value) = value.to_str() {
                headers.insert(name.as_str().to_string(), value.to_string());
            }
        }
        validate_headers(&headers)?;
        let content_type = headers.get("content-type").cloned();

        let body = response
            .bytes()
            .await
            .map_err(|e| CrawlError::Network(e.to_string()))?
            .to_vec();

        Ok(FetchResponse {
            url: url.to_string(),
            final_url,
            status,
            headers,
            body,
            content_type,
            fetched_at: chrono::Utc::now(),
        })
    }
}

/// Reject responses the crawler has no use for before downloading the body.
fn validate_headers(headers: &HashMap<String, String>) -> Result<(), CrawlError> {
    if let Some(content_type) = headers.get("content-type") {
        let first = content_type.split(';').next().unwrap_or_default().trim();
        if first != ALLOWED_TYPE {
            return Err(CrawlError::BadContentType(content_type.clone()));
        }
    }

    if let Some(content_language) = headers.get("content-language") {
        let allowed = content_language
            .split(',')
            .map(|token| token.trim().to_lowercase())
            .any(|token| ALLOWED_LANGS.contains(&token.as_str()));
        if !allowed {
            return Err(CrawlError::BadLanguage(content_language.clone()));
        }
    }

    if let Some(content_length) = headers.get("content-length") {
        if let Ok(bytes) = content_length.parse::<u64>() {
            let kb = bytes / 1024;
            if kb > MAX_CONTENT_KB {
                return Err(CrawlError::ContentTooLarge {
                    got: kb,
                    limit: MAX_CONTENT_KB,
                });
            }
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn headers(pairs: &[(&str, &str)]) -> HashMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn no_headers_pass() {
        assert!(validate_headers(&HashMap::new()).is_ok());
    }

    #[test]
    fn html_content_type_passes() {
        let h = headers(&[("content-type", "text/html; charset=utf-8")]);
        assert!(validate_headers(&h).is_ok());
    }

    #[test]
    fn other_content_type_rejected() {
        let h = headers(&[("content-type", "application/pdf")]);
        assert!(matches!(
            validate_headers(&h),
            Err(CrawlError::BadContentType(_))
        ));
    }

    #[test]
    fn allowed_language_passes() {
        for value in ["ru", "en", "ru-RU", "Russian", "de, en"] {
            let h = headers(&[("content-language", value)]);
            assert!(validate_headers(&h).is_ok(), "{value}");
        }
    }

    #[test]
    fn other_language_rejected() {
        let h = headers(&[("content-language", "de, fr")]);
        assert!(matches!(
            validate_headers(&h),
            Err(CrawlError::BadLanguage(_))
        ));
    }

    #[test]
    fn small_content_length_passes() {
        let h = headers(&[("content-length", "2048")]);
        assert!(validate_headers(&h).is_ok());
    }

    #[test]
    fn content_length_at_limit_passes() {
        let h = headers(&[("content-length", &(1024 * 1024).to_string())]);
        assert!(validate_headers(&h).is_ok());
    }

    #[test]
    fn oversized_content_rejected() {
        let h = headers(&[("content-length", "2000000")]);
        assert!(matches!(
            validate_headers(&h),
            Err(CrawlError::ContentTooLarge { .. })
        ));
    }
}
