use std::collections::{BTreeMap, HashMap};

use chrono::{DateTime, FixedOffset, Utc};
use serde::Serialize;
use url::Url;

/// One fetched HTTP response, header names lowercased.
#[derive(Debug, Clone)]
pub struct FetchResponse {
    /// The URL the request was made for.
    pub url: String,
    /// Where the response actually came from, after redirects.
    pub final_url: Url,
    pub status: u16,
    pub headers: HashMap<String, String>,
    pub body: Vec<u8>,
    pub content_type: Option<String>,
    pub fetched_at: DateTime<Utc>,
}

/// What we extract from every page. A field is absent when the page yielded
/// no value for it.
#[derive(Debug, Clone, Default, Serialize)]
pub struct PageRecord {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub meta: Option<BTreeMap<String, String>>,
    /// ISO-639-1 code, or `"UNKNOWN"` when detection failed.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub language: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub links: Option<Links>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub headers: Option<BTreeMap<String, HeaderValue>>,
}

/// Links partitioned by whether their domain matches the page base.
#[derive(Debug, Clone, Serialize)]
pub struct Links {
    pub inner: Vec<String>,
    pub outer: Vec<String>,
}

/// A whitelisted response header, parsed where the name calls for it.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum HeaderValue {
    Int(i64),
    Date(DateTime<FixedOffset>),
    Text(String),
}

/// The unit handed to every consumer on a terminal transition. Exactly one
/// of `page` and `error` is present.
#[derive(Debug, Clone, Serialize)]
pub struct Report {
    pub url: String,
    pub ts: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub page: Option<PageRecord>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl Report {
    pub fn success(url: impl Into<String>, page: PageRecord) -> Self {
        Self {
            url: url.into(),
            ts: Utc::now(),
            page: Some(page),
            error: None,
        }
    }

    pub fn failure(url: impl Into<String>, error: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            ts: Utc::now(),
            page: None,
            error: Some(error.into()),
        }
    }
}
