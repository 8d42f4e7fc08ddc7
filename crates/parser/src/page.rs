//! Page extraction.
//!
//! [`Page`] wraps one fetched response and materializes the pieces of a
//! [`PageRecord`] on first access. Every accessor caches its result, so the
//! record assembly at the end pays for each piece exactly once.

use std::collections::{BTreeMap, BTreeSet};

use chrono::DateTime;
use once_cell::sync::Lazy;
use once_cell::unsync::OnceCell;
use regex::Regex;
use scraper::{ElementRef, Html, Node, Selector};
use tracing::debug;

use torspider_core::{CrawlError, FetchResponse, HeaderValue, Links, PageRecord};
use torspider_urlnorm::{get_domain, join_parts, norm, UrlParts};

/// Tags removed in their entirety before text extraction.
const SKIP_TAGS: [&str; 4] = ["script", "style", "form", "input"];

/// Response headers worth keeping on the record.
const SAVE_HEADERS: [&str; 18] = [
    "Content-Encoding",
    "Content-Language",
    "Content-Length",
    "Content-Location",
    "Content-MD5",
    "Content-Type",
    "Date",
    "ETag",
    "Expires",
    "Last-Modified",
    "Link",
    "Retry-After",
    "Server",
    "Via",
    "Warning",
    "Status",
    "X-Powered-By",
    "X-UA-Compatible",
];

static WS_RUN: Lazy<Regex> = Lazy::new(|| Regex::new(r"\s{2,}").unwrap());
static NL_TRIM: Lazy<Regex> = Lazy::new(|| Regex::new(r"\s*\n\s*").unwrap());
static NL_RUN: Lazy<Regex> = Lazy::new(|| Regex::new(r"\n{2,}").unwrap());
static DOT_SPACING: Lazy<Regex> = Lazy::new(|| Regex::new(r"\s+\.\s+").unwrap());

#[derive(Debug)]
pub struct Page {
    url: String,
    response: FetchResponse,
    doc: Html,
    base: OnceCell<String>,
    title: OnceCell<Option<String>>,
    meta: OnceCell<BTreeMap<String, String>>,
    text: OnceCell<String>,
    language: OnceCell<String>,
    links: OnceCell<Vec<String>>,
    headers: OnceCell<BTreeMap<String, HeaderValue>>,
}

impl Page {
    pub fn new(url: String, response: FetchResponse) -> Result<Self, CrawlError> {
        if response.body.is_empty() {
            return Err(CrawlError::Parse(format!("<{url}>: empty body")));
        }
        let doc = Html::parse_document(&String::from_utf8_lossy(&response.body));
        Ok(Self {
            url,
            response,
            doc,
            base: OnceCell::new(),
            title: OnceCell::new(),
            meta: OnceCell::new(),
            text: OnceCell::new(),
            language: OnceCell::new(),
            links: OnceCell::new(),
            headers: OnceCell::new(),
        })
    }

    /// The URL this page was requested as.
    pub fn url(&self) -> &str {
        &self.url
    }

    /// `<base href>` if present, else scheme://authority/ of the effective URL.
    pub fn base(&self) -> &str {
        self.base.get_or_init(|| {
            let tagged = selector("base")
                .and_then(|sel| self.doc.select(&sel).next())
                .and_then(|el| el.value().attr("href"))
                .filter(|href| !href.is_empty());
            if let Some(href) = tagged {
                return href.to_string();
            }
            debug!("no <base> tag, using response domain");
            let final_url = self.response.final_url.as_str();
            match norm(final_url, None) {
                Ok(parts) => join_parts(&UrlParts {
                    path: "/".to_string(),
                    params: String::new(),
                    query: String::new(),
                    fragment: String::new(),
                    ..parts
                }),
                Err(_) => format!(
                    "{}://{}/",
                    self.response.final_url.scheme(),
                    self.response.final_url.authority()
                ),
            }
        })
    }

    /// `<title>` text, or the first non-empty `<h1>`..`<h5>` text.
    pub fn title(&self) -> Option<&str> {
        self.title
            .get_or_init(|| {
                let tagged = selector("title")
                    .and_then(|sel| self.doc.select(&sel).next())
                    .map(element_text)
                    .filter(|t| !t.is_empty());
                if tagged.is_some() {
                    return tagged;
                }
                debug!("page title not found, searching headings");
                for level in 1..=5 {
                    let Some(sel) = selector(&format!("h{level}")) else {
                        continue;
                    };
                    if let Some(el) = self.doc.select(&sel).next() {
                        let text = element_text(el);
                        if !text.is_empty() {
                            return Some(text);
                        }
                    }
                }
                None
            })
            .as_deref()
    }

    /// `property|name → content` of every `<meta>` tag; last write wins.
    pub fn meta(&self) -> &BTreeMap<String, String> {
        self.meta.get_or_init(|| {
            let mut meta = BTreeMap::new();
            let Some(sel) = selector("meta") else {
                return meta;
            };
            for el in self.doc.select(&sel) {
                let key = el
                    .value()
                    .attr("property")
                    .or_else(|| el.value().attr("name"));
                if let (Some(key), Some(content)) = (key, el.value().attr("content")) {
                    meta.insert(key.to_string(), content.to_string());
                }
            }
            meta
        })
    }

    /// Visible body text with scripts, styles, forms, inputs and comments
    /// removed, whitespace normalized.
    pub fn text(&self) -> &str {
        self.text.get_or_init(|| {
            let mut chunks = Vec::new();
            if let Some(body) = selector("body").and_then(|sel| self.doc.select(&sel).next()) {
                collect_text(body, &mut chunks);
            }
            let text = chunks.join(" ");
            let text = WS_RUN.replace_all(&text, " ");
            let text = NL_TRIM.replace_all(&text, "\n");
            let text = NL_RUN.replace_all(&text, "\n");
            let text = DOT_SPACING.replace_all(&text, ". ");
            text.trim().to_string()
        })
    }

    /// ISO-639-1 code of the detected page language, or `"UNKNOWN"`.
    pub fn language(&self) -> &str {
        self.language.get_or_init(|| {
            match whatlang::detect(self.text()).and_then(|info| iso_639_1(info.lang())) {
                Some(code) => code.to_string(),
                None => {
                    debug!("language detection failed");
                    "UNKNOWN".to_string()
                }
            }
        })
    }

    /// Unique normalized http/https links found in the page.
    pub fn links(&self) -> &[String] {
        self.links.get_or_init(|| {
            let base_domain = get_domain(self.base());
            let mut unique = BTreeSet::new();
            let Some(sel) = selector("a[href]") else {
                return Vec::new();
            };
            for el in self.doc.select(&sel) {
                let Some(href) = el.value().attr("href") else {
                    continue;
                };
                let parts = match norm(href, Some(&base_domain)) {
                    Ok(parts) => parts,
                    Err(error) => {
                        debug!(href, %error, "skipping link");
                        continue;
                    }
                };
                if !parts.is_followable() {
                    debug!(scheme = %parts.scheme, "skipping scheme");
                    continue;
                }
                unique.insert(join_parts(&parts));
            }
            unique.into_iter().collect()
        })
    }

    /// Split links into (inner, outer) by comparing domains with the base.
    pub fn partition_links(&self) -> (Vec<String>, Vec<String>) {
        let base_domain = get_domain(self.base());
        self.links()
            .iter()
            .cloned()
            .partition(|link| get_domain(link) == base_domain)
    }

    /// Whitelisted response headers, dates and sizes parsed.
    pub fn headers(&self) -> &BTreeMap<String, HeaderValue> {
        self.headers.get_or_init(|| {
            let mut headers = BTreeMap::new();
            for canonical in SAVE_HEADERS {
                let Some(value) = self.response.headers.get(&canonical.to_lowercase()) else {
                    continue;
                };
                headers.insert(canonical.to_string(), parse_header(canonical, value));
            }
            headers
        })
    }

    /// Assemble the record, leaving out everything the page did not yield.
    pub fn to_record(&self) -> PageRecord {
        let mut record = PageRecord {
            title: self.title().map(str::to_string),
            language: Some(self.language().to_string()),
            ..PageRecord::default()
        };
        if !self.text().is_empty() {
            record.text = Some(self.text().to_string());
        }
        if !self.meta().is_empty() {
            record.meta = Some(self.meta().clone());
        }
        if !self.links().is_empty() {
            let (inner, outer) = self.partition_links();
            record.links = Some(Links { inner, outer });
        }
        if !self.headers().is_empty() {
            record.headers = Some(self.headers().clone());
        }
        record
    }
}

fn selector(selectors: &str) -> Option<Selector> {
    Selector::parse(selectors).ok()
}

fn element_text(el: ElementRef) -> String {
    el.text().collect::<String>().trim().to_string()
}

fn collect_text(el: ElementRef, out: &mut Vec<String>) {
    if SKIP_TAGS.contains(&el.value().name()) {
        return;
    }
    for child in el.children() {
        if let Some(child_el) = ElementRef::wrap(child) {
            collect_text(child_el, out);
        } else if let Node::Text(text) = child.value() {
            out.push(text.text.to_string());
        }
    }
}

fn parse_header(name: &str, value: &str) -> HeaderValue {
    match name {
        "Date" | "Expires" | "Last-Modified" => match DateTime::parse_from_rfc2822(value) {
            Ok(date) => HeaderValue::Date(date),
            Err(error) => {
                debug!(name, value, %error, "unparsable date header");
                HeaderValue::Text(value.to_string())
            }
        },
        "Content-Length" => value
            .parse::<i64>()
            .map(HeaderValue::Int)
            .unwrap_or_else(|_| HeaderValue::Text(value.to_string())),
        _ => HeaderValue::Text(value.to_string()),
    }
}

/// whatlang reports ISO-639-3; records carry the two-letter code.
fn iso_639_1(lang: whatlang::Lang) -> Option<&'static str> {
    const CODES: [(&str, &str); 69] = [
        ("afr", "af"),
        ("aka", "ak"),
        ("amh", "am"),
        ("ara", "ar"),
        ("aze", "az"),
        ("bel", "be"),
        ("ben", "bn"),
        ("bul", "bg"),
        ("cat", "ca"),
        ("ces", "cs"),
        ("cmn", "zh"),
        ("dan", "da"),
        ("deu", "de"),
        ("ell", "el"),
        ("eng", "en"),
        ("epo", "eo"),
        ("est", "et"),
        ("fin", "fi"),
        ("fra", "fr"),
        ("guj", "gu"),
        ("heb", "he"),
        ("hin", "hi"),
        ("hrv", "hr"),
        ("hun", "hu"),
        ("hye", "hy"),
        ("ind", "id"),
        ("ita", "it"),
        ("jav", "jv"),
        ("jpn", "ja"),
        ("kan", "kn"),
        ("kat", "ka"),
        ("khm", "km"),
        ("kor", "ko"),
        ("lat", "la"),
        ("lav", "lv"),
        ("lit", "lt"),
        ("mal", "ml"),
        ("mar", "mr"),
        ("mkd", "mk"),
        ("mya", "my"),
        ("nep", "ne"),
        ("nld", "nl"),
        ("nob", "nb"),
        ("ori", "or"),
        ("pan", "pa"),
        ("pes", "fa"),
        ("pol", "pl"),
        ("por", "pt"),
        ("ron", "ro"),
        ("rus", "ru"),
        ("sin", "si"),
        ("slk", "sk"),
        ("slv", "sl"),
        ("sna", "sn"),
        ("spa", "es"),
        ("srp", "sr"),
        ("swe", "sv"),
        ("tam", "ta"),
        ("tel", "te"),
        ("tgl", "tl"),
        ("tha", "th"),
        ("tuk", "tk"),
        ("tur", "tr"),
        ("ukr", "uk"),
        ("urd", "ur"),
        ("uzb", "uz"),
        ("vie", "vi"),
        ("yid", "yi"),
        ("zul", "zu"),
    ];
    let three = lang.code();
    CODES
        .iter()
        .find(|(code, _)| *code == three)
        .map(|(_, two)| *two)
}
