//! URL normalization.
//!
//! The canonical form produced here is the identity of a crawl task: two URLs
//! that normalize to the same string are the same task everywhere in the
//! system. Normalization lowercases and IDNA-decodes the host, strips default
//! ports, collapses dot segments, percent-decodes the path and drops the
//! fragment.

use once_cell::sync::Lazy;
use percent_encoding::percent_decode_str;
use regex::Regex;
use thiserror::Error;
use tracing::warn;

/// Dot-segment / duplicate-slash rewrite, applied one match at a time until
/// the path stops changing.
static COLLAPSE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"([^/]+/\.\./?|/\./|//|/\.$|/\.\.$|^\.)").unwrap());

/// `userinfo@host:port` split of the authority component.
static SERVER_AUTHORITY: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^(?:([^@]+)@)?([^:]+)(?::(.+))?$").unwrap());

/// Schemes whose paths may contain relative segments worth collapsing.
const RELATIVE_SCHEMES: [&str; 9] = [
    "http", "https", "news", "snews", "nntp", "snntp", "ftp", "file", "",
];

const ALLOW_SCHEMES: [&str; 2] = ["http", "https"];

fn default_port(scheme: &str) -> Option<u16> {
    match scheme {
        "http" => Some(80),
        "https" => Some(443),
        "gopher" => Some(70),
        "news" | "nntp" => Some(119),
        "snews" | "snntp" => Some(563),
        "ftp" => Some(21),
        "telnet" => Some(23),
        "prospero" => Some(191),
        _ => None,
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum NormError {
    #[error("<{0}>: no authority")]
    NoAuthority(String),
    #[error("<{0}>: unparsable authority")]
    BadAuthority(String),
}

/// The six URL components. `fragment` is always empty after [`norm`]; it is
/// kept so that the tuple round-trips through [`join_parts`] unchanged.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct UrlParts {
    pub scheme: String,
    pub authority: String,
    pub path: String,
    pub params: String,
    pub query: String,
    pub fragment: String,
}

impl UrlParts {
    /// Whether this URL uses a scheme the crawler will follow.
    pub fn is_followable(&self) -> bool {
        ALLOW_SCHEMES.contains(&self.scheme.as_str())
    }
}

/// Normalize a URL into its canonical parts.
///
/// A URL without an authority borrows `default_authority` (the usual case for
/// relative links); failing that, normalization fails with
/// [`NormError::NoAuthority`].
pub fn norm(url: &str, default_authority: Option<&str>) -> Result<UrlParts, NormError> {
    let raw = split_url(url, "http");

    let authority = if raw.authority.is_empty() {
        default_authority.unwrap_or_default()
    } else {
        raw.authority
    };
    if authority.is_empty() {
        return Err(NormError::NoAuthority(url.to_string()));
    }

    let caps = SERVER_AUTHORITY
        .captures(authority)
        .ok_or_else(|| NormError::BadAuthority(url.to_string()))?;
    let userinfo = caps.get(1).map(|m| m.as_str());
    let host = caps.get(2).map(|m| m.as_str()).unwrap_or_default();
    let port = caps.get(3).map(|m| m.as_str());

    let host = host.strip_suffix('.').unwrap_or(host).to_lowercase();
    let mut authority = decode_idna(&host);
    if let Some(userinfo) = userinfo {
        authority = format!("{userinfo}@{authority}");
    }
    if let Some(port) = port {
        if port.parse::<u16>().ok() != default_port(&raw.scheme) {
            authority = format!("{authority}:{port}");
        }
    }

    let path = if RELATIVE_SCHEMES.contains(&raw.scheme.as_str()) {
        collapse_path(raw.path)
    } else {
        raw.path.to_string()
    };
    let path = percent_decode_str(&path).decode_utf8_lossy().into_owned();

    Ok(UrlParts {
        scheme: raw.scheme,
        authority,
        path,
        params: raw.params.to_string(),
        query: raw.query.to_string(),
        fragment: String::new(),
    })
}

/// Render parts back into a URL string.
pub fn join_parts(parts: &UrlParts) -> String {
    let mut url = parts.path.clone();
    if !parts.params.is_empty() {
        url.push(';');
        url.push_str(&parts.params);
    }
    if !parts.authority.is_empty() || url.starts_with("//") {
        if !url.is_empty() && !url.starts_with('/') {
            url.insert(0, '/');
        }
        url = format!("//{}{}", parts.authority, url);
    }
    if !parts.scheme.is_empty() {
        url = format!("{}:{}", parts.scheme, url);
    }
    if !parts.query.is_empty() {
        url.push('?');
        url.push_str(&parts.query);
    }
    if !parts.fragment.is_empty() {
        url.push('#');
        url.push_str(&parts.fragment);
    }
    url
}

/// The authority component of a URL string.
pub fn get_domain(url: &str) -> String {
    split_url(url, "").authority.to_string()
}

/// The last two labels of a domain name.
pub fn first_level_domain(full_domain: &str) -> String {
    let labels: Vec<&str> = full_domain.split('.').collect();
    labels[labels.len().saturating_sub(2)..].join(".")
}

/// First level domain of a URL's authority.
pub fn get_first_level_domain(url: &str) -> String {
    first_level_domain(&get_domain(url))
}

fn decode_idna(host: &str) -> String {
    let (decoded, result) = idna::domain_to_unicode(host);
    match result {
        Ok(()) => decoded,
        Err(error) => {
            warn!(host, ?error, "idna decode failed, keeping host as-is");
            host.to_string()
        }
    }
}

fn collapse_path(path: &str) -> String {
    let mut path = path.to_string();
    loop {
        let next = COLLAPSE.replace(&path, "/").into_owned();
        if next == path {
            return path;
        }
        path = next;
    }
}

struct RawParts<'a> {
    scheme: String,
    authority: &'a str,
    path: &'a str,
    params: &'a str,
    query: &'a str,
}

fn split_url<'a>(url: &'a str, default_scheme: &str) -> RawParts<'a> {
    let url = url.trim();
    let url = match url.find('#') {
        Some(i) => &url[..i],
        None => url,
    };

    let (scheme, rest) = split_scheme(url, default_scheme);

    let (authority, rest) = match rest.strip_prefix("//") {
        Some(stripped) => {
            let end = stripped
                .find(|c| matches!(c, '/' | '?'))
                .unwrap_or(stripped.len());
            (&stripped[..end], &stripped[end..])
        }
        None => ("", rest),
    };

    let (path_part, query) = match rest.find('?') {
        Some(i) => (&rest[..i], &rest[i + 1..]),
        None => (rest, ""),
    };
    let (path, params) = split_params(path_part);

    RawParts {
        scheme,
        authority,
        path,
        params,
        query,
    }
}

fn split_scheme<'a>(url: &'a str, default_scheme: &str) -> (String, &'a str) {
    if let Some(i) = url.find(':') {
        let candidate = &url[..i];
        let mut chars = candidate.chars();
        let valid = matches!(chars.next(), Some(c) if c.is_ascii_alphabetic())
            && chars.all(|c| c.is_ascii_alphanumeric() || matches!(c, '+' | '-' | '.'));
        if valid {
            return (candidate.to_ascii_lowercase(), &url[i + 1..]);
        }
    }
    (default_scheme.to_string(), url)
}

/// Parameters hang off the last path segment only.
fn split_params(path: &str) -> (&str, &str) {
    let search_from = path.rfind('/').unwrap_or(0);
    match path[search_from..].find(';') {
        Some(offset) => {
            let i = search_from + offset;
            (&path[..i], &path[i + 1..])
        }
        None => (path, ""),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parts(
        scheme: &str,
        authority: &str,
        path: &str,
        params: &str,
        query: &str,
    ) -> UrlParts {
        UrlParts {
            scheme: scheme.to_string(),
            authority: authority.to_string(),
            path: path.to_string(),
            params: params.to_string(),
            query: query.to_string(),
            fragment: String::new(),
        }
    }

    #[test]
    fn no_scheme() {
        let res = norm("//httpbin.org/", None).unwrap();
        assert_eq!(res, parts("http", "httpbin.org", "/", "", ""));
    }

    #[test]
    fn default_authority() {
        let res = norm("/", Some("httpbin.org")).unwrap();
        assert_eq!(res, parts("http", "httpbin.org", "/", "", ""));
    }

    #[test]
    fn no_default_authority() {
        assert_eq!(norm("/", None), Err(NormError::NoAuthority("/".to_string())));
    }

    #[test]
    fn case_folding() {
        let res = norm("HTTP://EXAMPLE.COM/", None).unwrap();
        assert_eq!(res, parts("http", "example.com", "/", "", ""));
    }

    #[test]
    fn default_port_stripped() {
        let res = norm("http://host:80/", None).unwrap();
        assert_eq!(res.authority, "host");
    }

    #[test]
    fn non_default_port_kept() {
        let res = norm("http://httpbin.org:8080/", None).unwrap();
        assert_eq!(res, parts("http", "httpbin.org:8080", "/", "", ""));
    }

    #[test]
    fn collapse() {
        let res = norm("http://httpbin.org/encoding//./utf8", None).unwrap();
        assert_eq!(res, parts("http", "httpbin.org", "/encoding/utf8", "", ""));
    }

    #[test]
    fn parent_segments_collapse() {
        let res = norm("http://httpbin.org/a/b/../c/./d", None).unwrap();
        assert_eq!(res.path, "/a/c/d");
    }

    #[test]
    fn remove_fragments() {
        let res = norm("http://httpbin.org/encoding/utf8#frag", None).unwrap();
        assert_eq!(res, parts("http", "httpbin.org", "/encoding/utf8", "", ""));
        assert!(res.fragment.is_empty());
    }

    #[test]
    fn international() {
        let res = norm("http://xn--h1alffa9f.xn--h1aegh.museum/", None).unwrap();
        assert_eq!(res.authority, "россия.иком.museum");
    }

    #[test]
    fn unquote() {
        let res = norm("http://example.com/El%20Ni%C3%B1o/", None).unwrap();
        assert_eq!(res.path, "/El Niño/");
    }

    #[test]
    fn trailing_host_dot_stripped() {
        let res = norm("http://example.com./", None).unwrap();
        assert_eq!(res.authority, "example.com");
    }

    #[test]
    fn params_and_query_survive() {
        let res = norm("http://example.com/path;type=a?q=1", None).unwrap();
        assert_eq!(res, parts("http", "example.com", "/path", "type=a", "q=1"));
        assert_eq!(join_parts(&res), "http://example.com/path;type=a?q=1");
    }

    #[test]
    fn join() {
        let res = join_parts(&parts("http", "httpbin.org", "/encoding/utf8", "", ""));
        assert_eq!(res, "http://httpbin.org/encoding/utf8");
    }

    #[test]
    fn join_has_single_scheme_prefix() {
        let joined = join_parts(&norm("//httpbin.org/a", None).unwrap());
        assert!(joined.starts_with("http://"));
        assert!(!joined["http://".len()..].contains("http://"));
    }

    #[test]
    fn idempotent() {
        for url in [
            "HTTP://EXAMPLE.COM/a//b/../c?x=1",
            "http://xn--h1alffa9f.xn--h1aegh.museum/",
            "http://httpbin.org:8080/El%20Ni%C3%B1o/",
            "http://example.com",
        ] {
            let once = norm(url, None).unwrap();
            let twice = norm(&join_parts(&once), None).unwrap();
            assert_eq!(once, twice, "{url}");
        }
    }

    #[test]
    fn domain() {
        assert_eq!(get_domain("http://httpbin.org/encoding/utf8"), "httpbin.org");
    }

    #[test]
    fn first_level_from_secondary() {
        assert_eq!(first_level_domain("quarters.lunarium.ru"), "lunarium.ru");
    }

    #[test]
    fn first_level_long_subdomain() {
        assert_eq!(
            first_level_domain("some.deep.subdomain.httpbin.org"),
            "httpbin.org"
        );
    }

    #[test]
    fn first_level_from_first() {
        assert_eq!(first_level_domain("httpbin.org"), "httpbin.org");
    }

    #[test]
    fn first_level_of_url() {
        assert_eq!(
            get_first_level_domain("http://subdomain.httpbin.org/encoding/utf8"),
            "httpbin.org"
        );
    }
}
