//! GitHub REST API client.
//!
//! A thin wrapper over `reqwest` that knows three things the rest of the crate
//! should not have to care about:
//!
//! - **Pagination.** List endpoints are followed through the `Link` response
//!   header (`<url>; rel="next"`) until the relation disappears, a page comes
//!   back empty, a predicate rejects an item, or the page cap is reached.
//! - **Response classification.** A 404 means the feature is not enabled for
//!   the repository, a 403 usually means the token lacks a permission, and
//!   any other failure is logged. All of them degrade to "no data" so one
//!   missing feature never sinks a whole run.
//! - **Rate limiting.** A 403 with `x-ratelimit-remaining: 0` is different:
//!   it returns [`FetchError::RateLimitExceeded`] and latches an abort flag
//!   shared by every clone of the client, so concurrent areas stop on their
//!   next call instead of hammering an exhausted quota.
//!
//! # Request accounting
//!
//! Each client handle owns a request counter. [`ApiClient::scoped`] returns a
//! handle that shares the connection pool and the abort latch but counts its
//! own requests, which is how the collector attributes calls to areas.
//!
//! No call is retried: every failure mode above is terminal for that call.

use reqwest::header::{HeaderMap, HeaderValue, ACCEPT, AUTHORIZATION, USER_AGENT};
use reqwest::{Response, StatusCode};
use serde_json::Value;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, OnceLock};
use std::time::Duration;
use tracing::{debug, warn};

use crate::config::Config;
use crate::error::FetchError;

/// Media type sent on every request unless a call overrides it.
pub const GITHUB_JSON: &str = "application/vnd.github+json";
/// Media type that adds `starred_at` to stargazer listings.
pub const GITHUB_STAR_JSON: &str = "application/vnd.github.star+json";

const API_VERSION: &str = "2022-11-28";

/// Connection settings for [`ApiClient::new`].
#[derive(Debug, Clone)]
pub struct ClientSettings {
    pub base_url: String,
    pub token: String,
    pub user_agent: String,
    pub timeout: Duration,
    pub page_size: u32,
}

impl ClientSettings {
    /// Build settings from a validated [`Config`].
    pub fn from_config(config: &Config) -> Self {
        Self {
            base_url: config.api.base_url.clone(),
            token: config.api.token.clone().unwrap_or_default(),
            user_agent: config.collect.module.user_agent(),
            timeout: Duration::from_secs(config.api.timeout_secs),
            page_size: config.api.page_size,
        }
    }
}

/// Options for a paginated listing.
#[derive(Debug, Clone)]
pub struct PageOptions {
    /// Hard cap on the number of pages requested.
    pub max_pages: usize,
    /// Override for the `Accept` header.
    pub accept: Option<&'static str>,
    /// For endpoints that wrap the list in an object (e.g. `workflow_runs`).
    pub items_key: Option<&'static str>,
}

impl PageOptions {
    pub fn max_pages(max_pages: usize) -> Self {
        Self {
            max_pages,
            accept: None,
            items_key: None,
        }
    }

    pub fn accept(mut self, accept: &'static str) -> Self {
        self.accept = Some(accept);
        self
    }

    pub fn items_key(mut self, key: &'static str) -> Self {
        self.items_key = Some(key);
        self
    }
}

impl Default for PageOptions {
    fn default() -> Self {
        Self::max_pages(10)
    }
}

type ItemFilter<'a> = &'a (dyn Fn(&Value) -> bool + Sync);

/// Authenticated, rate-limit-aware GitHub API client.
#[derive(Clone)]
pub struct ApiClient {
    http: reqwest::Client,
    base_url: String,
    page_size: u32,
    requests: Arc<AtomicU64>,
    /// Reset time of the exhausted quota, once any handle has seen it.
    aborted: Arc<OnceLock<String>>,
}

impl ApiClient {
    /// Create a client with bearer auth and the versioned accept header.
    pub fn new(settings: &ClientSettings) -> anyhow::Result<Self> {
        let mut auth = HeaderValue::from_str(&format!("Bearer {}", settings.token.trim()))?;
        auth.set_sensitive(true);

        let mut headers = HeaderMap::new();
        headers.insert(AUTHORIZATION, auth);
        headers.insert(ACCEPT, HeaderValue::from_static(GITHUB_JSON));
        headers.insert("x-github-api-version", HeaderValue::from_static(API_VERSION));
        headers.insert(USER_AGENT, HeaderValue::from_str(&settings.user_agent)?);

        let http = reqwest::Client::builder()
            .default_headers(headers)
            .timeout(settings.timeout)
            .build()?;

        Ok(Self {
            http,
            base_url: settings.base_url.trim_end_matches('/').to_string(),
            page_size: settings.page_size.max(1),
            requests: Arc::new(AtomicU64::new(0)),
            aborted: Arc::new(OnceLock::new()),
        })
    }

    /// A handle sharing the connection pool and abort latch, with a fresh
    /// request counter.
    pub fn scoped(&self) -> Self {
        Self {
            http: self.http.clone(),
            base_url: self.base_url.clone(),
            page_size: self.page_size,
            requests: Arc::new(AtomicU64::new(0)),
            aborted: Arc::clone(&self.aborted),
        }
    }

    /// Number of HTTP requests issued through this handle.
    pub fn request_count(&self) -> u64 {
        self.requests.load(Ordering::Relaxed)
    }

    /// Whether any handle has hit the rate limit.
    pub fn is_aborted(&self) -> bool {
        self.aborted.get().is_some()
    }

    fn url_for(&self, path: &str) -> String {
        if path.starts_with("http://") || path.starts_with("https://") {
            path.to_string()
        } else {
            format!("{}{}", self.base_url, path)
        }
    }

    /// Fetch a single JSON document.
    ///
    /// Returns `Ok(None)` for every non-fatal failure (see module docs).
    pub async fn get_json(&self, path: &str) -> Result<Option<Value>, FetchError> {
        self.get_json_with_accept(path, None).await
    }

    /// Fetch a single JSON document with an explicit `Accept` header.
    pub async fn get_json_with_accept(
        &self,
        path: &str,
        accept: Option<&str>,
    ) -> Result<Option<Value>, FetchError> {
        let url = self.url_for(path);
        match self.send(&url, accept).await? {
            Some(resp) => decode(&url, resp).await.map(Some),
            None => Ok(None),
        }
    }

    /// Fetch every page of a listing.
    pub async fn paginate(&self, path: &str, opts: &PageOptions) -> Result<Vec<Value>, FetchError> {
        self.paginate_inner(path, opts, None).await
    }

    /// Fetch pages while `keep` accepts items.
    ///
    /// The first rejected item ends pagination and is not returned. Intended
    /// for listings sorted newest first, where `keep` is a time-window check.
    pub async fn paginate_while<F>(
        &self,
        path: &str,
        opts: &PageOptions,
        keep: F,
    ) -> Result<Vec<Value>, FetchError>
    where
        F: Fn(&Value) -> bool + Send + Sync,
    {
        self.paginate_inner(path, opts, Some(&keep)).await
    }

    async fn paginate_inner(
        &self,
        path: &str,
        opts: &PageOptions,
        keep: Option<ItemFilter<'_>>,
    ) -> Result<Vec<Value>, FetchError> {
        let base = self.url_for(path);
        let separator = if base.contains('?') { '&' } else { '?' };
        let mut next = Some(format!("{}{}per_page={}", base, separator, self.page_size));
        let mut results = Vec::new();
        let mut pages = 0;

        while let Some(url) = next.take() {
            if pages >= opts.max_pages {
                debug!(path, pages, "page cap reached");
                break;
            }
            pages += 1;

            let Some(resp) = self.send(&url, opts.accept).await? else {
                break;
            };
            let link = resp
                .headers()
                .get("link")
                .and_then(|v| v.to_str().ok())
                .map(str::to_string);
            let body = decode(&url, resp).await?;

            let items = match opts.items_key {
                Some(key) => body.get(key).cloned().unwrap_or(Value::Null),
                None => body,
            };
            let Value::Array(items) = items else {
                break;
            };
            if items.is_empty() {
                break;
            }

            match keep {
                Some(keep) => {
                    let mut stopped = false;
                    for item in items {
                        if !keep(&item) {
                            stopped = true;
                            break;
                        }
                        results.push(item);
                    }
                    if stopped {
                        break;
                    }
                }
                None => results.extend(items),
            }

            next = link.as_deref().and_then(parse_next_link);
        }

        Ok(results)
    }

    /// Issue one GET and classify the response.
    async fn send(&self, url: &str, accept: Option<&str>) -> Result<Option<Response>, FetchError> {
        if let Some(reset) = self.aborted.get() {
            return Err(FetchError::RateLimitExceeded {
                reset: reset.clone(),
            });
        }

        self.requests.fetch_add(1, Ordering::Relaxed);
        debug!(url, "GET");

        let mut request = self.http.get(url);
        if let Some(accept) = accept {
            request = request.header(ACCEPT, accept);
        }

        let resp = match request.send().await {
            Ok(resp) => resp,
            Err(e) => {
                warn!(url, error = %e, "request failed");
                return Ok(None);
            }
        };

        let status = resp.status();
        if status.is_success() {
            return Ok(Some(resp));
        }

        match status {
            StatusCode::NOT_FOUND => {
                warn!(url, "404 - feature may not be enabled");
            }
            StatusCode::FORBIDDEN => {
                let remaining = header_str(&resp, "x-ratelimit-remaining");
                if remaining.as_deref().map(str::trim) == Some("0") {
                    let reset = format_reset(header_str(&resp, "x-ratelimit-reset").as_deref());
                    let reset = self.aborted.get_or_init(|| reset).clone();
                    return Err(FetchError::RateLimitExceeded { reset });
                }
                warn!(url, "403 - may lack permissions");
            }
            other => {
                warn!(url, status = other.as_u16(), "request returned non-success status");
            }
        }
        Ok(None)
    }
}

async fn decode(url: &str, resp: Response) -> Result<Value, FetchError> {
    resp.json::<Value>().await.map_err(|e| FetchError::Decode {
        url: url.to_string(),
        message: e.to_string(),
    })
}

fn header_str(resp: &Response, name: &str) -> Option<String> {
    resp.headers()
        .get(name)
        .and_then(|v| v.to_str().ok())
        .map(str::to_string)
}

/// Render `x-ratelimit-reset` (epoch seconds) as RFC 3339.
fn format_reset(raw: Option<&str>) -> String {
    raw.and_then(|s| s.trim().parse::<i64>().ok())
        .and_then(|secs| chrono::DateTime::from_timestamp(secs, 0))
        .map(|dt| dt.to_rfc3339())
        .unwrap_or_else(|| "an unknown time".to_string())
}

/// Extract the `rel="next"` target from a `Link` header.
pub fn parse_next_link(header: &str) -> Option<String> {
    header.split(',').find_map(|part| {
        let (target, params) = part.split_once(';')?;
        let is_next = params.split(';').any(|p| {
            let p = p.trim();
            p == "rel=\"next\"" || p == "rel=next"
        });
        if !is_next {
            return None;
        }
        let target = target.trim();
        target
            .strip_prefix('<')
            .and_then(|t| t.strip_suffix('>'))
            .map(str::to_string)
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn next_link_found_among_relations() {
        let header = r#"<https://api.github.com/repositories/1/pulls?page=1>; rel="prev", <https://api.github.com/repositories/1/pulls?page=3>; rel="next", <https://api.github.com/repositories/1/pulls?page=9>; rel="last""#;
        assert_eq!(
            parse_next_link(header).as_deref(),
            Some("https://api.github.com/repositories/1/pulls?page=3")
        );
    }

    #[test]
    fn next_link_absent_on_last_page() {
        let header = r#"<https://x/p?page=1>; rel="first", <https://x/p?page=8>; rel="prev""#;
        assert_eq!(parse_next_link(header), None);
        assert_eq!(parse_next_link(""), None);
    }

    #[test]
    fn next_link_without_quotes() {
        assert_eq!(
            parse_next_link("<https://x/p?page=2>; rel=next").as_deref(),
            Some("https://x/p?page=2")
        );
    }

    #[test]
    fn reset_rendering() {
        assert_eq!(format_reset(Some("0")), "1970-01-01T00:00:00+00:00");
        assert_eq!(format_reset(Some("soon")), "an unknown time");
        assert_eq!(format_reset(None), "an unknown time");
    }

    #[test]
    fn scoped_handles_count_separately() {
        let client = ApiClient::new(&ClientSettings {
            base_url: "http://127.0.0.1:9/".into(),
            token: "t".into(),
            user_agent: "test".into(),
            timeout: Duration::from_secs(1),
            page_size: 100,
        })
        .unwrap();
        let scoped = client.scoped();
        scoped.requests.fetch_add(3, Ordering::Relaxed);
        assert_eq!(scoped.request_count(), 3);
        assert_eq!(client.request_count(), 0);
        assert_eq!(client.url_for("/repos/o/r"), "http://127.0.0.1:9/repos/o/r");
        assert_eq!(client.url_for("https://other/x"), "https://other/x");
    }

    #[test]
    fn token_whitespace_is_trimmed() {
        // Tokens read from files or secrets often carry a trailing newline.
        let client = ApiClient::new(&ClientSettings {
            base_url: "http://127.0.0.1:9".into(),
            token: "  t0ken\n".into(),
            user_agent: "test".into(),
            timeout: Duration::from_secs(1),
            page_size: 100,
        });
        assert!(client.is_ok());
    }

    #[test]
    fn abort_latch_is_shared() {
        let client = ApiClient::new(&ClientSettings {
            base_url: "http://127.0.0.1:9".into(),
            token: "t".into(),
            user_agent: "test".into(),
            timeout: Duration::from_secs(1),
            page_size: 100,
        })
        .unwrap();
        let scoped = client.scoped();
        let _ = scoped.aborted.set("later".into());
        assert!(client.is_aborted());
    }
}
