//! Mock GitHub API for integration tests.
//!
//! An axum server on `127.0.0.1:0` that answers from a route table. Routes
//! are keyed by path plus query with `per_page` stripped, falling back to the
//! bare path, so tests can register `"/repos/o/r/pulls"` and still match
//! `?state=all&...&per_page=100`. Anything unregistered is a 404.

#![allow(dead_code)]

use axum::extract::State;
use axum::http::header::CONTENT_TYPE;
use axum::http::{HeaderMap, HeaderName, HeaderValue, StatusCode, Uri};
use axum::response::{IntoResponse, Response};
use axum::Router;
use repo_pulse::client::{ApiClient, ClientSettings};
use serde_json::{json, Value};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// Epoch seconds for 2024-06-02T00:00:00Z.
pub const RESET_EPOCH: &str = "1717286400";

#[derive(Clone, Debug)]
pub struct Reply {
    status: u16,
    body: String,
    headers: Vec<(String, String)>,
}

impl Reply {
    pub fn json(body: Value) -> Self {
        Self {
            status: 200,
            body: body.to_string(),
            headers: Vec::new(),
        }
    }

    pub fn status(status: u16) -> Self {
        Self {
            status,
            body: json!({"message": format!("status {}", status)}).to_string(),
            headers: Vec::new(),
        }
    }

    /// 200 with a body that is not JSON.
    pub fn raw(body: &str) -> Self {
        Self {
            status: 200,
            body: body.to_string(),
            headers: Vec::new(),
        }
    }

    /// 403 with an exhausted quota.
    pub fn rate_limited() -> Self {
        Self::status(403)
            .header("x-ratelimit-remaining", "0")
            .header("x-ratelimit-reset", RESET_EPOCH)
    }

    pub fn header(mut self, name: &str, value: &str) -> Self {
        self.headers.push((name.to_string(), value.to_string()));
        self
    }

    /// Add a `Link` header pointing at the next page.
    pub fn next(self, url: &str) -> Self {
        let link = format!("<{}>; rel=\"next\", <{}>; rel=\"last\"", url, url);
        self.header("link", &link)
    }
}

/// One request as seen by the server.
#[derive(Clone, Debug)]
pub struct Hit {
    /// Path and query exactly as requested.
    pub uri: String,
    /// Route key: path and query without `per_page`.
    pub key: String,
    pub accept: String,
    pub authorization: String,
    pub user_agent: String,
    pub api_version: String,
}

#[derive(Default)]
struct Inner {
    routes: Mutex<HashMap<String, Reply>>,
    hits: Mutex<Vec<Hit>>,
}

pub struct MockApi {
    pub base_url: String,
    inner: Arc<Inner>,
}

impl MockApi {
    pub async fn start() -> Self {
        let inner = Arc::new(Inner::default());
        let app = Router::new()
            .fallback(handle)
            .with_state(Arc::clone(&inner));
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        Self {
            base_url: format!("http://{}", addr),
            inner,
        }
    }

    pub fn route(&self, key: &str, reply: Reply) -> &Self {
        self.inner
            .routes
            .lock()
            .unwrap()
            .insert(key.to_string(), reply);
        self
    }

    /// Absolute URL for a path on this server, for `Link` headers.
    pub fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    pub fn hits(&self) -> Vec<Hit> {
        self.inner.hits.lock().unwrap().clone()
    }

    pub fn hit_count(&self) -> usize {
        self.inner.hits.lock().unwrap().len()
    }

    /// Requests whose key starts with `prefix`.
    pub fn hits_for(&self, prefix: &str) -> usize {
        self.hits().iter().filter(|h| h.key.starts_with(prefix)).count()
    }

    pub fn client(&self) -> ApiClient {
        ApiClient::new(&ClientSettings {
            base_url: self.base_url.clone(),
            token: "test-token".to_string(),
            user_agent: "repo-pulse-tests".to_string(),
            timeout: Duration::from_secs(5),
            page_size: 100,
        })
        .unwrap()
    }
}

async fn handle(State(inner): State<Arc<Inner>>, headers: HeaderMap, uri: Uri) -> Response {
    let key = route_key(&uri);
    let header = |name: &str| {
        headers
            .get(name)
            .and_then(|v| v.to_str().ok())
            .unwrap_or_default()
            .to_string()
    };
    inner.hits.lock().unwrap().push(Hit {
        uri: uri
            .path_and_query()
            .map(|pq| pq.as_str().to_string())
            .unwrap_or_default(),
        key: key.clone(),
        accept: header("accept"),
        authorization: header("authorization"),
        user_agent: header("user-agent"),
        api_version: header("x-github-api-version"),
    });

    let reply = {
        let routes = inner.routes.lock().unwrap();
        routes.get(&key).or_else(|| routes.get(uri.path())).cloned()
    };

    let Some(reply) = reply else {
        return (
            StatusCode::NOT_FOUND,
            [(CONTENT_TYPE, "application/json")],
            json!({"message": "Not Found"}).to_string(),
        )
            .into_response();
    };

    let status = StatusCode::from_u16(reply.status).unwrap();
    let mut response = (status, [(CONTENT_TYPE, "application/json")], reply.body).into_response();
    for (name, value) in reply.headers {
        response.headers_mut().insert(
            HeaderName::from_bytes(name.as_bytes()).unwrap(),
            HeaderValue::from_str(&value).unwrap(),
        );
    }
    response
}

fn route_key(uri: &Uri) -> String {
    let params: Vec<&str> = uri
        .query()
        .unwrap_or("")
        .split('&')
        .filter(|p| !p.is_empty() && !p.starts_with("per_page="))
        .collect();
    if params.is_empty() {
        uri.path().to_string()
    } else {
        format!("{}?{}", uri.path(), params.join("&"))
    }
}

/// Bind and release a port so nothing is listening on it.
pub fn closed_port() -> u16 {
    let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
    listener.local_addr().unwrap().port()
}
