// FleetWatch - ChromeOS fleet collector
// Copyright (c) 2025 David Martin Venti
//
// Dual-licensed under AGPL-3.0 and Commercial License.
// See LICENSE file for details.

//! Transport abstraction for the remote device-management API
//!
//! The collector only needs two verbs: an authenticated GET returning a
//! JSON tree and an unauthenticated form POST for the token exchange.
//! [`HttpTransport`] is the production implementation, [`ScriptedTransport`]
//! replays canned responses (tests, demos, the exporter's fixture mode).

use std::collections::VecDeque;
use std::sync::{Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;
use serde_json::Value;

use crate::error::{FleetError, Result};

/// Query string or form body as ordered key/value pairs
pub type Params = Vec<(String, String)>;

/// Remote API access used by the token manager and the fetcher.
#[async_trait]
pub trait Transport: Send + Sync + 'static {
    /// GET `url` with `query`, sending `bearer` as the Authorization token.
    async fn get(&self, url: &str, query: &[(String, String)], bearer: Option<&str>)
        -> Result<Value>;

    /// POST `form` url-encoded to `url`.
    async fn post_form(&self, url: &str, form: &[(String, String)]) -> Result<Value>;
}

/// Join `url` onto `base` unless it is already absolute
pub fn resolve_url(base: &str, url: &str) -> String {
    if url.starts_with("http://") || url.starts_with("https://") {
        url.to_string()
    } else {
        format!("{}/{}", base.trim_end_matches('/'), url.trim_start_matches('/'))
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

// ============================================================================
// HTTP
// ============================================================================

/// `reqwest` backed transport
#[cfg(feature = "http")]
pub struct HttpTransport {
    client: reqwest::Client,
    base_url: String,
}

#[cfg(feature = "http")]
impl HttpTransport {
    /// Create a transport for `base_url` with a per-request timeout
    pub fn new(base_url: impl Into<String>, timeout: std::time::Duration) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| FleetError::Network(format!("failed to build HTTP client: {}", e)))?;
        Ok(Self {
            client,
            base_url: base_url.into(),
        })
    }

    /// Build from a collector configuration
    pub fn from_config(config: &crate::config::CollectorConfig) -> Result<Self> {
        Self::new(config.api_base_url.clone(), config.request_timeout())
    }

    async fn parse(resp: reqwest::Response) -> Result<Value> {
        let status = resp.status();
        if !status.is_success() {
            let message = resp.text().await.unwrap_or_default();
            return Err(FleetError::Http {
                status: status.as_u16(),
                message,
            });
        }
        let body = resp.bytes().await?;
        if body.is_empty() {
            return Ok(Value::Object(Default::default()));
        }
        Ok(serde_json::from_slice(&body)?)
    }
}

#[cfg(feature = "http")]
#[async_trait]
impl Transport for HttpTransport {
    async fn get(
        &self,
        url: &str,
        query: &[(String, String)],
        bearer: Option<&str>,
    ) -> Result<Value> {
        let url = resolve_url(&self.base_url, url);
        log::trace!("GET {}", url);
        let mut req = self.client.get(&url).query(query);
        if let Some(token) = bearer {
            req = req.bearer_auth(token);
        }
        let resp = req.send().await?;
        Self::parse(resp).await
    }

    async fn post_form(&self, url: &str, form: &[(String, String)]) -> Result<Value> {
        let url = resolve_url(&self.base_url, url);
        log::trace!("POST {}", url);
        let resp = self.client.post(&url).form(form).send().await?;
        Self::parse(resp).await
    }
}

// ============================================================================
// Scripted
// ============================================================================

/// A request seen by [`ScriptedTransport`]
#[derive(Debug, Clone, PartialEq)]
pub struct RecordedRequest {
    pub method: &'static str,
    pub url: String,
    pub params: Params,
    pub bearer: Option<String>,
}

impl RecordedRequest {
    /// Value of a query/form parameter
    pub fn param(&self, key: &str) -> Option<&str> {
        self.params
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }
}

struct Route {
    prefix: String,
    responses: VecDeque<Result<Value>>,
}

/// In-memory transport answering canned JSON by longest URL prefix.
///
/// A route holding several responses hands them out in order and keeps
/// repeating the last one.
#[derive(Default)]
pub struct ScriptedTransport {
    routes: Mutex<Vec<Route>>,
    requests: Mutex<Vec<RecordedRequest>>,
}

impl ScriptedTransport {
    pub fn new() -> Self {
        Self::default()
    }

    /// Always answer `prefix` with `response`
    pub fn respond(&self, prefix: impl Into<String>, response: Value) -> &Self {
        self.respond_sequence(prefix, vec![Ok(response)])
    }

    /// Always fail `prefix` with `error`
    pub fn fail(&self, prefix: impl Into<String>, error: FleetError) -> &Self {
        self.respond_sequence(prefix, vec![Err(error)])
    }

    /// Answer `prefix` with `responses` in order, repeating the last one
    pub fn respond_sequence(
        &self,
        prefix: impl Into<String>,
        responses: Vec<Result<Value>>,
    ) -> &Self {
        let prefix = prefix.into();
        let mut routes = lock(&self.routes);
        routes.retain(|r| r.prefix != prefix);
        routes.push(Route {
            prefix,
            responses: responses.into(),
        });
        self
    }

    /// Build from a fixture object: keys are URL prefixes, an object value is
    /// a single response and an array value is a response sequence.
    pub fn from_fixture(fixture: &Value) -> Result<Self> {
        let routes = fixture
            .as_object()
            .ok_or_else(|| FleetError::Decode("fixture must be a JSON object".to_string()))?;
        let transport = Self::new();
        for (prefix, response) in routes {
            match response {
                Value::Array(items) => {
                    transport.respond_sequence(prefix.clone(), items.iter().cloned().map(Ok).collect())
                }
                other => transport.respond(prefix.clone(), other.clone()),
            };
        }
        Ok(transport)
    }

    /// All requests received so far
    pub fn requests(&self) -> Vec<RecordedRequest> {
        lock(&self.requests).clone()
    }

    /// Requests whose URL starts with `prefix`
    pub fn requests_to(&self, prefix: &str) -> Vec<RecordedRequest> {
        lock(&self.requests)
            .iter()
            .filter(|r| r.url.starts_with(prefix))
            .cloned()
            .collect()
    }

    /// Forget recorded requests
    pub fn clear_requests(&self) {
        lock(&self.requests).clear();
    }

    fn answer(
        &self,
        method: &'static str,
        url: &str,
        params: &[(String, String)],
        bearer: Option<&str>,
    ) -> Result<Value> {
        lock(&self.requests).push(RecordedRequest {
            method,
            url: url.to_string(),
            params: params.to_vec(),
            bearer: bearer.map(str::to_string),
        });

        let mut routes = lock(&self.routes);
        let route = routes
            .iter_mut()
            .filter(|r| url.starts_with(&r.prefix))
            .max_by_key(|r| r.prefix.len())
            .ok_or_else(|| FleetError::Http {
                status: 404,
                message: format!("no scripted response for {}", url),
            })?;

        if route.responses.len() > 1 {
            route
                .responses
                .pop_front()
                .unwrap_or_else(|| Err(FleetError::Decode("empty route".to_string())))
        } else {
            route
                .responses
                .front()
                .cloned()
                .unwrap_or_else(|| Err(FleetError::Decode("empty route".to_string())))
        }
    }
}

#[async_trait]
impl Transport for ScriptedTransport {
    async fn get(
        &self,
        url: &str,
        query: &[(String, String)],
        bearer: Option<&str>,
    ) -> Result<Value> {
        self.answer("GET", url, query, bearer)
    }

    async fn post_form(&self, url: &str, form: &[(String, String)]) -> Result<Value> {
        self.answer("POST", url, form, None)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_resolve_url() {
        assert_eq!(
            resolve_url("https://admin.googleapis.com/", "/admin/directory/v1/users"),
            "https://admin.googleapis.com/admin/directory/v1/users"
        );
        assert_eq!(
            resolve_url("https://admin.googleapis.com", "https://oauth2.googleapis.com/token"),
            "https://oauth2.googleapis.com/token"
        );
    }

    #[tokio::test]
    async fn test_longest_prefix_wins() {
        let transport = ScriptedTransport::new();
        transport.respond("/a", json!({"route": "short"}));
        transport.respond("/a/b", json!({"route": "long"}));

        let v = transport.get("/a/b/c", &[], None).await.unwrap();
        assert_eq!(v["route"], "long");
        let v = transport.get("/a/x", &[], None).await.unwrap();
        assert_eq!(v["route"], "short");
    }

    #[tokio::test]
    async fn test_sequence_repeats_last() {
        let transport = ScriptedTransport::new();
        transport.respond_sequence(
            "/page",
            vec![Ok(json!({"n": 1})), Err(FleetError::Network("down".into())), Ok(json!({"n": 3}))],
        );

        assert_eq!(transport.get("/page", &[], None).await.unwrap()["n"], 1);
        assert!(transport.get("/page", &[], None).await.is_err());
        assert_eq!(transport.get("/page", &[], None).await.unwrap()["n"], 3);
        assert_eq!(transport.get("/page", &[], None).await.unwrap()["n"], 3);
    }

    #[tokio::test]
    async fn test_unknown_route_is_404() {
        let transport = ScriptedTransport::new();
        let err = transport.get("/missing", &[], None).await.unwrap_err();
        assert!(matches!(err, FleetError::Http { status: 404, .. }));
    }

    #[tokio::test]
    async fn test_requests_are_recorded() {
        let transport = ScriptedTransport::new();
        transport.respond("/x", json!({}));
        let query = vec![("pageToken".to_string(), "abc".to_string())];
        transport.get("/x", &query, Some("tok")).await.unwrap();

        let requests = transport.requests_to("/x");
        assert_eq!(requests.len(), 1);
        assert_eq!(requests[0].param("pageToken"), Some("abc"));
        assert_eq!(requests[0].bearer.as_deref(), Some("tok"));
    }

    #[tokio::test]
    async fn test_from_fixture() {
        let fixture = json!({
            "/single": {"ok": true},
            "/seq": [{"n": 1}, {"n": 2}]
        });
        let transport = ScriptedTransport::from_fixture(&fixture).unwrap();
        assert_eq!(transport.get("/single", &[], None).await.unwrap()["ok"], true);
        assert_eq!(transport.get("/seq", &[], None).await.unwrap()["n"], 1);
        assert_eq!(transport.get("/seq", &[], None).await.unwrap()["n"], 2);

        assert!(ScriptedTransport::from_fixture(&json!([1, 2])).is_err());
    }
}
