//! Network adapter: the HTTP contract, its reqwest implementation, and a
//! scripted mock for tests.
//!
//! The adapter also carries connectivity: `is_online` reflects the last
//! observation, and `connectivity_stream` multicasts transitions. A
//! detector (OS callbacks, reachability probes) feeds `set_online`; the
//! HTTP implementation additionally flips the flag on transport outcomes.

use crate::error::{Result, SyncError};
use async_trait::async_trait;
use reqwest::header::{HeaderMap, HeaderName, HeaderValue};
use serde_json::{json, Value};
use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;
use std::time::Duration;
use tokio::sync::watch;

/// What the remote answered: the HTTP status and the parsed JSON body
/// (`Null` when the body is absent or not JSON).
#[derive(Debug, Clone)]
pub struct AdapterResponse {
    pub status_code: u16,
    pub data: Value,
}

impl AdapterResponse {
    pub fn new(status_code: u16, data: Value) -> Self {
        Self { status_code, data }
    }

    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status_code)
    }
}

/// Transport consumed by the sync engine.
///
/// Methods return `Ok` for any HTTP response (the caller reads the
/// status) and `Err` only for transport-level failures.
#[async_trait]
pub trait NetworkAdapter: Send + Sync {
    async fn get(&self, path: &str) -> Result<AdapterResponse>;
    async fn post(&self, path: &str, body: &Value) -> Result<AdapterResponse>;
    async fn put(&self, path: &str, body: &Value) -> Result<AdapterResponse>;
    async fn patch(&self, path: &str, body: &Value) -> Result<AdapterResponse>;
    async fn delete(&self, path: &str) -> Result<AdapterResponse>;

    /// Last observed connectivity.
    fn is_online(&self) -> bool;

    /// Stream of connectivity transitions; the receiver observes the
    /// current value immediately.
    fn connectivity_stream(&self) -> watch::Receiver<bool>;

    /// Probes reachability of `url` (or the base URL) and updates the
    /// connectivity flag.
    async fn test_connection(&self, url: Option<&str>) -> bool;
}

/// `NetworkAdapter` over a shared `reqwest` client.
pub struct HttpAdapter {
    base_url: String,
    client: reqwest::Client,
    online: watch::Sender<bool>,
}

impl HttpAdapter {
    /// Builds the adapter with a base URL, default headers applied to
    /// every request, and a whole-request timeout.
    pub fn new(
        base_url: impl Into<String>,
        default_headers: &HashMap<String, String>,
        timeout: Duration,
    ) -> Result<Self> {
        let mut headers = HeaderMap::new();
        for (name, value) in default_headers {
            let name = HeaderName::from_bytes(name.as_bytes())
                .map_err(|e| SyncError::Validation(format!("invalid header name '{name}': {e}")))?;
            let value = HeaderValue::from_str(value)
                .map_err(|e| SyncError::Validation(format!("invalid header value: {e}")))?;
            headers.insert(name, value);
        }

        let client = reqwest::Client::builder()
            .timeout(timeout)
            .default_headers(headers)
            .build()?;

        let (online, _) = watch::channel(true);
        Ok(Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            client,
            online,
        })
    }

    /// Reports a connectivity observation from an external detector.
    pub fn set_online(&self, online: bool) {
        self.online.send_replace(online);
    }

    /// The configured base URL.
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn url(&self, path: &str) -> String {
        if path.starts_with('/') {
            format!("{}{}", self.base_url, path)
        } else {
            format!("{}/{}", self.base_url, path)
        }
    }

    async fn execute(&self, request: reqwest::RequestBuilder) -> Result<AdapterResponse> {
        match request.send().await {
            Ok(response) => {
                self.online.send_replace(true);
                let status_code = response.status().as_u16();
                let data = response.json::<Value>().await.unwrap_or(Value::Null);
                Ok(AdapterResponse::new(status_code, data))
            }
            Err(err) => {
                self.online.send_replace(false);
                Err(err.into())
            }
        }
    }
}

#[async_trait]
impl NetworkAdapter for HttpAdapter {
    async fn get(&self, path: &str) -> Result<AdapterResponse> {
        self.execute(self.client.get(self.url(path))).await
    }

    async fn post(&self, path: &str, body: &Value) -> Result<AdapterResponse> {
        self.execute(self.client.post(self.url(path)).json(body)).await
    }

    async fn put(&self, path: &str, body: &Value) -> Result<AdapterResponse> {
        self.execute(self.client.put(self.url(path)).json(body)).await
    }

    async fn patch(&self, path: &str, body: &Value) -> Result<AdapterResponse> {
        self.execute(self.client.patch(self.url(path)).json(body)).await
    }

    async fn delete(&self, path: &str) -> Result<AdapterResponse> {
        self.execute(self.client.delete(self.url(path))).await
    }

    fn is_online(&self) -> bool {
        *self.online.borrow()
    }

    fn connectivity_stream(&self) -> watch::Receiver<bool> {
        self.online.subscribe()
    }

    async fn test_connection(&self, url: Option<&str>) -> bool {
        let target = url.map(str::to_string).unwrap_or_else(|| self.base_url.clone());
        let reachable = self.client.get(target).send().await.is_ok();
        self.online.send_replace(reachable);
        reachable
    }
}

/// A request the mock adapter observed.
#[derive(Debug, Clone)]
pub struct RecordedRequest {
    pub method: String,
    pub path: String,
    pub body: Option<Value>,
}

/// Scripted in-process adapter for tests.
///
/// Responses are looked up per `"METHOD /path"` key: one-shot responses
/// first (FIFO), then a persistent stub, then a benign default
/// (`200 []` for GET, `201 {}` for everything else). Connectivity is
/// driven by hand through [`MockAdapter::set_online`].
pub struct MockAdapter {
    online: watch::Sender<bool>,
    requests: Mutex<Vec<RecordedRequest>>,
    scripted: Mutex<HashMap<String, VecDeque<AdapterResponse>>>,
    stubs: Mutex<HashMap<String, AdapterResponse>>,
}

impl MockAdapter {
    pub fn new() -> Self {
        let (online, _) = watch::channel(true);
        Self {
            online,
            requests: Mutex::new(Vec::new()),
            scripted: Mutex::new(HashMap::new()),
            stubs: Mutex::new(HashMap::new()),
        }
    }

    /// Flips the connectivity flag and notifies stream subscribers.
    pub fn set_online(&self, online: bool) {
        self.online.send_replace(online);
    }

    /// Queues a one-shot response for `METHOD path`.
    pub fn push_response(&self, method: &str, path: &str, status: u16, data: Value) {
        self.scripted
            .lock()
            .unwrap()
            .entry(key(method, path))
            .or_default()
            .push_back(AdapterResponse::new(status, data));
    }

    /// Installs a persistent response for `METHOD path`.
    pub fn stub(&self, method: &str, path: &str, status: u16, data: Value) {
        self.stubs
            .lock()
            .unwrap()
            .insert(key(method, path), AdapterResponse::new(status, data));
    }

    /// Every request observed so far.
    pub fn requests(&self) -> Vec<RecordedRequest> {
        self.requests.lock().unwrap().clone()
    }

    /// Requests observed for `METHOD path`.
    pub fn requests_to(&self, method: &str, path: &str) -> Vec<RecordedRequest> {
        self.requests()
            .into_iter()
            .filter(|r| r.method == method && r.path == path)
            .collect()
    }

    fn respond(&self, method: &str, path: &str, body: Option<Value>) -> AdapterResponse {
        self.requests.lock().unwrap().push(RecordedRequest {
            method: method.to_string(),
            path: path.to_string(),
            body,
        });

        let key = key(method, path);
        if let Some(queue) = self.scripted.lock().unwrap().get_mut(&key) {
            if let Some(response) = queue.pop_front() {
                return response;
            }
        }
        if let Some(response) = self.stubs.lock().unwrap().get(&key) {
            return response.clone();
        }
        if method == "GET" {
            AdapterResponse::new(200, json!([]))
        } else {
            AdapterResponse::new(201, json!({}))
        }
    }
}

impl Default for MockAdapter {
    fn default() -> Self {
        Self::new()
    }
}

fn key(method: &str, path: &str) -> String {
    format!("{method} {path}")
}

#[async_trait]
impl NetworkAdapter for MockAdapter {
    async fn get(&self, path: &str) -> Result<AdapterResponse> {
        Ok(self.respond("GET", path, None))
    }

    async fn post(&self, path: &str, body: &Value) -> Result<AdapterResponse> {
        Ok(self.respond("POST", path, Some(body.clone())))
    }

    async fn put(&self, path: &str, body: &Value) -> Result<AdapterResponse> {
        Ok(self.respond("PUT", path, Some(body.clone())))
    }

    async fn patch(&self, path: &str, body: &Value) -> Result<AdapterResponse> {
        Ok(self.respond("PATCH", path, Some(body.clone())))
    }

    async fn delete(&self, path: &str) -> Result<AdapterResponse> {
        Ok(self.respond("DELETE", path, None))
    }

    fn is_online(&self) -> bool {
        *self.online.borrow()
    }

    fn connectivity_stream(&self) -> watch::Receiver<bool> {
        self.online.subscribe()
    }

    async fn test_connection(&self, _url: Option<&str>) -> bool {
        self.is_online()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn mock_default_responses() {
        let adapter = MockAdapter::new();

        let response = adapter.get("/todos").await.unwrap();
        assert_eq!(response.status_code, 200);
        assert_eq!(response.data, json!([]));

        let response = adapter.post("/todos", &json!({"id": "t1"})).await.unwrap();
        assert_eq!(response.status_code, 201);
    }

    #[tokio::test]
    async fn mock_scripted_responses_drain_in_order() {
        let adapter = MockAdapter::new();
        adapter.push_response("POST", "/todos", 500, json!({}));
        adapter.push_response("POST", "/todos", 201, json!({}));

        assert_eq!(adapter.post("/todos", &json!({})).await.unwrap().status_code, 500);
        assert_eq!(adapter.post("/todos", &json!({})).await.unwrap().status_code, 201);
        // Exhausted: back to the default.
        assert_eq!(adapter.post("/todos", &json!({})).await.unwrap().status_code, 201);
    }

    #[tokio::test]
    async fn mock_stub_persists() {
        let adapter = MockAdapter::new();
        adapter.stub("POST", "/todos", 500, json!({"error": "boom"}));

        for _ in 0..3 {
            let response = adapter.post("/todos", &json!({})).await.unwrap();
            assert_eq!(response.status_code, 500);
        }
    }

    #[tokio::test]
    async fn mock_records_requests() {
        let adapter = MockAdapter::new();
        adapter.post("/todos", &json!({"id": "t1"})).await.unwrap();
        adapter.get("/todos").await.unwrap();

        let posts = adapter.requests_to("POST", "/todos");
        assert_eq!(posts.len(), 1);
        assert_eq!(posts[0].body.as_ref().unwrap()["id"], json!("t1"));
        assert_eq!(adapter.requests().len(), 2);
    }

    #[tokio::test]
    async fn mock_connectivity_stream() {
        let adapter = MockAdapter::new();
        adapter.set_online(false);
        let mut stream = adapter.connectivity_stream();
        assert!(!*stream.borrow());

        adapter.set_online(true);
        stream.changed().await.unwrap();
        assert!(*stream.borrow());
        assert!(adapter.is_online());
    }

    #[test]
    fn http_adapter_url_joining() {
        let adapter = HttpAdapter::new(
            "https://api.example.com/",
            &HashMap::new(),
            Duration::from_secs(5),
        )
        .unwrap();

        assert_eq!(adapter.base_url(), "https://api.example.com");
        assert_eq!(adapter.url("/todos"), "https://api.example.com/todos");
        assert_eq!(adapter.url("todos"), "https://api.example.com/todos");
    }

    #[test]
    fn http_adapter_rejects_bad_headers() {
        let mut headers = HashMap::new();
        headers.insert("bad name".to_string(), "v".to_string());
        let result = HttpAdapter::new("https://api.example.com", &headers, Duration::from_secs(5));
        assert!(matches!(result, Err(SyncError::Validation(_))));
    }
}
