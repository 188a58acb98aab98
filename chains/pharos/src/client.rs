//! Outbound HTTP to the Pharos API.
//!
//! Every call goes through the [`Transport`] trait so workflows can be driven
//! by a scripted transport in tests. [`HttpTransport`] is the reqwest-backed
//! implementation: one pooled client per proxy, a fixed per-call timeout and a
//! random User-Agent on every request. Non-2xx statuses come back as ordinary
//! [`RawResult::Http`] values; only failures to get any response at all are
//! [`RawResult::Transport`].

use crate::config::ApiConfig;
use anyhow::{Context, Result};
use async_trait::async_trait;
use core_logic::{NetworkError, ProxyConfig};
use rand::seq::SliceRandom;
use reqwest::{Client, Proxy};
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Duration;

const USER_AGENTS: &[&str] = &[
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/122.0.0.0 Safari/537.36",
    "Mozilla/5.0 (Macintosh; Intel Mac OS X 10_15_7) AppleWebKit/605.1.15 (KHTML, like Gecko) Version/17.2 Safari/605.1.15",
    "Mozilla/5.0 (X11; Linux x86_64; rv:123.0) Gecko/20100101 Firefox/123.0",
];

pub fn random_user_agent() -> &'static str {
    USER_AGENTS
        .choose(&mut rand::thread_rng())
        .copied()
        .unwrap_or(USER_AGENTS[0])
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Method {
    Get,
    Post,
}

#[derive(Debug, Clone)]
pub struct ApiRequest {
    pub method: Method,
    pub url: String,
    pub query: Vec<(String, String)>,
    pub bearer: Option<String>,
    pub body: Option<Value>,
}

impl ApiRequest {
    pub fn get(url: impl Into<String>) -> Self {
        Self {
            method: Method::Get,
            url: url.into(),
            query: Vec::new(),
            bearer: None,
            body: None,
        }
    }

    pub fn post(url: impl Into<String>) -> Self {
        Self {
            method: Method::Post,
            ..Self::get(url)
        }
    }

    pub fn query(mut self, key: &str, value: impl Into<String>) -> Self {
        self.query.push((key.to_string(), value.into()));
        self
    }

    pub fn bearer(mut self, token: impl Into<String>) -> Self {
        self.bearer = Some(token.into());
        self
    }

    pub fn json(mut self, body: Value) -> Self {
        self.body = Some(body);
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransportErrorKind {
    Timeout,
    Connect,
    Other,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RawResult {
    Http { status: u16, body: String },
    Transport { kind: TransportErrorKind, message: String },
}

impl RawResult {
    pub fn ok(body: impl Into<String>) -> Self {
        RawResult::Http {
            status: 200,
            body: body.into(),
        }
    }

    pub fn status(status: u16, body: impl Into<String>) -> Self {
        RawResult::Http {
            status,
            body: body.into(),
        }
    }

    pub fn timeout() -> Self {
        RawResult::Transport {
            kind: TransportErrorKind::Timeout,
            message: "request timed out".to_string(),
        }
    }

    pub fn connect_refused() -> Self {
        RawResult::Transport {
            kind: TransportErrorKind::Connect,
            message: "connection refused".to_string(),
        }
    }

    pub fn http_status(&self) -> Option<u16> {
        match self {
            RawResult::Http { status, .. } => Some(*status),
            RawResult::Transport { .. } => None,
        }
    }

    pub fn json(&self) -> Option<Value> {
        match self {
            RawResult::Http { body, .. } => serde_json::from_str(body).ok(),
            RawResult::Transport { .. } => None,
        }
    }

    pub fn describe(&self) -> String {
        match self {
            RawResult::Http { status, body } => format!("HTTP {}: {}", status, truncate(body, 200)),
            RawResult::Transport { kind, message } => format!("{:?}: {}", kind, message),
        }
    }
}

fn truncate(s: &str, max: usize) -> &str {
    match s.char_indices().nth(max) {
        Some((idx, _)) => &s[..idx],
        None => s,
    }
}

#[async_trait]
pub trait Transport: Send + Sync {
    async fn send(&self, request: &ApiRequest, proxy: Option<&ProxyConfig>) -> RawResult;
}

/// Builds a reqwest client routed through `proxy` when given.
pub fn build_http_client(proxy: Option<&ProxyConfig>, timeout: Duration) -> Result<Client> {
    let mut builder = Client::builder()
        .timeout(timeout)
        .connect_timeout(Duration::from_secs(10))
        .pool_idle_timeout(Duration::from_secs(30));

    if let Some(proxy_config) = proxy {
        let mut proxy =
            Proxy::all(&proxy_config.url).map_err(|e| NetworkError::InvalidProxy {
                proxy: proxy_config.url.clone(),
                reason: e.to_string(),
            })?;
        if let (Some(username), Some(password)) = (&proxy_config.username, &proxy_config.password)
        {
            proxy = proxy.basic_auth(username, password);
        }
        builder = builder.proxy(proxy);
    }

    builder.build().context("Failed to build HTTP client")
}

pub struct HttpTransport {
    api: ApiConfig,
    timeout: Duration,
    clients: Mutex<HashMap<String, Client>>,
}

impl HttpTransport {
    pub fn new(api: ApiConfig) -> Self {
        let timeout = Duration::from_secs(api.request_timeout_secs);
        Self {
            api,
            timeout,
            clients: Mutex::new(HashMap::new()),
        }
    }

    fn client_for(&self, proxy: Option<&ProxyConfig>) -> Result<Client> {
        let key = proxy.map(|p| p.url.clone()).unwrap_or_default();
        let mut clients = self
            .clients
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        if let Some(client) = clients.get(&key) {
            return Ok(client.clone());
        }
        let client = build_http_client(proxy, self.timeout)?;
        clients.insert(key, client.clone());
        Ok(client)
    }

    fn transport_error(&self, endpoint: &str, e: reqwest::Error) -> RawResult {
        let (kind, error) = if e.is_timeout() {
            (
                TransportErrorKind::Timeout,
                NetworkError::Timeout {
                    timeout_ms: self.timeout.as_millis() as u64,
                    endpoint: endpoint.to_string(),
                },
            )
        } else {
            let kind = if e.is_connect() {
                TransportErrorKind::Connect
            } else {
                TransportErrorKind::Other
            };
            (
                kind,
                NetworkError::Connection {
                    endpoint: endpoint.to_string(),
                    reason: e.to_string(),
                },
            )
        };
        RawResult::Transport {
            kind,
            message: error.to_string(),
        }
    }
}

#[async_trait]
impl Transport for HttpTransport {
    async fn send(&self, request: &ApiRequest, proxy: Option<&ProxyConfig>) -> RawResult {
        let client = match self.client_for(proxy) {
            Ok(c) => c,
            Err(e) => {
                return RawResult::Transport {
                    kind: TransportErrorKind::Other,
                    message: format!("{:#}", e),
                }
            }
        };

        let mut builder = match request.method {
            Method::Get => client.get(&request.url),
            Method::Post => client.post(&request.url),
        }
        .query(&request.query)
        .header("Accept", "application/json, text/plain, */*")
        .header("Origin", &self.api.origin)
        .header("Referer", &self.api.referer)
        .header("User-Agent", random_user_agent());

        if let Some(token) = &request.bearer {
            builder = builder.bearer_auth(token);
        }
        if let Some(body) = &request.body {
            builder = builder.json(body);
        }

        match builder.send().await {
            Ok(response) => {
                let status = response.status().as_u16();
                match response.text().await {
                    Ok(body) => RawResult::Http { status, body },
                    Err(e) => self.transport_error(&request.url, e),
                }
            }
            Err(e) => self.transport_error(&request.url, e),
        }
    }
}

/// Egress IP as seen through `proxy`, `"???"` on any failure.
pub async fn current_ip(
    transport: &dyn Transport,
    echo_url: &str,
    proxy: Option<&ProxyConfig>,
) -> String {
    let result = transport.send(&ApiRequest::get(echo_url), proxy).await;
    match result.http_status() {
        Some(status) if (200..300).contains(&status) => result
            .json()
            .and_then(|v| v.get("ip").and_then(Value::as_str).map(str::to_string))
            .unwrap_or_else(|| "???".to_string()),
        _ => "???".to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Fixed(RawResult);

    #[async_trait]
    impl Transport for Fixed {
        async fn send(&self, _: &ApiRequest, _: Option<&ProxyConfig>) -> RawResult {
            self.0.clone()
        }
    }

    #[test]
    fn test_request_builder() {
        let req = ApiRequest::post("https://example.com/login")
            .query("address", "0x1")
            .bearer("jwt")
            .json(serde_json::json!({}));
        assert_eq!(req.method, Method::Post);
        assert_eq!(req.query, vec![("address".to_string(), "0x1".to_string())]);
        assert_eq!(req.bearer.as_deref(), Some("jwt"));
        assert!(req.body.is_some());
    }

    #[test]
    fn test_user_agent_from_pool() {
        for _ in 0..10 {
            assert!(USER_AGENTS.contains(&random_user_agent()));
        }
    }

    #[tokio::test]
    async fn test_current_ip_parses_and_falls_back() {
        let ok = Fixed(RawResult::ok(r#"{"ip":"1.2.3.4"}"#));
        assert_eq!(current_ip(&ok, "http://echo", None).await, "1.2.3.4");

        let bad = Fixed(RawResult::timeout());
        assert_eq!(current_ip(&bad, "http://echo", None).await, "???");

        let malformed = Fixed(RawResult::ok("nope"));
        assert_eq!(current_ip(&malformed, "http://echo", None).await, "???");
    }

    #[test]
    fn test_build_client_with_proxy() {
        let proxy = ProxyConfig {
            url: "http://127.0.0.1:8080".to_string(),
            username: Some("u".to_string()),
            password: Some("p".to_string()),
        };
        assert!(build_http_client(Some(&proxy), Duration::from_secs(1)).is_ok());
        assert!(build_http_client(None, Duration::from_secs(1)).is_ok());
    }
}
