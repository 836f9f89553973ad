//! Client configuration.
//!
//! Defaults target a local development server. Deployments either load the
//! build-time JSON document (`WS_URL`, `WS_NAMESPACE`, `API_BASE`,
//! `ENDPOINTS`) or override individual values from the environment:
//!
//! | Variable                  | Field          |
//! |---------------------------|----------------|
//! | `THINKALIKE_WS_URL`       | `ws_url`       |
//! | `THINKALIKE_WS_NAMESPACE` | `ws_namespace` |
//! | `THINKALIKE_API_BASE`     | `api_base`     |

use std::time::Duration;

use reqwest::Url;
use serde::Deserialize;

use crate::supervisor::RetryPolicy;
use crate::transient::DEFAULT_CAPACITY;

/// A single REST endpoint: path template plus HTTP method.
///
/// Path templates use `{name}` placeholders, e.g. `/players/username/{username}`.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct Endpoint {
    pub path: String,
    pub method: String,
}

impl Endpoint {
    fn new(method: &str, path: &str) -> Self {
        Self {
            path: path.to_string(),
            method: method.to_string(),
        }
    }
}

/// REST endpoints used to bootstrap a session.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct Endpoints {
    pub players_create: Endpoint,
    pub players_by_username: Endpoint,
    pub rooms_quick_join: Endpoint,
    pub rooms_join: Endpoint,
    pub rooms_leave: Endpoint,
    pub rooms_skip: Endpoint,
}

impl Default for Endpoints {
    fn default() -> Self {
        Self {
            players_create: Endpoint::new("POST", "/players"),
            players_by_username: Endpoint::new("GET", "/players/username/{username}"),
            rooms_quick_join: Endpoint::new("POST", "/rooms/quick-join"),
            rooms_join: Endpoint::new("POST", "/rooms/join"),
            rooms_leave: Endpoint::new("POST", "/rooms/leave"),
            rooms_skip: Endpoint::new("POST", "/rooms/skip"),
        }
    }
}

/// Sizing and lifetimes of the notification and emote collections.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TransientTimings {
    pub capacity: usize,
    pub notification_ttl: Duration,
    pub emote_ttl: Duration,
}

impl Default for TransientTimings {
    fn default() -> Self {
        Self {
            capacity: DEFAULT_CAPACITY,
            notification_ttl: Duration::from_secs(5),
            emote_ttl: Duration::from_secs(5),
        }
    }
}

/// Client configuration.
#[derive(Debug, Clone, PartialEq)]
pub struct ClientConfig {
    /// Base URL of the event-stream server (http(s) or ws(s))
    pub ws_url: String,
    /// Path appended to `ws_url`
    pub ws_namespace: String,
    /// Base URL for REST calls
    pub api_base: String,
    pub endpoints: Endpoints,
    /// Reconnect backoff
    pub retry: RetryPolicy,
    pub transient: TransientTimings,
    /// Seconds of estimated wait per spectator-queue position
    pub queue_seconds_per_position: u64,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            ws_url: "http://localhost:8000".to_string(),
            ws_namespace: "/".to_string(),
            api_base: "http://localhost:8000/api".to_string(),
            endpoints: Endpoints::default(),
            retry: RetryPolicy::default(),
            transient: TransientTimings::default(),
            queue_seconds_per_position: 30,
        }
    }
}

#[derive(Debug, Deserialize)]
struct RawConfig {
    #[serde(rename = "WS_URL")]
    ws_url: Option<String>,
    #[serde(rename = "WS_NAMESPACE")]
    ws_namespace: Option<String>,
    #[serde(rename = "API_BASE")]
    api_base: Option<String>,
    #[serde(rename = "ENDPOINTS")]
    endpoints: Option<Endpoints>,
}

impl ClientConfig {
    /// Defaults with environment overrides applied.
    pub fn from_env() -> Self {
        Self::default().with_overrides(|key| std::env::var(key).ok())
    }

    /// Load the JSON configuration document; absent keys keep their defaults.
    pub fn from_json(json: &str) -> Result<Self, ConfigError> {
        let raw: RawConfig =
            serde_json::from_str(json).map_err(|e| ConfigError::InvalidJson(e.to_string()))?;
        let mut config = Self::default();
        if let Some(ws_url) = raw.ws_url {
            config.ws_url = ws_url;
        }
        if let Some(namespace) = raw.ws_namespace {
            config.ws_namespace = namespace;
        }
        if let Some(api_base) = raw.api_base {
            config.api_base = api_base;
        }
        if let Some(endpoints) = raw.endpoints {
            config.endpoints = endpoints;
        }
        Ok(config)
    }

    /// Apply overrides from a key lookup (the environment, in production).
    pub fn with_overrides(mut self, lookup: impl Fn(&str) -> Option<String>) -> Self {
        if let Some(ws_url) = lookup("THINKALIKE_WS_URL").filter(|v| !v.is_empty()) {
            self.ws_url = ws_url;
        }
        if let Some(namespace) = lookup("THINKALIKE_WS_NAMESPACE").filter(|v| !v.is_empty()) {
            self.ws_namespace = namespace;
        }
        if let Some(api_base) = lookup("THINKALIKE_API_BASE").filter(|v| !v.is_empty()) {
            self.api_base = api_base;
        }
        self
    }

    /// Full WebSocket URL: `ws_url` joined with `ws_namespace`, with an
    /// http(s) scheme mapped to ws(s).
    pub fn socket_url(&self) -> Result<String, ConfigError> {
        let base = Url::parse(&self.ws_url)
            .map_err(|e| ConfigError::InvalidUrl(format!("{}: {e}", self.ws_url)))?;
        let mut url = base
            .join(&self.ws_namespace)
            .map_err(|e| ConfigError::InvalidUrl(format!("{}: {e}", self.ws_namespace)))?;

        let scheme = match url.scheme() {
            "http" | "ws" => "ws",
            "https" | "wss" => "wss",
            other => return Err(ConfigError::InvalidUrl(format!("unsupported scheme {other}"))),
        };
        url.set_scheme(scheme)
            .map_err(|_| ConfigError::InvalidUrl(format!("cannot use scheme {scheme}")))?;
        Ok(url.to_string())
    }
}

/// Configuration errors.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ConfigError {
    #[error("Invalid configuration JSON: {0}")]
    InvalidJson(String),
    #[error("Invalid URL: {0}")]
    InvalidUrl(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = ClientConfig::default();
        assert_eq!(config.transient.capacity, 10);
        assert_eq!(config.transient.notification_ttl, Duration::from_secs(5));
        assert_eq!(config.queue_seconds_per_position, 30);
        assert_eq!(config.endpoints.rooms_leave.method, "POST");
    }

    #[test]
    fn test_socket_url_maps_scheme() {
        let config = ClientConfig::default();
        assert_eq!(config.socket_url().unwrap(), "ws://localhost:8000/");

        let config = ClientConfig {
            ws_url: "https://game.example.com".into(),
            ws_namespace: "/socket".into(),
            ..ClientConfig::default()
        };
        assert_eq!(config.socket_url().unwrap(), "wss://game.example.com/socket");
    }

    #[test]
    fn test_socket_url_rejects_garbage() {
        let config = ClientConfig {
            ws_url: "not a url".into(),
            ..ClientConfig::default()
        };
        assert!(matches!(config.socket_url(), Err(ConfigError::InvalidUrl(_))));
    }

    #[test]
    fn test_overrides_skip_empty_values() {
        let config = ClientConfig::default().with_overrides(|key| match key {
            "THINKALIKE_WS_URL" => Some("http://10.0.0.2:9000".into()),
            "THINKALIKE_API_BASE" => Some(String::new()),
            _ => None,
        });
        assert_eq!(config.ws_url, "http://10.0.0.2:9000");
        assert_eq!(config.api_base, "http://localhost:8000/api");
    }

    #[test]
    fn test_from_json_partial_document() {
        let json = r#"{
            "WS_URL": "https://play.example.com",
            "API_BASE": "https://play.example.com/api",
            "ENDPOINTS": {
                "rooms_quick_join": {"path": "/rooms/quick_join", "method": "POST"}
            }
        }"#;
        let config = ClientConfig::from_json(json).unwrap();
        assert_eq!(config.ws_url, "https://play.example.com");
        assert_eq!(config.ws_namespace, "/");
        assert_eq!(config.endpoints.rooms_quick_join.path, "/rooms/quick_join");
        assert_eq!(config.endpoints.rooms_skip, Endpoints::default().rooms_skip);
    }

    #[test]
    fn test_from_json_invalid() {
        assert!(matches!(
            ClientConfig::from_json("{ nope"),
            Err(ConfigError::InvalidJson(_))
        ));
    }
}
