//! REST bootstrap client.
//!
//! Registration and room assignment go over plain HTTP; the server answers a
//! join with a one-time room token that is then consumed by the `join_room`
//! socket event. [`LobbyApi`] is the seam the action layer talks to so tests
//! can substitute a scripted double.

use async_trait::async_trait;
use reqwest::{Method, Url};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::{json, Value};

use crate::config::{ClientConfig, Endpoint, Endpoints};

/// Player account as returned by the lobby.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct PlayerRecord {
    pub id: u64,
    pub username: String,
    pub balance: f64,
    #[serde(default = "default_rating")]
    pub rating: u32,
    #[serde(default)]
    pub achievements: Vec<String>,
}

/// Answer to a quick-join or join-room request.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct RoomAssignment {
    #[serde(default)]
    pub failure_code: i32,
    pub room_key: String,
    pub room_token: String,
    #[serde(default)]
    pub tier: String,
    #[serde(default)]
    pub stake: f64,
    #[serde(default)]
    pub player_count: u32,
    #[serde(default)]
    pub entry_fee: f64,
    /// Balance after the entry fee, when the server charged one
    #[serde(default)]
    pub new_balance: Option<f64>,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct LeaveReceipt {
    pub success: bool,
    /// `true` when the leave takes effect at the end of the current round
    #[serde(default)]
    pub scheduled: bool,
    #[serde(default)]
    pub room_key: String,
    #[serde(default)]
    pub player_count: u32,
    #[serde(default)]
    pub spectators: u32,
    #[serde(default)]
    pub state: String,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct SkipReceipt {
    pub success: bool,
    #[serde(default)]
    pub room_key: String,
}

fn default_rating() -> u32 {
    1000
}

/// Lobby operations needed to bootstrap and tear down a session.
#[async_trait]
pub trait LobbyApi: Send + Sync {
    /// Look a player up by username, creating the account if it does not exist.
    async fn create_or_get_player(&self, username: &str) -> Result<PlayerRecord, ApiError>;

    async fn quick_join(
        &self,
        player_id: u64,
        tier: Option<&str>,
        as_spectator: bool,
    ) -> Result<RoomAssignment, ApiError>;

    async fn join_room(
        &self,
        room_key: &str,
        player_id: u64,
        as_spectator: bool,
    ) -> Result<RoomAssignment, ApiError>;

    async fn leave_room(
        &self,
        room_key: &str,
        player_id: u64,
        at_round_end: bool,
    ) -> Result<LeaveReceipt, ApiError>;

    async fn skip_next(&self, room_key: &str, player_id: u64) -> Result<SkipReceipt, ApiError>;
}

/// `reqwest` implementation of [`LobbyApi`].
#[derive(Debug, Clone)]
pub struct RestClient {
    http: reqwest::Client,
    api_base: String,
    endpoints: Endpoints,
}

impl RestClient {
    pub fn new(config: &ClientConfig) -> Self {
        Self {
            http: reqwest::Client::new(),
            api_base: config.api_base.clone(),
            endpoints: config.endpoints.clone(),
        }
    }

    /// Resolve an endpoint against the API base, filling `{name}`
    /// placeholders from `params`. Values are percent-encoded.
    pub fn endpoint_url(&self, endpoint: &Endpoint, params: &[(&str, &str)]) -> Result<Url, ApiError> {
        let mut url = Url::parse(&self.api_base)
            .map_err(|e| ApiError::Config(format!("{}: {e}", self.api_base)))?;
        {
            let mut segments = url
                .path_segments_mut()
                .map_err(|_| ApiError::Config(format!("{} cannot be a base URL", self.api_base)))?;
            segments.pop_if_empty();
            for segment in endpoint.path.split('/').filter(|s| !s.is_empty()) {
                match segment.strip_prefix('{').and_then(|s| s.strip_suffix('}')) {
                    Some(key) => {
                        let value = params
                            .iter()
                            .find(|(name, _)| *name == key)
                            .map(|(_, value)| *value)
                            .ok_or_else(|| ApiError::Config(format!("missing path parameter {key}")))?;
                        segments.push(value);
                    }
                    None => {
                        segments.push(segment);
                    }
                }
            }
        }
        Ok(url)
    }

    async fn call<T: DeserializeOwned>(
        &self,
        endpoint: &Endpoint,
        params: &[(&str, &str)],
        body: Option<Value>,
    ) -> Result<T, ApiError> {
        let url = self.endpoint_url(endpoint, params)?;
        let method = Method::from_bytes(endpoint.method.as_bytes())
            .map_err(|_| ApiError::Config(format!("invalid HTTP method {}", endpoint.method)))?;
        log::debug!("{method} {url}");

        let mut request = self.http.request(method, url);
        if let Some(body) = body {
            request = request.json(&body);
        }
        let response = request.send().await?;

        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            let message = error_detail(&text).unwrap_or_else(|| format!("{status}: {text}"));
            return Err(if status == reqwest::StatusCode::NOT_FOUND {
                ApiError::NotFound(message)
            } else {
                ApiError::Status {
                    status: status.as_u16(),
                    message,
                }
            });
        }

        response
            .json::<T>()
            .await
            .map_err(|e| ApiError::Decode(e.to_string()))
    }
}

/// Pull `detail` out of a FastAPI-style error body.
fn error_detail(body: &str) -> Option<String> {
    let value: Value = serde_json::from_str(body).ok()?;
    match value.get("detail")? {
        Value::String(detail) => Some(detail.clone()),
        other => Some(other.to_string()),
    }
}

fn check_assignment(assignment: RoomAssignment) -> Result<RoomAssignment, ApiError> {
    if assignment.failure_code != 0 {
        return Err(ApiError::Rejected {
            code: assignment.failure_code,
        });
    }
    Ok(assignment)
}

#[async_trait]
impl LobbyApi for RestClient {
    async fn create_or_get_player(&self, username: &str) -> Result<PlayerRecord, ApiError> {
        match self
            .call(&self.endpoints.players_by_username, &[("username", username)], None)
            .await
        {
            Ok(player) => Ok(player),
            Err(ApiError::NotFound(_)) => {
                log::info!("Creating player {username}");
                self.call(
                    &self.endpoints.players_create,
                    &[],
                    Some(json!({ "username": username })),
                )
                .await
            }
            Err(e) => Err(e),
        }
    }

    async fn quick_join(
        &self,
        player_id: u64,
        tier: Option<&str>,
        as_spectator: bool,
    ) -> Result<RoomAssignment, ApiError> {
        let body = json!({ "player_id": player_id, "tier": tier, "as_spectator": as_spectator });
        self.call(&self.endpoints.rooms_quick_join, &[], Some(body))
            .await
            .and_then(check_assignment)
    }

    async fn join_room(
        &self,
        room_key: &str,
        player_id: u64,
        as_spectator: bool,
    ) -> Result<RoomAssignment, ApiError> {
        let body = json!({ "room_key": room_key, "player_id": player_id, "as_spectator": as_spectator });
        self.call(&self.endpoints.rooms_join, &[], Some(body))
            .await
            .and_then(check_assignment)
    }

    async fn leave_room(
        &self,
        room_key: &str,
        player_id: u64,
        at_round_end: bool,
    ) -> Result<LeaveReceipt, ApiError> {
        let body = json!({ "room_key": room_key, "player_id": player_id, "at_round_end": at_round_end });
        self.call(&self.endpoints.rooms_leave, &[], Some(body)).await
    }

    async fn skip_next(&self, room_key: &str, player_id: u64) -> Result<SkipReceipt, ApiError> {
        let body = json!({ "room_key": room_key, "player_id": player_id });
        self.call(&self.endpoints.rooms_skip, &[], Some(body)).await
    }
}

/// REST errors.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ApiError {
    #[error("Request failed: {0}")]
    Http(String),
    #[error("{message}")]
    Status { status: u16, message: String },
    #[error("{0}")]
    NotFound(String),
    #[error("Room assignment rejected (code {code})")]
    Rejected { code: i32 },
    #[error("Unexpected response: {0}")]
    Decode(String),
    #[error("Bad API configuration: {0}")]
    Config(String),
}

impl From<reqwest::Error> for ApiError {
    fn from(e: reqwest::Error) -> Self {
        ApiError::Http(e.to_string())
    }
}
