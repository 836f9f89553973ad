//! JSON event protocol spoken with the authoritative game server.
//!
//! Wire format (one WebSocket text frame per event):
//! ```text
//! ┌──────────────────────────────────────────────────────────┐
//! │ {"type": "<event name>", "data": { ...event payload... }} │
//! └──────────────────────────────────────────────────────────┘
//! ```
//!
//! Inbound frames decode into [`ServerEvent`], outbound intents encode from
//! [`ClientMessage`]. Transport lifecycle signals (`connect`, `disconnect`,
//! `connect_error`) are raised locally by the transport but share the same
//! envelope so that one subscription table serves both.

use std::fmt;

use chrono::{DateTime, NaiveDateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;

/// Lifecycle event raised when a connection opens.
pub const EVENT_CONNECT: &str = "connect";
/// Lifecycle event raised when a connection closes.
pub const EVENT_DISCONNECT: &str = "disconnect";
/// Lifecycle event raised when a connection attempt fails.
pub const EVENT_CONNECT_ERROR: &str = "connect_error";

/// Every inbound event name the session subscribes to.
pub const SERVER_EVENTS: &[&str] = &[
    EVENT_CONNECT,
    EVENT_DISCONNECT,
    EVENT_CONNECT_ERROR,
    "player_joined_game",
    "room_joined",
    "player_joined_room",
    "player_left_room",
    "room_left",
    "removed_from_room",
    "deal",
    "commits_update",
    "commit_ack",
    "request_reveal",
    "reveal_ack",
    "reveal_invalid",
    "round_results",
    "next_round_info",
    "player_emote",
    "queue_update",
    "game_state",
    "error",
    "game_error",
];

// ───────────────────────────────────────────────────────────────────
// Envelope
// ───────────────────────────────────────────────────────────────────

/// Envelope wrapping every frame on the socket.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WireFrame {
    #[serde(rename = "type")]
    pub event: String,
    #[serde(default)]
    pub data: Value,
}

impl WireFrame {
    pub fn new(event: impl Into<String>, data: Value) -> Self {
        Self {
            event: event.into(),
            data,
        }
    }

    /// Serialize to a text frame.
    pub fn encode(&self) -> Result<String, ProtocolError> {
        serde_json::to_string(self).map_err(|e| ProtocolError::Encode(e.to_string()))
    }

    /// Parse a text frame.
    pub fn decode(text: &str) -> Result<Self, ProtocolError> {
        serde_json::from_str(text).map_err(|e| ProtocolError::MalformedFrame(e.to_string()))
    }
}

// ───────────────────────────────────────────────────────────────────
// Inbound payloads
// ───────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct ConnectInfo {}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct DisconnectInfo {
    #[serde(default)]
    pub reason: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct ConnectErrorInfo {
    #[serde(default)]
    pub message: Option<String>,
}

/// Identity confirmation after the `join_player` handshake.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct PlayerJoinedGame {
    pub player_id: u64,
    pub username: String,
    pub balance: f64,
}

/// Room membership confirmed by the server.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct RoomJoined {
    #[serde(default, alias = "room_key_last_5")]
    pub room_key: Option<String>,
    #[serde(default = "default_tier")]
    pub tier: String,
    #[serde(default)]
    pub stake: f64,
    #[serde(default)]
    pub entry_fee: f64,
    #[serde(default)]
    pub player_count: u32,
    #[serde(default)]
    pub spectators: u32,
    #[serde(default = "default_room_state")]
    pub state: String,
    #[serde(default)]
    pub pot: f64,
    #[serde(default = "default_capacity")]
    pub capacity: u32,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct PlayerJoinedRoom {
    pub username: String,
    #[serde(default)]
    pub is_spectator: bool,
    pub player_count: u32,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct PlayerLeftRoom {
    pub username: String,
    pub player_count: u32,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct RoomLeft {}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct RemovedFromRoom {
    #[serde(default)]
    pub message: Option<String>,
}

/// A new round: one adjective, several nouns, and a selection window.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct Deal {
    pub round_key: String,
    pub adjective: String,
    pub nouns: Vec<String>,
    #[serde(deserialize_with = "de_instant")]
    pub selection_deadline: DateTime<Utc>,
    #[serde(default)]
    pub selection_duration: u32,
    #[serde(default)]
    pub pot: f64,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct CommitsUpdate {
    pub commits_count: u32,
    #[serde(default)]
    pub total_players: u32,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct CommitAck {
    #[serde(default)]
    pub round_key: Option<String>,
}

/// Selection window closed; committed players must reveal.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct RequestReveal {
    pub round_key: String,
    #[serde(default, deserialize_with = "de_opt_instant")]
    pub reveal_deadline: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct RevealAck {
    #[serde(default)]
    pub round_key: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct RevealInvalid {
    #[serde(default)]
    pub round_key: Option<String>,
    #[serde(default)]
    pub message: Option<String>,
}

/// Outcome of a round, including this player's payout.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct RoundResults {
    pub round_key: String,
    #[serde(default)]
    pub adjective: String,
    pub nouns: Vec<String>,
    pub selection_counts: Vec<u32>,
    /// `None` when the player sat the round out (server sends null or -1).
    #[serde(default, deserialize_with = "de_choice")]
    pub your_choice: Option<usize>,
    #[serde(default)]
    pub pot: f64,
    pub payout: f64,
    pub new_balance: f64,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct NextRoundInfo {
    #[serde(default, deserialize_with = "de_opt_instant")]
    pub start_time: Option<DateTime<Utc>>,
    #[serde(default)]
    pub player_count: u32,
    #[serde(default)]
    pub spectators: u32,
    #[serde(default)]
    pub pot: f64,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct PlayerEmote {
    pub emote: String,
    pub username: String,
    #[serde(default)]
    pub timestamp: Option<f64>,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct QueueUpdate {
    pub position: u32,
    #[serde(default)]
    pub total_waiting: u32,
}

/// Round snapshot pushed to spectators.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct GameStateSnapshot {
    pub adjective: String,
    pub nouns: Vec<String>,
    #[serde(deserialize_with = "de_instant")]
    pub selection_deadline: DateTime<Utc>,
    #[serde(default)]
    pub commits_count: u32,
}

/// Payload of both `error` and `game_error`.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct ServerError {
    pub message: String,
    #[serde(default)]
    pub code: Option<String>,
}

// ───────────────────────────────────────────────────────────────────
// Inbound event
// ───────────────────────────────────────────────────────────────────

/// Every event the session state machine consumes.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(tag = "type", content = "data", rename_all = "snake_case")]
pub enum ServerEvent {
    Connect(ConnectInfo),
    Disconnect(DisconnectInfo),
    ConnectError(ConnectErrorInfo),
    PlayerJoinedGame(PlayerJoinedGame),
    RoomJoined(RoomJoined),
    PlayerJoinedRoom(PlayerJoinedRoom),
    PlayerLeftRoom(PlayerLeftRoom),
    RoomLeft(RoomLeft),
    RemovedFromRoom(RemovedFromRoom),
    Deal(Deal),
    CommitsUpdate(CommitsUpdate),
    CommitAck(CommitAck),
    RequestReveal(RequestReveal),
    RevealAck(RevealAck),
    RevealInvalid(RevealInvalid),
    RoundResults(RoundResults),
    NextRoundInfo(NextRoundInfo),
    PlayerEmote(PlayerEmote),
    QueueUpdate(QueueUpdate),
    GameState(GameStateSnapshot),
    Error(ServerError),
    GameError(ServerError),
}

impl ServerEvent {
    /// Decode an event from its name and raw payload.
    ///
    /// A missing or `null` payload is treated as an empty object.
    pub fn decode(event: &str, data: &Value) -> Result<Self, ProtocolError> {
        if !SERVER_EVENTS.contains(&event) {
            return Err(ProtocolError::UnknownEvent(event.to_string()));
        }
        let data = match data {
            Value::Null => Value::Object(Default::default()),
            other => other.clone(),
        };
        let tagged = serde_json::json!({ "type": event, "data": data });
        serde_json::from_value(tagged).map_err(|e| ProtocolError::Decode {
            event: event.to_string(),
            reason: e.to_string(),
        })
    }

    /// Decode an event from a full wire frame.
    pub fn from_frame(frame: &WireFrame) -> Result<Self, ProtocolError> {
        Self::decode(&frame.event, &frame.data)
    }

    /// Wire name of this event.
    pub fn name(&self) -> &'static str {
        match self {
            ServerEvent::Connect(_) => EVENT_CONNECT,
            ServerEvent::Disconnect(_) => EVENT_DISCONNECT,
            ServerEvent::ConnectError(_) => EVENT_CONNECT_ERROR,
            ServerEvent::PlayerJoinedGame(_) => "player_joined_game",
            ServerEvent::RoomJoined(_) => "room_joined",
            ServerEvent::PlayerJoinedRoom(_) => "player_joined_room",
            ServerEvent::PlayerLeftRoom(_) => "player_left_room",
            ServerEvent::RoomLeft(_) => "room_left",
            ServerEvent::RemovedFromRoom(_) => "removed_from_room",
            ServerEvent::Deal(_) => "deal",
            ServerEvent::CommitsUpdate(_) => "commits_update",
            ServerEvent::CommitAck(_) => "commit_ack",
            ServerEvent::RequestReveal(_) => "request_reveal",
            ServerEvent::RevealAck(_) => "reveal_ack",
            ServerEvent::RevealInvalid(_) => "reveal_invalid",
            ServerEvent::RoundResults(_) => "round_results",
            ServerEvent::NextRoundInfo(_) => "next_round_info",
            ServerEvent::PlayerEmote(_) => "player_emote",
            ServerEvent::QueueUpdate(_) => "queue_update",
            ServerEvent::GameState(_) => "game_state",
            ServerEvent::Error(_) => "error",
            ServerEvent::GameError(_) => "game_error",
        }
    }
}

// ───────────────────────────────────────────────────────────────────
// Outbound messages
// ───────────────────────────────────────────────────────────────────

/// Messages the client emits to the server.
#[derive(Clone, PartialEq, Serialize)]
#[serde(tag = "type", content = "data", rename_all = "snake_case")]
pub enum ClientMessage {
    JoinPlayer { player_id: u64 },
    JoinRoom { room_token: String, as_spectator: bool },
    LeaveRoom {},
    Commit { hash: String },
    Reveal { choice: usize, nonce: String, round_key: String },
    SendEmote { emote: String },
    SpectatorQueue { want_to_join: bool },
}

impl ClientMessage {
    /// Wire name of this message.
    pub fn event_name(&self) -> &'static str {
        match self {
            ClientMessage::JoinPlayer { .. } => "join_player",
            ClientMessage::JoinRoom { .. } => "join_room",
            ClientMessage::LeaveRoom {} => "leave_room",
            ClientMessage::Commit { .. } => "commit",
            ClientMessage::Reveal { .. } => "reveal",
            ClientMessage::SendEmote { .. } => "send_emote",
            ClientMessage::SpectatorQueue { .. } => "spectator_queue",
        }
    }

    /// Wrap this message in a wire envelope.
    pub fn to_frame(&self) -> Result<WireFrame, ProtocolError> {
        let value = serde_json::to_value(self).map_err(|e| ProtocolError::Encode(e.to_string()))?;
        serde_json::from_value(value).map_err(|e| ProtocolError::Encode(e.to_string()))
    }
}

// Reveal carries the commitment preimage; keep it out of logs.
impl fmt::Debug for ClientMessage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ClientMessage::JoinPlayer { player_id } => f
                .debug_struct("JoinPlayer")
                .field("player_id", player_id)
                .finish(),
            ClientMessage::JoinRoom { as_spectator, .. } => f
                .debug_struct("JoinRoom")
                .field("as_spectator", as_spectator)
                .finish_non_exhaustive(),
            ClientMessage::LeaveRoom {} => f.write_str("LeaveRoom"),
            ClientMessage::Commit { hash } => f.debug_struct("Commit").field("hash", hash).finish(),
            ClientMessage::Reveal { round_key, .. } => f
                .debug_struct("Reveal")
                .field("round_key", round_key)
                .finish_non_exhaustive(),
            ClientMessage::SendEmote { emote } => {
                f.debug_struct("SendEmote").field("emote", emote).finish()
            }
            ClientMessage::SpectatorQueue { want_to_join } => f
                .debug_struct("SpectatorQueue")
                .field("want_to_join", want_to_join)
                .finish(),
        }
    }
}

// ───────────────────────────────────────────────────────────────────
// Errors
// ───────────────────────────────────────────────────────────────────

/// Wire protocol errors.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ProtocolError {
    #[error("Serialization error: {0}")]
    Encode(String),
    #[error("Malformed frame: {0}")]
    MalformedFrame(String),
    #[error("Invalid '{event}' payload: {reason}")]
    Decode { event: String, reason: String },
    #[error("Unknown event: {0}")]
    UnknownEvent(String),
}

// ───────────────────────────────────────────────────────────────────
// Serde helpers
// ───────────────────────────────────────────────────────────────────

fn default_tier() -> String {
    "casual".to_string()
}

fn default_room_state() -> String {
    "waiting".to_string()
}

fn default_capacity() -> u32 {
    12
}

/// Parse an ISO-8601 instant; offset-less timestamps are taken as UTC.
pub fn parse_instant(raw: &str) -> Option<DateTime<Utc>> {
    if let Ok(parsed) = DateTime::parse_from_rfc3339(raw) {
        return Some(parsed.with_timezone(&Utc));
    }
    NaiveDateTime::parse_from_str(raw, "%Y-%m-%dT%H:%M:%S%.f")
        .ok()
        .map(|naive| naive.and_utc())
}

fn de_instant<'de, D>(deserializer: D) -> Result<DateTime<Utc>, D::Error>
where
    D: Deserializer<'de>,
{
    let raw = String::deserialize(deserializer)?;
    parse_instant(&raw)
        .ok_or_else(|| serde::de::Error::custom(format!("invalid ISO-8601 instant: {raw}")))
}

fn de_opt_instant<'de, D>(deserializer: D) -> Result<Option<DateTime<Utc>>, D::Error>
where
    D: Deserializer<'de>,
{
    let raw: Option<String> = Option::deserialize(deserializer)?;
    match raw {
        None => Ok(None),
        Some(raw) => parse_instant(&raw)
            .map(Some)
            .ok_or_else(|| serde::de::Error::custom(format!("invalid ISO-8601 instant: {raw}"))),
    }
}

fn de_choice<'de, D>(deserializer: D) -> Result<Option<usize>, D::Error>
where
    D: Deserializer<'de>,
{
    let raw: Option<i64> = Option::deserialize(deserializer)?;
    Ok(raw.and_then(|index| usize::try_from(index).ok()))
}
