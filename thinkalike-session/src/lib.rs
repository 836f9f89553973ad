//! # thinkalike-session — Client session engine for Think Alike
//!
//! Keeps one player's view of a Think Alike room in step with the
//! authoritative game server and runs the commit-reveal handshake that stops
//! a player from changing their pick after seeing other players' picks.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────┐   REST (join tokens)   ┌──────────────┐
//! │  GameClient  │ ─────────────────────► │  LobbyApi    │
//! │ (actions)    │                        └──────────────┘
//! └──────┬───────┘
//!        │ Effects            ┌──────────────┐
//!        ├──────────────────► │ SessionState │ ◄─── ServerEvent (reducer)
//!        │                    └──────────────┘            ▲
//!        ▼                                                │
//! ┌──────────────┐   JSON frames over WebSocket    ┌──────┴───────┐
//! │  GameSocket  │ ◄─────────────────────────────► │ Game server  │
//! └──────┬───────┘                                 └──────────────┘
//!        ▲
//!        │ connect() with backoff
//! ┌──────┴──────────────┐
//! │ ReconnectSupervisor │
//! └─────────────────────┘
//! ```
//!
//! ## Modules
//!
//! - [`protocol`] — JSON envelope, inbound events, outbound messages
//! - [`transport`] — WebSocket wrapper with durable subscriptions
//! - [`commit`] — SHA-256 commitments and nonces
//! - [`transient`] — bounded, self-expiring notification/emote lists
//! - [`session`] — round phase state machine
//! - [`client`] — public action API
//! - [`supervisor`] — reconnection with jittered backoff
//! - [`rest`] — lobby REST client
//! - [`config`] — client configuration

pub mod client;
pub mod commit;
pub mod config;
pub mod error;
pub mod protocol;
pub mod rest;
pub mod session;
pub mod supervisor;
pub mod transient;
pub mod transport;

use std::sync::{Mutex, MutexGuard, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

// Re-exports for convenience
pub use client::GameClient;
pub use commit::{derive_commitment, fresh_nonce, CodecError, SealedChoice};
pub use config::{ClientConfig, ConfigError, Endpoint, Endpoints, TransientTimings};
pub use error::{Result, SessionError};
pub use protocol::{ClientMessage, ProtocolError, ServerEvent, WireFrame};
pub use rest::{ApiError, LobbyApi, PlayerRecord, RestClient, RoomAssignment};
pub use session::{
    CommitState, Effect, EndOfRoundAction, GameSettings, PlayerIdentity, QueueState,
    RoomSnapshot, RoundPhase, RoundResult, RoundSnapshot, SessionState, SpectatorView,
};
pub use supervisor::{ReconnectSupervisor, RetryPolicy, SupervisorState, Visibility};
pub use transient::{Emote, Notification, NotificationLevel, TransientKind, TransientList};
pub use transport::{ConnectionState, DisconnectReason, GameSocket, Outbound, TransportError};

// Lock helpers: a poisoned lock is taken over, never propagated.

pub(crate) fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

pub(crate) fn read<T>(lock: &RwLock<T>) -> RwLockReadGuard<'_, T> {
    lock.read().unwrap_or_else(PoisonError::into_inner)
}

pub(crate) fn write<T>(lock: &RwLock<T>) -> RwLockWriteGuard<'_, T> {
    lock.write().unwrap_or_else(PoisonError::into_inner)
}
