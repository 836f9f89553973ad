//! WebSocket transport wrapper.
//!
//! Owns one event-stream connection and a durable subscription table:
//!
//! ```text
//!   on("deal", h) ──► SubscriptionTable (durable, survives reconnects)
//!                          │
//!                          │ replayed on every successful connect
//!                          ▼
//!                     LiveBinding (per connection) ◄── reader task ◄── WebSocket
//!                          │
//!   emit("commit", …) ─────┴──► outgoing channel ──► writer task ──► WebSocket
//! ```
//!
//! Lifecycle signals (`connect`, `disconnect`, `connect_error`) are raised by
//! the wrapper itself and always dispatched from the durable table. Server
//! events are dispatched from the live binding of the connection that
//! received them, so a late frame from a superseded connection is dropped.
//!
//! No game semantics live here.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, RwLock};

use futures_util::{SinkExt, StreamExt};
use serde::de::DeserializeOwned;
use serde_json::{json, Value};
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::Message;

use crate::protocol::{
    ClientMessage, WireFrame, EVENT_CONNECT, EVENT_CONNECT_ERROR, EVENT_DISCONNECT,
};
use crate::{lock, read, write};

/// An event handler. Receives the raw JSON payload.
pub type Handler = Arc<dyn Fn(&Value) + Send + Sync>;

/// Transport connection state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
}

/// Why a connection ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DisconnectReason {
    /// `disconnect()` was called locally
    ClientDisconnect,
    /// The peer closed the stream
    TransportClose,
    /// The stream failed
    TransportError,
}

impl DisconnectReason {
    /// Wire form carried in the `disconnect` payload.
    pub fn as_str(&self) -> &'static str {
        match self {
            DisconnectReason::ClientDisconnect => "io client disconnect",
            DisconnectReason::TransportClose => "transport close",
            DisconnectReason::TransportError => "transport error",
        }
    }

    /// Parse the `reason` field of a `disconnect` payload.
    ///
    /// Unknown or missing reasons count as transport closes.
    pub fn parse(reason: Option<&str>) -> Self {
        match reason {
            Some("io client disconnect") => DisconnectReason::ClientDisconnect,
            Some("transport error") => DisconnectReason::TransportError,
            _ => DisconnectReason::TransportClose,
        }
    }

    /// Whether the local side asked for this disconnect.
    pub fn is_intentional(&self) -> bool {
        matches!(self, DisconnectReason::ClientDisconnect)
    }
}

/// Outbound half of the transport, as seen by the session.
///
/// Lets the action layer run against a recording double in tests.
pub trait Outbound: Send + Sync {
    /// Send a message. Returns `false` (after logging) when not connected.
    fn send(&self, message: &ClientMessage) -> bool;

    fn is_connected(&self) -> bool;

    /// Close the connection without scheduling a reconnect.
    fn close(&self);
}

/// Handlers bound to one live connection.
struct LiveBinding {
    generation: u64,
    handlers: HashMap<String, Vec<Handler>>,
    outgoing: mpsc::UnboundedSender<Message>,
}

/// The game socket.
///
/// Always used behind an `Arc`: the reader task holds a weak reference back
/// to the socket to dispatch frames.
pub struct GameSocket {
    url: String,
    state: RwLock<ConnectionState>,
    /// Durable handlers, keyed by event name
    subscriptions: RwLock<HashMap<String, Vec<Handler>>>,
    /// Bindings of the current connection (None while disconnected)
    live: RwLock<Option<LiveBinding>>,
    /// Bumped on every connect attempt and every local disconnect
    generation: AtomicU64,
    /// Serializes connection transitions with their lifecycle events
    lifecycle: Mutex<()>,
}

impl GameSocket {
    /// Create a disconnected socket for the given `ws://` or `wss://` URL.
    pub fn new(url: impl Into<String>) -> Arc<Self> {
        Arc::new(Self {
            url: url.into(),
            state: RwLock::new(ConnectionState::Disconnected),
            subscriptions: RwLock::new(HashMap::new()),
            live: RwLock::new(None),
            generation: AtomicU64::new(0),
            lifecycle: Mutex::new(()),
        })
    }

    /// Open the connection.
    ///
    /// Idempotent: returns `Ok(())` immediately when already connected or
    /// while another attempt is in flight.
    pub async fn connect(self: &Arc<Self>) -> Result<(), TransportError> {
        {
            let mut state = write(&self.state);
            match *state {
                ConnectionState::Connected | ConnectionState::Connecting => return Ok(()),
                ConnectionState::Disconnected => *state = ConnectionState::Connecting,
            }
        }
        let generation = self.generation.fetch_add(1, Ordering::SeqCst) + 1;
        log::info!("Connecting to {}", self.url);

        let ws_stream = match tokio_tungstenite::connect_async(self.url.as_str()).await {
            Ok((ws_stream, _)) => ws_stream,
            Err(e) => {
                let _lifecycle = lock(&self.lifecycle);
                if self.generation.load(Ordering::SeqCst) != generation {
                    return Err(TransportError::Cancelled);
                }
                *write(&self.state) = ConnectionState::Disconnected;
                log::warn!("Connection to {} failed: {e}", self.url);
                self.dispatch_lifecycle(EVENT_CONNECT_ERROR, &json!({ "message": e.to_string() }));
                return Err(TransportError::Connect(e.to_string()));
            }
        };

        let (mut ws_writer, mut ws_reader) = ws_stream.split();
        let (out_tx, mut out_rx) = mpsc::unbounded_channel::<Message>();

        // Bind, mark connected and raise `connect` in one step, so neither a
        // local disconnect nor the reader can slip in between
        {
            let _lifecycle = lock(&self.lifecycle);
            {
                let subscriptions = read(&self.subscriptions);
                let mut live = write(&self.live);
                // disconnect() was called while the handshake was in flight
                if self.generation.load(Ordering::SeqCst) != generation {
                    log::info!("Discarding connection to {} opened after disconnect", self.url);
                    return Err(TransportError::Cancelled);
                }
                // Replay durable handlers onto the new connection
                *live = Some(LiveBinding {
                    generation,
                    handlers: subscriptions.clone(),
                    outgoing: out_tx,
                });
                *write(&self.state) = ConnectionState::Connected;
            }
            log::info!("Connected to {}", self.url);
            self.dispatch_lifecycle(EVENT_CONNECT, &json!({}));
        }

        // Writer task: forward the outgoing channel to the WebSocket
        tokio::spawn(async move {
            while let Some(message) = out_rx.recv().await {
                let closing = matches!(message, Message::Close(_));
                if ws_writer.send(message).await.is_err() || closing {
                    break;
                }
            }
            let _ = ws_writer.close().await;
        });

        // Reader task: dispatch incoming frames until the stream ends
        let socket = Arc::downgrade(self);
        tokio::spawn(async move {
            let mut reason = DisconnectReason::TransportClose;
            while let Some(message) = ws_reader.next().await {
                let Some(live) = socket.upgrade() else { return };
                match message {
                    Ok(Message::Text(text)) => live.dispatch_frame(generation, text.as_str()),
                    Ok(Message::Close(_)) => break,
                    Ok(_) => {}
                    Err(e) => {
                        log::warn!("WebSocket read failed: {e}");
                        reason = DisconnectReason::TransportError;
                        break;
                    }
                }
            }
            if let Some(live) = socket.upgrade() {
                live.connection_lost(generation, reason);
            }
        });

        Ok(())
    }

    /// Close the connection and discard its live bindings.
    ///
    /// Durable subscriptions are kept and replayed by the next `connect()`.
    /// `disconnect` is raised only when a connection was open. Must not be
    /// called from inside a lifecycle handler.
    pub fn disconnect(&self) {
        let _lifecycle = lock(&self.lifecycle);
        self.generation.fetch_add(1, Ordering::SeqCst);
        let (binding, previous) = {
            let mut live = write(&self.live);
            let previous =
                std::mem::replace(&mut *write(&self.state), ConnectionState::Disconnected);
            (live.take(), previous)
        };

        if let Some(binding) = binding {
            let _ = binding.outgoing.send(Message::Close(None));
        }
        if previous == ConnectionState::Connected {
            log::info!("Disconnected from {}", self.url);
            let reason = DisconnectReason::ClientDisconnect;
            self.dispatch_lifecycle(EVENT_DISCONNECT, &json!({ "reason": reason.as_str() }));
        }
    }

    /// Whether a connection is open.
    pub fn is_connected(&self) -> bool {
        *read(&self.state) == ConnectionState::Connected
    }

    /// Current connection state.
    pub fn state(&self) -> ConnectionState {
        *read(&self.state)
    }

    /// Server URL.
    pub fn url(&self) -> &str {
        &self.url
    }

    /// Register a durable handler for an event.
    ///
    /// The handler is bound to the live connection immediately when one
    /// exists, and rebound on every later reconnect.
    pub fn on<F>(&self, event: &str, handler: F)
    where
        F: Fn(&Value) + Send + Sync + 'static,
    {
        let handler: Handler = Arc::new(handler);
        let mut subscriptions = write(&self.subscriptions);
        subscriptions
            .entry(event.to_string())
            .or_default()
            .push(handler.clone());

        if let Some(binding) = write(&self.live).as_mut() {
            binding
                .handlers
                .entry(event.to_string())
                .or_default()
                .push(handler);
        }
    }

    /// Register a durable handler that receives a typed payload.
    ///
    /// Payloads that fail to deserialize are logged and skipped.
    pub fn subscribe<T, F>(&self, event: &str, handler: F)
    where
        T: DeserializeOwned,
        F: Fn(T) + Send + Sync + 'static,
    {
        let name = event.to_string();
        self.on(event, move |data| {
            let data = match data {
                Value::Null => json!({}),
                other => other.clone(),
            };
            match serde_json::from_value::<T>(data) {
                Ok(payload) => handler(payload),
                Err(e) => log::warn!("Invalid '{name}' payload: {e}"),
            }
        });
    }

    /// Remove every handler for an event.
    pub fn off(&self, event: &str) {
        let mut subscriptions = write(&self.subscriptions);
        subscriptions.remove(event);
        if let Some(binding) = write(&self.live).as_mut() {
            binding.handlers.remove(event);
        }
    }

    /// Number of durable handlers registered for an event.
    pub fn handler_count(&self, event: &str) -> usize {
        read(&self.subscriptions).get(event).map_or(0, Vec::len)
    }

    /// Number of handlers bound to the live connection for an event.
    pub fn bound_handler_count(&self, event: &str) -> usize {
        read(&self.live)
            .as_ref()
            .and_then(|binding| binding.handlers.get(event))
            .map_or(0, Vec::len)
    }

    /// Emit a raw event. Returns `false` (with a warning) when not connected.
    pub fn emit(&self, event: &str, data: Value) -> bool {
        let text = match WireFrame::new(event, data).encode() {
            Ok(text) => text,
            Err(e) => {
                log::error!("Cannot encode '{event}': {e}");
                return false;
            }
        };

        let live = read(&self.live);
        let binding = match live.as_ref() {
            Some(binding) if self.is_connected() => binding,
            _ => {
                log::warn!("Socket not connected; dropping '{event}'");
                return false;
            }
        };
        if binding.outgoing.send(Message::Text(text.into())).is_err() {
            log::warn!("Writer closed; dropping '{event}'");
            return false;
        }
        log::debug!(">> {event}");
        true
    }

    /// Emit a typed client message.
    pub fn send(&self, message: &ClientMessage) -> bool {
        match message.to_frame() {
            Ok(frame) => self.emit(&frame.event, frame.data),
            Err(e) => {
                log::error!("Cannot encode '{}': {e}", message.event_name());
                false
            }
        }
    }

    fn dispatch_frame(&self, generation: u64, text: &str) {
        let frame = match WireFrame::decode(text) {
            Ok(frame) => frame,
            Err(e) => {
                log::warn!("Dropping frame: {e}");
                return;
            }
        };

        let handlers = {
            let live = read(&self.live);
            match live.as_ref() {
                Some(binding) if binding.generation == generation => binding
                    .handlers
                    .get(&frame.event)
                    .cloned()
                    .unwrap_or_default(),
                _ => return,
            }
        };

        if handlers.is_empty() {
            log::debug!("<< {} (unhandled)", frame.event);
        }
        for handler in handlers {
            handler(&frame.data);
        }
    }

    fn dispatch_lifecycle(&self, event: &str, data: &Value) {
        let handlers = read(&self.subscriptions)
            .get(event)
            .cloned()
            .unwrap_or_default();
        for handler in handlers {
            handler(data);
        }
    }

    fn connection_lost(&self, generation: u64, reason: DisconnectReason) {
        let _lifecycle = lock(&self.lifecycle);
        {
            let mut live = write(&self.live);
            match live.as_ref() {
                Some(binding) if binding.generation == generation => *live = None,
                _ => return,
            }
            *write(&self.state) = ConnectionState::Disconnected;
        }
        log::warn!("Connection to {} lost: {}", self.url, reason.as_str());
        self.dispatch_lifecycle(EVENT_DISCONNECT, &json!({ "reason": reason.as_str() }));
    }
}

impl Outbound for GameSocket {
    fn send(&self, message: &ClientMessage) -> bool {
        GameSocket::send(self, message)
    }

    fn is_connected(&self) -> bool {
        GameSocket::is_connected(self)
    }

    fn close(&self) {
        self.disconnect();
    }
}

/// Transport errors.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum TransportError {
    #[error("Connection failed: {0}")]
    Connect(String),
    #[error("Connection attempt cancelled by disconnect")]
    Cancelled,
}
