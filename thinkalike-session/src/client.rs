//! Action layer: the public handle applications hold.
//!
//! [`GameClient`] owns the [`SessionState`] behind a mutex and funnels every
//! change through it. Transitions are computed under the lock; the resulting
//! [`Effect`]s (emissions, expiry timers, follow-up actions) run after the
//! lock is released. No lock is held across an `.await`.

use std::sync::{Arc, Mutex, Weak};

use uuid::Uuid;

use crate::commit::SealedChoice;
use crate::config::{ClientConfig, TransientTimings};
use crate::error::{Result, SessionError};
use crate::lock;
use crate::protocol::{ServerEvent, SERVER_EVENTS};
use crate::rest::LobbyApi;
use crate::session::{
    EndOfRoundAction, Effect, GameSettings, PlayerIdentity, SessionState,
};
use crate::transient::{schedule_expiry, NotificationLevel, TransientKind};
use crate::transport::{GameSocket, Outbound};

struct Inner {
    state: Mutex<SessionState>,
    outbound: Arc<dyn Outbound>,
    api: Arc<dyn LobbyApi>,
    timings: TransientTimings,
}

/// Cloneable handle to one player's session.
#[derive(Clone)]
pub struct GameClient {
    inner: Arc<Inner>,
}

enum JoinTarget<'a> {
    Quick(Option<&'a str>),
    Room(&'a str),
}

impl GameClient {
    pub fn new(config: &ClientConfig, outbound: Arc<dyn Outbound>, api: Arc<dyn LobbyApi>) -> Self {
        Self {
            inner: Arc::new(Inner {
                state: Mutex::new(SessionState::new(config)),
                outbound,
                api,
                timings: config.transient,
            }),
        }
    }

    /// Subscribe the session to every server event on `socket`.
    ///
    /// Subscriptions are durable, so this is done once, before or after the
    /// first connect. The socket only holds a weak reference to the session.
    pub fn attach(&self, socket: &GameSocket) {
        for &name in SERVER_EVENTS {
            let session = Arc::downgrade(&self.inner);
            socket.on(name, move |data| {
                let Some(inner) = session.upgrade() else {
                    return;
                };
                match ServerEvent::decode(name, data) {
                    Ok(event) => GameClient { inner }.handle_event(event),
                    Err(e) => log::warn!("Dropping '{name}': {e}"),
                }
            });
        }
    }

    /// Feed one server event through the reducer.
    pub fn handle_event(&self, event: ServerEvent) {
        log::debug!("<< {}", event.name());
        let effects = self.with_state(|state| state.apply(event));
        self.run(effects);
    }

    /// Immutable copy of the current state.
    pub fn snapshot(&self) -> SessionState {
        self.with_state(|state| state.clone())
    }

    // ── Identity ─────────────────────────────────────────────────────

    /// Look up or create the player, then bind them to the socket.
    pub async fn register(&self, username: &str) -> Result<PlayerIdentity> {
        let username = username.trim();
        if username.is_empty() {
            return Err(SessionError::EmptyUsername);
        }
        self.with_state(|state| state.begin_registration());

        match self.inner.api.create_or_get_player(username).await {
            Ok(record) => {
                let identity = PlayerIdentity::from(record.clone());
                log::info!("Registered as {} (id {})", identity.username, identity.id);
                let effects = self.with_state(|state| state.registration_succeeded(record));
                self.run(effects);
                Ok(identity)
            }
            Err(e) => {
                let effects = self.with_state(|state| state.registration_failed(&e.to_string()));
                self.run(effects);
                Err(e.into())
            }
        }
    }

    /// Leave any room, close the connection and forget the player.
    pub fn logout(&self) {
        let effects = self.with_state(|state| state.logout());
        self.run(effects);
        self.inner.outbound.close();
        log::info!("Logged out");
    }

    // ── Rooms ────────────────────────────────────────────────────────

    /// Join the next open room in `tier` (any tier when `None`).
    pub async fn quick_join(&self, tier: Option<&str>) -> Result<()> {
        self.request_room(JoinTarget::Quick(tier), false).await
    }

    pub async fn join_room(&self, room_key: &str) -> Result<()> {
        self.request_room(JoinTarget::Room(room_key), false).await
    }

    pub async fn spectate_room(&self, room_key: &str) -> Result<()> {
        self.request_room(JoinTarget::Room(room_key), true).await
    }

    async fn request_room(&self, target: JoinTarget<'_>, as_spectator: bool) -> Result<()> {
        if !self.inner.outbound.is_connected() {
            return Err(SessionError::NotConnected);
        }
        let request = self.with_state(|state| state.begin_join(as_spectator))?;

        let response = match target {
            JoinTarget::Quick(tier) => {
                self.inner
                    .api
                    .quick_join(request.player_id, tier, as_spectator)
                    .await
            }
            JoinTarget::Room(room_key) => {
                self.inner
                    .api
                    .join_room(room_key, request.player_id, as_spectator)
                    .await
            }
        };

        match response {
            Ok(assignment) => {
                let room_key = assignment.room_key.clone();
                match self.with_state(|state| state.complete_join(request.ticket, assignment)) {
                    Some(effects) => {
                        log::info!("Assigned to room {room_key}");
                        self.run(effects);
                    }
                    None => log::info!("Discarding stale assignment to room {room_key}"),
                }
                Ok(())
            }
            Err(e) => {
                let effects =
                    self.with_state(|state| state.join_failed(request.ticket, &e.to_string()));
                self.run(effects);
                Err(e.into())
            }
        }
    }

    /// Leave the current room at the end of the round.
    ///
    /// Membership is cleared when the server confirms with `room_left`.
    pub async fn leave_room(&self) -> Result<()> {
        let Some(request) = self.with_state(|state| state.begin_leave())? else {
            log::info!("Cancelled pending join");
            return Ok(());
        };

        let scheduled = match request.room_key.as_deref() {
            Some(room_key) => {
                match self
                    .inner
                    .api
                    .leave_room(room_key, request.player_id, true)
                    .await
                {
                    Ok(receipt) => receipt.scheduled,
                    Err(e) => {
                        let effects = self.with_state(|state| {
                            state.action_failed("Failed to leave room", &e.to_string())
                        });
                        self.run(effects);
                        return Err(e.into());
                    }
                }
            }
            None => false,
        };

        let effects = self.with_state(|state| state.leave_confirmed(scheduled));
        self.run(effects);
        Ok(())
    }

    /// Sit out the next round without leaving the room.
    pub async fn skip_next_round(&self) -> Result<()> {
        let request = self.with_state(|state| state.begin_skip())?;
        let room_key = request
            .room_key
            .ok_or_else(|| SessionError::InvalidState("room key unknown".to_string()))?;

        match self.inner.api.skip_next(&room_key, request.player_id).await {
            Ok(_) => {
                let effects = self.with_state(|state| state.skip_confirmed());
                self.run(effects);
                Ok(())
            }
            Err(e) => {
                let effects = self.with_state(|state| {
                    state.action_failed("Failed to skip round", &e.to_string())
                });
                self.run(effects);
                Err(e.into())
            }
        }
    }

    // ── Round ────────────────────────────────────────────────────────

    /// Commit to the noun at `choice` for the current round.
    ///
    /// The nonce and commitment are derived off the event loop; the choice is
    /// stored before the hash is sent.
    pub async fn commit_choice(&self, choice: usize) -> Result<()> {
        if !self.inner.outbound.is_connected() {
            return Err(SessionError::NotConnected);
        }
        let ticket = self.with_state(|state| state.begin_commit(choice))?;

        let (player_id, round_key) = (ticket.player_id, ticket.round_key.clone());
        let sealed = tokio::task::spawn_blocking(move || {
            SealedChoice::seal(player_id, &round_key, choice)
        })
        .await
        .map_err(|e| SessionError::InvalidState(format!("commit task failed: {e}")))??;

        let effects = self.with_state(|state| state.record_commit(&ticket, sealed))?;
        log::info!("Committed for round {}", ticket.round_key);
        self.run(effects);
        Ok(())
    }

    /// Reveal now instead of waiting for `request_reveal`.
    ///
    /// Returns `false` when the reveal had already been sent.
    pub fn reveal_now(&self) -> Result<bool> {
        let effects = self.with_state(|state| state.reveal_now())?;
        let sent = !effects.is_empty();
        self.run(effects);
        Ok(sent)
    }

    pub fn send_emote(&self, emote: &str) -> Result<()> {
        let result = self.with_state(|state| match state.request_emote(emote) {
            Ok(effects) => Ok(effects),
            Err(e) => Err((
                e,
                state.push_notification("Join a room to send emotes", NotificationLevel::Warning),
            )),
        });
        match result {
            Ok(effects) => {
                self.run(effects);
                Ok(())
            }
            Err((e, effects)) => {
                self.run(effects);
                Err(e)
            }
        }
    }

    /// Ask to join (`true`) or leave the spectator queue.
    pub fn toggle_queue(&self, want_to_join: bool) -> Result<()> {
        let effects = self.with_state(|state| state.request_queue(want_to_join))?;
        self.run(effects);
        Ok(())
    }

    /// Flip queue membership based on the last server-reported position.
    pub fn toggle_spectator_queue(&self) -> Result<()> {
        let queued = self.with_state(|state| state.queue().is_in_queue);
        self.toggle_queue(!queued)
    }

    // ── Preferences and transient state ──────────────────────────────

    pub fn set_end_of_round_action(&self, action: EndOfRoundAction) {
        self.with_state(|state| state.set_end_of_round_action(action));
    }

    pub fn update_settings(&self, update: impl FnOnce(&mut GameSettings)) {
        self.with_state(|state| update(state.settings_mut()));
    }

    pub fn add_notification(&self, message: impl Into<String>, level: NotificationLevel) -> Uuid {
        let effects = self.with_state(|state| state.push_notification(message, level));
        let id = effects.iter().find_map(|effect| match effect {
            Effect::Expire(_, id) => Some(*id),
            _ => None,
        });
        self.run(effects);
        id.unwrap_or_default()
    }

    /// Dismiss a notification. Unknown ids are ignored.
    pub fn dismiss_notification(&self, id: Uuid) {
        self.with_state(|state| state.remove_transient(TransientKind::Notification, id));
    }

    pub fn clear_notifications(&self) {
        self.with_state(|state| state.clear_notifications());
    }

    pub fn clear_error(&self) {
        self.with_state(|state| state.clear_error());
    }

    // ── Internals ────────────────────────────────────────────────────

    fn with_state<R>(&self, f: impl FnOnce(&mut SessionState) -> R) -> R {
        f(&mut lock(&self.inner.state))
    }

    fn run(&self, effects: Vec<Effect>) {
        for effect in effects {
            match effect {
                Effect::Send(message) => {
                    if !self.inner.outbound.send(&message) {
                        log::warn!("Could not send '{}'", message.event_name());
                    }
                }
                Effect::Expire(kind, id) => self.expire_later(kind, id),
                Effect::LeaveRoom => {
                    let Ok(runtime) = tokio::runtime::Handle::try_current() else {
                        log::warn!("No runtime to leave the room on");
                        continue;
                    };
                    let client = self.clone();
                    runtime.spawn(async move {
                        if let Err(e) = client.leave_room().await {
                            log::warn!("Leave after round failed: {e}");
                        }
                    });
                }
            }
        }
    }

    fn expire_later(&self, kind: TransientKind, id: Uuid) {
        if tokio::runtime::Handle::try_current().is_err() {
            log::debug!("No runtime; {kind:?} {id} will not expire");
            return;
        }
        let ttl = match kind {
            TransientKind::Notification => self.inner.timings.notification_ttl,
            TransientKind::Emote => self.inner.timings.emote_ttl,
        };
        let session: Weak<Inner> = Arc::downgrade(&self.inner);
        schedule_expiry(ttl, move || {
            if let Some(inner) = session.upgrade() {
                lock(&inner.state).remove_transient(kind, id);
            }
        });
    }
}
