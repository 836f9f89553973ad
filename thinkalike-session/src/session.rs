//! Session state machine.
//!
//! Mirrors the server's view of this player: identity, room, the current
//! round and the commit-reveal handshake for it.
//!
//! ```text
//!             deal              request_reveal              round_results
//!   NoRound ───────► Selecting ───────────────► Revealing ──────────────► Results
//!      ▲                 │                                                  │
//!      │                 └──────────────── round_results ──────────────────►│
//!      └─────────────────────── next_round_info ("continue") ───────────────┘
//!
//!   `deal` restarts from any phase. Timers never move the phase.
//! ```
//!
//! [`SessionState::apply`] reduces server events; the crate-private `begin_*`
//! and `record_*` methods are the local half used by the action layer. Both
//! return [`Effect`]s that the caller runs after releasing the state lock.

use std::fmt;
use std::time::Duration;

use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::commit::SealedChoice;
use crate::config::ClientConfig;
use crate::error::{Result, SessionError};
use crate::protocol::{
    ClientMessage, CommitAck, CommitsUpdate, ConnectErrorInfo, Deal, DisconnectInfo,
    GameStateSnapshot, NextRoundInfo, PlayerEmote, PlayerJoinedGame, PlayerJoinedRoom,
    PlayerLeftRoom, QueueUpdate, RemovedFromRoom, RequestReveal, RevealAck, RevealInvalid,
    RoomJoined, RoundResults, ServerError, ServerEvent,
};
use crate::rest::{PlayerRecord, RoomAssignment};
use crate::transient::{Emote, Notification, NotificationLevel, TransientKind, TransientList};
use crate::transport::DisconnectReason;

/// Rating given to players the server has not rated yet.
pub const DEFAULT_RATING: u32 = 1000;
/// Players needed before a room starts dealing.
pub const MIN_PLAYERS: u32 = 2;

// ───────────────────────────────────────────────────────────────────
// Mirrored entities
// ───────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq)]
pub struct PlayerIdentity {
    pub id: u64,
    pub username: String,
    pub balance: f64,
    pub rating: u32,
}

impl From<PlayerRecord> for PlayerIdentity {
    fn from(record: PlayerRecord) -> Self {
        Self {
            id: record.id,
            username: record.username,
            balance: record.balance,
            rating: record.rating,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct RoomSnapshot {
    /// Full room key when known from the join response
    pub key: Option<String>,
    pub tier: String,
    pub stake: f64,
    pub entry_fee: f64,
    pub min_players: u32,
    pub max_players: u32,
    pub player_count: u32,
    pub spectator_count: u32,
    pub phase: String,
}

/// Server-side stage of the round.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RoundStage {
    Selecting,
    Revealing,
    Complete,
}

#[derive(Debug, Clone, PartialEq)]
pub struct RoundSnapshot {
    pub round_key: String,
    pub adjective: String,
    pub nouns: Vec<String>,
    pub selection_deadline: DateTime<Utc>,
    /// Seconds
    pub selection_duration: u32,
    pub players_locked_in: u32,
    pub total_players: u32,
    pub reveal_deadline: Option<DateTime<Utc>>,
    pub stage: RoundStage,
}

impl RoundSnapshot {
    /// Countdown to the selection deadline, floored at zero.
    pub fn time_left(&self, now: DateTime<Utc>) -> Duration {
        (self.selection_deadline - now)
            .to_std()
            .unwrap_or(Duration::ZERO)
    }
}

/// Where the session is in the round cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RoundPhase {
    NoRound,
    Selecting,
    Revealing,
    Results,
}

/// Local half of the commit-reveal handshake for the current round.
#[derive(Clone, Default, PartialEq, Eq)]
pub struct CommitState {
    pub has_committed: bool,
    pub has_revealed: bool,
    pub choice: Option<usize>,
    pub nonce: Option<String>,
    pub commit_hash: Option<String>,
}

impl fmt::Debug for CommitState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CommitState")
            .field("has_committed", &self.has_committed)
            .field("has_revealed", &self.has_revealed)
            .field("commit_hash", &self.commit_hash)
            .finish_non_exhaustive()
    }
}

/// Outcome of a finished round, stored as received.
#[derive(Debug, Clone, PartialEq)]
pub struct RoundResult {
    pub round_key: String,
    pub adjective: String,
    pub nouns: Vec<String>,
    pub selection_counts: Vec<u32>,
    pub your_choice: Option<usize>,
    pub pot: f64,
    pub payout: f64,
    pub new_balance: f64,
}

impl RoundResult {
    pub fn total_selections(&self) -> u32 {
        self.selection_counts.iter().sum()
    }

    /// Share of players (0–100) who picked the noun at `index`.
    pub fn percentage(&self, index: usize) -> f64 {
        let total = self.total_selections();
        match self.selection_counts.get(index) {
            Some(&count) if total > 0 => f64::from(count) * 100.0 / f64::from(total),
            _ => 0.0,
        }
    }

    pub fn percentages(&self) -> Vec<f64> {
        (0..self.selection_counts.len())
            .map(|index| self.percentage(index))
            .collect()
    }

    pub fn won(&self) -> bool {
        self.payout > 0.0
    }
}

/// Spectator queue position, as last reported by the server.
///
/// Positions count from 1; the server reports 0 once the player has left
/// the queue.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct QueueState {
    pub is_in_queue: bool,
    pub position: u32,
    pub total_waiting: u32,
    pub estimated_wait: Duration,
}

/// What to do when a round's results are in.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum EndOfRoundAction {
    #[default]
    Continue,
    Leave,
}

/// Player preferences. Kept in memory only.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GameSettings {
    pub sound_effects: bool,
    pub haptics: bool,
    pub auto_advance: bool,
    pub show_timers: bool,
    pub data_saver: bool,
    pub allow_spectators: bool,
}

impl Default for GameSettings {
    fn default() -> Self {
        Self {
            sound_effects: true,
            haptics: true,
            auto_advance: false,
            show_timers: true,
            data_saver: false,
            allow_spectators: true,
        }
    }
}

/// Read-only round view pushed to spectators.
#[derive(Debug, Clone, PartialEq)]
pub struct SpectatorView {
    pub adjective: String,
    pub nouns: Vec<String>,
    pub selection_deadline: DateTime<Utc>,
    pub commits_count: u32,
}

/// Work the caller must carry out after a transition.
#[derive(Debug, Clone, PartialEq)]
pub enum Effect {
    /// Emit on the transport
    Send(ClientMessage),
    /// Remove a transient item once its lifetime is up
    Expire(TransientKind, Uuid),
    /// Run the leave-room action
    LeaveRoom,
}

// ───────────────────────────────────────────────────────────────────
// Join bookkeeping
// ───────────────────────────────────────────────────────────────────

/// One-time room token from the lobby. Never printed.
#[derive(Clone, PartialEq, Eq)]
struct RoomToken(String);

impl fmt::Debug for RoomToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("RoomToken(..)")
    }
}

#[derive(Debug, Clone, PartialEq)]
enum JoinStatus {
    Idle,
    /// REST request in flight
    Requesting { ticket: u64, as_spectator: bool },
    /// Token received, waiting for `room_joined`
    AwaitingRoom {
        token: RoomToken,
        room_key: String,
        as_spectator: bool,
        sent: bool,
    },
}

/// Identifies one join request so a late REST response can be discarded.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct JoinRequest {
    pub ticket: u64,
    pub player_id: u64,
}

/// Inputs captured by `begin_commit` and re-checked by `record_commit`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct CommitTicket {
    pub player_id: u64,
    pub round_key: String,
    pub choice: usize,
}

/// What the lobby needs to hear about to leave or skip.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct RoomRequest {
    pub room_key: Option<String>,
    pub player_id: u64,
}

// ───────────────────────────────────────────────────────────────────
// Session state
// ───────────────────────────────────────────────────────────────────

/// The session state. Readers get clones of it; only the owning
/// [`GameClient`](crate::GameClient) mutates it.
#[derive(Debug, Clone)]
pub struct SessionState {
    player: Option<PlayerIdentity>,
    connected: bool,
    /// `join_player` confirmed on the current connection
    handshake_done: bool,
    /// Last connection ended unexpectedly
    connection_dropped: bool,
    connect_error_reported: bool,
    room: Option<RoomSnapshot>,
    is_spectator: bool,
    pot: f64,
    round: Option<RoundSnapshot>,
    commit: CommitState,
    result: Option<RoundResult>,
    last_choice: Option<usize>,
    spectator_view: Option<SpectatorView>,
    queue: QueueState,
    notifications: TransientList<Notification>,
    emotes: TransientList<Emote>,
    settings: GameSettings,
    end_of_round: EndOfRoundAction,
    leave_requested: bool,
    join: JoinStatus,
    join_ticket: u64,
    is_loading: bool,
    is_registering: bool,
    error: Option<String>,
    queue_seconds_per_position: u64,
}

impl Default for SessionState {
    fn default() -> Self {
        Self::new(&ClientConfig::default())
    }
}

impl SessionState {
    pub fn new(config: &ClientConfig) -> Self {
        Self {
            player: None,
            connected: false,
            handshake_done: false,
            connection_dropped: false,
            connect_error_reported: false,
            room: None,
            is_spectator: false,
            pot: 0.0,
            round: None,
            commit: CommitState::default(),
            result: None,
            last_choice: None,
            spectator_view: None,
            queue: QueueState::default(),
            notifications: TransientList::new(config.transient.capacity),
            emotes: TransientList::new(config.transient.capacity),
            settings: GameSettings::default(),
            end_of_round: EndOfRoundAction::default(),
            leave_requested: false,
            join: JoinStatus::Idle,
            join_ticket: 0,
            is_loading: false,
            is_registering: false,
            error: None,
            queue_seconds_per_position: config.queue_seconds_per_position,
        }
    }

    // ── Queries ──────────────────────────────────────────────────────

    /// The registered player, if any.
    pub fn player(&self) -> Option<&PlayerIdentity> {
        self.player.as_ref()
    }

    /// Whether a player is registered.
    pub fn is_authenticated(&self) -> bool {
        self.player.is_some()
    }

    /// Mirrored coin balance; zero when logged out.
    pub fn balance(&self) -> f64 {
        self.player.as_ref().map_or(0.0, |p| p.balance)
    }

    /// Whether the transport last reported an open connection.
    pub fn is_connected(&self) -> bool {
        self.connected
    }

    /// Current room.
    pub fn room(&self) -> Option<&RoomSnapshot> {
        self.room.as_ref()
    }

    /// Whether the server has confirmed room membership.
    pub fn is_in_room(&self) -> bool {
        self.room.is_some()
    }

    /// Whether the current room was joined as a spectator.
    pub fn is_spectator(&self) -> bool {
        self.is_spectator
    }

    /// A join request or token is outstanding.
    pub fn is_joining(&self) -> bool {
        !matches!(self.join, JoinStatus::Idle)
    }

    /// Pot of the current round.
    pub fn pot(&self) -> f64 {
        self.pot
    }

    /// Current round, including a finished one still on display.
    pub fn round(&self) -> Option<&RoundSnapshot> {
        self.round.as_ref()
    }

    /// Round phase derived from the current round's stage.
    pub fn phase(&self) -> RoundPhase {
        match self.round.as_ref().map(|round| round.stage) {
            None => RoundPhase::NoRound,
            Some(RoundStage::Selecting) => RoundPhase::Selecting,
            Some(RoundStage::Revealing) => RoundPhase::Revealing,
            Some(RoundStage::Complete) => RoundPhase::Results,
        }
    }

    /// This round's commitment.
    pub fn commit(&self) -> &CommitState {
        &self.commit
    }

    /// Results of the current round, once in.
    pub fn result(&self) -> Option<&RoundResult> {
        self.result.as_ref()
    }

    /// Noun index picked this round, kept for display after reveal.
    pub fn last_choice(&self) -> Option<usize> {
        self.last_choice
    }

    /// Latest `game_state` snapshot. Spectators only.
    pub fn spectator_view(&self) -> Option<&SpectatorView> {
        self.spectator_view.as_ref()
    }

    /// Spectator queue state.
    pub fn queue(&self) -> &QueueState {
        &self.queue
    }

    /// Live notifications, oldest first.
    pub fn notifications(&self) -> &TransientList<Notification> {
        &self.notifications
    }

    /// Recent emotes, oldest first.
    pub fn emotes(&self) -> &TransientList<Emote> {
        &self.emotes
    }

    /// Local preferences.
    pub fn settings(&self) -> &GameSettings {
        &self.settings
    }

    /// What happens when the next round is announced.
    pub fn end_of_round_action(&self) -> EndOfRoundAction {
        self.end_of_round
    }

    /// A REST action is in flight.
    pub fn is_loading(&self) -> bool {
        self.is_loading
    }

    /// Registration is in flight.
    pub fn is_registering(&self) -> bool {
        self.is_registering
    }

    /// Last error shown to the player.
    pub fn error(&self) -> Option<&str> {
        self.error.as_deref()
    }

    /// Selection countdown; zero when no round is open.
    pub fn time_left(&self, now: DateTime<Utc>) -> Duration {
        self.round
            .as_ref()
            .map_or(Duration::ZERO, |round| round.time_left(now))
    }

    /// Whether a commit would be accepted right now.
    pub fn can_commit(&self) -> bool {
        self.player.is_some()
            && !self.is_spectator
            && self.phase() == RoundPhase::Selecting
            && !self.commit.has_committed
    }

    /// Whether a manual reveal would go out right now.
    pub fn can_reveal(&self) -> bool {
        self.phase() == RoundPhase::Revealing
            && self.commit.has_committed
            && !self.commit.has_revealed
    }

    // ── Reducer ──────────────────────────────────────────────────────

    /// Apply one server event.
    pub fn apply(&mut self, event: ServerEvent) -> Vec<Effect> {
        let mut effects = Vec::new();
        match event {
            ServerEvent::Connect(_) => self.on_connect(&mut effects),
            ServerEvent::Disconnect(info) => self.on_disconnect(info, &mut effects),
            ServerEvent::ConnectError(info) => self.on_connect_error(info, &mut effects),
            ServerEvent::PlayerJoinedGame(info) => self.on_player_joined_game(info, &mut effects),
            ServerEvent::RoomJoined(room) => self.on_room_joined(room, &mut effects),
            ServerEvent::PlayerJoinedRoom(info) => self.on_player_joined_room(info, &mut effects),
            ServerEvent::PlayerLeftRoom(info) => self.on_player_left_room(info, &mut effects),
            ServerEvent::RoomLeft(_) => {
                self.clear_membership();
                self.notify("Left the room", NotificationLevel::Info, &mut effects);
            }
            ServerEvent::RemovedFromRoom(info) => self.on_removed_from_room(info, &mut effects),
            ServerEvent::Deal(deal) => self.on_deal(deal),
            ServerEvent::CommitsUpdate(update) => self.on_commits_update(update),
            ServerEvent::CommitAck(ack) => self.on_commit_ack(ack, &mut effects),
            ServerEvent::RequestReveal(request) => self.on_request_reveal(request, &mut effects),
            ServerEvent::RevealAck(ack) => self.on_reveal_ack(ack),
            ServerEvent::RevealInvalid(info) => self.on_reveal_invalid(info, &mut effects),
            ServerEvent::RoundResults(results) => self.on_round_results(results, &mut effects),
            ServerEvent::NextRoundInfo(info) => self.on_next_round_info(info, &mut effects),
            ServerEvent::PlayerEmote(emote) => self.on_player_emote(emote, &mut effects),
            ServerEvent::QueueUpdate(update) => self.on_queue_update(update),
            ServerEvent::GameState(snapshot) => self.on_game_state(snapshot),
            ServerEvent::Error(error) | ServerEvent::GameError(error) => {
                self.on_server_error(error, &mut effects)
            }
        }
        effects
    }

    fn on_connect(&mut self, effects: &mut Vec<Effect>) {
        self.connected = true;
        self.handshake_done = false;
        self.connect_error_reported = false;
        if std::mem::take(&mut self.connection_dropped) {
            self.notify("Reconnected", NotificationLevel::Success, effects);
        }
        if let Some(player) = &self.player {
            effects.push(Effect::Send(ClientMessage::JoinPlayer {
                player_id: player.id,
            }));
        }
    }

    fn on_disconnect(&mut self, info: DisconnectInfo, effects: &mut Vec<Effect>) {
        let was_connected = std::mem::replace(&mut self.connected, false);
        self.handshake_done = false;
        if !was_connected {
            return;
        }

        // The server forgets room membership with the connection
        self.clear_membership();
        // A token handed out before the drop is re-sent after the handshake
        if let JoinStatus::AwaitingRoom { sent, .. } = &mut self.join {
            *sent = false;
        }
        if DisconnectReason::parse(info.reason.as_deref()).is_intentional() {
            return;
        }

        self.connection_dropped = true;
        self.notify(
            "Connection lost. Attempting to reconnect...",
            NotificationLevel::Warning,
            effects,
        );
    }

    fn on_connect_error(&mut self, info: ConnectErrorInfo, effects: &mut Vec<Effect>) {
        self.connected = false;
        log::debug!(
            "Connect error: {}",
            info.message.as_deref().unwrap_or("unknown")
        );
        if !std::mem::replace(&mut self.connect_error_reported, true) {
            self.notify(
                "Unable to reach the game server",
                NotificationLevel::Error,
                effects,
            );
        }
    }

    fn on_player_joined_game(&mut self, info: PlayerJoinedGame, effects: &mut Vec<Effect>) {
        match self.player.as_mut() {
            Some(player) => {
                player.id = info.player_id;
                player.username = info.username;
                player.balance = info.balance;
            }
            None => {
                self.player = Some(PlayerIdentity {
                    id: info.player_id,
                    username: info.username,
                    balance: info.balance,
                    rating: DEFAULT_RATING,
                })
            }
        }
        self.handshake_done = true;

        if let JoinStatus::AwaitingRoom {
            token,
            as_spectator,
            sent,
            ..
        } = &mut self.join
        {
            if !*sent {
                *sent = true;
                effects.push(Effect::Send(ClientMessage::JoinRoom {
                    room_token: token.0.clone(),
                    as_spectator: *as_spectator,
                }));
            }
        }
    }

    fn on_room_joined(&mut self, room: RoomJoined, effects: &mut Vec<Effect>) {
        let (room_key, as_spectator) = match std::mem::replace(&mut self.join, JoinStatus::Idle) {
            JoinStatus::AwaitingRoom {
                room_key,
                as_spectator,
                ..
            } => (Some(room_key), as_spectator),
            JoinStatus::Requesting { as_spectator, .. } => (None, as_spectator),
            JoinStatus::Idle => (None, self.is_spectator),
        };

        self.is_loading = false;
        self.is_spectator = as_spectator;
        self.leave_requested = false;
        self.pot = room.pot;
        self.room = Some(RoomSnapshot {
            key: room_key.or(room.room_key),
            tier: room.tier,
            stake: room.stake,
            entry_fee: room.entry_fee,
            min_players: MIN_PLAYERS,
            max_players: room.capacity,
            player_count: room.player_count,
            spectator_count: room.spectators,
            phase: room.state,
        });
        self.notify("Joined room successfully", NotificationLevel::Success, effects);
    }

    fn on_player_joined_room(&mut self, info: PlayerJoinedRoom, effects: &mut Vec<Effect>) {
        if let Some(room) = self.room.as_mut() {
            room.player_count = info.player_count;
        }
        let message = if info.is_spectator {
            format!("{} is spectating", info.username)
        } else {
            format!("{} joined the game", info.username)
        };
        self.notify(message, NotificationLevel::Info, effects);
    }

    fn on_player_left_room(&mut self, info: PlayerLeftRoom, effects: &mut Vec<Effect>) {
        if let Some(room) = self.room.as_mut() {
            room.player_count = info.player_count;
        }
        self.notify(
            format!("{} left the room", info.username),
            NotificationLevel::Info,
            effects,
        );
    }

    fn on_removed_from_room(&mut self, info: RemovedFromRoom, effects: &mut Vec<Effect>) {
        self.clear_membership();
        let message = info
            .message
            .unwrap_or_else(|| "You were removed from the room".to_string());
        self.notify(message, NotificationLevel::Warning, effects);
    }

    fn on_deal(&mut self, deal: Deal) {
        log::debug!("Round {} dealt with {} nouns", deal.round_key, deal.nouns.len());
        let total_players = self.room.as_ref().map_or(0, |room| room.player_count);
        self.round = Some(RoundSnapshot {
            round_key: deal.round_key,
            adjective: deal.adjective,
            nouns: deal.nouns,
            selection_deadline: deal.selection_deadline,
            selection_duration: deal.selection_duration,
            players_locked_in: 0,
            total_players,
            reveal_deadline: None,
            stage: RoundStage::Selecting,
        });
        self.commit = CommitState::default();
        self.result = None;
        self.last_choice = None;
        self.leave_requested = false;
        self.pot = deal.pot;
        if let Some(room) = self.room.as_mut() {
            room.phase = "playing".to_string();
        }
    }

    fn on_commits_update(&mut self, update: CommitsUpdate) {
        match self.round.as_mut() {
            Some(round) if round.stage != RoundStage::Complete => {
                round.players_locked_in = update.commits_count;
                round.total_players = update.total_players;
            }
            _ => log::debug!("Ignoring commits_update outside a round"),
        }
    }

    fn on_commit_ack(&mut self, ack: CommitAck, effects: &mut Vec<Effect>) {
        let current = self.round.as_ref().is_some_and(|round| {
            ack.round_key
                .as_deref()
                .map_or(true, |key| key == round.round_key)
        });
        if current && self.commit.has_committed {
            self.notify("Choice locked in", NotificationLevel::Success, effects);
        }
    }

    fn on_request_reveal(&mut self, request: RequestReveal, effects: &mut Vec<Effect>) {
        let Some(round) = self.round.as_mut() else {
            log::debug!("Ignoring request_reveal with no round");
            return;
        };
        if round.round_key != request.round_key {
            log::warn!(
                "Ignoring request_reveal for round {} during round {}",
                request.round_key,
                round.round_key
            );
            return;
        }
        match round.stage {
            RoundStage::Complete => return,
            RoundStage::Selecting => {
                round.stage = RoundStage::Revealing;
                round.reveal_deadline = request.reveal_deadline;
            }
            RoundStage::Revealing => {}
        }
        if let Some(reveal) = self.take_reveal() {
            effects.push(Effect::Send(reveal));
        }
    }

    fn on_reveal_ack(&mut self, ack: RevealAck) {
        log::debug!("Reveal acknowledged for {:?}", ack.round_key);
        if self.commit.has_committed {
            self.commit.has_revealed = true;
        }
    }

    fn on_reveal_invalid(&mut self, info: RevealInvalid, effects: &mut Vec<Effect>) {
        let applies = self.round.as_ref().is_some_and(|round| {
            round.stage == RoundStage::Revealing
                && info
                    .round_key
                    .as_deref()
                    .map_or(true, |key| key == round.round_key)
        });
        if !applies {
            log::debug!("Ignoring reveal_invalid outside the reveal window");
            return;
        }
        self.commit.has_revealed = true;
        if let Some(message) = &info.message {
            log::warn!("Reveal rejected: {message}");
        }
        self.notify(
            "Invalid reveal - random choice assigned",
            NotificationLevel::Warning,
            effects,
        );
    }

    fn on_round_results(&mut self, results: RoundResults, effects: &mut Vec<Effect>) {
        if let Some(player) = self.player.as_mut() {
            player.balance = results.new_balance;
        }

        let in_progress = self.round.as_ref().is_some_and(|round| {
            round.round_key == results.round_key && round.stage != RoundStage::Complete
        });
        if !in_progress {
            log::debug!("Ignoring results for round {}", results.round_key);
            return;
        }
        if let Some(round) = self.round.as_mut() {
            round.stage = RoundStage::Complete;
        }

        self.pot = results.pot;
        if results.payout > 0.0 {
            self.notify(
                format!("You won {:.2} coins!", results.payout),
                NotificationLevel::Success,
                effects,
            );
        } else if results.your_choice.is_some() {
            self.notify("Better luck next round", NotificationLevel::Info, effects);
        }
        self.result = Some(RoundResult {
            round_key: results.round_key,
            adjective: results.adjective,
            nouns: results.nouns,
            selection_counts: results.selection_counts,
            your_choice: results.your_choice,
            pot: results.pot,
            payout: results.payout,
            new_balance: results.new_balance,
        });
    }

    fn on_next_round_info(&mut self, info: NextRoundInfo, effects: &mut Vec<Effect>) {
        if let Some(room) = self.room.as_mut() {
            room.player_count = info.player_count;
            room.spectator_count = info.spectators;
        }
        self.pot = info.pot;
        if self.phase() != RoundPhase::Results {
            return;
        }
        match self.end_of_round {
            EndOfRoundAction::Leave => {
                if !std::mem::replace(&mut self.leave_requested, true) {
                    effects.push(Effect::LeaveRoom);
                }
            }
            EndOfRoundAction::Continue => {
                self.round = None;
                self.result = None;
                self.commit = CommitState::default();
            }
        }
    }

    fn on_player_emote(&mut self, emote: PlayerEmote, effects: &mut Vec<Effect>) {
        let id = self.emotes.append(Emote::new(emote.username, emote.emote));
        effects.push(Effect::Expire(TransientKind::Emote, id));
    }

    fn on_queue_update(&mut self, update: QueueUpdate) {
        self.queue = QueueState {
            is_in_queue: update.position > 0,
            position: update.position,
            total_waiting: update.total_waiting,
            estimated_wait: Duration::from_secs(
                u64::from(update.position) * self.queue_seconds_per_position,
            ),
        };
    }

    fn on_game_state(&mut self, snapshot: GameStateSnapshot) {
        if !self.is_spectator {
            log::debug!("Ignoring game_state while playing");
            return;
        }
        self.spectator_view = Some(SpectatorView {
            adjective: snapshot.adjective,
            nouns: snapshot.nouns,
            selection_deadline: snapshot.selection_deadline,
            commits_count: snapshot.commits_count,
        });
    }

    fn on_server_error(&mut self, error: ServerError, effects: &mut Vec<Effect>) {
        log::warn!("Server error: {} ({:?})", error.message, error.code);
        self.is_loading = false;
        match error.code.as_deref() {
            Some("INVALID_TOKEN" | "AUTH_FAILED") => {
                self.player = None;
                self.handshake_done = false;
                self.join = JoinStatus::Idle;
                self.clear_membership();
                self.error = Some(error.message);
                self.notify(
                    "Authentication failed. Please log in again.",
                    NotificationLevel::Error,
                    effects,
                );
                return;
            }
            Some("NOT_IN_ROOM" | "ROOM_NOT_FOUND") => self.clear_membership(),
            _ => {}
        }
        self.notify(error.message.clone(), NotificationLevel::Error, effects);
        self.error = Some(error.message);
    }

    // ── Local transitions ────────────────────────────────────────────

    pub(crate) fn begin_registration(&mut self) {
        self.is_registering = true;
        self.error = None;
    }

    pub(crate) fn registration_succeeded(&mut self, record: PlayerRecord) -> Vec<Effect> {
        let mut effects = Vec::new();
        let identity = PlayerIdentity::from(record);
        self.is_registering = false;
        self.handshake_done = false;
        self.notify(
            format!("Welcome back, {}!", identity.username),
            NotificationLevel::Success,
            &mut effects,
        );
        if self.connected {
            effects.push(Effect::Send(ClientMessage::JoinPlayer {
                player_id: identity.id,
            }));
        }
        self.player = Some(identity);
        effects
    }

    pub(crate) fn registration_failed(&mut self, message: &str) -> Vec<Effect> {
        let mut effects = Vec::new();
        self.is_registering = false;
        self.error = Some(message.to_string());
        self.notify(
            format!("Registration failed: {message}"),
            NotificationLevel::Error,
            &mut effects,
        );
        effects
    }

    /// Start a join request. Any earlier request becomes stale.
    pub(crate) fn begin_join(&mut self, as_spectator: bool) -> Result<JoinRequest> {
        let player_id = self.player_id()?;
        if self.room.is_some() {
            return Err(SessionError::AlreadyInRoom);
        }
        self.join_ticket += 1;
        let ticket = self.join_ticket;
        self.join = JoinStatus::Requesting {
            ticket,
            as_spectator,
        };
        self.is_loading = true;
        self.error = None;
        Ok(JoinRequest { ticket, player_id })
    }

    /// Apply a room assignment. Returns `None` when the request was
    /// superseded (logout, leave or a newer join) while it was in flight.
    pub(crate) fn complete_join(
        &mut self,
        ticket: u64,
        assignment: RoomAssignment,
    ) -> Option<Vec<Effect>> {
        let as_spectator = match self.join {
            JoinStatus::Requesting {
                ticket: pending,
                as_spectator,
            } if pending == ticket => as_spectator,
            _ => return None,
        };

        let mut effects = Vec::new();
        self.is_loading = false;
        if let (Some(balance), Some(player)) = (assignment.new_balance, self.player.as_mut()) {
            player.balance = balance;
        }
        let message = if as_spectator {
            "Joining room as spectator...".to_string()
        } else {
            format!("Joining {} room...", assignment.tier)
        };
        self.notify(message, NotificationLevel::Info, &mut effects);

        let send_now = self.connected && self.handshake_done;
        if send_now {
            effects.push(Effect::Send(ClientMessage::JoinRoom {
                room_token: assignment.room_token.clone(),
                as_spectator,
            }));
        }
        self.join = JoinStatus::AwaitingRoom {
            token: RoomToken(assignment.room_token),
            room_key: assignment.room_key,
            as_spectator,
            sent: send_now,
        };
        Some(effects)
    }

    /// Record a failed join request. Stale failures are dropped.
    pub(crate) fn join_failed(&mut self, ticket: u64, message: &str) -> Vec<Effect> {
        let current = matches!(
            self.join,
            JoinStatus::Requesting { ticket: pending, .. } if pending == ticket
        );
        if !current {
            return Vec::new();
        }
        self.join = JoinStatus::Idle;
        self.action_failed("Failed to join room", message)
    }

    pub(crate) fn begin_commit(&self, choice: usize) -> Result<CommitTicket> {
        let player_id = self.player_id()?;
        if self.is_spectator {
            return Err(SessionError::InvalidState(
                "spectators cannot commit".to_string(),
            ));
        }
        let round = self.active_round()?;
        if round.stage != RoundStage::Selecting {
            return Err(SessionError::InvalidState(
                "selection window is closed".to_string(),
            ));
        }
        if self.commit.has_committed {
            return Err(SessionError::AlreadyCommitted);
        }
        if choice >= round.nouns.len() {
            return Err(SessionError::InvalidChoice {
                index: choice,
                available: round.nouns.len(),
            });
        }
        Ok(CommitTicket {
            player_id,
            round_key: round.round_key.clone(),
            choice,
        })
    }

    /// Store a sealed choice, then hand back the `commit` emission.
    ///
    /// Re-checks everything `begin_commit` checked: the round may have moved
    /// on while the commitment was being derived.
    pub(crate) fn record_commit(
        &mut self,
        ticket: &CommitTicket,
        sealed: SealedChoice,
    ) -> Result<Vec<Effect>> {
        if self.player_id()? != ticket.player_id {
            return Err(SessionError::InvalidState("identity changed".to_string()));
        }
        let round = self.active_round()?;
        if round.round_key != ticket.round_key || round.stage != RoundStage::Selecting {
            return Err(SessionError::InvalidState(format!(
                "round {} is no longer open",
                ticket.round_key
            )));
        }
        if self.commit.has_committed {
            return Err(SessionError::AlreadyCommitted);
        }
        let noun = round
            .nouns
            .get(ticket.choice)
            .cloned()
            .ok_or(SessionError::InvalidChoice {
                index: ticket.choice,
                available: round.nouns.len(),
            })?;

        let hash = sealed.hash.clone();
        self.commit = CommitState {
            has_committed: true,
            has_revealed: false,
            choice: Some(ticket.choice),
            nonce: Some(sealed.nonce),
            commit_hash: Some(sealed.hash),
        };
        self.last_choice = Some(ticket.choice);
        self.error = None;

        let mut effects = vec![Effect::Send(ClientMessage::Commit { hash })];
        self.notify(
            format!("Choice submitted: {noun}"),
            NotificationLevel::Success,
            &mut effects,
        );
        Ok(effects)
    }

    /// Manual reveal. Empty when the reveal already went out.
    pub(crate) fn reveal_now(&mut self) -> Result<Vec<Effect>> {
        let round = self.active_round()?;
        if !self.commit.has_committed {
            return Err(SessionError::NothingToReveal);
        }
        if round.stage != RoundStage::Revealing {
            return Err(SessionError::InvalidState(
                "reveal window is not open".to_string(),
            ));
        }
        Ok(self.take_reveal().map(Effect::Send).into_iter().collect())
    }

    /// Plan a leave. `Ok(None)` means a pending join was cancelled and there
    /// is no room to tell the lobby about.
    pub(crate) fn begin_leave(&mut self) -> Result<Option<RoomRequest>> {
        let player_id = self.player_id()?;
        let cancelled = !matches!(self.join, JoinStatus::Idle);
        if cancelled {
            self.join = JoinStatus::Idle;
            self.is_loading = false;
        }
        match &self.room {
            Some(room) => Ok(Some(RoomRequest {
                room_key: room.key.clone(),
                player_id,
            })),
            None if cancelled => Ok(None),
            None => Err(SessionError::NotInRoom),
        }
    }

    pub(crate) fn leave_confirmed(&mut self, scheduled: bool) -> Vec<Effect> {
        let mut effects = vec![Effect::Send(ClientMessage::LeaveRoom {})];
        let message = if scheduled {
            "You'll leave at the end of this round"
        } else {
            "Leaving room..."
        };
        self.error = None;
        self.notify(message, NotificationLevel::Info, &mut effects);
        effects
    }

    pub(crate) fn begin_skip(&self) -> Result<RoomRequest> {
        let player_id = self.player_id()?;
        let room = self.room.as_ref().ok_or(SessionError::NotInRoom)?;
        Ok(RoomRequest {
            room_key: room.key.clone(),
            player_id,
        })
    }

    pub(crate) fn skip_confirmed(&mut self) -> Vec<Effect> {
        let mut effects = Vec::new();
        self.error = None;
        self.notify(
            "You'll sit out the next round",
            NotificationLevel::Info,
            &mut effects,
        );
        effects
    }

    /// Record a failed REST action in `error` and as a notification.
    pub(crate) fn action_failed(&mut self, action: &str, message: &str) -> Vec<Effect> {
        let mut effects = Vec::new();
        self.is_loading = false;
        self.error = Some(message.to_string());
        self.notify(
            format!("{action}: {message}"),
            NotificationLevel::Error,
            &mut effects,
        );
        effects
    }

    pub(crate) fn request_emote(&self, emote: &str) -> Result<Vec<Effect>> {
        if self.room.is_none() {
            return Err(SessionError::NotInRoom);
        }
        Ok(vec![Effect::Send(ClientMessage::SendEmote {
            emote: emote.to_string(),
        })])
    }

    /// Ask to join or leave the spectator queue. Position comes back via
    /// `queue_update`.
    pub(crate) fn request_queue(&self, want_to_join: bool) -> Result<Vec<Effect>> {
        if self.room.is_none() {
            return Err(SessionError::NotInRoom);
        }
        if !self.is_spectator {
            return Err(SessionError::InvalidState(
                "only spectators can queue".to_string(),
            ));
        }
        Ok(vec![Effect::Send(ClientMessage::SpectatorQueue {
            want_to_join,
        })])
    }

    /// Forget the player and everything tied to them. Settings survive.
    pub(crate) fn logout(&mut self) -> Vec<Effect> {
        let mut effects = Vec::new();
        if self.room.is_some() && self.connected {
            effects.push(Effect::Send(ClientMessage::LeaveRoom {}));
        }
        let mut reset = SessionState {
            notifications: TransientList::new(self.notifications.capacity()),
            emotes: TransientList::new(self.emotes.capacity()),
            queue_seconds_per_position: self.queue_seconds_per_position,
            settings: self.settings.clone(),
            join_ticket: self.join_ticket,
            ..SessionState::default()
        };
        reset.connected = self.connected;
        *self = reset;
        effects
    }

    pub(crate) fn push_notification(
        &mut self,
        message: impl Into<String>,
        level: NotificationLevel,
    ) -> Vec<Effect> {
        let mut effects = Vec::new();
        self.notify(message, level, &mut effects);
        effects
    }

    pub(crate) fn remove_transient(&mut self, kind: TransientKind, id: Uuid) -> bool {
        match kind {
            TransientKind::Notification => self.notifications.remove(id).is_some(),
            TransientKind::Emote => self.emotes.remove(id).is_some(),
        }
    }

    pub(crate) fn clear_notifications(&mut self) {
        self.notifications.clear();
    }

    pub(crate) fn clear_error(&mut self) {
        self.error = None;
    }

    pub(crate) fn set_end_of_round_action(&mut self, action: EndOfRoundAction) {
        self.end_of_round = action;
    }

    pub(crate) fn settings_mut(&mut self) -> &mut GameSettings {
        &mut self.settings
    }

    // ── Helpers ──────────────────────────────────────────────────────

    fn player_id(&self) -> Result<u64> {
        self.player
            .as_ref()
            .map(|player| player.id)
            .ok_or(SessionError::NotAuthenticated)
    }

    /// Build the reveal for the current commitment, at most once per round.
    fn take_reveal(&mut self) -> Option<ClientMessage> {
        if !self.commit.has_committed || self.commit.has_revealed {
            return None;
        }
        let round_key = self.round.as_ref()?.round_key.clone();
        let choice = self.commit.choice?;
        let nonce = self.commit.nonce.clone()?;
        self.commit.has_revealed = true;
        Some(ClientMessage::Reveal {
            choice,
            nonce,
            round_key,
        })
    }

    fn active_round(&self) -> Result<&RoundSnapshot> {
        self.round
            .as_ref()
            .ok_or_else(|| SessionError::InvalidState("no active round".to_string()))
    }

    fn clear_membership(&mut self) {
        self.room = None;
        self.is_spectator = false;
        self.round = None;
        self.commit = CommitState::default();
        self.result = None;
        self.last_choice = None;
        self.spectator_view = None;
        self.queue = QueueState::default();
        self.pot = 0.0;
        self.leave_requested = false;
    }

    fn notify(
        &mut self,
        message: impl Into<String>,
        level: NotificationLevel,
        effects: &mut Vec<Effect>,
    ) {
        let id = self.notifications.append(Notification::new(message, level));
        effects.push(Effect::Expire(TransientKind::Notification, id));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::commit::derive_commitment;
    use chrono::TimeZone;

    const PLAYER_ID: u64 = 42;

    fn sent(effects: &[Effect]) -> Vec<&ClientMessage> {
        effects
            .iter()
            .filter_map(|effect| match effect {
                Effect::Send(message) => Some(message),
                _ => None,
            })
            .collect()
    }

    fn deadline() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 1, 1, 12, 0, 30).unwrap()
    }

    fn deal(round_key: &str) -> ServerEvent {
        ServerEvent::Deal(Deal {
            round_key: round_key.to_string(),
            adjective: "Mysterious".to_string(),
            nouns: vec!["Castle".to_string(), "Ocean".to_string()],
            selection_deadline: deadline(),
            selection_duration: 30,
            pot: 40.0,
        })
    }

    fn request_reveal(round_key: &str) -> ServerEvent {
        ServerEvent::RequestReveal(RequestReveal {
            round_key: round_key.to_string(),
            reveal_deadline: None,
        })
    }

    fn results(round_key: &str) -> RoundResults {
        RoundResults {
            round_key: round_key.to_string(),
            adjective: "Mysterious".to_string(),
            nouns: vec!["Castle".to_string(), "Ocean".to_string()],
            selection_counts: vec![3, 5],
            your_choice: Some(0),
            pot: 40.0,
            payout: 12.5,
            new_balance: 112.5,
        }
    }

    fn room_joined() -> ServerEvent {
        ServerEvent::RoomJoined(RoomJoined {
            room_key: Some("ab12c".to_string()),
            tier: "casual".to_string(),
            stake: 10.0,
            entry_fee: 1.0,
            player_count: 4,
            spectators: 0,
            state: "waiting".to_string(),
            pot: 0.0,
            capacity: 12,
        })
    }

    fn record() -> PlayerRecord {
        PlayerRecord {
            id: PLAYER_ID,
            username: "ada".to_string(),
            balance: 100.0,
            rating: 1200,
            achievements: Vec::new(),
        }
    }

    fn assignment() -> RoomAssignment {
        RoomAssignment {
            failure_code: 0,
            room_key: "room-full-key".to_string(),
            room_token: "one-time-token".to_string(),
            tier: "casual".to_string(),
            stake: 10.0,
            player_count: 3,
            entry_fee: 1.0,
            new_balance: Some(99.0),
        }
    }

    /// Connected, registered, handshake done, seated in a room.
    fn seated() -> SessionState {
        let mut state = SessionState::default();
        state.apply(ServerEvent::Connect(Default::default()));
        state.registration_succeeded(record());
        state.apply(ServerEvent::PlayerJoinedGame(PlayerJoinedGame {
            player_id: PLAYER_ID,
            username: "ada".to_string(),
            balance: 100.0,
        }));
        state.apply(room_joined());
        state
    }

    fn committed(choice: usize) -> (SessionState, Vec<Effect>) {
        let mut state = seated();
        state.apply(deal("r1"));
        let ticket = state.begin_commit(choice).unwrap();
        let sealed = SealedChoice::seal(ticket.player_id, &ticket.round_key, ticket.choice).unwrap();
        let effects = state.record_commit(&ticket, sealed).unwrap();
        (state, effects)
    }

    #[test]
    fn test_deal_enters_selecting_with_empty_commit() {
        let mut state = seated();
        state.apply(deal("r1"));

        assert_eq!(state.phase(), RoundPhase::Selecting);
        assert_eq!(state.commit(), &CommitState::default());
        let round = state.round().unwrap();
        assert_eq!(round.round_key, "r1");
        assert_eq!(round.nouns, vec!["Castle", "Ocean"]);
        assert_eq!(round.selection_deadline, deadline());
        assert_eq!(state.pot(), 40.0);
    }

    #[test]
    fn test_commit_stores_then_emits_hash() {
        let (state, effects) = committed(0);
        let commit = state.commit();

        assert!(commit.has_committed);
        assert!(!commit.has_revealed);
        assert_eq!(commit.choice, Some(0));
        let nonce = commit.nonce.clone().unwrap();
        assert!(nonce.len() >= 32);
        let hash = commit.commit_hash.clone().unwrap();
        assert_eq!(hash.len(), 64);
        assert_eq!(hash, derive_commitment(PLAYER_ID, "r1", 0, &nonce));

        let messages = sent(&effects);
        assert_eq!(messages, vec![&ClientMessage::Commit { hash }]);
        assert_eq!(state.last_choice(), Some(0));
        assert_eq!(
            state.notifications().latest().map(|n| n.message.as_str()),
            Some("Choice submitted: Castle")
        );
    }

    #[test]
    fn test_second_commit_rejected() {
        let (state, _) = committed(1);
        assert_eq!(state.begin_commit(0), Err(SessionError::AlreadyCommitted));
    }

    #[test]
    fn test_concurrent_commit_rejected_on_record() {
        let mut state = seated();
        state.apply(deal("r1"));
        let first = state.begin_commit(0).unwrap();
        let second = state.begin_commit(1).unwrap();

        let sealed = SealedChoice::seal(PLAYER_ID, "r1", 0).unwrap();
        state.record_commit(&first, sealed).unwrap();
        let sealed = SealedChoice::seal(PLAYER_ID, "r1", 1).unwrap();
        assert_eq!(
            state.record_commit(&second, sealed),
            Err(SessionError::AlreadyCommitted)
        );
        assert_eq!(state.commit().choice, Some(0));
    }

    #[test]
    fn test_commit_validation() {
        let mut state = seated();
        assert_eq!(
            state.begin_commit(0),
            Err(SessionError::InvalidState("no active round".to_string()))
        );

        state.apply(deal("r1"));
        assert_eq!(
            state.begin_commit(2),
            Err(SessionError::InvalidChoice { index: 2, available: 2 })
        );

        let mut anonymous = SessionState::default();
        anonymous.apply(deal("r1"));
        assert_eq!(anonymous.begin_commit(0), Err(SessionError::NotAuthenticated));
    }

    #[test]
    fn test_commit_for_stale_round_leaves_state_untouched() {
        let mut state = seated();
        state.apply(deal("r1"));
        let ticket = state.begin_commit(0).unwrap();
        state.apply(deal("r2"));

        let sealed = SealedChoice::seal(PLAYER_ID, "r1", 0).unwrap();
        let err = state.record_commit(&ticket, sealed).unwrap_err();
        assert!(matches!(err, SessionError::InvalidState(_)));
        assert_eq!(state.commit(), &CommitState::default());
    }

    #[test]
    fn test_request_reveal_sends_exactly_once() {
        let (mut state, _) = committed(0);
        let nonce = state.commit().nonce.clone().unwrap();

        let effects = state.apply(request_reveal("r1"));
        assert_eq!(state.phase(), RoundPhase::Revealing);
        assert_eq!(
            sent(&effects),
            vec![&ClientMessage::Reveal {
                choice: 0,
                nonce,
                round_key: "r1".to_string(),
            }]
        );
        assert!(state.commit().has_revealed);

        let again = state.apply(request_reveal("r1"));
        assert!(sent(&again).is_empty());
        assert_eq!(state.reveal_now(), Ok(Vec::new()));
    }

    #[test]
    fn test_request_reveal_without_commit() {
        let mut state = seated();
        state.apply(deal("r1"));
        let effects = state.apply(request_reveal("r1"));

        assert_eq!(state.phase(), RoundPhase::Revealing);
        assert!(sent(&effects).is_empty());
        assert_eq!(state.reveal_now(), Err(SessionError::NothingToReveal));
    }

    #[test]
    fn test_request_reveal_for_stale_round_ignored() {
        let (mut state, _) = committed(0);
        let effects = state.apply(request_reveal("r0"));

        assert_eq!(state.phase(), RoundPhase::Selecting);
        assert!(effects.is_empty());
        assert!(!state.commit().has_revealed);
    }

    #[test]
    fn test_reveal_invalid_is_non_fatal() {
        let (mut state, _) = committed(0);
        state.apply(request_reveal("r1"));
        state.apply(ServerEvent::RevealInvalid(RevealInvalid {
            round_key: Some("r1".to_string()),
            message: None,
        }));

        assert_eq!(state.phase(), RoundPhase::Revealing);
        assert!(state.commit().has_revealed);
        assert_eq!(
            state.notifications().latest().map(|n| n.message.as_str()),
            Some("Invalid reveal - random choice assigned")
        );
    }

    #[test]
    fn test_round_results_stored_verbatim() {
        let (mut state, _) = committed(0);
        state.apply(request_reveal("r1"));
        state.apply(ServerEvent::RoundResults(results("r1")));

        assert_eq!(state.phase(), RoundPhase::Results);
        assert_eq!(state.balance(), 112.5);
        let result = state.result().unwrap();
        assert_eq!(result.selection_counts, vec![3, 5]);
        assert_eq!(result.your_choice, Some(0));
        assert_eq!(result.payout, 12.5);
        assert!(result.won());
        assert_eq!(result.percentages(), vec![37.5, 62.5]);
    }

    #[test]
    fn test_round_results_from_selecting() {
        let mut state = seated();
        state.apply(deal("r1"));
        state.apply(ServerEvent::RoundResults(results("r1")));
        assert_eq!(state.phase(), RoundPhase::Results);
    }

    #[test]
    fn test_round_results_for_other_round_only_updates_balance() {
        let mut state = seated();
        state.apply(deal("r2"));
        state.apply(ServerEvent::RoundResults(results("r1")));

        assert_eq!(state.phase(), RoundPhase::Selecting);
        assert!(state.result().is_none());
        assert_eq!(state.balance(), 112.5);
    }

    #[test]
    fn test_deal_during_results_resets() {
        let (mut state, _) = committed(0);
        state.apply(ServerEvent::RoundResults(results("r1")));
        state.apply(deal("r2"));

        assert_eq!(state.phase(), RoundPhase::Selecting);
        assert!(state.result().is_none());
        assert_eq!(state.commit(), &CommitState::default());
    }

    #[test]
    fn test_next_round_info_continue_clears_round() {
        let (mut state, _) = committed(0);
        state.apply(ServerEvent::RoundResults(results("r1")));
        let effects = state.apply(ServerEvent::NextRoundInfo(NextRoundInfo {
            player_count: 5,
            ..NextRoundInfo::default()
        }));

        assert!(effects.is_empty());
        assert_eq!(state.phase(), RoundPhase::NoRound);
        assert!(state.result().is_none());
        assert_eq!(state.room().unwrap().player_count, 5);
    }

    #[test]
    fn test_next_round_info_leave_requests_leave_once() {
        let (mut state, _) = committed(0);
        state.set_end_of_round_action(EndOfRoundAction::Leave);
        state.apply(ServerEvent::RoundResults(results("r1")));

        let effects = state.apply(ServerEvent::NextRoundInfo(NextRoundInfo::default()));
        assert_eq!(effects, vec![Effect::LeaveRoom]);
        let effects = state.apply(ServerEvent::NextRoundInfo(NextRoundInfo::default()));
        assert!(effects.is_empty());
    }

    #[test]
    fn test_next_round_info_outside_results_ignored() {
        let mut state = seated();
        state.apply(deal("r1"));
        state.apply(ServerEvent::NextRoundInfo(NextRoundInfo::default()));
        assert_eq!(state.phase(), RoundPhase::Selecting);
    }

    #[test]
    fn test_commits_update_only_counts() {
        let (mut state, _) = committed(0);
        state.apply(ServerEvent::CommitsUpdate(CommitsUpdate {
            commits_count: 3,
            total_players: 4,
        }));
        let round = state.round().unwrap();
        assert_eq!(round.players_locked_in, 3);
        assert_eq!(round.total_players, 4);
        assert_eq!(state.phase(), RoundPhase::Selecting);
        assert!(state.commit().has_committed);
    }

    #[test]
    fn test_countdown_is_derived_only() {
        let mut state = seated();
        state.apply(deal("r1"));

        let before = deadline() - chrono::Duration::seconds(10);
        assert_eq!(state.time_left(before), Duration::from_secs(10));
        let after = deadline() + chrono::Duration::seconds(5);
        assert_eq!(state.time_left(after), Duration::ZERO);
        assert_eq!(state.phase(), RoundPhase::Selecting);
    }

    #[test]
    fn test_unexpected_disconnect_clears_membership() {
        let (mut state, _) = committed(0);
        let effects = state.apply(ServerEvent::Disconnect(DisconnectInfo {
            reason: Some("transport close".to_string()),
        }));

        assert!(!state.is_in_room());
        assert_eq!(state.phase(), RoundPhase::NoRound);
        assert_eq!(state.commit(), &CommitState::default());
        assert!(!state.is_connected());
        assert!(sent(&effects).is_empty());
        assert_eq!(
            state.notifications().latest().map(|n| n.message.as_str()),
            Some("Connection lost. Attempting to reconnect...")
        );

        // Reconnect re-authenticates before anything else
        let effects = state.apply(ServerEvent::Connect(Default::default()));
        assert_eq!(
            sent(&effects),
            vec![&ClientMessage::JoinPlayer { player_id: PLAYER_ID }]
        );
        assert_eq!(
            state.notifications().latest().map(|n| n.message.as_str()),
            Some("Reconnected")
        );
    }

    #[test]
    fn test_intentional_disconnect_is_quiet() {
        let mut state = seated();
        let before = state.notifications().len();
        state.apply(ServerEvent::Disconnect(DisconnectInfo {
            reason: Some("io client disconnect".to_string()),
        }));
        assert_eq!(state.notifications().len(), before);
        assert!(!state.is_connected());
    }

    #[test]
    fn test_intentional_disconnect_drops_membership() {
        let (mut state, _) = committed(0);
        state.apply(ServerEvent::Disconnect(DisconnectInfo {
            reason: Some("io client disconnect".to_string()),
        }));

        assert!(!state.is_in_room());
        assert_eq!(state.phase(), RoundPhase::NoRound);
        assert!(!state.commit().has_committed);

        let effects = state.apply(ServerEvent::Connect(Default::default()));
        assert_eq!(
            sent(&effects),
            vec![&ClientMessage::JoinPlayer { player_id: PLAYER_ID }]
        );
        assert!(!state.is_in_room());
        assert!(!state.can_commit());
        assert!(matches!(
            state.begin_commit(0),
            Err(SessionError::InvalidState(_))
        ));
    }

    #[test]
    fn test_join_flow_waits_for_handshake() {
        let mut state = SessionState::default();
        state.registration_succeeded(record());
        let request = state.begin_join(false).unwrap();
        assert_eq!(request.player_id, PLAYER_ID);

        // Not connected yet: the token is held
        let effects = state.complete_join(request.ticket, assignment()).unwrap();
        assert!(sent(&effects).is_empty());
        assert_eq!(state.balance(), 99.0);

        let effects = state.apply(ServerEvent::Connect(Default::default()));
        assert_eq!(sent(&effects), vec![&ClientMessage::JoinPlayer { player_id: PLAYER_ID }]);

        let effects = state.apply(ServerEvent::PlayerJoinedGame(PlayerJoinedGame {
            player_id: PLAYER_ID,
            username: "ada".to_string(),
            balance: 99.0,
        }));
        assert_eq!(
            sent(&effects),
            vec![&ClientMessage::JoinRoom {
                room_token: "one-time-token".to_string(),
                as_spectator: false,
            }]
        );

        state.apply(room_joined());
        assert!(state.is_in_room());
        assert!(!state.is_joining());
        assert_eq!(state.room().unwrap().key.as_deref(), Some("room-full-key"));
    }

    #[test]
    fn test_pending_join_retried_after_reconnect() {
        let mut state = SessionState::default();
        state.apply(ServerEvent::Connect(Default::default()));
        state.registration_succeeded(record());
        state.apply(ServerEvent::PlayerJoinedGame(PlayerJoinedGame {
            player_id: PLAYER_ID,
            username: "ada".to_string(),
            balance: 100.0,
        }));
        let request = state.begin_join(false).unwrap();
        let effects = state.complete_join(request.ticket, assignment()).unwrap();
        assert_eq!(sent(&effects).len(), 1);

        state.apply(ServerEvent::Disconnect(DisconnectInfo::default()));
        let effects = state.apply(ServerEvent::Connect(Default::default()));
        assert_eq!(sent(&effects), vec![&ClientMessage::JoinPlayer { player_id: PLAYER_ID }]);

        let effects = state.apply(ServerEvent::PlayerJoinedGame(PlayerJoinedGame {
            player_id: PLAYER_ID,
            username: "ada".to_string(),
            balance: 99.0,
        }));
        assert!(matches!(
            sent(&effects).as_slice(),
            [ClientMessage::JoinRoom { .. }]
        ));
    }

    #[test]
    fn test_stale_join_response_discarded() {
        let mut state = SessionState::default();
        state.registration_succeeded(record());
        let first = state.begin_join(false).unwrap();
        let second = state.begin_join(true).unwrap();

        assert!(state.complete_join(first.ticket, assignment()).is_none());
        assert!(state.join_failed(first.ticket, "late").is_empty());
        assert!(state.complete_join(second.ticket, assignment()).is_some());

        let mut state = SessionState::default();
        state.registration_succeeded(record());
        let request = state.begin_join(false).unwrap();
        state.logout();
        assert!(state.complete_join(request.ticket, assignment()).is_none());
    }

    #[test]
    fn test_join_requires_identity() {
        let mut state = SessionState::default();
        assert_eq!(state.begin_join(false), Err(SessionError::NotAuthenticated));
        let mut state = seated();
        assert_eq!(state.begin_join(false), Err(SessionError::AlreadyInRoom));
    }

    #[test]
    fn test_room_left_and_removal_clear_state() {
        let (mut state, _) = committed(0);
        state.apply(ServerEvent::RoomLeft(Default::default()));
        assert!(!state.is_in_room());
        assert_eq!(state.phase(), RoundPhase::NoRound);

        let mut state = seated();
        state.apply(ServerEvent::RemovedFromRoom(RemovedFromRoom {
            message: Some("Kicked for inactivity".to_string()),
        }));
        assert!(!state.is_in_room());
        let latest = state.notifications().latest().unwrap();
        assert_eq!(latest.message, "Kicked for inactivity");
        assert_eq!(latest.level, NotificationLevel::Warning);
    }

    #[test]
    fn test_auth_error_clears_identity() {
        let mut state = seated();
        state.apply(ServerEvent::Error(ServerError {
            message: "bad token".to_string(),
            code: Some("AUTH_FAILED".to_string()),
        }));
        assert!(!state.is_authenticated());
        assert!(!state.is_in_room());
        assert_eq!(state.error(), Some("bad token"));
    }

    #[test]
    fn test_game_error_surfaces_verbatim() {
        let mut state = seated();
        state.apply(ServerEvent::GameError(ServerError {
            message: "Commit too late".to_string(),
            code: None,
        }));
        assert!(state.is_in_room());
        assert_eq!(state.error(), Some("Commit too late"));
        assert_eq!(
            state.notifications().latest().map(|n| n.message.as_str()),
            Some("Commit too late")
        );
        state.clear_error();
        assert_eq!(state.error(), None);

        state.apply(ServerEvent::Error(ServerError {
            message: "Room closed".to_string(),
            code: Some("ROOM_NOT_FOUND".to_string()),
        }));
        assert!(!state.is_in_room());
        assert!(state.is_authenticated());
    }

    #[test]
    fn test_queue_update_overwrites() {
        let mut state = seated();
        state.apply(ServerEvent::QueueUpdate(QueueUpdate {
            position: 3,
            total_waiting: 5,
        }));
        assert!(state.queue().is_in_queue);
        assert_eq!(state.queue().estimated_wait, Duration::from_secs(90));

        state.apply(ServerEvent::QueueUpdate(QueueUpdate {
            position: 0,
            total_waiting: 4,
        }));
        assert!(!state.queue().is_in_queue);

        state.apply(ServerEvent::QueueUpdate(QueueUpdate {
            position: 1,
            total_waiting: 4,
        }));
        assert!(state.queue().is_in_queue);
        assert_eq!(state.queue().estimated_wait, Duration::from_secs(30));
    }

    #[test]
    fn test_queue_request_requires_spectator() {
        let state = seated();
        assert!(matches!(
            state.request_queue(true),
            Err(SessionError::InvalidState(_))
        ));
        assert_eq!(
            SessionState::default().request_queue(true),
            Err(SessionError::NotInRoom)
        );
    }

    #[test]
    fn test_spectator_view_only_for_spectators() {
        let snapshot = GameStateSnapshot {
            adjective: "Loud".to_string(),
            nouns: vec!["Drum".to_string()],
            selection_deadline: deadline(),
            commits_count: 2,
        };
        let mut state = seated();
        state.apply(ServerEvent::GameState(snapshot.clone()));
        assert!(state.spectator_view().is_none());

        let mut state = SessionState::default();
        state.registration_succeeded(record());
        let request = state.begin_join(true).unwrap();
        state.complete_join(request.ticket, assignment());
        state.apply(room_joined());
        assert!(state.is_spectator());
        assert!(!state.can_commit());
        state.apply(ServerEvent::GameState(snapshot));
        assert_eq!(state.spectator_view().unwrap().commits_count, 2);
    }

    #[test]
    fn test_emotes_bounded_and_expiring() {
        let mut state = seated();
        let mut expiries = 0;
        for i in 0..12 {
            let effects = state.apply(ServerEvent::PlayerEmote(PlayerEmote {
                emote: "🎉".to_string(),
                username: format!("p{i}"),
                timestamp: None,
            }));
            expiries += effects
                .iter()
                .filter(|e| matches!(e, Effect::Expire(TransientKind::Emote, _)))
                .count();
        }
        assert_eq!(state.emotes().len(), 10);
        assert_eq!(expiries, 12);
    }

    #[test]
    fn test_logout_keeps_settings() {
        let mut state = seated();
        state.settings_mut().sound_effects = false;
        let effects = state.logout();

        assert_eq!(sent(&effects), vec![&ClientMessage::LeaveRoom {}]);
        assert!(!state.is_authenticated());
        assert!(!state.is_in_room());
        assert!(state.notifications().is_empty());
        assert!(!state.settings().sound_effects);
    }

    #[test]
    fn test_commit_state_debug_redacts() {
        let (state, _) = committed(1);
        let nonce = state.commit().nonce.clone().unwrap();
        let printed = format!("{:?}", state);
        assert!(!printed.contains(&nonce));
        assert!(!printed.contains("one-time-token"));
    }
}
