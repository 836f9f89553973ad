//! Reconnection supervisor.
//!
//! Watches the transport lifecycle and brings the connection back after an
//! unexpected drop:
//!
//! ```text
//!              drop (not client-initiated) / visible while down
//!   Connected ────────────────────────────────────────► Connecting
//!       ▲                                                 │   │
//!       │                 connect() ok                    │   │ connect() failed
//!       └─────────────────────────────────────────────────┘   ▼
//!                                                       Disconnected
//!                                                  (sleep backoff, retry)
//! ```
//!
//! Attempts are sequential: the supervisor task is the only place that
//! calls `connect()` after a drop, and it awaits each attempt before the
//! next. Re-authentication is not done here; the session reacts to the
//! `connect` lifecycle event by re-sending `join_player`.

use std::sync::Arc;
use std::time::Duration;

use rand::rngs::StdRng;
use rand::{Rng, RngCore, SeedableRng};
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;

use crate::protocol::{DisconnectInfo, EVENT_CONNECT, EVENT_DISCONNECT};
use crate::transport::{DisconnectReason, GameSocket, TransportError};

/// Exponential reconnect backoff.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub initial_delay: Duration,
    pub max_delay: Duration,
    pub multiplier: u32,
    /// Give up after this many consecutive failures (`None` retries forever)
    pub max_attempts: Option<u32>,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            initial_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(30),
            multiplier: 2,
            max_attempts: None,
        }
    }
}

impl RetryPolicy {
    /// Un-jittered delay before retry number `attempt` (0-based), capped at
    /// `max_delay`.
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let factor = self.multiplier.max(1).saturating_pow(attempt);
        self.initial_delay
            .checked_mul(factor)
            .unwrap_or(self.max_delay)
            .min(self.max_delay)
    }

    /// Jittered delay before retry number `attempt`.
    pub fn backoff(&self, attempt: u32, rng: &mut impl RngCore) -> Duration {
        jittered_backoff(rng, self.delay_for(attempt))
    }

    fn exhausted(&self, failures: u32) -> bool {
        self.max_attempts.is_some_and(|max| failures >= max)
    }
}

/// Equal jitter: the delay lands in `[backoff/2, backoff]`.
fn jittered_backoff(rng: &mut impl RngCore, backoff: Duration) -> Duration {
    let backoff_ms = backoff.as_millis() as u64;
    if backoff_ms <= 1 {
        return backoff;
    }
    let half_ms = backoff_ms / 2;
    let jitter_ms = rng.gen_range(0..=half_ms);
    Duration::from_millis(half_ms.saturating_add(jitter_ms))
}

/// Supervisor view of the connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SupervisorState {
    Disconnected,
    Connecting,
    Connected,
}

/// Page/app visibility as reported by the host.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Visibility {
    Hidden,
    Visible,
}

#[derive(Debug)]
enum Signal {
    /// Connection opened
    Connected,
    /// Connection dropped without being asked to
    Dropped,
    /// Connection closed locally; stay down
    Closed,
    /// Make sure a connection exists (start-up, visibility)
    Ensure,
    Shutdown,
}

/// Handle to the supervisor task. Dropping it stops supervision.
pub struct ReconnectSupervisor {
    signals: mpsc::UnboundedSender<Signal>,
    state: watch::Receiver<SupervisorState>,
    task: JoinHandle<()>,
}

impl ReconnectSupervisor {
    /// Start supervising `socket`. Must be called inside a tokio runtime.
    pub fn spawn(socket: Arc<GameSocket>, policy: RetryPolicy) -> Self {
        let (signals, receiver) = mpsc::unbounded_channel();
        let initial = if socket.is_connected() {
            SupervisorState::Connected
        } else {
            SupervisorState::Disconnected
        };
        let (state_tx, state) = watch::channel(initial);

        let tx = signals.clone();
        socket.on(EVENT_CONNECT, move |_| {
            let _ = tx.send(Signal::Connected);
        });
        let tx = signals.clone();
        socket.subscribe::<DisconnectInfo, _>(EVENT_DISCONNECT, move |info| {
            let reason = DisconnectReason::parse(info.reason.as_deref());
            let signal = if reason.is_intentional() {
                Signal::Closed
            } else {
                Signal::Dropped
            };
            let _ = tx.send(signal);
        });

        let supervisor = Supervisor {
            socket,
            policy,
            signals: receiver,
            state: state_tx,
            rng: StdRng::from_entropy(),
        };
        let task = tokio::spawn(supervisor.run());

        Self {
            signals,
            state,
            task,
        }
    }

    /// Connect now if disconnected (also the start-up trigger).
    pub fn ensure_connected(&self) {
        let _ = self.signals.send(Signal::Ensure);
    }

    /// Report a visibility change. Becoming visible while disconnected
    /// triggers an immediate attempt, skipping any pending backoff.
    pub fn notify_visibility(&self, visibility: Visibility) {
        match visibility {
            Visibility::Visible => self.ensure_connected(),
            Visibility::Hidden => log::debug!("Client hidden"),
        }
    }

    /// Current supervisor state.
    pub fn state(&self) -> SupervisorState {
        *self.state.borrow()
    }

    /// Receiver that observes every state change.
    pub fn watch(&self) -> watch::Receiver<SupervisorState> {
        self.state.clone()
    }

    /// Stop supervising. The connection itself is left as is.
    pub fn shutdown(self) {
        let _ = self.signals.send(Signal::Shutdown);
    }
}

impl Drop for ReconnectSupervisor {
    fn drop(&mut self) {
        self.task.abort();
    }
}

struct Supervisor {
    socket: Arc<GameSocket>,
    policy: RetryPolicy,
    signals: mpsc::UnboundedReceiver<Signal>,
    state: watch::Sender<SupervisorState>,
    rng: StdRng,
}

/// How a reconnect loop ended.
enum Outcome {
    Connected,
    GaveUp,
    Stopped,
}

impl Supervisor {
    async fn run(mut self) {
        while let Some(signal) = self.signals.recv().await {
            match signal {
                Signal::Connected => {
                    self.state.send_replace(SupervisorState::Connected);
                }
                Signal::Closed => {
                    self.state.send_replace(SupervisorState::Disconnected);
                }
                Signal::Dropped => {
                    log::warn!("Connection dropped; reconnecting");
                    self.state.send_replace(SupervisorState::Disconnected);
                    if let Outcome::Stopped = self.reconnect().await {
                        break;
                    }
                }
                Signal::Ensure => {
                    if self.socket.is_connected() {
                        continue;
                    }
                    if let Outcome::Stopped = self.reconnect().await {
                        break;
                    }
                }
                Signal::Shutdown => break,
            }
        }
        log::debug!("Reconnect supervisor stopped");
    }

    async fn reconnect(&mut self) -> Outcome {
        let mut failures = 0u32;
        loop {
            self.state.send_replace(SupervisorState::Connecting);
            match self.socket.connect().await {
                Ok(()) => {
                    if failures > 0 {
                        log::info!("Reconnected after {failures} failed attempts");
                    }
                    let state = if self.socket.is_connected() {
                        SupervisorState::Connected
                    } else {
                        SupervisorState::Connecting
                    };
                    self.state.send_replace(state);
                    return Outcome::Connected;
                }
                Err(TransportError::Cancelled) => {
                    log::debug!("Reconnect cancelled by a local disconnect");
                    self.state.send_replace(SupervisorState::Disconnected);
                    return Outcome::GaveUp;
                }
                Err(e) => {
                    self.state.send_replace(SupervisorState::Disconnected);
                    let delay = self.policy.backoff(failures, &mut self.rng);
                    failures += 1;
                    if self.policy.exhausted(failures) {
                        log::error!("Giving up after {failures} reconnect attempts: {e}");
                        return Outcome::GaveUp;
                    }
                    log::warn!("Reconnect attempt {failures} failed: {e}; retrying in {delay:?}");

                    // Wait out the backoff, but let visibility cut it short
                    tokio::select! {
                        _ = tokio::time::sleep(delay) => {}
                        signal = self.signals.recv() => match signal {
                            Some(Signal::Ensure) => log::debug!("Retrying early"),
                            Some(Signal::Closed) => return Outcome::GaveUp,
                            Some(Signal::Shutdown) | None => return Outcome::Stopped,
                            Some(Signal::Connected) => {
                                self.state.send_replace(SupervisorState::Connected);
                                return Outcome::Connected;
                            }
                            Some(Signal::Dropped) => {}
                        },
                    }
                }
            }
        }
    }
}
