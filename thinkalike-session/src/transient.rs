//! Bounded, self-expiring collections for notifications and emotes.
//!
//! ```text
//! append(item) ──► [ .. oldest .. | newest ]   (len ≤ capacity, oldest dropped)
//!       │
//!       └─► schedule_expiry(id, ttl) ── sleep(ttl) ──► remove(id)  (no-op if gone)
//! ```
//!
//! Items keep insertion order. Nothing here is persisted.

use std::collections::VecDeque;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::task::JoinHandle;
use uuid::Uuid;

/// Entries kept per collection.
pub const DEFAULT_CAPACITY: usize = 10;

/// Anything that can live in a [`TransientList`].
pub trait Transient {
    fn id(&self) -> Uuid;
}

/// Which collection a transient item belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TransientKind {
    Notification,
    Emote,
}

/// Severity of a notification.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NotificationLevel {
    Info,
    Success,
    Warning,
    Error,
}

/// A dismissible message for the player.
#[derive(Debug, Clone, PartialEq)]
pub struct Notification {
    pub id: Uuid,
    pub message: String,
    pub level: NotificationLevel,
    pub timestamp: DateTime<Utc>,
}

impl Notification {
    pub fn new(message: impl Into<String>, level: NotificationLevel) -> Self {
        Self {
            id: Uuid::new_v4(),
            message: message.into(),
            level,
            timestamp: Utc::now(),
        }
    }
}

impl Transient for Notification {
    fn id(&self) -> Uuid {
        self.id
    }
}

/// An emote broadcast by someone in the room.
#[derive(Debug, Clone, PartialEq)]
pub struct Emote {
    pub id: Uuid,
    pub username: String,
    pub emote: String,
    pub timestamp: DateTime<Utc>,
}

impl Emote {
    pub fn new(username: impl Into<String>, emote: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            username: username.into(),
            emote: emote.into(),
            timestamp: Utc::now(),
        }
    }
}

impl Transient for Emote {
    fn id(&self) -> Uuid {
        self.id
    }
}

/// Insertion-ordered list that keeps only the newest `capacity` entries.
#[derive(Debug, Clone, PartialEq)]
pub struct TransientList<T> {
    items: VecDeque<T>,
    capacity: usize,
}

impl<T: Transient> TransientList<T> {
    /// Create an empty list. A zero capacity is clamped to 1.
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            items: VecDeque::with_capacity(capacity),
            capacity,
        }
    }

    /// Append an item, dropping the oldest entries beyond capacity.
    ///
    /// Returns the id of the appended item.
    pub fn append(&mut self, item: T) -> Uuid {
        let id = item.id();
        self.items.push_back(item);
        while self.items.len() > self.capacity {
            self.items.pop_front();
        }
        id
    }

    /// Remove an item by id. Removing an absent id is a no-op.
    pub fn remove(&mut self, id: Uuid) -> Option<T> {
        let index = self.items.iter().position(|item| item.id() == id)?;
        self.items.remove(index)
    }

    pub fn contains(&self, id: Uuid) -> bool {
        self.items.iter().any(|item| item.id() == id)
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Iterate oldest first.
    pub fn iter(&self) -> impl Iterator<Item = &T> {
        self.items.iter()
    }

    /// Newest entry, if any.
    pub fn latest(&self) -> Option<&T> {
        self.items.back()
    }

    pub fn clear(&mut self) {
        self.items.clear();
    }
}

impl<T: Transient> Default for TransientList<T> {
    fn default() -> Self {
        Self::new(DEFAULT_CAPACITY)
    }
}

/// Run `remove` exactly once after `delay`.
///
/// The callback is expected to be idempotent: the item may already have been
/// evicted by capacity or dismissed by the player.
pub fn schedule_expiry<F>(delay: Duration, remove: F) -> JoinHandle<()>
where
    F: FnOnce() + Send + 'static,
{
    tokio::spawn(async move {
        tokio::time::sleep(delay).await;
        remove();
    })
}
