//! # Session Registry
//!
//! Maps each online operator to the outbound queues of its authenticated
//! connections, in login order. Pushes go to the first live one. Every
//! line written to a connection (responses and pushes) goes through its one
//! queue, so a push can never interleave with a response mid-line.
//!
//! The registry is in-memory only and never persisted.

use std::collections::HashMap;
use std::net::SocketAddr;

use log::{debug, info, warn};
use serde::Serialize;
use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::{mpsc, RwLock};

use crate::common::messages::encode_line;

pub type ConnectionId = u64;

/// Outbound lines buffered per connection before pushes start being dropped.
pub const OUTBOUND_CAPACITY: usize = 100;

/// Cloneable handle to one connection's writer task.
#[derive(Debug, Clone)]
pub struct SessionHandle {
    conn_id: ConnectionId,
    peer: SocketAddr,
    sender: mpsc::Sender<String>,
}

impl SessionHandle {
    pub fn new(conn_id: ConnectionId, peer: SocketAddr, sender: mpsc::Sender<String>) -> Self {
        Self {
            conn_id,
            peer,
            sender,
        }
    }

    pub fn conn_id(&self) -> ConnectionId {
        self.conn_id
    }

    pub fn peer(&self) -> SocketAddr {
        self.peer
    }

    /// Whether the writer task has gone away.
    pub fn is_closed(&self) -> bool {
        self.sender.is_closed()
    }

    /// Queue a reply, waiting for room. Returns `false` once the
    /// connection's writer is gone.
    pub async fn reply<T: Serialize>(&self, message: &T) -> bool {
        let line = match encode_line(message) {
            Ok(line) => line,
            Err(e) => {
                warn!("❌ Failed to encode reply for {}: {}", self.peer, e);
                return true;
            }
        };
        self.sender.send(line).await.is_ok()
    }

    /// Queue a push without waiting. A full or closed queue drops it.
    pub fn push<T: Serialize>(&self, message: &T) -> bool {
        let line = match encode_line(message) {
            Ok(line) => line,
            Err(e) => {
                warn!("❌ Failed to encode push for {}: {}", self.peer, e);
                return false;
            }
        };
        match self.sender.try_send(line) {
            Ok(()) => true,
            Err(TrySendError::Full(_)) => {
                warn!("⚠️  Outbound queue for {} is full, push dropped", self.peer);
                false
            }
            Err(TrySendError::Closed(_)) => {
                debug!("Connection {} already closed, push dropped", self.conn_id);
                false
            }
        }
    }
}

/// Every authenticated connection of one operator, in login order. The
/// first live one receives pushes; the rest stand by.
type Connections = Vec<SessionHandle>;

#[derive(Default)]
pub struct SessionRegistry {
    sessions: RwLock<HashMap<String, Connections>>,
}

impl SessionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add `handle` as one of `username`'s connections.
    ///
    /// Returns `true` if it became the push target. If another live
    /// connection already holds the username it stays the target and the
    /// new one is kept on standby; closed entries are dropped first.
    pub async fn register(&self, username: &str, handle: SessionHandle) -> bool {
        let mut sessions = self.sessions.write().await;
        let connections = sessions.entry(username.to_string()).or_default();
        connections.retain(|existing| !existing.is_closed() && existing.conn_id != handle.conn_id);

        let primary = connections.is_empty();
        if primary {
            debug!("Session '{}' -> connection {}", username, handle.conn_id);
        } else {
            info!(
                "👥 '{}' already online via connection {}, connection {} on standby",
                username, connections[0].conn_id, handle.conn_id
            );
        }
        connections.push(handle);
        primary
    }

    /// Drop connection `conn_id` from `username`'s sessions.
    ///
    /// # Returns
    /// - `None`: that connection was not registered for `username`
    /// - `Some(n)`: removed, `n` live connections remain (the first of
    ///   them now receives pushes)
    pub async fn unregister(&self, username: &str, conn_id: ConnectionId) -> Option<usize> {
        let mut sessions = self.sessions.write().await;
        let connections = sessions.get_mut(username)?;

        let before = connections.len();
        connections.retain(|existing| existing.conn_id != conn_id);
        if connections.len() == before {
            return None;
        }
        connections.retain(|existing| !existing.is_closed());

        let remaining = connections.len();
        if remaining == 0 {
            sessions.remove(username);
        } else {
            debug!(
                "Session '{}' -> connection {} ({} left)",
                username, connections[0].conn_id, remaining
            );
        }
        Some(remaining)
    }

    pub async fn is_online(&self, username: &str) -> bool {
        self.connection_count(username).await > 0
    }

    /// Live authenticated connections for `username`.
    pub async fn connection_count(&self, username: &str) -> usize {
        self.sessions
            .read()
            .await
            .get(username)
            .map_or(0, |connections| {
                connections.iter().filter(|handle| !handle.is_closed()).count()
            })
    }

    /// Best-effort push to `username`'s first live connection. Never fails
    /// the caller: an offline operator or a dead connection is logged and
    /// reported as `false`.
    pub async fn send_to<T: Serialize>(&self, username: &str, payload: &T) -> bool {
        let handle = self
            .sessions
            .read()
            .await
            .get(username)
            .and_then(|connections| connections.iter().find(|handle| !handle.is_closed()).cloned());
        match handle {
            Some(handle) => handle.push(payload),
            None => {
                debug!("'{}' is not online, nothing sent", username);
                false
            }
        }
    }

    pub async fn online_usernames(&self) -> Vec<String> {
        let mut names: Vec<String> = self
            .sessions
            .read()
            .await
            .iter()
            .filter(|(_, connections)| connections.iter().any(|handle| !handle.is_closed()))
            .map(|(name, _)| name.clone())
            .collect();
        names.sort();
        names
    }
}
