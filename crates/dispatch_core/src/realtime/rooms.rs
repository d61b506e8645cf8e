use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

use dashmap::DashMap;
use tokio::sync::mpsc::{self, error::TrySendError};
use tracing::debug;

use super::events::ServerEvent;
use crate::domain::{DriverId, PassengerId};

/// Identifies one live client connection.
pub type ConnectionId = u64;

/// Outbound half of a connection.
pub type Outbox = mpsc::Sender<ServerEvent>;

/// A per-identity room. Each room holds at most one connection; a newer
/// connection for the same identity replaces the older one.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RoomId {
    Passenger(PassengerId),
    Driver(DriverId),
}

impl fmt::Display for RoomId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RoomId::Passenger(id) => write!(f, "user_{}", id),
            RoomId::Driver(id) => write!(f, "driver_{}", id),
        }
    }
}

/// Result of a single best-effort emit.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Delivery {
    Delivered,
    /// Nobody is in the room.
    NoListener,
    /// The connection's buffer was full or it had just closed.
    Dropped,
}

#[derive(Debug, Clone)]
struct Member {
    connection: ConnectionId,
    outbox: Outbox,
}

#[derive(Debug, Default)]
pub struct RoomRegistry {
    next_connection: AtomicU64,
    rooms: DashMap<RoomId, Member>,
}

impl RoomRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn allocate_connection_id(&self) -> ConnectionId {
        self.next_connection.fetch_add(1, Ordering::Relaxed) + 1
    }

    /// Put `connection` in `room`, returning the connection it displaced.
    pub fn join(
        &self,
        room: RoomId,
        connection: ConnectionId,
        outbox: Outbox,
    ) -> Option<ConnectionId> {
        let previous = self
            .rooms
            .insert(room, Member { connection, outbox })
            .map(|member| member.connection)
            .filter(|previous| *previous != connection);
        if let Some(previous) = previous {
            debug!(%room, previous, connection, "room member replaced");
        }
        previous
    }

    /// Remove `connection` from `room`. A no-op when a newer connection has
    /// already taken the room over.
    pub fn leave(&self, room: RoomId, connection: ConnectionId) -> bool {
        self.rooms
            .remove_if(&room, |_, member| member.connection == connection)
            .is_some()
    }

    pub fn is_occupied(&self, room: RoomId) -> bool {
        self.rooms.contains_key(&room)
    }

    /// Deliver without waiting. Events are never buffered beyond the
    /// connection's own channel.
    pub fn emit(&self, room: RoomId, event: ServerEvent) -> Delivery {
        let Some(member) = self.rooms.get(&room).map(|member| member.clone()) else {
            return Delivery::NoListener;
        };
        match member.outbox.try_send(event) {
            Ok(()) => Delivery::Delivered,
            Err(TrySendError::Full(event)) => {
                debug!(%room, event = event.name(), "outbox full, event dropped");
                Delivery::Dropped
            }
            Err(TrySendError::Closed(_)) => {
                self.leave(room, member.connection);
                Delivery::Dropped
            }
        }
    }
}
