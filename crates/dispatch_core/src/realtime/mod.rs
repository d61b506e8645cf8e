//! Real-time fan-out: wire events, per-identity rooms, the order-to-passenger
//! location router, and driver notifications.
//!
//! The transport itself (websocket, SSE, ...) lives outside this crate. A
//! connection is represented by the sending half of a bounded `tokio::mpsc`
//! channel; whatever owns the socket drains the receiving half.

pub mod events;
pub mod notify;
pub mod rooms;
pub mod router;

pub use events::{ClientEvent, ServerEvent};
pub use notify::{DriverNotifier, RoomDriverNotifier};
pub use rooms::{ConnectionId, Delivery, Outbox, RoomId, RoomRegistry};
pub use router::{LocationBroadcastRouter, RelayOutcome, Subscription};
