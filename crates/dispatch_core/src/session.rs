//! Transport-agnostic handler for one client connection.
//!
//! The socket layer decodes frames into [`ClientEvent`]s, feeds them to
//! [`ConnectionSession::handle`], and drains the session's outbox. Replies and
//! pushes both go through that outbox.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use tracing::{debug, info, warn};

use crate::dispatch::DispatchCoordinator;
use crate::domain::{DriverId, GeoPoint, OrderId, PassengerId, RideRequest};
use crate::error::{AuthError, DispatchError};
use crate::fleet::{FleetPresence, PresenceChange};
use crate::realtime::events::{
    AssignedDriver, DriverLocationPayload, GoOnlinePayload, OrderConfirmedPayload,
    RequestRidePayload, RideRequestFailedPayload, StatusPayload,
};
use crate::realtime::{ClientEvent, ConnectionId, Outbox, RelayOutcome, RoomId, ServerEvent};

/// Who is on the other end of a connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Identity {
    Passenger(PassengerId),
    Driver(DriverId),
}

impl Identity {
    pub fn room(self) -> RoomId {
        match self {
            Identity::Passenger(id) => RoomId::Passenger(id),
            Identity::Driver(id) => RoomId::Driver(id),
        }
    }
}

impl fmt::Display for Identity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Identity::Passenger(id) => write!(f, "passenger {}", id),
            Identity::Driver(id) => write!(f, "driver {}", id),
        }
    }
}

/// Token -> identity resolution. Credentials are opaque to this crate.
#[async_trait]
pub trait Authenticator: Send + Sync {
    async fn authenticate(&self, token: &str) -> Result<Identity, AuthError>;
}

/// Fixed token table, for tests and local runs.
#[derive(Debug, Clone, Default)]
pub struct StaticTokenAuthenticator {
    tokens: HashMap<String, Identity>,
}

impl StaticTokenAuthenticator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_token(mut self, token: impl Into<String>, identity: Identity) -> Self {
        self.tokens.insert(token.into(), identity);
        self
    }
}

#[async_trait]
impl Authenticator for StaticTokenAuthenticator {
    async fn authenticate(&self, token: &str) -> Result<Identity, AuthError> {
        self.tokens.get(token).copied().ok_or(AuthError::InvalidToken)
    }
}

/// Whether the transport should keep the connection open.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionControl {
    Continue,
    Close,
}

pub struct ConnectionSession {
    connection: ConnectionId,
    outbox: Outbox,
    identity: Option<Identity>,
    auth: Arc<dyn Authenticator>,
    coordinator: Arc<DispatchCoordinator>,
    fleet: Arc<FleetPresence>,
}

impl ConnectionSession {
    pub fn new(
        coordinator: Arc<DispatchCoordinator>,
        fleet: Arc<FleetPresence>,
        auth: Arc<dyn Authenticator>,
        outbox: Outbox,
    ) -> Self {
        let connection = coordinator.router().rooms().allocate_connection_id();
        Self {
            connection,
            outbox,
            identity: None,
            auth,
            coordinator,
            fleet,
        }
    }

    pub fn connection_id(&self) -> ConnectionId {
        self.connection
    }

    pub fn identity(&self) -> Option<Identity> {
        self.identity
    }

    pub async fn handle(&mut self, event: ClientEvent) -> SessionControl {
        match event {
            ClientEvent::Authenticate(payload) => return self.authenticate(&payload.token).await,
            ClientEvent::RequestRide(payload) => self.request_ride(payload).await,
            ClientEvent::CancelRide(payload) => self.cancel_ride(payload.order_id).await,
            ClientEvent::DriverLocation(payload) => self.driver_location(payload).await,
            ClientEvent::GoOnline(payload) => self.go_online(payload).await,
            ClientEvent::GoOffline => self.go_offline().await,
        }
        SessionControl::Continue
    }

    /// Leave the room and clean up presence. Safe to call after the
    /// identity already reconnected elsewhere.
    pub async fn disconnect(self) {
        let Some(identity) = self.identity else {
            return;
        };
        let rooms = self.coordinator.router().rooms();
        if !rooms.leave(identity.room(), self.connection) {
            debug!(%identity, connection = self.connection, "stale connection closed");
            return;
        }
        info!(%identity, connection = self.connection, "client disconnected");
        match identity {
            Identity::Passenger(passenger_id) => {
                if let Err(err) = self.coordinator.unsubscribe_passenger(passenger_id).await {
                    warn!(%identity, error = %err, "failed to drop subscriptions");
                }
            }
            Identity::Driver(driver_id) => {
                if let Err(err) = self.fleet.go_offline(driver_id).await {
                    warn!(%identity, error = %err, "failed to mark driver offline");
                }
            }
        }
    }

    fn send(&self, event: ServerEvent) {
        let name = event.name();
        if self.outbox.try_send(event).is_err() {
            debug!(connection = self.connection, event = name, "reply dropped");
        }
    }

    fn status(&self, success: bool, message: impl Into<String>) {
        let payload = if success {
            StatusPayload::ok(message)
        } else {
            StatusPayload::failed(message)
        };
        self.send(ServerEvent::StatusUpdate(payload));
    }

    async fn authenticate(&mut self, token: &str) -> SessionControl {
        let identity = match self.auth.authenticate(token).await {
            Ok(identity) => identity,
            Err(err) => {
                warn!(connection = self.connection, error = %err, "authentication failed");
                self.send(ServerEvent::AuthError(StatusPayload::failed(
                    "authentication failed, please sign in again",
                )));
                return SessionControl::Close;
            }
        };

        let rooms = self.coordinator.router().rooms();
        if let Some(previous) = self.identity.filter(|previous| *previous != identity) {
            rooms.leave(previous.room(), self.connection);
        }
        rooms.join(identity.room(), self.connection, self.outbox.clone());
        self.identity = Some(identity);

        if let Identity::Passenger(passenger_id) = identity {
            match self.coordinator.resubscribe_passenger(passenger_id).await {
                Ok(0) => {}
                Ok(restored) => debug!(%identity, restored, "subscriptions restored"),
                Err(err) => warn!(%identity, error = %err, "failed to restore subscriptions"),
            }
        }
        info!(%identity, connection = self.connection, "client authenticated");
        self.status(true, format!("welcome, {} connected", identity));
        SessionControl::Continue
    }

    fn ride_failed(&self, order_id: Option<OrderId>, err: &DispatchError) {
        self.send(ServerEvent::RideRequestFailed(RideRequestFailedPayload {
            order_id,
            message: err.to_string(),
            retryable: err.is_retryable(),
        }));
    }

    async fn request_ride(&self, payload: RequestRidePayload) {
        let Some(Identity::Passenger(passenger_id)) = self.identity else {
            self.send(ServerEvent::RideRequestFailed(RideRequestFailedPayload {
                order_id: None,
                message: "authenticate as a passenger first".to_string(),
                retryable: false,
            }));
            return;
        };
        let request = RideRequest {
            passenger_id,
            pickup: payload.pickup,
            dropoff: payload.dropoff,
            vehicle_type: payload.vehicle_type,
            surge_multiplier: 0.0,
        };
        let order = match self.coordinator.create_order(request).await {
            Ok(order) => order,
            Err(err) => return self.ride_failed(None, &err),
        };
        match self.coordinator.dispatch(order.id).await {
            Ok(assignment) => self.send(ServerEvent::OrderConfirmed(OrderConfirmedPayload {
                order_id: order.id,
                driver: AssignedDriver {
                    driver_id: assignment.driver_id,
                    distance_meters: assignment.distance_meters,
                    duration_seconds: assignment.duration_seconds,
                },
            })),
            Err(err) => self.ride_failed(Some(order.id), &err),
        }
    }

    async fn cancel_ride(&self, order_id: OrderId) {
        let Some(Identity::Passenger(passenger_id)) = self.identity else {
            return self.status(false, "authenticate as a passenger first");
        };
        match self.coordinator.order(order_id).await {
            Ok(order) if order.passenger_id == passenger_id => {}
            Ok(_) | Err(DispatchError::OrderNotFound(_)) => {
                return self.status(false, format!("order {} not found", order_id));
            }
            Err(err) => return self.status(false, err.to_string()),
        }
        // Success is announced by the coordinator as `order_cancelled`.
        if let Err(err) = self.coordinator.cancel(order_id).await {
            self.status(false, err.to_string());
        }
    }

    async fn driver_location(&self, payload: DriverLocationPayload) {
        let Some(Identity::Driver(driver_id)) = self.identity else {
            debug!(connection = self.connection, "location ping from non-driver ignored");
            return;
        };
        let position = payload.position();
        if !position.is_valid() {
            debug!(driver_id = %driver_id, "invalid location ping ignored");
            return;
        }
        if let Err(err) = self.fleet.ping(driver_id, position).await {
            warn!(driver_id = %driver_id, error = %err, "position update failed");
        }
        if let Some(order_id) = payload.order_id {
            let router = self.coordinator.router();
            let assigned = router
                .subscription(order_id)
                .is_some_and(|subscription| subscription.driver == Some(driver_id));
            if !assigned {
                debug!(driver_id = %driver_id, order_id = %order_id, "ping for an order not assigned to this driver ignored");
                return;
            }
            let outcome = router.relay(driver_id, order_id, position);
            if outcome != RelayOutcome::Delivered {
                debug!(driver_id = %driver_id, order_id = %order_id, ?outcome, "ping not relayed");
            }
        }
    }

    async fn go_online(&self, payload: GoOnlinePayload) {
        let Some(Identity::Driver(driver_id)) = self.identity else {
            return self.status(false, "authenticate as a driver first");
        };
        let position = GeoPoint::new(payload.lat, payload.lng);
        match self
            .fleet
            .go_online(driver_id, position, payload.vehicle_type)
            .await
        {
            Ok(PresenceChange::Busy) => self.status(false, "finish the current order first"),
            Ok(_) => self.status(true, "online"),
            Err(err) => self.status(false, err.to_string()),
        }
    }

    async fn go_offline(&self) {
        let Some(Identity::Driver(driver_id)) = self.identity else {
            return self.status(false, "authenticate as a driver first");
        };
        match self.fleet.go_offline(driver_id).await {
            Ok(PresenceChange::Busy) => self.status(false, "finish the current order first"),
            Ok(_) => self.status(true, "offline"),
            Err(err) => self.status(false, err.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn static_tokens_resolve_or_reject() {
        let auth = StaticTokenAuthenticator::new()
            .with_token("p-1", Identity::Passenger(PassengerId(1)))
            .with_token("d-9", Identity::Driver(DriverId(9)));
        assert_eq!(
            auth.authenticate("d-9").await.expect("known"),
            Identity::Driver(DriverId(9))
        );
        assert!(matches!(
            auth.authenticate("nope").await,
            Err(AuthError::InvalidToken)
        ));
    }

    #[test]
    fn identities_map_to_their_rooms() {
        assert_eq!(
            Identity::Passenger(PassengerId(4)).room().to_string(),
            "user_4"
        );
        assert_eq!(Identity::Driver(DriverId(4)).room().to_string(), "driver_4");
    }
}
