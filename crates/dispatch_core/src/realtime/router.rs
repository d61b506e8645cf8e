use std::sync::Arc;

use dashmap::DashMap;
use tracing::{debug, trace};

use super::events::{DriverLocationPayload, ServerEvent};
use super::rooms::{Delivery, RoomId, RoomRegistry};
use crate::domain::{DriverId, GeoPoint, OrderId};

/// Where position pings for one order are delivered.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Subscription {
    pub channel: RoomId,
    /// Once bound, only this driver's pings are relayed.
    pub driver: Option<DriverId>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RelayOutcome {
    Delivered,
    /// No subscription for the order; the ping is dropped.
    NotSubscribed,
    /// The ping came from a driver other than the one bound to the order.
    DriverMismatch,
    /// Subscribed, but the channel had no live listener or was full.
    Dropped,
}

/// Order -> passenger channel map with at-most-once fan-out.
///
/// Only the owning order's lifecycle writes its entry, so there is no
/// cross-order contention on the map.
#[derive(Debug)]
pub struct LocationBroadcastRouter {
    rooms: Arc<RoomRegistry>,
    subscriptions: DashMap<OrderId, Subscription>,
}

impl LocationBroadcastRouter {
    pub fn new(rooms: Arc<RoomRegistry>) -> Self {
        Self {
            rooms,
            subscriptions: DashMap::new(),
        }
    }

    pub fn rooms(&self) -> &Arc<RoomRegistry> {
        &self.rooms
    }

    /// Register `channel` for `order_id`, replacing any earlier registration.
    pub fn subscribe(&self, order_id: OrderId, channel: RoomId) {
        self.subscriptions.insert(
            order_id,
            Subscription {
                channel,
                driver: None,
            },
        );
        debug!(order_id = %order_id, %channel, "subscribed");
    }

    /// Restrict relays for `order_id` to `driver_id`. False when the order
    /// has no subscription.
    pub fn bind_driver(&self, order_id: OrderId, driver_id: DriverId) -> bool {
        match self.subscriptions.get_mut(&order_id) {
            Some(mut subscription) => {
                subscription.driver = Some(driver_id);
                true
            }
            None => false,
        }
    }

    pub fn unsubscribe(&self, order_id: OrderId) -> bool {
        let removed = self.subscriptions.remove(&order_id).is_some();
        if removed {
            debug!(order_id = %order_id, "unsubscribed");
        }
        removed
    }

    pub fn subscription(&self, order_id: OrderId) -> Option<Subscription> {
        self.subscriptions.get(&order_id).map(|entry| *entry)
    }

    pub fn len(&self) -> usize {
        self.subscriptions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.subscriptions.is_empty()
    }

    /// Forward one position ping to the passenger waiting on `order_id`.
    pub fn relay(
        &self,
        driver_id: DriverId,
        order_id: OrderId,
        position: GeoPoint,
    ) -> RelayOutcome {
        let Some(subscription) = self.subscription(order_id) else {
            trace!(order_id = %order_id, driver_id = %driver_id, "no subscription, ping dropped");
            return RelayOutcome::NotSubscribed;
        };
        if subscription.driver.is_some_and(|bound| bound != driver_id) {
            debug!(order_id = %order_id, driver_id = %driver_id, "ping from unassigned driver ignored");
            return RelayOutcome::DriverMismatch;
        }
        let event = ServerEvent::DriverLocation(DriverLocationPayload {
            order_id: Some(order_id),
            lat: position.lat,
            lng: position.lng,
        });
        match self.rooms.emit(subscription.channel, event) {
            Delivery::Delivered => RelayOutcome::Delivered,
            Delivery::NoListener | Delivery::Dropped => RelayOutcome::Dropped,
        }
    }

    /// Send an arbitrary event to whoever is subscribed to `order_id`.
    pub fn publish(&self, order_id: OrderId, event: ServerEvent) -> Delivery {
        match self.subscription(order_id) {
            Some(subscription) => self.rooms.emit(subscription.channel, event),
            None => Delivery::NoListener,
        }
    }
}

#[cfg(test)]
mod tests {
    use tokio::sync::mpsc;

    use super::*;
    use crate::domain::PassengerId;

    fn router() -> LocationBroadcastRouter {
        LocationBroadcastRouter::new(Arc::new(RoomRegistry::new()))
    }

    #[tokio::test]
    async fn bound_driver_is_the_only_accepted_sender() {
        let router = router();
        let room = RoomId::Passenger(PassengerId(1));
        let (tx, mut rx) = mpsc::channel(4);
        router.rooms().join(room, 1, tx);
        router.subscribe(OrderId(8), room);
        assert!(router.bind_driver(OrderId(8), DriverId(3)));

        let here = GeoPoint::new(25.03, 121.56);
        assert_eq!(
            router.relay(DriverId(4), OrderId(8), here),
            RelayOutcome::DriverMismatch
        );
        assert_eq!(
            router.relay(DriverId(3), OrderId(8), here),
            RelayOutcome::Delivered
        );
        assert!(matches!(rx.recv().await, Some(ServerEvent::DriverLocation(_))));
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn resubscribe_replaces_the_channel() {
        let router = router();
        router.subscribe(OrderId(1), RoomId::Passenger(PassengerId(1)));
        router.subscribe(OrderId(1), RoomId::Passenger(PassengerId(2)));
        assert_eq!(router.len(), 1);
        assert_eq!(
            router.subscription(OrderId(1)).map(|s| s.channel),
            Some(RoomId::Passenger(PassengerId(2)))
        );
    }

    #[test]
    fn subscribed_but_disconnected_passenger_drops_silently() {
        let router = router();
        router.subscribe(OrderId(2), RoomId::Passenger(PassengerId(5)));
        assert_eq!(
            router.relay(DriverId(1), OrderId(2), GeoPoint::new(25.0, 121.5)),
            RelayOutcome::Dropped
        );
        assert!(!router.bind_driver(OrderId(3), DriverId(1)));
    }
}
