use std::sync::Arc;

use async_trait::async_trait;

use super::events::{NewOrderPayload, OrderCancelledPayload, ServerEvent};
use super::rooms::{Delivery, RoomId, RoomRegistry};
use crate::domain::{DriverId, Order, OrderId};
use crate::error::NotifyError;

/// Tells a driver about assignments made or withdrawn.
#[async_trait]
pub trait DriverNotifier: Send + Sync {
    async fn notify_assignment(
        &self,
        driver_id: DriverId,
        order: &Order,
    ) -> Result<(), NotifyError>;

    async fn notify_cancelled(
        &self,
        driver_id: DriverId,
        order_id: OrderId,
    ) -> Result<(), NotifyError>;
}

/// Emits into the driver's own room on the real-time transport.
#[derive(Debug, Clone)]
pub struct RoomDriverNotifier {
    rooms: Arc<RoomRegistry>,
}

impl RoomDriverNotifier {
    pub fn new(rooms: Arc<RoomRegistry>) -> Self {
        Self { rooms }
    }

    fn send(&self, driver_id: DriverId, event: ServerEvent) -> Result<(), NotifyError> {
        match self.rooms.emit(RoomId::Driver(driver_id), event) {
            Delivery::Delivered => Ok(()),
            Delivery::NoListener => Err(NotifyError::DriverOffline(driver_id)),
            Delivery::Dropped => Err(NotifyError::Undeliverable(driver_id)),
        }
    }
}

#[async_trait]
impl DriverNotifier for RoomDriverNotifier {
    async fn notify_assignment(
        &self,
        driver_id: DriverId,
        order: &Order,
    ) -> Result<(), NotifyError> {
        self.send(
            driver_id,
            ServerEvent::NewOrder(NewOrderPayload {
                order_id: order.id,
                pickup: order.pickup,
                dropoff: order.dropoff,
                vehicle_type: order.vehicle_type,
            }),
        )
    }

    async fn notify_cancelled(
        &self,
        driver_id: DriverId,
        order_id: OrderId,
    ) -> Result<(), NotifyError> {
        self.send(
            driver_id,
            ServerEvent::OrderCancelled(OrderCancelledPayload { order_id }),
        )
    }
}
