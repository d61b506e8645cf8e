#![allow(dead_code)]

pub mod collaborators;

use dispatch_core::domain::{DriverId, OrderId, OrderStatus};
use dispatch_core::realtime::ServerEvent;
use dispatch_core::test_helpers::EngineFixture;
use tokio::sync::mpsc;

/// Everything currently queued on a receiver, without waiting.
pub fn drain(rx: &mut mpsc::Receiver<ServerEvent>) -> Vec<ServerEvent> {
    let mut events = Vec::new();
    while let Ok(event) = rx.try_recv() {
        events.push(event);
    }
    events
}

pub fn event_names(events: &[ServerEvent]) -> Vec<&'static str> {
    events.iter().map(ServerEvent::name).collect()
}

pub async fn order_status(fixture: &EngineFixture, order_id: OrderId) -> OrderStatus {
    fixture
        .coordinator
        .order(order_id)
        .await
        .expect("order exists")
        .status
}

pub fn ids(drivers: &[DriverId]) -> Vec<u64> {
    drivers.iter().map(|id| id.0).collect()
}
