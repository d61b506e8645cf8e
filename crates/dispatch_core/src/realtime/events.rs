//! Wire messages exchanged with connected passenger and driver clients.
//!
//! Every frame is `{"event": "<name>", "data": {...}}` with camelCase payload
//! fields.

use serde::{Deserialize, Serialize};

use crate::domain::{DriverId, GeoPoint, OrderId, VehicleType};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", content = "data", rename_all = "snake_case")]
pub enum ClientEvent {
    Authenticate(AuthenticatePayload),
    RequestRide(RequestRidePayload),
    CancelRide(CancelRidePayload),
    #[serde(alias = "driver_location_update")]
    DriverLocation(DriverLocationPayload),
    GoOnline(GoOnlinePayload),
    GoOffline,
}

impl ClientEvent {
    pub fn from_json(frame: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(frame)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", content = "data", rename_all = "snake_case")]
pub enum ServerEvent {
    StatusUpdate(StatusPayload),
    /// Sent right before the connection is closed.
    AuthError(StatusPayload),
    OrderConfirmed(OrderConfirmedPayload),
    RideRequestFailed(RideRequestFailedPayload),
    DriverLocation(DriverLocationPayload),
    NewOrder(NewOrderPayload),
    OrderCancelled(OrderCancelledPayload),
}

impl ServerEvent {
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }

    pub fn name(&self) -> &'static str {
        match self {
            ServerEvent::StatusUpdate(_) => "status_update",
            ServerEvent::AuthError(_) => "auth_error",
            ServerEvent::OrderConfirmed(_) => "order_confirmed",
            ServerEvent::RideRequestFailed(_) => "ride_request_failed",
            ServerEvent::DriverLocation(_) => "driver_location",
            ServerEvent::NewOrder(_) => "new_order",
            ServerEvent::OrderCancelled(_) => "order_cancelled",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuthenticatePayload {
    pub token: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RequestRidePayload {
    pub pickup: GeoPoint,
    pub dropoff: GeoPoint,
    #[serde(default)]
    pub vehicle_type: VehicleType,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CancelRidePayload {
    pub order_id: OrderId,
}

/// A driver position ping. `order_id` is absent while the driver is idle.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DriverLocationPayload {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub order_id: Option<OrderId>,
    pub lat: f64,
    pub lng: f64,
}

impl DriverLocationPayload {
    pub fn position(&self) -> GeoPoint {
        GeoPoint::new(self.lat, self.lng)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GoOnlinePayload {
    pub lat: f64,
    pub lng: f64,
    #[serde(default)]
    pub vehicle_type: VehicleType,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StatusPayload {
    pub success: bool,
    pub message: String,
}

impl StatusPayload {
    pub fn ok(message: impl Into<String>) -> Self {
        Self {
            success: true,
            message: message.into(),
        }
    }

    pub fn failed(message: impl Into<String>) -> Self {
        Self {
            success: false,
            message: message.into(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AssignedDriver {
    pub driver_id: DriverId,
    pub distance_meters: f64,
    pub duration_seconds: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OrderConfirmedPayload {
    pub order_id: OrderId,
    pub driver: AssignedDriver,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RideRequestFailedPayload {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub order_id: Option<OrderId>,
    pub message: String,
    /// Whether the passenger may simply ask again.
    pub retryable: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewOrderPayload {
    pub order_id: OrderId,
    pub pickup: GeoPoint,
    pub dropoff: GeoPoint,
    pub vehicle_type: VehicleType,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OrderCancelledPayload {
    pub order_id: OrderId,
}
