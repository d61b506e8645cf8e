//! Core data model: identifiers, coordinates, driver and order state machines.

use std::fmt;

use serde::{Deserialize, Serialize};

macro_rules! numeric_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(
            Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
        )]
        #[serde(transparent)]
        pub struct $name(pub u64);

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.0)
            }
        }
    };
}

numeric_id!(
    /// Driver identifier. Lower ids win score ties.
    DriverId
);
numeric_id!(OrderId);
numeric_id!(PassengerId);

/// WGS84 coordinate in degrees.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GeoPoint {
    pub lat: f64,
    pub lng: f64,
}

impl GeoPoint {
    pub const fn new(lat: f64, lng: f64) -> Self {
        Self { lat, lng }
    }

    /// True when both components are finite and inside the WGS84 range.
    pub fn is_valid(&self) -> bool {
        self.lat.is_finite()
            && self.lng.is_finite()
            && (-90.0..=90.0).contains(&self.lat)
            && (-180.0..=180.0).contains(&self.lng)
    }
}

/// Service class a driver offers and a passenger asks for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VehicleType {
    #[default]
    Standard,
    Luxury,
    Taxi,
}

impl fmt::Display for VehicleType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            VehicleType::Standard => "standard",
            VehicleType::Luxury => "luxury",
            VehicleType::Taxi => "taxi",
        };
        f.write_str(name)
    }
}

/// Driver availability as stored in the geo index.
///
/// ```text
/// OFFLINE <-> AVAILABLE
/// AVAILABLE --claim--> PICKING_UP
/// PICKING_UP --trip starts--> ON_TRIP
/// PICKING_UP --release--> AVAILABLE
/// ON_TRIP --trip ends--> AVAILABLE | OFFLINE
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DriverStatus {
    Offline,
    Available,
    PickingUp,
    OnTrip,
}

impl DriverStatus {
    pub fn can_transition_to(self, next: DriverStatus) -> bool {
        use DriverStatus::*;
        matches!(
            (self, next),
            (Offline, Available)
                | (Available, Offline)
                | (Available, PickingUp)
                | (PickingUp, OnTrip)
                | (PickingUp, Available)
                | (OnTrip, Available)
                | (OnTrip, Offline)
        )
    }
}

impl fmt::Display for DriverStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            DriverStatus::Offline => "OFFLINE",
            DriverStatus::Available => "AVAILABLE",
            DriverStatus::PickingUp => "PICKING_UP",
            DriverStatus::OnTrip => "ON_TRIP",
        };
        f.write_str(name)
    }
}

/// Order lifecycle.
///
/// `NoDriverFound` is terminal for the attempt but the caller may dispatch
/// again; `Dispatching -> Pending` is the revert taken when infrastructure
/// is unreachable.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OrderStatus {
    Pending,
    Dispatching,
    Assigned,
    NoDriverFound,
    InProgress,
    Completed,
    Cancelled,
}

impl OrderStatus {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            OrderStatus::NoDriverFound | OrderStatus::Completed | OrderStatus::Cancelled
        )
    }

    /// Statuses from which `dispatch()` may start.
    pub fn is_dispatchable(self) -> bool {
        matches!(self, OrderStatus::Pending | OrderStatus::NoDriverFound)
    }

    pub fn can_transition_to(self, next: OrderStatus) -> bool {
        use OrderStatus::*;
        if next == Cancelled {
            return !self.is_terminal();
        }
        matches!(
            (self, next),
            (Pending, Dispatching)
                | (NoDriverFound, Dispatching)
                | (Dispatching, Assigned)
                | (Dispatching, NoDriverFound)
                | (Dispatching, Pending)
                | (Assigned, InProgress)
                | (InProgress, Completed)
        )
    }
}

impl fmt::Display for OrderStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            OrderStatus::Pending => "PENDING",
            OrderStatus::Dispatching => "DISPATCHING",
            OrderStatus::Assigned => "ASSIGNED",
            OrderStatus::NoDriverFound => "NO_DRIVER_FOUND",
            OrderStatus::InProgress => "IN_PROGRESS",
            OrderStatus::Completed => "COMPLETED",
            OrderStatus::Cancelled => "CANCELLED",
        };
        f.write_str(name)
    }
}

/// A passenger's request before it is persisted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RideRequest {
    pub passenger_id: PassengerId,
    pub pickup: GeoPoint,
    pub dropoff: GeoPoint,
    #[serde(default)]
    pub vehicle_type: VehicleType,
    /// Demand bonus fed into scoring; 0 when surge is off.
    #[serde(default)]
    pub surge_multiplier: f64,
}

/// Persisted order record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Order {
    pub id: OrderId,
    pub passenger_id: PassengerId,
    pub pickup: GeoPoint,
    pub dropoff: GeoPoint,
    pub vehicle_type: VehicleType,
    pub surge_multiplier: f64,
    pub status: OrderStatus,
    pub driver_id: Option<DriverId>,
}

impl Order {
    pub fn from_request(id: OrderId, request: RideRequest) -> Self {
        Self {
            id,
            passenger_id: request.passenger_id,
            pickup: request.pickup,
            dropoff: request.dropoff,
            vehicle_type: request.vehicle_type,
            surge_multiplier: request.surge_multiplier,
            status: OrderStatus::Pending,
            driver_id: None,
        }
    }
}

/// Full driver write for `GeoIndex::upsert` (last write wins).
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DriverUpdate {
    pub driver_id: DriverId,
    pub position: GeoPoint,
    pub status: DriverStatus,
    pub vehicle_type: VehicleType,
}

/// One row of a radius query. Not guaranteed fresh by the time it is read.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DriverSnapshot {
    pub driver_id: DriverId,
    pub position: GeoPoint,
    pub status: DriverStatus,
    pub vehicle_type: VehicleType,
    /// Great-circle distance from the query center.
    pub distance_km: f64,
}
