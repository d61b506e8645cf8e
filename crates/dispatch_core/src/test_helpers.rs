//! Test helpers for common test setup and utilities.
//!
//! This module provides shared fixtures so unit tests, integration tests and
//! benches wire the engine the same way.

use std::sync::Arc;

use tokio::sync::mpsc;

use crate::config::DispatchConfig;
use crate::dispatch::{DispatchCoordinator, DispatchDeps};
use crate::domain::{
    DriverId, DriverStatus, DriverUpdate, GeoPoint, PassengerId, RideRequest, VehicleType,
};
use crate::eta::build_eta_client;
use crate::fleet::FleetPresence;
use crate::geo_index::InMemoryGeoIndex;
use crate::orders::InMemoryOrderRepository;
use crate::profile::{DriverProfile, InMemoryProfileStore};
use crate::realtime::{
    ConnectionId, LocationBroadcastRouter, RoomDriverNotifier, RoomId, RoomRegistry, ServerEvent,
};
use crate::spatial::offset_north;
use crate::telemetry::DispatchTelemetry;

/// Pickup point shared by every fixture (Taipei 101).
pub const TEST_PICKUP: GeoPoint = GeoPoint::new(25.0330, 121.5654);

/// Buffer size of outboxes created by [`EngineFixture::connect`].
pub const TEST_OUTBOX_CAPACITY: usize = 32;

/// `km` kilometres due north of [`TEST_PICKUP`].
pub fn north_of_pickup(km: f64) -> GeoPoint {
    offset_north(TEST_PICKUP, km)
}

/// Standard-class request from `passenger` with a dropoff 5 km north.
pub fn ride_request(passenger: u64, pickup: GeoPoint) -> RideRequest {
    RideRequest {
        passenger_id: PassengerId(passenger),
        pickup,
        dropoff: offset_north(pickup, 5.0),
        vehicle_type: VehicleType::Standard,
        surge_multiplier: 0.0,
    }
}

/// AVAILABLE driver `km` north of [`TEST_PICKUP`].
pub fn available_driver(id: u64, km: f64, vehicle_type: VehicleType) -> DriverUpdate {
    DriverUpdate {
        driver_id: DriverId(id),
        position: north_of_pickup(km),
        status: DriverStatus::Available,
        vehicle_type,
    }
}

/// The profile every fixture driver gets unless a test overrides it.
pub fn standard_profile() -> DriverProfile {
    DriverProfile {
        rating: 4.5,
        cancellation_rate: 0.05,
        duty_factor: 1.0,
    }
}

/// In-memory engine: geo index, profiles, orders, rooms and a coordinator.
pub struct EngineFixture {
    pub config: DispatchConfig,
    pub geo: Arc<InMemoryGeoIndex>,
    pub profiles: Arc<InMemoryProfileStore>,
    pub orders: Arc<InMemoryOrderRepository>,
    pub rooms: Arc<RoomRegistry>,
    pub router: Arc<LocationBroadcastRouter>,
    pub telemetry: Arc<DispatchTelemetry>,
    pub fleet: Arc<FleetPresence>,
    pub coordinator: Arc<DispatchCoordinator>,
}

impl Default for EngineFixture {
    fn default() -> Self {
        Self::new()
    }
}

impl EngineFixture {
    pub fn new() -> Self {
        Self::with_config(DispatchConfig::default())
    }

    pub fn with_config(config: DispatchConfig) -> Self {
        let geo = Arc::new(InMemoryGeoIndex::default());
        let profiles = Arc::new(InMemoryProfileStore::new());
        let orders = Arc::new(InMemoryOrderRepository::new());
        let rooms = Arc::new(RoomRegistry::new());
        let router = Arc::new(LocationBroadcastRouter::new(rooms.clone()));
        let telemetry = Arc::new(DispatchTelemetry::new());
        let fleet = Arc::new(FleetPresence::new(geo.clone(), config.timeouts.cas()));
        let deps = DispatchDeps {
            geo: geo.clone(),
            eta: build_eta_client(&config.eta_provider, config.avg_speed_kmh),
            profiles: profiles.clone(),
            orders: orders.clone(),
            notifier: Arc::new(RoomDriverNotifier::new(rooms.clone())),
            router: router.clone(),
            telemetry: telemetry.clone(),
        };
        let coordinator = Arc::new(DispatchCoordinator::new(deps, config.clone()));
        Self {
            config,
            geo,
            profiles,
            orders,
            rooms,
            router,
            telemetry,
            fleet,
            coordinator,
        }
    }

    /// The fixture's own collaborators, for building a coordinator with one
    /// of them swapped out.
    pub fn deps(&self) -> DispatchDeps {
        DispatchDeps {
            geo: self.geo.clone(),
            eta: build_eta_client(&self.config.eta_provider, self.config.avg_speed_kmh),
            profiles: self.profiles.clone(),
            orders: self.orders.clone(),
            notifier: Arc::new(RoomDriverNotifier::new(self.rooms.clone())),
            router: self.router.clone(),
            telemetry: self.telemetry.clone(),
        }
    }

    pub fn coordinator_with(&self, deps: DispatchDeps) -> Arc<DispatchCoordinator> {
        Arc::new(DispatchCoordinator::new(deps, self.config.clone()))
    }

    /// Register an AVAILABLE driver `km` north of the pickup with
    /// [`standard_profile`].
    pub fn add_driver(&self, id: u64, km: f64, vehicle_type: VehicleType) {
        self.add_driver_with_profile(id, km, vehicle_type, standard_profile());
    }

    pub fn add_driver_with_profile(
        &self,
        id: u64,
        km: f64,
        vehicle_type: VehicleType,
        profile: DriverProfile,
    ) {
        self.geo
            .upsert_driver(available_driver(id, km, vehicle_type))
            .expect("fixture driver upsert");
        self.profiles.insert(DriverId(id), profile);
    }

    pub fn driver_status(&self, id: u64) -> Option<DriverStatus> {
        self.geo.status_of(DriverId(id))
    }

    /// Join `room` with a fresh connection and return its receiving end.
    pub fn connect(&self, room: RoomId) -> (ConnectionId, mpsc::Receiver<ServerEvent>) {
        let (tx, rx) = mpsc::channel(TEST_OUTBOX_CAPACITY);
        let connection = self.rooms.allocate_connection_id();
        self.rooms.join(room, connection, tx);
        (connection, rx)
    }
}
