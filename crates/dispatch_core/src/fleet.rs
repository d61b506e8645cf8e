//! Driver presence: the OFFLINE <-> AVAILABLE heartbeat and position pings.
//!
//! Status changes go through `cas_status` like everywhere else, so a driver
//! that was claimed between two heartbeats is never flipped back.

use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, info};

use crate::domain::{DriverId, DriverStatus, DriverUpdate, GeoPoint, VehicleType};
use crate::error::GeoIndexError;
use crate::geo_index::GeoIndex;

/// What a presence call did to the driver's status.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PresenceChange {
    /// The driver moved to the requested status.
    Changed,
    /// Already in the requested status.
    Unchanged,
    /// The driver is busy with an order (PICKING_UP or ON_TRIP).
    Busy,
}

pub struct FleetPresence {
    geo: Arc<dyn GeoIndex>,
    deadline: Duration,
}

impl FleetPresence {
    pub fn new(geo: Arc<dyn GeoIndex>, deadline: Duration) -> Self {
        Self { geo, deadline }
    }

    async fn bounded<T>(
        &self,
        call: impl std::future::Future<Output = Result<T, GeoIndexError>>,
    ) -> Result<T, GeoIndexError> {
        tokio::time::timeout(self.deadline, call)
            .await
            .map_err(|_| GeoIndexError::Timeout(self.deadline.as_millis() as u64))?
    }

    /// Record the driver's position and make them AVAILABLE if OFFLINE.
    pub async fn go_online(
        &self,
        driver_id: DriverId,
        position: GeoPoint,
        vehicle_type: VehicleType,
    ) -> Result<PresenceChange, GeoIndexError> {
        if !self.bounded(self.geo.move_driver(driver_id, position)).await? {
            self.bounded(self.geo.upsert(DriverUpdate {
                driver_id,
                position,
                status: DriverStatus::Available,
                vehicle_type,
            }))
            .await?;
            info!(driver_id = %driver_id, %vehicle_type, "driver registered and online");
            return Ok(PresenceChange::Changed);
        }
        self.flip(driver_id, DriverStatus::Offline, DriverStatus::Available)
            .await
    }

    /// Take an idle driver off the market. Busy drivers stay as they are.
    pub async fn go_offline(&self, driver_id: DriverId) -> Result<PresenceChange, GeoIndexError> {
        self.flip(driver_id, DriverStatus::Available, DriverStatus::Offline)
            .await
    }

    /// Position-only update. Returns false for unknown drivers.
    pub async fn ping(
        &self,
        driver_id: DriverId,
        position: GeoPoint,
    ) -> Result<bool, GeoIndexError> {
        self.bounded(self.geo.move_driver(driver_id, position)).await
    }

    async fn flip(
        &self,
        driver_id: DriverId,
        from: DriverStatus,
        to: DriverStatus,
    ) -> Result<PresenceChange, GeoIndexError> {
        if self.bounded(self.geo.cas_status(driver_id, from, to)).await? {
            info!(driver_id = %driver_id, %from, %to, "driver presence changed");
            return Ok(PresenceChange::Changed);
        }
        // Nothing to read the status with but CAS; test it with an identity swap.
        if self.bounded(self.geo.cas_status(driver_id, to, to)).await? {
            return Ok(PresenceChange::Unchanged);
        }
        debug!(driver_id = %driver_id, %to, "presence change skipped, driver busy");
        Ok(PresenceChange::Busy)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::geo_index::InMemoryGeoIndex;

    const HOME: GeoPoint = GeoPoint::new(25.0330, 121.5654);

    fn fleet() -> (Arc<InMemoryGeoIndex>, FleetPresence) {
        let geo = Arc::new(InMemoryGeoIndex::default());
        let fleet = FleetPresence::new(geo.clone(), Duration::from_millis(250));
        (geo, fleet)
    }

    #[tokio::test]
    async fn heartbeat_toggles_between_offline_and_available() {
        let (geo, fleet) = fleet();
        let id = DriverId(1);

        assert_eq!(
            fleet.go_online(id, HOME, VehicleType::Standard).await.expect("online"),
            PresenceChange::Changed
        );
        assert_eq!(geo.status_of(id), Some(DriverStatus::Available));
        assert_eq!(
            fleet.go_online(id, HOME, VehicleType::Standard).await.expect("online"),
            PresenceChange::Unchanged
        );
        assert_eq!(fleet.go_offline(id).await.expect("offline"), PresenceChange::Changed);
        assert_eq!(geo.status_of(id), Some(DriverStatus::Offline));
        assert_eq!(
            fleet.go_online(id, HOME, VehicleType::Standard).await.expect("online"),
            PresenceChange::Changed
        );
    }

    #[tokio::test]
    async fn claimed_driver_cannot_go_offline() {
        let (geo, fleet) = fleet();
        let id = DriverId(2);
        fleet.go_online(id, HOME, VehicleType::Taxi).await.expect("online");
        assert!(geo
            .compare_and_set_status(id, DriverStatus::Available, DriverStatus::PickingUp)
            .expect("cas"));

        assert_eq!(fleet.go_offline(id).await.expect("offline"), PresenceChange::Busy);
        assert_eq!(geo.status_of(id), Some(DriverStatus::PickingUp));
    }

    #[tokio::test]
    async fn ping_moves_without_touching_status() {
        let (geo, fleet) = fleet();
        let id = DriverId(3);
        assert!(!fleet.ping(id, HOME).await.expect("ping"));

        fleet.go_online(id, HOME, VehicleType::Standard).await.expect("online");
        fleet.go_offline(id).await.expect("offline");
        let moved = GeoPoint::new(25.04, 121.57);
        assert!(fleet.ping(id, moved).await.expect("ping"));
        assert_eq!(geo.position_of(id), Some(moved));
        assert_eq!(geo.status_of(id), Some(DriverStatus::Offline));
    }
}
