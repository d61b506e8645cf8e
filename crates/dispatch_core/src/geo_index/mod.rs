//! Driver position/status store with radius queries and an atomic status CAS.
//!
//! Two implementations:
//!
//! - **`InMemoryGeoIndex`**: H3-bucketed store, the default backend and the
//!   one every test runs against.
//! - **`CachedGeoIndex`**: short-TTL result cache in front of any other index.
//!   Only `query_radius` is cached; writes and `cas_status` always pass through.
//!
//! `cas_status` is the only way a driver's status may be changed after
//! registration. Callers never read a status and write it back.

use async_trait::async_trait;

use crate::domain::{DriverId, DriverSnapshot, DriverStatus, DriverUpdate, GeoPoint, VehicleType};
use crate::error::GeoIndexError;

pub mod cached;
pub mod memory;

pub use cached::CachedGeoIndex;
pub use memory::InMemoryGeoIndex;

/// Which drivers a radius query returns. `None` matches everything.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct DriverFilter {
    pub status: Option<DriverStatus>,
    pub vehicle_type: Option<VehicleType>,
}

impl DriverFilter {
    /// Available drivers offering `vehicle_type`.
    pub fn available(vehicle_type: VehicleType) -> Self {
        Self {
            status: Some(DriverStatus::Available),
            vehicle_type: Some(vehicle_type),
        }
    }

    pub fn matches(&self, status: DriverStatus, vehicle_type: VehicleType) -> bool {
        self.status.map_or(true, |s| s == status)
            && self.vehicle_type.map_or(true, |v| v == vehicle_type)
    }
}

/// Geospatial driver store.
#[async_trait]
pub trait GeoIndex: Send + Sync {
    /// Insert or overwrite a driver (last write wins).
    async fn upsert(&self, update: DriverUpdate) -> Result<(), GeoIndexError>;

    /// Drivers within `radius_km` of `center` matching `filter`, nearest first
    /// (ties by driver id). An empty result is not an error.
    async fn query_radius(
        &self,
        center: GeoPoint,
        radius_km: f64,
        filter: DriverFilter,
    ) -> Result<Vec<DriverSnapshot>, GeoIndexError>;

    /// Set `new` iff the stored status equals `expected`. Unknown drivers fail.
    async fn cas_status(
        &self,
        driver_id: DriverId,
        expected: DriverStatus,
        new: DriverStatus,
    ) -> Result<bool, GeoIndexError>;

    /// Move a known driver without touching its status. Returns false for
    /// unknown drivers.
    async fn move_driver(&self, driver_id: DriverId, position: GeoPoint)
        -> Result<bool, GeoIndexError>;
}

pub(crate) fn validate_query(center: GeoPoint, radius_km: f64) -> Result<(), GeoIndexError> {
    if !center.is_valid() {
        return Err(GeoIndexError::InvalidCoordinate {
            lat: center.lat,
            lng: center.lng,
        });
    }
    if !radius_km.is_finite() || radius_km < 0.0 {
        return Err(GeoIndexError::InvalidRadius(radius_km));
    }
    Ok(())
}

/// Nearest first, then lower driver id.
pub(crate) fn sort_by_distance(drivers: &mut [DriverSnapshot]) {
    drivers.sort_by(|a, b| {
        a.distance_km
            .total_cmp(&b.distance_km)
            .then_with(|| a.driver_id.cmp(&b.driver_id))
    });
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_filter_matches_everything() {
        let filter = DriverFilter::default();
        assert!(filter.matches(DriverStatus::OnTrip, VehicleType::Luxury));
    }

    #[test]
    fn available_filter_checks_both_fields() {
        let filter = DriverFilter::available(VehicleType::Taxi);
        assert!(filter.matches(DriverStatus::Available, VehicleType::Taxi));
        assert!(!filter.matches(DriverStatus::Available, VehicleType::Standard));
        assert!(!filter.matches(DriverStatus::PickingUp, VehicleType::Taxi));
    }

    #[test]
    fn negative_radius_is_invalid() {
        let center = GeoPoint::new(25.0, 121.5);
        assert!(matches!(
            validate_query(center, -1.0),
            Err(GeoIndexError::InvalidRadius(_))
        ));
        assert!(validate_query(center, 0.0).is_ok());
    }
}
