use std::num::NonZeroUsize;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use h3o::Resolution;
use lru::LruCache;
use tokio::time::Instant;
use tracing::debug;

use super::{sort_by_distance, validate_query, DriverFilter, GeoIndex};
use crate::config::GeoIndexConfig;
use crate::domain::{DriverId, DriverSnapshot, DriverStatus, DriverUpdate, GeoPoint};
use crate::error::{ConfigError, GeoIndexError};
use crate::spatial::{cell_anchor, cell_for, haversine_km};

/// Coarse cell + radius (metres) + filter.
type QueryKey = (u64, u64, DriverFilter);

struct CachedQuery {
    fetched_at: Instant,
    drivers: Vec<DriverSnapshot>,
}

/// Short-TTL result cache in front of any [`GeoIndex`].
///
/// Radius queries are keyed by the coarse H3 cell of the pickup point, so
/// pickups a few hundred metres apart share one upstream query. That query is
/// centred on the cell and widened by the cell's circumradius, so it covers
/// the radius around every point of the cell. Distances are recomputed
/// against the actual center and the radius is re-applied on every call. Statuses in a cached result can be stale; `cas_status` is never
/// served from the cache and is what catches that.
pub struct CachedGeoIndex {
    inner: Arc<dyn GeoIndex>,
    cache: Mutex<LruCache<QueryKey, CachedQuery>>,
    key_resolution: Resolution,
    ttl: Duration,
}

impl CachedGeoIndex {
    pub fn new(
        inner: Arc<dyn GeoIndex>,
        key_resolution: Resolution,
        ttl: Duration,
        capacity: usize,
    ) -> Self {
        Self {
            inner,
            cache: Mutex::new(LruCache::new(
                NonZeroUsize::new(capacity).unwrap_or(NonZeroUsize::MIN),
            )),
            key_resolution,
            ttl,
        }
    }

    pub fn from_config(
        inner: Arc<dyn GeoIndex>,
        config: &GeoIndexConfig,
    ) -> Result<Self, ConfigError> {
        Ok(Self::new(
            inner,
            config.cache_resolution()?,
            config.query_cache_ttl(),
            config.query_cache_capacity,
        ))
    }

    fn lookup(&self, key: &QueryKey) -> Option<Vec<DriverSnapshot>> {
        let mut cache = self.cache.lock().ok()?;
        let entry = cache.get(key)?;
        let fresh = (entry.fetched_at.elapsed() < self.ttl).then(|| entry.drivers.clone());
        if fresh.is_none() {
            cache.pop(key);
        }
        fresh
    }

    fn store(&self, key: QueryKey, drivers: &[DriverSnapshot]) {
        if let Ok(mut cache) = self.cache.lock() {
            cache.put(
                key,
                CachedQuery {
                    fetched_at: Instant::now(),
                    drivers: drivers.to_vec(),
                },
            );
        }
    }

    pub fn clear(&self) {
        if let Ok(mut cache) = self.cache.lock() {
            cache.clear();
        }
    }
}

fn recenter(drivers: Vec<DriverSnapshot>, center: GeoPoint, radius_km: f64) -> Vec<DriverSnapshot> {
    let mut drivers: Vec<DriverSnapshot> = drivers
        .into_iter()
        .filter_map(|mut driver| {
            driver.distance_km = haversine_km(center, driver.position);
            (driver.distance_km <= radius_km).then_some(driver)
        })
        .collect();
    sort_by_distance(&mut drivers);
    drivers
}

#[async_trait]
impl GeoIndex for CachedGeoIndex {
    async fn upsert(&self, update: DriverUpdate) -> Result<(), GeoIndexError> {
        self.inner.upsert(update).await
    }

    async fn query_radius(
        &self,
        center: GeoPoint,
        radius_km: f64,
        filter: DriverFilter,
    ) -> Result<Vec<DriverSnapshot>, GeoIndexError> {
        validate_query(center, radius_km)?;
        let cell = cell_for(center, self.key_resolution)?;
        let key = (u64::from(cell), (radius_km * 1000.0).round() as u64, filter);

        if let Some(cached) = self.lookup(&key) {
            debug!(cell = key.0, radius_km, "geo query served from cache");
            return Ok(recenter(cached, center, radius_km));
        }

        let (anchor, circumradius_km) = cell_anchor(cell);
        let drivers = self
            .inner
            .query_radius(anchor, radius_km + circumradius_km, filter)
            .await?;
        self.store(key, &drivers);
        Ok(recenter(drivers, center, radius_km))
    }

    async fn cas_status(
        &self,
        driver_id: DriverId,
        expected: DriverStatus,
        new: DriverStatus,
    ) -> Result<bool, GeoIndexError> {
        self.inner.cas_status(driver_id, expected, new).await
    }

    async fn move_driver(
        &self,
        driver_id: DriverId,
        position: GeoPoint,
    ) -> Result<bool, GeoIndexError> {
        self.inner.move_driver(driver_id, position).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::VehicleType;
    use crate::geo_index::InMemoryGeoIndex;
    use crate::spatial::offset_north;

    const CENTER: GeoPoint = GeoPoint::new(25.0330, 121.5654);

    fn available(id: u64, km: f64) -> DriverUpdate {
        DriverUpdate {
            driver_id: DriverId(id),
            position: offset_north(CENTER, km),
            status: DriverStatus::Available,
            vehicle_type: VehicleType::Standard,
        }
    }

    fn cached_over(inner: Arc<InMemoryGeoIndex>) -> CachedGeoIndex {
        CachedGeoIndex::new(inner, Resolution::Seven, Duration::from_secs(10), 16)
    }

    #[tokio::test(start_paused = true)]
    async fn repeated_query_is_served_until_ttl_expires() {
        let inner = Arc::new(InMemoryGeoIndex::default());
        inner.upsert_driver(available(1, 1.0)).expect("upsert");
        let cached = cached_over(inner.clone());
        let filter = DriverFilter::available(VehicleType::Standard);

        assert_eq!(cached.query_radius(CENTER, 5.0, filter).await.expect("query").len(), 1);

        inner.upsert_driver(available(2, 2.0)).expect("upsert");
        assert_eq!(cached.query_radius(CENTER, 5.0, filter).await.expect("query").len(), 1);

        tokio::time::advance(Duration::from_secs(11)).await;
        assert_eq!(cached.query_radius(CENTER, 5.0, filter).await.expect("query").len(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn cas_bypasses_the_cache() {
        let inner = Arc::new(InMemoryGeoIndex::default());
        inner.upsert_driver(available(1, 1.0)).expect("upsert");
        let cached = cached_over(inner.clone());
        let filter = DriverFilter::available(VehicleType::Standard);
        cached.query_radius(CENTER, 5.0, filter).await.expect("warm");

        assert!(cached
            .cas_status(DriverId(1), DriverStatus::Available, DriverStatus::PickingUp)
            .await
            .expect("cas"));
        // The cached row still says AVAILABLE, but a second claim must fail.
        assert!(!cached
            .cas_status(DriverId(1), DriverStatus::Available, DriverStatus::PickingUp)
            .await
            .expect("cas"));
    }

    #[tokio::test(start_paused = true)]
    async fn cache_hit_recomputes_distance_for_new_center() {
        let inner = Arc::new(InMemoryGeoIndex::default());
        inner.upsert_driver(available(1, 1.0)).expect("upsert");
        let cached = cached_over(inner);
        let filter = DriverFilter::default();
        cached.query_radius(CENTER, 5.0, filter).await.expect("warm");

        let nearby_center = offset_north(CENTER, 0.1);
        let hit = cached
            .query_radius(nearby_center, 5.0, filter)
            .await
            .expect("hit");
        assert_eq!(hit.len(), 1);
        assert!((hit[0].distance_km - 0.9).abs() < 1e-6);
    }

    #[tokio::test(start_paused = true)]
    async fn hit_covers_drivers_only_in_range_of_the_new_center() {
        let cell = cell_for(CENTER, Resolution::Seven).expect("cell");
        let in_cell: Vec<f64> = (-20..=20)
            .map(|step| f64::from(step) * 0.05)
            .filter(|km| cell_for(offset_north(CENTER, *km), Resolution::Seven).ok() == Some(cell))
            .collect();
        let (south, north) = (in_cell[0], in_cell[in_cell.len() - 1]);
        let gap = north - south;
        assert!(gap >= 0.1, "cell too narrow along the meridian: {gap} km");

        // Just past 5 km from the southern pickup, inside 5 km of the northern one.
        let inner = Arc::new(InMemoryGeoIndex::default());
        inner
            .upsert_driver(available(1, south + 5.0 + gap / 2.0))
            .expect("upsert");
        let cached = cached_over(inner);
        let filter = DriverFilter::available(VehicleType::Standard);

        let from_south = cached
            .query_radius(offset_north(CENTER, south), 5.0, filter)
            .await
            .expect("miss");
        assert!(from_south.is_empty());
        let from_north = cached
            .query_radius(offset_north(CENTER, north), 5.0, filter)
            .await
            .expect("hit");
        assert_eq!(from_north.len(), 1);
        assert!((from_north[0].distance_km - (5.0 - gap / 2.0)).abs() < 1e-6);
    }
}
