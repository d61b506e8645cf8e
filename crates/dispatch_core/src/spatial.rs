//! Spatial operations: H3 cell lookup, ring sizing and great-circle distance.
//!
//! This module provides:
//!
//! - **Haversine distance** between two [`GeoPoint`]s
//! - **Cell lookup**: map a coordinate to its H3 cell at a given resolution
//! - **Ring sizing**: how many grid rings cover a radius in kilometres
//! - **Grid disk cache**: LRU-cached `grid_disk` results shared across queries
//!
//! The geo index stores drivers at resolution 8 (~0.46 km edge) by default,
//! which keeps a 5 km search under a few hundred cells.

use std::num::NonZeroUsize;
use std::sync::{Mutex, OnceLock};

use h3o::{CellIndex, LatLng, Resolution};
use lru::LruCache;

use crate::domain::GeoPoint;
use crate::error::GeoIndexError;

/// Mean Earth radius used for all distance maths.
pub const EARTH_RADIUS_KM: f64 = 6371.0;

/// Rings beyond this count are cheaper to answer with a linear scan.
pub const MAX_GRID_RINGS: u32 = 64;

/// Great-circle distance in kilometres.
pub fn haversine_km(a: GeoPoint, b: GeoPoint) -> f64 {
    let (lat1, lon1) = (a.lat.to_radians(), a.lng.to_radians());
    let (lat2, lon2) = (b.lat.to_radians(), b.lng.to_radians());
    let dlat = lat2 - lat1;
    let dlon = lon2 - lon1;
    let sin_dlat = (dlat * 0.5).sin();
    let sin_dlon = (dlon * 0.5).sin();
    let h = sin_dlat * sin_dlat + lat1.cos() * lat2.cos() * sin_dlon * sin_dlon;
    let c = 2.0 * h.sqrt().atan2((1.0 - h).sqrt());
    EARTH_RADIUS_KM * c
}

pub fn haversine_m(a: GeoPoint, b: GeoPoint) -> f64 {
    haversine_km(a, b) * 1000.0
}

/// H3 cell containing `point` at `resolution`.
pub fn cell_for(point: GeoPoint, resolution: Resolution) -> Result<CellIndex, GeoIndexError> {
    LatLng::new(point.lat, point.lng)
        .map(|ll| ll.to_cell(resolution))
        .map_err(|_| GeoIndexError::InvalidCoordinate {
            lat: point.lat,
            lng: point.lng,
        })
}

/// Center of `cell` and the great-circle distance from it to the farthest
/// boundary vertex. Every point of the cell lies within that distance.
pub fn cell_anchor(cell: CellIndex) -> (GeoPoint, f64) {
    let center_ll = LatLng::from(cell);
    let center = GeoPoint::new(center_ll.lat(), center_ll.lng());
    let circumradius_km = cell
        .boundary()
        .iter()
        .map(|vertex| haversine_km(center, GeoPoint::new(vertex.lat(), vertex.lng())))
        .fold(0.0, f64::max);
    (center, circumradius_km)
}

/// Number of grid rings whose disk is guaranteed to contain every point within
/// `radius_km` of the origin cell's members.
///
/// Uses the average edge length as the ring step even though neighbouring
/// centers are ~1.7 edges apart, which absorbs the cell-size distortion H3
/// has away from the icosahedron face centers.
pub fn rings_for_radius(resolution: Resolution, radius_km: f64) -> u32 {
    let edge_km = resolution.edge_length_km();
    let rings = (radius_km / edge_km).ceil() + 1.0;
    if rings.is_finite() && rings < f64::from(u32::MAX) {
        rings.max(1.0) as u32
    } else {
        u32::MAX
    }
}

/// Grid disk cache for radius queries.
struct GridDiskCache {
    cache: Mutex<LruCache<(CellIndex, u32), Vec<CellIndex>>>,
}

impl GridDiskCache {
    fn new() -> Self {
        Self {
            cache: Mutex::new(LruCache::new(
                NonZeroUsize::new(2_048).unwrap_or(NonZeroUsize::MIN),
            )),
        }
    }

    fn get_or_compute(&self, origin: CellIndex, k: u32) -> Vec<CellIndex> {
        let mut cache = match self.cache.lock() {
            Ok(guard) => guard,
            Err(_) => return origin.grid_disk::<Vec<_>>(k), // poisoned: compute uncached
        };
        cache
            .get_or_insert((origin, k), || origin.grid_disk::<Vec<_>>(k))
            .clone()
    }
}

static GRID_DISK_CACHE: OnceLock<GridDiskCache> = OnceLock::new();

/// Cells within `k` rings of `origin`, cached.
pub fn grid_disk_cached(origin: CellIndex, k: u32) -> Vec<CellIndex> {
    GRID_DISK_CACHE
        .get_or_init(GridDiskCache::new)
        .get_or_compute(origin, k)
}

/// Coordinate `km` kilometres due north of `origin` (exact along a meridian).
pub fn offset_north(origin: GeoPoint, km: f64) -> GeoPoint {
    GeoPoint::new(origin.lat + (km / EARTH_RADIUS_KM).to_degrees(), origin.lng)
}

#[cfg(test)]
mod tests {
    use super::*;

    const TAIPEI_101: GeoPoint = GeoPoint::new(25.0330, 121.5654);

    #[test]
    fn cell_anchor_bounds_every_vertex() {
        let cell = cell_for(TAIPEI_101, Resolution::Seven).expect("cell");
        let (center, circumradius_km) = cell_anchor(cell);
        assert_eq!(cell_for(center, Resolution::Seven).expect("center cell"), cell);
        assert!(circumradius_km > 0.5 && circumradius_km < 3.0, "{circumradius_km}");
        assert!(haversine_km(center, TAIPEI_101) <= circumradius_km);
    }

    #[test]
    fn haversine_is_zero_for_same_point() {
        assert_eq!(haversine_km(TAIPEI_101, TAIPEI_101), 0.0);
    }

    #[test]
    fn offset_north_round_trips_through_haversine() {
        for km in [0.5, 1.0, 3.0, 4.9] {
            let moved = offset_north(TAIPEI_101, km);
            assert!((haversine_km(TAIPEI_101, moved) - km).abs() < 1e-9);
        }
    }

    #[test]
    fn rings_grow_with_radius() {
        let res = Resolution::Eight;
        assert!(rings_for_radius(res, 1.0) < rings_for_radius(res, 5.0));
        assert!(rings_for_radius(res, 0.0) >= 1);
    }

    #[test]
    fn cell_for_rejects_invalid_coordinates() {
        let err = cell_for(GeoPoint::new(f64::NAN, 0.0), Resolution::Eight);
        assert!(matches!(err, Err(GeoIndexError::InvalidCoordinate { .. })));
    }

    #[test]
    fn grid_disk_returns_neighbors_within_k() {
        let origin = cell_for(TAIPEI_101, Resolution::Eight).expect("valid cell");
        let cells = grid_disk_cached(origin, 2);

        assert!(cells.contains(&origin));
        for cell in cells {
            let distance = origin.grid_distance(cell).expect("grid distance");
            assert!(distance <= 2);
        }
    }
}
