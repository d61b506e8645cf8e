use std::collections::HashMap;
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};

use async_trait::async_trait;
use h3o::{CellIndex, Resolution};

use super::{sort_by_distance, validate_query, DriverFilter, GeoIndex};
use crate::config::GeoIndexConfig;
use crate::domain::{DriverId, DriverSnapshot, DriverStatus, DriverUpdate, GeoPoint, VehicleType};
use crate::error::{ConfigError, GeoIndexError};
use crate::spatial::{cell_for, grid_disk_cached, haversine_km, rings_for_radius, MAX_GRID_RINGS};

#[derive(Debug, Clone, Copy)]
struct DriverRecord {
    position: GeoPoint,
    cell: CellIndex,
    status: DriverStatus,
    vehicle_type: VehicleType,
}

/// H3 cell -> driver buckets plus the reverse mapping for O(1) moves.
#[derive(Debug, Default)]
struct DriverCells {
    drivers: HashMap<DriverId, DriverRecord>,
    by_cell: HashMap<CellIndex, Vec<DriverId>>,
}

impl DriverCells {
    fn remove_from_cell(&mut self, driver_id: DriverId, cell: CellIndex) {
        if let Some(ids) = self.by_cell.get_mut(&cell) {
            ids.retain(|&id| id != driver_id);
            if ids.is_empty() {
                self.by_cell.remove(&cell);
            }
        }
    }

    fn add_to_cell(&mut self, driver_id: DriverId, cell: CellIndex) {
        self.by_cell.entry(cell).or_default().push(driver_id);
    }

    fn insert(&mut self, driver_id: DriverId, record: DriverRecord) {
        match self.drivers.insert(driver_id, record) {
            Some(previous) if previous.cell == record.cell => {}
            Some(previous) => {
                self.remove_from_cell(driver_id, previous.cell);
                self.add_to_cell(driver_id, record.cell);
            }
            None => self.add_to_cell(driver_id, record.cell),
        }
    }

    fn relocate(&mut self, driver_id: DriverId, position: GeoPoint, cell: CellIndex) -> bool {
        let Some(record) = self.drivers.get_mut(&driver_id) else {
            return false;
        };
        let old_cell = record.cell;
        record.position = position;
        record.cell = cell;
        if old_cell != cell {
            self.remove_from_cell(driver_id, old_cell);
            self.add_to_cell(driver_id, cell);
        }
        true
    }

    fn snapshot(
        &self,
        driver_id: DriverId,
        center: GeoPoint,
        radius_km: f64,
        filter: &DriverFilter,
    ) -> Option<DriverSnapshot> {
        let record = self.drivers.get(&driver_id)?;
        if !filter.matches(record.status, record.vehicle_type) {
            return None;
        }
        let distance_km = haversine_km(center, record.position);
        (distance_km <= radius_km).then_some(DriverSnapshot {
            driver_id,
            position: record.position,
            status: record.status,
            vehicle_type: record.vehicle_type,
            distance_km,
        })
    }
}

/// In-process geo index bucketing drivers by H3 cell.
///
/// All state sits behind one `RwLock`; `cas_status` holds the write lock for
/// the compare and the swap, so it is atomic with respect to every other
/// call.
#[derive(Debug)]
pub struct InMemoryGeoIndex {
    resolution: Resolution,
    state: RwLock<DriverCells>,
}

impl Default for InMemoryGeoIndex {
    fn default() -> Self {
        Self::new(Resolution::Eight)
    }
}

impl InMemoryGeoIndex {
    pub fn new(resolution: Resolution) -> Self {
        Self {
            resolution,
            state: RwLock::new(DriverCells::default()),
        }
    }

    pub fn from_config(config: &GeoIndexConfig) -> Result<Self, ConfigError> {
        Ok(Self::new(config.resolution()?))
    }

    pub fn resolution(&self) -> Resolution {
        self.resolution
    }

    fn read(&self) -> Result<RwLockReadGuard<'_, DriverCells>, GeoIndexError> {
        self.state
            .read()
            .map_err(|_| GeoIndexError::Unavailable("geo index lock poisoned".to_string()))
    }

    fn write(&self) -> Result<RwLockWriteGuard<'_, DriverCells>, GeoIndexError> {
        self.state
            .write()
            .map_err(|_| GeoIndexError::Unavailable("geo index lock poisoned".to_string()))
    }

    /// Synchronous body of [`GeoIndex::upsert`].
    pub fn upsert_driver(&self, update: DriverUpdate) -> Result<(), GeoIndexError> {
        let cell = cell_for(update.position, self.resolution)?;
        let record = DriverRecord {
            position: update.position,
            cell,
            status: update.status,
            vehicle_type: update.vehicle_type,
        };
        self.write()?.insert(update.driver_id, record);
        Ok(())
    }

    /// Synchronous body of [`GeoIndex::query_radius`].
    pub fn nearby(
        &self,
        center: GeoPoint,
        radius_km: f64,
        filter: DriverFilter,
    ) -> Result<Vec<DriverSnapshot>, GeoIndexError> {
        validate_query(center, radius_km)?;
        let center_cell = cell_for(center, self.resolution)?;
        let rings = rings_for_radius(self.resolution, radius_km);

        let state = self.read()?;
        let mut found: Vec<DriverSnapshot> = if rings > MAX_GRID_RINGS {
            state
                .drivers
                .keys()
                .filter_map(|id| state.snapshot(*id, center, radius_km, &filter))
                .collect()
        } else {
            grid_disk_cached(center_cell, rings)
                .iter()
                .filter_map(|cell| state.by_cell.get(cell))
                .flatten()
                .filter_map(|id| state.snapshot(*id, center, radius_km, &filter))
                .collect()
        };
        drop(state);

        sort_by_distance(&mut found);
        Ok(found)
    }

    /// Synchronous body of [`GeoIndex::cas_status`].
    pub fn compare_and_set_status(
        &self,
        driver_id: DriverId,
        expected: DriverStatus,
        new: DriverStatus,
    ) -> Result<bool, GeoIndexError> {
        let mut state = self.write()?;
        match state.drivers.get_mut(&driver_id) {
            Some(record) if record.status == expected => {
                record.status = new;
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    /// Synchronous body of [`GeoIndex::move_driver`].
    pub fn relocate(&self, driver_id: DriverId, position: GeoPoint) -> Result<bool, GeoIndexError> {
        let cell = cell_for(position, self.resolution)?;
        Ok(self.write()?.relocate(driver_id, position, cell))
    }

    /// Current status, for observation only. Never feed this into a write.
    pub fn status_of(&self, driver_id: DriverId) -> Option<DriverStatus> {
        self.read()
            .ok()?
            .drivers
            .get(&driver_id)
            .map(|record| record.status)
    }

    pub fn position_of(&self, driver_id: DriverId) -> Option<GeoPoint> {
        self.read()
            .ok()?
            .drivers
            .get(&driver_id)
            .map(|record| record.position)
    }

    pub fn len(&self) -> usize {
        self.read().map(|state| state.drivers.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait]
impl GeoIndex for InMemoryGeoIndex {
    async fn upsert(&self, update: DriverUpdate) -> Result<(), GeoIndexError> {
        self.upsert_driver(update)
    }

    async fn query_radius(
        &self,
        center: GeoPoint,
        radius_km: f64,
        filter: DriverFilter,
    ) -> Result<Vec<DriverSnapshot>, GeoIndexError> {
        self.nearby(center, radius_km, filter)
    }

    async fn cas_status(
        &self,
        driver_id: DriverId,
        expected: DriverStatus,
        new: DriverStatus,
    ) -> Result<bool, GeoIndexError> {
        self.compare_and_set_status(driver_id, expected, new)
    }

    async fn move_driver(
        &self,
        driver_id: DriverId,
        position: GeoPoint,
    ) -> Result<bool, GeoIndexError> {
        self.relocate(driver_id, position)
    }
}
