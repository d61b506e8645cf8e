//! Misbehaving collaborators for exercising degradation and race paths.

use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use dispatch_core::domain::{DriverId, DriverSnapshot, DriverStatus, DriverUpdate, GeoPoint};
use dispatch_core::error::{EtaError, GeoIndexError, ProfileError};
use dispatch_core::eta::{EtaBatchClient, EtaItem};
use dispatch_core::geo_index::{DriverFilter, GeoIndex, InMemoryGeoIndex};
use dispatch_core::profile::{DriverProfile, DriverProfileSource, TripOutcome};
use tokio::sync::Notify;

/// In-memory index with hooks: rival claims that land right before ours,
/// a CAS call log, and a switch that makes radius queries fail.
pub struct ScriptedGeoIndex {
    inner: Arc<InMemoryGeoIndex>,
    stolen: Mutex<HashSet<DriverId>>,
    cas_log: Mutex<Vec<DriverId>>,
    queries_fail: AtomicBool,
}

impl ScriptedGeoIndex {
    pub fn new(inner: Arc<InMemoryGeoIndex>) -> Self {
        Self {
            inner,
            stolen: Mutex::new(HashSet::new()),
            cas_log: Mutex::new(Vec::new()),
            queries_fail: AtomicBool::new(false),
        }
    }

    /// A concurrent dispatch claims `driver_id` between our query and our CAS.
    pub fn steal_before_claim(&self, driver_id: DriverId) {
        self.stolen.lock().expect("stolen lock").insert(driver_id);
    }

    pub fn fail_queries(&self) {
        self.queries_fail.store(true, Ordering::SeqCst);
    }

    pub fn cas_attempts(&self) -> Vec<DriverId> {
        self.cas_log.lock().expect("log lock").clone()
    }
}

#[async_trait]
impl GeoIndex for ScriptedGeoIndex {
    async fn upsert(&self, update: DriverUpdate) -> Result<(), GeoIndexError> {
        self.inner.upsert_driver(update)
    }

    async fn query_radius(
        &self,
        center: GeoPoint,
        radius_km: f64,
        filter: DriverFilter,
    ) -> Result<Vec<DriverSnapshot>, GeoIndexError> {
        if self.queries_fail.load(Ordering::SeqCst) {
            return Err(GeoIndexError::Unavailable("connection refused".to_string()));
        }
        self.inner.nearby(center, radius_km, filter)
    }

    async fn cas_status(
        &self,
        driver_id: DriverId,
        expected: DriverStatus,
        new: DriverStatus,
    ) -> Result<bool, GeoIndexError> {
        self.cas_log.lock().expect("log lock").push(driver_id);
        if self.stolen.lock().expect("stolen lock").remove(&driver_id) {
            let rival = (DriverStatus::Available, DriverStatus::PickingUp);
            self.inner
                .compare_and_set_status(driver_id, rival.0, rival.1)?;
        }
        self.inner.compare_and_set_status(driver_id, expected, new)
    }

    async fn move_driver(
        &self,
        driver_id: DriverId,
        position: GeoPoint,
    ) -> Result<bool, GeoIndexError> {
        self.inner.relocate(driver_id, position)
    }
}

/// Pauses on one status transition until released, so a test can act
/// inside the window between two steps of a dispatch.
pub struct GatedGeoIndex {
    inner: Arc<InMemoryGeoIndex>,
    transition: (DriverStatus, DriverStatus),
    before_apply: bool,
    pub paused: Notify,
    pub release: Notify,
}

impl GatedGeoIndex {
    /// Holds right after a successful AVAILABLE -> PICKING_UP claim.
    pub fn after_claim(inner: Arc<InMemoryGeoIndex>) -> Self {
        Self::gate(inner, (DriverStatus::Available, DriverStatus::PickingUp), false)
    }

    /// Holds before the `from` -> `to` CAS touches the store.
    pub fn before_move(inner: Arc<InMemoryGeoIndex>, from: DriverStatus, to: DriverStatus) -> Self {
        Self::gate(inner, (from, to), true)
    }

    fn gate(
        inner: Arc<InMemoryGeoIndex>,
        transition: (DriverStatus, DriverStatus),
        before_apply: bool,
    ) -> Self {
        Self {
            inner,
            transition,
            before_apply,
            paused: Notify::new(),
            release: Notify::new(),
        }
    }

    async fn hold(&self) {
        self.paused.notify_one();
        self.release.notified().await;
    }
}

#[async_trait]
impl GeoIndex for GatedGeoIndex {
    async fn upsert(&self, update: DriverUpdate) -> Result<(), GeoIndexError> {
        self.inner.upsert_driver(update)
    }

    async fn query_radius(
        &self,
        center: GeoPoint,
        radius_km: f64,
        filter: DriverFilter,
    ) -> Result<Vec<DriverSnapshot>, GeoIndexError> {
        self.inner.nearby(center, radius_km, filter)
    }

    async fn cas_status(
        &self,
        driver_id: DriverId,
        expected: DriverStatus,
        new: DriverStatus,
    ) -> Result<bool, GeoIndexError> {
        let gated = (expected, new) == self.transition;
        if gated && self.before_apply {
            self.hold().await;
        }
        let applied = self.inner.compare_and_set_status(driver_id, expected, new)?;
        if gated && applied && !self.before_apply {
            self.hold().await;
        }
        Ok(applied)
    }

    async fn move_driver(
        &self,
        driver_id: DriverId,
        position: GeoPoint,
    ) -> Result<bool, GeoIndexError> {
        self.inner.relocate(driver_id, position)
    }
}

/// Profile backend that is down.
pub struct UnreachableProfiles;

#[async_trait]
impl DriverProfileSource for UnreachableProfiles {
    async fn fetch_profile(&self, _driver_id: DriverId) -> Result<DriverProfile, ProfileError> {
        Err(ProfileError::Unavailable("connection refused".to_string()))
    }

    async fn record_trip_outcome(
        &self,
        _driver_id: DriverId,
        _outcome: TripOutcome,
    ) -> Result<(), ProfileError> {
        Err(ProfileError::Unavailable("connection refused".to_string()))
    }
}

/// Routing provider that never answers.
pub struct StalledEta;

#[async_trait]
impl EtaBatchClient for StalledEta {
    async fn batch_eta(
        &self,
        _origins: &[GeoPoint],
        _destination: GeoPoint,
    ) -> Result<Vec<EtaItem>, EtaError> {
        tokio::time::sleep(Duration::from_secs(3600)).await;
        Err(EtaError::Api("unreachable".to_string()))
    }
}
