//! Durable driver attributes used for scoring.
//!
//! [`DriverProfileSource`] is the raw collaborator (database, service, or the
//! in-memory store below) and may fail. [`DriverProfileStore`] wraps it with a
//! deadline and a documented conservative default, so callers always get a
//! profile back and a dispatch never fails because one lookup did.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::domain::DriverId;
use crate::error::ProfileError;

/// Rating assumed for a driver whose profile could not be read.
pub const DEFAULT_RATING: f64 = 2.0;
/// Cancellation rate assumed for a driver whose profile could not be read.
pub const DEFAULT_CANCELLATION_RATE: f64 = 0.5;
/// Duty factor assumed for a driver whose profile could not be read.
pub const DEFAULT_DUTY_FACTOR: f64 = 0.0;

pub const MAX_RATING: f64 = 5.0;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DriverProfile {
    /// 0-5 stars.
    pub rating: f64,
    /// 0-1.
    pub cancellation_rate: f64,
    /// Scheduling-priority multiplier, >= 0.
    pub duty_factor: f64,
}

impl DriverProfile {
    /// Low rating, elevated cancellation penalty, no duty bonus.
    pub const CONSERVATIVE: DriverProfile = DriverProfile {
        rating: DEFAULT_RATING,
        cancellation_rate: DEFAULT_CANCELLATION_RATE,
        duty_factor: DEFAULT_DUTY_FACTOR,
    };

    /// Clamp every field into its documented range; non-finite values fall
    /// back to the conservative default for that field.
    pub fn sanitized(self) -> Self {
        fn clamp(value: f64, min: f64, max: f64, fallback: f64) -> f64 {
            if value.is_finite() {
                value.clamp(min, max)
            } else {
                fallback
            }
        }
        Self {
            rating: clamp(self.rating, 0.0, MAX_RATING, DEFAULT_RATING),
            cancellation_rate: clamp(self.cancellation_rate, 0.0, 1.0, DEFAULT_CANCELLATION_RATE),
            duty_factor: clamp(self.duty_factor, 0.0, f64::MAX, DEFAULT_DUTY_FACTOR),
        }
    }
}

impl Default for DriverProfile {
    fn default() -> Self {
        Self::CONSERVATIVE
    }
}

/// How a finished assignment ended, for cancellation-rate bookkeeping.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TripOutcome {
    Completed,
    CancelledByDriver,
}

/// Raw profile backend.
#[async_trait]
pub trait DriverProfileSource: Send + Sync {
    async fn fetch_profile(&self, driver_id: DriverId) -> Result<DriverProfile, ProfileError>;

    async fn record_trip_outcome(
        &self,
        driver_id: DriverId,
        outcome: TripOutcome,
    ) -> Result<(), ProfileError>;
}

/// Where a profile handed to scoring came from.
#[derive(Debug, Clone, PartialEq)]
pub enum ProfileOrigin {
    Fetched,
    /// Lookup failed; the conservative default was substituted.
    Defaulted(String),
}

#[derive(Debug, Clone, PartialEq)]
pub struct ProfileLookup {
    pub profile: DriverProfile,
    pub origin: ProfileOrigin,
}

impl ProfileLookup {
    pub fn is_defaulted(&self) -> bool {
        matches!(self.origin, ProfileOrigin::Defaulted(_))
    }
}

/// Deadline-bounded, never-failing front for a [`DriverProfileSource`].
#[derive(Clone)]
pub struct DriverProfileStore {
    source: Arc<dyn DriverProfileSource>,
    deadline: Duration,
}

impl DriverProfileStore {
    pub fn new(source: Arc<dyn DriverProfileSource>, deadline: Duration) -> Self {
        Self { source, deadline }
    }

    /// Fetched profile, or [`DriverProfile::CONSERVATIVE`] on any failure.
    pub async fn get_profile(&self, driver_id: DriverId) -> ProfileLookup {
        let result = match tokio::time::timeout(self.deadline, self.source.fetch_profile(driver_id))
            .await
        {
            Ok(result) => result,
            Err(_) => Err(ProfileError::Timeout(self.deadline.as_millis() as u64)),
        };
        match result {
            Ok(profile) => ProfileLookup {
                profile: profile.sanitized(),
                origin: ProfileOrigin::Fetched,
            },
            Err(err) => {
                warn!(driver_id = %driver_id, error = %err, "profile lookup failed, using conservative default");
                ProfileLookup {
                    profile: DriverProfile::CONSERVATIVE,
                    origin: ProfileOrigin::Defaulted(err.to_string()),
                }
            }
        }
    }

    /// Best-effort; failures are logged and swallowed.
    pub async fn record_trip_outcome(&self, driver_id: DriverId, outcome: TripOutcome) {
        let call = self.source.record_trip_outcome(driver_id, outcome);
        match tokio::time::timeout(self.deadline, call).await {
            Ok(Ok(())) => {}
            Ok(Err(err)) => {
                warn!(driver_id = %driver_id, error = %err, ?outcome, "failed to record trip outcome")
            }
            Err(_) => warn!(driver_id = %driver_id, ?outcome, "recording trip outcome timed out"),
        }
    }
}

#[derive(Debug, Clone, Copy)]
struct ProfileRecord {
    rating: f64,
    duty_factor: f64,
    /// Seeded rate, used until the driver has trip history of its own.
    seeded_cancellation_rate: f64,
    trips_total: u64,
    trips_cancelled: u64,
}

impl ProfileRecord {
    fn profile(&self) -> DriverProfile {
        let cancellation_rate = if self.trips_total == 0 {
            self.seeded_cancellation_rate
        } else {
            self.trips_cancelled as f64 / self.trips_total as f64
        };
        DriverProfile {
            rating: self.rating,
            cancellation_rate,
            duty_factor: self.duty_factor,
        }
    }
}

/// In-process profile store with trip counters.
#[derive(Debug, Default)]
pub struct InMemoryProfileStore {
    records: DashMap<DriverId, ProfileRecord>,
}

impl InMemoryProfileStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, driver_id: DriverId, profile: DriverProfile) {
        self.records.insert(
            driver_id,
            ProfileRecord {
                rating: profile.rating,
                duty_factor: profile.duty_factor,
                seeded_cancellation_rate: profile.cancellation_rate,
                trips_total: 0,
                trips_cancelled: 0,
            },
        );
    }

    pub fn profile(&self, driver_id: DriverId) -> Option<DriverProfile> {
        self.records.get(&driver_id).map(|record| record.profile())
    }
}

#[async_trait]
impl DriverProfileSource for InMemoryProfileStore {
    async fn fetch_profile(&self, driver_id: DriverId) -> Result<DriverProfile, ProfileError> {
        self.profile(driver_id)
            .ok_or(ProfileError::NotFound(driver_id))
    }

    async fn record_trip_outcome(
        &self,
        driver_id: DriverId,
        outcome: TripOutcome,
    ) -> Result<(), ProfileError> {
        let mut record = self
            .records
            .get_mut(&driver_id)
            .ok_or(ProfileError::NotFound(driver_id))?;
        record.trips_total += 1;
        if outcome == TripOutcome::CancelledByDriver {
            record.trips_cancelled += 1;
        }
        Ok(())
    }
}
