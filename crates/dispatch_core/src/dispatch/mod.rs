//! Order dispatch: candidate retrieval, ETA-aware scoring, race-free claiming.
//!
//! A dispatch attempt runs:
//! 1. PENDING/NO_DRIVER_FOUND -> DISPATCHING on the order (compare-and-set).
//! 2. Radius query for AVAILABLE drivers of the requested vehicle type.
//! 3. Batch ETA and per-candidate profile lookups, concurrently.
//! 4. Score and rank (score desc, driver id asc).
//! 5. Claim loop: `cas_status(AVAILABLE -> PICKING_UP)` in rank order; the
//!    first success wins and later candidates are never touched.
//! 6. DISPATCHING -> ASSIGNED, bind the driver to the passenger's location
//!    subscription, notify the driver.
//!
//! A concurrent `cancel()` moves the order to CANCELLED with the same
//! compare-and-set, so exactly one side observes the driver as its own to
//! release.

mod candidates;
mod coordinator;

use serde::Serialize;

use crate::domain::{DriverId, DriverStatus, OrderId};

pub use candidates::Candidate;
pub use coordinator::{DispatchCoordinator, DispatchDeps};

/// Reduced-quality data a dispatch continued with instead of failing.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", content = "detail", rename_all = "snake_case")]
pub enum Degradation {
    /// The routing provider failed or timed out; all candidates ranked on
    /// straight-line distance.
    EtaBatchFailed(String),
    /// This many candidates had no routed ETA.
    EtaItemsMissing(usize),
    /// This many candidates were scored on the conservative default profile.
    ProfilesDefaulted(usize),
    /// Every profile lookup failed; profile terms were dropped from the score.
    DistanceOnly,
}

impl Degradation {
    pub fn affects_eta(&self) -> bool {
        matches!(
            self,
            Degradation::EtaBatchFailed(_) | Degradation::EtaItemsMissing(_)
        )
    }

    pub fn affects_profile(&self) -> bool {
        matches!(
            self,
            Degradation::ProfilesDefaulted(_) | Degradation::DistanceOnly
        )
    }
}

/// Successful dispatch.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Assignment {
    pub order_id: OrderId,
    pub driver_id: DriverId,
    pub score: f64,
    pub distance_meters: f64,
    pub duration_seconds: f64,
    /// False when the winner's ETA is a straight-line estimate.
    pub routed: bool,
    pub candidates_considered: usize,
    /// Higher-ranked candidates that were claimed by someone else first.
    pub claims_lost: usize,
    pub degradations: Vec<Degradation>,
}

/// Driver status once a trip is completed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum AfterTrip {
    #[default]
    Available,
    Offline,
}

impl AfterTrip {
    pub fn driver_status(self) -> DriverStatus {
        match self {
            AfterTrip::Available => DriverStatus::Available,
            AfterTrip::Offline => DriverStatus::Offline,
        }
    }
}
