//! Telemetry / KPIs: dispatch outcome counters.

use std::sync::atomic::{AtomicU64, Ordering};

use serde::Serialize;

use crate::dispatch::Degradation;

/// Lock-free counters shared by every dispatch in the process.
#[derive(Debug, Default)]
pub struct DispatchTelemetry {
    dispatches: AtomicU64,
    assignments: AtomicU64,
    no_candidates: AtomicU64,
    all_claims_failed: AtomicU64,
    infrastructure_failures: AtomicU64,
    lost_claims: AtomicU64,
    releases: AtomicU64,
    cancellations: AtomicU64,
    completed_trips: AtomicU64,
    eta_fallbacks: AtomicU64,
    profile_fallbacks: AtomicU64,
}

/// Point-in-time copy of [`DispatchTelemetry`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TelemetrySnapshot {
    pub dispatches: u64,
    pub assignments: u64,
    pub no_candidates: u64,
    pub all_claims_failed: u64,
    pub infrastructure_failures: u64,
    /// CAS attempts that lost to a concurrent dispatch.
    pub lost_claims: u64,
    /// Drivers put back to AVAILABLE after a cancel or abandon.
    pub releases: u64,
    pub cancellations: u64,
    pub completed_trips: u64,
    /// Dispatches where at least one candidate was ranked without a routed ETA.
    pub eta_fallbacks: u64,
    /// Dispatches where at least one candidate was scored on a default profile.
    pub profile_fallbacks: u64,
}

fn bump(counter: &AtomicU64) {
    counter.fetch_add(1, Ordering::Relaxed);
}

impl DispatchTelemetry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_dispatch(&self) {
        bump(&self.dispatches);
    }

    pub fn record_assignment(&self, degradations: &[Degradation]) {
        bump(&self.assignments);
        if degradations.iter().any(Degradation::affects_eta) {
            bump(&self.eta_fallbacks);
        }
        if degradations.iter().any(Degradation::affects_profile) {
            bump(&self.profile_fallbacks);
        }
    }

    pub fn record_no_candidates(&self) {
        bump(&self.no_candidates);
    }

    pub fn record_all_claims_failed(&self) {
        bump(&self.all_claims_failed);
    }

    pub fn record_infrastructure_failure(&self) {
        bump(&self.infrastructure_failures);
    }

    pub fn record_lost_claims(&self, count: u64) {
        self.lost_claims.fetch_add(count, Ordering::Relaxed);
    }

    pub fn record_release(&self) {
        bump(&self.releases);
    }

    pub fn record_cancellation(&self) {
        bump(&self.cancellations);
    }

    pub fn record_completed_trip(&self) {
        bump(&self.completed_trips);
    }

    pub fn snapshot(&self) -> TelemetrySnapshot {
        let load = |counter: &AtomicU64| counter.load(Ordering::Relaxed);
        TelemetrySnapshot {
            dispatches: load(&self.dispatches),
            assignments: load(&self.assignments),
            no_candidates: load(&self.no_candidates),
            all_claims_failed: load(&self.all_claims_failed),
            infrastructure_failures: load(&self.infrastructure_failures),
            lost_claims: load(&self.lost_claims),
            releases: load(&self.releases),
            cancellations: load(&self.cancellations),
            completed_trips: load(&self.completed_trips),
            eta_fallbacks: load(&self.eta_fallbacks),
            profile_fallbacks: load(&self.profile_fallbacks),
        }
    }
}
