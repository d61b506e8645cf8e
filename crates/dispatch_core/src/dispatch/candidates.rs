use crate::config::DispatchConfig;
use crate::domain::{DriverId, DriverSnapshot, GeoPoint, Order};
use crate::eta::{EtaBatch, StraightLineEta};
use crate::profile::{DriverProfile, ProfileLookup};
use crate::scoring::{rank, score, ScoreInputs, Scored};

use super::Degradation;

/// A driver under consideration for one dispatch attempt. Never persisted.
#[derive(Debug, Clone, PartialEq)]
pub struct Candidate {
    pub driver_id: DriverId,
    pub position: GeoPoint,
    pub straight_line_km: f64,
    pub distance_meters: f64,
    pub duration_seconds: f64,
    /// True when distance/duration came from the routing provider.
    pub routed: bool,
    pub profile: DriverProfile,
    pub profile_defaulted: bool,
    pub score: f64,
}

impl Scored for Candidate {
    fn score(&self) -> f64 {
        self.score
    }

    fn driver_id(&self) -> DriverId {
        self.driver_id
    }
}

#[derive(Debug, Default)]
pub(crate) struct RankedCandidates {
    pub candidates: Vec<Candidate>,
    pub degradations: Vec<Degradation>,
}

/// Join query rows with their ETA and profile, score, and rank best-first.
///
/// `profiles` is aligned with `snapshots`. A candidate whose ETA is missing
/// falls back to straight-line distance at the configured average speed and
/// loses `unrouted_penalty` points; it is dropped only when even the
/// straight-line distance is unusable.
pub(crate) fn rank_candidates(
    order: &Order,
    snapshots: &[DriverSnapshot],
    etas: &EtaBatch,
    profiles: &[ProfileLookup],
    config: &DispatchConfig,
) -> RankedCandidates {
    let fallback = StraightLineEta::new(config.avg_speed_kmh);
    let defaulted = profiles.iter().filter(|lookup| lookup.is_defaulted()).count();
    let distance_only = !profiles.is_empty() && defaulted == profiles.len();

    let mut unrouted = 0usize;
    let mut candidates: Vec<Candidate> = snapshots
        .iter()
        .zip(profiles)
        .enumerate()
        .filter_map(|(index, (snapshot, lookup))| {
            let routed = match etas.item(index) {
                Some(Ok(estimate))
                    if estimate.distance_meters.is_finite()
                        && estimate.duration_seconds.is_finite() =>
                {
                    Some(*estimate)
                }
                _ => None,
            };
            let (distance_meters, duration_seconds) = match routed {
                Some(estimate) => (estimate.distance_meters, estimate.duration_seconds),
                None => {
                    if !snapshot.distance_km.is_finite() {
                        return None;
                    }
                    unrouted += 1;
                    let meters = snapshot.distance_km * 1000.0;
                    (meters, fallback.duration_for(meters))
                }
            };

            let mut inputs = ScoreInputs {
                distance_meters,
                duration_seconds,
                rating: lookup.profile.rating,
                cancellation_rate: lookup.profile.cancellation_rate,
                duty_factor: lookup.profile.duty_factor,
                surge_multiplier: order.surge_multiplier.max(0.0),
            };
            if distance_only {
                inputs.rating = 0.0;
                inputs.cancellation_rate = 0.0;
                inputs.duty_factor = 0.0;
            }
            let mut value = score(&config.scoring, &inputs);
            if routed.is_none() {
                value -= config.unrouted_penalty;
            }

            Some(Candidate {
                driver_id: snapshot.driver_id,
                position: snapshot.position,
                straight_line_km: snapshot.distance_km,
                distance_meters,
                duration_seconds,
                routed: routed.is_some(),
                profile: lookup.profile,
                profile_defaulted: lookup.is_defaulted(),
                score: value,
            })
        })
        .collect();
    rank(&mut candidates);

    let mut degradations = Vec::new();
    match etas {
        EtaBatch::Failed(err) => degradations.push(Degradation::EtaBatchFailed(err.to_string())),
        EtaBatch::Resolved(_) if unrouted > 0 => {
            degradations.push(Degradation::EtaItemsMissing(unrouted))
        }
        EtaBatch::Resolved(_) => {}
    }
    if distance_only {
        degradations.push(Degradation::DistanceOnly);
    } else if defaulted > 0 {
        degradations.push(Degradation::ProfilesDefaulted(defaulted));
    }

    RankedCandidates {
        candidates,
        degradations,
    }
}
