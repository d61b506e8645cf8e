//! Candidate scoring: a pure, deterministic function of candidate attributes.
//!
//! ```text
//! score = BASE
//!       - distance_m   * W_DIST
//!       - duration_s   * W_TIME
//!       + rating       * W_RATING
//!       - cancel_rate  * W_CANCEL
//!       + duty_factor  * W_DUTY
//!       + surge        * W_SURGE
//! ```
//!
//! Higher score wins; equal scores fall back to the lower driver id so
//! rankings are reproducible.

use std::cmp::Ordering;

use serde::{Deserialize, Serialize};

use crate::domain::DriverId;
use crate::error::ConfigError;

/// Starting score before any factor is applied.
pub const DEFAULT_BASE: f64 = 1000.0;
/// Penalty per metre of routed pickup distance.
pub const DEFAULT_W_DIST: f64 = 0.1;
/// Penalty per second of routed pickup duration.
pub const DEFAULT_W_TIME: f64 = 0.5;
/// Bonus per rating star (0-5).
pub const DEFAULT_W_RATING: f64 = 50.0;
/// Penalty per unit of cancellation rate (0-1).
pub const DEFAULT_W_CANCEL: f64 = 100.0;
/// Bonus per unit of duty factor.
pub const DEFAULT_W_DUTY: f64 = 50.0;
/// Bonus per unit of surge multiplier.
pub const DEFAULT_W_SURGE: f64 = 150.0;

/// Scoring weights. Every weight is a finite, nonnegative real.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ScoringWeights {
    #[serde(rename = "BASE", alias = "base")]
    pub base: f64,
    #[serde(rename = "W_DIST", alias = "distance")]
    pub distance: f64,
    #[serde(rename = "W_TIME", alias = "time")]
    pub time: f64,
    #[serde(rename = "W_RATING", alias = "rating")]
    pub rating: f64,
    #[serde(rename = "W_CANCEL", alias = "cancellation")]
    pub cancellation: f64,
    #[serde(rename = "W_DUTY", alias = "duty")]
    pub duty: f64,
    #[serde(rename = "W_SURGE", alias = "surge")]
    pub surge: f64,
}

impl Default for ScoringWeights {
    fn default() -> Self {
        Self {
            base: DEFAULT_BASE,
            distance: DEFAULT_W_DIST,
            time: DEFAULT_W_TIME,
            rating: DEFAULT_W_RATING,
            cancellation: DEFAULT_W_CANCEL,
            duty: DEFAULT_W_DUTY,
            surge: DEFAULT_W_SURGE,
        }
    }
}

impl ScoringWeights {
    pub fn validate(&self) -> Result<(), ConfigError> {
        let fields = [
            ("scoring.BASE", self.base),
            ("scoring.W_DIST", self.distance),
            ("scoring.W_TIME", self.time),
            ("scoring.W_RATING", self.rating),
            ("scoring.W_CANCEL", self.cancellation),
            ("scoring.W_DUTY", self.duty),
            ("scoring.W_SURGE", self.surge),
        ];
        for (field, value) in fields {
            if !value.is_finite() || value < 0.0 {
                return Err(ConfigError::Invalid {
                    field,
                    reason: format!("must be a finite nonnegative number, got {value}"),
                });
            }
        }
        Ok(())
    }
}

/// Everything the score depends on. Profile fields are zeroed when a dispatch
/// runs in distance-only mode.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct ScoreInputs {
    pub distance_meters: f64,
    pub duration_seconds: f64,
    pub rating: f64,
    pub cancellation_rate: f64,
    pub duty_factor: f64,
    pub surge_multiplier: f64,
}

pub fn score(weights: &ScoringWeights, inputs: &ScoreInputs) -> f64 {
    weights.base - inputs.distance_meters * weights.distance
        - inputs.duration_seconds * weights.time
        + inputs.rating * weights.rating
        - inputs.cancellation_rate * weights.cancellation
        + inputs.duty_factor * weights.duty
        + inputs.surge_multiplier * weights.surge
}

/// Anything that can be placed in a ranking.
pub trait Scored {
    fn score(&self) -> f64;
    fn driver_id(&self) -> DriverId;
}

/// Score descending, then driver id ascending. NaN scores sort last.
pub fn rank_order<T: Scored>(a: &T, b: &T) -> Ordering {
    let (sa, sb) = (a.score(), b.score());
    match (sa.is_nan(), sb.is_nan()) {
        (true, false) => return Ordering::Greater,
        (false, true) => return Ordering::Less,
        _ => {}
    }
    sb.partial_cmp(&sa)
        .unwrap_or(Ordering::Equal)
        .then_with(|| a.driver_id().cmp(&b.driver_id()))
}

/// Sort `items` best-first.
pub fn rank<T: Scored>(items: &mut [T]) {
    items.sort_by(rank_order);
}
