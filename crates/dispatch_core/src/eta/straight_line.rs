use async_trait::async_trait;

use super::{EtaBatchClient, EtaEstimate, EtaItem, EtaItemError};
use crate::config::DEFAULT_AVG_SPEED_KMH;
use crate::domain::GeoPoint;
use crate::error::EtaError;
use crate::spatial::haversine_m;

/// Great-circle distance at a constant average speed.
///
/// Used as the default provider and as the fallback the coordinator applies
/// itself when a routed ETA is unavailable.
#[derive(Debug, Clone, Copy)]
pub struct StraightLineEta {
    avg_speed_kmh: f64,
}

impl Default for StraightLineEta {
    fn default() -> Self {
        Self::new(DEFAULT_AVG_SPEED_KMH)
    }
}

impl StraightLineEta {
    pub fn new(avg_speed_kmh: f64) -> Self {
        Self { avg_speed_kmh }
    }

    pub fn estimate(&self, origin: GeoPoint, destination: GeoPoint) -> EtaEstimate {
        let distance_meters = haversine_m(origin, destination);
        EtaEstimate {
            distance_meters,
            duration_seconds: self.duration_for(distance_meters),
        }
    }

    pub fn duration_for(&self, distance_meters: f64) -> f64 {
        if distance_meters <= 0.0 {
            return 0.0;
        }
        (distance_meters / 1000.0) / self.avg_speed_kmh * 3600.0
    }
}

#[async_trait]
impl EtaBatchClient for StraightLineEta {
    async fn batch_eta(
        &self,
        origins: &[GeoPoint],
        destination: GeoPoint,
    ) -> Result<Vec<EtaItem>, EtaError> {
        Ok(origins
            .iter()
            .map(|origin| {
                if origin.is_valid() {
                    Ok(self.estimate(*origin, destination))
                } else {
                    Err(EtaItemError::Unreachable("invalid origin".to_string()))
                }
            })
            .collect())
    }
}
