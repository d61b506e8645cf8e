//! Batch ETA providers: many driver origins, one pickup destination.
//!
//! Implementations, selectable via [`EtaProviderKind`]:
//!
//! - **`StraightLineEta`**: Haversine distance at a fixed average speed. Zero dependencies.
//! - **`OsrmTableClient`** (feature `osrm`): OSRM `/table` HTTP endpoint.
//!
//! A provider may fail individual origins (unreachable from the road network)
//! without failing the batch. The whole batch only fails on transport errors
//! or when [`fetch_etas`] hits its deadline, in which case the coordinator
//! ranks on straight-line distance instead.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::domain::GeoPoint;
use crate::error::EtaError;

pub mod osrm;
pub mod straight_line;

pub use straight_line::StraightLineEta;

/// Routed distance and duration for one origin.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EtaEstimate {
    pub distance_meters: f64,
    pub duration_seconds: f64,
}

/// Why a single origin could not be routed.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum EtaItemError {
    #[error("origin unreachable: {0}")]
    Unreachable(String),
    #[error("provider returned no value for this origin")]
    Missing,
}

pub type EtaItem = Result<EtaEstimate, EtaItemError>;

/// Routing provider contract. Results are aligned with `origins` by index.
#[async_trait]
pub trait EtaBatchClient: Send + Sync {
    async fn batch_eta(
        &self,
        origins: &[GeoPoint],
        destination: GeoPoint,
    ) -> Result<Vec<EtaItem>, EtaError>;
}

/// Which routing backend to use.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum EtaProviderKind {
    #[default]
    StraightLine,
    /// OSRM HTTP endpoint (e.g. `"http://localhost:5000"`).
    #[cfg(feature = "osrm")]
    Osrm { endpoint: String },
}

/// Construct a provider from its descriptor.
pub fn build_eta_client(kind: &EtaProviderKind, avg_speed_kmh: f64) -> Arc<dyn EtaBatchClient> {
    match kind {
        EtaProviderKind::StraightLine => Arc::new(StraightLineEta::new(avg_speed_kmh)),
        #[cfg(feature = "osrm")]
        EtaProviderKind::Osrm { endpoint } => Arc::new(osrm::OsrmTableClient::new(endpoint)),
    }
}

/// Outcome of one deadline-bounded batch call.
#[derive(Debug)]
pub enum EtaBatch {
    /// Per-origin results, same length and order as the request.
    Resolved(Vec<EtaItem>),
    /// Nothing usable; rank on straight-line distance.
    Failed(EtaError),
}

impl EtaBatch {
    /// Result for origin `index`, `None` when the whole batch failed.
    pub fn item(&self, index: usize) -> Option<&EtaItem> {
        match self {
            EtaBatch::Resolved(items) => items.get(index),
            EtaBatch::Failed(_) => None,
        }
    }

    pub fn is_failed(&self) -> bool {
        matches!(self, EtaBatch::Failed(_))
    }
}

/// Call `client` under a hard deadline and check the result is aligned.
pub async fn fetch_etas(
    client: &dyn EtaBatchClient,
    origins: &[GeoPoint],
    destination: GeoPoint,
    deadline: Duration,
) -> EtaBatch {
    if origins.is_empty() {
        return EtaBatch::Resolved(Vec::new());
    }
    match tokio::time::timeout(deadline, client.batch_eta(origins, destination)).await {
        Err(_) => EtaBatch::Failed(EtaError::Timeout(deadline.as_millis() as u64)),
        Ok(Err(err)) => EtaBatch::Failed(err),
        Ok(Ok(items)) if items.len() != origins.len() => {
            EtaBatch::Failed(EtaError::LengthMismatch {
                expected: origins.len(),
                returned: items.len(),
            })
        }
        Ok(Ok(items)) => EtaBatch::Resolved(items),
    }
}
