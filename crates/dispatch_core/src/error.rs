//! Error taxonomy for the dispatch engine.
//!
//! Collaborator errors (`GeoIndexError`, `EtaError`, `ProfileError`, ...) stay
//! close to the seam that produces them. Only [`DispatchError`] reaches the
//! passenger-facing entry point, and of its variants only `NoCandidatesFound`,
//! `AllClaimsFailed` and `InfrastructureUnavailable` describe a failed
//! dispatch attempt. Missing ETA or profile data is absorbed as a
//! [`crate::dispatch::Degradation`] instead.

use thiserror::Error;

use crate::domain::{DriverId, OrderId, OrderStatus};

/// Failures of the geospatial store (positions, statuses, CAS).
#[derive(Debug, Error)]
pub enum GeoIndexError {
    #[error("geo index unavailable: {0}")]
    Unavailable(String),
    #[error("geo index call timed out after {0} ms")]
    Timeout(u64),
    #[error("invalid coordinate ({lat}, {lng})")]
    InvalidCoordinate { lat: f64, lng: f64 },
    #[error("invalid search radius {0} km")]
    InvalidRadius(f64),
}

/// Whole-batch failures of the routing provider.
#[derive(Debug, Error)]
pub enum EtaError {
    #[error("routing provider timed out after {0} ms")]
    Timeout(u64),
    #[error("routing provider returned {returned} results for {expected} origins")]
    LengthMismatch { expected: usize, returned: usize },
    #[error("routing provider error: {0}")]
    Api(String),
    #[cfg(feature = "osrm")]
    #[error("routing provider HTTP error: {0}")]
    Http(#[from] reqwest::Error),
}

/// Failures of the durable driver profile store.
#[derive(Debug, Error)]
pub enum ProfileError {
    #[error("no profile for driver {0}")]
    NotFound(DriverId),
    #[error("profile lookup timed out after {0} ms")]
    Timeout(u64),
    #[error("profile store unavailable: {0}")]
    Unavailable(String),
}

/// Failures of the order persistence layer.
#[derive(Debug, Error)]
pub enum OrderStoreError {
    #[error("order {0} not found")]
    NotFound(OrderId),
    #[error("order {id} is {actual}, expected {expected} before moving to {target}")]
    Conflict {
        id: OrderId,
        expected: OrderStatus,
        actual: OrderStatus,
        target: OrderStatus,
    },
    #[error("order store call timed out after {0} ms")]
    Timeout(u64),
    #[error("order store unavailable: {0}")]
    Unavailable(String),
}

/// Driver notification failures. Never fatal for a dispatch.
#[derive(Debug, Error)]
pub enum NotifyError {
    #[error("driver {0} has no connected channel")]
    DriverOffline(DriverId),
    #[error("driver {0} channel is full or closed")]
    Undeliverable(DriverId),
    #[error("notification timed out after {0} ms")]
    Timeout(u64),
}

/// Token resolution failures at the session boundary.
#[derive(Debug, Error)]
pub enum AuthError {
    #[error("invalid or expired token")]
    InvalidToken,
    #[error("authentication backend unavailable: {0}")]
    Unavailable(String),
}

/// Configuration loading and validation failures.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse config: {0}")]
    Parse(#[from] serde_json::Error),
    #[error("invalid config value `{field}`: {reason}")]
    Invalid { field: &'static str, reason: String },
}

/// Outcome of a dispatch or order-lifecycle call, as seen by the caller.
#[derive(Debug, Error)]
pub enum DispatchError {
    /// No eligible driver inside the search radius.
    #[error("no nearby vehicles available")]
    NoCandidatesFound,
    /// Candidates existed but every claim lost to a concurrent dispatch.
    #[error("all {attempted} candidate drivers were claimed by other orders")]
    AllClaimsFailed { attempted: usize },
    /// GeoIndex, CAS store or order store unreachable; the order is back in PENDING.
    #[error("dispatch infrastructure unavailable: {0}")]
    InfrastructureUnavailable(String),
    #[error("order {0} not found")]
    OrderNotFound(OrderId),
    #[error("order {order_id} cannot move from {from} to {to}")]
    InvalidTransition {
        order_id: OrderId,
        from: OrderStatus,
        to: OrderStatus,
    },
    /// The order was cancelled while the dispatch was in flight.
    #[error("order {0} was cancelled")]
    Cancelled(OrderId),
    #[error("invalid ride request: {0}")]
    InvalidRequest(String),
}

impl DispatchError {
    /// Whether the passenger should be told "no driver available, try again".
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            DispatchError::NoCandidatesFound
                | DispatchError::AllClaimsFailed { .. }
                | DispatchError::InfrastructureUnavailable(_)
        )
    }
}

impl From<GeoIndexError> for DispatchError {
    fn from(err: GeoIndexError) -> Self {
        DispatchError::InfrastructureUnavailable(err.to_string())
    }
}

impl From<OrderStoreError> for DispatchError {
    fn from(err: OrderStoreError) -> Self {
        match err {
            OrderStoreError::NotFound(id) => DispatchError::OrderNotFound(id),
            OrderStoreError::Conflict {
                id, actual, target, ..
            } => DispatchError::InvalidTransition {
                order_id: id,
                from: actual,
                to: target,
            },
            other => DispatchError::InfrastructureUnavailable(other.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_dispatch_failures_are_retryable() {
        assert!(DispatchError::NoCandidatesFound.is_retryable());
        assert!(DispatchError::AllClaimsFailed { attempted: 3 }.is_retryable());
        assert!(DispatchError::InfrastructureUnavailable("down".into()).is_retryable());
        assert!(!DispatchError::OrderNotFound(OrderId(1)).is_retryable());
        assert!(!DispatchError::Cancelled(OrderId(1)).is_retryable());
        assert!(!DispatchError::InvalidRequest("bad pickup".into()).is_retryable());
    }

    #[test]
    fn store_outage_maps_to_infrastructure_unavailable() {
        let err: DispatchError = OrderStoreError::Unavailable("db down".into()).into();
        assert!(matches!(err, DispatchError::InfrastructureUnavailable(_)));
        let err: DispatchError = OrderStoreError::NotFound(OrderId(9)).into();
        assert!(matches!(err, DispatchError::OrderNotFound(OrderId(9))));
    }
}
