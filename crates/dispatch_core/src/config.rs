//! Engine configuration with documented defaults.
//!
//! Every section derives `Deserialize` with `#[serde(default)]`, so a JSON
//! file only needs the keys it overrides:
//!
//! ```json
//! { "search_radius_km": 3.0, "scoring": { "W_DIST": 0.2 }, "timeouts": { "eta_ms": 1500 } }
//! ```

use std::path::Path;
use std::time::Duration;

use h3o::Resolution;
use serde::{Deserialize, Serialize};

use crate::error::ConfigError;
use crate::eta::EtaProviderKind;
use crate::scoring::ScoringWeights;

/// Fixed pickup search radius (no progressive widening).
pub const DEFAULT_SEARCH_RADIUS_KM: f64 = 5.0;

/// Score points subtracted from a candidate the routing provider could not route.
pub const DEFAULT_UNROUTED_PENALTY: f64 = 25.0;

/// Average city speed used to turn straight-line distance into a duration.
pub const DEFAULT_AVG_SPEED_KMH: f64 = 40.0;

/// Per-call deadlines for every suspension point of a dispatch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Timeouts {
    pub geo_query_ms: u64,
    pub cas_ms: u64,
    pub eta_ms: u64,
    pub profile_ms: u64,
    pub order_store_ms: u64,
    pub notify_ms: u64,
}

impl Default for Timeouts {
    fn default() -> Self {
        Self {
            geo_query_ms: 500,
            cas_ms: 250,
            eta_ms: 2_000,
            profile_ms: 300,
            order_store_ms: 500,
            notify_ms: 500,
        }
    }
}

impl Timeouts {
    pub fn geo_query(&self) -> Duration {
        Duration::from_millis(self.geo_query_ms)
    }

    pub fn cas(&self) -> Duration {
        Duration::from_millis(self.cas_ms)
    }

    pub fn eta(&self) -> Duration {
        Duration::from_millis(self.eta_ms)
    }

    pub fn profile(&self) -> Duration {
        Duration::from_millis(self.profile_ms)
    }

    pub fn order_store(&self) -> Duration {
        Duration::from_millis(self.order_store_ms)
    }

    pub fn notify(&self) -> Duration {
        Duration::from_millis(self.notify_ms)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        let fields = [
            ("timeouts.geo_query_ms", self.geo_query_ms),
            ("timeouts.cas_ms", self.cas_ms),
            ("timeouts.eta_ms", self.eta_ms),
            ("timeouts.profile_ms", self.profile_ms),
            ("timeouts.order_store_ms", self.order_store_ms),
            ("timeouts.notify_ms", self.notify_ms),
        ];
        for (field, value) in fields {
            if value == 0 {
                return Err(ConfigError::Invalid {
                    field,
                    reason: "timeouts are mandatory and must be > 0".to_string(),
                });
            }
        }
        Ok(())
    }
}

/// H3 layout of the in-memory geo index and its query cache.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct GeoIndexConfig {
    /// Resolution drivers are bucketed at.
    pub resolution: u8,
    /// Coarser resolution used as the query-cache key.
    pub cache_resolution: u8,
    /// Lifetime of a cached radius query.
    pub query_cache_ttl_ms: u64,
    pub query_cache_capacity: usize,
}

impl Default for GeoIndexConfig {
    fn default() -> Self {
        Self {
            resolution: 8,
            cache_resolution: 7,
            query_cache_ttl_ms: 10_000,
            query_cache_capacity: 1_024,
        }
    }
}

impl GeoIndexConfig {
    pub fn resolution(&self) -> Result<Resolution, ConfigError> {
        Resolution::try_from(self.resolution).map_err(|_| ConfigError::Invalid {
            field: "geo.resolution",
            reason: format!("{} is not an H3 resolution (0-15)", self.resolution),
        })
    }

    pub fn cache_resolution(&self) -> Result<Resolution, ConfigError> {
        Resolution::try_from(self.cache_resolution).map_err(|_| ConfigError::Invalid {
            field: "geo.cache_resolution",
            reason: format!("{} is not an H3 resolution (0-15)", self.cache_resolution),
        })
    }

    pub fn query_cache_ttl(&self) -> Duration {
        Duration::from_millis(self.query_cache_ttl_ms)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        self.resolution()?;
        self.cache_resolution()?;
        if self.cache_resolution > self.resolution {
            return Err(ConfigError::Invalid {
                field: "geo.cache_resolution",
                reason: "cache cells must be at least as coarse as index cells".to_string(),
            });
        }
        if self.query_cache_capacity == 0 {
            return Err(ConfigError::Invalid {
                field: "geo.query_cache_capacity",
                reason: "must be > 0".to_string(),
            });
        }
        Ok(())
    }
}

/// Top-level dispatch configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DispatchConfig {
    pub search_radius_km: f64,
    pub scoring: ScoringWeights,
    pub unrouted_penalty: f64,
    pub avg_speed_kmh: f64,
    pub timeouts: Timeouts,
    pub geo: GeoIndexConfig,
    pub eta_provider: EtaProviderKind,
}

impl Default for DispatchConfig {
    fn default() -> Self {
        Self {
            search_radius_km: DEFAULT_SEARCH_RADIUS_KM,
            scoring: ScoringWeights::default(),
            unrouted_penalty: DEFAULT_UNROUTED_PENALTY,
            avg_speed_kmh: DEFAULT_AVG_SPEED_KMH,
            timeouts: Timeouts::default(),
            geo: GeoIndexConfig::default(),
            eta_provider: EtaProviderKind::default(),
        }
    }
}

impl DispatchConfig {
    /// Parse and validate a JSON document.
    pub fn from_json_str(json: &str) -> Result<Self, ConfigError> {
        let config: DispatchConfig = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    /// Read, parse and validate a JSON file.
    pub fn from_path(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.display().to_string(),
            source,
        })?;
        Self::from_json_str(&raw)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if !self.search_radius_km.is_finite() || self.search_radius_km <= 0.0 {
            return Err(ConfigError::Invalid {
                field: "search_radius_km",
                reason: format!("must be > 0, got {}", self.search_radius_km),
            });
        }
        if !self.unrouted_penalty.is_finite() || self.unrouted_penalty < 0.0 {
            return Err(ConfigError::Invalid {
                field: "unrouted_penalty",
                reason: format!("must be >= 0, got {}", self.unrouted_penalty),
            });
        }
        if !self.avg_speed_kmh.is_finite() || self.avg_speed_kmh <= 0.0 {
            return Err(ConfigError::Invalid {
                field: "avg_speed_kmh",
                reason: format!("must be > 0, got {}", self.avg_speed_kmh),
            });
        }
        self.scoring.validate()?;
        self.timeouts.validate()?;
        self.geo.validate()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_valid() {
        DispatchConfig::default().validate().expect("defaults validate");
    }

    #[test]
    fn partial_json_keeps_defaults() {
        let config = DispatchConfig::from_json_str(
            r#"{ "search_radius_km": 3.0, "scoring": { "W_DIST": 0.2 }, "timeouts": { "eta_ms": 1500 } }"#,
        )
        .expect("parse");
        assert_eq!(config.search_radius_km, 3.0);
        assert_eq!(config.scoring.distance, 0.2);
        assert_eq!(config.scoring.base, crate::scoring::DEFAULT_BASE);
        assert_eq!(config.timeouts.eta_ms, 1_500);
        assert_eq!(config.timeouts.cas_ms, Timeouts::default().cas_ms);
    }

    #[test]
    fn zero_timeout_is_rejected() {
        let err = DispatchConfig::from_json_str(r#"{ "timeouts": { "cas_ms": 0 } }"#)
            .expect_err("zero timeout");
        assert!(matches!(
            err,
            ConfigError::Invalid {
                field: "timeouts.cas_ms",
                ..
            }
        ));
    }

    #[test]
    fn cache_resolution_finer_than_index_is_rejected() {
        let err = DispatchConfig::from_json_str(
            r#"{ "geo": { "resolution": 7, "cache_resolution": 9 } }"#,
        )
        .expect_err("finer cache");
        assert!(matches!(
            err,
            ConfigError::Invalid {
                field: "geo.cache_resolution",
                ..
            }
        ));
    }

    #[test]
    fn missing_file_reports_path() {
        let err = DispatchConfig::from_path("/definitely/not/here.json").expect_err("io");
        assert!(err.to_string().contains("/definitely/not/here.json"));
    }

    #[test]
    fn eta_provider_is_tagged_by_kind() {
        let config = DispatchConfig::from_json_str(r#"{ "eta_provider": { "kind": "straight_line" } }"#)
            .expect("parse");
        assert_eq!(config.eta_provider, EtaProviderKind::StraightLine);
        assert!(DispatchConfig::from_json_str(r#"{ "eta_provider": { "kind": "carrier_pigeon" } }"#)
            .is_err());
    }
}
