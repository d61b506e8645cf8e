pub mod config;
pub mod dispatch;
pub mod domain;
pub mod error;
pub mod eta;
pub mod fleet;
pub mod geo_index;
pub mod orders;
pub mod profile;
pub mod realtime;
pub mod scoring;
pub mod session;
pub mod spatial;
pub mod telemetry;

#[cfg(any(test, feature = "test-helpers"))]
pub mod test_helpers;
