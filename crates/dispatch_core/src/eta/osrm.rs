//! OSRM `/table` batch ETAs.
//!
//! The request puts the pickup first and every driver origin after it, asks
//! for `sources=1..=n` and `destinations=0`, so row `i` of the response is
//! origin `i`. A `null` cell means OSRM could not route that origin.

#![cfg_attr(not(feature = "osrm"), allow(dead_code))]

use serde::Deserialize;

use super::{EtaEstimate, EtaItem, EtaItemError};
use crate::domain::GeoPoint;
use crate::error::EtaError;

#[derive(Debug, Deserialize)]
pub(crate) struct OsrmTableResponse {
    pub(crate) code: String,
    #[serde(default)]
    pub(crate) message: Option<String>,
    #[serde(default)]
    pub(crate) durations: Option<Vec<Vec<Option<f64>>>>,
    #[serde(default)]
    pub(crate) distances: Option<Vec<Vec<Option<f64>>>>,
}

/// Coordinate path segment: destination first, then origins, `lng,lat` pairs.
pub(crate) fn table_coordinates(origins: &[GeoPoint], destination: GeoPoint) -> String {
    std::iter::once(destination)
        .chain(origins.iter().copied())
        .map(|point| format!("{:.6},{:.6}", point.lng, point.lat))
        .collect::<Vec<_>>()
        .join(";")
}

pub(crate) fn source_indices(count: usize) -> String {
    (1..=count)
        .map(|i| i.to_string())
        .collect::<Vec<_>>()
        .join(";")
}

fn cell(matrix: &Option<Vec<Vec<Option<f64>>>>, row: usize) -> Option<f64> {
    matrix
        .as_ref()?
        .get(row)?
        .first()
        .copied()
        .flatten()
        .filter(|value| value.is_finite())
}

pub(crate) fn parse_table_response(
    resp: OsrmTableResponse,
    origins: usize,
) -> Result<Vec<EtaItem>, EtaError> {
    if resp.code != "Ok" {
        let detail = resp.message.unwrap_or_default();
        return Err(EtaError::Api(format!("{} {}", resp.code, detail).trim().to_string()));
    }
    if resp.durations.is_none() {
        return Err(EtaError::Api("response carries no durations".to_string()));
    }

    Ok((0..origins)
        .map(|row| match (cell(&resp.distances, row), cell(&resp.durations, row)) {
            (Some(distance_meters), Some(duration_seconds)) => Ok(EtaEstimate {
                distance_meters,
                duration_seconds,
            }),
            (None, None) if resp.durations.as_ref().is_some_and(|d| d.get(row).is_some()) => {
                Err(EtaItemError::Unreachable("no route".to_string()))
            }
            _ => Err(EtaItemError::Missing),
        })
        .collect())
}

#[cfg(feature = "osrm")]
pub use client::OsrmTableClient;

#[cfg(feature = "osrm")]
mod client {
    use std::time::Duration;

    use async_trait::async_trait;
    use reqwest::{Client, Url};

    use super::{parse_table_response, source_indices, table_coordinates, OsrmTableResponse};
    use crate::domain::GeoPoint;
    use crate::error::EtaError;
    use crate::eta::{EtaBatchClient, EtaItem};

    const REQUEST_TIMEOUT: Duration = Duration::from_secs(3);

    /// Thin async HTTP client for OSRM's table service.
    #[derive(Debug, Clone)]
    pub struct OsrmTableClient {
        client: Client,
        endpoint: String,
    }

    impl OsrmTableClient {
        /// Create a client for the given OSRM endpoint (e.g. `http://localhost:5000`).
        pub fn new(endpoint: &str) -> Self {
            let client = Client::builder()
                .timeout(REQUEST_TIMEOUT)
                .build()
                .unwrap_or_else(|_| Client::new());
            Self {
                client,
                endpoint: endpoint.trim_end_matches('/').to_string(),
            }
        }
    }

    #[async_trait]
    impl EtaBatchClient for OsrmTableClient {
        async fn batch_eta(
            &self,
            origins: &[GeoPoint],
            destination: GeoPoint,
        ) -> Result<Vec<EtaItem>, EtaError> {
            let base = format!(
                "{}/table/v1/driving/{}",
                self.endpoint,
                table_coordinates(origins, destination)
            );
            let mut url = Url::parse(&base)
                .map_err(|err| EtaError::Api(format!("failed to build OSRM URL: {}", err)))?;
            url.query_pairs_mut()
                .append_pair("sources", &source_indices(origins.len()))
                .append_pair("destinations", "0")
                .append_pair("annotations", "duration,distance");

            let response = self.client.get(url).send().await?;
            let parsed: OsrmTableResponse = response.json().await?;
            parse_table_response(parsed, origins.len())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn response(json: &str) -> OsrmTableResponse {
        serde_json::from_str(json).expect("valid OSRM json")
    }

    #[test]
    fn coordinates_put_destination_first() {
        let coords = table_coordinates(
            &[GeoPoint::new(25.1, 121.6), GeoPoint::new(25.2, 121.7)],
            GeoPoint::new(25.0, 121.5),
        );
        assert_eq!(
            coords,
            "121.500000,25.000000;121.600000,25.100000;121.700000,25.200000"
        );
        assert_eq!(source_indices(3), "1;2;3");
    }

    #[test]
    fn null_cells_become_per_item_failures() {
        let parsed = parse_table_response(
            response(
                r#"{"code":"Ok","durations":[[120.5],[null]],"distances":[[1500.0],[null]]}"#,
            ),
            2,
        )
        .expect("ok response");

        assert_eq!(
            parsed[0],
            Ok(EtaEstimate {
                distance_meters: 1500.0,
                duration_seconds: 120.5
            })
        );
        assert!(matches!(parsed[1], Err(EtaItemError::Unreachable(_))));
    }

    #[test]
    fn short_matrix_marks_missing_rows() {
        let parsed = parse_table_response(
            response(r#"{"code":"Ok","durations":[[60.0]],"distances":[[800.0]]}"#),
            2,
        )
        .expect("ok response");
        assert!(parsed[0].is_ok());
        assert_eq!(parsed[1], Err(EtaItemError::Missing));
    }

    #[test]
    fn error_code_fails_the_batch() {
        let err = parse_table_response(
            response(r#"{"code":"InvalidQuery","message":"bad coords"}"#),
            1,
        )
        .expect_err("api error");
        assert!(err.to_string().contains("InvalidQuery"));
    }
}
