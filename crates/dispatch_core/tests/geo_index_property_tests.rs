//! Radius queries agree with a brute-force haversine scan.

use dispatch_core::domain::{DriverId, DriverStatus, DriverUpdate, GeoPoint, VehicleType};
use dispatch_core::geo_index::{DriverFilter, InMemoryGeoIndex};
use dispatch_core::spatial::haversine_km;
use proptest::prelude::*;

const CENTER: GeoPoint = GeoPoint::new(25.0330, 121.5654);

fn arb_status() -> impl Strategy<Value = DriverStatus> {
    prop::sample::select(vec![
        DriverStatus::Available,
        DriverStatus::PickingUp,
        DriverStatus::OnTrip,
        DriverStatus::Offline,
    ])
}

fn arb_vehicle() -> impl Strategy<Value = VehicleType> {
    prop::sample::select(vec![
        VehicleType::Standard,
        VehicleType::Luxury,
        VehicleType::Taxi,
    ])
}

/// Drivers scattered roughly ±11 km around the center.
fn arb_fleet() -> impl Strategy<Value = Vec<(GeoPoint, DriverStatus, VehicleType)>> {
    prop::collection::vec(
        (-0.1f64..0.1, -0.1f64..0.1, arb_status(), arb_vehicle()).prop_map(
            |(dlat, dlng, status, vehicle)| {
                (
                    GeoPoint::new(CENTER.lat + dlat, CENTER.lng + dlng),
                    status,
                    vehicle,
                )
            },
        ),
        0..80,
    )
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    #[test]
    fn nearby_matches_brute_force(
        fleet in arb_fleet(),
        radius_km in 0.1f64..8.0,
        vehicle in arb_vehicle(),
    ) {
        let index = InMemoryGeoIndex::default();
        for (i, (position, status, vehicle_type)) in fleet.iter().enumerate() {
            index
                .upsert_driver(DriverUpdate {
                    driver_id: DriverId(i as u64),
                    position: *position,
                    status: *status,
                    vehicle_type: *vehicle_type,
                })
                .expect("upsert");
        }

        let filter = DriverFilter::available(vehicle);
        let found = index.nearby(CENTER, radius_km, filter).expect("query");
        let mut found_ids: Vec<u64> = found.iter().map(|s| s.driver_id.0).collect();
        found_ids.sort_unstable();

        let expected: Vec<u64> = fleet
            .iter()
            .enumerate()
            .filter(|(_, (position, status, vehicle_type))| {
                filter.matches(*status, *vehicle_type)
                    && haversine_km(CENTER, *position) <= radius_km
            })
            .map(|(i, _)| i as u64)
            .collect();

        prop_assert_eq!(found_ids, expected);
        for snapshot in &found {
            prop_assert_eq!(snapshot.status, DriverStatus::Available);
            prop_assert_eq!(snapshot.vehicle_type, vehicle);
        }
        prop_assert!(found.windows(2).all(|w| w[0].distance_km <= w[1].distance_km));
    }

    #[test]
    fn relocation_moves_drivers_between_query_results(
        start_km in 0.0f64..2.0,
        end_km in 6.0f64..10.0,
    ) {
        let index = InMemoryGeoIndex::default();
        let start = GeoPoint::new(CENTER.lat + start_km / 111.0, CENTER.lng);
        index
            .upsert_driver(DriverUpdate {
                driver_id: DriverId(1),
                position: start,
                status: DriverStatus::Available,
                vehicle_type: VehicleType::Standard,
            })
            .expect("upsert");
        let filter = DriverFilter::available(VehicleType::Standard);
        prop_assert_eq!(index.nearby(CENTER, 5.0, filter).expect("query").len(), 1);

        let end = GeoPoint::new(CENTER.lat + end_km / 111.0, CENTER.lng);
        prop_assert!(index.relocate(DriverId(1), end).expect("relocate"));
        prop_assert!(index.nearby(CENTER, 5.0, filter).expect("query").is_empty());
        prop_assert_eq!(index.status_of(DriverId(1)), Some(DriverStatus::Available));
    }
}
