use std::sync::Arc;

use dispatch_core::domain::{DriverId, DriverStatus, OrderStatus, VehicleType};
use dispatch_core::error::DispatchError;
use dispatch_core::geo_index::{GeoIndex, InMemoryGeoIndex};
use dispatch_core::test_helpers::{available_driver, ride_request, EngineFixture, TEST_PICKUP};
use futures::future::join_all;

#[tokio::test(flavor = "multi_thread", worker_threads = 8)]
async fn exactly_one_of_many_concurrent_claims_succeeds() {
    let geo = Arc::new(InMemoryGeoIndex::default());
    geo.upsert_driver(available_driver(7, 0.5, VehicleType::Standard))
        .expect("upsert");

    let claims = (0..32).map(|_| {
        let geo = geo.clone();
        tokio::spawn(async move {
            geo.cas_status(DriverId(7), DriverStatus::Available, DriverStatus::PickingUp)
                .await
        })
    });
    let results = join_all(claims).await;

    let winners = results
        .into_iter()
        .map(|joined| joined.expect("task").expect("cas"))
        .filter(|applied| *applied)
        .count();
    assert_eq!(winners, 1);
    assert_eq!(geo.status_of(DriverId(7)), Some(DriverStatus::PickingUp));
}

#[tokio::test]
async fn cas_on_unknown_driver_fails_without_creating_it() {
    let geo = InMemoryGeoIndex::default();
    let applied = geo
        .cas_status(DriverId(99), DriverStatus::Available, DriverStatus::PickingUp)
        .await
        .expect("cas");
    assert!(!applied);
    assert!(geo.is_empty());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_orders_never_share_a_driver() {
    let fixture = EngineFixture::new();
    fixture.add_driver(1, 0.5, VehicleType::Standard);
    fixture.add_driver(2, 1.5, VehicleType::Standard);

    let mut orders = Vec::new();
    for passenger in 0..8 {
        let order = fixture
            .coordinator
            .create_order(ride_request(passenger, TEST_PICKUP))
            .await
            .expect("order");
        orders.push(order.id);
    }

    let dispatches = orders.iter().map(|order_id| {
        let coordinator = fixture.coordinator.clone();
        let order_id = *order_id;
        tokio::spawn(async move { coordinator.dispatch(order_id).await })
    });
    let outcomes: Vec<_> = join_all(dispatches)
        .await
        .into_iter()
        .map(|joined| joined.expect("task"))
        .collect();

    let mut assigned: Vec<DriverId> = outcomes
        .iter()
        .filter_map(|outcome| outcome.as_ref().ok().map(|a| a.driver_id))
        .collect();
    assigned.sort();
    assert_eq!(assigned, vec![DriverId(1), DriverId(2)]);
    for outcome in &outcomes {
        if let Err(err) = outcome {
            assert!(
                matches!(
                    err,
                    DispatchError::NoCandidatesFound | DispatchError::AllClaimsFailed { .. }
                ),
                "unexpected error {err}"
            );
        }
    }

    let mut assigned_orders = 0;
    for order_id in orders {
        let order = fixture.coordinator.order(order_id).await.expect("order");
        match order.status {
            OrderStatus::Assigned => assigned_orders += 1,
            OrderStatus::NoDriverFound => assert_eq!(order.driver_id, None),
            other => panic!("order {order_id} left in {other}"),
        }
    }
    assert_eq!(assigned_orders, 2);
}
