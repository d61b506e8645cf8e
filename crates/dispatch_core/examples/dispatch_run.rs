//! Dispatch a handful of orders against an in-memory fleet and print the
//! outcome of each, followed by the telemetry snapshot.
//!
//! Run with: cargo run -p dispatch_core --example dispatch_run [config.json]
//! Set RUST_LOG=dispatch_core=debug to watch the claim loop.

use dispatch_core::config::DispatchConfig;
use dispatch_core::dispatch::AfterTrip;
use dispatch_core::domain::VehicleType;
use dispatch_core::test_helpers::{north_of_pickup, ride_request, EngineFixture};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use tracing_subscriber::EnvFilter;

const NUM_DRIVERS: u64 = 40;
const NUM_ORDERS: u64 = 25;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("dispatch_core=info")),
        )
        .init();

    let config = match std::env::args().nth(1) {
        Some(path) => DispatchConfig::from_path(path)?,
        None => DispatchConfig::default(),
    };
    let fixture = EngineFixture::with_config(config);

    let mut rng = StdRng::seed_from_u64(123);
    for id in 0..NUM_DRIVERS {
        let vehicle_type = if id % 5 == 0 {
            VehicleType::Luxury
        } else {
            VehicleType::Standard
        };
        fixture.add_driver(id, rng.gen_range(0.2..7.0), vehicle_type);
    }

    println!(
        "--- Dispatch run ({} drivers, {} orders, seed 123) ---",
        NUM_DRIVERS, NUM_ORDERS
    );
    for passenger in 0..NUM_ORDERS {
        let pickup = north_of_pickup(rng.gen_range(-1.0..1.0));
        let order = fixture
            .coordinator
            .create_order(ride_request(passenger, pickup))
            .await?;
        match fixture.coordinator.dispatch(order.id).await {
            Ok(assignment) => {
                println!(
                    "  order {:>3}  driver={:<3} score={:>8.1}  pickup={:>6.0} m / {:>4.0} s  lost_claims={}",
                    order.id,
                    assignment.driver_id,
                    assignment.score,
                    assignment.distance_meters,
                    assignment.duration_seconds,
                    assignment.claims_lost,
                );
                // Every third trip runs to completion; the rest stay assigned.
                if passenger % 3 == 0 {
                    fixture.coordinator.start_trip(order.id).await?;
                    fixture
                        .coordinator
                        .complete_trip(order.id, AfterTrip::Available)
                        .await?;
                }
            }
            Err(err) => println!("  order {:>3}  failed: {}", order.id, err),
        }
    }

    let snapshot = fixture.telemetry.snapshot();
    println!("\nTelemetry:\n{}", serde_json::to_string_pretty(&snapshot)?);
    Ok(())
}
