//! Seed a fleet around Berlin, run a handful of trips end to end and print the ledger.
//!
//! Run with: cargo run -p dispatch_core --example dispatch_run
//! Set RUST_LOG=dispatch_core=debug to watch every wave.

use std::error::Error;
use std::sync::Arc;

use dispatch_core::adapters::{InMemoryPaymentGateway, InMemoryStore};
use dispatch_core::clock::SystemClock;
use dispatch_core::config::ServiceConfig;
use dispatch_core::dispatch::DispatchEngine;
use dispatch_core::gateway::{Dispatcher, RealtimeGateway};
use dispatch_core::lifecycle::{Completion, LifecyclePorts, NewTrip, RideLifecycle};
use dispatch_core::location::LocationReport;
use dispatch_core::location::LocationRegistry;
use dispatch_core::model::{PaymentMethod, Place, RiderId, VehicleType};
use dispatch_core::ports::DriverRepository;
use dispatch_core::realtime::{InMemoryHub, OutboundEvent};
use dispatch_core::spatial::{haversine_km, offset_north_km};
use dispatch_core::telemetry::{init_tracing, RideTelemetry};
use dispatch_core::test_helpers::{random_fleet, BERLIN_CENTER};

const NUM_DRIVERS: usize = 60;
const NUM_TRIPS: usize = 8;
const SEED: u64 = 123;

#[tokio::main]
async fn main() -> Result<(), Box<dyn Error>> {
    init_tracing("dispatch_core=info")?;

    let config = ServiceConfig::default();
    let store = Arc::new(InMemoryStore::new());
    let hub = Arc::new(InMemoryHub::new());
    let clock = Arc::new(SystemClock);
    let telemetry = Arc::new(RideTelemetry::new());
    let locations = Arc::new(LocationRegistry::new(
        store.clone(),
        store.clone(),
        clock.clone(),
        config.location,
    ));
    let dispatch = DispatchEngine::new(
        locations.clone(),
        store.clone(),
        store.clone(),
        hub.clone(),
        telemetry.clone(),
        config.dispatch.clone(),
    );
    let lifecycle = RideLifecycle::new(
        LifecyclePorts {
            trips: store.clone(),
            drivers: store.clone(),
            payments: Arc::new(InMemoryPaymentGateway::default()),
            channel: hub.clone(),
            clock,
            telemetry: telemetry.clone(),
        },
        dispatch,
        &config,
    );
    let gateway = RealtimeGateway::new(locations, store.clone(), hub.clone());

    let mut inboxes = Vec::with_capacity(NUM_DRIVERS);
    for (driver, position) in random_fleet(SEED, NUM_DRIVERS, BERLIN_CENTER, 8.0) {
        store.upsert_driver(driver.clone()).await?;
        let (connection, inbox) = hub.connect();
        gateway.on_join_driver(connection, driver.id.clone()).await?;
        gateway
            .on_driver_location(connection, LocationReport::new(driver.id.clone(), position))
            .await?;
        inboxes.push((driver.id, inbox));
    }

    println!("--- Dispatch run ({NUM_DRIVERS} drivers, {NUM_TRIPS} trips, seed {SEED}) ---");
    println!("Surge before demand: {}", lifecycle.current_surge().await?);

    for i in 0..NUM_TRIPS {
        let pickup = offset_north_km(BERLIN_CENTER, i as f64 * 0.5);
        let dropoff = offset_north_km(pickup, 6.0);
        let distance_km = haversine_km(pickup, dropoff);
        let requested = lifecycle
            .create(NewTrip {
                rider_id: RiderId::new(format!("rider-{i}")),
                pickup: Place::new(format!("Pickup {i}"), pickup),
                dropoff: Place::new(format!("Dropoff {i}"), dropoff),
                distance_km,
                duration_min: 18.0,
                payment_method: if i % 3 == 0 {
                    PaymentMethod::Cash
                } else {
                    PaymentMethod::Card
                },
                vehicle_type: Some(VehicleType::Economy),
            })
            .await?;
        let trip_id = requested.trip.id;
        let first_wave = requested
            .dispatch
            .plan()
            .first()
            .map_or(0, |wave| wave.candidates.len());

        // The first driver whose inbox holds this request takes it.
        let winner = inboxes.iter_mut().find_map(|(driver_id, inbox)| {
            let mut offered = false;
            while let Ok(event) = inbox.try_recv() {
                if matches!(&event, OutboundEvent::TripRequest(request) if request.id == trip_id) {
                    offered = true;
                }
            }
            offered.then(|| driver_id.clone())
        });
        let Some(driver_id) = winner else {
            println!("  trip {trip_id}: nobody was offered the ride");
            continue;
        };

        lifecycle.accept(trip_id, driver_id.clone()).await?;
        lifecycle.start(trip_id, driver_id.clone()).await?;
        let trip = lifecycle
            .complete(trip_id, Completion::default().with_duration_min(21.0))
            .await?;
        requested.dispatch.abort();
        println!(
            "  trip {}  driver={}  first wave={}  fare={}  surge={}  payment={:?}",
            trip.id, driver_id, first_wave, trip.fare, trip.surge_multiplier, trip.payment_status,
        );
    }

    println!("Platform revenue: {}", telemetry.platform_revenue());
    let completed = telemetry.drain_completed();
    println!("\nCompleted trips: {}", completed.len());
    for record in &completed {
        println!(
            "  {}  rider={}  fare={}  platform={}  driver={}  time_to_accept={} ms",
            record.trip_id,
            record.rider_id,
            record.fare,
            record.platform_share,
            record.driver_share,
            record.time_to_accept().num_milliseconds(),
        );
    }
    println!("Counters: {:?}", telemetry.counters.snapshot());
    Ok(())
}
