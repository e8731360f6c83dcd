use dispatch_core::config::{ServiceConfig, SurgeMode};
use dispatch_core::lifecycle::Completion;
use dispatch_core::model::TripStatus;
use dispatch_core::ports::TripRepository;
use dispatch_core::test_helpers::{km_north, new_trip, DriverBuilder, TestStack, TripBuilder};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;

/// Two open requests already waiting and one idle driver online.
async fn busy_market(surge: SurgeMode) -> TestStack {
    let stack = TestStack::with_config(ServiceConfig::default().with_surge(surge));
    for _ in 0..2 {
        stack
            .store
            .insert_trip(TripBuilder::new().build())
            .await
            .expect("seed open request");
    }
    stack
}

#[tokio::test]
async fn surge_is_locked_at_request_and_kept_at_completion() {
    let stack = busy_market(SurgeMode::LockAtRequest).await;
    let driver = stack
        .online_driver(DriverBuilder::new("first").build(), km_north(1.0))
        .await;

    // Three open requests (including this one) for one driver.
    let created = stack.lifecycle.create(new_trip(5.0, 15.0)).await.expect("create");
    assert_eq!(created.trip.surge_multiplier, dec!(1.5));
    assert_eq!(created.trip.fare, dec!(4650.00));

    stack
        .lifecycle
        .accept(created.trip.id, driver.id.clone())
        .await
        .expect("accept");
    // Supply recovers before the trip ends; the locked multiplier still applies.
    let _more = stack.drivers_at(&[1.0, 2.0, 3.0, 4.0]).await;
    assert_eq!(stack.lifecycle.current_surge().await.expect("surge"), Decimal::ONE);

    let completed = stack
        .lifecycle
        .complete(created.trip.id, Completion::default().with_distance_km(6.0))
        .await
        .expect("complete");
    assert_eq!(completed.surge_multiplier, dec!(1.5));
    // (1000 + 6 * 300 + 15 * 40) * 1.5
    assert_eq!(completed.fare, dec!(5100.00));
    assert_eq!(stack.telemetry.completed_trips()[0].surge_multiplier, dec!(1.5));
}

#[tokio::test]
async fn disabled_surge_prices_at_one() {
    let stack = busy_market(SurgeMode::Disabled).await;
    let _driver = stack
        .online_driver(DriverBuilder::new("d-1").build(), km_north(1.0))
        .await;

    let created = stack.lifecycle.create(new_trip(5.0, 15.0)).await.expect("create");
    assert_eq!(created.trip.surge_multiplier, Decimal::ONE);
    assert_eq!(created.trip.fare, dec!(3100.00));
}

#[tokio::test]
async fn no_available_drivers_saturates_surge() {
    let stack = TestStack::new();
    let created = stack.lifecycle.create(new_trip(5.0, 15.0)).await.expect("create");
    assert_eq!(created.trip.surge_multiplier, dec!(2.5));
    assert_eq!(created.trip.fare, dec!(7750.00));
}

#[tokio::test]
async fn busy_drivers_do_not_count_as_supply() {
    let stack = TestStack::new();
    let driver = stack
        .online_driver(DriverBuilder::new("d-1").build(), km_north(1.0))
        .await;
    assert_eq!(stack.dispatch.available_driver_count().await.expect("count"), 1);

    let trip = TripBuilder::new()
        .with_driver(driver.id.clone())
        .with_status(TripStatus::InProgress)
        .build();
    stack.store.insert_trip(trip).await.expect("insert");
    assert_eq!(stack.dispatch.available_driver_count().await.expect("count"), 0);
}

#[tokio::test]
async fn stale_drivers_do_not_count_as_supply() {
    let stack = TestStack::new();
    let _driver = stack
        .online_driver(DriverBuilder::new("d-1").build(), km_north(1.0))
        .await;
    stack.clock.advance(chrono::Duration::minutes(3));
    assert_eq!(stack.dispatch.available_driver_count().await.expect("count"), 0);
}
