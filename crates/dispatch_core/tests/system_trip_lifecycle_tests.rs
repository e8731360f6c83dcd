mod support;

use std::sync::Arc;

use chrono::Duration;
use dispatch_core::adapters::InMemoryPaymentGateway;
use dispatch_core::error::{DispatchError, PaymentError};
use dispatch_core::lifecycle::Completion;
use dispatch_core::model::{PaymentMethod, PaymentStatus, TripStatus};
use dispatch_core::ports::ChargeStatus;
use dispatch_core::realtime::RealtimeChannel;
use dispatch_core::test_helpers::{berlin_center, DriverBuilder, TestStack};
use rust_decimal_macros::dec;
use support::{accepted_trip, completed_trip, flat_config, requested_trip, status_events};

#[tokio::test]
async fn worked_example_end_to_end() {
    let stack = TestStack::with_config(flat_config());
    let mut driver = stack
        .online_driver(DriverBuilder::new("d-1").build(), berlin_center())
        .await;

    let trip = requested_trip(&stack).await;
    assert_eq!(trip.fare, dec!(3100.00));
    assert_eq!(driver.trip_requests().len(), 1);

    stack.clock.advance(Duration::seconds(30));
    stack
        .lifecycle
        .accept(trip.id, driver.id.clone())
        .await
        .expect("accept");
    stack.clock.advance(Duration::minutes(4));
    stack
        .lifecycle
        .start(trip.id, driver.id.clone())
        .await
        .expect("start");
    stack.clock.advance(Duration::minutes(15));
    let completed = stack
        .lifecycle
        .complete(trip.id, Completion::default())
        .await
        .expect("complete");

    assert_eq!(completed.status, TripStatus::Completed);
    assert_eq!(completed.fare, dec!(3100.00));
    let split = completed.split.expect("split");
    assert_eq!(split.platform_share, dec!(620.00));
    assert_eq!(split.driver_share, dec!(2480.00));
    assert_eq!(completed.payment_status, PaymentStatus::Paid);
    assert!(completed.driver_invariant_holds());

    let charges = stack.payments.charges();
    assert_eq!(charges.len(), 1);
    assert_eq!(charges[0].amount_minor, 310_000);
    assert_eq!(completed.payment_reference.as_deref(), Some(charges[0].charge.id.as_str()));

    let ledger = stack.telemetry.completed_trips();
    assert_eq!(ledger.len(), 1);
    assert_eq!(ledger[0].time_to_accept(), Duration::seconds(30));
    assert_eq!(ledger[0].trip_duration(), Some(Duration::minutes(15)));
    assert_eq!(stack.telemetry.platform_revenue(), dec!(620.00));
}

#[tokio::test]
async fn accept_publishes_driver_profile_on_trip_channel_and_globally() {
    let stack = TestStack::with_config(flat_config());
    let driver = stack
        .register_driver(DriverBuilder::new("d-1").with_stats(4.7, 0.9, None).build())
        .await;
    let trip = requested_trip(&stack).await;

    let (rider, mut rider_inbox) = stack.hub.connect();
    stack
        .hub
        .join_trip_channel(rider, trip.id)
        .await
        .expect("join trip");
    let (_bystander, mut bystander_inbox) = stack.hub.connect();

    stack
        .lifecycle
        .accept(trip.id, driver.id.clone())
        .await
        .expect("accept");

    let mut rider_events = Vec::new();
    while let Ok(event) = rider_inbox.try_recv() {
        rider_events.push(event);
    }
    let statuses = status_events(rider_events);
    // Trip channel plus the global notice.
    assert_eq!(statuses.len(), 2);
    let profile = statuses[0].driver.as_ref().expect("driver profile");
    assert_eq!(profile.name, "Driver d-1");
    assert_eq!(profile.rating, Some(4.7));
    assert!(bystander_inbox.try_recv().is_ok());
}

#[tokio::test]
async fn second_completion_is_a_conflict_and_changes_nothing() {
    let stack = TestStack::with_config(flat_config());
    let driver = stack.register_driver(DriverBuilder::new("d-1").build()).await;
    let first = completed_trip(&stack, &driver.id).await;

    let again = stack
        .lifecycle
        .complete(first.id, Completion::default().with_distance_km(50.0))
        .await;
    assert!(matches!(
        again,
        Err(DispatchError::Conflict {
            status: TripStatus::Completed,
            ..
        })
    ));
    let stored = stack.stored_trip(first.id).await;
    assert_eq!(stored.fare, first.fare);
    assert_eq!(stored.split, first.split);
    assert_eq!(stack.payments.charges().len(), 1);
}

#[tokio::test]
async fn completion_corrections_reprice_the_trip() {
    let stack = TestStack::with_config(flat_config());
    let driver = stack.register_driver(DriverBuilder::new("d-1").build()).await;
    let trip = accepted_trip(&stack, &driver.id).await;

    let completed = stack
        .lifecycle
        .complete(
            trip.id,
            Completion::default()
                .with_distance_km(6.0)
                .with_duration_min(20.0)
                .with_payment_method(PaymentMethod::Wallet),
        )
        .await
        .expect("complete");
    // 1000 + 6 * 300 + 20 * 40
    assert_eq!(completed.fare, dec!(3600.00));
    assert_eq!(completed.distance_km, 6.0);
    assert_eq!(completed.payment_method, PaymentMethod::Wallet);
    assert_eq!(completed.payment_status, PaymentStatus::Paid);
    assert!(stack.payments.charges().is_empty());
    assert_eq!(completed.split.expect("split").total(), completed.fare);
}

#[tokio::test]
async fn payment_failure_leaves_trip_untouched_and_retry_succeeds() {
    let stack = TestStack::with_config(flat_config());
    let driver = stack.register_driver(DriverBuilder::new("d-1").build()).await;
    let trip = accepted_trip(&stack, &driver.id).await;
    stack
        .payments
        .fail_next(PaymentError::Declined("insufficient funds".into()));

    let failed = stack.lifecycle.complete(trip.id, Completion::default()).await;
    assert!(matches!(
        failed,
        Err(DispatchError::ExternalService {
            service: "payment",
            ..
        })
    ));
    let stored = stack.stored_trip(trip.id).await;
    assert_eq!(stored, trip);
    assert_eq!(stack.telemetry.counters.snapshot().payment_failures, 1);

    let completed = stack
        .lifecycle
        .complete(trip.id, Completion::default())
        .await
        .expect("retry");
    assert_eq!(completed.status, TripStatus::Completed);
    assert_eq!(stack.payments.charges().len(), 1);
}

#[tokio::test]
async fn pending_charge_awaits_confirmation_and_exposes_client_secret() {
    let payments = Arc::new(InMemoryPaymentGateway::new(ChargeStatus::RequiresAction));
    let stack = TestStack::with_payments(flat_config(), payments);
    let driver = stack.register_driver(DriverBuilder::new("d-1").build()).await;
    let trip = accepted_trip(&stack, &driver.id).await;
    let (rider, mut rider_inbox) = stack.hub.connect();
    stack
        .hub
        .join_trip_channel(rider, trip.id)
        .await
        .expect("join trip");

    let completed = stack
        .lifecycle
        .complete(trip.id, Completion::default())
        .await
        .expect("complete");
    assert_eq!(completed.payment_status, PaymentStatus::AwaitingConfirmation);
    assert!(completed.payment_client_secret.is_some());

    let event = status_events(vec![rider_inbox.try_recv().expect("status")])
        .pop()
        .expect("trip status");
    assert_eq!(event.status, TripStatus::Completed);
    assert_eq!(event.fare, Some(completed.fare));
    assert_eq!(event.client_secret, completed.payment_client_secret);
}

#[tokio::test]
async fn cancel_accepted_trip_releases_driver() {
    let stack = TestStack::with_config(flat_config());
    let mut driver = stack
        .online_driver(DriverBuilder::new("d-1").build(), berlin_center())
        .await;
    let trip = accepted_trip(&stack, &driver.id).await;
    driver.drain();

    let cancelled = stack
        .lifecycle
        .cancel(trip.id, Some("rider changed plans".into()))
        .await
        .expect("cancel");
    assert_eq!(cancelled.status, TripStatus::Cancelled);
    assert_eq!(cancelled.driver_id, None);
    assert!(cancelled.driver_invariant_holds());
    assert_eq!(cancelled.cancellation_reason.as_deref(), Some("rider changed plans"));

    let notices = status_events(driver.drain());
    assert_eq!(notices.len(), 1);
    assert_eq!(notices[0].status, TripStatus::Cancelled);
}

#[tokio::test]
async fn cancel_completed_trip_is_a_conflict() {
    let stack = TestStack::with_config(flat_config());
    let driver = stack.register_driver(DriverBuilder::new("d-1").build()).await;
    let trip = completed_trip(&stack, &driver.id).await;

    let result = stack.lifecycle.cancel(trip.id, None).await;
    assert!(matches!(result, Err(DispatchError::Conflict { .. })));
    assert_eq!(stack.stored_trip(trip.id).await.status, TripStatus::Completed);
}

#[tokio::test]
async fn cancelled_trip_cannot_be_accepted() {
    let stack = TestStack::with_config(flat_config());
    let driver = stack.register_driver(DriverBuilder::new("d-1").build()).await;
    let trip = requested_trip(&stack).await;
    stack.lifecycle.cancel(trip.id, None).await.expect("cancel");

    let result = stack.lifecycle.accept(trip.id, driver.id).await;
    assert!(matches!(
        result,
        Err(DispatchError::Conflict {
            reason: "trip not available",
            status: TripStatus::Cancelled
        })
    ));
}

#[tokio::test]
async fn unknown_trip_is_not_found() {
    let stack = TestStack::new();
    let result = stack.lifecycle.get(dispatch_core::model::TripId::new()).await;
    assert!(matches!(result, Err(DispatchError::NotFound { entity: "trip", .. })));
}
