#![allow(dead_code)]

use std::time::Duration;

use dispatch_core::config::{DispatchConfig, DispatchMode, ServiceConfig, StatsPolicy, SurgeMode};
use dispatch_core::lifecycle::Completion;
use dispatch_core::model::{DriverId, Trip};
use dispatch_core::realtime::{OutboundEvent, TripStatusPayload};
use dispatch_core::test_helpers::{new_trip, OnlineDriver, TestStack};

/// Default config with surge off, so fares match the plain formula.
pub fn flat_config() -> ServiceConfig {
    ServiceConfig::default().with_surge(SurgeMode::Disabled)
}

pub fn notify_all_config() -> ServiceConfig {
    flat_config().with_dispatch(DispatchConfig::default().with_mode(DispatchMode::NotifyAll))
}

pub fn seeded_only_config() -> ServiceConfig {
    flat_config()
        .with_dispatch(DispatchConfig::default().with_stats_policy(StatsPolicy::RequireSeeded))
}

/// 5 km, 15 min economy card trip, created through the lifecycle.
pub async fn requested_trip(stack: &TestStack) -> Trip {
    stack
        .lifecycle
        .create(new_trip(5.0, 15.0))
        .await
        .expect("create trip")
        .trip
}

pub async fn accepted_trip(stack: &TestStack, driver_id: &DriverId) -> Trip {
    let trip = requested_trip(stack).await;
    stack
        .lifecycle
        .accept(trip.id, driver_id.clone())
        .await
        .expect("accept trip")
}

pub async fn completed_trip(stack: &TestStack, driver_id: &DriverId) -> Trip {
    let trip = accepted_trip(stack, driver_id).await;
    stack
        .lifecycle
        .complete(trip.id, Completion::default())
        .await
        .expect("complete trip")
}

/// Rings of the trip requests a driver has received so far.
pub fn received_rings(driver: &mut OnlineDriver) -> Vec<Option<u8>> {
    driver.trip_requests().into_iter().map(|r| r.ring).collect()
}

pub fn status_events(events: Vec<OutboundEvent>) -> Vec<TripStatusPayload> {
    events
        .into_iter()
        .filter_map(|event| match event {
            OutboundEvent::TripStatus(payload) => Some(payload),
            _ => None,
        })
        .collect()
}

/// Let paused time run forward by `secs` seconds plus a small margin, so timers
/// due at exactly `secs` fire first.
pub async fn run_for_secs(secs: u64) {
    tokio::time::sleep(Duration::from_secs(secs) + Duration::from_millis(100)).await;
}
