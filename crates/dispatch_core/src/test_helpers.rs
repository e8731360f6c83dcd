//! Test helpers for common test setup and utilities.
//!
//! Builders for trips and drivers, fixture coordinates, a seeded random fleet,
//! and [`TestStack`], which wires the whole core against in-memory adapters.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use rust_decimal::Decimal;
use tokio::sync::mpsc::UnboundedReceiver;

use crate::adapters::{InMemoryPaymentGateway, InMemoryStore};
use crate::clock::ManualClock;
use crate::config::ServiceConfig;
use crate::dispatch::DispatchEngine;
use crate::gateway::RealtimeGateway;
use crate::lifecycle::{LifecyclePorts, NewTrip, RideLifecycle};
use crate::location::{LocationRegistry, LocationReport};
use crate::model::{
    Driver, DriverId, DriverStats, GeoPoint, PaymentMethod, PaymentStatus, Place, RiderId, Trip,
    TripId, TripStatus, VehicleType, VerificationStatus,
};
use crate::ports::{DriverRepository, TripRepository};
use crate::realtime::{ConnectionId, InMemoryHub, OutboundEvent, RealtimeChannel, TripRequestPayload};
use crate::spatial::offset_north_km;
use crate::telemetry::RideTelemetry;

/// Alexanderplatz, Berlin. Pickup point for most fixtures.
pub const BERLIN_CENTER: GeoPoint = GeoPoint::new(52.52, 13.405);

pub fn berlin_center() -> GeoPoint {
    BERLIN_CENTER
}

/// A point `km` due north of [`BERLIN_CENTER`].
pub fn km_north(km: f64) -> GeoPoint {
    offset_north_km(BERLIN_CENTER, km)
}

/// Economy card trip from the center to 5 km north.
pub fn new_trip(distance_km: f64, duration_min: f64) -> NewTrip {
    NewTrip {
        rider_id: RiderId::new("rider-1"),
        pickup: Place::new("Alexanderplatz", BERLIN_CENTER),
        dropoff: Place::new("Pankow", km_north(5.0)),
        distance_km,
        duration_min,
        payment_method: PaymentMethod::Card,
        vehicle_type: Some(VehicleType::Economy),
    }
}

/// Builds a stored-shape [`Trip`] directly, bypassing the lifecycle.
#[derive(Debug, Clone)]
pub struct TripBuilder {
    trip: Trip,
}

impl Default for TripBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl TripBuilder {
    pub fn new() -> Self {
        let now = Utc::now();
        Self {
            trip: Trip {
                id: TripId::new(),
                rider_id: RiderId::new("rider-1"),
                driver_id: None,
                pickup: Place::new("Alexanderplatz", BERLIN_CENTER),
                dropoff: Place::new("Pankow", km_north(5.0)),
                distance_km: 5.0,
                duration_min: 15.0,
                fare: Decimal::new(310_000, 2),
                surge_multiplier: Decimal::ONE,
                split: None,
                status: TripStatus::Requested,
                vehicle_type: VehicleType::Economy,
                payment_method: PaymentMethod::Card,
                payment_status: PaymentStatus::Pending,
                payment_reference: None,
                payment_client_secret: None,
                cancellation_reason: None,
                requested_at: now,
                accepted_at: None,
                started_at: None,
                completed_at: None,
                cancelled_at: None,
                updated_at: now,
            },
        }
    }

    pub fn with_driver(mut self, driver_id: DriverId) -> Self {
        self.trip.driver_id = Some(driver_id);
        self
    }

    pub fn with_status(mut self, status: TripStatus) -> Self {
        self.trip.status = status;
        self
    }

    pub fn with_pickup(mut self, point: GeoPoint) -> Self {
        self.trip.pickup.location = point;
        self
    }

    pub fn with_vehicle_type(mut self, vehicle_type: VehicleType) -> Self {
        self.trip.vehicle_type = vehicle_type;
        self
    }

    pub fn requested_at(mut self, at: DateTime<Utc>) -> Self {
        self.trip.requested_at = at;
        self.trip.updated_at = at;
        self
    }

    pub fn build(self) -> Trip {
        self.trip
    }
}

/// Approved economy driver without stats unless told otherwise.
#[derive(Debug, Clone)]
pub struct DriverBuilder {
    driver: Driver,
}

impl DriverBuilder {
    pub fn new(id: &str) -> Self {
        Self {
            driver: Driver {
                id: DriverId::new(id),
                name: format!("Driver {id}"),
                phone: "+49 30 0000000".to_string(),
                vehicle_type: VehicleType::Economy,
                verification: VerificationStatus::Approved,
                stats: None,
            },
        }
    }

    pub fn with_verification(mut self, verification: VerificationStatus) -> Self {
        self.driver.verification = verification;
        self
    }

    pub fn with_vehicle_type(mut self, vehicle_type: VehicleType) -> Self {
        self.driver.vehicle_type = vehicle_type;
        self
    }

    pub fn with_stats(mut self, rating: f64, acceptance_rate: f64, online_since: Option<DateTime<Utc>>) -> Self {
        self.driver.stats = Some(DriverStats {
            rating,
            acceptance_rate,
            online_since,
        });
        self
    }

    pub fn build(self) -> Driver {
        self.driver
    }
}

/// `count` approved drivers scattered uniformly within `radius_km` of `center`.
///
/// Deterministic for a given seed.
pub fn random_fleet(seed: u64, count: usize, center: GeoPoint, radius_km: f64) -> Vec<(Driver, GeoPoint)> {
    let mut rng = StdRng::seed_from_u64(seed);
    // Degrees per km, good enough away from the poles.
    let lat_deg_per_km = 1.0 / 111.32;
    let lng_deg_per_km = lat_deg_per_km / center.lat.to_radians().cos().max(0.01);
    (0..count)
        .map(|i| {
            let distance = radius_km * rng.gen::<f64>().sqrt();
            let bearing = rng.gen_range(0.0..std::f64::consts::TAU);
            let position = GeoPoint::new(
                center.lat + distance * bearing.cos() * lat_deg_per_km,
                center.lng + distance * bearing.sin() * lng_deg_per_km,
            );
            let vehicle_type = VehicleType::ALL[rng.gen_range(0..VehicleType::ALL.len())];
            let driver = DriverBuilder::new(&format!("fleet-{i:04}"))
                .with_vehicle_type(vehicle_type)
                .with_stats(
                    rng.gen_range(3.5..=5.0),
                    rng.gen_range(0.5..=1.0),
                    None,
                )
                .build();
            (driver, position)
        })
        .collect()
}

/// A driver connected to the hub and subscribed to its own channel.
pub struct OnlineDriver {
    pub id: DriverId,
    pub connection: ConnectionId,
    pub inbox: UnboundedReceiver<OutboundEvent>,
}

impl OnlineDriver {
    /// Everything delivered so far.
    pub fn drain(&mut self) -> Vec<OutboundEvent> {
        let mut events = Vec::new();
        while let Ok(event) = self.inbox.try_recv() {
            events.push(event);
        }
        events
    }

    /// Trip requests delivered so far.
    pub fn trip_requests(&mut self) -> Vec<TripRequestPayload> {
        self.drain()
            .into_iter()
            .filter_map(|event| match event {
                OutboundEvent::TripRequest(payload) => Some(payload),
                _ => None,
            })
            .collect()
    }
}

/// The whole core wired against in-memory adapters and a manual clock.
pub struct TestStack {
    pub config: ServiceConfig,
    pub store: Arc<InMemoryStore>,
    pub hub: Arc<InMemoryHub>,
    pub payments: Arc<InMemoryPaymentGateway>,
    pub clock: Arc<ManualClock>,
    pub telemetry: Arc<RideTelemetry>,
    pub locations: Arc<LocationRegistry>,
    pub dispatch: DispatchEngine,
    pub lifecycle: RideLifecycle,
    pub gateway: RealtimeGateway,
}

impl Default for TestStack {
    fn default() -> Self {
        Self::new()
    }
}

impl TestStack {
    pub fn new() -> Self {
        Self::with_config(ServiceConfig::default())
    }

    pub fn with_config(config: ServiceConfig) -> Self {
        Self::with_payments(config, Arc::new(InMemoryPaymentGateway::default()))
    }

    pub fn with_payments(config: ServiceConfig, payments: Arc<InMemoryPaymentGateway>) -> Self {
        let store = Arc::new(InMemoryStore::new());
        let hub = Arc::new(InMemoryHub::new());
        let clock = Arc::new(ManualClock::new(Utc::now()));
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
                payments: payments.clone(),
                channel: hub.clone(),
                clock: clock.clone(),
                telemetry: telemetry.clone(),
            },
            dispatch.clone(),
            &config,
        );
        let gateway = RealtimeGateway::new(locations.clone(), store.clone(), hub.clone());
        Self {
            config,
            store,
            hub,
            payments,
            clock,
            telemetry,
            locations,
            dispatch,
            lifecycle,
            gateway,
        }
    }

    /// Store `driver` without connecting it.
    pub async fn register_driver(&self, driver: Driver) -> Driver {
        self.store
            .upsert_driver(driver.clone())
            .await
            .expect("in-memory upsert cannot fail");
        driver
    }

    /// Register, connect, join `driver:{id}` and report `position`.
    pub async fn online_driver(&self, driver: Driver, position: GeoPoint) -> OnlineDriver {
        let driver = self.register_driver(driver).await;
        let (connection, inbox) = self.hub.connect();
        self.hub
            .join_driver_channel(connection, driver.id.clone())
            .await
            .expect("fresh connection can join");
        self.locations
            .set_location(LocationReport::new(driver.id.clone(), position))
            .await
            .expect("fixture position is valid");
        OnlineDriver {
            id: driver.id,
            connection,
            inbox,
        }
    }

    /// Approved economy drivers at the given distances north of the pickup.
    pub async fn drivers_at(&self, distances_km: &[f64]) -> Vec<OnlineDriver> {
        let mut online = Vec::with_capacity(distances_km.len());
        for (i, km) in distances_km.iter().enumerate() {
            let driver = DriverBuilder::new(&format!("d-{i}")).build();
            online.push(self.online_driver(driver, km_north(*km)).await);
        }
        online
    }

    pub async fn stored_trip(&self, trip_id: TripId) -> Trip {
        self.store
            .get_trip(trip_id)
            .await
            .expect("in-memory read cannot fail")
            .expect("trip exists")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::spatial::haversine_km;

    #[test]
    fn km_north_is_accurate() {
        let point = km_north(3.0);
        assert!((haversine_km(BERLIN_CENTER, point) - 3.0).abs() < 0.01);
    }

    #[test]
    fn random_fleet_is_deterministic_and_bounded() {
        let a = random_fleet(7, 50, BERLIN_CENTER, 10.0);
        let b = random_fleet(7, 50, BERLIN_CENTER, 10.0);
        assert_eq!(a, b);
        for (_, position) in &a {
            assert!(haversine_km(BERLIN_CENTER, *position) <= 10.5);
        }
    }

    #[tokio::test]
    async fn online_driver_is_reachable() {
        let stack = TestStack::new();
        let online = stack
            .online_driver(DriverBuilder::new("d-1").build(), BERLIN_CENTER)
            .await;
        assert!(stack
            .hub
            .is_connected(&crate::realtime::Channel::Driver(online.id.clone()))
            .await);
        assert!(stack.locations.get_location(&online.id).await.expect("get").is_some());
    }
}
