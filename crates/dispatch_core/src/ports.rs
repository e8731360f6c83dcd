//! Collaborator contracts the dispatch core depends on.
//!
//! The core never reaches for a global store: every component is handed the
//! ports it needs. `adapters` holds the in-memory and durable implementations.

use async_trait::async_trait;

use crate::error::{DispatchError, PaymentError};
use crate::model::{Driver, DriverId, DriverLocationRecord, Trip, TripId, TripStatus};

/// Trip persistence.
///
/// Status transitions must go through [`TripRepository::update_trip_if`]; a
/// read-then-write would let two drivers accept the same trip.
#[async_trait]
pub trait TripRepository: Send + Sync {
    /// Insert a new trip. Fails if the id is already taken.
    async fn insert_trip(&self, trip: Trip) -> Result<(), DispatchError>;

    async fn get_trip(&self, id: TripId) -> Result<Option<Trip>, DispatchError>;

    /// Atomically replace the stored trip if its current status equals `expected`.
    ///
    /// Returns `Ok(false)` without writing when the stored status differs.
    async fn update_trip_if(&self, trip: &Trip, expected: TripStatus) -> Result<bool, DispatchError>;

    /// The driver's trip that has not reached a terminal status, if any.
    async fn find_active_trip_for_driver(
        &self,
        driver_id: &DriverId,
    ) -> Result<Option<Trip>, DispatchError>;

    async fn count_trips_with_status(&self, status: TripStatus) -> Result<usize, DispatchError>;
}

#[async_trait]
pub trait DriverRepository: Send + Sync {
    async fn get_driver(&self, id: &DriverId) -> Result<Option<Driver>, DispatchError>;

    async fn upsert_driver(&self, driver: Driver) -> Result<(), DispatchError>;
}

/// Latest-position storage, one record per driver.
#[async_trait]
pub trait LocationStore: Send + Sync {
    async fn set_driver_location(&self, record: DriverLocationRecord) -> Result<(), DispatchError>;

    async fn get_driver_location(
        &self,
        driver_id: &DriverId,
    ) -> Result<Option<DriverLocationRecord>, DispatchError>;

    async fn list_driver_locations(&self) -> Result<Vec<DriverLocationRecord>, DispatchError>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChargeStatus {
    Succeeded,
    Processing,
    RequiresAction,
}

/// Result of creating a charge or payment intent.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Charge {
    pub id: String,
    pub status: ChargeStatus,
    pub client_secret: Option<String>,
}

/// Card payment collaborator, invoked only when a card-like trip completes.
///
/// `trip_id` is the idempotency key: a repeated call for the same trip and amount
/// must return the existing charge instead of creating a second one.
#[async_trait]
pub trait PaymentGateway: Send + Sync {
    async fn create_charge(
        &self,
        trip_id: TripId,
        amount_minor: i64,
        description: &str,
    ) -> Result<Charge, PaymentError>;
}
