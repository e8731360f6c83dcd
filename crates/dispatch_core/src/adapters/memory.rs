//! In-memory persistence adapter.
//!
//! One `RwLock` guards trips, drivers and locations. The conditional trip update
//! compares and writes under a single write guard, which is what makes the
//! accept race safe. Guards are never held across an `.await`.

use std::collections::HashMap;

use async_trait::async_trait;
use parking_lot::RwLock;

use crate::error::DispatchError;
use crate::model::{Driver, DriverId, DriverLocationRecord, Trip, TripId, TripStatus};
use crate::ports::{DriverRepository, LocationStore, TripRepository};

#[derive(Debug, Default, Clone)]
pub(crate) struct StoreState {
    pub(crate) trips: HashMap<TripId, Trip>,
    pub(crate) drivers: HashMap<DriverId, Driver>,
    pub(crate) locations: HashMap<DriverId, DriverLocationRecord>,
}

impl StoreState {
    pub(crate) fn insert_trip(&mut self, trip: Trip) -> Result<(), DispatchError> {
        if self.trips.contains_key(&trip.id) {
            return Err(DispatchError::Validation(format!(
                "trip {} already exists",
                trip.id
            )));
        }
        self.trips.insert(trip.id, trip);
        Ok(())
    }

    pub(crate) fn update_trip_if(&mut self, trip: &Trip, expected: TripStatus) -> Result<bool, DispatchError> {
        let stored = self
            .trips
            .get_mut(&trip.id)
            .ok_or_else(|| DispatchError::trip_not_found(trip.id))?;
        if stored.status != expected {
            return Ok(false);
        }
        *stored = trip.clone();
        Ok(true)
    }

    pub(crate) fn upsert_driver(&mut self, driver: Driver) {
        self.drivers.insert(driver.id.clone(), driver);
    }

    pub(crate) fn set_location(&mut self, record: DriverLocationRecord) {
        self.locations.insert(record.driver_id.clone(), record);
    }
}

#[derive(Debug, Default)]
pub struct InMemoryStore {
    state: RwLock<StoreState>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub(crate) fn from_state(state: StoreState) -> Self {
        Self {
            state: RwLock::new(state),
        }
    }

    pub(crate) fn snapshot(&self) -> StoreState {
        self.state.read().clone()
    }

    pub fn trip_count(&self) -> usize {
        self.state.read().trips.len()
    }

    /// Swap in a whole new state.
    pub(crate) fn replace_state(&self, state: StoreState) {
        *self.state.write() = state;
    }
}
#[async_trait]
impl TripRepository for InMemoryStore {
    async fn insert_trip(&self, trip: Trip) -> Result<(), DispatchError> {
        self.state.write().insert_trip(trip)
    }

    async fn get_trip(&self, id: TripId) -> Result<Option<Trip>, DispatchError> {
        Ok(self.state.read().trips.get(&id).cloned())
    }

    async fn update_trip_if(&self, trip: &Trip, expected: TripStatus) -> Result<bool, DispatchError> {
        self.state.write().update_trip_if(trip, expected)
    }

    async fn find_active_trip_for_driver(
        &self,
        driver_id: &DriverId,
    ) -> Result<Option<Trip>, DispatchError> {
        let state = self.state.read();
        Ok(state
            .trips
            .values()
            .filter(|trip| !trip.status.is_terminal())
            .filter(|trip| trip.driver_id.as_ref() == Some(driver_id))
            .max_by_key(|trip| trip.updated_at)
            .cloned())
    }

    async fn count_trips_with_status(&self, status: TripStatus) -> Result<usize, DispatchError> {
        Ok(self
            .state
            .read()
            .trips
            .values()
            .filter(|trip| trip.status == status)
            .count())
    }
}

#[async_trait]
impl DriverRepository for InMemoryStore {
    async fn get_driver(&self, id: &DriverId) -> Result<Option<Driver>, DispatchError> {
        Ok(self.state.read().drivers.get(id).cloned())
    }

    async fn upsert_driver(&self, driver: Driver) -> Result<(), DispatchError> {
        self.state.write().upsert_driver(driver);
        Ok(())
    }
}

#[async_trait]
impl LocationStore for InMemoryStore {
    async fn set_driver_location(&self, record: DriverLocationRecord) -> Result<(), DispatchError> {
        self.state.write().set_location(record);
        Ok(())
    }

    async fn get_driver_location(
        &self,
        driver_id: &DriverId,
    ) -> Result<Option<DriverLocationRecord>, DispatchError> {
        Ok(self.state.read().locations.get(driver_id).cloned())
    }

    async fn list_driver_locations(&self) -> Result<Vec<DriverLocationRecord>, DispatchError> {
        Ok(self.state.read().locations.values().cloned().collect())
    }
}
