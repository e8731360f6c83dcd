//! Durable adapter: in-memory state mirrored to a JSON snapshot file.
//!
//! Every mutation is applied to a copy of the state, written through a temp file
//! and an atomic rename, and only then swapped into memory. A failed write leaves
//! both the file and the in-memory view at their previous state.
//! Driver records are accepted in both `snake_case` and `camelCase` field
//! spellings and converted to the canonical [`Driver`] here.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tracing::debug;

use super::memory::{InMemoryStore, StoreState};
use crate::error::DispatchError;
use crate::model::{
    Driver, DriverId, DriverLocationRecord, DriverStats, Trip, TripId, TripStatus, VehicleType,
    VerificationStatus,
};
use crate::ports::{DriverRepository, LocationStore, TripRepository};

#[derive(Debug, Default, Serialize, Deserialize)]
struct Snapshot {
    #[serde(default)]
    trips: Vec<Trip>,
    #[serde(default)]
    drivers: Vec<StoredDriver>,
    #[serde(default)]
    locations: Vec<DriverLocationRecord>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct StoredStats {
    rating: f64,
    #[serde(alias = "acceptanceRate")]
    acceptance_rate: f64,
    #[serde(default, alias = "onlineSince")]
    online_since: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct StoredDriver {
    id: DriverId,
    name: String,
    #[serde(default, alias = "phoneNumber")]
    phone: String,
    #[serde(alias = "vehicleType")]
    vehicle_type: VehicleType,
    #[serde(alias = "verificationStatus", alias = "verification_status")]
    verification: VerificationStatus,
    #[serde(default)]
    stats: Option<StoredStats>,
}

impl From<StoredDriver> for Driver {
    fn from(stored: StoredDriver) -> Self {
        Driver {
            id: stored.id,
            name: stored.name,
            phone: stored.phone,
            vehicle_type: stored.vehicle_type,
            verification: stored.verification,
            stats: stored.stats.map(|s| DriverStats {
                rating: s.rating,
                acceptance_rate: s.acceptance_rate,
                online_since: s.online_since,
            }),
        }
    }
}

impl From<&Driver> for StoredDriver {
    fn from(driver: &Driver) -> Self {
        StoredDriver {
            id: driver.id.clone(),
            name: driver.name.clone(),
            phone: driver.phone.clone(),
            vehicle_type: driver.vehicle_type,
            verification: driver.verification,
            stats: driver.stats.map(|s| StoredStats {
                rating: s.rating,
                acceptance_rate: s.acceptance_rate,
                online_since: s.online_since,
            }),
        }
    }
}

impl From<Snapshot> for StoreState {
    fn from(snapshot: Snapshot) -> Self {
        let mut state = StoreState::default();
        for trip in snapshot.trips {
            state.trips.insert(trip.id, trip);
        }
        for driver in snapshot.drivers {
            let driver = Driver::from(driver);
            state.drivers.insert(driver.id.clone(), driver);
        }
        for record in snapshot.locations {
            state.locations.insert(record.driver_id.clone(), record);
        }
        state
    }
}

impl From<&StoreState> for Snapshot {
    fn from(state: &StoreState) -> Self {
        let mut trips: Vec<Trip> = state.trips.values().cloned().collect();
        trips.sort_by_key(|t| (t.requested_at, t.id));
        let mut drivers: Vec<StoredDriver> = state.drivers.values().map(StoredDriver::from).collect();
        drivers.sort_by(|a, b| a.id.cmp(&b.id));
        let mut locations: Vec<DriverLocationRecord> = state.locations.values().cloned().collect();
        locations.sort_by(|a, b| a.driver_id.cmp(&b.driver_id));
        Snapshot {
            trips,
            drivers,
            locations,
        }
    }
}

fn io_error(path: &Path, err: impl std::fmt::Display) -> DispatchError {
    DispatchError::persistence(format!("{}: {err}", path.display()))
}

pub struct JsonFileStore {
    path: PathBuf,
    inner: InMemoryStore,
    /// Serializes copy-persist-swap so snapshots hit the disk in mutation order.
    write_lock: Mutex<()>,
}

impl JsonFileStore {
    /// Open the store at `path`, loading the snapshot if the file exists.
    pub async fn open(path: impl Into<PathBuf>) -> Result<Self, DispatchError> {
        let path = path.into();
        let state = match tokio::fs::read(&path).await {
            Ok(bytes) => {
                let snapshot: Snapshot =
                    serde_json::from_slice(&bytes).map_err(|err| io_error(&path, err))?;
                StoreState::from(snapshot)
            }
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => StoreState::default(),
            Err(err) => return Err(io_error(&path, err)),
        };
        debug!(
            path = %path.display(),
            trips = state.trips.len(),
            drivers = state.drivers.len(),
            "Opened JSON file store"
        );
        Ok(Self {
            path,
            inner: InMemoryStore::from_state(state),
            write_lock: Mutex::new(()),
        })
    }

    /// Apply `mutate` to a copy of the current state and commit it once it is on disk.
    async fn commit<T>(
        &self,
        mutate: impl FnOnce(&mut StoreState) -> Result<T, DispatchError>,
    ) -> Result<T, DispatchError> {
        let _guard = self.write_lock.lock().await;
        let mut next = self.inner.snapshot();
        let out = mutate(&mut next)?;
        self.persist(&next).await?;
        self.inner.replace_state(next);
        Ok(out)
    }

    async fn persist(&self, state: &StoreState) -> Result<(), DispatchError> {
        let snapshot = Snapshot::from(state);
        let bytes = serde_json::to_vec_pretty(&snapshot).map_err(|err| io_error(&self.path, err))?;
        let tmp = self.path.with_extension("json.tmp");
        tokio::fs::write(&tmp, bytes)
            .await
            .map_err(|err| io_error(&tmp, err))?;
        tokio::fs::rename(&tmp, &self.path)
            .await
            .map_err(|err| io_error(&self.path, err))
    }
}

#[async_trait]
impl TripRepository for JsonFileStore {
    async fn insert_trip(&self, trip: Trip) -> Result<(), DispatchError> {
        self.commit(|state| state.insert_trip(trip)).await
    }

    async fn get_trip(&self, id: TripId) -> Result<Option<Trip>, DispatchError> {
        self.inner.get_trip(id).await
    }

    async fn update_trip_if(&self, trip: &Trip, expected: TripStatus) -> Result<bool, DispatchError> {
        let _guard = self.write_lock.lock().await;
        let mut next = self.inner.snapshot();
        if !next.update_trip_if(trip, expected)? {
            return Ok(false);
        }
        self.persist(&next).await?;
        self.inner.replace_state(next);
        Ok(true)
    }

    async fn find_active_trip_for_driver(
        &self,
        driver_id: &DriverId,
    ) -> Result<Option<Trip>, DispatchError> {
        self.inner.find_active_trip_for_driver(driver_id).await
    }

    async fn count_trips_with_status(&self, status: TripStatus) -> Result<usize, DispatchError> {
        self.inner.count_trips_with_status(status).await
    }
}

#[async_trait]
impl DriverRepository for JsonFileStore {
    async fn get_driver(&self, id: &DriverId) -> Result<Option<Driver>, DispatchError> {
        self.inner.get_driver(id).await
    }

    async fn upsert_driver(&self, driver: Driver) -> Result<(), DispatchError> {
        self.commit(|state| {
            state.upsert_driver(driver);
            Ok(())
        })
        .await
    }
}

#[async_trait]
impl LocationStore for JsonFileStore {
    async fn set_driver_location(&self, record: DriverLocationRecord) -> Result<(), DispatchError> {
        self.commit(|state| {
            state.set_location(record);
            Ok(())
        })
        .await
    }

    async fn get_driver_location(
        &self,
        driver_id: &DriverId,
    ) -> Result<Option<DriverLocationRecord>, DispatchError> {
        self.inner.get_driver_location(driver_id).await
    }

    async fn list_driver_locations(&self) -> Result<Vec<DriverLocationRecord>, DispatchError> {
        self.inner.list_driver_locations().await
    }
}
