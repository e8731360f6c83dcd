//! Live driver positions.
//!
//! One record per driver, overwritten on every report; the last report wins.
//! A report without a trip id is tied to whatever non-terminal trip the driver
//! currently holds. Records older than the configured threshold stay readable
//! but are not considered fresh enough to dispatch to.

use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, trace};

use crate::clock::Clock;
use crate::config::LocationConfig;
use crate::error::DispatchError;
use crate::model::{DriverId, DriverLocationRecord, GeoPoint, TripId};
use crate::ports::{LocationStore, TripRepository};
use crate::spatial::validate_point;

/// A position report as sent by the driver app.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LocationReport {
    pub driver_id: DriverId,
    pub lat: f64,
    pub lng: f64,
    #[serde(default)]
    pub heading: Option<f64>,
    #[serde(default)]
    pub speed_kph: Option<f64>,
    #[serde(default)]
    pub trip_id: Option<TripId>,
}

impl LocationReport {
    pub fn new(driver_id: DriverId, position: GeoPoint) -> Self {
        Self {
            driver_id,
            lat: position.lat,
            lng: position.lng,
            heading: None,
            speed_kph: None,
            trip_id: None,
        }
    }

    pub fn with_heading(mut self, heading: f64) -> Self {
        self.heading = Some(heading);
        self
    }

    pub fn with_speed_kph(mut self, speed_kph: f64) -> Self {
        self.speed_kph = Some(speed_kph);
        self
    }

    pub fn with_trip(mut self, trip_id: TripId) -> Self {
        self.trip_id = Some(trip_id);
        self
    }

    pub fn position(&self) -> GeoPoint {
        GeoPoint::new(self.lat, self.lng)
    }
}

pub struct LocationRegistry {
    store: Arc<dyn LocationStore>,
    trips: Arc<dyn TripRepository>,
    clock: Arc<dyn Clock>,
    stale_after: Option<Duration>,
}

impl LocationRegistry {
    pub fn new(
        store: Arc<dyn LocationStore>,
        trips: Arc<dyn TripRepository>,
        clock: Arc<dyn Clock>,
        config: LocationConfig,
    ) -> Self {
        Self {
            store,
            trips,
            clock,
            stale_after: config.stale_after(),
        }
    }

    /// Store a report, replacing the driver's previous record.
    pub async fn set_location(
        &self,
        report: LocationReport,
    ) -> Result<DriverLocationRecord, DispatchError> {
        let position = report.position();
        validate_point(position)?;
        if let Some(heading) = report.heading {
            if !heading.is_finite() {
                return Err(DispatchError::Validation("heading must be finite".into()));
            }
        }
        if let Some(speed) = report.speed_kph {
            if !speed.is_finite() || speed < 0.0 {
                return Err(DispatchError::Validation(
                    "speed must be finite and non-negative".into(),
                ));
            }
        }

        let active_trip = match report.trip_id {
            Some(trip_id) => Some(trip_id),
            None => self
                .trips
                .find_active_trip_for_driver(&report.driver_id)
                .await?
                .map(|trip| trip.id),
        };

        let record = DriverLocationRecord {
            driver_id: report.driver_id,
            position,
            heading: report.heading,
            speed_kph: report.speed_kph,
            active_trip,
            updated_at: self.clock.now(),
        };
        self.store.set_driver_location(record.clone()).await?;
        trace!(
            driver_id = %record.driver_id,
            lat = position.lat,
            lng = position.lng,
            trip_id = ?record.active_trip,
            "Driver location updated"
        );
        Ok(record)
    }

    pub async fn get_location(
        &self,
        driver_id: &DriverId,
    ) -> Result<Option<DriverLocationRecord>, DispatchError> {
        self.store.get_driver_location(driver_id).await
    }

    pub async fn list_locations(&self) -> Result<Vec<DriverLocationRecord>, DispatchError> {
        self.store.list_driver_locations().await
    }

    /// Whether `record` is too old to dispatch to at `now`.
    pub fn is_stale(&self, record: &DriverLocationRecord, now: DateTime<Utc>) -> bool {
        self.stale_after
            .is_some_and(|threshold| now - record.updated_at > threshold)
    }

    /// Records recent enough to be dispatched to.
    pub async fn fresh_locations(&self) -> Result<Vec<DriverLocationRecord>, DispatchError> {
        let now = self.clock.now();
        let all = self.list_locations().await?;
        let total = all.len();
        let fresh: Vec<_> = all
            .into_iter()
            .filter(|record| !self.is_stale(record, now))
            .collect();
        if fresh.len() < total {
            debug!(
                total,
                stale = total - fresh.len(),
                "Dropped stale driver locations"
            );
        }
        Ok(fresh)
    }

    pub fn now(&self) -> DateTime<Utc> {
        self.clock.now()
    }
}
