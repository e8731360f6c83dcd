//! Telemetry / KPIs: tracing setup, completed-trip ledger, dispatch counters.

use std::sync::atomic::{AtomicU64, Ordering};

use chrono::{DateTime, Duration, Utc};
use parking_lot::Mutex;
use rust_decimal::Decimal;
use serde::Serialize;
use thiserror::Error;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use crate::model::{DriverId, PaymentMethod, PaymentStatus, RiderId, Trip, TripId, TripStatus};

#[derive(Debug, Error)]
pub enum TelemetryError {
    #[error("failed to initialise tracing: {0}")]
    Init(String),
}

/// Install a `fmt` subscriber. `RUST_LOG` wins over `default_filter`.
/// A second call returns an error.
pub fn init_tracing(default_filter: &str) -> Result<(), TelemetryError> {
    let env_filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(default_filter))
        .map_err(|e| TelemetryError::Init(e.to_string()))?;
    let fmt_layer = tracing_subscriber::fmt::layer()
        .with_target(true)
        .with_thread_ids(false)
        .with_ansi(true);
    tracing_subscriber::registry()
        .with(env_filter)
        .with(fmt_layer)
        .try_init()
        .map_err(|e| TelemetryError::Init(e.to_string()))
}

/// One completed trip, recorded after the completion write lands.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CompletedTripRecord {
    pub trip_id: TripId,
    pub rider_id: RiderId,
    pub driver_id: DriverId,
    pub fare: Decimal,
    pub surge_multiplier: Decimal,
    pub platform_share: Decimal,
    pub driver_share: Decimal,
    pub payment_method: PaymentMethod,
    pub payment_status: PaymentStatus,
    pub requested_at: DateTime<Utc>,
    pub accepted_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: DateTime<Utc>,
}

impl CompletedTripRecord {
    /// `None` unless `trip` is completed and carries everything a record needs.
    pub fn from_trip(trip: &Trip) -> Option<Self> {
        if trip.status != TripStatus::Completed {
            return None;
        }
        let split = trip.split?;
        Some(Self {
            trip_id: trip.id,
            rider_id: trip.rider_id.clone(),
            driver_id: trip.driver_id.clone()?,
            fare: trip.fare,
            surge_multiplier: trip.surge_multiplier,
            platform_share: split.platform_share,
            driver_share: split.driver_share,
            payment_method: trip.payment_method,
            payment_status: trip.payment_status,
            requested_at: trip.requested_at,
            accepted_at: trip.accepted_at?,
            started_at: trip.started_at,
            completed_at: trip.completed_at?,
        })
    }

    /// Time from request to driver acceptance.
    pub fn time_to_accept(&self) -> Duration {
        self.accepted_at - self.requested_at
    }

    /// Time from pickup to dropoff. `None` when the trip was completed without a start.
    pub fn trip_duration(&self) -> Option<Duration> {
        self.started_at.map(|started| self.completed_at - started)
    }
}

#[derive(Debug, Default)]
pub struct DispatchCounters {
    trips_requested: AtomicU64,
    waves_sent: AtomicU64,
    notifications_sent: AtomicU64,
    fallback_broadcasts: AtomicU64,
    accepts_won: AtomicU64,
    accepts_lost: AtomicU64,
    trips_completed: AtomicU64,
    trips_cancelled: AtomicU64,
    payment_failures: AtomicU64,
}

/// Point-in-time copy of [`DispatchCounters`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct CounterSnapshot {
    pub trips_requested: u64,
    pub waves_sent: u64,
    pub notifications_sent: u64,
    pub fallback_broadcasts: u64,
    pub accepts_won: u64,
    pub accepts_lost: u64,
    pub trips_completed: u64,
    pub trips_cancelled: u64,
    pub payment_failures: u64,
}

impl DispatchCounters {
    pub fn trip_requested(&self) {
        self.trips_requested.fetch_add(1, Ordering::Relaxed);
    }

    pub fn wave_sent(&self) {
        self.waves_sent.fetch_add(1, Ordering::Relaxed);
    }

    pub fn notifications_sent(&self, count: usize) {
        self.notifications_sent
            .fetch_add(count as u64, Ordering::Relaxed);
    }

    pub fn fallback_broadcast(&self) {
        self.fallback_broadcasts.fetch_add(1, Ordering::Relaxed);
    }

    pub fn accept_won(&self) {
        self.accepts_won.fetch_add(1, Ordering::Relaxed);
    }

    pub fn accept_lost(&self) {
        self.accepts_lost.fetch_add(1, Ordering::Relaxed);
    }

    pub fn trip_completed(&self) {
        self.trips_completed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn trip_cancelled(&self) {
        self.trips_cancelled.fetch_add(1, Ordering::Relaxed);
    }

    pub fn payment_failed(&self) {
        self.payment_failures.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> CounterSnapshot {
        CounterSnapshot {
            trips_requested: self.trips_requested.load(Ordering::Relaxed),
            waves_sent: self.waves_sent.load(Ordering::Relaxed),
            notifications_sent: self.notifications_sent.load(Ordering::Relaxed),
            fallback_broadcasts: self.fallback_broadcasts.load(Ordering::Relaxed),
            accepts_won: self.accepts_won.load(Ordering::Relaxed),
            accepts_lost: self.accepts_lost.load(Ordering::Relaxed),
            trips_completed: self.trips_completed.load(Ordering::Relaxed),
            trips_cancelled: self.trips_cancelled.load(Ordering::Relaxed),
            payment_failures: self.payment_failures.load(Ordering::Relaxed),
        }
    }
}

/// Shared sink for counters and the completed-trip ledger.
#[derive(Debug, Default)]
pub struct RideTelemetry {
    pub counters: DispatchCounters,
    completed: Mutex<Vec<CompletedTripRecord>>,
}

impl RideTelemetry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_completion(&self, trip: &Trip) {
        if let Some(record) = CompletedTripRecord::from_trip(trip) {
            self.completed.lock().push(record);
            self.counters.trip_completed();
        }
    }

    pub fn completed_trips(&self) -> Vec<CompletedTripRecord> {
        self.completed.lock().clone()
    }

    /// Take every record collected so far, leaving the ledger empty. Counters are kept.
    pub fn drain_completed(&self) -> Vec<CompletedTripRecord> {
        std::mem::take(&mut *self.completed.lock())
    }

    /// Sum of platform commission over the records not yet drained.
    pub fn platform_revenue(&self) -> Decimal {
        self.completed
            .lock()
            .iter()
            .map(|record| record.platform_share)
            .sum()
    }
}
