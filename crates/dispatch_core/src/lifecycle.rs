//! Trip state machine.
//!
//! `requested → accepted → in_progress → completed`, with `requested | accepted → cancelled`.
//! Every transition is a conditional write keyed on the status the trip was read
//! in, so two racing callers cannot both win.

use std::collections::HashSet;
use std::sync::Arc;

use parking_lot::Mutex;
use rust_decimal::Decimal;
use tracing::{debug, info, warn};

use crate::clock::Clock;
use crate::config::{ServiceConfig, SurgeMode};
use crate::dispatch::{DispatchEngine, DispatchHandle};
use crate::error::DispatchError;
use crate::model::{
    DriverId, PaymentMethod, PaymentStatus, Place, RiderId, Trip, TripId, TripStatus, VehicleType,
};
use crate::ports::{ChargeStatus, DriverRepository, PaymentGateway, TripRepository};
use crate::pricing::{
    calculate_all_fares, calculate_fare, measurement, split_payment, surge_multiplier,
    to_minor_units, FareQuote, FareSettings,
};
use crate::realtime::{Channel, OutboundEvent, RealtimeChannel, TripStatusPayload};
use crate::spatial::validate_point;
use crate::telemetry::RideTelemetry;

/// A rider's trip request.
#[derive(Debug, Clone, PartialEq)]
pub struct NewTrip {
    pub rider_id: RiderId,
    pub pickup: Place,
    pub dropoff: Place,
    pub distance_km: f64,
    pub duration_min: f64,
    pub payment_method: PaymentMethod,
    /// Defaults to economy.
    pub vehicle_type: Option<VehicleType>,
}

/// Corrections supplied by the driver app when a trip ends.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct Completion {
    pub actual_distance_km: Option<f64>,
    pub actual_duration_min: Option<f64>,
    pub payment_method: Option<PaymentMethod>,
}

impl Completion {
    pub fn with_distance_km(mut self, km: f64) -> Self {
        self.actual_distance_km = Some(km);
        self
    }

    pub fn with_duration_min(mut self, min: f64) -> Self {
        self.actual_duration_min = Some(min);
        self
    }

    pub fn with_payment_method(mut self, method: PaymentMethod) -> Self {
        self.payment_method = Some(method);
        self
    }
}

/// A stored trip plus the dispatch that is notifying drivers about it.
pub struct TripRequested {
    pub trip: Trip,
    pub dispatch: DispatchHandle,
}

/// Collaborators shared by the lifecycle.
#[derive(Clone)]
pub struct LifecyclePorts {
    pub trips: Arc<dyn TripRepository>,
    pub drivers: Arc<dyn DriverRepository>,
    pub payments: Arc<dyn PaymentGateway>,
    pub channel: Arc<dyn RealtimeChannel>,
    pub clock: Arc<dyn Clock>,
    pub telemetry: Arc<RideTelemetry>,
}

pub struct RideLifecycle {
    trips: Arc<dyn TripRepository>,
    drivers: Arc<dyn DriverRepository>,
    payments: Arc<dyn PaymentGateway>,
    channel: Arc<dyn RealtimeChannel>,
    clock: Arc<dyn Clock>,
    telemetry: Arc<RideTelemetry>,
    dispatch: DispatchEngine,
    fares: FareSettings,
    surge: SurgeMode,
    completing: Mutex<HashSet<TripId>>,
}

/// Marks a trip as being completed by this process. Released on drop.
struct CompletionClaim<'a> {
    completing: &'a Mutex<HashSet<TripId>>,
    trip_id: TripId,
}

impl<'a> CompletionClaim<'a> {
    fn acquire(completing: &'a Mutex<HashSet<TripId>>, trip_id: TripId) -> Option<Self> {
        completing
            .lock()
            .insert(trip_id)
            .then(|| Self { completing, trip_id })
    }
}

impl Drop for CompletionClaim<'_> {
    fn drop(&mut self) {
        self.completing.lock().remove(&self.trip_id);
    }
}

impl RideLifecycle {
    pub fn new(ports: LifecyclePorts, dispatch: DispatchEngine, config: &ServiceConfig) -> Self {
        Self {
            trips: ports.trips,
            drivers: ports.drivers,
            payments: ports.payments,
            channel: ports.channel,
            clock: ports.clock,
            telemetry: ports.telemetry,
            dispatch,
            fares: config.fares,
            surge: config.surge,
            completing: Mutex::new(HashSet::new()),
        }
    }

    pub async fn get(&self, trip_id: TripId) -> Result<Trip, DispatchError> {
        self.trips
            .get_trip(trip_id)
            .await?
            .ok_or_else(|| DispatchError::trip_not_found(trip_id))
    }

    /// Multiplier a request arriving now would lock in. The prospective trip counts
    /// as an open request.
    pub async fn current_surge(&self) -> Result<Decimal, DispatchError> {
        match self.surge {
            SurgeMode::Disabled => Ok(Decimal::ONE),
            SurgeMode::LockAtRequest => {
                let open = self.trips.count_trips_with_status(TripStatus::Requested).await? + 1;
                let available = self.dispatch.available_driver_count().await?;
                let multiplier = surge_multiplier(open, available);
                debug!(open, available, %multiplier, "Computed surge");
                Ok(multiplier)
            }
        }
    }

    /// Fares for every vehicle type at the current surge.
    pub async fn quote(&self, distance_km: f64, duration_min: f64) -> Result<Vec<FareQuote>, DispatchError> {
        let surge = self.current_surge().await?;
        calculate_all_fares(distance_km, duration_min, &self.fares, surge)
    }

    /// Price and store a new trip, then start dispatching it.
    pub async fn create(&self, request: NewTrip) -> Result<TripRequested, DispatchError> {
        validate_point(request.pickup.location)?;
        validate_point(request.dropoff.location)?;
        measurement("distance_km", request.distance_km)?;
        measurement("duration_min", request.duration_min)?;

        let vehicle_type = request.vehicle_type.unwrap_or_default();
        let surge = self.current_surge().await?;
        let fare = calculate_fare(
            request.distance_km,
            request.duration_min,
            &self.fares,
            vehicle_type,
            surge,
        )?;
        let now = self.clock.now();
        let trip = Trip {
            id: TripId::new(),
            rider_id: request.rider_id,
            driver_id: None,
            pickup: request.pickup,
            dropoff: request.dropoff,
            distance_km: request.distance_km,
            duration_min: request.duration_min,
            fare,
            surge_multiplier: surge,
            split: None,
            status: TripStatus::Requested,
            vehicle_type,
            payment_method: request.payment_method,
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
        };
        self.trips.insert_trip(trip.clone()).await?;
        self.telemetry.counters.trip_requested();
        info!(
            trip_id = %trip.id,
            rider_id = %trip.rider_id,
            %fare,
            %surge,
            vehicle_type = ?vehicle_type,
            "Trip requested"
        );

        let dispatch = self.dispatch.dispatch(&trip).await?;
        Ok(TripRequested { trip, dispatch })
    }

    /// Claim a requested trip. Exactly one of several racing drivers wins.
    pub async fn accept(&self, trip_id: TripId, driver_id: DriverId) -> Result<Trip, DispatchError> {
        let trip = self.get(trip_id).await?;
        if trip.status != TripStatus::Requested {
            return Err(DispatchError::conflict("trip not available", trip.status));
        }
        let driver = self
            .drivers
            .get_driver(&driver_id)
            .await?
            .ok_or_else(|| DispatchError::driver_not_found(&driver_id))?;
        if !driver.is_approved() {
            warn!(%trip_id, %driver_id, verification = ?driver.verification, "Unapproved driver tried to accept");
            return Err(DispatchError::Authorization {
                driver_id,
                reason: "driver not approved",
            });
        }

        let now = self.clock.now();
        let mut accepted = trip.clone();
        accepted.driver_id = Some(driver_id.clone());
        accepted.status = TripStatus::Accepted;
        accepted.accepted_at = Some(now);
        accepted.updated_at = now;

        if !self.trips.update_trip_if(&accepted, TripStatus::Requested).await? {
            self.telemetry.counters.accept_lost();
            debug!(%trip_id, %driver_id, "Lost accept race");
            return Err(self.lost_race(trip_id, "trip not available").await);
        }
        self.telemetry.counters.accept_won();
        info!(%trip_id, %driver_id, "Trip accepted");

        let mut payload = TripStatusPayload::new(trip_id, TripStatus::Accepted);
        payload.driver = Some(driver.public_profile());
        payload.fare = Some(accepted.fare);
        self.publish_status(&accepted, payload, true).await;
        Ok(accepted)
    }

    /// Rider picked up.
    pub async fn start(&self, trip_id: TripId, driver_id: DriverId) -> Result<Trip, DispatchError> {
        let trip = self.get(trip_id).await?;
        if trip.status != TripStatus::Accepted {
            return Err(DispatchError::conflict("trip not accepted", trip.status));
        }
        if trip.driver_id.as_ref() != Some(&driver_id) {
            return Err(DispatchError::Authorization {
                driver_id,
                reason: "not the assigned driver",
            });
        }

        let now = self.clock.now();
        let mut started = trip;
        started.status = TripStatus::InProgress;
        started.started_at = Some(now);
        started.updated_at = now;
        if !self.trips.update_trip_if(&started, TripStatus::Accepted).await? {
            return Err(self.lost_race(trip_id, "trip not accepted").await);
        }
        info!(%trip_id, %driver_id, "Trip started");

        let payload = TripStatusPayload::new(trip_id, TripStatus::InProgress);
        self.publish_status(&started, payload, false).await;
        Ok(started)
    }

    /// Finalize fare and payment.
    ///
    /// A failed charge returns before anything is written, so the call can be retried.
    /// Only one completion per trip runs at a time; a concurrent call is a conflict
    /// and never reaches the payment gateway. The charge is keyed on the trip id, so
    /// a gateway that honours that key will not double-charge a retried completion.
    pub async fn complete(&self, trip_id: TripId, completion: Completion) -> Result<Trip, DispatchError> {
        let Some(_claim) = CompletionClaim::acquire(&self.completing, trip_id) else {
            debug!(%trip_id, "Completion already in progress");
            return Err(self.lost_race(trip_id, "completion in progress").await);
        };
        let trip = self.get(trip_id).await?;
        if trip.driver_id.is_none() {
            return Err(DispatchError::conflict("no driver assigned", trip.status));
        }
        match trip.status {
            TripStatus::Completed => {
                return Err(DispatchError::conflict("trip already completed", trip.status))
            }
            TripStatus::Cancelled => return Err(DispatchError::conflict("trip cancelled", trip.status)),
            _ => {}
        }

        let distance_km = completion.actual_distance_km.unwrap_or(trip.distance_km);
        let duration_min = completion.actual_duration_min.unwrap_or(trip.duration_min);
        let payment_method = completion.payment_method.unwrap_or(trip.payment_method);
        measurement("distance_km", distance_km)?;
        measurement("duration_min", duration_min)?;

        let fare = calculate_fare(
            distance_km,
            duration_min,
            &self.fares,
            trip.vehicle_type,
            trip.surge_multiplier,
        )?;
        let split = split_payment(fare, self.fares.commission_percent)?;

        let (payment_status, payment_reference, client_secret) = if payment_method.is_card_like() {
            let amount_minor = to_minor_units(fare)?;
            let description = format!("Ride {trip_id}");
            match self
                .payments
                .create_charge(trip_id, amount_minor, &description)
                .await
            {
                Ok(charge) => {
                    let status = match charge.status {
                        ChargeStatus::Succeeded => PaymentStatus::Paid,
                        ChargeStatus::Processing | ChargeStatus::RequiresAction => {
                            PaymentStatus::AwaitingConfirmation
                        }
                    };
                    (status, Some(charge.id), charge.client_secret)
                }
                Err(err) => {
                    self.telemetry.counters.payment_failed();
                    warn!(%trip_id, amount_minor, error = %err, "Charge failed, trip left unchanged");
                    return Err(err.into());
                }
            }
        } else {
            (PaymentStatus::Paid, None, None)
        };

        let now = self.clock.now();
        let previous = trip.status;
        let mut completed = trip;
        completed.distance_km = distance_km;
        completed.duration_min = duration_min;
        completed.payment_method = payment_method;
        completed.fare = fare;
        completed.split = Some(split);
        completed.payment_status = payment_status;
        completed.payment_reference = payment_reference;
        completed.payment_client_secret = client_secret.clone();
        completed.status = TripStatus::Completed;
        completed.completed_at = Some(now);
        completed.updated_at = now;

        if !self.trips.update_trip_if(&completed, previous).await? {
            warn!(
                %trip_id,
                charge = ?completed.payment_reference,
                "Trip changed while completing; charge was created but not recorded"
            );
            return Err(self.lost_race(trip_id, "trip changed during completion").await);
        }
        self.telemetry.record_completion(&completed);
        info!(
            %trip_id,
            %fare,
            platform_share = %split.platform_share,
            driver_share = %split.driver_share,
            payment_status = ?payment_status,
            "Trip completed"
        );

        let mut payload = TripStatusPayload::new(trip_id, TripStatus::Completed);
        payload.fare = Some(fare);
        payload.payment_status = Some(payment_status);
        payload.client_secret = client_secret;
        self.publish_status(&completed, payload, false).await;
        Ok(completed)
    }

    /// Cancel a trip that has not started. Clears the driver assignment.
    pub async fn cancel(&self, trip_id: TripId, reason: Option<String>) -> Result<Trip, DispatchError> {
        let trip = self.get(trip_id).await?;
        if !matches!(trip.status, TripStatus::Requested | TripStatus::Accepted) {
            return Err(DispatchError::conflict("trip cannot be cancelled", trip.status));
        }

        let now = self.clock.now();
        let previous = trip.status;
        let released = trip.driver_id.clone();
        let mut cancelled = trip;
        cancelled.status = TripStatus::Cancelled;
        cancelled.driver_id = None;
        cancelled.cancellation_reason = reason.clone();
        cancelled.cancelled_at = Some(now);
        cancelled.updated_at = now;
        if !self.trips.update_trip_if(&cancelled, previous).await? {
            return Err(self.lost_race(trip_id, "trip cannot be cancelled").await);
        }
        self.telemetry.counters.trip_cancelled();
        info!(%trip_id, from = %previous, reason = ?reason, "Trip cancelled");

        let mut payload = TripStatusPayload::new(trip_id, TripStatus::Cancelled);
        payload.reason = reason;
        if let Some(driver_id) = released {
            self.channel
                .publish(
                    &Channel::Driver(driver_id),
                    OutboundEvent::TripStatus(payload.clone()),
                )
                .await;
        }
        self.publish_status(&cancelled, payload, false).await;
        Ok(cancelled)
    }

    /// Conflict for a conditional write that found a different status.
    async fn lost_race(&self, trip_id: TripId, reason: &'static str) -> DispatchError {
        match self.trips.get_trip(trip_id).await {
            Ok(Some(current)) => DispatchError::conflict(reason, current.status),
            Ok(None) => DispatchError::trip_not_found(trip_id),
            Err(err) => err,
        }
    }

    async fn publish_status(&self, trip: &Trip, payload: TripStatusPayload, global: bool) {
        let event = OutboundEvent::TripStatus(payload);
        let delivered = self.channel.publish(&Channel::Trip(trip.id), event.clone()).await;
        let broadcast = if global {
            self.channel.publish_global(event).await
        } else {
            0
        };
        debug!(trip_id = %trip.id, status = %trip.status, delivered, broadcast, "Published trip status");
    }
}
