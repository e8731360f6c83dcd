use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio::time::{sleep_until, Instant};
use tracing::{debug, info, trace, warn};

use super::scoring::{rank_candidates, ring_for, score, DriverCandidate, ScoreInputs};
use crate::config::{DispatchConfig, DispatchMode, StatsPolicy};
use crate::error::DispatchError;
use crate::location::LocationRegistry;
use crate::model::{DriverId, Trip, TripId, TripStatus};
use crate::ports::{DriverRepository, TripRepository};
use crate::realtime::{Channel, OutboundEvent, RealtimeChannel, TripRequestPayload};
use crate::spatial::haversine_km;
use crate::telemetry::RideTelemetry;

/// One batch of notifications, sent `offset` after dispatch began.
#[derive(Debug, Clone, PartialEq)]
pub struct Wave {
    /// `None` when every candidate goes out together regardless of ring.
    pub ring: Option<u8>,
    pub offset: Duration,
    pub candidates: Vec<DriverCandidate>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum DispatchOutcome {
    /// Nobody was notifiable; the request went to every connection.
    Broadcast { reached: usize },
    /// Every planned wave went out while the trip stayed requested.
    Exhausted { waves: usize, notified: usize },
    /// The trip left `requested` before the remaining waves were due.
    Stopped {
        waves: usize,
        notified: usize,
        status: TripStatus,
    },
    Failed(DispatchError),
}

enum Progress {
    Done(DispatchOutcome),
    Running(JoinHandle<DispatchOutcome>),
}

/// Returned by [`DispatchEngine::dispatch`] once the first wave is out.
///
/// Dropping the handle leaves any escalation running in the background.
pub struct DispatchHandle {
    plan: Vec<Wave>,
    progress: Progress,
}

impl DispatchHandle {
    pub fn plan(&self) -> &[Wave] {
        &self.plan
    }

    pub fn is_broadcast(&self) -> bool {
        self.plan.is_empty()
    }

    /// Stop any waves that have not been sent yet.
    pub fn abort(&self) {
        if let Progress::Running(task) = &self.progress {
            task.abort();
        }
    }

    pub async fn outcome(self) -> DispatchOutcome {
        match self.progress {
            Progress::Done(outcome) => outcome,
            Progress::Running(task) => task.await.unwrap_or_else(|err| {
                DispatchOutcome::Failed(DispatchError::ExternalService {
                    service: "dispatch",
                    message: err.to_string(),
                })
            }),
        }
    }
}

/// Ranks the dispatch pool for a trip and notifies it ring by ring.
#[derive(Clone)]
pub struct DispatchEngine {
    locations: Arc<LocationRegistry>,
    trips: Arc<dyn TripRepository>,
    drivers: Arc<dyn DriverRepository>,
    channel: Arc<dyn RealtimeChannel>,
    telemetry: Arc<RideTelemetry>,
    config: Arc<DispatchConfig>,
}

impl DispatchEngine {
    pub fn new(
        locations: Arc<LocationRegistry>,
        trips: Arc<dyn TripRepository>,
        drivers: Arc<dyn DriverRepository>,
        channel: Arc<dyn RealtimeChannel>,
        telemetry: Arc<RideTelemetry>,
        config: DispatchConfig,
    ) -> Self {
        Self {
            locations,
            trips,
            drivers,
            channel,
            telemetry,
            config: Arc::new(config),
        }
    }

    /// Whether the driver holds a non-terminal trip other than `except`.
    async fn is_busy(&self, driver_id: &DriverId, except: Option<TripId>) -> Result<bool, DispatchError> {
        let active = self.trips.find_active_trip_for_driver(driver_id).await?;
        Ok(active.is_some_and(|trip| Some(trip.id) != except))
    }

    /// Connected, approved, idle drivers with a fresh location, ranked for `trip`.
    pub async fn rank(&self, trip: &Trip) -> Result<Vec<DriverCandidate>, DispatchError> {
        let now = self.locations.now();
        let pickup = trip.pickup.location;
        let mut candidates = Vec::new();

        for record in self.locations.fresh_locations().await? {
            if self.is_busy(&record.driver_id, Some(trip.id)).await? {
                trace!(driver_id = %record.driver_id, "Skipping busy driver");
                continue;
            }
            let Some(driver) = self.drivers.get_driver(&record.driver_id).await? else {
                trace!(driver_id = %record.driver_id, "Skipping unknown driver");
                continue;
            };
            if !driver.is_approved() {
                continue;
            }

            let distance_km = haversine_km(record.position, pickup);
            let vehicle_match = driver.vehicle_type == trip.vehicle_type;
            let inputs = match (&driver.stats, self.config.stats_policy) {
                (Some(stats), _) => ScoreInputs::from_stats(
                    distance_km,
                    stats,
                    now,
                    vehicle_match,
                    &self.config.cold_start,
                ),
                (None, StatsPolicy::ColdStartDefaults) => {
                    ScoreInputs::cold_start(distance_km, &self.config.cold_start, vehicle_match)
                }
                (None, StatsPolicy::RequireSeeded) => {
                    debug!(driver_id = %driver.id, "Skipping driver without seeded stats");
                    continue;
                }
            };

            if !self
                .channel
                .is_connected(&Channel::Driver(driver.id.clone()))
                .await
            {
                trace!(driver_id = %driver.id, "Skipping disconnected driver");
                continue;
            }

            candidates.push(DriverCandidate {
                driver_id: driver.id,
                distance_km,
                score: score(&inputs),
                ring: ring_for(distance_km, &self.config.rings),
            });
        }

        rank_candidates(&mut candidates);
        Ok(candidates)
    }

    /// Drivers that count as supply for surge pricing.
    pub async fn available_driver_count(&self) -> Result<usize, DispatchError> {
        let mut available = 0;
        for record in self.locations.fresh_locations().await? {
            if self.is_busy(&record.driver_id, None).await? {
                continue;
            }
            let approved = self
                .drivers
                .get_driver(&record.driver_id)
                .await?
                .is_some_and(|driver| driver.is_approved());
            if approved
                && self
                    .channel
                    .is_connected(&Channel::Driver(record.driver_id.clone()))
                    .await
            {
                available += 1;
            }
        }
        Ok(available)
    }

    /// Split ranked candidates into notification waves.
    pub fn plan(&self, candidates: Vec<DriverCandidate>) -> Vec<Wave> {
        if candidates.is_empty() {
            return Vec::new();
        }
        if self.config.mode == DispatchMode::NotifyAll {
            return vec![Wave {
                ring: None,
                offset: Duration::ZERO,
                candidates,
            }];
        }

        // Candidates arrive ranked; buckets keep that order.
        let mut by_ring: BTreeMap<u8, Vec<DriverCandidate>> = BTreeMap::new();
        for candidate in candidates {
            by_ring.entry(candidate.ring).or_default().push(candidate);
        }

        let mut waves = Vec::with_capacity(by_ring.len());
        let mut first_delay: Option<Duration> = None;
        for (ring, mut members) in by_ring {
            let Some(spec) = self.config.rings.get(usize::from(ring).saturating_sub(1)) else {
                continue;
            };
            if let Some(cap) = spec.cap {
                members.truncate(cap);
            }
            let base = *first_delay.get_or_insert(spec.delay());
            waves.push(Wave {
                ring: Some(ring),
                offset: spec.delay().saturating_sub(base),
                candidates: members,
            });
        }
        waves
    }

    /// Notify the first wave now and schedule the rest.
    ///
    /// With nobody notifiable the request is broadcast to every connection instead.
    pub async fn dispatch(&self, trip: &Trip) -> Result<DispatchHandle, DispatchError> {
        let candidates = self.rank(trip).await?;
        let waves = self.plan(candidates);
        let request = TripRequestPayload::from_trip(trip);

        let Some(first) = waves.first() else {
            let reached = self
                .channel
                .publish_global(OutboundEvent::TripRequest(request))
                .await;
            self.telemetry.counters.fallback_broadcast();
            warn!(trip_id = %trip.id, reached, "No notifiable drivers, broadcasting trip request");
            return Ok(DispatchHandle {
                plan: waves,
                progress: Progress::Done(DispatchOutcome::Broadcast { reached }),
            });
        };

        info!(
            trip_id = %trip.id,
            waves = waves.len(),
            candidates = waves.iter().map(|w| w.candidates.len()).sum::<usize>(),
            "Dispatching trip"
        );
        let started = Instant::now();
        let notified = self.notify_wave(trip.id, &request, first).await;
        if waves.len() == 1 {
            return Ok(DispatchHandle {
                plan: waves,
                progress: Progress::Done(DispatchOutcome::Exhausted { waves: 1, notified }),
            });
        }

        let engine = self.clone();
        let remaining = waves[1..].to_vec();
        let trip_id = trip.id;
        let task = tokio::spawn(async move {
            engine
                .escalate(trip_id, request, remaining, started, notified)
                .await
        });
        Ok(DispatchHandle {
            plan: waves,
            progress: Progress::Running(task),
        })
    }

    async fn escalate(
        self,
        trip_id: TripId,
        request: TripRequestPayload,
        waves: Vec<Wave>,
        started: Instant,
        mut notified: usize,
    ) -> DispatchOutcome {
        let mut sent = 1;
        for wave in &waves {
            sleep_until(started + wave.offset).await;
            match self.trips.get_trip(trip_id).await {
                Ok(Some(trip)) if trip.status == TripStatus::Requested => {}
                Ok(Some(trip)) => {
                    debug!(%trip_id, status = %trip.status, waves = sent, "Escalation stopped");
                    return DispatchOutcome::Stopped {
                        waves: sent,
                        notified,
                        status: trip.status,
                    };
                }
                Ok(None) => return DispatchOutcome::Failed(DispatchError::trip_not_found(trip_id)),
                Err(err) => {
                    warn!(%trip_id, error = %err, "Escalation aborted");
                    return DispatchOutcome::Failed(err);
                }
            }
            notified += self.notify_wave(trip_id, &request, wave).await;
            sent += 1;
        }
        DispatchOutcome::Exhausted {
            waves: sent,
            notified,
        }
    }

    async fn notify_wave(&self, trip_id: TripId, request: &TripRequestPayload, wave: &Wave) -> usize {
        let mut notified = 0;
        for candidate in &wave.candidates {
            let event = OutboundEvent::TripRequest(request.clone().in_ring(candidate.ring));
            let channel = Channel::Driver(candidate.driver_id.clone());
            if self.channel.publish(&channel, event).await > 0 {
                notified += 1;
            }
        }
        self.telemetry.counters.wave_sent();
        self.telemetry.counters.notifications_sent(notified);
        info!(
            %trip_id,
            ring = ?wave.ring,
            candidates = wave.candidates.len(),
            notified,
            "Dispatch wave sent"
        );
        notified
    }
}
