//! Candidate scoring and ring assignment. Pure functions, no I/O.

use std::cmp::Ordering;

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::config::{ColdStartStats, RingSpec};
use crate::model::{DriverId, DriverStats};

/// Flat score before adjustments.
const BASE_SCORE: f64 = 100.0;
const DISTANCE_PENALTY_PER_KM: f64 = 5.0;
const RATING_WEIGHT: f64 = 10.0;
const ACCEPTANCE_WEIGHT: f64 = 20.0;
const VEHICLE_MATCH_BONUS: f64 = 10.0;
/// Drivers who came online within this many minutes get a freshness bonus.
const FRESHNESS_WINDOW_MIN: f64 = 60.0;
const FRESHNESS_DIVISOR: f64 = 6.0;

/// Per-driver inputs to [`score`].
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ScoreInputs {
    pub distance_km: f64,
    pub rating: f64,
    pub acceptance_rate: f64,
    pub minutes_online: f64,
    pub vehicle_match: bool,
}

impl ScoreInputs {
    pub fn from_stats(
        distance_km: f64,
        stats: &DriverStats,
        now: DateTime<Utc>,
        vehicle_match: bool,
        fallback: &ColdStartStats,
    ) -> Self {
        let minutes_online = stats
            .online_since
            .map(|since| minutes_between(since, now))
            .unwrap_or(fallback.minutes_online);
        Self {
            distance_km,
            rating: stats.rating,
            acceptance_rate: stats.acceptance_rate,
            minutes_online,
            vehicle_match,
        }
    }

    pub fn cold_start(distance_km: f64, defaults: &ColdStartStats, vehicle_match: bool) -> Self {
        Self {
            distance_km,
            rating: defaults.rating,
            acceptance_rate: defaults.acceptance_rate,
            minutes_online: defaults.minutes_online,
            vehicle_match,
        }
    }
}

fn minutes_between(since: DateTime<Utc>, now: DateTime<Utc>) -> f64 {
    ((now - since).num_milliseconds() as f64 / 60_000.0).max(0.0)
}

/// Higher is better; never negative.
pub fn score(inputs: &ScoreInputs) -> f64 {
    let vehicle_bonus = if inputs.vehicle_match {
        VEHICLE_MATCH_BONUS
    } else {
        0.0
    };
    let freshness_bonus = ((FRESHNESS_WINDOW_MIN - inputs.minutes_online) / FRESHNESS_DIVISOR).max(0.0);
    let raw = BASE_SCORE - inputs.distance_km * DISTANCE_PENALTY_PER_KM
        + inputs.rating * RATING_WEIGHT
        + inputs.acceptance_rate * ACCEPTANCE_WEIGHT
        + vehicle_bonus
        + freshness_bonus;
    raw.max(0.0)
}

/// 1-based ring for a pickup distance. Upper bounds are inclusive, so 2.0 km is ring 1.
pub fn ring_for(distance_km: f64, rings: &[RingSpec]) -> u8 {
    let index = rings
        .iter()
        .position(|ring| ring.max_distance_km.map_or(true, |max| distance_km <= max))
        .unwrap_or_else(|| rings.len().saturating_sub(1));
    (index + 1) as u8
}

/// A driver eligible for a trip, with its rank inputs.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DriverCandidate {
    pub driver_id: DriverId,
    pub distance_km: f64,
    pub score: f64,
    pub ring: u8,
}

/// Score descending; ties go to the closer driver, then to the lower id.
pub fn rank_candidates(candidates: &mut [DriverCandidate]) {
    candidates.sort_by(|a, b| {
        b.score
            .partial_cmp(&a.score)
            .unwrap_or(Ordering::Equal)
            .then_with(|| {
                a.distance_km
                    .partial_cmp(&b.distance_km)
                    .unwrap_or(Ordering::Equal)
            })
            .then_with(|| a.driver_id.cmp(&b.driver_id))
    });
}
