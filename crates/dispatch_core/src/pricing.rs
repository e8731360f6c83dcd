//! Fare engine: trip pricing, vehicle comparison, surge policy and payment split.
//!
//! All money is `Decimal` in the reference currency, rounded to 2 dp
//! (midpoint away from zero). Distances and durations arrive as `f64` from
//! routing and are converted once at the edge.

use rust_decimal::prelude::ToPrimitive;
use rust_decimal::{Decimal, RoundingStrategy};
use serde::{Deserialize, Serialize};

use crate::error::DispatchError;
use crate::model::{PaymentSplit, VehicleType};

/// Money precision (decimal places).
pub const MONEY_DP: u32 = 2;

/// Surge applied when nobody is available, and the ceiling for any ratio.
pub const MAX_SURGE: Decimal = Decimal::from_parts(25, 0, 0, false, 1);

/// Per-city pricing knobs.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FareSettings {
    pub base_fare: Decimal,
    /// Price per kilometre.
    pub distance_rate: Decimal,
    /// Price per minute.
    pub time_rate: Decimal,
    /// Platform commission, 0..=100.
    pub commission_percent: Decimal,
}

impl Default for FareSettings {
    fn default() -> Self {
        Self {
            base_fare: Decimal::from(1000),
            distance_rate: Decimal::from(300),
            time_rate: Decimal::from(40),
            commission_percent: Decimal::from(20),
        }
    }
}

impl FareSettings {
    pub fn with_base_fare(mut self, base_fare: Decimal) -> Self {
        self.base_fare = base_fare;
        self
    }

    pub fn with_distance_rate(mut self, rate: Decimal) -> Self {
        self.distance_rate = rate;
        self
    }

    pub fn with_time_rate(mut self, rate: Decimal) -> Self {
        self.time_rate = rate;
        self
    }

    pub fn with_commission_percent(mut self, percent: Decimal) -> Self {
        self.commission_percent = percent;
        self
    }
}

/// Fixed per-vehicle multiplier and minimum fare.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VehicleRate {
    pub multiplier: Decimal,
    pub min_fare: Decimal,
}

pub fn vehicle_rate(vehicle_type: VehicleType) -> VehicleRate {
    let (multiplier, min_fare) = match vehicle_type {
        VehicleType::Economy => (Decimal::ONE, 500),
        VehicleType::Comfort => (Decimal::new(14, 1), 800),
        VehicleType::Premium => (Decimal::TWO, 1500),
        VehicleType::Xl => (Decimal::new(18, 1), 1200),
        VehicleType::Bike => (Decimal::new(5, 1), 200),
    };
    VehicleRate {
        multiplier,
        min_fare: Decimal::from(min_fare),
    }
}

/// One row of a multi-vehicle comparison.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FareQuote {
    pub vehicle_type: VehicleType,
    pub fare: Decimal,
}

pub fn round_money(amount: Decimal) -> Decimal {
    amount.round_dp_with_strategy(MONEY_DP, RoundingStrategy::MidpointAwayFromZero)
}

/// Check that `value` is finite and non-negative, then convert it for fare arithmetic.
pub(crate) fn measurement(name: &str, value: f64) -> Result<Decimal, DispatchError> {
    if !value.is_finite() || value < 0.0 {
        return Err(DispatchError::Validation(format!(
            "{name} must be a finite, non-negative number (got {value})"
        )));
    }
    Decimal::try_from(value)
        .map_err(|err| DispatchError::Validation(format!("{name} is not representable: {err}")))
}

/// Price a trip.
///
/// `fare = max((base + km * distance_rate + min * time_rate) * vehicle * surge, vehicle_min)`,
/// rounded to 2 dp.
pub fn calculate_fare(
    distance_km: f64,
    duration_min: f64,
    settings: &FareSettings,
    vehicle_type: VehicleType,
    surge_multiplier: Decimal,
) -> Result<Decimal, DispatchError> {
    let distance = measurement("distance_km", distance_km)?;
    let duration = measurement("duration_min", duration_min)?;
    if surge_multiplier < Decimal::ONE {
        return Err(DispatchError::Validation(format!(
            "surge multiplier must be >= 1 (got {surge_multiplier})"
        )));
    }

    let base = settings.base_fare + distance * settings.distance_rate + duration * settings.time_rate;
    let rate = vehicle_rate(vehicle_type);
    let fare = (base * rate.multiplier * surge_multiplier).max(rate.min_fare);
    Ok(round_money(fare))
}

/// Price the same trip for every vehicle type.
pub fn calculate_all_fares(
    distance_km: f64,
    duration_min: f64,
    settings: &FareSettings,
    surge_multiplier: Decimal,
) -> Result<Vec<FareQuote>, DispatchError> {
    VehicleType::ALL
        .iter()
        .map(|&vehicle_type| {
            calculate_fare(distance_km, duration_min, settings, vehicle_type, surge_multiplier)
                .map(|fare| FareQuote { vehicle_type, fare })
        })
        .collect()
}

/// Split a finalized fare. The driver share is the exact remainder, never rounded on its own,
/// so the two shares always add back up to `fare`.
pub fn split_payment(fare: Decimal, commission_percent: Decimal) -> Result<PaymentSplit, DispatchError> {
    if commission_percent < Decimal::ZERO || commission_percent > Decimal::ONE_HUNDRED {
        return Err(DispatchError::Validation(format!(
            "commission percent must be within 0..=100 (got {commission_percent})"
        )));
    }
    if fare < Decimal::ZERO {
        return Err(DispatchError::Validation(format!("fare must be non-negative (got {fare})")));
    }
    let platform_share = round_money(fare * commission_percent / Decimal::ONE_HUNDRED);
    Ok(PaymentSplit {
        platform_share,
        driver_share: fare - platform_share,
    })
}

/// Demand-driven fare multiplier.
///
/// Nobody available, or four or more open requests per available driver, saturates at 2.5.
/// Below that: `> 3` → 2.0, `> 2` → 1.5, `> 1.5` → 1.25, otherwise 1.0.
pub fn surge_multiplier(active_rides: usize, available_drivers: usize) -> Decimal {
    if available_drivers == 0 {
        return MAX_SURGE;
    }
    let ratio = active_rides as f64 / available_drivers as f64;
    if ratio >= 4.0 {
        MAX_SURGE
    } else if ratio > 3.0 {
        Decimal::TWO
    } else if ratio > 2.0 {
        Decimal::new(15, 1)
    } else if ratio > 1.5 {
        Decimal::new(125, 2)
    } else {
        Decimal::ONE
    }
}

/// Convert a fare to integer minor units (cents) for the payment collaborator.
pub fn to_minor_units(amount: Decimal) -> Result<i64, DispatchError> {
    (amount * Decimal::ONE_HUNDRED)
        .round_dp_with_strategy(0, RoundingStrategy::MidpointAwayFromZero)
        .to_i64()
        .ok_or_else(|| DispatchError::Validation(format!("amount {amount} overflows minor units")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn economy_trip_matches_worked_example() {
        let settings = FareSettings::default();
        let fare = calculate_fare(5.0, 15.0, &settings, VehicleType::Economy, Decimal::ONE)
            .expect("fare");
        assert_eq!(fare, dec!(3100.00));

        let split = split_payment(fare, dec!(20)).expect("split");
        assert_eq!(split.platform_share, dec!(620.00));
        assert_eq!(split.driver_share, dec!(2480.00));
    }

    #[test]
    fn short_trips_are_clamped_to_vehicle_minimum() {
        let settings = FareSettings::default()
            .with_base_fare(Decimal::ZERO)
            .with_distance_rate(Decimal::ONE)
            .with_time_rate(Decimal::ZERO);
        for vehicle_type in VehicleType::ALL {
            let fare = calculate_fare(0.1, 0.0, &settings, vehicle_type, Decimal::ONE).expect("fare");
            assert_eq!(fare, vehicle_rate(vehicle_type).min_fare, "{vehicle_type:?}");
        }
    }

    #[test]
    fn surge_and_vehicle_multipliers_compound() {
        let settings = FareSettings::default();
        let fare = calculate_fare(5.0, 15.0, &settings, VehicleType::Comfort, dec!(1.5))
            .expect("fare");
        // 3100 * 1.4 * 1.5
        assert_eq!(fare, dec!(6510.00));
    }

    #[test]
    fn all_fares_cover_every_vehicle_type() {
        let quotes = calculate_all_fares(5.0, 15.0, &FareSettings::default(), Decimal::ONE)
            .expect("quotes");
        assert_eq!(quotes.len(), VehicleType::ALL.len());
        let bike = quotes
            .iter()
            .find(|q| q.vehicle_type == VehicleType::Bike)
            .expect("bike quote");
        assert_eq!(bike.fare, dec!(1550.00));
    }

    #[test]
    fn rejects_negative_or_non_finite_measurements() {
        let settings = FareSettings::default();
        assert!(calculate_fare(-1.0, 1.0, &settings, VehicleType::Economy, Decimal::ONE).is_err());
        assert!(calculate_fare(1.0, f64::NAN, &settings, VehicleType::Economy, Decimal::ONE).is_err());
        assert!(calculate_fare(1.0, 1.0, &settings, VehicleType::Economy, dec!(0.5)).is_err());
    }

    #[test]
    fn split_driver_share_is_exact_remainder() {
        let split = split_payment(dec!(1234.57), dec!(17.5)).expect("split");
        // 1234.57 * 0.175 = 216.04975 -> 216.05
        assert_eq!(split.platform_share, dec!(216.05));
        assert_eq!(split.driver_share, dec!(1018.52));
        assert_eq!(split.total(), dec!(1234.57));
    }

    #[test]
    fn split_rejects_commission_out_of_range() {
        assert!(split_payment(dec!(100), dec!(101)).is_err());
        assert!(split_payment(dec!(100), dec!(-1)).is_err());
    }

    #[test]
    fn surge_tiers() {
        assert_eq!(surge_multiplier(0, 0), dec!(2.5));
        assert_eq!(surge_multiplier(4, 1), dec!(2.5));
        assert_eq!(surge_multiplier(7, 2), dec!(2.0));
        assert_eq!(surge_multiplier(5, 2), dec!(1.5));
        assert_eq!(surge_multiplier(8, 5), dec!(1.25));
        assert_eq!(surge_multiplier(3, 2), dec!(1.0));
        assert_eq!(surge_multiplier(0, 10), dec!(1.0));
    }

    #[test]
    fn minor_units_round_half_away_from_zero() {
        assert_eq!(to_minor_units(dec!(3100.00)).expect("minor"), 310_000);
        assert_eq!(to_minor_units(dec!(12.345)).expect("minor"), 1_235);
    }
}
