use dispatch_core::model::VehicleType;
use dispatch_core::pricing::{
    calculate_fare, split_payment, surge_multiplier, vehicle_rate, FareSettings, MAX_SURGE,
};
use proptest::prelude::*;
use rust_decimal::Decimal;

fn vehicle_type() -> impl Strategy<Value = VehicleType> {
    prop::sample::select(VehicleType::ALL.to_vec())
}

fn surge() -> impl Strategy<Value = Decimal> {
    prop::sample::select(vec![
        Decimal::ONE,
        Decimal::new(125, 2),
        Decimal::new(15, 1),
        Decimal::TWO,
        MAX_SURGE,
    ])
}

proptest! {
    #[test]
    fn split_always_adds_back_to_fare(cents in 0i64..100_000_000, commission in 0u32..=10_000) {
        let fare = Decimal::new(cents, 2);
        let percent = Decimal::new(i64::from(commission), 2);
        let split = split_payment(fare, percent).expect("valid split");
        prop_assert_eq!(split.platform_share + split.driver_share, fare);
        prop_assert!(split.platform_share >= Decimal::ZERO);
        prop_assert!(split.driver_share >= Decimal::ZERO);
    }

    #[test]
    fn fare_never_drops_below_vehicle_minimum(
        distance in 0.0f64..500.0,
        duration in 0.0f64..600.0,
        vehicle in vehicle_type(),
        multiplier in surge(),
    ) {
        let fare = calculate_fare(distance, duration, &FareSettings::default(), vehicle, multiplier)
            .expect("valid inputs");
        prop_assert!(fare >= vehicle_rate(vehicle).min_fare);
        prop_assert!(fare.scale() <= 2);
    }

    #[test]
    fn fare_grows_with_distance(
        distance in 0.0f64..200.0,
        extra in 0.0f64..50.0,
        vehicle in vehicle_type(),
    ) {
        let settings = FareSettings::default();
        let shorter = calculate_fare(distance, 10.0, &settings, vehicle, Decimal::ONE).expect("fare");
        let longer = calculate_fare(distance + extra, 10.0, &settings, vehicle, Decimal::ONE).expect("fare");
        prop_assert!(longer >= shorter);
    }

    #[test]
    fn surge_stays_within_bounds_and_rises_with_demand(
        active in 0usize..1_000,
        available in 0usize..200,
    ) {
        let current = surge_multiplier(active, available);
        prop_assert!(current >= Decimal::ONE && current <= MAX_SURGE);
        prop_assert!(surge_multiplier(active + 1, available) >= current);
    }
}
