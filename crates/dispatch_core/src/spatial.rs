//! Spatial operations: coordinate validation and great-circle distance.
//!
//! Dispatch ranks candidates by straight-line pickup distance, so everything here
//! works on raw WGS84 coordinates. Validation goes through `h3o::LatLng`, which
//! rejects non-finite and out-of-range values.

use h3o::LatLng;

use crate::error::DispatchError;
use crate::model::GeoPoint;

/// Mean Earth radius used by the haversine formula.
pub const EARTH_RADIUS_KM: f64 = 6371.0;

/// Validate a coordinate pair, returning it as an `h3o::LatLng`.
pub fn validate_point(point: GeoPoint) -> Result<LatLng, DispatchError> {
    if !(-90.0..=90.0).contains(&point.lat) || !(-180.0..=180.0).contains(&point.lng) {
        return Err(DispatchError::Validation(format!(
            "coordinate out of range: ({}, {})",
            point.lat, point.lng
        )));
    }
    LatLng::new(point.lat, point.lng)
        .map_err(|err| DispatchError::Validation(format!("invalid coordinate: {err}")))
}

/// Great-circle distance between two points in kilometres.
pub fn haversine_km(a: GeoPoint, b: GeoPoint) -> f64 {
    let (lat1, lon1) = (a.lat.to_radians(), a.lng.to_radians());
    let (lat2, lon2) = (b.lat.to_radians(), b.lng.to_radians());
    let dlat = lat2 - lat1;
    let dlon = lon2 - lon1;
    let sin_dlat = (dlat * 0.5).sin();
    let sin_dlon = (dlon * 0.5).sin();
    let h = sin_dlat * sin_dlat + lat1.cos() * lat2.cos() * sin_dlon * sin_dlon;
    let c = 2.0 * h.sqrt().atan2((1.0 - h).sqrt());
    EARTH_RADIUS_KM * c
}

/// Point `km` kilometres due north of `origin`. Handy for building fixtures at a known distance.
pub fn offset_north_km(origin: GeoPoint, km: f64) -> GeoPoint {
    let dlat = (km / EARTH_RADIUS_KM).to_degrees();
    GeoPoint::new(origin.lat + dlat, origin.lng)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn distance_to_self_is_zero() {
        let p = GeoPoint::new(52.52, 13.405);
        assert_eq!(haversine_km(p, p), 0.0);
    }

    #[test]
    fn small_equatorial_offsets_match_known_distances() {
        let origin = GeoPoint::new(0.0, 0.0);

        // "0.11 degrees is roughly 13-15 km" only holds along one axis, and then
        // only within 10%: 0.11 degrees of arc is 12.23 km. The diagonal is about
        // sqrt(2) longer, so it is pinned to its own exact value below.
        let north = haversine_km(origin, GeoPoint::new(0.11, 0.0));
        assert!(north > 13.0 * 0.9 && north < 15.0 * 1.1, "north offset {north}");
        assert!((north - 12.23).abs() < 0.05, "north offset {north}");

        let east = haversine_km(origin, GeoPoint::new(0.0, 0.11));
        assert!((north - east).abs() < 1e-9, "axes should agree at the equator");

        let diagonal = haversine_km(origin, GeoPoint::new(0.11, 0.11));
        assert!((diagonal - 17.30).abs() < 0.05, "diagonal offset {diagonal}");
    }

    #[test]
    fn distance_is_symmetric() {
        let a = GeoPoint::new(52.50, 13.40);
        let b = GeoPoint::new(52.55, 13.30);
        assert!((haversine_km(a, b) - haversine_km(b, a)).abs() < 1e-12);
    }

    #[test]
    fn offset_north_lands_at_requested_distance() {
        let origin = GeoPoint::new(52.52, 13.405);
        let moved = offset_north_km(origin, 5.0);
        assert!((haversine_km(origin, moved) - 5.0).abs() < 1e-6);
    }

    #[test]
    fn rejects_out_of_range_and_non_finite_points() {
        assert!(validate_point(GeoPoint::new(91.0, 0.0)).is_err());
        assert!(validate_point(GeoPoint::new(0.0, 181.0)).is_err());
        assert!(validate_point(GeoPoint::new(f64::NAN, 0.0)).is_err());
        assert!(validate_point(GeoPoint::new(52.52, 13.405)).is_ok());
    }
}
