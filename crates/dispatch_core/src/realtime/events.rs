//! Wire events exchanged with realtime clients.
//!
//! Serialized as `{"event": "<name>", "data": {...}}` with camelCase payload fields.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::location::LocationReport;
use crate::model::{
    DriverId, DriverLocationRecord, DriverProfile, PaymentStatus, Place, Trip, TripId, TripStatus,
    VehicleType,
};

/// Server → client.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", content = "data")]
pub enum OutboundEvent {
    #[serde(rename = "trip:request")]
    TripRequest(TripRequestPayload),
    #[serde(rename = "trip:status")]
    TripStatus(TripStatusPayload),
    #[serde(rename = "driver:location")]
    DriverLocation(DriverLocationPayload),
}

/// Client → server.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", content = "data")]
pub enum InboundEvent {
    #[serde(rename = "join:driver", rename_all = "camelCase")]
    JoinDriver { driver_id: DriverId },
    #[serde(rename = "join:trip", rename_all = "camelCase")]
    JoinTrip { trip_id: TripId },
    #[serde(rename = "driver:location")]
    DriverLocation(LocationReport),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TripRequestPayload {
    pub id: TripId,
    pub pickup: Place,
    pub dropoff: Place,
    pub fare: Decimal,
    pub distance: f64,
    pub duration: f64,
    pub status: TripStatus,
    pub vehicle_type: VehicleType,
    /// Ring the recipient was notified in; absent on global fallback broadcasts.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ring: Option<u8>,
}

impl TripRequestPayload {
    pub fn from_trip(trip: &Trip) -> Self {
        Self {
            id: trip.id,
            pickup: trip.pickup.clone(),
            dropoff: trip.dropoff.clone(),
            fare: trip.fare,
            distance: trip.distance_km,
            duration: trip.duration_min,
            status: trip.status,
            vehicle_type: trip.vehicle_type,
            ring: None,
        }
    }

    pub fn in_ring(mut self, ring: u8) -> Self {
        self.ring = Some(ring);
        self
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TripStatusPayload {
    pub trip_id: TripId,
    pub status: TripStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub driver: Option<DriverProfile>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fare: Option<Decimal>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub payment_status: Option<PaymentStatus>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub client_secret: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

impl TripStatusPayload {
    pub fn new(trip_id: TripId, status: TripStatus) -> Self {
        Self {
            trip_id,
            status,
            driver: None,
            fare: None,
            payment_status: None,
            client_secret: None,
            reason: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DriverLocationPayload {
    pub driver_id: DriverId,
    pub lat: f64,
    pub lng: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub heading: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub speed_kph: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub trip_id: Option<TripId>,
    pub updated_at: DateTime<Utc>,
}

impl From<&DriverLocationRecord> for DriverLocationPayload {
    fn from(record: &DriverLocationRecord) -> Self {
        Self {
            driver_id: record.driver_id.clone(),
            lat: record.position.lat,
            lng: record.position.lng,
            heading: record.heading,
            speed_kph: record.speed_kph,
            trip_id: record.active_trip,
            updated_at: record.updated_at,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn inbound_join_driver_parses_wire_shape() {
        let event: InboundEvent =
            serde_json::from_str(r#"{"event":"join:driver","data":{"driverId":"d-1"}}"#)
                .expect("event");
        assert_eq!(
            event,
            InboundEvent::JoinDriver {
                driver_id: DriverId::new("d-1")
            }
        );
    }

    #[test]
    fn inbound_location_report_accepts_optional_fields() {
        let event: InboundEvent = serde_json::from_str(
            r#"{"event":"driver:location","data":{"driverId":"d-1","lat":52.5,"lng":13.4,"speedKph":31.5}}"#,
        )
        .expect("event");
        match event {
            InboundEvent::DriverLocation(report) => {
                assert_eq!(report.speed_kph, Some(31.5));
                assert_eq!(report.heading, None);
                assert_eq!(report.trip_id, None);
            }
            other => panic!("unexpected event {other:?}"),
        }
    }

    #[test]
    fn status_event_omits_empty_fields() {
        let event = OutboundEvent::TripStatus(TripStatusPayload::new(
            TripId::new(),
            TripStatus::Cancelled,
        ));
        let json = serde_json::to_value(&event).expect("json");
        assert_eq!(json["event"], "trip:status");
        assert_eq!(json["data"]["status"], "cancelled");
        assert!(json["data"].get("driver").is_none());
        assert!(json["data"].get("fare").is_none());
    }
}
