//! Domain records shared by the dispatch core: trips, drivers, location reports.
//!
//! These are the canonical shapes at the repository boundary. Adapters translate
//! whatever their storage format looks like into these types; nothing past the
//! ports layer ever sees an alternative spelling of a field.

use std::fmt;

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TripId(pub Uuid);

impl TripId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for TripId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for TripId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DriverId(pub String);

impl DriverId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for DriverId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RiderId(pub String);

impl RiderId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }
}

impl fmt::Display for RiderId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// A WGS84 coordinate in degrees.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GeoPoint {
    pub lat: f64,
    pub lng: f64,
}

impl GeoPoint {
    pub const fn new(lat: f64, lng: f64) -> Self {
        Self { lat, lng }
    }
}

/// A pickup or dropoff: free-form address plus its coordinate.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Place {
    pub address: String,
    pub location: GeoPoint,
}

impl Place {
    pub fn new(address: impl Into<String>, location: GeoPoint) -> Self {
        Self {
            address: address.into(),
            location,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VehicleType {
    #[default]
    Economy,
    Comfort,
    Premium,
    Xl,
    Bike,
}

impl VehicleType {
    pub const ALL: [VehicleType; 5] = [
        VehicleType::Economy,
        VehicleType::Comfort,
        VehicleType::Premium,
        VehicleType::Xl,
        VehicleType::Bike,
    ];
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PaymentMethod {
    Cash,
    Card,
    Wallet,
}

impl PaymentMethod {
    /// Card-like methods are settled through the payment collaborator at completion.
    pub fn is_card_like(self) -> bool {
        matches!(self, PaymentMethod::Card)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PaymentStatus {
    Pending,
    AwaitingConfirmation,
    Paid,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TripStatus {
    Requested,
    Accepted,
    InProgress,
    Completed,
    Cancelled,
}

impl TripStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, TripStatus::Completed | TripStatus::Cancelled)
    }

    /// Statuses in which the trip must carry a driver reference.
    pub fn requires_driver(self) -> bool {
        matches!(
            self,
            TripStatus::Accepted | TripStatus::InProgress | TripStatus::Completed
        )
    }

    pub fn as_str(self) -> &'static str {
        match self {
            TripStatus::Requested => "requested",
            TripStatus::Accepted => "accepted",
            TripStatus::InProgress => "in_progress",
            TripStatus::Completed => "completed",
            TripStatus::Cancelled => "cancelled",
        }
    }
}

impl fmt::Display for TripStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Platform/driver split of a finalized fare. `platform_share + driver_share == fare`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PaymentSplit {
    pub platform_share: Decimal,
    pub driver_share: Decimal,
}

impl PaymentSplit {
    pub fn total(&self) -> Decimal {
        self.platform_share + self.driver_share
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Trip {
    pub id: TripId,
    pub rider_id: RiderId,
    pub driver_id: Option<DriverId>,
    pub pickup: Place,
    pub dropoff: Place,
    pub distance_km: f64,
    pub duration_min: f64,
    pub fare: Decimal,
    /// Surge multiplier locked when the trip was requested; reused on re-pricing.
    pub surge_multiplier: Decimal,
    pub split: Option<PaymentSplit>,
    pub status: TripStatus,
    pub vehicle_type: VehicleType,
    pub payment_method: PaymentMethod,
    pub payment_status: PaymentStatus,
    pub payment_reference: Option<String>,
    pub payment_client_secret: Option<String>,
    pub cancellation_reason: Option<String>,
    pub requested_at: DateTime<Utc>,
    pub accepted_at: Option<DateTime<Utc>>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub cancelled_at: Option<DateTime<Utc>>,
    pub updated_at: DateTime<Utc>,
}

impl Trip {
    /// Driver reference is present exactly when the status calls for one.
    pub fn driver_invariant_holds(&self) -> bool {
        self.driver_id.is_some() == self.status.requires_driver()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VerificationStatus {
    Pending,
    Approved,
    Rejected,
    Suspended,
}

/// Historical performance used for candidate scoring.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct DriverStats {
    /// Average rider rating, 0.0..=5.0.
    pub rating: f64,
    /// Share of offers accepted, 0.0..=1.0.
    pub acceptance_rate: f64,
    /// Start of the current online session.
    pub online_since: Option<DateTime<Utc>>,
}

/// Canonical driver shape.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Driver {
    pub id: DriverId,
    pub name: String,
    pub phone: String,
    pub vehicle_type: VehicleType,
    pub verification: VerificationStatus,
    pub stats: Option<DriverStats>,
}

impl Driver {
    pub fn is_approved(&self) -> bool {
        self.verification == VerificationStatus::Approved
    }

    pub fn public_profile(&self) -> DriverProfile {
        DriverProfile {
            id: self.id.clone(),
            name: self.name.clone(),
            phone: self.phone.clone(),
            vehicle_type: self.vehicle_type,
            rating: self.stats.map(|s| s.rating),
        }
    }
}

/// The subset of a driver shown to riders once a trip is accepted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DriverProfile {
    pub id: DriverId,
    pub name: String,
    pub phone: String,
    pub vehicle_type: VehicleType,
    pub rating: Option<f64>,
}

/// Latest known position of one driver. Overwritten on every report.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DriverLocationRecord {
    pub driver_id: DriverId,
    pub position: GeoPoint,
    pub heading: Option<f64>,
    pub speed_kph: Option<f64>,
    pub active_trip: Option<TripId>,
    pub updated_at: DateTime<Utc>,
}
