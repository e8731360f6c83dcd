//! Ride-hailing dispatch core.
//!
//! Prices trips, tracks live driver positions, ranks nearby drivers and
//! notifies them ring by ring, and drives each trip through its lifecycle.
//! Persistence, payments and the realtime transport sit behind the traits in
//! [`ports`] and [`realtime`].

pub mod adapters;
pub mod clock;
pub mod config;
pub mod dispatch;
pub mod error;
pub mod gateway;
pub mod lifecycle;
pub mod location;
pub mod model;
pub mod ports;
pub mod pricing;
pub mod realtime;
pub mod spatial;
pub mod telemetry;

#[cfg(any(test, feature = "test-helpers"))]
pub mod test_helpers;

pub use error::{DispatchError, PaymentError};
