//! In-process payment gateway: records charges and can be scripted to fail.
//!
//! Charges are idempotent per trip: a repeated call for the same trip and amount
//! hands back the charge already on record.

use std::collections::VecDeque;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use tracing::debug;

use crate::error::PaymentError;
use crate::model::TripId;
use crate::ports::{Charge, ChargeStatus, PaymentGateway};

/// A charge the gateway accepted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordedCharge {
    pub trip_id: TripId,
    pub amount_minor: i64,
    pub description: String,
    pub charge: Charge,
}

#[derive(Debug)]
pub struct InMemoryPaymentGateway {
    status: ChargeStatus,
    scripted_failures: Mutex<VecDeque<PaymentError>>,
    charges: Mutex<Vec<RecordedCharge>>,
    latency: Option<Duration>,
}

impl Default for InMemoryPaymentGateway {
    fn default() -> Self {
        Self::new(ChargeStatus::Succeeded)
    }
}

impl InMemoryPaymentGateway {
    /// Gateway whose charges come back with `status`.
    pub fn new(status: ChargeStatus) -> Self {
        Self {
            status,
            scripted_failures: Mutex::new(VecDeque::new()),
            charges: Mutex::new(Vec::new()),
            latency: None,
        }
    }

    /// Delay every `create_charge` call by `latency` before it is answered.
    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = Some(latency);
        self
    }

    /// Make the next `create_charge` call fail with `error`. Failures queue up.
    pub fn fail_next(&self, error: PaymentError) {
        self.scripted_failures.lock().push_back(error);
    }

    pub fn charges(&self) -> Vec<RecordedCharge> {
        self.charges.lock().clone()
    }
}

#[async_trait]
impl PaymentGateway for InMemoryPaymentGateway {
    async fn create_charge(
        &self,
        trip_id: TripId,
        amount_minor: i64,
        description: &str,
    ) -> Result<Charge, PaymentError> {
        if let Some(latency) = self.latency {
            tokio::time::sleep(latency).await;
        }
        if let Some(error) = self.scripted_failures.lock().pop_front() {
            return Err(error);
        }
        if amount_minor <= 0 {
            return Err(PaymentError::InvalidAmount(amount_minor));
        }

        let mut charges = self.charges.lock();
        if let Some(existing) = charges.iter().find(|c| c.trip_id == trip_id) {
            if existing.amount_minor != amount_minor {
                return Err(PaymentError::IdempotencyMismatch {
                    expected: existing.amount_minor,
                    got: amount_minor,
                });
            }
            debug!(%trip_id, charge_id = %existing.charge.id, "Returning existing charge");
            return Ok(existing.charge.clone());
        }
        let sequence = charges.len() + 1;
        let charge = Charge {
            id: format!("ch_{sequence:06}"),
            status: self.status,
            client_secret: match self.status {
                ChargeStatus::Succeeded => None,
                _ => Some(format!("ch_{sequence:06}_secret")),
            },
        };
        debug!(%trip_id, amount_minor, charge_id = %charge.id, "Recorded charge");
        charges.push(RecordedCharge {
            trip_id,
            amount_minor,
            description: description.to_string(),
            charge: charge.clone(),
        });
        Ok(charge)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn scripted_failure_is_consumed_once() {
        let gateway = InMemoryPaymentGateway::default();
        gateway.fail_next(PaymentError::Unavailable("timeout".into()));
        let trip_id = TripId::new();

        assert!(gateway.create_charge(trip_id, 100, "ride").await.is_err());
        let charge = gateway
            .create_charge(trip_id, 100, "ride")
            .await
            .expect("second attempt");
        assert_eq!(charge.status, ChargeStatus::Succeeded);
        assert_eq!(gateway.charges().len(), 1);
    }

    #[tokio::test]
    async fn repeated_charge_for_a_trip_returns_the_first_one() {
        let gateway = InMemoryPaymentGateway::default();
        let trip_id = TripId::new();
        let first = gateway.create_charge(trip_id, 3100, "ride").await.expect("first");
        let again = gateway.create_charge(trip_id, 3100, "ride").await.expect("again");
        assert_eq!(first, again);
        assert_eq!(gateway.charges().len(), 1);

        let different = gateway.create_charge(trip_id, 5000, "ride").await;
        assert_eq!(
            different,
            Err(PaymentError::IdempotencyMismatch {
                expected: 3100,
                got: 5000
            })
        );
    }

    #[tokio::test]
    async fn pending_charges_carry_a_client_secret() {
        let gateway = InMemoryPaymentGateway::new(ChargeStatus::RequiresAction);
        let charge = gateway
            .create_charge(TripId::new(), 2500, "ride")
            .await
            .expect("charge");
        assert!(charge.client_secret.is_some());
    }
}
