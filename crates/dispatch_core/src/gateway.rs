//! Inbound side of the realtime boundary.
//!
//! Transports (a WebSocket server, a broker consumer) decode client frames into
//! [`InboundEvent`] and hand them to a [`Dispatcher`]. Nothing here knows how
//! frames travel.

use std::sync::Arc;

use async_trait::async_trait;
use tracing::debug;

use crate::error::DispatchError;
use crate::location::{LocationRegistry, LocationReport};
use crate::model::{DriverId, DriverLocationRecord, TripId};
use crate::ports::TripRepository;
use crate::realtime::{
    Channel, ConnectionId, DriverLocationPayload, InboundEvent, OutboundEvent, RealtimeChannel,
};

#[async_trait]
pub trait Dispatcher: Send + Sync {
    async fn on_join_driver(
        &self,
        connection: ConnectionId,
        driver_id: DriverId,
    ) -> Result<(), DispatchError>;

    async fn on_join_trip(&self, connection: ConnectionId, trip_id: TripId)
        -> Result<(), DispatchError>;

    async fn on_driver_location(
        &self,
        connection: ConnectionId,
        report: LocationReport,
    ) -> Result<DriverLocationRecord, DispatchError>;

    async fn on_disconnect(&self, connection: ConnectionId);

    /// Route a decoded client event to the matching handler.
    async fn handle(&self, connection: ConnectionId, event: InboundEvent) -> Result<(), DispatchError> {
        match event {
            InboundEvent::JoinDriver { driver_id } => self.on_join_driver(connection, driver_id).await,
            InboundEvent::JoinTrip { trip_id } => self.on_join_trip(connection, trip_id).await,
            InboundEvent::DriverLocation(report) => {
                self.on_driver_location(connection, report).await.map(|_| ())
            }
        }
    }
}

pub struct RealtimeGateway {
    locations: Arc<LocationRegistry>,
    trips: Arc<dyn TripRepository>,
    channel: Arc<dyn RealtimeChannel>,
}

impl RealtimeGateway {
    pub fn new(
        locations: Arc<LocationRegistry>,
        trips: Arc<dyn TripRepository>,
        channel: Arc<dyn RealtimeChannel>,
    ) -> Self {
        Self {
            locations,
            trips,
            channel,
        }
    }
}

#[async_trait]
impl Dispatcher for RealtimeGateway {
    async fn on_join_driver(
        &self,
        connection: ConnectionId,
        driver_id: DriverId,
    ) -> Result<(), DispatchError> {
        self.channel.join_driver_channel(connection, driver_id).await
    }

    async fn on_join_trip(
        &self,
        connection: ConnectionId,
        trip_id: TripId,
    ) -> Result<(), DispatchError> {
        if self.trips.get_trip(trip_id).await?.is_none() {
            return Err(DispatchError::trip_not_found(trip_id));
        }
        self.channel.join_trip_channel(connection, trip_id).await
    }

    /// Store the report, then relay it to whoever follows the associated trip.
    async fn on_driver_location(
        &self,
        connection: ConnectionId,
        report: LocationReport,
    ) -> Result<DriverLocationRecord, DispatchError> {
        let record = self.locations.set_location(report).await?;
        if let Some(trip_id) = record.active_trip {
            let delivered = self
                .channel
                .publish(
                    &Channel::Trip(trip_id),
                    OutboundEvent::DriverLocation(DriverLocationPayload::from(&record)),
                )
                .await;
            debug!(%connection, %trip_id, delivered, "Relayed driver location");
        }
        Ok(record)
    }

    async fn on_disconnect(&self, connection: ConnectionId) {
        self.channel.disconnect(connection).await;
    }
}
