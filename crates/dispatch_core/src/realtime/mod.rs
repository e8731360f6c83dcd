//! Realtime transport abstraction.
//!
//! Logical channels are `driver:{id}`, `trip:{id}` plus a global broadcast.
//! Membership belongs to a connection and is gone once that connection drops;
//! a reconnecting client has to join again.

mod events;
mod hub;

use std::fmt;

use async_trait::async_trait;

use crate::error::DispatchError;
use crate::model::{DriverId, TripId};

pub use events::{
    DriverLocationPayload, InboundEvent, OutboundEvent, TripRequestPayload, TripStatusPayload,
};
pub use hub::InMemoryHub;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ConnectionId(pub u64);

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "conn-{}", self.0)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Channel {
    Driver(DriverId),
    Trip(TripId),
}

impl fmt::Display for Channel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Channel::Driver(id) => write!(f, "driver:{id}"),
            Channel::Trip(id) => write!(f, "trip:{id}"),
        }
    }
}

#[async_trait]
pub trait RealtimeChannel: Send + Sync {
    /// Subscribe `connection` to `channel`.
    async fn join(&self, connection: ConnectionId, channel: Channel) -> Result<(), DispatchError>;

    /// Drop every membership held by `connection`.
    async fn disconnect(&self, connection: ConnectionId);

    /// Deliver to every member of `channel`. Returns the number of connections reached.
    async fn publish(&self, channel: &Channel, event: OutboundEvent) -> usize;

    /// Deliver to every live connection.
    async fn publish_global(&self, event: OutboundEvent) -> usize;

    /// Whether at least one live connection is subscribed to `channel`.
    async fn is_connected(&self, channel: &Channel) -> bool;

    async fn join_driver_channel(
        &self,
        connection: ConnectionId,
        driver_id: DriverId,
    ) -> Result<(), DispatchError> {
        self.join(connection, Channel::Driver(driver_id)).await
    }

    async fn join_trip_channel(
        &self,
        connection: ConnectionId,
        trip_id: TripId,
    ) -> Result<(), DispatchError> {
        self.join(connection, Channel::Trip(trip_id)).await
    }
}
