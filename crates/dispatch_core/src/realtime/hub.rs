use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicU64, Ordering};

use async_trait::async_trait;
use parking_lot::RwLock;
use tokio::sync::mpsc;
use tracing::debug;

use super::{Channel, ConnectionId, OutboundEvent, RealtimeChannel};
use crate::error::DispatchError;

#[derive(Debug)]
struct Connection {
    sender: mpsc::UnboundedSender<OutboundEvent>,
    channels: HashSet<Channel>,
}

#[derive(Debug, Default)]
struct HubState {
    connections: HashMap<ConnectionId, Connection>,
    members: HashMap<Channel, HashSet<ConnectionId>>,
}

impl HubState {
    fn remove_connection(&mut self, connection: ConnectionId) -> usize {
        let Some(conn) = self.connections.remove(&connection) else {
            return 0;
        };
        let dropped = conn.channels.len();
        for channel in conn.channels {
            if let Some(members) = self.members.get_mut(&channel) {
                members.remove(&connection);
                if members.is_empty() {
                    self.members.remove(&channel);
                }
            }
        }
        dropped
    }
}

/// Single-process transport. Each connection gets an unbounded queue of outbound events.
#[derive(Debug, Default)]
pub struct InMemoryHub {
    state: RwLock<HubState>,
    next_id: AtomicU64,
}

impl InMemoryHub {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a new connection and hand back its outbound queue.
    pub fn connect(&self) -> (ConnectionId, mpsc::UnboundedReceiver<OutboundEvent>) {
        let id = ConnectionId(self.next_id.fetch_add(1, Ordering::Relaxed) + 1);
        let (sender, receiver) = mpsc::unbounded_channel();
        self.state.write().connections.insert(
            id,
            Connection {
                sender,
                channels: HashSet::new(),
            },
        );
        debug!(connection = %id, "Connection opened");
        (id, receiver)
    }

    pub fn connection_count(&self) -> usize {
        self.state.read().connections.len()
    }

    /// Send to `targets`, pruning connections whose receiver is gone.
    fn deliver(&self, targets: Vec<ConnectionId>, event: &OutboundEvent) -> usize {
        let mut delivered = 0;
        let mut dead = Vec::new();
        {
            let state = self.state.read();
            for id in targets {
                match state.connections.get(&id) {
                    Some(conn) if conn.sender.send(event.clone()).is_ok() => delivered += 1,
                    _ => dead.push(id),
                }
            }
        }
        if !dead.is_empty() {
            let mut state = self.state.write();
            for id in dead {
                state.remove_connection(id);
            }
        }
        delivered
    }
}

#[async_trait]
impl RealtimeChannel for InMemoryHub {
    async fn join(&self, connection: ConnectionId, channel: Channel) -> Result<(), DispatchError> {
        let mut state = self.state.write();
        let conn = state.connections.get_mut(&connection).ok_or_else(|| DispatchError::NotFound {
            entity: "connection",
            id: connection.to_string(),
        })?;
        conn.channels.insert(channel.clone());
        debug!(%connection, %channel, "Joined channel");
        state.members.entry(channel).or_default().insert(connection);
        Ok(())
    }

    async fn disconnect(&self, connection: ConnectionId) {
        let dropped = self.state.write().remove_connection(connection);
        debug!(%connection, channels = dropped, "Connection closed");
    }

    async fn publish(&self, channel: &Channel, event: OutboundEvent) -> usize {
        let targets: Vec<ConnectionId> = self
            .state
            .read()
            .members
            .get(channel)
            .map(|members| members.iter().copied().collect())
            .unwrap_or_default();
        self.deliver(targets, &event)
    }

    async fn publish_global(&self, event: OutboundEvent) -> usize {
        let targets: Vec<ConnectionId> = self.state.read().connections.keys().copied().collect();
        self.deliver(targets, &event)
    }

    async fn is_connected(&self, channel: &Channel) -> bool {
        let state = self.state.read();
        state.members.get(channel).is_some_and(|members| {
            members.iter().any(|id| {
                state
                    .connections
                    .get(id)
                    .is_some_and(|conn| !conn.sender.is_closed())
            })
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{DriverId, TripId, TripStatus};
    use crate::realtime::TripStatusPayload;

    fn status_event() -> OutboundEvent {
        OutboundEvent::TripStatus(TripStatusPayload::new(TripId::new(), TripStatus::Accepted))
    }

    #[tokio::test]
    async fn publish_reaches_only_channel_members() {
        let hub = InMemoryHub::new();
        let (a, mut rx_a) = hub.connect();
        let (_b, mut rx_b) = hub.connect();
        hub.join_driver_channel(a, DriverId::new("d-1"))
            .await
            .expect("join");

        let delivered = hub
            .publish(&Channel::Driver(DriverId::new("d-1")), status_event())
            .await;
        assert_eq!(delivered, 1);
        assert!(rx_a.try_recv().is_ok());
        assert!(rx_b.try_recv().is_err());
    }

    #[tokio::test]
    async fn global_publish_reaches_every_connection() {
        let hub = InMemoryHub::new();
        let (_a, mut rx_a) = hub.connect();
        let (_b, mut rx_b) = hub.connect();
        assert_eq!(hub.publish_global(status_event()).await, 2);
        assert!(rx_a.try_recv().is_ok());
        assert!(rx_b.try_recv().is_ok());
    }

    #[tokio::test]
    async fn membership_does_not_survive_disconnect() {
        let hub = InMemoryHub::new();
        let channel = Channel::Driver(DriverId::new("d-1"));
        let (a, _rx) = hub.connect();
        hub.join(a, channel.clone()).await.expect("join");
        assert!(hub.is_connected(&channel).await);

        hub.disconnect(a).await;
        assert!(!hub.is_connected(&channel).await);
        assert!(hub.join(a, channel).await.is_err());
    }

    #[tokio::test]
    async fn dropped_receivers_are_pruned_on_delivery() {
        let hub = InMemoryHub::new();
        let channel = Channel::Driver(DriverId::new("d-1"));
        let (a, rx) = hub.connect();
        hub.join(a, channel.clone()).await.expect("join");
        drop(rx);

        assert!(!hub.is_connected(&channel).await);
        assert_eq!(hub.publish(&channel, status_event()).await, 0);
        assert_eq!(hub.connection_count(), 0);
    }
}
