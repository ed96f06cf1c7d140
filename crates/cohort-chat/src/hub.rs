use std::collections::{HashMap, HashSet};
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use tokio::sync::{mpsc, RwLock};
use tracing::{debug, info};

use cohort_shared::{GroupId, UserId};

use crate::events::{ChannelKey, Dispatch, ServerEvent, Targets};

/// Identifies one live socket connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ConnectionId(u64);

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "conn-{}", self.0)
    }
}

pub type EventReceiver = mpsc::UnboundedReceiver<Arc<ServerEvent>>;

struct Subscriber {
    user: UserId,
    sender: mpsc::UnboundedSender<Arc<ServerEvent>>,
    channels: HashSet<ChannelKey>,
}

#[derive(Default)]
struct HubState {
    connections: HashMap<ConnectionId, Subscriber>,
    channels: HashMap<ChannelKey, HashSet<ConnectionId>>,
}

impl HubState {
    fn subscribe(&mut self, conn: ConnectionId, key: ChannelKey) -> bool {
        let Some(subscriber) = self.connections.get_mut(&conn) else {
            return false;
        };
        subscriber.channels.insert(key.clone());
        self.channels.entry(key).or_default().insert(conn)
    }

    fn unsubscribe(&mut self, conn: ConnectionId, key: &ChannelKey) -> bool {
        if let Some(subscriber) = self.connections.get_mut(&conn) {
            subscriber.channels.remove(key);
        }

        let removed = match self.channels.get_mut(key) {
            Some(members) => members.remove(&conn),
            None => false,
        };
        if self.channels.get(key).is_some_and(HashSet::is_empty) {
            self.channels.remove(key);
        }
        removed
    }
}

/// Room-scoped fan-out of server events to live connections.
///
/// Each connection owns an unbounded receiver, so publishing never waits on
/// a slow socket. A connection is always subscribed to its own personal
/// channel; group channels are joined and left explicitly.
#[derive(Clone)]
pub struct Hub {
    state: Arc<RwLock<HubState>>,
    next_id: Arc<AtomicU64>,
}

impl Hub {
    pub fn new() -> Self {
        Self {
            state: Arc::new(RwLock::new(HubState::default())),
            next_id: Arc::new(AtomicU64::new(1)),
        }
    }

    /// Register a connection for `user` and subscribe it to the user's
    /// personal channel.
    pub async fn connect(&self, user: &UserId) -> (ConnectionId, EventReceiver) {
        let id = ConnectionId(self.next_id.fetch_add(1, Ordering::Relaxed));
        let (tx, rx) = mpsc::unbounded_channel();

        let mut state = self.state.write().await;
        state.connections.insert(
            id,
            Subscriber {
                user: user.clone(),
                sender: tx,
                channels: HashSet::new(),
            },
        );
        state.subscribe(id, ChannelKey::User(user.clone()));

        info!(conn = %id, user = %user, connections = state.connections.len(), "connection registered");
        (id, rx)
    }

    /// Drop the connection and every subscription it held.
    pub async fn disconnect(&self, conn: ConnectionId) {
        let mut state = self.state.write().await;
        let Some(subscriber) = state.connections.get(&conn) else {
            return;
        };
        let channels: Vec<ChannelKey> = subscriber.channels.iter().cloned().collect();
        for key in &channels {
            state.unsubscribe(conn, key);
        }
        state.connections.remove(&conn);

        info!(conn = %conn, connections = state.connections.len(), "connection closed");
    }

    pub async fn join(&self, conn: ConnectionId, key: ChannelKey) -> bool {
        let joined = self.state.write().await.subscribe(conn, key.clone());
        debug!(conn = %conn, channel = ?key, joined, "channel join");
        joined
    }

    pub async fn leave(&self, conn: ConnectionId, key: &ChannelKey) -> bool {
        let left = self.state.write().await.unsubscribe(conn, key);
        debug!(conn = %conn, channel = ?key, left, "channel leave");
        left
    }

    pub async fn is_subscribed(&self, conn: ConnectionId, key: &ChannelKey) -> bool {
        self.state
            .read()
            .await
            .channels
            .get(key)
            .is_some_and(|members| members.contains(&conn))
    }

    pub async fn user_of(&self, conn: ConnectionId) -> Option<UserId> {
        self.state
            .read()
            .await
            .connections
            .get(&conn)
            .map(|s| s.user.clone())
    }

    /// Deliver an event to every connection the targets reach, once per
    /// connection even if it sits in several targeted channels. Closed
    /// receivers are skipped silently.
    pub async fn publish(&self, dispatch: Dispatch) -> usize {
        let state = self.state.read().await;

        let recipients: HashSet<ConnectionId> = match &dispatch.targets {
            Targets::Everyone => state.connections.keys().copied().collect(),
            Targets::Channels(keys) => keys
                .iter()
                .filter_map(|key| state.channels.get(key))
                .flatten()
                .copied()
                .collect(),
        };

        let event = Arc::new(dispatch.event);
        let mut delivered = 0;
        for conn in &recipients {
            if let Some(subscriber) = state.connections.get(conn) {
                if subscriber.sender.send(Arc::clone(&event)).is_ok() {
                    delivered += 1;
                }
            }
        }

        debug!(event = event.name(), recipients = recipients.len(), delivered, "published");
        delivered
    }

    /// Relay an ephemeral event from one connection to the rest of a group
    /// room. The sender must itself be in the room; returns `false`
    /// otherwise.
    pub async fn relay(&self, from: ConnectionId, group: GroupId, event: ServerEvent) -> bool {
        let state = self.state.read().await;
        let key = ChannelKey::Group(group);
        let Some(members) = state.channels.get(&key) else {
            return false;
        };
        if !members.contains(&from) {
            return false;
        }

        let event = Arc::new(event);
        for conn in members.iter().filter(|c| **c != from) {
            if let Some(subscriber) = state.connections.get(conn) {
                let _ = subscriber.sender.send(Arc::clone(&event));
            }
        }
        true
    }

    pub async fn connection_count(&self) -> usize {
        self.state.read().await.connections.len()
    }

    pub async fn subscriber_count(&self, key: &ChannelKey) -> usize {
        self.state
            .read()
            .await
            .channels
            .get(key)
            .map(HashSet::len)
            .unwrap_or(0)
    }
}

impl Default for Hub {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn chat_cleared(group_id: GroupId) -> ServerEvent {
        ServerEvent::ChatCleared { group_id }
    }

    #[tokio::test]
    async fn connect_joins_personal_channel() {
        let hub = Hub::new();
        let alice = UserId::new("alice");
        let (conn, mut rx) = hub.connect(&alice).await;

        assert!(hub.is_subscribed(conn, &ChannelKey::User(alice.clone())).await);
        assert_eq!(hub.user_of(conn).await, Some(alice.clone()));

        let group_id = GroupId::new();
        hub.publish(Dispatch {
            targets: Targets::user(&alice),
            event: chat_cleared(group_id),
        })
        .await;
        assert_eq!(*rx.recv().await.unwrap(), chat_cleared(group_id));
    }

    #[tokio::test]
    async fn dual_target_delivers_once() {
        let hub = Hub::new();
        let alice = UserId::new("alice");
        let group_id = GroupId::new();
        let (conn, mut rx) = hub.connect(&alice).await;
        hub.join(conn, ChannelKey::Group(group_id)).await;

        let delivered = hub
            .publish(Dispatch {
                targets: Targets::group(group_id).and(ChannelKey::User(alice)),
                event: chat_cleared(group_id),
            })
            .await;
        assert_eq!(delivered, 1);
        assert!(rx.recv().await.is_some());
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn everyone_reaches_all_connections() {
        let hub = Hub::new();
        let (_a, mut rx_a) = hub.connect(&UserId::new("a")).await;
        let (_b, mut rx_b) = hub.connect(&UserId::new("b")).await;

        let delivered = hub
            .publish(Dispatch {
                targets: Targets::Everyone,
                event: ServerEvent::GroupDeleted { group_id: GroupId::new() },
            })
            .await;
        assert_eq!(delivered, 2);
        assert!(rx_a.recv().await.is_some());
        assert!(rx_b.recv().await.is_some());
    }

    #[tokio::test]
    async fn publish_without_subscribers_is_noop() {
        let hub = Hub::new();
        let (_conn, rx) = hub.connect(&UserId::new("a")).await;
        drop(rx);

        let delivered = hub
            .publish(Dispatch {
                targets: Targets::Everyone,
                event: chat_cleared(GroupId::new()),
            })
            .await;
        assert_eq!(delivered, 0);

        let delivered = hub
            .publish(Dispatch {
                targets: Targets::group(GroupId::new()),
                event: chat_cleared(GroupId::new()),
            })
            .await;
        assert_eq!(delivered, 0);
    }

    #[tokio::test]
    async fn relay_skips_sender_and_requires_membership() {
        let hub = Hub::new();
        let group_id = GroupId::new();
        let (a, mut rx_a) = hub.connect(&UserId::new("a")).await;
        let (b, mut rx_b) = hub.connect(&UserId::new("b")).await;
        let (outsider, _rx_o) = hub.connect(&UserId::new("c")).await;
        hub.join(a, ChannelKey::Group(group_id)).await;
        hub.join(b, ChannelKey::Group(group_id)).await;

        let typing = ServerEvent::StopTyping {
            group_id,
            user_id: UserId::new("a"),
        };
        assert!(hub.relay(a, group_id, typing.clone()).await);
        assert_eq!(*rx_b.recv().await.unwrap(), typing);
        assert!(rx_a.try_recv().is_err());

        assert!(!hub.relay(outsider, group_id, typing).await);
        assert!(rx_b.try_recv().is_err());
    }

    #[tokio::test]
    async fn disconnect_drops_subscriptions() {
        let hub = Hub::new();
        let group_id = GroupId::new();
        let key = ChannelKey::Group(group_id);
        let (conn, _rx) = hub.connect(&UserId::new("a")).await;
        hub.join(conn, key.clone()).await;
        assert_eq!(hub.subscriber_count(&key).await, 1);

        assert!(hub.leave(conn, &key).await);
        assert!(!hub.leave(conn, &key).await);
        hub.join(conn, key.clone()).await;

        hub.disconnect(conn).await;
        assert_eq!(hub.subscriber_count(&key).await, 0);
        assert_eq!(hub.connection_count().await, 0);
        assert!(!hub.join(conn, key).await);
    }
}
