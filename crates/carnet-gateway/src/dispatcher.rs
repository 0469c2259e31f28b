use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::{RwLock, broadcast, mpsc};
use tracing::debug;
use uuid::Uuid;

use carnet_types::events::GatewayEvent;

type ConnectionMap = HashMap<Uuid, HashMap<Uuid, mpsc::UnboundedSender<GatewayEvent>>>;

/// Tracks connected clients, owns the presence set, and routes events.
///
/// Presence changes go to every connection through the broadcast channel.
/// Conversation events are targeted: they reach only the connections of the
/// users passed to [`Dispatcher::send_to_users`].
#[derive(Clone)]
pub struct Dispatcher {
    inner: Arc<DispatcherInner>,
}

struct DispatcherInner {
    /// Broadcast channel for global events (presence)
    broadcast_tx: broadcast::Sender<GatewayEvent>,

    /// Live connections: user_id -> (conn_id -> sender). A user is online
    /// while at least one connection is registered.
    connections: RwLock<ConnectionMap>,
}

impl Default for Dispatcher {
    fn default() -> Self {
        Self::new()
    }
}

impl Dispatcher {
    pub fn new() -> Self {
        let (broadcast_tx, _) = broadcast::channel(1024);
        Self {
            inner: Arc::new(DispatcherInner {
                broadcast_tx,
                connections: RwLock::new(HashMap::new()),
            }),
        }
    }

    /// Subscribe to global events. Returns a broadcast receiver.
    pub fn subscribe(&self) -> broadcast::Receiver<GatewayEvent> {
        self.inner.broadcast_tx.subscribe()
    }

    /// Broadcast an event to all connected clients.
    pub fn broadcast(&self, event: GatewayEvent) {
        let _ = self.inner.broadcast_tx.send(event);
    }

    /// Register a new connection for `user_id`. Returns (conn_id, receiver).
    /// The first connection of a user announces them online.
    pub async fn connect(&self, user_id: Uuid) -> (Uuid, mpsc::UnboundedReceiver<GatewayEvent>) {
        let conn_id = Uuid::new_v4();
        let (tx, rx) = mpsc::unbounded_channel();

        let first = {
            let mut connections = self.inner.connections.write().await;
            let user_conns = connections.entry(user_id).or_default();
            user_conns.insert(conn_id, tx);
            user_conns.len() == 1
        };

        if first {
            self.broadcast(GatewayEvent::PresenceUpdate {
                user_id,
                online: true,
            });
        }

        (conn_id, rx)
    }

    /// Unregister a connection. The last connection of a user going away
    /// announces them offline.
    pub async fn disconnect(&self, user_id: Uuid, conn_id: Uuid) {
        let last = {
            let mut connections = self.inner.connections.write().await;
            let Some(user_conns) = connections.get_mut(&user_id) else {
                return;
            };
            if user_conns.remove(&conn_id).is_none() {
                return;
            }
            if user_conns.is_empty() {
                connections.remove(&user_id);
                true
            } else {
                false
            }
        };

        if last {
            self.broadcast(GatewayEvent::PresenceUpdate {
                user_id,
                online: false,
            });
        }
    }

    /// Send a targeted event to every connection of a user.
    /// Returns the number of connections reached.
    pub async fn send_to_user(&self, user_id: Uuid, event: GatewayEvent) -> usize {
        self.send_to_users(&[user_id], event).await
    }

    /// Send a targeted event to every connection of each listed user.
    pub async fn send_to_users(&self, user_ids: &[Uuid], event: GatewayEvent) -> usize {
        let connections = self.inner.connections.read().await;
        let mut delivered = 0;
        for user_id in user_ids {
            let Some(user_conns) = connections.get(user_id) else {
                continue;
            };
            for tx in user_conns.values() {
                if tx.send(event.clone()).is_ok() {
                    delivered += 1;
                }
            }
        }
        debug!("Delivered event to {} connection(s)", delivered);
        delivered
    }

    /// Get list of online users.
    pub async fn online_users(&self) -> Vec<Uuid> {
        self.inner.connections.read().await.keys().copied().collect()
    }

    pub async fn is_online(&self, user_id: Uuid) -> bool {
        self.inner.connections.read().await.contains_key(&user_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn presence(event: GatewayEvent) -> (Uuid, bool) {
        match event {
            GatewayEvent::PresenceUpdate { user_id, online } => (user_id, online),
            other => panic!("expected presence, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn presence_follows_first_and_last_connection() {
        let dispatcher = Dispatcher::new();
        let mut rx = dispatcher.subscribe();
        let user = Uuid::new_v4();

        let (first, _rx1) = dispatcher.connect(user).await;
        let (second, _rx2) = dispatcher.connect(user).await;
        assert_eq!(presence(rx.recv().await.unwrap()), (user, true));
        assert!(dispatcher.is_online(user).await);

        dispatcher.disconnect(user, first).await;
        assert!(dispatcher.is_online(user).await);
        assert!(rx.try_recv().is_err());

        dispatcher.disconnect(user, second).await;
        assert_eq!(presence(rx.recv().await.unwrap()), (user, false));
        assert!(dispatcher.online_users().await.is_empty());
    }

    #[tokio::test]
    async fn unknown_disconnect_is_ignored() {
        let dispatcher = Dispatcher::new();
        let mut rx = dispatcher.subscribe();
        let user = Uuid::new_v4();
        let (_conn, _rx) = dispatcher.connect(user).await;
        let _ = rx.recv().await;

        dispatcher.disconnect(user, Uuid::new_v4()).await;
        assert!(dispatcher.is_online(user).await);
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn targeted_events_reach_only_listed_users() {
        let dispatcher = Dispatcher::new();
        let (alice, bob, carol) = (Uuid::new_v4(), Uuid::new_v4(), Uuid::new_v4());
        let (_, mut alice_rx) = dispatcher.connect(alice).await;
        let (_, mut alice_tab_rx) = dispatcher.connect(alice).await;
        let (_, mut bob_rx) = dispatcher.connect(bob).await;
        let (_, mut carol_rx) = dispatcher.connect(carol).await;

        let event = GatewayEvent::TypingStop {
            conversation_id: Uuid::new_v4(),
            user_id: bob,
        };
        let delivered = dispatcher.send_to_users(&[alice, bob], event.clone()).await;
        assert_eq!(delivered, 3);

        assert_eq!(alice_rx.recv().await.unwrap(), event);
        assert_eq!(alice_tab_rx.recv().await.unwrap(), event);
        assert_eq!(bob_rx.recv().await.unwrap(), event);
        assert!(carol_rx.try_recv().is_err());
    }
}
