//! Presence registry.
//!
//! Tracks which user owns which live connection (one per user, last
//! writer wins), which connections are subscribed to which conversation,
//! and the per-connection senders used to push events out. Injected into
//! the delivery and seen-sync engines so tests can drive it directly.

use std::sync::Arc;

use dashmap::DashMap;
use tokio::sync::mpsc;
use tracing::debug;
use uuid::Uuid;

use super::events::ChatEvent;

/// Opaque identifier of one live connection.
pub type ConnectionId = String;

struct ConnectedClient {
    user_id: Uuid,
    sender: mpsc::UnboundedSender<ChatEvent>,
}

/// Process-local registry of live connections and conversation rooms.
pub struct PresenceRegistry {
    /// Live connections by connection id
    connections: DashMap<ConnectionId, Arc<ConnectedClient>>,
    /// User id to their single live connection
    online: DashMap<Uuid, ConnectionId>,
    /// Conversation id to subscribed connections
    rooms: DashMap<Uuid, Vec<ConnectionId>>,
}

impl PresenceRegistry {
    pub fn new() -> Self {
        Self {
            connections: DashMap::new(),
            online: DashMap::new(),
            rooms: DashMap::new(),
        }
    }

    /// Register a new connection for a user and mark them online. Any
    /// prior connection entry for the user is superseded (last writer
    /// wins — a single active connection per user).
    pub fn register(
        &self,
        user_id: Uuid,
        sender: mpsc::UnboundedSender<ChatEvent>,
    ) -> ConnectionId {
        let connection_id = Uuid::new_v4().to_string();
        self.connections.insert(
            connection_id.clone(),
            Arc::new(ConnectedClient { user_id, sender }),
        );
        self.online.insert(user_id, connection_id.clone());

        debug!(user_id = %user_id, connection_id = %connection_id, "connection registered");
        connection_id
    }

    /// Remove a connection. The user's online entry is only cleared when
    /// it still points at this connection, so a stale disconnect arriving
    /// after a reconnect cannot evict the newer connection.
    pub fn set_offline(&self, connection_id: &str) {
        if let Some((_, client)) = self.connections.remove(connection_id) {
            self.online
                .remove_if(&client.user_id, |_, current| current == connection_id);
            debug!(user_id = %client.user_id, connection_id, "connection removed");
        }
        for mut room in self.rooms.iter_mut() {
            room.value_mut().retain(|c| c != connection_id);
        }
    }

    /// The user's live connection, if any.
    pub fn lookup(&self, user_id: Uuid) -> Option<ConnectionId> {
        self.online.get(&user_id).map(|c| c.value().clone())
    }

    /// Subscribe a connection to a conversation's events.
    pub fn join_conversation(&self, conversation_id: Uuid, connection_id: &str) {
        let mut room = self.rooms.entry(conversation_id).or_default();
        if !room.iter().any(|c| c == connection_id) {
            room.push(connection_id.to_string());
        }
    }

    pub fn leave_conversation(&self, conversation_id: Uuid, connection_id: &str) {
        if let Some(mut room) = self.rooms.get_mut(&conversation_id) {
            room.retain(|c| c != connection_id);
        }
    }

    /// The seen-on-arrival predicate: the user is online AND their
    /// connection is subscribed to this conversation. Online alone is
    /// not enough — a user reading another conversation has not seen
    /// this one's messages.
    pub fn is_viewing(&self, user_id: Uuid, conversation_id: Uuid) -> bool {
        let Some(connection_id) = self.lookup(user_id) else {
            return false;
        };
        self.rooms
            .get(&conversation_id)
            .map(|room| room.iter().any(|c| *c == connection_id))
            .unwrap_or(false)
    }

    /// Connections subscribed to a conversation.
    pub fn room_members(&self, conversation_id: Uuid) -> Vec<ConnectionId> {
        self.rooms
            .get(&conversation_id)
            .map(|room| room.value().clone())
            .unwrap_or_default()
    }

    /// Push an event to a set of connections, once per connection even
    /// if a target appears multiple times.
    pub fn send_to_connections(&self, targets: &[ConnectionId], event: &ChatEvent) {
        let mut delivered: Vec<&str> = Vec::with_capacity(targets.len());
        for connection_id in targets {
            if delivered.contains(&connection_id.as_str()) {
                continue;
            }
            delivered.push(connection_id.as_str());
            if let Some(client) = self.connections.get(connection_id.as_str()) {
                if client.sender.send(event.clone()).is_err() {
                    debug!(connection_id = %connection_id, "send to closed connection dropped");
                }
            }
        }
    }

    /// Push an event to a user's live connection, if any.
    pub fn send_to_user(&self, user_id: Uuid, event: &ChatEvent) {
        if let Some(connection_id) = self.lookup(user_id) {
            self.send_to_connections(std::slice::from_ref(&connection_id), event);
        }
    }

    /// Number of live connections.
    pub fn connection_count(&self) -> usize {
        self.connections.len()
    }
}

impl Default for PresenceRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn user(n: u128) -> Uuid {
        Uuid::from_u128(n)
    }

    fn connect(registry: &PresenceRegistry, user_id: Uuid) -> (ConnectionId, mpsc::UnboundedReceiver<ChatEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (registry.register(user_id, tx), rx)
    }

    #[test]
    fn last_connection_wins() {
        let registry = PresenceRegistry::new();
        let (first, _rx1) = connect(&registry, user(1));
        let (second, _rx2) = connect(&registry, user(1));
        assert_ne!(first, second);
        assert_eq!(registry.lookup(user(1)), Some(second));
    }

    #[test]
    fn stale_disconnect_does_not_evict_newer_connection() {
        let registry = PresenceRegistry::new();
        let (old, _rx1) = connect(&registry, user(1));
        let (new, _rx2) = connect(&registry, user(1));

        // the old socket's disconnect arrives after the reconnect
        registry.set_offline(&old);
        assert_eq!(registry.lookup(user(1)), Some(new.clone()));

        registry.set_offline(&new);
        assert_eq!(registry.lookup(user(1)), None);
    }

    #[test]
    fn viewing_requires_online_and_subscribed() {
        let registry = PresenceRegistry::new();
        let conversation = Uuid::from_u128(99);

        assert!(!registry.is_viewing(user(1), conversation));

        let (connection, _rx) = connect(&registry, user(1));
        assert!(!registry.is_viewing(user(1), conversation));

        registry.join_conversation(conversation, &connection);
        assert!(registry.is_viewing(user(1), conversation));

        registry.leave_conversation(conversation, &connection);
        assert!(!registry.is_viewing(user(1), conversation));
    }

    #[test]
    fn duplicate_targets_receive_once() {
        let registry = PresenceRegistry::new();
        let (connection, mut rx) = connect(&registry, user(1));

        let event = ChatEvent::MessagesSeen {
            conversation_id: Uuid::nil(),
            seen_by: Uuid::nil(),
            message_ids: vec![],
        };
        registry.send_to_connections(&[connection.clone(), connection.clone()], &event);

        assert!(rx.try_recv().is_ok());
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn disconnect_leaves_rooms() {
        let registry = PresenceRegistry::new();
        let conversation = Uuid::from_u128(7);
        let (connection, _rx) = connect(&registry, user(1));
        registry.join_conversation(conversation, &connection);

        registry.set_offline(&connection);
        assert!(registry.room_members(conversation).is_empty());
    }
}
