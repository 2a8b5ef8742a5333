use tokio::sync::broadcast;

use crate::{Identity, IdentityId, Message, MessageId};

const EVENT_BUFFER_SIZE: usize = 256;

#[derive(Clone, Debug)]
pub enum DashboardEvent {
    IdentityCreated(Identity),
    IdentityDeleted { id: IdentityId, username: String },
    MessageSent(Message),
    MessagesRead { reader: IdentityId, messages: Vec<MessageId> },
}

impl DashboardEvent {
    /// Whether the unread state of `identity` may have changed.
    pub fn concerns(&self, identity: &Identity) -> bool {
        match self {
            DashboardEvent::MessageSent(message) => message.is_visible_to(identity),
            DashboardEvent::MessagesRead { reader, .. } => *reader == identity.id,
            DashboardEvent::IdentityCreated(_) | DashboardEvent::IdentityDeleted { .. } => false,
        }
    }
}

/// Fan-out of dashboard mutations to whoever listens (notification projections, the relay).
#[derive(Clone)]
pub struct EventBus {
    sender: broadcast::Sender<DashboardEvent>,
}

impl EventBus {
    pub fn new() -> Self {
        let (sender, _) = broadcast::channel(EVENT_BUFFER_SIZE);
        EventBus { sender }
    }

    pub fn publish(&self, event: DashboardEvent) {
        // no subscribers is a normal state, nothing to report
        if let Err(broadcast::error::SendError(event)) = self.sender.send(event) {
            tracing::trace!(?event, "event dropped, no subscribers");
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<DashboardEvent> {
        self.sender.subscribe()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{identity, message};
    use crate::{Recipient, Role};

    #[tokio::test]
    async fn subscribers_receive_published_events() {
        let bus = EventBus::new();
        let mut receiver = bus.subscribe();
        let admin = identity("admin", Role::Admin);

        bus.publish(DashboardEvent::IdentityCreated(admin.clone()));

        match receiver.recv().await.unwrap() {
            DashboardEvent::IdentityCreated(created) => assert_eq!(created, admin),
            other => panic!("unexpected event {other:?}"),
        }
    }

    #[test]
    fn publishing_without_subscribers_is_fine() {
        EventBus::new().publish(DashboardEvent::IdentityDeleted { id: uuid::Uuid::new_v4(), username: "gone".into() });
    }

    #[test]
    fn events_concern_affected_identities_only() {
        let admin = identity("admin", Role::Admin);
        let alice = identity("alice", Role::User);
        let bob = identity("bob", Role::User);

        let to_alice = DashboardEvent::MessageSent(message(&admin, Recipient::Identity(alice.id), "Hi"));
        assert!(to_alice.concerns(&alice));
        assert!(!to_alice.concerns(&bob));

        let read_by_bob = DashboardEvent::MessagesRead { reader: bob.id, messages: vec![] };
        assert!(read_by_bob.concerns(&bob));
        assert!(!read_by_bob.concerns(&alice));
    }
}
