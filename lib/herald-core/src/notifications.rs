use serde::Serialize;
use tokio::sync::{broadcast, mpsc};
use tracing::debug;

use herald_utils::utils::log_internal_error;

use crate::data_access::DataAccess;
use crate::error::Result;
use crate::events::{DashboardEvent, EventBus};
use crate::messages::MessageStore;
use crate::{Identity, InboxMessage, Message};

pub const PREVIEW_LIMIT: usize = 5;

/// Unread summary of one identity's inbox.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Projection {
    pub unread_count: usize,
    pub preview: Vec<Message>,
    pub has_more: bool,
}

impl Projection {
    /// Expects the inbox newest first, as [`MessageStore::list_for`] returns it.
    pub fn from_inbox(inbox: Vec<InboxMessage>) -> Self {
        let unread: Vec<Message> = inbox
            .into_iter()
            .filter(|entry| !entry.read)
            .map(|entry| entry.message)
            .collect();
        let unread_count = unread.len();
        let preview = unread.into_iter().take(PREVIEW_LIMIT).collect();
        Projection { unread_count, preview, has_more: unread_count > PREVIEW_LIMIT }
    }
}

#[derive(Clone)]
pub struct NotificationProjector<D> {
    messages: MessageStore<D>,
    events: EventBus,
}

impl<D: DataAccess> NotificationProjector<D> {
    pub fn new(messages: MessageStore<D>, events: EventBus) -> Self {
        NotificationProjector { messages, events }
    }

    pub async fn project(&self, identity: &Identity) -> Result<Projection> {
        let inbox = self.messages.list_for(identity).await?;
        Ok(Projection::from_inbox(inbox))
    }

    /// Yields the current projection, then a fresh one whenever the identity's unread state may
    /// have changed. The stream ends when the identity is deleted or the receiver is dropped.
    pub async fn subscribe(&self, identity: Identity) -> Result<mpsc::UnboundedReceiver<Projection>> {
        // subscribe before projecting so nothing published in between is missed
        let mut events = self.events.subscribe();
        let initial = self.project(&identity).await?;

        let (sender, receiver) = mpsc::unbounded_channel();
        // receiver is still in scope, this can't fail
        let _ = sender.send(initial);

        let projector = self.clone();
        tokio::spawn(async move {
            loop {
                let event = tokio::select! {
                    _ = sender.closed() => break,
                    event = events.recv() => event,
                };

                let recompute = match event {
                    Ok(DashboardEvent::IdentityDeleted { id, .. }) if id == identity.id => break,
                    Ok(event) => event.concerns(&identity),
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        debug!(skipped, username = %identity.username, "notification subscriber lagged");
                        true
                    },
                    Err(broadcast::error::RecvError::Closed) => break,
                };
                if !recompute {
                    continue;
                }

                match projector.project(&identity).await {
                    Ok(projection) => {
                        if sender.send(projection).is_err() {
                            break;
                        }
                    },
                    Err(e) => log_internal_error(e),
                }
            }
            debug!(username = %identity.username, "notification subscription ended");
        });

        Ok(receiver)
    }
}
