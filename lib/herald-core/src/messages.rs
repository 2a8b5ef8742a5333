use anyhow::Context;
use chrono::Utc;
use tracing::info;
use uuid::Uuid;

use crate::data_access::DataAccess;
use crate::error::{Error, Result};
use crate::events::{DashboardEvent, EventBus};
use crate::{Identity, InboxMessage, Message, MessageId, Recipient};

#[derive(Clone)]
pub struct MessageStore<D> {
    data_access: D,
    events: EventBus,
}

impl<D: DataAccess> MessageStore<D> {
    pub fn new(data_access: D, events: EventBus) -> Self {
        MessageStore { data_access, events }
    }

    pub async fn send(&self, sender: &Identity, recipient: Recipient, subject: &str, content: &str) -> Result<Message> {
        if !sender.is_admin() {
            return Err(Error::Unauthorized);
        }
        let subject = subject.trim();
        let content = content.trim();
        if subject.is_empty() {
            return Err(Error::validation("subject", "required"));
        }
        if content.is_empty() {
            return Err(Error::validation("content", "required"));
        }

        if let Recipient::Identity(id) = recipient {
            let exists = self.data_access
                .fetch_identity(&id).await
                .with_context(|| format!("Couldn't fetch recipient {id}"))?
                .is_some();
            if !exists {
                return Err(Error::NotFound("recipient"));
            }
        }

        let message = Message {
            id: Uuid::now_v7(),
            subject: subject.to_owned(),
            content: content.to_owned(),
            sender: sender.id,
            sender_name: sender.display_name().to_owned(),
            recipient,
            timestamp: Utc::now(),
            read_by: Default::default(),
        };

        self.data_access
            .create_message(&message).await
            .with_context(|| format!("Couldn't create message from {} to {recipient}", sender.id))?;

        info!(from = %sender.username, to = %recipient, "message sent");
        self.events.publish(DashboardEvent::MessageSent(message.clone()));
        Ok(message)
    }

    /// The inbox of `identity`, newest first.
    pub async fn list_for(&self, identity: &Identity) -> Result<Vec<InboxMessage>> {
        let messages = self.fetch_newest_first().await?;
        let inbox = messages
            .into_iter()
            .filter(|message| message.is_visible_to(identity))
            .map(|message| {
                let read = message.is_read_by(&identity.id);
                InboxMessage { message, read }
            })
            .collect();
        Ok(inbox)
    }

    pub async fn list_sent_by(&self, identity: &Identity) -> Result<Vec<Message>> {
        let messages = self.fetch_newest_first().await?;
        Ok(messages.into_iter().filter(|message| message.sender == identity.id).collect())
    }

    /// Adds the reader's receipt. `false` when nothing changed, including for messages
    /// the reader can't see.
    pub async fn mark_read(&self, reader: &Identity, message_id: &MessageId) -> Result<bool> {
        let messages = self.fetch_messages().await?;
        let visible = messages
            .iter()
            .any(|message| message.id == *message_id && message.is_visible_to(reader));
        if !visible {
            return Ok(false);
        }

        let changed = self.data_access
            .mark_read(message_id, &reader.id).await
            .with_context(|| format!("Couldn't mark message {message_id} read for {}", reader.id))?;
        if changed {
            self.events.publish(DashboardEvent::MessagesRead { reader: reader.id, messages: vec![*message_id] });
        }
        Ok(changed)
    }

    pub async fn mark_all_read_for(&self, identity: &Identity) -> Result<usize> {
        let unread: Vec<MessageId> = self.fetch_messages().await?
            .into_iter()
            .filter(|message| message.is_visible_to(identity) && !message.is_read_by(&identity.id))
            .map(|message| message.id)
            .collect();

        let mut changed = Vec::with_capacity(unread.len());
        for message_id in unread {
            let marked = self.data_access
                .mark_read(&message_id, &identity.id).await
                .with_context(|| format!("Couldn't mark message {message_id} read for {}", identity.id))?;
            if marked {
                changed.push(message_id);
            }
        }

        let count = changed.len();
        if count > 0 {
            info!(username = %identity.username, count, "inbox marked read");
            self.events.publish(DashboardEvent::MessagesRead { reader: identity.id, messages: changed });
        }
        Ok(count)
    }

    async fn fetch_messages(&self) -> Result<Vec<Message>> {
        let messages = self.data_access.fetch_messages().await.context("Couldn't fetch messages")?;
        Ok(messages)
    }

    async fn fetch_newest_first(&self) -> Result<Vec<Message>> {
        let mut messages = self.fetch_messages().await?;
        newest_first(&mut messages);
        Ok(messages)
    }
}

/// Orders by timestamp descending; equal timestamps keep the later insertion first.
fn newest_first(messages: &mut [Message]) {
    messages.reverse();
    messages.sort_by(|a, b| b.timestamp.cmp(&a.timestamp));
}
