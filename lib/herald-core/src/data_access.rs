//! Storage ports. Each backend (in-memory, local key/value file, PostgreSQL) implements all of
//! them; business logic only ever sees these traits.

use chrono::{DateTime, Utc};

use crate::{ChannelLink, ConflictField, Identity, IdentityId, Message, MessageId, Theme};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InsertOutcome {
    Inserted,
    Taken(ConflictField),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpdateOutcome {
    Updated,
    Missing,
    Taken(ConflictField),
}

/// Which unique field of `candidate` collides with `existing`, ignoring the record itself.
pub fn conflicting_field<'a>(candidate: &Identity, existing: impl IntoIterator<Item = &'a Identity>) -> Option<ConflictField> {
    let mut email_taken = false;
    for record in existing.into_iter().filter(|record| record.id != candidate.id) {
        if record.username == candidate.username {
            return Some(ConflictField::Username);
        }
        email_taken |= record.email == candidate.email;
    }
    email_taken.then_some(ConflictField::Email)
}

pub trait IdentityRepository: 'static + Send + Sync + Clone {
    type Error: 'static + std::error::Error + Send + Sync;

    /// All identities in creation order.
    fn fetch_identities(&self) -> async_result!(Vec<Identity>);

    fn fetch_identity(&self, id: &IdentityId) -> async_result!(Option<Identity>) {
        async move {
            let res = self.fetch_identities().await?
                .into_iter()
                .find(|identity| identity.id == *id);
            Ok(res)
        }
    }

    fn find_identity_by_username(&self, username: &str) -> async_result!(Option<Identity>) {
        async move {
            let res = self.fetch_identities().await?
                .into_iter()
                .find(|identity| identity.username == username);
            Ok(res)
        }
    }

    fn find_identity_by_email(&self, email: &str) -> async_result!(Option<Identity>) {
        async move {
            let res = self.fetch_identities().await?
                .into_iter()
                .find(|identity| identity.email == email);
            Ok(res)
        }
    }

    /// Stores a new identity unless its username or email is already used.
    fn insert_identity(&self, identity: &Identity) -> async_result!(InsertOutcome);
    /// Replaces the stored record with the same id, keeping username and email unique.
    fn update_identity(&self, identity: &Identity) -> async_result!(UpdateOutcome);
    fn delete_identity(&self, id: &IdentityId) -> async_result!(Option<Identity>);
}

pub trait MessageRepository: 'static + Send + Sync + Clone {
    type Error: 'static + std::error::Error + Send + Sync;

    /// All messages in insertion order.
    fn fetch_messages(&self) -> async_result!(Vec<Message>);
    fn create_message(&self, message: &Message) -> async_result!(());
    /// Adds a read receipt. `false` when the message is unknown or the receipt already exists.
    fn mark_read(&self, message_id: &MessageId, reader: &IdentityId) -> async_result!(bool);
    /// Removes the messages addressed to this identity specifically, returning how many went.
    fn delete_messages_to(&self, recipient: &IdentityId) -> async_result!(usize);
}

/// Raw contents of the session slot. The identity snapshot is kept as the JSON it was
/// persisted as, so a damaged slot is detected by the session store rather than the backend.
#[derive(Debug, Clone, PartialEq)]
pub struct SessionSlot {
    pub token: String,
    pub identity: String,
}

/// Per-scope state: the single session slot, last-login stamps and the theme.
pub trait ProfileStorage: 'static + Send + Sync + Clone {
    type Error: 'static + std::error::Error + Send + Sync;

    fn load_session_slot(&self) -> async_result!(Option<SessionSlot>);
    fn store_session_slot(&self, slot: SessionSlot) -> async_result!(());
    fn clear_session_slot(&self) -> async_result!(());

    fn fetch_last_login(&self, id: &IdentityId) -> async_result!(Option<DateTime<Utc>>);
    /// Records a login and returns the one before it.
    fn record_last_login(&self, id: &IdentityId, at: DateTime<Utc>) -> async_result!(Option<DateTime<Utc>>);
    fn forget_last_login(&self, id: &IdentityId) -> async_result!(());

    fn load_theme(&self) -> async_result!(Option<Theme>);
    fn store_theme(&self, theme: Theme) -> async_result!(());
}

pub trait ChannelDirectory: 'static + Send + Sync + Clone {
    type Error: 'static + std::error::Error + Send + Sync;

    fn fetch_channel_links(&self) -> async_result!(Vec<ChannelLink>);

    fn fetch_channel_link(&self, username: &str) -> async_result!(Option<ChannelLink>) {
        async move {
            let res = self.fetch_channel_links().await?
                .into_iter()
                .find(|link| link.username == username);
            Ok(res)
        }
    }

    fn find_channel_link_by_chat(&self, chat_id: &str) -> async_result!(Option<ChannelLink>) {
        async move {
            let res = self.fetch_channel_links().await?
                .into_iter()
                .find(|link| link.chat_id == chat_id);
            Ok(res)
        }
    }

    /// Creates or replaces the link for `link.username`.
    fn link_channel(&self, link: &ChannelLink) -> async_result!(());
    fn unlink_channel(&self, username: &str) -> async_result!(Option<ChannelLink>);
}

/// Everything a dashboard backend provides.
pub trait DataAccess: IdentityRepository + MessageRepository + ProfileStorage + ChannelDirectory {}

impl<T> DataAccess for T where T: IdentityRepository + MessageRepository + ProfileStorage + ChannelDirectory {}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Role;
    use crate::test_support::identity;

    #[test]
    fn detects_conflicts_case_sensitively() {
        let alice = identity("alice", Role::User);
        let existing = vec![alice.clone()];

        let same_username = identity("alice", Role::User);
        assert_eq!(conflicting_field(&same_username, &existing), Some(ConflictField::Username));

        let mut same_email = identity("alice2", Role::User);
        same_email.email = alice.email.clone();
        assert_eq!(conflicting_field(&same_email, &existing), Some(ConflictField::Email));

        let different_case = identity("Alice", Role::User);
        assert_eq!(conflicting_field(&different_case, &existing), None);
    }

    #[test]
    fn a_record_never_conflicts_with_itself() {
        let alice = identity("alice", Role::User);
        let existing = vec![alice.clone()];
        assert_eq!(conflicting_field(&alice, &existing), None);
    }
}
