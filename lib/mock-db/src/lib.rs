use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};

use chrono::{DateTime, Utc};

use herald_auth::{AuthStorage, AuthenticationInfo};
use herald_core::data_access::*;
use herald_core::{ChannelLink, Identity, IdentityId, Message, MessageId, Recipient, Theme};

#[derive(Debug)]
pub enum Error {
    ThreadPoisonError,
}

impl std::fmt::Display for Error {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::ThreadPoisonError => write!(f, "Thread poisoning error"),
        }
    }
}

impl std::error::Error for Error {}

impl<T> From<PoisonError<T>> for Error {
    fn from(_value: PoisonError<T>) -> Self {
        Self::ThreadPoisonError
    }
}

struct AuthRecord {
    user_id: IdentityId,
    phc_string: password_hash::PasswordHashString,
}

#[derive(Default)]
struct Profile {
    session_slot: Option<SessionSlot>,
    last_logins: HashMap<IdentityId, DateTime<Utc>>,
    theme: Option<Theme>,
}

/// Everything in memory, gone with the process. Starts empty.
#[derive(Clone, Default)]
pub struct Db {
    identities: Arc<Mutex<Vec<Identity>>>,
    messages: Arc<Mutex<Vec<Message>>>,
    auth: Arc<Mutex<Vec<AuthRecord>>>,
    profile: Arc<Mutex<Profile>>,
    channels: Arc<Mutex<Vec<ChannelLink>>>,
}

impl Db {
    pub fn new() -> Self {
        Self::default()
    }
}

impl IdentityRepository for Db {
    type Error = Error;

    async fn fetch_identities(&self) -> Result<Vec<Identity>, Error> {
        Ok(self.identities.lock()?.clone())
    }

    async fn insert_identity(&self, identity: &Identity) -> Result<InsertOutcome, Error> {
        let mut table_locked = self.identities.lock()?;
        if let Some(field) = conflicting_field(identity, table_locked.iter()) {
            return Ok(InsertOutcome::Taken(field));
        }
        table_locked.push(identity.clone());
        Ok(InsertOutcome::Inserted)
    }

    async fn update_identity(&self, identity: &Identity) -> Result<UpdateOutcome, Error> {
        let mut table_locked = self.identities.lock()?;
        let Some(position) = table_locked.iter().position(|record| record.id == identity.id) else {
            return Ok(UpdateOutcome::Missing);
        };
        if let Some(field) = conflicting_field(identity, table_locked.iter()) {
            return Ok(UpdateOutcome::Taken(field));
        }
        table_locked[position] = identity.clone();
        Ok(UpdateOutcome::Updated)
    }

    async fn delete_identity(&self, id: &IdentityId) -> Result<Option<Identity>, Error> {
        let mut table_locked = self.identities.lock()?;
        let res = table_locked
            .iter()
            .position(|record| record.id == *id)
            .map(|position| table_locked.remove(position));
        Ok(res)
    }
}

impl MessageRepository for Db {
    type Error = Error;

    async fn fetch_messages(&self) -> Result<Vec<Message>, Error> {
        Ok(self.messages.lock()?.clone())
    }

    async fn create_message(&self, message: &Message) -> Result<(), Error> {
        self.messages.lock()?.push(message.clone());
        Ok(())
    }

    async fn mark_read(&self, message_id: &MessageId, reader: &IdentityId) -> Result<bool, Error> {
        let mut messages_lock = self.messages.lock()?;
        let res = match messages_lock.iter_mut().find(|message| message.id == *message_id) {
            Some(message) => message.read_by.insert(*reader),
            None => false,
        };
        Ok(res)
    }

    async fn delete_messages_to(&self, recipient: &IdentityId) -> Result<usize, Error> {
        let mut messages_lock = self.messages.lock()?;
        let before = messages_lock.len();
        messages_lock.retain(|message| message.recipient != Recipient::Identity(*recipient));
        Ok(before - messages_lock.len())
    }
}

impl ProfileStorage for Db {
    type Error = Error;

    async fn load_session_slot(&self) -> Result<Option<SessionSlot>, Error> {
        Ok(self.profile.lock()?.session_slot.clone())
    }

    async fn store_session_slot(&self, slot: SessionSlot) -> Result<(), Error> {
        self.profile.lock()?.session_slot = Some(slot);
        Ok(())
    }

    async fn clear_session_slot(&self) -> Result<(), Error> {
        self.profile.lock()?.session_slot = None;
        Ok(())
    }

    async fn fetch_last_login(&self, id: &IdentityId) -> Result<Option<DateTime<Utc>>, Error> {
        Ok(self.profile.lock()?.last_logins.get(id).copied())
    }

    async fn record_last_login(&self, id: &IdentityId, at: DateTime<Utc>) -> Result<Option<DateTime<Utc>>, Error> {
        Ok(self.profile.lock()?.last_logins.insert(*id, at))
    }

    async fn forget_last_login(&self, id: &IdentityId) -> Result<(), Error> {
        self.profile.lock()?.last_logins.remove(id);
        Ok(())
    }

    async fn load_theme(&self) -> Result<Option<Theme>, Error> {
        Ok(self.profile.lock()?.theme)
    }

    async fn store_theme(&self, theme: Theme) -> Result<(), Error> {
        self.profile.lock()?.theme = Some(theme);
        Ok(())
    }
}

impl ChannelDirectory for Db {
    type Error = Error;

    async fn fetch_channel_links(&self) -> Result<Vec<ChannelLink>, Error> {
        Ok(self.channels.lock()?.clone())
    }

    async fn link_channel(&self, link: &ChannelLink) -> Result<(), Error> {
        let mut table_locked = self.channels.lock()?;
        match table_locked.iter_mut().find(|record| record.username == link.username) {
            Some(record) => *record = link.clone(),
            None => table_locked.push(link.clone()),
        }
        Ok(())
    }

    async fn unlink_channel(&self, username: &str) -> Result<Option<ChannelLink>, Error> {
        let mut table_locked = self.channels.lock()?;
        let res = table_locked
            .iter()
            .position(|record| record.username == username)
            .map(|position| table_locked.remove(position));
        Ok(res)
    }
}

impl AuthStorage for Db {
    type Error = Error;

    async fn fetch_authentication(&self, user_id: &IdentityId) -> Result<Option<AuthenticationInfo>, Error> {
        let res = self.auth.lock()?
            .iter()
            .find(|record| record.user_id == *user_id)
            .map(|record| AuthenticationInfo::from(record.phc_string.clone()));
        Ok(res)
    }

    async fn update_authentication(&self, user_id: &IdentityId, auth_info: AuthenticationInfo) -> Result<Option<AuthenticationInfo>, Error> {
        let mut table_locked = self.auth.lock()?;
        for record in table_locked.iter_mut() {
            if record.user_id == *user_id {
                let old_auth = record.phc_string.clone();
                record.phc_string = auth_info.phc_string().clone();
                return Ok(Some(old_auth.into()));
            };
        }
        table_locked.push(AuthRecord { user_id: *user_id, phc_string: auth_info.phc_string().clone() });
        Ok(None)
    }

    async fn remove_authentication(&self, user_id: &IdentityId) -> Result<Option<AuthenticationInfo>, Error> {
        let mut table_locked = self.auth.lock()?;
        let res = table_locked
            .iter()
            .position(|record| record.user_id == *user_id)
            .map(|position| AuthenticationInfo::from(table_locked.remove(position).phc_string));
        Ok(res)
    }
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeSet;

    use herald_core::{ConflictField, Role, Status};
    use uuid::Uuid;

    use super::*;

    fn identity(username: &str) -> Identity {
        Identity {
            id: Uuid::new_v4(),
            username: username.to_owned(),
            email: format!("{username}@example.com"),
            name: None,
            role: Role::User,
            status: Status::Active,
            created_at: Utc::now(),
        }
    }

    fn message_to(recipient: Recipient) -> Message {
        Message {
            id: Uuid::now_v7(),
            subject: "Subject".into(),
            content: "Content".into(),
            sender: Uuid::new_v4(),
            sender_name: "Admin User".into(),
            recipient,
            timestamp: Utc::now(),
            read_by: BTreeSet::new(),
        }
    }

    #[tokio::test]
    async fn identities_stay_unique() {
        let db = Db::new();
        let alice = identity("alice");
        assert_eq!(db.insert_identity(&alice).await.unwrap(), InsertOutcome::Inserted);
        assert_eq!(db.insert_identity(&identity("alice")).await.unwrap(), InsertOutcome::Taken(ConflictField::Username));

        let mut bob = identity("bob");
        db.insert_identity(&bob).await.unwrap();
        bob.email = alice.email.clone();
        assert_eq!(db.update_identity(&bob).await.unwrap(), UpdateOutcome::Taken(ConflictField::Email));
        assert_eq!(db.update_identity(&identity("carol")).await.unwrap(), UpdateOutcome::Missing);
    }

    #[tokio::test]
    async fn read_receipts_are_per_reader() {
        let db = Db::new();
        let broadcast = message_to(Recipient::All);
        db.create_message(&broadcast).await.unwrap();
        let (reader, other) = (Uuid::new_v4(), Uuid::new_v4());

        assert!(db.mark_read(&broadcast.id, &reader).await.unwrap());
        assert!(!db.mark_read(&broadcast.id, &reader).await.unwrap());
        assert!(!db.mark_read(&Uuid::now_v7(), &reader).await.unwrap());

        let stored = &db.fetch_messages().await.unwrap()[0];
        assert!(stored.is_read_by(&reader));
        assert!(!stored.is_read_by(&other));
    }

    #[tokio::test]
    async fn deleting_messages_spares_broadcasts() {
        let db = Db::new();
        let target = Uuid::new_v4();
        db.create_message(&message_to(Recipient::Identity(target))).await.unwrap();
        db.create_message(&message_to(Recipient::All)).await.unwrap();
        db.create_message(&message_to(Recipient::Identity(Uuid::new_v4()))).await.unwrap();

        assert_eq!(db.delete_messages_to(&target).await.unwrap(), 1);
        assert_eq!(db.fetch_messages().await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn channel_links_are_replaced_per_username() {
        let db = Db::new();
        let link = |chat_id: &str| ChannelLink { username: "alice".into(), chat_id: chat_id.into(), connected_since: Utc::now() };
        db.link_channel(&link("1")).await.unwrap();
        db.link_channel(&link("2")).await.unwrap();

        assert_eq!(db.fetch_channel_links().await.unwrap().len(), 1);
        assert_eq!(db.find_channel_link_by_chat("2").await.unwrap().map(|link| link.username), Some("alice".into()));
        assert!(db.unlink_channel("alice").await.unwrap().is_some());
        assert!(db.unlink_channel("alice").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn last_login_returns_previous_value() {
        let db = Db::new();
        let id = Uuid::new_v4();
        let first = Utc::now();
        assert_eq!(db.record_last_login(&id, first).await.unwrap(), None);
        assert_eq!(db.record_last_login(&id, Utc::now()).await.unwrap(), Some(first));
        db.forget_last_login(&id).await.unwrap();
        assert_eq!(db.fetch_last_login(&id).await.unwrap(), None);
    }
}
