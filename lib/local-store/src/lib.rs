//! Dashboard storage in a single JSON file of string keys to string values:
//!
//! | key | value |
//! |---|---|
//! | `auth_token` | session token |
//! | `user` | JSON identity of the session |
//! | `users` | JSON array of identities |
//! | `messages` | JSON array of messages |
//! | `last_login_<id>` | RFC 3339 timestamp |
//! | `telegram_chat_id_<username>` | linked chat id |
//! | `telegram_connected_since_<username>` | RFC 3339 timestamp |
//! | `theme` | `light` or `dark` |
//! | `credential_<id>` | Argon2 PHC string |
//!
//! Every write rewrites the whole file.

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::Serialize;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use herald_auth::{AuthStorage, AuthenticationInfo};
use herald_core::data_access::*;
use herald_core::{ChannelLink, Identity, IdentityId, Message, MessageId, Recipient, Theme};

pub mod error;

pub use error::StoreError;
use error::Result;

const AUTH_TOKEN: &str = "auth_token";
const USER: &str = "user";
const USERS: &str = "users";
const MESSAGES: &str = "messages";
const THEME: &str = "theme";
const LAST_LOGIN_PREFIX: &str = "last_login_";
const CHAT_ID_PREFIX: &str = "telegram_chat_id_";
const CONNECTED_SINCE_PREFIX: &str = "telegram_connected_since_";
const CREDENTIAL_PREFIX: &str = "credential_";

type Entries = BTreeMap<String, String>;

struct Inner {
    path: Option<PathBuf>,
    entries: Entries,
}

#[derive(Clone)]
pub struct LocalStore {
    inner: Arc<Mutex<Inner>>,
}

impl LocalStore {
    /// Opens the store file at `path`, starting empty when it doesn't exist yet.
    pub async fn open(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        let entries = match tokio::fs::read_to_string(&path).await {
            Ok(raw) if raw.trim().is_empty() => Entries::new(),
            Ok(raw) => serde_json::from_str(&raw).map_err(StoreError::CorruptFile)?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                info!(path = %path.display(), "store file not found, starting empty");
                Entries::new()
            },
            Err(e) => return Err(e.into()),
        };
        debug!(path = %path.display(), keys = entries.len(), "store opened");

        let inner = Inner { path: Some(path), entries };
        Ok(LocalStore { inner: Arc::new(Mutex::new(inner)) })
    }

    /// A store that is never written to disk.
    pub fn in_memory() -> Self {
        let inner = Inner { path: None, entries: Entries::new() };
        LocalStore { inner: Arc::new(Mutex::new(inner)) }
    }

    /// Raw value of `key`.
    pub async fn get(&self, key: &str) -> Option<String> {
        self.inner.lock().await.entries.get(key).cloned()
    }

    /// Overwrites `key` with a raw value, bypassing every check.
    pub async fn set(&self, key: &str, value: &str) -> Result<()> {
        self.write(|entries| {
            entries.insert(key.to_owned(), value.to_owned());
            Ok(())
        }).await
    }

    async fn read<R>(&self, f: impl FnOnce(&Entries) -> Result<R>) -> Result<R> {
        let inner = self.inner.lock().await;
        f(&inner.entries)
    }

    /// Applies `f` to a copy of the entries and persists it. Memory only changes once the file
    /// is written.
    async fn write<R>(&self, f: impl FnOnce(&mut Entries) -> Result<R>) -> Result<R> {
        let mut inner = self.inner.lock().await;
        let mut entries = inner.entries.clone();
        let res = f(&mut entries)?;

        if let Some(path) = &inner.path {
            let raw = serde_json::to_string_pretty(&entries)
                .map_err(|source| StoreError::Encode { key: "store", source })?;
            let staging = path.with_extension("tmp");
            tokio::fs::write(&staging, raw).await?;
            tokio::fs::rename(&staging, path).await?;
        }
        inner.entries = entries;
        Ok(res)
    }
}

fn json_value<T: DeserializeOwned + Default>(entries: &Entries, key: &str) -> Result<T> {
    match entries.get(key) {
        None => Ok(T::default()),
        Some(raw) => serde_json::from_str(raw).map_err(|source| StoreError::CorruptValue { key: key.to_owned(), source }),
    }
}

fn set_json_value<T: Serialize>(entries: &mut Entries, key: &'static str, value: &T) -> Result<()> {
    let raw = serde_json::to_string(value).map_err(|source| StoreError::Encode { key, source })?;
    entries.insert(key.to_owned(), raw);
    Ok(())
}

fn timestamp(entries: &Entries, key: &str) -> Result<Option<DateTime<Utc>>> {
    match entries.get(key) {
        None => Ok(None),
        Some(raw) => {
            let at = DateTime::parse_from_rfc3339(raw)
                .map_err(|source| StoreError::CorruptTimestamp { key: key.to_owned(), source })?;
            Ok(Some(at.with_timezone(&Utc)))
        },
    }
}

fn channel_link(entries: &Entries, username: &str, chat_id: &str) -> Result<ChannelLink> {
    let connected_since = timestamp(entries, &format!("{CONNECTED_SINCE_PREFIX}{username}"))?;
    Ok(ChannelLink {
        username: username.to_owned(),
        chat_id: chat_id.to_owned(),
        connected_since: connected_since.unwrap_or_default(),
    })
}

impl IdentityRepository for LocalStore {
    type Error = StoreError;

    async fn fetch_identities(&self) -> Result<Vec<Identity>> {
        self.read(|entries| json_value(entries, USERS)).await
    }

    async fn insert_identity(&self, identity: &Identity) -> Result<InsertOutcome> {
        self.write(|entries| {
            let mut identities: Vec<Identity> = json_value(entries, USERS)?;
            if let Some(field) = conflicting_field(identity, &identities) {
                return Ok(InsertOutcome::Taken(field));
            }
            identities.push(identity.clone());
            set_json_value(entries, USERS, &identities)?;
            Ok(InsertOutcome::Inserted)
        }).await
    }

    async fn update_identity(&self, identity: &Identity) -> Result<UpdateOutcome> {
        self.write(|entries| {
            let mut identities: Vec<Identity> = json_value(entries, USERS)?;
            let Some(position) = identities.iter().position(|record| record.id == identity.id) else {
                return Ok(UpdateOutcome::Missing);
            };
            if let Some(field) = conflicting_field(identity, &identities) {
                return Ok(UpdateOutcome::Taken(field));
            }
            identities[position] = identity.clone();
            set_json_value(entries, USERS, &identities)?;
            Ok(UpdateOutcome::Updated)
        }).await
    }

    async fn delete_identity(&self, id: &IdentityId) -> Result<Option<Identity>> {
        self.write(|entries| {
            let mut identities: Vec<Identity> = json_value(entries, USERS)?;
            let Some(position) = identities.iter().position(|record| record.id == *id) else {
                return Ok(None);
            };
            let removed = identities.remove(position);
            set_json_value(entries, USERS, &identities)?;
            Ok(Some(removed))
        }).await
    }
}

impl MessageRepository for LocalStore {
    type Error = StoreError;

    async fn fetch_messages(&self) -> Result<Vec<Message>> {
        self.read(|entries| json_value(entries, MESSAGES)).await
    }

    async fn create_message(&self, message: &Message) -> Result<()> {
        self.write(|entries| {
            let mut messages: Vec<Message> = json_value(entries, MESSAGES)?;
            messages.push(message.clone());
            set_json_value(entries, MESSAGES, &messages)
        }).await
    }

    async fn mark_read(&self, message_id: &MessageId, reader: &IdentityId) -> Result<bool> {
        self.write(|entries| {
            let mut messages: Vec<Message> = json_value(entries, MESSAGES)?;
            let changed = match messages.iter_mut().find(|message| message.id == *message_id) {
                Some(message) => message.read_by.insert(*reader),
                None => false,
            };
            if changed {
                set_json_value(entries, MESSAGES, &messages)?;
            }
            Ok(changed)
        }).await
    }

    async fn delete_messages_to(&self, recipient: &IdentityId) -> Result<usize> {
        self.write(|entries| {
            let mut messages: Vec<Message> = json_value(entries, MESSAGES)?;
            let before = messages.len();
            messages.retain(|message| message.recipient != Recipient::Identity(*recipient));
            let removed = before - messages.len();
            if removed > 0 {
                set_json_value(entries, MESSAGES, &messages)?;
            }
            Ok(removed)
        }).await
    }
}

impl ProfileStorage for LocalStore {
    type Error = StoreError;

    async fn load_session_slot(&self) -> Result<Option<SessionSlot>> {
        self.read(|entries| {
            let token = entries.get(AUTH_TOKEN).cloned();
            let identity = entries.get(USER).cloned();
            // half a slot is handed over as is, the session store treats it as damaged
            let slot = match (token, identity) {
                (None, None) => None,
                (token, identity) => Some(SessionSlot {
                    token: token.unwrap_or_default(),
                    identity: identity.unwrap_or_default(),
                }),
            };
            Ok(slot)
        }).await
    }

    async fn store_session_slot(&self, slot: SessionSlot) -> Result<()> {
        self.write(|entries| {
            entries.insert(AUTH_TOKEN.to_owned(), slot.token);
            entries.insert(USER.to_owned(), slot.identity);
            Ok(())
        }).await
    }

    async fn clear_session_slot(&self) -> Result<()> {
        self.write(|entries| {
            entries.remove(AUTH_TOKEN);
            entries.remove(USER);
            Ok(())
        }).await
    }

    async fn fetch_last_login(&self, id: &IdentityId) -> Result<Option<DateTime<Utc>>> {
        self.read(|entries| timestamp(entries, &format!("{LAST_LOGIN_PREFIX}{id}"))).await
    }

    async fn record_last_login(&self, id: &IdentityId, at: DateTime<Utc>) -> Result<Option<DateTime<Utc>>> {
        let key = format!("{LAST_LOGIN_PREFIX}{id}");
        self.write(|entries| {
            // an unreadable previous stamp is simply replaced
            let previous = timestamp(entries, &key).unwrap_or_else(|e| {
                warn!("{e}");
                None
            });
            entries.insert(key, at.to_rfc3339());
            Ok(previous)
        }).await
    }

    async fn forget_last_login(&self, id: &IdentityId) -> Result<()> {
        self.write(|entries| {
            entries.remove(&format!("{LAST_LOGIN_PREFIX}{id}"));
            Ok(())
        }).await
    }

    async fn load_theme(&self) -> Result<Option<Theme>> {
        self.read(|entries| {
            let theme = entries.get(THEME).and_then(|raw| match raw.parse() {
                Ok(theme) => Some(theme),
                Err(e) => {
                    warn!("ignoring stored theme: {e}");
                    None
                },
            });
            Ok(theme)
        }).await
    }

    async fn store_theme(&self, theme: Theme) -> Result<()> {
        self.write(|entries| {
            entries.insert(THEME.to_owned(), theme.to_string());
            Ok(())
        }).await
    }
}

impl ChannelDirectory for LocalStore {
    type Error = StoreError;

    async fn fetch_channel_links(&self) -> Result<Vec<ChannelLink>> {
        self.read(|entries| {
            entries
                .iter()
                .filter_map(|(key, chat_id)| key.strip_prefix(CHAT_ID_PREFIX).map(|username| (username, chat_id)))
                .map(|(username, chat_id)| channel_link(entries, username, chat_id))
                .collect()
        }).await
    }

    async fn fetch_channel_link(&self, username: &str) -> Result<Option<ChannelLink>> {
        self.read(|entries| {
            match entries.get(&format!("{CHAT_ID_PREFIX}{username}")) {
                Some(chat_id) => channel_link(entries, username, chat_id).map(Some),
                None => Ok(None),
            }
        }).await
    }

    async fn link_channel(&self, link: &ChannelLink) -> Result<()> {
        self.write(|entries| {
            entries.insert(format!("{CHAT_ID_PREFIX}{}", link.username), link.chat_id.clone());
            entries.insert(format!("{CONNECTED_SINCE_PREFIX}{}", link.username), link.connected_since.to_rfc3339());
            Ok(())
        }).await
    }

    async fn unlink_channel(&self, username: &str) -> Result<Option<ChannelLink>> {
        self.write(|entries| {
            let chat_key = format!("{CHAT_ID_PREFIX}{username}");
            let link = match entries.get(&chat_key) {
                Some(chat_id) => Some(channel_link(entries, username, chat_id).unwrap_or_else(|e| {
                    warn!("{e}");
                    ChannelLink { username: username.to_owned(), chat_id: chat_id.clone(), connected_since: DateTime::default() }
                })),
                None => None,
            };
            entries.remove(&chat_key);
            entries.remove(&format!("{CONNECTED_SINCE_PREFIX}{username}"));
            Ok(link)
        }).await
    }
}

impl AuthStorage for LocalStore {
    type Error = StoreError;

    async fn fetch_authentication(&self, user_id: &IdentityId) -> Result<Option<AuthenticationInfo>> {
        let key = format!("{CREDENTIAL_PREFIX}{user_id}");
        self.read(|entries| match entries.get(&key) {
            None => Ok(None),
            Some(raw) => raw.parse().map(Some).map_err(|_| StoreError::CorruptCredential { key: key.clone() }),
        }).await
    }

    async fn update_authentication(&self, user_id: &IdentityId, auth_info: AuthenticationInfo) -> Result<Option<AuthenticationInfo>> {
        let key = format!("{CREDENTIAL_PREFIX}{user_id}");
        self.write(|entries| {
            let previous = entries.insert(key, auth_info.to_string());
            Ok(previous.and_then(|raw| raw.parse().ok()))
        }).await
    }

    async fn remove_authentication(&self, user_id: &IdentityId) -> Result<Option<AuthenticationInfo>> {
        self.write(|entries| {
            let previous = entries.remove(&format!("{CREDENTIAL_PREFIX}{user_id}"));
            Ok(previous.and_then(|raw| raw.parse().ok()))
        }).await
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
            name: Some("Demo User".into()),
            role: Role::User,
            status: Status::Active,
            created_at: Utc::now(),
        }
    }

    #[tokio::test]
    async fn survives_reopening() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("herald.json");

        let store = LocalStore::open(&path).await.unwrap();
        let alice = identity("alice");
        store.insert_identity(&alice).await.unwrap();
        store.store_theme(Theme::Dark).await.unwrap();

        let reopened = LocalStore::open(&path).await.unwrap();
        assert_eq!(reopened.fetch_identities().await.unwrap(), vec![alice]);
        assert_eq!(reopened.load_theme().await.unwrap(), Some(Theme::Dark));
    }

    #[tokio::test]
    async fn failed_write_leaves_memory_untouched() {
        let dir = tempfile::tempdir().unwrap();
        let store_dir = dir.path().join("data");
        std::fs::create_dir(&store_dir).unwrap();
        let store = LocalStore::open(store_dir.join("herald.json")).await.unwrap();
        std::fs::remove_dir_all(&store_dir).unwrap();

        assert!(matches!(store.insert_identity(&identity("alice")).await, Err(StoreError::Io(_))));
        assert!(store.fetch_identities().await.unwrap().is_empty());
        assert_eq!(store.get("users").await, None);
    }

    #[tokio::test]
    async fn corrupt_file_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("herald.json");
        std::fs::write(&path, "{not json").unwrap();
        assert!(matches!(LocalStore::open(&path).await, Err(StoreError::CorruptFile(_))));
    }

    #[tokio::test]
    async fn uses_the_flat_key_layout() {
        let store = LocalStore::in_memory();
        let alice = identity("alice");
        store.insert_identity(&alice).await.unwrap();
        store.store_session_slot(SessionSlot { token: "abc".into(), identity: "{}".into() }).await.unwrap();
        store.record_last_login(&alice.id, Utc::now()).await.unwrap();
        store.link_channel(&ChannelLink { username: "alice".into(), chat_id: "42".into(), connected_since: Utc::now() }).await.unwrap();
        store.store_theme(Theme::Light).await.unwrap();

        let users = store.get("users").await.unwrap();
        assert!(users.contains("\"username\":\"alice\""));
        assert!(users.contains("\"createdAt\""));
        assert_eq!(store.get("auth_token").await.as_deref(), Some("abc"));
        assert_eq!(store.get("user").await.as_deref(), Some("{}"));
        assert!(store.get(&format!("last_login_{}", alice.id)).await.is_some());
        assert_eq!(store.get("telegram_chat_id_alice").await.as_deref(), Some("42"));
        assert!(store.get("telegram_connected_since_alice").await.is_some());
        assert_eq!(store.get("theme").await.as_deref(), Some("light"));
    }

    #[tokio::test]
    async fn messages_keep_read_receipts() {
        let store = LocalStore::in_memory();
        let reader = Uuid::new_v4();
        let message = Message {
            id: Uuid::now_v7(),
            subject: "Welcome".into(),
            content: "Hello".into(),
            sender: Uuid::new_v4(),
            sender_name: "Admin User".into(),
            recipient: Recipient::All,
            timestamp: Utc::now(),
            read_by: BTreeSet::new(),
        };
        store.create_message(&message).await.unwrap();

        assert!(store.mark_read(&message.id, &reader).await.unwrap());
        assert!(!store.mark_read(&message.id, &reader).await.unwrap());
        assert!(store.get("messages").await.unwrap().contains("\"readBy\""));
        assert!(store.fetch_messages().await.unwrap()[0].is_read_by(&reader));
    }

    #[tokio::test]
    async fn damaged_values_surface_as_errors() {
        let store = LocalStore::in_memory();
        store.set("users", "[{broken").await.unwrap();
        assert!(matches!(store.fetch_identities().await, Err(StoreError::CorruptValue { .. })));
        assert!(matches!(store.insert_identity(&identity("bob")).await, Err(StoreError::CorruptValue { .. })));
        // the damaged value is left alone
        assert_eq!(store.get("users").await.as_deref(), Some("[{broken"));
    }

    #[tokio::test]
    async fn half_a_session_slot_is_still_reported() {
        let store = LocalStore::in_memory();
        assert_eq!(store.load_session_slot().await.unwrap(), None);

        store.set("auth_token", "abc").await.unwrap();
        let slot = store.load_session_slot().await.unwrap().unwrap();
        assert_eq!(slot.token, "abc");
        assert!(slot.identity.is_empty());
    }

    #[tokio::test]
    async fn conflicts_are_detected() {
        let store = LocalStore::in_memory();
        store.insert_identity(&identity("alice")).await.unwrap();
        assert_eq!(
            store.insert_identity(&identity("alice")).await.unwrap(),
            InsertOutcome::Taken(ConflictField::Username),
        );
    }
}
