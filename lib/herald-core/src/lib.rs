use std::collections::BTreeSet;
use std::fmt::{Display, Formatter};
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use uuid::Uuid;

/// Return type of the storage and service ports: a `Send` future resolving to `Result<T, Self::Error>`.
/// Written as a macro so the trait's own `Self::Error` can be named.
#[macro_export]
macro_rules! async_result {
    ($t:ty) => {
        impl ::std::future::Future<Output = ::std::result::Result<$t, Self::Error>> + Send
    };
}

pub mod authorization;
pub mod dashboard;
pub mod data_access;
pub mod directory;
pub mod error;
pub mod events;
pub mod messages;
pub mod notifications;
pub mod relay;
pub mod routing;
pub mod sessions;

pub use error::{ConflictField, Error};

pub type IdentityId = Uuid;
pub type MessageId = Uuid;

#[derive(Serialize, Deserialize, Clone, Copy, PartialEq, Eq, Hash, Debug)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Admin,
    User,
}

impl Display for Role {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Role::Admin => f.write_str("admin"),
            Role::User => f.write_str("user"),
        }
    }
}

impl FromStr for Role {
    type Err = UnknownVariant;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "admin" => Ok(Role::Admin),
            "user" => Ok(Role::User),
            other => Err(UnknownVariant(other.to_owned())),
        }
    }
}

#[derive(Serialize, Deserialize, Clone, Copy, PartialEq, Eq, Hash, Debug, Default)]
#[serde(rename_all = "lowercase")]
pub enum Status {
    #[default]
    Active,
    Inactive,
    Suspended,
}

impl Display for Status {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Status::Active => f.write_str("active"),
            Status::Inactive => f.write_str("inactive"),
            Status::Suspended => f.write_str("suspended"),
        }
    }
}

impl FromStr for Status {
    type Err = UnknownVariant;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "active" => Ok(Status::Active),
            "inactive" => Ok(Status::Inactive),
            "suspended" => Ok(Status::Suspended),
            other => Err(UnknownVariant(other.to_owned())),
        }
    }
}

#[derive(Debug, thiserror::Error, PartialEq)]
#[error("unknown value: {0}")]
pub struct UnknownVariant(pub String);

/// A dashboard account. Credentials live apart from it, behind [`authorization::AuthService`].
#[derive(Serialize, Deserialize, Clone, PartialEq, Debug)]
#[serde(rename_all = "camelCase")]
pub struct Identity {
    pub id: IdentityId,
    pub username: String,
    pub email: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    pub role: Role,
    #[serde(default)]
    pub status: Status,
    pub created_at: DateTime<Utc>,
}

impl Identity {
    pub fn display_name(&self) -> &str {
        self.name.as_deref().unwrap_or(&self.username)
    }

    pub fn is_admin(&self) -> bool {
        self.role == Role::Admin
    }
}

/// Addressee of a message: one identity, or every non-admin identity.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug)]
pub enum Recipient {
    All,
    Identity(IdentityId),
}

const RECIPIENT_ALL: &str = "all";

impl Display for Recipient {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Recipient::All => f.write_str(RECIPIENT_ALL),
            Recipient::Identity(id) => Display::fmt(id, f),
        }
    }
}

impl FromStr for Recipient {
    type Err = uuid::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s == RECIPIENT_ALL {
            Ok(Recipient::All)
        } else {
            s.parse().map(Recipient::Identity)
        }
    }
}

impl Serialize for Recipient {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for Recipient {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        raw.parse().map_err(serde::de::Error::custom)
    }
}

#[derive(Serialize, Deserialize, Clone, PartialEq, Debug)]
#[serde(rename_all = "camelCase")]
pub struct Message {
    pub id: MessageId,
    pub subject: String,
    pub content: String,
    pub sender: IdentityId,
    pub sender_name: String,
    pub recipient: Recipient,
    pub timestamp: DateTime<Utc>,
    /// Read receipts, one per recipient who opened the message.
    #[serde(default)]
    pub read_by: BTreeSet<IdentityId>,
}

impl Message {
    pub fn is_visible_to(&self, identity: &Identity) -> bool {
        match self.recipient {
            Recipient::All => !identity.is_admin(),
            Recipient::Identity(id) => id == identity.id,
        }
    }

    pub fn is_read_by(&self, reader: &IdentityId) -> bool {
        self.read_by.contains(reader)
    }
}

/// A message as one particular recipient sees it.
#[derive(Clone, PartialEq, Debug)]
pub struct InboxMessage {
    pub message: Message,
    pub read: bool,
}

#[derive(Clone, PartialEq, Eq, Debug)]
pub struct SessionToken(String);

impl SessionToken {
    pub fn generate() -> Self {
        SessionToken(Uuid::new_v4().simple().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<String> for SessionToken {
    fn from(value: String) -> Self {
        SessionToken(value)
    }
}

impl Display for SessionToken {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// The authenticated identity of a storage scope. `identity` is a copy taken at login
/// and refreshed only when the directory edits that same identity.
#[derive(Clone, PartialEq, Debug)]
pub struct Session {
    pub token: SessionToken,
    pub identity: Identity,
}

#[derive(Serialize, Deserialize, Clone, Copy, PartialEq, Eq, Debug, Default)]
#[serde(rename_all = "lowercase")]
pub enum Theme {
    #[default]
    Light,
    Dark,
}

impl Display for Theme {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Theme::Light => f.write_str("light"),
            Theme::Dark => f.write_str("dark"),
        }
    }
}

impl FromStr for Theme {
    type Err = UnknownVariant;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "light" => Ok(Theme::Light),
            "dark" => Ok(Theme::Dark),
            other => Err(UnknownVariant(other.to_owned())),
        }
    }
}

/// Association between a dashboard username and an external notification chat.
#[derive(Serialize, Deserialize, Clone, PartialEq, Debug)]
#[serde(rename_all = "camelCase")]
pub struct ChannelLink {
    pub username: String,
    pub chat_id: String,
    pub connected_since: DateTime<Utc>,
}

#[cfg(test)]
pub(crate) mod test_support {
    use super::*;

    pub fn identity(username: &str, role: Role) -> Identity {
        Identity {
            id: Uuid::new_v4(),
            username: username.to_owned(),
            email: format!("{username}@example.com"),
            name: None,
            role,
            status: Status::Active,
            created_at: Utc::now(),
        }
    }

    pub fn message(sender: &Identity, recipient: Recipient, subject: &str) -> Message {
        Message {
            id: Uuid::now_v7(),
            subject: subject.to_owned(),
            content: format!("{subject} content"),
            sender: sender.id,
            sender_name: sender.display_name().to_owned(),
            recipient,
            timestamp: Utc::now(),
            read_by: BTreeSet::new(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::test_support::*;
    use super::*;

    #[test]
    fn recipient_round_trips_through_strings() {
        assert_eq!("all".parse::<Recipient>().unwrap(), Recipient::All);
        let id = Uuid::new_v4();
        assert_eq!(id.to_string().parse::<Recipient>().unwrap(), Recipient::Identity(id));
        assert!("everyone".parse::<Recipient>().is_err());
        assert_eq!(serde_json::to_string(&Recipient::All).unwrap(), "\"all\"");
    }

    #[test]
    fn broadcast_is_visible_to_users_only() {
        let admin = identity("admin", Role::Admin);
        let alice = identity("alice", Role::User);
        let bob = identity("bob", Role::User);

        let broadcast = message(&admin, Recipient::All, "Hi");
        assert!(broadcast.is_visible_to(&alice));
        assert!(broadcast.is_visible_to(&bob));
        assert!(!broadcast.is_visible_to(&admin));

        let direct = message(&admin, Recipient::Identity(alice.id), "Only you");
        assert!(direct.is_visible_to(&alice));
        assert!(!direct.is_visible_to(&bob));
    }

    #[test]
    fn display_name_falls_back_to_username() {
        let mut alice = identity("alice", Role::User);
        assert_eq!(alice.display_name(), "alice");
        alice.name = Some("Alice Liddell".into());
        assert_eq!(alice.display_name(), "Alice Liddell");
    }

    #[test]
    fn identity_json_uses_camel_case_and_defaults_status() {
        let json = r#"{"id":"67e55044-10b1-426f-9247-bb680e5fe0c8","username":"user","email":"user@example.com",
            "name":"Demo User","role":"user","createdAt":"2024-03-01T00:00:00Z"}"#;
        let identity: Identity = serde_json::from_str(json).unwrap();
        assert_eq!(identity.status, Status::Active);
        assert_eq!(identity.role, Role::User);
        assert!(serde_json::to_string(&identity).unwrap().contains("\"createdAt\""));
    }

    #[test]
    fn session_tokens_are_opaque_hex() {
        let token = SessionToken::generate();
        assert_eq!(token.as_str().len(), 32);
        assert!(token.as_str().chars().all(|c| c.is_ascii_hexdigit()));
        assert_ne!(token, SessionToken::generate());
    }
}
