use anyhow::Context;
use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::info;

use crate::authorization::AuthService;
use crate::data_access::DataAccess;
use crate::directory::{DirectoryStats, NewIdentity, UserDirectory};
use crate::error::{Error, Result};
use crate::events::EventBus;
use crate::messages::MessageStore;
use crate::notifications::NotificationProjector;
use crate::relay::{NotificationChannel, Relay};
use crate::sessions::SessionStore;
use crate::{ChannelLink, Identity, Role, Theme};

pub const DEFAULT_ADMIN_USERNAME: &str = "admin";
pub const DEFAULT_ADMIN_PASSWORD: &str = "admin123";
pub const DEMO_USERNAME: &str = "user";
pub const DEMO_PASSWORD: &str = "user123";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AdminOverview {
    #[serde(flatten)]
    pub directory: DirectoryStats,
    pub messages_sent: usize,
}

/// The wired-up application: one instance per storage scope, every service sharing the same
/// backend and event bus.
#[derive(Clone)]
pub struct Dashboard<D, A, C> {
    data_access: D,
    pub sessions: SessionStore<D, A>,
    pub directory: UserDirectory<D, A>,
    pub messages: MessageStore<D>,
    pub notifications: NotificationProjector<D>,
    pub relay: Relay<D, A, C>,
    pub events: EventBus,
}

impl<D: DataAccess, A: AuthService, C: NotificationChannel> Dashboard<D, A, C> {
    pub fn new(data_access: D, auth: A, channel: C) -> Self {
        let events = EventBus::new();
        let sessions = SessionStore::new(data_access.clone(), auth.clone());
        let directory = UserDirectory::new(data_access.clone(), auth.clone(), sessions.clone(), events.clone());
        let messages = MessageStore::new(data_access.clone(), events.clone());
        let notifications = NotificationProjector::new(messages.clone(), events.clone());
        let relay = Relay::new(data_access.clone(), auth, channel);

        Dashboard { data_access, sessions, directory, messages, notifications, relay, events }
    }

    /// Seeds `accounts` into an empty directory. Returns how many were created.
    pub async fn bootstrap(&self, accounts: Vec<NewIdentity>) -> Result<usize> {
        let created = self.directory.seed(accounts).await?;
        if created > 0 {
            info!(created, "default accounts seeded");
        }
        Ok(created)
    }

    pub async fn admin_overview(&self, caller: &Identity, now: DateTime<Utc>) -> Result<AdminOverview> {
        let directory = self.directory.stats(caller, now).await?;
        let messages_sent = self.messages.list_sent_by(caller).await?.len();
        Ok(AdminOverview { directory, messages_sent })
    }

    pub async fn theme(&self) -> Result<Theme> {
        let theme = self.data_access.load_theme().await.context("Couldn't load theme")?;
        Ok(theme.unwrap_or_default())
    }

    pub async fn set_theme(&self, theme: Theme) -> Result<()> {
        self.data_access.store_theme(theme).await.context("Couldn't store theme")?;
        Ok(())
    }

    pub async fn channels(&self, caller: &Identity) -> Result<Vec<ChannelLink>> {
        if !caller.is_admin() {
            return Err(Error::Unauthorized);
        }
        let links = self.data_access.fetch_channel_links().await.context("Couldn't fetch channel links")?;
        Ok(links)
    }

    /// The linked chat of `caller`, if any.
    pub async fn own_channel(&self, caller: &Identity) -> Result<Option<ChannelLink>> {
        let link = self.data_access
            .fetch_channel_link(&caller.username).await
            .with_context(|| format!("Couldn't fetch channel link of {}", caller.username))?;
        Ok(link)
    }

    /// Removes the chat link of `username`; allowed for admins and for the owner.
    pub async fn unlink_channel(&self, caller: &Identity, username: &str) -> Result<ChannelLink> {
        if !caller.is_admin() && caller.username != username {
            return Err(Error::Unauthorized);
        }
        let link = self.data_access
            .unlink_channel(username).await
            .with_context(|| format!("Couldn't unlink channel of {username}"))?
            .ok_or(Error::NotFound("channel link"))?;

        info!(username, by = %caller.username, "chat unlinked");
        Ok(link)
    }
}

/// The stock accounts of a fresh installation.
pub fn default_accounts(admin_password: &str, include_demo_user: bool) -> Vec<NewIdentity> {
    let mut accounts = vec![NewIdentity {
        username: DEFAULT_ADMIN_USERNAME.to_owned(),
        email: "admin@example.com".to_owned(),
        password: admin_password.to_owned(),
        name: Some("Admin User".to_owned()),
        role: Some(Role::Admin),
    }];
    if include_demo_user {
        accounts.push(NewIdentity {
            username: DEMO_USERNAME.to_owned(),
            email: "user@example.com".to_owned(),
            password: DEMO_PASSWORD.to_owned(),
            name: Some("Demo User".to_owned()),
            role: Some(Role::User),
        });
    }
    accounts
}
